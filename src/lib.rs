//! Schema reconciliation for readers that combine many tabular source items.
//!
//! Readers report one [`TableSpec`] per source item. This crate merges them
//! into a raw union/intersection, resolves every column to an output type
//! through a [`ConversionCatalog`], and reconciles a previously saved
//! [`TransformationArray`] (renames, exclusions, type overrides, order and
//! the unknown-columns policy) against the newly observed schema. The result
//! is an immutable [`TableSpecConfig`] that can be persisted and restored,
//! including records written by older releases.
//!
//! Data flow: [`SchemaProbe`] per item → [`compute_raw_spec`] →
//! [`reconcile`] → [`TableSpecConfig`] → [`persist`].

pub mod catalog;
pub mod config;
pub mod error;
pub mod evolution;
pub mod persist;
pub mod probe;
pub mod reconcile;
pub mod spec;
pub mod transformation;
pub mod types;

pub use catalog::{ConversionCatalog, ConversionPath, ConversionResolver, StandardCatalog};
pub use config::{ComputedConfig, OutputColumn, TableSpecConfig};
pub use error::{
    CatalogError, ConfigError, LoadError, ProbeError, ReconciliationWarning, RefreshError,
};
pub use evolution::{SchemaChange, SchemaChangeKind, SchemaEvolution};
pub use probe::{ProbeCoordinator, ProbeTicket, RefreshOutcome, SchemaProbe};
pub use reconcile::{ReconcileOptions, Reconciliation, reconcile};
pub use spec::{ColumnSpec, RawSpec, TableSpec, compute_raw_spec};
pub use transformation::{
    ColumnFilterMode, ColumnTransformation, TableTransformation, TransformationArray,
    UnknownColumnsTransformation,
};
pub use types::{ColumnType, DecimalSpec};
