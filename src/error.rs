//! Error taxonomy and non-fatal reconciliation warnings.
//!
//! Probe and catalog failures abort the current computation attempt, config
//! failures are returned to the caller verbatim, and reconciliation warnings
//! travel alongside a valid result.

use std::fmt;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("io error while probing item '{item}': {source}")]
    Io {
        item: String,
        #[source]
        source: std::io::Error,
    },
    #[error("item '{item}' could not be read: {reason}")]
    Unreadable { item: String, reason: String },
    #[error("probe of group '{group}' was superseded by a newer request")]
    Cancelled { group: String },
}

impl ProbeError {
    pub fn io(item: impl Into<String>, source: std::io::Error) -> Self {
        ProbeError::Io {
            item: item.into(),
            source,
        }
    }

    pub fn unreadable(item: impl Into<String>, reason: impl Into<String>) -> Self {
        ProbeError::Unreadable {
            item: item.into(),
            reason: reason.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ProbeError::Cancelled { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    #[error("no conversion path registered for external type '{external}'")]
    NoPath { external: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("item ids and per-item specs disagree: {detail}")]
    InconsistentItems { detail: String },
    #[error("output column name '{name}' is produced by both '{first}' and '{second}'")]
    DuplicateOutputName {
        name: String,
        first: String,
        second: String,
    },
    #[error("persisted config defines neither a column filter mode nor a legacy merge mode")]
    MissingFilterMode,
    #[error("column '{name}' has more than one transformation")]
    DuplicateTransformation { name: String },
    #[error("unknown-columns slot {index} is out of range for {columns} column(s)")]
    InvalidUnknownSlot { index: usize, columns: usize },
    #[error("no transformation exists for column '{0}'")]
    UnknownColumn(String),
    #[error("persisted config is missing required field '{0}'")]
    MissingField(&'static str),
    #[error("persisted config version {found} is newer than supported version {supported}")]
    UnsupportedVersion { found: u32, supported: u32 },
}

/// Failure of a whole probe, reconcile and commit cycle.
#[derive(Debug, Error)]
pub enum RefreshError {
    #[error(transparent)]
    Probe(#[from] ProbeError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Failure to restore a persisted config.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconciliationWarning {
    /// A configured column changed its external type since it was configured.
    ColumnRetyped {
        column: String,
        previous: String,
        current: String,
        kept: bool,
    },
    /// The stored path became invalid and was swapped for one with the same destination.
    PathReplaced {
        column: String,
        previous_path: String,
        replacement_path: String,
    },
    /// No path with the stored destination exists any more; the default path is used.
    UnmappablePath {
        column: String,
        previous_path: String,
        fallback_path: String,
    },
    /// A persisted path id is unknown to the catalog.
    UnmappableLegacyPath {
        column: String,
        path_id: String,
        fallback_path: String,
    },
    /// Items of the same probe disagree on a column's type; the first-seen type wins.
    ConflictingItemTypes {
        column: String,
        kept: String,
        item: String,
        found: String,
    },
}

impl ReconciliationWarning {
    pub fn column(&self) -> &str {
        match self {
            ReconciliationWarning::ColumnRetyped { column, .. }
            | ReconciliationWarning::PathReplaced { column, .. }
            | ReconciliationWarning::UnmappablePath { column, .. }
            | ReconciliationWarning::UnmappableLegacyPath { column, .. }
            | ReconciliationWarning::ConflictingItemTypes { column, .. } => column,
        }
    }
}

impl fmt::Display for ReconciliationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconciliationWarning::ColumnRetyped {
                column,
                previous,
                current,
                kept,
            } => {
                if *kept {
                    write!(
                        f,
                        "Column '{column}' changed type from {previous} to {current}; previous output type retained"
                    )
                } else {
                    write!(
                        f,
                        "Column '{column}' changed type from {previous} to {current}; configuration reset"
                    )
                }
            }
            ReconciliationWarning::PathReplaced {
                column,
                previous_path,
                replacement_path,
            } => write!(
                f,
                "Column '{column}': conversion '{previous_path}' replaced by '{replacement_path}'"
            ),
            ReconciliationWarning::UnmappablePath {
                column,
                previous_path,
                fallback_path,
            } => write!(
                f,
                "Column '{column}': conversion '{previous_path}' is no longer available, using '{fallback_path}'"
            ),
            ReconciliationWarning::UnmappableLegacyPath {
                column,
                path_id,
                fallback_path,
            } => write!(
                f,
                "Column '{column}': stored conversion '{path_id}' is unknown, using '{fallback_path}'"
            ),
            ReconciliationWarning::ConflictingItemTypes {
                column,
                kept,
                item,
                found,
            } => write!(
                f,
                "Column '{column}' is {found} in item '{item}' but {kept} elsewhere; keeping {kept}"
            ),
        }
    }
}
