//! Conversion paths from external (reader) types to output types.
//!
//! A reader supplies a [`ConversionCatalog`]; the engine only talks to it
//! through a [`ConversionResolver`], which adds the default/candidate/resolve
//! contract on top of the raw catalog lookups.

use std::{collections::HashSet, fmt};

use itertools::Itertools;

use crate::{error::CatalogError, types::ColumnType};

/// A named mapping from an external type to an output type. Identity is `id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConversionPath<T, U> {
    pub source: T,
    pub destination: U,
    pub id: String,
}

impl<T, U> ConversionPath<T, U> {
    pub fn new(source: T, destination: U, id: impl Into<String>) -> Self {
        Self {
            source,
            destination,
            id: id.into(),
        }
    }
}

impl<T: fmt::Display, U: fmt::Display> fmt::Display for ConversionPath<T, U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} -> {})", self.id, self.source, self.destination)
    }
}

pub type PathOf<C> =
    ConversionPath<<C as ConversionCatalog>::External, <C as ConversionCatalog>::Output>;

/// Catalog of conversion paths supplied per reader.
///
/// Path ids must be stable across releases: they are what gets persisted.
/// `path_by_id` must return a path whose `source` is the type it was listed
/// under.
pub trait ConversionCatalog {
    type External: Clone + PartialEq + fmt::Debug + fmt::Display;
    type Output: Clone + PartialEq + fmt::Debug + fmt::Display;

    fn default_path(
        &self,
        external: &Self::External,
    ) -> Option<ConversionPath<Self::External, Self::Output>>;

    fn candidate_paths(
        &self,
        external: &Self::External,
    ) -> Vec<ConversionPath<Self::External, Self::Output>>;

    fn path_by_id(&self, id: &str) -> Option<ConversionPath<Self::External, Self::Output>>;
}

pub struct ConversionResolver<'a, C> {
    catalog: &'a C,
}

impl<C> Clone for ConversionResolver<'_, C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<C> Copy for ConversionResolver<'_, C> {}

impl<'a, C: ConversionCatalog> ConversionResolver<'a, C> {
    pub fn new(catalog: &'a C) -> Self {
        Self { catalog }
    }

    /// Fails only when the catalog is misconfigured for `external`.
    pub fn default_path(&self, external: &C::External) -> Result<PathOf<C>, CatalogError> {
        self.catalog
            .default_path(external)
            .ok_or_else(|| CatalogError::NoPath {
                external: external.to_string(),
            })
    }

    /// Candidates in catalog order, deduplicated by id, always containing the default.
    pub fn candidate_paths(&self, external: &C::External) -> Result<Vec<PathOf<C>>, CatalogError> {
        let default = self.default_path(external)?;
        let mut candidates = self
            .catalog
            .candidate_paths(external)
            .into_iter()
            .unique_by(|path| path.id.clone())
            .collect::<Vec<_>>();
        if !candidates.iter().any(|path| path.id == default.id) {
            candidates.insert(0, default);
        }
        Ok(candidates)
    }

    /// First candidate whose destination equals `destination`.
    pub fn resolve(&self, external: &C::External, destination: &C::Output) -> Option<PathOf<C>> {
        self.candidate_paths(external)
            .ok()?
            .into_iter()
            .find(|path| &path.destination == destination)
    }

    /// Whether `path` is still offered for its own source type.
    pub fn is_valid(&self, path: &PathOf<C>) -> bool {
        self.candidate_paths(&path.source)
            .map(|candidates| candidates.iter().any(|candidate| candidate.id == path.id))
            .unwrap_or(false)
    }

    pub fn path_by_id(&self, id: &str) -> Option<PathOf<C>> {
        self.catalog.path_by_id(id)
    }
}

/// Built-in catalog over [`ColumnType`] used by text-based readers.
///
/// The identity conversion is the default for every type, and every type can
/// also be rendered as `string`. Path ids look like `integer->float`.
#[derive(Debug, Clone, Default)]
pub struct StandardCatalog {
    disabled: HashSet<String>,
}

impl StandardCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a catalog that no longer offers the path with the given id.
    /// Default (identity) paths cannot be disabled.
    pub fn without(mut self, id: impl Into<String>) -> Self {
        self.disabled.insert(id.into());
        self
    }

    pub fn path_id(source: &ColumnType, destination: &ColumnType) -> String {
        format!(
            "{}->{}",
            source.signature_token(),
            destination.signature_token()
        )
    }

    fn path(source: &ColumnType, destination: ColumnType) -> ConversionPath<ColumnType, ColumnType> {
        let id = Self::path_id(source, &destination);
        ConversionPath::new(source.clone(), destination, id)
    }

    fn destinations(source: &ColumnType) -> Vec<ColumnType> {
        let mut targets = vec![source.clone()];
        match source {
            ColumnType::Integer => {
                targets.extend([ColumnType::Float, ColumnType::Currency]);
            }
            ColumnType::Float => targets.push(ColumnType::Currency),
            ColumnType::Boolean => targets.push(ColumnType::Integer),
            ColumnType::Date => targets.push(ColumnType::DateTime),
            ColumnType::DateTime => targets.extend([ColumnType::Date, ColumnType::Time]),
            ColumnType::Currency => targets.push(ColumnType::Float),
            ColumnType::Decimal(_) => targets.push(ColumnType::Float),
            ColumnType::String | ColumnType::Time | ColumnType::Guid => {}
        }
        if *source != ColumnType::String {
            targets.push(ColumnType::String);
        }
        targets
    }
}

impl ConversionCatalog for StandardCatalog {
    type External = ColumnType;
    type Output = ColumnType;

    fn default_path(&self, external: &ColumnType) -> Option<PathOf<Self>> {
        Some(Self::path(external, external.clone()))
    }

    fn candidate_paths(&self, external: &ColumnType) -> Vec<PathOf<Self>> {
        Self::destinations(external)
            .into_iter()
            .map(|destination| Self::path(external, destination))
            .filter(|path| path.source == path.destination || !self.disabled.contains(&path.id))
            .collect()
    }

    fn path_by_id(&self, id: &str) -> Option<PathOf<Self>> {
        let (source, destination) = id.split_once("->")?;
        let source = ColumnType::from_token(source).ok()?;
        let destination = ColumnType::from_token(destination).ok()?;
        self.candidate_paths(&source)
            .into_iter()
            .find(|path| path.destination == destination)
    }
}
