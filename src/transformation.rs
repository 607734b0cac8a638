//! Per-column transformation records and the table-level transformation.
//!
//! A [`TransformationArray`] is the user-curated state: one
//! [`ColumnTransformation`] per known column plus exactly one
//! [`UnknownColumnsTransformation`] that sits at a fixed slot among them and
//! governs columns discovered later.
//!
//! Output order is a stable sort by `position`; equal positions keep array
//! order, with the unknown-columns slot taking part in that order.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::{
    catalog::ConversionPath,
    error::ConfigError,
    spec::{RawSpec, TableSpec},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnFilterMode {
    /// Every column seen in any item.
    #[default]
    Union,
    /// Only columns present in every item.
    Intersection,
}

impl ColumnFilterMode {
    pub fn relevant<'a, T>(&self, raw: &'a RawSpec<T>) -> &'a TableSpec<T> {
        match self {
            ColumnFilterMode::Union => &raw.union,
            ColumnFilterMode::Intersection => &raw.intersection,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnFilterMode::Union => "union",
            ColumnFilterMode::Intersection => "intersection",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnTransformation<T, U> {
    /// Raw column name; unique within an array.
    pub name: String,
    pub path: ConversionPath<T, U>,
    pub include: bool,
    pub position: usize,
    pub output_name: String,
}

impl<T, U> ColumnTransformation<T, U> {
    pub fn new(name: impl Into<String>, path: ConversionPath<T, U>, position: usize) -> Self {
        let name = name.into();
        Self {
            output_name: name.clone(),
            name,
            path,
            include: true,
            position,
        }
    }

    pub fn source_type(&self) -> &T {
        &self.path.source
    }

    pub fn destination_type(&self) -> &U {
        &self.path.destination
    }

    pub fn is_renamed(&self) -> bool {
        self.output_name != self.name
    }
}

/// Policy for columns that have no transformation of their own yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownColumnsTransformation<U> {
    pub include: bool,
    pub position: usize,
    pub forced_type: Option<U>,
}

impl<U> Default for UnknownColumnsTransformation<U> {
    fn default() -> Self {
        Self {
            include: true,
            position: 0,
            forced_type: None,
        }
    }
}

/// One slot of a [`TransformationArray`] in array order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformationEntry<'a, T, U> {
    Column(&'a ColumnTransformation<T, U>),
    Unknown(&'a UnknownColumnsTransformation<U>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformationArray<T, U> {
    columns: Vec<ColumnTransformation<T, U>>,
    unknown_index: usize,
    unknown: UnknownColumnsTransformation<U>,
}

impl<T, U> Default for TransformationArray<T, U> {
    fn default() -> Self {
        Self {
            columns: Vec::new(),
            unknown_index: 0,
            unknown: UnknownColumnsTransformation::default(),
        }
    }
}

impl<T, U> TransformationArray<T, U> {
    /// Builds an array whose unknown-columns slot precedes `columns[unknown_index]`.
    pub fn new(
        columns: Vec<ColumnTransformation<T, U>>,
        unknown_index: usize,
        unknown: UnknownColumnsTransformation<U>,
    ) -> Result<Self, ConfigError> {
        if unknown_index > columns.len() {
            return Err(ConfigError::InvalidUnknownSlot {
                index: unknown_index,
                columns: columns.len(),
            });
        }
        let mut seen = HashSet::with_capacity(columns.len());
        if let Some(duplicate) = columns.iter().find(|column| !seen.insert(column.name.as_str())) {
            return Err(ConfigError::DuplicateTransformation {
                name: duplicate.name.clone(),
            });
        }
        Ok(Self::from_parts(columns, unknown_index, unknown))
    }

    pub(crate) fn from_parts(
        columns: Vec<ColumnTransformation<T, U>>,
        unknown_index: usize,
        unknown: UnknownColumnsTransformation<U>,
    ) -> Self {
        Self {
            columns,
            unknown_index,
            unknown,
        }
    }

    pub fn columns(&self) -> &[ColumnTransformation<T, U>] {
        &self.columns
    }

    pub fn before(&self) -> &[ColumnTransformation<T, U>] {
        &self.columns[..self.unknown_index]
    }

    pub fn after(&self) -> &[ColumnTransformation<T, U>] {
        &self.columns[self.unknown_index..]
    }

    pub fn unknown(&self) -> &UnknownColumnsTransformation<U> {
        &self.unknown
    }

    pub fn unknown_index(&self) -> usize {
        self.unknown_index
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&ColumnTransformation<T, U>> {
        self.columns.iter().find(|column| column.name == name)
    }

    pub fn entries(&self) -> impl Iterator<Item = TransformationEntry<'_, T, U>> {
        self.before()
            .iter()
            .map(TransformationEntry::Column)
            .chain(std::iter::once(TransformationEntry::Unknown(&self.unknown)))
            .chain(self.after().iter().map(TransformationEntry::Column))
    }

    /// Columns in output order, regardless of `include`.
    pub fn in_output_order(&self) -> Vec<&ColumnTransformation<T, U>> {
        let mut ordered = self.columns.iter().collect::<Vec<_>>();
        ordered.sort_by_key(|column| column.position);
        ordered
    }

    fn index_of(&self, name: &str) -> Result<usize, ConfigError> {
        self.columns
            .iter()
            .position(|column| column.name == name)
            .ok_or_else(|| ConfigError::UnknownColumn(name.to_string()))
    }
}

impl<T: Clone, U: Clone> TransformationArray<T, U> {
    pub fn with_output_name(&self, name: &str, output_name: impl Into<String>) -> Result<Self, ConfigError> {
        let index = self.index_of(name)?;
        let mut next = self.clone();
        next.columns[index].output_name = output_name.into();
        Ok(next)
    }

    pub fn with_included(&self, name: &str, include: bool) -> Result<Self, ConfigError> {
        let index = self.index_of(name)?;
        let mut next = self.clone();
        next.columns[index].include = include;
        Ok(next)
    }

    pub fn with_conversion(&self, name: &str, path: ConversionPath<T, U>) -> Result<Self, ConfigError> {
        let index = self.index_of(name)?;
        let mut next = self.clone();
        next.columns[index].path = path;
        Ok(next)
    }

    pub fn with_position(&self, name: &str, position: usize) -> Result<Self, ConfigError> {
        let index = self.index_of(name)?;
        let mut next = self.clone();
        next.columns[index].position = position;
        Ok(next)
    }

    pub fn with_unknown_columns(&self, unknown: UnknownColumnsTransformation<U>) -> Self {
        let mut next = self.clone();
        next.unknown = unknown;
        next
    }

    /// Renumbers positions to `0..n` following the current output order.
    ///
    /// The unknown slot receives the number of columns ordered before it, so
    /// columns later inserted at that position keep sorting where it sits.
    pub fn compacted(&self) -> Self {
        let slot = |index: usize| index + usize::from(index >= self.unknown_index);
        let mut order = (0..self.columns.len()).collect::<Vec<_>>();
        order.sort_by_key(|index| (self.columns[*index].position, slot(*index)));

        let unknown_key = (self.unknown.position, self.unknown_index);
        let mut next = self.clone();
        let mut unknown_position = None;
        for (rank, index) in order.iter().enumerate() {
            let key = (self.columns[*index].position, slot(*index));
            if unknown_position.is_none() && key > unknown_key {
                unknown_position = Some(rank);
            }
            next.columns[*index].position = rank;
        }
        next.unknown.position = unknown_position.unwrap_or(order.len());
        next
    }
}

/// The complete transformation state of a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableTransformation<T, U> {
    pub raw_spec: RawSpec<T>,
    pub columns: TransformationArray<T, U>,
    pub filter_mode: ColumnFilterMode,
    pub enforce_types: bool,
}

impl<T, U> TableTransformation<T, U> {
    pub fn relevant_spec(&self) -> &TableSpec<T> {
        self.filter_mode.relevant(&self.raw_spec)
    }

    pub fn transformation(&self, name: &str) -> Option<&ColumnTransformation<T, U>> {
        self.columns.get(name)
    }

    /// Included columns that are eligible under the filter mode, in output order.
    pub fn selected(&self) -> Vec<&ColumnTransformation<T, U>> {
        let relevant = self.relevant_spec();
        self.columns
            .in_output_order()
            .into_iter()
            .filter(|column| column.include && relevant.contains(&column.name))
            .collect()
    }
}
