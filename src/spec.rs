//! Schema primitives and the raw union/intersection computation.
//!
//! A [`TableSpec`] is what a reader reports for one source item: an ordered
//! list of column names with their external types. [`compute_raw_spec`]
//! combines the specs of every item of a source group into a [`RawSpec`].

use std::{
    collections::{HashMap, HashSet},
    fmt,
};

use log::debug;

use crate::error::ReconciliationWarning;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnSpec<T> {
    pub name: String,
    pub data_type: T,
    /// `false` when the reader could not determine a type for the column.
    pub has_type: bool,
}

impl<T> ColumnSpec<T> {
    pub fn new(name: impl Into<String>, data_type: T) -> Self {
        Self {
            name: name.into(),
            data_type,
            has_type: true,
        }
    }

    pub fn untyped(name: impl Into<String>, data_type: T) -> Self {
        Self {
            name: name.into(),
            data_type,
            has_type: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSpec<T> {
    columns: Vec<ColumnSpec<T>>,
}

impl<T> Default for TableSpec<T> {
    fn default() -> Self {
        Self {
            columns: Vec::new(),
        }
    }
}

impl<T> TableSpec<T> {
    pub fn new(columns: Vec<ColumnSpec<T>>) -> Self {
        Self { columns }
    }

    pub fn columns(&self) -> &[ColumnSpec<T>] {
        &self.columns
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ColumnSpec<T>> {
        self.columns.iter()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSpec<T>> {
        self.columns.iter().find(|column| column.name == name)
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn names(&self) -> Vec<&str> {
        self.columns.iter().map(|column| column.name.as_str()).collect()
    }

    /// Returns the first name that occurs more than once, if any.
    pub fn duplicate_name(&self) -> Option<&str> {
        let mut seen = HashSet::with_capacity(self.columns.len());
        self.columns
            .iter()
            .map(|column| column.name.as_str())
            .find(|name| !seen.insert(*name))
    }
}

impl<T> FromIterator<ColumnSpec<T>> for TableSpec<T> {
    fn from_iter<I: IntoIterator<Item = ColumnSpec<T>>>(iter: I) -> Self {
        Self {
            columns: iter.into_iter().collect(),
        }
    }
}

impl<'a, T> IntoIterator for &'a TableSpec<T> {
    type Item = &'a ColumnSpec<T>;
    type IntoIter = std::slice::Iter<'a, ColumnSpec<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.columns.iter()
    }
}

/// Union and intersection of the column sets of all items in a group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawSpec<T> {
    pub union: TableSpec<T>,
    pub intersection: TableSpec<T>,
}

impl<T> Default for RawSpec<T> {
    fn default() -> Self {
        Self {
            union: TableSpec::default(),
            intersection: TableSpec::default(),
        }
    }
}

/// Computes the raw union and intersection over the given per-item specs.
///
/// The union keeps first-seen order and first-seen type. The intersection
/// holds the names present in every item, ordered as in the union. No items
/// yields two empty specs.
pub fn compute_raw_spec<'a, T, I>(items: I) -> RawSpec<T>
where
    T: Clone + 'a,
    I: IntoIterator<Item = &'a TableSpec<T>>,
{
    let mut union: Vec<ColumnSpec<T>> = Vec::new();
    let mut union_index: HashMap<&'a str, usize> = HashMap::new();
    let mut occurrences: HashMap<&'a str, usize> = HashMap::new();
    let mut item_count = 0usize;

    for spec in items {
        item_count += 1;
        let mut seen_in_item = HashSet::new();
        for column in spec.iter() {
            let name = column.name.as_str();
            if !seen_in_item.insert(name) {
                continue;
            }
            *occurrences.entry(name).or_insert(0) += 1;
            if !union_index.contains_key(name) {
                union_index.insert(name, union.len());
                union.push(column.clone());
            }
        }
    }

    let intersection = union
        .iter()
        .filter(|column| occurrences.get(column.name.as_str()) == Some(&item_count))
        .cloned()
        .collect::<Vec<_>>();
    debug!(
        "Raw spec over {item_count} item(s): {} union column(s), {} common column(s)",
        union.len(),
        intersection.len()
    );

    RawSpec {
        union: TableSpec::new(union),
        intersection: TableSpec::new(intersection),
    }
}

/// Same as [`compute_raw_spec`], additionally reporting columns whose type
/// differs between items of the same group.
pub fn compute_raw_spec_with_warnings<'a, T, I>(items: I) -> (RawSpec<T>, Vec<ReconciliationWarning>)
where
    T: Clone + PartialEq + fmt::Display + 'a,
    I: IntoIterator<Item = (&'a str, &'a TableSpec<T>)>,
{
    let items = items.into_iter().collect::<Vec<_>>();
    let raw = compute_raw_spec(items.iter().map(|(_, spec)| *spec));
    let mut warnings = Vec::new();
    for (item, spec) in &items {
        for column in spec.iter() {
            let Some(kept) = raw.union.column(&column.name) else {
                continue;
            };
            if kept.data_type != column.data_type {
                warnings.push(ReconciliationWarning::ConflictingItemTypes {
                    column: column.name.clone(),
                    kept: kept.data_type.to_string(),
                    item: (*item).to_string(),
                    found: column.data_type.to_string(),
                });
            }
        }
    }
    (raw, warnings)
}
