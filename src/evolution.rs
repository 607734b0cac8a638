//! Structural differences between a configured column set and a new schema.

use std::fmt;

use serde::Serialize;

use crate::{spec::TableSpec, transformation::TransformationArray};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SchemaChangeKind {
    ColumnAdded,
    ColumnRemoved,
    DatatypeChanged { from: String, to: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaChange {
    pub column: String,
    pub change: SchemaChangeKind,
}

impl fmt::Display for SchemaChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.change {
            SchemaChangeKind::ColumnAdded => write!(f, "+ {}", self.column),
            SchemaChangeKind::ColumnRemoved => write!(f, "- {}", self.column),
            SchemaChangeKind::DatatypeChanged { from, to } => {
                write!(f, "~ {} ({from} -> {to})", self.column)
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchemaEvolution {
    pub changes: Vec<SchemaChange>,
}

impl SchemaEvolution {
    /// Compares the columns configured in `previous` against `current`.
    ///
    /// Removed and retyped columns follow the previous array order, added
    /// columns follow `current`.
    pub fn diff<T, U>(previous: &TransformationArray<T, U>, current: &TableSpec<T>) -> Self
    where
        T: PartialEq + fmt::Display,
    {
        let mut changes = Vec::new();
        for column in previous.columns() {
            match current.column(&column.name) {
                None => changes.push(SchemaChange {
                    column: column.name.clone(),
                    change: SchemaChangeKind::ColumnRemoved,
                }),
                Some(spec) if spec.data_type != column.path.source => changes.push(SchemaChange {
                    column: column.name.clone(),
                    change: SchemaChangeKind::DatatypeChanged {
                        from: column.path.source.to_string(),
                        to: spec.data_type.to_string(),
                    },
                }),
                Some(_) => {}
            }
        }
        for spec in current.iter() {
            if previous.get(&spec.name).is_none() {
                changes.push(SchemaChange {
                    column: spec.name.clone(),
                    change: SchemaChangeKind::ColumnAdded,
                });
            }
        }
        Self { changes }
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn added(&self) -> impl Iterator<Item = &str> {
        self.of_kind(|kind| matches!(kind, SchemaChangeKind::ColumnAdded))
    }

    pub fn removed(&self) -> impl Iterator<Item = &str> {
        self.of_kind(|kind| matches!(kind, SchemaChangeKind::ColumnRemoved))
    }

    pub fn retyped(&self) -> impl Iterator<Item = &str> {
        self.of_kind(|kind| matches!(kind, SchemaChangeKind::DatatypeChanged { .. }))
    }

    fn of_kind(&self, predicate: impl Fn(&SchemaChangeKind) -> bool) -> impl Iterator<Item = &str> {
        self.changes
            .iter()
            .filter(move |change| predicate(&change.change))
            .map(|change| change.column.as_str())
    }
}
