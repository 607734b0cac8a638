//! Merging a previously saved transformation array with a new schema.
//!
//! [`reconcile`] is a three-way merge keyed by column name. Entries that still
//! match the schema keep every user setting; removed columns disappear;
//! retyped columns are reset (or, with `enforce_types`, re-pointed at a path
//! with the old destination type); columns without an entry are synthesized
//! from the unknown-columns policy and placed directly in front of the
//! unknown-columns slot.
//!
//! The function is pure: identical inputs give identical output, and feeding
//! a result back in with the same schema returns it unchanged.

use std::collections::HashSet;

use log::{debug, info, warn};

use crate::{
    catalog::{ConversionCatalog, ConversionResolver, PathOf},
    error::{CatalogError, ReconciliationWarning},
    evolution::SchemaEvolution,
    spec::{ColumnSpec, RawSpec, TableSpec},
    transformation::{
        ColumnFilterMode, ColumnTransformation, TransformationArray, UnknownColumnsTransformation,
    },
};

pub type ArrayOf<C> =
    TransformationArray<<C as ConversionCatalog>::External, <C as ConversionCatalog>::Output>;
type ColumnOf<C> =
    ColumnTransformation<<C as ConversionCatalog>::External, <C as ConversionCatalog>::Output>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOptions {
    pub filter_mode: ColumnFilterMode,
    /// Keep the configured output type of a retyped column when a path to it exists.
    pub enforce_types: bool,
}

impl ReconcileOptions {
    pub fn new(filter_mode: ColumnFilterMode) -> Self {
        Self {
            filter_mode,
            enforce_types: false,
        }
    }

    pub fn enforcing_types(mut self, enforce_types: bool) -> Self {
        self.enforce_types = enforce_types;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation<T, U> {
    pub columns: TransformationArray<T, U>,
    pub evolution: SchemaEvolution,
    pub warnings: Vec<ReconciliationWarning>,
}

/// Reconciles `previous` (or nothing, on first configuration) against `raw`.
///
/// Only a catalog without a default path for an observed type makes this
/// fail; every other problem is reported as a warning next to a usable array.
pub fn reconcile<C: ConversionCatalog>(
    previous: Option<&ArrayOf<C>>,
    raw: &RawSpec<C::External>,
    options: ReconcileOptions,
    catalog: &C,
) -> Result<Reconciliation<C::External, C::Output>, CatalogError> {
    let resolver = ConversionResolver::new(catalog);
    let relevant = options.filter_mode.relevant(raw);
    let empty = TransformationArray::default();
    let previous_array = previous.unwrap_or(&empty);
    let evolution = SchemaEvolution::diff(previous_array, relevant);

    let unknown = match previous {
        Some(array) => array.unknown().clone(),
        None => UnknownColumnsTransformation {
            include: true,
            position: relevant.len(),
            forced_type: None,
        },
    };

    let mut warnings = Vec::new();
    let kept_before = carry_over(previous_array.before(), relevant, resolver, options, &mut warnings)?;
    let kept_after = carry_over(previous_array.after(), relevant, resolver, options, &mut warnings)?;
    let retained = kept_before
        .iter()
        .chain(kept_after.iter())
        .map(|column| column.name.as_str())
        .collect::<HashSet<_>>();

    let mut synthesized = Vec::new();
    for (index, spec) in relevant.iter().enumerate() {
        if retained.contains(spec.name.as_str()) {
            continue;
        }
        let position = if previous.is_some() {
            unknown.position
        } else {
            index
        };
        let column = synthesize(spec, &unknown, position, resolver)?;
        debug!(
            "Column '{}' added with conversion '{}' (include={})",
            column.name, column.path.id, column.include
        );
        synthesized.push(column);
    }

    let unknown_index = kept_before.len() + synthesized.len();
    let columns = kept_before
        .into_iter()
        .chain(synthesized)
        .chain(kept_after)
        .collect::<Vec<_>>();
    for warning in &warnings {
        warn!("{warning}");
    }
    info!(
        "Reconciled {} column(s) under {} mode: {} change(s), {} warning(s)",
        columns.len(),
        options.filter_mode.as_str(),
        evolution.changes.len(),
        warnings.len()
    );

    Ok(Reconciliation {
        columns: TransformationArray::from_parts(columns, unknown_index, unknown),
        evolution,
        warnings,
    })
}

fn carry_over<C: ConversionCatalog>(
    entries: &[ColumnOf<C>],
    relevant: &TableSpec<C::External>,
    resolver: ConversionResolver<'_, C>,
    options: ReconcileOptions,
    warnings: &mut Vec<ReconciliationWarning>,
) -> Result<Vec<ColumnOf<C>>, CatalogError> {
    let mut kept = Vec::with_capacity(entries.len());
    for entry in entries {
        let Some(spec) = relevant.column(&entry.name) else {
            debug!("Column '{}' is no longer available; dropping it", entry.name);
            continue;
        };

        if spec.data_type != entry.path.source {
            let replay = if options.enforce_types {
                resolver.resolve(&spec.data_type, &entry.path.destination)
            } else {
                None
            };
            warnings.push(ReconciliationWarning::ColumnRetyped {
                column: entry.name.clone(),
                previous: entry.path.source.to_string(),
                current: spec.data_type.to_string(),
                kept: replay.is_some(),
            });
            if let Some(path) = replay {
                kept.push(ColumnTransformation {
                    path,
                    ..entry.clone()
                });
            }
            continue;
        }

        if resolver.is_valid(&entry.path) {
            kept.push(entry.clone());
            continue;
        }

        let path = refresh_path(entry, &spec.data_type, resolver, warnings)?;
        kept.push(ColumnTransformation {
            path,
            ..entry.clone()
        });
    }
    Ok(kept)
}

fn refresh_path<C: ConversionCatalog>(
    entry: &ColumnOf<C>,
    data_type: &C::External,
    resolver: ConversionResolver<'_, C>,
    warnings: &mut Vec<ReconciliationWarning>,
) -> Result<PathOf<C>, CatalogError> {
    if let Some(path) = resolver.resolve(data_type, &entry.path.destination) {
        warnings.push(ReconciliationWarning::PathReplaced {
            column: entry.name.clone(),
            previous_path: entry.path.id.clone(),
            replacement_path: path.id.clone(),
        });
        return Ok(path);
    }
    let fallback = resolver.default_path(data_type)?;
    warnings.push(ReconciliationWarning::UnmappablePath {
        column: entry.name.clone(),
        previous_path: entry.path.id.clone(),
        fallback_path: fallback.id.clone(),
    });
    Ok(fallback)
}

fn synthesize<C: ConversionCatalog>(
    spec: &ColumnSpec<C::External>,
    unknown: &UnknownColumnsTransformation<C::Output>,
    position: usize,
    resolver: ConversionResolver<'_, C>,
) -> Result<ColumnOf<C>, CatalogError> {
    let forced = unknown
        .forced_type
        .as_ref()
        .and_then(|destination| resolver.resolve(&spec.data_type, destination));
    let path = match forced {
        Some(path) => path,
        None => resolver.default_path(&spec.data_type)?,
    };
    Ok(ColumnTransformation {
        name: spec.name.clone(),
        path,
        include: unknown.include,
        position,
        output_name: spec.name.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{catalog::StandardCatalog, spec::compute_raw_spec, types::ColumnType};

    fn raw(columns: &[(&str, ColumnType)]) -> RawSpec<ColumnType> {
        let spec = columns
            .iter()
            .map(|(name, ty)| ColumnSpec::new(*name, ty.clone()))
            .collect::<TableSpec<_>>();
        compute_raw_spec([&spec])
    }

    fn names(array: &ArrayOf<StandardCatalog>) -> Vec<&str> {
        array.columns().iter().map(|c| c.name.as_str()).collect()
    }

    #[test]
    fn first_run_synthesizes_defaults_in_schema_order() {
        let catalog = StandardCatalog::new();
        let schema = raw(&[("id", ColumnType::Integer), ("name", ColumnType::String)]);
        let result = reconcile(None, &schema, ReconcileOptions::default(), &catalog).unwrap();
        assert_eq!(names(&result.columns), vec!["id", "name"]);
        assert_eq!(result.columns.unknown_index(), 2);
        assert_eq!(result.columns.unknown().position, 2);
        assert_eq!(result.columns.columns()[1].position, 1);
        assert_eq!(result.columns.columns()[0].path.id, "integer->integer");
        assert!(result.warnings.is_empty());
        assert_eq!(result.evolution.added().count(), 2);
    }

    #[test]
    fn forced_type_applies_to_new_columns_when_reachable() {
        let catalog = StandardCatalog::new();
        let schema = raw(&[("id", ColumnType::Integer)]);
        let first = reconcile(None, &schema, ReconcileOptions::default(), &catalog).unwrap();
        let policy = UnknownColumnsTransformation {
            include: false,
            position: 1,
            forced_type: Some(ColumnType::String),
        };
        let previous = first.columns.with_unknown_columns(policy);
        let grown = raw(&[
            ("id", ColumnType::Integer),
            ("flag", ColumnType::Boolean),
        ]);
        let result = reconcile(Some(&previous), &grown, ReconcileOptions::default(), &catalog).unwrap();
        let flag = result.columns.get("flag").unwrap();
        assert_eq!(flag.path.id, "boolean->string");
        assert!(!flag.include);
        assert_eq!(flag.position, 1);
    }

    #[test]
    fn enforce_types_keeps_destination_of_retyped_column() {
        let catalog = StandardCatalog::new();
        let schema = raw(&[("amount", ColumnType::Integer)]);
        let first = reconcile(None, &schema, ReconcileOptions::default(), &catalog).unwrap();
        let previous = first
            .columns
            .with_conversion(
                "amount",
                catalog.path_by_id("integer->currency").unwrap(),
            )
            .unwrap()
            .with_output_name("amount", "total")
            .unwrap();

        let retyped = raw(&[("amount", ColumnType::Float)]);
        let options = ReconcileOptions::default().enforcing_types(true);
        let result = reconcile(Some(&previous), &retyped, options, &catalog).unwrap();
        let amount = result.columns.get("amount").unwrap();
        assert_eq!(amount.path.id, "float->currency");
        assert_eq!(amount.output_name, "total");
        assert!(matches!(
            result.warnings.as_slice(),
            [ReconciliationWarning::ColumnRetyped { kept: true, .. }]
        ));
    }

    #[test]
    fn missing_default_path_is_a_catalog_error() {
        struct EmptyCatalog;
        impl ConversionCatalog for EmptyCatalog {
            type External = ColumnType;
            type Output = ColumnType;
            fn default_path(&self, _: &ColumnType) -> Option<PathOf<Self>> {
                None
            }
            fn candidate_paths(&self, _: &ColumnType) -> Vec<PathOf<Self>> {
                Vec::new()
            }
            fn path_by_id(&self, _: &str) -> Option<PathOf<Self>> {
                None
            }
        }
        let schema = raw(&[("id", ColumnType::Integer)]);
        let err = reconcile(None, &schema, ReconcileOptions::default(), &EmptyCatalog)
            .expect_err("no default path");
        assert_eq!(
            err,
            CatalogError::NoPath {
                external: "integer".to_string()
            }
        );
    }
}
