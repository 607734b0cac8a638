//! The per-group configuration aggregate.
//!
//! A [`TableSpecConfig`] ties the per-item specs of one source group to the
//! transformation computed for them. It is immutable; any change produces a
//! new instance.

use std::collections::{BTreeMap, HashMap, HashSet};

use log::info;

use crate::{
    catalog::{ConversionCatalog, ConversionPath},
    error::{ConfigError, RefreshError, ReconciliationWarning},
    evolution::SchemaEvolution,
    reconcile::{ArrayOf, ReconcileOptions, reconcile},
    spec::{TableSpec, compute_raw_spec, compute_raw_spec_with_warnings},
    transformation::TableTransformation,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputColumn<U> {
    pub name: String,
    pub data_type: U,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSpecConfig<T, U> {
    group_id: String,
    item_ids: Vec<String>,
    item_specs: BTreeMap<String, TableSpec<T>>,
    transformation: TableTransformation<T, U>,
}

pub type ConfigOf<C> =
    TableSpecConfig<<C as ConversionCatalog>::External, <C as ConversionCatalog>::Output>;

/// Result of [`TableSpecConfig::compute`].
#[derive(Debug, Clone)]
pub struct ComputedConfig<T, U> {
    pub config: TableSpecConfig<T, U>,
    pub evolution: SchemaEvolution,
    pub warnings: Vec<ReconciliationWarning>,
}

impl<T: Clone + PartialEq, U> TableSpecConfig<T, U> {
    /// Assembles a config from its parts.
    ///
    /// `item_specs` must be keyed exactly by `item_ids`, no item may repeat a
    /// column name, `transformation.raw_spec` must be the raw spec of those
    /// items, and every configured column must exist in its union.
    pub fn from_transformation(
        group_id: impl Into<String>,
        item_ids: Vec<String>,
        item_specs: BTreeMap<String, TableSpec<T>>,
        transformation: TableTransformation<T, U>,
    ) -> Result<Self, ConfigError> {
        if item_ids.is_empty() {
            return Err(ConfigError::InconsistentItems {
                detail: "no items given".to_string(),
            });
        }
        let mut seen = HashSet::with_capacity(item_ids.len());
        for id in &item_ids {
            if !seen.insert(id.as_str()) {
                return Err(ConfigError::InconsistentItems {
                    detail: format!("item '{id}' is listed more than once"),
                });
            }
            if !item_specs.contains_key(id) {
                return Err(ConfigError::InconsistentItems {
                    detail: format!("no spec for item '{id}'"),
                });
            }
        }
        if let Some(extra) = item_specs.keys().find(|key| !seen.contains(key.as_str())) {
            return Err(ConfigError::InconsistentItems {
                detail: format!("spec for unlisted item '{extra}'"),
            });
        }
        for (id, spec) in &item_specs {
            if let Some(name) = spec.duplicate_name() {
                return Err(ConfigError::InconsistentItems {
                    detail: format!("item '{id}' lists column '{name}' more than once"),
                });
            }
        }
        let raw_spec = compute_raw_spec(item_ids.iter().filter_map(|id| item_specs.get(id)));
        if raw_spec != transformation.raw_spec {
            return Err(ConfigError::InconsistentItems {
                detail: "raw spec does not match the per-item specs".to_string(),
            });
        }
        if let Some(column) = transformation
            .columns
            .columns()
            .iter()
            .find(|column| !raw_spec.union.contains(&column.name))
        {
            return Err(ConfigError::InconsistentItems {
                detail: format!("column '{}' is not present in any item", column.name),
            });
        }
        Ok(Self {
            group_id: group_id.into(),
            item_ids,
            item_specs,
            transformation,
        })
    }
}

impl<T, U> TableSpecConfig<T, U> {

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn item_ids(&self) -> &[String] {
        &self.item_ids
    }

    pub fn item_spec(&self, item_id: &str) -> Option<&TableSpec<T>> {
        self.item_specs.get(item_id)
    }

    /// Per-item specs in item order.
    pub fn items(&self) -> impl Iterator<Item = (&str, &TableSpec<T>)> {
        self.item_ids
            .iter()
            .filter_map(|id| self.item_specs.get(id).map(|spec| (id.as_str(), spec)))
    }

    pub fn transformation(&self) -> &TableTransformation<T, U> {
        &self.transformation
    }

    /// Whether this config was computed for exactly these items, in this order.
    pub fn is_configured_with<S: AsRef<str>>(&self, group_id: &str, item_ids: &[S]) -> bool {
        self.group_id == group_id
            && self.item_ids.len() == item_ids.len()
            && self
                .item_ids
                .iter()
                .zip(item_ids)
                .all(|(ours, theirs)| ours == theirs.as_ref())
    }
}

impl<T: Clone, U: Clone> TableSpecConfig<T, U> {
    /// Output columns (name and type) in output order.
    pub fn output_spec(&self) -> Result<Vec<OutputColumn<U>>, ConfigError> {
        let selected = self.transformation.selected();
        let mut producers: HashMap<&str, &str> = HashMap::with_capacity(selected.len());
        for column in &selected {
            if let Some(first) = producers.insert(column.output_name.as_str(), column.name.as_str()) {
                return Err(ConfigError::DuplicateOutputName {
                    name: column.output_name.clone(),
                    first: first.to_string(),
                    second: column.name.clone(),
                });
            }
        }
        Ok(selected
            .into_iter()
            .map(|column| OutputColumn {
                name: column.output_name.clone(),
                data_type: column.path.destination.clone(),
            })
            .collect())
    }

    /// Conversion paths aligned with [`output_spec`](Self::output_spec).
    pub fn production_paths(&self) -> Vec<ConversionPath<T, U>> {
        self.transformation
            .selected()
            .into_iter()
            .map(|column| column.path.clone())
            .collect()
    }
}

impl<T, U> TableSpecConfig<T, U>
where
    T: Clone + PartialEq + std::fmt::Debug + std::fmt::Display,
    U: Clone + PartialEq + std::fmt::Debug + std::fmt::Display,
{
    /// Builds a config from freshly probed item specs, reconciling against
    /// `previous` when a configuration already exists.
    pub fn compute<C>(
        group_id: impl Into<String>,
        items: Vec<(String, TableSpec<T>)>,
        previous: Option<&ArrayOf<C>>,
        options: ReconcileOptions,
        catalog: &C,
    ) -> Result<ComputedConfig<T, U>, RefreshError>
    where
        C: ConversionCatalog<External = T, Output = U>,
    {
        let group_id = group_id.into();
        let (raw_spec, mut warnings) =
            compute_raw_spec_with_warnings(items.iter().map(|(id, spec)| (id.as_str(), spec)));
        let reconciliation = reconcile(previous, &raw_spec, options, catalog)?;
        warnings.extend(reconciliation.warnings);

        let item_ids = items.iter().map(|(id, _)| id.clone()).collect::<Vec<_>>();
        let item_specs = items.into_iter().collect::<BTreeMap<_, _>>();
        let transformation = TableTransformation {
            raw_spec,
            columns: reconciliation.columns,
            filter_mode: options.filter_mode,
            enforce_types: options.enforce_types,
        };
        let config = Self::from_transformation(group_id, item_ids, item_specs, transformation)?;
        info!(
            "Computed config for group '{}' over {} item(s) with {} column(s)",
            config.group_id,
            config.item_ids.len(),
            config.transformation.columns.len()
        );
        Ok(ComputedConfig {
            config,
            evolution: reconciliation.evolution,
            warnings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        catalog::StandardCatalog,
        spec::ColumnSpec,
        transformation::ColumnFilterMode,
        types::ColumnType,
    };

    fn items() -> Vec<(String, TableSpec<ColumnType>)> {
        vec![
            (
                "a.csv".to_string(),
                TableSpec::new(vec![
                    ColumnSpec::new("x", ColumnType::Integer),
                    ColumnSpec::new("y", ColumnType::String),
                ]),
            ),
            (
                "b.csv".to_string(),
                TableSpec::new(vec![
                    ColumnSpec::new("x", ColumnType::Integer),
                    ColumnSpec::new("z", ColumnType::String),
                ]),
            ),
        ]
    }

    #[test]
    fn from_transformation_rejects_mismatched_items() {
        let catalog = StandardCatalog::new();
        let computed =
            TableSpecConfig::compute("g", items(), None, ReconcileOptions::default(), &catalog)
                .unwrap();
        let transformation = computed.config.transformation().clone();
        let mut specs = BTreeMap::new();
        specs.insert("a.csv".to_string(), TableSpec::default());
        let err = TableSpecConfig::from_transformation(
            "g",
            vec!["a.csv".to_string(), "b.csv".to_string()],
            specs,
            transformation.clone(),
        )
        .expect_err("missing spec for b.csv");
        assert!(matches!(err, ConfigError::InconsistentItems { .. }));

        let err = TableSpecConfig::<ColumnType, ColumnType>::from_transformation(
            "g",
            Vec::new(),
            BTreeMap::new(),
            transformation,
        )
        .expect_err("no items");
        assert!(matches!(err, ConfigError::InconsistentItems { .. }));
    }

    #[test]
    fn intersection_mode_limits_output_spec() {
        let catalog = StandardCatalog::new();
        let options = ReconcileOptions::new(ColumnFilterMode::Intersection);
        let computed = TableSpecConfig::compute("g", items(), None, options, &catalog).unwrap();
        let output = computed.config.output_spec().unwrap();
        assert_eq!(output.len(), 1);
        assert_eq!(output[0].name, "x");
        assert_eq!(output[0].data_type, ColumnType::Integer);
        assert_eq!(computed.config.production_paths()[0].id, "integer->integer");
    }

    #[test]
    fn configured_with_requires_same_order() {
        let catalog = StandardCatalog::new();
        let computed =
            TableSpecConfig::compute("g", items(), None, ReconcileOptions::default(), &catalog)
                .unwrap();
        let config = computed.config;
        assert!(config.is_configured_with("g", &["a.csv", "b.csv"]));
        assert!(!config.is_configured_with("g", &["b.csv", "a.csv"]));
        assert!(!config.is_configured_with("h", &["a.csv", "b.csv"]));
        assert!(!config.is_configured_with("g", &["a.csv"]));
    }
}
