//! Versioned persistence of [`TableSpecConfig`].
//!
//! Every field of [`PersistedConfig`] is optional so that records written by
//! older releases still load. [`deserialize`] fills gaps in a fixed order:
//!
//! 1. `config_version` newer than [`CURRENT_CONFIG_VERSION`] is rejected.
//! 2. `group_id` and `items` are required.
//! 3. The filter mode comes from `column_filter_mode`, else from the legacy
//!    `spec_merge_mode`, else loading fails with `MissingFilterMode`.
//! 4. Column paths are looked up by id; unknown ids fall back to the default
//!    path of the caller's most generic type and produce a warning.
//! 5. Missing `keep` flags are reconstructed from `legacy_output_columns`
//!    (present means keep); without that list every column is kept.
//! 6. Missing output names and positions default to the raw name and the
//!    column's index (no renaming, no reordering).
//! 7. Missing per-item `has_types` default to `true`.
//! 8. Column types are re-derived from the path of the column's
//!    transformation, or from `type_overrides` where the two differ. Columns
//!    with neither get the most generic type.
//! 9. Under a legacy intersection record, union columns without a stored
//!    transformation are re-synthesized with the default path of the most
//!    generic type and placed in front of the unknown-columns slot.
//! 10. A missing unknown-columns record means: include, placed last.

use std::{
    collections::{BTreeMap, HashSet},
    fs,
    path::Path,
};

use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{
    catalog::{ConversionCatalog, ConversionResolver, PathOf},
    config::{ConfigOf, TableSpecConfig},
    error::{CatalogError, ConfigError, LoadError, ReconciliationWarning},
    spec::{ColumnSpec, TableSpec, compute_raw_spec},
    transformation::{
        ColumnFilterMode, ColumnTransformation, TableTransformation, TransformationArray,
        UnknownColumnsTransformation,
    },
};

pub const CURRENT_CONFIG_VERSION: u32 = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(deserialize = "U: Deserialize<'de>"))]
pub struct PersistedConfig<U> {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_version: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<PersistedItem>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<PersistedColumn>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unknown_columns: Option<PersistedUnknownColumns<U>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_filter_mode: Option<ColumnFilterMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enforce_types: Option<bool>,
    /// Merge mode written by version 1 records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec_merge_mode: Option<LegacyMergeMode>,
    /// Names of the output spec written by version 1 records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legacy_output_columns: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedItem {
    pub item_id: String,
    pub column_names: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_types: Option<Vec<bool>>,
    /// Path ids for columns whose type differs from their transformation's source type.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub type_overrides: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedColumn {
    pub name: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound(deserialize = "U: Deserialize<'de>"))]
pub struct PersistedUnknownColumns<U> {
    pub include: bool,
    pub position: usize,
    /// Index in `columns` in front of which the unknown-columns slot sits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slot: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forced_type: Option<U>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LegacyMergeMode {
    Union,
    Intersection,
    FailOnDifferingSpecs,
}

impl LegacyMergeMode {
    pub fn filter_mode(self) -> ColumnFilterMode {
        match self {
            LegacyMergeMode::Intersection => ColumnFilterMode::Intersection,
            LegacyMergeMode::Union | LegacyMergeMode::FailOnDifferingSpecs => {
                ColumnFilterMode::Union
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoadedConfig<T, U> {
    pub config: TableSpecConfig<T, U>,
    pub warnings: Vec<ReconciliationWarning>,
}

/// Builds the current-version record for `config`.
pub fn serialize<C: ConversionCatalog>(
    config: &ConfigOf<C>,
    catalog: &C,
) -> Result<PersistedConfig<C::Output>, CatalogError> {
    let resolver = ConversionResolver::new(catalog);
    let transformation = config.transformation();
    let array = &transformation.columns;

    let mut items = Vec::with_capacity(config.item_ids().len());
    for (item_id, spec) in config.items() {
        let mut type_overrides = BTreeMap::new();
        for column in spec.iter() {
            let derived = array.get(&column.name).map(|entry| &entry.path.source);
            if derived != Some(&column.data_type) {
                let path = resolver.default_path(&column.data_type)?;
                type_overrides.insert(column.name.clone(), path.id);
            }
        }
        items.push(PersistedItem {
            item_id: item_id.to_string(),
            column_names: spec.iter().map(|column| column.name.clone()).collect(),
            has_types: Some(spec.iter().map(|column| column.has_type).collect()),
            type_overrides,
        });
    }

    let columns = array
        .columns()
        .iter()
        .map(|column| PersistedColumn {
            name: column.name.clone(),
            path: column.path.id.clone(),
            output_name: Some(column.output_name.clone()),
            keep: Some(column.include),
            position: Some(column.position),
        })
        .collect();
    let unknown = array.unknown();

    Ok(PersistedConfig {
        config_version: Some(CURRENT_CONFIG_VERSION),
        group_id: Some(config.group_id().to_string()),
        items: Some(items),
        columns: Some(columns),
        unknown_columns: Some(PersistedUnknownColumns {
            include: unknown.include,
            position: unknown.position,
            slot: Some(array.unknown_index()),
            forced_type: unknown.forced_type.clone(),
        }),
        column_filter_mode: Some(transformation.filter_mode),
        enforce_types: Some(transformation.enforce_types),
        spec_merge_mode: None,
        legacy_output_columns: None,
    })
}

/// Rebuilds a config from a record of any supported version.
///
/// `most_generic` is the external type assumed for columns whose type can no
/// longer be derived; it must have a default path in `catalog`.
pub fn deserialize<C: ConversionCatalog>(
    record: &PersistedConfig<C::Output>,
    catalog: &C,
    most_generic: &C::External,
) -> Result<LoadedConfig<C::External, C::Output>, LoadError> {
    if let Some(found) = record
        .config_version
        .filter(|found| *found > CURRENT_CONFIG_VERSION)
    {
        return Err(ConfigError::UnsupportedVersion {
            found,
            supported: CURRENT_CONFIG_VERSION,
        }
        .into());
    }
    let group_id = record
        .group_id
        .clone()
        .ok_or(ConfigError::MissingField("group_id"))?;
    let items = record.items.as_ref().ok_or(ConfigError::MissingField("items"))?;
    let filter_mode = record
        .column_filter_mode
        .or_else(|| record.spec_merge_mode.map(LegacyMergeMode::filter_mode))
        .ok_or(ConfigError::MissingFilterMode)?;
    let legacy_intersection = record.column_filter_mode.is_none()
        && record.spec_merge_mode == Some(LegacyMergeMode::Intersection);

    let resolver = ConversionResolver::new(catalog);
    let generic_path = resolver.default_path(most_generic)?;
    let mut warnings = Vec::new();

    let persisted_columns = record.columns.as_deref().unwrap_or_default();
    let mut paths = BTreeMap::new();
    for column in persisted_columns {
        let path = match resolver.path_by_id(&column.path) {
            Some(path) => path,
            None => {
                warnings.push(ReconciliationWarning::UnmappableLegacyPath {
                    column: column.name.clone(),
                    path_id: column.path.clone(),
                    fallback_path: generic_path.id.clone(),
                });
                generic_path.clone()
            }
        };
        paths.insert(column.name.as_str(), path);
    }

    let mut item_ids = Vec::with_capacity(items.len());
    let mut item_specs = BTreeMap::new();
    for item in items {
        let spec = rebuild_item(item, &paths, &resolver, most_generic, &generic_path, &mut warnings);
        item_ids.push(item.item_id.clone());
        item_specs.insert(item.item_id.clone(), spec);
    }
    let raw_spec = compute_raw_spec(item_ids.iter().filter_map(|id| item_specs.get(id)));

    let legacy_keep = record
        .legacy_output_columns
        .as_ref()
        .map(|names| names.iter().map(String::as_str).collect::<HashSet<_>>());
    let keep_flag = |name: &str, stored: Option<bool>| {
        stored.unwrap_or_else(|| {
            legacy_keep
                .as_ref()
                .is_none_or(|names| names.contains(name))
        })
    };

    let unknown = match &record.unknown_columns {
        Some(stored) => UnknownColumnsTransformation {
            include: stored.include,
            position: stored.position,
            forced_type: stored.forced_type.clone(),
        },
        None => UnknownColumnsTransformation {
            include: true,
            position: persisted_columns.len(),
            forced_type: None,
        },
    };
    let stored_slot = record
        .unknown_columns
        .as_ref()
        .and_then(|stored| stored.slot)
        .unwrap_or(persisted_columns.len())
        .min(persisted_columns.len());

    let mut before = Vec::new();
    let mut after = Vec::new();
    for (index, column) in persisted_columns.iter().enumerate() {
        if !raw_spec.union.contains(&column.name) {
            warn!(
                "Dropping stored transformation for '{}': column is not in any item",
                column.name
            );
            continue;
        }
        let Some(path) = paths.get(column.name.as_str()) else {
            continue;
        };
        let transformation = ColumnTransformation {
            name: column.name.clone(),
            path: path.clone(),
            include: keep_flag(&column.name, column.keep),
            position: column.position.unwrap_or(index),
            output_name: column
                .output_name
                .clone()
                .unwrap_or_else(|| column.name.clone()),
        };
        if index < stored_slot {
            before.push(transformation);
        } else {
            after.push(transformation);
        }
    }

    if legacy_intersection {
        for spec in raw_spec.union.iter() {
            if paths.contains_key(spec.name.as_str()) {
                continue;
            }
            debug!(
                "Re-synthesizing legacy column '{}' as {}",
                spec.name, generic_path.id
            );
            before.push(ColumnTransformation {
                name: spec.name.clone(),
                path: generic_path.clone(),
                include: keep_flag(&spec.name, None),
                position: unknown.position,
                output_name: spec.name.clone(),
            });
        }
    }

    let unknown_index = before.len();
    before.extend(after);
    let columns = TransformationArray::new(before, unknown_index, unknown)?;
    let transformation = TableTransformation {
        raw_spec,
        columns,
        filter_mode,
        enforce_types: record.enforce_types.unwrap_or(false),
    };
    let config = TableSpecConfig::from_transformation(group_id, item_ids, item_specs, transformation)?;
    Ok(LoadedConfig { config, warnings })
}

fn rebuild_item<C: ConversionCatalog>(
    item: &PersistedItem,
    paths: &BTreeMap<&str, PathOf<C>>,
    resolver: &ConversionResolver<'_, C>,
    most_generic: &C::External,
    generic_path: &PathOf<C>,
    warnings: &mut Vec<ReconciliationWarning>,
) -> TableSpec<C::External> {
    item.column_names
        .iter()
        .enumerate()
        .map(|(index, name)| {
            let data_type = match item.type_overrides.get(name) {
                Some(id) => match resolver.path_by_id(id) {
                    Some(path) => path.source,
                    None => {
                        warnings.push(ReconciliationWarning::UnmappableLegacyPath {
                            column: name.clone(),
                            path_id: id.clone(),
                            fallback_path: generic_path.id.clone(),
                        });
                        most_generic.clone()
                    }
                },
                None => paths
                    .get(name.as_str())
                    .map(|path| path.source.clone())
                    .unwrap_or_else(|| most_generic.clone()),
            };
            let has_type = item
                .has_types
                .as_ref()
                .and_then(|flags| flags.get(index).copied())
                .unwrap_or(true);
            ColumnSpec {
                name: name.clone(),
                data_type,
                has_type,
            }
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistFormat {
    Yaml,
    Json,
}

impl PersistFormat {
    /// `.json` files use JSON, everything else YAML.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => PersistFormat::Json,
            _ => PersistFormat::Yaml,
        }
    }
}

pub fn to_string<U: Serialize>(record: &PersistedConfig<U>, format: PersistFormat) -> Result<String> {
    match format {
        PersistFormat::Yaml => serde_yaml::to_string(record).context("Serializing config to YAML"),
        PersistFormat::Json => {
            serde_json::to_string_pretty(record).context("Serializing config to JSON")
        }
    }
}

pub fn from_str<U: DeserializeOwned>(input: &str, format: PersistFormat) -> Result<PersistedConfig<U>> {
    match format {
        PersistFormat::Yaml => serde_yaml::from_str(input).context("Parsing config YAML"),
        PersistFormat::Json => serde_json::from_str(input).context("Parsing config JSON"),
    }
}

pub fn save<C>(config: &ConfigOf<C>, catalog: &C, path: &Path) -> Result<()>
where
    C: ConversionCatalog,
    C::Output: Serialize,
{
    let record = serialize(config, catalog)
        .with_context(|| format!("Serializing config for group '{}'", config.group_id()))?;
    let contents = to_string(&record, PersistFormat::from_path(path))?;
    fs::write(path, contents).with_context(|| format!("Writing config file {path:?}"))?;
    info!(
        "Saved config for group '{}' ({} item(s)) to {:?}",
        config.group_id(),
        config.item_ids().len(),
        path
    );
    Ok(())
}

pub fn load<C>(
    path: &Path,
    catalog: &C,
    most_generic: &C::External,
) -> Result<LoadedConfig<C::External, C::Output>>
where
    C: ConversionCatalog,
    C::Output: DeserializeOwned,
{
    let contents =
        fs::read_to_string(path).with_context(|| format!("Opening config file {path:?}"))?;
    let record = from_str(&contents, PersistFormat::from_path(path))
        .with_context(|| format!("Reading config file {path:?}"))?;
    let loaded = deserialize(&record, catalog, most_generic)
        .with_context(|| format!("Restoring config from {path:?}"))?;
    info!(
        "Loaded config for group '{}' from {:?} with {} warning(s)",
        loaded.config.group_id(),
        path,
        loaded.warnings.len()
    );
    Ok(loaded)
}
