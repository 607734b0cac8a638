mod common;

use common::{TestWorkspace, catalog, init_logging, table};
use proptest::prelude::*;
use schema_reconcile::persist::{
    self, CURRENT_CONFIG_VERSION, PersistFormat, PersistedConfig, deserialize, serialize,
};
use schema_reconcile::{
    ColumnFilterMode, ColumnSpec, ColumnType, ConfigError, LoadError, ReconcileOptions,
    StandardCatalog, TableSpec, TableSpecConfig, UnknownColumnsTransformation,
};

type Config = TableSpecConfig<ColumnType, ColumnType>;

fn sample_config() -> Config {
    let catalog = catalog();
    let items = vec![
        (
            "jan.csv".to_string(),
            TableSpec::new(vec![
                ColumnSpec::new("id", ColumnType::Integer),
                ColumnSpec::new("amount", ColumnType::Float),
                ColumnSpec::untyped("memo", ColumnType::String),
            ]),
        ),
        (
            "feb.csv".to_string(),
            table(&[
                ("id", ColumnType::Integer),
                ("amount", ColumnType::Integer),
                ("booked", ColumnType::Date),
            ]),
        ),
    ];
    let first = TableSpecConfig::compute(
        "ledger",
        items.clone(),
        None,
        ReconcileOptions::default(),
        &catalog,
    )
    .expect("first run");
    let edited = first
        .config
        .transformation()
        .columns
        .with_output_name("amount", "total")
        .and_then(|array| array.with_conversion("amount", catalog_path("float->currency")))
        .and_then(|array| array.with_included("memo", false))
        .expect("edit")
        .with_unknown_columns(UnknownColumnsTransformation {
            include: false,
            position: 4,
            forced_type: Some(ColumnType::String),
        });
    TableSpecConfig::compute(
        "ledger",
        items,
        Some(&edited),
        ReconcileOptions::default().enforcing_types(true),
        &catalog,
    )
    .expect("second run")
    .config
}

fn catalog_path(id: &str) -> schema_reconcile::ConversionPath<ColumnType, ColumnType> {
    use schema_reconcile::ConversionCatalog;
    catalog().path_by_id(id).expect("known path id")
}

fn round_trip(config: &Config, format: PersistFormat) -> Config {
    let catalog = catalog();
    let record = serialize(config, &catalog).expect("serialize");
    let text = persist::to_string(&record, format).expect("render");
    let parsed: PersistedConfig<ColumnType> = persist::from_str(&text, format).expect("parse");
    let loaded = deserialize(&parsed, &catalog, &ColumnType::most_generic()).expect("deserialize");
    assert!(loaded.warnings.is_empty(), "{:?}", loaded.warnings);
    loaded.config
}

#[test]
fn yaml_and_json_round_trip_preserve_config() {
    init_logging();
    let config = sample_config();
    assert_eq!(round_trip(&config, PersistFormat::Yaml), config);
    assert_eq!(round_trip(&config, PersistFormat::Json), config);

    let amount = config.transformation().columns.get("amount").expect("amount");
    assert_eq!(amount.path.id, "float->currency");
    let feb = config.item_spec("feb.csv").expect("feb spec");
    assert_eq!(feb.column("amount").expect("amount").data_type, ColumnType::Integer);
    let jan = config.item_spec("jan.csv").expect("jan spec");
    assert!(!jan.column("memo").expect("memo").has_type);
}

#[test]
fn serialization_is_byte_identical() {
    let catalog = catalog();
    let config = sample_config();
    let render = |config: &Config| {
        let record = serialize(config, &catalog).expect("serialize");
        persist::to_string(&record, PersistFormat::Yaml).expect("render")
    };
    let first = render(&config);
    assert_eq!(first, render(&config));
    assert_eq!(first, render(&round_trip(&config, PersistFormat::Yaml)));
    assert!(first.contains(&format!("config_version: {CURRENT_CONFIG_VERSION}")));
}

#[test]
fn save_and_load_pick_format_from_extension() {
    let workspace = TestWorkspace::new();
    let catalog = catalog();
    let config = sample_config();
    for name in ["ledger.yaml", "ledger.json"] {
        let path = workspace.file(name);
        persist::save(&config, &catalog, &path).expect("save config");
        let text = std::fs::read_to_string(&path).expect("read saved file");
        assert_eq!(name.ends_with(".json"), text.trim_start().starts_with('{'));
        let loaded = persist::load(&path, &catalog, &ColumnType::most_generic()).expect("load config");
        assert_eq!(loaded.config, config);
    }
}

#[test]
fn load_reports_path_and_keeps_config_error_reachable() {
    let workspace = TestWorkspace::new();
    let path = workspace.write("broken.yaml", "group_id: g\nitems:\n  - item_id: a\n    column_names: [x]\n");
    let err = persist::load(&path, &catalog(), &ColumnType::most_generic()).expect_err("no filter mode");
    assert!(format!("{err:#}").contains("broken.yaml"));
    assert_eq!(
        err.downcast_ref::<LoadError>(),
        Some(&LoadError::Config(ConfigError::MissingFilterMode))
    );

    let missing = workspace.file("absent.yaml");
    let err = persist::load(&missing, &catalog(), &ColumnType::most_generic()).expect_err("missing file");
    assert!(format!("{err:#}").contains("absent.yaml"));
}

const LEGACY_INTERSECTION: &str = "\
group_id: orders
spec_merge_mode: INTERSECTION
items:
  - item_id: a.csv
    column_names: [x, y]
  - item_id: b.csv
    column_names: [x, z]
columns:
  - name: x
    path: integer->integer
legacy_output_columns: [x]
";

#[test]
fn legacy_intersection_record_resynthesizes_union_columns() {
    let parsed: PersistedConfig<ColumnType> =
        persist::from_str(LEGACY_INTERSECTION, PersistFormat::Yaml).expect("parse legacy");
    let loaded = deserialize(&parsed, &catalog(), &ColumnType::most_generic()).expect("deserialize");
    let config = loaded.config;
    let transformation = config.transformation();
    assert_eq!(transformation.filter_mode, ColumnFilterMode::Intersection);

    let array = &transformation.columns;
    assert_eq!(array.len(), 3);
    assert_eq!(array.unknown_index(), 3);
    assert!(array.get("x").expect("x").include);
    for name in ["y", "z"] {
        let column = array.get(name).expect("re-synthesized column");
        assert!(!column.include);
        assert_eq!(column.path.id, "string->string");
    }
    let spec = config.item_spec("a.csv").expect("a.csv");
    assert_eq!(spec.column("x").expect("x").data_type, ColumnType::Integer);
    assert_eq!(spec.column("y").expect("y").data_type, ColumnType::String);

    let output = config.output_spec().expect("output spec");
    assert_eq!(output.len(), 1);
    assert_eq!(output[0].name, "x");
}

#[test]
fn fail_on_differing_specs_loads_as_union() {
    let legacy = LEGACY_INTERSECTION.replace("INTERSECTION", "FAIL_ON_DIFFERING_SPECS");
    let parsed: PersistedConfig<ColumnType> =
        persist::from_str(&legacy, PersistFormat::Yaml).expect("parse legacy");
    let loaded = deserialize(&parsed, &catalog(), &ColumnType::most_generic()).expect("deserialize");
    let transformation = loaded.config.transformation();
    assert_eq!(transformation.filter_mode, ColumnFilterMode::Union);
    // Only the stored column has an entry; the rest is left to reconciliation.
    assert_eq!(transformation.columns.len(), 1);
}

fn column_type() -> impl Strategy<Value = ColumnType> {
    prop_oneof![
        Just(ColumnType::Integer),
        Just(ColumnType::Float),
        Just(ColumnType::String),
        Just(ColumnType::Boolean),
        Just(ColumnType::DateTime),
    ]
}

fn item() -> impl Strategy<Value = Vec<(String, ColumnType, bool)>> {
    proptest::collection::btree_map("[a-f]", (column_type(), any::<bool>()), 0..5)
        .prop_map(|columns| {
            columns
                .into_iter()
                .map(|(name, (ty, typed))| (name, ty, typed))
                .collect::<Vec<_>>()
        })
        .prop_shuffle()
}

fn build(columns: &[(String, ColumnType, bool)]) -> TableSpec<ColumnType> {
    columns
        .iter()
        .map(|(name, ty, typed)| ColumnSpec {
            name: name.clone(),
            data_type: ty.clone(),
            has_type: *typed,
        })
        .collect()
}

proptest! {
    #[test]
    fn deserialize_inverts_serialize(
        items in proptest::collection::vec(item(), 1..4),
        intersection in any::<bool>(),
        enforce in any::<bool>(),
        excluded in proptest::collection::vec(any::<bool>(), 6),
        forced in proptest::option::of(column_type()),
    ) {
        let catalog = StandardCatalog::new();
        let items = items
            .iter()
            .enumerate()
            .map(|(index, columns)| (format!("item{index}"), build(columns)))
            .collect::<Vec<_>>();
        let mode = if intersection {
            ColumnFilterMode::Intersection
        } else {
            ColumnFilterMode::Union
        };
        let options = ReconcileOptions::new(mode).enforcing_types(enforce);
        let computed = TableSpecConfig::compute("group", items, None, options, &catalog).unwrap();

        let mut array = computed.config.transformation().columns.clone();
        let names = array
            .columns()
            .iter()
            .map(|column| column.name.clone())
            .collect::<Vec<_>>();
        for (name, exclude) in names.iter().zip(&excluded) {
            if *exclude {
                array = array.with_included(name, false).unwrap();
                array = array.with_output_name(name, format!("{name}_hidden")).unwrap();
            }
        }
        let mut unknown = array.unknown().clone();
        unknown.forced_type = forced;
        array = array.with_unknown_columns(unknown);

        let transformation = schema_reconcile::TableTransformation {
            columns: array,
            ..computed.config.transformation().clone()
        };
        let specs = computed
            .config
            .items()
            .map(|(id, spec)| (id.to_string(), spec.clone()))
            .collect();
        let config = TableSpecConfig::from_transformation(
            "group",
            computed.config.item_ids().to_vec(),
            specs,
            transformation,
        )
        .unwrap();

        let record = serialize(&config, &catalog).unwrap();
        let loaded = deserialize(&record, &catalog, &ColumnType::most_generic()).unwrap();
        prop_assert!(loaded.warnings.is_empty());
        prop_assert_eq!(loaded.config, config);
    }
}
