#![allow(dead_code)]

use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use schema_reconcile::{
    ColumnSpec, ColumnType, ProbeError, RawSpec, SchemaProbe, StandardCatalog, TableSpec,
    TransformationArray, compute_raw_spec,
};
use tempfile::{TempDir, tempdir};

/// Routes `log` output through the test harness; safe to call repeatedly.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn table(columns: &[(&str, ColumnType)]) -> TableSpec<ColumnType> {
    columns
        .iter()
        .map(|(name, ty)| ColumnSpec::new(*name, ty.clone()))
        .collect()
}

pub fn raw(items: &[&TableSpec<ColumnType>]) -> RawSpec<ColumnType> {
    compute_raw_spec(items.iter().copied())
}

pub fn names(array: &TransformationArray<ColumnType, ColumnType>) -> Vec<&str> {
    array.columns().iter().map(|column| column.name.as_str()).collect()
}

pub fn catalog() -> StandardCatalog {
    StandardCatalog::new()
}

/// In-memory probe keyed by item id.
#[derive(Debug, Default)]
pub struct MapProbe {
    specs: HashMap<String, TableSpec<ColumnType>>,
}

impl MapProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, item_id: &str, spec: TableSpec<ColumnType>) -> Self {
        self.specs.insert(item_id.to_string(), spec);
        self
    }
}

impl SchemaProbe for MapProbe {
    type External = ColumnType;

    fn probe(&self, item_id: &str) -> Result<TableSpec<ColumnType>, ProbeError> {
        self.specs.get(item_id).cloned().ok_or_else(|| {
            ProbeError::io(
                item_id,
                std::io::Error::new(std::io::ErrorKind::NotFound, "no such item"),
            )
        })
    }
}

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn file(&self, name: &str) -> PathBuf {
        self.temp_dir.path().join(name)
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.file(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents.as_bytes())
            .expect("write temp file contents");
        path
    }
}
