// src/storage.rs
//! Tabular storage for the attendance workbook.
//!
//! A [`Table`] is a set of named sheets, each a header row plus string rows.
//! The ledger only ever replaces its own sheet; anything else found in the
//! workbook is written back untouched.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("File I/O error: {context}")]
    Io {
        #[source]
        source: std::io::Error,
        context: String,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON processing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Workbook error: {0}")]
    Workbook(String),
}

// Helper to create context-aware IO errors
pub(crate) fn io_context<E: Into<std::io::Error>, S: Into<String>>(
    source: E,
    context: S,
) -> StorageError {
    StorageError::Io {
        source: source.into(),
        context: context.into(),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sheet {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Sheet {
    pub fn new(headers: Vec<String>) -> Self {
        Self {
            headers,
            rows: Vec::new(),
        }
    }

    /// Header name -> column index.
    pub fn column_index(&self) -> HashMap<String, usize> {
        self.headers
            .iter()
            .enumerate()
            .map(|(i, h)| (h.trim().to_string(), i))
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    pub sheets: BTreeMap<String, Sheet>,
}

impl Table {
    pub fn sheet(&self, name: &str) -> Option<&Sheet> {
        self.sheets.get(name)
    }

    pub fn set_sheet(&mut self, name: &str, sheet: Sheet) {
        self.sheets.insert(name.to_string(), sheet);
    }
}

/// Persisted 2D grid per named sheet.
pub trait TableStore: Send + Sync {
    /// `Ok(None)` when nothing has been stored at `path` yet.
    fn load(&self, path: &Path) -> Result<Option<Table>, StorageError>;
    fn save(&self, table: &Table, path: &Path) -> Result<(), StorageError>;
}

/// Stores a workbook as a directory holding one `<sheet>.csv` per sheet.
#[derive(Debug, Clone, Copy, Default)]
pub struct CsvWorkbookStore;

impl CsvWorkbookStore {
    fn sheet_file_name(sheet: &str) -> String {
        let safe = sheet.replace(|c: char| !c.is_alphanumeric() && c != '-' && c != '_', "_");
        format!("{}.csv", safe)
    }

    fn read_sheet(path: &Path) -> Result<Sheet, StorageError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(path)?;
        let headers = reader.headers()?.iter().map(str::to_string).collect();
        let mut rows = Vec::new();
        for record in reader.records() {
            rows.push(record?.iter().map(str::to_string).collect());
        }
        Ok(Sheet { headers, rows })
    }

    fn write_sheet(path: &Path, sheet: &Sheet) -> Result<(), StorageError> {
        let tmp_path = path.with_extension("csv.tmp");
        {
            let mut writer = csv::WriterBuilder::new()
                .flexible(true)
                .from_path(&tmp_path)?;
            writer.write_record(&sheet.headers)?;
            for row in &sheet.rows {
                writer.write_record(row)?;
            }
            writer
                .flush()
                .map_err(|e| io_context(e, format!("Failed to flush {:?}", tmp_path)))?;
        }
        fs::rename(&tmp_path, path)
            .map_err(|e| io_context(e, format!("Failed to replace sheet file {:?}", path)))
    }
}

impl TableStore for CsvWorkbookStore {
    fn load(&self, path: &Path) -> Result<Option<Table>, StorageError> {
        if !path.exists() {
            debug!("Workbook {:?} not found", path);
            return Ok(None);
        }

        let entries = fs::read_dir(path)
            .map_err(|e| io_context(e, format!("Failed to read workbook directory: {:?}", path)))?;

        let mut table = Table::default();
        for entry_result in entries {
            let entry = entry_result.map_err(|e| io_context(e, "Failed to read directory entry"))?;
            let file_path = entry.path();
            if !file_path.is_file() || file_path.extension().map_or(true, |ext| ext != "csv") {
                continue;
            }
            let Some(name) = file_path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            table.set_sheet(name, Self::read_sheet(&file_path)?);
        }

        if table.sheets.is_empty() {
            return Ok(None);
        }
        Ok(Some(table))
    }

    fn save(&self, table: &Table, path: &Path) -> Result<(), StorageError> {
        fs::create_dir_all(path)
            .map_err(|e| io_context(e, format!("Failed to create workbook directory: {:?}", path)))?;
        for (name, sheet) in &table.sheets {
            Self::write_sheet(&path.join(Self::sheet_file_name(name)), sheet)?;
        }
        debug!("Saved workbook {:?} ({} sheets)", path, table.sheets.len());
        Ok(())
    }
}

/// Keeps workbooks in memory, keyed by path. Useful for dry runs and tests.
#[derive(Debug, Default)]
pub struct InMemoryTableStore {
    tables: Mutex<HashMap<PathBuf, Table>>,
    saves: Mutex<usize>,
}

impl InMemoryTableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(path: impl Into<PathBuf>, table: Table) -> Self {
        let store = Self::default();
        store
            .tables
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(path.into(), table);
        store
    }

    /// Number of completed `save` calls.
    pub fn save_count(&self) -> usize {
        *self.saves.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl TableStore for InMemoryTableStore {
    fn load(&self, path: &Path) -> Result<Option<Table>, StorageError> {
        Ok(self
            .tables
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(path)
            .cloned())
    }

    fn save(&self, table: &Table, path: &Path) -> Result<(), StorageError> {
        self.tables
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(path.to_path_buf(), table.clone());
        *self.saves.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        Ok(())
    }
}

/// Logs where a workbook lives; called once at startup.
pub fn describe_workbook(path: &Path) {
    if path.exists() {
        info!("Using attendance workbook at {:?}", path);
    } else {
        info!("Attendance workbook {:?} will be created on first punch", path);
    }
}
