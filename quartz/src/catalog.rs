//! Table, column, and index metadata, plus the registries of open heap files
//! and indexes. Metadata is persisted to a flat `catalog.meta` file.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use crate::errors::QueryError;
use strata::buffer_pool::BufferPoolManager;
use strata::disk::DiskManager;
use strata::heap::{HeapFile, HeapScan, HeapSet};
use strata::index::{Index, IndexSet};

/// Column type. `Int` and `Float` are 4 bytes little-endian; `Str` is a
/// fixed-length NUL-padded byte array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColType {
    Int,
    Float,
    Str,
}

impl fmt::Display for ColType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColType::Int => write!(f, "INT"),
            ColType::Float => write!(f, "FLOAT"),
            ColType::Str => write!(f, "STRING"),
        }
    }
}

/// A column definition handed to `create_table`. `len` is only meaningful
/// for `Str` columns; numeric columns are always 4 bytes.
#[derive(Debug, Clone)]
pub struct ColumnDef {
    pub name: String,
    pub col_type: ColType,
    pub len: usize,
}

/// Metadata of one column, including its byte position inside the
/// fixed-size record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColMeta {
    pub tab_name: String,
    pub name: String,
    pub col_type: ColType,
    pub len: usize,
    pub offset: usize,
}

/// Metadata of one index: an ordered subset of a table's columns. Keys are
/// the concatenation of the indexed column bytes in declaration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexMeta {
    pub tab_name: String,
    pub cols: Vec<ColMeta>,
    pub col_tot_len: usize,
}

impl IndexMeta {
    pub fn index_name(&self) -> String {
        let mut name = self.tab_name.clone();
        for col in &self.cols {
            name.push('_');
            name.push_str(&col.name);
        }
        name
    }

    /// Extracts this index's key bytes from a record image.
    pub fn key_from(&self, record: &[u8]) -> Vec<u8> {
        let mut key = Vec::with_capacity(self.col_tot_len);
        for col in &self.cols {
            key.extend_from_slice(&record[col.offset..col.offset + col.len]);
        }
        key
    }
}

/// Metadata of one table. Records are fixed-size: the last column's offset
/// plus its length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TabMeta {
    pub name: String,
    pub cols: Vec<ColMeta>,
    pub indexes: Vec<IndexMeta>,
}

impl TabMeta {
    pub fn record_size(&self) -> usize {
        self.cols.last().map_or(0, |col| col.offset + col.len)
    }

    pub fn get_col(&self, name: &str) -> Result<&ColMeta, QueryError> {
        self.cols
            .iter()
            .find(|col| col.name == name)
            .ok_or_else(|| QueryError::ColumnNotFound(name.to_string()))
    }
}

const CATALOG_FILE: &str = "catalog.meta";

/// The system catalog: table metadata plus the heap-file and index handle
/// registries the executors and the rollback driver resolve through.
#[derive(Debug)]
pub struct Catalog {
    dir: PathBuf,
    disk: Arc<DiskManager>,
    bpm: Arc<BufferPoolManager>,
    heaps: Arc<HeapSet>,
    indexes: Arc<IndexSet>,
    tables: RwLock<HashMap<String, TabMeta>>,
}

impl Catalog {
    pub fn open(
        dir: &Path,
        disk: Arc<DiskManager>,
        bpm: Arc<BufferPoolManager>,
        heaps: Arc<HeapSet>,
        indexes: Arc<IndexSet>,
    ) -> Result<Self, QueryError> {
        let catalog = Self {
            dir: dir.to_path_buf(),
            disk,
            bpm,
            heaps,
            indexes,
            tables: RwLock::new(HashMap::new()),
        };
        catalog.load()?;
        Ok(catalog)
    }

    fn load(&self) -> Result<(), QueryError> {
        let path = self.dir.join(CATALOG_FILE);
        if !path.exists() {
            return Ok(());
        }
        let bytes = fs::read(&path)?;
        let tables: HashMap<String, TabMeta> = bincode::deserialize(&bytes)
            .map_err(|e| QueryError::Internal(format!("catalog file is corrupt: {e}")))?;

        for meta in tables.values() {
            let file_id = self.disk.open_file(self.table_path(&meta.name))?;
            let heap = Arc::new(HeapFile::open(
                &meta.name,
                file_id,
                self.disk.clone(),
                self.bpm.clone(),
            )?);
            self.heaps.insert(heap.clone());
            for index_meta in &meta.indexes {
                self.build_index(index_meta, &heap)?;
            }
        }

        *self.tables.write().unwrap() = tables;
        Ok(())
    }

    fn save(&self) -> Result<(), QueryError> {
        let tables = self.tables.read().unwrap();
        let bytes = bincode::serialize(&*tables)
            .map_err(|e| QueryError::Internal(format!("catalog serialization failed: {e}")))?;
        fs::write(self.dir.join(CATALOG_FILE), bytes)?;
        Ok(())
    }

    fn table_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.tbl"))
    }

    /// Indexes are volatile: populate a fresh one from the live records.
    fn build_index(&self, meta: &IndexMeta, heap: &Arc<HeapFile>) -> Result<(), QueryError> {
        let index = Arc::new(Index::new(&meta.index_name(), &meta.tab_name));
        let mut scan = HeapScan::new(heap.clone())?;
        while !scan.is_end() {
            let record = heap.get_record(scan.rid(), None)?;
            index.insert_entry(&meta.key_from(&record.data), scan.rid(), None);
            scan.next()?;
        }
        self.indexes.insert(index);
        Ok(())
    }

    pub fn create_table(&self, name: &str, columns: &[ColumnDef]) -> Result<(), QueryError> {
        if self.is_table(name) {
            return Err(QueryError::TableExists(name.to_string()));
        }
        if columns.is_empty() {
            return Err(QueryError::Internal(format!(
                "table '{name}' has no columns"
            )));
        }

        let mut cols = Vec::with_capacity(columns.len());
        let mut offset = 0;
        for def in columns {
            let len = match def.col_type {
                ColType::Int | ColType::Float => 4,
                ColType::Str => def.len,
            };
            cols.push(ColMeta {
                tab_name: name.to_string(),
                name: def.name.clone(),
                col_type: def.col_type,
                len,
                offset,
            });
            offset += len;
        }
        let meta = TabMeta {
            name: name.to_string(),
            cols,
            indexes: Vec::new(),
        };

        let file_id = self.disk.open_file(self.table_path(name))?;
        let heap = Arc::new(HeapFile::create(
            name,
            file_id,
            meta.record_size(),
            self.disk.clone(),
            self.bpm.clone(),
        )?);
        self.heaps.insert(heap);

        self.tables
            .write()
            .unwrap()
            .insert(name.to_string(), meta);
        self.save()?;
        crate::quartz_debug_log!("[Catalog::create_table] '{name}'");
        Ok(())
    }

    pub fn create_index(&self, tab_name: &str, col_names: &[String]) -> Result<(), QueryError> {
        let meta = {
            let tables = self.tables.read().unwrap();
            let tab = tables
                .get(tab_name)
                .ok_or_else(|| QueryError::TableNotFound(tab_name.to_string()))?;
            let mut cols = Vec::with_capacity(col_names.len());
            for name in col_names {
                cols.push(tab.get_col(name)?.clone());
            }
            let col_tot_len = cols.iter().map(|col| col.len).sum();
            IndexMeta {
                tab_name: tab_name.to_string(),
                cols,
                col_tot_len,
            }
        };

        let heap = self.heap(tab_name)?;
        self.build_index(&meta, &heap)?;

        self.tables
            .write()
            .unwrap()
            .get_mut(tab_name)
            .expect("table checked above")
            .indexes
            .push(meta);
        self.save()?;
        Ok(())
    }

    pub fn is_table(&self, name: &str) -> bool {
        self.tables.read().unwrap().contains_key(name)
    }

    pub fn table(&self, name: &str) -> Result<TabMeta, QueryError> {
        self.tables
            .read()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| QueryError::TableNotFound(name.to_string()))
    }

    pub fn heap(&self, name: &str) -> Result<Arc<HeapFile>, QueryError> {
        self.heaps
            .get(name)
            .ok_or_else(|| QueryError::TableNotFound(name.to_string()))
    }

    pub fn index(&self, name: &str) -> Result<Arc<Index>, QueryError> {
        self.indexes
            .get(name)
            .ok_or_else(|| QueryError::Internal(format!("index '{name}' is not open")))
    }
}
