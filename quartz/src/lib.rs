//! # Quartz
//! The query layer of the Quartz database: semantic analysis, iterator-model
//! execution, and the catalog, over the `strata` storage engine.

use std::path::Path;
use std::sync::Arc;

pub mod analyze;
pub mod ast;
pub mod catalog;
pub mod common;
pub mod errors;
pub mod executor;

use crate::catalog::Catalog;
use crate::errors::QueryError;
use strata::buffer_pool::BufferPoolManager;
use strata::disk::DiskManager;
use strata::heap::HeapSet;
use strata::index::IndexSet;
use strata::lock_manager::LockManager;
use strata::log::LogManager;
use strata::transaction::{Context, Transaction, TransactionManager};

pub fn debug_logs_enabled() -> bool {
    std::env::var_os("QUARTZ_DEBUG_LOG").is_some()
}

#[macro_export]
macro_rules! quartz_debug_log {
    ($($arg:tt)*) => {
        if $crate::debug_logs_enabled() {
            println!($($arg)*);
        }
    };
}

/// One open database: the storage-engine managers wired together plus the
/// catalog, all rooted in a single directory.
pub struct Database {
    disk: Arc<DiskManager>,
    bpm: Arc<BufferPoolManager>,
    lock_manager: Arc<LockManager>,
    log_manager: Arc<LogManager>,
    txn_manager: Arc<TransactionManager>,
    catalog: Catalog,
}

impl Database {
    pub fn open(dir: &Path) -> Result<Self, QueryError> {
        std::fs::create_dir_all(dir)?;
        let disk = Arc::new(DiskManager::open(dir.join("db.wal"))?);
        let bpm = Arc::new(BufferPoolManager::new(disk.clone()));
        let heaps = Arc::new(HeapSet::default());
        let indexes = Arc::new(IndexSet::default());
        let lock_manager = Arc::new(LockManager::new());
        let log_manager = Arc::new(LogManager::new(disk.clone()));
        let txn_manager = Arc::new(TransactionManager::new(
            lock_manager.clone(),
            log_manager.clone(),
            heaps.clone(),
            indexes.clone(),
        ));
        let catalog = Catalog::open(dir, disk.clone(), bpm.clone(), heaps, indexes)?;

        crate::quartz_debug_log!("[Database::open] {dir:?}");
        Ok(Self {
            disk,
            bpm,
            lock_manager,
            log_manager,
            txn_manager,
            catalog,
        })
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn disk(&self) -> &DiskManager {
        &self.disk
    }

    pub fn log_manager(&self) -> &LogManager {
        &self.log_manager
    }

    pub fn txn_manager(&self) -> &TransactionManager {
        &self.txn_manager
    }

    pub fn begin(&self) -> Result<Arc<Transaction>, QueryError> {
        Ok(self.txn_manager.begin(None)?)
    }

    pub fn commit(&self, txn: &Transaction) -> Result<(), QueryError> {
        Ok(self.txn_manager.commit(txn)?)
    }

    pub fn abort(&self, txn: &Transaction) -> Result<(), QueryError> {
        Ok(self.txn_manager.abort(txn)?)
    }

    /// The execution context a statement running under `txn` hands to the
    /// record manager and executors.
    pub fn context<'a>(&'a self, txn: &'a Transaction) -> Context<'a> {
        Context {
            lock_manager: &self.lock_manager,
            log_manager: &self.log_manager,
            txn,
        }
    }

    /// Writes every dirty buffered page back to its file.
    pub fn flush_pages(&self) -> Result<(), QueryError> {
        self.bpm.flush_all_pages()?;
        Ok(())
    }
}
