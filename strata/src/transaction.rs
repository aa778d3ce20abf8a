//! Transaction lifecycle: begin, commit, and abort with rollback.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use crate::Rid;
use crate::errors::StorageError;
use crate::heap::HeapSet;
use crate::index::IndexSet;
use crate::lock_manager::{LockDataId, LockManager};
use crate::log::{INVALID_LSN, LogManager, LogPayload, LogRecord, Lsn};

pub type TxnId = i64;

pub type Timestamp = i64;

/// Two-phase-locking state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

/// One entry of a transaction's write set. Entries are appended in mutation
/// order and replayed in reverse on abort; DELETE and UPDATE entries own a
/// copy of the bytes they must restore.
#[derive(Debug, Clone)]
pub enum WriteRecord {
    InsertRecord {
        table: String,
        rid: Rid,
    },
    DeleteRecord {
        table: String,
        rid: Rid,
        record: Vec<u8>,
    },
    UpdateRecord {
        table: String,
        rid: Rid,
        before: Vec<u8>,
    },
    InsertIndex {
        index: String,
        key: Vec<u8>,
    },
    DeleteIndex {
        index: String,
        table: String,
        key: Vec<u8>,
        rid: Rid,
    },
}

/// A transaction handle. Shared across the threads of a statement; all
/// mutable state is interior.
#[derive(Debug)]
pub struct Transaction {
    id: TxnId,
    start_ts: Timestamp,
    state: Mutex<TxnState>,
    prev_lsn: AtomicI64,
    write_set: Mutex<Vec<WriteRecord>>,
    lock_set: Mutex<HashSet<LockDataId>>,
}

impl Transaction {
    pub(crate) fn new(id: TxnId, start_ts: Timestamp) -> Self {
        Self {
            id,
            start_ts,
            state: Mutex::new(TxnState::Growing),
            prev_lsn: AtomicI64::new(INVALID_LSN),
            write_set: Mutex::new(Vec::new()),
            lock_set: Mutex::new(HashSet::new()),
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn start_ts(&self) -> Timestamp {
        self.start_ts
    }

    pub fn state(&self) -> TxnState {
        *self.state.lock().unwrap()
    }

    pub(crate) fn set_state(&self, state: TxnState) {
        *self.state.lock().unwrap() = state;
    }

    /// The LSN of this transaction's most recent log record.
    pub fn prev_lsn(&self) -> Lsn {
        self.prev_lsn.load(Ordering::SeqCst)
    }

    pub fn set_prev_lsn(&self, lsn: Lsn) {
        self.prev_lsn.store(lsn, Ordering::SeqCst);
    }

    pub fn append_write_record(&self, record: WriteRecord) {
        self.write_set.lock().unwrap().push(record);
    }

    pub fn write_set_len(&self) -> usize {
        self.write_set.lock().unwrap().len()
    }

    pub(crate) fn take_write_set(&self) -> Vec<WriteRecord> {
        std::mem::take(&mut self.write_set.lock().unwrap())
    }

    pub(crate) fn record_lock(&self, resource: LockDataId) {
        self.lock_set.lock().unwrap().insert(resource);
    }

    pub(crate) fn take_lock_set(&self) -> HashSet<LockDataId> {
        std::mem::take(&mut self.lock_set.lock().unwrap())
    }

    pub fn holds_locks(&self) -> bool {
        !self.lock_set.lock().unwrap().is_empty()
    }
}

/// The per-statement execution context handed to the record manager and the
/// executors. Rollback runs with no context at all.
#[derive(Debug)]
pub struct Context<'a> {
    pub lock_manager: &'a LockManager,
    pub log_manager: &'a LogManager,
    pub txn: &'a Transaction,
}

/// Coordinates transaction lifecycle across the engine.
pub struct TransactionManager {
    next_txn_id: AtomicI64,
    next_timestamp: AtomicI64,
    txn_table: Mutex<HashMap<TxnId, Arc<Transaction>>>,
    lock_manager: Arc<LockManager>,
    log_manager: Arc<LogManager>,
    heaps: Arc<HeapSet>,
    indexes: Arc<IndexSet>,
}

impl TransactionManager {
    pub fn new(
        lock_manager: Arc<LockManager>,
        log_manager: Arc<LogManager>,
        heaps: Arc<HeapSet>,
        indexes: Arc<IndexSet>,
    ) -> Self {
        Self {
            next_txn_id: AtomicI64::new(0),
            next_timestamp: AtomicI64::new(0),
            txn_table: Mutex::new(HashMap::new()),
            lock_manager,
            log_manager,
            heaps,
            indexes,
        }
    }

    /// Starts a transaction. With `None` a fresh transaction is created,
    /// stamped, and given its BEGIN log record; an existing handle is just
    /// registered.
    pub fn begin(
        &self,
        txn: Option<Arc<Transaction>>,
    ) -> Result<Arc<Transaction>, StorageError> {
        let txn = match txn {
            Some(txn) => txn,
            None => {
                let id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
                let start_ts = self.next_timestamp.fetch_add(1, Ordering::SeqCst);
                let txn = Arc::new(Transaction::new(id, start_ts));

                let mut begin = LogRecord::new(id, INVALID_LSN, LogPayload::Begin);
                let lsn = self.log_manager.append(&mut begin)?;
                txn.set_prev_lsn(lsn);
                txn
            }
        };

        self.txn_table
            .lock()
            .unwrap()
            .insert(txn.id(), txn.clone());
        crate::strata_debug_log!("[TransactionManager::begin] txn {}", txn.id());
        Ok(txn)
    }

    pub fn get(&self, id: TxnId) -> Option<Arc<Transaction>> {
        self.txn_table.lock().unwrap().get(&id).cloned()
    }

    /// Commits a transaction: releases its locks, emits the COMMIT record,
    /// and forces the log to disk. The transaction only reaches `Committed`
    /// once the flush succeeds.
    pub fn commit(&self, txn: &Transaction) -> Result<(), StorageError> {
        if txn.state() == TxnState::Committed {
            return Err(StorageError::Internal(format!(
                "transaction {} is already committed",
                txn.id()
            )));
        }

        // Data-page changes are already in the buffer pool; nothing to apply.
        txn.take_write_set();
        self.lock_manager.unlock_all(txn);

        let mut commit = LogRecord::new(txn.id(), txn.prev_lsn(), LogPayload::Commit);
        let lsn = self.log_manager.append(&mut commit)?;
        txn.set_prev_lsn(lsn);
        self.log_manager.flush()?;

        txn.set_state(TxnState::Committed);
        self.txn_table.lock().unwrap().remove(&txn.id());
        crate::strata_debug_log!("[TransactionManager::commit] txn {}", txn.id());
        Ok(())
    }

    /// Aborts a transaction: replays its write set in reverse, applying the
    /// inverse of each mutation directly through the record manager (the
    /// locks protecting these records are still held by this transaction, so
    /// rollback runs with no context), then releases locks and emits the
    /// ABORT record.
    pub fn abort(&self, txn: &Transaction) -> Result<(), StorageError> {
        if txn.state() == TxnState::Committed {
            return Err(StorageError::Internal(format!(
                "transaction {} is already committed",
                txn.id()
            )));
        }
        crate::strata_debug_log!("[TransactionManager::abort] txn {}", txn.id());

        let write_set = txn.take_write_set();
        // A rolled-back DELETE reinserts into any free slot, so the record
        // may come back under a different rid. Index re-inserts that stored
        // the old rid are remapped; reverse order guarantees the record
        // entry is processed before its index entries.
        let mut remapped: HashMap<(String, Rid), Rid> = HashMap::new();

        for record in write_set.iter().rev() {
            match record {
                WriteRecord::InsertRecord { table, rid } => {
                    self.heap(table)?.delete_record(*rid, None)?;
                }
                WriteRecord::DeleteRecord { table, rid, record } => {
                    let new_rid = self.heap(table)?.insert_record(record, None)?;
                    if new_rid != *rid {
                        remapped.insert((table.clone(), *rid), new_rid);
                    }
                }
                WriteRecord::UpdateRecord { table, rid, before } => {
                    self.heap(table)?.update_record(*rid, before, None)?;
                }
                WriteRecord::InsertIndex { index, key } => {
                    self.index(index)?.delete_entry(key, None);
                }
                WriteRecord::DeleteIndex {
                    index,
                    table,
                    key,
                    rid,
                } => {
                    let rid = remapped
                        .get(&(table.clone(), *rid))
                        .copied()
                        .unwrap_or(*rid);
                    self.index(index)?.insert_entry(key, rid, None);
                }
            }
        }

        self.lock_manager.unlock_all(txn);

        let mut abort = LogRecord::new(txn.id(), txn.prev_lsn(), LogPayload::Abort);
        let lsn = self.log_manager.append(&mut abort)?;
        txn.set_prev_lsn(lsn);
        self.log_manager.flush()?;

        txn.set_state(TxnState::Aborted);
        self.txn_table.lock().unwrap().remove(&txn.id());
        Ok(())
    }

    fn heap(&self, table: &str) -> Result<Arc<crate::heap::HeapFile>, StorageError> {
        self.heaps.get(table).ok_or_else(|| {
            StorageError::Internal(format!("write set names unknown table '{table}'"))
        })
    }

    fn index(&self, name: &str) -> Result<Arc<crate::index::Index>, StorageError> {
        self.indexes.get(name).ok_or_else(|| {
            StorageError::Internal(format!("write set names unknown index '{name}'"))
        })
    }
}
