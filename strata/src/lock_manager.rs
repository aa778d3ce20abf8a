//! Manages record-level locks for two-phase locking.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Condvar, Mutex};

use crate::errors::LockError;
use crate::transaction::{Transaction, TxnId, TxnState};
use crate::{FileId, Rid};

/// Represents the different modes of locking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// A lockable record, keyed by the file it lives in and its rid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockDataId {
    pub file_id: FileId,
    pub rid: Rid,
}

/// A request for a lock by a transaction.
#[derive(Debug, Clone)]
struct LockRequest {
    txn_id: TxnId,
    mode: LockMode,
    granted: bool,
}

/// A queue of lock requests for a specific record.
#[derive(Debug, Default)]
struct LockRequestQueue {
    requests: VecDeque<LockRequest>,
    // Cached grant counts so compatibility checks don't walk the queue.
    shared_granted: usize,
    exclusive_granted: bool,
}

impl LockRequestQueue {
    fn recount(&mut self) {
        self.shared_granted = self
            .requests
            .iter()
            .filter(|r| r.granted && r.mode == LockMode::Shared)
            .count();
        self.exclusive_granted = self
            .requests
            .iter()
            .any(|r| r.granted && r.mode == LockMode::Exclusive);
    }
}

/// The main lock manager struct.
#[derive(Debug, Default)]
pub struct LockManager {
    /// The main table mapping records to their lock queues.
    lock_table: Mutex<HashMap<LockDataId, LockRequestQueue>>,
    /// A condition variable so transactions can wait for locks.
    cvar: Condvar,
    /// The waits-for graph for deadlock detection: waiting transaction to
    /// the set of transactions it waits on.
    waits_for: Mutex<HashMap<TxnId, HashSet<TxnId>>>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock_shared(&self, txn: &Transaction, resource: LockDataId) -> Result<(), LockError> {
        self.lock(txn, resource, LockMode::Shared)
    }

    pub fn lock_exclusive(
        &self,
        txn: &Transaction,
        resource: LockDataId,
    ) -> Result<(), LockError> {
        self.lock(txn, resource, LockMode::Exclusive)
    }

    fn lock(
        &self,
        txn: &Transaction,
        resource: LockDataId,
        mode: LockMode,
    ) -> Result<(), LockError> {
        // Two-phase locking: no acquisition after the first release.
        if txn.state() != TxnState::Growing {
            return Err(LockError::LockOnShrinking);
        }

        let txn_id = txn.id();
        let mut lock_table = self.lock_table.lock().unwrap();
        let queue = lock_table.entry(resource).or_default();

        // Reentry by the same transaction.
        let held_mode = queue
            .requests
            .iter()
            .find(|r| r.txn_id == txn_id && r.granted)
            .map(|r| r.mode);
        match held_mode {
            Some(held) if held == mode || held == LockMode::Exclusive => return Ok(()),
            Some(_) => {
                // Shared -> exclusive upgrade: give up the shared grant and
                // queue the exclusive request at the front.
                queue.requests.retain(|r| !(r.txn_id == txn_id && r.granted));
                queue.shared_granted -= 1;
                queue.requests.push_front(LockRequest {
                    txn_id,
                    mode: LockMode::Exclusive,
                    granted: false,
                });
            }
            None => queue.requests.push_back(LockRequest {
                txn_id,
                mode,
                granted: false,
            }),
        }

        loop {
            Self::try_grant_locks(resource, &mut lock_table);

            let granted = lock_table
                .get(&resource)
                .and_then(|q| q.requests.iter().find(|r| r.txn_id == txn_id))
                .is_some_and(|r| r.granted);

            if granted {
                self.remove_from_waits_for(txn_id);
                txn.record_lock(resource);
                self.cvar.notify_all();
                return Ok(());
            }

            // Not granted: update the waits-for graph and check for deadlock
            // before going to sleep.
            self.update_waits_for_graph(txn_id, &lock_table);
            if self.detect_deadlock(txn_id) {
                let queue = lock_table.get_mut(&resource).unwrap();
                queue.requests.retain(|r| r.txn_id != txn_id);
                if queue.requests.is_empty() {
                    lock_table.remove(&resource);
                }
                self.remove_from_waits_for(txn_id);
                self.cvar.notify_all();
                return Err(LockError::Deadlock);
            }

            lock_table = self.cvar.wait(lock_table).unwrap();
        }
    }

    /// Releases every lock the transaction holds. This is the transaction's
    /// single release point (commit or abort); the first call moves a growing
    /// transaction into its shrinking phase.
    pub fn unlock_all(&self, txn: &Transaction) {
        let held = txn.take_lock_set();
        if !held.is_empty() && txn.state() == TxnState::Growing {
            txn.set_state(TxnState::Shrinking);
        }

        let txn_id = txn.id();
        let mut lock_table = self.lock_table.lock().unwrap();
        let mut affected = Vec::new();
        for resource in held {
            if let Some(queue) = lock_table.get_mut(&resource) {
                let old_len = queue.requests.len();
                queue.requests.retain(|r| r.txn_id != txn_id);
                if queue.requests.is_empty() {
                    lock_table.remove(&resource);
                } else if queue.requests.len() < old_len {
                    queue.recount();
                    affected.push(resource);
                }
            }
        }

        self.remove_from_waits_for(txn_id);

        for resource in affected {
            Self::try_grant_locks(resource, &mut lock_table);
        }

        self.cvar.notify_all();
    }

    fn try_grant_locks(
        resource: LockDataId,
        lock_table: &mut HashMap<LockDataId, LockRequestQueue>,
    ) {
        let queue = match lock_table.get_mut(&resource) {
            Some(q) => q,
            None => return,
        };

        for req in queue.requests.iter_mut() {
            if req.granted {
                continue;
            }

            let compatible = match req.mode {
                LockMode::Shared => !queue.exclusive_granted,
                LockMode::Exclusive => queue.shared_granted == 0 && !queue.exclusive_granted,
            };

            if compatible {
                req.granted = true;
                match req.mode {
                    LockMode::Shared => queue.shared_granted += 1,
                    LockMode::Exclusive => queue.exclusive_granted = true,
                }
            } else {
                // The first incompatible request stops further grants to keep
                // FIFO order.
                break;
            }
        }
    }

    fn update_waits_for_graph(
        &self,
        waiter_txn_id: TxnId,
        lock_table: &HashMap<LockDataId, LockRequestQueue>,
    ) {
        let mut waits_for = self.waits_for.lock().unwrap();
        let waiting_for_set = waits_for.entry(waiter_txn_id).or_default();
        waiting_for_set.clear();

        for queue in lock_table.values() {
            if let Some(waiter_req) = queue
                .requests
                .iter()
                .find(|r| r.txn_id == waiter_txn_id && !r.granted)
            {
                // The waiter waits on every holder of an incompatible lock.
                for holder in queue.requests.iter().filter(|r| r.granted) {
                    let compatible = match waiter_req.mode {
                        LockMode::Shared => holder.mode != LockMode::Exclusive,
                        LockMode::Exclusive => false,
                    };
                    if !compatible && holder.txn_id != waiter_txn_id {
                        waiting_for_set.insert(holder.txn_id);
                    }
                }
            }
        }
    }

    fn remove_from_waits_for(&self, txn_id: TxnId) {
        let mut waits_for = self.waits_for.lock().unwrap();
        waits_for.remove(&txn_id);
        for waiting_set in waits_for.values_mut() {
            waiting_set.remove(&txn_id);
        }
    }

    fn detect_deadlock(&self, start_txn_id: TxnId) -> bool {
        let waits_for = self.waits_for.lock().unwrap();
        let mut visited = HashSet::new();
        let mut path = HashSet::new();
        Self::dfs_detect(start_txn_id, &waits_for, &mut visited, &mut path)
    }

    fn dfs_detect(
        current_txn_id: TxnId,
        waits_for: &HashMap<TxnId, HashSet<TxnId>>,
        visited: &mut HashSet<TxnId>,
        path: &mut HashSet<TxnId>,
    ) -> bool {
        visited.insert(current_txn_id);
        path.insert(current_txn_id);

        if let Some(waits_for_set) = waits_for.get(&current_txn_id) {
            for &next_txn_id in waits_for_set {
                if path.contains(&next_txn_id) {
                    return true; // Cycle detected
                }
                if !visited.contains(&next_txn_id)
                    && Self::dfs_detect(next_txn_id, waits_for, visited, path)
                {
                    return true;
                }
            }
        }

        path.remove(&current_txn_id);
        false
    }
}
