//! The associative secondary index.
//!
//! An index maps fixed-width concatenated key bytes to the rid of the record
//! they were extracted from. The map is ordered, so point and range lookups
//! both work; the internal structure is nobody else's business. Mutations
//! made under a transaction are recorded in its write set so that abort can
//! undo them.

use std::collections::{BTreeMap, HashMap};
use std::ops::RangeBounds;

use parking_lot::RwLock;
use std::sync::Arc;

use crate::Rid;
use crate::transaction::{Transaction, WriteRecord};

#[derive(Debug)]
pub struct Index {
    name: String,
    table: String,
    entries: RwLock<BTreeMap<Vec<u8>, Rid>>,
}

impl Index {
    pub fn new(name: &str, table: &str) -> Self {
        Self {
            name: name.to_string(),
            table: table.to_string(),
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Inserts (or replaces) the entry for `key`.
    pub fn insert_entry(&self, key: &[u8], rid: Rid, txn: Option<&Transaction>) {
        self.entries.write().insert(key.to_vec(), rid);
        if let Some(txn) = txn {
            txn.append_write_record(WriteRecord::InsertIndex {
                index: self.name.clone(),
                key: key.to_vec(),
            });
        }
    }

    /// Removes the entry for `key`, returning the rid it pointed at.
    pub fn delete_entry(&self, key: &[u8], txn: Option<&Transaction>) -> Option<Rid> {
        let removed = self.entries.write().remove(key);
        if let (Some(rid), Some(txn)) = (removed, txn) {
            txn.append_write_record(WriteRecord::DeleteIndex {
                index: self.name.clone(),
                table: self.table.clone(),
                key: key.to_vec(),
                rid,
            });
        }
        removed
    }

    /// Point lookup.
    pub fn get(&self, key: &[u8]) -> Option<Rid> {
        self.entries.read().get(key).copied()
    }

    /// Range lookup over key bytes, in key order.
    pub fn range<R: RangeBounds<Vec<u8>>>(&self, bounds: R) -> Vec<(Vec<u8>, Rid)> {
        self.entries
            .read()
            .range(bounds)
            .map(|(k, v)| (k.clone(), *v))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

/// Process-wide registry of indexes by index name. Rollback resolves
/// write-set entries through this.
#[derive(Debug, Default)]
pub struct IndexSet {
    indexes: RwLock<HashMap<String, Arc<Index>>>,
}

impl IndexSet {
    pub fn insert(&self, index: Arc<Index>) {
        self.indexes
            .write()
            .insert(index.name().to_string(), index);
    }

    pub fn get(&self, name: &str) -> Option<Arc<Index>> {
        self.indexes.read().get(name).cloned()
    }

    pub fn remove(&self, name: &str) -> Option<Arc<Index>> {
        self.indexes.write().remove(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_get_delete() {
        let index = Index::new("t_k", "t");
        let rid = Rid {
            page_no: 1,
            slot_no: 3,
        };
        index.insert_entry(&1i32.to_le_bytes(), rid, None);
        assert_eq!(index.get(&1i32.to_le_bytes()), Some(rid));
        assert_eq!(index.delete_entry(&1i32.to_le_bytes(), None), Some(rid));
        assert_eq!(index.get(&1i32.to_le_bytes()), None);
    }

    #[test]
    fn range_is_key_ordered() {
        let index = Index::new("t_k", "t");
        for k in [3i32, 1, 2] {
            index.insert_entry(
                &k.to_le_bytes(),
                Rid {
                    page_no: 1,
                    slot_no: k,
                },
                None,
            );
        }
        let all = index.range(..);
        let keys: Vec<i32> = all
            .iter()
            .map(|(k, _)| i32::from_le_bytes(k[..4].try_into().unwrap()))
            .collect();
        assert_eq!(keys, vec![1, 2, 3]);
    }
}
