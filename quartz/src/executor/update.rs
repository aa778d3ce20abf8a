use std::sync::Arc;

use super::{Executor, find_col};
use crate::catalog::{Catalog, ColMeta, TabMeta};
use crate::common::SetClause;
use crate::errors::QueryError;
use strata::Rid;
use strata::heap::{HeapFile, Record};
use strata::transaction::Context;

/// Applies a set-clause vector to a materialized rid list, maintaining every
/// index on the table. Each row is either fully updated (indexes and record)
/// or left untouched; any per-row failure aborts the statement.
pub struct UpdateExecutor<'a> {
    catalog: &'a Catalog,
    tab: TabMeta,
    heap: Arc<HeapFile>,
    set_clauses: Vec<SetClause>,
    rids: Vec<Rid>,
    ctx: Option<&'a Context<'a>>,
    done: bool,
}

impl<'a> UpdateExecutor<'a> {
    pub fn new(
        catalog: &'a Catalog,
        tab_name: &str,
        set_clauses: Vec<SetClause>,
        rids: Vec<Rid>,
        ctx: Option<&'a Context<'a>>,
    ) -> Result<Self, QueryError> {
        let tab = catalog.table(tab_name)?;
        let heap = catalog.heap(tab_name)?;
        Ok(Self {
            catalog,
            tab,
            heap,
            set_clauses,
            rids,
            ctx,
            done: false,
        })
    }

    fn update_row(&self, rid: Rid) -> Result<(), QueryError> {
        let before = self.heap.get_record(rid, self.ctx)?;
        let mut after = before.data.clone();

        // Set clauses arrive from the analyzer already coerced and encoded
        // at the column width; applying one is a byte copy.
        for clause in &self.set_clauses {
            let col = find_col(&self.tab.cols, &clause.lhs.tab_name, &clause.lhs.col_name)?;
            let raw = clause.rhs.raw().ok_or_else(|| {
                QueryError::Internal("set clause value was not encoded".to_string())
            })?;
            after[col.offset..col.offset + col.len].copy_from_slice(raw);
        }

        let txn = self.ctx.map(|ctx| ctx.txn);
        for index_meta in &self.tab.indexes {
            let old_key = index_meta.key_from(&before.data);
            let new_key = index_meta.key_from(&after);
            if old_key == new_key {
                continue;
            }
            let index = self.catalog.index(&index_meta.index_name())?;
            index.delete_entry(&old_key, txn);
            index.insert_entry(&new_key, rid, txn);
        }

        self.heap.update_record(rid, &after, self.ctx)?;
        Ok(())
    }
}

impl Executor for UpdateExecutor<'_> {
    fn begin_tuple(&mut self) -> Result<(), QueryError> {
        Ok(())
    }

    fn next_tuple(&mut self) -> Result<(), QueryError> {
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Record>, QueryError> {
        if self.done {
            return Ok(None);
        }
        let rids = std::mem::take(&mut self.rids);
        for rid in rids {
            self.update_row(rid)?;
        }
        self.done = true;
        Ok(None)
    }

    fn is_end(&self) -> bool {
        self.done
    }

    fn rid(&self) -> Rid {
        Rid::INVALID
    }

    fn cols(&self) -> &[ColMeta] {
        &[]
    }
}
