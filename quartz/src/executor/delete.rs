use std::sync::Arc;

use super::Executor;
use crate::catalog::{Catalog, ColMeta, TabMeta};
use crate::errors::QueryError;
use strata::Rid;
use strata::heap::{HeapFile, Record};
use strata::transaction::Context;

/// Deletes a materialized rid list, removing each row's index entries
/// before the record itself.
pub struct DeleteExecutor<'a> {
    catalog: &'a Catalog,
    tab: TabMeta,
    heap: Arc<HeapFile>,
    rids: Vec<Rid>,
    ctx: Option<&'a Context<'a>>,
    done: bool,
}

impl<'a> DeleteExecutor<'a> {
    pub fn new(
        catalog: &'a Catalog,
        tab_name: &str,
        rids: Vec<Rid>,
        ctx: Option<&'a Context<'a>>,
    ) -> Result<Self, QueryError> {
        let tab = catalog.table(tab_name)?;
        let heap = catalog.heap(tab_name)?;
        Ok(Self {
            catalog,
            tab,
            heap,
            rids,
            ctx,
            done: false,
        })
    }
}

impl Executor for DeleteExecutor<'_> {
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

        let txn = self.ctx.map(|ctx| ctx.txn);
        let rids = std::mem::take(&mut self.rids);
        for rid in rids {
            let record = self.heap.get_record(rid, self.ctx)?;
            for index_meta in &self.tab.indexes {
                let index = self.catalog.index(&index_meta.index_name())?;
                index.delete_entry(&index_meta.key_from(&record.data), txn);
            }
            self.heap.delete_record(rid, self.ctx)?;
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
