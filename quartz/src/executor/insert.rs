use std::sync::Arc;

use super::Executor;
use crate::catalog::{Catalog, ColMeta, TabMeta};
use crate::common::Value;
use crate::errors::QueryError;
use strata::Rid;
use strata::heap::{HeapFile, Record};
use strata::transaction::Context;

/// Inserts one row: aligns the value list to the schema, coercing each
/// literal to its column's type, then writes the record and every index
/// entry.
#[derive(Debug)]
pub struct InsertExecutor<'a> {
    catalog: &'a Catalog,
    tab: TabMeta,
    heap: Arc<HeapFile>,
    values: Vec<Value>,
    ctx: Option<&'a Context<'a>>,
    rid: Rid,
    done: bool,
}

impl<'a> InsertExecutor<'a> {
    pub fn new(
        catalog: &'a Catalog,
        tab_name: &str,
        values: Vec<Value>,
        ctx: Option<&'a Context<'a>>,
    ) -> Result<Self, QueryError> {
        let tab = catalog.table(tab_name)?;
        if values.len() != tab.cols.len() {
            return Err(QueryError::InvalidValueCount {
                table: tab_name.to_string(),
            });
        }
        let heap = catalog.heap(tab_name)?;
        Ok(Self {
            catalog,
            tab,
            heap,
            values,
            ctx,
            rid: Rid::INVALID,
            done: false,
        })
    }
}

impl Executor for InsertExecutor<'_> {
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

        let mut buf = vec![0u8; self.tab.record_size()];
        let mut values = std::mem::take(&mut self.values);
        for (col, value) in self.tab.cols.iter().zip(values.iter_mut()) {
            value.coerce_to(col.col_type)?;
            value.init_raw(col.len)?;
            let raw = value.raw().ok_or_else(|| {
                QueryError::Internal("insert value was not encoded".to_string())
            })?;
            buf[col.offset..col.offset + col.len].copy_from_slice(raw);
        }

        let rid = self.heap.insert_record(&buf, self.ctx)?;

        let txn = self.ctx.map(|ctx| ctx.txn);
        for index_meta in &self.tab.indexes {
            let index = self.catalog.index(&index_meta.index_name())?;
            index.insert_entry(&index_meta.key_from(&buf), rid, txn);
        }

        self.rid = rid;
        self.done = true;
        Ok(None)
    }

    fn is_end(&self) -> bool {
        self.done
    }

    /// The rid the row landed at, once the insert has run.
    fn rid(&self) -> Rid {
        self.rid
    }

    fn cols(&self) -> &[ColMeta] {
        &[]
    }
}
