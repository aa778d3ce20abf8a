use std::sync::Arc;

use super::{Executor, eval_conds};
use crate::catalog::{Catalog, ColMeta};
use crate::common::Condition;
use crate::errors::QueryError;
use strata::Rid;
use strata::heap::{HeapFile, HeapScan, Record};
use strata::transaction::Context;

/// Sequential scan over one table with a conjunction of residual
/// predicates. Under a transaction, every record it reads is shared-locked.
pub struct SeqScanExecutor<'a> {
    heap: Arc<HeapFile>,
    cols: Vec<ColMeta>,
    conds: Vec<Condition>,
    ctx: Option<&'a Context<'a>>,
    scan: Option<HeapScan>,
    rid: Rid,
}

impl<'a> SeqScanExecutor<'a> {
    pub fn new(
        catalog: &Catalog,
        tab_name: &str,
        conds: Vec<Condition>,
        ctx: Option<&'a Context<'a>>,
    ) -> Result<Self, QueryError> {
        let tab = catalog.table(tab_name)?;
        let heap = catalog.heap(tab_name)?;
        Ok(Self {
            heap,
            cols: tab.cols,
            conds,
            ctx,
            scan: None,
            rid: Rid::INVALID,
        })
    }

    /// Leaves the cursor on the first row at or after the scan position that
    /// satisfies every condition, or at end.
    fn settle(&mut self) -> Result<(), QueryError> {
        loop {
            let (at_end, rid) = match &self.scan {
                Some(scan) => (scan.is_end(), scan.rid()),
                None => return Ok(()),
            };
            if at_end {
                self.rid = rid;
                return Ok(());
            }
            let record = self.heap.get_record(rid, self.ctx)?;
            if eval_conds(&self.cols, &self.conds, &record.data)? {
                self.rid = rid;
                return Ok(());
            }
            self.scan.as_mut().unwrap().next()?;
        }
    }
}

impl Executor for SeqScanExecutor<'_> {
    fn begin_tuple(&mut self) -> Result<(), QueryError> {
        self.scan = Some(HeapScan::new(self.heap.clone())?);
        self.settle()
    }

    fn next_tuple(&mut self) -> Result<(), QueryError> {
        if let Some(scan) = self.scan.as_mut() {
            if !scan.is_end() {
                scan.next()?;
            }
        }
        self.settle()
    }

    fn next(&mut self) -> Result<Option<Record>, QueryError> {
        if self.is_end() {
            return Ok(None);
        }
        let record = self.heap.get_record(self.rid, self.ctx)?;
        self.next_tuple()?;
        Ok(Some(record))
    }

    fn is_end(&self) -> bool {
        self.scan.as_ref().is_none_or(|scan| scan.is_end())
    }

    fn rid(&self) -> Rid {
        self.rid
    }

    fn cols(&self) -> &[ColMeta] {
        &self.cols
    }
}
