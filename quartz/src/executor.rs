//! The iterator-model execution layer.
//!
//! Every executor speaks the same protocol: `begin_tuple` positions the
//! cursor on the first qualifying row, `next_tuple` advances to the next
//! one, `next` hands out the current record and advances, and `is_end`
//! reports exhaustion. Batch executors (insert, update, delete) do their
//! work on the first `next` call and then report end.

use crate::catalog::{ColMeta, ColType};
use crate::common::{CompOp, CondRhs, Condition};
use crate::errors::QueryError;
use strata::Rid;
use strata::heap::Record;

mod delete;
mod insert;
mod seq_scan;
mod update;

pub use delete::DeleteExecutor;
pub use insert::InsertExecutor;
pub use seq_scan::SeqScanExecutor;
pub use update::UpdateExecutor;

pub trait Executor {
    /// Positions the cursor on the first qualifying row.
    fn begin_tuple(&mut self) -> Result<(), QueryError>;

    /// Advances the cursor to the next qualifying row.
    fn next_tuple(&mut self) -> Result<(), QueryError>;

    /// Returns the current record and advances. Yields nothing at end.
    fn next(&mut self) -> Result<Option<Record>, QueryError>;

    fn is_end(&self) -> bool;

    /// The rid of the current row.
    fn rid(&self) -> Rid;

    /// The schema of produced records.
    fn cols(&self) -> &[ColMeta];
}

pub(crate) fn find_col<'a>(cols: &'a [ColMeta], target_tab: &str, target_col: &str) -> Result<&'a ColMeta, QueryError> {
    cols.iter()
        .find(|col| col.tab_name == target_tab && col.name == target_col)
        .ok_or_else(|| QueryError::ColumnNotFound(format!("{target_tab}.{target_col}")))
}

/// Evaluates a conjunction of rewritten predicates against a record image.
/// Raw bytes are interpreted under the left column's type.
pub(crate) fn eval_conds(
    cols: &[ColMeta],
    conds: &[Condition],
    record: &[u8],
) -> Result<bool, QueryError> {
    for cond in conds {
        let lhs_col = find_col(cols, &cond.lhs_col.tab_name, &cond.lhs_col.col_name)?;
        let lhs = &record[lhs_col.offset..lhs_col.offset + lhs_col.len];
        let rhs: &[u8] = match &cond.rhs {
            CondRhs::Val(val) => val
                .raw()
                .ok_or_else(|| QueryError::Internal("condition literal was not encoded".to_string()))?,
            CondRhs::Col(col) => {
                let rhs_col = find_col(cols, &col.tab_name, &col.col_name)?;
                &record[rhs_col.offset..rhs_col.offset + rhs_col.len]
            }
        };
        if !compare(lhs_col.col_type, lhs, rhs, cond.op) {
            return Ok(false);
        }
    }
    Ok(true)
}

fn compare(col_type: ColType, lhs: &[u8], rhs: &[u8], op: CompOp) -> bool {
    match col_type {
        ColType::Int => {
            let l = i32::from_le_bytes(lhs[..4].try_into().unwrap());
            let r = i32::from_le_bytes(rhs[..4].try_into().unwrap());
            apply_ord(l.cmp(&r), op)
        }
        ColType::Float => {
            let l = f32::from_le_bytes(lhs[..4].try_into().unwrap());
            let r = f32::from_le_bytes(rhs[..4].try_into().unwrap());
            match op {
                CompOp::Eq => l == r,
                CompOp::Ne => l != r,
                CompOp::Lt => l < r,
                CompOp::Gt => l > r,
                CompOp::Le => l <= r,
                CompOp::Ge => l >= r,
            }
        }
        // Byte-string comparison over the full declared width; padding NULs
        // participate.
        ColType::Str => apply_ord(lhs.cmp(rhs), op),
    }
}

fn apply_ord(ord: std::cmp::Ordering, op: CompOp) -> bool {
    use std::cmp::Ordering::*;
    match op {
        CompOp::Eq => ord == Equal,
        CompOp::Ne => ord != Equal,
        CompOp::Lt => ord == Less,
        CompOp::Gt => ord == Greater,
        CompOp::Le => ord != Greater,
        CompOp::Ge => ord != Less,
    }
}
