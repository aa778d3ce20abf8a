#![allow(dead_code)]

use quartz::Database;
use quartz::catalog::{ColType, ColumnDef};
use quartz::common::{Condition, Value};
use quartz::executor::{Executor, InsertExecutor, SeqScanExecutor};
use strata::Rid;
use strata::transaction::Context;
use tempfile::TempDir;

pub fn open_db() -> (TempDir, Database) {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(dir.path()).unwrap();
    (dir, db)
}

pub fn int_col(name: &str) -> ColumnDef {
    ColumnDef {
        name: name.to_string(),
        col_type: ColType::Int,
        len: 4,
    }
}

pub fn float_col(name: &str) -> ColumnDef {
    ColumnDef {
        name: name.to_string(),
        col_type: ColType::Float,
        len: 4,
    }
}

pub fn str_col(name: &str, len: usize) -> ColumnDef {
    ColumnDef {
        name: name.to_string(),
        col_type: ColType::Str,
        len,
    }
}

/// Runs an insert executor to completion and returns the rid the row
/// landed at.
pub fn insert_row(
    db: &Database,
    table: &str,
    values: Vec<Value>,
    ctx: Option<&Context>,
) -> Rid {
    let mut exec = InsertExecutor::new(db.catalog(), table, values, ctx).unwrap();
    exec.next().unwrap();
    exec.rid()
}

/// Drives a sequential scan to the end, collecting `(rid, record bytes)`.
pub fn scan_all(
    db: &Database,
    table: &str,
    conds: Vec<Condition>,
    ctx: Option<&Context>,
) -> Vec<(Rid, Vec<u8>)> {
    let mut exec = SeqScanExecutor::new(db.catalog(), table, conds, ctx).unwrap();
    exec.begin_tuple().unwrap();
    let mut rows = Vec::new();
    while !exec.is_end() {
        let rid = exec.rid();
        let record = exec.next().unwrap().expect("scan not at end");
        rows.push((rid, record.data));
    }
    rows
}

pub fn int_at(record: &[u8], offset: usize) -> i32 {
    i32::from_le_bytes(record[offset..offset + 4].try_into().unwrap())
}

pub fn float_at(record: &[u8], offset: usize) -> f32 {
    f32::from_le_bytes(record[offset..offset + 4].try_into().unwrap())
}
