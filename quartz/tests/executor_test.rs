mod common;

use common::*;
use quartz::analyze::Analyzer;
use quartz::ast::{BinaryExpr, ColRef, Literal, Operand, SelectStmt, SetExpr, Statement, UpdateStmt};
use quartz::common::{CompOp, Value};
use quartz::errors::QueryError;
use quartz::executor::{DeleteExecutor, Executor, InsertExecutor, UpdateExecutor};

#[test]
fn scan_returns_every_row_without_conditions() {
    let (_dir, db) = open_db();
    db.catalog()
        .create_table("t", &[int_col("k"), int_col("v")])
        .unwrap();
    for k in 0..5 {
        insert_row(&db, "t", vec![Value::int(k), Value::int(k * 10)], None);
    }

    let rows = scan_all(&db, "t", vec![], None);
    assert_eq!(rows.len(), 5);
    let keys: Vec<i32> = rows.iter().map(|(_, data)| int_at(data, 0)).collect();
    assert_eq!(keys, vec![0, 1, 2, 3, 4]);
}

#[test]
fn float_predicate_filters_with_coerced_literal() {
    let (_dir, db) = open_db();
    db.catalog().create_table("t", &[float_col("p")]).unwrap();
    insert_row(&db, "t", vec![Value::float(2.5)], None);
    insert_row(&db, "t", vec![Value::float(3.5)], None);
    // An INT literal through the insert path widens to 4.0.
    insert_row(&db, "t", vec![Value::int(4)], None);

    let stmt = Statement::Select(SelectStmt {
        tables: vec!["t".to_string()],
        cols: vec![],
        conds: vec![BinaryExpr {
            lhs: ColRef::unqualified("p"),
            op: CompOp::Gt,
            rhs: Operand::Lit(Literal::Int(3)),
        }],
    });
    let query = Analyzer::new(db.catalog()).analyze(stmt).unwrap();

    let rows = scan_all(&db, "t", query.conds, None);
    let mut values: Vec<f32> = rows.iter().map(|(_, data)| float_at(data, 0)).collect();
    values.sort_by(f32::total_cmp);
    assert_eq!(values, vec![3.5, 4.0]);
}

#[test]
fn column_to_column_predicate_compares_within_the_row() {
    let (_dir, db) = open_db();
    db.catalog()
        .create_table("t", &[int_col("a"), int_col("b")])
        .unwrap();
    insert_row(&db, "t", vec![Value::int(1), Value::int(1)], None);
    insert_row(&db, "t", vec![Value::int(1), Value::int(2)], None);
    insert_row(&db, "t", vec![Value::int(3), Value::int(3)], None);

    let stmt = Statement::Select(SelectStmt {
        tables: vec!["t".to_string()],
        cols: vec![],
        conds: vec![BinaryExpr {
            lhs: ColRef::unqualified("a"),
            op: CompOp::Eq,
            rhs: Operand::Col(ColRef::unqualified("b")),
        }],
    });
    let query = Analyzer::new(db.catalog()).analyze(stmt).unwrap();

    let rows = scan_all(&db, "t", query.conds, None);
    let keys: Vec<i32> = rows.iter().map(|(_, data)| int_at(data, 0)).collect();
    assert_eq!(keys, vec![1, 3]);
}

#[test]
fn string_predicate_compares_padded_bytes() {
    let (_dir, db) = open_db();
    db.catalog()
        .create_table("s", &[str_col("name", 4), int_col("n")])
        .unwrap();
    insert_row(&db, "s", vec![Value::string("ab"), Value::int(1)], None);
    insert_row(&db, "s", vec![Value::string("cd"), Value::int(2)], None);

    let stmt = Statement::Select(SelectStmt {
        tables: vec!["s".to_string()],
        cols: vec![],
        conds: vec![BinaryExpr {
            lhs: ColRef::unqualified("name"),
            op: CompOp::Eq,
            rhs: Operand::Lit(Literal::Str("ab".to_string())),
        }],
    });
    let query = Analyzer::new(db.catalog()).analyze(stmt).unwrap();

    let rows = scan_all(&db, "s", query.conds, None);
    assert_eq!(rows.len(), 1);
    assert_eq!(int_at(&rows[0].1, 4), 1);
}

#[test]
fn update_maintains_the_index() {
    let (_dir, db) = open_db();
    db.catalog()
        .create_table("t", &[int_col("k"), int_col("v")])
        .unwrap();
    db.catalog()
        .create_index("t", &["k".to_string()])
        .unwrap();
    let rid = insert_row(&db, "t", vec![Value::int(1), Value::int(10)], None);

    let index = db.catalog().index("t_k").unwrap();
    assert_eq!(index.get(&1i32.to_le_bytes()), Some(rid));

    // UPDATE t SET k = 2 WHERE k = 1
    let stmt = Statement::Update(UpdateStmt {
        table: "t".to_string(),
        set_clauses: vec![SetExpr {
            col_name: "k".to_string(),
            value: Literal::Int(2),
        }],
        conds: vec![BinaryExpr {
            lhs: ColRef::unqualified("k"),
            op: CompOp::Eq,
            rhs: Operand::Lit(Literal::Int(1)),
        }],
    });
    let query = Analyzer::new(db.catalog()).analyze(stmt).unwrap();
    let rids: Vec<_> = scan_all(&db, "t", query.conds.clone(), None)
        .into_iter()
        .map(|(rid, _)| rid)
        .collect();
    assert_eq!(rids, vec![rid]);

    let mut exec =
        UpdateExecutor::new(db.catalog(), "t", query.set_clauses, rids, None).unwrap();
    exec.next().unwrap();
    assert!(exec.is_end());

    assert_eq!(index.get(&1i32.to_le_bytes()), None);
    assert_eq!(index.get(&2i32.to_le_bytes()), Some(rid));
    let record = db.catalog().heap("t").unwrap().get_record(rid, None).unwrap();
    assert_eq!(int_at(&record.data, 0), 2);
    assert_eq!(int_at(&record.data, 4), 10);
}

#[test]
fn update_leaves_unchanged_index_keys_alone() {
    let (_dir, db) = open_db();
    db.catalog()
        .create_table("t", &[int_col("k"), int_col("v")])
        .unwrap();
    db.catalog()
        .create_index("t", &["k".to_string()])
        .unwrap();
    let rid = insert_row(&db, "t", vec![Value::int(1), Value::int(10)], None);

    let stmt = Statement::Update(UpdateStmt {
        table: "t".to_string(),
        set_clauses: vec![SetExpr {
            col_name: "v".to_string(),
            value: Literal::Int(20),
        }],
        conds: vec![],
    });
    let query = Analyzer::new(db.catalog()).analyze(stmt).unwrap();
    let mut exec =
        UpdateExecutor::new(db.catalog(), "t", query.set_clauses, vec![rid], None).unwrap();
    exec.next().unwrap();

    let index = db.catalog().index("t_k").unwrap();
    assert_eq!(index.get(&1i32.to_le_bytes()), Some(rid));
    let record = db.catalog().heap("t").unwrap().get_record(rid, None).unwrap();
    assert_eq!(int_at(&record.data, 4), 20);
}

#[test]
fn insert_executor_aligns_values_to_the_schema() {
    let (_dir, db) = open_db();
    db.catalog()
        .create_table("t", &[int_col("k"), float_col("p")])
        .unwrap();
    // INT -> FLOAT widens, FLOAT -> INT truncates toward zero.
    let rid = insert_row(&db, "t", vec![Value::float(7.9), Value::int(2)], None);

    let record = db.catalog().heap("t").unwrap().get_record(rid, None).unwrap();
    assert_eq!(int_at(&record.data, 0), 7);
    assert_eq!(float_at(&record.data, 4), 2.0);
}

#[test]
fn insert_executor_rejects_wrong_arity() {
    let (_dir, db) = open_db();
    db.catalog()
        .create_table("t", &[int_col("k"), int_col("v")])
        .unwrap();

    let err = InsertExecutor::new(db.catalog(), "t", vec![Value::int(1)], None).unwrap_err();
    assert!(matches!(err, QueryError::InvalidValueCount { table } if table == "t"));
}

#[test]
fn insert_executor_rejects_incompatible_value() {
    let (_dir, db) = open_db();
    db.catalog().create_table("t", &[int_col("k")]).unwrap();

    let mut exec =
        InsertExecutor::new(db.catalog(), "t", vec![Value::string("x")], None).unwrap();
    let err = exec.next().unwrap_err();
    assert!(matches!(err, QueryError::IncompatibleType { .. }));
}

#[test]
fn delete_executor_removes_record_and_index_entries() {
    let (_dir, db) = open_db();
    db.catalog()
        .create_table("t", &[int_col("k"), int_col("v")])
        .unwrap();
    db.catalog()
        .create_index("t", &["k".to_string()])
        .unwrap();
    let r1 = insert_row(&db, "t", vec![Value::int(1), Value::int(10)], None);
    let r2 = insert_row(&db, "t", vec![Value::int(2), Value::int(20)], None);

    let mut exec = DeleteExecutor::new(db.catalog(), "t", vec![r1], None).unwrap();
    exec.next().unwrap();

    let index = db.catalog().index("t_k").unwrap();
    assert_eq!(index.get(&1i32.to_le_bytes()), None);
    assert_eq!(index.get(&2i32.to_le_bytes()), Some(r2));
    let rows = scan_all(&db, "t", vec![], None);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].0, r2);
}

#[test]
fn scan_iterator_protocol_yields_then_ends() {
    let (_dir, db) = open_db();
    db.catalog().create_table("t", &[int_col("k")]).unwrap();
    let rid = insert_row(&db, "t", vec![Value::int(1)], None);

    let mut exec =
        quartz::executor::SeqScanExecutor::new(db.catalog(), "t", vec![], None).unwrap();
    exec.begin_tuple().unwrap();
    assert!(!exec.is_end());
    assert_eq!(exec.rid(), rid);
    assert!(exec.next().unwrap().is_some());
    assert!(exec.is_end());
    assert!(exec.next().unwrap().is_none());
}
