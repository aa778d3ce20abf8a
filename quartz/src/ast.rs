//! The abstract syntax tree the analyzer consumes. Producing it (lexing and
//! parsing) is the front end's business; everything here is plain data.

use crate::catalog::ColumnDef;
use crate::common::CompOp;

/// A parsed SQL statement.
#[derive(Debug, Clone)]
pub enum Statement {
    Select(SelectStmt),
    Insert(InsertStmt),
    Update(UpdateStmt),
    Delete(DeleteStmt),
    CreateTable(CreateTableStmt),
    CreateIndex(CreateIndexStmt),
}

/// A column reference, optionally table-qualified.
#[derive(Debug, Clone)]
pub struct ColRef {
    pub tab_name: Option<String>,
    pub col_name: String,
}

impl ColRef {
    pub fn unqualified<S: Into<String>>(col_name: S) -> Self {
        Self {
            tab_name: None,
            col_name: col_name.into(),
        }
    }

    pub fn qualified<T: Into<String>, S: Into<String>>(tab_name: T, col_name: S) -> Self {
        Self {
            tab_name: Some(tab_name.into()),
            col_name: col_name.into(),
        }
    }
}

/// A literal constant.
#[derive(Debug, Clone)]
pub enum Literal {
    Int(i32),
    Float(f32),
    Str(String),
}

/// The right-hand side of a parsed predicate.
#[derive(Debug, Clone)]
pub enum Operand {
    Lit(Literal),
    Col(ColRef),
}

/// A binary predicate `lhs op rhs` from a WHERE clause.
#[derive(Debug, Clone)]
pub struct BinaryExpr {
    pub lhs: ColRef,
    pub op: CompOp,
    pub rhs: Operand,
}

#[derive(Debug, Clone)]
pub struct SelectStmt {
    pub tables: Vec<String>,
    /// Empty means `SELECT *`.
    pub cols: Vec<ColRef>,
    pub conds: Vec<BinaryExpr>,
}

#[derive(Debug, Clone)]
pub struct InsertStmt {
    pub table: String,
    pub values: Vec<Literal>,
}

/// One `SET col = value` clause.
#[derive(Debug, Clone)]
pub struct SetExpr {
    pub col_name: String,
    pub value: Literal,
}

#[derive(Debug, Clone)]
pub struct UpdateStmt {
    pub table: String,
    pub set_clauses: Vec<SetExpr>,
    pub conds: Vec<BinaryExpr>,
}

#[derive(Debug, Clone)]
pub struct DeleteStmt {
    pub table: String,
    pub conds: Vec<BinaryExpr>,
}

#[derive(Debug, Clone)]
pub struct CreateTableStmt {
    pub table: String,
    pub columns: Vec<ColumnDef>,
}

#[derive(Debug, Clone)]
pub struct CreateIndexStmt {
    pub table: String,
    pub columns: Vec<String>,
}
