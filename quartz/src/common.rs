//! Values, conditions, and set clauses shared by the analyzer and executors.

use serde::{Deserialize, Serialize};

use crate::ast::Literal;
use crate::catalog::ColType;
use crate::errors::QueryError;

/// The payload of a constant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Datum {
    Int(i32),
    Float(f32),
    Str(String),
}

/// A constant plus, once `init_raw` has run, its on-disk encoding at the
/// width of the column it is compared against or stored into.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Value {
    pub datum: Datum,
    raw: Option<Vec<u8>>,
}

impl Value {
    pub fn int(v: i32) -> Self {
        Self {
            datum: Datum::Int(v),
            raw: None,
        }
    }

    pub fn float(v: f32) -> Self {
        Self {
            datum: Datum::Float(v),
            raw: None,
        }
    }

    pub fn string<S: Into<String>>(s: S) -> Self {
        Self {
            datum: Datum::Str(s.into()),
            raw: None,
        }
    }

    pub fn from_literal(lit: &Literal) -> Self {
        match lit {
            Literal::Int(v) => Value::int(*v),
            Literal::Float(v) => Value::float(*v),
            Literal::Str(s) => Value::string(s.clone()),
        }
    }

    pub fn col_type(&self) -> ColType {
        match self.datum {
            Datum::Int(_) => ColType::Int,
            Datum::Float(_) => ColType::Float,
            Datum::Str(_) => ColType::Str,
        }
    }

    /// Converts the datum to the target column type. `Int` widens to
    /// `Float`; `Float` truncates toward zero to `Int`; any other mismatch
    /// is an error.
    pub fn coerce_to(&mut self, target: ColType) -> Result<(), QueryError> {
        match (target, &self.datum) {
            (ColType::Float, Datum::Int(v)) => {
                self.datum = Datum::Float(*v as f32);
            }
            (ColType::Int, Datum::Float(v)) => {
                self.datum = Datum::Int(*v as i32);
            }
            _ => {
                if self.col_type() != target {
                    return Err(QueryError::IncompatibleType {
                        expected: target.to_string(),
                        got: self.col_type().to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Populates the raw buffer with the datum's on-disk encoding at width
    /// `len`: numerics as 4-byte little-endian, strings NUL-padded on the
    /// right. Overlong strings are rejected.
    pub fn init_raw(&mut self, len: usize) -> Result<(), QueryError> {
        let raw = match &self.datum {
            Datum::Int(v) => {
                if len != 4 {
                    return Err(QueryError::Internal(format!(
                        "INT encoded at width {len}"
                    )));
                }
                v.to_le_bytes().to_vec()
            }
            Datum::Float(v) => {
                if len != 4 {
                    return Err(QueryError::Internal(format!(
                        "FLOAT encoded at width {len}"
                    )));
                }
                v.to_le_bytes().to_vec()
            }
            Datum::Str(s) => {
                if s.len() > len {
                    return Err(QueryError::StringOverflow {
                        len: s.len(),
                        max: len,
                    });
                }
                let mut bytes = s.clone().into_bytes();
                bytes.resize(len, 0);
                bytes
            }
        };
        self.raw = Some(raw);
        Ok(())
    }

    pub fn raw(&self) -> Option<&[u8]> {
        self.raw.as_deref()
    }
}

/// Comparison operators of a binary predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

/// A fully-qualified column reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TabCol {
    pub tab_name: String,
    pub col_name: String,
}

/// The right-hand side of a rewritten condition: a pre-encoded constant or
/// a resolved column.
#[derive(Debug, Clone, PartialEq)]
pub enum CondRhs {
    Val(Value),
    Col(TabCol),
}

/// A rewritten, type-checked binary predicate.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub lhs_col: TabCol,
    pub op: CompOp,
    pub rhs: CondRhs,
}

/// A rewritten `SET col = value` clause. The value is already coerced to
/// the column type and raw-encoded at the column width.
#[derive(Debug, Clone, PartialEq)]
pub struct SetClause {
    pub lhs: TabCol,
    pub rhs: Value,
}
