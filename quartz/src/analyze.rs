//! Semantic analysis: rewrites a parse tree into a validated `Query` with
//! resolved column references, type-coerced constants, and raw-encoded
//! literals.

use crate::ast::{BinaryExpr, ColRef, Operand, Statement};
use crate::catalog::{Catalog, ColMeta, ColType};
use crate::common::{CondRhs, Condition, SetClause, TabCol, Value};
use crate::errors::QueryError;

/// The analyzer's output: the statement it came from plus everything the
/// planner and executors need in resolved form.
#[derive(Debug, Clone)]
pub struct Query {
    pub stmt: Statement,
    pub tables: Vec<String>,
    pub cols: Vec<TabCol>,
    pub conds: Vec<Condition>,
    pub set_clauses: Vec<SetClause>,
    pub values: Vec<Value>,
}

pub struct Analyzer<'a> {
    catalog: &'a Catalog,
}

impl<'a> Analyzer<'a> {
    pub fn new(catalog: &'a Catalog) -> Self {
        Self { catalog }
    }

    pub fn analyze(&self, stmt: Statement) -> Result<Query, QueryError> {
        let mut query = Query {
            stmt,
            tables: Vec::new(),
            cols: Vec::new(),
            conds: Vec::new(),
            set_clauses: Vec::new(),
            values: Vec::new(),
        };

        match &query.stmt {
            Statement::Select(x) => {
                for tab_name in &x.tables {
                    if !self.catalog.is_table(tab_name) {
                        return Err(QueryError::TableNotFound(tab_name.clone()));
                    }
                }
                query.tables = x.tables.clone();

                let all_cols = self.all_cols(&query.tables)?;
                if x.cols.is_empty() {
                    // SELECT *: every column of every referenced table, in
                    // declaration order.
                    query.cols = all_cols
                        .iter()
                        .map(|col| TabCol {
                            tab_name: col.tab_name.clone(),
                            col_name: col.name.clone(),
                        })
                        .collect();
                } else {
                    for col in &x.cols {
                        query.cols.push(Self::check_column(&all_cols, col)?);
                    }
                }

                query.conds = self.rewrite_conds(&query.tables, &x.conds)?;
            }
            Statement::Update(x) => {
                if !self.catalog.is_table(&x.table) {
                    return Err(QueryError::TableNotFound(x.table.clone()));
                }
                query.tables = vec![x.table.clone()];
                query.conds = self.rewrite_conds(&query.tables, &x.conds)?;

                let all_cols = self.all_cols(&query.tables)?;
                for set in &x.set_clauses {
                    let lhs = Self::check_column(
                        &all_cols,
                        &ColRef::unqualified(set.col_name.clone()),
                    )?;
                    let col = Self::find_col(&all_cols, &lhs)?;
                    let mut rhs = Value::from_literal(&set.value);
                    rhs.coerce_to(col.col_type)?;
                    rhs.init_raw(col.len)?;
                    query.set_clauses.push(SetClause { lhs, rhs });
                }
            }
            Statement::Delete(x) => {
                if !self.catalog.is_table(&x.table) {
                    return Err(QueryError::TableNotFound(x.table.clone()));
                }
                query.tables = vec![x.table.clone()];
                query.conds = self.rewrite_conds(&query.tables, &x.conds)?;
            }
            Statement::Insert(x) => {
                // Literals become values as-is; the executor aligns them to
                // the schema column by column.
                query.tables = vec![x.table.clone()];
                query.values = x.values.iter().map(Value::from_literal).collect();
            }
            Statement::CreateTable(_) | Statement::CreateIndex(_) => {
                // DDL passes through; the catalog validates on execution.
            }
        }

        Ok(query)
    }

    fn all_cols(&self, tables: &[String]) -> Result<Vec<ColMeta>, QueryError> {
        let mut all_cols = Vec::new();
        for tab_name in tables {
            all_cols.extend(self.catalog.table(tab_name)?.cols);
        }
        Ok(all_cols)
    }

    /// Resolves a possibly-unqualified column reference against the
    /// candidate columns. An unqualified name must match exactly one
    /// candidate; a qualified name must actually exist.
    fn check_column(all_cols: &[ColMeta], target: &ColRef) -> Result<TabCol, QueryError> {
        match &target.tab_name {
            None => {
                let mut tab_name: Option<&str> = None;
                for col in all_cols {
                    if col.name == target.col_name {
                        if tab_name.is_some() {
                            return Err(QueryError::AmbiguousColumn(target.col_name.clone()));
                        }
                        tab_name = Some(&col.tab_name);
                    }
                }
                match tab_name {
                    Some(tab_name) => Ok(TabCol {
                        tab_name: tab_name.to_string(),
                        col_name: target.col_name.clone(),
                    }),
                    None => Err(QueryError::ColumnNotFound(target.col_name.clone())),
                }
            }
            Some(tab_name) => {
                let exists = all_cols
                    .iter()
                    .any(|col| &col.tab_name == tab_name && col.name == target.col_name);
                if !exists {
                    return Err(QueryError::ColumnNotFound(format!(
                        "{tab_name}.{}",
                        target.col_name
                    )));
                }
                Ok(TabCol {
                    tab_name: tab_name.clone(),
                    col_name: target.col_name.clone(),
                })
            }
        }
    }

    fn find_col<'c>(all_cols: &'c [ColMeta], target: &TabCol) -> Result<&'c ColMeta, QueryError> {
        all_cols
            .iter()
            .find(|col| col.tab_name == target.tab_name && col.name == target.col_name)
            .ok_or_else(|| {
                QueryError::ColumnNotFound(format!("{}.{}", target.tab_name, target.col_name))
            })
    }

    /// Rewrites WHERE predicates: resolves both sides, coerces a literal
    /// right-hand side to the column's type, checks type compatibility, and
    /// pre-encodes the literal at the left column's width.
    fn rewrite_conds(
        &self,
        tables: &[String],
        exprs: &[BinaryExpr],
    ) -> Result<Vec<Condition>, QueryError> {
        let all_cols = self.all_cols(tables)?;
        let mut conds = Vec::with_capacity(exprs.len());
        for expr in exprs {
            let lhs_col = Self::check_column(&all_cols, &expr.lhs)?;
            let lhs_meta = Self::find_col(&all_cols, &lhs_col)?;

            let (mut rhs, rhs_type) = match &expr.rhs {
                Operand::Lit(lit) => {
                    let mut val = Value::from_literal(lit);
                    // Comparisons allow INT/FLOAT mixing: the literal takes
                    // the column's type.
                    match (lhs_meta.col_type, val.col_type()) {
                        (ColType::Float, ColType::Int) | (ColType::Int, ColType::Float) => {
                            val.coerce_to(lhs_meta.col_type)?;
                        }
                        _ => {}
                    }
                    let rhs_type = val.col_type();
                    (CondRhs::Val(val), rhs_type)
                }
                Operand::Col(col) => {
                    let rhs_col = Self::check_column(&all_cols, col)?;
                    let rhs_meta = Self::find_col(&all_cols, &rhs_col)?;
                    (CondRhs::Col(rhs_col), rhs_meta.col_type)
                }
            };

            let lhs_type = lhs_meta.col_type;
            let numeric_mix = matches!(
                (lhs_type, rhs_type),
                (ColType::Int, ColType::Float) | (ColType::Float, ColType::Int)
            );
            if lhs_type != rhs_type && !numeric_mix {
                return Err(QueryError::IncompatibleType {
                    expected: lhs_type.to_string(),
                    got: rhs_type.to_string(),
                });
            }

            if let CondRhs::Val(val) = &mut rhs {
                val.init_raw(lhs_meta.len)?;
            }

            conds.push(Condition {
                lhs_col,
                op: expr.op,
                rhs,
            });
        }
        Ok(conds)
    }
}
