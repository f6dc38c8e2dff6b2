//! Operator expressions: column references, constants, comparisons, and
//! boolean connectives, evaluated over records.
//!
//! Column references carry both an index and a qualified `"alias.column"`
//! name. The index drives evaluation; the name drives the optimizer's
//! pushdown matching and lets a moved predicate be rebound against its new
//! input.

use std::cmp::Ordering;

use strata::record::{ColumnList, Record, Value};

use crate::errors::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicOp {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// A column reference, bound to an index in its operator's input.
    ColumnValue { col_idx: usize, name: String },
    Const(Value),
    Comparison {
        op: ComparisonOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Logic {
        op: LogicOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
}

impl Expression {
    pub fn column(col_idx: usize, name: &str) -> Self {
        Expression::ColumnValue {
            col_idx,
            name: name.to_string(),
        }
    }

    pub fn constant(value: Value) -> Self {
        Expression::Const(value)
    }

    pub fn comparison(op: ComparisonOp, left: Expression, right: Expression) -> Self {
        Expression::Comparison {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn and(left: Expression, right: Expression) -> Self {
        Expression::Logic {
            op: LogicOp::And,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn or(left: Expression, right: Expression) -> Self {
        Expression::Logic {
            op: LogicOp::Or,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// The `alias` part of a `"alias.column"` reference.
    pub fn table_qualifier(&self) -> Option<&str> {
        match self {
            Expression::ColumnValue { name, .. } => name.split('.').next(),
            _ => None,
        }
    }

    pub fn evaluate(&self, record: &Record) -> Result<Value, EngineError> {
        match self {
            Expression::ColumnValue { col_idx, name } => record
                .value(*col_idx)
                .cloned()
                .ok_or_else(|| EngineError::ColumnNotFound(name.clone())),
            Expression::Const(value) => Ok(value.clone()),
            Expression::Comparison { op, left, right } => {
                let left = left.evaluate(record)?;
                let right = right.evaluate(record)?;
                Ok(Value::Bool(compare(*op, &left, &right)))
            }
            Expression::Logic { op, left, right } => {
                let left = truthy(&left.evaluate(record)?);
                let right = truthy(&right.evaluate(record)?);
                Ok(Value::Bool(match op {
                    LogicOp::And => left && right,
                    LogicOp::Or => left || right,
                }))
            }
        }
    }

    /// Evaluation over a joined pair: indices below the left arity read
    /// from the left record, the rest from the right.
    pub fn evaluate_join(&self, left: &Record, right: &Record) -> Result<Value, EngineError> {
        match self {
            Expression::ColumnValue { col_idx, name } => {
                let value = if *col_idx < left.len() {
                    left.value(*col_idx)
                } else {
                    right.value(*col_idx - left.len())
                };
                value
                    .cloned()
                    .ok_or_else(|| EngineError::ColumnNotFound(name.clone()))
            }
            Expression::Const(value) => Ok(value.clone()),
            Expression::Comparison { op, left: l, right: r } => {
                let lv = l.evaluate_join(left, right)?;
                let rv = r.evaluate_join(left, right)?;
                Ok(Value::Bool(compare(*op, &lv, &rv)))
            }
            Expression::Logic { op, left: l, right: r } => {
                let lv = truthy(&l.evaluate_join(left, right)?);
                let rv = truthy(&r.evaluate_join(left, right)?);
                Ok(Value::Bool(match op {
                    LogicOp::And => lv && rv,
                    LogicOp::Or => lv || rv,
                }))
            }
        }
    }

    /// Rebinds every column reference by name against `columns`. Used when
    /// the optimizer moves a predicate to a different operator.
    pub fn rebound(&self, columns: &ColumnList) -> Result<Expression, EngineError> {
        match self {
            Expression::ColumnValue { name, .. } => {
                let col_idx = columns
                    .index_of(name)
                    .ok_or_else(|| EngineError::ColumnNotFound(name.clone()))?;
                Ok(Expression::ColumnValue {
                    col_idx,
                    name: name.clone(),
                })
            }
            Expression::Const(value) => Ok(Expression::Const(value.clone())),
            Expression::Comparison { op, left, right } => Ok(Expression::Comparison {
                op: *op,
                left: Box::new(left.rebound(columns)?),
                right: Box::new(right.rebound(columns)?),
            }),
            Expression::Logic { op, left, right } => Ok(Expression::Logic {
                op: *op,
                left: Box::new(left.rebound(columns)?),
                right: Box::new(right.rebound(columns)?),
            }),
        }
    }
}

fn truthy(value: &Value) -> bool {
    matches!(value, Value::Bool(true))
}

fn compare(op: ComparisonOp, left: &Value, right: &Value) -> bool {
    // Comparisons against NULL never hold.
    if left.is_null() || right.is_null() {
        return false;
    }
    let ordering = left.compare(right);
    match op {
        ComparisonOp::Eq => ordering == Ordering::Equal,
        ComparisonOp::Ne => ordering != Ordering::Equal,
        ComparisonOp::Lt => ordering == Ordering::Less,
        ComparisonOp::Le => ordering != Ordering::Greater,
        ComparisonOp::Gt => ordering == Ordering::Greater,
        ComparisonOp::Ge => ordering != Ordering::Less,
    }
}
