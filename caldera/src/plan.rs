//! Physical plan nodes. The planner that produces these trees lives
//! outside this crate; the optimizer rewrites them and the executor
//! builder turns them into Volcano iterators.

use strata::record::{Column, ColumnList, ColumnType};
use strata::Oid;

use crate::expr::Expression;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDirection {
    Default,
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlanNode {
    /// Full scan of one table. `columns` is the table's layout with names
    /// qualified as `"alias.column"`.
    SeqScan {
        table_oid: Oid,
        alias: String,
        columns: ColumnList,
    },
    /// A leaf producing literal rows; the source below Insert.
    Values {
        columns: ColumnList,
        rows: Vec<Vec<Expression>>,
    },
    Filter {
        child: Box<PlanNode>,
        predicate: Expression,
    },
    NestedLoopJoin {
        left: Box<PlanNode>,
        right: Box<PlanNode>,
        join_condition: Option<Expression>,
        join_type: JoinType,
    },
    /// Requires both inputs sorted on their join keys.
    MergeJoin {
        left: Box<PlanNode>,
        right: Box<PlanNode>,
        left_key: Expression,
        right_key: Expression,
    },
    OrderBy {
        child: Box<PlanNode>,
        order_bys: Vec<(OrderDirection, Expression)>,
    },
    Limit {
        child: Box<PlanNode>,
        offset: Option<usize>,
        count: Option<usize>,
    },
    Insert {
        child: Box<PlanNode>,
        table_oid: Oid,
        insert_columns: Vec<String>,
    },
    Update {
        child: Box<PlanNode>,
        table_oid: Oid,
        update_exprs: Vec<Expression>,
    },
    Delete {
        child: Box<PlanNode>,
        table_oid: Oid,
    },
}

impl PlanNode {
    /// The qualified column list this node produces.
    pub fn output_columns(&self) -> ColumnList {
        match self {
            PlanNode::SeqScan { columns, .. } | PlanNode::Values { columns, .. } => {
                columns.clone()
            }
            PlanNode::Filter { child, .. }
            | PlanNode::OrderBy { child, .. }
            | PlanNode::Limit { child, .. } => child.output_columns(),
            PlanNode::NestedLoopJoin { left, right, .. }
            | PlanNode::MergeJoin { left, right, .. } => {
                let mut columns = left.output_columns();
                for column in right.output_columns().columns() {
                    columns.push(column.clone());
                }
                columns
            }
            PlanNode::Insert { .. } | PlanNode::Update { .. } | PlanNode::Delete { .. } => {
                ColumnList::new(vec![Column::new("count", ColumnType::Int)])
            }
        }
    }

    /// Qualifies a table's columns under an alias for a scan node.
    pub fn qualify_columns(alias: &str, columns: &ColumnList) -> ColumnList {
        ColumnList::new(
            columns
                .columns()
                .iter()
                .map(|c| Column::new(&format!("{}.{}", alias, c.name), c.column_type))
                .collect(),
        )
    }
}
