//! The rule-based optimizer: predicate splitting, predicate pushdown, and
//! join reordering, run in that order over an owned plan tree.
//!
//! Pushdown state travels in an explicit `RewriteContext` so the passes
//! stay re-entrant; nothing accumulates on the `Optimizer` itself.

use std::collections::HashSet;

use strata::catalog::Catalog;
use strata::record::ColumnList;
use strata::Oid;

use crate::expr::{Expression, LogicOp};
use crate::plan::{JoinType, PlanNode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JoinOrderAlgorithm {
    #[default]
    None,
    /// Declared but not implemented; treated as no reordering.
    Dp,
    Greedy,
}

pub struct Optimizer<'a> {
    catalog: &'a dyn Catalog,
    join_order_algorithm: JoinOrderAlgorithm,
}

/// Pushdown bookkeeping: each registered predicate carries a placed flag
/// set once a lower node adopts it.
#[derive(Default)]
struct RewriteContext {
    join_conditions: Vec<(Expression, bool)>,
    filter_conditions: Vec<(Expression, bool)>,
}

enum Registered {
    Join(usize),
    Simple(usize),
}

impl<'a> Optimizer<'a> {
    pub fn new(catalog: &'a dyn Catalog, join_order_algorithm: JoinOrderAlgorithm) -> Self {
        Self {
            catalog,
            join_order_algorithm,
        }
    }

    pub fn optimize(&self, plan: PlanNode) -> PlanNode {
        let plan = split_predicates(plan);
        let mut context = RewriteContext::default();
        let plan = push_down(plan, &mut context);
        self.reorder_join(plan)
    }

    fn reorder_join(&self, plan: PlanNode) -> PlanNode {
        match self.join_order_algorithm {
            JoinOrderAlgorithm::None | JoinOrderAlgorithm::Dp => plan,
            JoinOrderAlgorithm::Greedy => greedy_rotate(plan, self.catalog),
        }
    }
}

/// Replaces every Filter whose predicate is a conjunction with two stacked
/// Filters, left operand below, right operand above. Applied to fixpoint.
fn split_predicates(plan: PlanNode) -> PlanNode {
    match plan {
        PlanNode::Filter { child, predicate } => match predicate {
            Expression::Logic {
                op: LogicOp::And,
                left,
                right,
            } => {
                let lower = PlanNode::Filter {
                    child,
                    predicate: *left,
                };
                split_predicates(PlanNode::Filter {
                    child: Box::new(lower),
                    predicate: *right,
                })
            }
            predicate => PlanNode::Filter {
                child: Box::new(split_predicates(*child)),
                predicate,
            },
        },
        PlanNode::NestedLoopJoin {
            left,
            right,
            join_condition,
            join_type,
        } => PlanNode::NestedLoopJoin {
            left: Box::new(split_predicates(*left)),
            right: Box::new(split_predicates(*right)),
            join_condition,
            join_type,
        },
        PlanNode::MergeJoin {
            left,
            right,
            left_key,
            right_key,
        } => PlanNode::MergeJoin {
            left: Box::new(split_predicates(*left)),
            right: Box::new(split_predicates(*right)),
            left_key,
            right_key,
        },
        PlanNode::OrderBy { child, order_bys } => PlanNode::OrderBy {
            child: Box::new(split_predicates(*child)),
            order_bys,
        },
        PlanNode::Limit {
            child,
            offset,
            count,
        } => PlanNode::Limit {
            child: Box::new(split_predicates(*child)),
            offset,
            count,
        },
        PlanNode::Insert {
            child,
            table_oid,
            insert_columns,
        } => PlanNode::Insert {
            child: Box::new(split_predicates(*child)),
            table_oid,
            insert_columns,
        },
        PlanNode::Update {
            child,
            table_oid,
            update_exprs,
        } => PlanNode::Update {
            child: Box::new(split_predicates(*child)),
            table_oid,
            update_exprs,
        },
        PlanNode::Delete { child, table_oid } => PlanNode::Delete {
            child: Box::new(split_predicates(*child)),
            table_oid,
        },
        leaf @ (PlanNode::SeqScan { .. } | PlanNode::Values { .. }) => leaf,
    }
}

fn push_down(plan: PlanNode, context: &mut RewriteContext) -> PlanNode {
    match plan {
        PlanNode::Filter { child, predicate } => push_down_filter(*child, predicate, context),
        PlanNode::NestedLoopJoin {
            left,
            right,
            join_condition,
            join_type,
        } => push_down_join(*left, *right, join_condition, join_type, context),
        PlanNode::SeqScan {
            table_oid,
            alias,
            columns,
        } => push_down_seq_scan(table_oid, alias, columns, context),
        PlanNode::MergeJoin {
            left,
            right,
            left_key,
            right_key,
        } => PlanNode::MergeJoin {
            left: Box::new(push_down(*left, context)),
            right: Box::new(push_down(*right, context)),
            left_key,
            right_key,
        },
        PlanNode::OrderBy { child, order_bys } => PlanNode::OrderBy {
            child: Box::new(push_down(*child, context)),
            order_bys,
        },
        PlanNode::Limit {
            child,
            offset,
            count,
        } => PlanNode::Limit {
            child: Box::new(push_down(*child, context)),
            offset,
            count,
        },
        PlanNode::Insert {
            child,
            table_oid,
            insert_columns,
        } => PlanNode::Insert {
            child: Box::new(push_down(*child, context)),
            table_oid,
            insert_columns,
        },
        PlanNode::Update {
            child,
            table_oid,
            update_exprs,
        } => PlanNode::Update {
            child: Box::new(push_down(*child, context)),
            table_oid,
            update_exprs,
        },
        PlanNode::Delete { child, table_oid } => PlanNode::Delete {
            child: Box::new(push_down(*child, context)),
            table_oid,
        },
        leaf @ PlanNode::Values { .. } => leaf,
    }
}

/// Registers a comparison predicate: column-vs-column comparisons are join
/// predicates, everything else is a simple filter. Non-comparisons stay
/// where they are.
fn classify(predicate: &Expression, context: &mut RewriteContext) -> Option<Registered> {
    let Expression::Comparison { left, right, .. } = predicate else {
        return None;
    };
    let both_columns = matches!(**left, Expression::ColumnValue { .. })
        && matches!(**right, Expression::ColumnValue { .. });
    if both_columns {
        context.join_conditions.push((predicate.clone(), false));
        Some(Registered::Join(context.join_conditions.len() - 1))
    } else {
        context.filter_conditions.push((predicate.clone(), false));
        Some(Registered::Simple(context.filter_conditions.len() - 1))
    }
}

fn push_down_filter(
    child: PlanNode,
    predicate: Expression,
    context: &mut RewriteContext,
) -> PlanNode {
    let registered = classify(&predicate, context);
    let child = push_down(child, context);

    let placed = match registered {
        Some(Registered::Join(index)) => context.join_conditions[index].1,
        Some(Registered::Simple(index)) => context.filter_conditions[index].1,
        None => false,
    };
    if placed {
        // A lower node adopted the predicate; this Filter disappears.
        child
    } else {
        PlanNode::Filter {
            child: Box::new(child),
            predicate,
        }
    }
}

fn collect_aliases(plan: &PlanNode, aliases: &mut HashSet<String>) {
    match plan {
        PlanNode::SeqScan { alias, .. } => {
            aliases.insert(alias.clone());
        }
        PlanNode::Filter { child, .. }
        | PlanNode::OrderBy { child, .. }
        | PlanNode::Limit { child, .. }
        | PlanNode::Insert { child, .. }
        | PlanNode::Update { child, .. }
        | PlanNode::Delete { child, .. } => collect_aliases(child, aliases),
        PlanNode::NestedLoopJoin { left, right, .. }
        | PlanNode::MergeJoin { left, right, .. } => {
            collect_aliases(left, aliases);
            collect_aliases(right, aliases);
        }
        PlanNode::Values { .. } => {}
    }
}

/// Attaches the first registered join predicate whose two column
/// references both resolve inside this join's subtree, rebound to the
/// join's combined output columns.
fn push_down_join(
    left: PlanNode,
    right: PlanNode,
    mut join_condition: Option<Expression>,
    join_type: JoinType,
    context: &mut RewriteContext,
) -> PlanNode {
    let mut aliases = HashSet::new();
    collect_aliases(&left, &mut aliases);
    collect_aliases(&right, &mut aliases);

    let mut combined = left.output_columns();
    for column in right.output_columns().columns() {
        combined.push(column.clone());
    }

    for (condition, placed) in context.join_conditions.iter_mut() {
        if *placed {
            continue;
        }
        let Expression::Comparison {
            left: cond_left,
            right: cond_right,
            ..
        } = condition
        else {
            continue;
        };
        let (Some(left_table), Some(right_table)) =
            (cond_left.table_qualifier(), cond_right.table_qualifier())
        else {
            continue;
        };
        if aliases.contains(left_table) && aliases.contains(right_table) {
            if let Ok(rebound) = condition.rebound(&combined) {
                join_condition = Some(rebound);
                *placed = true;
                break;
            }
        }
    }

    PlanNode::NestedLoopJoin {
        left: Box::new(push_down(left, context)),
        right: Box::new(push_down(right, context)),
        join_condition,
        join_type,
    }
}

/// Attaches the first registered simple filter naming this scan's alias as
/// a new Filter directly above the scan.
fn push_down_seq_scan(
    table_oid: Oid,
    alias: String,
    columns: ColumnList,
    context: &mut RewriteContext,
) -> PlanNode {
    let scan = PlanNode::SeqScan {
        table_oid,
        alias: alias.clone(),
        columns,
    };
    let output_columns = scan.output_columns();

    for (condition, placed) in context.filter_conditions.iter_mut() {
        if *placed {
            continue;
        }
        let Expression::Comparison {
            left: cond_left, ..
        } = condition
        else {
            continue;
        };
        let Some(table) = cond_left.table_qualifier() else {
            continue;
        };
        if table == alias {
            if let Ok(rebound) = condition.rebound(&output_columns) {
                *placed = true;
                return PlanNode::Filter {
                    child: Box::new(scan),
                    predicate: rebound,
                };
            }
        }
    }
    scan
}

fn scan_cardinality(plan: &PlanNode, catalog: &dyn Catalog) -> usize {
    match plan {
        PlanNode::SeqScan { table_oid, .. } => {
            catalog.get_cardinality(*table_oid).unwrap_or(0)
        }
        _ => 0,
    }
}

/// The greedy rotation over an exactly-three-join left-deep tree
/// `((s1 ⋈ s2) ⋈ s3) ⋈ s4`, producing `((s2 ⋈ s3) ⋈ s4) ⋈ s1`. Each
/// join node keeps its own condition. Any other shape passes through
/// unchanged.
fn greedy_rotate(plan: PlanNode, catalog: &dyn Catalog) -> PlanNode {
    let shape_matches = matches!(&plan, PlanNode::NestedLoopJoin { left: top_left, .. }
        if matches!(&**top_left, PlanNode::NestedLoopJoin { left: mid_left, .. }
            if matches!(&**mid_left, PlanNode::NestedLoopJoin { .. })));
    if !shape_matches {
        return plan;
    }

    let PlanNode::NestedLoopJoin {
        left: top_left,
        right: s4,
        join_condition: top_condition,
        join_type: top_type,
    } = plan
    else {
        unreachable!("shape checked above");
    };
    let PlanNode::NestedLoopJoin {
        left: mid_left,
        right: s3,
        join_condition: mid_condition,
        join_type: mid_type,
    } = *top_left
    else {
        unreachable!("shape checked above");
    };
    let PlanNode::NestedLoopJoin {
        left: s1,
        right: s2,
        join_condition: bottom_condition,
        join_type: bottom_type,
    } = *mid_left
    else {
        unreachable!("shape checked above");
    };

    crate::caldera_debug_log!(
        "[Optimizer] greedy reorder over cardinalities {} {} {} {}",
        scan_cardinality(&s1, catalog),
        scan_cardinality(&s2, catalog),
        scan_cardinality(&s3, catalog),
        scan_cardinality(&s4, catalog),
    );

    let middle = PlanNode::NestedLoopJoin {
        left: s2,
        right: s3,
        join_condition: mid_condition,
        join_type: mid_type,
    };
    let top = PlanNode::NestedLoopJoin {
        left: Box::new(middle),
        right: s4,
        join_condition: top_condition,
        join_type: top_type,
    };
    PlanNode::NestedLoopJoin {
        left: Box::new(top),
        right: s1,
        join_condition: bottom_condition,
        join_type: bottom_type,
    }
}
