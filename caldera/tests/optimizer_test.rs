mod common;

use caldera::expr::{ComparisonOp, Expression};
use caldera::optimizer::{JoinOrderAlgorithm, Optimizer};
use caldera::plan::{JoinType, PlanNode};
use common::*;
use strata::record::Value;
use strata::transaction::IsolationLevel::RepeatableRead;
use tempfile::tempdir;

fn eq(left: Expression, right: Expression) -> Expression {
    Expression::comparison(ComparisonOp::Eq, left, right)
}

fn nlj(left: PlanNode, right: PlanNode) -> PlanNode {
    PlanNode::NestedLoopJoin {
        left: Box::new(left),
        right: Box::new(right),
        join_condition: None,
        join_type: JoinType::Inner,
    }
}

#[test]
fn conjunctions_split_into_stacked_filters() {
    let dir = tempdir().unwrap();
    let engine = Engine::open(dir.path());
    let optimizer = Optimizer::new(&engine.catalog, JoinOrderAlgorithm::None);

    // Values below the filter: nothing to push into, so both halves stay.
    let plan = PlanNode::Filter {
        child: Box::new(int_values_plan(&[1])),
        predicate: Expression::and(
            eq(
                Expression::column(0, "t.a"),
                Expression::constant(Value::Int(1)),
            ),
            eq(
                Expression::column(0, "t.a"),
                Expression::constant(Value::Int(2)),
            ),
        ),
    };
    let optimized = optimizer.optimize(plan);

    let PlanNode::Filter { child, .. } = optimized else {
        panic!("expected the right operand's filter at the top");
    };
    let PlanNode::Filter { child, .. } = *child else {
        panic!("expected the left operand's filter below");
    };
    assert!(matches!(*child, PlanNode::Values { .. }));
}

#[test]
fn simple_predicates_sink_to_their_scan() {
    let dir = tempdir().unwrap();
    let engine = Engine::open(dir.path());
    let left = engine.create_table(20, int_varchar_columns(), true);
    let right = engine.create_table(21, int_varchar_columns(), true);
    let optimizer = Optimizer::new(&engine.catalog, JoinOrderAlgorithm::None);

    // Filter on the right table sits above the join; it must end up
    // directly above the right scan.
    let plan = PlanNode::Filter {
        child: Box::new(nlj(scan_plan(&left, "l"), scan_plan(&right, "r"))),
        predicate: eq(
            Expression::column(2, "r.id"),
            Expression::constant(Value::Int(5)),
        ),
    };
    let optimized = optimizer.optimize(plan);

    let PlanNode::NestedLoopJoin { left, right, .. } = optimized else {
        panic!("the outer filter should have dissolved into the join");
    };
    assert!(matches!(*left, PlanNode::SeqScan { .. }));
    let PlanNode::Filter { child, predicate } = *right else {
        panic!("expected the pushed filter above the right scan");
    };
    assert!(matches!(*child, PlanNode::SeqScan { .. }));
    // The column index was rebound to the scan's own output.
    match predicate {
        Expression::Comparison { left, .. } => match *left {
            Expression::ColumnValue { col_idx, .. } => assert_eq!(col_idx, 0),
            other => panic!("unexpected {:?}", other),
        },
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn join_predicates_attach_to_the_covering_join() {
    let dir = tempdir().unwrap();
    let engine = Engine::open(dir.path());
    let left = engine.create_table(20, int_varchar_columns(), true);
    let right = engine.create_table(21, int_varchar_columns(), true);
    let optimizer = Optimizer::new(&engine.catalog, JoinOrderAlgorithm::None);

    let plan = PlanNode::Filter {
        child: Box::new(nlj(scan_plan(&left, "l"), scan_plan(&right, "r"))),
        predicate: eq(
            Expression::column(0, "l.id"),
            Expression::column(2, "r.id"),
        ),
    };
    let optimized = optimizer.optimize(plan);

    let PlanNode::NestedLoopJoin { join_condition, .. } = optimized else {
        panic!("the filter should have dissolved into the join");
    };
    let condition = join_condition.expect("join predicate attached");
    match condition {
        Expression::Comparison { left, right, .. } => {
            match (*left, *right) {
                (
                    Expression::ColumnValue { col_idx: l, .. },
                    Expression::ColumnValue { col_idx: r, .. },
                ) => {
                    // l.id is column 0 of the combined row, r.id column 2.
                    assert_eq!((l, r), (0, 2));
                }
                other => panic!("unexpected {:?}", other),
            }
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn optimized_join_plan_executes_correctly() {
    let dir = tempdir().unwrap();
    let engine = Engine::open(dir.path());
    let users = engine.create_table(20, int_varchar_columns(), true);
    let orders = engine.create_table(21, int_varchar_columns(), true);

    let writer = engine.transaction_manager.begin().unwrap();
    let context = engine.context(writer, 0, RepeatableRead);
    run_plan(&insert_plan(&users, &[(1, "ada"), (2, "grace")]), &context).unwrap();
    run_plan(&insert_plan(&orders, &[(2, "books"), (3, "ore")]), &context).unwrap();
    engine.transaction_manager.commit(writer).unwrap();
    engine.lock_manager.release_locks(writer);

    // SELECT ... FROM users u JOIN orders o WHERE u.id = o.id AND u.id >= 2,
    // written as filters above a bare cross join.
    let plan = PlanNode::Filter {
        child: Box::new(nlj(scan_plan(&users, "u"), scan_plan(&orders, "o"))),
        predicate: Expression::and(
            eq(Expression::column(0, "u.id"), Expression::column(2, "o.id")),
            Expression::comparison(
                ComparisonOp::Ge,
                Expression::column(0, "u.id"),
                Expression::constant(Value::Int(2)),
            ),
        ),
    };
    let optimizer = Optimizer::new(&engine.catalog, JoinOrderAlgorithm::None);
    let optimized = optimizer.optimize(plan);

    let reader = engine.transaction_manager.begin().unwrap();
    let context = engine.context(reader, 0, RepeatableRead);
    let rows = run_plan(&optimized, &context).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].value(0), Some(&Value::Int(2)));
    assert_eq!(rows[0].value(1), Some(&Value::Varchar("grace".to_string())));
    assert_eq!(rows[0].value(3), Some(&Value::Varchar("books".to_string())));
}

#[test]
fn greedy_reorder_rotates_the_three_join_tree() {
    let dir = tempdir().unwrap();
    let engine = Engine::open(dir.path());
    let optimizer = Optimizer::new(&engine.catalog, JoinOrderAlgorithm::Greedy);

    let (s1, s2, s3, s4) = (
        int_values_plan(&[1]),
        int_values_plan(&[2]),
        int_values_plan(&[3]),
        int_values_plan(&[4]),
    );
    let plan = nlj(nlj(nlj(s1.clone(), s2.clone()), s3.clone()), s4.clone());
    let optimized = optimizer.optimize(plan);

    // ((s1 ⋈ s2) ⋈ s3) ⋈ s4 becomes ((s2 ⋈ s3) ⋈ s4) ⋈ s1.
    let expected = nlj(nlj(nlj(s2, s3), s4), s1);
    assert_eq!(optimized, expected);
}

#[test]
fn greedy_reorder_leaves_other_shapes_alone() {
    let dir = tempdir().unwrap();
    let engine = Engine::open(dir.path());
    let optimizer = Optimizer::new(&engine.catalog, JoinOrderAlgorithm::Greedy);

    let two_joins = nlj(
        nlj(int_values_plan(&[1]), int_values_plan(&[2])),
        int_values_plan(&[3]),
    );
    assert_eq!(optimizer.optimize(two_joins.clone()), two_joins);

    let single = nlj(int_values_plan(&[1]), int_values_plan(&[2]));
    assert_eq!(optimizer.optimize(single.clone()), single);

    let leaf = int_values_plan(&[9]);
    assert_eq!(optimizer.optimize(leaf.clone()), leaf);
}

#[test]
fn dp_reordering_is_declared_but_inert() {
    let dir = tempdir().unwrap();
    let engine = Engine::open(dir.path());
    let optimizer = Optimizer::new(&engine.catalog, JoinOrderAlgorithm::Dp);

    let plan = nlj(
        nlj(
            nlj(int_values_plan(&[1]), int_values_plan(&[2])),
            int_values_plan(&[3]),
        ),
        int_values_plan(&[4]),
    );
    assert_eq!(optimizer.optimize(plan.clone()), plan);
}
