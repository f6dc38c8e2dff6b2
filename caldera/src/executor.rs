//! The Volcano executors: `init` once, then `next` until `None`.

use strata::catalog::Catalog;
use strata::lock_manager::LockManager;
use strata::record::Record;
use strata::transaction::{IsolationLevel, TransactionManager};
use strata::{Cid, Xid};

use crate::errors::EngineError;
use crate::limit_executor::LimitExecutor;
use crate::plan::PlanNode;

mod dml;
mod join;
mod pipeline;
mod scan;

use dml::{DeleteExecutor, InsertExecutor, UpdateExecutor};
use join::{MergeJoinExecutor, NestedLoopJoinExecutor};
use pipeline::{FilterExecutor, OrderByExecutor, ValuesExecutor};
use scan::SeqScanExecutor;

/// One physical operator. `init` is called once before the first `next`;
/// calling it again resets the iterator. `next` returns one record at a
/// time and `None` at end of stream.
pub trait Executor {
    fn init(&mut self) -> Result<(), EngineError>;
    fn next(&mut self) -> Result<Option<Record>, EngineError>;
}

pub type BoxedExecutor<'a> = Box<dyn Executor + 'a>;

/// Everything an executor needs from its session: the catalog, the
/// transaction and lock managers, and the statement's transactional
/// coordinates.
pub struct ExecutorContext<'a> {
    pub catalog: &'a dyn Catalog,
    pub transaction_manager: &'a TransactionManager,
    pub lock_manager: &'a LockManager,
    pub xid: Xid,
    pub cid: Cid,
    pub isolation: IsolationLevel,
}

/// Builds the executor tree for a plan. The returned executor still needs
/// `init` before the first `next`.
pub fn build_executor<'a>(
    plan: &'a PlanNode,
    context: &'a ExecutorContext<'a>,
) -> Result<BoxedExecutor<'a>, EngineError> {
    Ok(match plan {
        PlanNode::SeqScan { table_oid, .. } => {
            Box::new(SeqScanExecutor::new(context, *table_oid))
        }
        PlanNode::Values { rows, .. } => Box::new(ValuesExecutor::new(rows)),
        PlanNode::Filter { child, predicate } => Box::new(FilterExecutor::new(
            build_executor(child, context)?,
            predicate,
        )),
        PlanNode::NestedLoopJoin {
            left,
            right,
            join_condition,
            join_type,
        } => Box::new(NestedLoopJoinExecutor::new(
            build_executor(left, context)?,
            build_executor(right, context)?,
            join_condition.as_ref(),
            *join_type,
        )),
        PlanNode::MergeJoin {
            left,
            right,
            left_key,
            right_key,
        } => Box::new(MergeJoinExecutor::new(
            build_executor(left, context)?,
            build_executor(right, context)?,
            left_key,
            right_key,
        )),
        PlanNode::OrderBy { child, order_bys } => Box::new(OrderByExecutor::new(
            build_executor(child, context)?,
            order_bys,
        )),
        PlanNode::Limit {
            child,
            offset,
            count,
        } => Box::new(LimitExecutor::new(
            build_executor(child, context)?,
            *offset,
            *count,
        )),
        PlanNode::Insert {
            child,
            table_oid,
            insert_columns,
        } => Box::new(InsertExecutor::new(
            context,
            build_executor(child, context)?,
            *table_oid,
            insert_columns,
        )),
        PlanNode::Update {
            child,
            table_oid,
            update_exprs,
        } => Box::new(UpdateExecutor::new(
            context,
            build_executor(child, context)?,
            *table_oid,
            update_exprs,
        )),
        PlanNode::Delete { child, table_oid } => Box::new(DeleteExecutor::new(
            context,
            build_executor(child, context)?,
            *table_oid,
        )),
    })
}
