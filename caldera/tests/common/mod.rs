#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use caldera::catalog::MemoryCatalog;
use caldera::errors::EngineError;
use caldera::executor::{build_executor, ExecutorContext};
use caldera::expr::Expression;
use caldera::plan::PlanNode;
use strata::disk::Disk;
use strata::lock_manager::LockManager;
use strata::record::{Column, ColumnList, ColumnType, Record, Value};
use strata::table::Table;
use strata::transaction::{IsolationLevel, TransactionManager};
use strata::wal::LogManager;
use strata::{BufferPool, Cid, Oid, Xid};

pub const DB_OID: Oid = 1;
pub const POOL_SIZE: usize = 32;

/// A full engine stack over one database directory. Reopening the same
/// directory with a fresh `Engine` models a restart after a crash.
pub struct Engine {
    pub disk: Arc<Disk>,
    pub log_manager: Arc<LogManager>,
    pub buffer_pool: Arc<BufferPool>,
    pub transaction_manager: TransactionManager,
    pub lock_manager: LockManager,
    pub catalog: MemoryCatalog,
}

impl Engine {
    pub fn open(path: &Path) -> Engine {
        let disk = Arc::new(Disk::open(path).unwrap());
        let log_manager = Arc::new(LogManager::new(disk.clone()).unwrap());
        let buffer_pool = Arc::new(BufferPool::new(
            disk.clone(),
            log_manager.clone(),
            POOL_SIZE,
        ));
        let transaction_manager = TransactionManager::new(log_manager.clone());
        Engine {
            disk,
            log_manager,
            buffer_pool,
            transaction_manager,
            lock_manager: LockManager::new(),
            catalog: MemoryCatalog::new(),
        }
    }

    pub fn create_table(&self, oid: Oid, columns: ColumnList, is_empty: bool) -> Arc<Table> {
        let table = Arc::new(Table::new(
            self.buffer_pool.clone(),
            self.log_manager.clone(),
            oid,
            DB_OID,
            columns,
            is_empty,
        ));
        self.catalog.register_table(table.clone());
        table
    }

    pub fn recover(&self) {
        self.log_manager
            .recover(&self.buffer_pool, &self.catalog, &self.transaction_manager)
            .unwrap();
    }

    pub fn context(&self, xid: Xid, cid: Cid, isolation: IsolationLevel) -> ExecutorContext<'_> {
        ExecutorContext {
            catalog: &self.catalog,
            transaction_manager: &self.transaction_manager,
            lock_manager: &self.lock_manager,
            xid,
            cid,
            isolation,
        }
    }
}

/// Builds, initializes, and drains an executor tree.
pub fn run_plan(plan: &PlanNode, context: &ExecutorContext) -> Result<Vec<Record>, EngineError> {
    let mut executor = build_executor(plan, context)?;
    executor.init()?;
    let mut rows = Vec::new();
    while let Some(record) = executor.next()? {
        rows.push(record);
    }
    Ok(rows)
}

pub fn int_varchar_columns() -> ColumnList {
    ColumnList::new(vec![
        Column::new("id", ColumnType::Int),
        Column::new("name", ColumnType::Varchar),
    ])
}

pub fn scan_plan(table: &Table, alias: &str) -> PlanNode {
    PlanNode::SeqScan {
        table_oid: table.oid(),
        alias: alias.to_string(),
        columns: PlanNode::qualify_columns(alias, table.column_list()),
    }
}

/// An Insert over literal `(id, name)` rows.
pub fn insert_plan(table: &Table, rows: &[(i32, &str)]) -> PlanNode {
    let values = rows
        .iter()
        .map(|(id, name)| {
            vec![
                Expression::constant(Value::Int(*id)),
                Expression::constant(Value::Varchar(name.to_string())),
            ]
        })
        .collect();
    PlanNode::Insert {
        child: Box::new(PlanNode::Values {
            columns: int_varchar_columns(),
            rows: values,
        }),
        table_oid: table.oid(),
        insert_columns: vec!["id".to_string(), "name".to_string()],
    }
}

/// A Values leaf over single-column integer rows.
pub fn int_values_plan(ints: &[i32]) -> PlanNode {
    PlanNode::Values {
        columns: ColumnList::new(vec![Column::new("n", ColumnType::Int)]),
        rows: ints
            .iter()
            .map(|n| vec![Expression::constant(Value::Int(*n))])
            .collect(),
    }
}

pub fn ints(records: &[Record], index: usize) -> Vec<Option<i32>> {
    records
        .iter()
        .map(|r| match r.value(index) {
            Some(Value::Int(n)) => Some(*n),
            _ => None,
        })
        .collect()
}

pub fn count_of(records: &[Record]) -> i32 {
    assert_eq!(records.len(), 1, "DML returns exactly one summary record");
    match records[0].value(0) {
        Some(Value::Int(n)) => *n,
        other => panic!("expected count, got {:?}", other),
    }
}
