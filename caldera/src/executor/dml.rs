//! Insert, update, and delete. Each drains its child, takes an intention
//! lock on the table and exclusive locks on the touched rows, and returns
//! one summary record carrying the affected-row count.

use std::sync::Arc;

use strata::lock_manager::LockType;
use strata::record::{Record, Value};
use strata::table::Table;
use strata::Oid;

use super::{BoxedExecutor, Executor, ExecutorContext};
use crate::errors::EngineError;
use crate::expr::Expression;

pub struct InsertExecutor<'a> {
    context: &'a ExecutorContext<'a>,
    child: BoxedExecutor<'a>,
    table_oid: Oid,
    insert_columns: &'a [String],
    table: Option<Arc<Table>>,
    finished: bool,
}

impl<'a> InsertExecutor<'a> {
    pub(super) fn new(
        context: &'a ExecutorContext<'a>,
        child: BoxedExecutor<'a>,
        table_oid: Oid,
        insert_columns: &'a [String],
    ) -> Self {
        Self {
            context,
            child,
            table_oid,
            insert_columns,
            table: None,
            finished: false,
        }
    }
}

impl<'a> Executor for InsertExecutor<'a> {
    fn init(&mut self) -> Result<(), EngineError> {
        self.child.init()?;
        self.table = Some(self.context.catalog.get_table(self.table_oid)?);
        self.finished = false;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Record>, EngineError> {
        if self.finished {
            return Ok(None);
        }
        let context = self.context;
        let table = self
            .table
            .clone()
            .ok_or_else(|| EngineError::Generic("insert used before init".to_string()))?;
        let columns = table.column_list();

        let mut count = 0u32;
        while let Some(record) = self.child.next()? {
            // Child values arrive in insert-column order; place them at
            // the table's column positions, missing columns become NULL.
            let mut values = vec![Value::Null; columns.len()];
            for (i, name) in self.insert_columns.iter().enumerate() {
                let index = columns
                    .index_of(name)
                    .ok_or_else(|| EngineError::ColumnNotFound(name.clone()))?;
                values[index] = record.value(i).cloned().unwrap_or(Value::Null);
            }
            let mut row = Record::new(values);

            if !context
                .lock_manager
                .lock_table(context.xid, LockType::IntentionExclusive, self.table_oid)
            {
                return Err(EngineError::LockConflict);
            }
            let rid = table.insert_record(&mut row, context.xid, context.cid, true)?;
            if !context
                .lock_manager
                .lock_row(context.xid, LockType::Exclusive, self.table_oid, rid)
            {
                return Err(EngineError::LockConflict);
            }
            count += 1;
        }
        self.finished = true;
        Ok(Some(Record::new(vec![Value::Int(count as i32)])))
    }
}

pub struct DeleteExecutor<'a> {
    context: &'a ExecutorContext<'a>,
    child: BoxedExecutor<'a>,
    table_oid: Oid,
    table: Option<Arc<Table>>,
    finished: bool,
}

impl<'a> DeleteExecutor<'a> {
    pub(super) fn new(
        context: &'a ExecutorContext<'a>,
        child: BoxedExecutor<'a>,
        table_oid: Oid,
    ) -> Self {
        Self {
            context,
            child,
            table_oid,
            table: None,
            finished: false,
        }
    }
}

impl<'a> Executor for DeleteExecutor<'a> {
    fn init(&mut self) -> Result<(), EngineError> {
        self.child.init()?;
        self.table = Some(self.context.catalog.get_table(self.table_oid)?);
        self.finished = false;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Record>, EngineError> {
        if self.finished {
            return Ok(None);
        }
        let context = self.context;
        let table = self
            .table
            .clone()
            .ok_or_else(|| EngineError::Generic("delete used before init".to_string()))?;

        let mut count = 0u32;
        while let Some(record) = self.child.next()? {
            let rid = record
                .rid()
                .ok_or_else(|| EngineError::Generic("delete source row has no rid".to_string()))?;

            if !context
                .lock_manager
                .lock_table(context.xid, LockType::IntentionExclusive, self.table_oid)
            {
                return Err(EngineError::LockConflict);
            }
            table.delete_record(rid, context.xid, true)?;
            if !context
                .lock_manager
                .lock_row(context.xid, LockType::Exclusive, self.table_oid, rid)
            {
                return Err(EngineError::LockConflict);
            }
            count += 1;
        }
        self.finished = true;
        Ok(Some(Record::new(vec![Value::Int(count as i32)])))
    }
}

pub struct UpdateExecutor<'a> {
    context: &'a ExecutorContext<'a>,
    child: BoxedExecutor<'a>,
    table_oid: Oid,
    update_exprs: &'a [Expression],
    table: Option<Arc<Table>>,
    finished: bool,
}

impl<'a> UpdateExecutor<'a> {
    pub(super) fn new(
        context: &'a ExecutorContext<'a>,
        child: BoxedExecutor<'a>,
        table_oid: Oid,
        update_exprs: &'a [Expression],
    ) -> Self {
        Self {
            context,
            child,
            table_oid,
            update_exprs,
            table: None,
            finished: false,
        }
    }
}

impl<'a> Executor for UpdateExecutor<'a> {
    fn init(&mut self) -> Result<(), EngineError> {
        self.child.init()?;
        self.table = Some(self.context.catalog.get_table(self.table_oid)?);
        self.finished = false;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Record>, EngineError> {
        if self.finished {
            return Ok(None);
        }
        let context = self.context;
        let table = self
            .table
            .clone()
            .ok_or_else(|| EngineError::Generic("update used before init".to_string()))?;

        let mut count = 0u32;
        while let Some(record) = self.child.next()? {
            let rid = record
                .rid()
                .ok_or_else(|| EngineError::Generic("update source row has no rid".to_string()))?;

            let mut values = Vec::with_capacity(self.update_exprs.len());
            for expr in self.update_exprs {
                values.push(expr.evaluate(&record)?);
            }
            let mut new_record = Record::new(values);

            if !context
                .lock_manager
                .lock_table(context.xid, LockType::IntentionExclusive, self.table_oid)
            {
                return Err(EngineError::LockConflict);
            }
            let new_rid =
                table.update_record(rid, context.xid, context.cid, &mut new_record, true)?;
            if !context
                .lock_manager
                .lock_row(context.xid, LockType::Exclusive, self.table_oid, new_rid)
            {
                return Err(EngineError::LockConflict);
            }
            // The old rid is locked too: the delete half of the update is
            // part of this transaction's write set.
            if !context
                .lock_manager
                .lock_row(context.xid, LockType::Exclusive, self.table_oid, rid)
            {
                return Err(EngineError::LockConflict);
            }
            count += 1;
        }
        self.finished = true;
        Ok(Some(Record::new(vec![Value::Int(count as i32)])))
    }
}
