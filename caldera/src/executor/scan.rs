use strata::lock_manager::LockType;
use strata::table_scan::TableScan;
use strata::transaction::IsolationLevel;
use strata::{Oid, Rid};

use super::{Executor, ExecutorContext};
use crate::errors::EngineError;
use strata::record::Record;

/// Sequential scan over a table heap with MVCC visibility.
pub struct SeqScanExecutor<'a> {
    context: &'a ExecutorContext<'a>,
    table_oid: Oid,
    scan: Option<TableScan>,
}

impl<'a> SeqScanExecutor<'a> {
    pub(super) fn new(context: &'a ExecutorContext<'a>, table_oid: Oid) -> Self {
        Self {
            context,
            table_oid,
            scan: None,
        }
    }
}

impl<'a> Executor for SeqScanExecutor<'a> {
    fn init(&mut self) -> Result<(), EngineError> {
        let table = self.context.catalog.get_table(self.table_oid)?;
        let start = Rid::new(table.first_page_id(), 0);
        self.scan = Some(TableScan::new(table, start));
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Record>, EngineError> {
        let context = self.context;
        if !context
            .lock_manager
            .lock_table(context.xid, LockType::IntentionShared, self.table_oid)
        {
            return Err(EngineError::LockConflict);
        }

        let scan = self
            .scan
            .as_mut()
            .ok_or_else(|| EngineError::Generic("scan used before init".to_string()))?;

        // Repeatable read and serializable scan against the transaction's
        // frozen snapshot; read committed refreshes the live set on every
        // statement.
        let record = match context.isolation {
            IsolationLevel::RepeatableRead | IsolationLevel::Serializable => {
                let snapshot = context.transaction_manager.get_snapshot(context.xid);
                scan.get_next_record(context.xid, context.isolation, context.cid, &snapshot)?
            }
            IsolationLevel::ReadCommitted => {
                let active = context.transaction_manager.get_active_transactions();
                scan.get_next_record(context.xid, context.isolation, context.cid, &active)?
            }
        };
        Ok(record)
    }
}
