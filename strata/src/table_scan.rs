//! The table scan cursor and the MVCC visibility predicate.

use std::collections::HashSet;
use std::sync::Arc;

use crate::errors::StorageError;
use crate::record::Record;
use crate::table::Table;
use crate::transaction::IsolationLevel;
use crate::{Cid, Rid, Xid, NULL_PAGE_ID};

/// Whether `record` is visible to a reader, given its isolation level,
/// xid, current command id, and set of active transactions.
///
/// Pure function: the same inputs always produce the same answer. Under
/// repeatable read and serializable the active set is the reader's frozen
/// snapshot; under read committed it is the live set at statement start.
pub fn is_visible(
    isolation: IsolationLevel,
    xid: Xid,
    cid: Cid,
    active_xids: &HashSet<Xid>,
    record: &Record,
) -> bool {
    let xmin = record.header.xmin;
    let xmax = record.header.xmax;
    let mut visible = true;

    match isolation {
        IsolationLevel::RepeatableRead | IsolationLevel::Serializable => {
            // A deletion committed at or before our snapshot hides the row.
            if record.header.deleted && !active_xids.contains(&xmax) && xmax <= xid {
                visible = false;
            }
            // An insertion still in flight, or from a later transaction,
            // is not yet part of our snapshot.
            if active_xids.contains(&xmin) || xmin > xid {
                visible = false;
            }
        }
        IsolationLevel::ReadCommitted => {
            // Any committed deletion hides the row, as does our own.
            if record.header.deleted && (!active_xids.contains(&xmax) || xmax == xid) {
                visible = false;
            }
            if active_xids.contains(&xmin) && xmin != xid {
                visible = false;
            }
        }
    }

    // A row inserted by the current command must stay invisible to that
    // same command, or an insert feeding from its own scan never ends.
    if xmin == xid && record.header.cid == cid {
        visible = false;
    }

    visible
}

/// A cursor over a table heap. Each `get_next_record` call advances past
/// invisible records and returns the next visible one, or `None` at the
/// end of the page chain.
pub struct TableScan {
    table: Arc<Table>,
    rid: Rid,
}

impl TableScan {
    pub fn new(table: Arc<Table>, rid: Rid) -> Self {
        Self { table, rid }
    }

    pub fn get_next_record(
        &mut self,
        xid: Xid,
        isolation: IsolationLevel,
        cid: Cid,
        active_xids: &HashSet<Xid>,
    ) -> Result<Option<Record>, StorageError> {
        loop {
            if self.rid.page_id == NULL_PAGE_ID {
                return Ok(None);
            }

            let guard = self.table.buffer_pool.get_page(
                self.table.db_oid(),
                self.table.oid(),
                self.rid.page_id,
            )?;
            let page = guard.read();

            if self.rid.slot_id < page.record_count() {
                let record = page.get_record(self.rid, self.table.column_list())?;
                self.rid.slot_id += 1;
                if !is_visible(isolation, xid, cid, active_xids, &record) {
                    continue;
                }
                return Ok(Some(record));
            } else if page.next_page_id() != NULL_PAGE_ID {
                self.rid = Rid::new(page.next_page_id(), 0);
            } else {
                self.rid = Rid::new(NULL_PAGE_ID, 0);
                return Ok(None);
            }
        }
    }
}
