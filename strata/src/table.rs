//! The table heap: a linked list of slotted pages, first-fit insertion,
//! logical deletion, and update as delete + insert.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::buffer_pool::BufferPool;
use crate::errors::StorageError;
use crate::page::MAX_RECORD_SIZE;
use crate::record::{ColumnList, Record};
use crate::wal::LogManager;
use crate::{Cid, Oid, PageId, Rid, Xid, NULL_PAGE_ID};

/// One heap table. Shared as `Arc<Table>` through the catalog.
pub struct Table {
    pub(crate) buffer_pool: Arc<BufferPool>,
    log_manager: Arc<LogManager>,
    oid: Oid,
    db_oid: Oid,
    column_list: ColumnList,
    first_page_id: AtomicU32,
}

impl Table {
    /// `is_empty` distinguishes a heap that never received a row (no page
    /// 0 on disk) from one that has; the catalog tracks this.
    pub fn new(
        buffer_pool: Arc<BufferPool>,
        log_manager: Arc<LogManager>,
        oid: Oid,
        db_oid: Oid,
        column_list: ColumnList,
        is_empty: bool,
    ) -> Self {
        let first_page_id = if is_empty { NULL_PAGE_ID } else { 0 };
        Self {
            buffer_pool,
            log_manager,
            oid,
            db_oid,
            column_list,
            first_page_id: AtomicU32::new(first_page_id),
        }
    }

    pub fn oid(&self) -> Oid {
        self.oid
    }

    pub fn db_oid(&self) -> Oid {
        self.db_oid
    }

    pub fn column_list(&self) -> &ColumnList {
        &self.column_list
    }

    pub fn first_page_id(&self) -> PageId {
        self.first_page_id.load(Ordering::SeqCst)
    }

    /// Inserts a record, extending the page chain when no page fits it.
    /// With `write_log`, emits `NewPage`/`Insert` records and stamps the
    /// page LSN.
    pub fn insert_record(
        &self,
        record: &mut Record,
        xid: Xid,
        cid: Cid,
        write_log: bool,
    ) -> Result<Rid, StorageError> {
        let record_size = record.size(&self.column_list);
        if record_size > MAX_RECORD_SIZE {
            return Err(StorageError::RecordTooLarge(record_size));
        }

        if self.first_page_id() == NULL_PAGE_ID {
            self.first_page_id.store(0, Ordering::SeqCst);
            let guard = self.buffer_pool.new_page(self.db_oid, self.oid, 0)?;
            let mut page = guard.write();
            page.init();
            let slot_id = page.insert_record(record, xid, cid).ok_or_else(|| {
                StorageError::Corruption("record does not fit an empty page".to_string())
            })?;
            if write_log {
                self.log_manager
                    .append_new_page_log(xid, self.oid, NULL_PAGE_ID, 0)?;
                let offset = page.upper();
                let data = page.raw_record(slot_id)?.to_vec();
                let lsn = self.log_manager.append_insert_log(
                    xid,
                    self.oid,
                    0,
                    slot_id,
                    offset,
                    data.len() as u16,
                    data,
                )?;
                page.set_page_lsn(lsn);
            }
            return Ok(Rid::new(0, slot_id));
        }

        let mut current_page_id = self.first_page_id();
        loop {
            let guard = self
                .buffer_pool
                .get_page(self.db_oid, self.oid, current_page_id)?;
            let (free_space, next_page_id) = {
                let page = guard.read();
                (page.free_space(), page.next_page_id())
            };

            if free_space >= record_size {
                let mut page = guard.write();
                let slot_id = page.insert_record(record, xid, cid).ok_or_else(|| {
                    StorageError::Corruption("free space changed under insert".to_string())
                })?;
                if write_log {
                    let offset = page.upper();
                    let data = page.raw_record(slot_id)?.to_vec();
                    let lsn = self.log_manager.append_insert_log(
                        xid,
                        self.oid,
                        current_page_id,
                        slot_id,
                        offset,
                        data.len() as u16,
                        data,
                    )?;
                    page.set_page_lsn(lsn);
                }
                return Ok(Rid::new(current_page_id, slot_id));
            }

            if next_page_id == NULL_PAGE_ID {
                // End of the chain: allocate the next page densely and link.
                let new_page_id = current_page_id + 1;
                let new_guard = self
                    .buffer_pool
                    .new_page(self.db_oid, self.oid, new_page_id)?;
                let mut new_page = new_guard.write();
                new_page.init();
                guard.write().set_next_page_id(new_page_id);
                let slot_id = new_page.insert_record(record, xid, cid).ok_or_else(|| {
                    StorageError::Corruption("record does not fit an empty page".to_string())
                })?;
                if write_log {
                    self.log_manager.append_new_page_log(
                        xid,
                        self.oid,
                        current_page_id,
                        new_page_id,
                    )?;
                    let offset = new_page.upper();
                    let data = new_page.raw_record(slot_id)?.to_vec();
                    let lsn = self.log_manager.append_insert_log(
                        xid,
                        self.oid,
                        new_page_id,
                        slot_id,
                        offset,
                        data.len() as u16,
                        data,
                    )?;
                    new_page.set_page_lsn(lsn);
                }
                return Ok(Rid::new(new_page_id, slot_id));
            }
            current_page_id = next_page_id;
        }
    }

    /// Tombstones the record at `rid` in place.
    pub fn delete_record(&self, rid: Rid, xid: Xid, write_log: bool) -> Result<(), StorageError> {
        let guard = self
            .buffer_pool
            .get_page(self.db_oid, self.oid, rid.page_id)?;
        let mut page = guard.write();
        page.delete_record(rid.slot_id, xid)?;
        if write_log {
            let lsn = self
                .log_manager
                .append_delete_log(xid, self.oid, rid.page_id, rid.slot_id)?;
            page.set_page_lsn(lsn);
        }
        Ok(())
    }

    /// Update is delete + insert: the new version gets a fresh rid.
    pub fn update_record(
        &self,
        rid: Rid,
        xid: Xid,
        cid: Cid,
        record: &mut Record,
        write_log: bool,
    ) -> Result<Rid, StorageError> {
        self.delete_record(rid, xid, write_log)?;
        self.insert_record(record, xid, cid, write_log)
    }

    /// Rewrites a record's bytes at its existing slot. Recovery use; the
    /// caller guarantees the serialized size is unchanged.
    pub fn update_record_in_place(&self, record: &Record) -> Result<(), StorageError> {
        let rid = record.rid().ok_or_else(|| {
            StorageError::Corruption("in-place update of a record without a rid".to_string())
        })?;
        let guard = self
            .buffer_pool
            .get_page(self.db_oid, self.oid, rid.page_id)?;
        let mut locked = guard.write();
        locked.update_record_in_place(&record.serialize(), rid.slot_id)
    }
}
