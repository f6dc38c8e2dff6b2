//! The Write-Ahead Log manager and ARIES recovery.
//!
//! Appends go to an in-memory buffer; `flush` serializes buffered records
//! to the log file at their LSN offsets. The manager owns the active
//! transaction table (ATT) and the dirty page table (DPT), and drives the
//! three-phase analysis/redo/undo recovery at startup.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::buffer_pool::BufferPool;
use crate::catalog::Catalog;
use crate::disk::Disk;
use crate::errors::StorageError;
use crate::log_record::{LogPayload, LogRecord, MAX_LOG_SIZE};
use crate::transaction::TransactionManager;
use crate::{Lsn, Oid, PageId, SlotId, Xid, FIRST_LSN, NULL_LSN, NULL_PAGE_ID, NULL_XID};

/// The WAL manager.
pub struct LogManager {
    disk: Arc<Disk>,
    buffer: Mutex<Vec<LogRecord>>,
    next_lsn: AtomicU64,
    flushed_lsn: Mutex<Option<Lsn>>,
    att: Mutex<HashMap<Xid, Lsn>>,
    dpt: Mutex<HashMap<(Oid, PageId), Lsn>>,
}

impl LogManager {
    /// Opens the manager against an existing log, resuming LSN allocation
    /// from the persisted next-LSN control file.
    pub fn new(disk: Arc<Disk>) -> Result<Self, StorageError> {
        let next_lsn = disk.read_next_lsn()?;
        let flushed_lsn = if next_lsn == FIRST_LSN {
            None
        } else {
            Some(next_lsn - 1)
        };
        crate::strata_debug_log!(
            "[LogManager::new] next_lsn {}, flushed {:?}",
            next_lsn,
            flushed_lsn
        );
        Ok(Self {
            disk,
            buffer: Mutex::new(Vec::new()),
            next_lsn: AtomicU64::new(next_lsn),
            flushed_lsn: Mutex::new(flushed_lsn),
            att: Mutex::new(HashMap::new()),
            dpt: Mutex::new(HashMap::new()),
        })
    }

    pub fn next_lsn(&self) -> Lsn {
        self.next_lsn.load(Ordering::SeqCst)
    }

    pub fn flushed_lsn(&self) -> Option<Lsn> {
        *self.flushed_lsn.lock().unwrap()
    }

    pub fn att_snapshot(&self) -> HashMap<Xid, Lsn> {
        self.att.lock().unwrap().clone()
    }

    pub fn dpt_snapshot(&self) -> HashMap<(Oid, PageId), Lsn> {
        self.dpt.lock().unwrap().clone()
    }

    /// Allocates the record's LSN and places it in the buffer. Holding the
    /// buffer lock across both steps keeps every allocated LSN reachable by
    /// a later `flush`.
    fn push_record(&self, xid: Xid, prev_lsn: Lsn, payload: LogPayload) -> Lsn {
        let size = LogRecord::size(&payload) as u64;
        let mut buffer = self.buffer.lock().unwrap();
        let lsn = self.next_lsn.fetch_add(size, Ordering::SeqCst);
        buffer.push(LogRecord {
            lsn,
            xid,
            prev_lsn,
            payload,
        });
        lsn
    }

    fn chain_lsn(&self, xid: Xid) -> Result<Lsn, StorageError> {
        self.att
            .lock()
            .unwrap()
            .get(&xid)
            .copied()
            .ok_or(StorageError::UnknownTransaction(xid))
    }

    fn set_dirty(&self, oid: Oid, page_id: PageId, lsn: Lsn) {
        self.dpt.lock().unwrap().entry((oid, page_id)).or_insert(lsn);
    }

    pub fn append_begin_log(&self, xid: Xid) -> Result<Lsn, StorageError> {
        {
            let att = self.att.lock().unwrap();
            if att.contains_key(&xid) {
                return Err(StorageError::TransactionAlreadyActive(xid));
            }
        }
        let lsn = self.push_record(xid, NULL_LSN, LogPayload::Begin);
        self.att.lock().unwrap().insert(xid, lsn);
        Ok(lsn)
    }

    pub fn append_insert_log(
        &self,
        xid: Xid,
        oid: Oid,
        page_id: PageId,
        slot_id: SlotId,
        offset: u16,
        size: u16,
        record_data: Vec<u8>,
    ) -> Result<Lsn, StorageError> {
        let prev_lsn = self.chain_lsn(xid)?;
        let lsn = self.push_record(
            xid,
            prev_lsn,
            LogPayload::Insert {
                oid,
                page_id,
                slot_id,
                offset,
                size,
                record_data,
            },
        );
        self.att.lock().unwrap().insert(xid, lsn);
        self.set_dirty(oid, page_id, lsn);
        Ok(lsn)
    }

    pub fn append_delete_log(
        &self,
        xid: Xid,
        oid: Oid,
        page_id: PageId,
        slot_id: SlotId,
    ) -> Result<Lsn, StorageError> {
        let prev_lsn = self.chain_lsn(xid)?;
        let lsn = self.push_record(
            xid,
            prev_lsn,
            LogPayload::Delete {
                oid,
                page_id,
                slot_id,
            },
        );
        self.att.lock().unwrap().insert(xid, lsn);
        self.set_dirty(oid, page_id, lsn);
        Ok(lsn)
    }

    pub fn append_new_page_log(
        &self,
        xid: Xid,
        oid: Oid,
        prev_page_id: PageId,
        page_id: PageId,
    ) -> Result<Lsn, StorageError> {
        let prev_lsn = self.chain_lsn(xid)?;
        let lsn = self.push_record(
            xid,
            prev_lsn,
            LogPayload::NewPage {
                oid,
                prev_page_id,
                page_id,
            },
        );
        self.att.lock().unwrap().insert(xid, lsn);
        self.set_dirty(oid, page_id, lsn);
        if prev_page_id != NULL_PAGE_ID {
            // Linking dirties the predecessor page as well.
            self.set_dirty(oid, prev_page_id, lsn);
        }
        Ok(lsn)
    }

    /// Appends `Commit`, flushes through it, and retires the transaction's
    /// chain. The transaction is durable once this returns.
    pub fn append_commit_log(&self, xid: Xid) -> Result<Lsn, StorageError> {
        let prev_lsn = self.chain_lsn(xid)?;
        let lsn = self.push_record(xid, prev_lsn, LogPayload::Commit);
        self.flush(Some(lsn))?;
        self.att.lock().unwrap().remove(&xid);
        Ok(lsn)
    }

    pub fn append_rollback_log(&self, xid: Xid) -> Result<Lsn, StorageError> {
        let prev_lsn = self.chain_lsn(xid)?;
        let lsn = self.push_record(xid, prev_lsn, LogPayload::Rollback);
        self.flush(Some(lsn))?;
        self.att.lock().unwrap().remove(&xid);
        Ok(lsn)
    }

    /// Emits a checkpoint pair carrying the current ATT and DPT, flushes
    /// through the end record, and persists the begin LSN to the master
    /// record. Recovery starts its scans from that LSN.
    pub fn checkpoint(&self) -> Result<Lsn, StorageError> {
        let begin_lsn = self.push_record(NULL_XID, NULL_LSN, LogPayload::BeginCheckpoint);
        let att = self.att.lock().unwrap().clone();
        let dpt = self.dpt.lock().unwrap().clone();
        let end_lsn = self.push_record(NULL_XID, NULL_LSN, LogPayload::EndCheckpoint { att, dpt });
        self.flush(Some(end_lsn))?;
        self.disk.write_master_record(begin_lsn)?;
        crate::strata_debug_log!(
            "[LogManager::checkpoint] begin {} end {}",
            begin_lsn,
            end_lsn
        );
        Ok(end_lsn)
    }

    /// Serializes every buffered record with LSN ≤ `lsn` (all of them for
    /// `None`) to the log file and advances `flushed_lsn`. Rewrites the
    /// next-LSN control file when the flushed frontier moves past it.
    pub fn flush(&self, lsn: Option<Lsn>) -> Result<(), StorageError> {
        let mut max_flushed: Option<(Lsn, usize)> = None;
        {
            let mut buffer = self.buffer.lock().unwrap();
            let mut kept = Vec::with_capacity(buffer.len());
            for record in buffer.drain(..) {
                if let Some(limit) = lsn {
                    if record.lsn > limit {
                        kept.push(record);
                        continue;
                    }
                }
                let bytes = record.serialize();
                self.disk.write_log(record.lsn, &bytes)?;
                if max_flushed.map_or(true, |(max, _)| record.lsn > max) {
                    max_flushed = Some((record.lsn, bytes.len()));
                }
            }
            *buffer = kept;
        }

        if let Some((max_lsn, size)) = max_flushed {
            let mut flushed = self.flushed_lsn.lock().unwrap();
            if flushed.map_or(true, |f| max_lsn > f) {
                *flushed = Some(max_lsn);
                let frontier = max_lsn + size as u64;
                if frontier > self.disk.read_next_lsn()? {
                    self.disk.write_next_lsn(frontier)?;
                }
            }
        }
        Ok(())
    }

    /// WAL rule hook for the buffer pool: flush the log through `page_lsn`
    /// before the page's bytes reach disk, and retire the DPT entry.
    pub fn flush_page(
        &self,
        table_oid: Oid,
        page_id: PageId,
        page_lsn: Lsn,
    ) -> Result<(), StorageError> {
        self.flush(Some(page_lsn))?;
        self.dpt.lock().unwrap().remove(&(table_oid, page_id));
        Ok(())
    }

    fn is_flushed(&self, lsn: Lsn) -> bool {
        self.flushed_lsn.lock().unwrap().map_or(false, |f| lsn <= f)
    }

    /// Reads and deserializes the record at `lsn` from the log file.
    pub fn read_record(&self, lsn: Lsn) -> Result<LogRecord, StorageError> {
        let mut buf = vec![0u8; MAX_LOG_SIZE];
        self.disk.read_log(lsn, MAX_LOG_SIZE, &mut buf)?;
        LogRecord::deserialize(lsn, &buf)
    }

    fn fetch_record(&self, lsn: Lsn) -> Result<LogRecord, StorageError> {
        if self.is_flushed(lsn) {
            return self.read_record(lsn);
        }
        self.buffer
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.lsn == lsn)
            .cloned()
            .ok_or_else(|| {
                StorageError::Corruption(format!("log record at lsn {} not in buffer", lsn))
            })
    }

    /// Walks the transaction's `prev_lsn` chain from its last record and
    /// undoes every mutation. Used both by statement-level abort and by the
    /// undo phase of recovery.
    pub fn rollback(
        &self,
        xid: Xid,
        buffer_pool: &Arc<BufferPool>,
        catalog: &dyn Catalog,
    ) -> Result<(), StorageError> {
        let mut current = self.chain_lsn(xid)?;
        while current != NULL_LSN {
            let record = self.fetch_record(current)?;
            crate::strata_debug_log!(
                "[LogManager::rollback] xid {} undoing lsn {} ({:?})",
                xid,
                current,
                record.payload.page_coordinates()
            );
            record.payload.undo(record.xid, buffer_pool, catalog)?;
            current = record.prev_lsn;
        }
        Ok(())
    }

    /// ARIES recovery: analysis, redo, undo. Runs at startup before any
    /// transaction begins.
    pub fn recover(
        &self,
        buffer_pool: &Arc<BufferPool>,
        catalog: &dyn Catalog,
        transaction_manager: &TransactionManager,
    ) -> Result<(), StorageError> {
        let checkpoint_lsn = self.analyze(transaction_manager)?;
        self.redo(checkpoint_lsn, buffer_pool, catalog)?;
        self.undo(buffer_pool, catalog)?;
        Ok(())
    }

    /// Rebuilds the ATT and DPT from the log. Returns the checkpoint LSN
    /// recovery scans from.
    fn analyze(&self, transaction_manager: &TransactionManager) -> Result<Lsn, StorageError> {
        let next_lsn = self.disk.read_next_lsn()?;
        self.next_lsn.store(next_lsn, Ordering::SeqCst);
        *self.flushed_lsn.lock().unwrap() = if next_lsn == FIRST_LSN {
            None
        } else {
            Some(next_lsn - 1)
        };
        let checkpoint_lsn = self.disk.read_master_record()?.unwrap_or(FIRST_LSN);

        // First pass: seed the tables from the end-checkpoint record.
        let mut pos = checkpoint_lsn;
        while pos < next_lsn {
            let record = self.read_record(pos)?;
            let size = LogRecord::size(&record.payload) as u64;
            if let LogPayload::EndCheckpoint { att, dpt } = record.payload {
                *self.att.lock().unwrap() = att;
                *self.dpt.lock().unwrap() = dpt;
                break;
            }
            pos += size;
        }

        // Second pass: replay ATT/DPT bookkeeping from the checkpoint on.
        let mut pos = checkpoint_lsn;
        while pos < next_lsn {
            let record = self.read_record(pos)?;
            let size = LogRecord::size(&record.payload) as u64;

            if record.payload.is_mutation() {
                self.att.lock().unwrap().insert(record.xid, pos);
                if let Some((oid, page_id)) = record.payload.page_coordinates() {
                    self.set_dirty(oid, page_id, pos);
                }
            }
            if matches!(record.payload, LogPayload::Commit) {
                self.att.lock().unwrap().remove(&record.xid);
            }
            if record.xid != NULL_XID {
                transaction_manager.set_next_xid(record.xid + 1);
            }
            pos += size;
        }

        crate::strata_debug_log!(
            "[LogManager::analyze] checkpoint {}, att {:?}, dpt {:?}",
            checkpoint_lsn,
            self.att.lock().unwrap(),
            self.dpt.lock().unwrap()
        );
        Ok(checkpoint_lsn)
    }

    /// Replays mutation records forward from the oldest `rec_lsn`.
    fn redo(
        &self,
        checkpoint_lsn: Lsn,
        buffer_pool: &Arc<BufferPool>,
        catalog: &dyn Catalog,
    ) -> Result<(), StorageError> {
        let next_lsn = self.next_lsn();
        let mut pos = checkpoint_lsn;
        for &rec_lsn in self.dpt.lock().unwrap().values() {
            if rec_lsn < pos {
                pos = rec_lsn;
            }
        }

        while pos < next_lsn {
            let record = self.read_record(pos)?;
            let size = LogRecord::size(&record.payload) as u64;

            if let Some((oid, page_id)) = record.payload.page_coordinates() {
                let rec_lsn = self.dpt.lock().unwrap().get(&(oid, page_id)).copied();
                if let Some(rec_lsn) = rec_lsn {
                    if pos >= rec_lsn {
                        let apply = if matches!(record.payload, LogPayload::NewPage { .. }) {
                            // A page allocation always replays; the page may
                            // not exist on disk at all.
                            true
                        } else {
                            let db_oid = catalog.get_database_oid(oid)?;
                            let guard = buffer_pool.get_page(db_oid, oid, page_id)?;
                            let page_lsn = guard.read().page_lsn();
                            pos > page_lsn
                        };
                        if apply {
                            record.payload.redo(pos, record.xid, buffer_pool, catalog)?;
                        }
                    }
                }
            }
            pos += size;
        }
        Ok(())
    }

    /// Rolls back every transaction left in the ATT.
    fn undo(
        &self,
        buffer_pool: &Arc<BufferPool>,
        catalog: &dyn Catalog,
    ) -> Result<(), StorageError> {
        let xids: Vec<Xid> = self.att.lock().unwrap().keys().copied().collect();
        for xid in xids {
            crate::strata_debug_log!("[LogManager::undo] rolling back xid {}", xid);
            self.rollback(xid, buffer_pool, catalog)?;
            // The loser is fully undone; only live transactions stay in
            // the active table.
            self.att.lock().unwrap().remove(&xid);
        }
        Ok(())
    }
}
