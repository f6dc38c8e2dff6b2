//! The transaction manager: xid allocation, the live set, and per-
//! transaction snapshots. Terminal log records are written through the log
//! manager so commit and rollback are durable.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use crate::buffer_pool::BufferPool;
use crate::catalog::Catalog;
use crate::errors::StorageError;
use crate::wal::LogManager;
use crate::{Xid, NULL_XID};

/// Transaction isolation levels. Repeatable read and serializable share
/// the snapshot-at-start visibility rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

/// The transaction manager.
pub struct TransactionManager {
    log_manager: Arc<LogManager>,
    next_xid: AtomicU32,
    active: Mutex<HashSet<Xid>>,
    snapshots: Mutex<HashMap<Xid, Arc<HashSet<Xid>>>>,
}

impl TransactionManager {
    pub fn new(log_manager: Arc<LogManager>) -> Self {
        Self {
            log_manager,
            // NULL_XID is reserved for "no transaction".
            next_xid: AtomicU32::new(NULL_XID + 1),
            active: Mutex::new(HashSet::new()),
            snapshots: Mutex::new(HashMap::new()),
        }
    }

    /// Starts a transaction: allocates a monotonically increasing xid,
    /// writes its `Begin` record, and registers it live.
    pub fn begin(&self) -> Result<Xid, StorageError> {
        let xid = self.next_xid.fetch_add(1, Ordering::SeqCst);
        self.log_manager.append_begin_log(xid)?;
        self.active.lock().unwrap().insert(xid);
        crate::strata_debug_log!("[TransactionManager::begin] xid {}", xid);
        Ok(xid)
    }

    /// Commits: the transaction is reported committed only after its
    /// `Commit` record is flushed.
    pub fn commit(&self, xid: Xid) -> Result<(), StorageError> {
        self.log_manager.append_commit_log(xid)?;
        self.active.lock().unwrap().remove(&xid);
        self.snapshots.lock().unwrap().remove(&xid);
        crate::strata_debug_log!("[TransactionManager::commit] xid {}", xid);
        Ok(())
    }

    /// Rolls back: undoes the transaction's whole log chain, then writes
    /// and flushes its `Rollback` record.
    pub fn rollback(
        &self,
        xid: Xid,
        buffer_pool: &Arc<BufferPool>,
        catalog: &dyn Catalog,
    ) -> Result<(), StorageError> {
        self.log_manager.rollback(xid, buffer_pool, catalog)?;
        self.log_manager.append_rollback_log(xid)?;
        self.active.lock().unwrap().remove(&xid);
        self.snapshots.lock().unwrap().remove(&xid);
        crate::strata_debug_log!("[TransactionManager::rollback] xid {}", xid);
        Ok(())
    }

    /// The set of other transactions active when `xid` first asked.
    /// Frozen on first call; repeatable-read scans rely on the stability.
    pub fn get_snapshot(&self, xid: Xid) -> Arc<HashSet<Xid>> {
        let mut snapshots = self.snapshots.lock().unwrap();
        snapshots
            .entry(xid)
            .or_insert_with(|| {
                let mut active = self.active.lock().unwrap().clone();
                active.remove(&xid);
                Arc::new(active)
            })
            .clone()
    }

    /// The live set, fresh on every call. Read-committed scans use this.
    pub fn get_active_transactions(&self) -> HashSet<Xid> {
        self.active.lock().unwrap().clone()
    }

    pub fn is_active(&self, xid: Xid) -> bool {
        self.active.lock().unwrap().contains(&xid)
    }

    /// Recovery hook: raises the xid allocator so recovered transactions
    /// are never reissued. Never lowers it.
    pub fn set_next_xid(&self, xid: Xid) {
        self.next_xid.fetch_max(xid, Ordering::SeqCst);
    }

    pub fn get_next_xid(&self) -> Xid {
        self.next_xid.load(Ordering::SeqCst)
    }
}
