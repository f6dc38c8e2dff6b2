//! Multi-granularity locking.
//!
//! Non-blocking: `lock_table` / `lock_row` return `false` on conflict and
//! the executor surfaces that as a transaction error. A transaction
//! re-requesting a resource it already holds upgrades its mode in place.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::{Oid, Rid, Xid};

/// Lock modes, intention modes included.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockType {
    IntentionShared,
    IntentionExclusive,
    Shared,
    SharedIntentionExclusive,
    Exclusive,
}

use LockType::{
    Exclusive as X, IntentionExclusive as IX, IntentionShared as IS, Shared as S,
    SharedIntentionExclusive as SIX,
};

/// Compatibility of a held mode (row) against a requested mode (column).
const LOCK_COMPATIBILITY: [[bool; 5]; 5] = [
    // IS     IX     S      SIX    X
    [true, true, true, true, false],    // IS
    [true, true, false, false, false],  // IX
    [true, false, true, false, false],  // S
    [true, false, false, false, false], // SIX
    [false, false, false, false, false], // X
];

/// Combined mode when a holder of the row mode requests the column mode.
const LOCK_UPGRADE: [[LockType; 5]; 5] = [
    [IS, IX, S, SIX, X],
    [IX, IX, SIX, SIX, X],
    [S, SIX, S, SIX, X],
    [SIX, SIX, SIX, SIX, X],
    [X, X, X, X, X],
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockGranularity {
    Table,
    Row,
}

/// Deadlock handling policy. Only the non-blocking default is implemented;
/// the other strategies are declared for callers that select a policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeadlockType {
    #[default]
    None,
    WaitDie,
    WoundWait,
    Detection,
}

#[derive(Debug, Clone, Copy)]
struct ResourceLock {
    lock_type: LockType,
    granularity: LockGranularity,
    xid: Xid,
    rid: Rid,
}

/// The lock manager: per-table lists of granted locks.
#[derive(Debug, Default)]
pub struct LockManager {
    resource_locks: Mutex<HashMap<Oid, Vec<ResourceLock>>>,
    deadlock_type: Mutex<DeadlockType>,
}

fn compatible(held: LockType, requested: LockType) -> bool {
    LOCK_COMPATIBILITY[held as usize][requested as usize]
}

fn upgrade(held: LockType, requested: LockType) -> LockType {
    LOCK_UPGRADE[held as usize][requested as usize]
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_deadlock_type(&self, deadlock_type: DeadlockType) {
        *self.deadlock_type.lock().unwrap() = deadlock_type;
    }

    /// Acquires a table-granularity lock. Returns `false` when another
    /// transaction holds an incompatible table lock.
    pub fn lock_table(&self, xid: Xid, lock_type: LockType, oid: Oid) -> bool {
        let mut locks = self.resource_locks.lock().unwrap();
        let entries = locks.entry(oid).or_default();

        for entry in entries.iter() {
            if entry.granularity == LockGranularity::Table
                && entry.xid != xid
                && !compatible(entry.lock_type, lock_type)
            {
                return false;
            }
        }
        for entry in entries.iter_mut() {
            if entry.granularity == LockGranularity::Table && entry.xid == xid {
                entry.lock_type = upgrade(entry.lock_type, lock_type);
                return true;
            }
        }
        entries.push(ResourceLock {
            lock_type,
            granularity: LockGranularity::Table,
            xid,
            rid: Rid::default(),
        });
        true
    }

    /// Acquires a row-granularity lock. The caller is expected to hold an
    /// appropriate intention lock on the table already.
    pub fn lock_row(&self, xid: Xid, lock_type: LockType, oid: Oid, rid: Rid) -> bool {
        let mut locks = self.resource_locks.lock().unwrap();
        let entries = locks.entry(oid).or_default();

        for entry in entries.iter() {
            if entry.granularity == LockGranularity::Row
                && entry.rid == rid
                && entry.xid != xid
                && !compatible(entry.lock_type, lock_type)
            {
                return false;
            }
        }
        for entry in entries.iter_mut() {
            if entry.granularity == LockGranularity::Row && entry.rid == rid && entry.xid == xid {
                entry.lock_type = upgrade(entry.lock_type, lock_type);
                return true;
            }
        }
        entries.push(ResourceLock {
            lock_type,
            granularity: LockGranularity::Row,
            xid,
            rid,
        });
        true
    }

    /// Drops every lock held by `xid`, across all tables.
    pub fn release_locks(&self, xid: Xid) {
        let mut locks = self.resource_locks.lock().unwrap();
        locks.retain(|_, entries| {
            entries.retain(|entry| entry.xid != xid);
            !entries.is_empty()
        });
    }

    /// The mode `xid` holds on the table, if any. Test hook.
    pub fn held_table_lock(&self, xid: Xid, oid: Oid) -> Option<LockType> {
        let locks = self.resource_locks.lock().unwrap();
        locks.get(&oid)?.iter().find_map(|entry| {
            (entry.granularity == LockGranularity::Table && entry.xid == xid)
                .then_some(entry.lock_type)
        })
    }

    /// The mode `xid` holds on the row, if any. Test hook.
    pub fn held_row_lock(&self, xid: Xid, oid: Oid, rid: Rid) -> Option<LockType> {
        let locks = self.resource_locks.lock().unwrap();
        locks.get(&oid)?.iter().find_map(|entry| {
            (entry.granularity == LockGranularity::Row && entry.xid == xid && entry.rid == rid)
                .then_some(entry.lock_type)
        })
    }
}
