//! Log record layout, serialization, and redo/undo.
//!
//! A record on disk is a fixed header (`total_len`, `xid`, `prev_lsn`,
//! `crc`) followed by the bincode-encoded payload. The LSN is implicit: a
//! record with LSN `L` occupies bytes `[L, L + total_len)` of the log file.

use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::buffer_pool::BufferPool;
use crate::catalog::Catalog;
use crate::errors::StorageError;
use crate::{Lsn, Oid, PageId, SlotId, Xid, NULL_PAGE_ID};

/// Serialized size of the on-disk record header.
pub const LOG_HEADER_SIZE: usize = 20;

/// Upper bound on a serialized log record; `Rollback` and recovery read
/// this many bytes per record before deserializing.
pub const MAX_LOG_SIZE: usize = 2 * crate::PAGE_SIZE;

/// The kind-specific body of a log record.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum LogPayload {
    Begin,
    Commit,
    Rollback,
    /// A record was inserted; carries the raw bytes for redo.
    Insert {
        oid: Oid,
        page_id: PageId,
        slot_id: SlotId,
        offset: u16,
        size: u16,
        record_data: Vec<u8>,
    },
    /// A record was tombstoned.
    Delete {
        oid: Oid,
        page_id: PageId,
        slot_id: SlotId,
    },
    /// A heap page was allocated and linked after `prev_page_id`.
    NewPage {
        oid: Oid,
        prev_page_id: PageId,
        page_id: PageId,
    },
    BeginCheckpoint,
    /// Snapshot of the active transaction table and dirty page table.
    EndCheckpoint {
        att: HashMap<Xid, Lsn>,
        dpt: HashMap<(Oid, PageId), Lsn>,
    },
}

impl LogPayload {
    /// Whether this record mutates a heap page (drives ATT/DPT bookkeeping
    /// during analysis and redo).
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            LogPayload::Insert { .. } | LogPayload::Delete { .. } | LogPayload::NewPage { .. }
        )
    }

    /// The `(table_oid, page_id)` a mutation record touches.
    pub fn page_coordinates(&self) -> Option<(Oid, PageId)> {
        match self {
            LogPayload::Insert { oid, page_id, .. }
            | LogPayload::Delete { oid, page_id, .. }
            | LogPayload::NewPage { oid, page_id, .. } => Some((*oid, *page_id)),
            _ => None,
        }
    }

    /// Reapplies this record's effect to the page, stamping `lsn`.
    pub fn redo(
        &self,
        lsn: Lsn,
        xid: Xid,
        buffer_pool: &Arc<BufferPool>,
        catalog: &dyn Catalog,
    ) -> Result<(), StorageError> {
        match self {
            LogPayload::Insert {
                oid,
                page_id,
                slot_id,
                offset,
                record_data,
                ..
            } => {
                let db_oid = catalog.get_database_oid(*oid)?;
                let guard = buffer_pool.get_page(db_oid, *oid, *page_id)?;
                let mut page = guard.write();
                page.redo_insert(*slot_id, record_data, *offset);
                page.set_page_lsn(lsn);
            }
            LogPayload::Delete {
                oid,
                page_id,
                slot_id,
            } => {
                let db_oid = catalog.get_database_oid(*oid)?;
                let guard = buffer_pool.get_page(db_oid, *oid, *page_id)?;
                let mut page = guard.write();
                page.delete_record(*slot_id, xid)?;
                page.set_page_lsn(lsn);
            }
            LogPayload::NewPage {
                oid,
                prev_page_id,
                page_id,
            } => {
                let db_oid = catalog.get_database_oid(*oid)?;
                {
                    let guard = buffer_pool.new_page(db_oid, *oid, *page_id)?;
                    let mut page = guard.write();
                    page.init();
                    page.set_page_lsn(lsn);
                }
                if *prev_page_id != NULL_PAGE_ID {
                    let guard = buffer_pool.get_page(db_oid, *oid, *prev_page_id)?;
                    guard.write().set_next_page_id(*page_id);
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Reverses this record's effect during rollback.
    pub fn undo(
        &self,
        xid: Xid,
        buffer_pool: &Arc<BufferPool>,
        catalog: &dyn Catalog,
    ) -> Result<(), StorageError> {
        match self {
            LogPayload::Insert {
                oid,
                page_id,
                slot_id,
                ..
            } => {
                let db_oid = catalog.get_database_oid(*oid)?;
                let guard = buffer_pool.get_page(db_oid, *oid, *page_id)?;
                guard.write().delete_record(*slot_id, xid)?;
            }
            LogPayload::Delete {
                oid,
                page_id,
                slot_id,
            } => {
                let db_oid = catalog.get_database_oid(*oid)?;
                let guard = buffer_pool.get_page(db_oid, *oid, *page_id)?;
                guard.write().undo_delete(*slot_id)?;
            }
            // Undoing a page allocation leaves the page in place; the
            // records on it are undone individually.
            _ => {}
        }
        Ok(())
    }
}

/// One log record with its position and transaction chain links.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub lsn: Lsn,
    pub xid: Xid,
    pub prev_lsn: Lsn,
    pub payload: LogPayload,
}

impl LogRecord {
    /// Serialized size, header included. Stable for a given payload, so the
    /// LSN allocator can reserve the byte range before the record is
    /// flushed.
    pub fn size(payload: &LogPayload) -> usize {
        let body = bincode::serialized_size(payload)
            .expect("log payload serialization cannot fail") as usize;
        LOG_HEADER_SIZE + body
    }

    pub fn serialize(&self) -> Vec<u8> {
        let body = bincode::serialize(&self.payload)
            .expect("log payload serialization cannot fail");
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&body);
        let crc = hasher.finalize();

        let mut out = Vec::with_capacity(LOG_HEADER_SIZE + body.len());
        out.put_u32((LOG_HEADER_SIZE + body.len()) as u32);
        out.put_u32(self.xid);
        out.put_u64(self.prev_lsn);
        out.put_u32(crc);
        out.extend_from_slice(&body);
        out
    }

    /// Parses the record beginning at `lsn` from `buf`, which must hold at
    /// least the full record. Verifies the body CRC.
    pub fn deserialize(lsn: Lsn, buf: &[u8]) -> Result<Self, StorageError> {
        if buf.len() < LOG_HEADER_SIZE {
            return Err(StorageError::Corruption(format!(
                "log record at lsn {} truncated in header",
                lsn
            )));
        }
        let mut cursor = buf;
        let total_len = cursor.get_u32() as usize;
        let xid = cursor.get_u32();
        let prev_lsn = cursor.get_u64();
        let crc = cursor.get_u32();

        if total_len < LOG_HEADER_SIZE || total_len > buf.len() {
            return Err(StorageError::Corruption(format!(
                "log record at lsn {} has invalid length {}",
                lsn, total_len
            )));
        }
        let body = &buf[LOG_HEADER_SIZE..total_len];
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(body);
        if hasher.finalize() != crc {
            return Err(StorageError::Corruption(format!(
                "log record at lsn {} failed checksum",
                lsn
            )));
        }
        let payload = bincode::deserialize(body).map_err(|e| {
            StorageError::Corruption(format!("log record at lsn {}: {}", lsn, e))
        })?;
        Ok(Self {
            lsn,
            xid,
            prev_lsn,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NULL_LSN;

    #[test]
    fn size_matches_serialized_length() {
        let payloads = [
            LogPayload::Begin,
            LogPayload::Commit,
            LogPayload::Insert {
                oid: 3,
                page_id: 0,
                slot_id: 2,
                offset: 8000,
                size: 21,
                record_data: vec![1, 2, 3],
            },
            LogPayload::NewPage {
                oid: 3,
                prev_page_id: NULL_PAGE_ID,
                page_id: 0,
            },
            LogPayload::EndCheckpoint {
                att: [(4, 100)].into_iter().collect(),
                dpt: [((3, 0), 40)].into_iter().collect(),
            },
        ];
        for payload in payloads {
            let record = LogRecord {
                lsn: 0,
                xid: 4,
                prev_lsn: NULL_LSN,
                payload: payload.clone(),
            };
            assert_eq!(record.serialize().len(), LogRecord::size(&payload));
        }
    }

    #[test]
    fn serialize_deserialize_round_trip() {
        let record = LogRecord {
            lsn: 128,
            xid: 9,
            prev_lsn: 64,
            payload: LogPayload::Delete {
                oid: 7,
                page_id: 1,
                slot_id: 3,
            },
        };
        let bytes = record.serialize();
        let decoded = LogRecord::deserialize(128, &bytes).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn corrupted_body_fails_checksum() {
        let record = LogRecord {
            lsn: 0,
            xid: 1,
            prev_lsn: NULL_LSN,
            payload: LogPayload::Commit,
        };
        let mut bytes = record.serialize();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        assert!(matches!(
            LogRecord::deserialize(0, &bytes),
            Err(StorageError::Corruption(_))
        ));
    }
}
