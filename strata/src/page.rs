//! The slotted page layout.
//!
//! Header at offset 0, slot array growing up, record bodies growing down
//! from the end of the page. Deleted records keep their slot; deletion is a
//! tombstone byte plus an `xmax` stamp in the record header.

use crate::errors::StorageError;
use crate::record::{ColumnList, Record, RECORD_HEADER_SIZE};
use crate::{Cid, Lsn, PageId, Rid, SlotId, Xid, NULL_PAGE_ID, NULL_XID, PAGE_SIZE};

/// Fixed page header: `page_lsn`, `next_page_id`, `lower`, `upper`.
#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct PageHeader {
    pub page_lsn: Lsn,
    pub next_page_id: PageId,
    pub lower: u16,
    pub upper: u16,
}

/// One slot entry: where the record body starts and how long it is.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Slot {
    pub offset: u16,
    pub size: u16,
}

pub const PAGE_HEADER_SIZE: usize = std::mem::size_of::<PageHeader>();
pub const SLOT_SIZE: usize = std::mem::size_of::<Slot>();

/// The largest record an empty page can hold.
pub const MAX_RECORD_SIZE: usize = PAGE_SIZE - PAGE_HEADER_SIZE - SLOT_SIZE;

// Record header byte offsets used for in-place stamping.
const RECORD_DELETED_OFFSET: usize = 0;
const RECORD_XMAX_OFFSET: usize = 5;

/// One page worth of bytes. All slotted-page operations work directly on
/// the raw buffer; dirty tracking is the frame's job.
#[derive(Clone)]
pub struct Page {
    pub data: [u8; PAGE_SIZE],
}

impl Default for Page {
    fn default() -> Self {
        Self::new()
    }
}

impl Page {
    pub fn new() -> Self {
        Self {
            data: [0; PAGE_SIZE],
        }
    }

    /// Resets the page to an empty slotted page.
    pub fn init(&mut self) {
        self.write_header(&PageHeader {
            page_lsn: 0,
            next_page_id: NULL_PAGE_ID,
            lower: PAGE_HEADER_SIZE as u16,
            upper: PAGE_SIZE as u16,
        });
    }

    pub fn read_header(&self) -> PageHeader {
        unsafe { std::ptr::read_unaligned(self.data.as_ptr() as *const PageHeader) }
    }

    pub fn write_header(&mut self, header: &PageHeader) {
        unsafe {
            std::ptr::write_unaligned(self.data.as_mut_ptr() as *mut PageHeader, *header);
        }
    }

    pub fn page_lsn(&self) -> Lsn {
        self.read_header().page_lsn
    }

    pub fn set_page_lsn(&mut self, lsn: Lsn) {
        let mut header = self.read_header();
        header.page_lsn = lsn;
        self.write_header(&header);
    }

    pub fn next_page_id(&self) -> PageId {
        self.read_header().next_page_id
    }

    pub fn set_next_page_id(&mut self, page_id: PageId) {
        let mut header = self.read_header();
        header.next_page_id = page_id;
        self.write_header(&header);
    }

    pub fn lower(&self) -> u16 {
        self.read_header().lower
    }

    pub fn upper(&self) -> u16 {
        self.read_header().upper
    }

    pub fn record_count(&self) -> u16 {
        let lower = self.read_header().lower as usize;
        if lower < PAGE_HEADER_SIZE {
            return 0;
        }
        ((lower - PAGE_HEADER_SIZE) / SLOT_SIZE) as u16
    }

    /// Free bytes available for one more record plus its slot entry.
    pub fn free_space(&self) -> usize {
        let header = self.read_header();
        let (lower, upper) = (header.lower as usize, header.upper as usize);
        if upper < lower + SLOT_SIZE {
            return 0;
        }
        upper - lower - SLOT_SIZE
    }

    fn read_slot(&self, byte_offset: usize) -> Slot {
        unsafe {
            std::ptr::read_unaligned(self.data.as_ptr().add(byte_offset) as *const Slot)
        }
    }

    fn write_slot(&mut self, byte_offset: usize, slot: &Slot) {
        unsafe {
            std::ptr::write_unaligned(
                self.data.as_mut_ptr().add(byte_offset) as *mut Slot,
                *slot,
            );
        }
    }

    /// Reads and validates one slot entry.
    pub fn slot(&self, slot_id: SlotId) -> Result<Slot, StorageError> {
        let header = self.read_header();
        if header.lower > header.upper {
            return Err(StorageError::Corruption(format!(
                "page lower {} exceeds upper {}",
                header.lower, header.upper
            )));
        }
        let slot_offset = PAGE_HEADER_SIZE + slot_id as usize * SLOT_SIZE;
        if slot_offset + SLOT_SIZE > header.lower as usize {
            return Err(StorageError::Corruption(format!(
                "slot {} beyond slot array",
                slot_id
            )));
        }
        let slot = self.read_slot(slot_offset);
        let (offset, size) = (slot.offset as usize, slot.size as usize);
        if offset < header.lower as usize || offset + size > PAGE_SIZE {
            return Err(StorageError::Corruption(format!(
                "slot {} offset {} size {} outside page body",
                slot_id, offset, size
            )));
        }
        if size < RECORD_HEADER_SIZE {
            return Err(StorageError::Corruption(format!(
                "slot {} smaller than a record header",
                slot_id
            )));
        }
        Ok(slot)
    }

    /// Stamps `xmin`/`cid`, appends a slot, and writes the record body at
    /// the new `upper`. Returns `None` when the record does not fit.
    pub fn insert_record(
        &mut self,
        record: &mut Record,
        xid: Xid,
        cid: Cid,
    ) -> Option<SlotId> {
        record.header.xmin = xid;
        record.header.xmax = NULL_XID;
        record.header.cid = cid;
        record.header.deleted = false;
        let bytes = record.serialize();
        if bytes.len() > self.free_space() {
            return None;
        }

        let mut header = self.read_header();
        let slot_id = ((header.lower as usize - PAGE_HEADER_SIZE) / SLOT_SIZE) as SlotId;
        header.upper -= bytes.len() as u16;
        let offset = header.upper as usize;
        let slot_offset = header.lower as usize;
        header.lower += SLOT_SIZE as u16;
        self.write_header(&header);

        self.write_slot(
            slot_offset,
            &Slot {
                offset: offset as u16,
                size: bytes.len() as u16,
            },
        );
        self.data[offset..offset + bytes.len()].copy_from_slice(&bytes);
        Some(slot_id)
    }

    /// Tombstones a record in place and stamps the deleting transaction.
    pub fn delete_record(&mut self, slot_id: SlotId, xid: Xid) -> Result<(), StorageError> {
        let slot = self.slot(slot_id)?;
        let offset = slot.offset as usize;
        self.data[offset + RECORD_DELETED_OFFSET] = 1;
        self.data[offset + RECORD_XMAX_OFFSET..offset + RECORD_XMAX_OFFSET + 4]
            .copy_from_slice(&xid.to_be_bytes());
        Ok(())
    }

    /// Clears a tombstone and resets `xmax`, for rollback.
    pub fn undo_delete(&mut self, slot_id: SlotId) -> Result<(), StorageError> {
        let slot = self.slot(slot_id)?;
        let offset = slot.offset as usize;
        self.data[offset + RECORD_DELETED_OFFSET] = 0;
        self.data[offset + RECORD_XMAX_OFFSET..offset + RECORD_XMAX_OFFSET + 4]
            .copy_from_slice(&NULL_XID.to_be_bytes());
        Ok(())
    }

    /// Rewrites a record's bytes at its existing offset. The caller
    /// guarantees the size is unchanged; used by recovery.
    pub fn update_record_in_place(
        &mut self,
        bytes: &[u8],
        slot_id: SlotId,
    ) -> Result<(), StorageError> {
        let slot = self.slot(slot_id)?;
        let offset = slot.offset as usize;
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Reinstates a slot and record body exactly as logged.
    pub fn redo_insert(&mut self, slot_id: SlotId, bytes: &[u8], page_offset: u16) {
        let mut header = self.read_header();
        header.upper -= bytes.len() as u16;
        header.lower += SLOT_SIZE as u16;
        self.write_header(&header);

        let slot_offset = PAGE_HEADER_SIZE + slot_id as usize * SLOT_SIZE;
        self.write_slot(
            slot_offset,
            &Slot {
                offset: page_offset,
                size: bytes.len() as u16,
            },
        );
        let offset = page_offset as usize;
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    /// Deserializes the record at `rid`, stamping the rid on the result.
    pub fn get_record(&self, rid: Rid, columns: &ColumnList) -> Result<Record, StorageError> {
        let slot = self.slot(rid.slot_id)?;
        let (offset, size) = (slot.offset as usize, slot.size as usize);
        let mut record = Record::deserialize(&self.data[offset..offset + size], columns)?;
        record.set_rid(rid);
        Ok(record)
    }

    /// The raw serialized bytes of the record at `slot_id`, as logged by
    /// insert.
    pub fn raw_record(&self, slot_id: SlotId) -> Result<&[u8], StorageError> {
        let slot = self.slot(slot_id)?;
        let (offset, size) = (slot.offset as usize, slot.size as usize);
        Ok(&self.data[offset..offset + size])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Column, ColumnType, Value};

    fn columns() -> ColumnList {
        ColumnList::new(vec![
            Column::new("id", ColumnType::Int),
            Column::new("name", ColumnType::Varchar),
        ])
    }

    fn row(id: i32, name: &str) -> Record {
        Record::new(vec![Value::Int(id), Value::Varchar(name.to_string())])
    }

    #[test]
    fn insert_and_get_round_trip() {
        let mut page = Page::new();
        page.init();

        let slot_id = page.insert_record(&mut row(1, "olivine"), 7, 2).unwrap();
        assert_eq!(slot_id, 0);
        assert_eq!(page.record_count(), 1);

        let record = page
            .get_record(Rid::new(0, slot_id), &columns())
            .unwrap();
        assert_eq!(record.header.xmin, 7);
        assert_eq!(record.header.xmax, NULL_XID);
        assert_eq!(record.header.cid, 2);
        assert_eq!(record.value(0), Some(&Value::Int(1)));
        assert_eq!(record.rid(), Some(Rid::new(0, 0)));
    }

    #[test]
    fn delete_and_undo_delete_toggle_the_tombstone() {
        let mut page = Page::new();
        page.init();
        let slot_id = page.insert_record(&mut row(1, "a"), 3, 0).unwrap();

        page.delete_record(slot_id, 9).unwrap();
        let record = page.get_record(Rid::new(0, slot_id), &columns()).unwrap();
        assert!(record.header.deleted);
        assert_eq!(record.header.xmax, 9);

        page.undo_delete(slot_id).unwrap();
        let record = page.get_record(Rid::new(0, slot_id), &columns()).unwrap();
        assert!(!record.header.deleted);
        assert_eq!(record.header.xmax, NULL_XID);
    }

    #[test]
    fn exact_fit_succeeds_and_one_more_byte_fails() {
        let mut page = Page::new();
        page.init();

        let free = page.free_space();
        // Varchar payload: header + null flag + u32 length prefix + bytes.
        let payload = free - RECORD_HEADER_SIZE - 1 - 4;
        let mut exact = Record::new(vec![Value::Varchar("x".repeat(payload))]);
        assert!(page.insert_record(&mut exact, 1, 0).is_some());
        assert_eq!(page.free_space(), 0);

        let mut page = Page::new();
        page.init();
        let mut too_big = Record::new(vec![Value::Varchar("x".repeat(payload + 1))]);
        assert!(page.insert_record(&mut too_big, 1, 0).is_none());
    }

    #[test]
    fn slots_append_in_order_and_bodies_grow_down() {
        let mut page = Page::new();
        page.init();
        let s0 = page.insert_record(&mut row(1, "a"), 1, 0).unwrap();
        let s1 = page.insert_record(&mut row(2, "b"), 1, 0).unwrap();
        assert_eq!((s0, s1), (0, 1));

        let slot0 = page.slot(0).unwrap();
        let slot1 = page.slot(1).unwrap();
        assert!(slot1.offset < slot0.offset);
        assert!(page.upper() >= page.lower());
    }

    #[test]
    fn redo_insert_reinstates_logged_bytes() {
        let mut page = Page::new();
        page.init();
        let slot_id = page.insert_record(&mut row(5, "redo"), 2, 0).unwrap();
        let slot = page.slot(slot_id).unwrap();
        let bytes = page.raw_record(slot_id).unwrap().to_vec();

        let mut replayed = Page::new();
        replayed.init();
        replayed.redo_insert(slot_id, &bytes, slot.offset);

        let record = replayed
            .get_record(Rid::new(0, slot_id), &columns())
            .unwrap();
        assert_eq!(record.value(0), Some(&Value::Int(5)));
        assert_eq!(replayed.lower(), page.lower());
        assert_eq!(replayed.upper(), page.upper());
    }

    #[test]
    fn corrupt_slot_offset_is_rejected() {
        let mut page = Page::new();
        page.init();
        let slot_id = page.insert_record(&mut row(1, "z"), 1, 0).unwrap();

        let slot_offset = PAGE_HEADER_SIZE + slot_id as usize * SLOT_SIZE;
        page.write_slot(
            slot_offset,
            &Slot {
                offset: (PAGE_SIZE - 2) as u16,
                size: 64,
            },
        );
        assert!(matches!(
            page.get_record(Rid::new(0, slot_id), &columns()),
            Err(StorageError::Corruption(_))
        ));
    }
}
