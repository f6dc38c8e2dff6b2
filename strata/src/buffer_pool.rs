//! The buffer pool: a fixed set of in-memory frames caching heap pages,
//! with LRU replacement and write-ahead-log enforcement on eviction.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::disk::Disk;
use crate::errors::StorageError;
use crate::wal::LogManager;
use crate::{Oid, Page, PageId};

/// Default number of frames in the pool.
pub const DEFAULT_POOL_SIZE: usize = 64;

/// The coordinates of a cached page.
pub type PageKey = (Oid, Oid, PageId);

/// LRU replacement over frame indices. The most recently accessed frame
/// sits at the front; victims come off the back.
#[derive(Debug, Default)]
pub struct LruReplacer {
    order: VecDeque<usize>,
}

impl LruReplacer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Notes an access: `frame_no` moves to the most-recent end and appears
    /// in the order exactly once.
    pub fn access(&mut self, frame_no: usize) {
        self.order.retain(|&f| f != frame_no);
        self.order.push_front(frame_no);
    }

    /// Removes and returns the least recently used frame.
    pub fn evict(&mut self) -> Option<usize> {
        self.order.pop_back()
    }

    /// Like `evict`, but only frames satisfying `evictable` are considered;
    /// the rest keep their position.
    pub fn evict_where(&mut self, evictable: impl Fn(usize) -> bool) -> Option<usize> {
        let pos = self.order.iter().rposition(|&f| evictable(f))?;
        self.order.remove(pos)
    }

    pub fn remove(&mut self, frame_no: usize) {
        self.order.retain(|&f| f != frame_no);
    }

    #[cfg(test)]
    fn snapshot(&self) -> Vec<usize> {
        self.order.iter().copied().collect()
    }
}

/// A single frame in the buffer pool.
struct Frame {
    page: RwLock<Page>,
    is_dirty: Mutex<bool>,
    pin_count: Mutex<u32>,
}

struct PoolInner {
    page_table: HashMap<PageKey, usize>,
    frame_keys: Vec<Option<PageKey>>,
    free_list: Vec<usize>,
    replacer: LruReplacer,
}

/// The buffer pool manager.
pub struct BufferPool {
    disk: Arc<Disk>,
    log_manager: Arc<LogManager>,
    frames: Vec<Arc<Frame>>,
    inner: Mutex<PoolInner>,
}

/// An RAII pin on a cached page. `write()` marks the frame dirty.
pub struct PageGuard<'a> {
    pool: &'a BufferPool,
    frame_no: usize,
    frame: Arc<Frame>,
}

impl<'a> std::fmt::Debug for PageGuard<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageGuard")
            .field("frame_no", &self.frame_no)
            .finish()
    }
}

impl<'a> PageGuard<'a> {
    pub fn read(&self) -> RwLockReadGuard<'_, Page> {
        self.frame.page.read().unwrap()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Page> {
        *self.frame.is_dirty.lock().unwrap() = true;
        self.frame.page.write().unwrap()
    }
}

impl<'a> Drop for PageGuard<'a> {
    fn drop(&mut self) {
        self.pool.unpin(self.frame_no);
    }
}

impl BufferPool {
    pub fn new(disk: Arc<Disk>, log_manager: Arc<LogManager>, pool_size: usize) -> Self {
        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = Vec::with_capacity(pool_size);
        for i in 0..pool_size {
            frames.push(Arc::new(Frame {
                page: RwLock::new(Page::new()),
                is_dirty: Mutex::new(false),
                pin_count: Mutex::new(0),
            }));
            free_list.push(i);
        }
        // Pop from the back hands out frame 0 first.
        free_list.reverse();
        Self {
            disk,
            log_manager,
            frames,
            inner: Mutex::new(PoolInner {
                page_table: HashMap::new(),
                frame_keys: vec![None; pool_size],
                free_list,
                replacer: LruReplacer::new(),
            }),
        }
    }

    /// Returns a pinned handle to the page, faulting it from disk on a miss
    /// and evicting a victim when the pool is full.
    pub fn get_page(
        &self,
        db_oid: Oid,
        table_oid: Oid,
        page_id: PageId,
    ) -> Result<PageGuard<'_>, StorageError> {
        let key = (db_oid, table_oid, page_id);
        let mut inner = self.inner.lock().unwrap();

        if let Some(&frame_no) = inner.page_table.get(&key) {
            inner.replacer.access(frame_no);
            drop(inner);
            return Ok(self.pin(frame_no));
        }

        let frame_no = self.take_victim(&mut inner)?;
        {
            let mut page = self.frames[frame_no].page.write().unwrap();
            self.disk
                .read_page(db_oid, table_oid, page_id, &mut page.data)?;
        }
        *self.frames[frame_no].is_dirty.lock().unwrap() = false;
        inner.page_table.insert(key, frame_no);
        inner.frame_keys[frame_no] = Some(key);
        inner.replacer.access(frame_no);
        drop(inner);
        Ok(self.pin(frame_no))
    }

    /// Returns a pinned handle to a fresh, zeroed page with the given id.
    /// The caller initializes the slotted layout.
    pub fn new_page(
        &self,
        db_oid: Oid,
        table_oid: Oid,
        page_id: PageId,
    ) -> Result<PageGuard<'_>, StorageError> {
        let key = (db_oid, table_oid, page_id);
        let mut inner = self.inner.lock().unwrap();

        let frame_no = if let Some(&frame_no) = inner.page_table.get(&key) {
            frame_no
        } else {
            let frame_no = self.take_victim(&mut inner)?;
            inner.page_table.insert(key, frame_no);
            inner.frame_keys[frame_no] = Some(key);
            frame_no
        };
        *self.frames[frame_no].page.write().unwrap() = Page::new();
        *self.frames[frame_no].is_dirty.lock().unwrap() = true;
        inner.replacer.access(frame_no);
        drop(inner);
        Ok(self.pin(frame_no))
    }

    /// Writes the page back if dirty, flushing the log through the page's
    /// LSN first.
    pub fn flush_page(
        &self,
        db_oid: Oid,
        table_oid: Oid,
        page_id: PageId,
    ) -> Result<(), StorageError> {
        let frame_no = {
            let inner = self.inner.lock().unwrap();
            match inner.page_table.get(&(db_oid, table_oid, page_id)) {
                Some(&frame_no) => frame_no,
                None => return Ok(()),
            }
        };
        self.write_back(frame_no, (db_oid, table_oid, page_id))
    }

    pub fn flush_all(&self) -> Result<(), StorageError> {
        let entries: Vec<(PageKey, usize)> = {
            let inner = self.inner.lock().unwrap();
            inner
                .page_table
                .iter()
                .map(|(&key, &frame_no)| (key, frame_no))
                .collect()
        };
        for (key, frame_no) in entries {
            self.write_back(frame_no, key)?;
        }
        Ok(())
    }

    fn write_back(&self, frame_no: usize, key: PageKey) -> Result<(), StorageError> {
        let frame = &self.frames[frame_no];
        let mut is_dirty = frame.is_dirty.lock().unwrap();
        if !*is_dirty {
            return Ok(());
        }
        let (db_oid, table_oid, page_id) = key;
        let page = frame.page.read().unwrap();
        // WAL rule: the log must cover this page before its bytes hit disk.
        self.log_manager
            .flush_page(table_oid, page_id, page.page_lsn())?;
        self.disk.write_page(db_oid, table_oid, page_id, &page.data)?;
        *is_dirty = false;
        Ok(())
    }

    fn take_victim(&self, inner: &mut PoolInner) -> Result<usize, StorageError> {
        if let Some(frame_no) = inner.free_list.pop() {
            return Ok(frame_no);
        }

        let frames = &self.frames;
        let victim = inner
            .replacer
            .evict_where(|f| *frames[f].pin_count.lock().unwrap() == 0)
            .ok_or(StorageError::PoolFull)?;

        if let Some(key) = inner.frame_keys[victim].take() {
            let frame = &self.frames[victim];
            let mut is_dirty = frame.is_dirty.lock().unwrap();
            if *is_dirty {
                let (db_oid, table_oid, page_id) = key;
                let page = frame.page.read().unwrap();
                crate::strata_debug_log!(
                    "[BufferPool] evicting dirty page {:?} (page_lsn {})",
                    key,
                    page.page_lsn()
                );
                self.log_manager
                    .flush_page(table_oid, page_id, page.page_lsn())?;
                self.disk.write_page(db_oid, table_oid, page_id, &page.data)?;
                *is_dirty = false;
            }
            inner.page_table.remove(&key);
        }
        Ok(victim)
    }

    fn pin(&self, frame_no: usize) -> PageGuard<'_> {
        let frame = self.frames[frame_no].clone();
        *frame.pin_count.lock().unwrap() += 1;
        PageGuard {
            pool: self,
            frame_no,
            frame,
        }
    }

    fn unpin(&self, frame_no: usize) {
        let mut pin_count = self.frames[frame_no].pin_count.lock().unwrap();
        if *pin_count > 0 {
            *pin_count -= 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn pool(size: usize) -> (tempfile::TempDir, Arc<BufferPool>) {
        let dir = tempdir().unwrap();
        let disk = Arc::new(Disk::open(dir.path()).unwrap());
        let log_manager = Arc::new(LogManager::new(disk.clone()).unwrap());
        (dir, Arc::new(BufferPool::new(disk, log_manager, size)))
    }

    #[test]
    fn lru_access_keeps_each_frame_once_at_most_recent_end() {
        let mut replacer = LruReplacer::new();
        replacer.access(0);
        replacer.access(1);
        replacer.access(2);
        replacer.access(0);
        assert_eq!(replacer.snapshot(), vec![0, 2, 1]);

        assert_eq!(replacer.evict(), Some(1));
        assert_eq!(replacer.evict(), Some(2));
        assert_eq!(replacer.evict(), Some(0));
        assert_eq!(replacer.evict(), None);
    }

    #[test]
    fn evicted_dirty_page_survives_a_refetch() {
        let (_dir, pool) = pool(2);

        {
            let guard = pool.new_page(1, 1, 0).unwrap();
            let mut page = guard.write();
            page.init();
            page.data[100] = 42;
        }
        // Two more pages force page 0 out of the two-frame pool.
        for page_id in 1..3 {
            let guard = pool.new_page(1, 1, page_id).unwrap();
            guard.write().init();
        }

        let guard = pool.get_page(1, 1, 0).unwrap();
        assert_eq!(guard.read().data[100], 42);
    }

    #[test]
    fn pool_full_when_every_frame_is_pinned() {
        let (_dir, pool) = pool(2);

        let _g0 = pool.new_page(1, 1, 0).unwrap();
        let _g1 = pool.new_page(1, 1, 1).unwrap();
        let err = pool.new_page(1, 1, 2).unwrap_err();
        assert!(matches!(err, StorageError::PoolFull));
    }

    #[test]
    fn unpinned_lru_page_is_the_victim() {
        let (_dir, pool) = pool(2);

        {
            let guard = pool.new_page(1, 1, 0).unwrap();
            guard.write().init();
        }
        let pinned = pool.new_page(1, 1, 1).unwrap();
        pinned.write().init();

        // Page 0 is unpinned and least recent; faulting page 2 must evict it
        // rather than fail on the pinned frame.
        let guard = pool.new_page(1, 1, 2).unwrap();
        guard.write().init();
        drop(guard);
        drop(pinned);

        let inner = pool.inner.lock().unwrap();
        assert!(!inner.page_table.contains_key(&(1, 1, 0)));
        assert!(inner.page_table.contains_key(&(1, 1, 1)));
        assert!(inner.page_table.contains_key(&(1, 1, 2)));
    }
}
