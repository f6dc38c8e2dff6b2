//! The disk layer: one heap file per table, the log file, and the two
//! ASCII control files recovery depends on.

use std::collections::HashMap;
use std::fs::{create_dir_all, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::{Lsn, Oid, PageId, FIRST_LSN, PAGE_SIZE};

/// File holding the LSN of the most recent begin-checkpoint record.
pub const MASTER_RECORD_NAME: &str = "MASTER_RECORD";

/// File holding the first unused LSN, i.e. `flushed_lsn + last_record_size`.
pub const NEXT_LSN_NAME: &str = "NEXT_LSN";

/// The log file, byte-addressed by LSN.
pub const LOG_NAME: &str = "caldera.log";

/// The disk manager. One instance per database directory.
///
/// Heap files are named `{db_oid}_{table_oid}.tbl` and hold a dense sequence
/// of `PAGE_SIZE` pages addressed by 0-based page id. The log file is a raw
/// byte stream: the record with LSN `L` starts exactly at offset `L`.
pub struct Disk {
    base_dir: PathBuf,
    heap_files: Mutex<HashMap<(Oid, Oid), File>>,
    log_file: Mutex<File>,
}

impl Disk {
    pub fn open<P: AsRef<Path>>(base_dir: P) -> io::Result<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        create_dir_all(&base_dir)?;
        crate::strata_debug_log!("[Disk::open] database directory: {base_dir:?}");

        let log_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(base_dir.join(LOG_NAME))?;

        Ok(Self {
            base_dir,
            heap_files: Mutex::new(HashMap::new()),
            log_file: Mutex::new(log_file),
        })
    }

    fn heap_path(&self, db_oid: Oid, table_oid: Oid) -> PathBuf {
        self.base_dir.join(format!("{}_{}.tbl", db_oid, table_oid))
    }

    fn with_heap_file<T>(
        &self,
        db_oid: Oid,
        table_oid: Oid,
        f: impl FnOnce(&mut File) -> io::Result<T>,
    ) -> io::Result<T> {
        let mut files = self.heap_files.lock().unwrap();
        if !files.contains_key(&(db_oid, table_oid)) {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(self.heap_path(db_oid, table_oid))?;
            files.insert((db_oid, table_oid), file);
        }
        f(files.get_mut(&(db_oid, table_oid)).unwrap())
    }

    /// Reads one page into `buf`. Pages never written come back zeroed, the
    /// same as a short read at the end of the file.
    pub fn read_page(
        &self,
        db_oid: Oid,
        table_oid: Oid,
        page_id: PageId,
        buf: &mut [u8; PAGE_SIZE],
    ) -> io::Result<()> {
        self.with_heap_file(db_oid, table_oid, |file| {
            let offset = page_id as u64 * PAGE_SIZE as u64;
            file.seek(SeekFrom::Start(offset))?;
            let mut read = 0;
            while read < PAGE_SIZE {
                match file.read(&mut buf[read..])? {
                    0 => break,
                    n => read += n,
                }
            }
            buf[read..].fill(0);
            Ok(())
        })
    }

    pub fn write_page(
        &self,
        db_oid: Oid,
        table_oid: Oid,
        page_id: PageId,
        data: &[u8; PAGE_SIZE],
    ) -> io::Result<()> {
        self.with_heap_file(db_oid, table_oid, |file| {
            let offset = page_id as u64 * PAGE_SIZE as u64;
            file.seek(SeekFrom::Start(offset))?;
            file.write_all(data)?;
            file.sync_all()
        })
    }

    /// Reads up to `count` log bytes starting at offset `lsn`. Returns the
    /// number of bytes actually read; the tail of `buf` is zeroed.
    pub fn read_log(&self, lsn: Lsn, count: usize, buf: &mut [u8]) -> io::Result<usize> {
        let mut file = self.log_file.lock().unwrap();
        file.seek(SeekFrom::Start(lsn))?;
        let limit = count.min(buf.len());
        let mut read = 0;
        while read < limit {
            match file.read(&mut buf[read..limit])? {
                0 => break,
                n => read += n,
            }
        }
        buf[read..].fill(0);
        Ok(read)
    }

    pub fn write_log(&self, lsn: Lsn, data: &[u8]) -> io::Result<()> {
        let mut file = self.log_file.lock().unwrap();
        file.seek(SeekFrom::Start(lsn))?;
        file.write_all(data)?;
        file.sync_all()
    }

    pub fn log_size(&self) -> io::Result<u64> {
        Ok(self.log_file.lock().unwrap().metadata()?.len())
    }

    pub fn file_exists(&self, name: &str) -> bool {
        self.base_dir.join(name).exists()
    }

    fn read_ascii_lsn(&self, name: &str) -> io::Result<Option<Lsn>> {
        let path = self.base_dir.join(name);
        if !path.exists() {
            return Ok(None);
        }
        let mut text = String::new();
        File::open(path)?.read_to_string(&mut text)?;
        text.trim()
            .parse::<Lsn>()
            .map(Some)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    fn write_ascii_lsn(&self, name: &str, lsn: Lsn) -> io::Result<()> {
        let path = self.base_dir.join(name);
        let mut file = File::create(path)?;
        write!(file, "{}", lsn)?;
        file.sync_all()
    }

    /// The LSN of the most recent begin-checkpoint record, if any.
    pub fn read_master_record(&self) -> io::Result<Option<Lsn>> {
        self.read_ascii_lsn(MASTER_RECORD_NAME)
    }

    pub fn write_master_record(&self, lsn: Lsn) -> io::Result<()> {
        self.write_ascii_lsn(MASTER_RECORD_NAME, lsn)
    }

    /// The first unused LSN as persisted by the last flush.
    pub fn read_next_lsn(&self) -> io::Result<Lsn> {
        Ok(self.read_ascii_lsn(NEXT_LSN_NAME)?.unwrap_or(FIRST_LSN))
    }

    pub fn write_next_lsn(&self, lsn: Lsn) -> io::Result<()> {
        self.write_ascii_lsn(NEXT_LSN_NAME, lsn)
    }
}
