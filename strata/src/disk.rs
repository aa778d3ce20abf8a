use std::collections::HashMap;
use std::fs::{File, OpenOptions, create_dir_all};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicI32, Ordering};

use crate::{FileId, PAGE_SIZE, PageNo};

/// Owns the file descriptors of every open paged file plus the log file.
/// All page I/O and log I/O in the engine goes through here.
#[derive(Debug)]
pub struct DiskManager {
    files: Mutex<HashMap<FileId, File>>,
    next_file_id: AtomicI32,
    log_file: Mutex<File>,
}

impl DiskManager {
    /// Opens (creating if necessary) the log file and initializes the manager.
    pub fn open<P: AsRef<Path>>(log_path: P) -> io::Result<Self> {
        let log_path = log_path.as_ref();
        crate::strata_debug_log!("[DiskManager::open] Log file at: {log_path:?}");
        if let Some(parent) = log_path.parent() {
            create_dir_all(parent)?;
        }
        let log_file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(log_path)?;

        Ok(Self {
            files: Mutex::new(HashMap::new()),
            next_file_id: AtomicI32::new(0),
            log_file: Mutex::new(log_file),
        })
    }

    /// Opens a paged file, creating it if it does not exist, and registers it
    /// under a fresh `FileId`.
    pub fn open_file<P: AsRef<Path>>(&self, path: P) -> io::Result<FileId> {
        let path_ref = path.as_ref();
        if let Some(parent) = path_ref.parent() {
            create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path_ref)?;

        let file_id = self.next_file_id.fetch_add(1, Ordering::SeqCst);
        crate::strata_debug_log!("[DiskManager::open_file] {path_ref:?} -> file_id {file_id}");
        self.files.lock().unwrap().insert(file_id, file);
        Ok(file_id)
    }

    /// Closes a paged file and drops its descriptor.
    pub fn close_file(&self, file_id: FileId) {
        self.files.lock().unwrap().remove(&file_id);
    }

    /// Reads one page into `buf`. A page past the end of the file, or a short
    /// read, comes back zero-filled.
    pub fn read_page(
        &self,
        file_id: FileId,
        page_no: PageNo,
        buf: &mut [u8; PAGE_SIZE],
    ) -> io::Result<()> {
        let mut files = self.files.lock().unwrap();
        let file = files
            .get_mut(&file_id)
            .ok_or_else(|| io::Error::other(format!("file {file_id} is not open")))?;

        let offset = page_no as u64 * PAGE_SIZE as u64;
        file.seek(SeekFrom::Start(offset))?;
        let bytes_read = file.read(buf)?;
        if bytes_read < PAGE_SIZE {
            crate::strata_debug_log!(
                "[DiskManager::read_page] Read {bytes_read} bytes for page {page_no}, zeroing rest."
            );
            buf[bytes_read..].fill(0);
        }
        Ok(())
    }

    /// Writes one page and syncs it to stable storage.
    pub fn write_page(&self, file_id: FileId, page_no: PageNo, buf: &[u8]) -> io::Result<()> {
        let mut files = self.files.lock().unwrap();
        let file = files
            .get_mut(&file_id)
            .ok_or_else(|| io::Error::other(format!("file {file_id} is not open")))?;

        let offset = page_no as u64 * PAGE_SIZE as u64;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(buf)?;
        file.sync_all()?;
        Ok(())
    }

    /// Appends bytes to the log file and syncs them to stable storage.
    pub fn write_log(&self, buf: &[u8]) -> io::Result<()> {
        let mut log_file = self.log_file.lock().unwrap();
        log_file.write_all(buf)?;
        log_file.sync_all()?;
        Ok(())
    }

    /// Reads the whole log file back.
    pub fn read_log(&self) -> io::Result<Vec<u8>> {
        let mut log_file = self.log_file.lock().unwrap();
        log_file.seek(SeekFrom::Start(0))?;
        let mut buf = Vec::new();
        log_file.read_to_end(&mut buf)?;
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn page_round_trip() {
        let dir = tempdir().unwrap();
        let disk = DiskManager::open(dir.path().join("test.log")).unwrap();
        let file_id = disk.open_file(dir.path().join("test.tbl")).unwrap();

        let mut page = [0u8; PAGE_SIZE];
        page[0] = 0xAB;
        page[PAGE_SIZE - 1] = 0xCD;
        disk.write_page(file_id, 3, &page).unwrap();

        let mut read_back = [0u8; PAGE_SIZE];
        disk.read_page(file_id, 3, &mut read_back).unwrap();
        assert_eq!(read_back[0], 0xAB);
        assert_eq!(read_back[PAGE_SIZE - 1], 0xCD);
    }

    #[test]
    fn page_past_eof_reads_zeroed() {
        let dir = tempdir().unwrap();
        let disk = DiskManager::open(dir.path().join("test.log")).unwrap();
        let file_id = disk.open_file(dir.path().join("test.tbl")).unwrap();

        let mut buf = [0xFFu8; PAGE_SIZE];
        disk.read_page(file_id, 7, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn log_appends() {
        let dir = tempdir().unwrap();
        let disk = DiskManager::open(dir.path().join("test.log")).unwrap();
        disk.write_log(b"hello").unwrap();
        disk.write_log(b" world").unwrap();
        assert_eq!(disk.read_log().unwrap(), b"hello world");
    }
}
