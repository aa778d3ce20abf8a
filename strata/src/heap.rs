//! Slotted-record heap files.
//!
//! A heap file is `[file_hdr_page | data_page_1 | data_page_2 | ...]`.
//! Page 0 holds the file header; every data page is
//! `[page_hdr | bitmap | slot_0 | slot_1 | ... | slot_{N-1}]` with bitmap
//! bit `i` set iff slot `i` holds a live record. Pages with free capacity
//! are threaded into a singly-linked free list headed in the file header.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use crate::buffer_pool::{BufferPoolManager, PageGuard};
use crate::disk::DiskManager;
use crate::errors::StorageError;
use crate::lock_manager::LockDataId;
use crate::log::{LogPayload, LogRecord};
use crate::transaction::{Context, WriteRecord};
use crate::{FileId, NO_PAGE, PAGE_SIZE, Page, PageId, PageNo, Rid, SlotNo};

/// On-disk file header, stored at offset 0 of page 0.
#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct HeapFileHeader {
    pub record_size: i32,

    pub num_pages: i32,

    pub first_free_page_no: i32,

    pub num_records_per_page: i32,

    pub bitmap_size: i32,
}

/// Per-data-page header, stored at offset 0 of each data page.
#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct HeapPageHeader {
    pub next_free_page_no: i32,

    pub num_records: i32,
}

const PAGE_HDR_SIZE: usize = std::mem::size_of::<HeapPageHeader>();

/// A materialized record: an owned copy of one slot's bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub data: Vec<u8>,
}

/// Bit-vector helpers over a byte slice. Bit `i` lives in byte `i / 8`.
pub mod bitmap {
    pub fn is_set(buf: &[u8], i: usize) -> bool {
        buf[i / 8] & (1 << (i % 8)) != 0
    }

    pub fn set(buf: &mut [u8], i: usize) {
        buf[i / 8] |= 1 << (i % 8);
    }

    pub fn reset(buf: &mut [u8], i: usize) {
        buf[i / 8] &= !(1 << (i % 8));
    }

    /// Lowest clear bit in `[0, n)`.
    pub fn first_clear(buf: &[u8], n: usize) -> Option<usize> {
        (0..n).find(|&i| !is_set(buf, i))
    }

    /// Lowest set bit in `[from, n)`.
    pub fn next_set(buf: &[u8], from: usize, n: usize) -> Option<usize> {
        (from..n).find(|&i| is_set(buf, i))
    }

    pub fn count_set(buf: &[u8], n: usize) -> usize {
        (0..n).filter(|&i| is_set(buf, i)).count()
    }
}

impl Page {
    pub(crate) fn heap_header(&self) -> HeapPageHeader {
        unsafe { std::ptr::read_unaligned(self.data.as_ptr() as *const HeapPageHeader) }
    }

    pub(crate) fn set_heap_header(&mut self, header: &HeapPageHeader) {
        unsafe {
            std::ptr::write_unaligned(self.data.as_mut_ptr() as *mut HeapPageHeader, *header);
        }
    }

    pub(crate) fn bitmap(&self, hdr: &HeapFileHeader) -> &[u8] {
        &self.data[PAGE_HDR_SIZE..PAGE_HDR_SIZE + hdr.bitmap_size as usize]
    }

    pub(crate) fn bitmap_mut(&mut self, hdr: &HeapFileHeader) -> &mut [u8] {
        &mut self.data[PAGE_HDR_SIZE..PAGE_HDR_SIZE + hdr.bitmap_size as usize]
    }

    pub(crate) fn slot(&self, hdr: &HeapFileHeader, slot_no: SlotNo) -> &[u8] {
        let start = PAGE_HDR_SIZE
            + hdr.bitmap_size as usize
            + slot_no as usize * hdr.record_size as usize;
        &self.data[start..start + hdr.record_size as usize]
    }

    pub(crate) fn slot_mut(&mut self, hdr: &HeapFileHeader, slot_no: SlotNo) -> &mut [u8] {
        let start = PAGE_HDR_SIZE
            + hdr.bitmap_size as usize
            + slot_no as usize * hdr.record_size as usize;
        &mut self.data[start..start + hdr.record_size as usize]
    }
}

/// A handle to one table's record file. All record-level operations go
/// through here; the file header is cached in memory and written back to
/// page 0 on `sync_header` and on drop.
#[derive(Debug)]
pub struct HeapFile {
    name: String,
    file_id: FileId,
    disk: Arc<DiskManager>,
    bpm: Arc<BufferPoolManager>,
    header: Mutex<HeapFileHeader>,
}

fn compute_layout(record_size: usize) -> Result<(i32, i32), StorageError> {
    let avail = PAGE_SIZE - PAGE_HDR_SIZE;
    let mut n = (avail * 8) / (record_size * 8 + 1);
    while n > 0 && PAGE_HDR_SIZE + n.div_ceil(8) + n * record_size > PAGE_SIZE {
        n -= 1;
    }
    if n == 0 {
        return Err(StorageError::Internal(format!(
            "record size {record_size} does not fit in a page"
        )));
    }
    Ok((n as i32, n.div_ceil(8) as i32))
}

impl HeapFile {
    /// Creates a fresh heap file: writes the header page and leaves the file
    /// with no data pages.
    pub fn create(
        name: &str,
        file_id: FileId,
        record_size: usize,
        disk: Arc<DiskManager>,
        bpm: Arc<BufferPoolManager>,
    ) -> Result<Self, StorageError> {
        let (num_records_per_page, bitmap_size) = compute_layout(record_size)?;
        let header = HeapFileHeader {
            record_size: record_size as i32,
            num_pages: 1,
            first_free_page_no: NO_PAGE,
            num_records_per_page,
            bitmap_size,
        };
        let file = Self {
            name: name.to_string(),
            file_id,
            disk,
            bpm,
            header: Mutex::new(header),
        };
        file.sync_header()?;
        crate::strata_debug_log!(
            "[HeapFile::create] '{name}' record_size={record_size} slots/page={num_records_per_page}"
        );
        Ok(file)
    }

    /// Opens an existing heap file by reading its header page.
    pub fn open(
        name: &str,
        file_id: FileId,
        disk: Arc<DiskManager>,
        bpm: Arc<BufferPoolManager>,
    ) -> Result<Self, StorageError> {
        let mut buf = [0u8; PAGE_SIZE];
        disk.read_page(file_id, 0, &mut buf)?;
        let header =
            unsafe { std::ptr::read_unaligned(buf.as_ptr() as *const HeapFileHeader) };
        if header.record_size <= 0 || header.num_pages < 1 {
            return Err(StorageError::Internal(format!(
                "heap file '{name}' has a corrupt header"
            )));
        }
        Ok(Self {
            name: name.to_string(),
            file_id,
            disk,
            bpm,
            header: Mutex::new(header),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn file_id(&self) -> FileId {
        self.file_id
    }

    pub fn record_size(&self) -> usize {
        self.header.lock().unwrap().record_size as usize
    }

    pub fn num_pages(&self) -> PageNo {
        self.header.lock().unwrap().num_pages
    }

    pub fn num_records_per_page(&self) -> i32 {
        self.header.lock().unwrap().num_records_per_page
    }

    pub fn first_free_page_no(&self) -> PageNo {
        self.header.lock().unwrap().first_free_page_no
    }

    pub(crate) fn header_snapshot(&self) -> HeapFileHeader {
        *self.header.lock().unwrap()
    }

    /// Writes the cached file header back to page 0.
    pub fn sync_header(&self) -> Result<(), StorageError> {
        let header = *self.header.lock().unwrap();
        let mut buf = [0u8; PAGE_SIZE];
        unsafe {
            std::ptr::write_unaligned(buf.as_mut_ptr() as *mut HeapFileHeader, header);
        }
        self.disk.write_page(self.file_id, 0, &buf)?;
        Ok(())
    }

    fn page_guard(&self, page_no: PageNo) -> Result<PageGuard<'_>, StorageError> {
        Ok(self.bpm.fetch_page(PageId {
            file_id: self.file_id,
            page_no,
        })?)
    }

    /// Validates that `rid` names an existing slot and that the slot holds a
    /// live record. The page guard is released before returning so that a
    /// caller about to wait on a record lock holds no page latch.
    fn probe_slot(&self, rid: Rid) -> Result<(), StorageError> {
        let hdr = self.header_snapshot();
        if rid.page_no < 1 || rid.page_no >= hdr.num_pages {
            return Err(StorageError::PageNotExist(rid.page_no));
        }
        if rid.slot_no < 0 || rid.slot_no >= hdr.num_records_per_page {
            return Err(StorageError::RecordNotFound(rid.page_no, rid.slot_no));
        }
        let guard = self.page_guard(rid.page_no)?;
        let page = guard.read();
        if !bitmap::is_set(page.bitmap(&hdr), rid.slot_no as usize) {
            return Err(StorageError::RecordNotFound(rid.page_no, rid.slot_no));
        }
        Ok(())
    }

    fn log_mutation(&self, ctx: &Context, payload: LogPayload) -> Result<(), StorageError> {
        let mut record = LogRecord::new(ctx.txn.id(), ctx.txn.prev_lsn(), payload);
        let lsn = ctx.log_manager.append(&mut record)?;
        ctx.txn.set_prev_lsn(lsn);
        Ok(())
    }

    /// Fetches the record stored at `rid`. Under a transaction this takes a
    /// shared lock on the record first.
    pub fn get_record(&self, rid: Rid, ctx: Option<&Context>) -> Result<Record, StorageError> {
        self.probe_slot(rid)?;
        if let Some(ctx) = ctx {
            ctx.lock_manager.lock_shared(
                ctx.txn,
                LockDataId {
                    file_id: self.file_id,
                    rid,
                },
            )?;
        }

        let hdr = self.header_snapshot();
        let guard = self.page_guard(rid.page_no)?;
        let page = guard.read();
        // The record may have been deleted while we waited for the lock.
        if !bitmap::is_set(page.bitmap(&hdr), rid.slot_no as usize) {
            return Err(StorageError::RecordNotFound(rid.page_no, rid.slot_no));
        }
        Ok(Record {
            data: page.slot(&hdr, rid.slot_no).to_vec(),
        })
    }

    /// Inserts a record into the first free slot of the first non-full page,
    /// appending a new page when no page has capacity. Under a transaction
    /// this takes an exclusive lock on the new rid before the record bytes
    /// are written, and emits an INSERT log record.
    pub fn insert_record(&self, buf: &[u8], ctx: Option<&Context>) -> Result<Rid, StorageError> {
        {
            let hdr = self.header_snapshot();
            if buf.len() != hdr.record_size as usize {
                return Err(StorageError::Internal(format!(
                    "insert of {} bytes into '{}' (record size {})",
                    buf.len(),
                    self.name,
                    hdr.record_size
                )));
            }
        }

        // Reserve the slot first so the bitmap mutation and free-list relink
        // happen entirely under the header mutex; the record lock is awaited
        // with no latch held.
        let rid = self.reserve_slot()?;

        if let Some(ctx) = ctx {
            let locked = ctx.lock_manager.lock_exclusive(
                ctx.txn,
                LockDataId {
                    file_id: self.file_id,
                    rid,
                },
            );
            if let Err(e) = locked {
                self.release_slot(rid)?;
                return Err(e.into());
            }
        }

        {
            let hdr = self.header_snapshot();
            let guard = self.page_guard(rid.page_no)?;
            let mut page = guard.write();
            page.slot_mut(&hdr, rid.slot_no).copy_from_slice(buf);
        }

        if let Some(ctx) = ctx {
            self.log_mutation(
                ctx,
                LogPayload::Insert {
                    table: self.name.clone(),
                    rid,
                    record: buf.to_vec(),
                },
            )?;
            ctx.txn.append_write_record(WriteRecord::InsertRecord {
                table: self.name.clone(),
                rid,
            });
        }

        crate::strata_debug_log!("[HeapFile::insert_record] '{}' -> {rid:?}", self.name);
        Ok(rid)
    }

    /// Inserts a record at a caller-chosen position. Used by rollback and
    /// recovery; fails if the slot already holds a record.
    pub fn insert_record_at(&self, rid: Rid, buf: &[u8]) -> Result<(), StorageError> {
        let hdr = self.header.lock().unwrap();
        if rid.page_no < 1 || rid.page_no >= hdr.num_pages {
            return Err(StorageError::PageNotExist(rid.page_no));
        }
        if buf.len() != hdr.record_size as usize {
            return Err(StorageError::Internal(format!(
                "insert of {} bytes into '{}' (record size {})",
                buf.len(),
                self.name,
                hdr.record_size
            )));
        }
        let guard = self.page_guard(rid.page_no)?;
        let mut page = guard.write();
        if bitmap::is_set(page.bitmap(&hdr), rid.slot_no as usize) {
            return Err(StorageError::Internal(format!(
                "slot {:?} in '{}' is already occupied",
                rid, self.name
            )));
        }
        bitmap::set(page.bitmap_mut(&hdr), rid.slot_no as usize);
        let mut page_hdr = page.heap_header();
        page_hdr.num_records += 1;
        page.set_heap_header(&page_hdr);
        page.slot_mut(&hdr, rid.slot_no).copy_from_slice(buf);
        // Free-list membership is not adjusted here; a stale full page at the
        // list head is unlinked by the allocation path's sanity check.
        Ok(())
    }

    /// Deletes the record at `rid`: clears its bitmap bit and, iff the page
    /// just transitioned from full to non-full, relinks the page at the
    /// free-list head.
    pub fn delete_record(&self, rid: Rid, ctx: Option<&Context>) -> Result<(), StorageError> {
        self.probe_slot(rid)?;
        if let Some(ctx) = ctx {
            ctx.lock_manager.lock_exclusive(
                ctx.txn,
                LockDataId {
                    file_id: self.file_id,
                    rid,
                },
            )?;
        }

        let old = {
            let mut hdr = self.header.lock().unwrap();
            let guard = self.page_guard(rid.page_no)?;
            let mut page = guard.write();
            if !bitmap::is_set(page.bitmap(&hdr), rid.slot_no as usize) {
                return Err(StorageError::RecordNotFound(rid.page_no, rid.slot_no));
            }
            let old = page.slot(&hdr, rid.slot_no).to_vec();
            bitmap::reset(page.bitmap_mut(&hdr), rid.slot_no as usize);
            let mut page_hdr = page.heap_header();
            page_hdr.num_records -= 1;
            // Exactly the full -> non-full edge puts the page back on the
            // free list, so a page is linked at most once per delete.
            if page_hdr.num_records == hdr.num_records_per_page - 1 {
                page_hdr.next_free_page_no = hdr.first_free_page_no;
                hdr.first_free_page_no = rid.page_no;
            }
            page.set_heap_header(&page_hdr);
            old
        };

        if let Some(ctx) = ctx {
            self.log_mutation(
                ctx,
                LogPayload::Delete {
                    table: self.name.clone(),
                    rid,
                    record: old.clone(),
                },
            )?;
            ctx.txn.append_write_record(WriteRecord::DeleteRecord {
                table: self.name.clone(),
                rid,
                record: old,
            });
        }

        crate::strata_debug_log!("[HeapFile::delete_record] '{}' {rid:?}", self.name);
        Ok(())
    }

    /// Overwrites the record at `rid` in place. Record size is fixed.
    pub fn update_record(
        &self,
        rid: Rid,
        buf: &[u8],
        ctx: Option<&Context>,
    ) -> Result<(), StorageError> {
        self.probe_slot(rid)?;
        if let Some(ctx) = ctx {
            ctx.lock_manager.lock_exclusive(
                ctx.txn,
                LockDataId {
                    file_id: self.file_id,
                    rid,
                },
            )?;
        }

        let hdr = self.header_snapshot();
        if buf.len() != hdr.record_size as usize {
            return Err(StorageError::Internal(format!(
                "update of {} bytes in '{}' (record size {})",
                buf.len(),
                self.name,
                hdr.record_size
            )));
        }
        let before = {
            let guard = self.page_guard(rid.page_no)?;
            let mut page = guard.write();
            if !bitmap::is_set(page.bitmap(&hdr), rid.slot_no as usize) {
                return Err(StorageError::RecordNotFound(rid.page_no, rid.slot_no));
            }
            let before = page.slot(&hdr, rid.slot_no).to_vec();
            page.slot_mut(&hdr, rid.slot_no).copy_from_slice(buf);
            before
        };

        if let Some(ctx) = ctx {
            self.log_mutation(
                ctx,
                LogPayload::Update {
                    table: self.name.clone(),
                    rid,
                    before: before.clone(),
                    after: buf.to_vec(),
                },
            )?;
            ctx.txn.append_write_record(WriteRecord::UpdateRecord {
                table: self.name.clone(),
                rid,
                before,
            });
        }

        Ok(())
    }

    /// Claims the first free slot of the first non-full page, appending a new
    /// page when the free list is empty. The bitmap bit is set and the page
    /// count bumped before returning; the caller writes the record bytes.
    fn reserve_slot(&self) -> Result<Rid, StorageError> {
        let mut hdr = self.header.lock().unwrap();
        loop {
            if hdr.first_free_page_no == NO_PAGE {
                let page_no = hdr.num_pages;
                let guard = self.bpm.new_page(PageId {
                    file_id: self.file_id,
                    page_no,
                })?;
                let mut page = guard.write();
                page.set_heap_header(&HeapPageHeader {
                    next_free_page_no: NO_PAGE,
                    num_records: 0,
                });
                hdr.num_pages += 1;
                hdr.first_free_page_no = page_no;
                crate::strata_debug_log!(
                    "[HeapFile::reserve_slot] '{}' appended page {page_no}",
                    self.name
                );
                continue;
            }

            let page_no = hdr.first_free_page_no;
            if page_no < 1 || page_no >= hdr.num_pages {
                return Err(StorageError::Internal(format!(
                    "free list of '{}' points at page {page_no}",
                    self.name
                )));
            }
            let guard = self.page_guard(page_no)?;
            let mut page = guard.write();
            let mut page_hdr = page.heap_header();
            if page_hdr.num_records == hdr.num_records_per_page {
                // A full page at the head is stale; unlink it and retry.
                hdr.first_free_page_no = page_hdr.next_free_page_no;
                continue;
            }

            let slot_no = bitmap::first_clear(page.bitmap(&hdr), hdr.num_records_per_page as usize)
                .ok_or_else(|| {
                    StorageError::Internal(format!(
                        "page {page_no} of '{}' reports capacity but its bitmap is full",
                        self.name
                    ))
                })?;
            bitmap::set(page.bitmap_mut(&hdr), slot_no);
            page_hdr.num_records += 1;
            if page_hdr.num_records == hdr.num_records_per_page {
                hdr.first_free_page_no = page_hdr.next_free_page_no;
            }
            page.set_heap_header(&page_hdr);
            return Ok(Rid {
                page_no,
                slot_no: slot_no as SlotNo,
            });
        }
    }

    /// Gives a reserved slot back: the inverse of `reserve_slot`, used when
    /// the record lock for a fresh insert cannot be granted.
    fn release_slot(&self, rid: Rid) -> Result<(), StorageError> {
        let mut hdr = self.header.lock().unwrap();
        let guard = self.page_guard(rid.page_no)?;
        let mut page = guard.write();
        bitmap::reset(page.bitmap_mut(&hdr), rid.slot_no as usize);
        let mut page_hdr = page.heap_header();
        page_hdr.num_records -= 1;
        if page_hdr.num_records == hdr.num_records_per_page - 1 {
            page_hdr.next_free_page_no = hdr.first_free_page_no;
            hdr.first_free_page_no = rid.page_no;
        }
        page.set_heap_header(&page_hdr);
        Ok(())
    }
}

impl Drop for HeapFile {
    fn drop(&mut self) {
        let _ = self.sync_header();
    }
}

/// Iterator over the live records of a heap file.
///
/// The cursor starts at `(1, -1)`; `new` advances it to the first set bit.
/// The scan holds one page guard at a time and drops it before moving to the
/// next page.
pub struct HeapScan {
    file: Arc<HeapFile>,
    rid: Rid,
}

impl HeapScan {
    pub fn new(file: Arc<HeapFile>) -> Result<Self, StorageError> {
        let mut scan = Self {
            file,
            rid: Rid {
                page_no: 1,
                slot_no: -1,
            },
        };
        scan.next()?;
        Ok(scan)
    }

    /// Advances the cursor to the next live record, or to the end state.
    pub fn next(&mut self) -> Result<(), StorageError> {
        let hdr = self.file.header_snapshot();
        while self.rid.page_no < hdr.num_pages {
            let guard = self.file.page_guard(self.rid.page_no)?;
            let page = guard.read();
            let from = (self.rid.slot_no + 1) as usize;
            if let Some(slot) =
                bitmap::next_set(page.bitmap(&hdr), from, hdr.num_records_per_page as usize)
            {
                self.rid.slot_no = slot as SlotNo;
                return Ok(());
            }
            self.rid.page_no += 1;
            self.rid.slot_no = -1;
        }
        self.rid = Rid {
            page_no: hdr.num_pages,
            slot_no: 0,
        };
        Ok(())
    }

    pub fn is_end(&self) -> bool {
        self.rid.page_no >= self.file.num_pages()
    }

    pub fn rid(&self) -> Rid {
        self.rid
    }
}

/// Process-wide registry of open heap files by table name. Rollback resolves
/// write-set entries through this.
#[derive(Debug, Default)]
pub struct HeapSet {
    files: RwLock<HashMap<String, Arc<HeapFile>>>,
}

impl HeapSet {
    pub fn insert(&self, file: Arc<HeapFile>) {
        self.files
            .write()
            .unwrap()
            .insert(file.name().to_string(), file);
    }

    pub fn get(&self, name: &str) -> Option<Arc<HeapFile>> {
        self.files.read().unwrap().get(name).cloned()
    }

    pub fn remove(&self, name: &str) -> Option<Arc<HeapFile>> {
        self.files.write().unwrap().remove(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{TempDir, tempdir};

    fn heap(record_size: usize) -> (TempDir, Arc<HeapFile>) {
        let dir = tempdir().unwrap();
        let disk = Arc::new(DiskManager::open(dir.path().join("test.log")).unwrap());
        let bpm = Arc::new(BufferPoolManager::new(disk.clone()));
        let file_id = disk.open_file(dir.path().join("t.tbl")).unwrap();
        let file = HeapFile::create("t", file_id, record_size, disk, bpm).unwrap();
        (dir, Arc::new(file))
    }

    fn rec(record_size: usize, fill: u8) -> Vec<u8> {
        vec![fill; record_size]
    }

    #[test]
    fn insert_then_get_round_trips() {
        let (_dir, file) = heap(16);
        let buf = rec(16, 7);
        let rid = file.insert_record(&buf, None).unwrap();
        assert_eq!(rid, Rid { page_no: 1, slot_no: 0 });
        assert_eq!(file.get_record(rid, None).unwrap().data, buf);
    }

    #[test]
    fn first_insert_creates_page_one() {
        let (_dir, file) = heap(16);
        assert_eq!(file.first_free_page_no(), NO_PAGE);
        file.insert_record(&rec(16, 1), None).unwrap();
        assert_eq!(file.num_pages(), 2);
        assert_eq!(file.first_free_page_no(), 1);
    }

    #[test]
    fn update_overwrites_in_place() {
        let (_dir, file) = heap(16);
        let rid = file.insert_record(&rec(16, 1), None).unwrap();
        file.update_record(rid, &rec(16, 2), None).unwrap();
        assert_eq!(file.get_record(rid, None).unwrap().data, rec(16, 2));
    }

    #[test]
    fn get_deleted_record_fails() {
        let (_dir, file) = heap(16);
        let rid = file.insert_record(&rec(16, 1), None).unwrap();
        file.delete_record(rid, None).unwrap();
        assert!(matches!(
            file.get_record(rid, None),
            Err(StorageError::RecordNotFound(1, 0))
        ));
    }

    #[test]
    fn get_out_of_range_page_fails() {
        let (_dir, file) = heap(16);
        file.insert_record(&rec(16, 1), None).unwrap();
        assert!(matches!(
            file.get_record(Rid { page_no: 9, slot_no: 0 }, None),
            Err(StorageError::PageNotExist(9))
        ));
    }

    #[test]
    fn delete_frees_slot_for_reuse() {
        let (_dir, file) = heap(16);
        let r0 = file.insert_record(&rec(16, 1), None).unwrap();
        let _r1 = file.insert_record(&rec(16, 2), None).unwrap();
        file.delete_record(r0, None).unwrap();
        // Page 1 is still the free-list head, so the freed slot is the
        // lowest clear bit and gets reused.
        let r2 = file.insert_record(&rec(16, 3), None).unwrap();
        assert_eq!(r2, r0);
    }

    #[test]
    fn insert_record_at_rejects_occupied_slot() {
        let (_dir, file) = heap(16);
        let rid = file.insert_record(&rec(16, 1), None).unwrap();
        assert!(matches!(
            file.insert_record_at(rid, &rec(16, 2)),
            Err(StorageError::Internal(_))
        ));
    }

    #[test]
    fn insert_record_at_restores_deleted_slot() {
        let (_dir, file) = heap(16);
        let rid = file.insert_record(&rec(16, 1), None).unwrap();
        file.delete_record(rid, None).unwrap();
        file.insert_record_at(rid, &rec(16, 9)).unwrap();
        assert_eq!(file.get_record(rid, None).unwrap().data, rec(16, 9));
    }

    // A record size of 2000 yields exactly two slots per 4096-byte page,
    // which makes the free-list edges easy to drive.
    const TWO_PER_PAGE: usize = 2000;

    #[test]
    fn filling_a_page_unlinks_it_and_next_insert_appends() {
        let (_dir, file) = heap(TWO_PER_PAGE);
        assert_eq!(file.num_records_per_page(), 2);
        let r1 = file.insert_record(&rec(TWO_PER_PAGE, 1), None).unwrap();
        let r2 = file.insert_record(&rec(TWO_PER_PAGE, 2), None).unwrap();
        assert_eq!((r1.page_no, r1.slot_no), (1, 0));
        assert_eq!((r2.page_no, r2.slot_no), (1, 1));
        assert_eq!(file.first_free_page_no(), NO_PAGE);

        let r3 = file.insert_record(&rec(TWO_PER_PAGE, 3), None).unwrap();
        assert_eq!((r3.page_no, r3.slot_no), (2, 0));
        assert_eq!(file.first_free_page_no(), 2);
    }

    #[test]
    fn delete_from_full_page_relinks_it_at_the_head() {
        let (_dir, file) = heap(TWO_PER_PAGE);
        let r1 = file.insert_record(&rec(TWO_PER_PAGE, 1), None).unwrap();
        let _r2 = file.insert_record(&rec(TWO_PER_PAGE, 2), None).unwrap();
        let _r3 = file.insert_record(&rec(TWO_PER_PAGE, 3), None).unwrap();

        file.delete_record(r1, None).unwrap();
        assert_eq!(file.first_free_page_no(), 1);

        // Next insert reuses the freed slot on page 1; the one after goes to
        // page 2's remaining slot.
        let r4 = file.insert_record(&rec(TWO_PER_PAGE, 4), None).unwrap();
        assert_eq!((r4.page_no, r4.slot_no), (1, 0));
        let r5 = file.insert_record(&rec(TWO_PER_PAGE, 5), None).unwrap();
        assert_eq!((r5.page_no, r5.slot_no), (2, 1));
    }

    #[test]
    fn page_record_counts_match_bitmap_popcount() {
        let (_dir, file) = heap(TWO_PER_PAGE);
        let mut rids = Vec::new();
        for i in 0..5 {
            rids.push(file.insert_record(&rec(TWO_PER_PAGE, i), None).unwrap());
        }
        file.delete_record(rids[1], None).unwrap();
        file.delete_record(rids[4], None).unwrap();

        let hdr = file.header_snapshot();
        for page_no in 1..hdr.num_pages {
            let guard = file.page_guard(page_no).unwrap();
            let page = guard.read();
            let count = bitmap::count_set(page.bitmap(&hdr), hdr.num_records_per_page as usize);
            assert_eq!(count as i32, page.heap_header().num_records);
        }
    }

    #[test]
    fn free_list_holds_each_nonfull_page_once() {
        let (_dir, file) = heap(TWO_PER_PAGE);
        let mut rids = Vec::new();
        for i in 0..6 {
            rids.push(file.insert_record(&rec(TWO_PER_PAGE, i), None).unwrap());
        }
        // Pages 1..=3 are full; empty out page 2 (two relink-eligible deletes,
        // only the first links it).
        file.delete_record(rids[2], None).unwrap();
        file.delete_record(rids[3], None).unwrap();
        file.delete_record(rids[0], None).unwrap();

        let hdr = file.header_snapshot();
        let mut seen = std::collections::HashSet::new();
        let mut page_no = hdr.first_free_page_no;
        while page_no != NO_PAGE {
            assert!(seen.insert(page_no), "page {page_no} linked twice");
            let guard = file.page_guard(page_no).unwrap();
            let next = guard.read().heap_header().next_free_page_no;
            page_no = next;
        }
        assert_eq!(seen, [1, 2].into_iter().collect());
    }

    #[test]
    fn scan_visits_each_live_record_once() {
        let (_dir, file) = heap(TWO_PER_PAGE);
        let mut rids = Vec::new();
        for i in 0..5 {
            rids.push(file.insert_record(&rec(TWO_PER_PAGE, i), None).unwrap());
        }
        file.delete_record(rids[1], None).unwrap();
        file.delete_record(rids[3], None).unwrap();

        let mut scan = HeapScan::new(file.clone()).unwrap();
        let mut visited = Vec::new();
        while !scan.is_end() {
            visited.push(scan.rid());
            scan.next().unwrap();
        }
        assert_eq!(visited, vec![rids[0], rids[2], rids[4]]);
    }

    #[test]
    fn scan_of_empty_file_is_immediately_at_end() {
        let (_dir, file) = heap(16);
        let scan = HeapScan::new(file.clone()).unwrap();
        assert!(scan.is_end());
    }

    #[test]
    fn header_survives_reopen() {
        let dir = tempdir().unwrap();
        let disk = Arc::new(DiskManager::open(dir.path().join("test.log")).unwrap());
        let bpm = Arc::new(BufferPoolManager::new(disk.clone()));
        let file_id = disk.open_file(dir.path().join("t.tbl")).unwrap();
        {
            let file =
                HeapFile::create("t", file_id, 16, disk.clone(), bpm.clone()).unwrap();
            file.insert_record(&rec(16, 1), None).unwrap();
            file.sync_header().unwrap();
        }
        let file = HeapFile::open("t", file_id, disk, bpm).unwrap();
        assert_eq!(file.record_size(), 16);
        assert_eq!(file.num_pages(), 2);
        assert_eq!(file.first_free_page_no(), 1);
    }
}
