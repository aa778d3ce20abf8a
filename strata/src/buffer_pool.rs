//! Manages the buffer pool, a collection of in-memory frames that cache disk pages.

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex, RwLock};

use crate::disk::DiskManager;
use crate::{Page, PageId};

const BUFFER_POOL_SIZE: usize = 128;

/// A single frame in the buffer pool.
#[derive(Debug)]
struct Frame {
    page: RwLock<Page>,
    is_dirty: Mutex<bool>,
    pin_count: Mutex<u32>,
    recently_used: Mutex<bool>,
}

/// The buffer pool manager. Pages are addressed by `(file_id, page_no)`.
#[derive(Debug)]
pub struct BufferPoolManager {
    disk: Arc<DiskManager>,
    frames: Vec<Arc<Frame>>,
    page_table: RwLock<HashMap<PageId, usize>>,
    free_list: Mutex<Vec<usize>>,
    clock_hand: Mutex<usize>,
}

/// An RAII guard for a pinned page. Dropping the guard unpins the page;
/// taking a write lock marks it dirty. A guard must not be held across a
/// call that may need to evict this frame.
pub struct PageGuard<'a> {
    bpm: &'a BufferPoolManager,
    page_id: PageId,
    frame: Arc<Frame>,
}

impl<'a> PageGuard<'a> {
    pub fn read(&self) -> std::sync::RwLockReadGuard<'_, Page> {
        self.frame.page.read().unwrap()
    }

    pub fn write(&self) -> std::sync::RwLockWriteGuard<'_, Page> {
        *self.frame.is_dirty.lock().unwrap() = true;
        self.frame.page.write().unwrap()
    }
}

impl<'a> Drop for PageGuard<'a> {
    fn drop(&mut self) {
        self.bpm.unpin_page(self.page_id);
    }
}

impl BufferPoolManager {
    pub fn new(disk: Arc<DiskManager>) -> Self {
        let mut frames = Vec::with_capacity(BUFFER_POOL_SIZE);
        let mut free_list = Vec::with_capacity(BUFFER_POOL_SIZE);
        for i in 0..BUFFER_POOL_SIZE {
            frames.push(Arc::new(Frame {
                page: RwLock::new(Page::new(PageId {
                    file_id: -1,
                    page_no: -1,
                })),
                is_dirty: Mutex::new(false),
                pin_count: Mutex::new(0),
                recently_used: Mutex::new(false),
            }));
            free_list.push(i);
        }
        Self {
            disk,
            frames,
            page_table: RwLock::new(HashMap::new()),
            free_list: Mutex::new(free_list),
            clock_hand: Mutex::new(0),
        }
    }

    /// Fetches a page into the pool, pinning it.
    pub fn fetch_page(&self, page_id: PageId) -> io::Result<PageGuard<'_>> {
        // 1. Check if the page is already in the buffer pool.
        if let Some(&frame_index) = self.page_table.read().unwrap().get(&page_id) {
            let frame = self.frames[frame_index].clone();
            self.pin_frame(&frame);
            return Ok(PageGuard {
                bpm: self,
                page_id,
                frame,
            });
        }

        // 2. If not, find a free frame or evict one.
        let frame_index = self
            .find_victim_frame()
            .ok_or_else(|| io::Error::other("all pages are pinned"))?;
        let frame = self.frames[frame_index].clone();

        // 3. Write the old page out if the frame is dirty.
        self.evict_frame(frame_index)?;

        // 4. Read the new page from disk.
        let mut new_page = Page::new(page_id);
        self.disk
            .read_page(page_id.file_id, page_id.page_no, &mut new_page.data)?;

        // 5. Update frame content and metadata.
        {
            let mut page = frame.page.write().unwrap();
            *page = new_page;
            *frame.is_dirty.lock().unwrap() = false;
            self.pin_frame(&frame);
        }

        // 6. Update the page table.
        self.page_table
            .write()
            .unwrap()
            .insert(page_id, frame_index);
        Ok(PageGuard {
            bpm: self,
            page_id,
            frame,
        })
    }

    /// Installs a fresh zeroed page for `page_id` without reading from disk,
    /// pinning it and marking it dirty. The caller chose the page number.
    pub fn new_page(&self, page_id: PageId) -> io::Result<PageGuard<'_>> {
        let frame_index = self
            .find_victim_frame()
            .ok_or_else(|| io::Error::other("all pages are pinned"))?;
        let frame = self.frames[frame_index].clone();

        self.evict_frame(frame_index)?;

        {
            let mut page = frame.page.write().unwrap();
            *page = Page::new(page_id);
            *frame.is_dirty.lock().unwrap() = true;
            self.pin_frame(&frame);
        }

        self.page_table
            .write()
            .unwrap()
            .insert(page_id, frame_index);
        Ok(PageGuard {
            bpm: self,
            page_id,
            frame,
        })
    }

    fn pin_frame(&self, frame: &Arc<Frame>) {
        let mut pin_count = frame.pin_count.lock().unwrap();
        *pin_count += 1;
        *frame.recently_used.lock().unwrap() = true;
    }

    fn unpin_page(&self, page_id: PageId) {
        if let Some(&frame_index) = self.page_table.read().unwrap().get(&page_id) {
            let frame = &self.frames[frame_index];
            let mut pin_count = frame.pin_count.lock().unwrap();
            if *pin_count > 0 {
                *pin_count -= 1;
            }
        }
    }

    /// Detaches whatever page currently occupies `frame_index`, writing it
    /// out first if dirty.
    fn evict_frame(&self, frame_index: usize) -> io::Result<()> {
        let frame = &self.frames[frame_index];
        let old_page_id = {
            let page_table = self.page_table.read().unwrap();
            page_table
                .iter()
                .find(|&(_, &idx)| idx == frame_index)
                .map(|(&id, _)| id)
        };
        let Some(old_page_id) = old_page_id else {
            return Ok(());
        };

        let mut is_dirty = frame.is_dirty.lock().unwrap();
        if *is_dirty {
            let page = frame.page.read().unwrap();
            self.disk
                .write_page(old_page_id.file_id, old_page_id.page_no, &page.data)?;
            *is_dirty = false;
        }
        self.page_table.write().unwrap().remove(&old_page_id);
        Ok(())
    }

    pub fn flush_page(&self, page_id: PageId) -> io::Result<()> {
        if let Some(&frame_index) = self.page_table.read().unwrap().get(&page_id) {
            let frame = &self.frames[frame_index];
            let mut is_dirty = frame.is_dirty.lock().unwrap();
            if *is_dirty {
                let page = frame.page.read().unwrap();
                self.disk
                    .write_page(page_id.file_id, page_id.page_no, &page.data)?;
                *is_dirty = false;
            }
        }
        Ok(())
    }

    pub fn flush_all_pages(&self) -> io::Result<()> {
        let page_ids: Vec<PageId> = self.page_table.read().unwrap().keys().copied().collect();
        for page_id in page_ids {
            self.flush_page(page_id)?;
        }
        Ok(())
    }

    fn find_victim_frame(&self) -> Option<usize> {
        if let Some(frame_index) = self.free_list.lock().unwrap().pop() {
            return Some(frame_index);
        }

        let frame_count = self.frames.len();
        let mut clock_hand = self.clock_hand.lock().unwrap();
        // Two full passes: the first can clear second-chance bits, the second
        // can pick a victim.
        for _ in 0..(frame_count * 2) {
            let frame_index = *clock_hand;
            *clock_hand = (*clock_hand + 1) % frame_count;

            let frame = &self.frames[frame_index];
            let pin_count = frame.pin_count.lock().unwrap();

            if *pin_count == 0 {
                let mut recently_used = frame.recently_used.lock().unwrap();
                if *recently_used {
                    *recently_used = false;
                } else {
                    return Some(frame_index);
                }
            }
        }

        // All frames are pinned.
        None
    }
}
