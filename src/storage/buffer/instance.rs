use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use log::debug;
use parking_lot::{Mutex, RwLock};

use crate::common::types::{FrameId, Page, PageId, PagePtr, INVALID_PAGE_ID};
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::replacer::LruReplacer;
use crate::storage::disk::DiskManager;

/// One frame: a cached page plus the metadata the pool keeps for it.
struct Frame {
    page: PagePtr,
    page_id: PageId,
    pin_count: u32,
    is_dirty: bool,
}

impl Frame {
    fn new() -> Self {
        Self {
            page: Arc::new(RwLock::new(Page::new(INVALID_PAGE_ID))),
            page_id: INVALID_PAGE_ID,
            pin_count: 0,
            is_dirty: false,
        }
    }

    fn reset(&mut self) {
        self.page_id = INVALID_PAGE_ID;
        self.pin_count = 0;
        self.is_dirty = false;
        let mut page = self.page.write();
        page.page_id = INVALID_PAGE_ID;
        page.reset();
    }
}

/// Everything the instance mutates, behind the single instance mutex.
struct PoolInner {
    frames: Vec<Frame>,
    page_table: HashMap<PageId, FrameId>,
    free_list: VecDeque<FrameId>,
    replacer: LruReplacer,
    next_page_id: PageId,
}

/// A fixed-size frame pool over one region of the page-id space.
///
/// Every operation holds the instance mutex for its whole duration, disk
/// I/O included, so operations on one instance are totally ordered. When
/// the instance is one of K shards, it only ever allocates page ids
/// congruent to its index modulo K.
pub struct BufferPoolInstance {
    pool_size: usize,
    num_instances: usize,
    instance_index: usize,
    disk_manager: Arc<DiskManager>,
    inner: Mutex<PoolInner>,
}

impl BufferPoolInstance {
    /// Create a standalone pool (a single shard) over its own database file.
    pub fn new(pool_size: usize, db_path: impl AsRef<Path>) -> Result<Self, BufferPoolError> {
        let disk_manager = Arc::new(DiskManager::new(db_path)?);
        Ok(Self::with_sharding(pool_size, 1, 0, disk_manager))
    }

    /// Create shard `instance_index` of `num_instances`, all sharing one
    /// disk manager.
    pub fn with_sharding(
        pool_size: usize,
        num_instances: usize,
        instance_index: usize,
        disk_manager: Arc<DiskManager>,
    ) -> Self {
        assert!(num_instances > 0, "a pool needs at least one instance");
        assert!(
            instance_index < num_instances,
            "instance index {} out of range for {} instances",
            instance_index,
            num_instances
        );

        let frames = (0..pool_size).map(|_| Frame::new()).collect();
        let free_list = (0..pool_size).collect();

        Self {
            pool_size,
            num_instances,
            instance_index,
            disk_manager,
            inner: Mutex::new(PoolInner {
                frames,
                page_table: HashMap::new(),
                free_list,
                replacer: LruReplacer::new(pool_size),
                next_page_id: instance_index as PageId,
            }),
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn instance_index(&self) -> usize {
        self.instance_index
    }

    /// Allocate a fresh page, pinned. Fails with `PoolExhausted` when every
    /// frame is pinned.
    pub fn new_page(&self) -> Result<(PagePtr, PageId), BufferPoolError> {
        let mut inner = self.inner.lock();

        let frame_id = self
            .find_replacement(&mut inner)?
            .ok_or(BufferPoolError::PoolExhausted)?;

        let page_id = self.allocate_page(&mut inner);

        let frame = &mut inner.frames[frame_id];
        frame.page_id = page_id;
        frame.pin_count = 1;
        frame.is_dirty = false;
        {
            let mut page = frame.page.write();
            page.page_id = page_id;
            page.reset();
        }
        let page_ptr = frame.page.clone();

        inner.page_table.insert(page_id, frame_id);
        inner.replacer.pin(frame_id);

        Ok((page_ptr, page_id))
    }

    /// Fetch a page, reading through to disk when it is not resident.
    /// Fails with `PoolExhausted` when it is not resident and every frame
    /// is pinned.
    pub fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        if page_id < 0 {
            return Err(BufferPoolError::InvalidPageId(page_id));
        }

        let mut inner = self.inner.lock();

        if let Some(&frame_id) = inner.page_table.get(&page_id) {
            let frame = &mut inner.frames[frame_id];
            frame.pin_count += 1;
            let page_ptr = frame.page.clone();
            inner.replacer.pin(frame_id);
            return Ok(page_ptr);
        }

        let frame_id = self
            .find_replacement(&mut inner)?
            .ok_or(BufferPoolError::PoolExhausted)?;

        let frame = &mut inner.frames[frame_id];
        {
            let mut page = frame.page.write();
            if let Err(e) = self.disk_manager.read_page(page_id, &mut page.data) {
                drop(page);
                frame.reset();
                inner.free_list.push_back(frame_id);
                return Err(e.into());
            }
            page.page_id = page_id;
        }
        frame.page_id = page_id;
        frame.pin_count = 1;
        frame.is_dirty = false;
        let page_ptr = frame.page.clone();

        inner.page_table.insert(page_id, frame_id);
        inner.replacer.pin(frame_id);

        Ok(page_ptr)
    }

    /// Drop one pin. `is_dirty` ORs into the frame's dirty flag; it never
    /// clears it. Returns true unless the page is resident with a zero pin
    /// count already (which it also tolerates), i.e. always true, matching
    /// the silent contract: unpinning a non-resident page is a no-op.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let mut inner = self.inner.lock();

        let frame_id = match inner.page_table.get(&page_id) {
            Some(&frame_id) => frame_id,
            None => return true,
        };

        let frame = &mut inner.frames[frame_id];
        if is_dirty {
            frame.is_dirty = true;
        }
        if frame.pin_count == 0 {
            return true;
        }
        frame.pin_count -= 1;
        if frame.pin_count == 0 {
            inner.replacer.unpin(frame_id);
        }
        true
    }

    /// Write a page back and clear its dirty flag. Returns false iff the
    /// page id is invalid or the page is not resident. Does not evict.
    pub fn flush_page(&self, page_id: PageId) -> bool {
        if page_id < 0 {
            return false;
        }
        let mut inner = self.inner.lock();

        let frame_id = match inner.page_table.get(&page_id) {
            Some(&frame_id) => frame_id,
            None => return false,
        };

        let frame = &mut inner.frames[frame_id];
        frame.is_dirty = false;
        let data = frame.page.read().data;
        if let Err(e) = self.disk_manager.write_page(page_id, &data) {
            log::error!("failed to flush page {}: {}", page_id, e);
            return false;
        }
        true
    }

    /// Write every resident page back unconditionally.
    pub fn flush_all_pages(&self) {
        let inner = self.inner.lock();
        for (&page_id, &frame_id) in inner.page_table.iter() {
            let data = inner.frames[frame_id].page.read().data;
            if let Err(e) = self.disk_manager.write_page(page_id, &data) {
                log::error!("failed to flush page {}: {}", page_id, e);
            }
        }
    }

    /// Deallocate a page. Returns true if the page was not resident or was
    /// freed; false if it is still pinned.
    pub fn delete_page(&self, page_id: PageId) -> bool {
        let mut inner = self.inner.lock();

        let frame_id = match inner.page_table.get(&page_id) {
            Some(&frame_id) => frame_id,
            None => return true,
        };

        if inner.frames[frame_id].pin_count > 0 {
            return false;
        }

        inner.page_table.remove(&page_id);
        inner.frames[frame_id].reset();
        inner.replacer.pin(frame_id);
        inner.free_list.push_back(frame_id);
        true
    }

    /// Pick a frame for reuse: free list first, then the LRU victim. A
    /// dirty victim is written back before its mapping is dropped. `None`
    /// means every frame is pinned.
    fn find_replacement(&self, inner: &mut PoolInner) -> Result<Option<FrameId>, BufferPoolError> {
        if let Some(frame_id) = inner.free_list.pop_front() {
            return Ok(Some(frame_id));
        }

        let frame_id = match inner.replacer.victim() {
            Some(frame_id) => frame_id,
            None => return Ok(None),
        };

        let frame = &mut inner.frames[frame_id];
        let old_page_id = frame.page_id;
        if frame.is_dirty {
            debug!(
                "evicting dirty page {} from frame {} of instance {}",
                old_page_id, frame_id, self.instance_index
            );
            let data = frame.page.read().data;
            self.disk_manager.write_page(old_page_id, &data)?;
            frame.is_dirty = false;
        }
        frame.pin_count = 0;
        if old_page_id != INVALID_PAGE_ID {
            inner.page_table.remove(&old_page_id);
        }
        Ok(Some(frame_id))
    }

    /// Hand out the next page id in this instance's partition of the id
    /// space: ids congruent to `instance_index` modulo `num_instances`.
    fn allocate_page(&self, inner: &mut PoolInner) -> PageId {
        let page_id = inner.next_page_id;
        inner.next_page_id += self.num_instances as PageId;
        debug_assert_eq!(
            page_id as usize % self.num_instances,
            self.instance_index,
            "allocated page id escapes this instance's partition"
        );
        page_id
    }
}
