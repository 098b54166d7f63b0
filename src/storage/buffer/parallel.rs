use std::path::Path;
use std::sync::Arc;
use parking_lot::Mutex;

use crate::common::types::{PageId, PagePtr};
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::instance::BufferPoolInstance;
use crate::storage::disk::DiskManager;

/// A K-way sharded buffer pool. Each per-page operation routes to the
/// instance at `page_id mod K`; since every instance allocates only ids
/// congruent to its own index, any page a caller can name routes back to
/// the instance that owns it. Each instance carries its own latch, so
/// shards contend independently.
pub struct ParallelBufferPoolManager {
    instances: Vec<Arc<BufferPoolInstance>>,
    next_instance: Mutex<usize>,
}

impl ParallelBufferPoolManager {
    /// Build `num_instances` shards of `pool_size` frames each over one
    /// database file.
    pub fn new(
        num_instances: usize,
        pool_size: usize,
        db_path: impl AsRef<Path>,
    ) -> Result<Self, BufferPoolError> {
        assert!(num_instances > 0, "a pool needs at least one instance");
        let disk_manager = Arc::new(DiskManager::new(db_path)?);

        let instances = (0..num_instances)
            .map(|instance_index| {
                Arc::new(BufferPoolInstance::with_sharding(
                    pool_size,
                    num_instances,
                    instance_index,
                    disk_manager.clone(),
                ))
            })
            .collect();

        Ok(Self {
            instances,
            next_instance: Mutex::new(0),
        })
    }

    /// Total frame count across all instances.
    pub fn get_pool_size(&self) -> usize {
        self.instances.iter().map(|i| i.pool_size()).sum()
    }

    pub fn num_instances(&self) -> usize {
        self.instances.len()
    }

    fn instance_for(&self, page_id: PageId) -> &BufferPoolInstance {
        &self.instances[page_id as usize % self.instances.len()]
    }

    /// Allocate a page from some instance, round-robin. Starting at the
    /// cursor, each instance gets one try; the cursor advances by one per
    /// call whether or not any instance had room.
    pub fn new_page(&self) -> Result<(PagePtr, PageId), BufferPoolError> {
        let mut cursor = self.next_instance.lock();
        let start = *cursor;
        *cursor = (*cursor + 1) % self.instances.len();

        for offset in 0..self.instances.len() {
            let index = (start + offset) % self.instances.len();
            match self.instances[index].new_page() {
                Ok(created) => return Ok(created),
                Err(BufferPoolError::PoolExhausted) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(BufferPoolError::PoolExhausted)
    }

    pub fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        if page_id < 0 {
            return Err(BufferPoolError::InvalidPageId(page_id));
        }
        self.instance_for(page_id).fetch_page(page_id)
    }

    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        if page_id < 0 {
            return true;
        }
        self.instance_for(page_id).unpin_page(page_id, is_dirty)
    }

    pub fn flush_page(&self, page_id: PageId) -> bool {
        if page_id < 0 {
            return false;
        }
        self.instance_for(page_id).flush_page(page_id)
    }

    pub fn delete_page(&self, page_id: PageId) -> bool {
        if page_id < 0 {
            return true;
        }
        self.instance_for(page_id).delete_page(page_id)
    }

    pub fn flush_all_pages(&self) {
        for instance in &self.instances {
            instance.flush_all_pages();
        }
    }
}
