use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::Arc;
use log::{debug, warn};
use parking_lot::RwLock;

use crate::common::types::{PageId, PagePtr};
use crate::index::hash::bucket_page::{default_bucket_capacity, HashBucketPage, HashBucketPageMut};
use crate::index::hash::codec::Storable;
use crate::index::hash::directory_page::{HashDirectoryPage, HashDirectoryPageMut, MAX_GLOBAL_DEPTH};
use crate::index::hash::error::HashIndexError;
use crate::storage::buffer::ParallelBufferPoolManager;

/// Equality comparator over keys.
pub type KeyComparator<K> = Box<dyn Fn(&K, &K) -> bool + Send + Sync>;

/// Hash function mapping a key to the 32-bit value whose low bits index the
/// directory.
pub type KeyHasher<K> = Box<dyn Fn(&K) -> u32 + Send + Sync>;

/// Comparator for keys with a usable `PartialEq`.
pub fn default_comparator<K: PartialEq + 'static>() -> KeyComparator<K> {
    Box::new(|a: &K, b: &K| a == b)
}

/// Hasher backed by the standard library's default hasher.
pub fn default_hasher<K: Hash + 'static>() -> KeyHasher<K> {
    Box::new(|key: &K| {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        hasher.finish() as u32
    })
}

/// Disk-resident extendible hash table mapping each key to a set of values,
/// with exact `(key, value)` duplicates rejected.
///
/// One directory page plus up to 2^9 bucket pages, all pinned through the
/// buffer pool. Two latch levels: the table latch (readers for point
/// operations, writer for structural change) above per-page latches (the
/// `RwLock` inside each fetched page).
pub struct ExtendibleHashTable<K, V> {
    buffer_pool: Arc<ParallelBufferPoolManager>,
    directory_page_id: PageId,
    bucket_capacity: usize,
    table_latch: RwLock<()>,
    comparator: KeyComparator<K>,
    hash_fn: KeyHasher<K>,
    _phantom: PhantomData<V>,
}

impl<K, V> ExtendibleHashTable<K, V>
where
    K: Storable + 'static,
    V: Storable + PartialEq,
{
    /// Create a table whose buckets hold as many slots as fit on a page.
    pub fn new(
        buffer_pool: Arc<ParallelBufferPoolManager>,
        comparator: KeyComparator<K>,
        hash_fn: KeyHasher<K>,
    ) -> Result<Self, HashIndexError> {
        let capacity = default_bucket_capacity::<K, V>();
        Self::with_bucket_capacity(buffer_pool, comparator, hash_fn, capacity)
    }

    /// Create a table with an explicit bucket slot count. Small capacities
    /// make split and merge behavior easy to exercise.
    pub fn with_bucket_capacity(
        buffer_pool: Arc<ParallelBufferPoolManager>,
        comparator: KeyComparator<K>,
        hash_fn: KeyHasher<K>,
        bucket_capacity: usize,
    ) -> Result<Self, HashIndexError> {
        // A freshly allocated page is zeroed, which is exactly an empty
        // bucket, so only the directory needs explicit initialization.
        let (_bucket_page, bucket_page_id) = buffer_pool.new_page()?;
        buffer_pool.unpin_page(bucket_page_id, false);

        let (dir_page, directory_page_id) = buffer_pool.new_page()?;
        {
            let mut guard = dir_page.write();
            let mut dir = HashDirectoryPageMut::new(&mut guard.data);
            dir.init(directory_page_id, bucket_page_id);
        }
        buffer_pool.unpin_page(directory_page_id, true);

        Ok(Self {
            buffer_pool,
            directory_page_id,
            bucket_capacity,
            table_latch: RwLock::new(()),
            comparator,
            hash_fn,
            _phantom: PhantomData,
        })
    }

    fn hash(&self, key: &K) -> u32 {
        (self.hash_fn)(key)
    }

    fn fetch_directory(&self) -> Result<PagePtr, HashIndexError> {
        Ok(self.buffer_pool.fetch_page(self.directory_page_id)?)
    }

    /// Look up every value stored under `key`.
    pub fn get(&self, key: &K) -> Result<Vec<V>, HashIndexError> {
        let _table = self.table_latch.read();

        let dir_page = self.fetch_directory()?;
        let bucket_page_id = {
            let guard = dir_page.read();
            let dir = HashDirectoryPage::new(&guard.data);
            let index = (self.hash(key) & dir.global_depth_mask()) as usize;
            dir.bucket_page_id(index)
        };

        let bucket_page = match self.buffer_pool.fetch_page(bucket_page_id) {
            Ok(page) => page,
            Err(e) => {
                self.buffer_pool.unpin_page(self.directory_page_id, false);
                return Err(e.into());
            }
        };
        let result = {
            let guard = bucket_page.read();
            let bucket = HashBucketPage::<K, V>::new(&guard.data, self.bucket_capacity);
            bucket.get_value(key, &*self.comparator)
        };

        self.buffer_pool.unpin_page(bucket_page_id, false);
        self.buffer_pool.unpin_page(self.directory_page_id, false);
        Ok(result)
    }

    /// Insert `(key, value)`. Returns false when the exact pair is present
    /// already, or when the target bucket sits at the maximum local depth
    /// and cannot split any further.
    pub fn insert(&self, key: &K, value: &V) -> Result<bool, HashIndexError> {
        {
            let _table = self.table_latch.read();

            let dir_page = self.fetch_directory()?;
            let bucket_page_id = {
                let guard = dir_page.read();
                let dir = HashDirectoryPage::new(&guard.data);
                let index = (self.hash(key) & dir.global_depth_mask()) as usize;
                dir.bucket_page_id(index)
            };

            let bucket_page = match self.buffer_pool.fetch_page(bucket_page_id) {
                Ok(page) => page,
                Err(e) => {
                    self.buffer_pool.unpin_page(self.directory_page_id, false);
                    return Err(e.into());
                }
            };

            let mut guard = bucket_page.write();
            let mut bucket = HashBucketPageMut::<K, V>::new(&mut guard.data, self.bucket_capacity);
            if !bucket.is_full() {
                let success = bucket.insert(key, value, &*self.comparator);
                drop(guard);
                self.buffer_pool.unpin_page(bucket_page_id, true);
                self.buffer_pool.unpin_page(self.directory_page_id, false);
                return Ok(success);
            }
            drop(guard);
            self.buffer_pool.unpin_page(bucket_page_id, false);
            self.buffer_pool.unpin_page(self.directory_page_id, false);
        }
        // Bucket is full: take the table writer latch and split.
        self.split_insert(key, value)
    }

    /// Split the key's bucket under the table writer latch, then retry the
    /// insert from scratch. Splitting repeats through the retry until the
    /// insert lands or the local depth cap refuses it.
    fn split_insert(&self, key: &K, value: &V) -> Result<bool, HashIndexError> {
        {
            let _table = self.table_latch.write();

            let dir_page = self.fetch_directory()?;
            let mut dir_guard = dir_page.write();
            let mut dir = HashDirectoryPageMut::new(&mut dir_guard.data);

            let split_index = (self.hash(key) & dir.global_depth_mask()) as usize;
            let split_depth = dir.local_depth(split_index);
            if split_depth >= MAX_GLOBAL_DEPTH {
                drop(dir_guard);
                self.buffer_pool.unpin_page(self.directory_page_id, false);
                return Ok(false);
            }

            if split_depth == dir.global_depth() {
                dir.incr_global_depth();
            }
            dir.incr_local_depth(split_index);

            // Both halves of the doubled range still point at the old
            // bucket, so the old index resolves its page either way.
            let split_page_id = dir.bucket_page_id(split_index);
            let new_depth = dir.local_depth(split_index);
            let image_index = dir.split_image_index(split_index);

            let (image_page, image_page_id) = match self.buffer_pool.new_page() {
                Ok(created) => created,
                Err(e) => {
                    drop(dir_guard);
                    self.buffer_pool.unpin_page(self.directory_page_id, false);
                    return Err(e.into());
                }
            };
            debug!(
                "splitting bucket {} into {} at local depth {}",
                split_page_id, image_page_id, new_depth
            );

            // Rewrite every slot whose low bits name the split or image
            // prefix; the two prefixes differ exactly in the new top bit.
            let mask = (1usize << new_depth) - 1;
            let split_prefix = split_index & mask;
            let image_prefix = image_index & mask;
            for i in 0..dir.size() {
                if i & mask == split_prefix {
                    dir.set_bucket_page_id(i, split_page_id);
                    dir.set_local_depth(i, new_depth);
                } else if i & mask == image_prefix {
                    dir.set_bucket_page_id(i, image_page_id);
                    dir.set_local_depth(i, new_depth);
                }
            }

            let split_page = match self.buffer_pool.fetch_page(split_page_id) {
                Ok(page) => page,
                Err(e) => {
                    drop(dir_guard);
                    self.buffer_pool.unpin_page(image_page_id, true);
                    self.buffer_pool.unpin_page(self.directory_page_id, true);
                    return Err(e.into());
                }
            };

            // Re-home every live entry of the old bucket under the new mask.
            {
                let mut split_guard = split_page.write();
                let mut image_guard = image_page.write();
                let mut split_bucket =
                    HashBucketPageMut::<K, V>::new(&mut split_guard.data, self.bucket_capacity);
                let mut image_bucket =
                    HashBucketPageMut::<K, V>::new(&mut image_guard.data, self.bucket_capacity);

                let global_mask = dir.global_depth_mask();
                for slot in 0..self.bucket_capacity {
                    if !split_bucket.is_readable(slot) {
                        continue;
                    }
                    let slot_key = split_bucket.key_at(slot);
                    let slot_value = split_bucket.value_at(slot);
                    let target = (self.hash(&slot_key) & global_mask) as usize;
                    if dir.bucket_page_id(target) == image_page_id {
                        image_bucket.insert(&slot_key, &slot_value, &*self.comparator);
                        split_bucket.remove_at(slot);
                    }
                }
            }

            drop(dir_guard);
            self.buffer_pool.unpin_page(split_page_id, true);
            self.buffer_pool.unpin_page(image_page_id, true);
            self.buffer_pool.unpin_page(self.directory_page_id, true);
        }
        self.insert(key, value)
    }

    /// Remove the exact `(key, value)` pair. An emptied bucket triggers a
    /// merge attempt with its split image.
    pub fn remove(&self, key: &K, value: &V) -> Result<bool, HashIndexError> {
        let success;
        let now_empty;
        {
            let _table = self.table_latch.read();

            let dir_page = self.fetch_directory()?;
            let bucket_page_id = {
                let guard = dir_page.read();
                let dir = HashDirectoryPage::new(&guard.data);
                let index = (self.hash(key) & dir.global_depth_mask()) as usize;
                dir.bucket_page_id(index)
            };

            let bucket_page = match self.buffer_pool.fetch_page(bucket_page_id) {
                Ok(page) => page,
                Err(e) => {
                    self.buffer_pool.unpin_page(self.directory_page_id, false);
                    return Err(e.into());
                }
            };

            {
                let mut guard = bucket_page.write();
                let mut bucket =
                    HashBucketPageMut::<K, V>::new(&mut guard.data, self.bucket_capacity);
                success = bucket.remove(key, value, &*self.comparator);
                now_empty = bucket.is_empty();
            }
            self.buffer_pool.unpin_page(bucket_page_id, true);
            self.buffer_pool.unpin_page(self.directory_page_id, false);
        }
        if now_empty {
            self.merge(key)?;
        }
        Ok(success)
    }

    /// Fold the key's (empty) bucket into its split image under the table
    /// writer latch, then shrink the directory as far as it will go. Bows
    /// out quietly when the preconditions no longer hold: depth zero,
    /// unequal image depth, or a concurrent insert refilled the bucket.
    fn merge(&self, key: &K) -> Result<(), HashIndexError> {
        let _table = self.table_latch.write();

        let dir_page = self.fetch_directory()?;
        let mut dir_guard = dir_page.write();
        let mut dir = HashDirectoryPageMut::new(&mut dir_guard.data);

        let target_index = (self.hash(key) & dir.global_depth_mask()) as usize;
        let target_page_id = dir.bucket_page_id(target_index);
        let local_depth = dir.local_depth(target_index);
        if local_depth == 0 {
            drop(dir_guard);
            self.buffer_pool.unpin_page(self.directory_page_id, false);
            return Ok(());
        }

        let image_index = dir.split_image_index(target_index);
        if local_depth != dir.local_depth(image_index) {
            drop(dir_guard);
            self.buffer_pool.unpin_page(self.directory_page_id, false);
            return Ok(());
        }

        let target_page = match self.buffer_pool.fetch_page(target_page_id) {
            Ok(page) => page,
            Err(e) => {
                drop(dir_guard);
                self.buffer_pool.unpin_page(self.directory_page_id, false);
                return Err(e.into());
            }
        };
        let target_empty = {
            let guard = target_page.read();
            let bucket = HashBucketPage::<K, V>::new(&guard.data, self.bucket_capacity);
            bucket.is_empty()
        };
        self.buffer_pool.unpin_page(target_page_id, false);
        if !target_empty {
            drop(dir_guard);
            self.buffer_pool.unpin_page(self.directory_page_id, false);
            return Ok(());
        }

        if !self.buffer_pool.delete_page(target_page_id) {
            warn!("emptied bucket page {} still pinned, skipping merge", target_page_id);
            drop(dir_guard);
            self.buffer_pool.unpin_page(self.directory_page_id, false);
            return Ok(());
        }
        debug!("merging bucket {} into its image", target_page_id);

        let image_page_id = dir.bucket_page_id(image_index);
        dir.set_bucket_page_id(target_index, image_page_id);
        dir.decr_local_depth(target_index);
        dir.decr_local_depth(image_index);
        let new_depth = dir.local_depth(target_index);

        for i in 0..dir.size() {
            let page_id = dir.bucket_page_id(i);
            if page_id == target_page_id || page_id == image_page_id {
                dir.set_bucket_page_id(i, image_page_id);
                dir.set_local_depth(i, new_depth);
            }
        }

        while dir.can_shrink() {
            dir.decr_global_depth();
        }

        drop(dir_guard);
        self.buffer_pool.unpin_page(self.directory_page_id, true);
        Ok(())
    }

    /// Current directory depth.
    pub fn global_depth(&self) -> Result<u32, HashIndexError> {
        let _table = self.table_latch.read();

        let dir_page = self.fetch_directory()?;
        let depth = {
            let guard = dir_page.read();
            HashDirectoryPage::new(&guard.data).global_depth()
        };
        self.buffer_pool.unpin_page(self.directory_page_id, false);
        Ok(depth)
    }

    /// Check the at-rest invariants: the directory's internal consistency,
    /// plus that every live entry hashes (under the current mask) to a slot
    /// naming the bucket that holds it.
    pub fn verify_integrity(&self) -> Result<(), HashIndexError> {
        let _table = self.table_latch.read();

        let dir_page = self.fetch_directory()?;
        let guard = dir_page.read();
        let dir = HashDirectoryPage::new(&guard.data);

        if let Err(message) = dir.verify_integrity() {
            drop(guard);
            self.buffer_pool.unpin_page(self.directory_page_id, false);
            return Err(HashIndexError::Integrity(message));
        }

        let mut checked: HashSet<PageId> = HashSet::new();
        for index in 0..dir.size() {
            let bucket_page_id = dir.bucket_page_id(index);
            if !checked.insert(bucket_page_id) {
                continue;
            }
            let bucket_page = match self.buffer_pool.fetch_page(bucket_page_id) {
                Ok(page) => page,
                Err(e) => {
                    drop(guard);
                    self.buffer_pool.unpin_page(self.directory_page_id, false);
                    return Err(e.into());
                }
            };
            let misplaced = {
                let bucket_guard = bucket_page.read();
                let bucket =
                    HashBucketPage::<K, V>::new(&bucket_guard.data, self.bucket_capacity);
                (0..self.bucket_capacity).find(|&slot| {
                    bucket.is_readable(slot) && {
                        let target =
                            (self.hash(&bucket.key_at(slot)) & dir.global_depth_mask()) as usize;
                        dir.bucket_page_id(target) != bucket_page_id
                    }
                })
            };
            self.buffer_pool.unpin_page(bucket_page_id, false);
            if let Some(slot) = misplaced {
                drop(guard);
                self.buffer_pool.unpin_page(self.directory_page_id, false);
                return Err(HashIndexError::Integrity(format!(
                    "entry in slot {} of bucket {} hashes to a different bucket",
                    slot, bucket_page_id
                )));
            }
        }

        drop(guard);
        self.buffer_pool.unpin_page(self.directory_page_id, false);
        Ok(())
    }
}
