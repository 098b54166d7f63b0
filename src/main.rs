use std::sync::Arc;
use anyhow::Result;

use rilldb::common::types::Rid;
use rilldb::index::hash::{default_comparator, default_hasher, ExtendibleHashTable};
use rilldb::storage::buffer::ParallelBufferPoolManager;
use rilldb::transaction::{IsolationLevel, LockManager, TransactionManager};

fn main() -> Result<()> {
    // Create a database file path
    let db_path = "database.db";

    // Create a 4-way parallel buffer pool with 64 frames per instance
    let buffer_pool = Arc::new(ParallelBufferPoolManager::new(4, 64, db_path)?);
    println!(
        "Buffer pool initialized: {} instances, {} frames total",
        buffer_pool.num_instances(),
        buffer_pool.get_pool_size()
    );

    // Example: create a page, write to it, and read it back
    let (page, page_id) = buffer_pool.new_page()?;
    println!("Created new page with ID: {}", page_id);
    {
        let mut page_guard = page.write();
        let greeting = b"hello, storage layer";
        page_guard.data[..greeting.len()].copy_from_slice(greeting);
    }
    buffer_pool.unpin_page(page_id, true);
    buffer_pool.flush_page(page_id);
    println!("Wrote and flushed page {}", page_id);

    let fetched = buffer_pool.fetch_page(page_id)?;
    {
        let page_guard = fetched.read();
        let prefix = &page_guard.data[..20];
        println!("Read back: {}", String::from_utf8_lossy(prefix));
    }
    buffer_pool.unpin_page(page_id, false);

    // Build an extendible hash index over the same pool
    let index: ExtendibleHashTable<i64, Rid> = ExtendibleHashTable::new(
        buffer_pool.clone(),
        default_comparator::<i64>(),
        default_hasher::<i64>(),
    )?;

    for key in 0..100i64 {
        index.insert(&key, &Rid::new(page_id, key as u32))?;
    }
    let hits = index.get(&42)?;
    println!(
        "Index holds {} entries for key 42 at global depth {}",
        hits.len(),
        index.global_depth()?
    );
    index.verify_integrity()?;
    println!("Index integrity verified");

    // Run two transactions through the lock manager
    let lock_manager = Arc::new(LockManager::new());
    let txn_manager = TransactionManager::new(lock_manager.clone());

    let reader = txn_manager.begin(IsolationLevel::RepeatableRead);
    let writer = txn_manager.begin(IsolationLevel::ReadCommitted);
    let rid = Rid::new(page_id, 0);

    if lock_manager.lock_shared(&reader, rid)? {
        println!("Transaction {} holds a shared lock on {:?}", reader.id(), rid);
    }
    // The younger writer would wait here; release the reader first.
    txn_manager.commit(&reader)?;
    if lock_manager.lock_exclusive(&writer, rid)? {
        println!(
            "Transaction {} holds an exclusive lock on {:?}",
            writer.id(),
            rid
        );
    }
    txn_manager.commit(&writer)?;
    println!("Both transactions committed");

    buffer_pool.flush_all_pages();
    Ok(())
}
