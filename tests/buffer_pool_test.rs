use anyhow::Result;

use rilldb::storage::buffer::BufferPoolError;

mod common;
use common::create_test_pool_instance;

#[test]
fn test_new_page() -> Result<()> {
    let (pool, _temp_file) = create_test_pool_instance(10)?;

    let (page, page_id) = pool.new_page()?;

    // A standalone instance allocates ids from zero upwards
    assert_eq!(page_id, 0);
    {
        let page_guard = page.read();
        assert_eq!(page_guard.page_id, page_id);
        assert!(page_guard.data.iter().all(|&b| b == 0));
    }

    assert!(pool.unpin_page(page_id, false));
    Ok(())
}

#[test]
fn test_fetch_page() -> Result<()> {
    let (pool, _temp_file) = create_test_pool_instance(10)?;

    let (_, page_id) = pool.new_page()?;
    assert!(pool.unpin_page(page_id, false));

    let fetched = pool.fetch_page(page_id)?;
    {
        let page_guard = fetched.read();
        assert_eq!(page_guard.page_id, page_id);
    }

    assert!(pool.unpin_page(page_id, false));
    Ok(())
}

#[test]
fn test_fetch_invalid_page_id() -> Result<()> {
    let (pool, _temp_file) = create_test_pool_instance(10)?;
    assert!(matches!(
        pool.fetch_page(-1),
        Err(BufferPoolError::InvalidPageId(-1))
    ));
    Ok(())
}

#[test]
fn test_page_modification_survives_eviction() -> Result<()> {
    let (pool, _temp_file) = create_test_pool_instance(3)?;

    let (page, page_id) = pool.new_page()?;
    {
        let mut page_guard = page.write();
        let test_data = b"Test Data";
        page_guard.data[100..100 + test_data.len()].copy_from_slice(test_data);
    }
    assert!(pool.unpin_page(page_id, true));

    // Churn through enough pages to evict the modified one
    for _ in 0..3 {
        let (_, id) = pool.new_page()?;
        assert!(pool.unpin_page(id, false));
    }

    let fetched = pool.fetch_page(page_id)?;
    {
        let page_guard = fetched.read();
        assert_eq!(&page_guard.data[100..109], b"Test Data");
    }
    assert!(pool.unpin_page(page_id, false));
    Ok(())
}

// Pool of three frames: fill it, unpin one page, and the next allocation
// must evict exactly that page, which stays fetchable from disk afterwards.
#[test]
fn test_eviction_prefers_unpinned_page() -> Result<()> {
    let (pool, _temp_file) = create_test_pool_instance(3)?;

    let (_, p1) = pool.new_page()?;
    let (_, p2) = pool.new_page()?;
    let (_, p3) = pool.new_page()?;

    // Every frame pinned: no room for another page
    assert!(matches!(
        pool.new_page(),
        Err(BufferPoolError::PoolExhausted)
    ));

    assert!(pool.unpin_page(p1, false));
    let (_, p4) = pool.new_page()?;
    assert_eq!(p4, 3);

    // p1 was evicted; re-fetching it reads from disk
    assert!(pool.unpin_page(p4, false));
    let refetched = pool.fetch_page(p1)?;
    {
        let page_guard = refetched.read();
        assert_eq!(page_guard.page_id, p1);
    }
    assert!(pool.unpin_page(p1, false));

    assert!(pool.unpin_page(p2, false));
    assert!(pool.unpin_page(p3, false));
    Ok(())
}

#[test]
fn test_unpin_nonresident_page_is_silent() -> Result<()> {
    let (pool, _temp_file) = create_test_pool_instance(3)?;
    assert!(pool.unpin_page(12345, true));
    Ok(())
}

// unpin(dirty=true) must stick: a later unpin(dirty=false) cannot clear the
// flag, so the write still reaches disk on eviction.
#[test]
fn test_dirty_flag_is_sticky() -> Result<()> {
    let (pool, _temp_file) = create_test_pool_instance(3)?;

    let (page, page_id) = pool.new_page()?;
    {
        let mut page_guard = page.write();
        page_guard.data[0] = 0x5A;
    }
    assert!(pool.unpin_page(page_id, true));

    // Second pin/unpin pair, this time claiming the page is clean
    let _again = pool.fetch_page(page_id)?;
    assert!(pool.unpin_page(page_id, false));

    // Evict it and read it back
    for _ in 0..3 {
        let (_, id) = pool.new_page()?;
        assert!(pool.unpin_page(id, false));
    }
    let fetched = pool.fetch_page(page_id)?;
    assert_eq!(fetched.read().data[0], 0x5A);
    assert!(pool.unpin_page(page_id, false));
    Ok(())
}

#[test]
fn test_flush_page() -> Result<()> {
    let (pool, _temp_file) = create_test_pool_instance(10)?;

    let (page, page_id) = pool.new_page()?;
    {
        let mut page_guard = page.write();
        let test_data = b"Test Data For Flushing";
        page_guard.data[100..100 + test_data.len()].copy_from_slice(test_data);
    }
    assert!(pool.unpin_page(page_id, true));
    assert!(pool.flush_page(page_id));

    // Flushing a page that was never brought in fails silently
    assert!(!pool.flush_page(9999));
    assert!(!pool.flush_page(-1));

    let fetched = pool.fetch_page(page_id)?;
    {
        let page_guard = fetched.read();
        assert_eq!(&page_guard.data[100..122], b"Test Data For Flushing");
    }
    assert!(pool.unpin_page(page_id, false));
    Ok(())
}

#[test]
fn test_flush_all_pages() -> Result<()> {
    let (file, path) = common::create_temp_db_file()?;
    let pool = rilldb::storage::buffer::BufferPoolInstance::new(10, &path)?;

    let mut page_ids = Vec::new();
    for i in 0..5 {
        let (page, page_id) = pool.new_page()?;
        {
            let mut page_guard = page.write();
            let test_data = format!("Test Data {}", i).into_bytes();
            page_guard.data[100..100 + test_data.len()].copy_from_slice(&test_data);
        }
        assert!(pool.unpin_page(page_id, true));
        page_ids.push(page_id);
    }

    pool.flush_all_pages();
    drop(pool);

    // A fresh pool over the same file sees the flushed bytes
    let reopened = rilldb::storage::buffer::BufferPoolInstance::new(10, &path)?;
    for (i, &page_id) in page_ids.iter().enumerate() {
        let fetched = reopened.fetch_page(page_id)?;
        {
            let page_guard = fetched.read();
            let expected = format!("Test Data {}", i).into_bytes();
            assert_eq!(&page_guard.data[100..100 + expected.len()], &expected[..]);
        }
        assert!(reopened.unpin_page(page_id, false));
    }
    drop(file);
    Ok(())
}

#[test]
fn test_delete_page() -> Result<()> {
    let (pool, _temp_file) = create_test_pool_instance(10)?;

    let (_, page_id) = pool.new_page()?;

    // Still pinned: refuse
    assert!(!pool.delete_page(page_id));

    assert!(pool.unpin_page(page_id, false));
    assert!(pool.delete_page(page_id));

    // Not resident any more: silently fine
    assert!(pool.delete_page(page_id));

    // The freed frame is reusable
    let (_, new_page_id) = pool.new_page()?;
    assert!(pool.unpin_page(new_page_id, false));
    Ok(())
}

#[test]
fn test_pin_counting_across_fetches() -> Result<()> {
    let (pool, _temp_file) = create_test_pool_instance(10)?;

    let (_, page_id) = pool.new_page()?;
    let _second_pin = pool.fetch_page(page_id)?;

    // Two pins outstanding: one unpin is not enough to free it
    assert!(pool.unpin_page(page_id, false));
    assert!(!pool.delete_page(page_id));

    assert!(pool.unpin_page(page_id, false));
    assert!(pool.delete_page(page_id));

    // Unpinning beyond zero is tolerated
    assert!(pool.unpin_page(page_id, false));
    Ok(())
}
