use std::collections::{HashMap, HashSet};
use anyhow::Result;
use rand::prelude::*;

use rilldb::common::types::Rid;
use rilldb::index::hash::{default_comparator, default_hasher, ExtendibleHashTable, KeyHasher};

mod common;
use common::create_test_parallel_pool;

fn identity_hasher() -> KeyHasher<i32> {
    Box::new(|key: &i32| *key as u32)
}

#[test]
fn test_insert_and_get() -> Result<()> {
    let (pool, _temp_file) = create_test_parallel_pool(1, 10)?;
    let index: ExtendibleHashTable<i64, Rid> = ExtendibleHashTable::new(
        pool,
        default_comparator::<i64>(),
        default_hasher::<i64>(),
    )?;

    assert!(index.insert(&17, &Rid::new(1, 3))?);
    assert!(index.insert(&17, &Rid::new(1, 4))?);
    assert!(index.insert(&99, &Rid::new(2, 0))?);

    let mut hits = index.get(&17)?;
    hits.sort_by_key(|rid| (rid.page_id, rid.slot_num));
    assert_eq!(hits, vec![Rid::new(1, 3), Rid::new(1, 4)]);
    assert_eq!(index.get(&99)?, vec![Rid::new(2, 0)]);
    assert_eq!(index.get(&5)?, Vec::<Rid>::new());
    Ok(())
}

#[test]
fn test_duplicate_pair_rejected() -> Result<()> {
    let (pool, _temp_file) = create_test_parallel_pool(1, 10)?;
    let index: ExtendibleHashTable<i64, Rid> = ExtendibleHashTable::new(
        pool,
        default_comparator::<i64>(),
        default_hasher::<i64>(),
    )?;

    assert!(index.insert(&8, &Rid::new(3, 1))?);
    assert!(!index.insert(&8, &Rid::new(3, 1))?);
    assert_eq!(index.get(&8)?, vec![Rid::new(3, 1)]);
    index.verify_integrity()?;
    Ok(())
}

#[test]
fn test_remove_restores_absence() -> Result<()> {
    let (pool, _temp_file) = create_test_parallel_pool(1, 10)?;
    let index: ExtendibleHashTable<i64, Rid> = ExtendibleHashTable::new(
        pool,
        default_comparator::<i64>(),
        default_hasher::<i64>(),
    )?;

    let rid = Rid::new(4, 4);
    assert!(index.insert(&23, &rid)?);
    assert!(index.remove(&23, &rid)?);
    assert_eq!(index.get(&23)?, Vec::<Rid>::new());
    assert!(!index.remove(&23, &rid)?);

    // The pair can come back after removal
    assert!(index.insert(&23, &rid)?);
    assert_eq!(index.get(&23)?, vec![rid]);
    Ok(())
}

// Two-slot buckets with keys hashing to themselves: 1 and 2 fill the first
// bucket, 3 forces the first split (depth 0 -> 1), 5 forces the second
// (depth 1 -> 2). Splitting separates odd keys by their second bit, so the
// directory settles at global depth 2 with every key reachable.
#[test]
fn test_split_sequence_with_tiny_buckets() -> Result<()> {
    let (pool, _temp_file) = create_test_parallel_pool(1, 10)?;
    let index: ExtendibleHashTable<i32, i32> = ExtendibleHashTable::with_bucket_capacity(
        pool,
        default_comparator::<i32>(),
        identity_hasher(),
        2,
    )?;

    assert!(index.insert(&1, &1)?);
    assert!(index.insert(&2, &2)?);
    assert_eq!(index.global_depth()?, 0);

    assert!(index.insert(&3, &3)?);
    assert_eq!(index.global_depth()?, 1);

    assert!(index.insert(&4, &4)?);
    assert!(index.insert(&5, &5)?);
    assert_eq!(index.global_depth()?, 2);

    for key in 1..=5 {
        assert_eq!(index.get(&key)?, vec![key], "key {} lost", key);
    }
    index.verify_integrity()?;
    Ok(())
}

// Emptying buckets merges them back with their images and shrinks the
// directory step by step down to depth zero.
#[test]
fn test_merge_and_directory_shrink() -> Result<()> {
    let (pool, _temp_file) = create_test_parallel_pool(1, 10)?;
    let index: ExtendibleHashTable<i32, i32> = ExtendibleHashTable::with_bucket_capacity(
        pool,
        default_comparator::<i32>(),
        identity_hasher(),
        2,
    )?;

    for key in 1..=5 {
        assert!(index.insert(&key, &key)?);
    }
    assert_eq!(index.global_depth()?, 2);

    assert!(index.remove(&4, &4)?);
    assert!(index.remove(&5, &5)?);
    // Emptying {1, 5}'s bucket merges it with its same-depth image
    assert!(index.remove(&1, &1)?);
    assert_eq!(index.global_depth()?, 1);
    index.verify_integrity()?;

    assert!(index.remove(&3, &3)?);
    assert_eq!(index.global_depth()?, 0);

    assert!(index.remove(&2, &2)?);
    for key in 1..=5 {
        assert_eq!(index.get(&key)?, Vec::<i32>::new());
    }
    index.verify_integrity()?;
    Ok(())
}

// Keys sharing their low nine bits can never be separated by splitting;
// once the bucket's local depth hits the cap, insert reports no room.
#[test]
fn test_capacity_cap_at_max_depth() -> Result<()> {
    let (pool, _temp_file) = create_test_parallel_pool(1, 16)?;
    let index: ExtendibleHashTable<i32, i32> = ExtendibleHashTable::with_bucket_capacity(
        pool,
        default_comparator::<i32>(),
        identity_hasher(),
        2,
    )?;

    assert!(index.insert(&0, &0)?);
    assert!(index.insert(&512, &512)?);
    assert!(!index.insert(&1024, &1024)?);

    assert_eq!(index.global_depth()?, 9);
    assert_eq!(index.get(&0)?, vec![0]);
    assert_eq!(index.get(&512)?, vec![512]);
    assert_eq!(index.get(&1024)?, Vec::<i32>::new());
    index.verify_integrity()?;
    Ok(())
}

#[test]
fn test_randomized_workload_matches_model() -> Result<()> {
    let (pool, _temp_file) = create_test_parallel_pool(2, 10)?;
    let index: ExtendibleHashTable<i32, i32> = ExtendibleHashTable::with_bucket_capacity(
        pool,
        default_comparator::<i32>(),
        default_hasher::<i32>(),
        16,
    )?;

    let mut rng = StdRng::seed_from_u64(42);
    let mut model: HashSet<(i32, i32)> = HashSet::new();

    for _ in 0..400 {
        let key = rng.gen_range(0..500);
        let value = rng.gen_range(0..8);
        let fresh = model.insert((key, value));
        assert_eq!(index.insert(&key, &value)?, fresh);
    }
    index.verify_integrity()?;

    let mut by_key: HashMap<i32, Vec<i32>> = HashMap::new();
    for &(key, value) in &model {
        by_key.entry(key).or_default().push(value);
    }
    for (key, values) in by_key.iter_mut() {
        values.sort_unstable();
        let mut found = index.get(key)?;
        found.sort_unstable();
        assert_eq!(&found, values, "mismatch for key {}", key);
    }

    // Remove half of the pairs and re-check
    let mut pairs: Vec<(i32, i32)> = model.iter().copied().collect();
    pairs.sort_unstable();
    for (key, value) in pairs.iter().step_by(2) {
        assert!(index.remove(key, value)?);
        model.remove(&(*key, *value));
    }
    for (key, value) in pairs.iter() {
        let found = index.get(key)?;
        assert_eq!(
            found.contains(value),
            model.contains(&(*key, *value)),
            "mismatch for pair ({}, {})",
            key,
            value
        );
    }
    index.verify_integrity()?;
    assert!(index.global_depth()? <= 9);
    Ok(())
}

#[test]
fn test_index_pages_flow_through_small_pool() -> Result<()> {
    // A pool barely big enough forces index pages in and out of frames
    let (pool, _temp_file) = create_test_parallel_pool(1, 4)?;
    let index: ExtendibleHashTable<i32, i32> = ExtendibleHashTable::with_bucket_capacity(
        pool,
        default_comparator::<i32>(),
        identity_hasher(),
        4,
    )?;

    for key in 0..64 {
        assert!(index.insert(&key, &(key * 10))?);
    }
    for key in 0..64 {
        assert_eq!(index.get(&key)?, vec![key * 10]);
    }
    index.verify_integrity()?;
    Ok(())
}
