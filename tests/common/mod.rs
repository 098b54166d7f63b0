use std::sync::Arc;
use anyhow::Result;
use tempfile::NamedTempFile;

use rilldb::storage::buffer::{BufferPoolInstance, ParallelBufferPoolManager};

// Create a temporary database file for testing
#[allow(dead_code)]
pub fn create_temp_db_file() -> Result<(NamedTempFile, String)> {
    let file = NamedTempFile::new()?;
    let path = file.path().to_str().unwrap().to_string();
    Ok((file, path))
}

// Create a single buffer pool instance over a temporary database
#[allow(dead_code)]
pub fn create_test_pool_instance(pool_size: usize) -> Result<(Arc<BufferPoolInstance>, NamedTempFile)> {
    let (file, path) = create_temp_db_file()?;
    let pool = Arc::new(BufferPoolInstance::new(pool_size, path)?);
    Ok((pool, file))
}

// Create a parallel buffer pool over a temporary database
#[allow(dead_code)]
pub fn create_test_parallel_pool(
    num_instances: usize,
    pool_size: usize,
) -> Result<(Arc<ParallelBufferPoolManager>, NamedTempFile)> {
    let (file, path) = create_temp_db_file()?;
    let pool = Arc::new(ParallelBufferPoolManager::new(num_instances, pool_size, path)?);
    Ok((pool, file))
}
