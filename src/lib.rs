// Export public modules
pub mod common;
pub mod index;
pub mod storage;
pub mod transaction;

// Re-export key items for convenient access
pub use index::hash::ExtendibleHashTable;
pub use index::hash::HashIndexError;
pub use storage::buffer::BufferPoolError;
pub use storage::buffer::BufferPoolInstance;
pub use storage::buffer::ParallelBufferPoolManager;
pub use transaction::LockManager;
pub use transaction::TransactionManager;
