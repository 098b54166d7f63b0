pub mod bucket_page;
pub mod codec;
pub mod directory_page;
pub mod error;
pub mod table;

pub use codec::Storable;
pub use error::HashIndexError;
pub use table::{default_comparator, default_hasher, ExtendibleHashTable, KeyComparator, KeyHasher};
