use std::sync::Arc;
use parking_lot::RwLock;

/// Page size in bytes (4KB)
pub const PAGE_SIZE: usize = 4096;

/// Page ID type. Non-negative ids name pages on disk; -1 is reserved.
pub type PageId = i32;

/// Reserved id for a frame that holds no page.
pub const INVALID_PAGE_ID: PageId = -1;

/// Buffer pool frame ID type
pub type FrameId = usize;

/// Transaction ID type. Ids are assigned monotonically; a lower id means
/// an older transaction.
pub type TxnId = u32;

/// Record identifier: names one tuple as (page, slot).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rid {
    pub page_id: PageId,
    pub slot_num: u32,
}

impl Rid {
    pub fn new(page_id: PageId, slot_num: u32) -> Self {
        Self { page_id, slot_num }
    }
}

/// Page structure: a page-sized byte buffer plus its identity. Pin count and
/// dirty flag live in the owning frame, not here.
#[derive(Debug, Clone)]
pub struct Page {
    pub data: [u8; PAGE_SIZE],
    pub page_id: PageId,
}

impl Page {
    pub fn new(page_id: PageId) -> Self {
        Self {
            data: [0; PAGE_SIZE],
            page_id,
        }
    }

    /// Zero the payload.
    pub fn reset(&mut self) {
        self.data = [0; PAGE_SIZE];
    }
}

/// Smart pointer to a page. The RwLock doubles as the page latch: readers
/// take `.read()`, mutators take `.write()` while the page stays pinned.
pub type PagePtr = Arc<RwLock<Page>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_new_is_zeroed() {
        let page = Page::new(7);
        assert_eq!(page.page_id, 7);
        assert!(page.data.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_rid_equality() {
        assert_eq!(Rid::new(1, 2), Rid::new(1, 2));
        assert_ne!(Rid::new(1, 2), Rid::new(1, 3));
        assert_ne!(Rid::new(1, 2), Rid::new(2, 2));
    }
}
