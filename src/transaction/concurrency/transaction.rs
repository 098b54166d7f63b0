use std::collections::HashSet;
use parking_lot::{Mutex, RwLock};
use thiserror::Error;

use crate::common::types::{Rid, TxnId};

/// Transaction isolation levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
}

/// Two-phase locking states. A transaction grows while it acquires locks,
/// shrinks once it starts releasing them, and ends committed or aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

/// Reasons the concurrency layer aborts or refuses a transaction.
#[derive(Error, Debug)]
pub enum TransactionError {
    #[error("Transaction {0} acquired a lock while shrinking")]
    LockOnShrinking(TxnId),

    #[error("Transaction {0} requested a shared lock under read uncommitted")]
    LockSharedOnReadUncommitted(TxnId),

    #[error("Transaction {0} rolled back after an unrecoverable lock failure")]
    Deadlock(TxnId),

    #[error("Transaction {0} is no longer active")]
    InvalidState(TxnId),
}

/// An active database transaction, as the lock manager sees it.
///
/// State and lock sets use interior mutability: the lock manager mutates
/// them while holding its own latch, and a wounding transaction flips
/// another transaction's state from a different thread.
pub struct Transaction {
    id: TxnId,
    isolation_level: IsolationLevel,
    state: RwLock<TransactionState>,
    shared_lock_set: Mutex<HashSet<Rid>>,
    exclusive_lock_set: Mutex<HashSet<Rid>>,
}

impl Transaction {
    pub fn new(id: TxnId, isolation_level: IsolationLevel) -> Self {
        Self {
            id,
            isolation_level,
            state: RwLock::new(TransactionState::Growing),
            shared_lock_set: Mutex::new(HashSet::new()),
            exclusive_lock_set: Mutex::new(HashSet::new()),
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    pub fn state(&self) -> TransactionState {
        *self.state.read()
    }

    pub fn set_state(&self, state: TransactionState) {
        *self.state.write() = state;
    }

    pub fn is_shared_locked(&self, rid: Rid) -> bool {
        self.shared_lock_set.lock().contains(&rid)
    }

    pub fn is_exclusive_locked(&self, rid: Rid) -> bool {
        self.exclusive_lock_set.lock().contains(&rid)
    }

    pub(crate) fn insert_shared(&self, rid: Rid) {
        self.shared_lock_set.lock().insert(rid);
    }

    pub(crate) fn insert_exclusive(&self, rid: Rid) {
        self.exclusive_lock_set.lock().insert(rid);
    }

    pub(crate) fn remove_shared(&self, rid: Rid) {
        self.shared_lock_set.lock().remove(&rid);
    }

    pub(crate) fn remove_exclusive(&self, rid: Rid) {
        self.exclusive_lock_set.lock().remove(&rid);
    }

    /// Every rid this transaction still holds a lock on, in no particular
    /// order. Used when releasing everything at commit or abort.
    pub fn locked_rids(&self) -> Vec<Rid> {
        let shared = self.shared_lock_set.lock();
        let exclusive = self.exclusive_lock_set.lock();
        shared.iter().chain(exclusive.iter()).copied().collect()
    }
}
