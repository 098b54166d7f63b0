use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use log::debug;
use parking_lot::{Condvar, Mutex};

use crate::common::types::Rid;
use crate::transaction::concurrency::transaction::{
    IsolationLevel, Transaction, TransactionError, TransactionState,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

struct LockRequest {
    txn: Arc<Transaction>,
    mode: LockMode,
    granted: bool,
}

struct LockRequestQueue {
    requests: VecDeque<LockRequest>,
    cv: Arc<Condvar>,
}

impl Default for LockRequestQueue {
    fn default() -> Self {
        Self {
            requests: VecDeque::new(),
            cv: Arc::new(Condvar::new()),
        }
    }
}

/// Record-granularity two-phase lock manager with wound-wait deadlock
/// prevention: an older transaction never waits behind a younger conflicting
/// one; it aborts ("wounds") the youngster instead. Wounded waiters discover
/// the abort when they wake up, or on their next lock call.
///
/// One mutex orders every queue manipulation; each record's queue carries
/// its own condition variable, all waiting against that one mutex.
pub struct LockManager {
    lock_table: Mutex<HashMap<Rid, LockRequestQueue>>,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LockManager {
    pub fn new() -> Self {
        Self {
            lock_table: Mutex::new(HashMap::new()),
        }
    }

    /// Take a shared lock on `rid`. Returns Ok(false) when the transaction
    /// was already aborted (or is wounded while waiting); isolation-level
    /// violations abort the transaction and surface as typed errors.
    pub fn lock_shared(&self, txn: &Arc<Transaction>, rid: Rid) -> Result<bool, TransactionError> {
        if txn.state() == TransactionState::Aborted {
            return Ok(false);
        }
        // Read uncommitted never takes read locks; asking for one is a bug
        // in the caller's plan.
        if txn.isolation_level() == IsolationLevel::ReadUncommitted {
            txn.set_state(TransactionState::Aborted);
            return Err(TransactionError::LockSharedOnReadUncommitted(txn.id()));
        }
        if txn.state() == TransactionState::Shrinking
            && txn.isolation_level() == IsolationLevel::RepeatableRead
        {
            txn.set_state(TransactionState::Aborted);
            return Err(TransactionError::LockOnShrinking(txn.id()));
        }
        if txn.is_shared_locked(rid) {
            return Ok(true);
        }

        let mut table = self.lock_table.lock();
        table
            .entry(rid)
            .or_default()
            .requests
            .push_back(LockRequest {
                txn: Arc::clone(txn),
                mode: LockMode::Shared,
                granted: false,
            });
        txn.insert_shared(rid);

        loop {
            let queue = table.entry(rid).or_default();
            let (must_wait, wounded) = Self::evaluate_shared(queue, txn);
            if wounded {
                queue.cv.notify_all();
            }
            if !must_wait {
                break;
            }
            let cv = Arc::clone(&queue.cv);
            cv.wait(&mut table);
            if txn.state() == TransactionState::Aborted {
                return Ok(false);
            }
        }

        let queue = table.entry(rid).or_default();
        for request in queue.requests.iter_mut() {
            if request.txn.id() == txn.id() && txn.state() != TransactionState::Aborted {
                request.granted = true;
            }
        }
        txn.set_state(TransactionState::Growing);
        Ok(true)
    }

    /// Take an exclusive lock on `rid`. Same failure surface as
    /// `lock_shared`, except that shrinking aborts at every isolation level.
    pub fn lock_exclusive(
        &self,
        txn: &Arc<Transaction>,
        rid: Rid,
    ) -> Result<bool, TransactionError> {
        if txn.state() == TransactionState::Aborted {
            return Ok(false);
        }
        if txn.state() == TransactionState::Shrinking {
            txn.set_state(TransactionState::Aborted);
            return Err(TransactionError::LockOnShrinking(txn.id()));
        }
        if txn.is_exclusive_locked(rid) {
            return Ok(true);
        }

        let mut table = self.lock_table.lock();
        table
            .entry(rid)
            .or_default()
            .requests
            .push_back(LockRequest {
                txn: Arc::clone(txn),
                mode: LockMode::Exclusive,
                granted: false,
            });
        txn.insert_exclusive(rid);

        loop {
            let queue = table.entry(rid).or_default();
            let (must_wait, wounded) = Self::evaluate_exclusive(queue, txn);
            if wounded {
                queue.cv.notify_all();
            }
            if !must_wait {
                break;
            }
            let cv = Arc::clone(&queue.cv);
            cv.wait(&mut table);
            if txn.state() == TransactionState::Aborted {
                return Ok(false);
            }
        }

        let queue = table.entry(rid).or_default();
        for request in queue.requests.iter_mut() {
            if request.txn.id() == txn.id() && txn.state() != TransactionState::Aborted {
                request.granted = true;
            }
        }
        txn.set_state(TransactionState::Growing);
        Ok(true)
    }

    /// Upgrade an already-held shared lock to exclusive. The existing queued
    /// request keeps its place; the caller waits only for older holders
    /// ahead of it, wounding younger ones.
    pub fn lock_upgrade(
        &self,
        txn: &Arc<Transaction>,
        rid: Rid,
    ) -> Result<bool, TransactionError> {
        if txn.state() == TransactionState::Aborted {
            return Ok(false);
        }
        if txn.state() == TransactionState::Shrinking {
            txn.set_state(TransactionState::Aborted);
            return Err(TransactionError::LockOnShrinking(txn.id()));
        }
        if txn.is_exclusive_locked(rid) {
            return Ok(true);
        }
        if !txn.is_shared_locked(rid) {
            return Ok(false);
        }

        let mut table = self.lock_table.lock();
        loop {
            let queue = table.entry(rid).or_default();
            let (must_wait, wounded) = Self::evaluate_upgrade(queue, txn);
            if wounded {
                queue.cv.notify_all();
            }
            if !must_wait {
                break;
            }
            let cv = Arc::clone(&queue.cv);
            cv.wait(&mut table);
            if txn.state() == TransactionState::Aborted {
                return Ok(false);
            }
        }

        txn.remove_shared(rid);
        txn.insert_exclusive(rid);
        txn.set_state(TransactionState::Growing);
        Ok(true)
    }

    /// Release this transaction's lock on `rid`, wherever its request sits
    /// in the queue, and wake the waiters. Drives the growing-to-shrinking
    /// transition: on the first unlock under repeatable read, or on an
    /// exclusive unlock under the weaker levels (readers there may release
    /// early without closing the growing phase). Returns false when no
    /// request was queued.
    pub fn unlock(&self, txn: &Arc<Transaction>, rid: Rid) -> bool {
        if !txn.is_shared_locked(rid) && !txn.is_exclusive_locked(rid) {
            return true;
        }
        debug_assert!(
            !(txn.is_shared_locked(rid)
                && txn.isolation_level() == IsolationLevel::ReadUncommitted),
            "read uncommitted transactions never hold shared locks"
        );

        let mut table = self.lock_table.lock();
        let queue = table.entry(rid).or_default();
        let position = queue
            .requests
            .iter()
            .position(|request| request.txn.id() == txn.id());
        match position {
            Some(index) => {
                queue.requests.remove(index);
                queue.cv.notify_all();
            }
            None => return false,
        }

        if txn.isolation_level() == IsolationLevel::RepeatableRead
            && txn.state() == TransactionState::Growing
        {
            txn.set_state(TransactionState::Shrinking);
        }
        if txn.isolation_level() != IsolationLevel::RepeatableRead
            && txn.state() == TransactionState::Growing
            && txn.is_exclusive_locked(rid)
        {
            txn.set_state(TransactionState::Shrinking);
        }

        txn.remove_shared(rid);
        txn.remove_exclusive(rid);
        true
    }

    /// Wound-wait scan for a shared requester: younger exclusive requests
    /// ahead of it are wounded; older exclusive requests force a wait.
    fn evaluate_shared(queue: &LockRequestQueue, txn: &Arc<Transaction>) -> (bool, bool) {
        let mut must_wait = false;
        let mut wounded = false;
        for request in queue.requests.iter() {
            if request.txn.id() == txn.id() {
                break;
            }
            if request.txn.id() > txn.id() {
                if request.mode == LockMode::Exclusive
                    && request.txn.state() != TransactionState::Aborted
                {
                    debug!("txn {} wounds younger txn {}", txn.id(), request.txn.id());
                    request.txn.set_state(TransactionState::Aborted);
                    wounded = true;
                }
            } else if request.mode == LockMode::Exclusive {
                must_wait = true;
            }
        }
        (must_wait, wounded)
    }

    /// Wound-wait scan for an exclusive requester: every younger request
    /// ahead of it is wounded; every older one forces a wait.
    fn evaluate_exclusive(queue: &LockRequestQueue, txn: &Arc<Transaction>) -> (bool, bool) {
        let mut must_wait = false;
        let mut wounded = false;
        for request in queue.requests.iter() {
            if request.txn.id() == txn.id() {
                break;
            }
            if request.txn.id() > txn.id() {
                if request.txn.state() != TransactionState::Aborted {
                    debug!("txn {} wounds younger txn {}", txn.id(), request.txn.id());
                    request.txn.set_state(TransactionState::Aborted);
                    wounded = true;
                }
            } else {
                must_wait = true;
            }
        }
        (must_wait, wounded)
    }

    /// Scan for an upgrader: like the exclusive scan, but anchored at the
    /// transaction's existing request. A vanished request (released by a
    /// concurrent cleanup) upgrades without waiting.
    fn evaluate_upgrade(queue: &LockRequestQueue, txn: &Arc<Transaction>) -> (bool, bool) {
        let mut must_wait = false;
        let mut wounded = false;
        let mut request_found = false;
        for request in queue.requests.iter() {
            if request.txn.id() == txn.id() {
                request_found = true;
                break;
            }
            if request.txn.id() > txn.id() {
                if request.txn.state() != TransactionState::Aborted {
                    debug!("txn {} wounds younger txn {}", txn.id(), request.txn.id());
                    request.txn.set_state(TransactionState::Aborted);
                    wounded = true;
                }
            } else {
                must_wait = true;
            }
        }
        if !request_found {
            must_wait = false;
        }
        (must_wait, wounded)
    }
}
