//! Transactions and the transaction manager.
//!
//! A transaction is the context for a sequence of store operations issued
//! by one client session. Transaction IDs are assigned in creation order
//! and define the serialization order: a transaction may become dependent
//! on pending transactions with smaller IDs that touched the same keys,
//! and it cannot commit until each of those has reached a terminal state.
//! If any of them aborts, the dependent transaction aborts as well.
//!
//! The wake primitive is a counting semaphore: every dependency produces
//! exactly one permit when it reaches a terminal state, and [`commit`]
//! consumes one permit per outstanding dependency before deciding the
//! final status.
//!
//! Lock discipline: a transaction mutex is only ever taken while holding
//! the mutex of a transaction with a smaller ID (dependency edges always
//! point from higher to lower IDs, so this cannot cycle), and transaction
//! code never touches the store's map mutex.
//!
//! [`commit`]: Transaction::commit

use std::collections::HashMap;
use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use log::debug;
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use crate::error::Error;

/// Status of a transaction. `Pending` is the initial state; `Committed`
/// and `Aborted` are terminal and stable. The discriminants double as the
/// wire reply codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    Pending = 0,
    Committed = 1,
    Aborted = 2,
}

impl TryFrom<u8> for Status {
    type Error = Error;

    fn try_from(code: u8) -> Result<Self, Error> {
        match code {
            0 => Ok(Status::Pending),
            1 => Ok(Status::Committed),
            2 => Ok(Status::Aborted),
            other => Err(Error::InvalidData(format!("unknown status code {}", other))),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Pending => write!(f, "pending"),
            Status::Committed => write!(f, "committed"),
            Status::Aborted => write!(f, "aborted"),
        }
    }
}

/// Mutable transaction state, guarded by the transaction's mutex.
struct Inner {
    status: Status,
    /// Notifications still expected from dependencies before commit may
    /// make a decision.
    waitcnt: usize,
    /// Transactions that depend on this one. Drained on the first terminal
    /// transition, so waiters are notified exactly once.
    waiters: Vec<Arc<Transaction>>,
}

/// A transaction: an ID, a status, the set of transactions waiting on it,
/// and the semaphore its own commit waits on.
pub struct Transaction {
    id: u64,
    sem: Semaphore,
    inner: Mutex<Inner>,
}

impl Transaction {
    fn new(id: u64) -> Arc<Self> {
        Arc::new(Transaction {
            id,
            sem: Semaphore::new(0),
            inner: Mutex::new(Inner { status: Status::Pending, waitcnt: 0, waiters: Vec::new() }),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// The status at the time of the call. A `Pending` result may be stale
    /// by the time the caller looks at it; `Committed` and `Aborted` are
    /// stable.
    pub fn status(&self) -> Status {
        self.inner.lock().status
    }

    /// Records that `self` must wait for `dependee` to reach a terminal
    /// state before it may commit, and must abort if `dependee` aborts.
    ///
    /// Set semantics: registering the same dependee twice is a no-op. The
    /// caller guarantees `dependee.id < self.id`, which keeps the
    /// dependency graph acyclic. If the dependee already reached a
    /// terminal state there is nothing to wait for: a committed dependee
    /// is ignored, an aborted one aborts `self` on the spot.
    pub fn add_dependency(self: &Arc<Self>, dependee: &Arc<Transaction>) {
        debug_assert!(dependee.id < self.id, "dependency edge must point to a smaller ID");
        {
            let mut dep = dependee.inner.lock();
            match dep.status {
                Status::Pending => {
                    if dep.waiters.iter().any(|waiter| waiter.id == self.id) {
                        return;
                    }
                    dep.waiters.push(Arc::clone(self));
                }
                Status::Committed => return,
                Status::Aborted => {
                    drop(dep);
                    self.abort();
                    return;
                }
            }
        }
        self.inner.lock().waitcnt += 1;
        debug!("transaction {} now depends on transaction {}", self.id, dependee.id);
    }

    /// Try to commit. Blocks for one notification per outstanding
    /// dependency; if any dependency aborted this transaction in the
    /// meantime the abort is propagated to this transaction's own waiters.
    /// Returns the final status, either `Committed` or `Aborted`.
    ///
    /// Committing a transaction that already committed is a programming
    /// error and panics.
    pub async fn commit(self: &Arc<Self>) -> Status {
        while self.pending_waits() > 0 {
            let permit = self.sem.acquire().await.expect("transaction semaphore closed");
            permit.forget();
            self.inner.lock().waitcnt -= 1;
            if self.status() == Status::Aborted {
                debug!("transaction {} aborted while waiting to commit", self.id);
                return self.abort();
            }
        }
        let waiters = {
            let mut inner = self.inner.lock();
            match inner.status {
                // An abort can land between the last wake and this point;
                // it wins, and our own waiters have to hear about it.
                Status::Aborted => {
                    drop(inner);
                    return self.abort();
                }
                Status::Committed => panic!("transaction {} committed twice", self.id),
                Status::Pending => {
                    inner.status = Status::Committed;
                    mem::take(&mut inner.waiters)
                }
            }
        };
        debug!("transaction {} committed, notifying {} waiter(s)", self.id, waiters.len());
        for waiter in &waiters {
            waiter.sem.add_permits(1);
        }
        Status::Committed
    }

    /// Abort this transaction and cascade to every waiter that is still
    /// pending. The first terminal transition drains the waiter list, so
    /// repeated aborts never notify anyone twice. Always returns
    /// `Aborted`.
    ///
    /// Aborting a committed transaction is a programming error and panics.
    pub fn abort(self: &Arc<Self>) -> Status {
        let waiters = {
            let mut inner = self.inner.lock();
            if inner.status == Status::Committed {
                panic!("cannot abort committed transaction {}", self.id);
            }
            inner.status = Status::Aborted;
            mem::take(&mut inner.waiters)
        };
        if !waiters.is_empty() {
            debug!("transaction {} aborted, cascading to {} waiter(s)", self.id, waiters.len());
        }
        for waiter in &waiters {
            waiter.abort_by_dependency();
        }
        Status::Aborted
    }

    /// A dependency aborted: inherit the abort if still pending and
    /// produce the wake its commit is waiting on. Waiters that already
    /// reached a terminal state are left alone.
    fn abort_by_dependency(&self) {
        {
            let mut inner = self.inner.lock();
            if inner.status != Status::Pending {
                return;
            }
            inner.status = Status::Aborted;
        }
        self.sem.add_permits(1);
    }

    fn pending_waits(&self) -> usize {
        self.inner.lock().waitcnt
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction").field("id", &self.id).field("status", &self.status()).finish()
    }
}

/// Hands out transaction IDs in creation order and keeps every live
/// transaction discoverable, for status reporting and debugging.
pub struct TransactionManager {
    next_id: AtomicU64,
    active: Mutex<HashMap<u64, Weak<Transaction>>>,
}

impl TransactionManager {
    pub fn new() -> Self {
        TransactionManager { next_id: AtomicU64::new(0), active: Mutex::new(HashMap::new()) }
    }

    /// Create a new pending transaction with the next ID.
    pub fn begin(&self) -> Arc<Transaction> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let txn = Transaction::new(id);
        let mut active = self.active.lock();
        active.retain(|_, weak| weak.strong_count() > 0);
        active.insert(id, Arc::downgrade(&txn));
        debug!("begin transaction {}", id);
        txn
    }

    /// Number of transactions begun so far.
    pub fn created(&self) -> u64 {
        self.next_id.load(Ordering::Relaxed)
    }

    /// Number of transactions still referenced somewhere (sessions,
    /// versions, dependency entries).
    pub fn active(&self) -> usize {
        self.active.lock().values().filter(|weak| weak.strong_count() > 0).count()
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}
