//! Per-transaction access guard.
//!
//! Three pieces cooperate here: a mutex protecting the owner record, a
//! condition variable for waiters, and the owner record itself (thread and
//! reentrancy depth). The guard is reentrant for the owning thread so that
//! engine code can call other locked entry points of the same transaction.
//!
//! Owner callbacks must run with the guard fully released. [`TransactionLock::
//! release_for_upcall`] hands back an [`UpcallToken`] recording the depth,
//! and [`TransactionLock::reacquire`] restores it afterwards. The
//! [`TransactionLock::upcall`] helper does both around a closure and restores
//! the depth even if the closure panics.

use std::marker::PhantomData;
use std::thread::{self, ThreadId};

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
struct LockState {
    owner: Option<ThreadId>,
    depth: usize,
}

/// Reentrant lock guarding one transaction
#[derive(Debug, Default)]
pub struct TransactionLock {
    state: Mutex<LockState>,
    available: Condvar,
}

/// Scoped hold on a [`TransactionLock`].
///
/// Not `Send`: the guard belongs to the thread that took it.
#[must_use = "the transaction is unlocked as soon as the guard is dropped"]
pub struct TransactionGuard<'a> {
    lock: &'a TransactionLock,
    _not_send: PhantomData<*const ()>,
}

impl Drop for TransactionGuard<'_> {
    fn drop(&mut self) {
        self.lock.unlock_one();
    }
}

/// Captures the reentrancy depth given up by [`TransactionLock::release_for_upcall`]
#[derive(Debug)]
#[must_use = "a released guard must be reacquired"]
pub struct UpcallToken {
    depth: usize,
    thread: ThreadId,
}

impl TransactionLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the guard, blocking while another thread holds it
    pub fn lock(&self) -> TransactionGuard<'_> {
        let me = thread::current().id();
        let mut state = self.state.lock();
        loop {
            match state.owner {
                None => {
                    state.owner = Some(me);
                    state.depth = 1;
                    break;
                }
                Some(owner) if owner == me => {
                    state.depth += 1;
                    break;
                }
                Some(_) => self.available.wait(&mut state),
            }
        }
        TransactionGuard {
            lock: self,
            _not_send: PhantomData,
        }
    }

    /// Whether the calling thread holds the guard
    pub fn is_held_by_current_thread(&self) -> bool {
        self.state.lock().owner == Some(thread::current().id())
    }

    /// Current reentrancy depth of the holder, 0 when free
    pub fn depth(&self) -> usize {
        self.state.lock().depth
    }

    /// Fully releases the guard if the calling thread holds it.
    ///
    /// Returns `None` when the caller does not hold the guard; there is then
    /// nothing to restore.
    pub fn release_for_upcall(&self) -> Option<UpcallToken> {
        let me = thread::current().id();
        let mut state = self.state.lock();
        if state.owner != Some(me) {
            return None;
        }
        let token = UpcallToken {
            depth: state.depth,
            thread: me,
        };
        state.owner = None;
        state.depth = 0;
        drop(state);
        self.available.notify_one();
        Some(token)
    }

    /// Re-acquires the guard released by `release_for_upcall`, restoring its depth
    pub fn reacquire(&self, token: UpcallToken) {
        debug_assert_eq!(token.thread, thread::current().id());
        let mut state = self.state.lock();
        while state.owner.is_some() {
            self.available.wait(&mut state);
        }
        state.owner = Some(token.thread);
        state.depth = token.depth;
    }

    /// Runs `f` with the guard released, restoring it afterwards
    pub fn upcall<R>(&self, f: impl FnOnce() -> R) -> R {
        struct Restore<'a> {
            lock: &'a TransactionLock,
            token: Option<UpcallToken>,
        }

        impl Drop for Restore<'_> {
            fn drop(&mut self) {
                if let Some(token) = self.token.take() {
                    self.lock.reacquire(token);
                }
            }
        }

        let _restore = Restore {
            lock: self,
            token: self.release_for_upcall(),
        };
        f()
    }

    fn unlock_one(&self) {
        let mut state = self.state.lock();
        // The holder may have released everything for an upcall that is
        // still running on another frame of this thread.
        if state.owner != Some(thread::current().id()) {
            return;
        }
        state.depth = state.depth.saturating_sub(1);
        if state.depth == 0 {
            state.owner = None;
            drop(state);
            self.available.notify_one();
        }
    }
}
