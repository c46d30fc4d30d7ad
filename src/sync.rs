//! Locking primitives used by the access layer.
//!
//! [`Mutex`] guards the statement cache, the transaction bookkeeping and the pool's free set.
//! It is deliberately non-reentrant: a second `lock` from the thread that already holds it is
//! reported as [`SqliteAccessError::Misuse`] instead of deadlocking.
//!
//! [`DriverGate`] is what keeps a connection opened without the engine's internal mutex from
//! being driven by two threads at once. Unlike [`Mutex`] it admits the owning thread again, so
//! a row callback may issue nested statements on the connection it is reading from.

use std::cell::Cell;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, MutexGuard as StdMutexGuard, PoisonError};

use crate::error::{Result, SqliteAccessError};

static NEXT_THREAD_TOKEN: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_TOKEN: Cell<u64> = const { Cell::new(0) };
}

/// Small non-zero id for the calling thread; cheaper to compare than `ThreadId`.
fn current_thread_token() -> u64 {
    THREAD_TOKEN.with(|token| {
        let existing = token.get();
        if existing != 0 {
            return existing;
        }
        let fresh = NEXT_THREAD_TOKEN.fetch_add(1, Ordering::Relaxed);
        token.set(fresh);
        fresh
    })
}

/// Non-reentrant mutual exclusion with a scoped [`protect`](Mutex::protect) helper.
#[derive(Debug, Default)]
pub struct Mutex<T> {
    inner: std::sync::Mutex<T>,
    owner: AtomicU64,
}

impl<T> Mutex<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: std::sync::Mutex::new(value),
            owner: AtomicU64::new(0),
        }
    }

    /// Acquire the lock, blocking until it is free.
    ///
    /// # Errors
    /// Returns [`SqliteAccessError::Misuse`] if the calling thread already holds this lock.
    pub fn lock(&self) -> Result<MutexGuard<'_, T>> {
        let me = current_thread_token();
        if self.owner.load(Ordering::Acquire) == me {
            return Err(SqliteAccessError::Misuse(
                "mutex is not reentrant; the current thread already holds it".into(),
            ));
        }
        let guard = self.inner.lock().unwrap_or_else(|poisoned: PoisonError<_>| {
            tracing::warn!("recovering poisoned access-layer mutex");
            poisoned.into_inner()
        });
        self.owner.store(me, Ordering::Release);
        Ok(MutexGuard {
            owner: &self.owner,
            guard,
        })
    }

    /// Run `body` with the lock held and release it on every exit path, including unwinding.
    ///
    /// # Errors
    /// Returns [`SqliteAccessError::Misuse`] on a same-thread double acquire.
    pub fn protect<R>(&self, body: impl FnOnce(&mut T) -> R) -> Result<R> {
        let mut guard = self.lock()?;
        Ok(body(&mut guard))
    }

    pub fn into_inner(self) -> T {
        self.inner
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// RAII guard returned by [`Mutex::lock`]; unlocks on drop.
pub struct MutexGuard<'a, T> {
    owner: &'a AtomicU64,
    guard: StdMutexGuard<'a, T>,
}

impl<T> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        // Cleared before `guard` drops, so a waiting thread never observes a stale owner.
        self.owner.store(0, Ordering::Release);
    }
}

#[derive(Debug, Default)]
struct GateState {
    owner: u64,
    depth: usize,
}

/// Admits one thread at a time; the admitted thread may enter again without blocking.
#[derive(Debug, Default)]
pub(crate) struct DriverGate {
    state: std::sync::Mutex<GateState>,
    released: Condvar,
}

impl DriverGate {
    pub(crate) fn enter(&self) -> DriverPass<'_> {
        let me = current_thread_token();
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        while state.depth > 0 && state.owner != me {
            state = self
                .released
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        state.owner = me;
        state.depth += 1;
        DriverPass { gate: self }
    }
}

pub(crate) struct DriverPass<'a> {
    gate: &'a DriverGate,
}

impl Drop for DriverPass<'_> {
    fn drop(&mut self) {
        let mut state = self
            .gate
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        state.depth -= 1;
        if state.depth == 0 {
            state.owner = 0;
            drop(state);
            self.gate.released.notify_one();
        }
    }
}
