//! Re-entrance detection for the load hook.
//!
//! Loading one class routinely loads another, so a depth of one nested call
//! is normal. Once the depth exceeds `max_depth` the guard latches: the hook
//! was re-entered while a transform was already running, and merging inside
//! that window is unsafe. The latch is sticky; only [`ReentranceGuard::reset`]
//! clears it.

use std::collections::HashMap;
use std::thread::{self, ThreadId};

use parking_lot::Mutex;
use tracing::error;

use crate::mixin::error::GuardError;

pub const DEFAULT_MAX_DEPTH: usize = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReentranceGuard {
    max_depth: usize,
    depth: usize,
    tripped: bool,
}

impl Default for ReentranceGuard {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DEPTH)
    }
}

impl ReentranceGuard {
    pub fn new(max_depth: usize) -> Self {
        Self { max_depth, depth: 0, tripped: false }
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Increments the depth and latches if it now exceeds the maximum.
    /// Returns whether the latch is set.
    pub fn push(&mut self) -> bool {
        self.depth += 1;
        self.tripped |= self.check();
        self.tripped
    }

    pub fn pop(&mut self) -> Result<(), GuardError> {
        if self.depth == 0 {
            return Err(GuardError::PopAtZeroDepth);
        }
        self.depth -= 1;
        Ok(())
    }

    /// Depth test without touching the latch.
    pub fn check(&self) -> bool {
        self.depth > self.max_depth
    }

    pub fn is_tripped(&self) -> bool {
        self.tripped
    }

    /// Clears the latch. Depth is left alone.
    pub fn reset(&mut self) {
        self.tripped = false;
    }
}

/// One [`ReentranceGuard`] per calling thread.
///
/// JVMTI delivers class load events on whatever thread loads the class, so
/// a single shared counter would see unrelated concurrent loads as nesting.
///
/// A thread has an entry only while it is inside a scope or latched. A
/// latched thread keeps its entry after it exits, since a `ThreadId` gives no
/// way to tell; [`reset_all`](Self::reset_all) drops those. The table is
/// therefore bounded by the threads that tripped since the last `reset_all`.
#[derive(Debug)]
pub struct ThreadGuards {
    max_depth: usize,
    guards: Mutex<HashMap<ThreadId, ReentranceGuard>>,
}

impl Default for ThreadGuards {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DEPTH)
    }
}

impl ThreadGuards {
    pub fn new(max_depth: usize) -> Self {
        Self { max_depth, guards: Mutex::new(HashMap::new()) }
    }

    pub fn push(&self) -> bool {
        let mut guards = self.guards.lock();
        guards
            .entry(thread::current().id())
            .or_insert_with(|| ReentranceGuard::new(self.max_depth))
            .push()
    }

    pub fn pop(&self) -> Result<(), GuardError> {
        let id = thread::current().id();
        let mut guards = self.guards.lock();
        let guard = guards.get_mut(&id).ok_or(GuardError::PopAtZeroDepth)?;
        guard.pop()?;
        if guard.depth() == 0 && !guard.is_tripped() {
            guards.remove(&id);
        }
        Ok(())
    }

    pub fn depth(&self) -> usize {
        self.guards.lock().get(&thread::current().id()).map_or(0, ReentranceGuard::depth)
    }

    pub fn is_tripped(&self) -> bool {
        self.guards.lock().get(&thread::current().id()).map_or(false, ReentranceGuard::is_tripped)
    }

    /// Clears the calling thread's latch.
    pub fn reset(&self) {
        let id = thread::current().id();
        let mut guards = self.guards.lock();
        if let Some(guard) = guards.get_mut(&id) {
            guard.reset();
            if guard.depth() == 0 {
                guards.remove(&id);
            }
        }
    }

    /// Number of threads with an entry.
    pub fn tracked_threads(&self) -> usize {
        self.guards.lock().len()
    }

    /// Clears every thread's latch and forgets threads not inside a scope.
    pub fn reset_all(&self) {
        let mut guards = self.guards.lock();
        guards.retain(|_, guard| {
            guard.reset();
            guard.depth() > 0
        });
    }

    /// Pushes now and pops when the returned scope is dropped.
    pub fn enter(&self) -> ReentranceScope<'_> {
        let locked = self.push();
        ReentranceScope { guards: self, locked }
    }
}

/// RAII guard that pops its [`ThreadGuards`] entry on drop.
#[must_use = "dropping the scope pops the guard immediately"]
pub struct ReentranceScope<'a> {
    guards: &'a ThreadGuards,
    locked: bool,
}

impl ReentranceScope<'_> {
    /// Whether the latch was set after this scope's push.
    pub fn locked(&self) -> bool {
        self.locked
    }
}

impl Drop for ReentranceScope<'_> {
    fn drop(&mut self) {
        let popped = self.guards.pop();
        if let Err(err) = &popped {
            error!("{err}");
        }
        debug_assert!(popped.is_ok() || thread::panicking(), "re-entrance scope popped an empty guard");
    }
}
