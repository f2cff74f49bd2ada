//! Exclusivity Token
//!
//! Only one logical stream of execution may touch interpreter state at a
//! time. The Python GIL alone does not give that: the interpreter hands the
//! GIL to other threads between bytecodes (and around `time.sleep` or I/O),
//! so two host threads driving the bridge would interleave. The token is a
//! reentrant lock taken around every bridge operation, always BEFORE the GIL.
//!
//! ## Rules
//!
//! 1. Take the token, then attach to the interpreter
//! 2. Reentry from the same thread (embedded code calling back into the
//!    bridge) nests instead of deadlocking
//! 3. Other threads block until the outermost holder lets go

use std::cell::Cell;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};

static ACQUISITIONS: AtomicU64 = AtomicU64::new(0);

thread_local! {
    /// How many guards this thread currently holds
    static HOLD_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// How the current thread holds the token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    NotHeld,
    /// Held by one bridge operation
    Held,
    /// Held by an operation that was entered from inside another one
    NestedHeld,
}

impl TokenState {
    pub fn current() -> Self {
        match hold_depth() {
            0 => TokenState::NotHeld,
            1 => TokenState::Held,
            _ => TokenState::NestedHeld,
        }
    }
}

fn hold_depth() -> usize {
    HOLD_DEPTH.with(|depth| depth.get())
}

/// Reentrant lock serializing bridge operations across host threads.
#[derive(Default)]
pub struct ExclusivityToken {
    lock: ReentrantMutex<()>,
}

impl ExclusivityToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the token, blocking while another thread holds it.
    ///
    /// If this thread already holds it, the depth goes up and the call
    /// returns immediately.
    pub fn acquire(&self) -> TokenGuard<'_> {
        let lock = self.lock.lock();
        let nested = hold_depth() > 0;
        HOLD_DEPTH.with(|depth| depth.set(depth.get() + 1));
        ACQUISITIONS.fetch_add(1, Ordering::Relaxed);

        TokenGuard {
            _lock: lock,
            nested,
        }
    }
}

impl fmt::Debug for ExclusivityToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExclusivityToken")
            .field("locked", &self.lock.is_locked())
            .finish()
    }
}

/// One level of token ownership; released on drop.
pub struct TokenGuard<'a> {
    _lock: ReentrantMutexGuard<'a, ()>,
    nested: bool,
}

impl TokenGuard<'_> {
    /// Whether this thread already held the token when this guard was taken.
    pub fn is_nested(&self) -> bool {
        self.nested
    }
}

impl Drop for TokenGuard<'_> {
    fn drop(&mut self) {
        HOLD_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

impl fmt::Debug for TokenGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenGuard")
            .field("nested", &self.nested)
            .finish()
    }
}

/// Snapshot of token usage as seen from the calling thread.
///
/// A thread that is not inside a bridge operation should always see a
/// depth of zero; anything else means a guard leaked.
pub fn token_stats() -> TokenStats {
    let depth = hold_depth();
    TokenStats {
        total_acquires: ACQUISITIONS.load(Ordering::Relaxed),
        current_depth: depth,
        is_held: depth > 0,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenStats {
    /// Acquisitions since process start, all threads
    pub total_acquires: u64,
    /// Guards held by the calling thread
    pub current_depth: usize,
    pub is_held: bool,
}
