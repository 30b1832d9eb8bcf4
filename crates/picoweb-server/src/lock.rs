//! Transport serialization lock.
//!
//! Network stacks that deliver callbacks from an interrupt-adjacent context
//! need every foreground call into the driver bracketed by an exclusive
//! lock. The lock is reentrant, so a handler running inside a callback can
//! call back into the server API while the adapter already holds it.

use std::fmt;
use std::sync::Arc;

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};

/// Cloneable handle to a reentrant lock. Clones share the same lock.
#[derive(Clone, Default)]
pub struct TransportLock {
    inner: Arc<ReentrantMutex<()>>,
}

/// Held for the duration of a transport access.
pub type TransportGuard<'a> = ReentrantMutexGuard<'a, ()>;

impl TransportLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until the lock is held by the current thread.
    pub fn acquire(&self) -> TransportGuard<'_> {
        self.inner.lock()
    }

    /// Acquire without blocking, if no other thread holds the lock.
    pub fn try_acquire(&self) -> Option<TransportGuard<'_>> {
        self.inner.try_lock()
    }

    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }
}

impl fmt::Debug for TransportLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportLock")
            .field("locked", &self.is_locked())
            .finish()
    }
}
