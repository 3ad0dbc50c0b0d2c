//! Lock context for the buffer table.
//!
//! An operation that needs the table across several helper calls locks once
//! through its `LockContext`; helpers then reuse the held guard instead of
//! locking again, which would deadlock on `std::sync::Mutex`.
//!
//! A context must not live across an `.await`.

use std::sync::{Mutex, MutexGuard, PoisonError};

pub(crate) struct LockContext<'a, T> {
    mutex: &'a Mutex<T>,
    guard: Option<MutexGuard<'a, T>>,
}

impl<'a, T> LockContext<'a, T> {
    pub fn new(mutex: &'a Mutex<T>) -> Self {
        Self { mutex, guard: None }
    }

    pub fn is_held(&self) -> bool {
        self.guard.is_some()
    }

    /// Take the lock for the rest of this context. No-op if already held.
    pub fn lock(&mut self) {
        if self.guard.is_none() {
            self.guard = Some(self.mutex.lock().unwrap_or_else(PoisonError::into_inner));
        }
    }

    pub fn unlock(&mut self) {
        self.guard = None;
    }

    /// Run `f` on the protected value, through the held guard if there is
    /// one, otherwise under a lock scoped to this call.
    pub fn with<R>(&mut self, f: impl FnOnce(&mut T) -> R) -> R {
        match self.guard.as_mut() {
            Some(guard) => f(&mut **guard),
            None => {
                let mut guard = self.mutex.lock().unwrap_or_else(PoisonError::into_inner);
                f(&mut *guard)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_access_reuses_guard() {
        let mutex = Mutex::new(Vec::<u32>::new());
        let mut ctx = LockContext::new(&mutex);

        ctx.lock();
        assert!(ctx.is_held());
        ctx.with(|v| v.push(1));
        // Would deadlock if `with` locked again.
        ctx.with(|v| v.push(2));
        assert!(mutex.try_lock().is_err());

        ctx.unlock();
        assert!(!ctx.is_held());
        assert_eq!(*mutex.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_unheld_context_locks_per_call() {
        let mutex = Mutex::new(0u32);
        let mut ctx = LockContext::new(&mutex);
        ctx.with(|n| *n += 5);
        assert!(mutex.try_lock().is_ok());
        assert_eq!(ctx.with(|n| *n), 5);
    }

    #[test]
    fn test_lock_is_idempotent() {
        let mutex = Mutex::new(());
        let mut ctx = LockContext::new(&mutex);
        ctx.lock();
        ctx.lock();
        assert!(ctx.is_held());
    }
}
