use std::sync::{Mutex, MutexGuard};

/// Acquire mutex guard, ignoring poisoning.
///
/// Every critical section in this crate is a single map operation, so a
/// panic while holding the lock cannot leave the data half-updated.
pub(crate) fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
