//! Core module - primitives shared by the session and streaming layers

mod clock;
mod listeners;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub(crate) use clock::{Clock, SystemClock};
#[cfg(test)]
pub(crate) use clock::ManualClock;
pub(crate) use listeners::{Listeners, Subscription};

/// Lock a mutex, recovering the guard if a panicking holder poisoned it.
/// All guarded state here stays consistent between statements.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
