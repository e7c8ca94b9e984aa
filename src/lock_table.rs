//! Per-type correlation locks.
//!
//! At most one load of a given declared type is in flight across the whole process.
//! The lock for `T` must be held from the moment a load subscribes its listener for `T`
//! until that listener is removed again; otherwise two loads of `T` could capture each
//! other's registrations.
//!
//! Locks are **not reentrant**. A definition file that (directly or indirectly) starts
//! another load of the same type on the same thread deadlocks. There is no timeout:
//! a load that never finishes keeps every other load of its type waiting.
//!
//! Like the event bus, entries are created on first use and never removed.

use std::{
    any::TypeId,
    collections::HashMap,
    fmt,
    sync::{Arc, LazyLock},
};

use parking_lot::{lock_api::ArcMutexGuard, Mutex, RawMutex};
use tracing::debug;

static LOAD_LOCKS: LazyLock<Mutex<HashMap<TypeId, Arc<Mutex<()>>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// Looks up the lock for `T`. The table mutex is only held for the lookup, never while
/// waiting on the type lock itself.
fn type_lock<T: 'static>() -> Arc<Mutex<()>> {
    LOAD_LOCKS
        .lock()
        .entry(TypeId::of::<T>())
        .or_default()
        .clone()
}

/// Held correlation lock for one declared type. Released on drop.
///
/// Must be released on the thread that acquired it.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct LoadLock {
    _guard: ArcMutexGuard<RawMutex, ()>,
    type_name: &'static str,
}

impl LoadLock {
    /// Name of the type this lock serialises loads of.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Releases the lock. Equivalent to dropping the guard.
    pub fn release(self) {}
}

impl fmt::Debug for LoadLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadLock")
            .field("type_name", &self.type_name)
            .finish()
    }
}

/// Blocks until no other load of `T` is in flight, then takes the lock.
pub fn acquire<T: 'static>() -> LoadLock {
    let lock = type_lock::<T>();
    let type_name = std::any::type_name::<T>();
    let guard = match lock.try_lock_arc() {
        Some(guard) => guard,
        None => {
            debug!("Waiting for another load of `{type_name}` to finish");
            lock.lock_arc()
        }
    };
    LoadLock {
        _guard: guard,
        type_name,
    }
}

/// Takes the lock for `T` only if it is free right now.
pub fn try_acquire<T: 'static>() -> Option<LoadLock> {
    type_lock::<T>().try_lock_arc().map(|guard| LoadLock {
        _guard: guard,
        type_name: std::any::type_name::<T>(),
    })
}

/// Whether a load of `T` currently holds the lock.
pub fn is_locked<T: 'static>() -> bool {
    type_lock::<T>().is_locked()
}
