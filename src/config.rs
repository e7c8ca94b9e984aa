//! Watcher configuration.

use std::{num::NonZeroUsize, thread, time::Duration};

/// Settings for [`SynchronisedFilesDataSource`](crate::SynchronisedFilesDataSource).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatcherConfig {
    /// How long to wait after a burst of file events before reloading.
    pub debounce: Duration,
    /// Whether subdirectories are watched too.
    pub recursive: bool,
    /// Upper bound on threads loading files at once; `0` behaves like `1`.
    pub max_workers: usize,
}

impl WatcherConfig {
    /// Debounce used by [`WatcherConfig::default`].
    pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);

    /// Sets how long to wait for a burst of file events to settle.
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Sets whether subdirectories are scanned and watched.
    pub fn with_recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    /// Caps the number of files loaded concurrently; `0` is treated as `1`.
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce: Self::DEFAULT_DEBOUNCE,
            recursive: true,
            max_workers: thread::available_parallelism().map_or(4, NonZeroUsize::get),
        }
    }
}
