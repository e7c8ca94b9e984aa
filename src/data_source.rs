//! Directory-backed data sources.
//!
//! [`SynchronisedFilesDataSource`] keeps a path-keyed view of everything a
//! [`FilesDataSource`] extracts from a directory, and keeps it current while files are
//! created, modified and removed.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{mpsc, Arc},
    thread::{self, JoinHandle},
};

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use notify_debouncer_full::{new_debouncer, DebounceEventResult, Debouncer, FileIdMap};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::config::WatcherConfig;
use crate::error::WatchError;

/// Something that knows which files hold data and how to read them.
pub trait FilesDataSource: Send + Sync + 'static {
    type Item: Clone + Send + Sync + 'static;

    /// Whether a changed path should be (re)loaded at all.
    fn is_data_file(&self, path: &Path) -> bool;

    /// Extracts every item held by the file at `path`.
    fn extract_data_from_file(&self, path: &Path) -> Vec<Self::Item>;
}

struct Shared<S: FilesDataSource> {
    source: S,
    max_workers: usize,
    data: RwLock<HashMap<PathBuf, Vec<S::Item>>>,
    /// Held for a whole [`apply`](Self::apply), so a later change to a path is never
    /// overwritten by an earlier, slower load of it.
    applying: Mutex<()>,
}

impl<S: FilesDataSource> Shared<S> {
    /// Loads `paths` on at most `max_workers` threads draining a shared queue.
    fn extract_all(&self, paths: Vec<PathBuf>) -> Vec<(PathBuf, Vec<S::Item>)> {
        let workers = self.max_workers.clamp(1, paths.len().max(1));
        let queue = Mutex::new(paths.into_iter());
        let loaded = Mutex::new(Vec::new());

        let drain = || loop {
            // The queue lock is released before the load starts.
            let next = queue.lock().next();
            let Some(path) = next else { break };
            let items = self.source.extract_data_from_file(&path);
            loaded.lock().push((path, items));
        };

        thread::scope(|scope| {
            // The calling thread is one of the workers.
            let mut handles = Vec::with_capacity(workers - 1);
            for index in 1..workers {
                match thread::Builder::new()
                    .name(format!("data-file-loader-{index}"))
                    .spawn_scoped(scope, drain)
                {
                    Ok(handle) => handles.push(handle),
                    Err(err) => {
                        warn!("Failed to spawn data file loader thread: {err}");
                        break;
                    }
                }
            }
            drain();
            for handle in handles {
                if handle.join().is_err() {
                    error!("Data file loader thread panicked");
                }
            }
        });

        loaded.into_inner()
    }

    /// Brings the given paths in line with the file system: existing data files are
    /// (re)loaded, vanished paths are dropped along with anything beneath them.
    fn apply(&self, paths: Vec<PathBuf>) {
        let _applying = self.applying.lock();

        let mut to_load = Vec::new();
        let mut to_remove = Vec::new();
        for path in paths {
            if !path.exists() {
                to_remove.push(path);
            } else if self.source.is_data_file(&path) {
                to_load.push(path);
            }
        }

        let loaded = self.extract_all(to_load);

        let mut data = self.data.write();
        for path in to_remove {
            debug!("Removing data from: {}", path.display());
            data.retain(|known, _| !known.starts_with(&path));
        }
        for (path, items) in loaded {
            debug!("Loaded {} item(s) from: {}", items.len(), path.display());
            data.insert(path, items);
        }
    }
}

struct Running {
    debouncer: Debouncer<RecommendedWatcher, FileIdMap>,
    handle: JoinHandle<()>,
}

/// Data source mirroring the data files of a directory.
///
/// # Examples
///
/// ```
/// use registration_loader::{FilesDataSource, SynchronisedFilesDataSource};
/// use std::path::Path;
///
/// /// Every `.txt` file holds its lines.
/// struct Lines;
///
/// impl FilesDataSource for Lines {
///     type Item = String;
///
///     fn is_data_file(&self, path: &Path) -> bool {
///         path.extension().is_some_and(|ext| ext == "txt")
///     }
///
///     fn extract_data_from_file(&self, path: &Path) -> Vec<String> {
///         std::fs::read_to_string(path)
///             .map(|text| text.lines().map(str::to_string).collect())
///             .unwrap_or_default()
///     }
/// }
///
/// let dir = std::env::temp_dir().join("registration-loader-doc-lines");
/// std::fs::create_dir_all(&dir).unwrap();
/// std::fs::write(dir.join("a.txt"), "one\ntwo").unwrap();
///
/// let source = SynchronisedFilesDataSource::new(&dir, Lines);
/// source.start().unwrap();
/// assert!(source.get_all().contains(&"two".to_string()));
/// source.stop();
/// ```
pub struct SynchronisedFilesDataSource<S: FilesDataSource> {
    directory: PathBuf,
    config: WatcherConfig,
    shared: Arc<Shared<S>>,
    running: Mutex<Option<Running>>,
}

impl<S: FilesDataSource> SynchronisedFilesDataSource<S> {
    /// Data source for `directory` with the default [`WatcherConfig`]. Nothing is
    /// loaded until [`start`](Self::start) or [`sync_path`](Self::sync_path).
    pub fn new(directory: impl AsRef<Path>, source: S) -> Self {
        Self::with_config(directory, source, WatcherConfig::default())
    }

    /// Data source for `directory` with explicit watcher settings.
    pub fn with_config(directory: impl AsRef<Path>, source: S, config: WatcherConfig) -> Self {
        Self {
            directory: directory.as_ref().to_path_buf(),
            config,
            shared: Arc::new(Shared {
                source,
                max_workers: config.max_workers,
                data: RwLock::new(HashMap::new()),
                applying: Mutex::new(()),
            }),
            running: Mutex::new(None),
        }
    }

    /// The watched directory.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// The source files are extracted with.
    pub fn source(&self) -> &S {
        &self.shared.source
    }

    /// Loads every data file in the directory, then keeps watching it for changes.
    ///
    /// The watcher is set up before the initial scan so that changes made during the
    /// scan are not missed.
    ///
    /// # Errors
    ///
    /// - [`WatchError::AlreadyStarted`] if called twice without [`stop`](Self::stop).
    /// - [`WatchError::NotADirectory`] if the directory does not exist.
    /// - [`WatchError::Notify`] if the platform watcher cannot be created.
    pub fn start(&self) -> Result<(), WatchError> {
        let mut running = self.running.lock();
        if running.is_some() {
            return Err(WatchError::AlreadyStarted);
        }
        if !self.directory.is_dir() {
            return Err(WatchError::NotADirectory(self.directory.clone()));
        }

        let (tx, rx) = mpsc::channel::<DebounceEventResult>();
        let mut debouncer = new_debouncer(self.config.debounce, None, move |result: DebounceEventResult| {
            // The receiver only goes away once the data source is stopping.
            let _ = tx.send(result);
        })?;

        let mode = if self.config.recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        debouncer.watcher().watch(&self.directory, mode)?;

        self.shared.apply(self.scan());

        let shared = Arc::clone(&self.shared);
        let handle = thread::spawn(move || {
            for result in rx {
                match result {
                    Ok(events) => {
                        let mut paths: Vec<PathBuf> = events
                            .into_iter()
                            .filter(|event| {
                                matches!(
                                    event.event.kind,
                                    EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                                )
                            })
                            .flat_map(|event| event.event.paths)
                            .collect();
                        paths.sort();
                        paths.dedup();
                        if !paths.is_empty() {
                            shared.apply(paths);
                        }
                    }
                    Err(errors) => {
                        for err in errors {
                            warn!("File watcher error: {err}");
                        }
                    }
                }
            }
            debug!("File watcher stopped");
        });

        info!("Started watching data files in {:?}", self.directory);
        *running = Some(Running { debouncer, handle });
        Ok(())
    }

    /// Stops watching. Data loaded so far stays available.
    pub fn stop(&self) {
        let running = self.running.lock().take();
        if let Some(Running { debouncer, handle }) = running {
            // Joins the debouncer thread, which drops the event sender and ends ours.
            debouncer.stop();
            if handle.join().is_err() {
                error!("File watcher thread panicked");
            }
            info!("Stopped watching data files in {:?}", self.directory);
        }
    }

    /// Whether the directory is currently being watched.
    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Re-reads a single path: reloads it if it is an existing data file, forgets it if
    /// it no longer exists.
    pub fn sync_path(&self, path: impl AsRef<Path>) {
        self.shared.apply(vec![path.as_ref().to_path_buf()]);
    }

    /// All items currently known, ordered by the path they came from.
    pub fn get_all(&self) -> Vec<S::Item> {
        let data = self.shared.data.read();
        let mut paths: Vec<&PathBuf> = data.keys().collect();
        paths.sort();
        paths
            .into_iter()
            .flat_map(|path| data[path].iter().cloned())
            .collect()
    }

    /// Items extracted from one file, if that file has been loaded.
    pub fn get(&self, path: impl AsRef<Path>) -> Option<Vec<S::Item>> {
        self.shared.data.read().get(path.as_ref()).cloned()
    }

    /// Total number of items across all files.
    pub fn len(&self) -> usize {
        self.shared.data.read().values().map(Vec::len).sum()
    }

    /// Whether no file has yielded any item.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn scan(&self) -> Vec<PathBuf> {
        let max_depth = if self.config.recursive { usize::MAX } else { 1 };
        WalkDir::new(&self.directory)
            .max_depth(max_depth)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(err) => {
                    warn!("Failed to read directory entry: {err}");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .collect()
    }
}

impl<S: FilesDataSource> Drop for SynchronisedFilesDataSource<S> {
    fn drop(&mut self) {
        self.stop();
    }
}
