//! Loading of self-registering definition files.
//!
//! A definition file declares its object as a side effect, by calling
//! [`register`](crate::register) while it runs. [`DynamicDefinitionLoader`] correlates
//! that call with the load that ran the file:
//!
//! 1. take the correlation lock for the expected type `T`,
//! 2. subscribe a capturing listener for `T`,
//! 3. run the file with the configured [`ScriptEngine`],
//! 4. remove the listener, *then* release the lock.
//!
//! Because the lock covers the whole listening window, two concurrent loads of `T` can
//! never capture each other's registrations. Loads of different types run in parallel.

use std::{
    fmt,
    marker::PhantomData,
    panic::{self, AssertUnwindSafe},
    path::Path,
    sync::{Arc, OnceLock},
};

use tracing::{info, warn};

use crate::data_source::FilesDataSource;
use crate::engine::ScriptEngine;
use crate::error::{panic_message, ExecutionError, LoadError};
use crate::event_bus;
use crate::lock_table;
use crate::registration_event::RegistrationEventType;

/// Predicate deciding which paths in a watched directory are definition files.
pub type DataFileFilter = Arc<dyn Fn(&Path) -> bool + Send + Sync + 'static>;

/// Loads definition files that register an object of type `T`.
///
/// # Examples
///
/// ```
/// use registration_loader::{register, DynamicDefinitionLoader, ExecutionError, ScriptEngine};
/// use std::path::Path;
///
/// #[derive(Debug, PartialEq)]
/// struct Widget(String);
///
/// struct StemEngine;
///
/// impl ScriptEngine for StemEngine {
///     fn extension(&self) -> &str { "src" }
///
///     fn execute(&self, path: &Path) -> Result<(), ExecutionError> {
///         let stem = path.file_stem().unwrap().to_string_lossy().into_owned();
///         register(Widget(stem));
///         Ok(())
///     }
/// }
///
/// let loader = DynamicDefinitionLoader::<Widget>::new(StemEngine);
///
/// let loaded = loader.extract_data_from_file(Path::new("a.src"));
/// assert_eq!(*loaded[0], Widget("a".to_string()));
///
/// // Wrong extension: nothing is executed.
/// assert!(loader.extract_data_from_file(Path::new("b.txt")).is_empty());
/// ```
pub struct DynamicDefinitionLoader<T> {
    engine: Arc<dyn ScriptEngine>,
    data_file_filter: DataFileFilter,
    _data_type: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> DynamicDefinitionLoader<T> {
    /// Creates a loader that runs files with `engine`.
    pub fn new(engine: impl ScriptEngine + 'static) -> Self {
        Self::with_engine(Arc::new(engine))
    }

    /// Creates a loader sharing an already boxed engine.
    pub fn with_engine(engine: Arc<dyn ScriptEngine>) -> Self {
        Self {
            engine,
            data_file_filter: Arc::new(is_visible_file),
            _data_type: PhantomData,
        }
    }

    /// Replaces the default data-file filter (any regular, non-hidden file).
    pub fn with_data_file_filter(
        mut self,
        filter: impl Fn(&Path) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.data_file_filter = Arc::new(filter);
        self
    }

    /// Name of the type this loader expects files to register.
    pub fn data_type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    /// Extension (without the dot) of files this loader can execute.
    pub fn supported_extension(&self) -> &str {
        self.engine.extension()
    }

    /// Whether `path` is a candidate definition file.
    ///
    /// This does not check the file format; unsupported formats are rejected later by
    /// [`extract_data_from_file`](Self::extract_data_from_file).
    pub fn is_data_file(&self, path: &Path) -> bool {
        (self.data_file_filter)(path)
    }

    fn has_supported_extension(&self, path: &Path) -> bool {
        path.extension()
            .is_some_and(|ext| ext == self.engine.extension())
    }

    /// Loads `path` and returns the object it registered, or `[]`.
    ///
    /// Never fails: unsupported formats, execution errors and files that do not
    /// register anything are logged and produce an empty result, so a caller loading
    /// many files is unaffected by any single bad one.
    ///
    /// Blocks while another load of `T` is in progress anywhere in the process.
    pub fn extract_data_from_file(&self, path: &Path) -> Vec<Arc<T>> {
        match self.try_extract_data_from_file(path) {
            Ok(loaded) => vec![loaded],
            // The execution failure itself was logged by the load.
            Err(LoadError::Execution(_)) => {
                let missing = LoadError::MissingRegistration {
                    path: path.to_path_buf(),
                    type_name: self.data_type_name(),
                };
                warn!("{missing}");
                Vec::new()
            }
            Err(err) => {
                warn!("{err}");
                Vec::new()
            }
        }
    }

    /// Loads `path`, reporting why nothing was loaded.
    ///
    /// Only the first object of type `T` registered during the load is kept; later
    /// registrations are ignored. If the file registers an object and then fails, the
    /// object is still returned and the failure is logged.
    ///
    /// # Errors
    ///
    /// - [`LoadError::UnsupportedFileFormat`] if the extension does not match the engine;
    ///   the file is not executed and no lock is taken.
    /// - [`LoadError::Execution`] if the file could not be run and registered nothing.
    /// - [`LoadError::MissingRegistration`] if the file ran but registered nothing of
    ///   type `T`.
    pub fn try_extract_data_from_file(&self, path: &Path) -> Result<Arc<T>, LoadError> {
        info!("Loading `{}` from: {}", self.data_type_name(), path.display());

        if !self.has_supported_extension(path) {
            return Err(LoadError::UnsupportedFileFormat {
                path: path.to_path_buf(),
                expected: self.engine.extension().to_string(),
            });
        }

        let captured: Arc<OnceLock<Arc<T>>> = Arc::new(OnceLock::new());

        let lock = lock_table::acquire::<T>();
        let subscription = event_bus::subscribe_scoped::<T>({
            let captured = Arc::clone(&captured);
            move |event| {
                if event.event_type() == RegistrationEventType::Registered {
                    // First registration wins.
                    let _ = captured.set(Arc::clone(event.target()));
                }
            }
        });

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.engine.execute(path)))
            .unwrap_or_else(|payload| {
                Err(ExecutionError::Panicked {
                    path: path.to_path_buf(),
                    message: panic_message(payload.as_ref()),
                })
            });

        // The listener must be gone before another load of `T` can start.
        drop(subscription);
        drop(lock);

        match (captured.get().cloned(), outcome) {
            (Some(loaded), Ok(())) => Ok(loaded),
            (Some(loaded), Err(err)) => {
                warn!("{err}");
                Ok(loaded)
            }
            (None, Err(err)) => {
                warn!("{err}");
                Err(err.into())
            }
            (None, Ok(())) => Err(LoadError::MissingRegistration {
                path: path.to_path_buf(),
                type_name: self.data_type_name(),
            }),
        }
    }
}

impl<T> Clone for DynamicDefinitionLoader<T> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            data_file_filter: Arc::clone(&self.data_file_filter),
            _data_type: PhantomData,
        }
    }
}

impl<T> fmt::Debug for DynamicDefinitionLoader<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicDefinitionLoader")
            .field("data_type", &std::any::type_name::<T>())
            .field("extension", &self.engine.extension())
            .finish()
    }
}

impl<T: Send + Sync + 'static> FilesDataSource for DynamicDefinitionLoader<T> {
    type Item = Arc<T>;

    fn is_data_file(&self, path: &Path) -> bool {
        DynamicDefinitionLoader::is_data_file(self, path)
    }

    fn extract_data_from_file(&self, path: &Path) -> Vec<Arc<T>> {
        DynamicDefinitionLoader::extract_data_from_file(self, path)
    }
}

fn is_visible_file(path: &Path) -> bool {
    let hidden = path
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with('.'));
    !hidden && path.is_file()
}

// -------------------------------------------------------------------------------------------------
// Tests
// -------------------------------------------------------------------------------------------------
