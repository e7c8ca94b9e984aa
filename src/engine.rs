//! Pluggable execution of definition files.

use std::path::Path;
use std::sync::Arc;

use crate::error::ExecutionError;

/// Runs definition files of one format.
///
/// Every call to [`execute`](ScriptEngine::execute) must run the file in a freshly
/// constructed, isolated context: nothing defined by one file may be visible to the
/// next. A file declares its object by calling [`register`](crate::register) (or the
/// engine's binding of it) while it runs.
///
/// # Examples
///
/// ```
/// use registration_loader::{register, DynamicDefinitionLoader, ExecutionError, ScriptEngine};
/// use std::path::Path;
///
/// #[derive(Debug, PartialEq)]
/// struct Port(u16);
///
/// /// Treats the file stem as a port number.
/// struct PortEngine;
///
/// impl ScriptEngine for PortEngine {
///     fn extension(&self) -> &str {
///         "port"
///     }
///
///     fn execute(&self, path: &Path) -> Result<(), ExecutionError> {
///         let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
///         let port = stem.parse().map_err(|e| ExecutionError::Script {
///             path: path.to_path_buf(),
///             message: format!("{e}"),
///         })?;
///         register(Port(port));
///         Ok(())
///     }
/// }
///
/// let loader = DynamicDefinitionLoader::<Port>::new(PortEngine);
/// let loaded = loader.extract_data_from_file(Path::new("8080.port"));
/// assert_eq!(*loaded[0], Port(8080));
/// ```
pub trait ScriptEngine: Send + Sync {
    /// Extension (without the leading dot) of the files this engine can run.
    fn extension(&self) -> &str;

    /// Runs the file at `path`.
    fn execute(&self, path: &Path) -> Result<(), ExecutionError>;
}

impl<E: ScriptEngine + ?Sized> ScriptEngine for Arc<E> {
    fn extension(&self) -> &str {
        (**self).extension()
    }

    fn execute(&self, path: &Path) -> Result<(), ExecutionError> {
        (**self).execute(path)
    }
}

impl<E: ScriptEngine + ?Sized> ScriptEngine for Box<E> {
    fn extension(&self) -> &str {
        (**self).extension()
    }

    fn execute(&self, path: &Path) -> Result<(), ExecutionError> {
        (**self).execute(path)
    }
}
