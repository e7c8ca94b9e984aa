//! Error types for loading, publishing and watching.
//!
//! None of the load errors escape [`extract_data_from_file`]; they exist so that
//! [`try_extract_data_from_file`] can report why a file produced nothing.
//!
//! [`extract_data_from_file`]: crate::DynamicDefinitionLoader::extract_data_from_file
//! [`try_extract_data_from_file`]: crate::DynamicDefinitionLoader::try_extract_data_from_file

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::event_bus::ListenerId;

/// Failure to run a definition file.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Failed to read `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to execute `{path}`: {message}")]
    Script { path: PathBuf, message: String },

    #[error("Execution of `{path}` panicked: {message}")]
    Panicked { path: PathBuf, message: String },
}

/// Reason a single file load produced no object.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Unsupported file format for `{path}`: only files with the extension \".{expected}\" can be loaded")]
    UnsupportedFileFormat { path: PathBuf, expected: String },

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error("`{path}` did not register an object of the type `{type_name}`")]
    MissingRegistration {
        path: PathBuf,
        type_name: &'static str,
    },
}

/// A listener that panicked while being notified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerFailure {
    pub listener: ListenerId,
    pub message: String,
}

impl fmt::Display for ListenerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener {} panicked: {}", self.listener, self.message)
    }
}

/// Raised by [`publish`](crate::event_bus::publish) after every listener has been notified.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PublishError {
    #[error("{} listener(s) for `{type_name}` panicked", failures.len())]
    ListenerPanicked {
        type_name: &'static str,
        failures: Vec<ListenerFailure>,
    },
}

/// Failure to start watching a definitions directory.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("Path is not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("Data source is already started")]
    AlreadyStarted,

    #[error("File watcher error: {0}")]
    Notify(#[from] notify::Error),
}

/// Extracts a printable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
