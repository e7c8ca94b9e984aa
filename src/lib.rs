//! # Registration Loader
//!
//! Loads externally authored, self-registering definition files and correlates each
//! file's `register` call with the load that ran it, even when many loads of the same
//! type run concurrently across the process.
//!
//! A definition file does not return its object; it *declares* it, by calling
//! [`register`] while it runs. The loader listens for that registration on a
//! process-wide, type-keyed [`event_bus`], and holds a per-type correlation lock from
//! [`lock_table`] for the whole time it listens, so no load can capture another load's
//! object.
//!
//! ## Quick Start
//!
//! ```rust
//! use registration_loader::{register, DynamicDefinitionLoader, ExecutionError, ScriptEngine};
//! use std::path::Path;
//!
//! #[derive(Debug, PartialEq)]
//! struct Widget(String);
//!
//! // Stands in for a real interpreter: every `.src` file registers a widget named
//! // after the file.
//! struct NamedByFile;
//!
//! impl ScriptEngine for NamedByFile {
//!     fn extension(&self) -> &str {
//!         "src"
//!     }
//!
//!     fn execute(&self, path: &Path) -> Result<(), ExecutionError> {
//!         let name = path.file_stem().unwrap().to_string_lossy().into_owned();
//!         register(Widget(name));
//!         Ok(())
//!     }
//! }
//!
//! let loader = DynamicDefinitionLoader::<Widget>::new(NamedByFile);
//! let loaded = loader.extract_data_from_file(Path::new("a.src"));
//! assert_eq!(*loaded[0], Widget("a".to_string()));
//! ```
//!
//! ## Features
//!
//! - **Correlated**: concurrent loads of the same type never see each other's registrations
//! - **Parallel**: loads of different types never wait on each other
//! - **Resilient**: a bad file yields an empty result and a log line, never an error
//! - **Hot reload**: [`SynchronisedFilesDataSource`] keeps a directory's definitions current
//! - **Luau**: [`LuaEngine`] runs `.luau` definition files (cargo feature `luau`, on by default)
//!
//! ## Known limitations
//!
//! - Correlation locks are not reentrant: a definition file that triggers another load
//!   of the *same* type on the same thread deadlocks.
//! - There is no timeout. A file whose execution hangs keeps every other load of its
//!   type waiting.
//! - Bus and lock entries are created per type on first use and never removed.
//! - Listeners match exact types only.
//!
//! ## Main Functions
//!
//! - [`register`] / [`unregister`] - Declare or retract an object from a definition file
//! - [`DynamicDefinitionLoader::extract_data_from_file`] - Load one definition file
//! - [`SynchronisedFilesDataSource::start`] - Load a directory and follow its changes

pub mod config;
pub mod data_source;
pub mod engine;
pub mod error;
pub mod event_bus;
pub mod loader;
pub mod lock_table;
#[cfg(feature = "luau")]
pub mod lua;
pub mod registration_event;

pub use config::WatcherConfig;
pub use data_source::{FilesDataSource, SynchronisedFilesDataSource};
pub use engine::ScriptEngine;
pub use error::{ExecutionError, ListenerFailure, LoadError, PublishError, WatchError};
pub use event_bus::{register, register_arc, unregister, unregister_arc, ListenerId, Subscription};
pub use loader::{DataFileFilter, DynamicDefinitionLoader};
pub use lock_table::LoadLock;
#[cfg(feature = "luau")]
pub use lua::LuaEngine;
pub use registration_event::{RegistrationEvent, RegistrationEventType};
