//! Luau definition files.
//!
//! A definition file builds its object with a type constructor and hands it to
//! `register`:
//!
//! ```lua
//! register(Widget { name = "a", size = 3 })
//! ```
//!
//! Every type a script may construct is declared up front with [`LuaEngine::define`].
//! The constructor deserializes its table argument into the Rust type, so the object a
//! script registers carries a real Rust runtime type, and only loaders expecting that
//! exact type capture it.
//!
//! Each file runs in its own sandboxed `Lua` state; nothing leaks between files.

use std::{collections::BTreeMap, fmt, fs, path::Path, sync::Arc};

use mlua::{Lua, LuaSerdeExt, UserData, Value};
use serde::de::DeserializeOwned;

use crate::engine::ScriptEngine;
use crate::error::ExecutionError;
use crate::event_bus::{register_arc, unregister_arc};
use crate::registration_event::RegistrationEventType;

/// Opaque script value holding a constructed Rust object.
#[derive(Clone)]
struct Definition {
    type_name: &'static str,
    emit: Arc<dyn Fn(RegistrationEventType) + Send + Sync>,
}

impl UserData for Definition {
    fn add_fields<F: mlua::UserDataFields<Self>>(fields: &mut F) {
        fields.add_field_method_get("type_name", |_, this| Ok(this.type_name));
    }
}

type Constructor = Arc<dyn Fn(&Lua, Value) -> mlua::Result<Definition> + Send + Sync>;

/// [`ScriptEngine`] for `.luau` definition files.
///
/// # Examples
///
/// ```
/// use registration_loader::{DynamicDefinitionLoader, LuaEngine};
/// use serde::Deserialize;
///
/// #[derive(Debug, Deserialize, PartialEq)]
/// struct Widget {
///     name: String,
/// }
///
/// let dir = std::env::temp_dir().join("registration-loader-doc-lua");
/// std::fs::create_dir_all(&dir).unwrap();
/// let file = dir.join("a.luau");
/// std::fs::write(&file, r#"register(Widget { name = "a" })"#).unwrap();
///
/// let loader = DynamicDefinitionLoader::<Widget>::new(LuaEngine::new().define::<Widget>("Widget"));
/// let loaded = loader.extract_data_from_file(&file);
/// assert_eq!(loaded[0].name, "a");
/// ```
#[derive(Clone, Default)]
pub struct LuaEngine {
    constructors: BTreeMap<String, Constructor>,
}

impl LuaEngine {
    /// Extension of the files this engine runs.
    pub const EXTENSION: &'static str = "luau";

    /// Engine with no type constructors; see [`define`](Self::define).
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `T` constructible from scripts as the global function `name`.
    ///
    /// `name { ... }` deserializes the table into a `T`. Declaring the same name twice
    /// keeps the last declaration.
    pub fn define<T>(mut self, name: impl Into<String>) -> Self
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        let constructor: Constructor = Arc::new(|lua: &Lua, value: Value| -> mlua::Result<Definition> {
            let target: Arc<T> = Arc::new(lua.from_value(value)?);
            Ok(Definition {
                type_name: std::any::type_name::<T>(),
                emit: Arc::new(move |event_type| match event_type {
                    RegistrationEventType::Registered => register_arc(Arc::clone(&target)),
                    RegistrationEventType::Unregistered => unregister_arc(Arc::clone(&target)),
                }),
            })
        });
        self.constructors.insert(name.into(), constructor);
        self
    }

    /// Names of the declared type constructors.
    pub fn defined_names(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }

    /// Builds a fresh state with the registration API and constructors installed.
    fn new_state(&self) -> mlua::Result<Lua> {
        let lua = Lua::new();
        let globals = lua.globals();

        globals.set(
            "register",
            lua.create_function(|_, value: Value| {
                (definition_arg("register", value)?.emit)(RegistrationEventType::Registered);
                Ok(())
            })?,
        )?;
        globals.set(
            "unregister",
            lua.create_function(|_, value: Value| {
                (definition_arg("unregister", value)?.emit)(RegistrationEventType::Unregistered);
                Ok(())
            })?,
        )?;

        for (name, constructor) in &self.constructors {
            let constructor = Arc::clone(constructor);
            globals.set(
                name.as_str(),
                lua.create_function(move |lua, value: Value| constructor(lua, value))?,
            )?;
        }

        // Freezes the globals above; scripts get their own writable environment.
        lua.sandbox(true)?;
        Ok(lua)
    }
}

fn definition_arg(function: &str, value: Value) -> mlua::Result<Definition> {
    match value {
        Value::UserData(data) => data
            .borrow::<Definition>()
            .map(|definition| (*definition).clone())
            .map_err(|_| {
                mlua::Error::runtime(format!(
                    "{function} expects a value built by a type constructor"
                ))
            }),
        other => Err(mlua::Error::runtime(format!(
            "{function} expects a value built by a type constructor, got {}",
            other.type_name()
        ))),
    }
}

impl ScriptEngine for LuaEngine {
    fn extension(&self) -> &str {
        Self::EXTENSION
    }

    fn execute(&self, path: &Path) -> Result<(), ExecutionError> {
        let source = fs::read_to_string(path).map_err(|source| ExecutionError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let script_error = |err: mlua::Error| ExecutionError::Script {
            path: path.to_path_buf(),
            message: err.to_string(),
        };

        let lua = self.new_state().map_err(script_error)?;
        lua.load(source.as_str())
            .set_name(format!("@{}", path.display()))
            .exec()
            .map_err(script_error)
    }
}

impl fmt::Debug for LuaEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LuaEngine")
            .field("constructors", &self.constructors.keys().collect::<Vec<_>>())
            .finish()
    }
}
