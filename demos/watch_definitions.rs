//! Watches a directory of `.luau` widget definitions and prints the loaded set
//! whenever it changes.
//!
//! ```text
//! cargo run --example watch_definitions -- ./widgets
//! ```
//!
//! A definition file looks like:
//!
//! ```lua
//! register(Widget { name = "dial", size = 3 })
//! ```

use registration_loader::{DynamicDefinitionLoader, LuaEngine, SynchronisedFilesDataSource};
use serde::Deserialize;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Deserialize)]
struct Widget {
    name: String,
    #[serde(default)]
    size: u32,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let directory = std::env::args().nth(1).unwrap_or_else(|| ".".to_string());

    let loader = DynamicDefinitionLoader::<Widget>::new(LuaEngine::new().define::<Widget>("Widget"));
    let source = SynchronisedFilesDataSource::new(&directory, loader);
    source.start()?;

    let mut last = Vec::new();
    loop {
        let current: Vec<(String, u32)> = source
            .get_all()
            .iter()
            .map(|widget| (widget.name.clone(), widget.size))
            .collect();
        if current != last {
            println!("{} widget(s):", current.len());
            for (name, size) in &current {
                println!("  {name} (size {size})");
            }
            last = current;
        }
        std::thread::sleep(Duration::from_millis(500));
    }
}
