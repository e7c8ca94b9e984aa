//! Integration tests for correlating registrations with the loads that caused them.
//!
//! Definition "files" here are Rust closures keyed by file stem, run by a small
//! in-test engine. That keeps the tests independent of any script language while
//! going through exactly the same lock/bus machinery as a real engine.
//!
//! NOTE: Tests sharing `Widget` use #[serial], because the event bus is process-wide.

use registration_loader::event_bus::{self, subscriber_count};
use registration_loader::{
    lock_table, register, DynamicDefinitionLoader, ExecutionError, LoadError, ScriptEngine,
};
use serial_test::serial;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Barrier, Mutex};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
struct Widget(String);

type Script = Arc<dyn Fn() -> Result<(), ExecutionError> + Send + Sync>;

/// Runs the closure registered under the file's stem.
#[derive(Default)]
struct ScriptedEngine {
    scripts: Mutex<HashMap<String, Script>>,
    runs: AtomicUsize,
}

impl ScriptedEngine {
    fn with(self, stem: &str, script: impl Fn() -> Result<(), ExecutionError> + Send + Sync + 'static) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(stem.to_string(), Arc::new(script));
        self
    }

    fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

impl ScriptEngine for ScriptedEngine {
    fn extension(&self) -> &str {
        "src"
    }

    fn execute(&self, path: &Path) -> Result<(), ExecutionError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let stem = path.file_stem().unwrap().to_string_lossy().into_owned();
        let script = self.scripts.lock().unwrap().get(&stem).cloned();
        match script {
            Some(script) => script(),
            None => Err(ExecutionError::Io {
                path: path.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such script"),
            }),
        }
    }
}

fn widget(name: &str) -> Widget {
    Widget(name.to_string())
}

#[test]
#[serial]
fn test_single_registration_is_returned() {
    let engine = ScriptedEngine::default().with("a", || {
        register(widget("a"));
        Ok(())
    });
    let loader = DynamicDefinitionLoader::<Widget>::new(engine);

    let loaded = loader.extract_data_from_file(Path::new("defs/a.src"));
    assert_eq!(loaded.len(), 1);
    assert_eq!(*loaded[0], widget("a"));
}

#[test]
#[serial]
fn test_file_without_registration_yields_nothing() {
    let engine = ScriptedEngine::default().with("quiet", || Ok(()));
    let loader = DynamicDefinitionLoader::<Widget>::new(engine);

    assert!(loader.extract_data_from_file(Path::new("quiet.src")).is_empty());
    assert!(matches!(
        loader.try_extract_data_from_file(Path::new("quiet.src")),
        Err(LoadError::MissingRegistration { .. })
    ));
}

#[test]
#[serial]
fn test_scenario_supported_and_unsupported_files() {
    let executed = Arc::new(AtomicUsize::new(0));
    let executed_a = executed.clone();
    let executed_b = executed.clone();

    let engine = Arc::new(
        ScriptedEngine::default()
            .with("a", move || {
                executed_a.fetch_add(1, Ordering::SeqCst);
                register(widget("a"));
                Ok(())
            })
            .with("b", move || {
                executed_b.fetch_add(1, Ordering::SeqCst);
                register(widget("b"));
                Ok(())
            }),
    );
    let loader = DynamicDefinitionLoader::<Widget>::new(engine.clone());

    let a = loader.extract_data_from_file(Path::new("dir/a.src"));
    let b = loader.extract_data_from_file(Path::new("dir/b.txt"));

    assert_eq!(a.iter().map(|w| (**w).clone()).collect::<Vec<_>>(), vec![widget("a")]);
    assert!(b.is_empty());
    assert_eq!(executed.load(Ordering::SeqCst), 1);
    assert_eq!(engine.runs(), 1);
}

#[test]
#[serial]
fn test_no_listener_leaks_on_any_path() {
    let engine = ScriptedEngine::default()
        .with("ok", || {
            register(widget("ok"));
            Ok(())
        })
        .with("silent", || Ok(()))
        .with("failing", || {
            Err(ExecutionError::Script {
                path: PathBuf::from("failing.src"),
                message: "boom".to_string(),
            })
        })
        .with("panicking", || panic!("script panicked"));
    let loader = DynamicDefinitionLoader::<Widget>::new(engine);

    let before = subscriber_count::<Widget>();
    for file in ["ok.src", "silent.src", "failing.src", "panicking.src", "missing.src", "x.txt"] {
        let _ = loader.extract_data_from_file(Path::new(file));
        assert_eq!(subscriber_count::<Widget>(), before, "listener leaked by {file}");
        assert!(!lock_table::is_locked::<Widget>(), "lock leaked by {file}");
    }
}

#[test]
#[serial]
fn test_concurrent_same_type_loads_never_cross() {
    let engine = Arc::new(
        ScriptedEngine::default()
            .with("f1", || {
                register(widget("a"));
                thread::yield_now();
                Ok(())
            })
            .with("f2", || {
                thread::yield_now();
                register(widget("b"));
                Ok(())
            }),
    );

    for _ in 0..100 {
        let barrier = Arc::new(Barrier::new(2));
        let handles: Vec<_> = [("f1.src", "a"), ("f2.src", "b")]
            .into_iter()
            .map(|(file, expected)| {
                let loader = DynamicDefinitionLoader::<Widget>::new(engine.clone());
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    let loaded = loader.extract_data_from_file(Path::new(file));
                    (loaded, expected)
                })
            })
            .collect();

        for handle in handles {
            let (loaded, expected) = handle.join().unwrap();
            assert_eq!(loaded.len(), 1);
            assert_eq!(*loaded[0], widget(expected));
        }
    }
}

#[test]
#[serial]
fn test_second_load_of_same_type_waits_for_first() {
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let release_rx = Mutex::new(release_rx);
    let (started_tx, started_rx) = mpsc::channel::<()>();
    let started_tx = Mutex::new(started_tx);

    let engine = Arc::new(
        ScriptedEngine::default()
            .with("slow", move || {
                started_tx.lock().unwrap().send(()).unwrap();
                release_rx
                    .lock()
                    .unwrap()
                    .recv_timeout(Duration::from_secs(10))
                    .unwrap();
                register(widget("slow"));
                Ok(())
            })
            .with("fast", || {
                register(widget("fast"));
                Ok(())
            }),
    );

    let slow_loader = DynamicDefinitionLoader::<Widget>::new(engine.clone());
    let slow = thread::spawn(move || slow_loader.extract_data_from_file(Path::new("slow.src")));
    started_rx.recv_timeout(Duration::from_secs(10)).unwrap();

    let (done_tx, done_rx) = mpsc::channel();
    let fast_loader = DynamicDefinitionLoader::<Widget>::new(engine.clone());
    let fast = thread::spawn(move || {
        let loaded = fast_loader.extract_data_from_file(Path::new("fast.src"));
        done_tx.send(()).unwrap();
        loaded
    });

    // The fast load cannot even start listening while the slow one holds the lock.
    assert!(done_rx.recv_timeout(Duration::from_millis(200)).is_err());

    release_tx.send(()).unwrap();
    let slow_loaded = slow.join().unwrap();
    let fast_loaded = fast.join().unwrap();

    assert_eq!(*slow_loaded[0], widget("slow"));
    assert_eq!(*fast_loaded[0], widget("fast"));
}

#[test]
fn test_different_types_do_not_block_each_other() {
    #[derive(Debug, PartialEq)]
    struct Slow(u8);
    #[derive(Debug, PartialEq)]
    struct Fast(u8);

    let (release_tx, release_rx) = mpsc::channel::<()>();
    let release_rx = Mutex::new(release_rx);
    let (started_tx, started_rx) = mpsc::channel::<()>();
    let started_tx = Mutex::new(started_tx);

    let slow_engine = ScriptedEngine::default().with("slow", move || {
        started_tx.lock().unwrap().send(()).unwrap();
        release_rx
            .lock()
            .unwrap()
            .recv_timeout(Duration::from_secs(10))
            .unwrap();
        register(Slow(1));
        Ok(())
    });
    let fast_engine = ScriptedEngine::default().with("fast", || {
        register(Fast(2));
        Ok(())
    });

    let slow_loader = DynamicDefinitionLoader::<Slow>::new(slow_engine);
    let slow = thread::spawn(move || slow_loader.extract_data_from_file(Path::new("slow.src")));
    started_rx.recv_timeout(Duration::from_secs(10)).unwrap();
    assert!(lock_table::is_locked::<Slow>());

    let fast_loader = DynamicDefinitionLoader::<Fast>::new(fast_engine);
    let fast_loaded = fast_loader.extract_data_from_file(Path::new("fast.src"));

    // Finished while the slow load is still holding its own lock.
    assert_eq!(*fast_loaded[0], Fast(2));
    assert!(lock_table::is_locked::<Slow>());

    release_tx.send(()).unwrap();
    assert_eq!(*slow.join().unwrap()[0], Slow(1));
}

#[test]
fn test_listeners_match_exact_type_only() {
    #[derive(Debug)]
    struct Base;
    #[derive(Debug)]
    struct Derived(#[allow(dead_code)] Base);

    let base_calls = Arc::new(AtomicUsize::new(0));
    let base_calls_clone = base_calls.clone();
    let _subscription = event_bus::subscribe_scoped::<Base>(move |_| {
        base_calls_clone.fetch_add(1, Ordering::SeqCst);
    });

    register(Derived(Base));
    assert_eq!(base_calls.load(Ordering::SeqCst), 0);

    register(Base);
    assert_eq!(base_calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_registration_of_other_type_is_not_captured() {
    #[derive(Debug)]
    struct Expected;
    #[derive(Debug)]
    struct Unexpected;

    let engine = ScriptedEngine::default().with("other", || {
        register(Unexpected);
        Ok(())
    });
    let loader = DynamicDefinitionLoader::<Expected>::new(engine);

    match loader.try_extract_data_from_file(Path::new("other.src")) {
        Err(LoadError::MissingRegistration { type_name, .. }) => {
            assert!(type_name.ends_with("Expected"));
        }
        other => panic!("unexpected result: {other:?}"),
    }
}
