//! Process-wide, type-keyed broadcaster of [`RegistrationEvent`]s.
//!
//! Every declared type `T` gets its own listener entry, created the first time the
//! type is subscribed to or published for. Matching is by exact `TypeId`: a listener on
//! `Box<dyn Trait>` or on a wrapper type never sees events published for the concrete
//! type inside it.
//!
//! Entries are never removed. A long-running process that sees many distinct types will
//! keep one (possibly empty) entry per type.
//!
//! # Examples
//!
//! ```
//! use registration_loader::{event_bus, register};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! struct Plugin;
//!
//! let count = Arc::new(AtomicUsize::new(0));
//! let count_clone = count.clone();
//! let subscription = event_bus::subscribe_scoped::<Plugin>(move |_event| {
//!     count_clone.fetch_add(1, Ordering::SeqCst);
//! });
//!
//! register(Plugin);
//! drop(subscription);
//! register(Plugin);
//!
//! assert_eq!(count.load(Ordering::SeqCst), 1);
//! ```

use std::{
    any::{Any, TypeId},
    collections::HashMap,
    fmt,
    marker::PhantomData,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, LazyLock, Mutex, RwLock,
    },
};

use tracing::error;

use crate::error::{panic_message, ListenerFailure, PublishError};
use crate::registration_event::{RegistrationEvent, RegistrationEventType};

/// Global map from declared type to its `Listenable<T>`, stored type-erased.
static LISTENABLES: LazyLock<RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

/// Handle identifying one subscribed listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    fn next() -> Self {
        ListenerId(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[cfg(test)]
    pub(crate) fn from_raw(raw: u64) -> Self {
        ListenerId(raw)
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

type Listener<T> = Arc<dyn Fn(&RegistrationEvent<T>) + Send + Sync + 'static>;

/// Ordered set of listeners interested in registrations of `T`.
struct Listenable<T> {
    listeners: Mutex<Vec<(ListenerId, Listener<T>)>>,
}

impl<T: Send + Sync + 'static> Listenable<T> {
    fn new() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
        }
    }

    fn add_listener(&self, listener: Listener<T>) -> ListenerId {
        let id = ListenerId::next();
        self.listeners
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push((id, listener));
        id
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock().unwrap_or_else(|p| p.into_inner());
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    fn len(&self) -> usize {
        self.listeners
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .len()
    }

    /// Notifies a snapshot of the current listeners, in subscription order.
    ///
    /// The listener list is not locked while callbacks run, so callbacks may subscribe
    /// or unsubscribe freely. A panicking listener is recorded and the remaining
    /// listeners are still notified.
    fn notify_listeners(&self, event: &RegistrationEvent<T>) -> Result<usize, PublishError> {
        let snapshot: Vec<(ListenerId, Listener<T>)> = self
            .listeners
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone();

        let mut failures = Vec::new();
        for (id, listener) in &snapshot {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| listener(event))) {
                failures.push(ListenerFailure {
                    listener: *id,
                    message: panic_message(payload.as_ref()),
                });
            }
        }

        if failures.is_empty() {
            Ok(snapshot.len())
        } else {
            Err(PublishError::ListenerPanicked {
                type_name: std::any::type_name::<T>(),
                failures,
            })
        }
    }
}

/// Resolves the entry for `T`, creating it on first access.
///
/// Concurrent first accesses race on the write lock and converge on a single entry.
fn listenable<T: Send + Sync + 'static>() -> Arc<Listenable<T>> {
    let existing = lookup::<T>(&LISTENABLES.read().unwrap_or_else(|p| p.into_inner()));
    if let Some(found) = existing {
        return found;
    }

    let mut map = LISTENABLES.write().unwrap_or_else(|p| p.into_inner());
    // Another thread may have created it between the two locks.
    if let Some(found) = lookup::<T>(&map) {
        return found;
    }
    let created = Arc::new(Listenable::<T>::new());
    map.insert(TypeId::of::<T>(), created.clone());
    created
}

/// Entries are only ever inserted under `TypeId::of::<T>()` as a `Listenable<T>`.
fn lookup<T: Send + Sync + 'static>(
    map: &HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
) -> Option<Arc<Listenable<T>>> {
    map.get(&TypeId::of::<T>())
        .cloned()
        .and_then(|any| any.downcast::<Listenable<T>>().ok())
}

/// Subscribes `listener` to every registration event published for exactly `T`.
///
/// Returns the id needed to [`unsubscribe`] it later.
pub fn subscribe<T: Send + Sync + 'static>(
    listener: impl Fn(&RegistrationEvent<T>) + Send + Sync + 'static,
) -> ListenerId {
    listenable::<T>().add_listener(Arc::new(listener))
}

/// Removes a listener previously added with [`subscribe`].
///
/// Returns `false` if no listener with that id is subscribed for `T`.
pub fn unsubscribe<T: Send + Sync + 'static>(id: ListenerId) -> bool {
    listenable::<T>().remove_listener(id)
}

/// Number of listeners currently subscribed for `T`.
pub fn subscriber_count<T: Send + Sync + 'static>() -> usize {
    listenable::<T>().len()
}

/// Synchronously notifies every listener subscribed for `T`.
///
/// Returns how many listeners were notified.
///
/// # Errors
///
/// [`PublishError::ListenerPanicked`] if one or more listeners panicked. All other
/// listeners have still been notified by the time the error is returned.
pub fn publish<T: Send + Sync + 'static>(event: RegistrationEvent<T>) -> Result<usize, PublishError> {
    listenable::<T>().notify_listeners(&event)
}

/// Subscription that removes its listener when dropped.
#[must_use = "the listener is removed as soon as the subscription is dropped"]
pub struct Subscription<T: Send + Sync + 'static> {
    id: ListenerId,
    listenable: Arc<Listenable<T>>,
    _marker: PhantomData<fn(T)>,
}

impl<T: Send + Sync + 'static> Subscription<T> {
    /// Id of the subscribed listener.
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Removes the listener now. Equivalent to dropping the subscription.
    pub fn unsubscribe(self) {}
}

impl<T: Send + Sync + 'static> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.listenable.remove_listener(self.id);
    }
}

/// Like [`subscribe`], but ties the listener's lifetime to the returned guard.
pub fn subscribe_scoped<T: Send + Sync + 'static>(
    listener: impl Fn(&RegistrationEvent<T>) + Send + Sync + 'static,
) -> Subscription<T> {
    let listenable = listenable::<T>();
    let id = listenable.add_listener(Arc::new(listener));
    Subscription {
        id,
        listenable,
        _marker: PhantomData,
    }
}

// -------------------------------------------------------------------------------------------------
// Registration API used by definition files
// -------------------------------------------------------------------------------------------------

fn emit<T: Send + Sync + 'static>(target: Arc<T>, event_type: RegistrationEventType) {
    if let Err(err) = publish(RegistrationEvent::new(target, event_type)) {
        error!("Failed to notify registration listeners: {err}");
    }
}

/// Registers an object, notifying any listeners interested in its type.
///
/// Listener failures are logged and never reach the caller.
///
/// # Examples
///
/// ```
/// use registration_loader::register;
///
/// #[derive(Debug)]
/// struct Rule { name: String }
///
/// // With nobody listening this is a no-op.
/// register(Rule { name: "default".to_string() });
/// ```
pub fn register<T: Send + Sync + 'static>(value: T) {
    register_arc(Arc::new(value));
}

/// Registers an `Arc`-wrapped object without re-wrapping it.
pub fn register_arc<T: Send + Sync + 'static>(value: Arc<T>) {
    emit(value, RegistrationEventType::Registered);
}

/// Unregisters an object, notifying any listeners interested in its type.
pub fn unregister<T: Send + Sync + 'static>(value: T) {
    unregister_arc(Arc::new(value));
}

/// Unregisters an `Arc`-wrapped object.
pub fn unregister_arc<T: Send + Sync + 'static>(value: Arc<T>) {
    emit(value, RegistrationEventType::Unregistered);
}

// -------------------------------------------------------------------------------------------------
// Tests
// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex as StdMutex;
    use std::thread;

    #[derive(Debug, PartialEq)]
    struct Widget(&'static str);

    #[test]
    fn test_publish_in_subscription_order() {
        struct Ordered;

        let calls = Arc::new(StdMutex::new(Vec::new()));
        let first = calls.clone();
        let second = calls.clone();

        let a = subscribe::<Ordered>(move |_| first.lock().unwrap().push("first"));
        let b = subscribe::<Ordered>(move |_| second.lock().unwrap().push("second"));

        let notified = publish(RegistrationEvent::new(
            Arc::new(Ordered),
            RegistrationEventType::Registered,
        ))
        .unwrap();

        assert_eq!(notified, 2);
        assert_eq!(*calls.lock().unwrap(), vec!["first", "second"]);

        assert!(unsubscribe::<Ordered>(a));
        assert!(unsubscribe::<Ordered>(b));
        assert!(!unsubscribe::<Ordered>(a));
    }

    #[test]
    fn test_register_and_unregister_event_types() {
        struct Toggle(u8);

        let seen = Arc::new(StdMutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let subscription = subscribe_scoped::<Toggle>(move |event| {
            seen_clone
                .lock()
                .unwrap()
                .push((event.target().0, event.event_type()));
        });

        register(Toggle(1));
        unregister(Toggle(1));
        drop(subscription);

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                (1, RegistrationEventType::Registered),
                (1, RegistrationEventType::Unregistered),
            ]
        );
    }

    #[test]
    fn test_exact_type_matching_only() {
        struct Special(#[allow(dead_code)] Widget);

        let widget_events = Arc::new(StdMutex::new(0));
        let boxed_events = Arc::new(StdMutex::new(0));
        let w = widget_events.clone();
        let b = boxed_events.clone();

        let _widget_sub = subscribe_scoped::<Widget>(move |_| *w.lock().unwrap() += 1);
        let _boxed_sub =
            subscribe_scoped::<Box<dyn Any + Send + Sync>>(move |_| *b.lock().unwrap() += 1);

        register(Special(Widget("inner")));

        assert_eq!(*widget_events.lock().unwrap(), 0);
        assert_eq!(*boxed_events.lock().unwrap(), 0);
    }

    #[test]
    fn test_panicking_listener_does_not_stop_others() {
        struct Fragile;

        let reached = Arc::new(StdMutex::new(false));
        let reached_clone = reached.clone();

        let bad = subscribe_scoped::<Fragile>(|_| panic!("listener exploded"));
        let _good = subscribe_scoped::<Fragile>(move |_| *reached_clone.lock().unwrap() = true);

        let result = publish(RegistrationEvent::new(
            Arc::new(Fragile),
            RegistrationEventType::Registered,
        ));

        assert!(*reached.lock().unwrap());
        assert_eq!(
            result,
            Err(PublishError::ListenerPanicked {
                type_name: std::any::type_name::<Fragile>(),
                failures: vec![ListenerFailure {
                    listener: bad.id(),
                    message: "listener exploded".to_string(),
                }],
            })
        );
    }

    #[test]
    fn test_register_swallows_listener_failures() {
        struct Swallowed;

        let _sub = subscribe_scoped::<Swallowed>(|_| panic!("ignored by register"));
        register(Swallowed);
    }

    #[test]
    fn test_subscription_drop_removes_listener() {
        struct Scoped;

        assert_eq!(subscriber_count::<Scoped>(), 0);
        let subscription = subscribe_scoped::<Scoped>(|_| {});
        assert_eq!(subscriber_count::<Scoped>(), 1);
        subscription.unsubscribe();
        assert_eq!(subscriber_count::<Scoped>(), 0);
    }

    #[test]
    fn test_listener_subscribed_during_publish_misses_it() {
        struct Late;

        let late_calls = Arc::new(StdMutex::new(0));
        let late_ids = Arc::new(StdMutex::new(Vec::new()));
        let late_calls_clone = late_calls.clone();
        let late_ids_clone = late_ids.clone();

        let _sub = subscribe_scoped::<Late>(move |_| {
            let counter = late_calls_clone.clone();
            let id = subscribe::<Late>(move |_| *counter.lock().unwrap() += 1);
            late_ids_clone.lock().unwrap().push(id);
        });

        register(Late);
        assert_eq!(*late_calls.lock().unwrap(), 0);

        for id in late_ids.lock().unwrap().drain(..) {
            unsubscribe::<Late>(id);
        }
    }

    #[test]
    fn test_concurrent_first_access_converges() {
        struct Fresh;

        let handles: Vec<_> = (0..8)
            .map(|_| thread::spawn(|| subscribe::<Fresh>(|_| {})))
            .collect();
        let ids: Vec<ListenerId> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(subscriber_count::<Fresh>(), 8);
        for id in ids {
            assert!(unsubscribe::<Fresh>(id));
        }
        assert_eq!(subscriber_count::<Fresh>(), 0);
    }

    #[test]
    fn test_existing_subscribers_survive_concurrent_lookups() {
        struct Settled;

        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = hits.clone();
        let _first = subscribe_scoped::<Settled>(move |_| {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        });

        let handles: Vec<_> = (0..8)
            .map(|_| thread::spawn(|| subscribe_scoped::<Settled>(|_| {})))
            .collect();
        let others: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(subscriber_count::<Settled>(), 9);

        register(Settled);
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        drop(others);
        assert_eq!(subscriber_count::<Settled>(), 1);
    }

    #[test]
    fn test_listener_id_display() {
        assert_eq!(ListenerId::from_raw(12).to_string(), "#12");
    }
}
