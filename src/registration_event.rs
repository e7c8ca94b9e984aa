use std::fmt;
use std::sync::Arc;

/// Whether an object is being declared or retracted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegistrationEventType {
    /// The object was declared via [`register`](crate::register).
    Registered,
    /// The object was retracted via [`unregister`](crate::unregister).
    Unregistered,
}

impl fmt::Display for RegistrationEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistrationEventType::Registered => write!(f, "registered"),
            RegistrationEventType::Unregistered => write!(f, "unregistered"),
        }
    }
}

/// One register/unregister occurrence, as seen by listeners on the event bus.
///
/// Events are immutable and can only be created by [`register`](crate::register),
/// [`unregister`](crate::unregister) and their `_arc` variants. Listeners receive them
/// by reference; cloning an event only clones the `Arc` around the target.
///
/// # Examples
///
/// ```rust
/// use registration_loader::{event_bus, register, RegistrationEventType};
/// use std::sync::{Arc, Mutex};
///
/// struct Greeting(&'static str);
///
/// let seen = Arc::new(Mutex::new(Vec::new()));
/// let seen_clone = seen.clone();
/// let id = event_bus::subscribe::<Greeting>(move |event| {
///     seen_clone.lock().unwrap().push((event.target().0, event.event_type()));
/// });
///
/// register(Greeting("hello"));
/// event_bus::unsubscribe::<Greeting>(id);
///
/// assert_eq!(*seen.lock().unwrap(), vec![("hello", RegistrationEventType::Registered)]);
/// ```
#[derive(Debug)]
pub struct RegistrationEvent<T> {
    target: Arc<T>,
    event_type: RegistrationEventType,
}

impl<T> RegistrationEvent<T> {
    pub(crate) fn new(target: Arc<T>, event_type: RegistrationEventType) -> Self {
        Self { target, event_type }
    }

    /// The object being registered or unregistered.
    pub fn target(&self) -> &Arc<T> {
        &self.target
    }

    /// Whether the target was registered or unregistered.
    pub fn event_type(&self) -> RegistrationEventType {
        self.event_type
    }
}

// Manual impl so that `T` itself does not need to be `Clone`.
impl<T> Clone for RegistrationEvent<T> {
    fn clone(&self) -> Self {
        Self {
            target: Arc::clone(&self.target),
            event_type: self.event_type,
        }
    }
}

impl<T> fmt::Display for RegistrationEvent<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {{ type_name: {} }}",
            self.event_type,
            std::any::type_name::<T>()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registration_event_display() {
        let event = RegistrationEvent::new(Arc::new(7i32), RegistrationEventType::Registered);
        assert_eq!(event.to_string(), "registered { type_name: i32 }");

        let event = RegistrationEvent::new(
            Arc::new("x".to_string()),
            RegistrationEventType::Unregistered,
        );
        assert_eq!(
            event.to_string(),
            "unregistered { type_name: alloc::string::String }"
        );
    }

    #[test]
    fn test_registration_event_clone_shares_target() {
        struct NotClone(u8);

        let event = RegistrationEvent::new(Arc::new(NotClone(3)), RegistrationEventType::Registered);
        let cloned = event.clone();

        assert!(Arc::ptr_eq(event.target(), cloned.target()));
        assert_eq!(cloned.target().0, 3);
        assert_eq!(cloned.event_type(), RegistrationEventType::Registered);
    }
}
