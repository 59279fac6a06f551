//! Listener registry.
//!
//! Observers are compared by pointer identity: adding the same `Arc`
//! twice keeps one entry, two distinct instances of the same type are
//! two entries.

use crate::relay::TrafficSample;
use crate::status::Status;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::error;

/// Observer of controller changes
///
/// Callbacks run on the dispatcher thread, one at a time.
pub trait ScramblerListener: Send + Sync {
    /// Status transition accepted by the state machine
    fn on_status_changed(&self, status: Status);

    /// New line from the relay service log
    fn on_log(&self, line: &str);

    /// Bandwidth sample from the relay service
    fn on_traffic_update(&self, sample: TrafficSample);
}

/// Shared listener handle
pub type ListenerRef = Arc<dyn ScramblerListener>;

/// Deduplicated set of listeners
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: Vec<ListenerRef>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a listener. Returns false if it was already registered.
    pub fn add(&mut self, listener: ListenerRef) -> bool {
        if self.contains(&listener) {
            return false;
        }
        self.listeners.push(listener);
        true
    }

    /// Remove a listener. Returns false if it was not registered.
    pub fn remove(&mut self, listener: &ListenerRef) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|l| !same_listener(l, listener));
        self.listeners.len() != before
    }

    pub fn clear(&mut self) {
        self.listeners.clear();
    }

    pub fn contains(&self, listener: &ListenerRef) -> bool {
        self.listeners.iter().any(|l| same_listener(l, listener))
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn notify_status(&self, status: Status) {
        for listener in self.snapshot() {
            guarded("on_status_changed", || listener.on_status_changed(status));
        }
    }

    pub fn notify_log(&self, line: &str) {
        for listener in self.snapshot() {
            guarded("on_log", || listener.on_log(line));
        }
    }

    pub fn notify_traffic(&self, sample: TrafficSample) {
        for listener in self.snapshot() {
            guarded("on_traffic_update", || listener.on_traffic_update(sample));
        }
    }

    // Callbacks may queue registry changes; iterate a copy.
    fn snapshot(&self) -> Vec<ListenerRef> {
        self.listeners.clone()
    }
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

// One listener panicking must not cost the others their callback.
fn guarded(callback: &str, f: impl FnOnce()) {
    if let Err(panic_info) = panic::catch_unwind(AssertUnwindSafe(f)) {
        error!(
            "Listener panicked in {}: {}",
            callback,
            panic_message(&*panic_info)
        );
    }
}

pub(crate) fn panic_message(panic_info: &(dyn Any + Send)) -> String {
    if let Some(s) = panic_info.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic_info.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

fn same_listener(a: &ListenerRef, b: &ListenerRef) -> bool {
    // Compare data pointers only; vtable pointers may differ across codegen units.
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        statuses: Mutex<Vec<Status>>,
        logs: Mutex<Vec<String>>,
        traffic: Mutex<Vec<TrafficSample>>,
    }

    impl ScramblerListener for Recorder {
        fn on_status_changed(&self, status: Status) {
            self.statuses.lock().unwrap().push(status);
        }

        fn on_log(&self, line: &str) {
            self.logs.lock().unwrap().push(line.to_string());
        }

        fn on_traffic_update(&self, sample: TrafficSample) {
            self.traffic.lock().unwrap().push(sample);
        }
    }

    #[test]
    fn test_add_is_deduplicated() {
        let mut registry = ListenerRegistry::new();
        let listener: ListenerRef = Arc::new(Recorder::default());

        assert!(registry.add(listener.clone()));
        assert!(!registry.add(listener.clone()));
        assert_eq!(registry.len(), 1);

        let other: ListenerRef = Arc::new(Recorder::default());
        assert!(registry.add(other));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_remove_and_clear() {
        let mut registry = ListenerRegistry::new();
        let a: ListenerRef = Arc::new(Recorder::default());
        let b: ListenerRef = Arc::new(Recorder::default());
        registry.add(a.clone());
        registry.add(b.clone());

        assert!(registry.remove(&a));
        assert!(!registry.remove(&a));
        assert!(registry.contains(&b));

        registry.clear();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_fan_out() {
        let mut registry = ListenerRegistry::new();
        let a = Arc::new(Recorder::default());
        let b = Arc::new(Recorder::default());
        registry.add(a.clone());
        registry.add(b.clone());

        registry.notify_status(Status::On);
        registry.notify_log("bootstrapped");
        registry.notify_traffic(TrafficSample::new(1, 2, 3, 4));

        for recorder in [&a, &b] {
            assert_eq!(*recorder.statuses.lock().unwrap(), vec![Status::On]);
            assert_eq!(*recorder.logs.lock().unwrap(), vec!["bootstrapped".to_string()]);
            assert_eq!(
                *recorder.traffic.lock().unwrap(),
                vec![TrafficSample::new(1, 2, 3, 4)]
            );
        }
    }

    struct Faulty;

    impl ScramblerListener for Faulty {
        fn on_status_changed(&self, _: Status) {
            panic!("status handler bug");
        }

        fn on_log(&self, _: &str) {
            std::panic::panic_any(String::from("log handler bug"));
        }

        fn on_traffic_update(&self, _: TrafficSample) {
            std::panic::panic_any(42u8);
        }
    }

    #[test]
    fn test_panicking_listener_does_not_starve_others() {
        let mut registry = ListenerRegistry::new();
        let recorder = Arc::new(Recorder::default());
        registry.add(Arc::new(Faulty));
        registry.add(recorder.clone());

        registry.notify_status(Status::On);
        registry.notify_log("still delivered");
        registry.notify_traffic(TrafficSample::new(1, 1, 1, 1));

        assert_eq!(*recorder.statuses.lock().unwrap(), vec![Status::On]);
        assert_eq!(
            *recorder.logs.lock().unwrap(),
            vec!["still delivered".to_string()]
        );
        assert_eq!(recorder.traffic.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_panic_message() {
        let caught = std::panic::catch_unwind(|| panic!("boom")).unwrap_err();
        assert_eq!(panic_message(&*caught), "boom");

        let caught = std::panic::catch_unwind(|| std::panic::panic_any(7i32)).unwrap_err();
        assert_eq!(panic_message(&*caught), "Unknown panic");
    }

    #[test]
    fn test_empty_registry_is_noop() {
        let registry = ListenerRegistry::new();
        registry.notify_status(Status::Off);
        registry.notify_log("nobody listens");
    }
}
