//! Observer fan-out
//!
//! Events emitted by a single runner are totally ordered; the dispatcher
//! invokes observers synchronously, in registration order, so observers
//! must be cheap (or do their own buffering).

use std::sync::Arc;

use super::types::Event;

/// Receives every event the engine emits
pub trait EventObserver: Send + Sync {
    fn on_event(&self, event: &Event);
}

/// Fans one event stream out to registered observers
#[derive(Clone, Default)]
pub struct EventDispatcher {
    observers: Vec<Arc<dyn EventObserver>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_observer(&mut self, observer: Arc<dyn EventObserver>) {
        self.observers.push(observer);
    }

    pub fn emit(&self, event: Event) {
        tracing::debug!(event_type = event.event_type(), "emitting event");
        for observer in &self.observers {
            observer.on_event(&event);
        }
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("observers", &self.observers.len())
            .finish()
    }
}

pub mod testing {
    //! Recording observer shared by the engine test suites

    use std::sync::Mutex;

    use super::*;

    /// Records every event it sees, for assertions on order and content
    #[derive(Default)]
    pub struct RecordingObserver {
        events: Mutex<Vec<Event>>,
    }

    impl RecordingObserver {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn events(&self) -> Vec<Event> {
            self.events.lock().unwrap().clone()
        }

        pub fn event_types(&self) -> Vec<&'static str> {
            self.events.lock().unwrap().iter().map(|e| e.event_type()).collect()
        }
    }

    impl EventObserver for RecordingObserver {
        fn on_event(&self, event: &Event) {
            self.events.lock().unwrap().push(event.clone());
        }
    }
}
