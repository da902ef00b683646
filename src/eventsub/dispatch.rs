use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::value::RawValue;

pub type Handler = Arc<dyn Fn(&RawValue) + Send + Sync>;

/// Routes verified notification payloads to the handler registered for their event type.
#[derive(Default)]
pub struct Dispatcher {
    handlers: HashMap<String, Handler>,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<_> = self.handlers.keys().collect();
        types.sort();
        f.debug_struct("Dispatcher").field("handlers", &types).finish()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `event_type`, replacing any previous one.
    pub fn on(&mut self, event_type: &str, handler: Handler) {
        self.handlers.insert(event_type.to_string(), handler);
    }

    /// Returns false when no handler is registered for `event_type`.
    pub fn dispatch(&self, event_type: &str, event: &RawValue) -> bool {
        match self.handlers.get(event_type) {
            Some(handler) => {
                handler(event);
                true
            }
            None => {
                tracing::debug!(event_type, "no handler registered for event type");
                false
            }
        }
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn test_dispatch_routes_by_type() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);

        let mut dispatcher = Dispatcher::new();
        dispatcher.on(
            "channel.follow",
            Arc::new(move |_: &RawValue| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        let raw = RawValue::from_string("{}".to_string()).unwrap();
        assert!(dispatcher.dispatch("channel.follow", &raw));
        assert!(!dispatcher.dispatch("channel.unknown", &raw));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.handler_count(), 1);
    }
}
