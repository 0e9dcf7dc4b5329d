//! Routes decoded envelopes to application handlers.

use std::collections::HashMap;
use std::fmt;

use elixus_proto::{Envelope, Opcode};
use tracing::{debug, trace};

/// A handler invoked with every envelope matching its route.
pub type Handler = Box<dyn FnMut(&Envelope) + Send>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RouteKey {
    op: Opcode,
    event: Option<String>,
}

/// Maps `(opcode, event name)` to handlers.
///
/// Handlers run synchronously on the connection task, in arrival order, so
/// they must not block. Envelopes nobody asked for are dropped with a
/// diagnostic.
#[derive(Default)]
pub struct EventRouter {
    routes: HashMap<RouteKey, Vec<Handler>>,
    any_dispatch: Vec<Handler>,
}

impl EventRouter {
    /// Create an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for every envelope with the given opcode.
    pub fn on<F>(&mut self, op: Opcode, handler: F) -> &mut Self
    where
        F: FnMut(&Envelope) + Send + 'static,
    {
        self.insert(RouteKey { op, event: None }, Box::new(handler));
        self
    }

    /// Register a handler for a named dispatch event.
    pub fn on_dispatch<F>(&mut self, event: impl Into<String>, handler: F) -> &mut Self
    where
        F: FnMut(&Envelope) + Send + 'static,
    {
        let key = RouteKey {
            op: Opcode::Dispatch,
            event: Some(event.into()),
        };
        self.insert(key, Box::new(handler));
        self
    }

    /// Register a handler for every dispatch event, after named handlers.
    pub fn on_any_dispatch<F>(&mut self, handler: F) -> &mut Self
    where
        F: FnMut(&Envelope) + Send + 'static,
    {
        self.any_dispatch.push(Box::new(handler));
        self
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.values().map(Vec::len).sum::<usize>() + self.any_dispatch.len()
    }

    /// Whether no handlers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver an envelope; returns how many handlers saw it.
    pub fn route(&mut self, envelope: &Envelope) -> usize {
        let key = RouteKey {
            op: envelope.op,
            event: envelope.event_name().map(str::to_owned),
        };

        let mut delivered = 0;
        if let Some(handlers) = self.routes.get_mut(&key) {
            for handler in handlers.iter_mut() {
                handler(envelope);
            }
            delivered += handlers.len();
        }

        if envelope.op == Opcode::Dispatch {
            for handler in &mut self.any_dispatch {
                handler(envelope);
            }
            delivered += self.any_dispatch.len();
        }

        if delivered == 0 {
            match (envelope.op, envelope.event_name()) {
                (Opcode::Unknown(code), _) => {
                    debug!(op = code, "dropping envelope with unknown opcode");
                }
                (Opcode::Dispatch, event) => {
                    debug!(event = event.unwrap_or("<none>"), seq = ?envelope.s, "no handler for dispatch");
                }
                (op, _) => trace!(%op, "no handler for control envelope"),
            }
        }

        delivered
    }

    fn insert(&mut self, key: RouteKey, handler: Handler) {
        self.routes.entry(key).or_default().push(handler);
    }
}

impl fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventRouter")
            .field("routes", &self.routes.keys().collect::<Vec<_>>())
            .field("any_dispatch", &self.any_dispatch.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::sync::{Arc, Mutex};

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) -> Handler) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let make = {
            let log = Arc::clone(&log);
            move |tag: &str| -> Handler {
                let log = Arc::clone(&log);
                let tag = tag.to_string();
                Box::new(move |env: &Envelope| {
                    let seq = env.s.map_or_else(|| "-".to_string(), |s| s.to_string());
                    log.lock().unwrap().push(format!("{tag}:{seq}"));
                })
            }
        };
        (log, make)
    }

    #[test]
    fn test_named_dispatch_routes_before_catch_all() {
        let (log, make) = recorder();
        let mut router = EventRouter::new();
        router.on_any_dispatch(make("any"));
        router.on_dispatch("MESSAGE_CREATE", make("message"));

        let delivered = router.route(&Envelope::dispatch(3, "MESSAGE_CREATE", json!({})));

        assert_eq!(delivered, 2);
        assert_eq!(*log.lock().unwrap(), vec!["message:3", "any:3"]);
    }

    #[test]
    fn test_other_events_skip_named_handlers() {
        let (log, make) = recorder();
        let mut router = EventRouter::new();
        router.on_dispatch("MESSAGE_CREATE", make("message"));

        let delivered = router.route(&Envelope::dispatch(4, "GUILD_CREATE", json!({})));

        assert_eq!(delivered, 0);
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_control_opcode_handler() {
        let (log, make) = recorder();
        let mut router = EventRouter::new();
        router.on(Opcode::HeartbeatAck, make("ack"));
        router.on_any_dispatch(make("any"));

        let delivered = router.route(&Envelope::new(Opcode::HeartbeatAck, Value::Null));

        assert_eq!(delivered, 1);
        assert_eq!(*log.lock().unwrap(), vec!["ack:-"]);
    }

    #[test]
    fn test_unknown_opcode_is_dropped() {
        let (log, make) = recorder();
        let mut router = EventRouter::new();
        router.on_any_dispatch(make("any"));

        let delivered = router.route(&Envelope::new(Opcode::Unknown(42), json!({"new": true})));

        assert_eq!(delivered, 0);
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_arrival_order_is_preserved() {
        let (log, make) = recorder();
        let mut router = EventRouter::new();
        router.on_any_dispatch(make("e"));

        for seq in [1, 2, 3, 2, 5] {
            router.route(&Envelope::dispatch(seq, "EVENT", Value::Null));
        }

        assert_eq!(*log.lock().unwrap(), vec!["e:1", "e:2", "e:3", "e:2", "e:5"]);
    }

    #[test]
    fn test_len() {
        let mut router = EventRouter::new();
        assert!(router.is_empty());
        router
            .on(Opcode::Hello, |_| {})
            .on_dispatch("READY", |_| {})
            .on_any_dispatch(|_| {});
        assert_eq!(router.len(), 3);
    }
}
