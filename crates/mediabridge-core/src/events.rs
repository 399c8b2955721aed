//! Event keys and the table of listeners subscribed to them.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use serde_json::Value;

/// Which entity an event belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    Session(String),
    Publisher(String),
    /// Subscriber events share one namespace; the payload names the stream.
    Subscriber,
    /// Not tied to one entity, e.g. `publisherStreamCreated`.
    Global,
}

/// Routing key: a scope plus an event type such as `sessionDidConnect`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventKey {
    pub scope: Scope,
    pub event_type: String,
}

impl EventKey {
    pub fn new(scope: Scope, event_type: &str) -> Self {
        Self {
            scope,
            event_type: event_type.to_string(),
        }
    }

    pub fn session(session_id: &str, event_type: &str) -> Self {
        Self::new(Scope::Session(session_id.to_string()), event_type)
    }

    pub fn publisher(publisher_id: &str, event_type: &str) -> Self {
        Self::new(Scope::Publisher(publisher_id.to_string()), event_type)
    }

    pub fn subscriber(event_type: &str) -> Self {
        Self::new(Scope::Subscriber, event_type)
    }

    pub fn global(event_type: &str) -> Self {
        Self::new(Scope::Global, event_type)
    }

    /// Inverse of `Display`. Names without a recognised prefix are global.
    pub fn parse(name: &str) -> Self {
        if let Some(event_type) = name.strip_prefix("subscriber:") {
            return Self::subscriber(event_type);
        }
        if let Some((id, event_type)) = name.rsplit_once(":session:") {
            return Self::session(id, event_type);
        }
        if let Some((id, event_type)) = name.rsplit_once(":publisher:") {
            return Self::publisher(id, event_type);
        }
        Self::global(name)
    }
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scope {
            Scope::Session(id) => write!(f, "{id}:session:{}", self.event_type),
            Scope::Publisher(id) => write!(f, "{id}:publisher:{}", self.event_type),
            Scope::Subscriber => write!(f, "subscriber:{}", self.event_type),
            Scope::Global => f.write_str(&self.event_type),
        }
    }
}

/// Event delivered to the host.
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeEvent {
    /// Fully qualified name, e.g. `s1:session:sessionDidConnect`.
    pub name: String,
    pub scope: Scope,
    pub event_type: String,
    pub payload: Value,
}

impl BridgeEvent {
    pub fn new(key: EventKey, payload: Value) -> Self {
        Self {
            name: key.to_string(),
            scope: key.scope,
            event_type: key.event_type,
            payload,
        }
    }

    pub fn key(&self) -> EventKey {
        EventKey::new(self.scope.clone(), &self.event_type)
    }
}

/// Trait for receiving events from the bridge.
/// Implementations must be Send + Sync (called from the bridge worker).
pub trait BridgeEventListener: Send + Sync {
    fn on_event(&self, event: BridgeEvent);
}

impl<F> BridgeEventListener for F
where
    F: Fn(BridgeEvent) + Send + Sync,
{
    fn on_event(&self, event: BridgeEvent) {
        self(event)
    }
}

/// Listener registrations, owned by the bridge worker.
///
/// Delivery order for one event: listeners on the exact key, then global
/// listeners for the same event type, then catch-all listeners, then the host
/// sink when the event name has been enabled.
#[derive(Default)]
pub struct SubscriptionTable {
    keyed: HashMap<EventKey, Vec<Arc<dyn BridgeEventListener>>>,
    catch_all: Vec<Arc<dyn BridgeEventListener>>,
    host_sink: Option<Arc<dyn BridgeEventListener>>,
    native: HashSet<EventKey>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, key: EventKey, listener: Arc<dyn BridgeEventListener>) {
        self.keyed.entry(key).or_default().push(listener);
    }

    /// Remove every listener for `key`, and stop forwarding it to the host.
    pub fn unsubscribe(&mut self, key: &EventKey) -> usize {
        self.native.remove(key);
        self.keyed.remove(key).map(|l| l.len()).unwrap_or(0)
    }

    pub fn add_listener(&mut self, listener: Arc<dyn BridgeEventListener>) {
        self.catch_all.push(listener);
    }

    pub fn set_host_sink(&mut self, sink: Option<Arc<dyn BridgeEventListener>>) {
        self.host_sink = sink;
    }

    pub fn set_native_events<S: AsRef<str>>(&mut self, names: &[S]) {
        self.native
            .extend(names.iter().map(|n| EventKey::parse(n.as_ref())));
    }

    pub fn remove_native_events<S: AsRef<str>>(&mut self, names: &[S]) {
        for name in names {
            self.native.remove(&EventKey::parse(name.as_ref()));
        }
    }

    pub fn is_native_enabled(&self, key: &EventKey) -> bool {
        self.native.contains(key)
    }

    /// Drop keyed listeners and native flags belonging to `scope`.
    pub fn purge_scope(&mut self, scope: &Scope) -> usize {
        let before = self.keyed.len() + self.native.len();
        self.keyed.retain(|key, _| &key.scope != scope);
        self.native.retain(|key| &key.scope != scope);
        before - (self.keyed.len() + self.native.len())
    }

    pub fn clear(&mut self) {
        self.keyed.clear();
        self.catch_all.clear();
        self.native.clear();
        self.host_sink = None;
    }

    /// Deliver `event` and return how many listeners saw it.
    pub fn publish(&self, event: &BridgeEvent) -> usize {
        let key = event.key();
        let mut delivered = 0;

        if let Some(listeners) = self.keyed.get(&key) {
            delivered += deliver(listeners, event);
        }
        if key.scope != Scope::Global {
            if let Some(listeners) = self.keyed.get(&EventKey::global(&key.event_type)) {
                delivered += deliver(listeners, event);
            }
        }
        delivered += deliver(&self.catch_all, event);

        if let Some(sink) = &self.host_sink {
            if self.native.contains(&key) {
                delivered += deliver(std::slice::from_ref(sink), event);
            }
        }
        delivered
    }
}

fn deliver(listeners: &[Arc<dyn BridgeEventListener>], event: &BridgeEvent) -> usize {
    let mut count = 0;
    for listener in listeners {
        let result = catch_unwind(AssertUnwindSafe(|| listener.on_event(event.clone())));
        match result {
            Ok(()) => count += 1,
            Err(_) => tracing::error!(event = %event.name, "listener panicked, continuing delivery"),
        }
    }
    count
}
