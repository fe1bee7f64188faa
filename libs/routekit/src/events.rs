//! Lifecycle event bus used by the dispatch loop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::factory::{ClassRegistry, ComponentClass, FactoryError, Instance};
use crate::message::{SharedRequest, SharedResponse};

/// Fired before each routing hop resolves its key. Stopping it ends the dispatch.
pub const BEFORE_ROUTE_ACTION: &str = "before_route_action";
pub const BEFORE_INITIALIZE_CONTROLLER: &str = "before_initialize_controller";
pub const BEFORE_EXECUTE_CONTROLLER: &str = "before_execute_controller";
pub const AFTER_EXECUTE_CONTROLLER: &str = "after_execute_controller";

/// Payload passed to listeners.
#[derive(Debug, Clone, Default)]
pub struct Event {
    request: Option<SharedRequest>,
    response: Option<SharedResponse>,
    handler: Option<String>,
    stopped: bool,
}

impl Event {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_dispatch(request: SharedRequest, response: SharedResponse) -> Self {
        Self {
            request: Some(request),
            response: Some(response),
            handler: None,
            stopped: false,
        }
    }

    pub fn with_handler(mut self, class: impl Into<String>) -> Self {
        self.handler = Some(class.into());
        self
    }

    pub fn request(&self) -> Option<&SharedRequest> {
        self.request.as_ref()
    }

    pub fn response(&self) -> Option<&SharedResponse> {
        self.response.as_ref()
    }

    /// Class of the handler for the current hop, once it is known.
    pub fn handler(&self) -> Option<&str> {
        self.handler.as_deref()
    }

    /// Prevent lower-priority listeners from seeing this event.
    pub fn stop_propagation(&mut self) {
        self.stopped = true;
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }
}

pub trait EventListener: Send + Sync {
    fn on_event(&self, name: &str, event: &mut Event);
}

impl<F> EventListener for F
where
    F: Fn(&str, &mut Event) + Send + Sync,
{
    fn on_event(&self, name: &str, event: &mut Event) {
        self(name, event)
    }
}

/// The bus contract the dispatch loop depends on.
pub trait EventDispatcher: Send + Sync {
    fn dispatch(&self, name: &str, event: &mut Event);

    /// Higher priority runs first; equal priorities run in registration order.
    fn add_listener(&self, name: &str, listener: Arc<dyn EventListener>, priority: i32);

    fn remove_listeners(&self, name: &str);

    fn has_listeners(&self, name: &str) -> bool;
}

#[derive(Clone)]
struct Registered {
    priority: i32,
    seq: u64,
    listener: Arc<dyn EventListener>,
}

/// In-process [`EventDispatcher`] keyed by event name.
#[derive(Default)]
pub struct EventManager {
    listeners: DashMap<String, Vec<Registered>>,
    next_seq: AtomicU64,
}

impl std::fmt::Debug for EventManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self.listeners.iter().map(|e| e.key().clone()).collect();
        f.debug_struct("EventManager")
            .field("events", &names)
            .finish()
    }
}

impl EventManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience for closures.
    pub fn listen<F>(&self, name: &str, priority: i32, listener: F)
    where
        F: Fn(&str, &mut Event) + Send + Sync + 'static,
    {
        self.add_listener(name, Arc::new(listener), priority);
    }
}

impl EventDispatcher for EventManager {
    fn dispatch(&self, name: &str, event: &mut Event) {
        // Snapshot so listeners may register or remove listeners themselves.
        let listeners = match self.listeners.get(&name.to_lowercase()) {
            Some(entry) => entry.value().clone(),
            None => return,
        };
        for registered in &listeners {
            registered.listener.on_event(name, event);
            if event.is_stopped() {
                tracing::debug!(event = name, "event propagation stopped");
                break;
            }
        }
    }

    fn add_listener(&self, name: &str, listener: Arc<dyn EventListener>, priority: i32) {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let mut entry = self.listeners.entry(name.to_lowercase()).or_default();
        entry.push(Registered {
            priority,
            seq,
            listener,
        });
        entry.sort_by_key(|r| (std::cmp::Reverse(r.priority), r.seq));
    }

    fn remove_listeners(&self, name: &str) {
        self.listeners.remove(&name.to_lowercase());
    }

    fn has_listeners(&self, name: &str) -> bool {
        self.listeners
            .get(&name.to_lowercase())
            .is_some_and(|entry| !entry.is_empty())
    }
}

pub(crate) fn register_classes(registry: &mut ClassRegistry) -> Result<(), FactoryError> {
    registry.register(ComponentClass::new("EventManager", |_args| {
        let manager: Arc<dyn EventDispatcher> = Arc::new(EventManager::new());
        Ok(Instance::new(manager))
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn recorder(
        log: &Arc<Mutex<Vec<String>>>,
        tag: &'static str,
    ) -> impl Fn(&str, &mut Event) + Send + Sync + 'static {
        let log = Arc::clone(log);
        move |name: &str, _event: &mut Event| log.lock().push(format!("{tag}:{name}"))
    }

    #[test]
    fn priority_then_registration_order() {
        let bus = EventManager::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.listen("e", 0, recorder(&log, "low-1"));
        bus.listen("e", 10, recorder(&log, "high"));
        bus.listen("e", 0, recorder(&log, "low-2"));

        bus.dispatch("e", &mut Event::new());
        assert_eq!(*log.lock(), vec!["high:e", "low-1:e", "low-2:e"]);
    }

    #[test]
    fn stop_propagation_skips_remaining_listeners() {
        let bus = EventManager::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.listen("e", 5, |_: &str, event: &mut Event| event.stop_propagation());
        bus.listen("e", 0, recorder(&log, "late"));

        let mut event = Event::new();
        bus.dispatch("e", &mut event);
        assert!(event.is_stopped());
        assert!(log.lock().is_empty());
    }

    #[test]
    fn unknown_events_are_ignored_and_listeners_removable() {
        let bus = EventManager::new();
        bus.dispatch("nobody-listens", &mut Event::new());

        bus.listen(BEFORE_ROUTE_ACTION, 0, |_: &str, _: &mut Event| {});
        assert!(bus.has_listeners("BEFORE_ROUTE_ACTION"));
        bus.remove_listeners(BEFORE_ROUTE_ACTION);
        assert!(!bus.has_listeners(BEFORE_ROUTE_ACTION));
    }

    #[test]
    fn registered_class_is_a_dispatcher() {
        let mut registry = ClassRegistry::new();
        register_classes(&mut registry).unwrap();
        let class = registry.get("eventmanager").unwrap();
        let inst = class.build(&crate::factory::Args::default()).unwrap();
        assert!(inst.is::<dyn EventDispatcher>());
    }
}
