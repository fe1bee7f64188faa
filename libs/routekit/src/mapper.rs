//! The dispatch loop: resolve a route, build the handler, run it, chain.

use std::any::Any;
use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use thiserror::Error;

use crate::contracts::HandlerError;
use crate::events::{
    Event, EventDispatcher, AFTER_EXECUTE_CONTROLLER, BEFORE_EXECUTE_CONTROLLER,
    BEFORE_INITIALIZE_CONTROLLER, BEFORE_ROUTE_ACTION,
};
use crate::factory::{FactoryError, ObjectFactory, Overrides};
use crate::message::{Request, Response, SharedRequest, SharedResponse};
use crate::resolver::get_best_match;

/// Routing section used when none is configured.
pub const DEFAULT_ROUTING_SECTION: &str = "actionmapping";

/// Handler class and optional method parsed from a routing value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub class: String,
    pub method: Option<String>,
}

impl Route {
    /// Accepts `Class`, `Class::method` and `Class.method`.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        let (class, method) = match value.rsplit_once("::") {
            Some(split) => split,
            None => value.rsplit_once('.').unwrap_or((value, "")),
        };
        let class = class.trim();
        if class.is_empty() {
            return None;
        }
        let method = method.trim();
        Some(Self {
            class: class.to_string(),
            method: (!method.is_empty()).then(|| method.to_string()),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// The last handler's output did not resolve to another route.
    Completed,
    /// The incoming request matched no route.
    NoRoute,
    /// The next key equals the key just executed.
    SelfLoop,
    /// The next key was already executed earlier in this dispatch.
    Cycle,
    /// A `before_route_action` listener stopped propagation.
    Stopped,
    /// A handler returned an error or panicked.
    HandlerFault,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Hop {
    pub key: String,
    pub handler: String,
    pub method: Option<String>,
}

/// What happened during one dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub hops: Vec<Hop>,
    pub termination: Termination,
    pub fault: Option<String>,
}

impl DispatchReport {
    pub fn executed(&self) -> usize {
        self.hops.len()
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("failed to build '{name}'")]
    Factory {
        name: String,
        #[source]
        source: FactoryError,
    },
    #[error("instance '{name}' is not a {expected}")]
    UnexpectedInstance {
        name: String,
        expected: &'static str,
    },
}

/// Routes requests to handlers through the routing section of the configuration.
pub struct ActionMapper {
    factory: Arc<ObjectFactory>,
    events: Arc<dyn EventDispatcher>,
    routing_section: String,
}

impl std::fmt::Debug for ActionMapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionMapper")
            .field("routing_section", &self.routing_section)
            .finish_non_exhaustive()
    }
}

impl ActionMapper {
    pub fn new(factory: Arc<ObjectFactory>, events: Arc<dyn EventDispatcher>) -> Self {
        Self {
            factory,
            events,
            routing_section: DEFAULT_ROUTING_SECTION.to_string(),
        }
    }

    /// Use the factory's shared `event_manager` as the event bus.
    pub fn from_factory(factory: Arc<ObjectFactory>) -> Result<Self, DispatchError> {
        let name = "event_manager";
        let events = factory
            .get_instance(name, &Overrides::new())
            .map_err(|source| DispatchError::Factory {
                name: name.to_string(),
                source,
            })?
            .get::<dyn EventDispatcher>()
            .ok_or(DispatchError::UnexpectedInstance {
                name: name.to_string(),
                expected: "EventDispatcher",
            })?;
        Ok(Self::new(factory, events))
    }

    pub fn with_routing_section(mut self, section: impl Into<String>) -> Self {
        self.routing_section = section.into();
        self
    }

    pub fn routing_section(&self) -> &str {
        &self.routing_section
    }

    pub fn factory(&self) -> &Arc<ObjectFactory> {
        &self.factory
    }

    pub fn events(&self) -> &Arc<dyn EventDispatcher> {
        &self.events
    }

    /// A fresh request built from the `request` component section.
    pub fn new_request(&self) -> Result<SharedRequest, DispatchError> {
        self.new_message::<Request>("request")
    }

    /// A fresh response built from the `response` component section.
    pub fn new_response(&self) -> Result<SharedResponse, DispatchError> {
        self.new_message::<Response>("response")
    }

    fn new_message<T: Send + Sync + 'static>(
        &self,
        name: &str,
    ) -> Result<Arc<RwLock<T>>, DispatchError> {
        self.factory
            .get_new_instance(name, &Overrides::new())
            .map_err(|source| DispatchError::Factory {
                name: name.to_string(),
                source,
            })?
            .get::<RwLock<T>>()
            .ok_or(DispatchError::UnexpectedInstance {
                name: name.to_string(),
                expected: std::any::type_name::<T>(),
            })
    }

    /// Best-matching routing key and its raw value.
    pub fn resolve(&self, sender: &str, context: &str, action: &str) -> Option<(String, String)> {
        let keys = self
            .factory
            .configuration()
            .section_keys(&self.routing_section);
        let key = get_best_match(&keys, sender, context, action)?;
        let value = keys.raw(&key)?.to_string();
        Some((key, value))
    }

    /// Dispatch `request` with a fresh response.
    pub fn dispatch(
        &self,
        request: SharedRequest,
    ) -> Result<(SharedResponse, DispatchReport), DispatchError> {
        let response = self.new_response()?;
        let report = self.process(request, Arc::clone(&response))?;
        Ok((response, report))
    }

    /// Run the handler chain for `request`, accumulating results in `response`.
    ///
    /// Handler faults end the dispatch and are reported, not returned; only
    /// failures to build handlers or messages surface as errors.
    pub fn process(
        &self,
        request: SharedRequest,
        response: SharedResponse,
    ) -> Result<DispatchReport, DispatchError> {
        let request_id = request.read().id().to_string();
        response.write().set_request_id(request_id);

        let mut request = request;
        let mut hops: Vec<Hop> = Vec::new();
        let mut visited: HashSet<String> = HashSet::new();

        let finish = |hops: Vec<Hop>,
                      termination: Termination,
                      fault: Option<String>|
         -> Result<DispatchReport, DispatchError> {
            tracing::debug!(hops = hops.len(), ?termination, "dispatch finished");
            Ok(DispatchReport {
                hops,
                termination,
                fault,
            })
        };

        loop {
            let mut event = Event::for_dispatch(Arc::clone(&request), Arc::clone(&response));
            self.events.dispatch(BEFORE_ROUTE_ACTION, &mut event);
            if event.is_stopped() {
                return finish(hops, Termination::Stopped, None);
            }

            let (sender, context, action) = {
                let r = request.read();
                (
                    r.sender().to_string(),
                    r.context().to_string(),
                    r.action().to_string(),
                )
            };
            // Once a hop ran, a miss here can only come from a listener rewrite.
            let unrouted = if hops.is_empty() {
                Termination::NoRoute
            } else {
                Termination::Completed
            };
            let Some((key, value)) = self.resolve(&sender, &context, &action) else {
                tracing::debug!(%sender, %context, %action, "no route");
                return finish(hops, unrouted, None);
            };
            if let Some(previous) = hops.last() {
                if previous.key.eq_ignore_ascii_case(&key) {
                    tracing::debug!(%key, "route resolves to itself");
                    return finish(hops, Termination::SelfLoop, None);
                }
            }
            if !visited.insert(key.to_lowercase()) {
                tracing::warn!(%key, "route cycle detected");
                return finish(hops, Termination::Cycle, None);
            }
            let Some(route) = Route::parse(&value) else {
                tracing::warn!(%key, "routing entry names no handler");
                return finish(hops, unrouted, None);
            };

            let instance = self
                .factory
                .get_instance_of(&route.class, &Overrides::new())
                .map_err(|source| DispatchError::Factory {
                    name: route.class.clone(),
                    source,
                })?;
            let handler = instance
                .as_handler()
                .ok_or_else(|| DispatchError::UnexpectedInstance {
                    name: route.class.clone(),
                    expected: "Handler",
                })?;
            let class = instance.class().to_string();
            tracing::debug!(%key, handler = %class, method = ?route.method, "dispatching hop");

            response.write().route_from(&request.read());
            hops.push(Hop {
                key: key.clone(),
                handler: class.clone(),
                method: route.method.clone(),
            });

            let mut event = Event::for_dispatch(Arc::clone(&request), Arc::clone(&response))
                .with_handler(class.as_str());
            self.events.dispatch(BEFORE_INITIALIZE_CONTROLLER, &mut event);
            let initialized = contain(|| {
                handler
                    .lock()
                    .initialize(Arc::clone(&request), Arc::clone(&response))
            });
            if let Err(fault) = initialized {
                tracing::error!(handler = %class, error = %fault, "handler initialization failed");
                return finish(hops, Termination::HandlerFault, Some(fault));
            }

            let mut event = Event::for_dispatch(Arc::clone(&request), Arc::clone(&response))
                .with_handler(class.as_str());
            self.events.dispatch(BEFORE_EXECUTE_CONTROLLER, &mut event);
            let executed = contain(|| handler.lock().execute(route.method.as_deref()));
            if let Err(fault) = executed {
                tracing::error!(handler = %class, error = %fault, "handler execution failed");
                return finish(hops, Termination::HandlerFault, Some(fault));
            }
            let mut event = Event::for_dispatch(Arc::clone(&request), Arc::clone(&response))
                .with_handler(class.as_str());
            self.events.dispatch(AFTER_EXECUTE_CONTROLLER, &mut event);

            let (next_context, next_action) = {
                let r = response.read();
                (r.context().to_string(), r.action().to_string())
            };
            let Some((next_key, _)) = self.resolve(&class, &next_context, &next_action) else {
                return finish(hops, Termination::Completed, None);
            };
            if next_key.eq_ignore_ascii_case(&key) {
                tracing::debug!(%key, "route resolves to itself");
                return finish(hops, Termination::SelfLoop, None);
            }
            if visited.contains(&next_key.to_lowercase()) {
                tracing::warn!(%next_key, "route cycle detected");
                return finish(hops, Termination::Cycle, None);
            }

            let child = self.new_request()?;
            child.write().adopt(&response.read(), class);
            request = child;
        }
    }
}

/// Run a handler step, turning both errors and panics into a fault message.
fn contain<F>(step: F) -> Result<(), String>
where
    F: FnOnce() -> Result<(), HandlerError>,
{
    match catch_unwind(AssertUnwindSafe(step)) {
        Ok(result) => result.map_err(|err| err.to_string()),
        Err(payload) => Err(format!("handler panicked: {}", panic_message(&*payload))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        *msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_forms() {
        assert_eq!(
            Route::parse("Handler1::doThing"),
            Some(Route {
                class: "Handler1".into(),
                method: Some("doThing".into())
            })
        );
        assert_eq!(
            Route::parse("Handler2.finish"),
            Some(Route {
                class: "Handler2".into(),
                method: Some("finish".into())
            })
        );
        assert_eq!(
            Route::parse(" Plain "),
            Some(Route {
                class: "Plain".into(),
                method: None
            })
        );
        assert_eq!(Route::parse("Trailing::").unwrap().method, None);
        assert_eq!(Route::parse(""), None);
        assert_eq!(Route::parse("::run"), None);
    }

    #[test]
    fn contain_maps_errors_and_panics() {
        assert_eq!(contain(|| Ok(())), Ok(()));
        assert_eq!(
            contain(|| Err(HandlerError::Failed("bad input".into()))),
            Err("handler failed: bad input".to_string())
        );
        assert_eq!(
            contain(|| panic!("handler bug")),
            Err("handler panicked: handler bug".to_string())
        );
        let count = 3;
        assert_eq!(
            contain(|| panic!("{count} things broke")),
            Err("handler panicked: 3 things broke".to_string())
        );
    }

    #[test]
    fn report_counts_hops() {
        let report = DispatchReport {
            hops: vec![Hop {
                key: "A?B?C".into(),
                handler: "H".into(),
                method: None,
            }],
            termination: Termination::Completed,
            fault: None,
        };
        assert_eq!(report.executed(), 1);
        assert_eq!(
            serde_json::to_value(&report).unwrap()["termination"],
            "completed"
        );
    }
}
