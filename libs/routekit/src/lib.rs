//! # RouteKit - action routing and component composition
//!
//! RouteKit sits between a received request and the handler that serves it:
//!
//! - **Action keys**: `resource?context?action` routing keys.
//! - **Resolver**: a fixed best-match cascade over a routing section.
//! - **Configuration**: layered, case-insensitive `[section]` / `key = value` sources.
//! - **Factory**: builds components from configuration sections, sharing them by default.
//! - **Dispatch loop**: resolves, builds and runs handlers, chaining on their output.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use routekit::{ActionMapper, ClassRegistry, Configuration, ObjectFactory};
//!
//! let cfg = Configuration::with_defaults()?;
//! cfg.add_configuration("routes.ini")?;
//! let factory = Arc::new(ObjectFactory::new(Arc::new(cfg), ClassRegistry::discover()?));
//! let mapper = ActionMapper::from_factory(factory)?;
//!
//! let request = mapper.new_request()?;
//! request.write().set_route("A", "B", "C");
//! let (response, report) = mapper.dispatch(request)?;
//! ```
//!
//! Handler classes are contributed at link time:
//!
//! ```rust,ignore
//! inventory::submit! {
//!     routekit::ComponentRegistrator(|registry| {
//!         registry.register(routekit::ComponentClass::handler("Greeter", |_| Ok(Greeter::default())))
//!     })
//! }
//! ```

pub use inventory;

pub mod action_key;
pub mod config;
pub mod contracts;
pub mod events;
pub mod factory;
pub mod mapper;
pub mod message;
pub mod resolver;

pub use action_key::{create_key, ActionKey, ActionKeyError};
pub use config::{ConfigError, ConfigValue, Configuration};
pub use contracts::{ControllerState, Handler, HandlerError, SharedHandler};
pub use events::{Event, EventDispatcher, EventListener, EventManager};
pub use factory::{
    Argument, Args, ClassRegistry, ComponentClass, ComponentRegistrator, FactoryError, Instance,
    ObjectFactory, Overrides, RequiredInterfaces, Value,
};
pub use mapper::{ActionMapper, DispatchError, DispatchReport, Hop, Route, Termination};
pub use message::{Request, Response, SharedRequest, SharedResponse};
pub use resolver::{get_best_match, KeyProvider};
