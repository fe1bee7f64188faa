//! Per-dispatch request and response messages.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::factory::{ClassRegistry, ComponentClass, FactoryError, Instance, Value as Arg};

pub type SharedRequest = Arc<RwLock<Request>>;
pub type SharedResponse = Arc<RwLock<Response>>;

/// Fields common to requests and responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerMessage {
    id: String,
    #[serde(default)]
    sender: String,
    #[serde(default)]
    context: String,
    #[serde(default)]
    action: String,
    #[serde(default)]
    format: String,
    #[serde(default)]
    values: Map<String, Value>,
}

impl Default for ControllerMessage {
    fn default() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            sender: String::new(),
            context: String::new(),
            action: String::new(),
            format: String::new(),
            values: Map::new(),
        }
    }
}

impl ControllerMessage {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn format(&self) -> &str {
        &self.format
    }

    pub fn set_sender(&mut self, sender: impl Into<String>) {
        self.sender = sender.into();
    }

    pub fn set_context(&mut self, context: impl Into<String>) {
        self.context = context.into();
    }

    pub fn set_action(&mut self, action: impl Into<String>) {
        self.action = action.into();
    }

    pub fn set_format(&mut self, format: impl Into<String>) {
        self.format = format.into();
    }

    /// Set sender, context and action at once.
    pub fn set_route(
        &mut self,
        sender: impl Into<String>,
        context: impl Into<String>,
        action: impl Into<String>,
    ) {
        self.sender = sender.into();
        self.context = context.into();
        self.action = action.into();
    }

    pub fn get_value(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn set_value(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn has_value(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn remove_value(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }

    pub fn clear_values(&mut self) {
        self.values.clear();
    }
}

/// Inbound message for one hop of a dispatch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Request {
    #[serde(flatten)]
    message: ControllerMessage,
}

impl Request {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take over the routing state a previous hop left in `response`.
    pub fn adopt(&mut self, response: &Response, sender: impl Into<String>) {
        self.message.sender = sender.into();
        self.message.context = response.context.clone();
        self.message.action = response.action.clone();
        self.message.format = response.format.clone();
        self.message.values = response.values.clone();
    }

    pub fn into_shared(self) -> SharedRequest {
        Arc::new(RwLock::new(self))
    }
}

impl Deref for Request {
    type Target = ControllerMessage;

    fn deref(&self) -> &Self::Target {
        &self.message
    }
}

impl DerefMut for Request {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.message
    }
}

/// Outbound message; one instance accumulates results across all hops.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(flatten)]
    message: ControllerMessage,
    #[serde(default)]
    request_id: String,
}

impl Response {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id of the request that started the dispatch.
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn set_request_id(&mut self, id: impl Into<String>) {
        self.request_id = id.into();
    }

    /// Copy routing metadata (sender, context, action, format) from `request`.
    pub fn route_from(&mut self, request: &Request) {
        self.message.sender = request.sender.clone();
        self.message.context = request.context.clone();
        self.message.action = request.action.clone();
        if !request.format.is_empty() {
            self.message.format = request.format.clone();
        }
    }

    pub fn into_shared(self) -> SharedResponse {
        Arc::new(RwLock::new(self))
    }
}

impl Deref for Response {
    type Target = ControllerMessage;

    fn deref(&self) -> &Self::Target {
        &self.message
    }
}

impl DerefMut for Response {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.message
    }
}

fn apply_message_property(
    message: &mut ControllerMessage,
    key: &str,
    value: &Arg,
) -> Result<bool, FactoryError> {
    let text = match value {
        Arg::Str(s) => s.clone(),
        _ => return Ok(false),
    };
    match key {
        "format" => message.set_format(text),
        "context" => message.set_context(text),
        "action" => message.set_action(text),
        "sender" => message.set_sender(text),
        _ => return Ok(false),
    }
    Ok(true)
}

pub(crate) fn register_classes(registry: &mut ClassRegistry) -> Result<(), FactoryError> {
    registry.register(
        ComponentClass::new("Request", |_args| {
            Ok(Instance::new(Request::new().into_shared()))
        })
        .with_setter(|instance, key, value| match instance.get::<RwLock<Request>>() {
            Some(request) => apply_message_property(&mut request.write(), key, value),
            None => Ok(false),
        }),
    )?;
    registry.register(
        ComponentClass::new("Response", |_args| {
            Ok(Instance::new(Response::new().into_shared()))
        })
        .with_setter(|instance, key, value| match instance.get::<RwLock<Response>>() {
            Some(response) => apply_message_property(&mut response.write(), key, value),
            None => Ok(false),
        }),
    )?;
    Ok(())
}
