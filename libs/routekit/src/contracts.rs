use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

use crate::message::{SharedRequest, SharedResponse};

/// Handle through which the dispatch loop drives a handler.
pub type SharedHandler = Arc<Mutex<dyn Handler>>;

/// A unit of work the dispatch loop routes requests to.
///
/// `initialize` receives the request of the current hop and the response
/// shared by the whole chain; `execute` runs either the method named in the
/// routing table or, with `None`, whatever the handler derives from the
/// request action.
pub trait Handler: Send {
    fn initialize(
        &mut self,
        request: SharedRequest,
        response: SharedResponse,
    ) -> Result<(), HandlerError>;

    fn execute(&mut self, method: Option<&str>) -> Result<(), HandlerError>;
}

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("handler failed: {0}")]
    Failed(String),
    #[error("unknown handler method '{0}'")]
    UnknownMethod(String),
    #[error("handler executed before initialize")]
    NotInitialized,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Request/response bookkeeping most handlers embed.
#[derive(Debug, Default, Clone)]
pub struct ControllerState {
    request: Option<SharedRequest>,
    response: Option<SharedResponse>,
}

impl ControllerState {
    pub fn bind(&mut self, request: SharedRequest, response: SharedResponse) {
        self.request = Some(request);
        self.response = Some(response);
    }

    pub fn request(&self) -> Result<&SharedRequest, HandlerError> {
        self.request.as_ref().ok_or(HandlerError::NotInitialized)
    }

    pub fn response(&self) -> Result<&SharedResponse, HandlerError> {
        self.response.as_ref().ok_or(HandlerError::NotInitialized)
    }

    /// The explicit method, else the action of the bound request.
    pub fn method(&self, method: Option<&str>) -> Result<String, HandlerError> {
        match method {
            Some(m) => Ok(m.to_string()),
            None => Ok(self.request()?.read().action().to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Request, Response};

    #[test]
    fn state_requires_binding() {
        let state = ControllerState::default();
        assert!(matches!(state.request(), Err(HandlerError::NotInitialized)));
        assert!(matches!(state.method(None), Err(HandlerError::NotInitialized)));
        assert_eq!(state.method(Some("run")).unwrap(), "run");
    }

    #[test]
    fn method_defaults_to_request_action() {
        let mut req = Request::new();
        req.set_action("list");
        let mut state = ControllerState::default();
        state.bind(req.into_shared(), Response::new().into_shared());
        assert_eq!(state.method(None).unwrap(), "list");
    }
}
