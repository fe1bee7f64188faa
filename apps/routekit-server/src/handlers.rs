//! Handlers bundled with the server, contributed to the class registry at link time.

use routekit::{
    ClassRegistry, ComponentClass, ComponentRegistrator, ControllerState, FactoryError, Handler,
    HandlerError, SharedRequest, SharedResponse, Value,
};
use serde_json::json;

/// Copies every request value into the response.
#[derive(Default)]
pub struct Echo {
    state: ControllerState,
}

impl Handler for Echo {
    fn initialize(
        &mut self,
        request: SharedRequest,
        response: SharedResponse,
    ) -> Result<(), HandlerError> {
        self.state.bind(request, response);
        Ok(())
    }

    fn execute(&mut self, _method: Option<&str>) -> Result<(), HandlerError> {
        let values = self.state.request()?.read().values().clone();
        let mut resp = self.state.response()?.write();
        for (key, value) in values {
            resp.set_value(key, value);
        }
        Ok(())
    }
}

/// Answers `greet` with `<greeting>, <name>!` and optionally hands off to `then`.
pub struct Greeter {
    state: ControllerState,
    greeting: String,
    then: Option<String>,
}

impl Handler for Greeter {
    fn initialize(
        &mut self,
        request: SharedRequest,
        response: SharedResponse,
    ) -> Result<(), HandlerError> {
        self.state.bind(request, response);
        Ok(())
    }

    fn execute(&mut self, method: Option<&str>) -> Result<(), HandlerError> {
        let method = self.state.method(method)?;
        if method != "greet" {
            return Err(HandlerError::UnknownMethod(method));
        }
        let name = self
            .state
            .request()?
            .read()
            .get_value("name")
            .and_then(|v| v.as_str())
            .unwrap_or("world")
            .to_string();

        let mut resp = self.state.response()?.write();
        resp.set_value("message", format!("{}, {name}!", self.greeting));
        if let Some(next) = &self.then {
            resp.set_action(next.clone());
        }
        Ok(())
    }
}

/// Appends `sender/context/action` of the hop it serves to the response `audit` list.
#[derive(Default)]
pub struct Audit {
    state: ControllerState,
}

impl Handler for Audit {
    fn initialize(
        &mut self,
        request: SharedRequest,
        response: SharedResponse,
    ) -> Result<(), HandlerError> {
        self.state.bind(request, response);
        Ok(())
    }

    fn execute(&mut self, _method: Option<&str>) -> Result<(), HandlerError> {
        let entry = {
            let req = self.state.request()?.read();
            json!(format!("{}/{}/{}", req.sender(), req.context(), req.action()))
        };
        let mut resp = self.state.response()?.write();
        let mut audit = resp
            .get_value("audit")
            .and_then(|v| v.as_array().cloned())
            .unwrap_or_default();
        audit.push(entry);
        resp.set_value("audit", audit);
        Ok(())
    }
}

fn register(registry: &mut ClassRegistry) -> Result<(), FactoryError> {
    registry.register(ComponentClass::handler("Echo", |_| Ok(Echo::default())))?;
    registry.register(
        ComponentClass::handler("Greeter", |args| {
            Ok(Greeter {
                state: ControllerState::default(),
                greeting: args.string("greeting")?,
                then: args.get("then").and_then(Value::as_str).map(str::to_string),
            })
        })
        .param_or("greeting", Value::Str("Hello".into()))
        .optional_param("then"),
    )?;
    registry.register(ComponentClass::handler("Audit", |_| Ok(Audit::default())))
}

routekit::inventory::submit! {
    ComponentRegistrator(register)
}
