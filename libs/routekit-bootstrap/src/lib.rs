pub mod config;
pub mod logging;
pub mod paths;
pub mod routing;
pub mod signals;

pub use config::*;
pub use logging::*;
pub use routing::*;
pub use signals::*;
