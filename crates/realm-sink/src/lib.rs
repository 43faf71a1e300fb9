pub mod actions;
pub mod error;
pub mod pool;
pub mod registry;
pub mod runtime;

pub use error::{HandlerError, SinkError};
pub use registry::{ActionContext, ActionHandler, ActionRegistry};
pub use runtime::SinkRuntime;
