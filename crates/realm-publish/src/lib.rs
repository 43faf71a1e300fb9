pub mod error;
pub mod queue;
pub mod runtime;

pub use error::PublishError;
pub use queue::{publish_queue, PublishQueue};
pub use runtime::PublisherRuntime;
