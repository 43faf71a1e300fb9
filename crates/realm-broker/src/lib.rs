pub mod error;
pub mod publisher;
pub mod topology;
pub mod workunit;

pub use error::{ProtocolError, TransportError};
pub use publisher::BrokerPublisher;
pub use workunit::WorkUnit;
