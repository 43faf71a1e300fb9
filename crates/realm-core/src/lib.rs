pub mod config;
pub mod error;
pub mod job;
pub mod request;

pub use config::{HubConfig, PublisherConfig, QueueOptions, RealmConnection, SinkConfig};
pub use error::ConfigError;
pub use job::Job;
pub use request::TransferRequest;
