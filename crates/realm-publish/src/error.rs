use thiserror::Error;

/// Failures `submit`/`start_publish` can report (spec.md 7 "TransportError").
#[derive(Error, Debug)]
pub enum PublishError {
    #[error(transparent)]
    Transport(#[from] realm_broker::TransportError),

    #[error("not connected to broker; call connect() first")]
    NotConnected,

    #[error("failed to serialize job: {0}")]
    Serialize(#[from] serde_json::Error),
}
