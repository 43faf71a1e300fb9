use thiserror::Error;

/// Everything that can happen to one delivered message between receipt and
/// its terminal ACK/NACK (spec.md 7).
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("JSON loading error for job: {0}")]
    JobDecode(#[from] serde_json::Error),

    #[error("no such job '{0}' at worker")]
    UnknownAction(String),

    #[error(transparent)]
    Handler(#[from] HandlerError),
}

/// Failures a registered action handler can report. Any of these NACK-drops
/// the work unit with the message attached (spec.md 4.2 "Any exception
/// raised by a handler NACK-drops the unit with the exception message").
#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("missing required field '{0}'")]
    MissingField(String),

    #[error("{0}")]
    Failed(String),

    #[error("failed to set prefetch: {0}")]
    Qos(#[from] lapin::Error),
}

/// Broker connect/consume failures surfaced from the reconnect loop
/// (`runtime::SinkRuntime::run_once`).
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error(transparent)]
    Transport(#[from] realm_broker::TransportError),

    #[error(transparent)]
    Protocol(#[from] realm_broker::ProtocolError),

    #[error("amqp error: {0}")]
    Amqp(#[from] lapin::Error),

    #[error("consumer stream ended unexpectedly")]
    StreamEnded,
}
