use thiserror::Error;

/// Broker connect/publish/consume failures (spec.md 7). Retried by the
/// caller with `retry_interval` until `quit_signal` fires.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("failed to connect to broker at {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: lapin::Error,
    },
    #[error("failed to open channel: {0}")]
    Channel(#[source] lapin::Error),
    #[error("failed to publish job: {0}")]
    Publish(#[source] lapin::Error),
}

/// AMQP channel/connection errors and heartbeat timeouts. Treated the same
/// way as `TransportError` by the sink and publisher reconnect loops.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("failed to declare exchange '{name}': {source}")]
    ExchangeDeclare {
        name: String,
        #[source]
        source: lapin::Error,
    },
    #[error("failed to declare queue '{name}': {source}")]
    QueueDeclare {
        name: String,
        #[source]
        source: lapin::Error,
    },
    #[error("failed to bind queue '{queue}' to '{exchange}' with routing key '{routing_key}': {source}")]
    QueueBind {
        queue: String,
        exchange: String,
        routing_key: String,
        #[source]
        source: lapin::Error,
    },
    #[error("failed to unbind queue '{queue}' from '{exchange}' with routing key '{routing_key}': {source}")]
    QueueUnbind {
        queue: String,
        exchange: String,
        routing_key: String,
        #[source]
        source: lapin::Error,
    },
    #[error("failed to purge queue '{queue}': {source}")]
    QueuePurge {
        queue: String,
        #[source]
        source: lapin::Error,
    },
    #[error("failed to delete queue '{queue}': {source}")]
    QueueDelete {
        queue: String,
        #[source]
        source: lapin::Error,
    },
    #[error("failed to register consumer on '{queue}': {source}")]
    Consume {
        queue: String,
        #[source]
        source: lapin::Error,
    },
    #[error("failed to set QoS (prefetch_count={prefetch_count}): {source}")]
    Qos {
        prefetch_count: u16,
        #[source]
        source: lapin::Error,
    },
}
