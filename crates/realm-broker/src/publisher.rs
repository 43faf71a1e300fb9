//! Low-level AMQP publish primitive: connect, open a channel, publish bytes
//! with properties. Topic resolution, job serialization and the background
//! drain loop live one layer up, in `realm-publish`, per the component split
//! in SPEC_FULL.md 2.
//!
//! Grounded on `original_source/datasink/client.py` (`JobSource.connect`,
//! `JobSource.submit`) and the teacher's `report-tags/src/rabbitmq/publisher.rs`
//! wrapper style around a connect/publish/close lifecycle.

use lapin::options::BasicPublishOptions;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};

use realm_core::config::RealmConnection;

use crate::error::TransportError;

pub const CONTENT_TYPE_JSON: &str = "application/json";

pub struct BrokerPublisher {
    connection: Connection,
    channel: Channel,
    exchange: String,
}

impl BrokerPublisher {
    /// Opens a connection and channel against `realm`. Heartbeat handling is
    /// left at `lapin`'s default (see DESIGN.md "heartbeat=0" note); the sink
    /// and publisher reconnect loops are what actually detect and recover
    /// from a dead connection.
    pub async fn connect(realm: &RealmConnection) -> Result<Self, TransportError> {
        let url = realm.amqp_url();
        let props = ConnectionProperties::default().with_connection_name(realm.realm.clone().into());
        let connection = Connection::connect(&url, props)
            .await
            .map_err(|source| TransportError::Connect { url, source })?;
        let channel = connection
            .create_channel()
            .await
            .map_err(TransportError::Channel)?;

        Ok(BrokerPublisher {
            connection,
            channel,
            exchange: realm.realm.clone(),
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connection.status().connected() && self.channel.status().connected()
    }

    /// Publishes `body` with routing key `topic`. `persistent` sets
    /// `delivery_mode=2`; `expiration_ms`, when set, is attached as a
    /// string-encoded milliseconds TTL (spec.md 4.1 "Message properties").
    pub async fn publish(
        &self,
        topic: &str,
        body: &[u8],
        persistent: bool,
        expiration_ms: Option<i64>,
    ) -> Result<(), TransportError> {
        let mut props = BasicProperties::default().with_content_type(CONTENT_TYPE_JSON.into());
        if persistent {
            props = props.with_delivery_mode(2);
        }
        if let Some(ms) = expiration_ms {
            props = props.with_expiration(ms.to_string().into());
        }

        self.channel
            .basic_publish(&self.exchange, topic, BasicPublishOptions::default(), body, props)
            .await
            .map_err(TransportError::Publish)?
            .await
            .map_err(TransportError::Publish)?;

        Ok(())
    }

    pub async fn close(self) -> Result<(), TransportError> {
        self.channel
            .close(0, "publisher shutting down")
            .await
            .map_err(TransportError::Channel)?;
        self.connection
            .close(0, "publisher shutting down")
            .await
            .map_err(TransportError::Channel)?;
        Ok(())
    }
}
