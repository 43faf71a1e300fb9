//! Exchange/queue declaration, binding and dead-letter consumption.
//!
//! Grounded on `original_source/datasink/initialize.py` (`configure_exchange`,
//! `setup_queue`, `unlink_queue`, `purge_queue`, `remove_queue`,
//! `handle_dlx`), realized with `lapin` the way
//! `rustlib/rabbitmq/src/subscriber.rs` declares its own exchange/queue.

use futures_util::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, ExchangeDeclareOptions, QueueBindOptions,
    QueueDeclareOptions, QueueDeleteOptions, QueuePurgeOptions, QueueUnbindOptions,
};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{Channel, Consumer, ExchangeKind};

use realm_core::config::{QueueOptions, RealmConnection, DEFAULT_TOPIC};

use crate::error::ProtocolError;

const DLX_EXCHANGE: &str = "dlx";

/// Declares the realm exchange (topic-routed, per spec.md 4.4/6 — see
/// SPEC_FULL.md 11 for why this differs from the direct exchange the kept
/// revision of `initialize.py` uses), the fanout DLX, and binds the realm's
/// backlog queue to it.
pub async fn declare_exchange(
    channel: &Channel,
    realm: &RealmConnection,
    backlog_queue: &str,
) -> Result<(), ProtocolError> {
    let durable = realm.persist;

    channel
        .exchange_declare(
            &realm.realm,
            ExchangeKind::Topic,
            ExchangeDeclareOptions {
                durable,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(|source| ProtocolError::ExchangeDeclare {
            name: realm.realm.clone(),
            source,
        })?;

    channel
        .exchange_declare(
            DLX_EXCHANGE,
            ExchangeKind::Fanout,
            ExchangeDeclareOptions {
                durable,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(|source| ProtocolError::ExchangeDeclare {
            name: DLX_EXCHANGE.to_string(),
            source,
        })?;

    channel
        .queue_declare(
            backlog_queue,
            QueueDeclareOptions {
                durable,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(|source| ProtocolError::QueueDeclare {
            name: backlog_queue.to_string(),
            source,
        })?;

    channel
        .queue_bind(
            backlog_queue,
            DLX_EXCHANGE,
            "",
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await
        .map_err(|source| ProtocolError::QueueBind {
            queue: backlog_queue.to_string(),
            exchange: DLX_EXCHANGE.to_string(),
            routing_key: String::new(),
            source,
        })?;

    Ok(())
}

fn queue_arguments(opts: &QueueOptions, default_priority: u8) -> FieldTable {
    let mut args = FieldTable::default();
    args.insert(
        "x-priority".into(),
        AMQPValue::ShortShortUInt(opts.resolved_priority(default_priority)),
    );
    args.insert(
        "x-overflow".into(),
        AMQPValue::LongString("drop-head".into()),
    );
    args.insert(
        "x-dead-letter-exchange".into(),
        AMQPValue::LongString(DLX_EXCHANGE.into()),
    );
    if let Some(len) = opts.queue_length {
        args.insert("x-max-length".into(), AMQPValue::LongUInt(len));
    }
    if let Some(ttl_sec) = opts.ttl_sec {
        // msec, scalar integer -- see SPEC_FULL.md 12 ambiguity (a).
        args.insert(
            "x-message-ttl".into(),
            AMQPValue::LongLongInt((ttl_sec * 1000.0).round() as i64),
        );
    }
    args
}

/// Declares `queue_name` (auto-delete iff `opts.transient`, durable iff
/// `opts.persist`) with the DLX-routed arguments every realm queue carries,
/// then binds or unbinds it to the realm exchange depending on `bind`.
pub async fn setup_queue(
    channel: &Channel,
    queue_name: &str,
    opts: &QueueOptions,
    realm: &RealmConnection,
    bind: bool,
) -> Result<(), ProtocolError> {
    let args = queue_arguments(opts, realm.default_priority);

    channel
        .queue_declare(
            queue_name,
            QueueDeclareOptions {
                durable: opts.persist,
                auto_delete: opts.transient,
                ..Default::default()
            },
            args,
        )
        .await
        .map_err(|source| ProtocolError::QueueDeclare {
            name: queue_name.to_string(),
            source,
        })?;

    let routing_key = opts.resolved_topic();
    if bind {
        channel
            .queue_bind(
                queue_name,
                &realm.realm,
                routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|source| ProtocolError::QueueBind {
                queue: queue_name.to_string(),
                exchange: realm.realm.clone(),
                routing_key: routing_key.to_string(),
                source,
            })?;
    } else {
        unbind_queue(channel, queue_name, routing_key, realm).await?;
    }

    Ok(())
}

/// Disassociates `queue_name` from the realm exchange for `routing_key`
/// (`initialize.unlink_queue`).
pub async fn unbind_queue(
    channel: &Channel,
    queue_name: &str,
    routing_key: &str,
    realm: &RealmConnection,
) -> Result<(), ProtocolError> {
    channel
        .queue_unbind(
            queue_name,
            &realm.realm,
            routing_key,
            FieldTable::default(),
        )
        .await
        .map_err(|source| ProtocolError::QueueUnbind {
            queue: queue_name.to_string(),
            exchange: realm.realm.clone(),
            routing_key: routing_key.to_string(),
            source,
        })
}

/// Binds `queue_name` to `realm` for `topic`, defaulting to
/// `DEFAULT_TOPIC` (`"general"`) if `topic` is `None` — used by the queue
/// admin tool's `enable` action.
pub async fn bind_queue(
    channel: &Channel,
    queue_name: &str,
    topic: Option<&str>,
    realm: &RealmConnection,
) -> Result<(), ProtocolError> {
    let routing_key = topic.unwrap_or(DEFAULT_TOPIC);
    channel
        .queue_bind(
            queue_name,
            &realm.realm,
            routing_key,
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await
        .map_err(|source| ProtocolError::QueueBind {
            queue: queue_name.to_string(),
            exchange: realm.realm.clone(),
            routing_key: routing_key.to_string(),
            source,
        })
}

/// Purges all messages from `queue_name` (`initialize.purge_queue`).
pub async fn purge_queue(channel: &Channel, queue_name: &str) -> Result<(), ProtocolError> {
    channel
        .queue_purge(queue_name, QueuePurgeOptions::default())
        .await
        .map_err(|source| ProtocolError::QueuePurge {
            queue: queue_name.to_string(),
            source,
        })?;
    Ok(())
}

/// Deletes `queue_name` (`initialize.remove_queue` purges then deletes; we
/// expose delete alone since the queue admin tool purges separately).
pub async fn delete_queue(
    channel: &Channel,
    queue_name: &str,
    if_unused: bool,
    if_empty: bool,
) -> Result<(), ProtocolError> {
    channel
        .queue_delete(
            queue_name,
            QueueDeleteOptions {
                if_unused,
                if_empty,
                ..Default::default()
            },
        )
        .await
        .map_err(|source| ProtocolError::QueueDelete {
            queue: queue_name.to_string(),
            source,
        })?;
    Ok(())
}

/// Registers a consumer on the backlog queue for the hub tool's `--dlx`
/// drain mode (`initialize.handle_dlx`). Returns the raw `Consumer` stream;
/// callers ack each delivery themselves once logged/handled.
pub async fn consume_dlx(channel: &Channel, backlog_queue: &str) -> Result<Consumer, ProtocolError> {
    channel
        .basic_consume(
            backlog_queue,
            "dlx-drain",
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
        .await
        .map_err(|source| ProtocolError::Consume {
            queue: backlog_queue.to_string(),
            source,
        })
}

/// Drains the DLX consumer, invoking `on_message` per delivery and
/// acknowledging it afterwards, until the stream ends (connection closed) or
/// `should_stop` returns true between messages.
pub async fn drain_dlx<F>(
    channel: &Channel,
    mut consumer: Consumer,
    mut should_stop: impl FnMut() -> bool,
    mut on_message: F,
) where
    F: FnMut(&lapin::message::Delivery),
{
    while !should_stop() {
        match tokio::time::timeout(std::time::Duration::from_millis(250), consumer.next()).await {
            Ok(Some(Ok(delivery))) => {
                on_message(&delivery);
                if let Err(e) = channel
                    .basic_ack(delivery.delivery_tag, BasicAckOptions::default())
                    .await
                {
                    log::error!("failed to ack dlx delivery: {e}");
                }
            }
            Ok(Some(Err(e))) => {
                log::error!("dlx consumer error: {e}");
                break;
            }
            Ok(None) => break,
            Err(_timeout) => continue,
        }
    }
}
