//! A job paired with its broker delivery context, for the life of one
//! processing attempt (spec.md 3 "WorkUnit (in-process)").

use lapin::options::{BasicAckOptions, BasicNackOptions};
use lapin::Channel;
use realm_core::job::Job;
use tokio::runtime::Handle;

/// Bundles a decoded job with the channel and delivery tag needed to
/// ack/nack it, plus a handle onto the tokio runtime that owns that channel.
///
/// `channel` must be the exact channel instance the message was delivered
/// on (AMQP protocol constraint, spec.md 3 invariants). Because sink workers
/// are plain OS threads (spec.md 5) rather than tasks on that runtime,
/// `ack`/`nack` hop back onto it via `Handle::spawn` -- the tokio analogue of
/// pika's `connection.add_callback_threadsafe` (spec.md 9 "Cross-thread
/// ACKs").
#[derive(Clone)]
pub struct WorkUnit {
    pub job: Job,
    pub channel: Channel,
    pub delivery_tag: u64,
    pub io_handle: Handle,
}

impl WorkUnit {
    pub fn new(job: Job, channel: Channel, delivery_tag: u64, io_handle: Handle) -> Self {
        WorkUnit {
            job,
            channel,
            delivery_tag,
            io_handle,
        }
    }

    /// Acks (success) or nacks (failure) this unit. `requeue` is ignored on
    /// success. Abandons the operation with a log line if the channel has
    /// already closed (spec.md 3 "if that channel is closed, the ACK is
    /// abandoned and logged").
    pub fn ack(&self, success: bool, requeue: bool) {
        let channel = self.channel.clone();
        let delivery_tag = self.delivery_tag;
        self.io_handle.spawn(async move {
            if !channel.status().connected() {
                log::error!(
                    "channel closed before {} of delivery_tag={delivery_tag}; broker will redeliver",
                    if success { "ack" } else { "nack" }
                );
                return;
            }

            let outcome = if success {
                channel.basic_ack(delivery_tag, BasicAckOptions::default()).await
            } else {
                channel
                    .basic_nack(
                        delivery_tag,
                        BasicNackOptions {
                            multiple: false,
                            requeue,
                        },
                    )
                    .await
            };

            if let Err(e) = outcome {
                log::error!(
                    "failed to {} delivery_tag={delivery_tag}: {e}",
                    if success { "ack" } else { "nack" }
                );
            }
        });
    }
}
