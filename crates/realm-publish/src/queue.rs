//! The publisher's local in-process job queue -- the only persistence layer
//! on the publisher side (spec.md 4.1 "Rationale", 9 "Publisher loss
//! window").

use realm_core::job::Job;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

/// A cloneable handle for enqueuing jobs onto a publisher's drain loop.
#[derive(Clone)]
pub struct PublishQueue {
    sender: UnboundedSender<(Job, Option<String>)>,
}

impl PublishQueue {
    /// Queues `job` for eventual publication on `topic` (or the drain
    /// loop's own topic-resolution order if `None`). Never blocks; the
    /// queue has no bound, matching `start_publish`'s never-drop contract.
    pub fn enqueue(&self, job: Job, topic: Option<String>) {
        if self.sender.send((job, topic)).is_err() {
            log::error!("publish queue's drain loop has stopped; dropping job");
        }
    }
}

/// Builds a fresh queue and the receiving half a drain loop consumes.
pub fn publish_queue() -> (PublishQueue, UnboundedReceiver<(Job, Option<String>)>) {
    let (sender, receiver) = unbounded_channel();
    (PublishQueue { sender }, receiver)
}
