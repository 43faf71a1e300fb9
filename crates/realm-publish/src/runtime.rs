//! The publisher runtime: connect, publish with properties, and an
//! optional background drain loop with reconnect.
//!
//! Grounded on `original_source/datasink/client.py`
//! (`JobSource.read_config`/`.connect`/`.submit`) for the connect/submit
//! contract, and spec.md 4.1 for the drain loop and reconnect cycle that
//! `client.py`/`ds_pub.py` don't themselves implement (each invocation of
//! the original tool submits exactly one job and exits).

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use realm_broker::BrokerPublisher;
use realm_core::config::{PublisherConfig, DEFAULT_RECOVER_INTERVAL_SECS};
use realm_core::job::Job;
use tokio::sync::{Mutex, mpsc::UnboundedReceiver};

use crate::error::PublishError;
use crate::queue::PublishQueue;

const DRAIN_POLL: Duration = Duration::from_millis(250);

pub struct PublisherRuntime {
    config: PublisherConfig,
    name: String,
    broker: Mutex<Option<BrokerPublisher>>,
}

impl PublisherRuntime {
    pub fn new(config: PublisherConfig, name: impl Into<String>) -> Self {
        PublisherRuntime {
            config,
            name: name.into(),
            broker: Mutex::new(None),
        }
    }

    pub async fn connect(&self) -> Result<(), PublishError> {
        let broker = BrokerPublisher::connect(&self.config.realm).await?;
        *self.broker.lock().await = Some(broker);
        Ok(())
    }

    pub async fn is_connected(&self) -> bool {
        self.broker
            .lock()
            .await
            .as_ref()
            .map(BrokerPublisher::is_connected)
            .unwrap_or(false)
    }

    /// Topic resolution, first match wins: explicit argument, `job.topic`,
    /// `config.topic`, `"general"` (spec.md 4.1 "Contract", 8 property 6).
    fn resolve_topic<'a>(&'a self, job: &'a Job, topic: Option<&'a str>) -> &'a str {
        topic
            .or(job.topic.as_deref())
            .unwrap_or(self.config.topic.as_str())
    }

    /// Serializes `job` (stamping `time_origin`/`source_origin`) and
    /// publishes it to the realm exchange with the resolved routing key.
    pub async fn submit(&self, mut job: Job, topic: Option<&str>) -> Result<(), PublishError> {
        let resolved_topic = self.resolve_topic(&job, topic).to_string();

        job.time_origin = Some(
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs_f64(),
        );
        job.source_origin = Some(self.name.clone());

        let body = job.to_json_vec()?;

        let expiration_ms = self.config.ttl_sec.map(|secs| (secs * 1000.0).round() as i64);

        let guard = self.broker.lock().await;
        let broker = guard.as_ref().ok_or(PublishError::NotConnected)?;
        broker
            .publish(&resolved_topic, &body, self.config.message_persist, expiration_ms)
            .await?;
        drop(guard);

        log::info!("sent job: {}", String::from_utf8_lossy(&body));
        Ok(())
    }

    /// Drains `receiver` (fed by a `PublishQueue`), invoking `submit` per
    /// job. On failure the job is requeued at the tail of the same queue
    /// and the loop blocks in `recover` until reconnected or `quit_signal`
    /// fires (spec.md 4.1 "Background drain loop").
    pub async fn start_publish(
        &self,
        requeue: PublishQueue,
        mut receiver: UnboundedReceiver<(Job, Option<String>)>,
        quit_signal: &AtomicBool,
    ) {
        loop {
            if quit_signal.load(Ordering::SeqCst) {
                return;
            }

            match tokio::time::timeout(DRAIN_POLL, receiver.recv()).await {
                Ok(Some((job, topic))) => {
                    if let Err(e) = self.submit(job.clone(), topic.as_deref()).await {
                        log::error!("failed to submit job, will retry after reconnect: {e}");
                        requeue.enqueue(job, topic);
                        if !self.recover(quit_signal).await {
                            return;
                        }
                    }
                }
                Ok(None) => return, // every PublishQueue handle was dropped
                Err(_timeout) => continue,
            }
        }
    }

    /// Retries `connect()` every `recover_interval` (default 60 s) until it
    /// succeeds or `quit_signal` fires. Returns whether it reconnected.
    async fn recover(&self, quit_signal: &AtomicBool) -> bool {
        let interval = Duration::from_secs(self.config.recover_interval.unwrap_or(DEFAULT_RECOVER_INTERVAL_SECS));
        loop {
            if quit_signal.load(Ordering::SeqCst) {
                return false;
            }
            match self.connect().await {
                Ok(()) => {
                    log::info!("reconnected to broker");
                    return true;
                }
                Err(e) => {
                    log::error!("reconnect failed: {e}; retrying in {}s", interval.as_secs());
                    if !sleep_with_quit_check(interval, quit_signal).await {
                        return false;
                    }
                }
            }
        }
    }

    pub async fn close(&self) -> Result<(), PublishError> {
        if let Some(broker) = self.broker.lock().await.take() {
            broker.close().await?;
        }
        Ok(())
    }
}

async fn sleep_with_quit_check(total: Duration, quit_signal: &AtomicBool) -> bool {
    let mut waited = Duration::ZERO;
    while waited < total {
        if quit_signal.load(Ordering::SeqCst) {
            return false;
        }
        let step = DRAIN_POLL.min(total - waited);
        tokio::time::sleep(step).await;
        waited += step;
    }
    !quit_signal.load(Ordering::SeqCst)
}

#[cfg(test)]
mod tests {
    use super::*;
    use realm_core::config::RealmConnection;

    fn config() -> PublisherConfig {
        PublisherConfig {
            realm: RealmConnection {
                realm: "datasink".to_string(),
                realm_host: "localhost".to_string(),
                realm_port: 5672,
                realm_username: "guest".to_string(),
                realm_password: "guest".to_string(),
                persist: false,
                default_priority: 0,
                backlog_queue: None,
            },
            topic: "general".to_string(),
            message_persist: false,
            ttl_sec: None,
            recover_interval: None,
        }
    }

    #[test]
    fn topic_resolution_prefers_explicit_argument() {
        let runtime = PublisherRuntime::new(config(), "pub1");
        let mut job = Job::new("ping");
        job.topic = Some("from-job".to_string());
        assert_eq!(runtime.resolve_topic(&job, Some("explicit")), "explicit");
    }

    #[test]
    fn topic_resolution_falls_back_to_job_then_config() {
        let runtime = PublisherRuntime::new(config(), "pub1");
        let mut job = Job::new("ping");
        job.topic = Some("from-job".to_string());
        assert_eq!(runtime.resolve_topic(&job, None), "from-job");

        let job = Job::new("ping");
        assert_eq!(runtime.resolve_topic(&job, None), "general");
    }
}
