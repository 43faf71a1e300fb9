//! The sink's connect/consume/reconnect control loop.
//!
//! Grounded on `original_source/datasink/worker.py` (`JobSink.serve`) and
//! `datasink/initialize.py`'s queue setup, realized with `lapin` the way
//! `realm-broker::topology` already wraps declare/bind. The work queue and
//! worker pool are created once and survive reconnects, per spec.md 4.2.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::select_all;
use futures_util::StreamExt;
use lapin::options::{BasicConsumeOptions, BasicNackOptions, BasicQosOptions};
use lapin::types::FieldTable;
use lapin::{Connection, ConnectionProperties};
use tokio::runtime::Handle;

use realm_broker::{topology, WorkUnit};
use realm_core::config::{QueueOptions, SinkConfig, DEFAULT_RETRY_INTERVAL_SECS};
use realm_core::job::Job;

use crate::actions::transfer_action;
use crate::error::{ConnectionError, SinkError};
use crate::pool::{work_queue, WorkerPool};
use crate::registry::ActionRegistry;

const RECONNECT_POLL: Duration = Duration::from_millis(250);
const DELIVERY_POLL: Duration = Duration::from_millis(250);

pub struct SinkRuntime {
    config: SinkConfig,
    registry: Arc<ActionRegistry>,
    quit_signal: Arc<AtomicBool>,
}

impl SinkRuntime {
    /// Builds a runtime with the built-in actions plus `transfer`, wired
    /// from `config` (`datasink.py`'s `server()` wiring `xfer_file` in as
    /// the `transfer` handler).
    pub fn new(config: SinkConfig) -> Self {
        let mut registry = ActionRegistry::with_builtins();
        registry.add_action("transfer", transfer_action(&config));
        SinkRuntime {
            config,
            registry: Arc::new(registry),
            quit_signal: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Registers an additional action, e.g. from an embedding application.
    /// Must be called before `serve`.
    pub fn add_action(&mut self, name: impl Into<String>, handler: crate::registry::ActionHandler) {
        Arc::get_mut(&mut self.registry)
            .expect("add_action called after serve started")
            .add_action(name, handler);
    }

    pub fn quit_signal(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.quit_signal)
    }

    /// Connects, consumes, and reconnects until `quit_signal` fires. Must
    /// be called from a thread that is not itself a worker thread of
    /// `io_handle`'s runtime (spec.md 5 "control thread").
    pub fn serve(&self, io_handle: Handle, topic_override: Option<String>) {
        let (sender, receiver) = work_queue(self.config.num_workers);
        let pool = WorkerPool::spawn(
            self.config.num_workers,
            receiver,
            Arc::clone(&self.registry),
            self.quit_signal(),
        );

        io_handle.block_on(self.connection_loop(sender, topic_override, io_handle.clone()));

        pool.join();
    }

    async fn connection_loop(
        &self,
        sender: std::sync::mpsc::SyncSender<WorkUnit>,
        topic_override: Option<String>,
        io_handle: Handle,
    ) {
        let retry_interval = Duration::from_secs(
            self.config.retry_interval.unwrap_or(DEFAULT_RETRY_INTERVAL_SECS),
        );

        loop {
            if self.quit_signal.load(Ordering::SeqCst) {
                return;
            }

            match self.run_once(&sender, topic_override.as_deref(), &io_handle).await {
                Ok(()) => return,
                Err(e) => {
                    log::error!("sink connection error: {e}; retrying in {}s", retry_interval.as_secs());
                    if !sleep_with_quit_check(retry_interval, &self.quit_signal).await {
                        return;
                    }
                }
            }
        }
    }

    async fn run_once(
        &self,
        sender: &std::sync::mpsc::SyncSender<WorkUnit>,
        topic_override: Option<&str>,
        io_handle: &Handle,
    ) -> Result<(), ConnectionError> {
        let realm = &self.config.realm;
        let url = realm.amqp_url();
        let connection = Connection::connect(
            &url,
            ConnectionProperties::default().with_connection_name(self.config.name().to_string().into()),
        )
        .await
        .map_err(|source| realm_broker::TransportError::Connect { url, source })?;
        let channel = connection
            .create_channel()
            .await
            .map_err(realm_broker::TransportError::Channel)?;

        channel
            .basic_qos(self.config.num_workers as u16, BasicQosOptions::default())
            .await
            .map_err(|source| realm_broker::ProtocolError::Qos {
                prefetch_count: self.config.num_workers as u16,
                source,
            })?;

        let resolved_topic = topic_override.unwrap_or(&self.config.topic).to_string();
        let queue_opts = QueueOptions {
            enabled: true,
            persist: realm.persist,
            transient: !realm.persist,
            priority: None,
            topic: Some(resolved_topic.clone()),
            queue_length: None,
            ttl_sec: None,
        };

        let mut consumers = Vec::new();
        for queue_name in self.config.queue_names() {
            topology::setup_queue(&channel, &queue_name, &queue_opts, realm, true).await?;
            let consumer = channel
                .basic_consume(
                    &queue_name,
                    &format!("sink-{queue_name}"),
                    BasicConsumeOptions::default(),
                    FieldTable::default(),
                )
                .await?;
            consumers.push(consumer);
        }

        log::info!("consuming on queues {}", self.config.queue_names().join(", "));
        let mut merged = select_all(consumers);

        loop {
            if self.quit_signal.load(Ordering::SeqCst) {
                return Ok(());
            }

            match tokio::time::timeout(DELIVERY_POLL, merged.next()).await {
                Ok(Some(Ok(delivery))) => {
                    match Job::from_json(&delivery.data) {
                        Ok(job) => {
                            let unit = WorkUnit::new(job, channel.clone(), delivery.delivery_tag, io_handle.clone());
                            let sender = sender.clone();
                            let _ = tokio::task::spawn_blocking(move || sender.send(unit)).await;
                        }
                        Err(e) => {
                            log::error!("{}", SinkError::from(e));
                            if let Err(nack_err) = channel
                                .basic_nack(
                                    delivery.delivery_tag,
                                    BasicNackOptions {
                                        multiple: false,
                                        requeue: false,
                                    },
                                )
                                .await
                            {
                                log::error!("failed to nack undecodable message: {nack_err}");
                            }
                        }
                    }
                }
                Ok(Some(Err(e))) => return Err(e.into()),
                Ok(None) => return Err(ConnectionError::StreamEnded),
                Err(_timeout) => continue,
            }
        }
    }
}

async fn sleep_with_quit_check(total: Duration, quit_signal: &AtomicBool) -> bool {
    let mut waited = Duration::ZERO;
    while waited < total {
        if quit_signal.load(Ordering::SeqCst) {
            return false;
        }
        let step = RECONNECT_POLL.min(total - waited);
        tokio::time::sleep(step).await;
        waited += step;
    }
    !quit_signal.load(Ordering::SeqCst)
}
