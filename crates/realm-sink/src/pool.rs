//! The fixed-size worker pool: real OS threads pulling `WorkUnit`s off a
//! bounded queue and dispatching them through the action registry.
//!
//! Grounded on `original_source/datasink/worker.py`
//! (`JobSink.worker_loop`/`JobSink.do_work`) -- same bounded-timeout poll
//! loop, same "any handler exception nack-drops the unit" behavior -- with
//! the pool surviving broker reconnects per spec.md 4.2.

use std::sync::mpsc::{Receiver, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use realm_broker::WorkUnit;

use crate::registry::{ActionContext, ActionRegistry};

const WORK_QUEUE_POLL: Duration = Duration::from_secs(1);

/// Bounded in-process queue between the broker I/O side and the worker
/// pool. Capacity equals `num_workers`, matching the broker's
/// `prefetch_count` so the queue never holds more in-flight work than the
/// pool can execute (spec.md 3 invariants).
pub fn work_queue(num_workers: usize) -> (SyncSender<WorkUnit>, Receiver<WorkUnit>) {
    std::sync::mpsc::sync_channel(num_workers.max(1))
}

pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `num_workers` threads sharing `receiver` through a mutex; each
    /// blocks for up to 1 s per poll so it notices `quit_signal` promptly
    /// even when idle.
    pub fn spawn(
        num_workers: usize,
        receiver: Receiver<WorkUnit>,
        registry: Arc<ActionRegistry>,
        quit_signal: Arc<std::sync::atomic::AtomicBool>,
    ) -> Self {
        let receiver = Arc::new(Mutex::new(receiver));
        let handles = (0..num_workers)
            .map(|i| {
                let receiver = Arc::clone(&receiver);
                let registry = Arc::clone(&registry);
                let quit_signal = Arc::clone(&quit_signal);
                thread::Builder::new()
                    .name(format!("sink-worker-{i}"))
                    .spawn(move || worker_loop(i, &receiver, &registry, &quit_signal))
                    .expect("failed to spawn sink worker thread")
            })
            .collect();
        WorkerPool { handles }
    }

    pub fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.join() {
                log::error!("sink worker thread panicked: {e:?}");
            }
        }
    }
}

fn worker_loop(
    index: usize,
    receiver: &Arc<Mutex<Receiver<WorkUnit>>>,
    registry: &Arc<ActionRegistry>,
    quit_signal: &Arc<std::sync::atomic::AtomicBool>,
) {
    log::info!("starting worker {index}...");
    while !quit_signal.load(std::sync::atomic::Ordering::SeqCst) {
        let next = {
            let guard = receiver.lock().expect("work queue mutex poisoned");
            guard.recv_timeout(WORK_QUEUE_POLL)
        };
        let unit = match next {
            Ok(unit) => unit,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        do_work(index, &unit, registry);
    }
    log::info!("ending worker loop {index}...");
}

fn do_work(index: usize, unit: &WorkUnit, registry: &ActionRegistry) {
    log::info!("worker {index} handling job action '{}'", unit.job.action);

    let ctx = ActionContext {
        channel: unit.channel.clone(),
        io_handle: unit.io_handle.clone(),
    };

    match registry.dispatch(&unit.job, &ctx) {
        Ok(()) => unit.ack(true, false),
        Err(e) => {
            log::error!("error doing job '{}': {e}", unit.job.action);
            unit.ack(false, false);
        }
    }
}
