//! The action registry: a name -> handler mapping populated before `serve`
//! begins and read-only thereafter (spec.md 5 "Shared state").
//!
//! Grounded on `original_source/datasink/worker.py` (`JobSink.action_tbl`,
//! `JobSink.add_action`, `ping`/`window`/`sleep`). Handlers return
//! `Result<(), HandlerError>` rather than taking a Python-style `fn_ack`
//! callback -- the worker pool (`pool.rs`) turns `Ok` into an ack and `Err`
//! into a nack-without-requeue uniformly, the Rust idiom for "success or
//! failure reason" in place of a side-effecting callback.

use std::collections::HashMap;
use std::time::Duration;

use lapin::options::BasicQosOptions;
use lapin::Channel;
use realm_core::job::Job;
use tokio::runtime::Handle;

use crate::error::{HandlerError, SinkError};

/// What a handler needs beyond the job itself: the channel it arrived on
/// (for actions like `window` that adjust QoS) and a handle onto the
/// runtime that owns that channel, since handlers run on worker threads.
pub struct ActionContext {
    pub channel: Channel,
    pub io_handle: Handle,
}

pub type ActionHandler = Box<dyn Fn(&Job, &ActionContext) -> Result<(), HandlerError> + Send + Sync>;

pub struct ActionRegistry {
    handlers: HashMap<String, ActionHandler>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        ActionRegistry {
            handlers: HashMap::new(),
        }
    }

    /// `ping`, `sleep`, `window`, `debug` -- the four built-ins every sink
    /// carries (spec.md 4.2 "Built-in actions").
    pub fn with_builtins() -> Self {
        let mut registry = ActionRegistry::new();
        registry.add_action("ping", Box::new(ping));
        registry.add_action("sleep", Box::new(sleep));
        registry.add_action("window", Box::new(window));
        registry.add_action("debug", Box::new(debug));
        registry
    }

    pub fn add_action(&mut self, name: impl Into<String>, handler: ActionHandler) {
        self.handlers.insert(name.into(), handler);
    }

    pub fn dispatch(&self, job: &Job, ctx: &ActionContext) -> Result<(), SinkError> {
        match self.handlers.get(&job.action) {
            Some(handler) => handler(job, ctx).map_err(SinkError::from),
            None => Err(SinkError::UnknownAction(job.action.clone())),
        }
    }

    pub fn contains(&self, action: &str) -> bool {
        self.handlers.contains_key(action)
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        ActionRegistry::new()
    }
}

fn ping(_job: &Job, _ctx: &ActionContext) -> Result<(), HandlerError> {
    log::debug!("pong");
    Ok(())
}

fn sleep(job: &Job, _ctx: &ActionContext) -> Result<(), HandlerError> {
    let secs = required_duration(job)?;
    std::thread::sleep(Duration::from_secs_f64(secs));
    Ok(())
}

fn required_duration(job: &Job) -> Result<f64, HandlerError> {
    job.get_f64("duration")
        .ok_or_else(|| HandlerError::MissingField("duration".to_string()))
}

/// Adjusts the worker's channel prefetch count
/// (`JobSink.window`: `channel.basic_qos(prefetch_count=num)`). Takes
/// effect on the next delivery, per spec.md 4.2.
fn window(job: &Job, ctx: &ActionContext) -> Result<(), HandlerError> {
    let size = job
        .get_u64("size")
        .ok_or_else(|| HandlerError::MissingField("size".to_string()))?;
    ctx.io_handle
        .block_on(ctx.channel.basic_qos(size as u16, BasicQosOptions::default()))?;
    Ok(())
}

fn debug(job: &Job, _ctx: &ActionContext) -> Result<(), HandlerError> {
    print_job(job);
    Ok(())
}

fn print_job(job: &Job) {
    match serde_json::to_string_pretty(job) {
        Ok(pretty) => println!("{pretty}"),
        Err(e) => println!("{job:?} (failed to pretty-print: {e})"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_are_registered() {
        let registry = ActionRegistry::with_builtins();
        assert!(registry.contains("ping"));
        assert!(registry.contains("sleep"));
        assert!(registry.contains("window"));
        assert!(registry.contains("debug"));
        assert!(!registry.contains("transfer"));
    }

    #[test]
    fn sleep_requires_duration_field() {
        let job = Job::new("sleep");
        let err = required_duration(&job);
        assert!(matches!(err, Err(HandlerError::MissingField(ref f)) if f == "duration"));
    }

    #[test]
    fn sleep_reads_duration_field() {
        let mut job = Job::new("sleep");
        job.set("duration", 0.01);
        assert_eq!(required_duration(&job).unwrap(), 0.01);
    }

    #[test]
    fn debug_accepts_arbitrary_job_shapes() {
        let mut job = Job::new("debug");
        job.set("anything", serde_json::json!([1, 2, 3]));
        print_job(&job);
    }

    // `window`'s use of `ctx.channel`/`ctx.io_handle` needs a live AMQP
    // connection and is covered by the `realm-sink` integration tests
    // instead of a unit test here.
}
