//! Operator tool: run a sink daemon against a realm until interrupted.
//!
//! Grounded on `original_source/datasink/worker.py` (`JobSink.serve`) for the
//! connect/consume/reconnect contract, which lives in `realm_sink::SinkRuntime`;
//! this binary is just argument parsing, logging setup and the Ctrl+C
//! shutdown wiring, the way `rabbitmq-subscriber/src/main.rs` wires
//! `tokio::signal::ctrl_c()` into a running consumer.

use anyhow::{Context, Result};
use clap::Parser;
use realm_core::config::{load_yaml, SinkConfig};
use realm_core::error::ConfigError;
use realm_sink::SinkRuntime;

/// Run a sink worker pool consuming jobs from a realm queue.
#[derive(Parser, Debug)]
struct Args {
    /// Path to the sink config file (.yml appended if omitted)
    #[arg(short = 'f', long = "config")]
    config: String,

    /// Expected sink name; validated against the queue this config derives
    /// from `key` (datasink.py's `JobSink.read_config` cross-check)
    #[arg(short = 'n', long = "name")]
    name: Option<String>,

    /// Routing key override; falls back to the config's own topic
    #[arg(short = 't', long = "topic")]
    topic: Option<String>,

    /// Write the process id to this file on startup
    #[arg(long = "pidfile")]
    pidfile: Option<String>,

    /// Override RUST_LOG-style filter, e.g. "debug"
    #[arg(long = "loglevel")]
    loglevel: Option<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    realm_cli::init_logging(args.loglevel.as_deref());
    realm_cli::write_pidfile(args.pidfile.as_deref())?;

    let config: SinkConfig = load_yaml(&args.config).context("loading sink config")?;

    if let Some(name) = &args.name {
        let available = config.queue_names();
        if !available.contains(name) {
            return Err(ConfigError::UnknownQueue {
                name: name.clone(),
                available,
            }
            .into());
        }
    }

    let runtime = SinkRuntime::new(config);
    let quit_signal = runtime.quit_signal();

    let rt = tokio::runtime::Runtime::new().context("building tokio runtime")?;
    let handle = rt.handle().clone();

    let watcher = std::thread::spawn(move || {
        handle.block_on(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::info!("received interrupt, shutting down");
                quit_signal.store(true, std::sync::atomic::Ordering::SeqCst);
            }
        });
    });

    let io_handle = rt.handle().clone();
    runtime.serve(io_handle, args.topic);

    let _ = watcher.join();
    Ok(())
}
