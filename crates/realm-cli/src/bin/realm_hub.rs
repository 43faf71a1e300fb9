//! Operator tool: bring up a realm's exchange and configured queues, then
//! optionally stay resident to drain the dead-letter exchange.
//!
//! Grounded on `original_source/datasink/ds_hub.py`: declare the exchange,
//! loop the hub config's `queues:` map declaring/binding each one (bound iff
//! `enabled`), and optionally stick around consuming `initialize.handle_dlx`.

use anyhow::{Context, Result};
use clap::Parser;
use lapin::{Connection, ConnectionProperties};
use realm_broker::topology;
use realm_core::config::{load_yaml, HubConfig};

/// Declare a realm's exchange/queues, optionally draining its DLX.
#[derive(Parser, Debug)]
struct Args {
    /// Path to the hub config file (.yml appended if omitted)
    #[arg(short = 'f', long = "config")]
    config: String,

    /// Stay resident and drain the dead-letter exchange
    #[arg(long = "dlx")]
    dlx: bool,

    /// Write the process id to this file on startup
    #[arg(long = "pidfile")]
    pidfile: Option<String>,

    /// Override RUST_LOG-style filter, e.g. "debug"
    #[arg(long = "loglevel")]
    loglevel: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    realm_cli::init_logging(args.loglevel.as_deref());
    realm_cli::write_pidfile(args.pidfile.as_deref())?;

    let config: HubConfig = load_yaml(&args.config).context("loading hub config")?;
    let realm = &config.realm;
    let backlog_queue = realm.backlog_queue.as_deref().unwrap_or("backlog");

    let url = realm.amqp_url();
    let connection = Connection::connect(&url, ConnectionProperties::default())
        .await
        .with_context(|| format!("connecting to broker at {url}"))?;
    let channel = connection.create_channel().await.context("opening channel")?;

    topology::declare_exchange(&channel, realm, backlog_queue).await?;
    log::info!("declared exchange '{}' and DLX backlog queue '{}'", realm.realm, backlog_queue);

    for (name, opts) in &config.queues {
        topology::setup_queue(&channel, name, opts, realm, opts.enabled).await?;
        log::info!("declared queue '{name}' (bound={})", opts.enabled);
    }

    if args.dlx {
        log::info!("draining dead-letter exchange on '{backlog_queue}'; press Ctrl+C to stop");
        let quit_signal = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let watcher_signal = std::sync::Arc::clone(&quit_signal);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                watcher_signal.store(true, std::sync::atomic::Ordering::SeqCst);
            }
        });

        let consumer = topology::consume_dlx(&channel, backlog_queue).await?;
        topology::drain_dlx(
            &channel,
            consumer,
            || quit_signal.load(std::sync::atomic::Ordering::SeqCst),
            |delivery| {
                log::warn!(
                    "dead-lettered message: {}",
                    String::from_utf8_lossy(&delivery.data)
                );
            },
        )
        .await;
    }

    connection.close(0, "realm-hub done").await.ok();
    Ok(())
}
