//! Operator tool: queue administration (create/purge/delete/enable/disable)
//! against a single named queue.
//!
//! Grounded on `original_source/datasink/ds_queue.py`, which dispatches on an
//! `-a` action flag against `initialize.py`'s primitives -- reused here via
//! `realm_broker::topology`.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use lapin::{Connection, ConnectionProperties};
use realm_broker::topology;
use realm_core::config::{load_yaml, HubConfig};
use realm_core::error::ConfigError;

#[derive(Copy, Clone, Debug, ValueEnum)]
enum Action {
    Create,
    Purge,
    Delete,
    Enable,
    Disable,
}

/// Create, purge, delete, enable or disable a realm queue.
#[derive(Parser, Debug)]
struct Args {
    /// Action to perform on the queue
    #[arg(short = 'a', long = "action", value_enum)]
    action: Action,

    /// Queue name
    #[arg(short = 'n', long = "name")]
    name: String,

    /// Path to the hub config file (.yml appended if omitted)
    #[arg(short = 'f', long = "config")]
    config: String,

    /// Routing key override for `enable`; defaults to "general"
    #[arg(short = 't', long = "topic")]
    topic: Option<String>,

    /// Override RUST_LOG-style filter, e.g. "debug"
    #[arg(long = "loglevel")]
    loglevel: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    realm_cli::init_logging(args.loglevel.as_deref());

    let config: HubConfig = load_yaml(&args.config).context("loading hub config")?;
    let realm = &config.realm;

    // `ds_queue.py` rejects an -n not present in the hub config's `queues:`
    // map before doing anything else; match that here.
    let opts = config
        .queues
        .get(&args.name)
        .cloned()
        .ok_or_else(|| ConfigError::UnknownQueue {
            name: args.name.clone(),
            available: config.queues.keys().cloned().collect(),
        })?;

    let url = realm.amqp_url();
    let connection = Connection::connect(&url, ConnectionProperties::default())
        .await
        .with_context(|| format!("connecting to broker at {url}"))?;
    let channel = connection.create_channel().await.context("opening channel")?;

    match args.action {
        Action::Create => {
            let bind = opts.enabled;
            topology::setup_queue(&channel, &args.name, &opts, realm, bind).await?;
            log::info!("created queue '{}' (bound={bind})", args.name);
        }
        Action::Purge => {
            topology::purge_queue(&channel, &args.name).await?;
            log::info!("purged queue '{}'", args.name);
        }
        Action::Delete => {
            topology::delete_queue(&channel, &args.name, false, true).await?;
            log::info!("deleted queue '{}'", args.name);
        }
        Action::Enable => {
            topology::bind_queue(&channel, &args.name, args.topic.as_deref(), realm).await?;
            log::info!("enabled queue '{}'", args.name);
        }
        Action::Disable => {
            let routing_key = args.topic.as_deref().unwrap_or(opts.resolved_topic());
            topology::unbind_queue(&channel, &args.name, routing_key, realm).await?;
            log::info!("disabled queue '{}'", args.name);
        }
    }

    connection.close(0, "realm-queue done").await.ok();
    Ok(())
}
