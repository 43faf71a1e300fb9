//! Operator tool: submit a single job to a realm and exit.
//!
//! Grounded on `original_source/examples/ds_pub.py`, which reads a job file
//! (or stdin), connects, submits once, and exits -- there is no background
//! drain loop in the original one-shot tool (that lives in
//! `realm_publish::PublisherRuntime::start_publish` for embedding
//! applications, spec.md 4.1 "Background drain loop").

use std::io::Read;

use anyhow::{Context, Result};
use clap::Parser;
use realm_core::config::{load_yaml, PublisherConfig};
use realm_core::job::Job;
use realm_publish::PublisherRuntime;

/// Submit a job to a realm exchange.
#[derive(Parser, Debug)]
struct Args {
    /// Path to the publisher config file (.yml appended if omitted)
    #[arg(short = 'f', long = "config")]
    config: String,

    /// Publisher name stamped onto submitted jobs (source_origin)
    #[arg(short = 'n', long = "name")]
    name: String,

    /// Routing key override; falls back to the job's own topic, then config
    #[arg(short = 't', long = "topic")]
    topic: Option<String>,

    /// JSON job file to submit; reads stdin when omitted
    #[arg(short = 'j', long = "jobfile")]
    jobfile: Option<String>,

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

    let config: PublisherConfig = load_yaml(&args.config).context("loading publisher config")?;

    let body = match &args.jobfile {
        Some(path) => std::fs::read_to_string(path).with_context(|| format!("reading job file '{path}'"))?,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("reading job from stdin")?;
            buf
        }
    };
    let job = Job::from_json(body.as_bytes()).context("parsing job JSON")?;

    let runtime = PublisherRuntime::new(config, args.name);
    runtime.connect().await.context("connecting to broker")?;
    runtime
        .submit(job, args.topic.as_deref())
        .await
        .context("submitting job")?;
    runtime.close().await.context("closing broker connection")?;

    log::info!("job submitted");
    Ok(())
}
