//! Operator tool: stat a local file and print a ready-to-publish `transfer`
//! job as JSON, for piping into `realm-pub -j -` (reading stdin).
//!
//! Grounded on `original_source/examples/ds_file.py`, a trivial producer the
//! distillation dropped (SPEC_FULL.md 11 "`ds_file.py`").

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;

/// Print a `transfer` job describing a local file as JSON.
#[derive(Parser, Debug)]
struct Args {
    /// Local file to describe
    srcpath: String,

    /// Username for the transfer
    #[arg(short = 'u', long = "username")]
    username: Option<String>,

    /// Destination host
    #[arg(long = "host")]
    host: String,

    /// Transfer method (copy, scp, ftp, ftps, sftp, http, https)
    #[arg(short = 'm', long = "method", default_value = "scp")]
    transfermethod: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let metadata = std::fs::metadata(&args.srcpath)
        .with_context(|| format!("statting '{}'", args.srcpath))?;

    let username = args
        .username
        .or_else(|| std::env::var("LOGNAME").ok())
        .unwrap_or_else(|| "anonymous".to_string());

    let job = json!({
        "action": "transfer",
        "srcpath": args.srcpath,
        "username": username,
        "host": args.host,
        "transfermethod": args.transfermethod,
        "size": metadata.len(),
    });

    println!("{}", serde_json::to_string(&job)?);
    Ok(())
}
