//! The `transfer` action: the sink's bridge into `realm-transfer`.
//!
//! Grounded on `original_source/datasink/datasink.py` (`server.xfer_file`):
//! instrument filtering, backfilling `host`/`transfermethod`/`username`
//! from sink config, stamping `direction`, then unpack/move post-processing
//! on success. Per spec.md 7, a transfer's success or failure is a
//! data-plane outcome recorded in the result, not a message-plane one --
//! this handler always acks.

use std::path::Path;
use std::sync::Arc;

use realm_core::config::SinkConfig;
use realm_core::job::Job;
use realm_transfer::{postprocess, StoreBy, TransferEngine};

use crate::error::HandlerError;
use crate::registry::{ActionContext, ActionHandler};

pub fn transfer_action(config: &SinkConfig) -> ActionHandler {
    let datadir = config.datadir_or_cwd().unwrap_or_else(|e| {
        log::warn!("failed to resolve datadir, storing in cwd: {e}");
        ".".to_string()
    });
    let storeby = StoreBy::parse(config.storeby.as_deref()).unwrap_or_else(|e| {
        log::error!("invalid storeby '{:?}' in config, defaulting to flat layout: {e}", config.storeby);
        StoreBy::Flat
    });
    let engine = Arc::new(TransferEngine::new(datadir, storeby, config.md5check, None));

    let insfilter = config.insfilter.clone();
    let movedir = config.movedir.clone();
    let unpack_tarfiles = config.unpack_tarfiles;
    let transfer_host = config.transfer_host.clone();
    let transfer_method = config.transfer_method.clone();
    let transfer_username = config.transfer_username.clone();
    let transfer_direction = config.transfer_direction.clone();

    Box::new(move |job: &Job, _ctx: &ActionContext| -> Result<(), HandlerError> {
        if let Some(filter) = &insfilter {
            if let Some(insname) = job.get_str("insname") {
                if !filter.iter().any(|allowed| allowed == insname) {
                    log::debug!("job insname '{insname}' not in insfilter; skipping transfer");
                    return Ok(());
                }
            }
        }

        let mut job = job.clone();
        if let Some(host) = &transfer_host {
            job.fill_str("host", host);
        }
        if let Some(method) = &transfer_method {
            job.fill_str("transfermethod", method);
        }
        if let Some(username) = &transfer_username {
            job.fill_str("username", username);
        }
        job.set("direction", transfer_direction.clone());

        let result = engine.transfer(&job);

        if result.succeeded() {
            log::info!(
                "transfer complete: {} <- {} ({})",
                result.dst_path,
                result.src_path,
                result.xfer_method
            );
            let dst_path = Path::new(&result.dst_path);
            if let Err(e) = postprocess(dst_path, unpack_tarfiles, movedir.as_deref().map(Path::new)) {
                log::error!("error unpacking/moving file after transfer: {e}");
            }
        } else {
            log::error!(
                "failed to transfer file '{}': {}",
                result.src_path,
                result.res_str.as_deref().unwrap_or("unknown error")
            );
        }

        // ACKs unconditionally: the broker message is consumed regardless
        // of the transfer's data-plane outcome (spec.md 7).
        Ok(())
    })
}
