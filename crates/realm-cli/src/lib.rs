//! Shared bits every operator binary in this crate needs: PID-file support
//! (SPEC_FULL.md 10.3) and log verbosity wiring on top of `env_logger`.

use std::io::Write;

/// Writes the current process id to `path`, if given. Matches `log.py`'s
/// `--pidfile` (checked by process supervisors, never read back by us).
pub fn write_pidfile(path: Option<&str>) -> anyhow::Result<()> {
    if let Some(path) = path {
        let mut file = std::fs::File::create(path)?;
        write!(file, "{}", std::process::id())?;
    }
    Ok(())
}

/// Initializes `env_logger` honoring `--loglevel`/`--stderr`-equivalent
/// flags: an explicit level (if given) takes priority over `RUST_LOG`, and
/// output always goes to stderr (env_logger's default), matching the
/// original `log.py`'s `--stderr` flag, which was its only supported mode.
pub fn init_logging(loglevel: Option<&str>) {
    let mut builder = env_logger::Builder::from_default_env();
    if let Some(level) = loglevel {
        builder.parse_filters(level);
    }
    builder.init();
}
