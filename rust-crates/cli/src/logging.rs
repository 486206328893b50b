use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use std::{
    fs,
    path::Path,
    sync::OnceLock,
};
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling,
};
use tracing_subscriber::{
    EnvFilter,
    fmt,
};

const LOG_FILE_PREFIX: &str = "miniapp.log";

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Route tracing output to a daily rolling file so stdout only carries
/// command results.
pub fn init_file_logging(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)
        .wrap_err_with(|| format!("Failed to create log directory {}", dir.display()))?;
    let (writer, guard) = tracing_appender::non_blocking(rolling::daily(dir, LOG_FILE_PREFIX));
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .try_init()
        .map_err(|e| eyre!("Failed to install logger: {e}"))?;
    let _ = LOG_GUARD.set(guard);
    Ok(())
}
