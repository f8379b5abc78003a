use crate::error::{GcError, Result};
use tracing_subscriber::{fmt, EnvFilter};

/// Installs a `tracing` subscriber for processes embedding this crate that
/// have not already set one up.
///
/// The GC coordinator never calls this itself — it only ever emits spans and
/// events through the ambient `tracing` dispatcher. This is offered for
/// binaries, examples, and tests that want the host project's usual
/// `fmt` + `EnvFilter` setup without repeating it.
pub fn init_logging(level: &str) -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_new(level)
                .map_err(|e| GcError::InvalidConfig(format!("invalid log level: {e}")))?,
        )
        .with_target(true)
        .with_thread_ids(true)
        .try_init()
        .map_err(|_| GcError::InvalidConfig("logging already initialized".into()))
}
