use std::num::NonZeroUsize;
use std::time::Duration;

use crate::error::{GcError, Result};

/// Default per-family retention cap, used when no cap is otherwise specified.
const DEFAULT_MAX_VERSIONS: usize = 25;

/// Default pinning-root hydration batch size.
const DEFAULT_SCAN_BATCH_SIZE: usize = 32;

/// Default `Resting` backoff between GC cycles.
const DEFAULT_CLEANING_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Configuration consumed by the GC coordinator.
///
/// Parsing configuration from files, environment variables, or flags is out
/// of scope for this crate (see the purpose & scope section); this is the
/// typed value that a parsed configuration produces on its way into
/// [`crate::coordinator::Coordinator::spawn`].
#[derive(Debug, Clone, Copy)]
pub struct GcConfig {
    /// Cap on root-version count, per-app version count, and per-pod version
    /// count, applied independently to each.
    pub max_versions: NonZeroUsize,
    /// Pinning-root hydration batch size used by the scan engine.
    pub scan_batch_size: NonZeroUsize,
    /// `Resting` delay between GC cycles. Zero disables `Resting`: the
    /// coordinator starts in, and always returns to, `ReadyForGc`.
    pub cleaning_interval: Duration,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            max_versions: nonzero(DEFAULT_MAX_VERSIONS),
            scan_batch_size: nonzero(DEFAULT_SCAN_BATCH_SIZE),
            cleaning_interval: DEFAULT_CLEANING_INTERVAL,
        }
    }
}

impl GcConfig {
    /// A short-interval, tight-cap profile for environments that churn
    /// deploys quickly and want storage reclaimed promptly.
    pub fn aggressive() -> Self {
        Self {
            max_versions: nonzero(5),
            scan_batch_size: nonzero(16),
            cleaning_interval: Duration::from_secs(30),
        }
    }

    /// A profile for environments where GC is driven externally (an
    /// operator trigger, a cron-like caller) rather than by the coordinator's
    /// own timer. Disables `Resting` and retains a generous history.
    pub fn relaxed() -> Self {
        Self {
            max_versions: nonzero(100),
            scan_batch_size: nonzero(64),
            cleaning_interval: Duration::ZERO,
        }
    }

    /// Whether this configuration disables the `Resting` state, i.e. the
    /// coordinator starts in, and always returns to, `ReadyForGc`.
    pub fn disables_resting(&self) -> bool {
        self.cleaning_interval.is_zero()
    }

    /// Builds a [`GcConfig`] from untyped values, e.g. ones parsed upstream
    /// from a configuration file. Returns [`GcError::InvalidConfig`] if
    /// either cap is zero.
    pub fn try_new(
        max_versions: usize,
        scan_batch_size: usize,
        cleaning_interval: Duration,
    ) -> Result<Self> {
        let max_versions = NonZeroUsize::new(max_versions)
            .ok_or_else(|| GcError::InvalidConfig("max_versions must be positive".into()))?;
        let scan_batch_size = NonZeroUsize::new(scan_batch_size)
            .ok_or_else(|| GcError::InvalidConfig("scan_batch_size must be positive".into()))?;
        Ok(Self {
            max_versions,
            scan_batch_size,
            cleaning_interval,
        })
    }
}

fn nonzero(v: usize) -> NonZeroUsize {
    NonZeroUsize::new(v).expect("constant default is nonzero")
}
