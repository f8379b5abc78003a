use std::time::Duration;

/// Seam metrics emission plugs into.
///
/// The GC core never decides *where* metrics go; it only calls these three
/// hooks at the points named in the design notes. Production callers supply
/// an implementation that forwards to whatever metrics system the host
/// process already uses (`persistence.gc.runs`, `persistence.gc.scan.duration`,
/// `persistence.gc.compaction.duration`).
pub trait GcMetrics: Send + Sync {
    /// Called once per compact completion.
    fn record_run(&self);
    /// Called once per scan phase, with its wall-clock duration.
    fn record_scan_duration(&self, duration: Duration);
    /// Called once per compact phase, with its wall-clock duration.
    fn record_compaction_duration(&self, duration: Duration);
}

/// Default [`GcMetrics`] that discards everything.
///
/// Lets the coordinator be constructed in tests and minimal embeddings
/// without a metrics backend on hand.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl GcMetrics for NoopMetrics {
    fn record_run(&self) {}
    fn record_scan_duration(&self, _duration: Duration) {}
    fn record_compaction_duration(&self, _duration: Duration) {}
}
