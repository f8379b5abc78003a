use thiserror::Error;

/// Result alias used throughout the crate's public API.
pub type Result<T> = std::result::Result<T, GcError>;

/// Errors surfaced by the crate's public API.
///
/// Per the error-handling design, the GC coordinator itself never lets a
/// [`RepositoryError`] escape past a scan or compact phase boundary — those
/// are caught and folded into an empty result. This enum exists for the
/// handful of entry points that *can* fail outward: building a [`crate::config::GcConfig`]
/// from untyped values, and awaiting a writer's completion handle if the
/// coordinator itself has shut down.
#[derive(Debug, Error)]
pub enum GcError {
    /// A configuration value failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// The coordinator's mailbox was dropped before a message could be sent.
    #[error("GC coordinator is no longer running")]
    CoordinatorShutDown,
    /// A writer's completion handle was dropped without being resolved.
    #[error("GC coordinator dropped a writer's completion handle")]
    HandleDropped,
}

/// Error returned by a repository port implementation.
///
/// Scan and compact swallow these at every await point (see the error
/// handling design): a failed read collapses the affected batch into an
/// empty result, and a failed delete is logged and retried next cycle.
/// The type still needs to exist and carry real information so repository
/// adapters (and their own tests) have something concrete to construct,
/// even though the coordinator only ever observes "this batch failed".
#[derive(Debug, Error, Clone)]
#[error("{family} repository error: {message}")]
pub struct RepositoryError {
    /// Which record family the failing operation concerned.
    pub family: RecordFamily,
    /// Human-readable cause, as reported by the underlying storage backend.
    pub message: String,
}

impl RepositoryError {
    /// Builds a new repository error for the given record family.
    pub fn new(family: RecordFamily, message: impl Into<String>) -> Self {
        Self {
            family,
            message: message.into(),
        }
    }
}

/// Which of the four record families an operation or error concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordFamily {
    /// Applications.
    App,
    /// Pods.
    Pod,
    /// Root snapshots.
    Root,
    /// Deployment plans.
    Plan,
}

impl std::fmt::Display for RecordFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RecordFamily::App => "app",
            RecordFamily::Pod => "pod",
            RecordFamily::Root => "root",
            RecordFamily::Plan => "plan",
        };
        f.write_str(name)
    }
}
