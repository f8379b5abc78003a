use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::RepositoryError;
use crate::model::{PathId, RootSnapshot, Version};

/// Result alias for repository port operations.
pub type RepoResult<T> = std::result::Result<T, RepositoryError>;

/// A finite, not-restartable sequence consumed at most once per scan.
///
/// Repository ports hand these back instead of `Vec`s so a backend can
/// stream results (e.g. paginate a remote call) without the GC core forcing
/// it to buffer everything up front.
pub type LazySeq<T> = BoxStream<'static, RepoResult<T>>;

/// Lightweight reference to a stored plan, as returned by
/// [`DeploymentRepository::lazy_all`]. Full roots are fetched on demand via
/// [`GroupRepository::lazy_root_version`] — the deployment repository itself
/// only needs to remember which two root versions a plan pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlanRef {
    /// Version of the plan's `original` root.
    pub original_version: Version,
    /// Version of the plan's `target` root.
    pub target_version: Version,
}

/// Port over the app repository.
#[async_trait]
pub trait AppRepository: Send + Sync {
    /// All stored app ids.
    fn ids(&self) -> LazySeq<PathId>;
    /// All stored versions of one app, in no particular order.
    fn versions(&self, id: &PathId) -> LazySeq<Version>;
    /// Deletes an app and all of its versions.
    async fn delete(&self, id: &PathId) -> RepoResult<()>;
    /// Deletes a single version of an app.
    async fn delete_version(&self, id: &PathId, version: Version) -> RepoResult<()>;
}

/// Port over the pod repository. Symmetric to [`AppRepository`].
#[async_trait]
pub trait PodRepository: Send + Sync {
    /// All stored pod ids.
    fn ids(&self) -> LazySeq<PathId>;
    /// All stored versions of one pod, in no particular order.
    fn versions(&self, id: &PathId) -> LazySeq<Version>;
    /// Deletes a pod and all of its versions.
    async fn delete(&self, id: &PathId) -> RepoResult<()>;
    /// Deletes a single version of a pod.
    async fn delete_version(&self, id: &PathId, version: Version) -> RepoResult<()>;
}

/// Port over the root (group) repository.
#[async_trait]
pub trait GroupRepository: Send + Sync {
    /// All stored root versions.
    fn root_versions(&self) -> LazySeq<Version>;
    /// The current root — the topology the orchestrator is presently acting
    /// on. Always pinned.
    async fn root(&self) -> RepoResult<RootSnapshot>;
    /// Hydrates a root version into a full snapshot, if it still exists.
    async fn lazy_root_version(&self, version: Version) -> RepoResult<Option<RootSnapshot>>;
    /// Deletes a single root version.
    async fn delete_root_version(&self, version: Version) -> RepoResult<()>;
}

/// Port over the deployment-plan repository.
#[async_trait]
pub trait DeploymentRepository: Send + Sync {
    /// All stored plans, as lightweight references. Full roots are hydrated
    /// separately via [`GroupRepository::lazy_root_version`].
    fn lazy_all(&self) -> LazySeq<PlanRef>;
}
