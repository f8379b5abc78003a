//! In-memory repository fakes used by this crate's own tests and available
//! to integration tests that exercise the coordinator end to end.
//!
//! Mirrors the host project's convention of a single in-process test double
//! per storage port rather than mocking each call individually.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};

use crate::error::RepositoryError;
use crate::model::{PathId, Plan, RootSnapshot, Version};
use crate::repository::{
    AppRepository, DeploymentRepository, GroupRepository, LazySeq, PlanRef, PodRepository,
    RepoResult,
};
use crate::scan::Repositories;

#[derive(Default)]
struct Store {
    apps: HashMap<PathId, HashSet<Version>>,
    pods: HashMap<PathId, HashSet<Version>>,
    roots: HashMap<Version, RootSnapshot>,
    current_root: Option<Version>,
    plans: Vec<PlanRef>,
}

/// In-memory stand-in for all four repository ports, backed by one shared
/// store. Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct InMemoryRepositories {
    inner: Arc<Mutex<Store>>,
}

impl InMemoryRepositories {
    /// Builds an empty repository set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a root snapshot (without making it current).
    pub fn put_root(&self, root: RootSnapshot) {
        let mut s = self.inner.lock().unwrap();
        s.roots.insert(root.version, root);
    }

    /// Marks an already-stored root version as the current root.
    pub fn set_current_root(&self, version: Version) {
        self.inner.lock().unwrap().current_root = Some(version);
    }

    /// Stores a root snapshot and makes it the current root in one step.
    pub fn set_current_root_snapshot(&self, root: RootSnapshot) {
        let version = root.version;
        self.put_root(root);
        self.set_current_root(version);
    }

    /// Stores a plan: both of its roots (if not already present) and a
    /// lightweight reference in the plan list.
    pub fn put_plan(&self, plan: Plan) {
        let plan_ref = PlanRef {
            original_version: plan.original.version,
            target_version: plan.target.version,
        };
        let mut s = self.inner.lock().unwrap();
        s.roots.entry(plan.original.version).or_insert(plan.original);
        s.roots.entry(plan.target.version).or_insert(plan.target);
        s.plans.push(plan_ref);
    }

    /// Records a stored app version.
    pub fn put_app_version(&self, id: PathId, version: Version) {
        self.inner.lock().unwrap().apps.entry(id).or_default().insert(version);
    }

    /// Records a stored pod version.
    pub fn put_pod_version(&self, id: PathId, version: Version) {
        self.inner.lock().unwrap().pods.entry(id).or_default().insert(version);
    }

    /// Current set of stored root versions, for assertions after compact.
    pub fn root_versions_snapshot(&self) -> HashSet<Version> {
        self.inner.lock().unwrap().roots.keys().copied().collect()
    }

    /// Current set of stored app ids, for assertions after compact.
    pub fn app_ids_snapshot(&self) -> HashSet<PathId> {
        self.inner.lock().unwrap().apps.keys().cloned().collect()
    }

    /// Current versions stored for one app, for assertions after compact.
    pub fn app_versions_snapshot(&self, id: &PathId) -> HashSet<Version> {
        self.inner.lock().unwrap().apps.get(id).cloned().unwrap_or_default()
    }

    /// Bundles this fake as the four repository ports the scan/compact
    /// engines consume.
    pub fn ports(&self) -> Repositories {
        Repositories {
            apps: Arc::new(self.clone()),
            pods: Arc::new(self.clone()),
            roots: Arc::new(self.clone()),
            plans: Arc::new(self.clone()),
        }
    }
}

fn not_found(family: crate::error::RecordFamily) -> RepositoryError {
    RepositoryError::new(family, "not found")
}

#[async_trait]
impl AppRepository for InMemoryRepositories {
    fn ids(&self) -> LazySeq<PathId> {
        let ids: Vec<RepoResult<PathId>> =
            self.inner.lock().unwrap().apps.keys().cloned().map(Ok).collect();
        stream::iter(ids).boxed()
    }

    fn versions(&self, id: &PathId) -> LazySeq<Version> {
        let versions: Vec<RepoResult<Version>> = self
            .inner
            .lock()
            .unwrap()
            .apps
            .get(id)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .map(Ok)
            .collect();
        stream::iter(versions).boxed()
    }

    async fn delete(&self, id: &PathId) -> RepoResult<()> {
        self.inner.lock().unwrap().apps.remove(id);
        Ok(())
    }

    async fn delete_version(&self, id: &PathId, version: Version) -> RepoResult<()> {
        let mut s = self.inner.lock().unwrap();
        match s.apps.get_mut(id) {
            Some(versions) => {
                versions.remove(&version);
                Ok(())
            }
            None => Err(not_found(crate::error::RecordFamily::App)),
        }
    }
}

#[async_trait]
impl PodRepository for InMemoryRepositories {
    fn ids(&self) -> LazySeq<PathId> {
        let ids: Vec<RepoResult<PathId>> =
            self.inner.lock().unwrap().pods.keys().cloned().map(Ok).collect();
        stream::iter(ids).boxed()
    }

    fn versions(&self, id: &PathId) -> LazySeq<Version> {
        let versions: Vec<RepoResult<Version>> = self
            .inner
            .lock()
            .unwrap()
            .pods
            .get(id)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .map(Ok)
            .collect();
        stream::iter(versions).boxed()
    }

    async fn delete(&self, id: &PathId) -> RepoResult<()> {
        self.inner.lock().unwrap().pods.remove(id);
        Ok(())
    }

    async fn delete_version(&self, id: &PathId, version: Version) -> RepoResult<()> {
        let mut s = self.inner.lock().unwrap();
        match s.pods.get_mut(id) {
            Some(versions) => {
                versions.remove(&version);
                Ok(())
            }
            None => Err(not_found(crate::error::RecordFamily::Pod)),
        }
    }
}

#[async_trait]
impl GroupRepository for InMemoryRepositories {
    fn root_versions(&self) -> LazySeq<Version> {
        let versions: Vec<RepoResult<Version>> =
            self.inner.lock().unwrap().roots.keys().copied().map(Ok).collect();
        stream::iter(versions).boxed()
    }

    async fn root(&self) -> RepoResult<RootSnapshot> {
        let s = self.inner.lock().unwrap();
        let current = s.current_root.ok_or_else(|| not_found(crate::error::RecordFamily::Root))?;
        s.roots
            .get(&current)
            .cloned()
            .ok_or_else(|| not_found(crate::error::RecordFamily::Root))
    }

    async fn lazy_root_version(&self, version: Version) -> RepoResult<Option<RootSnapshot>> {
        Ok(self.inner.lock().unwrap().roots.get(&version).cloned())
    }

    async fn delete_root_version(&self, version: Version) -> RepoResult<()> {
        self.inner.lock().unwrap().roots.remove(&version);
        Ok(())
    }
}

#[async_trait]
impl DeploymentRepository for InMemoryRepositories {
    fn lazy_all(&self) -> LazySeq<PlanRef> {
        let plans: Vec<RepoResult<PlanRef>> =
            self.inner.lock().unwrap().plans.iter().copied().map(Ok).collect();
        stream::iter(plans).boxed()
    }
}
