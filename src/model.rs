use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

/// Opaque hierarchical identifier for an app or a pod.
///
/// Equality and hashing are by value; the hierarchy itself (slashes, path
/// segments, whatever the orchestrator uses) is opaque to the GC core.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PathId(pub String);

impl PathId {
    /// Builds a new path id from anything that converts to a `String`.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for PathId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Absolute timestamp with total order, identifying one historical version
/// of an app, a pod, or a root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version(pub i64);

impl Version {
    /// Builds a version from a raw millisecond timestamp.
    pub fn new(millis: i64) -> Self {
        Self(millis)
    }
}

/// `(PathId, Version)` identifying one historical version of an app.
pub type AppRef = (PathId, Version);

/// `(PathId, Version)` identifying one historical version of a pod.
pub type PodRef = (PathId, Version);

/// Snapshot of the entire deployable topology at one point in time.
///
/// Immutable once stored: the GC core never mutates a `RootSnapshot`, only
/// deletes the whole thing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootSnapshot {
    /// This root's own version.
    pub version: Version,
    /// Every (app id, version) pair this root transitively names.
    pub transitive_apps: HashMap<PathId, HashSet<Version>>,
    /// Every (pod id, version) pair this root transitively names.
    pub transitive_pods: HashMap<PathId, HashSet<Version>>,
}

impl RootSnapshot {
    /// Builds an empty root snapshot at the given version.
    pub fn new(version: Version) -> Self {
        Self {
            version,
            transitive_apps: HashMap::new(),
            transitive_pods: HashMap::new(),
        }
    }

    /// Records that this root transitively names `(app_id, version)`.
    pub fn with_app(mut self, app_id: PathId, version: Version) -> Self {
        self.transitive_apps.entry(app_id).or_default().insert(version);
        self
    }

    /// Records that this root transitively names `(pod_id, version)`.
    pub fn with_pod(mut self, pod_id: PathId, version: Version) -> Self {
        self.transitive_pods.entry(pod_id).or_default().insert(version);
        self
    }
}

/// Pair of roots representing an in-flight deployment change.
///
/// Immutable once stored. A plan pins both of its roots, and transitively
/// everything those roots name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    /// The topology being migrated away from.
    pub original: RootSnapshot,
    /// The topology being migrated to.
    pub target: RootSnapshot,
}

/// Candidate deletion set computed by the scan engine.
///
/// Forms a commutative monoid under elementwise union: folding any number of
/// batch results (in any order) with [`ScanResult::merge`], starting from
/// [`ScanResult::default`], yields the same set as computing the union in
/// one pass. This is what lets the scan engine process pinning roots in
/// batches and fold the per-batch results together.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanResult {
    /// App ids with no surviving reference from any in-use root.
    pub apps_full_delete: HashSet<PathId>,
    /// Per-app versions beyond the retention cap, excluding in-use versions.
    pub app_versions_delete: HashMap<PathId, HashSet<Version>>,
    /// Pod ids with no surviving reference from any in-use root.
    pub pods_full_delete: HashSet<PathId>,
    /// Per-pod versions beyond the retention cap, excluding in-use versions.
    pub pod_versions_delete: HashMap<PathId, HashSet<Version>>,
    /// Root versions beyond the retention cap, excluding pinned roots.
    pub roots_delete: HashSet<Version>,
}

impl ScanResult {
    /// Whether this result has nothing left to delete.
    ///
    /// Deliberately mirrors the source system's behavior rather than the
    /// textbook definition: only `apps_full_delete`/`app_versions_delete`
    /// and `roots_delete` are consulted. A result carrying only pod
    /// deletions is treated as empty and is discarded by the coordinator
    /// without running compact. See the design notes for why this is kept
    /// rather than "fixed".
    pub fn is_empty(&self) -> bool {
        self.apps_full_delete.is_empty()
            && self.app_versions_delete.values().all(HashSet::is_empty)
            && self.roots_delete.is_empty()
    }

    /// Folds another batch's result into this one by elementwise union.
    pub fn merge(mut self, other: ScanResult) -> ScanResult {
        self.apps_full_delete.extend(other.apps_full_delete);
        self.pods_full_delete.extend(other.pods_full_delete);
        self.roots_delete.extend(other.roots_delete);
        merge_version_map(&mut self.app_versions_delete, other.app_versions_delete);
        merge_version_map(&mut self.pod_versions_delete, other.pod_versions_delete);
        self
    }
}

fn merge_version_map(
    into: &mut HashMap<PathId, HashSet<Version>>,
    from: HashMap<PathId, HashSet<Version>>,
) {
    for (id, versions) in from {
        into.entry(id).or_default().extend(versions);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app(id: &str) -> PathId {
        PathId::new(id)
    }

    #[test]
    fn merge_is_associative_and_commutative() {
        let a = ScanResult {
            apps_full_delete: HashSet::from([app("a")]),
            roots_delete: HashSet::from([Version(1)]),
            ..Default::default()
        };
        let b = ScanResult {
            apps_full_delete: HashSet::from([app("b")]),
            app_versions_delete: HashMap::from([(app("a"), HashSet::from([Version(2)]))]),
            ..Default::default()
        };
        let c = ScanResult {
            pods_full_delete: HashSet::from([app("p")]),
            ..Default::default()
        };

        let left = a.clone().merge(b.clone()).merge(c.clone());
        let right = a.clone().merge(c.clone().merge(b.clone()));
        assert_eq!(left, right);

        let comm_a = a.clone().merge(b.clone());
        let comm_b = b.merge(a);
        assert_eq!(comm_a, comm_b);
    }

    #[test]
    fn default_is_merge_identity() {
        let r = ScanResult {
            apps_full_delete: HashSet::from([app("a")]),
            ..Default::default()
        };
        assert_eq!(r.clone().merge(ScanResult::default()), r);
        assert_eq!(ScanResult::default().merge(r.clone()), r);
    }

    #[test]
    fn is_empty_ignores_pod_only_results() {
        let pods_only = ScanResult {
            pods_full_delete: HashSet::from([app("orphaned-pod")]),
            ..Default::default()
        };
        assert!(pods_only.is_empty(), "matches source: pod-only results are discarded");

        let apps_nonempty = ScanResult {
            apps_full_delete: HashSet::from([app("a")]),
            ..Default::default()
        };
        assert!(!apps_nonempty.is_empty());

        let roots_nonempty = ScanResult {
            roots_delete: HashSet::from([Version(1)]),
            ..Default::default()
        };
        assert!(!roots_nonempty.is_empty());
    }
}
