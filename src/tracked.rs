use std::collections::{HashMap, HashSet};

use tokio::sync::oneshot;

use crate::model::{PathId, Plan, RootSnapshot, ScanResult, Version};

/// Bookkeeping accumulated while the coordinator is in `Scanning`.
///
/// Records every write that completes successfully during the scan, so that
/// when the scan finishes its (necessarily stale) `ScanResult` can be
/// corrected for anything a writer has announced in the meantime. See the
/// tracked-writes design: this is the conservative step that prevents the
/// compactor from ever deleting something a writer just stored.
#[derive(Debug, Default)]
pub struct TrackedWrites {
    /// App ids stored in full (`StoreApp(id, None)`) during this scan.
    pub apps_stored: HashSet<PathId>,
    /// App versions stored during this scan, keyed by app id.
    pub app_versions_stored: HashMap<PathId, HashSet<Version>>,
    /// Pod ids stored in full during this scan.
    pub pods_stored: HashSet<PathId>,
    /// Pod versions stored during this scan, keyed by pod id.
    pub pod_versions_stored: HashMap<PathId, HashSet<Version>>,
    /// Root versions stored during this scan.
    pub roots_stored: HashSet<Version>,
    /// Whether another `RunGC` arrived while this scan was in flight.
    pub gc_requested: bool,
}

impl TrackedWrites {
    /// Records a `StoreApp` write observed during `Scanning`.
    pub fn record_app(&mut self, id: PathId, version: Option<Version>) {
        match version {
            Some(v) => {
                self.app_versions_stored.entry(id).or_default().insert(v);
            }
            None => {
                self.apps_stored.insert(id);
            }
        }
    }

    /// Records a `StorePod` write observed during `Scanning`.
    pub fn record_pod(&mut self, id: PathId, version: Option<Version>) {
        match version {
            Some(v) => {
                self.pod_versions_stored.entry(id).or_default().insert(v);
            }
            None => {
                self.pods_stored.insert(id);
            }
        }
    }

    /// Records a `StoreRoot` write observed during `Scanning`: the root
    /// itself, plus everything it transitively names.
    pub fn record_root(&mut self, root: &RootSnapshot) {
        self.roots_stored.insert(root.version);
        merge_into(&mut self.app_versions_stored, &root.transitive_apps);
        merge_into(&mut self.pod_versions_stored, &root.transitive_pods);
    }

    /// Records a `StorePlan` write observed during `Scanning`, as if both of
    /// its roots had arrived as separate `StoreRoot` writes.
    pub fn record_plan(&mut self, plan: &Plan) {
        self.record_root(&plan.original);
        self.record_root(&plan.target);
    }
}

fn merge_into(into: &mut HashMap<PathId, HashSet<Version>>, from: &HashMap<PathId, HashSet<Version>>) {
    for (id, versions) in from {
        into.entry(id.clone()).or_default().extend(versions.iter().copied());
    }
}

/// The finalized deletion set being executed by `Compacting`, derived from a
/// `ScanResult` by subtracting out anything recorded in [`TrackedWrites`].
///
/// Immutable for the lifetime of a compact cycle: shared (via `Arc`) between
/// the coordinator, which consults it to make pin-or-release decisions on
/// incoming writes, and the background compact task, which consults it to
/// know what to delete. Nothing in here changes once compact starts, which
/// is what makes sharing it across the coordinator/task boundary safe
/// without a lock.
#[derive(Debug, Default, Clone)]
pub struct DeletionPlan {
    /// App ids to fully delete.
    pub apps_delete: HashSet<PathId>,
    /// App versions to delete, keyed by app id.
    pub app_versions_delete: HashMap<PathId, HashSet<Version>>,
    /// Pod ids to fully delete.
    pub pods_delete: HashSet<PathId>,
    /// Pod versions to delete, keyed by pod id.
    pub pod_versions_delete: HashMap<PathId, HashSet<Version>>,
    /// Root versions to delete.
    pub roots_delete: HashSet<Version>,
}

impl DeletionPlan {
    /// Computes the effective deletion set: `scan`'s raw output, with
    /// anything `tracked` observed being written during the scan removed.
    pub fn from_scan(scan: ScanResult, tracked: &TrackedWrites) -> Self {
        let apps_delete = diff_ids(scan.apps_full_delete, &tracked.apps_stored, &tracked.app_versions_stored);
        let pods_delete = diff_ids(scan.pods_full_delete, &tracked.pods_stored, &tracked.pod_versions_stored);
        let app_versions_delete = diff_version_map(scan.app_versions_delete, &tracked.app_versions_stored);
        let pod_versions_delete = diff_version_map(scan.pod_versions_delete, &tracked.pod_versions_stored);
        let roots_delete = scan
            .roots_delete
            .difference(&tracked.roots_stored)
            .copied()
            .collect();

        Self {
            apps_delete,
            app_versions_delete,
            pods_delete,
            pod_versions_delete,
            roots_delete,
        }
    }

    /// Pin-or-release decision for a `StoreApp` write during `Compacting`.
    /// Pins if the app id is being fully deleted, or (for a versioned write)
    /// if that exact version is being deleted.
    pub fn should_pin_app(&self, id: &PathId, version: Option<Version>) -> bool {
        should_pin(&self.apps_delete, &self.app_versions_delete, id, version)
    }

    /// Pin-or-release decision for a `StorePod` write during `Compacting`.
    /// Symmetric to [`DeletionPlan::should_pin_app`].
    pub fn should_pin_pod(&self, id: &PathId, version: Option<Version>) -> bool {
        should_pin(&self.pods_delete, &self.pod_versions_delete, id, version)
    }

    /// Pin-or-release decision for a `StoreRoot` write during `Compacting`.
    ///
    /// Pins if the root's own version is being deleted, or if any app it
    /// transitively names is being fully deleted or has any version being
    /// deleted. The app-version check is deliberately coarse (keyed only on
    /// the app id, not the exact version) — it over-pins rather than risk
    /// admitting a root with a dangling app-version reference.
    ///
    /// Pods are *not* consulted here. This mirrors a conscious asymmetry in
    /// the source system rather than a bug; see the design notes.
    pub fn should_pin_root(&self, root: &RootSnapshot) -> bool {
        if self.roots_delete.contains(&root.version) {
            return true;
        }
        root.transitive_apps.keys().any(|id| {
            self.apps_delete.contains(id) || self.app_versions_delete.contains_key(id)
        })
    }
}

fn should_pin(
    full_delete: &HashSet<PathId>,
    version_delete: &HashMap<PathId, HashSet<Version>>,
    id: &PathId,
    version: Option<Version>,
) -> bool {
    if full_delete.contains(id) {
        return true;
    }
    match version {
        Some(v) => version_delete.get(id).is_some_and(|versions| versions.contains(&v)),
        None => false,
    }
}

/// Coordinator-side bookkeeping for one compact cycle: the [`DeletionPlan`]
/// being executed, plus the writer handles pinned against it so far and
/// whether another `RunGC` has arrived in the meantime.
#[derive(Debug, Default)]
pub struct BlockedWrites {
    /// The deletion set this compact cycle is executing.
    pub plan: std::sync::Arc<DeletionPlan>,
    /// Completion handles held for writers pinned during this compact.
    /// Resolved to `Ok` (by sending `()`) once compact finishes, regardless
    /// of whether compact itself succeeded.
    pub pinned: Vec<oneshot::Sender<()>>,
    /// Whether another `RunGC` arrived while this compact was in flight.
    pub gc_requested: bool,
}

impl BlockedWrites {
    /// Builds the coordinator-side bookkeeping for a freshly computed plan.
    pub fn new(plan: DeletionPlan) -> Self {
        Self {
            plan: std::sync::Arc::new(plan),
            pinned: Vec::new(),
            gc_requested: false,
        }
    }
}

fn diff_ids(
    full_delete: HashSet<PathId>,
    stored_full: &HashSet<PathId>,
    stored_versions: &HashMap<PathId, HashSet<Version>>,
) -> HashSet<PathId> {
    full_delete
        .into_iter()
        .filter(|id| !stored_full.contains(id) && !stored_versions.contains_key(id))
        .collect()
}

fn diff_version_map(
    delete: HashMap<PathId, HashSet<Version>>,
    stored: &HashMap<PathId, HashSet<Version>>,
) -> HashMap<PathId, HashSet<Version>> {
    delete
        .into_iter()
        .map(|(id, versions)| {
            let remaining = match stored.get(&id) {
                Some(stored_versions) => versions.difference(stored_versions).copied().collect(),
                None => versions,
            };
            (id, remaining)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> PathId {
        PathId::new(s)
    }

    #[test]
    fn write_during_scan_excludes_from_effective_delete() {
        let mut scan = ScanResult::default();
        scan.app_versions_delete
            .insert(id("a"), HashSet::from([Version(1), Version(2)]));

        let mut tracked = TrackedWrites::default();
        tracked.record_app(id("a"), Some(Version(1)));

        let plan = DeletionPlan::from_scan(scan, &tracked);
        assert_eq!(
            plan.app_versions_delete.get(&id("a")),
            Some(&HashSet::from([Version(2)]))
        );
    }

    #[test]
    fn full_store_during_scan_excludes_app_from_full_delete() {
        let mut scan = ScanResult::default();
        scan.apps_full_delete.insert(id("a"));

        let mut tracked = TrackedWrites::default();
        tracked.record_app(id("a"), None);

        let plan = DeletionPlan::from_scan(scan, &tracked);
        assert!(!plan.apps_delete.contains(&id("a")));
    }

    #[test]
    fn pin_or_release_for_versioned_app_write() {
        let mut plan = DeletionPlan::default();
        plan.app_versions_delete.insert(id("b"), HashSet::from([Version(7)]));

        assert!(plan.should_pin_app(&id("b"), Some(Version(7))));
        assert!(!plan.should_pin_app(&id("b"), Some(Version(8))));
    }

    #[test]
    fn pin_or_release_for_full_app_write() {
        let mut plan = DeletionPlan::default();
        plan.apps_delete.insert(id("b"));
        assert!(plan.should_pin_app(&id("b"), None));
    }

    #[test]
    fn root_pinning_ignores_pods() {
        let mut plan = DeletionPlan::default();
        plan.pods_delete.insert(id("p"));

        let root = RootSnapshot::new(Version(1)).with_pod(id("p"), Version(1));
        assert!(
            !plan.should_pin_root(&root),
            "pods are deliberately not consulted when pinning a stored root"
        );
    }

    #[test]
    fn root_pinning_over_pins_on_app_version_key_match() {
        let mut plan = DeletionPlan::default();
        plan.app_versions_delete.insert(id("a"), HashSet::from([Version(99)]));

        let root = RootSnapshot::new(Version(1)).with_app(id("a"), Version(1));
        assert!(plan.should_pin_root(&root), "coarse id-only match over-pins");
    }

    #[test]
    fn blocked_writes_wraps_plan_with_fresh_bookkeeping() {
        let plan = DeletionPlan {
            apps_delete: HashSet::from([id("a")]),
            ..Default::default()
        };
        let blocked = BlockedWrites::new(plan);
        assert!(blocked.plan.apps_delete.contains(&id("a")));
        assert!(blocked.pinned.is_empty());
        assert!(!blocked.gc_requested);
    }
}
