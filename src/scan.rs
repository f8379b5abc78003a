use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;

use futures::StreamExt;
use tracing::warn;

use crate::model::{PathId, RootSnapshot, ScanResult, Version};
use crate::repository::{AppRepository, DeploymentRepository, GroupRepository, PodRepository};

/// Handles to the four repositories the scan engine reads from.
#[derive(Clone)]
pub struct Repositories {
    /// App repository port.
    pub apps: std::sync::Arc<dyn AppRepository>,
    /// Pod repository port.
    pub pods: std::sync::Arc<dyn PodRepository>,
    /// Root (group) repository port.
    pub roots: std::sync::Arc<dyn GroupRepository>,
    /// Deployment-plan repository port.
    pub plans: std::sync::Arc<dyn DeploymentRepository>,
}

/// Running totals of which `(id, version)` pairs are referenced by some
/// in-use root, accumulated across hydration batches.
#[derive(Default)]
struct UsageTotals {
    apps_in_use: HashMap<PathId, HashSet<Version>>,
    pods_in_use: HashMap<PathId, HashSet<Version>>,
}

impl UsageTotals {
    fn absorb(&mut self, root: &RootSnapshot) {
        merge_into(&mut self.apps_in_use, &root.transitive_apps);
        merge_into(&mut self.pods_in_use, &root.transitive_pods);
    }
}

fn merge_into(into: &mut HashMap<PathId, HashSet<Version>>, from: &HashMap<PathId, HashSet<Version>>) {
    for (id, versions) in from {
        into.entry(id.clone()).or_default().extend(versions.iter().copied());
    }
}

/// Runs one scan cycle and returns its candidate deletion set.
///
/// Never fails outward: any repository error along the way is logged and
/// the affected piece of work is treated as contributing nothing, per the
/// error handling design (a bad scan just means less gets cleaned up this
/// cycle, not that the cycle crashes).
pub async fn run_scan(
    repos: &Repositories,
    max_versions: NonZeroUsize,
    scan_batch_size: NonZeroUsize,
) -> ScanResult {
    let max_versions = max_versions.get();

    let mut root_versions: Vec<Version> = match collect_stream(repos.roots.root_versions()).await {
        Ok(v) => v,
        Err(()) => return ScanResult::default(),
    };
    root_versions.sort_unstable();

    if root_versions.len() <= max_versions {
        return ScanResult::default();
    }

    let current_root = match repos.roots.root().await {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, "scan: failed to read current root");
            return ScanResult::default();
        }
    };
    let plan_refs = match collect_stream(repos.plans.lazy_all()).await {
        Ok(v) => v,
        Err(()) => Vec::new(),
    };

    let mut pinned_roots: HashSet<Version> = HashSet::from([current_root.version]);
    let mut plan_root_versions: Vec<Version> = Vec::new();
    for plan_ref in &plan_refs {
        pinned_roots.insert(plan_ref.original_version);
        pinned_roots.insert(plan_ref.target_version);
        plan_root_versions.push(plan_ref.original_version);
        plan_root_versions.push(plan_ref.target_version);
    }
    plan_root_versions.sort_unstable();
    plan_root_versions.dedup();

    let candidates: Vec<Version> = root_versions
        .iter()
        .copied()
        .filter(|v| !pinned_roots.contains(v))
        .collect();

    if candidates.is_empty() {
        return ScanResult::default();
    }

    let excess = root_versions.len() - max_versions;
    let roots_delete: HashSet<Version> = candidates.into_iter().take(excess).collect();

    let mut totals = UsageTotals::default();
    totals.absorb(&current_root);

    for batch in plan_root_versions.chunks(scan_batch_size.get()) {
        for &version in batch {
            match repos.roots.lazy_root_version(version).await {
                Ok(Some(root)) => totals.absorb(&root),
                Ok(None) => {}
                Err(e) => {
                    warn!(error = %e, version = version.0, "scan: failed to hydrate pinning root");
                }
            }
        }
    }

    let all_app_ids: HashSet<PathId> = match collect_stream(repos.apps.ids()).await {
        Ok(v) => v.into_iter().collect(),
        Err(()) => HashSet::new(),
    };
    let all_pod_ids: HashSet<PathId> = match collect_stream(repos.pods.ids()).await {
        Ok(v) => v.into_iter().collect(),
        Err(()) => HashSet::new(),
    };

    let (apps_full_delete, app_versions_delete) = compute_family_delete(
        &all_app_ids,
        &totals.apps_in_use,
        max_versions,
        |id| repos.apps.versions(id),
    )
    .await;
    let (pods_full_delete, pod_versions_delete) = compute_family_delete(
        &all_pod_ids,
        &totals.pods_in_use,
        max_versions,
        |id| repos.pods.versions(id),
    )
    .await;

    ScanResult {
        apps_full_delete,
        app_versions_delete,
        pods_full_delete,
        pod_versions_delete,
        roots_delete,
    }
}

async fn compute_family_delete<F>(
    all_ids: &HashSet<PathId>,
    in_use: &HashMap<PathId, HashSet<Version>>,
    max_versions: usize,
    versions_of: F,
) -> (HashSet<PathId>, HashMap<PathId, HashSet<Version>>)
where
    F: Fn(&PathId) -> crate::repository::LazySeq<Version>,
{
    let full_delete: HashSet<PathId> = all_ids.difference(&HashSet::from_iter(in_use.keys().cloned())).cloned().collect();

    let mut versions_delete = HashMap::new();
    for (id, used) in in_use {
        let mut versions: Vec<Version> = match collect_stream(versions_of(id)).await {
            Ok(v) => v,
            Err(()) => {
                warn!(id = %id, "scan: failed to read version set for over-cap check");
                continue;
            }
        };
        if versions.len() <= max_versions {
            continue;
        }
        versions.sort_unstable();
        let excess = versions.len() - max_versions;
        let candidates: Vec<Version> = versions.into_iter().filter(|v| !used.contains(v)).collect();
        let to_delete: HashSet<Version> = candidates.into_iter().take(excess).collect();
        if !to_delete.is_empty() {
            versions_delete.insert(id.clone(), to_delete);
        }
    }

    (full_delete, versions_delete)
}

async fn collect_stream<T>(mut stream: crate::repository::LazySeq<T>) -> Result<Vec<T>, ()> {
    let mut out = Vec::new();
    while let Some(item) = stream.next().await {
        match item {
            Ok(v) => out.push(v),
            Err(e) => {
                warn!(error = %e, "scan: repository stream returned an error");
                return Err(());
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::InMemoryRepositories;

    fn repos(kit: &InMemoryRepositories) -> Repositories {
        kit.ports()
    }

    #[tokio::test]
    async fn below_cap_yields_empty_scan() {
        let kit = InMemoryRepositories::new();
        kit.put_root(RootSnapshot::new(Version(1)));
        kit.put_root(RootSnapshot::new(Version(2)));
        kit.set_current_root(Version(2));

        let result = run_scan(&repos(&kit), NonZeroUsize::new(10).unwrap(), NonZeroUsize::new(32).unwrap()).await;
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn oldest_roots_pruned_first() {
        let kit = InMemoryRepositories::new();
        for t in 1..=5 {
            kit.put_root(RootSnapshot::new(Version(t)));
        }
        kit.set_current_root(Version(5));

        let result = run_scan(&repos(&kit), NonZeroUsize::new(2).unwrap(), NonZeroUsize::new(32).unwrap()).await;
        assert_eq!(result.roots_delete, HashSet::from([Version(1), Version(2), Version(3)]));
    }

    #[tokio::test]
    async fn plan_pinned_root_survives() {
        let kit = InMemoryRepositories::new();
        for t in 1..=3 {
            kit.put_root(RootSnapshot::new(Version(t)));
        }
        kit.set_current_root(Version(3));
        kit.put_plan(crate::model::Plan {
            original: RootSnapshot::new(Version(1)),
            target: RootSnapshot::new(Version(1)),
        });

        let result = run_scan(&repos(&kit), NonZeroUsize::new(1).unwrap(), NonZeroUsize::new(32).unwrap()).await;
        assert_eq!(result.roots_delete, HashSet::from([Version(2)]));
    }

    #[tokio::test]
    async fn app_in_use_by_any_pinning_root_is_never_fully_deleted() {
        let kit = InMemoryRepositories::new();
        let used_app = PathId::new("a");
        kit.put_app_version(used_app.clone(), Version(1));

        let mut current = RootSnapshot::new(Version(10));
        current = current.with_app(used_app.clone(), Version(1));
        kit.put_root(RootSnapshot::new(Version(1)));
        for t in 2..=10 {
            kit.put_root(RootSnapshot::new(Version(t)));
        }
        kit.set_current_root_snapshot(current);

        let result = run_scan(&repos(&kit), NonZeroUsize::new(1).unwrap(), NonZeroUsize::new(2).unwrap()).await;
        assert!(!result.apps_full_delete.contains(&used_app));
    }
}
