use std::sync::Arc;

use tracing::warn;

use crate::scan::Repositories;
use crate::tracked::DeletionPlan;

/// Runs one compact cycle, deleting everything named by `plan` against
/// `repos` in the fixed stage order (full-app, app-version, full-pod,
/// pod-version, root-version), one record at a time per stage.
///
/// The ordering is not a correctness requirement — the repositories are not
/// transactional across records — only a policy so that, if something fails
/// partway, the cheaper-to-replay stages have already run. Every repository
/// error is logged and swallowed; a partial compact just leaves more for the
/// next cycle to clean up.
pub async fn run_compact(repos: &Repositories, plan: &Arc<DeletionPlan>) {
    for id in &plan.apps_delete {
        if let Err(e) = repos.apps.delete(id).await {
            warn!(error = %e, app = %id, "compact: failed to delete app");
        }
    }

    for (id, versions) in &plan.app_versions_delete {
        for &version in versions {
            if let Err(e) = repos.apps.delete_version(id, version).await {
                warn!(error = %e, app = %id, version = version.0, "compact: failed to delete app version");
            }
        }
    }

    for id in &plan.pods_delete {
        if let Err(e) = repos.pods.delete(id).await {
            warn!(error = %e, pod = %id, "compact: failed to delete pod");
        }
    }

    for (id, versions) in &plan.pod_versions_delete {
        for &version in versions {
            if let Err(e) = repos.pods.delete_version(id, version).await {
                warn!(error = %e, pod = %id, version = version.0, "compact: failed to delete pod version");
            }
        }
    }

    for &version in &plan.roots_delete {
        if let Err(e) = repos.roots.delete_root_version(version).await {
            warn!(error = %e, version = version.0, "compact: failed to delete root version");
        }
    }
}
