//! Reconciliation after (re)registration with the resource manager.
//!
//! The scheduler and the resource manager can disagree about which tasks are
//! actually running after a disconnect. Nothing is mutated locally here: the
//! coordinator only asks the resource manager to re-report task state, and
//! the answers flow back through the ordinary status-update path.

use crate::config::SchedulerConfig;
use crate::driver::{ResourceDriver, TaskState, TaskStatus};
use crate::error::{Result, SchedulerError};
use crate::scheduler::queue::JobRepository;

/// Outcome of the framework-identity check at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityCheck {
    /// Same identity as before: a resume after transient disconnect
    Resumed,
    /// First registration; the new identity was persisted
    Fresh,
}

/// Reject a resource manager whose version this scheduler does not support.
pub fn validate_version(config: &SchedulerConfig, version: &str) -> Result<()> {
    if config.supports_version(version) {
        Ok(())
    } else {
        tracing::error!(
            version,
            supported = ?config.supported_versions,
            "Unsupported resource manager version"
        );
        Err(SchedulerError::UnsupportedVersion(version.to_string()))
    }
}

/// Compare the newly assigned framework identity with the persisted one.
///
/// A different identity while a prior one is on record is fatal: the
/// resource manager considers this a brand-new framework and none of our
/// recorded tasks belong to it.
pub fn check_identity(repo: &dyn JobRepository, framework_id: &str) -> Result<IdentityCheck> {
    match repo.get_framework_id() {
        Some(stored) if stored == framework_id => Ok(IdentityCheck::Resumed),
        Some(stored) => Err(SchedulerError::FrameworkIdMismatch {
            stored,
            offered: framework_id.to_string(),
        }),
        None => {
            if !repo.set_framework_id(framework_id) {
                tracing::warn!(framework_id, "Failed to persist framework identity");
            }
            Ok(IdentityCheck::Fresh)
        }
    }
}

/// Ask the resource manager to reconcile every job we believe is running.
///
/// One synthesized status per Starting/Started job, batched into a single
/// request. The state is a neutral "assume running"; the resource manager
/// does not examine it.
pub fn reconcile_running_jobs(repo: &dyn JobRepository, driver: &dyn ResourceDriver) {
    let jobs = repo.get_running();
    let statuses: Vec<TaskStatus> = jobs
        .iter()
        .filter_map(|job| {
            let Some(task_id) = &job.task_id else {
                tracing::warn!(job_id = %job.id, state = %job.state, "Running job has no task id, skipping reconciliation");
                return None;
            };
            let mut status = TaskStatus::new(task_id.clone(), TaskState::Running);
            status.node_id = job.node_id.clone();
            Some(status)
        })
        .collect();

    if statuses.is_empty() {
        return;
    }
    tracing::info!(count = statuses.len(), "Requesting task reconciliation");
    driver.reconcile_tasks(&statuses);
}
