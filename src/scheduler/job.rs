use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::resources::ResourceQuantity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Queued,
    Starting,
    Started,
    Finished,
    Failed,
    Killed,
}

impl JobState {
    /// Terminal states are never mutated again by this core.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Finished | JobState::Failed | JobState::Killed)
    }

    pub fn is_running(self) -> bool {
        matches!(self, JobState::Starting | JobState::Started)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Queued => write!(f, "queued"),
            JobState::Starting => write!(f, "starting"),
            JobState::Started => write!(f, "started"),
            JobState::Finished => write!(f, "finished"),
            JobState::Failed => write!(f, "failed"),
            JobState::Killed => write!(f, "killed"),
        }
    }
}

/// The application a job launches under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    pub id: String,
    pub owner: String,
    pub container_image: Option<String>,
}

impl Application {
    pub fn new(id: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            owner: owner.into(),
            container_image: None,
        }
    }
}

/// One submitted job.
///
/// Created `Queued` by the submission path; from then on mutated only by the
/// scheduler core as status events advance it, and destroyed only by the
/// external repository or its garbage collector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub app_id: String,
    pub name: String,
    pub command: String,
    pub resources: ResourceQuantity,
    /// Higher priority schedules first
    pub priority: i32,
    pub state: JobState,
    /// Present once launched
    pub task_id: Option<String>,
    /// Present once started on a node
    pub node_id: Option<String>,
    /// Exit code, present once terminal
    pub result: Option<i32>,
    pub reason: Option<String>,
    /// Sandbox/output location when resolvable
    pub url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(
        app_id: impl Into<String>,
        command: impl Into<String>,
        resources: ResourceQuantity,
    ) -> Self {
        let command = command.into();
        Self {
            id: Uuid::new_v4(),
            app_id: app_id.into(),
            name: command.clone(),
            command,
            resources,
            priority: 0,
            state: JobState::Queued,
            task_id: None,
            node_id: None,
            result: None,
            reason: None,
            url: None,
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_job_is_queued() {
        let job = Job::new("app", "echo hello", ResourceQuantity::new(1, 128));
        assert_eq!(job.state, JobState::Queued);
        assert!(job.task_id.is_none());
        assert!(job.node_id.is_none());
        assert!(job.finished_at.is_none());
    }

    #[test]
    fn terminal_states() {
        assert!(JobState::Finished.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(JobState::Killed.is_terminal());
        assert!(!JobState::Queued.is_terminal());
        assert!(!JobState::Starting.is_terminal());
        assert!(!JobState::Started.is_terminal());
    }

    #[test]
    fn running_states() {
        assert!(JobState::Starting.is_running());
        assert!(JobState::Started.is_running());
        assert!(!JobState::Queued.is_running());
        assert!(!JobState::Finished.is_running());
    }
}
