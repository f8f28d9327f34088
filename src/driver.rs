use crate::resources::{ResourceQuantity, Resources};

/// One grant of spare node capacity, valid for a single scheduling round
/// unless kept in stock.
#[derive(Debug, Clone, PartialEq)]
pub struct Offer {
    pub id: String,
    pub node_id: String,
    pub hostname: String,
    pub resources: Resources,
}

impl Offer {
    pub fn new(
        id: impl Into<String>,
        node_id: impl Into<String>,
        hostname: impl Into<String>,
        resources: Resources,
    ) -> Self {
        Self {
            id: id.into(),
            node_id: node_id.into(),
            hostname: hostname.into(),
            resources,
        }
    }
}

/// Task status space of the resource manager's protocol.
///
/// The numbering is the protocol's own and must not change: the exit code of
/// a terminal status is defined as its numeric offset from `Finished`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum TaskState {
    Starting = 0,
    Running = 1,
    Finished = 2,
    Failed = 3,
    Killed = 4,
    Lost = 5,
    Staging = 6,
    Error = 7,
    Killing = 8,
    Dropped = 9,
    Unreachable = 10,
    Gone = 11,
    GoneByOperator = 12,
    Unknown = 13,
}

impl TaskState {
    /// Exit code carried by a terminal status: the offset from `Finished`,
    /// so a clean finish reports 0.
    pub fn exit_code(self) -> i32 {
        self as i32 - TaskState::Finished as i32
    }
}

/// A status event delivered by the resource manager for one task.
#[derive(Debug, Clone)]
pub struct TaskStatus {
    pub task_id: String,
    pub state: TaskState,
    pub message: Option<String>,
    pub reason: Option<String>,
    pub node_id: Option<String>,
    pub executor_id: Option<String>,
    pub container_id: Option<String>,
}

impl TaskStatus {
    pub fn new(task_id: impl Into<String>, state: TaskState) -> Self {
        Self {
            task_id: task_id.into(),
            state,
            message: None,
            reason: None,
            node_id: None,
            executor_id: None,
            container_id: None,
        }
    }

    pub fn on_node(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Identity and version of the resource manager master we registered with.
#[derive(Debug, Clone)]
pub struct MasterInfo {
    pub hostname: String,
    pub port: u16,
    pub version: String,
}

impl MasterInfo {
    pub fn address(&self) -> String {
        format!("{}:{}", self.hostname, self.port)
    }
}

/// Decline filter: how long the resource manager should wait before
/// re-offering a declined offer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Filters {
    pub refuse_seconds: f64,
}

impl Filters {
    pub fn new(refuse_seconds: f64) -> Self {
        Self { refuse_seconds }
    }
}

/// One launchable task, paired to a job and carved out of a specific offer.
#[derive(Debug, Clone)]
pub struct TaskSpec {
    pub task_id: String,
    pub job_id: uuid::Uuid,
    pub name: String,
    pub command: String,
    pub resources: ResourceQuantity,
    /// Concrete ports assigned out of the offer's ranges
    pub ports: Vec<u16>,
    pub node_id: String,
    pub run_as: Option<String>,
}

/// Actions this scheduler takes against the resource manager.
///
/// Calls are fire-and-forget from the core's perspective; the implementation
/// owns delivery and logs its own failures.
pub trait ResourceDriver: Send + Sync {
    fn decline_offer(&self, offer_id: &str, filters: Option<Filters>);

    /// Accept the given offers, launching the given tasks against them.
    fn launch(&self, offer_ids: &[String], tasks: &[TaskSpec], filters: Filters);

    /// Ask the resource manager to reconcile the true state of these tasks.
    /// Answers arrive later as ordinary status updates.
    fn reconcile_tasks(&self, statuses: &[TaskStatus]);

    /// Abort the driver: the registration attempt cannot proceed.
    fn abort(&self);

    /// Stop the driver: the scheduler must not keep running.
    fn stop(&self);
}
