//! Task lifecycle transition table.
//!
//! Maps (current job state, incoming task status) to the action the
//! scheduler takes. Pure and exhaustively enumerated so it can be tested
//! without any I/O.

use crate::driver::TaskState;
use crate::scheduler::job::JobState;

/// What the scheduler does with a status event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Record the task as being staged; job moves to Starting
    Starting,
    /// Task confirmed running; job moves to Started, node recorded
    Started,
    /// Terminal success; exit code and finish timestamp recorded
    Finished,
    /// Terminal failure, not eligible for retry
    Failed,
    /// Transient loss; job returns to Queued and may reschedule immediately
    Retry,
    /// User-initiated termination
    Killed,
    /// Duplicate or irrelevant status; no mutation
    Noop,
    /// Unexpected but harmless combination; warn and ignore
    Log,
    /// Combination the state diagram declares impossible; fatal
    Never,
}

/// Collapse the protocol's status space into the categories the table keys on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatusClass {
    Staging,
    Running,
    Killing,
    Finished,
    Failed,
    Killed,
    Lost,
}

fn classify(status: TaskState) -> StatusClass {
    match status {
        TaskState::Staging | TaskState::Starting => StatusClass::Staging,
        TaskState::Running => StatusClass::Running,
        TaskState::Killing => StatusClass::Killing,
        TaskState::Finished => StatusClass::Finished,
        TaskState::Failed | TaskState::Error => StatusClass::Failed,
        TaskState::Killed => StatusClass::Killed,
        TaskState::Lost
        | TaskState::Dropped
        | TaskState::Unreachable
        | TaskState::Gone
        | TaskState::GoneByOperator
        | TaskState::Unknown => StatusClass::Lost,
    }
}

/// The transition table. Repeated delivery of the same status to a job the
/// table already advanced yields `Noop`, never a second advance.
pub fn handle_call(state: JobState, status: TaskState) -> Action {
    use StatusClass as S;

    match (state, classify(status)) {
        // Queued: a status here usually means the repository write raced a
        // retry, or a duplicate of an event already applied.
        (JobState::Queued, S::Staging) => Action::Starting,
        (JobState::Queued, S::Running) => Action::Started,
        (JobState::Queued, S::Killing) => Action::Log,
        (JobState::Queued, S::Finished) => Action::Log,
        (JobState::Queued, S::Failed) => Action::Log,
        (JobState::Queued, S::Killed) => Action::Killed,
        // already requeued by an earlier loss event
        (JobState::Queued, S::Lost) => Action::Noop,

        (JobState::Starting, S::Staging) => Action::Noop,
        (JobState::Starting, S::Running) => Action::Started,
        (JobState::Starting, S::Killing) => Action::Noop,
        (JobState::Starting, S::Finished) => Action::Finished,
        (JobState::Starting, S::Failed) => Action::Failed,
        (JobState::Starting, S::Killed) => Action::Killed,
        (JobState::Starting, S::Lost) => Action::Retry,

        // A staging report for a started task walks backwards.
        (JobState::Started, S::Staging) => Action::Log,
        (JobState::Started, S::Running) => Action::Noop,
        (JobState::Started, S::Killing) => Action::Noop,
        (JobState::Started, S::Finished) => Action::Finished,
        (JobState::Started, S::Failed) => Action::Failed,
        (JobState::Started, S::Killed) => Action::Killed,
        (JobState::Started, S::Lost) => Action::Retry,

        // Terminal states: same-category re-delivery is idempotent, a late
        // Running is a stale reconciliation answer, and a staging report for
        // a terminal job means the table and the real status space diverged.
        (JobState::Finished, S::Staging) => Action::Never,
        (JobState::Finished, S::Running) => Action::Log,
        (JobState::Finished, S::Killing) => Action::Noop,
        (JobState::Finished, S::Finished) => Action::Noop,
        (JobState::Finished, S::Failed) => Action::Log,
        (JobState::Finished, S::Killed) => Action::Log,
        (JobState::Finished, S::Lost) => Action::Noop,

        (JobState::Failed, S::Staging) => Action::Never,
        (JobState::Failed, S::Running) => Action::Log,
        (JobState::Failed, S::Killing) => Action::Noop,
        (JobState::Failed, S::Finished) => Action::Log,
        (JobState::Failed, S::Failed) => Action::Noop,
        (JobState::Failed, S::Killed) => Action::Log,
        (JobState::Failed, S::Lost) => Action::Noop,

        (JobState::Killed, S::Staging) => Action::Never,
        (JobState::Killed, S::Running) => Action::Log,
        (JobState::Killed, S::Killing) => Action::Noop,
        (JobState::Killed, S::Finished) => Action::Log,
        (JobState::Killed, S::Failed) => Action::Log,
        (JobState::Killed, S::Killed) => Action::Noop,
        (JobState::Killed, S::Lost) => Action::Noop,
    }
}

/// The job state an action advances to, if it advances one at all.
pub fn next_state(action: Action) -> Option<JobState> {
    match action {
        Action::Starting => Some(JobState::Starting),
        Action::Started => Some(JobState::Started),
        Action::Finished => Some(JobState::Finished),
        Action::Failed => Some(JobState::Failed),
        Action::Retry => Some(JobState::Queued),
        Action::Killed => Some(JobState::Killed),
        Action::Noop | Action::Log | Action::Never => None,
    }
}
