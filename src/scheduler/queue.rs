use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{Result, SchedulerError};
use crate::resources::ResourceQuantity;
use crate::scheduler::job::{Application, Job, JobState};

/// Ordering a planning strategy imposes on the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOrdering {
    /// Oldest submission first
    Fifo,
    /// Highest priority first, ties broken by submission time
    Priority,
}

impl JobOrdering {
    fn sort(self, jobs: &mut Vec<Job>) {
        match self {
            JobOrdering::Fifo => jobs.sort_by_key(|j| j.created_at),
            JobOrdering::Priority => {
                jobs.sort_by_key(|j| (std::cmp::Reverse(j.priority), j.created_at));
            }
        }
    }
}

/// System of record for jobs and the framework identity.
///
/// One state transition is one atomic write; the scheduler never holds the
/// repository locked across a full round. Transition calls against a task id
/// the repository no longer recognizes return `JobNotFound`; callers log and
/// move on without resurrecting anything.
pub trait JobRepository: Send + Sync {
    /// Queued jobs, in order, while their cumulative demand fits `budget`.
    fn find_fit(&self, ordering: JobOrdering, budget: &ResourceQuantity) -> Vec<Job>;

    /// Up to `limit` queued jobs, in order, regardless of fit.
    fn find_all(&self, ordering: JobOrdering, limit: usize) -> Vec<Job>;

    /// The first `limit` queued jobs in submission order.
    fn queued(&self, limit: usize) -> Vec<Job>;

    fn count_running(&self) -> usize;

    /// Jobs believed to be starting or started, for reconciliation.
    fn get_running(&self) -> Vec<Job>;

    fn get_from_task_id(&self, task_id: &str) -> Option<Job>;

    fn get_application(&self, app_id: &str) -> Option<Application>;

    /// Move every given job to `Killed` before it ever launched.
    fn cancel_all(&self, jobs: &[Job], reason: &str);

    fn starting(&self, job_id: Uuid, url: Option<String>, task_id: &str) -> Result<()>;

    fn started(&self, task_id: &str, node_id: &str, url: Option<String>) -> Result<()>;

    fn finished(
        &self,
        task_id: &str,
        url: Option<String>,
        exit_code: i32,
        finished_at: DateTime<Utc>,
    ) -> Result<()>;

    fn failed(&self, task_id: &str, url: Option<String>, reason: Option<String>) -> Result<()>;

    fn killed(&self, task_id: &str, url: Option<String>, reason: Option<String>) -> Result<()>;

    /// Return a launched job to the queue. The task-id association is kept
    /// so late duplicate events for the old task still resolve to the job.
    fn retry(&self, task_id: &str, reason: Option<String>) -> Result<()>;

    fn get_framework_id(&self) -> Option<String>;

    /// Persist the framework identity. False if it could not be stored.
    fn set_framework_id(&self, id: &str) -> bool;
}

#[derive(Default)]
struct Inner {
    jobs: HashMap<Uuid, Job>,
    task_index: HashMap<String, Uuid>,
    apps: HashMap<String, Application>,
    framework_id: Option<String>,
}

impl Inner {
    fn queued_sorted(&self, ordering: JobOrdering) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .jobs
            .values()
            .filter(|j| j.state == JobState::Queued)
            .cloned()
            .collect();
        ordering.sort(&mut jobs);
        jobs
    }

    fn job_by_task(&mut self, task_id: &str) -> Result<&mut Job> {
        let job_id = self
            .task_index
            .get(task_id)
            .copied()
            .ok_or_else(|| SchedulerError::JobNotFound(task_id.to_string()))?;
        self.jobs
            .get_mut(&job_id)
            .ok_or_else(|| SchedulerError::JobNotFound(task_id.to_string()))
    }
}

/// Map-backed repository used by tests and single-process deployments.
#[derive(Default)]
pub struct InMemoryJobRepository {
    inner: Mutex<Inner>,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Submission path: enqueue a new job.
    pub fn submit(&self, job: Job) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(task_id) = &job.task_id {
            inner.task_index.insert(task_id.clone(), job.id);
        }
        inner.jobs.insert(job.id, job);
    }

    pub fn register_application(&self, app: Application) {
        let mut inner = self.inner.lock().unwrap();
        inner.apps.insert(app.id.clone(), app);
    }

    pub fn get(&self, job_id: Uuid) -> Option<Job> {
        self.inner.lock().unwrap().jobs.get(&job_id).cloned()
    }

    pub fn all_jobs(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.inner.lock().unwrap().jobs.values().cloned().collect();
        jobs.sort_by_key(|j| j.created_at);
        jobs
    }
}

impl JobRepository for InMemoryJobRepository {
    fn find_fit(&self, ordering: JobOrdering, budget: &ResourceQuantity) -> Vec<Job> {
        let inner = self.inner.lock().unwrap();
        let mut total = ResourceQuantity::default();
        let mut fit = Vec::new();
        for job in inner.queued_sorted(ordering) {
            let next = total + job.resources;
            if !budget.fits(&next) {
                break;
            }
            total = next;
            fit.push(job);
        }
        fit
    }

    fn find_all(&self, ordering: JobOrdering, limit: usize) -> Vec<Job> {
        let inner = self.inner.lock().unwrap();
        let mut jobs = inner.queued_sorted(ordering);
        jobs.truncate(limit);
        jobs
    }

    fn queued(&self, limit: usize) -> Vec<Job> {
        let inner = self.inner.lock().unwrap();
        let mut jobs = inner.queued_sorted(JobOrdering::Fifo);
        jobs.truncate(limit);
        jobs
    }

    fn count_running(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.jobs.values().filter(|j| j.state.is_running()).count()
    }

    fn get_running(&self) -> Vec<Job> {
        let inner = self.inner.lock().unwrap();
        let mut jobs: Vec<Job> = inner
            .jobs
            .values()
            .filter(|j| j.state.is_running())
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.created_at);
        jobs
    }

    fn get_from_task_id(&self, task_id: &str) -> Option<Job> {
        let inner = self.inner.lock().unwrap();
        let job_id = inner.task_index.get(task_id)?;
        inner.jobs.get(job_id).cloned()
    }

    fn get_application(&self, app_id: &str) -> Option<Application> {
        self.inner.lock().unwrap().apps.get(app_id).cloned()
    }

    fn cancel_all(&self, jobs: &[Job], reason: &str) {
        let mut inner = self.inner.lock().unwrap();
        for job in jobs {
            if let Some(stored) = inner.jobs.get_mut(&job.id) {
                if stored.state.is_terminal() {
                    continue;
                }
                stored.state = JobState::Killed;
                stored.reason = Some(reason.to_string());
                stored.finished_at = Some(Utc::now());
            }
        }
    }

    fn starting(&self, job_id: Uuid, url: Option<String>, task_id: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.task_index.insert(task_id.to_string(), job_id);
        let job = inner
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| SchedulerError::JobNotFound(task_id.to_string()))?;
        job.state = JobState::Starting;
        job.task_id = Some(task_id.to_string());
        if url.is_some() {
            job.url = url;
        }
        Ok(())
    }

    fn started(&self, task_id: &str, node_id: &str, url: Option<String>) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let job = inner.job_by_task(task_id)?;
        job.state = JobState::Started;
        job.node_id = Some(node_id.to_string());
        if url.is_some() {
            job.url = url;
        }
        Ok(())
    }

    fn finished(
        &self,
        task_id: &str,
        url: Option<String>,
        exit_code: i32,
        finished_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let job = inner.job_by_task(task_id)?;
        job.state = JobState::Finished;
        job.result = Some(exit_code);
        job.finished_at = Some(finished_at);
        if url.is_some() {
            job.url = url;
        }
        Ok(())
    }

    fn failed(&self, task_id: &str, url: Option<String>, reason: Option<String>) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let job = inner.job_by_task(task_id)?;
        job.state = JobState::Failed;
        job.reason = reason;
        job.finished_at = Some(Utc::now());
        if url.is_some() {
            job.url = url;
        }
        Ok(())
    }

    fn killed(&self, task_id: &str, url: Option<String>, reason: Option<String>) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let job = inner.job_by_task(task_id)?;
        job.state = JobState::Killed;
        job.reason = reason;
        job.finished_at = Some(Utc::now());
        if url.is_some() {
            job.url = url;
        }
        Ok(())
    }

    fn retry(&self, task_id: &str, reason: Option<String>) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let job = inner.job_by_task(task_id)?;
        job.state = JobState::Queued;
        job.node_id = None;
        job.reason = reason;
        Ok(())
    }

    fn get_framework_id(&self) -> Option<String> {
        self.inner.lock().unwrap().framework_id.clone()
    }

    fn set_framework_id(&self, id: &str) -> bool {
        let mut inner = self.inner.lock().unwrap();
        inner.framework_id = Some(id.to_string());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(cpus: u32, mem: u64) -> Job {
        Job::new("app", "true", ResourceQuantity::new(cpus, mem))
    }

    #[test]
    fn find_fit_stops_at_the_budget() {
        let repo = InMemoryJobRepository::new();
        for _ in 0..4 {
            repo.submit(job(1, 128));
        }
        let budget = ResourceQuantity::new(2, 1024);
        let fit = repo.find_fit(JobOrdering::Fifo, &budget);
        assert_eq!(fit.len(), 2);
    }

    #[test]
    fn find_all_ignores_fit_but_honors_limit() {
        let repo = InMemoryJobRepository::new();
        for _ in 0..5 {
            repo.submit(job(100, 1 << 20));
        }
        assert_eq!(repo.find_all(JobOrdering::Fifo, 3).len(), 3);
    }

    #[test]
    fn priority_ordering_puts_urgent_jobs_first() {
        let repo = InMemoryJobRepository::new();
        let low = job(1, 128).with_priority(0);
        let high = job(1, 128).with_priority(10);
        let low_id = low.id;
        let high_id = high.id;
        repo.submit(low);
        repo.submit(high);
        let jobs = repo.find_all(JobOrdering::Priority, 10);
        assert_eq!(jobs[0].id, high_id);
        assert_eq!(jobs[1].id, low_id);
    }

    #[test]
    fn transitions_walk_the_lifecycle() {
        let repo = InMemoryJobRepository::new();
        let j = job(1, 128);
        let id = j.id;
        repo.submit(j);

        repo.starting(id, None, "task-1").unwrap();
        assert_eq!(repo.get(id).unwrap().state, JobState::Starting);
        assert_eq!(repo.count_running(), 1);

        repo.started("task-1", "node-a", None).unwrap();
        let got = repo.get(id).unwrap();
        assert_eq!(got.state, JobState::Started);
        assert_eq!(got.node_id.as_deref(), Some("node-a"));

        repo.finished("task-1", None, 0, Utc::now()).unwrap();
        let got = repo.get(id).unwrap();
        assert_eq!(got.state, JobState::Finished);
        assert_eq!(got.result, Some(0));
        assert!(got.finished_at.is_some());
        assert_eq!(repo.count_running(), 0);
    }

    #[test]
    fn retry_requeues_but_keeps_the_task_association() {
        let repo = InMemoryJobRepository::new();
        let j = job(1, 128);
        let id = j.id;
        repo.submit(j);
        repo.starting(id, None, "task-1").unwrap();
        repo.started("task-1", "node-a", None).unwrap();

        repo.retry("task-1", Some("node lost".into())).unwrap();
        let got = repo.get(id).unwrap();
        assert_eq!(got.state, JobState::Queued);
        assert!(got.node_id.is_none());
        // a late duplicate event still resolves
        assert_eq!(repo.get_from_task_id("task-1").unwrap().id, id);
    }

    #[test]
    fn transition_on_unknown_task_is_not_found() {
        let repo = InMemoryJobRepository::new();
        let err = repo.failed("no-such-task", None, None).unwrap_err();
        assert!(matches!(err, SchedulerError::JobNotFound(_)));
    }

    #[test]
    fn cancel_all_kills_queued_jobs_only_once() {
        let repo = InMemoryJobRepository::new();
        let j = job(1, 128);
        let id = j.id;
        repo.submit(j);
        let jobs = repo.queued(10);
        repo.cancel_all(&jobs, "gpu not enabled");
        let got = repo.get(id).unwrap();
        assert_eq!(got.state, JobState::Killed);
        assert_eq!(got.reason.as_deref(), Some("gpu not enabled"));
    }

    #[test]
    fn framework_id_round_trip() {
        let repo = InMemoryJobRepository::new();
        assert!(repo.get_framework_id().is_none());
        assert!(repo.set_framework_id("fw-1"));
        assert_eq!(repo.get_framework_id().as_deref(), Some("fw-1"));
    }
}
