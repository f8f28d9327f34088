//! The offer-arbitration and job-lifecycle engine.
//!
//! Resource-manager callbacks arrive on arbitrary threads; every one of them
//! is converted to a unit of work and serialized through the [`Stanchion`],
//! so the core's state is only ever touched by one consumer. The single
//! exception is the node-loss fast path, which removes one stocked offer
//! under the stock's own lock.

pub mod job;
pub mod queue;
pub mod reconcile;
pub mod statem;
pub mod stock;

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::{QueuePolicy, SchedulerConfig};
use crate::driver::{Filters, MasterInfo, Offer, ResourceDriver, TaskStatus};
use crate::planner::{self, AppJob, Planner};
use crate::resources::ResourceQuantity;
use crate::stanchion::{Stanchion, Unit};

pub use job::{Application, Job, JobState};
pub use queue::{InMemoryJobRepository, JobOrdering, JobRepository};
pub use statem::Action;
pub use stock::{merge_round, OfferStock};

/// Serialized state of one scheduler instance. Only the stanchion consumer
/// ever holds a mutable reference to this.
pub struct SchedulerCore {
    config: SchedulerConfig,
    planner: Box<dyn Planner>,
    repo: Arc<dyn JobRepository>,
    driver: Arc<dyn ResourceDriver>,
    stock: Arc<OfferStock>,
    filters: Filters,
    /// Resource manager master we are connected to, host:port
    master: Option<String>,
    framework_id: Option<String>,
    /// Set when the lifecycle table reports an invariant violation; no
    /// further rounds or status handling happen after that.
    halted: bool,
}

/// Callback surface handed to the resource-manager driver and the
/// submission path. Every method is fire-and-forget.
#[derive(Clone)]
pub struct Scheduler {
    config: SchedulerConfig,
    stanchion: Stanchion<SchedulerCore>,
    stock: Arc<OfferStock>,
    driver: Arc<dyn ResourceDriver>,
}

/// The consumer half: owns the core and drains the unit queue.
pub struct SchedulerLoop {
    core: SchedulerCore,
    rx: mpsc::UnboundedReceiver<Unit<SchedulerCore>>,
}

impl SchedulerLoop {
    pub async fn run(self, shutdown: CancellationToken) {
        Stanchion::run(self.core, self.rx, shutdown).await;
    }
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        repo: Arc<dyn JobRepository>,
        driver: Arc<dyn ResourceDriver>,
    ) -> (Self, SchedulerLoop) {
        let stock = Arc::new(OfferStock::new(config.max_stock_size));
        let (stanchion, rx) = Stanchion::new();
        let core = SchedulerCore {
            planner: planner::create(config.planner),
            filters: Filters::new(config.refuse_seconds),
            config: config.clone(),
            repo,
            driver: driver.clone(),
            stock: stock.clone(),
            master: None,
            framework_id: None,
            halted: false,
        };
        let scheduler = Self {
            config,
            stanchion,
            stock,
            driver,
        };
        (scheduler, SchedulerLoop { core, rx })
    }

    /// Registration confirmed by the resource manager.
    pub fn registered(&self, framework_id: impl Into<String>, master: MasterInfo) {
        let framework_id = framework_id.into();
        self.stanchion
            .schedule(move |core| core.handle_registered(framework_id, master));
    }

    /// Reconnected to a (possibly new) master after a disconnect.
    pub fn reregistered(&self, master: MasterInfo) {
        self.stanchion
            .schedule(move |core| core.handle_reregistered(master));
    }

    /// A batch of offers delivered for this round.
    pub fn resource_offers(&self, offers: Vec<Offer>) {
        tracing::debug!(count = offers.len(), "Resource offers");
        self.stanchion.schedule(move |core| core.handle_offers(offers));
    }

    /// The stock is not touched here: rescinds are assumed to come with a
    /// node-loss callback, which does the removal.
    pub fn offer_rescinded(&self, offer_id: &str) {
        tracing::info!(offer_id, "Offer rescinded");
    }

    /// A task status event; drives the lifecycle state machine.
    pub fn status_update(&self, status: TaskStatus) {
        tracing::info!(
            task_id = %status.task_id,
            state = ?status.state,
            message = status.message.as_deref().unwrap_or(""),
            reason = status.reason.as_deref().unwrap_or(""),
            "Status update"
        );
        self.stanchion.schedule(move |core| core.handle_status(status));
    }

    /// A worker node is gone. Its stocked offer, if any, is removed and
    /// declined immediately; a full reconciliation sweep of running jobs is
    /// scheduled behind whatever rounds are already queued.
    pub fn node_lost(&self, node_id: &str) {
        tracing::warn!(node_id, "Node lost");
        if let Some(offer) = self.stock.remove_node(node_id) {
            self.driver.decline_offer(&offer.id, None);
        }
        self.stanchion.schedule(|core| core.reconcile_running());
    }

    pub fn executor_lost(&self, executor_id: &str, node_id: &str, status: i32) {
        tracing::info!(executor_id, node_id, status, "Executor stopped");
    }

    pub fn disconnected(&self) {
        self.stanchion.schedule(|core| core.handle_disconnected());
    }

    /// Fatal resource-manager errors ("framework has been removed" arrives
    /// here).
    pub fn error(&self, message: &str) {
        tracing::error!(message, "Resource manager error");
    }

    pub fn framework_message(&self, executor_id: &str, node_id: &str, data: &[u8]) {
        tracing::info!(executor_id, node_id, bytes = data.len(), "Framework message");
    }

    /// Submission-path entry for opportunistic immediate scheduling: try the
    /// stocked offers right away, but only if this job is alone at the head
    /// of the queue.
    pub fn invoke_now(&self, job: Job) {
        self.stanchion.schedule(move |core| core.maybe_invoke_now(job));
    }

    /// Submission guard: whether this job is within the configured ceiling.
    pub fn validate_job(&self, job: &Job) -> bool {
        self.config.max_job_size.fits(&job.resources)
    }

    /// Wait until everything scheduled so far has been consumed.
    pub async fn drained(&self) {
        self.stanchion.drained().await;
    }
}

impl SchedulerCore {
    fn handle_registered(&mut self, framework_id: String, master: MasterInfo) {
        if reconcile::validate_version(&self.config, &master.version).is_err() {
            self.driver.abort();
            return;
        }
        self.master = Some(master.address());
        tracing::info!(
            master = %master.address(),
            version = %master.version,
            framework_id = %framework_id,
            "Connected to resource manager"
        );
        self.framework_id = Some(framework_id.clone());

        match reconcile::check_identity(&*self.repo, &framework_id) {
            Ok(reconcile::IdentityCheck::Resumed) => {
                tracing::info!(framework_id = %framework_id, "Framework existed in past, recovering running jobs");
                self.reconcile_running();
            }
            Ok(reconcile::IdentityCheck::Fresh) => {}
            Err(e) => {
                tracing::error!(error = %e, "Framework identity mismatch, stopping");
                self.driver.stop();
            }
        }
    }

    fn handle_reregistered(&mut self, master: MasterInfo) {
        // Possibly a long split brain; recover running state from the master.
        if reconcile::validate_version(&self.config, &master.version).is_err() {
            self.driver.abort();
            return;
        }
        self.master = Some(master.address());
        tracing::info!(master = %master.address(), "Reconnected to resource manager");
        self.reconcile_running();
    }

    fn handle_disconnected(&mut self) {
        let previous = self.master.take();
        tracing::warn!(previous_master = previous.as_deref().unwrap_or(""), "Disconnected from cluster");
    }

    /// One scheduling round: merge stock with fresh offers, decline
    /// duplicates, pull candidates per the configured policy, plan, execute.
    fn handle_offers(&mut self, fresh: Vec<Offer>) {
        if self.halted {
            return;
        }
        let stocked = self.stock.drain();
        let outcome = stock::merge_round(stocked, fresh);
        for offer in &outcome.declined {
            self.driver.decline_offer(&offer.id, Some(self.filters));
        }
        if self.config.max_stock_size > 0 {
            tracing::info!(
                available = outcome.available.len(),
                declined = outcome.declined.len(),
                "Offer stock renewal"
            );
        }

        let jobs = match self.config.queue_policy {
            QueuePolicy::Fit => {
                let mut total = ResourceQuantity::default();
                for offer in &outcome.available {
                    total += offer.resources.to_quantity();
                }
                total.set_nodes(outcome.available.len() as u32);
                let jobs = self.repo.find_fit(self.planner.order_by(), &total);
                tracing::debug!(count = jobs.len(), budget = %total, "Jobs fitting this round's budget");
                jobs
            }
            QueuePolicy::All { limit } => {
                let jobs = self.repo.find_all(self.planner.order_by(), limit);
                tracing::debug!(count = jobs.len(), limit, "Jobs pulled regardless of fit");
                jobs
            }
        };
        self.handle_all(outcome.available, jobs);
    }

    /// Plan and execute one round over the given offers and candidates.
    ///
    /// Safe to run back-to-back with other units: job fetching and the
    /// queued-to-starting transitions happen in separate repository writes,
    /// which the serialization discipline makes race-free.
    fn handle_all(&mut self, offers: Vec<Offer>, jobs: Vec<Job>) {
        let running = self.repo.count_running();
        if running >= self.config.max_simultaneous_jobs {
            tracing::warn!(
                running,
                limit = self.config.max_simultaneous_jobs,
                "Simultaneous job ceiling reached, skipping round"
            );
            // offers stay usable next round; whatever exceeds the stock
            // bound goes back to the resource manager
            for offer in self.stock.restock(offers) {
                self.driver.decline_offer(&offer.id, Some(self.filters));
            }
            return;
        }

        let mut pairs = Vec::new();
        let mut orphaned = Vec::new();
        for job in jobs {
            match self.repo.get_application(&job.app_id) {
                Some(app) => pairs.push(AppJob { app, job }),
                None => {
                    let err = crate::error::SchedulerError::ApplicationNotFound(job.app_id.clone());
                    tracing::warn!(job_id = %job.id, error = %err, "Cancelling job");
                    orphaned.push(job);
                }
            }
        }
        if !orphaned.is_empty() {
            self.repo.cancel_all(&orphaned, "application not found");
        }

        let filtered = self.planner.filter(pairs, self.config.gpu_enabled);
        if !filtered.cancelled.is_empty() {
            tracing::warn!(count = filtered.cancelled.len(), "Cancelling jobs that can never be satisfied");
            self.repo.cancel_all(&filtered.cancelled, "gpu support disabled");
        }

        let plan = self.planner.plan(
            offers,
            filtered.admissible,
            self.config.max_stock_size,
            self.config.run_as_user.as_deref(),
        );

        let mut accepted = 0;
        let mut declined = 0;
        for acceptor in &plan.acceptors {
            if acceptor.launches.is_empty() {
                declined += acceptor.decline(&*self.driver, self.filters);
            } else {
                for launch in &acceptor.launches {
                    if let Err(e) = self.repo.starting(launch.job.id, None, &launch.task.task_id) {
                        tracing::warn!(job_id = %launch.job.id, error = %e, "Marking job starting failed");
                    }
                }
                accepted += acceptor.launches.len();
                acceptor.accept(&*self.driver, self.filters);
            }
        }
        let stocked = plan.to_stock.len();
        for offer in self.stock.restock(plan.to_stock) {
            declined += 1;
            self.driver.decline_offer(&offer.id, Some(self.filters));
        }
        tracing::info!(accepted, declined, stocked, stock = %self.stock.total(), "Round complete");
    }

    /// Out-of-band round for a job that just re-entered the queue. Refuses
    /// to run early unless the queue's sole head is exactly this job, which
    /// preserves priority ordering; races benignly with the next round.
    fn maybe_invoke_now(&mut self, job: Job) {
        if self.halted {
            return;
        }
        let queued = self.repo.queued(1);
        if !(queued.len() == 1 && queued[0].id == job.id) {
            return;
        }
        let available = self.stock.drain();
        self.handle_all(available, vec![job]);
    }

    fn handle_status(&mut self, status: TaskStatus) {
        if self.halted {
            return;
        }
        let Some(current) = self.repo.get_from_task_id(&status.task_id) else {
            tracing::warn!(
                task_id = %status.task_id,
                state = ?status.state,
                message = status.message.as_deref().unwrap_or(""),
                "Status update for unknown task, dropping"
            );
            return;
        };

        let action = statem::handle_call(current.state, status.state);
        let url = self.sandbox_url(&status);
        match action {
            Action::Starting => {
                self.warn_not_found("starting", &status.task_id, self.repo.starting(current.id, url, &status.task_id));
            }
            Action::Started => {
                let node_id = status
                    .node_id
                    .clone()
                    .or_else(|| current.node_id.clone())
                    .unwrap_or_default();
                self.warn_not_found("started", &status.task_id, self.repo.started(&status.task_id, &node_id, url));
            }
            Action::Finished => {
                let exit_code = status.state.exit_code();
                self.warn_not_found(
                    "finished",
                    &status.task_id,
                    self.repo.finished(&status.task_id, url, exit_code, Utc::now()),
                );
            }
            Action::Failed => {
                self.warn_not_found("failed", &status.task_id, self.repo.failed(&status.task_id, url, status.message.clone()));
            }
            Action::Killed => {
                self.warn_not_found("killed", &status.task_id, self.repo.killed(&status.task_id, url, status.message.clone()));
            }
            Action::Retry => {
                self.warn_not_found("retry", &status.task_id, self.repo.retry(&status.task_id, status.message.clone()));
                self.maybe_invoke_now(current);
            }
            Action::Noop => {}
            Action::Log => {
                tracing::warn!(
                    job_state = %current.state,
                    status = ?status.state,
                    task_id = %status.task_id,
                    "Unexpected status for job state, ignoring"
                );
            }
            Action::Never => {
                let violation = crate::error::SchedulerError::InvariantViolation {
                    state: current.state,
                    status: status.state,
                };
                tracing::error!(error = %violation, task_id = %status.task_id, "State table defect, halting scheduling");
                self.halted = true;
                self.driver.abort();
            }
        }
    }

    fn reconcile_running(&mut self) {
        reconcile::reconcile_running_jobs(&*self.repo, &*self.driver);
    }

    /// Sandbox location of a task, resolvable only when the master is known
    /// and the status carries node, executor and container ids. Statuses
    /// piggybacked by reconciliation usually lack most of these.
    fn sandbox_url(&self, status: &TaskStatus) -> Option<String> {
        let master = self.master.as_deref()?;
        let framework_id = self.framework_id.as_deref()?;
        let node_id = status.node_id.as_deref()?;
        let executor_id = status.executor_id.as_deref()?;
        let container_id = status.container_id.as_deref()?;
        Some(format!(
            "http://{master}/agent/{node_id}/frameworks/{framework_id}/executors/{executor_id}/runs/{container_id}"
        ))
    }

    fn warn_not_found(&self, op: &'static str, task_id: &str, result: crate::error::Result<()>) {
        if let Err(e) = result {
            tracing::warn!(op, task_id, error = %e, "Repository transition failed");
        }
    }
}
