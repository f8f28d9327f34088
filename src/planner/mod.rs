//! Planning strategies: turning (available offers × candidate jobs) into a
//! launch plan.
//!
//! Selection policy (which jobs are pulled from the queue) lives in the
//! scheduler's round handler; the strategies here decide ordering,
//! pre-admission filtering, and bin-packing.

pub mod fifo;
pub mod priority;

use uuid::Uuid;

use crate::driver::{Filters, Offer, ResourceDriver, TaskSpec};
use crate::scheduler::job::{Application, Job};
use crate::scheduler::queue::JobOrdering;

pub use fifo::FifoPlanner;
pub use priority::PriorityPlanner;

/// A job paired with the application it launches under.
#[derive(Debug, Clone)]
pub struct AppJob {
    pub app: Application,
    pub job: Job,
}

/// One job launch carved out of a specific offer.
#[derive(Debug, Clone)]
pub struct Launch {
    pub job: Job,
    pub task: TaskSpec,
}

/// One or more offers paired with the launches planned against them. An
/// acceptor with no launches is an outright decline.
#[derive(Debug, Clone, Default)]
pub struct OfferAcceptor {
    pub offers: Vec<Offer>,
    pub launches: Vec<Launch>,
}

impl OfferAcceptor {
    pub fn new(offer: Offer) -> Self {
        Self {
            offers: vec![offer],
            launches: Vec::new(),
        }
    }

    /// Decline every held offer. Returns how many were declined.
    pub fn decline(&self, driver: &dyn ResourceDriver, filters: Filters) -> usize {
        for offer in &self.offers {
            driver.decline_offer(&offer.id, Some(filters));
        }
        self.offers.len()
    }

    /// Accept the held offers, launching the planned tasks.
    pub fn accept(&self, driver: &dyn ResourceDriver, filters: Filters) {
        let offer_ids: Vec<String> = self.offers.iter().map(|o| o.id.clone()).collect();
        let tasks: Vec<TaskSpec> = self.launches.iter().map(|l| l.task.clone()).collect();
        driver.launch(&offer_ids, &tasks, filters);
    }
}

/// The planner's output for one round.
#[derive(Debug, Clone, Default)]
pub struct Plan {
    pub acceptors: Vec<OfferAcceptor>,
    /// Unused offers to keep for the next round
    pub to_stock: Vec<Offer>,
}

impl Plan {
    pub fn launch_count(&self) -> usize {
        self.acceptors.iter().map(|a| a.launches.len()).sum()
    }
}

/// Jobs that survived pre-admission filtering, and those rejected for good.
#[derive(Debug, Default)]
pub struct FilterOutcome {
    pub admissible: Vec<AppJob>,
    /// Rejected before ever launching; the caller moves these to Killed
    pub cancelled: Vec<Job>,
}

/// A planning strategy. Pure: no I/O, no clock, no repository access.
pub trait Planner: Send + Sync {
    /// The queue ordering this strategy wants candidates in.
    fn order_by(&self) -> JobOrdering;

    /// Drop jobs that can never be satisfied (pre-admission rejection,
    /// distinct from runtime failure).
    fn filter(&self, pairs: Vec<AppJob>, gpu_enabled: bool) -> FilterOutcome {
        let mut outcome = FilterOutcome::default();
        for pair in pairs {
            if pair.job.resources.gpus > 0 && !gpu_enabled {
                outcome.cancelled.push(pair.job);
            } else {
                outcome.admissible.push(pair);
            }
        }
        outcome
    }

    /// Greedily pack admissible jobs onto the available offers, in this
    /// strategy's order. Reference behavior exhausts one offer before
    /// opening another; unused offers return as stock up to
    /// `max_stock_size`, the remainder as empty acceptors for decline.
    fn plan(
        &self,
        offers: Vec<Offer>,
        admissible: Vec<AppJob>,
        max_stock_size: usize,
        run_as: Option<&str>,
    ) -> Plan {
        pack(offers, self.sorted(admissible), max_stock_size, run_as)
    }

    /// Admissible jobs in this strategy's launch order.
    fn sorted(&self, mut pairs: Vec<AppJob>) -> Vec<AppJob> {
        match self.order_by() {
            JobOrdering::Fifo => pairs.sort_by_key(|p| p.job.created_at),
            JobOrdering::Priority => {
                pairs.sort_by_key(|p| (std::cmp::Reverse(p.job.priority), p.job.created_at));
            }
        }
        pairs
    }
}

/// Which planning strategy to use, resolved once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlannerKind {
    Fifo,
    Priority,
}

pub fn create(kind: PlannerKind) -> Box<dyn Planner> {
    match kind {
        PlannerKind::Fifo => Box::new(FifoPlanner),
        PlannerKind::Priority => Box::new(PriorityPlanner),
    }
}

/// Greedy bin-packer shared by the reference strategies.
///
/// Walks jobs in the given order, carving each out of the currently open
/// offer and opening the next offer only once the current one cannot fit the
/// job at hand. Jobs that fit no remaining offer stay queued untouched.
fn pack(
    offers: Vec<Offer>,
    ordered: Vec<AppJob>,
    max_stock_size: usize,
    run_as: Option<&str>,
) -> Plan {
    let mut plan = Plan::default();
    let mut remaining_offers = offers.into_iter();
    let mut unused: Vec<Offer> = Vec::new();
    let mut open: Option<(Offer, crate::resources::Resources, Vec<Launch>)> = None;

    for pair in ordered {
        loop {
            let Some((offer, capacity, launches)) = open.as_mut() else {
                match remaining_offers.next() {
                    Some(next) => {
                        let capacity = next.resources.clone();
                        open = Some((next, capacity, Vec::new()));
                        continue;
                    }
                    // no offer left; this job stays queued
                    None => break,
                }
            };
            if let Some(ports) = capacity.reserve(&pair.job.resources) {
                launches.push(make_launch(&pair, offer, ports, run_as));
                break;
            }
            // current offer cannot fit this job; close it and open the next
            let (offer, _, launches) = open.take().unwrap();
            if launches.is_empty() {
                unused.push(offer);
            } else {
                plan.acceptors.push(OfferAcceptor { offers: vec![offer], launches });
            }
        }
    }

    if let Some((offer, _, launches)) = open.take() {
        if launches.is_empty() {
            unused.push(offer);
        } else {
            plan.acceptors.push(OfferAcceptor { offers: vec![offer], launches });
        }
    }

    for offer in unused.into_iter().chain(remaining_offers) {
        if plan.to_stock.len() < max_stock_size {
            plan.to_stock.push(offer);
        } else {
            plan.acceptors.push(OfferAcceptor::new(offer));
        }
    }
    plan
}

fn make_launch(pair: &AppJob, offer: &Offer, ports: Vec<u16>, run_as: Option<&str>) -> Launch {
    let task = TaskSpec {
        task_id: format!("task-{}", Uuid::new_v4()),
        job_id: pair.job.id,
        name: pair.job.name.clone(),
        command: pair.job.command.clone(),
        resources: pair.job.resources,
        ports,
        node_id: offer.node_id.clone(),
        run_as: run_as.map(str::to_string),
    };
    Launch {
        job: pair.job.clone(),
        task,
    }
}
