pub mod config;
pub mod driver;
pub mod error;
pub mod planner;
pub mod resources;
pub mod scheduler;
pub mod stanchion;

pub use config::{QueuePolicy, SchedulerConfig};
pub use driver::{Filters, MasterInfo, Offer, ResourceDriver, TaskSpec, TaskState, TaskStatus};
pub use error::{Result, SchedulerError};
pub use planner::{Plan, Planner, PlannerKind};
pub use resources::{PortRange, ResourceQuantity, Resources};
pub use scheduler::{
    Application, InMemoryJobRepository, Job, JobRepository, JobState, Scheduler, SchedulerLoop,
};
