use crate::planner::PlannerKind;
use crate::resources::ResourceQuantity;

/// How candidate jobs are pulled from the queue before planning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueuePolicy {
    /// Only admit jobs whose aggregate demand fits the total capacity
    /// available this round.
    Fit,
    /// Admit up to `limit` queued jobs regardless of fit, deferring
    /// admission entirely to the bin-packer.
    All { limit: usize },
}

/// Configuration for one scheduler instance.
///
/// Loading this from files or flags belongs to the front-ends; the core only
/// consumes the resolved values.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Name this framework registers under with the resource manager
    pub framework_name: String,
    /// Upper bound on offers retained between rounds
    pub max_stock_size: usize,
    /// Ceiling on simultaneously running jobs; rounds are skipped at or
    /// above it
    pub max_simultaneous_jobs: usize,
    /// Re-offer delay attached to declined offers
    pub refuse_seconds: f64,
    /// Candidate selection policy for each round
    pub queue_policy: QueuePolicy,
    /// Planning strategy, resolved once at startup
    pub planner: PlannerKind,
    /// Whether jobs may request GPUs
    pub gpu_enabled: bool,
    /// Unix user tasks run as on the worker side
    pub run_as_user: Option<String>,
    /// Largest job the submission path may accept
    pub max_job_size: ResourceQuantity,
    /// Resource manager version prefixes this scheduler understands
    pub supported_versions: Vec<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            framework_name: "mesa-lite".to_string(),
            max_stock_size: 16,
            max_simultaneous_jobs: 128,
            refuse_seconds: 5.0,
            queue_policy: QueuePolicy::Fit,
            planner: PlannerKind::Fifo,
            gpu_enabled: false,
            run_as_user: None,
            max_job_size: ResourceQuantity::new(32, 512 * 1024)
                .with_gpus(8)
                .with_ports(1000)
                .with_disk_mb(1024 * 1024),
            supported_versions: vec!["1.2".to_string(), "1.3".to_string(), "1.4".to_string()],
        }
    }
}

impl SchedulerConfig {
    pub fn with_queue_policy(mut self, policy: QueuePolicy) -> Self {
        self.queue_policy = policy;
        self
    }

    pub fn with_planner(mut self, planner: PlannerKind) -> Self {
        self.planner = planner;
        self
    }

    pub fn with_max_stock_size(mut self, size: usize) -> Self {
        self.max_stock_size = size;
        self
    }

    pub fn with_max_simultaneous_jobs(mut self, limit: usize) -> Self {
        self.max_simultaneous_jobs = limit;
        self
    }

    pub fn with_gpu_enabled(mut self, enabled: bool) -> Self {
        self.gpu_enabled = enabled;
        self
    }

    /// True if the resource manager's reported version is one this
    /// scheduler supports.
    pub fn supports_version(&self, version: &str) -> bool {
        self.supported_versions
            .iter()
            .any(|v| version.starts_with(v.as_str()))
    }
}
