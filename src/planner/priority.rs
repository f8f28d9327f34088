use crate::planner::Planner;
use crate::scheduler::queue::JobOrdering;

/// Launches higher-priority jobs first, ties broken by submission time.
pub struct PriorityPlanner;

impl Planner for PriorityPlanner {
    fn order_by(&self) -> JobOrdering {
        JobOrdering::Priority
    }
}
