use crate::planner::Planner;
use crate::scheduler::queue::JobOrdering;

/// Launches jobs strictly in submission order.
pub struct FifoPlanner;

impl Planner for FifoPlanner {
    fn order_by(&self) -> JobOrdering {
        JobOrdering::Fifo
    }
}
