use std::fmt;
use std::ops::{Add, AddAssign};

use serde::{Deserialize, Serialize};

/// Aggregate resource capacity or demand, summed across offers or jobs.
///
/// Addition is associative and commutative; `fits` is a per-dimension
/// comparison of a demand against this aggregate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceQuantity {
    pub cpus: u32,
    pub mem_mb: u64,
    pub gpus: u32,
    pub ports: u32,
    pub disk_mb: u64,
    /// Number of nodes contributing to this aggregate. Informational;
    /// not compared by `fits`.
    pub nodes: u32,
}

impl ResourceQuantity {
    pub fn new(cpus: u32, mem_mb: u64) -> Self {
        Self {
            cpus,
            mem_mb,
            ..Default::default()
        }
    }

    pub fn with_gpus(mut self, gpus: u32) -> Self {
        self.gpus = gpus;
        self
    }

    pub fn with_ports(mut self, ports: u32) -> Self {
        self.ports = ports;
        self
    }

    pub fn with_disk_mb(mut self, disk_mb: u64) -> Self {
        self.disk_mb = disk_mb;
        self
    }

    pub fn set_nodes(&mut self, nodes: u32) {
        self.nodes = nodes;
    }

    /// True if `demand` fits within this aggregate on every dimension.
    pub fn fits(&self, demand: &ResourceQuantity) -> bool {
        demand.cpus <= self.cpus
            && demand.mem_mb <= self.mem_mb
            && demand.gpus <= self.gpus
            && demand.ports <= self.ports
            && demand.disk_mb <= self.disk_mb
    }
}

impl Add for ResourceQuantity {
    type Output = ResourceQuantity;

    fn add(mut self, rhs: ResourceQuantity) -> ResourceQuantity {
        self += rhs;
        self
    }
}

impl AddAssign for ResourceQuantity {
    fn add_assign(&mut self, rhs: ResourceQuantity) {
        self.cpus += rhs.cpus;
        self.mem_mb += rhs.mem_mb;
        self.gpus += rhs.gpus;
        self.ports += rhs.ports;
        self.disk_mb += rhs.disk_mb;
        self.nodes += rhs.nodes;
    }
}

impl fmt::Display for ResourceQuantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cpus={} mem={}MB gpus={} ports={} disk={}MB nodes={}",
            self.cpus, self.mem_mb, self.gpus, self.ports, self.disk_mb, self.nodes
        )
    }
}

/// An inclusive range of ports granted by an offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    pub begin: u16,
    pub end: u16,
}

impl PortRange {
    pub fn new(begin: u16, end: u16) -> Self {
        Self { begin, end }
    }

    pub fn width(&self) -> u32 {
        if self.end < self.begin {
            0
        } else {
            u32::from(self.end - self.begin) + 1
        }
    }
}

/// The concrete capacity carried by a single offer.
///
/// Unlike [`ResourceQuantity`] this keeps fractional CPUs and the actual port
/// ranges, so the planner can carve assignments out of it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resources {
    pub cpus: f64,
    pub mem_mb: u64,
    pub gpus: u32,
    pub disk_mb: u64,
    pub port_ranges: Vec<PortRange>,
}

impl Resources {
    pub fn new(cpus: f64, mem_mb: u64) -> Self {
        Self {
            cpus,
            mem_mb,
            ..Default::default()
        }
    }

    pub fn with_gpus(mut self, gpus: u32) -> Self {
        self.gpus = gpus;
        self
    }

    pub fn with_ports(mut self, ranges: Vec<PortRange>) -> Self {
        self.port_ranges = ranges;
        self
    }

    pub fn with_disk_mb(mut self, disk_mb: u64) -> Self {
        self.disk_mb = disk_mb;
        self
    }

    fn total_ports(&self) -> u32 {
        self.port_ranges.iter().map(PortRange::width).sum()
    }

    /// Collapse to an aggregate quantity. Fractional CPUs round down;
    /// the offer counts as one node.
    pub fn to_quantity(&self) -> ResourceQuantity {
        ResourceQuantity {
            cpus: self.cpus.floor() as u32,
            mem_mb: self.mem_mb,
            gpus: self.gpus,
            ports: self.total_ports(),
            disk_mb: self.disk_mb,
            nodes: 1,
        }
    }

    /// True if a single job's demand fits in what is left here.
    pub fn can_fit(&self, demand: &ResourceQuantity) -> bool {
        f64::from(demand.cpus) <= self.cpus
            && demand.mem_mb <= self.mem_mb
            && demand.gpus <= self.gpus
            && demand.disk_mb <= self.disk_mb
            && demand.ports <= self.total_ports()
    }

    /// Subtract `demand` from the remaining capacity and carve out the
    /// requested number of ports. Returns the concrete port assignment, or
    /// `None` without mutating anything if the demand does not fit.
    pub fn reserve(&mut self, demand: &ResourceQuantity) -> Option<Vec<u16>> {
        if !self.can_fit(demand) {
            return None;
        }
        self.cpus -= f64::from(demand.cpus);
        self.mem_mb -= demand.mem_mb;
        self.gpus -= demand.gpus;
        self.disk_mb -= demand.disk_mb;

        let mut assigned = Vec::with_capacity(demand.ports as usize);
        let mut needed = demand.ports;
        let mut remaining = Vec::new();
        for range in self.port_ranges.drain(..) {
            if needed == 0 {
                remaining.push(range);
                continue;
            }
            let take = needed.min(range.width());
            for i in 0..take {
                assigned.push(range.begin + i as u16);
            }
            needed -= take;
            if take < range.width() {
                remaining.push(PortRange::new(range.begin + take as u16, range.end));
            }
        }
        self.port_ranges = remaining;
        Some(assigned)
    }
}
