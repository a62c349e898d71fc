use crate::frontier::{Frontier, WorkUnit};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use tracing::debug;

/// Fixed list of named partitions, each handed out exactly once
///
/// The supervisor that receives a partition owns its pagination and
/// restarts, so nothing is ever submitted back.
pub struct PartitionFrontier {
    remaining: Mutex<VecDeque<WorkUnit>>,
}

impl PartitionFrontier {
    pub fn new(partitions: Vec<WorkUnit>) -> Self {
        Self {
            remaining: Mutex::new(partitions.into()),
        }
    }
}

#[async_trait]
impl Frontier for PartitionFrontier {
    async fn next(&self) -> Option<WorkUnit> {
        self.remaining.lock().pop_front()
    }

    fn submit(&self, children: Vec<WorkUnit>) {
        if !children.is_empty() {
            debug!("Partition frontier ignores {} submitted units", children.len());
        }
    }

    fn finish(&self, _unit: &WorkUnit) {}

    fn close(&self) {
        self.remaining.lock().clear();
    }

    fn pending(&self) -> usize {
        self.remaining.lock().len()
    }
}
