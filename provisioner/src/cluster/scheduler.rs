//! Node selection

use std::sync::atomic::{AtomicUsize, Ordering};

use super::node::Node;

/// Picks the node an operation lands on
pub trait Scheduler: Send + Sync {
    /// Select one of `nodes`, `None` when there is none to pick from
    fn select<'a>(&self, nodes: &'a [Node]) -> Option<&'a Node>;

    fn name(&self) -> &'static str;
}

/// Cycles through the candidate nodes
#[derive(Debug, Default)]
pub struct RoundRobin {
    cursor: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Scheduler for RoundRobin {
    fn select<'a>(&self, nodes: &'a [Node]) -> Option<&'a Node> {
        if nodes.is_empty() {
            return None;
        }
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % nodes.len();
        nodes.get(index)
    }

    fn name(&self) -> &'static str {
        "round_robin"
    }
}
