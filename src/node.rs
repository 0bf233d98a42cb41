//! Cluster node model (§3, §4.8).

use crate::pool::ConnectionPool;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

const STATUS_UP: u8 = 0;
const STATUS_DOWN: u8 = 1;

/// `UP` or `DOWN`, atomically readable/writable (§3 invariants).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeStatus {
    Up,
    Down,
}

/// A cluster member: address, placement, liveness, and its shard-aware pool.
///
/// DOWN nodes retain their pool (it is not torn down) but are skipped by the
/// selection policy (§3 lifecycles).
pub struct Node {
    pub address: SocketAddr,
    pub datacenter: String,
    pub rack: String,
    status: AtomicU8,
    pub pool: Arc<ConnectionPool>,
}

impl Node {
    pub fn new(address: SocketAddr, datacenter: String, rack: String, pool: Arc<ConnectionPool>) -> Arc<Self> {
        Arc::new(Self {
            address,
            datacenter,
            rack,
            status: AtomicU8::new(STATUS_UP),
            pool,
        })
    }

    pub fn status(&self) -> NodeStatus {
        match self.status.load(Ordering::Acquire) {
            STATUS_UP => NodeStatus::Up,
            _ => NodeStatus::Down,
        }
    }

    pub fn is_up(&self) -> bool {
        self.status() == NodeStatus::Up
    }

    pub fn set_status(&self, status: NodeStatus) {
        let raw = match status {
            NodeStatus::Up => STATUS_UP,
            NodeStatus::Down => STATUS_DOWN,
        };
        self.status.store(raw, Ordering::Release);
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("address", &self.address)
            .field("datacenter", &self.datacenter)
            .field("rack", &self.rack)
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::ConnectionPool;

    fn test_node(dc: &str, rack: &str) -> Arc<Node> {
        let pool = ConnectionPool::new_empty("127.0.0.1:9042".parse().unwrap());
        Node::new("127.0.0.1:9042".parse().unwrap(), dc.into(), rack.into(), pool)
    }

    #[test]
    fn status_starts_up_and_is_mutable() {
        let node = test_node("eu", "r1");
        assert!(node.is_up());
        node.set_status(NodeStatus::Down);
        assert!(!node.is_up());
        assert_eq!(node.status(), NodeStatus::Down);
    }
}
