//! Cluster topology cache (C8, §4.8): the set of known nodes, their DC/rack
//! layout, the token ring, and per-keyspace replication strategies,
//! published as an immutable snapshot readers can consult lock-free.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::event::Event;
use crate::node::{Node, NodeStatus};
use crate::replication::{RacksInDc, ReplicationStrategy, Ring};
use crate::types::{StatusChangeKind, TopologyChangeKind};

/// One immutable view of the cluster (§3 "Topology snapshot"). A refresh
/// produces a new `Topology` and atomically replaces the previous one;
/// existing readers keep seeing the old one until they re-fetch.
pub struct Topology {
    pub nodes: Vec<Arc<Node>>,
    pub racks_in_dc: RacksInDc,
    pub ring: Ring,
    pub strategies: HashMap<String, ReplicationStrategy>,
}

impl Topology {
    pub fn empty() -> Self {
        Self {
            nodes: Vec::new(),
            racks_in_dc: RacksInDc::new(),
            ring: Ring::new(Vec::new()),
            strategies: HashMap::new(),
        }
    }

    pub fn find_node(&self, address: std::net::SocketAddr) -> Option<&Arc<Node>> {
        self.nodes.iter().find(|n| n.address == address)
    }
}

/// What a full refresh needs to rebuild the snapshot. Decoding an actual
/// `system.peers` RESULT into these would require the CQL column-type
/// codecs this core deliberately doesn't implement (§1 Non-goals,
/// [`crate::result::ResultBody::Rows`] stays an opaque blob); a caller that
/// does have such a codec (or a test) builds these directly and hands them
/// to [`Cluster::refresh`].
pub struct NodeDescriptor {
    pub address: std::net::SocketAddr,
    pub datacenter: String,
    pub rack: String,
}

/// A signal that the cached snapshot is stale and the caller should run a
/// fresh `system.peers`-style query and call [`Cluster::refresh`] (§4.8:
/// TOPOLOGY_CHANGE triggers a full refresh, SCHEMA_CHANGE a keyspace-strategy
/// re-read).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshHint {
    Topology,
    Schema,
}

/// Owns the published snapshot and applies incoming control-connection
/// events to it (§4.8).
pub struct Cluster {
    inner: Arc<Inner>,
}

struct Inner {
    snapshot: ArcSwap<Topology>,
}

impl Cluster {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                snapshot: ArcSwap::from_pointee(Topology::empty()),
            }),
        }
    }

    pub fn snapshot(&self) -> Arc<Topology> {
        self.inner.snapshot.load_full()
    }

    /// Replaces the snapshot's node list, ring, and rack-count map wholesale
    /// (§4.8 refresh), keeping the existing per-keyspace strategy map —
    /// schema and topology refresh are independent triggers (§4.8).
    pub fn refresh(&self, nodes: Vec<NodeDescriptor>) {
        let old = self.inner.snapshot.load();
        let built: Vec<Arc<Node>> = nodes
            .into_iter()
            .map(|d| {
                let pool = crate::pool::ConnectionPool::new_empty(d.address);
                Node::new(d.address, d.datacenter, d.rack, pool)
            })
            .collect();

        let mut racks_in_dc: RacksInDc = RacksInDc::new();
        for node in &built {
            let count = racks_in_dc.entry(node.datacenter.clone()).or_insert(0);
            // Approximates distinct-rack counting without a second pass: only
            // bumped the first time a (dc, rack) pair is seen.
            let seen_before = built
                .iter()
                .take_while(|n| !Arc::ptr_eq(n, node))
                .any(|n| n.datacenter == node.datacenter && n.rack == node.rack);
            if !seen_before {
                *count += 1;
            }
        }

        let ring_entries = Vec::new(); // a real ring needs per-node tokens, which system.peers also carries but this core doesn't decode (see NodeDescriptor doc); callers that have them use `refresh_with_ring`.
        let new_topology = Topology {
            nodes: built,
            racks_in_dc,
            ring: Ring::new(ring_entries),
            strategies: old.strategies.clone(),
        };
        drop(old);
        self.inner.snapshot.store(Arc::new(new_topology));
        tracing::info!("topology refresh applied");
    }

    /// Like [`Self::refresh`], but for callers that already have ring
    /// entries and replication strategies in hand (e.g. tests, or a caller
    /// layering its own row decoder on top of this core).
    pub fn refresh_full(
        &self,
        nodes: Vec<Arc<Node>>,
        racks_in_dc: RacksInDc,
        ring: Ring,
        strategies: HashMap<String, ReplicationStrategy>,
    ) {
        self.inner.snapshot.store(Arc::new(Topology {
            nodes,
            racks_in_dc,
            ring,
            strategies,
        }));
        tracing::info!("topology refresh applied");
    }

    /// Applies one control-connection event to the live snapshot (§4.8).
    /// STATUS_CHANGE mutates the target node's status in place, no
    /// re-snapshot. TOPOLOGY_CHANGE and SCHEMA_CHANGE can't be resolved from
    /// the event payload alone, so this returns a hint telling the caller
    /// which kind of refresh to run next.
    pub fn apply_event(&self, event: &Event) -> Option<RefreshHint> {
        match event {
            Event::StatusChange { kind, address } => {
                let snapshot = self.inner.snapshot.load();
                if let Some(node) = snapshot.find_node(*address) {
                    let status = match kind {
                        StatusChangeKind::Up => NodeStatus::Up,
                        StatusChangeKind::Down => NodeStatus::Down,
                    };
                    node.set_status(status);
                    tracing::debug!(%address, ?status, "topology: applied STATUS_CHANGE");
                } else {
                    tracing::warn!(%address, "topology: STATUS_CHANGE for unknown node, ignoring");
                }
                None
            }
            Event::TopologyChange { kind, address } => {
                tracing::debug!(%address, ?kind, "topology: TOPOLOGY_CHANGE, refresh needed");
                let _ = kind == &TopologyChangeKind::MovedNode; // all kinds trigger the same full refresh (§4.8)
                Some(RefreshHint::Topology)
            }
            Event::SchemaChange { keyspace, .. } => {
                tracing::debug!(%keyspace, "topology: SCHEMA_CHANGE, strategy re-read needed");
                Some(RefreshHint::Schema)
            }
        }
    }
}

impl Default for Cluster {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replication::RingEntry;

    fn descriptor(addr: &str, dc: &str, rack: &str) -> NodeDescriptor {
        NodeDescriptor {
            address: addr.parse().unwrap(),
            datacenter: dc.into(),
            rack: rack.into(),
        }
    }

    #[test]
    fn refresh_replaces_nodes_and_counts_distinct_racks() {
        let cluster = Cluster::new();
        cluster.refresh(vec![
            descriptor("10.0.0.1:9042", "eu", "r1"),
            descriptor("10.0.0.2:9042", "eu", "r1"),
            descriptor("10.0.0.3:9042", "eu", "r2"),
            descriptor("10.0.0.4:9042", "us", "r1"),
        ]);
        let snapshot = cluster.snapshot();
        assert_eq!(snapshot.nodes.len(), 4);
        assert_eq!(snapshot.racks_in_dc.get("eu"), Some(&2));
        assert_eq!(snapshot.racks_in_dc.get("us"), Some(&1));
    }

    #[test]
    fn status_change_event_mutates_node_in_place_without_resnapshot() {
        let cluster = Cluster::new();
        cluster.refresh(vec![descriptor("10.0.0.1:9042", "eu", "r1")]);
        let before = cluster.snapshot();

        let hint = cluster.apply_event(&Event::StatusChange {
            kind: StatusChangeKind::Down,
            address: "10.0.0.1:9042".parse().unwrap(),
        });
        assert_eq!(hint, None);

        let after = cluster.snapshot();
        assert!(Arc::ptr_eq(&before, &after), "STATUS_CHANGE must not replace the snapshot");
        assert!(!after.nodes[0].is_up());
    }

    #[test]
    fn status_change_for_unknown_node_is_ignored() {
        let cluster = Cluster::new();
        cluster.refresh(vec![descriptor("10.0.0.1:9042", "eu", "r1")]);
        let hint = cluster.apply_event(&Event::StatusChange {
            kind: StatusChangeKind::Down,
            address: "10.0.0.9:9042".parse().unwrap(),
        });
        assert_eq!(hint, None);
        assert!(cluster.snapshot().nodes[0].is_up());
    }

    #[test]
    fn topology_change_event_requests_full_refresh() {
        let cluster = Cluster::new();
        let hint = cluster.apply_event(&Event::TopologyChange {
            kind: TopologyChangeKind::NewNode,
            address: "10.0.0.5:9042".parse().unwrap(),
        });
        assert_eq!(hint, Some(RefreshHint::Topology));
    }

    #[test]
    fn schema_change_event_requests_strategy_reread() {
        let cluster = Cluster::new();
        let hint = cluster.apply_event(&Event::SchemaChange {
            kind: crate::types::SchemaChangeKind::Updated,
            target: crate::types::SchemaChangeTarget::Keyspace,
            keyspace: "ks".into(),
        });
        assert_eq!(hint, Some(RefreshHint::Schema));
    }

    #[test]
    fn refresh_full_installs_ring_and_strategies() {
        let cluster = Cluster::new();
        let node = Node::new(
            "10.0.0.1:9042".parse().unwrap(),
            "eu".into(),
            "r1".into(),
            crate::pool::ConnectionPool::new_empty("10.0.0.1:9042".parse().unwrap()),
        );
        let ring = Ring::new(vec![RingEntry { token: 0, node: node.clone() }]);
        let mut strategies = HashMap::new();
        strategies.insert("ks".to_string(), ReplicationStrategy::Simple { replication_factor: 1 });

        cluster.refresh_full(vec![node], RacksInDc::from([("eu".to_string(), 1)]), ring, strategies);

        let snapshot = cluster.snapshot();
        assert_eq!(snapshot.ring.len(), 1);
        assert!(snapshot.strategies.contains_key("ks"));
    }
}
