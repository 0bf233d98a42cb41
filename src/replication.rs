//! Token ring and replica selection (C7, §4.7): given a primary replica
//! found by ring lookup, expand it into an ordered list of distinct replicas
//! under either of the two supported replication strategies.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::node::Node;
use crate::token::Token;

/// One (token, node) pair on the ring (§3).
#[derive(Clone)]
pub struct RingEntry {
    pub token: Token,
    pub node: Arc<Node>,
}

/// Per-DC replication factor map, as supplied by a keyspace's strategy
/// options.
pub type DcReplicationFactors = HashMap<String, usize>;

/// Per-DC count of distinct racks, as published in a topology snapshot
/// (§3 "per-DC rack-count map").
pub type RacksInDc = HashMap<String, usize>;

/// An ordered, cyclic set of (token, node) pairs covering the whole token
/// space (§3 RingEntry, §4.7 Ring lookup).
pub struct Ring {
    entries: Vec<RingEntry>,
}

impl Ring {
    pub fn new(mut entries: Vec<RingEntry>) -> Self {
        entries.sort_by_key(|e| e.token);
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Index of the first entry with `token >= t`, wrapping to 0 if none
    /// (§4.7 Ring lookup: "the owning range is the first ring entry with
    /// token ≥ T; wrap to the smallest entry if none exists").
    fn primary_index(&self, t: Token) -> usize {
        let idx = self.entries.partition_point(|e| e.token < t);
        if idx == self.entries.len() {
            0
        } else {
            idx
        }
    }

    /// The primary replica for `t`: the node owning the first ring entry at
    /// or after `t`.
    pub fn primary(&self, t: Token) -> Option<Arc<Node>> {
        if self.entries.is_empty() {
            return None;
        }
        Some(self.entries[self.primary_index(t)].node.clone())
    }

    /// Walks the ring clockwise starting at the primary entry for `t`,
    /// visiting each entry exactly once.
    pub fn walk_from(&self, t: Token) -> impl Iterator<Item = &RingEntry> {
        let start = if self.entries.is_empty() { 0 } else { self.primary_index(t) };
        let len = self.entries.len();
        (0..len).map(move |i| &self.entries[(start + i) % len])
    }
}

/// A keyspace's replica-placement rule (§4.7).
pub enum ReplicationStrategy {
    Simple { replication_factor: usize },
    NetworkTopology { factors: DcReplicationFactors },
}

impl ReplicationStrategy {
    /// Computes the ordered, duplicate-free replica list for `token` (§4.7).
    /// `racks_in_dc` is only consulted by `NetworkTopology`.
    pub fn replicas(&self, ring: &Ring, racks_in_dc: &RacksInDc, token: Token) -> Vec<Arc<Node>> {
        match self {
            ReplicationStrategy::Simple { replication_factor } => simple_replicas(ring, *replication_factor, token),
            ReplicationStrategy::NetworkTopology { factors } => network_topology_replicas(ring, factors, racks_in_dc, token),
        }
    }
}

/// SimpleStrategy (§4.7): walk the ring clockwise from the primary,
/// collecting distinct nodes until `rf` are collected or the ring is
/// exhausted.
fn simple_replicas(ring: &Ring, rf: usize, token: Token) -> Vec<Arc<Node>> {
    let mut out: Vec<Arc<Node>> = Vec::with_capacity(rf);
    for entry in ring.walk_from(token) {
        if out.iter().any(|n| Arc::ptr_eq(n, &entry.node)) {
            continue;
        }
        out.push(entry.node.clone());
        if out.len() == rf {
            break;
        }
    }
    out
}

/// NetworkTopologyStrategy (§4.7): per DC, decide up front (before the walk)
/// whether that DC can afford rack diversity: if its RF is at most its
/// distinct rack count, strict mode applies and a second node on an
/// already-seen rack is skipped permanently; otherwise RF exceeds the rack
/// count and no amount of rack filtering can avoid repeating a rack, so that
/// DC drops the rack constraint entirely and takes the first RF distinct
/// nodes in ring order. Walking the ring once then just applies each DC's
/// precomputed mode. Stops per DC when that DC's RF is filled; a node whose
/// DC has no entry in `factors` is skipped.
fn network_topology_replicas(
    ring: &Ring,
    factors: &DcReplicationFactors,
    racks_in_dc: &RacksInDc,
    token: Token,
) -> Vec<Arc<Node>> {
    let strict: HashMap<&str, bool> = factors
        .iter()
        .map(|(dc, &rf)| (dc.as_str(), rf <= *racks_in_dc.get(dc.as_str()).unwrap_or(&1)))
        .collect();

    let mut combined = Vec::new();
    let mut per_dc: HashMap<&str, Vec<Arc<Node>>> = HashMap::new();
    let mut racks_seen: HashMap<&str, HashSet<&str>> = HashMap::new();

    for entry in ring.walk_from(token) {
        let dc = entry.node.datacenter.as_str();
        let Some(&rf) = factors.get(dc) else { continue };

        let dc_list = per_dc.entry(dc).or_default();
        if dc_list.len() >= rf {
            continue;
        }
        if dc_list.iter().any(|n| Arc::ptr_eq(n, &entry.node)) {
            continue;
        }

        if strict[dc] {
            let seen = racks_seen.entry(dc).or_default();
            if seen.contains(entry.node.rack.as_str()) {
                continue;
            }
            seen.insert(entry.node.rack.as_str());
        }
        dc_list.push(entry.node.clone());
        combined.push(entry.node.clone());

        let all_full = factors.iter().all(|(dc, &rf)| per_dc.get(dc.as_str()).map_or(rf == 0, |l| l.len() >= rf));
        if all_full {
            break;
        }
    }
    combined
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::ConnectionPool;

    fn node(addr: &str, dc: &str, rack: &str) -> Arc<Node> {
        Node::new(addr.parse().unwrap(), dc.into(), rack.into(), ConnectionPool::new_empty(addr.parse().unwrap()))
    }

    /// Mirrors the worked 3-node, single-DC ring used for the SimpleStrategy
    /// scenario (§8): tokens 50..500 alternate across nodes 2,1,2,3,1,2,3,1.
    fn simple_strategy_ring() -> (Ring, Vec<Arc<Node>>) {
        let n1 = node("10.0.0.1:9042", "waw", "r1");
        let n2 = node("10.0.0.2:9042", "waw", "r1");
        let n3 = node("10.0.0.3:9042", "waw", "r1");
        let entries = vec![
            RingEntry { token: 50, node: n2.clone() },
            RingEntry { token: 100, node: n1.clone() },
            RingEntry { token: 150, node: n2.clone() },
            RingEntry { token: 200, node: n3.clone() },
            RingEntry { token: 250, node: n1.clone() },
            RingEntry { token: 300, node: n2.clone() },
            RingEntry { token: 400, node: n3.clone() },
            RingEntry { token: 500, node: n1.clone() },
        ];
        (Ring::new(entries), vec![n1, n2, n3])
    }

    #[test]
    fn simple_strategy_rf2_token160_yields_node3_then_node1() {
        let (ring, nodes) = simple_strategy_ring();
        let strategy = ReplicationStrategy::Simple { replication_factor: 2 };
        let replicas = strategy.replicas(&ring, &RacksInDc::new(), 160);
        assert_eq!(replicas.len(), 2);
        assert!(Arc::ptr_eq(&replicas[0], &nodes[2])); // node "3"
        assert!(Arc::ptr_eq(&replicas[1], &nodes[0])); // node "1"
    }

    #[test]
    fn simple_strategy_rf3_token60_yields_all_three_in_ring_order() {
        let (ring, nodes) = simple_strategy_ring();
        let strategy = ReplicationStrategy::Simple { replication_factor: 3 };
        let replicas = strategy.replicas(&ring, &RacksInDc::new(), 60);
        assert_eq!(replicas.len(), 3);
        assert!(Arc::ptr_eq(&replicas[0], &nodes[0])); // "1"
        assert!(Arc::ptr_eq(&replicas[1], &nodes[1])); // "2"
        assert!(Arc::ptr_eq(&replicas[2], &nodes[2])); // "3"
    }

    #[test]
    fn simple_strategy_clamps_to_available_node_count() {
        let (ring, nodes) = simple_strategy_ring();
        let strategy = ReplicationStrategy::Simple { replication_factor: 10 };
        let replicas = strategy.replicas(&ring, &RacksInDc::new(), 0);
        assert_eq!(replicas.len(), nodes.len());
    }

    /// Mirrors the worked 8-node, two-DC ring used for the
    /// NetworkTopologyStrategy scenario (§8).
    fn network_topology_ring() -> (Ring, Vec<Arc<Node>>, RacksInDc) {
        let n1 = node("10.0.1.1:9042", "waw", "r1");
        let n2 = node("10.0.1.2:9042", "waw", "r1");
        let n3 = node("10.0.1.3:9042", "waw", "r2");
        let n4 = node("10.0.1.4:9042", "waw", "r2");
        let n5 = node("10.0.1.5:9042", "her", "r3");
        let n6 = node("10.0.1.6:9042", "her", "r3");
        let n7 = node("10.0.1.7:9042", "her", "r4");
        let n8 = node("10.0.1.8:9042", "her", "r4");
        let entries = vec![
            RingEntry { token: 50, node: n1.clone() },
            RingEntry { token: 100, node: n5.clone() },
            RingEntry { token: 150, node: n2.clone() },
            RingEntry { token: 200, node: n1.clone() },
            RingEntry { token: 250, node: n6.clone() },
            RingEntry { token: 300, node: n4.clone() },
            RingEntry { token: 400, node: n8.clone() },
            RingEntry { token: 500, node: n7.clone() },
            RingEntry { token: 510, node: n3.clone() },
        ];
        let racks_in_dc = RacksInDc::from([("waw".to_string(), 2), ("her".to_string(), 2)]);
        (Ring::new(entries), vec![n1, n2, n3, n4, n5, n6, n7, n8], racks_in_dc)
    }

    #[test]
    fn network_topology_strategy_spreads_across_racks_then_relaxes() {
        let (ring, nodes, racks_in_dc) = network_topology_ring();
        let factors = DcReplicationFactors::from([("waw".to_string(), 2), ("her".to_string(), 3)]);
        let strategy = ReplicationStrategy::NetworkTopology { factors };
        let replicas = strategy.replicas(&ring, &racks_in_dc, 0);

        // waw: RF=2 == its 2 racks, strict mode: node1 (r1), node4 (r2).
        // her: RF=3 > its 2 racks, free mode from the start: node5, node6,
        // node8 in ring order, repeats allowed. Merged in ring-walk
        // acceptance order: node1, node5, node6, node4, node8.
        let expect = [&nodes[0], &nodes[4], &nodes[5], &nodes[3], &nodes[7]];
        assert_eq!(replicas.len(), expect.len());
        for (got, want) in replicas.iter().zip(expect.iter()) {
            assert!(Arc::ptr_eq(got, want));
        }
    }

    #[test]
    fn network_topology_strategy_skips_dcs_outside_the_factor_map() {
        let (ring, nodes, racks_in_dc) = network_topology_ring();
        let factors = DcReplicationFactors::from([("waw".to_string(), 2)]);
        let strategy = ReplicationStrategy::NetworkTopology { factors };
        let replicas = strategy.replicas(&ring, &racks_in_dc, 0);
        assert_eq!(replicas.len(), 2);
        assert!(replicas.iter().all(|n| Arc::ptr_eq(n, &nodes[0]) || Arc::ptr_eq(n, &nodes[3]) || Arc::ptr_eq(n, &nodes[1])));
    }
}
