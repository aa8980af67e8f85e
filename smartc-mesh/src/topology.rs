//! Per-session node graph and relay election

use smartc_core::config::MeshConfig;
use smartc_core::{ConnectionId, SessionId};
use std::cmp::Ordering;
use std::collections::HashMap;

use crate::node::{PeerCapabilities, PeerNode};
use crate::routing::{RoutingPath, RoutingStrategy, TopologyStats};

/// Routing state of one session. Callers serialize access per session.
#[derive(Debug)]
pub struct MeshTopology {
    session_id: SessionId,
    nodes: HashMap<ConnectionId, PeerNode>,
    relay_nodes: Vec<ConnectionId>,
    strategy: RoutingStrategy,
    /// Set once the last node leaves; a retired topology is about to be
    /// dropped from the manager and must not take new nodes.
    retired: bool,
}

/// Result of a recomputation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Recalculation {
    pub previous_strategy: RoutingStrategy,
    pub strategy: RoutingStrategy,
    pub relays_changed: bool,
}

impl Recalculation {
    #[must_use]
    pub fn strategy_changed(&self) -> bool {
        self.previous_strategy != self.strategy
    }
}

impl MeshTopology {
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            nodes: HashMap::new(),
            relay_nodes: Vec::new(),
            strategy: RoutingStrategy::FullMesh,
            retired: false,
        }
    }

    #[must_use]
    pub const fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    #[must_use]
    pub const fn strategy(&self) -> RoutingStrategy {
        self.strategy
    }

    #[must_use]
    pub fn relay_nodes(&self) -> &[ConnectionId] {
        &self.relay_nodes
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[must_use]
    pub const fn is_retired(&self) -> bool {
        self.retired
    }

    pub(crate) fn retire(&mut self) {
        self.retired = true;
    }

    #[must_use]
    pub fn node(&self, peer_id: &ConnectionId) -> Option<&PeerNode> {
        self.nodes.get(peer_id)
    }

    pub fn node_mut(&mut self, peer_id: &ConnectionId) -> Option<&mut PeerNode> {
        self.nodes.get_mut(peer_id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &PeerNode> {
        self.nodes.values()
    }

    /// Insert a node, or refresh capabilities of an existing one
    pub fn upsert(&mut self, peer_id: ConnectionId, capabilities: PeerCapabilities) {
        match self.nodes.get_mut(&peer_id) {
            Some(node) => {
                node.capabilities = capabilities;
                node.touch();
            }
            None => {
                let node = PeerNode::new(peer_id.clone(), self.session_id.clone(), capabilities);
                self.nodes.insert(peer_id, node);
            }
        }
    }

    /// Remove a node and strip it from the relay list. Returns whether it was a relay.
    pub fn remove(&mut self, peer_id: &ConnectionId) -> Option<bool> {
        let node = self.nodes.remove(peer_id)?;
        self.relay_nodes.retain(|id| id != peer_id);
        Some(node.is_relay)
    }

    /// Re-derive the strategy from node count and re-elect relays.
    ///
    /// Only peers that opted in are candidates. Ranking is bandwidth
    /// descending, then average latency ascending, then stable connections,
    /// then CPU score descending, then peer id for a reproducible order.
    pub fn recalculate(&mut self, config: &MeshConfig) -> Recalculation {
        let previous_strategy = self.strategy;
        let count = self.nodes.len();
        self.strategy = RoutingStrategy::for_size(count, config);
        let target = self.strategy.relay_target(count, config);

        let mut candidates: Vec<&PeerNode> = self
            .nodes
            .values()
            .filter(|node| node.capabilities.can_relay)
            .collect();
        candidates.sort_by(|a, b| relay_rank(a, b));

        let mut elected: Vec<ConnectionId> = candidates
            .into_iter()
            .take(target)
            .map(|node| node.peer_id.clone())
            .collect();

        for node in self.nodes.values_mut() {
            node.is_relay = elected.contains(&node.peer_id);
        }

        std::mem::swap(&mut self.relay_nodes, &mut elected);
        Recalculation {
            previous_strategy,
            strategy: self.strategy,
            relays_changed: elected != self.relay_nodes,
        }
    }

    /// Routing plan for `source`, or `None` if it is not in this topology
    #[must_use]
    pub fn routing_path(&self, source: &ConnectionId, config: &MeshConfig) -> Option<RoutingPath> {
        let node = self.nodes.get(source)?;

        let mut peers: Vec<(&ConnectionId, u32)> = self
            .nodes
            .keys()
            .filter(|id| *id != source)
            .map(|id| (id, node.latency_to(id)))
            .collect();
        peers.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(b.0)));

        let direct_peers = peers
            .into_iter()
            .take(self.strategy.direct_peer_limit(config))
            .map(|(id, _)| id.clone())
            .collect();

        let relay_nodes = self
            .relay_nodes
            .iter()
            .filter(|id| *id != source)
            .take(self.strategy.relay_limit(config))
            .cloned()
            .collect();

        Some(RoutingPath {
            strategy: self.strategy,
            direct_peers,
            relay_nodes,
        })
    }

    #[must_use]
    pub fn stats(&self) -> TopologyStats {
        let measured: Vec<f64> = self
            .nodes
            .values()
            .map(PeerNode::average_latency)
            .filter(|avg| *avg > 0.0)
            .collect();
        let average_latency_ms = if measured.is_empty() {
            0.0
        } else {
            measured.iter().sum::<f64>() / measured.len() as f64
        };

        TopologyStats {
            session_id: self.session_id.clone(),
            total_nodes: self.nodes.len(),
            relay_nodes: self.relay_nodes.len(),
            average_latency_ms,
            strategy: self.strategy,
        }
    }
}

fn relay_rank(a: &PeerNode, b: &PeerNode) -> Ordering {
    b.capabilities
        .bandwidth_mbps
        .total_cmp(&a.capabilities.bandwidth_mbps)
        .then_with(|| a.average_latency().total_cmp(&b.average_latency()))
        .then_with(|| {
            b.capabilities
                .has_stable_connection
                .cmp(&a.capabilities.has_stable_connection)
        })
        .then_with(|| b.capabilities.cpu_score.total_cmp(&a.capabilities.cpu_score))
        .then_with(|| a.peer_id.cmp(&b.peer_id))
}
