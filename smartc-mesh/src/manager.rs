//! Adaptive mesh manager
//!
//! Owns one [`MeshTopology`] per session behind its own mutex, so mutation
//! and relay election of one session never contend with another. A peer
//! index maps each peer to the session it currently belongs to.

use dashmap::DashMap;
use parking_lot::Mutex;
use smartc_core::config::MeshConfig;
use smartc_core::{ConnectionId, SessionId};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::node::PeerCapabilities;
use crate::routing::{RoutingPath, RoutingStrategy, TopologyStats};
use crate::topology::{MeshTopology, Recalculation};

type SharedTopology = Arc<Mutex<MeshTopology>>;

/// Outcome of removing a peer from the mesh
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRemoval {
    pub peer_id: ConnectionId,
    pub session_id: SessionId,
    pub was_relay: bool,
    /// Relays of the session after the removal, empty if it was destroyed
    pub relay_nodes: Vec<ConnectionId>,
}

pub struct AdaptiveMesh {
    config: MeshConfig,
    topologies: DashMap<SessionId, SharedTopology>,
    peers: DashMap<ConnectionId, SessionId>,
}

impl AdaptiveMesh {
    pub fn new(config: MeshConfig) -> Self {
        info!(
            full_mesh_limit = config.full_mesh_limit,
            relay_threshold = config.relay_threshold,
            max_direct_peers = config.max_direct_peers,
            "Adaptive mesh initialized"
        );
        Self {
            config,
            topologies: DashMap::new(),
            peers: DashMap::new(),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &MeshConfig {
        &self.config
    }

    fn topology(&self, session_id: &SessionId) -> Option<SharedTopology> {
        self.topologies.get(session_id).map(|t| Arc::clone(t.value()))
    }

    fn topology_of(&self, peer_id: &ConnectionId) -> Option<SharedTopology> {
        let session_id = self.peers.get(peer_id)?.value().clone();
        self.topology(&session_id)
    }

    /// Add a peer to a session, moving it out of any other session first.
    ///
    /// Adding a peer that is already present refreshes its capabilities.
    /// Returns the session's relays after recomputation.
    pub fn add_peer(
        &self,
        peer_id: ConnectionId,
        session_id: SessionId,
        capabilities: PeerCapabilities,
    ) -> Vec<ConnectionId> {
        let current = self.peers.get(&peer_id).map(|s| s.value().clone());
        if current.as_ref().is_some_and(|s| s != &session_id) {
            self.remove_peer(&peer_id);
        }

        loop {
            // clone out of the shard before locking the topology
            let shared = Arc::clone(
                self.topologies
                    .entry(session_id.clone())
                    .or_insert_with(|| Arc::new(Mutex::new(MeshTopology::new(session_id.clone()))))
                    .value(),
            );

            let mut topology = shared.lock();
            if topology.is_retired() {
                // lost a race with the last peer leaving; the entry is being removed
                drop(topology);
                self.topologies
                    .remove_if(&session_id, |_, t| Arc::ptr_eq(t, &shared));
                continue;
            }

            topology.upsert(peer_id.clone(), capabilities);
            self.peers.insert(peer_id.clone(), session_id.clone());
            let result = topology.recalculate(&self.config);
            self.log_recalculation(&topology, &result);

            debug!(
                peer_id = %peer_id,
                session_id = %session_id,
                node_count = topology.node_count(),
                "Peer added to mesh"
            );
            return topology.relay_nodes().to_vec();
        }
    }

    /// Remove a peer from whatever session it is in.
    ///
    /// Empty topologies are destroyed.
    pub fn remove_peer(&self, peer_id: &ConnectionId) -> Option<PeerRemoval> {
        let Some((_, session_id)) = self.peers.remove(peer_id) else {
            debug!(peer_id = %peer_id, "Peer not found in mesh");
            return None;
        };
        let shared = self.topology(&session_id)?;

        let mut topology = shared.lock();
        let was_relay = topology.remove(peer_id)?;

        let relay_nodes = if topology.is_empty() {
            topology.retire();
            drop(topology);
            self.topologies
                .remove_if(&session_id, |_, t| Arc::ptr_eq(t, &shared));
            info!(session_id = %session_id, "Mesh topology destroyed");
            Vec::new()
        } else {
            let result = topology.recalculate(&self.config);
            self.log_recalculation(&topology, &result);
            topology.relay_nodes().to_vec()
        };

        debug!(peer_id = %peer_id, session_id = %session_id, was_relay, "Peer removed from mesh");
        Some(PeerRemoval {
            peer_id: peer_id.clone(),
            session_id,
            was_relay,
            relay_nodes,
        })
    }

    /// Update a peer's relay opt-in and re-elect. Returns the session's relays,
    /// or `None` for an unknown peer.
    pub fn set_relay_capability(&self, peer_id: &ConnectionId, can_relay: bool) -> Option<Vec<ConnectionId>> {
        let shared = self.topology_of(peer_id)?;
        let mut topology = shared.lock();
        let node = topology.node_mut(peer_id)?;
        node.capabilities.can_relay = can_relay;
        node.touch();

        let result = topology.recalculate(&self.config);
        self.log_recalculation(&topology, &result);
        Some(topology.relay_nodes().to_vec())
    }

    /// Record measured latency from `peer_id` to `target`. Does not re-elect.
    pub fn update_peer_latency(&self, peer_id: &ConnectionId, target: ConnectionId, latency_ms: u32) -> bool {
        let Some(shared) = self.topology_of(peer_id) else {
            return false;
        };
        let mut topology = shared.lock();
        match topology.node_mut(peer_id) {
            Some(node) => {
                node.update_latency(target, latency_ms);
                node.touch();
                true
            }
            None => false,
        }
    }

    /// Routing plan for `source`; refreshes its last-seen time
    pub fn routing_path(&self, source: &ConnectionId) -> Option<RoutingPath> {
        let shared = self.topology_of(source)?;
        let mut topology = shared.lock();
        topology.node_mut(source)?.touch();
        topology.routing_path(source, &self.config)
    }

    /// Run `f` on the session's current relays with the topology locked.
    ///
    /// Anything `f` mirrors is ordered with every election of the session.
    /// `f` must not call back into this mesh for the same session.
    pub fn with_relays<R>(
        &self,
        session_id: &SessionId,
        f: impl FnOnce(&[ConnectionId]) -> R,
    ) -> Option<R> {
        let shared = self.topology(session_id)?;
        let topology = shared.lock();
        if topology.is_retired() {
            return None;
        }
        Some(f(topology.relay_nodes()))
    }

    pub fn recalculate_topology(&self, session_id: &SessionId) -> Option<Vec<ConnectionId>> {
        let shared = self.topology(session_id)?;
        let mut topology = shared.lock();
        let result = topology.recalculate(&self.config);
        self.log_recalculation(&topology, &result);
        Some(topology.relay_nodes().to_vec())
    }

    /// Drop nodes for which `keep` is false and re-elect.
    ///
    /// Used to rebuild a session's topology from authoritative membership.
    pub fn retain_members(
        &self,
        session_id: &SessionId,
        keep: impl Fn(&ConnectionId) -> bool,
    ) -> Option<Vec<ConnectionId>> {
        let shared = self.topology(session_id)?;
        let mut topology = shared.lock();

        let dropped: Vec<ConnectionId> = topology
            .nodes()
            .map(|node| node.peer_id.clone())
            .filter(|id| !keep(id))
            .collect();
        for peer_id in &dropped {
            topology.remove(peer_id);
            self.peers.remove_if(peer_id, |_, s| s == session_id);
        }

        if topology.is_empty() {
            topology.retire();
            drop(topology);
            self.topologies
                .remove_if(session_id, |_, t| Arc::ptr_eq(t, &shared));
            return Some(Vec::new());
        }

        let result = topology.recalculate(&self.config);
        self.log_recalculation(&topology, &result);
        info!(
            session_id = %session_id,
            dropped = dropped.len(),
            relay_count = topology.relay_nodes().len(),
            "Mesh topology rebuilt from membership"
        );
        Some(topology.relay_nodes().to_vec())
    }

    /// Refresh a peer's last-seen time
    pub fn touch(&self, peer_id: &ConnectionId) -> bool {
        let Some(shared) = self.topology_of(peer_id) else {
            return false;
        };
        let mut topology = shared.lock();
        topology.node_mut(peer_id).map(|node| node.touch()).is_some()
    }

    /// Peers not seen within `timeout`, across all sessions
    pub fn stale_peers(&self, timeout: Duration) -> Vec<ConnectionId> {
        let topologies: Vec<SharedTopology> =
            self.topologies.iter().map(|t| Arc::clone(t.value())).collect();

        topologies
            .iter()
            .flat_map(|shared| {
                let topology = shared.lock();
                topology
                    .nodes()
                    .filter(|node| node.is_stale(timeout))
                    .map(|node| node.peer_id.clone())
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// One maintenance pass: stale peers for which `is_alive` holds are
    /// refreshed, the rest are removed.
    pub fn sweep_stale(&self, timeout: Duration, is_alive: impl Fn(&ConnectionId) -> bool) -> Vec<PeerRemoval> {
        let mut removed = Vec::new();
        for peer_id in self.stale_peers(timeout) {
            if is_alive(&peer_id) {
                self.touch(&peer_id);
            } else if let Some(removal) = self.remove_peer(&peer_id) {
                info!(
                    peer_id = %peer_id,
                    session_id = %removal.session_id,
                    "Removed stale peer from mesh"
                );
                removed.push(removal);
            }
        }
        removed
    }

    #[must_use]
    pub fn topology_stats(&self, session_id: &SessionId) -> Option<TopologyStats> {
        self.topology(session_id).map(|shared| shared.lock().stats())
    }

    #[must_use]
    pub fn relay_nodes(&self, session_id: &SessionId) -> Vec<ConnectionId> {
        self.topology(session_id)
            .map(|shared| shared.lock().relay_nodes().to_vec())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn strategy(&self, session_id: &SessionId) -> Option<RoutingStrategy> {
        self.topology(session_id).map(|shared| shared.lock().strategy())
    }

    #[must_use]
    pub fn session_of(&self, peer_id: &ConnectionId) -> Option<SessionId> {
        self.peers.get(peer_id).map(|s| s.value().clone())
    }

    #[must_use]
    pub fn session_count(&self) -> usize {
        self.topologies.len()
    }

    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    fn log_recalculation(&self, topology: &MeshTopology, result: &Recalculation) {
        if result.strategy_changed() {
            info!(
                session_id = %topology.session_id(),
                from = %result.previous_strategy,
                to = %result.strategy,
                node_count = topology.node_count(),
                "Routing strategy changed"
            );
        }
        if result.relays_changed {
            info!(
                session_id = %topology.session_id(),
                relay_count = topology.relay_nodes().len(),
                "Relay nodes re-elected"
            );
        }
    }
}

impl std::fmt::Debug for AdaptiveMesh {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdaptiveMesh")
            .field("sessions", &self.topologies.len())
            .field("peers", &self.peers.len())
            .finish()
    }
}
