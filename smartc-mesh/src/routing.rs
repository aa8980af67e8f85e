use serde::{Deserialize, Serialize};
use smartc_core::config::MeshConfig;
use smartc_core::{ConnectionId, SessionId};
use std::fmt;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingStrategy {
    /// Every peer connects directly to every other peer
    #[default]
    FullMesh,
    /// A few nearest direct links plus a handful of relays
    Hybrid,
    /// Mostly through elected relays
    RelayBased,
}

impl RoutingStrategy {
    /// Strategy for a session of `node_count` peers
    #[must_use]
    pub const fn for_size(node_count: usize, config: &MeshConfig) -> Self {
        if node_count <= config.full_mesh_limit {
            Self::FullMesh
        } else if node_count <= config.relay_threshold {
            Self::Hybrid
        } else {
            Self::RelayBased
        }
    }

    /// Number of relays to elect before capping by eligible candidates
    #[must_use]
    pub fn relay_target(self, node_count: usize, config: &MeshConfig) -> usize {
        match self {
            Self::FullMesh => 0,
            Self::Hybrid => ceil_ratio(node_count, config.hybrid_relay_ratio),
            Self::RelayBased => ceil_ratio(node_count, config.relay_ratio).max(config.min_relays),
        }
    }

    /// Direct peers handed out in a routing path
    #[must_use]
    pub const fn direct_peer_limit(self, config: &MeshConfig) -> usize {
        match self {
            Self::FullMesh => config.max_direct_peers,
            Self::Hybrid => config.max_direct_peers / 2,
            Self::RelayBased => config.relay_based_direct_peers,
        }
    }

    #[must_use]
    pub const fn relay_limit(self, config: &MeshConfig) -> usize {
        match self {
            Self::FullMesh => 0,
            Self::Hybrid | Self::RelayBased => config.max_routed_relays,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FullMesh => "full_mesh",
            Self::Hybrid => "hybrid",
            Self::RelayBased => "relay_based",
        }
    }
}

impl fmt::Display for RoutingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `ceil(count * ratio)`, tolerant of binary rounding in the ratio
fn ceil_ratio(count: usize, ratio: f64) -> usize {
    let scaled = count as f64 * ratio;
    (scaled - 1e-9).ceil().max(0.0) as usize
}

/// Where a peer should send its traffic
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingPath {
    pub strategy: RoutingStrategy,
    /// Nearest peers first
    pub direct_peers: Vec<ConnectionId>,
    pub relay_nodes: Vec<ConnectionId>,
}

impl RoutingPath {
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopologyStats {
    pub session_id: SessionId,
    pub total_nodes: usize,
    pub relay_nodes: usize,
    /// Mean of per-node average latencies, ignoring nodes with no measurements
    pub average_latency_ms: f64,
    pub strategy: RoutingStrategy,
}
