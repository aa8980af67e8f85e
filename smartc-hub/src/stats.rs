//! Read-only snapshots and their wire forms

use serde::Serialize;
use smartc_mesh::{RoutingPath, TopologyStats};

use crate::session::SessionStats;
use crate::wire::{GlobalStatsReply, RoutingPathReply, SessionStatsReply, TopologyStatsReply};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GlobalStats {
    pub total_connections: usize,
    pub total_sessions: usize,
    pub memory_usage_bytes: usize,
    /// Free records ready for reuse
    pub pooled_available: usize,
    pub mesh_sessions: usize,
    pub mesh_peers: usize,
}

impl From<SessionStats> for SessionStatsReply {
    fn from(stats: SessionStats) -> Self {
        Self {
            session_id: stats.session_id.into_inner(),
            connection_count: stats.connection_count as u64,
            relay_node_count: stats.relay_node_count as u64,
        }
    }
}

impl From<GlobalStats> for GlobalStatsReply {
    fn from(stats: GlobalStats) -> Self {
        Self {
            total_connections: stats.total_connections as u64,
            total_sessions: stats.total_sessions as u64,
            memory_usage_bytes: stats.memory_usage_bytes as u64,
            pooled_available: stats.pooled_available as u64,
        }
    }
}

impl From<RoutingPath> for RoutingPathReply {
    fn from(path: RoutingPath) -> Self {
        Self {
            strategy: path.strategy.as_str().to_string(),
            direct_peers: path.direct_peers.into_iter().map(|id| id.into_inner()).collect(),
            relay_nodes: path.relay_nodes.into_iter().map(|id| id.into_inner()).collect(),
        }
    }
}

impl From<TopologyStats> for TopologyStatsReply {
    fn from(stats: TopologyStats) -> Self {
        Self {
            session_id: stats.session_id.into_inner(),
            total_nodes: stats.total_nodes as u64,
            relay_nodes: stats.relay_nodes as u64,
            average_latency_ms: stats.average_latency_ms,
            strategy: stats.strategy.as_str().to_string(),
        }
    }
}
