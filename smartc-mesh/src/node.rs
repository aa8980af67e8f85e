//! Mesh view of a session member

use serde::{Deserialize, Serialize};
use smartc_core::{ConnectionId, SessionId};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Self-reported peer capabilities used for relay election
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerCapabilities {
    /// Peer opted in to forwarding broadcasts for others
    pub can_relay: bool,
    pub has_stable_connection: bool,
    /// Estimated upstream bandwidth
    pub bandwidth_mbps: f64,
    /// Relative CPU headroom, 1.0 is a typical client
    pub cpu_score: f64,
}

impl Default for PeerCapabilities {
    fn default() -> Self {
        Self {
            can_relay: false,
            has_stable_connection: true,
            bandwidth_mbps: 10.0,
            cpu_score: 1.0,
        }
    }
}

impl PeerCapabilities {
    #[must_use]
    pub fn relay_capable() -> Self {
        Self {
            can_relay: true,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct PeerNode {
    pub peer_id: ConnectionId,
    pub session_id: SessionId,
    pub capabilities: PeerCapabilities,
    /// Measured latency to other peers in milliseconds, last write wins
    pub latencies: HashMap<ConnectionId, u32>,
    pub is_relay: bool,
    pub last_seen: Instant,
}

impl PeerNode {
    pub fn new(peer_id: ConnectionId, session_id: SessionId, capabilities: PeerCapabilities) -> Self {
        Self {
            peer_id,
            session_id,
            capabilities,
            latencies: HashMap::new(),
            is_relay: false,
            last_seen: Instant::now(),
        }
    }

    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    #[must_use]
    pub fn is_stale(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }

    pub fn update_latency(&mut self, target: ConnectionId, latency_ms: u32) {
        self.latencies.insert(target, latency_ms);
    }

    /// Latency to `target`, `u32::MAX` when never measured
    #[must_use]
    pub fn latency_to(&self, target: &ConnectionId) -> u32 {
        self.latencies.get(target).copied().unwrap_or(u32::MAX)
    }

    /// Mean over all measured peers, 0.0 when nothing was measured
    #[must_use]
    pub fn average_latency(&self) -> f64 {
        if self.latencies.is_empty() {
            return 0.0;
        }
        let total: u64 = self.latencies.values().map(|&ms| u64::from(ms)).sum();
        total as f64 / self.latencies.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str) -> PeerNode {
        PeerNode::new(id.into(), "s".into(), PeerCapabilities::default())
    }

    #[test]
    fn test_default_capabilities() {
        let caps = PeerCapabilities::default();
        assert!(!caps.can_relay);
        assert!(caps.has_stable_connection);
        assert!((caps.bandwidth_mbps - 10.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_latency_last_write_wins() {
        let mut peer = node("a");
        peer.update_latency("b".into(), 80);
        peer.update_latency("b".into(), 20);
        assert_eq!(peer.latency_to(&"b".into()), 20);
        assert_eq!(peer.latency_to(&"c".into()), u32::MAX);
    }

    #[test]
    fn test_average_latency() {
        let mut peer = node("a");
        assert!(peer.average_latency().abs() < f64::EPSILON);
        peer.update_latency("b".into(), 10);
        peer.update_latency("c".into(), 30);
        assert!((peer.average_latency() - 20.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_staleness() {
        let mut peer = node("a");
        assert!(!peer.is_stale(Duration::from_secs(60)));
        std::thread::sleep(Duration::from_millis(20));
        assert!(peer.is_stale(Duration::from_millis(10)));
        peer.touch();
        assert!(!peer.is_stale(Duration::from_secs(10)));
    }
}
