use bytes::Bytes;
use smartc_core::{ConnectionId, Result, SessionId};
use smartc_mesh::{RoutingPath, TopologyStats};

use crate::pool::Outbound;
use crate::session::SessionStats;
use crate::stats::GlobalStats;

/// Operation surface of the signaling hub.
///
/// Operations that name an unknown connection or session are neutral: they
/// log at debug level and return `Ok` or an empty snapshot, since such calls
/// routinely race with disconnects. Errors are reserved for malformed input
/// and exhausted capacity.
pub trait SignalingService: Send + Sync {
    /// Register a transport connection and its outbound queue
    fn on_connect(&self, connection_id: ConnectionId, outbound: Outbound) -> Result<()>;

    /// Leave any joined session and return the connection's record to the pool
    fn on_disconnect(&self, connection_id: &ConnectionId);

    /// Join `session_id`, leaving any other session first. Joining the same
    /// session again only updates the username and refreshes activity.
    fn join_session(
        &self,
        connection_id: &ConnectionId,
        session_id: SessionId,
        username: String,
    ) -> Result<()>;

    fn leave_session(&self, connection_id: &ConnectionId, session_id: &SessionId) -> Result<()>;

    /// Unicast an opaque payload. Returns how many connections it was queued for (0 or 1).
    fn send_signal(
        &self,
        source: &ConnectionId,
        target: &ConnectionId,
        payload: Bytes,
    ) -> Result<usize>;

    /// Deliver to every other member, or to the elected relays once the
    /// session reaches the relay threshold.
    fn broadcast_signal(
        &self,
        source: &ConnectionId,
        session_id: &SessionId,
        payload: Bytes,
    ) -> Result<usize>;

    fn heartbeat(&self, connection_id: &ConnectionId);

    fn set_relay_capability(&self, connection_id: &ConnectionId, can_relay: bool) -> Result<()>;

    fn update_peer_latency(
        &self,
        connection_id: &ConnectionId,
        target: ConnectionId,
        latency_ms: u32,
    ) -> Result<()>;

    fn session_stats(&self, session_id: &SessionId) -> SessionStats;

    fn global_stats(&self) -> GlobalStats;

    fn routing_path(&self, connection_id: &ConnectionId) -> RoutingPath;

    fn topology_stats(&self, session_id: &SessionId) -> TopologyStats;
}
