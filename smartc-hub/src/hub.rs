//! Signaling hub
//!
//! Ties the connection registry, the session directory and the adaptive mesh
//! together behind [`SignalingService`]. Every operation is synchronous: state
//! lives in concurrent maps and delivery only queues onto per-connection
//! channels, so nothing here waits on another client.

use bytes::Bytes;
use parking_lot::Mutex;
use smartc_core::config::{Config, HubConfig};
use smartc_core::{ConnectionId, Error, Result, SessionId};
use smartc_mesh::{
    AdaptiveMesh, PeerCapabilities, RoutingPath, RoutingStrategy, TopologyStats,
};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::pool::{ConnectionPool, Outbound};
use crate::service::SignalingService;
use crate::session::{SessionDirectory, SessionStats};
use crate::stats::GlobalStats;
use crate::wire::{server_event::Kind, PeerNotice, ServerEvent, Signal};

pub struct SignalingHub {
    config: HubConfig,
    /// Member count at which broadcasts go through relays
    relay_threshold: usize,
    pool: ConnectionPool,
    sessions: SessionDirectory,
    mesh: AdaptiveMesh,
    cancel_token: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SignalingHub {
    #[must_use]
    pub fn new(config: &Config) -> Self {
        let hub = &config.hub;
        info!(
            pool_capacity = hub.pool_capacity,
            max_connections = hub.max_connections,
            max_sessions = hub.max_sessions,
            inactivity_timeout_secs = hub.inactivity_timeout_secs,
            "Signaling hub initialized"
        );
        Self {
            config: hub.clone(),
            relay_threshold: config.mesh.relay_threshold,
            pool: ConnectionPool::new(hub.pool_capacity, hub.max_connections),
            sessions: SessionDirectory::new(hub.max_sessions, hub.max_peers_per_session),
            mesh: AdaptiveMesh::new(config.mesh.clone()),
            cancel_token: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Register a connection and get a guard that disconnects it when dropped
    pub fn connect(
        self: &Arc<Self>,
        connection_id: ConnectionId,
        outbound: Outbound,
    ) -> Result<ConnectionGuard> {
        self.on_connect(connection_id.clone(), outbound)?;
        let closed = self.pool.closed(&connection_id);
        Ok(ConnectionGuard {
            hub: Arc::clone(self),
            connection_id,
            closed,
        })
    }

    #[must_use]
    pub const fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    #[must_use]
    pub const fn sessions(&self) -> &SessionDirectory {
        &self.sessions
    }

    #[must_use]
    pub const fn mesh(&self) -> &AdaptiveMesh {
        &self.mesh
    }

    /// Spawn the idle-connection sweep and the mesh maintenance sweep
    pub fn start_background_tasks(self: &Arc<Self>) {
        let hub = Arc::clone(self);
        let connection_sweep = tokio::spawn(async move {
            let mut timer = interval(hub.config.sweep_interval());
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            timer.tick().await;
            loop {
                tokio::select! {
                    () = hub.cancel_token.cancelled() => {
                        debug!("Connection sweep stopped");
                        return;
                    }
                    _ = timer.tick() => {
                        hub.evict_idle();
                    }
                }
            }
        });

        let hub = Arc::clone(self);
        let mesh_sweep = tokio::spawn(async move {
            let mut timer = interval(hub.mesh.config().maintenance_interval());
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            timer.tick().await;
            loop {
                tokio::select! {
                    () = hub.cancel_token.cancelled() => {
                        debug!("Mesh sweep stopped");
                        return;
                    }
                    _ = timer.tick() => {
                        hub.sweep_mesh();
                    }
                }
            }
        });

        self.tasks.lock().extend([connection_sweep, mesh_sweep]);
    }

    /// Disconnect every connection idle for longer than the inactivity timeout
    pub fn evict_idle(&self) -> usize {
        let timeout = self.config.inactivity_timeout();
        let idle = self.pool.idle_connections(timeout);
        for connection_id in &idle {
            info!(
                connection_id = %connection_id,
                timeout_secs = timeout.as_secs(),
                "Evicting idle connection"
            );
            self.on_disconnect(connection_id);
        }
        idle.len()
    }

    /// Remove mesh nodes whose connection is gone; refresh the rest
    pub fn sweep_mesh(&self) -> usize {
        let removed = self
            .mesh
            .sweep_stale(self.mesh.config().stale_timeout(), |id| self.pool.contains(id));
        for removal in &removed {
            if self.sessions.leave(&removal.session_id, &removal.peer_id).is_some() {
                warn!(
                    connection_id = %removal.peer_id,
                    session_id = %removal.session_id,
                    "Stale mesh peer was still a session member"
                );
            }
            self.sync_relays(&removal.session_id);
        }
        removed.len()
    }

    /// Stop background sweeps and release every connection
    pub fn shutdown(&self) {
        self.cancel_token.cancel();
        for connection_id in self.pool.active_ids() {
            self.on_disconnect(&connection_id);
        }
        self.pool.drain();
        self.sessions.clear();
        info!("Signaling hub shut down");
    }

    /// Wait for background tasks after [`shutdown`](Self::shutdown)
    pub async fn join_background_tasks(&self) {
        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Background task ended abnormally");
            }
        }
    }

    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    fn check_payload(&self, payload: &Bytes) -> Result<()> {
        if payload.is_empty() {
            return Err(Error::MalformedPayload("Signal payload is empty".into()));
        }
        if payload.len() > self.config.max_signal_bytes {
            return Err(Error::MalformedPayload(format!(
                "Signal payload is {} bytes, limit is {}",
                payload.len(),
                self.config.max_signal_bytes
            )));
        }
        Ok(())
    }

    fn notify(&self, recipients: impl IntoIterator<Item = ConnectionId>, event: &ServerEvent) -> usize {
        recipients
            .into_iter()
            .filter(|id| self.pool.send(id, event.clone()))
            .count()
    }

    /// Mirror the mesh's relay election into the session record and the
    /// connection records' relay flags.
    ///
    /// The mirror is written while the session's topology is locked, so
    /// concurrent elections are applied in the order the mesh made them.
    fn sync_relays(&self, session_id: &SessionId) {
        let mirrored = self
            .mesh
            .with_relays(session_id, |relays| self.mirror_relays(session_id, relays))
            .unwrap_or_else(|| self.mirror_relays(session_id, &[]));

        if let Err(err) = mirrored {
            error!(
                session_id = %session_id,
                error = %err,
                "Relay list out of sync with membership, rebuilding topology"
            );
            let members: HashSet<ConnectionId> =
                self.sessions.members(session_id).into_iter().collect();
            self.mesh.retain_members(session_id, |id| members.contains(id));
            let rebuilt = self
                .mesh
                .with_relays(session_id, |relays| self.mirror_relays(session_id, relays))
                .unwrap_or_else(|| self.mirror_relays(session_id, &[]));
            if let Err(err) = rebuilt {
                error!(session_id = %session_id, error = %err, "Topology rebuild failed");
            }
        }
    }

    fn mirror_relays(&self, session_id: &SessionId, relays: &[ConnectionId]) -> Result<()> {
        let previous = self.sessions.relay_nodes(session_id);
        let stored = self.sessions.set_relays(session_id, relays.to_vec());

        let current = self.sessions.relay_nodes(session_id);
        for id in previous.iter().filter(|id| !current.contains(id)) {
            if let Some(record) = self.pool.get(id) {
                record.lock().relay_active = false;
            }
        }
        for id in &current {
            if let Some(record) = self.pool.get(id) {
                record.lock().relay_active = true;
            }
        }
        stored
    }

    /// Remove a connection from a session and the mesh, then tell the remaining
    /// members. `username` is used when the record has already been released.
    fn depart(&self, connection_id: &ConnectionId, session_id: &SessionId, username: Option<String>) {
        let Some(outcome) = self.sessions.leave(session_id, connection_id) else {
            debug!(
                connection_id = %connection_id,
                session_id = %session_id,
                "Leave for a session the connection is not in"
            );
            return;
        };

        let username = self
            .pool
            .get(connection_id)
            .map(|record| {
                let mut record = record.lock();
                record.session_id = None;
                record.relay_active = false;
                record.username.clone()
            })
            .or(username)
            .unwrap_or_default();

        if let Some(removal) = self.mesh.remove_peer(connection_id) {
            if removal.session_id != *session_id {
                error!(
                    connection_id = %connection_id,
                    session_id = %session_id,
                    mesh_session_id = %removal.session_id,
                    "Mesh placed connection in a different session"
                );
            }
            self.sync_relays(&removal.session_id);
        }

        info!(
            connection_id = %connection_id,
            session_id = %session_id,
            remaining = outcome.remaining,
            "Connection left session"
        );

        if !outcome.destroyed {
            let event = ServerEvent::new(Kind::UserLeft(PeerNotice {
                username,
                connection_id: connection_id.to_string(),
            }));
            self.notify(self.sessions.members(session_id), &event);
        }
    }

    /// Undo the membership a join created for a connection that disconnected
    /// while joining. No notices go out; the peers never heard of it.
    fn abandon_join(&self, connection_id: &ConnectionId, session_id: &SessionId) {
        self.sessions.leave(session_id, connection_id);
        if let Some(removal) = self.mesh.remove_peer(connection_id) {
            self.sync_relays(&removal.session_id);
        }
        debug!(
            connection_id = %connection_id,
            session_id = %session_id,
            "Connection disconnected while joining"
        );
    }
}

impl SignalingService for SignalingHub {
    fn on_connect(&self, connection_id: ConnectionId, outbound: Outbound) -> Result<()> {
        if self.is_shutdown() {
            return Err(Error::ResourceExhausted("Hub is shutting down".into()));
        }
        self.pool.acquire(connection_id.clone(), outbound)?.commit()?;
        self.pool.send(&connection_id, ServerEvent::welcome(connection_id.as_str()));
        info!(
            connection_id = %connection_id,
            active_connections = self.pool.active_count(),
            "Connection registered"
        );
        Ok(())
    }

    fn on_disconnect(&self, connection_id: &ConnectionId) {
        let Some(released) = self.pool.release(connection_id) else {
            debug!(connection_id = %connection_id, "Disconnect for unknown connection");
            return;
        };

        if let Some(session_id) = &released.session_id {
            self.depart(connection_id, session_id, Some(released.username));
        }
        info!(
            connection_id = %connection_id,
            duration = ?released.connected_for,
            active_connections = self.pool.active_count(),
            "Connection unregistered"
        );
    }

    fn join_session(
        &self,
        connection_id: &ConnectionId,
        session_id: SessionId,
        username: String,
    ) -> Result<()> {
        let Some(record) = self.pool.get(connection_id) else {
            debug!(connection_id = %connection_id, "Join from unknown connection");
            return Ok(());
        };

        let current = record.lock().session_id.clone();
        if let Some(current) = current.filter(|s| s != &session_id) {
            self.depart(connection_id, &current, None);
        }

        let outcome = self.sessions.join(&session_id, connection_id)?;
        let relay_eligible = {
            let mut record = record.lock();
            record.session_id = Some(session_id.clone());
            record.username.clear();
            record.username.push_str(&username);
            record.touch();
            record.relay_eligible
        };

        if outcome.rejoined {
            self.mesh.touch(connection_id);
            debug!(
                connection_id = %connection_id,
                session_id = %session_id,
                "Connection rejoined session"
            );
            return Ok(());
        }

        let capabilities = PeerCapabilities {
            can_relay: relay_eligible,
            ..Default::default()
        };
        self.mesh
            .add_peer(connection_id.clone(), session_id.clone(), capabilities);
        self.sync_relays(&session_id);

        // a disconnect that released the record before this point saw no session
        if !self.pool.contains(connection_id) {
            self.abandon_join(connection_id, &session_id);
            return Ok(());
        }

        let event = ServerEvent::new(Kind::UserJoined(PeerNotice {
            username,
            connection_id: connection_id.to_string(),
        }));
        let others = self
            .sessions
            .members(&session_id)
            .into_iter()
            .filter(|id| id != connection_id);
        self.notify(others, &event);

        info!(
            connection_id = %connection_id,
            session_id = %session_id,
            member_count = outcome.member_count,
            created = outcome.created,
            "Connection joined session"
        );
        Ok(())
    }

    fn leave_session(&self, connection_id: &ConnectionId, session_id: &SessionId) -> Result<()> {
        if !self.pool.touch(connection_id) {
            debug!(connection_id = %connection_id, "Leave from unknown connection");
            return Ok(());
        }
        self.depart(connection_id, session_id, None);
        Ok(())
    }

    fn send_signal(
        &self,
        source: &ConnectionId,
        target: &ConnectionId,
        payload: Bytes,
    ) -> Result<usize> {
        self.check_payload(&payload)?;
        if !self.pool.touch(source) {
            debug!(connection_id = %source, "Signal from unknown connection");
            return Ok(0);
        }

        let event = ServerEvent::new(Kind::ReceiveSignal(Signal {
            source_connection_id: source.to_string(),
            payload,
        }));
        Ok(usize::from(self.pool.send(target, event)))
    }

    fn broadcast_signal(
        &self,
        source: &ConnectionId,
        session_id: &SessionId,
        payload: Bytes,
    ) -> Result<usize> {
        self.check_payload(&payload)?;
        if !self.pool.touch(source) {
            debug!(connection_id = %source, "Broadcast from unknown connection");
            return Ok(0);
        }
        let Some(session) = self.sessions.get(session_id) else {
            debug!(session_id = %session_id, "Broadcast to unknown session");
            return Ok(0);
        };
        if !session.contains(source) {
            debug!(
                connection_id = %source,
                session_id = %session_id,
                "Broadcast from a non-member"
            );
            return Ok(0);
        }

        let signal = Signal {
            source_connection_id: source.to_string(),
            payload,
        };

        if session.member_count() >= self.relay_threshold {
            let relays: Vec<ConnectionId> = session
                .relay_nodes()
                .into_iter()
                .filter(|id| id != source)
                .collect();
            if !relays.is_empty() {
                let event = ServerEvent::new(Kind::RelaySignal(signal));
                return Ok(self.notify(relays, &event));
            }
            warn!(
                session_id = %session_id,
                member_count = session.member_count(),
                "No relay nodes elected, delivering broadcast directly"
            );
        }

        let event = ServerEvent::new(Kind::ReceiveSignal(signal));
        let others = session.members().into_iter().filter(|id| id != source);
        Ok(self.notify(others, &event))
    }

    fn heartbeat(&self, connection_id: &ConnectionId) {
        if self.pool.touch(connection_id) {
            self.mesh.touch(connection_id);
        } else {
            debug!(connection_id = %connection_id, "Heartbeat from unknown connection");
        }
    }

    fn set_relay_capability(&self, connection_id: &ConnectionId, can_relay: bool) -> Result<()> {
        let Some(record) = self.pool.get(connection_id) else {
            debug!(connection_id = %connection_id, "Relay capability for unknown connection");
            return Ok(());
        };
        {
            let mut record = record.lock();
            record.relay_eligible = can_relay;
            record.touch();
        }

        if self.mesh.set_relay_capability(connection_id, can_relay).is_some() {
            if let Some(session_id) = self.mesh.session_of(connection_id) {
                self.sync_relays(&session_id);
            }
        }
        debug!(connection_id = %connection_id, can_relay, "Relay capability updated");
        Ok(())
    }

    fn update_peer_latency(
        &self,
        connection_id: &ConnectionId,
        target: ConnectionId,
        latency_ms: u32,
    ) -> Result<()> {
        if !self.pool.touch(connection_id) {
            debug!(connection_id = %connection_id, "Latency report from unknown connection");
            return Ok(());
        }
        self.mesh.update_peer_latency(connection_id, target, latency_ms);
        Ok(())
    }

    fn session_stats(&self, session_id: &SessionId) -> SessionStats {
        self.sessions.stats(session_id).unwrap_or_else(|| SessionStats {
            session_id: session_id.clone(),
            connection_count: 0,
            relay_node_count: 0,
        })
    }

    fn global_stats(&self) -> GlobalStats {
        let pool = self.pool.stats();
        GlobalStats {
            total_connections: pool.active,
            total_sessions: self.sessions.session_count(),
            memory_usage_bytes: pool.memory_usage_bytes,
            pooled_available: pool.available,
            mesh_sessions: self.mesh.session_count(),
            mesh_peers: self.mesh.peer_count(),
        }
    }

    fn routing_path(&self, connection_id: &ConnectionId) -> RoutingPath {
        self.pool.touch(connection_id);
        self.mesh
            .routing_path(connection_id)
            .unwrap_or_else(RoutingPath::empty)
    }

    fn topology_stats(&self, session_id: &SessionId) -> TopologyStats {
        self.mesh
            .topology_stats(session_id)
            .unwrap_or_else(|| TopologyStats {
                session_id: session_id.clone(),
                total_nodes: 0,
                relay_nodes: 0,
                average_latency_ms: 0.0,
                strategy: RoutingStrategy::FullMesh,
            })
    }
}

impl std::fmt::Debug for SignalingHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalingHub")
            .field("pool", &self.pool)
            .field("sessions", &self.sessions.session_count())
            .field("mesh", &self.mesh)
            .finish()
    }
}

/// Registration of one transport connection. Dropping it disconnects.
#[derive(Debug)]
pub struct ConnectionGuard {
    hub: Arc<SignalingHub>,
    connection_id: ConnectionId,
    closed: CancellationToken,
}

impl ConnectionGuard {
    #[must_use]
    pub const fn connection_id(&self) -> &ConnectionId {
        &self.connection_id
    }

    #[must_use]
    pub const fn hub(&self) -> &Arc<SignalingHub> {
        &self.hub
    }

    /// Fires when the hub unregisters this connection (idle eviction,
    /// shutdown). The transport should close its socket then.
    #[must_use]
    pub fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.hub.on_disconnect(&self.connection_id);
    }
}
