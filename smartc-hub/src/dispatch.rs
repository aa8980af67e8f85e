//! Request dispatch
//!
//! Maps the `op` tag of a decoded [`ClientRequest`] to a handler through a
//! fixed table indexed by tag. Handlers return the direct reply, if the
//! operation has one; everything else reaches clients through their
//! outbound queues.

use smartc_core::{ConnectionId, Error, Result, SessionId};
use tracing::debug;

use crate::service::SignalingService;
use crate::wire::{server_event::Kind, ClientRequest, Op, ServerEvent, WireCodec};

type Handler<H> = fn(&H, &ConnectionId, ClientRequest) -> Result<Option<ServerEvent>>;

pub struct DispatchTable<H: SignalingService> {
    handlers: [Option<Handler<H>>; Op::TABLE_SIZE],
}

impl<H: SignalingService> Default for DispatchTable<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: SignalingService> DispatchTable<H> {
    #[must_use]
    pub fn new() -> Self {
        let mut handlers: [Option<Handler<H>>; Op::TABLE_SIZE] = [None; Op::TABLE_SIZE];
        for op in Op::ALL {
            let handler: Handler<H> = match op {
                Op::JoinSession => join_session::<H>,
                Op::LeaveSession => leave_session::<H>,
                Op::SendSignal => send_signal::<H>,
                Op::BroadcastSignal => broadcast_signal::<H>,
                Op::Heartbeat => heartbeat::<H>,
                Op::SetRelayCapability => set_relay_capability::<H>,
                Op::UpdatePeerLatency => update_peer_latency::<H>,
                Op::GetSessionStats => session_stats::<H>,
                Op::GetGlobalStats => global_stats::<H>,
                Op::GetRoutingPath => routing_path::<H>,
                Op::GetTopologyStats => topology_stats::<H>,
            };
            handlers[op.tag() as usize] = Some(handler);
        }
        Self { handlers }
    }

    /// Run one request. Returns the event to send back to the caller, if any.
    ///
    /// Failures become a `Rejected` event carrying the request id. Unknown
    /// ids are neutral and produce no reply.
    pub fn dispatch(
        &self,
        hub: &H,
        connection_id: &ConnectionId,
        request: ClientRequest,
    ) -> Option<ServerEvent> {
        let request_id = request.request_id;
        let Some(handler) = self
            .handlers
            .get(request.op as usize)
            .copied()
            .flatten()
        else {
            debug!(connection_id = %connection_id, op = request.op, "Unknown operation");
            let err = Error::MalformedPayload(format!("Unknown operation {}", request.op));
            return Some(ServerEvent::rejected(request_id, &err));
        };

        match handler(hub, connection_id, request) {
            Ok(reply) => reply.map(|event| event.with_request_id(request_id)),
            Err(e) if e.is_not_found() => {
                debug!(connection_id = %connection_id, error = %e, "Request for unknown id");
                None
            }
            Err(e) => {
                debug!(connection_id = %connection_id, error = %e, "Request rejected");
                Some(ServerEvent::rejected(request_id, &e))
            }
        }
    }

    /// Decode a binary frame and dispatch it
    pub fn dispatch_frame(
        &self,
        hub: &H,
        connection_id: &ConnectionId,
        frame: &[u8],
    ) -> Option<ServerEvent> {
        match WireCodec::decode_request(frame) {
            Ok(request) => self.dispatch(hub, connection_id, request),
            Err(e) => {
                debug!(connection_id = %connection_id, error = %e, "Undecodable frame");
                Some(ServerEvent::rejected(0, &e))
            }
        }
    }
}

impl<H: SignalingService> std::fmt::Debug for DispatchTable<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchTable")
            .field("handlers", &self.handlers.iter().flatten().count())
            .finish()
    }
}

fn required_session(request: &mut ClientRequest) -> Result<SessionId> {
    if request.session_id.is_empty() {
        return Err(Error::MalformedPayload("session_id is required".into()));
    }
    Ok(SessionId::from(std::mem::take(&mut request.session_id)))
}

fn required_target(request: &mut ClientRequest) -> Result<ConnectionId> {
    if request.target_connection_id.is_empty() {
        return Err(Error::MalformedPayload(
            "target_connection_id is required".into(),
        ));
    }
    Ok(ConnectionId::from(std::mem::take(
        &mut request.target_connection_id,
    )))
}

fn join_session<H: SignalingService>(
    hub: &H,
    id: &ConnectionId,
    mut request: ClientRequest,
) -> Result<Option<ServerEvent>> {
    let session_id = required_session(&mut request)?;
    hub.join_session(id, session_id, request.username)?;
    Ok(None)
}

fn leave_session<H: SignalingService>(
    hub: &H,
    id: &ConnectionId,
    mut request: ClientRequest,
) -> Result<Option<ServerEvent>> {
    let session_id = required_session(&mut request)?;
    hub.leave_session(id, &session_id)?;
    Ok(None)
}

fn send_signal<H: SignalingService>(
    hub: &H,
    id: &ConnectionId,
    mut request: ClientRequest,
) -> Result<Option<ServerEvent>> {
    let target = required_target(&mut request)?;
    hub.send_signal(id, &target, request.payload)?;
    Ok(None)
}

fn broadcast_signal<H: SignalingService>(
    hub: &H,
    id: &ConnectionId,
    mut request: ClientRequest,
) -> Result<Option<ServerEvent>> {
    let session_id = required_session(&mut request)?;
    hub.broadcast_signal(id, &session_id, request.payload)?;
    Ok(None)
}

fn heartbeat<H: SignalingService>(
    hub: &H,
    id: &ConnectionId,
    _request: ClientRequest,
) -> Result<Option<ServerEvent>> {
    hub.heartbeat(id);
    Ok(None)
}

fn set_relay_capability<H: SignalingService>(
    hub: &H,
    id: &ConnectionId,
    request: ClientRequest,
) -> Result<Option<ServerEvent>> {
    hub.set_relay_capability(id, request.can_relay)?;
    Ok(None)
}

fn update_peer_latency<H: SignalingService>(
    hub: &H,
    id: &ConnectionId,
    mut request: ClientRequest,
) -> Result<Option<ServerEvent>> {
    let target = required_target(&mut request)?;
    hub.update_peer_latency(id, target, request.latency_ms)?;
    Ok(None)
}

fn session_stats<H: SignalingService>(
    hub: &H,
    _id: &ConnectionId,
    mut request: ClientRequest,
) -> Result<Option<ServerEvent>> {
    let session_id = required_session(&mut request)?;
    let stats = hub.session_stats(&session_id);
    Ok(Some(ServerEvent::new(Kind::SessionStats(stats.into()))))
}

fn global_stats<H: SignalingService>(
    hub: &H,
    _id: &ConnectionId,
    _request: ClientRequest,
) -> Result<Option<ServerEvent>> {
    Ok(Some(ServerEvent::new(Kind::GlobalStats(
        hub.global_stats().into(),
    ))))
}

fn routing_path<H: SignalingService>(
    hub: &H,
    id: &ConnectionId,
    _request: ClientRequest,
) -> Result<Option<ServerEvent>> {
    Ok(Some(ServerEvent::new(Kind::RoutingPath(
        hub.routing_path(id).into(),
    ))))
}

fn topology_stats<H: SignalingService>(
    hub: &H,
    _id: &ConnectionId,
    mut request: ClientRequest,
) -> Result<Option<ServerEvent>> {
    let session_id = required_session(&mut request)?;
    Ok(Some(ServerEvent::new(Kind::TopologyStats(
        hub.topology_stats(&session_id).into(),
    ))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::Outbound;
    use crate::session::SessionStats;
    use crate::stats::GlobalStats;
    use bytes::Bytes;
    use parking_lot::Mutex;
    use smartc_mesh::{RoutingPath, RoutingStrategy, TopologyStats};

    /// Records calls instead of doing anything
    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn record(&self, call: impl Into<String>) {
            self.calls.lock().push(call.into());
        }
    }

    impl SignalingService for Recorder {
        fn on_connect(&self, _: ConnectionId, _: Outbound) -> Result<()> {
            Ok(())
        }
        fn on_disconnect(&self, _: &ConnectionId) {}
        fn join_session(&self, id: &ConnectionId, session: SessionId, name: String) -> Result<()> {
            self.record(format!("join {id} {session} {name}"));
            Ok(())
        }
        fn leave_session(&self, id: &ConnectionId, session: &SessionId) -> Result<()> {
            self.record(format!("leave {id} {session}"));
            Ok(())
        }
        fn send_signal(&self, _: &ConnectionId, target: &ConnectionId, payload: Bytes) -> Result<usize> {
            if payload.is_empty() {
                return Err(Error::MalformedPayload("empty".into()));
            }
            self.record(format!("send {target}"));
            Ok(1)
        }
        fn broadcast_signal(&self, _: &ConnectionId, _: &SessionId, _: Bytes) -> Result<usize> {
            Err(Error::NotFound("session".into()))
        }
        fn heartbeat(&self, id: &ConnectionId) {
            self.record(format!("heartbeat {id}"));
        }
        fn set_relay_capability(&self, _: &ConnectionId, can_relay: bool) -> Result<()> {
            self.record(format!("relay {can_relay}"));
            Ok(())
        }
        fn update_peer_latency(&self, _: &ConnectionId, target: ConnectionId, ms: u32) -> Result<()> {
            self.record(format!("latency {target} {ms}"));
            Ok(())
        }
        fn session_stats(&self, session: &SessionId) -> SessionStats {
            SessionStats {
                session_id: session.clone(),
                connection_count: 2,
                relay_node_count: 0,
            }
        }
        fn global_stats(&self) -> GlobalStats {
            GlobalStats::default()
        }
        fn routing_path(&self, _: &ConnectionId) -> RoutingPath {
            RoutingPath::empty()
        }
        fn topology_stats(&self, session: &SessionId) -> TopologyStats {
            TopologyStats {
                session_id: session.clone(),
                total_nodes: 0,
                relay_nodes: 0,
                average_latency_ms: 0.0,
                strategy: RoutingStrategy::FullMesh,
            }
        }
    }

    fn conn() -> ConnectionId {
        ConnectionId::from("c1")
    }

    #[test]
    fn test_join_routes_to_service() {
        let hub = Recorder::default();
        let table = DispatchTable::new();
        let request = ClientRequest::new(Op::JoinSession)
            .with_session("room-1")
            .with_username("alice");

        assert!(table.dispatch(&hub, &conn(), request).is_none());
        assert_eq!(hub.calls.lock().as_slice(), ["join c1 room-1 alice"]);
    }

    #[test]
    fn test_missing_session_is_rejected() {
        let hub = Recorder::default();
        let table = DispatchTable::new();
        let request = ClientRequest::new(Op::JoinSession).with_request_id(7);

        let reply = table.dispatch(&hub, &conn(), request).unwrap();
        assert_eq!(reply.request_id, 7);
        match reply.kind {
            Some(Kind::Rejected(rejected)) => {
                assert_eq!(rejected.request_id, 7);
                assert_eq!(rejected.kind, "malformed_payload");
            }
            other => panic!("unexpected reply {other:?}"),
        }
        assert!(hub.calls.lock().is_empty());
    }

    #[test]
    fn test_unknown_op_is_rejected() {
        let hub = Recorder::default();
        let table = DispatchTable::new();
        let request = ClientRequest {
            op: 99,
            request_id: 3,
            ..Default::default()
        };

        let reply = table.dispatch(&hub, &conn(), request).unwrap();
        assert_eq!(reply.event_type(), "rejected");
        assert_eq!(reply.request_id, 3);

        let zero = ClientRequest::default();
        assert_eq!(
            table.dispatch(&hub, &conn(), zero).unwrap().event_type(),
            "rejected"
        );
    }

    #[test]
    fn test_not_found_is_silent() {
        let hub = Recorder::default();
        let table = DispatchTable::new();
        let request = ClientRequest::new(Op::BroadcastSignal)
            .with_session("room-1")
            .with_payload(Bytes::from_static(b"x"));

        assert!(table.dispatch(&hub, &conn(), request).is_none());
    }

    #[test]
    fn test_stats_reply_carries_request_id() {
        let hub = Recorder::default();
        let table = DispatchTable::new();
        let request = ClientRequest::new(Op::GetSessionStats)
            .with_session("room-1")
            .with_request_id(11);

        let reply = table.dispatch(&hub, &conn(), request).unwrap();
        assert_eq!(reply.request_id, 11);
        match reply.kind {
            Some(Kind::SessionStats(stats)) => {
                assert_eq!(stats.session_id, "room-1");
                assert_eq!(stats.connection_count, 2);
            }
            other => panic!("unexpected reply {other:?}"),
        }
    }

    #[test]
    fn test_signal_requires_target() {
        let hub = Recorder::default();
        let table = DispatchTable::new();
        let request = ClientRequest::new(Op::SendSignal).with_payload(Bytes::from_static(b"sdp"));
        let reply = table.dispatch(&hub, &conn(), request).unwrap();
        assert_eq!(reply.event_type(), "rejected");

        let request = ClientRequest::new(Op::SendSignal)
            .with_target("c2")
            .with_payload(Bytes::from_static(b"sdp"));
        assert!(table.dispatch(&hub, &conn(), request).is_none());
        assert_eq!(hub.calls.lock().as_slice(), ["send c2"]);
    }

    #[test]
    fn test_dispatch_frame_decodes() {
        let hub = Recorder::default();
        let table = DispatchTable::new();
        let frame = WireCodec::encode_request(
            &ClientRequest::new(Op::UpdatePeerLatency)
                .with_target("c2")
                .with_request_id(1),
        );
        let mut request = WireCodec::decode_request(&frame).unwrap();
        request.latency_ms = 42;
        let frame = WireCodec::encode_request(&request);

        assert!(table.dispatch_frame(&hub, &conn(), &frame).is_none());
        assert_eq!(hub.calls.lock().as_slice(), ["latency c2 42"]);

        let reply = table.dispatch_frame(&hub, &conn(), &[0xFF, 0xFF, 0xFF]).unwrap();
        assert_eq!(reply.event_type(), "rejected");
    }
}
