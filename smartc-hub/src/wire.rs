//! Binary wire messages exchanged with clients.
//!
//! Messages use the protobuf encoding through `prost` derives. Each client
//! frame is one [`ClientRequest`]; each server frame is one [`ServerEvent`].

use bytes::Bytes;
use prost::Message;
use smartc_core::{Error, Result};

/// Client-invocable operations. The discriminant is the `op` field on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Op {
    JoinSession = 1,
    LeaveSession = 2,
    SendSignal = 3,
    BroadcastSignal = 4,
    Heartbeat = 5,
    SetRelayCapability = 6,
    UpdatePeerLatency = 7,
    GetSessionStats = 8,
    GetGlobalStats = 9,
    GetRoutingPath = 10,
    GetTopologyStats = 11,
}

impl Op {
    pub const ALL: [Self; 11] = [
        Self::JoinSession,
        Self::LeaveSession,
        Self::SendSignal,
        Self::BroadcastSignal,
        Self::Heartbeat,
        Self::SetRelayCapability,
        Self::UpdatePeerLatency,
        Self::GetSessionStats,
        Self::GetGlobalStats,
        Self::GetRoutingPath,
        Self::GetTopologyStats,
    ];

    /// One past the largest tag
    pub const TABLE_SIZE: usize = 12;

    #[must_use]
    pub const fn tag(self) -> u32 {
        self as u32
    }

    #[must_use]
    pub fn from_tag(tag: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.tag() == tag)
    }
}

#[derive(Clone, PartialEq, Message)]
pub struct ClientRequest {
    #[prost(uint32, tag = "1")]
    pub op: u32,
    /// Echoed back on replies and rejections
    #[prost(uint32, tag = "2")]
    pub request_id: u32,
    #[prost(string, tag = "3")]
    pub session_id: String,
    #[prost(string, tag = "4")]
    pub username: String,
    #[prost(string, tag = "5")]
    pub target_connection_id: String,
    #[prost(bytes = "bytes", tag = "6")]
    pub payload: Bytes,
    #[prost(bool, tag = "7")]
    pub can_relay: bool,
    #[prost(uint32, tag = "8")]
    pub latency_ms: u32,
}

impl ClientRequest {
    #[must_use]
    pub fn new(op: Op) -> Self {
        Self {
            op: op.tag(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    #[must_use]
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = username.into();
        self
    }

    #[must_use]
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target_connection_id = target.into();
        self
    }

    #[must_use]
    pub fn with_payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = payload.into();
        self
    }

    #[must_use]
    pub fn with_request_id(mut self, request_id: u32) -> Self {
        self.request_id = request_id;
        self
    }
}

/// Peer arrival or departure
#[derive(Clone, PartialEq, Message)]
pub struct PeerNotice {
    #[prost(string, tag = "1")]
    pub username: String,
    #[prost(string, tag = "2")]
    pub connection_id: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct Welcome {
    #[prost(string, tag = "1")]
    pub connection_id: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct Signal {
    #[prost(string, tag = "1")]
    pub source_connection_id: String,
    #[prost(bytes = "bytes", tag = "2")]
    pub payload: Bytes,
}

#[derive(Clone, PartialEq, Message)]
pub struct SessionStatsReply {
    #[prost(string, tag = "1")]
    pub session_id: String,
    #[prost(uint64, tag = "2")]
    pub connection_count: u64,
    #[prost(uint64, tag = "3")]
    pub relay_node_count: u64,
}

#[derive(Clone, PartialEq, Message)]
pub struct GlobalStatsReply {
    #[prost(uint64, tag = "1")]
    pub total_connections: u64,
    #[prost(uint64, tag = "2")]
    pub total_sessions: u64,
    #[prost(uint64, tag = "3")]
    pub memory_usage_bytes: u64,
    #[prost(uint64, tag = "4")]
    pub pooled_available: u64,
}

#[derive(Clone, PartialEq, Message)]
pub struct RoutingPathReply {
    #[prost(string, tag = "1")]
    pub strategy: String,
    #[prost(string, repeated, tag = "2")]
    pub direct_peers: Vec<String>,
    #[prost(string, repeated, tag = "3")]
    pub relay_nodes: Vec<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct TopologyStatsReply {
    #[prost(string, tag = "1")]
    pub session_id: String,
    #[prost(uint64, tag = "2")]
    pub total_nodes: u64,
    #[prost(uint64, tag = "3")]
    pub relay_nodes: u64,
    #[prost(double, tag = "4")]
    pub average_latency_ms: f64,
    #[prost(string, tag = "5")]
    pub strategy: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct Rejected {
    #[prost(uint32, tag = "1")]
    pub request_id: u32,
    #[prost(string, tag = "2")]
    pub kind: String,
    #[prost(string, tag = "3")]
    pub message: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct ServerEvent {
    /// Request this event answers, 0 for unsolicited events
    #[prost(uint32, tag = "1")]
    pub request_id: u32,
    #[prost(oneof = "server_event::Kind", tags = "2, 3, 4, 5, 6, 7, 8, 9, 10, 11")]
    pub kind: Option<server_event::Kind>,
}

pub mod server_event {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Kind {
        #[prost(message, tag = "2")]
        Welcome(super::Welcome),
        #[prost(message, tag = "3")]
        UserJoined(super::PeerNotice),
        #[prost(message, tag = "4")]
        UserLeft(super::PeerNotice),
        #[prost(message, tag = "5")]
        ReceiveSignal(super::Signal),
        #[prost(message, tag = "6")]
        RelaySignal(super::Signal),
        #[prost(message, tag = "7")]
        SessionStats(super::SessionStatsReply),
        #[prost(message, tag = "8")]
        GlobalStats(super::GlobalStatsReply),
        #[prost(message, tag = "9")]
        RoutingPath(super::RoutingPathReply),
        #[prost(message, tag = "10")]
        TopologyStats(super::TopologyStatsReply),
        #[prost(message, tag = "11")]
        Rejected(super::Rejected),
    }
}

impl ServerEvent {
    #[must_use]
    pub fn new(kind: server_event::Kind) -> Self {
        Self {
            request_id: 0,
            kind: Some(kind),
        }
    }

    #[must_use]
    pub fn with_request_id(mut self, request_id: u32) -> Self {
        self.request_id = request_id;
        self
    }

    #[must_use]
    pub fn welcome(connection_id: impl Into<String>) -> Self {
        Self::new(server_event::Kind::Welcome(Welcome {
            connection_id: connection_id.into(),
        }))
    }

    #[must_use]
    pub fn rejected(request_id: u32, error: &Error) -> Self {
        Self::new(server_event::Kind::Rejected(Rejected {
            request_id,
            kind: error.kind().to_string(),
            message: error.to_string(),
        }))
        .with_request_id(request_id)
    }

    /// Short event name for logs
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        use server_event::Kind;
        match &self.kind {
            Some(Kind::Welcome(_)) => "welcome",
            Some(Kind::UserJoined(_)) => "user_joined",
            Some(Kind::UserLeft(_)) => "user_left",
            Some(Kind::ReceiveSignal(_)) => "receive_signal",
            Some(Kind::RelaySignal(_)) => "relay_signal",
            Some(Kind::SessionStats(_)) => "session_stats",
            Some(Kind::GlobalStats(_)) => "global_stats",
            Some(Kind::RoutingPath(_)) => "routing_path",
            Some(Kind::TopologyStats(_)) => "topology_stats",
            Some(Kind::Rejected(_)) => "rejected",
            None => "empty",
        }
    }
}

/// Encode/decode helpers used by transport adapters
pub struct WireCodec;

impl WireCodec {
    pub fn decode_request(data: &[u8]) -> Result<ClientRequest> {
        ClientRequest::decode(data)
            .map_err(|e| Error::MalformedPayload(format!("Failed to decode request: {e}")))
    }

    #[must_use]
    pub fn encode_event(event: &ServerEvent) -> Vec<u8> {
        event.encode_to_vec()
    }

    pub fn decode_event(data: &[u8]) -> Result<ServerEvent> {
        ServerEvent::decode(data)
            .map_err(|e| Error::MalformedPayload(format!("Failed to decode event: {e}")))
    }

    #[must_use]
    pub fn encode_request(request: &ClientRequest) -> Vec<u8> {
        request.encode_to_vec()
    }
}
