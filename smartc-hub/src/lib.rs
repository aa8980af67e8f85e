//! Signaling hub: connection registry, session directory and message
//! routing for WebRTC peers.
//!
//! The hub never inspects signal payloads. It relays them between
//! connections of the same session, directly while the session is small and
//! through the relay nodes elected by the adaptive mesh once it grows.

pub mod dispatch;
pub mod hub;
pub mod pool;
pub mod service;
pub mod session;
pub mod stats;
pub mod wire;

pub use dispatch::DispatchTable;
pub use hub::{ConnectionGuard, SignalingHub};
pub use pool::{ConnectionPool, ConnectionRecord, Outbound, PoolStats, ReleasedRecord};
pub use service::SignalingService;
pub use session::{SessionDirectory, SessionStats};
pub use stats::GlobalStats;
pub use wire::{ClientRequest, Op, ServerEvent, WireCodec};
