//! Adaptive mesh topology manager.
//!
//! Decides per session whether peers connect as a full mesh, a hybrid of
//! direct links and relays, or mostly through elected relay nodes, and keeps
//! the relay election current as membership and capabilities change.

pub mod manager;
pub mod node;
pub mod routing;
pub mod topology;

pub use manager::{AdaptiveMesh, PeerRemoval};
pub use node::{PeerCapabilities, PeerNode};
pub use routing::{RoutingPath, RoutingStrategy, TopologyStats};
pub use topology::{MeshTopology, Recalculation};
