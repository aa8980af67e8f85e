//! Shared building blocks for the SmaRTC signaling backend: identifiers,
//! configuration, logging setup and the common error type.

pub mod config;
pub mod error;
pub mod ids;
pub mod logging;

pub use config::Config;
pub use error::{Error, Result};
pub use ids::{ConnectionId, SessionId};
