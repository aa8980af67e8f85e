//! Server lifecycle and HTTP surface
//!
//! Serves the JSON stats endpoints and the `/signal` WebSocket endpoint from
//! one axum router, then tears the hub down once the listener has stopped.

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

use smartc_codec::QualityLevel;
use smartc_core::{Config, SessionId};
use smartc_hub::{DispatchTable, GlobalStats, SessionStats, SignalingHub, SignalingService};
use smartc_mesh::TopologyStats;

use crate::websocket;

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<SignalingHub>,
    pub dispatch: Arc<DispatchTable<SignalingHub>>,
    pub config: Arc<Config>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: Config, hub: Arc<SignalingHub>) -> Self {
        Self {
            hub,
            dispatch: Arc::new(DispatchTable::new()),
            config: Arc::new(config),
            started_at: Instant::now(),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(service_info))
        .route("/health", get(health))
        .route("/stats", get(global_stats))
        .route("/stats/{session_id}", get(session_stats))
        .route("/signal", get(websocket::signal_handler))
        .with_state(state)
}

pub struct SignalServer {
    config: Config,
    hub: Arc<SignalingHub>,
}

impl SignalServer {
    pub const fn new(config: Config, hub: Arc<SignalingHub>) -> Self {
        Self { config, hub }
    }

    /// Serve until a shutdown signal arrives, then stop the hub
    pub async fn start(self) -> anyhow::Result<()> {
        let address = self.config.http_address();
        let listener = tokio::net::TcpListener::bind(&address).await?;
        info!("HTTP server listening on {}", address);

        let app = router(AppState::new(self.config, Arc::clone(&self.hub)));
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await;
        if let Err(e) = &result {
            error!("HTTP server error: {}", e);
        }

        info!("Shutting down signal server...");
        self.hub.shutdown();
        self.hub.join_background_tasks().await;
        info!("Signal server stopped");

        result.map_err(Into::into)
    }
}

#[derive(Debug, Serialize)]
pub struct CodecInfo {
    pub default_quality: QualityLevel,
    pub block_size: usize,
    pub quantization: u8,
    pub keyframe_interval: u32,
}

#[derive(Debug, Serialize)]
pub struct ServiceInfo {
    pub service: &'static str,
    pub version: &'static str,
    pub status: &'static str,
    pub codec: CodecInfo,
}

async fn service_info(State(state): State<AppState>) -> Json<ServiceInfo> {
    let quality = state
        .config
        .codec
        .default_quality
        .parse::<QualityLevel>()
        .unwrap_or_default();
    let params = quality.params();
    Json(ServiceInfo {
        service: "SmaRTC",
        version: env!("CARGO_PKG_VERSION"),
        status: if state.hub.is_shutdown() {
            "stopping"
        } else {
            "operational"
        },
        codec: CodecInfo {
            default_quality: quality,
            block_size: params.block_size,
            quantization: params.quantization,
            keyframe_interval: state.config.codec.keyframe_interval,
        },
    })
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "connections": state.hub.pool().active_count(),
    }))
}

async fn global_stats(State(state): State<AppState>) -> Json<GlobalStats> {
    Json(state.hub.global_stats())
}

#[derive(Debug, Serialize)]
pub struct SessionReport {
    pub session: SessionStats,
    pub topology: TopologyStats,
}

async fn session_stats(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Json<SessionReport> {
    let session_id = SessionId::from(session_id);
    Json(SessionReport {
        session: state.hub.session_stats(&session_id),
        topology: state.hub.topology_stats(&session_id),
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C signal");
            }
            Err(e) => {
                error!("Failed to install Ctrl+C handler: {}", e);
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
                info!("Received SIGTERM signal");
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
