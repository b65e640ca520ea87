//! Connection handlers for the Huddle server.
//!
//! This module admits WebSocket upgrades into the room and hands each
//! connection to its pumps.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::Result;
use axum::{
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use axum_extra::extract::cookie::CookieJar;
use huddle_core::{
    pump, Admission, AdmissionError, CookieSession, Disconnect, DisplayIdentity, Hub, HubHandle,
    PumpConfig,
};
use huddle_transport::websocket::{self, WebSocketConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// How often hub statistics are published as metrics.
const STATS_INTERVAL: Duration = Duration::from_secs(5);

/// Shared server state.
pub struct AppState {
    /// Handle to the room's hub.
    pub hub: HubHandle,
    /// Session admission.
    pub admission: Admission,
    /// Server configuration.
    pub config: Config,
    pump: PumpConfig,
    websocket: WebSocketConfig,
}

impl AppState {
    /// Create new app state, starting the room's hub.
    ///
    /// Must be called inside a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the avatar chain is misconfigured.
    pub fn new(config: Config) -> Result<Self> {
        let admission = Admission::new(Arc::new(CookieSession), config.avatar_chain()?);
        let hub = Hub::spawn(config.hub_config());

        Ok(Self {
            hub,
            admission,
            pump: config.pump_config(),
            websocket: config.websocket_config(),
            config,
        })
    }
}

/// Build the HTTP router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(&state.config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let addr = config.bind_addr()?;
    let state = Arc::new(AppState::new(config)?);
    tokio::spawn(publish_stats(state.hub.clone()));

    let app = router(state.clone());
    let listener = TcpListener::bind(addr).await?;

    info!("Huddle server listening on {}", addr);
    info!(
        "Room endpoint: ws://{}{}",
        addr, state.config.transport.websocket_path
    );
    info!(avatars = ?state.admission.avatars().names(), "Avatar chain");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Huddle server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}

/// Mirror hub statistics into metrics until the hub stops.
async fn publish_stats(hub: HubHandle) {
    let mut interval = tokio::time::interval(STATS_INTERVAL);
    loop {
        interval.tick().await;
        match hub.stats().await {
            Ok(stats) => metrics::record_hub_stats(&stats),
            Err(_) => break,
        }
    }
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.hub.stats().await {
        Ok(stats) => axum::Json(serde_json::json!({
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
            "members": stats.members,
        }))
        .into_response(),
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response(),
    }
}

/// WebSocket upgrade handler. Admission runs before the upgrade.
async fn ws_handler(
    ws: WebSocketUpgrade,
    jar: CookieJar,
    State(state): State<Arc<AppState>>,
) -> Response {
    let session = jar
        .get(&state.config.auth.cookie_name)
        .map(|cookie| cookie.value().to_string());

    let identity = match state.admission.admit(session.as_deref()) {
        Ok(identity) => identity,
        Err(e) => {
            let reason = match e {
                AdmissionError::Unauthenticated => "missing",
                AdmissionError::InvalidSession(_) => "invalid",
            };
            debug!(error = %e, "Upgrade refused");
            metrics::record_admission_denied(reason);
            return (StatusCode::UNAUTHORIZED, e.to_string()).into_response();
        }
    };

    ws.max_message_size(state.config.transport.max_message_size)
        .on_upgrade(move |socket| handle_websocket(socket, state, identity))
}

/// Serve an upgraded connection until both pumps finish.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>, identity: DisplayIdentity) {
    let _metrics_guard = ConnectionMetricsGuard::new();

    let (reader, writer) = websocket::split(socket, &state.websocket);
    match pump::admit(&state.hub, identity, reader, writer, &state.pump).await {
        Ok(pumps) => {
            let member = pumps.member();
            let reason = pumps.wait().await;
            record_disconnect(reason);
            debug!(member = %member, ?reason, "WebSocket disconnected");
        }
        Err(e) => {
            warn!(error = %e, "Room unavailable, dropping connection");
            metrics::record_error("hub");
        }
    }
}

/// Count transport failures. Clean closes, idle drops and hub removals
/// are not errors.
fn record_disconnect(reason: Disconnect) {
    match reason {
        Disconnect::ReadFailed => metrics::record_error("read"),
        Disconnect::WriteFailed => metrics::record_error("write"),
        Disconnect::Closed | Disconnect::Idle | Disconnect::Removed(_) => {}
    }
}
