//! Local admin API.
//!
//! # Data Flow
//! ```text
//! HTTP request
//!     → TraceLayer
//!     → auth.rs (Bearer key from the live KeeperConfig)
//!     → handlers.rs → CommandGate → JSON response
//! ```
//!
//! # Design Decisions
//! - The API key is read from the shared config on every request, so a
//!   rotated key takes effect on hot reload
//! - Bound to loopback by default; there is no TLS

pub mod auth;
pub mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;

use arc_swap::ArcSwap;
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::commands::CommandGate;
use crate::config::KeeperConfig;
use crate::resilience::RestartSupervisor;
use self::auth::admin_auth_middleware;
use self::handlers::*;

/// Shared handler state.
#[derive(Clone)]
pub struct AdminState {
    pub gate: Arc<CommandGate>,
    pub config: Arc<ArcSwap<KeeperConfig>>,
    pub restarter: Option<Arc<RestartSupervisor>>,
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/v1/status", get(get_status))
        .route("/v1/config", get(get_config).put(put_config))
        .route("/v1/start", post(start_proxy))
        .route("/v1/stop", post(stop_proxy))
        .route("/v1/check-address", post(check_address))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the admin API until `cancel` fires.
pub async fn serve(addr: SocketAddr, state: AdminState, cancel: CancellationToken) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(address = %addr, "Admin API listening");

    axum::serve(listener, setup_admin_router(state))
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
}
