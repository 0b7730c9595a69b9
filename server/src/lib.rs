//! Match relay server.
//!
//! A host connects to `/sock` and receives a four-digit match id. A client
//! connects to `/sock?mid=<id>`; both then get `MatchStart` and every message
//! either peer sends is forwarded verbatim to the other until one side drops.
//!
//! - `ws`: admission checks and the websocket upgrade.
//! - `match_manager`: registry, session counter, dispatcher and the
//!   per-match relay task.
//! - `connection`: the message channel a session reads and writes.

use axum::{extract::State, routing::get, Json, Router};
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::{services::ServeDir, trace::TraceLayer};

pub mod config;
pub mod connection;
pub mod match_manager;
pub mod ws;

pub use match_manager::{AppState, MatchSettings, MatchStats};

pub fn router(state: Arc<AppState>, static_dir: Option<&Path>) -> Router {
    let router = Router::new()
        .route("/sock", get(ws::sock_handler))
        .route("/stats", get(stats_handler))
        .with_state(state);
    let router = match static_dir {
        Some(dir) => router.fallback_service(ServeDir::new(dir)),
        None => router,
    };
    router.layer(TraceLayer::new_for_http())
}

pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    static_dir: Option<&Path>,
) -> std::io::Result<()> {
    axum::serve(listener, router(state, static_dir)).await
}

async fn stats_handler(State(state): State<Arc<AppState>>) -> Json<MatchStats> {
    Json(state.stats())
}
