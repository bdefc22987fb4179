//! Authoritative sporefall game server library.

pub mod client;
pub mod config;
pub mod db;
pub mod hub;
pub mod objects;
pub mod states;

pub use config::Config;
pub use hub::Hub;

use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use std::sync::Arc;

/// Build the HTTP application: a single `/ws` upgrade endpoint. Any origin
/// is accepted; one session per stream.
pub fn router(hub: Arc<Hub>) -> Router {
    Router::new().route("/ws", get(ws_handler)).with_state(hub)
}

async fn ws_handler(ws: WebSocketUpgrade, State(hub): State<Arc<Hub>>) -> Response {
    ws.on_upgrade(move |socket| async move { hub.serve(socket).await })
}
