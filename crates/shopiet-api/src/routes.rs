use axum::{Router, middleware, routing::get};

use crate::chat;
use crate::middleware::require_auth;
use crate::state::AppState;
use crate::ws;

pub fn router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route("/api/chat/{room_name}", get(chat::get_room_history))
        .route("/api/conversations/{username}", get(chat::get_conversations))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state.clone());

    // Existing clients connect with a trailing slash.
    let ws_routes = Router::new()
        .route("/ws/socket-server/{room_name}", get(ws::ws_upgrade))
        .route("/ws/socket-server/{room_name}/", get(ws::ws_upgrade))
        .with_state(state);

    Router::new()
        .route("/health", get(chat::health))
        .merge(protected_routes)
        .merge(ws_routes)
}
