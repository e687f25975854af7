use axum::{
    extract::{Path, Query, State, WebSocketUpgrade},
    http::HeaderMap,
    response::Response,
};
use serde::Deserialize;
use tracing::warn;

use shopiet_gateway::{Session, connection};
use shopiet_types::RoomName;

use crate::error::{ApiError, ApiResult};
use crate::middleware::{bearer_token, verify_token};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SocketQuery {
    /// Browsers cannot set headers on a WebSocket handshake, so the token
    /// may come as `?token=` instead of `Authorization: Bearer`.
    pub token: Option<String>,
}

/// Authenticate and authorize at the HTTP upgrade; the socket only exists
/// for a participant of a well-formed room.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Path(room_name): Path<String>,
    Query(query): Query<SocketQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> ApiResult<Response> {
    let room = RoomName::parse(&room_name)?;

    let token = query
        .token
        .as_deref()
        .or_else(|| bearer_token(&headers))
        .ok_or_else(|| ApiError::unauthorized("missing token"))?;
    let claims = verify_token(&state.jwt_secret, token)?;

    let session = Session::connect(
        room,
        claims.username,
        state.registry.clone(),
        state.store.clone(),
    )
    .inspect_err(|e| warn!("Socket upgrade for room {} refused: {}", room_name, e))?;

    Ok(ws.on_upgrade(move |socket| connection::handle_connection(socket, session)))
}
