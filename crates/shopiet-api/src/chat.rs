use axum::{
    Extension, Json,
    body::Bytes,
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};

use shopiet_types::RoomName;
use shopiet_types::api::Claims;

use crate::error::ApiResult;
use crate::state::AppState;

/// Messages of a room, oldest first. Fetching marks the caller's unviewed
/// messages in that room as viewed.
pub async fn get_room_history(
    State(state): State<AppState>,
    Path(room_name): Path<String>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Response> {
    let room = RoomName::parse(&room_name)?;
    let body = state.queries.get_room_history(&room, &claims.username).await?;
    Ok(json_body(body))
}

/// One line per conversation partner, newest first, with unseen counts.
pub async fn get_conversations(
    State(state): State<AppState>,
    Path(username): Path<String>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Response> {
    let body = state
        .queries
        .get_conversation_list(&username, &claims.username)
        .await?;
    Ok(json_body(body))
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

// Cached bodies are already JSON; the clone shares the cached buffer.
fn json_body(body: Bytes) -> Response {
    ([(header::CONTENT_TYPE, "application/json")], body).into_response()
}
