use axum::{
    Json, Router,
    extract::{Path, Query, State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};

use crate::{
    dto::chat::{ChatHistoryResponse, ChatRoomQuery, OnlineUsersResponse},
    error::AppError,
    identity::Identity,
    services::{chat_service, websocket_service},
    state::SharedState,
};

/// Chat rooms: the live endpoint plus presence and history reads.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/chat", get(chat_socket))
        .route("/chat/rooms/{room}/online", get(online_users))
        .route("/chat/rooms/{room}/history", get(history))
}

/// Upgrade into a chat session for `room`.
#[utoipa::path(
    get,
    path = "/chat",
    tag = "chat",
    params(ChatRoomQuery),
    responses(
        (status = 101, description = "Switching protocols to WebSocket"),
        (status = 401, description = "Chat requires an authenticated user")
    )
)]
pub async fn chat_socket(
    State(state): State<SharedState>,
    Query(query): Query<ChatRoomQuery>,
    identity: Identity,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, AppError> {
    if identity.is_guest() {
        return Err(AppError::Unauthorized("login required to chat".into()));
    }
    let hub = state.chat_hub().handle();
    let settings = state.chat_hub().settings().clone();
    Ok(ws.on_upgrade(move |socket| {
        websocket_service::handle_socket(hub, settings, socket, identity, query.room)
    }))
}

/// Distinct users currently connected to a room.
#[utoipa::path(
    get,
    path = "/chat/rooms/{room}/online",
    tag = "chat",
    params(("room" = i64, Path, description = "Room identifier")),
    responses((status = 200, description = "Connected users", body = OnlineUsersResponse))
)]
pub async fn online_users(
    State(state): State<SharedState>,
    Path(room): Path<i64>,
) -> Json<OnlineUsersResponse> {
    Json(chat_service::online_users(&state, room).await)
}

/// Latest messages of a room, newest first.
#[utoipa::path(
    get,
    path = "/chat/rooms/{room}/history",
    tag = "chat",
    params(("room" = i64, Path, description = "Room identifier")),
    responses((status = 200, description = "Recent messages", body = ChatHistoryResponse))
)]
pub async fn history(
    State(state): State<SharedState>,
    Path(room): Path<i64>,
) -> Json<ChatHistoryResponse> {
    Json(chat_service::history(&state, room).await)
}
