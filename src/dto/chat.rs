use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use utoipa::{IntoParams, ToSchema};

use crate::{
    dao::models::UserId,
    identity::Role,
};

/// Query string of the chat WebSocket endpoint.
#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ChatRoomQuery {
    /// Room to join.
    pub room: i64,
}

/// A user currently connected to a room.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OnlineUser {
    pub id: UserId,
    pub name: String,
    pub role: Role,
    #[serde(with = "time::serde::rfc3339")]
    pub last_seen: OffsetDateTime,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OnlineUsersResponse {
    pub users: Vec<OnlineUser>,
    pub count: usize,
}

impl From<Vec<OnlineUser>> for OnlineUsersResponse {
    fn from(users: Vec<OnlineUser>) -> Self {
        Self {
            count: users.len(),
            users,
        }
    }
}

/// Stored chat message as returned by the history endpoint.
#[derive(Debug, Clone, Serialize, ToSchema, PartialEq, Eq)]
pub struct ChatMessageView {
    pub id: u64,
    pub sender_id: UserId,
    pub name: String,
    pub room_id: i64,
    pub content: String,
    #[serde(with = "time::serde::rfc3339")]
    pub sent_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub edited_at: Option<OffsetDateTime>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ChatHistoryResponse {
    /// Newest first.
    pub history: Vec<ChatMessageView>,
}
