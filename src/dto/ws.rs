use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use utoipa::ToSchema;

use crate::{dao::models::UserId, dto::scoreboard::ScoreboardPayload};

/// Kinds a client may send over a live session.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum InboundKind {
    Message,
    Edit,
    Delete,
    Typing,
}

#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
/// Frame accepted from live-session clients.
///
/// Sender, room and timestamp fields are never read from the client; any
/// such keys in the payload are ignored.
pub struct InboundMessage {
    pub event: InboundKind,
    #[serde(default)]
    pub content: String,
    /// Target message for `edit` / `delete`.
    #[serde(default)]
    pub id: Option<u64>,
}

impl InboundMessage {
    pub fn from_json_str(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

/// Kinds emitted by the server.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ServerEventKind {
    Join,
    Leave,
    Message,
    Edit,
    Delete,
    Typing,
    Error,
    Init,
    Update,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
/// Frame pushed to live-session clients. Every field besides `content` and
/// `scoreboard` is filled in by the server.
pub struct ServerMessage {
    pub event: ServerEventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub sender_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub room_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_edited: bool,
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub edited_at: Option<OffsetDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scoreboard: Option<ScoreboardPayload>,
    #[serde(with = "time::serde::rfc3339")]
    pub sent_at: OffsetDateTime,
}

impl ServerMessage {
    pub fn new(event: ServerEventKind, room_id: i64) -> Self {
        Self {
            event,
            id: None,
            sender_id: None,
            name: None,
            room_id,
            content: None,
            is_edited: false,
            edited_at: None,
            scoreboard: None,
            sent_at: OffsetDateTime::now_utc(),
        }
    }

    /// Rejection addressed to a single connection.
    pub fn error(room_id: i64, content: impl Into<String>) -> Self {
        Self::new(ServerEventKind::Error, room_id).with_content(content)
    }

    pub fn from_sender(mut self, sender_id: Option<UserId>, name: impl Into<String>) -> Self {
        self.sender_id = sender_id;
        self.name = Some(name.into());
        self
    }

    pub fn with_id(mut self, id: u64) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_scoreboard(mut self, scoreboard: ScoreboardPayload) -> Self {
        self.scoreboard = Some(scoreboard);
        self
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_supplied_server_fields_are_ignored() {
        let inbound = InboundMessage::from_json_str(
            r#"{"event":"message","content":"hi","sender_id":99,"room_id":7,"sent_at":"x"}"#,
        )
        .unwrap();

        assert_eq!(inbound.event, InboundKind::Message);
        assert_eq!(inbound.content, "hi");
        assert_eq!(inbound.id, None);
    }

    #[test]
    fn unknown_kind_is_rejected() {
        assert!(InboundMessage::from_json_str(r#"{"event":"join"}"#).is_err());
    }

    #[test]
    fn outbound_frame_carries_rfc3339_timestamp() {
        let message = ServerMessage::error(4, "too fast");
        let json: serde_json::Value = serde_json::from_str(&message.to_json().unwrap()).unwrap();

        assert_eq!(json["event"], "error");
        assert_eq!(json["room_id"], 4);
        assert!(json["sender_id"].is_null());
        assert!(json.get("scoreboard").is_none());
        let sent_at = json["sent_at"].as_str().unwrap();
        assert!(OffsetDateTime::parse(sent_at, &time::format_description::well_known::Rfc3339).is_ok());
    }
}
