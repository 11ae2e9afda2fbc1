//! Chat rooms: message log, edit/delete rules and presence listing.

use std::{
    collections::{HashMap, VecDeque, hash_map::Entry},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use futures::future::BoxFuture;
use indexmap::IndexMap;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use tracing::debug;

use crate::{
    dao::models::UserId,
    dto::{
        chat::{ChatHistoryResponse, ChatMessageView, OnlineUser, OnlineUsersResponse},
        ws::{InboundKind, InboundMessage, ServerEventKind, ServerMessage},
    },
    state::{
        SharedState,
        hub::{Connection, Delivery, InboundHandler, Selector},
    },
};

/// Messages returned by the history endpoint.
pub const HISTORY_LIMIT: usize = 50;
/// Messages kept in memory per room; older ones can no longer be edited.
const ROOM_RETENTION: usize = 1_000;
/// Rooms with a kept log. Posting to a new room past this drops the log of
/// the room that has been quiet the longest.
const MAX_ROOMS: usize = 256;

#[derive(Debug, Clone)]
struct StoredMessage {
    id: u64,
    sender_id: UserId,
    name: String,
    room_id: i64,
    content: String,
    sent_at: OffsetDateTime,
    edited_at: Option<OffsetDateTime>,
    deleted_at: Option<OffsetDateTime>,
}

impl StoredMessage {
    fn view(&self) -> ChatMessageView {
        ChatMessageView {
            id: self.id,
            sender_id: self.sender_id,
            name: self.name.clone(),
            room_id: self.room_id,
            content: self.content.clone(),
            sent_at: self.sent_at,
            edited_at: self.edited_at,
        }
    }
}

/// Why an edit or delete was refused.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ChatActionError {
    #[error("message not found")]
    NotFound,
    #[error("message belongs to another user")]
    NotAuthor,
    #[error("edit window has expired")]
    EditWindowExpired,
    #[error("message was deleted")]
    Deleted,
}

/// In-memory message log shared by the chat hub loop and the history route.
///
/// Rooms are ordered from least to most recently posted to.
#[derive(Default)]
pub struct ChatLog {
    next_id: AtomicU64,
    rooms: RwLock<IndexMap<i64, VecDeque<StoredMessage>>>,
}

impl ChatLog {
    async fn append(
        &self,
        room_id: i64,
        sender_id: UserId,
        name: String,
        content: String,
    ) -> StoredMessage {
        let message = StoredMessage {
            id: self.next_id.fetch_add(1, Ordering::Relaxed) + 1,
            sender_id,
            name,
            room_id,
            content,
            sent_at: OffsetDateTime::now_utc(),
            edited_at: None,
            deleted_at: None,
        };

        let mut rooms = self.rooms.write().await;
        let mut room = rooms.shift_remove(&room_id).unwrap_or_default();
        room.push_back(message.clone());
        if room.len() > ROOM_RETENTION {
            room.pop_front();
        }
        rooms.insert(room_id, room);
        if rooms.len() > MAX_ROOMS {
            if let Some((quiet, _)) = rooms.shift_remove_index(0) {
                debug!(room_id = quiet, "dropping log of the quietest room");
            }
        }
        message
    }

    async fn edit(
        &self,
        room_id: i64,
        id: u64,
        author: UserId,
        content: String,
        window: Duration,
        now: OffsetDateTime,
    ) -> Result<StoredMessage, ChatActionError> {
        let mut rooms = self.rooms.write().await;
        let message = find_mut(&mut rooms, room_id, id)?;
        if message.sender_id != author {
            return Err(ChatActionError::NotAuthor);
        }
        if message.deleted_at.is_some() {
            return Err(ChatActionError::Deleted);
        }
        if now > message.sent_at + window {
            return Err(ChatActionError::EditWindowExpired);
        }
        message.content = content;
        message.edited_at = Some(now);
        Ok(message.clone())
    }

    async fn delete(
        &self,
        room_id: i64,
        id: u64,
        author: UserId,
        now: OffsetDateTime,
    ) -> Result<StoredMessage, ChatActionError> {
        let mut rooms = self.rooms.write().await;
        let message = find_mut(&mut rooms, room_id, id)?;
        if message.sender_id != author {
            return Err(ChatActionError::NotAuthor);
        }
        if message.deleted_at.is_some() {
            return Err(ChatActionError::Deleted);
        }
        message.deleted_at = Some(now);
        Ok(message.clone())
    }

    /// Newest messages of a room first, deleted ones skipped.
    pub async fn history(&self, room_id: i64, limit: usize) -> Vec<ChatMessageView> {
        let rooms = self.rooms.read().await;
        rooms
            .get(&room_id)
            .map(|room| {
                room.iter()
                    .rev()
                    .filter(|message| message.deleted_at.is_none())
                    .take(limit)
                    .map(StoredMessage::view)
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn find_mut(
    rooms: &mut IndexMap<i64, VecDeque<StoredMessage>>,
    room_id: i64,
    id: u64,
) -> Result<&mut StoredMessage, ChatActionError> {
    rooms
        .get_mut(&room_id)
        .and_then(|room| room.iter_mut().find(|message| message.id == id))
        .ok_or(ChatActionError::NotFound)
}

/// Dispatches chat frames on the chat hub loop.
pub struct ChatHandler {
    log: Arc<ChatLog>,
    edit_window: Duration,
}

impl ChatHandler {
    pub fn new(log: Arc<ChatLog>, edit_window: Duration) -> Self {
        Self { log, edit_window }
    }

    async fn handle(&self, origin: &Arc<Connection>, message: InboundMessage) -> Vec<Delivery> {
        let identity = origin.identity();
        let Some(user_id) = identity.user_id else {
            return vec![Delivery::reject(origin, "authentication required")];
        };
        let room = origin.group();
        let name = identity.display_name();

        match message.event {
            InboundKind::Message => {
                let stored = self
                    .log
                    .append(room, user_id, name, message.content)
                    .await;
                vec![room_broadcast(
                    ServerMessage::new(ServerEventKind::Message, room)
                        .with_id(stored.id)
                        .with_content(stored.content)
                        .from_sender(Some(user_id), stored.name),
                    room,
                )]
            }
            InboundKind::Edit => {
                let Some(id) = message.id else {
                    return vec![Delivery::reject(origin, "a message id is required for this action")];
                };
                let now = OffsetDateTime::now_utc();
                match self
                    .log
                    .edit(room, id, user_id, message.content, self.edit_window, now)
                    .await
                {
                    Ok(stored) => {
                        let mut frame = ServerMessage::new(ServerEventKind::Edit, room)
                            .with_id(stored.id)
                            .with_content(stored.content)
                            .from_sender(Some(user_id), stored.name);
                        frame.is_edited = true;
                        frame.edited_at = stored.edited_at;
                        vec![room_broadcast(frame, room)]
                    }
                    Err(err) => {
                        debug!(room, message_id = id, user_id, error = %err, "edit refused");
                        vec![Delivery::reject(
                            origin,
                            "You don't have permission to edit this message or time limit has expired.",
                        )]
                    }
                }
            }
            InboundKind::Delete => {
                let Some(id) = message.id else {
                    return vec![Delivery::reject(origin, "a message id is required for this action")];
                };
                match self
                    .log
                    .delete(room, id, user_id, OffsetDateTime::now_utc())
                    .await
                {
                    Ok(stored) => vec![room_broadcast(
                        ServerMessage::new(ServerEventKind::Delete, room)
                            .with_id(stored.id)
                            .from_sender(Some(user_id), stored.name),
                        room,
                    )],
                    Err(err) => {
                        debug!(room, message_id = id, user_id, error = %err, "delete refused");
                        vec![Delivery::reject(origin, "Could not process delete action.")]
                    }
                }
            }
            InboundKind::Typing => vec![Delivery::Broadcast {
                message: ServerMessage::new(ServerEventKind::Typing, room)
                    .from_sender(Some(user_id), name),
                selector: Selector::GroupExcept(room, origin.id()),
            }],
        }
    }
}

impl InboundHandler for ChatHandler {
    fn on_message<'a>(
        &'a self,
        origin: &'a Arc<Connection>,
        message: InboundMessage,
    ) -> BoxFuture<'a, Vec<Delivery>> {
        Box::pin(self.handle(origin, message))
    }
}

fn room_broadcast(message: ServerMessage, room: i64) -> Delivery {
    Delivery::Broadcast {
        message,
        selector: Selector::Group(room),
    }
}

/// Distinct users connected to `room`, each with their most recent activity.
pub async fn online_users(state: &SharedState, room: i64) -> OnlineUsersResponse {
    let connections = state
        .chat_hub()
        .registry()
        .select(Selector::Group(room))
        .await;

    let mut users: HashMap<UserId, OnlineUser> = HashMap::new();
    for connection in connections {
        let identity = connection.identity();
        let Some(user_id) = identity.user_id else {
            continue;
        };
        let last_seen = connection.last_activity();
        match users.entry(user_id) {
            Entry::Occupied(mut entry) => {
                if entry.get().last_seen < last_seen {
                    entry.get_mut().last_seen = last_seen;
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(OnlineUser {
                    id: user_id,
                    name: identity.display_name(),
                    role: identity.role,
                    last_seen,
                });
            }
        }
    }

    let mut users: Vec<OnlineUser> = users.into_values().collect();
    users.sort_by_key(|user| user.id);
    users.into()
}

pub async fn history(state: &SharedState, room: i64) -> ChatHistoryResponse {
    ChatHistoryResponse {
        history: state.chat_log().history(room, HISTORY_LIMIT).await,
    }
}
