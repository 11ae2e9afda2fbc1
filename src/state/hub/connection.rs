use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicI64, Ordering},
    },
    time::Duration,
};

use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::{
    mpsc::{self, error::SendTimeoutError, error::TrySendError},
    watch,
};
use uuid::Uuid;

use crate::{dto::ws::ServerMessage, identity::Identity};

/// Unique per live session, even for the same user on several devices.
pub type ConnectionId = Uuid;
/// Room id for chat, event id for scoreboards.
pub type GroupKey = i64;

/// Why a message could not be queued for a connection.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    /// The outbound queue stayed full for the whole timeout.
    #[error("connection timed out")]
    Timeout,
    /// The outbound queue was full and the caller did not wait.
    #[error("outbound queue full")]
    Full,
    #[error("connection closed")]
    Closed,
}

/// One live session registered with a hub.
///
/// The hub keeps it alive through its group map; the session tasks hold the
/// receiving half ([`Outbox`]) and drive the transport.
pub struct Connection {
    id: ConnectionId,
    identity: Identity,
    group: GroupKey,
    outbound: mpsc::Sender<Arc<ServerMessage>>,
    closed: AtomicBool,
    shutdown: watch::Sender<bool>,
    last_activity_ms: AtomicI64,
}

/// Receiving side of a connection's outbound queue.
pub struct Outbox {
    messages: mpsc::Receiver<Arc<ServerMessage>>,
    shutdown: watch::Receiver<bool>,
}

impl Connection {
    pub fn new(identity: Identity, group: GroupKey, capacity: usize) -> (Arc<Self>, Outbox) {
        let (outbound, messages) = mpsc::channel(capacity.max(1));
        let (shutdown, shutdown_rx) = watch::channel(false);
        let connection = Arc::new(Self {
            id: Uuid::new_v4(),
            identity,
            group,
            outbound,
            closed: AtomicBool::new(false),
            shutdown,
            last_activity_ms: AtomicI64::new(now_ms()),
        });
        (
            connection,
            Outbox {
                messages,
                shutdown: shutdown_rx,
            },
        )
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn group(&self) -> GroupKey {
        self.group
    }

    /// Record inbound activity.
    pub fn touch(&self) {
        self.last_activity_ms.store(now_ms(), Ordering::Relaxed);
    }

    pub fn last_activity(&self) -> OffsetDateTime {
        let millis = self.last_activity_ms.load(Ordering::Relaxed);
        OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000)
            .unwrap_or(OffsetDateTime::UNIX_EPOCH)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Release the connection. Only the first caller wins and gets `true`;
    /// it signals both session tasks to stop and the outbox to close.
    pub fn close(&self) -> bool {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        let _ = self.shutdown.send(true);
        true
    }

    /// Resolves once [`Connection::close`] has run.
    pub async fn closed(&self) {
        let mut watcher = self.shutdown.subscribe();
        let _ = watcher.wait_for(|closed| *closed).await;
    }

    /// Queue a message, waiting at most `wait` for room in the queue.
    pub async fn enqueue(
        &self,
        message: Arc<ServerMessage>,
        wait: Duration,
    ) -> Result<(), DeliveryError> {
        if self.is_closed() {
            return Err(DeliveryError::Closed);
        }
        self.outbound
            .send_timeout(message, wait)
            .await
            .map_err(|err| match err {
                SendTimeoutError::Timeout(_) => DeliveryError::Timeout,
                SendTimeoutError::Closed(_) => DeliveryError::Closed,
            })
    }

    /// Queue a message only if there is room right now.
    pub fn try_enqueue(&self, message: Arc<ServerMessage>) -> Result<(), DeliveryError> {
        if self.is_closed() {
            return Err(DeliveryError::Closed);
        }
        self.outbound.try_send(message).map_err(|err| match err {
            TrySendError::Full(_) => DeliveryError::Full,
            TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("user_id", &self.identity.user_id)
            .field("group", &self.group)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Outbox {
    /// Next queued message in FIFO order, or `None` once the connection is
    /// closed. Closing drops whatever is still queued.
    pub async fn next(&mut self) -> Option<Arc<ServerMessage>> {
        if *self.shutdown.borrow() {
            self.messages.close();
            return None;
        }
        tokio::select! {
            biased;
            _ = self.shutdown.wait_for(|closed| *closed) => {
                self.messages.close();
                None
            }
            message = self.messages.recv() => message,
        }
    }
}

fn now_ms() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dto::ws::ServerEventKind;

    fn message(room: i64) -> Arc<ServerMessage> {
        Arc::new(ServerMessage::new(ServerEventKind::Typing, room))
    }

    #[tokio::test]
    async fn close_fires_once() {
        let (connection, _outbox) = Connection::new(Identity::default(), 1, 4);

        let first = connection.close();
        let second = connection.close();

        assert!(first);
        assert!(!second);
        assert!(connection.is_closed());
    }

    #[tokio::test]
    async fn concurrent_closes_converge_on_one_release() {
        let (connection, _outbox) = Connection::new(Identity::default(), 1, 4);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let connection = connection.clone();
                tokio::spawn(async move { connection.close() })
            })
            .collect();
        let mut released = 0;
        for handle in handles {
            if handle.await.unwrap() {
                released += 1;
            }
        }

        assert_eq!(released, 1);
    }

    #[tokio::test]
    async fn full_queue_times_out() {
        let (connection, _outbox) = Connection::new(Identity::default(), 1, 1);
        let wait = Duration::from_millis(20);

        connection.enqueue(message(1), wait).await.unwrap();
        let err = connection.enqueue(message(1), wait).await.unwrap_err();

        assert_eq!(err, DeliveryError::Timeout);
    }

    #[tokio::test]
    async fn try_enqueue_never_waits() {
        let (connection, _outbox) = Connection::new(Identity::default(), 1, 1);

        connection.try_enqueue(message(1)).unwrap();

        assert_eq!(connection.try_enqueue(message(1)), Err(DeliveryError::Full));
        connection.close();
        assert_eq!(connection.try_enqueue(message(1)), Err(DeliveryError::Closed));
    }

    #[tokio::test]
    async fn outbox_is_fifo_and_stops_after_close() {
        let (connection, mut outbox) = Connection::new(Identity::default(), 1, 4);
        let wait = Duration::from_millis(20);
        for room in 1..=3 {
            connection.enqueue(message(room), wait).await.unwrap();
        }

        let rooms: Vec<i64> = vec![
            outbox.next().await.unwrap().room_id,
            outbox.next().await.unwrap().room_id,
        ];
        assert_eq!(rooms, vec![1, 2]);

        connection.close();
        assert!(outbox.next().await.is_none());
        assert_eq!(
            connection.enqueue(message(4), wait).await.unwrap_err(),
            DeliveryError::Closed
        );
    }
}
