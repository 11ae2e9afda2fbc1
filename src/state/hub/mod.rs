//! In-process connection hub: membership, inbound dispatch and fan-out.
//!
//! Each hub runs two tasks. The hub loop is the only writer of the
//! [`Registry`]; it processes joins, leaves, inbound messages and
//! publications strictly in arrival order and turns them into
//! [`Delivery`] items. The fan-out worker drains those items one at a time,
//! so every connection sees broadcasts in the order the loop emitted them.
//! A direct delivery that does not fit waits on its own task, so a reply to
//! one slow reader cannot hold up the broadcasts behind it.

pub mod broadcaster;
pub mod connection;
pub mod rate_limit;
pub mod registry;

use std::{future::Future, sync::Arc, time::Duration};

use futures::future::BoxFuture;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::SendTimeoutError, error::TrySendError};
use tracing::{debug, info, trace};

use crate::{
    config::HubSettings,
    dto::ws::{InboundMessage, ServerEventKind, ServerMessage},
};

pub use self::broadcaster::{Broadcaster, FanoutReport, MissPolicy};
pub use self::connection::{Connection, ConnectionId, DeliveryError, GroupKey, Outbox};
pub use self::registry::{Registry, Selector};

/// Work items processed by the hub loop.
pub enum HubCommand {
    Join(Arc<Connection>),
    Leave(Arc<Connection>),
    Dispatch {
        origin: Arc<Connection>,
        message: InboundMessage,
    },
    Publish {
        message: PendingMessage,
        selector: Selector,
    },
}

/// A publication whose message is produced when the hub loop reaches it.
/// Resolving to `None` publishes nothing.
pub type PendingMessage = BoxFuture<'static, Option<ServerMessage>>;

/// Output of the hub loop, handed to the fan-out worker.
pub enum Delivery {
    Broadcast {
        message: ServerMessage,
        selector: Selector,
    },
    Direct {
        target: Arc<Connection>,
        message: ServerMessage,
        policy: MissPolicy,
    },
}

impl Delivery {
    /// Error reply to the connection that caused it.
    pub fn reject(target: &Arc<Connection>, reason: impl Into<String>) -> Self {
        Delivery::Direct {
            message: ServerMessage::error(target.group(), reason),
            target: target.clone(),
            policy: MissPolicy::LogOnly,
        }
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum HubError {
    /// The command queue stayed full for the whole wait.
    #[error("hub is busy")]
    Busy,
    #[error("hub has stopped")]
    Stopped,
}

/// Application behaviour plugged into a hub loop.
pub trait InboundHandler: Send + Sync + 'static {
    /// React to a validated inbound message from `origin`.
    fn on_message<'a>(
        &'a self,
        origin: &'a Arc<Connection>,
        message: InboundMessage,
    ) -> BoxFuture<'a, Vec<Delivery>>;

    /// Deliveries owed to a connection right after it joined. They are
    /// queued ahead of any publication the loop handles later.
    fn on_join<'a>(&'a self, _connection: &'a Arc<Connection>) -> BoxFuture<'a, Vec<Delivery>> {
        Box::pin(async { Vec::new() })
    }
}

/// Non-owning handle to a hub's command queue.
///
/// Sessions and the broadcaster hold this instead of the hub itself, so
/// dropping the [`Hub`] stops the loop even while connections are alive.
#[derive(Clone)]
pub struct HubHandle {
    name: &'static str,
    commands: mpsc::WeakSender<HubCommand>,
}

impl HubHandle {
    async fn submit(&self, command: HubCommand, wait: Duration) -> Result<(), HubError> {
        let sender = self.commands.upgrade().ok_or(HubError::Stopped)?;
        sender
            .send_timeout(command, wait)
            .await
            .map_err(|err| match err {
                SendTimeoutError::Timeout(_) => HubError::Busy,
                SendTimeoutError::Closed(_) => HubError::Stopped,
            })
    }

    pub async fn join(&self, connection: Arc<Connection>, wait: Duration) -> Result<(), HubError> {
        self.submit(HubCommand::Join(connection), wait).await
    }

    pub async fn dispatch(
        &self,
        origin: Arc<Connection>,
        message: InboundMessage,
        wait: Duration,
    ) -> Result<(), HubError> {
        self.submit(HubCommand::Dispatch { origin, message }, wait).await
    }

    /// Request removal. Waits for queue space; the connection is released
    /// directly if the hub is gone.
    pub async fn leave(&self, connection: Arc<Connection>) {
        let Some(sender) = self.commands.upgrade() else {
            connection.close();
            return;
        };
        if let Err(err) = sender.send(HubCommand::Leave(connection)).await {
            if let HubCommand::Leave(connection) = err.0 {
                connection.close();
            }
        }
    }

    /// Request removal without waiting, from contexts that must not block on the loop.
    pub fn leave_detached(&self, connection: Arc<Connection>) {
        let Some(sender) = self.commands.upgrade() else {
            connection.close();
            return;
        };
        match sender.try_send(HubCommand::Leave(connection)) {
            Ok(()) => {}
            Err(TrySendError::Full(command)) => {
                let handle = self.clone();
                tokio::spawn(async move {
                    if let HubCommand::Leave(connection) = command {
                        handle.leave(connection).await;
                    }
                });
            }
            Err(TrySendError::Closed(command)) => {
                if let HubCommand::Leave(connection) = command {
                    connection.close();
                }
            }
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// A running hub. Dropping it stops both of its tasks and closes every
/// remaining connection.
pub struct Hub {
    name: &'static str,
    commands: mpsc::Sender<HubCommand>,
    registry: Arc<Registry>,
    settings: HubSettings,
}

impl Hub {
    /// Start the hub loop and its fan-out worker on the current runtime.
    pub fn spawn(name: &'static str, settings: HubSettings, handler: Arc<dyn InboundHandler>) -> Self {
        let (commands, receiver) = mpsc::channel(settings.command_buffer.max(1));
        let (deliveries, delivery_rx) = mpsc::channel(settings.command_buffer.max(1));
        let registry = Arc::new(Registry::default());
        let handle = HubHandle {
            name,
            commands: commands.downgrade(),
        };
        let broadcaster = Broadcaster::new(name, registry.clone(), handle, &settings);

        let hub_loop = HubLoop {
            name,
            registry: registry.clone(),
            handler,
            announce_presence: settings.announce_presence,
            deliveries,
        };
        tokio::spawn(hub_loop.run(receiver));
        tokio::spawn(run_fanout(broadcaster, delivery_rx));

        Self {
            name,
            commands,
            registry,
            settings,
        }
    }

    pub fn handle(&self) -> HubHandle {
        HubHandle {
            name: self.name,
            commands: self.commands.downgrade(),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn settings(&self) -> &HubSettings {
        &self.settings
    }

    /// Queue a publication through the hub loop, waiting at most the
    /// broadcast timeout for queue space.
    ///
    /// `message` is awaited by the loop itself, in command order, so a
    /// message built from shared state never reaches clients after one
    /// built from a later read of that state.
    pub async fn publish<F>(&self, message: F, selector: Selector) -> Result<(), HubError>
    where
        F: Future<Output = Option<ServerMessage>> + Send + 'static,
    {
        let message: PendingMessage = Box::pin(message);
        self.commands
            .send_timeout(
                HubCommand::Publish { message, selector },
                self.settings.broadcast_timeout,
            )
            .await
            .map_err(|err| match err {
                SendTimeoutError::Timeout(_) => HubError::Busy,
                SendTimeoutError::Closed(_) => HubError::Stopped,
            })
    }
}

struct HubLoop {
    name: &'static str,
    registry: Arc<Registry>,
    handler: Arc<dyn InboundHandler>,
    announce_presence: bool,
    deliveries: mpsc::Sender<Delivery>,
}

impl HubLoop {
    async fn run(self, mut commands: mpsc::Receiver<HubCommand>) {
        while let Some(command) = commands.recv().await {
            match command {
                HubCommand::Join(connection) => self.join(connection).await,
                HubCommand::Leave(connection) => self.leave(connection).await,
                HubCommand::Dispatch { origin, message } => {
                    if origin.is_closed() {
                        trace!(hub = self.name, connection = %origin.id(), "dropping message from closed connection");
                        continue;
                    }
                    for delivery in self.handler.on_message(&origin, message).await {
                        self.forward(delivery).await;
                    }
                }
                HubCommand::Publish { message, selector } => match message.await {
                    Some(message) => self.forward(Delivery::Broadcast { message, selector }).await,
                    None => trace!(hub = self.name, ?selector, "nothing to publish"),
                },
            }
        }

        for connection in self.registry.drain().await {
            connection.close();
        }
        debug!(hub = self.name, "hub loop stopped");
    }

    async fn join(&self, connection: Arc<Connection>) {
        if connection.is_closed() || !self.registry.insert(connection.clone()).await {
            return;
        }
        info!(
            hub = self.name,
            connection = %connection.id(),
            group = connection.group(),
            user_id = ?connection.identity().user_id,
            "connection joined"
        );
        if self.announce_presence {
            self.forward(presence(ServerEventKind::Join, &connection)).await;
        }
        for delivery in self.handler.on_join(&connection).await {
            self.forward(delivery).await;
        }
    }

    async fn leave(&self, connection: Arc<Connection>) {
        let removed = self.registry.remove(&connection).await.is_some();
        connection.close();
        if !removed {
            return;
        }
        info!(
            hub = self.name,
            connection = %connection.id(),
            group = connection.group(),
            "connection left"
        );
        if self.announce_presence {
            self.forward(presence(ServerEventKind::Leave, &connection)).await;
        }
    }

    async fn forward(&self, delivery: Delivery) {
        if self.deliveries.send(delivery).await.is_err() {
            debug!(hub = self.name, "fan-out worker gone; dropping delivery");
        }
    }
}

fn presence(kind: ServerEventKind, connection: &Connection) -> Delivery {
    let identity = connection.identity();
    let name = identity.display_name();
    let verb = match kind {
        ServerEventKind::Join => "joined",
        _ => "left",
    };
    Delivery::Broadcast {
        message: ServerMessage::new(kind, connection.group())
            .with_content(format!("{name} has {verb} the chat"))
            .from_sender(identity.user_id, name),
        selector: Selector::Group(connection.group()),
    }
}

async fn run_fanout(broadcaster: Broadcaster, mut deliveries: mpsc::Receiver<Delivery>) {
    while let Some(delivery) = deliveries.recv().await {
        match delivery {
            Delivery::Broadcast { message, selector } => {
                let report = broadcaster.send(Arc::new(message), selector).await;
                trace!(?selector, delivered = report.delivered, failed = report.failed, "broadcast done");
            }
            Delivery::Direct {
                target,
                message,
                policy,
            } => {
                broadcaster.send_to_one(&target, Arc::new(message), policy);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::future::ready;

    use super::*;
    use crate::{dto::ws::InboundKind, identity::Identity};

    struct Echo;

    impl InboundHandler for Echo {
        fn on_message<'a>(
            &'a self,
            origin: &'a Arc<Connection>,
            message: InboundMessage,
        ) -> BoxFuture<'a, Vec<Delivery>> {
            Box::pin(async move {
                vec![Delivery::Broadcast {
                    message: ServerMessage::new(ServerEventKind::Message, origin.group())
                        .with_content(message.content),
                    selector: Selector::GroupExcept(origin.group(), origin.id()),
                }]
            })
        }
    }

    struct Reject;

    impl InboundHandler for Reject {
        fn on_message<'a>(
            &'a self,
            origin: &'a Arc<Connection>,
            _message: InboundMessage,
        ) -> BoxFuture<'a, Vec<Delivery>> {
            Box::pin(async move { vec![Delivery::reject(origin, "read-only")] })
        }
    }

    struct Greeter;

    impl InboundHandler for Greeter {
        fn on_message<'a>(
            &'a self,
            _origin: &'a Arc<Connection>,
            _message: InboundMessage,
        ) -> BoxFuture<'a, Vec<Delivery>> {
            Box::pin(async { Vec::new() })
        }

        fn on_join<'a>(&'a self, connection: &'a Arc<Connection>) -> BoxFuture<'a, Vec<Delivery>> {
            Box::pin(async move {
                vec![Delivery::Direct {
                    target: connection.clone(),
                    message: ServerMessage::new(ServerEventKind::Init, connection.group()),
                    policy: MissPolicy::Evict,
                }]
            })
        }
    }

    fn update(group: GroupKey, content: &str) -> impl Future<Output = Option<ServerMessage>> + Send + 'static {
        ready(Some(
            ServerMessage::new(ServerEventKind::Update, group).with_content(content),
        ))
    }

    fn typing() -> InboundMessage {
        InboundMessage {
            event: InboundKind::Typing,
            content: String::new(),
            id: None,
        }
    }

    fn settings() -> HubSettings {
        HubSettings {
            client_buffer: 1,
            broadcast_timeout: Duration::from_millis(50),
            announce_presence: false,
            ..HubSettings::chat()
        }
    }

    fn user(id: i64) -> Identity {
        Identity {
            user_id: Some(id),
            ..Identity::default()
        }
    }

    async fn wait_until_absent(hub: &Hub, id: ConnectionId) -> bool {
        for _ in 0..100 {
            if !hub.registry().contains(id).await {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    async fn wait_until_present(hub: &Hub, id: ConnectionId) {
        for _ in 0..100 {
            if hub.registry().contains(id).await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("connection never joined");
    }

    #[tokio::test]
    async fn stuck_consumer_is_evicted_and_others_keep_receiving() {
        let hub = Hub::spawn("test", settings(), Arc::new(Echo));
        let handle = hub.handle();
        let (healthy, mut healthy_out) = Connection::new(user(1), 7, 1);
        let (stuck, _stuck_out) = Connection::new(user(2), 7, 1);
        let wait = Duration::from_millis(100);
        handle.join(healthy.clone(), wait).await.unwrap();
        handle.join(stuck.clone(), wait).await.unwrap();
        wait_until_present(&hub, stuck.id()).await;

        let mut received = Vec::new();
        for round in 0..3 {
            hub.publish(update(7, &round.to_string()), Selector::Group(7))
                .await
                .unwrap();
            let message = healthy_out.next().await.unwrap();
            received.push(message.content.clone().unwrap());
        }

        assert_eq!(received, vec!["0", "1", "2"]);
        assert!(wait_until_absent(&hub, stuck.id()).await);
        assert!(stuck.is_closed());
        assert!(!healthy.is_closed());
    }

    #[tokio::test]
    async fn replies_to_a_stuck_sender_do_not_delay_broadcasts() {
        let hub = Hub::spawn("test", HubSettings::scoreboard(), Arc::new(Reject));
        let handle = hub.handle();
        let wait = Duration::from_millis(100);
        let (healthy, mut healthy_out) = Connection::new(user(1), 7, 8);
        let (stuck, _stuck_out) = Connection::new(user(2), 7, 1);
        stuck
            .try_enqueue(Arc::new(ServerMessage::new(ServerEventKind::Typing, 7)))
            .unwrap();
        handle.join(healthy.clone(), wait).await.unwrap();
        handle.join(stuck.clone(), wait).await.unwrap();
        wait_until_present(&hub, stuck.id()).await;

        for _ in 0..15 {
            handle.dispatch(stuck.clone(), typing(), wait).await.unwrap();
        }
        let started = tokio::time::Instant::now();
        hub.publish(update(7, "standings"), Selector::Group(7))
            .await
            .unwrap();
        let got = tokio::time::timeout(Duration::from_secs(2), healthy_out.next())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(got.content.as_deref(), Some("standings"));
        assert!(started.elapsed() < Duration::from_millis(500));
        assert!(!healthy.is_closed());
    }

    #[tokio::test]
    async fn direct_reply_waits_for_room_within_its_timeout() {
        let hub = Hub::spawn("test", HubSettings::scoreboard(), Arc::new(Reject));
        let handle = hub.handle();
        let wait = Duration::from_millis(100);
        let (sender, mut out) = Connection::new(user(1), 4, 1);
        sender
            .try_enqueue(Arc::new(ServerMessage::new(ServerEventKind::Typing, 4)))
            .unwrap();
        handle.join(sender.clone(), wait).await.unwrap();
        handle.dispatch(sender.clone(), typing(), wait).await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(out.next().await.unwrap().event, ServerEventKind::Typing);
        let reply = tokio::time::timeout(Duration::from_secs(1), out.next())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(reply.event, ServerEventKind::Error);
        assert_eq!(reply.content.as_deref(), Some("read-only"));
        assert!(!sender.is_closed());
    }

    #[tokio::test]
    async fn publications_keep_command_order_even_when_built_slowly() {
        let hub = Hub::spawn("test", settings(), Arc::new(Echo));
        let (viewer, mut out) = Connection::new(user(1), 5, 4);
        hub.handle()
            .join(viewer.clone(), Duration::from_millis(100))
            .await
            .unwrap();
        wait_until_present(&hub, viewer.id()).await;

        hub.publish(
            async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Some(ServerMessage::new(ServerEventKind::Update, 5).with_content("older"))
            },
            Selector::Group(5),
        )
        .await
        .unwrap();
        hub.publish(ready(None), Selector::Group(5)).await.unwrap();
        hub.publish(update(5, "newer"), Selector::Group(5)).await.unwrap();

        let first = out.next().await.unwrap();
        let second = out.next().await.unwrap();
        assert_eq!(first.content.as_deref(), Some("older"));
        assert_eq!(second.content.as_deref(), Some("newer"));
    }

    #[tokio::test]
    async fn join_deliveries_precede_later_publications() {
        let hub = Hub::spawn("test", settings(), Arc::new(Greeter));
        let (viewer, mut out) = Connection::new(user(1), 9, 4);

        hub.handle()
            .join(viewer.clone(), Duration::from_millis(100))
            .await
            .unwrap();
        hub.publish(update(9, "after"), Selector::Group(9)).await.unwrap();

        assert_eq!(out.next().await.unwrap().event, ServerEventKind::Init);
        assert_eq!(out.next().await.unwrap().content.as_deref(), Some("after"));
    }

    #[tokio::test]
    async fn dispatch_reaches_group_except_sender() {
        let hub = Hub::spawn("test", settings(), Arc::new(Echo));
        let handle = hub.handle();
        let (sender, mut sender_out) = Connection::new(user(1), 3, 4);
        let (peer, mut peer_out) = Connection::new(user(2), 3, 4);
        let (stranger, mut stranger_out) = Connection::new(user(3), 4, 4);
        let wait = Duration::from_millis(100);
        for conn in [&sender, &peer, &stranger] {
            handle.join(conn.clone(), wait).await.unwrap();
        }
        wait_until_present(&hub, stranger.id()).await;

        handle
            .dispatch(
                sender.clone(),
                InboundMessage {
                    event: InboundKind::Message,
                    content: "hello".into(),
                    id: None,
                },
                wait,
            )
            .await
            .unwrap();

        let got = tokio::time::timeout(Duration::from_secs(1), peer_out.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.content.as_deref(), Some("hello"));
        let silent = Duration::from_millis(50);
        assert!(tokio::time::timeout(silent, sender_out.next()).await.is_err());
        assert!(tokio::time::timeout(silent, stranger_out.next()).await.is_err());
    }

    #[tokio::test]
    async fn duplicate_leaves_release_once() {
        let hub = Hub::spawn("test", settings(), Arc::new(Echo));
        let handle = hub.handle();
        let (conn, _out) = Connection::new(user(1), 1, 4);
        handle.join(conn.clone(), Duration::from_millis(100)).await.unwrap();
        wait_until_present(&hub, conn.id()).await;

        tokio::join!(handle.leave(conn.clone()), handle.leave(conn.clone()));

        assert!(wait_until_absent(&hub, conn.id()).await);
        assert!(conn.is_closed());
        assert!(!conn.close());
    }

    #[tokio::test]
    async fn presence_is_announced_when_enabled() {
        let hub = Hub::spawn(
            "test",
            HubSettings {
                announce_presence: true,
                ..settings()
            },
            Arc::new(Echo),
        );
        let handle = hub.handle();
        let (first, mut first_out) = Connection::new(user(1), 2, 4);
        let (second, _second_out) = Connection::new(
            Identity {
                name: Some("bob".into()),
                ..user(2)
            },
            2,
            4,
        );
        let wait = Duration::from_millis(100);

        handle.join(first.clone(), wait).await.unwrap();
        let own_join = first_out.next().await.unwrap();
        handle.join(second.clone(), wait).await.unwrap();
        let peer_join = first_out.next().await.unwrap();
        handle.leave(second.clone()).await;
        let peer_leave = first_out.next().await.unwrap();

        assert_eq!(own_join.event, ServerEventKind::Join);
        assert_eq!(peer_join.name.as_deref(), Some("bob"));
        assert_eq!(peer_leave.event, ServerEventKind::Leave);
        assert_eq!(peer_leave.content.as_deref(), Some("bob has left the chat"));
    }

    #[tokio::test]
    async fn dropping_the_hub_closes_connections() {
        let hub = Hub::spawn("test", settings(), Arc::new(Echo));
        let handle = hub.handle();
        let (conn, _out) = Connection::new(user(1), 1, 4);
        handle.join(conn.clone(), Duration::from_millis(100)).await.unwrap();
        wait_until_present(&hub, conn.id()).await;

        drop(hub);

        tokio::time::timeout(Duration::from_secs(1), conn.closed())
            .await
            .unwrap();
        assert_eq!(
            handle.join(conn, Duration::from_millis(10)).await,
            Err(HubError::Stopped)
        );
    }
}
