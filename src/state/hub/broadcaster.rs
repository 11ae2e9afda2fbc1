use std::{sync::Arc, time::Duration};

use futures::{StreamExt, stream};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use super::{
    HubHandle,
    connection::{Connection, DeliveryError},
    registry::{Registry, Selector},
};
use crate::{config::HubSettings, dto::ws::ServerMessage};

/// What to do with a connection whose queue did not accept a message in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissPolicy {
    /// Close the connection and remove it from the hub.
    Evict,
    /// Log and drop the message; the connection stays.
    LogOnly,
}

/// Outcome counters of one fan-out.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FanoutReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Pushes messages onto connection queues with bounded waits and bounded concurrency.
#[derive(Clone)]
pub struct Broadcaster {
    hub_name: &'static str,
    registry: Arc<Registry>,
    hub: HubHandle,
    broadcast_timeout: Duration,
    direct_timeout: Duration,
    concurrency: usize,
    /// Bounds the direct sends waiting on a full queue at any one time.
    direct_slots: Arc<Semaphore>,
}

impl Broadcaster {
    pub(super) fn new(
        hub_name: &'static str,
        registry: Arc<Registry>,
        hub: HubHandle,
        settings: &HubSettings,
    ) -> Self {
        Self {
            hub_name,
            registry,
            hub,
            broadcast_timeout: settings.broadcast_timeout,
            direct_timeout: settings.direct_timeout,
            concurrency: settings.fanout_concurrency.max(1),
            direct_slots: Arc::new(Semaphore::new(settings.fanout_concurrency.max(1))),
        }
    }

    /// Deliver `message` to every connection matching `selector`.
    ///
    /// Targets are written concurrently, at most `fanout_concurrency` at a
    /// time. A target whose queue stays full for the broadcast timeout is
    /// evicted; the others are unaffected.
    pub async fn send(&self, message: Arc<ServerMessage>, selector: Selector) -> FanoutReport {
        let targets = self.registry.select(selector).await;
        if targets.is_empty() {
            return FanoutReport::default();
        }

        let results: Vec<Result<(), DeliveryError>> = stream::iter(targets)
            .map(|connection| {
                let message = message.clone();
                async move {
                    let result = connection.enqueue(message, self.broadcast_timeout).await;
                    if let Err(err) = result {
                        self.on_miss(&connection, err, MissPolicy::Evict);
                    }
                    result
                }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let delivered = results.iter().filter(|result| result.is_ok()).count();
        FanoutReport {
            delivered,
            failed: results.len() - delivered,
        }
    }

    /// Deliver to a single connection, waiting at most the direct timeout.
    ///
    /// A message that fits right away is queued in order. Otherwise the wait
    /// runs on its own task so the deliveries behind it are not held up; when
    /// too many such waits are pending the message is a miss straight away.
    pub fn send_to_one(&self, connection: &Arc<Connection>, message: Arc<ServerMessage>, policy: MissPolicy) {
        match connection.try_enqueue(message.clone()) {
            Ok(()) => {}
            Err(DeliveryError::Full) if !self.direct_timeout.is_zero() => {
                let Ok(slot) = self.direct_slots.clone().try_acquire_owned() else {
                    self.on_miss(connection, DeliveryError::Full, policy);
                    return;
                };
                let broadcaster = self.clone();
                let connection = connection.clone();
                tokio::spawn(async move {
                    let _slot = slot;
                    if let Err(err) = connection.enqueue(message, broadcaster.direct_timeout).await {
                        broadcaster.on_miss(&connection, err, policy);
                    }
                });
            }
            Err(err) => self.on_miss(connection, err, policy),
        }
    }

    fn on_miss(&self, connection: &Arc<Connection>, err: DeliveryError, policy: MissPolicy) {
        match (err, policy) {
            (DeliveryError::Closed, MissPolicy::Evict) => {
                debug!(hub = self.hub_name, connection = %connection.id(), "skipping closed connection");
                self.evict(connection);
            }
            (_, MissPolicy::Evict) => {
                warn!(
                    hub = self.hub_name,
                    connection = %connection.id(),
                    group = connection.group(),
                    error = %err,
                    "outbound queue full; evicting connection"
                );
                self.evict(connection);
            }
            (_, MissPolicy::LogOnly) => {
                warn!(
                    hub = self.hub_name,
                    connection = %connection.id(),
                    error = %err,
                    "direct message dropped"
                );
            }
        }
    }

    /// Close immediately so later sends fail fast, then ask the hub loop to
    /// drop the connection from its group.
    fn evict(&self, connection: &Arc<Connection>) {
        connection.close();
        self.hub.leave_detached(connection.clone());
    }
}
