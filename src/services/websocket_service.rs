use std::{sync::Arc, time::Duration};

use axum::{
    body::Bytes,
    extract::ws::{Message, WebSocket},
};
use futures::{SinkExt, StreamExt, stream::SplitSink};
use tokio::{task::JoinHandle, time::timeout};
use tracing::{debug, info, warn};

use crate::{
    config::HubSettings,
    dto::{
        validation::sanitize_inbound,
        ws::{InboundMessage, ServerMessage},
    },
    identity::Identity,
    state::hub::{Connection, GroupKey, HubError, HubHandle, Outbox, rate_limit::TokenBucket},
};

/// Handle the full lifecycle of one live session on `hub`.
pub async fn handle_socket(
    hub: HubHandle,
    settings: HubSettings,
    socket: WebSocket,
    identity: Identity,
    group: GroupKey,
) {
    let (connection, outbox) = Connection::new(identity, group, settings.client_buffer);
    let (sender, mut receiver) = socket.split();

    // Dedicated writer task keeps outbound messages flowing even while we await inbound frames.
    let writer_task = spawn_writer(connection.clone(), outbox, sender, &settings);

    if let Err(err) = hub
        .join(connection.clone(), settings.broadcast_timeout)
        .await
    {
        warn!(hub = hub.name(), connection = %connection.id(), error = %err, "join refused");
        connection.close();
        let _ = writer_task.await;
        return;
    }

    let mut limiter = TokenBucket::new(settings.rate_per_second, settings.burst);

    loop {
        let frame = tokio::select! {
            _ = connection.closed() => break,
            frame = timeout(settings.idle_timeout, receiver.next()) => frame,
        };

        match frame {
            Err(_) => {
                info!(hub = hub.name(), connection = %connection.id(), "idle session timed out");
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(err))) => {
                debug!(hub = hub.name(), connection = %connection.id(), error = %err, "websocket error");
                break;
            }
            Ok(Some(Ok(Message::Text(text)))) => {
                connection.touch();
                if limiter.as_mut().is_some_and(|bucket| !bucket.allow()) {
                    reply_error(&connection, &settings, "you are sending messages too fast").await;
                    continue;
                }

                let mut inbound = match InboundMessage::from_json_str(text.as_str()) {
                    Ok(message) => message,
                    Err(err) => {
                        debug!(connection = %connection.id(), error = %err, "malformed inbound frame");
                        reply_error(&connection, &settings, "malformed message").await;
                        continue;
                    }
                };
                if let Err(rejection) = sanitize_inbound(&mut inbound, settings.max_content_chars) {
                    reply_error(&connection, &settings, rejection.to_string()).await;
                    continue;
                }

                match hub
                    .dispatch(connection.clone(), inbound, settings.broadcast_timeout)
                    .await
                {
                    Ok(()) => {}
                    Err(HubError::Busy) => {
                        warn!(hub = hub.name(), connection = %connection.id(), "hub busy; inbound message dropped");
                        reply_error(&connection, &settings, "server is busy, please retry").await;
                    }
                    Err(HubError::Stopped) => break,
                }
            }
            Ok(Some(Ok(Message::Close(_)))) => break,
            Ok(Some(Ok(_))) => connection.touch(),
        }
    }

    hub.leave(connection.clone()).await;
    connection.close();
    let _ = writer_task.await;
    debug!(hub = hub.name(), connection = %connection.id(), "session finished");
}

fn spawn_writer(
    connection: Arc<Connection>,
    mut outbox: Outbox,
    mut sender: SplitSink<WebSocket, Message>,
    settings: &HubSettings,
) -> JoinHandle<()> {
    // `interval_at` panics on a zero period.
    let ping_interval = settings.ping_interval.max(Duration::from_secs(1));
    tokio::spawn(async move {
        let mut ping = tokio::time::interval_at(tokio::time::Instant::now() + ping_interval, ping_interval);
        loop {
            let outgoing = tokio::select! {
                message = outbox.next() => match message {
                    Some(message) => match message.to_json() {
                        Ok(payload) => Message::Text(payload.into()),
                        Err(err) => {
                            warn!(error = %err, "failed to serialize outbound message");
                            continue;
                        }
                    },
                    None => break,
                },
                _ = ping.tick() => Message::Ping(Bytes::new()),
            };
            if sender.send(outgoing).await.is_err() {
                break;
            }
        }

        // Either side may have failed first; closing is single-fire.
        connection.close();
        let _ = sender.send(Message::Close(None)).await;
    })
}

async fn reply_error(connection: &Arc<Connection>, settings: &HubSettings, reason: impl Into<String>) {
    let message = ServerMessage::error(connection.group(), reason);
    if let Err(err) = connection
        .enqueue(Arc::new(message), settings.direct_timeout)
        .await
    {
        warn!(connection = %connection.id(), error = %err, "error reply dropped");
    }
}
