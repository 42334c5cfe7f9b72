//! Realtime change feed for the hosted backend
//!
//! Keeps one websocket joined to the bookmark channel for a single owner and
//! forwards row events into a [`ChangeFeed`]. The connection is retried with
//! exponential backoff. Every successful join, the first included, is
//! announced with [`PushEvent::Resync`]: rows written before the channel was
//! joined never arrive as events, even when a fetch already ran.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{interval_at, sleep, Instant};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::message::{ClientMessage, ServerMessage, CHANNEL_TOPIC, PROTOCOL_VSN};
use super::{ChangeFeed, PushEvent};
use crate::error::{StoreError, StoreResult};

/// Settings of the realtime connection
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// Websocket endpoint including query parameters
    pub url: String,
    /// Token presented when joining the channel
    pub access_token: String,
    /// Interval between heartbeats
    pub heartbeat_interval: Duration,
    /// First reconnect delay
    pub initial_reconnect_delay: Duration,
    /// Upper bound of the reconnect delay
    pub max_reconnect_delay: Duration,
}

impl RealtimeConfig {
    /// Build the configuration from the backend base URL
    pub fn new(base_url: &str, api_key: &str, access_token: &str) -> Self {
        Self {
            url: websocket_url(base_url, api_key),
            access_token: access_token.to_string(),
            heartbeat_interval: Duration::from_secs(25),
            initial_reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(30),
        }
    }
}

/// Websocket endpoint for a backend base URL
pub fn websocket_url(base_url: &str, api_key: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        base.to_string()
    };

    format!(
        "{}/realtime/v1/websocket?apikey={}&vsn={}",
        base, api_key, PROTOCOL_VSN
    )
}

/// How a connection ended without an error
enum SessionEnd {
    /// The feed was dropped or unsubscribed
    SubscriberGone,
    /// The server went away; `joined` tells if the channel was ever joined
    Dropped { joined: bool },
}

/// Start the background connection and return the feed it fills
///
/// The task stops once the returned feed is dropped or unsubscribed.
pub fn spawn_change_feed(config: RealtimeConfig, owner: Uuid) -> ChangeFeed {
    let (tx, feed) = ChangeFeed::channel();
    tokio::spawn(run_feed(config, owner, tx));
    feed
}

async fn run_feed(config: RealtimeConfig, owner: Uuid, tx: mpsc::Sender<PushEvent>) {
    let mut delay = config.initial_reconnect_delay;

    loop {
        let outcome = tokio::select! {
            _ = tx.closed() => break,
            result = run_session(&config, owner, &tx) => result,
        };

        match outcome {
            Ok(SessionEnd::SubscriberGone) => break,
            Ok(SessionEnd::Dropped { joined }) => {
                if joined {
                    delay = config.initial_reconnect_delay;
                }
                info!("Realtime connection closed, reconnecting in {:?}", delay);
            }
            Err(e) => {
                warn!("Realtime connection failed: {}, retrying in {:?}", e, delay);
            }
        }

        tokio::select! {
            _ = tx.closed() => break,
            _ = sleep(delay) => {}
        }
        delay = (delay * 2).min(config.max_reconnect_delay);
    }

    debug!("Realtime feed for {} stopped", owner);
}

async fn run_session(
    config: &RealtimeConfig,
    owner: Uuid,
    tx: &mpsc::Sender<PushEvent>,
) -> StoreResult<SessionEnd> {
    let (ws_stream, _response) = connect_async(config.url.as_str())
        .await
        .map_err(|e| StoreError::Realtime(e.to_string()))?;
    let (mut write, mut read) = ws_stream.split();

    let mut next_ref: u64 = 1;
    let join_ref = next_ref.to_string();
    write
        .send(Message::Text(
            ClientMessage::join(owner, &config.access_token, &join_ref).encode(),
        ))
        .await
        .map_err(|e| StoreError::Realtime(e.to_string()))?;

    let mut joined = false;
    let mut heartbeat = interval_at(
        Instant::now() + config.heartbeat_interval,
        config.heartbeat_interval,
    );

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                next_ref += 1;
                let frame = ClientMessage::heartbeat(&next_ref.to_string()).encode();
                if let Err(e) = write.send(Message::Text(frame)).await {
                    warn!("Failed to send heartbeat: {}", e);
                    return Ok(SessionEnd::Dropped { joined });
                }
            }
            msg = read.next() => {
                let text = match msg {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Ping(data))) => {
                        let _ = write.send(Message::Pong(data)).await;
                        continue;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        return Ok(SessionEnd::Dropped { joined });
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        warn!("Realtime read error: {}", e);
                        return Ok(SessionEnd::Dropped { joined });
                    }
                };

                let message = match ServerMessage::decode(&text) {
                    Ok(m) => m,
                    Err(e) => {
                        debug!("Ignoring undecodable realtime frame: {}", e);
                        continue;
                    }
                };

                match message {
                    ServerMessage::Reply {
                        topic,
                        reference,
                        ok,
                        response,
                    } if topic == CHANNEL_TOPIC
                        && reference.as_deref() == Some(join_ref.as_str()) =>
                    {
                        if !ok {
                            return Err(StoreError::Realtime(format!(
                                "join rejected: {}",
                                response
                            )));
                        }
                        info!("Joined realtime channel for {}", owner);
                        joined = true;
                        if tx.send(PushEvent::Resync).await.is_err() {
                            return Ok(SessionEnd::SubscriberGone);
                        }
                    }
                    ServerMessage::Change(event) => {
                        if tx.send(event).await.is_err() {
                            let _ = write
                                .send(Message::Text(ClientMessage::leave("leave").encode()))
                                .await;
                            return Ok(SessionEnd::SubscriberGone);
                        }
                    }
                    ServerMessage::ChannelClosed { topic, reason }
                        if topic == CHANNEL_TOPIC =>
                    {
                        warn!("Realtime channel closed: {}", reason);
                        return Ok(SessionEnd::Dropped { joined });
                    }
                    _ => {}
                }
            }
        }
    }
}
