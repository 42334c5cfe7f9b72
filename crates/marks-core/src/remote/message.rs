//! Realtime protocol message types
//!
//! Phoenix channel frames (JSON, protocol 1.0.0) exchanged with the hosted
//! backend's realtime service.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use super::PushEvent;
use crate::models::Bookmark;

/// Protocol version sent in the websocket URL
pub const PROTOCOL_VSN: &str = "1.0.0";

/// Channel topic used for the bookmark subscription
pub const CHANNEL_TOPIC: &str = "realtime:bookmarks-changes";

/// Topic used for connection heartbeats
pub const HEARTBEAT_TOPIC: &str = "phoenix";

/// Table the subscription watches
pub const TABLE: &str = "bookmarks";

/// Frame sent to the realtime service
#[derive(Debug, Clone, Serialize)]
pub struct ClientMessage {
    pub topic: String,
    pub event: String,
    pub payload: Value,
    #[serde(rename = "ref")]
    pub reference: String,
}

impl ClientMessage {
    /// Join the bookmark channel, listening to changes of `owner`'s rows
    pub fn join(owner: Uuid, access_token: &str, reference: &str) -> Self {
        Self {
            topic: CHANNEL_TOPIC.to_string(),
            event: "phx_join".to_string(),
            payload: json!({
                "config": {
                    "broadcast": { "self": false },
                    "presence": { "key": "" },
                    "postgres_changes": [{
                        "event": "*",
                        "schema": "public",
                        "table": TABLE,
                        "filter": format!("user_id=eq.{}", owner),
                    }],
                },
                "access_token": access_token,
            }),
            reference: reference.to_string(),
        }
    }

    /// Keep the socket alive
    pub fn heartbeat(reference: &str) -> Self {
        Self {
            topic: HEARTBEAT_TOPIC.to_string(),
            event: "heartbeat".to_string(),
            payload: json!({}),
            reference: reference.to_string(),
        }
    }

    /// Leave the bookmark channel
    pub fn leave(reference: &str) -> Self {
        Self {
            topic: CHANNEL_TOPIC.to_string(),
            event: "phx_leave".to_string(),
            payload: json!({}),
            reference: reference.to_string(),
        }
    }

    /// Encode message to JSON text
    pub fn encode(&self) -> String {
        // Serializing a struct of strings and a Value cannot fail
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Raw frame as received
#[derive(Debug, Deserialize)]
struct RawFrame {
    topic: String,
    event: String,
    #[serde(default)]
    payload: Value,
    #[serde(rename = "ref", default)]
    reference: Option<String>,
}

/// Reply payload of `phx_reply`
#[derive(Debug, Deserialize)]
struct ReplyPayload {
    status: String,
    #[serde(default)]
    response: Value,
}

/// Payload of a `postgres_changes` event
#[derive(Debug, Deserialize)]
struct ChangesPayload {
    data: ChangeData,
}

#[derive(Debug, Deserialize)]
struct ChangeData {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    table: Option<String>,
    #[serde(default)]
    record: Option<Value>,
    #[serde(default)]
    old_record: Option<Value>,
}

/// Old row of a delete; without full replica identity only the key is set
#[derive(Debug, Deserialize)]
struct OldRecord {
    id: Uuid,
    #[serde(default)]
    user_id: Option<Uuid>,
}

/// Messages received from the realtime service
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// Reply to a client frame
    Reply {
        topic: String,
        reference: Option<String>,
        ok: bool,
        response: Value,
    },
    /// Row change on the subscribed table
    Change(PushEvent),
    /// Channel error or server initiated close
    ChannelClosed { topic: String, reason: String },
    /// Anything else (presence, system notices, unrelated tables)
    Other { topic: String, event: String },
}

impl ServerMessage {
    /// Decode a JSON text frame
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        let frame: RawFrame = serde_json::from_str(text)?;

        match frame.event.as_str() {
            "phx_reply" => {
                let reply: ReplyPayload = serde_json::from_value(frame.payload)?;
                Ok(ServerMessage::Reply {
                    topic: frame.topic,
                    reference: frame.reference,
                    ok: reply.status == "ok",
                    response: reply.response,
                })
            }
            "postgres_changes" => {
                let changes: ChangesPayload = serde_json::from_value(frame.payload)?;
                match changes_to_event(changes.data)? {
                    Some(event) => Ok(ServerMessage::Change(event)),
                    None => Ok(ServerMessage::Other {
                        topic: frame.topic,
                        event: frame.event,
                    }),
                }
            }
            "phx_error" | "phx_close" => Ok(ServerMessage::ChannelClosed {
                topic: frame.topic,
                reason: frame.event,
            }),
            "system" => {
                let failed = frame
                    .payload
                    .get("status")
                    .and_then(Value::as_str)
                    .map(|s| s == "error")
                    .unwrap_or(false);
                if failed {
                    let reason = frame
                        .payload
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or("system error")
                        .to_string();
                    Ok(ServerMessage::ChannelClosed {
                        topic: frame.topic,
                        reason,
                    })
                } else {
                    Ok(ServerMessage::Other {
                        topic: frame.topic,
                        event: frame.event,
                    })
                }
            }
            _ => Ok(ServerMessage::Other {
                topic: frame.topic,
                event: frame.event,
            }),
        }
    }
}

fn changes_to_event(data: ChangeData) -> Result<Option<PushEvent>, serde_json::Error> {
    if data.table.as_deref().is_some_and(|t| t != TABLE) {
        return Ok(None);
    }

    match data.kind.as_str() {
        "INSERT" => match data.record {
            Some(record) => {
                let bookmark: Bookmark = serde_json::from_value(record)?;
                Ok(Some(PushEvent::Inserted(bookmark)))
            }
            None => Ok(None),
        },
        "DELETE" => match data.old_record {
            Some(old) => {
                let old: OldRecord = serde_json::from_value(old)?;
                Ok(Some(PushEvent::Deleted {
                    id: old.id,
                    user_id: old.user_id,
                }))
            }
            None => Ok(None),
        },
        // Updates are not part of the bookmark lifecycle
        _ => Ok(None),
    }
}
