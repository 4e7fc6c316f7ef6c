//! Event channel message types

use itemsync_common::Item;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Messages sent by the client over the event channel
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    /// First message after the socket opens
    Auth { token: String },
}

/// Messages pushed by the server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "lowercase")]
pub enum ChannelMessage {
    /// Acknowledges the auth message and issues a connection identity
    Authenticated {
        #[serde(rename = "connectionId", default)]
        connection_id: Option<String>,
        #[serde(rename = "userId", default)]
        user_id: Option<i64>,
    },

    Created { item: Item },

    Updated { item: Item },

    /// Deletions may carry the whole item or only its id
    Deleted {
        #[serde(default)]
        item: Option<Item>,
        #[serde(default)]
        id: Option<i64>,
    },

    Error {
        #[serde(default)]
        message: Option<String>,
    },
}

impl ChannelMessage {
    /// Serialize message to JSON text
    pub fn to_text(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize message from JSON text
    pub fn from_text(text: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Lifecycle messages as engine events; `None` for control messages
    pub fn into_remote_event(self) -> Option<RemoteEvent> {
        match self {
            ChannelMessage::Created { item } => Some(RemoteEvent {
                kind: RemoteEventKind::Created,
                item_id: item.id,
                item: Some(item),
            }),
            ChannelMessage::Updated { item } => Some(RemoteEvent {
                kind: RemoteEventKind::Updated,
                item_id: item.id,
                item: Some(item),
            }),
            ChannelMessage::Deleted { item, id } => {
                let item_id = item.as_ref().map(|i| i.id).or(id)?;
                Some(RemoteEvent {
                    kind: RemoteEventKind::Deleted,
                    item_id,
                    item,
                })
            }
            ChannelMessage::Authenticated { .. } | ChannelMessage::Error { .. } => None,
        }
    }
}

impl ClientMessage {
    pub fn to_text(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Lifecycle event kind of the shared collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteEventKind {
    Created,
    Updated,
    Deleted,
}

impl fmt::Display for RemoteEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RemoteEventKind::Created => "created",
            RemoteEventKind::Updated => "updated",
            RemoteEventKind::Deleted => "deleted",
        };
        f.write_str(name)
    }
}

/// A created/updated/deleted notification about one item
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteEvent {
    pub kind: RemoteEventKind,
    pub item_id: i64,
    pub item: Option<Item>,
}

impl RemoteEvent {
    pub fn created(item: Item) -> Self {
        Self {
            kind: RemoteEventKind::Created,
            item_id: item.id,
            item: Some(item),
        }
    }

    pub fn updated(item: Item) -> Self {
        Self {
            kind: RemoteEventKind::Updated,
            item_id: item.id,
            item: Some(item),
        }
    }

    pub fn deleted(id: i64) -> Self {
        Self {
            kind: RemoteEventKind::Deleted,
            item_id: id,
            item: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_message_shape() {
        let text = ClientMessage::Auth {
            token: "t0k3n".to_string(),
        }
        .to_text()
        .unwrap();
        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(json["type"], "auth");
        assert_eq!(json["token"], "t0k3n");
    }

    #[test]
    fn test_authenticated_carries_connection_id() {
        let msg = ChannelMessage::from_text(
            r#"{"event":"authenticated","payload":{"userId":4,"connectionId":"c-17"}}"#,
        )
        .unwrap();
        match msg {
            ChannelMessage::Authenticated {
                connection_id,
                user_id,
            } => {
                assert_eq!(connection_id.as_deref(), Some("c-17"));
                assert_eq!(user_id, Some(4));
            }
            _ => panic!("Expected Authenticated message"),
        }
    }

    #[test]
    fn test_created_becomes_remote_event() {
        let msg = ChannelMessage::from_text(
            r#"{"event":"created","payload":{"item":{"id":9,"text":"Pay rent","completed":false,
            "version":1,"createdAt":"2026-01-01T00:00:00Z","updatedAt":"2026-01-01T00:00:00Z"}}}"#,
        )
        .unwrap();
        let event = msg.into_remote_event().unwrap();
        assert_eq!(event.kind, RemoteEventKind::Created);
        assert_eq!(event.item_id, 9);
    }

    #[test]
    fn test_deleted_by_bare_id() {
        let msg =
            ChannelMessage::from_text(r#"{"event":"deleted","payload":{"id":5}}"#).unwrap();
        let event = msg.into_remote_event().unwrap();
        assert_eq!(event, RemoteEvent::deleted(5));

        let empty = ChannelMessage::from_text(r#"{"event":"deleted","payload":{}}"#).unwrap();
        assert!(empty.into_remote_event().is_none());
    }

    #[test]
    fn test_unknown_event_is_error() {
        assert!(ChannelMessage::from_text(r#"{"event":"moved","payload":{}}"#).is_err());
    }
}
