//! Inbound payload classification and event types

use crate::{ActivityError, Result};
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use std::fmt;

/// Field naming the account a batch belongs to
pub const FOR_USER_ID_FIELD: &str = "for_user_id";

/// Suffix stripped from batch field names to get the event kind
pub const EVENTS_SUFFIX: &str = "_events";

/// Kind of an account activity event
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ActivityKind {
    TweetCreate,
    TweetDelete,
    Favorite,
    Follow,
    Block,
    Mute,
    DirectMessage,
    DirectMessageIndicateTyping,
    DirectMessageMarkRead,
    /// The user revoked the app's access; terminal
    Revoke,
    /// The app unsubscribed the user; terminal
    Unsubscribe,
    /// Any field the provider sends that has no dedicated kind (`users`, `apps`, …)
    Other(String),
}

impl ActivityKind {
    /// Map a batch field name to its kind, stripping a trailing `_events`
    pub fn from_field(field: &str) -> Self {
        let name = field.strip_suffix(EVENTS_SUFFIX).unwrap_or(field);
        match name {
            "tweet_create" => Self::TweetCreate,
            "tweet_delete" => Self::TweetDelete,
            "favorite" => Self::Favorite,
            "follow" => Self::Follow,
            "block" => Self::Block,
            "mute" => Self::Mute,
            "direct_message" => Self::DirectMessage,
            "direct_message_indicate_typing" => Self::DirectMessageIndicateTyping,
            "direct_message_mark_read" => Self::DirectMessageMarkRead,
            "revoke" => Self::Revoke,
            "unsubscribe" => Self::Unsubscribe,
            other => Self::Other(other.to_string()),
        }
    }

    /// Event name as delivered to listeners
    pub fn as_str(&self) -> &str {
        match self {
            Self::TweetCreate => "tweet_create",
            Self::TweetDelete => "tweet_delete",
            Self::Favorite => "favorite",
            Self::Follow => "follow",
            Self::Block => "block",
            Self::Mute => "mute",
            Self::DirectMessage => "direct_message",
            Self::DirectMessageIndicateTyping => "direct_message_indicate_typing",
            Self::DirectMessageMarkRead => "direct_message_mark_read",
            Self::Revoke => "revoke",
            Self::Unsubscribe => "unsubscribe",
            Self::Other(name) => name,
        }
    }

    /// Whether the stream closes after this event
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Revoke | Self::Unsubscribe)
    }
}

impl fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event delivered on an account's stream
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityEvent {
    pub kind: ActivityKind,
    pub payload: Value,
}

impl ActivityEvent {
    pub fn new(kind: ActivityKind, payload: Value) -> Self {
        Self { kind, payload }
    }

    /// A payload-less terminal notification
    pub fn terminal(kind: ActivityKind) -> Self {
        Self::new(kind, Value::Null)
    }
}

/// An event as seen on the global observability stream
#[derive(Debug, Clone, PartialEq)]
pub struct ObservedEvent {
    pub kind: ActivityKind,
    pub account_id: String,
    pub payload: Value,
}

/// One batch field: a kind and its events in document order
#[derive(Debug, Clone, PartialEq)]
pub struct EventField {
    pub kind: ActivityKind,
    pub events: Vec<Value>,
}

/// A decoded webhook POST body
#[derive(Debug, Clone, PartialEq)]
pub enum InboundPayload {
    /// Events for one account, keyed by `for_user_id`
    AccountBatch {
        for_user_id: String,
        fields: Vec<EventField>,
    },
    /// `user_event.revoke` notification
    Revoke { user_id: String, revoke: Value },
    /// Anything else, kept verbatim
    Unknown(Value),
}

impl InboundPayload {
    /// Classify a decoded JSON body
    pub fn classify(value: Value) -> Self {
        match value {
            Value::Object(map) => Self::classify_object(map),
            other => Self::Unknown(other),
        }
    }

    fn classify_object(map: Map<String, Value>) -> Self {
        if let Some(Value::String(for_user_id)) = map.get(FOR_USER_ID_FIELD) {
            let for_user_id = for_user_id.clone();
            let fields = map
                .into_iter()
                .filter(|(name, _)| name != FOR_USER_ID_FIELD)
                .map(|(name, value)| EventField {
                    kind: ActivityKind::from_field(&name),
                    events: match value {
                        Value::Array(events) => events,
                        single => vec![single],
                    },
                })
                .collect();
            return Self::AccountBatch {
                for_user_id,
                fields,
            };
        }

        let revoker = map
            .get("user_event")
            .and_then(|user_event| user_event.get("revoke"))
            .filter(|revoke| revoke.is_object())
            .and_then(|revoke| Some((revoke_user_id(revoke)?, revoke.clone())));

        match revoker {
            Some((user_id, revoke)) => Self::Revoke { user_id, revoke },
            None => Self::Unknown(Value::Object(map)),
        }
    }

    /// Decode and classify a raw body
    pub fn from_slice(body: &[u8]) -> Result<Self> {
        serde_json::from_slice(body).map_err(ActivityError::from)
    }

    /// Number of individual events carried
    pub fn event_count(&self) -> usize {
        match self {
            Self::AccountBatch { fields, .. } => fields.iter().map(|f| f.events.len()).sum(),
            Self::Revoke { .. } => 1,
            Self::Unknown(_) => 0,
        }
    }
}

fn revoke_user_id(revoke: &Value) -> Option<String> {
    match revoke.pointer("/source/user_id")? {
        Value::String(id) => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

impl<'de> Deserialize<'de> for InboundPayload {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Value::deserialize(deserializer).map(Self::classify)
    }
}
