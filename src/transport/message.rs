use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::LimitSettings;
use crate::utils::{Error, Result};

/// Topic names with a fixed meaning on the wire.
pub mod topics {
    pub const CONNECT: &str = "connect";
    pub const CONNECTED: &str = "connected";
    pub const SUBSCRIBE: &str = "subscribe";
    pub const UNSUBSCRIBE: &str = "unsubscribe";
    pub const SUBSCRIBED: &str = "subscribed";
    pub const UNSUBSCRIBED: &str = "unsubscribed";
    pub const HEARTBEAT: &str = "heartbeat";
    pub const ERROR: &str = "error";
    pub const FAILURE: &str = "failure";
    pub const SUCCESS: &str = "success";

    pub const RESOLVE_ASYNC: &str = "resolveAsync";
    pub const RESOLVE_SYNC: &str = "resolveSync";
    pub const RESOLVED: &str = "resolved";

    pub const ADD_SYNC_TOPICS: &str = "addSyncTopics";
    pub const REMOVE_SYNC_TOPICS: &str = "removeSyncTopics";
    pub const ADD_ASYNC_TOPICS: &str = "addAsyncTopics";
    pub const REMOVE_ASYNC_TOPICS: &str = "removeAsyncTopics";
    pub const ADD_ALLOWLIST: &str = "addAllowlist";
    pub const REMOVE_ALLOWLIST: &str = "removeAllowlist";
    pub const ADD_DENYLIST: &str = "addDenylist";
    pub const REMOVE_DENYLIST: &str = "removeDenylist";

    /// Separator of topic lists in payloads.
    pub const LIST_SEPARATOR: char = '|';
}

/// What a message means to the receiving side. Resolved once per message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Connect,
    Subscribe,
    Unsubscribe,
    SyncRequest,
    SyncResponse,
    AsyncMessage,
}

/// The wire record exchanged between nodes, brokers and resolvers.
///
/// A message carries at most one of the two tokens. Without a token it is
/// asynchronous, with a request token it expects exactly one response, and
/// with a response token it answers the request carrying the same token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    topic: String,
    origin: String,
    #[serde(default)]
    payload: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    sync_request_token: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    sync_response_token: String,
}

impl Message {
    pub fn new_async(
        topic: impl Into<String>,
        origin: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            topic: topic.into(),
            origin: origin.into(),
            payload: payload.into(),
            sync_request_token: String::new(),
            sync_response_token: String::new(),
        }
    }

    /// A sync request with a fresh random token.
    pub fn new_sync_request(
        topic: impl Into<String>,
        origin: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self::new_async(topic, origin, payload).with_sync_request_token(Uuid::new_v4().to_string())
    }

    pub fn with_sync_request_token(mut self, token: impl Into<String>) -> Self {
        self.sync_request_token = token.into();
        self.sync_response_token.clear();
        self
    }

    /// Build the response to this request. The response token is this
    /// message's request token.
    pub fn response(
        &self,
        topic: impl Into<String>,
        origin: impl Into<String>,
        payload: impl Into<String>,
    ) -> Message {
        Message {
            topic: topic.into(),
            origin: origin.into(),
            payload: payload.into(),
            sync_request_token: String::new(),
            sync_response_token: self.sync_request_token.clone(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn sync_request_token(&self) -> &str {
        &self.sync_request_token
    }

    pub fn sync_response_token(&self) -> &str {
        &self.sync_response_token
    }

    pub fn is_sync_request(&self) -> bool {
        !self.sync_request_token.is_empty()
    }

    pub fn is_sync_response(&self) -> bool {
        !self.sync_response_token.is_empty()
    }

    pub fn kind(&self) -> MessageKind {
        if self.is_sync_response() {
            return MessageKind::SyncResponse;
        }
        match self.topic.as_str() {
            topics::CONNECT => MessageKind::Connect,
            topics::SUBSCRIBE => MessageKind::Subscribe,
            topics::UNSUBSCRIBE => MessageKind::Unsubscribe,
            _ if self.is_sync_request() => MessageKind::SyncRequest,
            _ => MessageKind::AsyncMessage,
        }
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Maximum field lengths in bytes; 0 disables a check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MessageLimits {
    pub max_topic_size: usize,
    pub max_origin_size: usize,
    pub max_payload_size: usize,
    pub max_token_size: usize,
}

impl MessageLimits {
    pub fn unlimited() -> Self {
        Self::default()
    }

    /// Reject messages with missing required fields, two tokens, or a
    /// field larger than its limit.
    pub fn validate(&self, message: &Message) -> Result<()> {
        if message.topic.is_empty() {
            return Err(Error::validation("topic is empty"));
        }
        if exceeds(&message.topic, self.max_topic_size) {
            return Err(Error::validation(format!(
                "topic exceeds {} bytes",
                self.max_topic_size
            )));
        }
        if message.origin.is_empty() {
            return Err(Error::validation("origin is empty"));
        }
        if exceeds(&message.origin, self.max_origin_size) {
            return Err(Error::validation(format!(
                "origin exceeds {} bytes",
                self.max_origin_size
            )));
        }
        if exceeds(&message.payload, self.max_payload_size) {
            return Err(Error::validation(format!(
                "payload exceeds {} bytes",
                self.max_payload_size
            )));
        }
        if exceeds(&message.sync_request_token, self.max_token_size)
            || exceeds(&message.sync_response_token, self.max_token_size)
        {
            return Err(Error::validation(format!(
                "token exceeds {} bytes",
                self.max_token_size
            )));
        }
        if message.is_sync_request() && message.is_sync_response() {
            return Err(Error::validation(
                "message carries both a request and a response token",
            ));
        }
        Ok(())
    }
}

fn exceeds(field: &str, limit: usize) -> bool {
    limit > 0 && field.len() > limit
}

impl From<&LimitSettings> for MessageLimits {
    fn from(settings: &LimitSettings) -> Self {
        Self {
            max_topic_size: settings.max_topic_size,
            max_origin_size: settings.max_origin_size,
            max_payload_size: settings.max_payload_size,
            max_token_size: settings.max_token_size,
        }
    }
}

/// Fails for names that would not survive a topic list unchanged.
pub fn check_topic_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::validation("topic name is empty"));
    }
    if name.contains(topics::LIST_SEPARATOR) {
        return Err(Error::validation(format!(
            "topic name \"{name}\" contains the list separator \"{}\"",
            topics::LIST_SEPARATOR
        )));
    }
    if name.trim() != name {
        return Err(Error::validation(format!(
            "topic name \"{name}\" has surrounding whitespace"
        )));
    }
    Ok(())
}

/// Split a `|`-separated topic list, dropping empty entries.
pub fn split_topic_list(list: &str) -> Vec<String> {
    list.split(topics::LIST_SEPARATOR)
        .map(str::trim)
        .filter(|topic| !topic.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn join_topic_list<S: AsRef<str>>(topics: &[S]) -> String {
    topics
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join(&topics::LIST_SEPARATOR.to_string())
}
