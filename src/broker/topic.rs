use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::node_connection::NodeConnection;
use crate::transport::topics;
use crate::utils::{Error, Result};

/// Whether messages on a topic are fire-and-forget or request/response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopicKind {
    Sync,
    Async,
}

impl fmt::Display for TopicKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TopicKind::Sync => f.write_str("sync"),
            TopicKind::Async => f.write_str("async"),
        }
    }
}

impl TopicKind {
    /// Request topic that asks a resolver for a topic of this kind.
    pub fn resolve_request(self) -> &'static str {
        match self {
            TopicKind::Sync => topics::RESOLVE_SYNC,
            TopicKind::Async => topics::RESOLVE_ASYNC,
        }
    }

    /// Request topic that adds topics of this kind, both on a broker's
    /// config port and at a resolver.
    pub fn add_request(self) -> &'static str {
        match self {
            TopicKind::Sync => topics::ADD_SYNC_TOPICS,
            TopicKind::Async => topics::ADD_ASYNC_TOPICS,
        }
    }

    pub fn remove_request(self) -> &'static str {
        match self {
            TopicKind::Sync => topics::REMOVE_SYNC_TOPICS,
            TopicKind::Async => topics::REMOVE_ASYNC_TOPICS,
        }
    }
}

/// Topics every running broker serves and never registers with a resolver.
pub const BUILTIN_TOPICS: [(&str, TopicKind); 3] = [
    (topics::SUBSCRIBE, TopicKind::Sync),
    (topics::UNSUBSCRIBE, TopicKind::Sync),
    (topics::HEARTBEAT, TopicKind::Async),
];

pub fn is_builtin(name: &str) -> bool {
    BUILTIN_TOPICS.iter().any(|(builtin, _)| *builtin == name)
}

/// Represents a topic served by the broker.
///
/// Holds the topic's kind and its current subscribers keyed by node
/// connection name. A sync topic routes each request to a single consumer
/// and therefore accepts at most one subscriber.
#[derive(Debug)]
pub struct Topic {
    pub name: String,
    pub kind: TopicKind,
    subscribers: HashMap<String, Arc<NodeConnection>>,
}

impl Topic {
    pub fn new(name: &str, kind: TopicKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            subscribers: HashMap::new(),
        }
    }

    /// Adds a subscriber. Fails if it is already subscribed or if this is a
    /// sync topic that already has a subscriber.
    pub fn subscribe(&mut self, connection: Arc<NodeConnection>) -> Result<()> {
        if self.subscribers.contains_key(connection.name()) {
            return Err(Error::protocol(format!(
                "\"{}\" is already subscribed to topic \"{}\"",
                connection.name(),
                self.name
            )));
        }
        if self.kind == TopicKind::Sync && !self.subscribers.is_empty() {
            return Err(Error::protocol(format!(
                "sync topic \"{}\" already has a subscriber",
                self.name
            )));
        }
        self.subscribers
            .insert(connection.name().to_string(), connection);
        Ok(())
    }

    /// Removes a subscriber; returns whether it was subscribed.
    pub fn unsubscribe(&mut self, name: &str) -> bool {
        self.subscribers.remove(name).is_some()
    }

    pub fn subscribers(&self) -> impl Iterator<Item = &Arc<NodeConnection>> {
        self.subscribers.values()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}
