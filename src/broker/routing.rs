//! Routing table
//!
//! Everything the message path reads or mutates lives here: the topic
//! table, the subscription relation, the node connection registry and the
//! open sync requests. The broker keeps one `RoutingTable` behind one mutex
//! and never holds that lock across an await, so every method below is
//! observed atomically by concurrent dispatch loops.
//!
//! Subscriptions are stored twice, as topic -> subscribers and as
//! connection -> topics. Only the methods of this table touch either side,
//! which keeps the two mirrored.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::oneshot;

use super::node_connection::NodeConnection;
use super::topic::{BUILTIN_TOPICS, Topic, TopicKind, is_builtin};
use crate::transport::Message;
use crate::transport::message::check_topic_name;
use crate::utils::{Error, Result};

struct ConnectionEntry {
    connection: Arc<NodeConnection>,
    topics: HashSet<String>,
}

/// An outstanding sync request waiting for its single response.
pub struct SyncRequestEntry {
    pub topic: String,
    pub requester: Arc<NodeConnection>,
    pub slot: oneshot::Sender<Message>,
}

#[derive(Default)]
pub struct RoutingTable {
    topics: HashMap<String, Topic>,
    connections: HashMap<String, ConnectionEntry>,
    sync_requests: HashMap<String, SyncRequestEntry>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_builtin_topics(&mut self) {
        for (name, kind) in BUILTIN_TOPICS {
            self.topics
                .entry(name.to_string())
                .or_insert_with(|| Topic::new(name, kind));
        }
    }

    pub fn topic_kind(&self, name: &str) -> Option<TopicKind> {
        self.topics.get(name).map(|topic| topic.kind)
    }

    /// Add topics of one kind. Topics already present with the same kind are
    /// skipped; a topic present with the other kind fails the whole call.
    /// Returns the topics that were actually added.
    pub fn add_topics(&mut self, kind: TopicKind, names: &[String]) -> Result<Vec<String>> {
        for name in names {
            check_topic_name(name)?;
            if let Some(existing) = self.topics.get(name) {
                if existing.kind != kind {
                    return Err(Error::protocol(format!(
                        "topic \"{name}\" is already registered as {}",
                        existing.kind
                    )));
                }
            }
        }
        let mut added = Vec::new();
        for name in names {
            if !self.topics.contains_key(name) {
                self.topics.insert(name.clone(), Topic::new(name, kind));
                added.push(name.clone());
            }
        }
        Ok(added)
    }

    /// Fail unless every name is a removable topic of `kind`.
    pub fn check_removable(&self, kind: TopicKind, names: &[String]) -> Result<()> {
        for name in names {
            if is_builtin(name) {
                return Err(Error::protocol(format!(
                    "built-in topic \"{name}\" cannot be removed"
                )));
            }
            match self.topics.get(name) {
                Some(topic) if topic.kind == kind => {}
                Some(topic) => {
                    return Err(Error::protocol(format!(
                        "topic \"{name}\" is {}, not {kind}",
                        topic.kind
                    )));
                }
                None => {
                    return Err(Error::protocol(format!("topic \"{name}\" does not exist")));
                }
            }
        }
        Ok(())
    }

    /// Remove topics of `kind` together with their subscriptions. Missing
    /// topics are ignored. Returns the topics that were removed.
    pub fn remove_topics(&mut self, kind: TopicKind, names: &[String]) -> Vec<String> {
        let mut removed = Vec::new();
        for name in names {
            if is_builtin(name) || self.topic_kind(name) != Some(kind) {
                continue;
            }
            if let Some(topic) = self.topics.remove(name) {
                for subscriber in topic.subscribers() {
                    if let Some(entry) = self.connections.get_mut(subscriber.name()) {
                        entry.topics.remove(name);
                    }
                }
                removed.push(name.clone());
            }
        }
        removed
    }

    /// Names of the non built-in topics of `kind`, sorted.
    pub fn topics(&self, kind: TopicKind) -> Vec<String> {
        let mut names: Vec<String> = self
            .topics
            .values()
            .filter(|topic| topic.kind == kind && !is_builtin(&topic.name))
            .map(|topic| topic.name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn register(&mut self, connection: Arc<NodeConnection>) -> Result<()> {
        if self.connections.contains_key(connection.name()) {
            return Err(Error::handshake(format!(
                "node name \"{}\" is already in use",
                connection.name()
            )));
        }
        self.connections.insert(
            connection.name().to_string(),
            ConnectionEntry {
                connection,
                topics: HashSet::new(),
            },
        );
        Ok(())
    }

    /// Close `connection` and drop it from the registry and from every topic
    /// it subscribed to. Only the registered instance is removed, so a stale
    /// handle cannot evict a newer connection that reuses the name. Returns
    /// whether anything was removed.
    pub fn remove(&mut self, connection: &Arc<NodeConnection>) -> bool {
        let registered = self
            .connections
            .get(connection.name())
            .is_some_and(|entry| Arc::ptr_eq(&entry.connection, connection));
        if !registered {
            connection.close();
            return false;
        }
        self.remove_by_name(connection.name()).is_some()
    }

    pub fn remove_by_name(&mut self, name: &str) -> Option<Arc<NodeConnection>> {
        let entry = self.connections.remove(name)?;
        for topic in &entry.topics {
            if let Some(topic) = self.topics.get_mut(topic) {
                topic.unsubscribe(name);
            }
        }
        entry.connection.close();
        Some(entry.connection)
    }

    pub fn connection(&self, name: &str) -> Option<Arc<NodeConnection>> {
        self.connections
            .get(name)
            .map(|entry| entry.connection.clone())
    }

    pub fn connection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.connections.keys().cloned().collect();
        names.sort();
        names
    }

    /// Topics the named connection is subscribed to, sorted.
    pub fn subscriptions(&self, name: &str) -> Option<Vec<String>> {
        self.connections.get(name).map(|entry| {
            let mut topics: Vec<String> = entry.topics.iter().cloned().collect();
            topics.sort();
            topics
        })
    }

    pub fn subscribe(&mut self, name: &str, topic: &str) -> Result<()> {
        if is_builtin(topic) {
            return Err(Error::protocol(format!(
                "cannot subscribe to built-in topic \"{topic}\""
            )));
        }
        let entry = self
            .connections
            .get_mut(name)
            .ok_or_else(|| Error::protocol(format!("node \"{name}\" is not connected")))?;
        let topic_entry = self
            .topics
            .get_mut(topic)
            .ok_or_else(|| Error::protocol(format!("topic \"{topic}\" does not exist")))?;
        topic_entry.subscribe(entry.connection.clone())?;
        entry.topics.insert(topic.to_string());
        Ok(())
    }

    pub fn unsubscribe(&mut self, name: &str, topic: &str) -> Result<()> {
        let entry = self
            .connections
            .get_mut(name)
            .ok_or_else(|| Error::protocol(format!("node \"{name}\" is not connected")))?;
        if !entry.topics.remove(topic) {
            return Err(Error::protocol(format!(
                "\"{name}\" is not subscribed to topic \"{topic}\""
            )));
        }
        if let Some(topic) = self.topics.get_mut(topic) {
            topic.unsubscribe(name);
        }
        Ok(())
    }

    pub fn subscribers(&self, topic: &str) -> Vec<Arc<NodeConnection>> {
        self.topics
            .get(topic)
            .map(|topic| topic.subscribers().cloned().collect())
            .unwrap_or_default()
    }

    pub fn subscriber_names(&self, topic: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .subscribers(topic)
            .iter()
            .map(|connection| connection.name().to_string())
            .collect();
        names.sort();
        names
    }

    /// Open a sync request under `token`. The returned receiver yields the
    /// response once `take_sync_request` hands it over.
    pub fn register_sync_request(
        &mut self,
        token: &str,
        topic: &str,
        requester: Arc<NodeConnection>,
    ) -> Result<oneshot::Receiver<Message>> {
        if self.sync_requests.contains_key(token) {
            return Err(Error::protocol(format!("token \"{token}\" is already in use")));
        }
        let has_subscribers = self
            .topics
            .get(topic)
            .is_some_and(|topic| topic.subscriber_count() > 0);
        if !has_subscribers {
            return Err(Error::protocol(format!("no subscribers to topic \"{topic}\"")));
        }
        let (slot, response) = oneshot::channel();
        self.sync_requests.insert(
            token.to_string(),
            SyncRequestEntry {
                topic: topic.to_string(),
                requester,
                slot,
            },
        );
        Ok(response)
    }

    pub fn take_sync_request(&mut self, token: &str) -> Option<SyncRequestEntry> {
        self.sync_requests.remove(token)
    }

    /// Drop the request if it is still open. Returns `false` when a response
    /// already claimed it.
    pub fn expire_sync_request(&mut self, token: &str) -> bool {
        self.sync_requests.remove(token).is_some()
    }

    pub fn has_sync_request(&self, token: &str) -> bool {
        self.sync_requests.contains_key(token)
    }

    pub fn sync_request_count(&self) -> usize {
        self.sync_requests.len()
    }

    /// Empty the table. Open sync requests are dropped, which fails their
    /// waiters, and every connection is closed and returned.
    pub fn clear(&mut self) -> Vec<Arc<NodeConnection>> {
        self.sync_requests.clear();
        self.topics.clear();
        self.connections
            .drain()
            .map(|(_, entry)| {
                entry.connection.close();
                entry.connection
            })
            .collect()
    }
}
