//! Client state
//!
//! The subscribed topics, the resolution cache, the broker connection pool
//! and the in-flight resolution and connection attempts of one broker
//! client. All of it sits behind a single mutex in `Client`; every method
//! here runs under that lock, so a diff-and-swap of a resolution is never
//! observed half done.
//!
//! A pooled connection stays open while at least one topic names it as
//! responsible. Releasing the last topic closes and evicts it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::broker::TopicKind;
use crate::transport::{Connection, TcpEndpoint};
use crate::utils::{Completion, Error, Result};

pub(super) type ConnectionOutcome = std::result::Result<Arc<Connection>, String>;
type AttemptOutcome = std::result::Result<Vec<Arc<Connection>>, String>;

/// One in-flight resolution of a topic, shared by every caller that asked
/// for the topic while it runs.
pub struct ResolutionAttempt {
    pub kind: TopicKind,
    done: Completion<AttemptOutcome>,
}

impl ResolutionAttempt {
    pub fn new(kind: TopicKind) -> Self {
        Self {
            kind,
            done: Completion::new(),
        }
    }

    pub fn complete(&self, outcome: AttemptOutcome) -> bool {
        self.done.complete(outcome)
    }

    pub async fn wait(&self) -> Result<Vec<Arc<Connection>>> {
        match self.done.wait().await {
            Some(Ok(connections)) => Ok(connections),
            Some(Err(reason)) => Err(Error::Resolution(reason)),
            None => Err(Error::resolution("resolution attempt was dropped")),
        }
    }
}

struct TopicResolution {
    kind: TopicKind,
    connections: Vec<Arc<Connection>>,
    expires_at: Option<Instant>,
    generation: u64,
}

impl TopicResolution {
    fn live_connections(&self, now: Instant) -> Option<Vec<Arc<Connection>>> {
        if self.expires_at.is_some_and(|expires_at| now >= expires_at) {
            return None;
        }
        let live: Vec<Arc<Connection>> = self
            .connections
            .iter()
            .filter(|connection| !connection.is_closed())
            .cloned()
            .collect();
        (!live.is_empty()).then_some(live)
    }
}

struct BrokerConnection {
    connection: Arc<Connection>,
    /// Topics whose resolution holds this connection open.
    topics: HashSet<String>,
    /// Topics this client subscribed to over this connection.
    subscriptions: HashSet<String>,
}

/// Outcome of a resolution's time to live running out.
#[derive(Debug, PartialEq, Eq)]
pub enum Expiry {
    /// The resolution was replaced or dropped in the meantime.
    Stale,
    /// The topic is still subscribed and must be resolved again.
    Refresh(TopicKind),
    /// The topic is no longer subscribed; the resolution was dropped.
    Released,
}

#[derive(Default)]
pub struct ClientState {
    subscribed: HashMap<String, TopicKind>,
    resolutions: HashMap<String, TopicResolution>,
    attempts: HashMap<String, Arc<ResolutionAttempt>>,
    connections: HashMap<String, BrokerConnection>,
    connection_attempts: HashMap<String, Arc<Completion<ConnectionOutcome>>>,
    generation: u64,
}

impl ClientState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if the topic was already subscribed with this kind.
    pub fn subscribe(&mut self, topic: &str, kind: TopicKind) -> Result<bool> {
        match self.subscribed.get(topic) {
            Some(existing) if *existing == kind => Ok(false),
            Some(existing) => Err(Error::protocol(format!(
                "topic \"{topic}\" is already subscribed as {existing}"
            ))),
            None => {
                self.subscribed.insert(topic.to_string(), kind);
                Ok(true)
            }
        }
    }

    pub fn unsubscribe(&mut self, topic: &str, kind: TopicKind) -> Result<()> {
        match self.subscribed.get(topic) {
            Some(existing) if *existing == kind => {
                self.subscribed.remove(topic);
                Ok(())
            }
            _ => Err(Error::protocol(format!(
                "{kind} topic \"{topic}\" is not subscribed"
            ))),
        }
    }

    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.subscribed.contains_key(topic)
    }

    pub fn subscribed_kind(&self, topic: &str) -> Option<TopicKind> {
        self.subscribed.get(topic).copied()
    }

    /// Subscribed topics of `kind`, sorted.
    pub fn subscribed_topics(&self, kind: TopicKind) -> Vec<String> {
        let mut topics: Vec<String> = self
            .subscribed
            .iter()
            .filter(|(_, subscribed)| **subscribed == kind)
            .map(|(topic, _)| topic.clone())
            .collect();
        topics.sort();
        topics
    }

    pub fn all_subscribed(&self) -> Vec<(String, TopicKind)> {
        let mut topics: Vec<(String, TopicKind)> = self
            .subscribed
            .iter()
            .map(|(topic, kind)| (topic.clone(), *kind))
            .collect();
        topics.sort_by(|a, b| a.0.cmp(&b.0));
        topics
    }

    /// The open connections of an unexpired resolution of `topic` as a
    /// `kind` topic.
    pub fn cached_resolution(
        &self,
        topic: &str,
        kind: TopicKind,
        now: Instant,
    ) -> Option<Vec<Arc<Connection>>> {
        self.resolutions
            .get(topic)
            .filter(|resolution| resolution.kind == kind)
            .and_then(|resolution| resolution.live_connections(now))
    }

    pub fn is_resolved(&self, topic: &str, now: Instant) -> bool {
        self.resolutions
            .get(topic)
            .is_some_and(|resolution| resolution.live_connections(now).is_some())
    }

    /// Mark the resolution of `topic` as expired without releasing anything;
    /// the next resolution replaces it.
    pub fn invalidate(&mut self, topic: &str, now: Instant) {
        if let Some(resolution) = self.resolutions.get_mut(topic) {
            resolution.expires_at = Some(now);
        }
    }

    pub fn resolved_endpoints(&self, topic: &str) -> Vec<TcpEndpoint> {
        self.resolutions
            .get(topic)
            .map(|resolution| {
                resolution
                    .connections
                    .iter()
                    .map(|connection| connection.endpoint().clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn attempt(&self, topic: &str) -> Option<Arc<ResolutionAttempt>> {
        self.attempts.get(topic).cloned()
    }

    pub fn insert_attempt(&mut self, topic: &str, attempt: Arc<ResolutionAttempt>) {
        self.attempts.insert(topic.to_string(), attempt);
    }

    pub fn finish_attempt(&mut self, topic: &str, attempt: &Arc<ResolutionAttempt>) {
        let current = self
            .attempts
            .get(topic)
            .is_some_and(|current| Arc::ptr_eq(current, attempt));
        if current {
            self.attempts.remove(topic);
        }
    }

    pub fn pooled_connection(&self, identity: &str) -> Option<Arc<Connection>> {
        self.connections
            .get(identity)
            .filter(|entry| !entry.connection.is_closed())
            .map(|entry| entry.connection.clone())
    }

    /// Join the connection attempt for `identity` or open a new one. The
    /// flag is `true` for the caller that must perform the attempt.
    pub fn connection_attempt(&mut self, identity: &str) -> (Arc<Completion<ConnectionOutcome>>, bool) {
        if let Some(attempt) = self.connection_attempts.get(identity) {
            return (attempt.clone(), false);
        }
        let attempt = Arc::new(Completion::new());
        self.connection_attempts
            .insert(identity.to_string(), attempt.clone());
        (attempt, true)
    }

    pub fn finish_connection_attempt(&mut self, identity: &str) {
        self.connection_attempts.remove(identity);
    }

    pub fn add_connection(&mut self, connection: Arc<Connection>) {
        let identity = connection.endpoint().identity();
        self.connections.insert(
            identity,
            BrokerConnection {
                connection,
                topics: HashSet::new(),
                subscriptions: HashSet::new(),
            },
        );
    }

    fn entry_mut(&mut self, connection: &Arc<Connection>) -> Option<&mut BrokerConnection> {
        self.connections
            .get_mut(&connection.endpoint().identity())
            .filter(|entry| Arc::ptr_eq(&entry.connection, connection))
    }

    /// Record that `topic` holds `connection` open. Fails if the connection
    /// has left the pool.
    pub fn mark_responsible(&mut self, connection: &Arc<Connection>, topic: &str) -> bool {
        match self.entry_mut(connection) {
            Some(entry) => {
                entry.topics.insert(topic.to_string());
                true
            }
            None => false,
        }
    }

    /// Returns `true` if the subscription still has to be sent.
    pub fn mark_subscribed(&mut self, connection: &Arc<Connection>, topic: &str) -> bool {
        self.entry_mut(connection)
            .is_some_and(|entry| entry.subscriptions.insert(topic.to_string()))
    }

    pub fn unmark_subscribed(&mut self, connection: &Arc<Connection>, topic: &str) {
        if let Some(entry) = self.entry_mut(connection) {
            entry.subscriptions.remove(topic);
        }
    }

    /// Connections subscribed to `topic`; the subscriptions are forgotten.
    pub fn take_subscriptions(&mut self, topic: &str) -> Vec<Arc<Connection>> {
        self.connections
            .values_mut()
            .filter_map(|entry| {
                entry
                    .subscriptions
                    .remove(topic)
                    .then(|| entry.connection.clone())
            })
            .collect()
    }

    /// Drop `topic` from the responsibilities of `connection`, closing and
    /// evicting the connection if nothing else holds it open.
    fn release(&mut self, connection: &Arc<Connection>, topic: &str) -> bool {
        let Some(entry) = self.entry_mut(connection) else {
            return false;
        };
        entry.topics.remove(topic);
        entry.subscriptions.remove(topic);
        if !entry.topics.is_empty() {
            return false;
        }
        self.connections.remove(&connection.endpoint().identity());
        connection.close();
        true
    }

    /// Replace the resolution of `topic`. Connections of the previous
    /// resolution that are not part of the new one are released. Returns the
    /// generation of the new resolution.
    pub fn publish_resolution(
        &mut self,
        topic: &str,
        kind: TopicKind,
        connections: Vec<Arc<Connection>>,
        ttl: Option<Duration>,
        now: Instant,
    ) -> u64 {
        if let Some(previous) = self.resolutions.remove(topic) {
            for connection in &previous.connections {
                let kept = connections
                    .iter()
                    .any(|current| Arc::ptr_eq(current, connection));
                if !kept {
                    self.release(connection, topic);
                }
            }
        }
        self.generation += 1;
        self.resolutions.insert(
            topic.to_string(),
            TopicResolution {
                kind,
                connections,
                expires_at: ttl.map(|ttl| now + ttl),
                generation: self.generation,
            },
        );
        self.generation
    }

    /// Drop the resolution of `topic` and release its connections. Returns
    /// how many connections were closed.
    pub fn drop_resolution(&mut self, topic: &str) -> usize {
        let Some(resolution) = self.resolutions.remove(topic) else {
            return 0;
        };
        resolution
            .connections
            .iter()
            .filter(|connection| self.release(connection, topic))
            .count()
    }

    pub fn expire(&mut self, topic: &str, generation: u64) -> Expiry {
        let Some(resolution) = self.resolutions.get(topic) else {
            return Expiry::Stale;
        };
        if resolution.generation != generation {
            return Expiry::Stale;
        }
        if let Some(kind) = self.subscribed_kind(topic) {
            return Expiry::Refresh(kind);
        }
        self.drop_resolution(topic);
        Expiry::Released
    }

    /// Forget a connection that closed. Resolutions that used it lose it and
    /// are marked expired. Returns the subscribed topics that must be
    /// resolved again.
    pub fn connection_lost(&mut self, connection: &Arc<Connection>, now: Instant) -> Vec<(String, TopicKind)> {
        let pooled = self.entry_mut(connection).is_some();
        let mut responsible = if pooled {
            self.connections
                .remove(&connection.endpoint().identity())
                .map(|entry| entry.topics)
                .unwrap_or_default()
        } else {
            HashSet::new()
        };
        // a replaced pool entry no longer lists its topics
        for (topic, resolution) in &self.resolutions {
            if resolution
                .connections
                .iter()
                .any(|current| Arc::ptr_eq(current, connection))
            {
                responsible.insert(topic.clone());
            }
        }

        let mut refresh = Vec::new();
        for topic in responsible {
            let Some(resolution) = self.resolutions.get_mut(&topic) else {
                continue;
            };
            resolution
                .connections
                .retain(|current| !Arc::ptr_eq(current, connection));
            resolution.expires_at = Some(now);
            if resolution.connections.is_empty() {
                self.resolutions.remove(&topic);
            }
            if let Some(kind) = self.subscribed_kind(&topic) {
                refresh.push((topic, kind));
            }
        }
        refresh.sort_by(|a, b| a.0.cmp(&b.0));
        refresh
    }

    pub fn pooled_endpoints(&self) -> Vec<TcpEndpoint> {
        let mut endpoints: Vec<TcpEndpoint> = self
            .connections
            .values()
            .map(|entry| entry.connection.endpoint().clone())
            .collect();
        endpoints.sort_by_key(|endpoint| endpoint.identity());
        endpoints
    }

    /// Topics holding the pooled connection to `endpoint` open, sorted.
    pub fn responsibilities(&self, endpoint: &TcpEndpoint) -> Vec<String> {
        let mut topics: Vec<String> = self
            .connections
            .get(&endpoint.identity())
            .map(|entry| entry.topics.iter().cloned().collect())
            .unwrap_or_default();
        topics.sort();
        topics
    }

    /// Close every pooled connection and forget all resolutions and
    /// attempts. Subscribed topics are kept for the next start.
    pub fn clear(&mut self) -> usize {
        self.resolutions.clear();
        self.attempts.clear();
        self.connection_attempts.clear();
        let closed = self.connections.len();
        for (_, entry) in self.connections.drain() {
            entry.connection.close();
        }
        closed
    }
}
