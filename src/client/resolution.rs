//! Topic resolution and connection pooling
//!
//! `topic_resolutions` serves a cached resolution when one is valid and
//! otherwise joins the in-flight attempt for the topic, starting one if
//! there is none. An attempt queries the resolvers in rounds until the
//! topic resolves to at least one reachable broker, the topic is
//! unsubscribed, the round limit is hit or the client stops. Broker
//! connections are deduplicated the same way: concurrent requests for one
//! endpoint share one dial.
//!
//! Resolutions carry the kind they were made for. A topic is resolved as one
//! kind at a time; asking for the other kind while the topic is subscribed
//! or an attempt is running fails.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use super::pubsub_client::Client;
use super::state::{ClientState, ResolutionAttempt};
use crate::broker::TopicKind;
use crate::resolver::client as resolver_client;
use crate::transport::{Connection, TcpEndpoint};
use crate::utils::{Error, Result, TaskGroup};

impl Client {
    /// The broker connections responsible for `topic`.
    pub(super) async fn topic_resolutions(
        self: &Arc<Self>,
        topic: &str,
        kind: TopicKind,
    ) -> Result<Vec<Arc<Connection>>> {
        let tasks = self.tasks()?;
        let attempt = {
            let mut state = self.state();
            if let Some(subscribed) = state.subscribed_kind(topic) {
                if subscribed != kind {
                    return Err(Error::resolution(format!(
                        "topic \"{topic}\" is subscribed as {subscribed}, not {kind}"
                    )));
                }
            }
            if let Some(connections) = state.cached_resolution(topic, kind, Instant::now()) {
                return Ok(connections);
            }
            self.join_or_start_attempt(&mut state, topic, kind, &tasks)?
        };
        attempt.wait().await
    }

    /// Start resolving `topic` in the background unless an attempt is
    /// already running.
    pub(super) fn start_resolution(self: &Arc<Self>, topic: &str, kind: TopicKind) -> Result<()> {
        let tasks = self.tasks()?;
        let mut state = self.state();
        self.join_or_start_attempt(&mut state, topic, kind, &tasks)
            .map(|_| ())
    }

    fn join_or_start_attempt(
        self: &Arc<Self>,
        state: &mut ClientState,
        topic: &str,
        kind: TopicKind,
        tasks: &TaskGroup,
    ) -> Result<Arc<ResolutionAttempt>> {
        if let Some(attempt) = state.attempt(topic) {
            if attempt.kind != kind {
                return Err(Error::resolution(format!(
                    "topic \"{topic}\" is being resolved as {}",
                    attempt.kind
                )));
            }
            return Ok(attempt);
        }
        let attempt = Arc::new(ResolutionAttempt::new(kind));
        let run = self
            .clone()
            .run_attempt(topic.to_string(), attempt.clone(), tasks.clone());
        if !tasks.spawn(run) {
            return Err(Error::lifecycle(format!("client \"{}\" is stopping", self.name)));
        }
        state.insert_attempt(topic, attempt.clone());
        Ok(attempt)
    }

    async fn run_attempt(self: Arc<Self>, topic: String, attempt: Arc<ResolutionAttempt>, tasks: TaskGroup) {
        let result = self.resolve_topic(&topic, attempt.kind, &tasks).await;
        self.state().finish_attempt(&topic, &attempt);
        match result {
            Ok(connections) => {
                info!(
                    "Client {} resolved {} to {} broker(s)",
                    self.name,
                    topic,
                    connections.len()
                );
                attempt.complete(Ok(connections));
            }
            Err(err) => {
                warn!("Client {} failed to resolve {}: {}", self.name, topic, err);
                let reason = match err {
                    Error::Resolution(reason) => reason,
                    other => other.to_string(),
                };
                attempt.complete(Err(reason));
                let subscribed = self.state().is_subscribed(&topic);
                if subscribed && !tasks.is_stopped() {
                    self.schedule_retry(topic, attempt.kind, &tasks);
                }
            }
        }
    }

    fn schedule_retry(self: &Arc<Self>, topic: String, kind: TopicKind, tasks: &TaskGroup) {
        let client = self.clone();
        let stopped = tasks.stopped();
        tasks.spawn(async move {
            tokio::select! {
                _ = stopped => return,
                _ = tokio::time::sleep(client.settings.resolution_retry_interval()) => {}
            }
            let subscribed = client.state().subscribed_kind(&topic) == Some(kind);
            if subscribed {
                if let Err(err) = client.start_resolution(&topic, kind) {
                    debug!("Client {} dropped retry for {}: {}", client.name, topic, err);
                }
            }
        });
    }

    async fn resolve_topic(
        self: &Arc<Self>,
        topic: &str,
        kind: TopicKind,
        tasks: &TaskGroup,
    ) -> Result<Vec<Arc<Connection>>> {
        let subscribed = self.state().is_subscribed(topic);
        let max_attempts = self.settings.max_resolution_attempts;
        let mut round: u32 = 0;
        loop {
            if tasks.is_stopped() {
                return Err(Error::resolution(format!("client \"{}\" stopped", self.name)));
            }
            if subscribed && !self.state().is_subscribed(topic) {
                return Err(Error::resolution(format!(
                    "topic \"{topic}\" was unsubscribed"
                )));
            }
            round += 1;
            self.counters.resolution_attempt();

            let endpoints = self.query_resolvers(kind, topic).await;
            if !endpoints.is_empty() {
                let connections = self.connect_endpoints(topic, kind, &endpoints, tasks).await;
                if !connections.is_empty() {
                    return Ok(self.publish_resolution(topic, kind, connections, tasks));
                }
            }

            if max_attempts > 0 && round >= max_attempts {
                return Err(Error::resolution(format!(
                    "{kind} topic \"{topic}\" could not be resolved after {round} attempts"
                )));
            }
            tokio::select! {
                _ = tasks.stopped() => {}
                _ = tokio::time::sleep(self.settings.resolution_retry_interval()) => {}
            }
        }
    }

    /// Ask every resolver for the `kind` topic `topic`; duplicate endpoints
    /// are dropped.
    async fn query_resolvers(&self, kind: TopicKind, topic: &str) -> Vec<TcpEndpoint> {
        let mut endpoints: Vec<TcpEndpoint> = Vec::new();
        for resolver in &self.settings.resolver_endpoints {
            let resolved =
                resolver_client::resolve(resolver, &self.name, kind, topic, &self.transport).await;
            match resolved {
                Ok(endpoint) => {
                    if !endpoints.iter().any(|known| known.identity() == endpoint.identity()) {
                        endpoints.push(endpoint);
                    }
                }
                Err(err) => debug!("Client {} resolver {}: {}", self.name, resolver, err),
            }
        }
        endpoints
    }

    async fn connect_endpoints(
        self: &Arc<Self>,
        topic: &str,
        kind: TopicKind,
        endpoints: &[TcpEndpoint],
        tasks: &TaskGroup,
    ) -> Vec<Arc<Connection>> {
        let mut connections = Vec::new();
        for endpoint in endpoints {
            let connection = match self.broker_connection(endpoint, tasks).await {
                Ok(connection) => connection,
                Err(err) => {
                    warn!("Client {} cannot reach {} for {}: {}", self.name, endpoint, topic, err);
                    continue;
                }
            };
            if !self.state().mark_responsible(&connection, topic) {
                debug!("Client {} lost {} while resolving {}", self.name, endpoint, topic);
                continue;
            }
            let subscribed = self.state().subscribed_kind(topic) == Some(kind);
            if subscribed {
                if let Err(err) = self.ensure_subscribed(&connection, topic).await {
                    warn!("Client {} failed to subscribe to {} at {}: {}", self.name, topic, endpoint, err);
                }
            }
            connections.push(connection);
        }
        connections
    }

    fn publish_resolution(
        self: &Arc<Self>,
        topic: &str,
        kind: TopicKind,
        connections: Vec<Arc<Connection>>,
        tasks: &TaskGroup,
    ) -> Vec<Arc<Connection>> {
        let ttl = self.settings.resolution_ttl();
        let generation = self.state().publish_resolution(
            topic,
            kind,
            connections.clone(),
            ttl,
            Instant::now(),
        );
        if let Some(ttl) = ttl {
            self.schedule_expiry(topic.to_string(), generation, ttl, tasks);
        }
        connections
    }

    /// The pooled connection to `endpoint`, dialing it if needed.
    async fn broker_connection(
        self: &Arc<Self>,
        endpoint: &TcpEndpoint,
        tasks: &TaskGroup,
    ) -> Result<Arc<Connection>> {
        let identity = endpoint.identity();
        let (attempt, owner) = {
            let mut state = self.state();
            if let Some(connection) = state.pooled_connection(&identity) {
                return Ok(connection);
            }
            state.connection_attempt(&identity)
        };
        if !owner {
            return match attempt.wait().await {
                Some(Ok(connection)) => Ok(connection),
                Some(Err(reason)) => Err(Error::Send(reason)),
                None => Err(Error::Send(format!("connection attempt to {endpoint} was dropped"))),
            };
        }

        let result = Connection::connect(
            endpoint,
            &self.name,
            &self.transport,
            self.limits,
            self.handler.clone(),
            tasks,
        )
        .await;
        {
            let mut state = self.state();
            state.finish_connection_attempt(&identity);
            if let Ok(connection) = &result {
                state.add_connection(connection.clone());
            }
        }
        match result {
            Ok(connection) => {
                self.watch_connection(connection.clone(), tasks);
                info!("Client {} connected to broker {}", self.name, endpoint);
                attempt.complete(Ok(connection.clone()));
                Ok(connection)
            }
            Err(err) => {
                attempt.complete(Err(format!("connecting to {endpoint}: {err}")));
                Err(err)
            }
        }
    }
}
