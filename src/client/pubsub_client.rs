use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use futures::future::join_all;
use tracing::{info, warn};

use super::handler::MessageHandler;
use super::metrics::{ClientCounters, ClientMetrics};
use super::state::ClientState;
use crate::broker::TopicKind;
use crate::broker::topic::is_builtin;
use crate::config::{ClientSettings, TransportSettings};
use crate::transport::message::check_topic_name;
use crate::transport::{IncomingHandler, MessageLimits, TcpEndpoint};
use crate::utils::{Error, Result, TaskGroup};

/// A node's access to the broker fabric.
///
/// The client asks the resolvers which broker serves a topic, keeps one
/// pooled connection per broker endpoint, subscribes to its topics over
/// those connections and hands incoming messages to its `MessageHandler`.
/// Resolutions are cached and refreshed when their connection drops or
/// their time to live runs out.
pub struct Client {
    pub(super) name: String,
    pub(super) settings: ClientSettings,
    pub(super) transport: TransportSettings,
    pub(super) limits: MessageLimits,
    pub(super) handler: IncomingHandler,
    state: Mutex<ClientState>,
    lifecycle: tokio::sync::Mutex<()>,
    running: Mutex<Option<TaskGroup>>,
    pub(super) counters: ClientCounters,
}

impl Client {
    /// Creates a stopped client subscribed to the topics of `settings`.
    pub fn new(
        name: impl Into<String>,
        settings: ClientSettings,
        transport: TransportSettings,
        limits: MessageLimits,
        handler: MessageHandler,
    ) -> Result<Arc<Self>> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::validation("client name is empty"));
        }
        if settings.resolver_endpoints.is_empty() {
            return Err(Error::validation("at least one resolver endpoint is required"));
        }
        let mut state = ClientState::new();
        for topic in &settings.async_topics {
            Self::check_subscribable(topic)?;
            state.subscribe(topic, TopicKind::Async)?;
        }
        for topic in &settings.sync_topics {
            Self::check_subscribable(topic)?;
            state.subscribe(topic, TopicKind::Sync)?;
        }
        Ok(Arc::new(Self {
            handler: handler.into_incoming(name.clone()),
            name,
            settings,
            transport,
            limits,
            state: Mutex::new(state),
            lifecycle: tokio::sync::Mutex::new(()),
            running: Mutex::new(None),
            counters: ClientCounters::default(),
        }))
    }

    fn check_subscribable(topic: &str) -> Result<()> {
        check_topic_name(topic)?;
        if is_builtin(topic) {
            return Err(Error::validation(format!(
                "cannot subscribe to built-in topic \"{topic}\""
            )));
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(super) fn state(&self) -> MutexGuard<'_, ClientState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn running(&self) -> MutexGuard<'_, Option<TaskGroup>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(super) fn tasks(&self) -> Result<TaskGroup> {
        self.running()
            .clone()
            .ok_or_else(|| Error::lifecycle(format!("client \"{}\" is not started", self.name)))
    }

    /// Start the client and resolve every subscribed topic. Topics that
    /// cannot be resolved yet are logged and retried in the background.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        {
            let _lifecycle = self.lifecycle.lock().await;
            let mut running = self.running();
            if running.is_some() {
                return Err(Error::lifecycle(format!(
                    "client \"{}\" is already started",
                    self.name
                )));
            }
            *running = Some(TaskGroup::new());
        }
        info!("Client {} started", self.name);

        let subscribed = self.state().all_subscribed();
        let resolutions = subscribed.iter().map(|(topic, kind)| async move {
            (topic, self.topic_resolutions(topic, *kind).await)
        });
        for (topic, result) in join_all(resolutions).await {
            if let Err(err) = result {
                warn!("Client {} could not resolve {} on start: {}", self.name, topic, err);
            }
        }
        Ok(())
    }

    /// Stop every background task, then close all broker connections.
    pub async fn stop(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        let tasks = self
            .running()
            .take()
            .ok_or_else(|| Error::lifecycle(format!("client \"{}\" is not started", self.name)))?;
        tasks.stop().await;
        let closed = self.state().clear();
        info!("Client {} stopped, closed {} broker connections", self.name, closed);
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.running().is_some()
    }

    pub async fn add_async_subscribe_topic(self: &Arc<Self>, topic: &str) -> Result<()> {
        self.add_subscribe_topic(topic, TopicKind::Async).await
    }

    pub async fn add_sync_subscribe_topic(self: &Arc<Self>, topic: &str) -> Result<()> {
        self.add_subscribe_topic(topic, TopicKind::Sync).await
    }

    pub async fn remove_async_subscribe_topic(&self, topic: &str) -> Result<()> {
        self.remove_subscribe_topic(topic, TopicKind::Async).await
    }

    pub async fn remove_sync_subscribe_topic(&self, topic: &str) -> Result<()> {
        self.remove_subscribe_topic(topic, TopicKind::Sync).await
    }

    /// Subscribe to `topic`. While started, the topic is resolved and the
    /// subscription is sent to every responsible broker before returning. A
    /// topic that fails to resolve stays subscribed and is retried.
    async fn add_subscribe_topic(self: &Arc<Self>, topic: &str, kind: TopicKind) -> Result<()> {
        Self::check_subscribable(topic)?;
        self.state().subscribe(topic, kind)?;
        if !self.is_started() {
            return Ok(());
        }
        for connection in self.topic_resolutions(topic, kind).await? {
            self.ensure_subscribed(&connection, topic).await?;
        }
        info!("Client {} subscribed to {} topic {}", self.name, kind, topic);
        Ok(())
    }

    /// Unsubscribe from `topic` on every broker and release the
    /// connections no other topic needs.
    async fn remove_subscribe_topic(&self, topic: &str, kind: TopicKind) -> Result<()> {
        self.state().unsubscribe(topic, kind)?;
        let connections = self.state().take_subscriptions(topic);
        for connection in &connections {
            if let Err(err) = self.unsubscribe_from_topic(connection, topic).await {
                warn!(
                    "Client {} failed to unsubscribe from {} at {}: {}",
                    self.name,
                    topic,
                    connection.endpoint(),
                    err
                );
            }
        }
        let released = self.state().drop_resolution(topic);
        info!(
            "Client {} unsubscribed from {} topic {} ({} connections released)",
            self.name, kind, topic, released
        );
        Ok(())
    }

    /// Resolve every subscribed topic again, replacing cached resolutions.
    pub async fn resolve_subscribe_topics(self: &Arc<Self>) -> Result<()> {
        let subscribed = {
            let mut state = self.state();
            let now = Instant::now();
            let subscribed = state.all_subscribed();
            for (topic, _) in &subscribed {
                state.invalidate(topic, now);
            }
            subscribed
        };
        let resolutions = subscribed.iter().map(|(topic, kind)| async move {
            let connections = self.topic_resolutions(topic, *kind).await?;
            for connection in &connections {
                self.ensure_subscribed(connection, topic).await?;
            }
            Ok::<(), Error>(())
        });
        let mut failure = None;
        for result in join_all(resolutions).await {
            if let Err(err) = result {
                warn!("Client {} failed to re-resolve: {}", self.name, err);
                failure = Some(err);
            }
        }
        failure.map_or(Ok(()), Err)
    }

    pub fn subscribed_topics(&self, kind: TopicKind) -> Vec<String> {
        self.state().subscribed_topics(kind)
    }

    /// Broker endpoints the cached resolution of `topic` points at.
    pub fn resolved_endpoints(&self, topic: &str) -> Vec<TcpEndpoint> {
        self.state().resolved_endpoints(topic)
    }

    /// Whether `topic` has an unexpired resolution with an open connection.
    pub fn is_resolved(&self, topic: &str) -> bool {
        self.state().is_resolved(topic, Instant::now())
    }

    pub fn pooled_endpoints(&self) -> Vec<TcpEndpoint> {
        self.state().pooled_endpoints()
    }

    pub fn pooled_connection_count(&self) -> usize {
        self.state().pooled_endpoints().len()
    }

    /// Topics that keep the pooled connection to `endpoint` open.
    pub fn responsibilities(&self, endpoint: &TcpEndpoint) -> Vec<String> {
        self.state().responsibilities(endpoint)
    }

    pub fn metrics(&self) -> ClientMetrics {
        self.counters.snapshot()
    }
}
