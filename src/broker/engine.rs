use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{error, info, warn};

use super::metrics::{BrokerCounters, BrokerMetrics};
use super::routing::RoutingTable;
use super::topic::{TopicKind, is_builtin};
use crate::config::{BrokerSettings, TransportSettings};
use crate::resolver::client as resolver_client;
use crate::transport::{AccessControlList, Listener, MessageLimits, TcpEndpoint};
use crate::utils::{Error, Result, TaskGroup};

struct Running {
    tasks: TaskGroup,
    node_address: SocketAddr,
    config_address: SocketAddr,
    endpoint: TcpEndpoint,
}

/// Represents a broker node.
///
/// The broker accepts node connections on its node port, keeps the topic
/// table and the subscriptions of every connected node, routes async
/// messages to all subscribers of a topic and sync requests to the single
/// subscriber of a sync topic, and correlates the responses. Its topics are
/// published to the configured resolvers so broker clients can find it.
///
/// Routing state lives in one `RoutingTable` behind the operation lock.
/// Start and stop are serialized by a separate lifecycle lock that the
/// message path never takes.
pub struct Broker {
    pub(super) name: String,
    pub(super) settings: BrokerSettings,
    pub(super) transport: TransportSettings,
    pub(super) limits: MessageLimits,
    routing: Mutex<RoutingTable>,
    lifecycle: tokio::sync::Mutex<()>,
    running: Mutex<Option<Running>>,
    pub(super) allowlist: AccessControlList,
    pub(super) denylist: AccessControlList,
    pub(super) config_allowlist: AccessControlList,
    pub(super) config_denylist: AccessControlList,
    pub(super) counters: BrokerCounters,
}

impl Broker {
    /// Creates a stopped broker. Fails if an access list entry is not an IP
    /// address.
    pub fn new(
        name: impl Into<String>,
        settings: BrokerSettings,
        transport: TransportSettings,
        limits: MessageLimits,
    ) -> Result<Arc<Self>> {
        Ok(Arc::new(Self {
            name: name.into(),
            allowlist: AccessControlList::from_addresses(&settings.allowlist)?,
            denylist: AccessControlList::from_addresses(&settings.denylist)?,
            config_allowlist: AccessControlList::from_addresses(&settings.config_allowlist)?,
            config_denylist: AccessControlList::from_addresses(&settings.config_denylist)?,
            settings,
            transport,
            limits,
            routing: Mutex::new(RoutingTable::new()),
            lifecycle: tokio::sync::Mutex::new(()),
            running: Mutex::new(None),
            counters: BrokerCounters::default(),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(super) fn routing(&self) -> MutexGuard<'_, RoutingTable> {
        self.routing.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn running(&self) -> MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bind both ports, load the configured topics and publish them to every
    /// resolver. If a resolver rejects the topics the broker does not start.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        if self.running().is_some() {
            return Err(Error::lifecycle(format!(
                "broker \"{}\" is already started",
                self.name
            )));
        }

        let node_listener =
            Listener::bind(&self.settings.node_address, self.settings.tls.as_ref()).await?;
        let config_listener =
            Listener::bind(&self.settings.config_address, self.settings.config_tls.as_ref())
                .await?;
        let node_address = node_listener.local_addr()?;
        let config_address = config_listener.local_addr()?;
        let advertised = self
            .settings
            .advertised_address
            .clone()
            .unwrap_or_else(|| node_address.to_string());
        let endpoint = TcpEndpoint::for_listener(advertised, self.settings.tls.as_ref())?;

        let (async_topics, sync_topics) = {
            let mut routing = self.routing();
            *routing = RoutingTable::new();
            routing.add_builtin_topics();
            let loaded = routing
                .add_topics(TopicKind::Async, &self.settings.async_topics)
                .and_then(|added| {
                    Ok((added, routing.add_topics(TopicKind::Sync, &self.settings.sync_topics)?))
                });
            match loaded {
                Ok(loaded) => loaded,
                Err(err) => {
                    *routing = RoutingTable::new();
                    return Err(err);
                }
            }
        };
        if let Err(err) = self
            .register_configured(&endpoint, &async_topics, &sync_topics)
            .await
        {
            *self.routing() = RoutingTable::new();
            return Err(err);
        }

        let tasks = TaskGroup::new();
        tasks.spawn(self.clone().accept_node_connections(node_listener, tasks.clone()));
        tasks.spawn(self.clone().accept_config_connections(config_listener, tasks.clone()));
        *self.running() = Some(Running {
            tasks,
            node_address,
            config_address,
            endpoint,
        });
        info!(
            "Broker {} listening on {} (config {})",
            self.name, node_address, config_address
        );
        Ok(())
    }

    /// Close both ports and every node connection, wait for all broker tasks
    /// and withdraw the broker's topics from the resolvers.
    pub async fn stop(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        let running = self.running().take().ok_or_else(|| {
            Error::lifecycle(format!("broker \"{}\" is not started", self.name))
        })?;

        let served = {
            let mut routing = self.routing();
            let served = [
                (TopicKind::Async, routing.topics(TopicKind::Async)),
                (TopicKind::Sync, routing.topics(TopicKind::Sync)),
            ];
            routing.clear();
            served
        };
        running.tasks.stop().await;

        for (kind, names) in served {
            if !names.is_empty() && self.withdraw_topics(&running.endpoint, kind, &names).await {
                info!("Broker {} withdrew {} topics {:?}", self.name, kind, names);
            }
        }
        info!("Broker {} stopped", self.name);
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.running().is_some()
    }

    pub fn node_address(&self) -> Option<SocketAddr> {
        self.running().as_ref().map(|running| running.node_address)
    }

    pub fn config_address(&self) -> Option<SocketAddr> {
        self.running().as_ref().map(|running| running.config_address)
    }

    /// The endpoint this broker publishes to resolvers.
    pub fn endpoint(&self) -> Option<TcpEndpoint> {
        self.running().as_ref().map(|running| running.endpoint.clone())
    }

    fn require_endpoint(&self) -> Result<TcpEndpoint> {
        self.endpoint()
            .ok_or_else(|| Error::lifecycle(format!("broker \"{}\" is not started", self.name)))
    }

    /// Serve new topics and publish them to the resolvers. If publishing
    /// fails the topics are removed again and the error is returned.
    pub async fn add_topics(&self, kind: TopicKind, names: &[String]) -> Result<()> {
        let endpoint = self.require_endpoint()?;
        if let Some(name) = names.iter().find(|name| is_builtin(name)) {
            return Err(Error::protocol(format!("\"{name}\" is a built-in topic")));
        }
        let added = self.routing().add_topics(kind, names)?;
        if added.is_empty() {
            return Ok(());
        }
        if let Err(err) = self.register_with_resolvers(&endpoint, kind, &added).await {
            self.routing().remove_topics(kind, &added);
            return Err(err);
        }
        info!("Broker {} serves {} topics {:?}", self.name, kind, added);
        Ok(())
    }

    /// Withdraw topics from the resolvers, then stop serving them and drop
    /// their subscriptions. If a resolver cannot be reached the topics are
    /// registered again with the resolvers that already dropped them, and
    /// nothing changes locally.
    pub async fn remove_topics(&self, kind: TopicKind, names: &[String]) -> Result<()> {
        let endpoint = self.require_endpoint()?;
        self.routing().check_removable(kind, names)?;
        self.deregister_from_resolvers(&endpoint, kind, names).await?;
        let removed = self.routing().remove_topics(kind, names);
        info!("Broker {} no longer serves {} topics {:?}", self.name, kind, removed);
        Ok(())
    }

    /// Register the topics loaded at start. Both kinds are registered or
    /// neither is.
    async fn register_configured(
        &self,
        endpoint: &TcpEndpoint,
        async_topics: &[String],
        sync_topics: &[String],
    ) -> Result<()> {
        self.register_with_resolvers(endpoint, TopicKind::Async, async_topics)
            .await?;
        if let Err(err) = self
            .register_with_resolvers(endpoint, TopicKind::Sync, sync_topics)
            .await
        {
            if !async_topics.is_empty() {
                self.withdraw_topics(endpoint, TopicKind::Async, async_topics)
                    .await;
            }
            return Err(err);
        }
        Ok(())
    }

    /// Register `names` with every resolver. On failure the resolvers that
    /// already accepted them drop them again.
    async fn register_with_resolvers(
        &self,
        endpoint: &TcpEndpoint,
        kind: TopicKind,
        names: &[String],
    ) -> Result<()> {
        if names.is_empty() {
            return Ok(());
        }
        let mut registered = Vec::new();
        for resolver in &self.settings.resolver_config_endpoints {
            let result = resolver_client::add_topics(
                resolver,
                &self.name,
                endpoint,
                kind,
                names,
                &self.transport,
            )
            .await;
            if let Err(err) = result {
                for resolver in registered {
                    if let Err(err) = resolver_client::remove_topics(
                        resolver,
                        &self.name,
                        endpoint,
                        kind,
                        names,
                        &self.transport,
                    )
                    .await
                    {
                        warn!("Broker {} failed to roll back registration: {}", self.name, err);
                    }
                }
                return Err(err);
            }
            registered.push(resolver);
        }
        Ok(())
    }

    /// Deregister `names` from every resolver. On failure the resolvers that
    /// already dropped them register them again.
    async fn deregister_from_resolvers(
        &self,
        endpoint: &TcpEndpoint,
        kind: TopicKind,
        names: &[String],
    ) -> Result<()> {
        let mut deregistered = Vec::new();
        for resolver in &self.settings.resolver_config_endpoints {
            let result = resolver_client::remove_topics(
                resolver,
                &self.name,
                endpoint,
                kind,
                names,
                &self.transport,
            )
            .await;
            if let Err(err) = result {
                for resolver in deregistered {
                    if let Err(err) = resolver_client::add_topics(
                        resolver,
                        &self.name,
                        endpoint,
                        kind,
                        names,
                        &self.transport,
                    )
                    .await
                    {
                        warn!("Broker {} failed to roll back deregistration: {}", self.name, err);
                    }
                }
                return Err(err);
            }
            deregistered.push(resolver);
        }
        Ok(())
    }

    /// Drop `names` from every reachable resolver. Returns `false` if any
    /// resolver could not be reached.
    async fn withdraw_topics(&self, endpoint: &TcpEndpoint, kind: TopicKind, names: &[String]) -> bool {
        let mut withdrawn = true;
        for resolver in &self.settings.resolver_config_endpoints {
            let result = resolver_client::remove_topics(
                resolver,
                &self.name,
                endpoint,
                kind,
                names,
                &self.transport,
            )
            .await;
            if let Err(err) = result {
                error!("Broker {} failed to withdraw {} topics: {}", self.name, kind, err);
                withdrawn = false;
            }
        }
        withdrawn
    }

    /// Non built-in topics of `kind`, sorted.
    pub fn topics(&self, kind: TopicKind) -> Vec<String> {
        self.routing().topics(kind)
    }

    pub fn topic_kind(&self, name: &str) -> Option<TopicKind> {
        self.routing().topic_kind(name)
    }

    /// Names of the nodes subscribed to `topic`, sorted.
    pub fn subscribers(&self, topic: &str) -> Vec<String> {
        self.routing().subscriber_names(topic)
    }

    pub fn connection_names(&self) -> Vec<String> {
        self.routing().connection_names()
    }

    pub fn subscriptions(&self, name: &str) -> Option<Vec<String>> {
        self.routing().subscriptions(name)
    }

    pub fn has_sync_request(&self, token: &str) -> bool {
        self.routing().has_sync_request(token)
    }

    pub fn open_sync_requests(&self) -> usize {
        self.routing().sync_request_count()
    }

    /// Disconnect a node. Its subscriptions are dropped together with it.
    pub fn remove_node_connection(&self, name: &str) -> Result<()> {
        self.routing()
            .remove_by_name(name)
            .map(|_| info!("Broker {} removed node {}", self.name, name))
            .ok_or_else(|| Error::protocol(format!("no node connection named \"{name}\"")))
    }

    pub fn allowlist(&self) -> &AccessControlList {
        &self.allowlist
    }

    pub fn denylist(&self) -> &AccessControlList {
        &self.denylist
    }

    pub fn config_allowlist(&self) -> &AccessControlList {
        &self.config_allowlist
    }

    pub fn config_denylist(&self) -> &AccessControlList {
        &self.config_denylist
    }

    pub fn metrics(&self) -> BrokerMetrics {
        self.counters.snapshot()
    }
}
