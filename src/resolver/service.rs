use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::broker::TopicKind;
use crate::config::{ResolverSettings, TransportSettings};
use crate::transport::exchange::respond_once;
use crate::transport::message::split_topic_list;
use crate::transport::{AccessControlList, Listener, Message, MessageLimits, TcpEndpoint, topics};
use crate::utils::{Error, Result, TaskGroup};

/// Snapshot of a resolver's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResolverMetrics {
    pub resolve_requests: u64,
    pub successful_resolutions: u64,
    pub failed_resolutions: u64,
    pub registrations: u64,
}

#[derive(Default)]
struct Counters {
    resolve_requests: AtomicU64,
    successful_resolutions: AtomicU64,
    failed_resolutions: AtomicU64,
    registrations: AtomicU64,
}

struct Running {
    tasks: TaskGroup,
    address: SocketAddr,
}

/// Owners of async and sync topics. A name may be owned once per kind.
#[derive(Default)]
struct TopicTable {
    async_topics: HashMap<String, TcpEndpoint>,
    sync_topics: HashMap<String, TcpEndpoint>,
}

impl TopicTable {
    fn of(&self, kind: TopicKind) -> &HashMap<String, TcpEndpoint> {
        match kind {
            TopicKind::Async => &self.async_topics,
            TopicKind::Sync => &self.sync_topics,
        }
    }

    fn of_mut(&mut self, kind: TopicKind) -> &mut HashMap<String, TcpEndpoint> {
        match kind {
            TopicKind::Async => &mut self.async_topics,
            TopicKind::Sync => &mut self.sync_topics,
        }
    }
}

/// What a resolver request asks for.
enum Request {
    Resolve(TopicKind),
    Add(TopicKind),
    Remove(TopicKind),
}

impl Request {
    fn parse(topic: &str) -> Option<Self> {
        let request = match topic {
            topics::RESOLVE_ASYNC => Request::Resolve(TopicKind::Async),
            topics::RESOLVE_SYNC => Request::Resolve(TopicKind::Sync),
            topics::ADD_ASYNC_TOPICS => Request::Add(TopicKind::Async),
            topics::ADD_SYNC_TOPICS => Request::Add(TopicKind::Sync),
            topics::REMOVE_ASYNC_TOPICS => Request::Remove(TopicKind::Async),
            topics::REMOVE_SYNC_TOPICS => Request::Remove(TopicKind::Sync),
            _ => return None,
        };
        Some(request)
    }
}

/// Maps topics to the broker endpoint that owns them.
///
/// Async and sync topics are looked up separately, so a client asking for a
/// sync topic never lands on a broker that serves the name as async.
/// Brokers register and deregister their topics; clients ask which broker
/// serves a topic. Every request is a one-shot exchange on the resolver's
/// listener.
pub struct Resolver {
    name: String,
    settings: ResolverSettings,
    transport: TransportSettings,
    limits: MessageLimits,
    topics: Mutex<TopicTable>,
    allowlist: AccessControlList,
    denylist: AccessControlList,
    counters: Counters,
    lifecycle: tokio::sync::Mutex<()>,
    running: Mutex<Option<Running>>,
}

impl Resolver {
    /// Creates a resolver preloaded with the static topics of `settings`.
    pub fn new(
        name: impl Into<String>,
        settings: ResolverSettings,
        transport: TransportSettings,
        limits: MessageLimits,
    ) -> Result<Arc<Self>> {
        let allowlist = AccessControlList::from_addresses(&settings.allowlist)?;
        let denylist = AccessControlList::from_addresses(&settings.denylist)?;
        Ok(Arc::new(Self {
            name: name.into(),
            topics: Mutex::new(TopicTable {
                async_topics: settings.async_topics.clone(),
                sync_topics: settings.sync_topics.clone(),
            }),
            settings,
            transport,
            limits,
            allowlist,
            denylist,
            counters: Counters::default(),
            lifecycle: tokio::sync::Mutex::new(()),
            running: Mutex::new(None),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn table(&self) -> MutexGuard<'_, TopicTable> {
        self.topics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn running(&self) -> MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        if self.running().is_some() {
            return Err(Error::lifecycle("resolver is already started"));
        }
        let listener = Listener::bind(&self.settings.address, self.settings.tls.as_ref()).await?;
        let address = listener.local_addr()?;
        let tasks = TaskGroup::new();
        tasks.spawn(self.clone().accept_loop(listener, tasks.clone()));
        *self.running() = Some(Running { tasks, address });
        info!("Resolver {} listening on {}", self.name, address);
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        let running = self
            .running()
            .take()
            .ok_or_else(|| Error::lifecycle("resolver is not started"))?;
        running.tasks.stop().await;
        info!("Resolver {} stopped", self.name);
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.running().is_some()
    }

    pub fn address(&self) -> Option<SocketAddr> {
        self.running().as_ref().map(|running| running.address)
    }

    /// The endpoint clients and brokers dial to reach this resolver.
    pub fn endpoint(&self) -> Result<TcpEndpoint> {
        let address = self
            .address()
            .ok_or_else(|| Error::lifecycle("resolver is not started"))?;
        TcpEndpoint::for_listener(address.to_string(), self.settings.tls.as_ref())
    }

    pub fn resolve(&self, kind: TopicKind, topic: &str) -> Option<TcpEndpoint> {
        self.table().of(kind).get(topic).cloned()
    }

    pub fn add_topics(&self, kind: TopicKind, endpoint: &TcpEndpoint, topics: &[String]) {
        let mut guard = self.table();
        let table = guard.of_mut(kind);
        for topic in topics {
            table.insert(topic.clone(), endpoint.clone());
        }
    }

    /// Removes the `kind` topics that are currently owned by `endpoint`.
    pub fn remove_topics(&self, kind: TopicKind, endpoint: &TcpEndpoint, topics: &[String]) {
        let identity = endpoint.identity();
        let mut guard = self.table();
        let table = guard.of_mut(kind);
        for topic in topics {
            if table
                .get(topic)
                .is_some_and(|owner| owner.identity() == identity)
            {
                table.remove(topic);
            }
        }
    }

    pub fn topics(&self, kind: TopicKind) -> HashMap<String, TcpEndpoint> {
        self.table().of(kind).clone()
    }

    pub fn allowlist(&self) -> &AccessControlList {
        &self.allowlist
    }

    pub fn denylist(&self) -> &AccessControlList {
        &self.denylist
    }

    pub fn metrics(&self) -> ResolverMetrics {
        ResolverMetrics {
            resolve_requests: self.counters.resolve_requests.load(Ordering::Relaxed),
            successful_resolutions: self.counters.successful_resolutions.load(Ordering::Relaxed),
            failed_resolutions: self.counters.failed_resolutions.load(Ordering::Relaxed),
            registrations: self.counters.registrations.load(Ordering::Relaxed),
        }
    }

    async fn accept_loop(self: Arc<Self>, listener: Listener, tasks: TaskGroup) {
        let listener = Arc::new(listener);
        let stopped = tasks.stopped();
        tokio::pin!(stopped);
        loop {
            let accepted = tokio::select! {
                _ = &mut stopped => break,
                accepted = listener.accept_checked(&self.allowlist, &self.denylist) => accepted,
            };
            let (stream, peer) = match accepted {
                Ok(accepted) => accepted,
                Err(err) => {
                    warn!("Resolver {} failed to accept connection: {}", self.name, err);
                    continue;
                }
            };
            let resolver = self.clone();
            let listener = listener.clone();
            tasks.spawn(async move {
                if let Err(err) = resolver.serve(&listener, stream).await {
                    warn!("Resolver {} failed to serve {}: {}", resolver.name, peer, err);
                }
            });
        }
    }

    async fn serve(&self, listener: &Listener, stream: tokio::net::TcpStream) -> Result<()> {
        let stream = listener
            .upgrade(stream, self.transport.tcp_timeout())
            .await?;
        respond_once(stream, &self.transport, &self.limits, |request| async move {
            self.handle_request(&request)
        })
        .await
    }

    fn handle_request(&self, request: &Message) -> Message {
        let registered = match Request::parse(request.topic()) {
            Some(Request::Resolve(kind)) => return self.handle_resolve(kind, request),
            Some(Request::Add(kind)) => self.handle_registration(kind, true, request),
            Some(Request::Remove(kind)) => self.handle_registration(kind, false, request),
            None => Err(Error::protocol(format!(
                "unknown request \"{}\"",
                request.topic()
            ))),
        };
        match registered {
            Ok(()) => Message::new_async(topics::SUCCESS, &self.name, ""),
            Err(err) => Message::new_async(topics::ERROR, &self.name, err.to_string()),
        }
    }

    fn handle_resolve(&self, kind: TopicKind, request: &Message) -> Message {
        self.counters.resolve_requests.fetch_add(1, Ordering::Relaxed);
        let topic = request.payload();
        let endpoint = self.resolve(kind, topic).map(|endpoint| endpoint.to_json());
        match endpoint {
            Some(Ok(json)) => {
                self.counters
                    .successful_resolutions
                    .fetch_add(1, Ordering::Relaxed);
                debug!("Resolved {} topic {} for {}", kind, topic, request.origin());
                request.response(topics::RESOLVED, &self.name, json)
            }
            Some(Err(err)) => {
                self.counters.failed_resolutions.fetch_add(1, Ordering::Relaxed);
                request.response(topics::FAILURE, &self.name, err.to_string())
            }
            None => {
                self.counters.failed_resolutions.fetch_add(1, Ordering::Relaxed);
                request.response(
                    topics::FAILURE,
                    &self.name,
                    format!("{kind} topic \"{topic}\" is not resolvable"),
                )
            }
        }
    }

    fn handle_registration(&self, kind: TopicKind, add: bool, request: &Message) -> Result<()> {
        let (endpoint, topic_list) = request
            .payload()
            .split_once(topics::LIST_SEPARATOR)
            .ok_or_else(|| Error::validation("expected an endpoint and a topic list"))?;
        let endpoint = TcpEndpoint::from_json(endpoint)?;
        let names = split_topic_list(topic_list);
        if names.is_empty() {
            return Err(Error::validation("no topics provided"));
        }

        self.counters.registrations.fetch_add(1, Ordering::Relaxed);
        if add {
            self.add_topics(kind, &endpoint, &names);
            info!("{} registered {} topics {:?} for {}", request.origin(), kind, names, endpoint);
        } else {
            self.remove_topics(kind, &endpoint, &names);
            info!("{} deregistered {} topics {:?} for {}", request.origin(), kind, names, endpoint);
        }
        Ok(())
    }
}
