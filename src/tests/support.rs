//! Loopback fixtures shared by the component tests.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::broker::Broker;
use crate::client::{Client, MessageHandler};
use crate::config::{BrokerSettings, ClientSettings, ResolverSettings, TransportSettings};
use crate::resolver::Resolver;
use crate::transport::{Message, MessageLimits};

pub fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

pub async fn start_resolver() -> Arc<Resolver> {
    let settings = ResolverSettings {
        address: "127.0.0.1:0".to_string(),
        ..ResolverSettings::default()
    };
    let resolver = Resolver::new(
        "resolver",
        settings,
        TransportSettings::default(),
        MessageLimits::unlimited(),
    )
    .unwrap();
    resolver.start().await.unwrap();
    resolver
}

pub fn broker_settings(resolver: &Resolver, async_topics: &[&str], sync_topics: &[&str]) -> BrokerSettings {
    BrokerSettings {
        node_address: "127.0.0.1:0".to_string(),
        config_address: "127.0.0.1:0".to_string(),
        async_topics: strings(async_topics),
        sync_topics: strings(sync_topics),
        resolver_config_endpoints: vec![resolver.endpoint().unwrap()],
        ..BrokerSettings::default()
    }
}

pub async fn start_broker(
    name: &str,
    resolver: &Resolver,
    async_topics: &[&str],
    sync_topics: &[&str],
) -> Arc<Broker> {
    let broker = Broker::new(
        name,
        broker_settings(resolver, async_topics, sync_topics),
        TransportSettings::default(),
        MessageLimits::unlimited(),
    )
    .unwrap();
    broker.start().await.unwrap();
    broker
}

pub fn client_settings(resolver: &Resolver) -> ClientSettings {
    ClientSettings {
        resolver_endpoints: vec![resolver.endpoint().unwrap()],
        resolution_retry_interval_ms: 20,
        max_resolution_attempts: 3,
        ..ClientSettings::default()
    }
}

pub fn new_client(name: &str, settings: ClientSettings, handler: MessageHandler) -> Arc<Client> {
    Client::new(
        name,
        settings,
        TransportSettings::default(),
        MessageLimits::unlimited(),
        handler,
    )
    .unwrap()
}

/// A handler that forwards every message of the given async topics.
pub fn recording_handler(topics: &[&str]) -> (MessageHandler, mpsc::UnboundedReceiver<Message>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut handler = MessageHandler::new();
    for topic in topics {
        let tx = tx.clone();
        handler = handler.with_async_handler(*topic, move |message: &Message| {
            let _ = tx.send(message.clone());
        });
    }
    (handler, rx)
}

pub async fn next_message(rx: &mut mpsc::UnboundedReceiver<Message>) -> Message {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap()
}

/// Poll `condition` until it holds or five seconds pass.
pub async fn eventually(condition: impl Fn() -> bool) -> bool {
    for _ in 0..500 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
