use super::{Resolver, client};
use crate::broker::TopicKind;
use crate::config::{ResolverSettings, TransportSettings};
use crate::transport::exchange::request_once;
use crate::transport::{Message, MessageLimits, TcpEndpoint, topics};
use crate::utils::Error;
use std::collections::HashMap;
use std::sync::Arc;

fn settings(async_topics: HashMap<String, TcpEndpoint>) -> ResolverSettings {
    ResolverSettings {
        address: "127.0.0.1:0".to_string(),
        async_topics,
        ..ResolverSettings::default()
    }
}

async fn start_resolver(async_topics: HashMap<String, TcpEndpoint>) -> Arc<Resolver> {
    let resolver = Resolver::new(
        "resolver",
        settings(async_topics),
        TransportSettings::default(),
        MessageLimits::unlimited(),
    )
    .unwrap();
    resolver.start().await.unwrap();
    resolver
}

#[tokio::test]
async fn test_static_topics_resolve() {
    let broker = TcpEndpoint::plain("127.0.0.1:7001");
    let resolver = start_resolver(HashMap::from([("orders".to_string(), broker.clone())])).await;
    let endpoint = resolver.endpoint().unwrap();
    let transport = TransportSettings::default();

    let resolved = client::resolve(&endpoint, "node", TopicKind::Async, "orders", &transport)
        .await
        .unwrap();
    assert_eq!(resolved, broker);

    let err = client::resolve(&endpoint, "node", TopicKind::Async, "missing", &transport)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Resolution(_)));

    // static topics are async unless listed as sync
    let err = client::resolve(&endpoint, "node", TopicKind::Sync, "orders", &transport)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Resolution(_)));

    let metrics = resolver.metrics();
    assert_eq!(metrics.resolve_requests, 3);
    assert_eq!(metrics.successful_resolutions, 1);
    assert_eq!(metrics.failed_resolutions, 2);

    resolver.stop().await.unwrap();
}

#[tokio::test]
async fn test_brokers_register_and_deregister_topics() {
    let resolver = start_resolver(HashMap::new()).await;
    let endpoint = resolver.endpoint().unwrap();
    let transport = TransportSettings::default();
    let broker = TcpEndpoint::plain("127.0.0.1:7002");
    let other = TcpEndpoint::plain("127.0.0.1:7003");
    let names = vec!["a".to_string(), "b".to_string()];

    client::add_topics(&endpoint, "broker", &broker, TopicKind::Async, &names, &transport)
        .await
        .unwrap();
    assert_eq!(resolver.resolve(TopicKind::Async, "a"), Some(broker.clone()));
    assert_eq!(resolver.resolve(TopicKind::Async, "b"), Some(broker.clone()));

    // another broker cannot drop topics it does not own
    client::remove_topics(&endpoint, "other", &other, TopicKind::Async, &names, &transport)
        .await
        .unwrap();
    assert_eq!(resolver.topics(TopicKind::Async).len(), 2);

    // removing the other kind leaves the async topics alone
    client::remove_topics(&endpoint, "broker", &broker, TopicKind::Sync, &names, &transport)
        .await
        .unwrap();
    assert_eq!(resolver.topics(TopicKind::Async).len(), 2);

    client::remove_topics(&endpoint, "broker", &broker, TopicKind::Async, &names[..1], &transport)
        .await
        .unwrap();
    assert_eq!(resolver.resolve(TopicKind::Async, "a"), None);
    assert_eq!(resolver.resolve(TopicKind::Async, "b"), Some(broker));

    resolver.stop().await.unwrap();
}

#[tokio::test]
async fn test_one_name_can_be_owned_once_per_kind() {
    let resolver = start_resolver(HashMap::new()).await;
    let endpoint = resolver.endpoint().unwrap();
    let transport = TransportSettings::default();
    let async_broker = TcpEndpoint::plain("127.0.0.1:7004");
    let sync_broker = TcpEndpoint::plain("127.0.0.1:7005");
    let names = vec!["x".to_string()];

    client::add_topics(&endpoint, "b1", &async_broker, TopicKind::Async, &names, &transport)
        .await
        .unwrap();
    client::add_topics(&endpoint, "b2", &sync_broker, TopicKind::Sync, &names, &transport)
        .await
        .unwrap();

    let resolved = client::resolve(&endpoint, "node", TopicKind::Async, "x", &transport)
        .await
        .unwrap();
    assert_eq!(resolved, async_broker);
    let resolved = client::resolve(&endpoint, "node", TopicKind::Sync, "x", &transport)
        .await
        .unwrap();
    assert_eq!(resolved, sync_broker);

    client::remove_topics(&endpoint, "b2", &sync_broker, TopicKind::Sync, &names, &transport)
        .await
        .unwrap();
    assert_eq!(resolver.resolve(TopicKind::Sync, "x"), None);
    assert_eq!(resolver.resolve(TopicKind::Async, "x"), Some(async_broker));

    resolver.stop().await.unwrap();
}

#[tokio::test]
async fn test_malformed_registration_is_answered_with_error() {
    let resolver = start_resolver(HashMap::new()).await;
    let endpoint = resolver.endpoint().unwrap();
    let transport = TransportSettings::default();

    let request = Message::new_async(topics::ADD_ASYNC_TOPICS, "broker", "not an endpoint");
    let reply = request_once(&endpoint, &request, &transport).await.unwrap();
    assert_eq!(reply.topic(), topics::ERROR);

    let request = Message::new_async("bogus", "broker", "");
    let reply = request_once(&endpoint, &request, &transport).await.unwrap();
    assert_eq!(reply.topic(), topics::ERROR);

    resolver.stop().await.unwrap();
}

#[tokio::test]
async fn test_denied_peers_are_dropped() {
    let resolver = start_resolver(HashMap::new()).await;
    let endpoint = resolver.endpoint().unwrap();
    resolver.denylist().add(&["127.0.0.1"]).unwrap();

    let result = client::resolve(
        &endpoint,
        "node",
        TopicKind::Async,
        "orders",
        &TransportSettings::default(),
    )
    .await;
    assert!(result.is_err());

    resolver.denylist().remove(&["127.0.0.1"]).unwrap();
    resolver.stop().await.unwrap();
}

#[tokio::test]
async fn test_lifecycle_errors() {
    let resolver = start_resolver(HashMap::new()).await;
    assert!(matches!(resolver.start().await, Err(Error::Lifecycle(_))));
    resolver.stop().await.unwrap();
    assert!(!resolver.is_started());
    assert!(matches!(resolver.stop().await, Err(Error::Lifecycle(_))));
}
