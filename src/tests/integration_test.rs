use super::support::{
    client_settings, eventually, new_client, next_message, recording_handler,
    start_broker, start_resolver, strings,
};
use crate::broker::{TopicKind, config_request};
use crate::client::MessageHandler;
use crate::config::{ClientSettings, TransportSettings};
use crate::transport::{Message, TcpEndpoint, topics};
use crate::utils::Error;

fn answering(topic: &str, payload: &'static str) -> MessageHandler {
    MessageHandler::new().with_sync_handler(topic, move |_: &Message| Ok(payload.to_string()))
}

#[tokio::test]
async fn integration_async_message_end_to_end() {
    let resolver = start_resolver().await;
    let broker = start_broker("b1", &resolver, &["orders"], &[]).await;

    let (handler, mut received) = recording_handler(&["orders"]);
    let subscriber = new_client(
        "A",
        ClientSettings {
            async_topics: strings(&["orders"]),
            ..client_settings(&resolver)
        },
        handler,
    );
    subscriber.start().await.unwrap();
    assert_eq!(broker.subscribers("orders"), vec!["A"]);

    let publisher = new_client("B", client_settings(&resolver), MessageHandler::new());
    publisher.start().await.unwrap();
    publisher.async_message("orders", "42").await.unwrap();

    let message = next_message(&mut received).await;
    assert_eq!(message.topic(), "orders");
    assert_eq!(message.payload(), "42");
    assert_eq!(message.origin(), "B");

    publisher.stop().await.unwrap();
    subscriber.stop().await.unwrap();
    broker.stop().await.unwrap();
    resolver.stop().await.unwrap();
}

#[tokio::test]
async fn integration_sync_request_end_to_end() {
    let resolver = start_resolver().await;
    let broker = start_broker("b1", &resolver, &[], &["compute"]).await;

    let requester = new_client("B", client_settings(&resolver), MessageHandler::new());
    requester.start().await.unwrap();

    // no subscriber yet: the broker answers with an error at once
    let responses = requester.sync_request("compute", "x").await.unwrap();
    assert!(responses.is_empty());
    assert_eq!(broker.open_sync_requests(), 0);

    let subscriber = new_client(
        "A",
        ClientSettings {
            sync_topics: strings(&["compute"]),
            ..client_settings(&resolver)
        },
        answering("compute", "y"),
    );
    subscriber.start().await.unwrap();

    let responses = requester.sync_request("compute", "x").await.unwrap();
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].payload(), "y");
    assert_eq!(responses[0].origin(), "A");
    assert_eq!(broker.open_sync_requests(), 0);
    assert_eq!(requester.metrics().sync_responses_received, 1);

    // a second consumer of the sync topic is turned away
    let second = new_client("C", client_settings(&resolver), answering("compute", "z"));
    second.start().await.unwrap();
    assert!(second.add_sync_subscribe_topic("compute").await.is_err());
    assert_eq!(broker.subscribers("compute"), vec!["A"]);

    second.stop().await.unwrap();
    subscriber.stop().await.unwrap();
    requester.stop().await.unwrap();
    broker.stop().await.unwrap();
    resolver.stop().await.unwrap();
}

#[tokio::test]
async fn integration_lost_connection_is_resolved_again() {
    let resolver = start_resolver().await;
    let broker = start_broker("b1", &resolver, &["a", "b"], &[]).await;

    let (handler, mut received) = recording_handler(&["a", "b"]);
    let client = new_client(
        "A",
        ClientSettings {
            async_topics: strings(&["a", "b"]),
            ..client_settings(&resolver)
        },
        handler,
    );
    client.start().await.unwrap();
    assert_eq!(broker.subscriptions("A"), Some(strings(&["a", "b"])));
    let attempts = client.metrics().resolution_attempts;

    broker.remove_node_connection("A").unwrap();
    assert!(eventually(|| broker.subscriptions("A") == Some(strings(&["a", "b"]))).await);
    assert!(eventually(|| client.is_resolved("a") && client.is_resolved("b")).await);
    assert_eq!(client.metrics().resolution_attempts, attempts + 2);
    assert_eq!(client.pooled_connection_count(), 1);

    let publisher = new_client("B", client_settings(&resolver), MessageHandler::new());
    publisher.start().await.unwrap();
    publisher.async_message("b", "after").await.unwrap();
    assert_eq!(next_message(&mut received).await.payload(), "after");

    publisher.stop().await.unwrap();
    client.stop().await.unwrap();
    broker.stop().await.unwrap();
    resolver.stop().await.unwrap();
}

#[tokio::test]
async fn integration_subscription_survives_broker_restart() {
    let resolver = start_resolver().await;
    let broker = start_broker("b1", &resolver, &["orders"], &[]).await;
    let client = new_client(
        "A",
        ClientSettings {
            async_topics: strings(&["orders"]),
            max_resolution_attempts: 0,
            ..client_settings(&resolver)
        },
        MessageHandler::new(),
    );
    client.start().await.unwrap();
    assert_eq!(client.resolved_endpoints("orders"), vec![broker.endpoint().unwrap()]);

    broker.stop().await.unwrap();
    assert!(eventually(|| !client.is_resolved("orders")).await);

    broker.start().await.unwrap();
    let second = broker.endpoint().unwrap();
    assert!(eventually(|| broker.subscriptions("A") == Some(strings(&["orders"]))).await);
    assert_eq!(client.resolved_endpoints("orders"), vec![second]);

    client.stop().await.unwrap();
    broker.stop().await.unwrap();
    resolver.stop().await.unwrap();
}

#[tokio::test]
async fn integration_expired_resolutions() {
    let resolver = start_resolver().await;
    let broker = start_broker("b1", &resolver, &["orders", "news"], &[]).await;
    let settings = ClientSettings {
        resolution_ttl_ms: 100,
        ..client_settings(&resolver)
    };

    // unsubscribed topics are released when they expire
    let publisher = new_client("B", settings.clone(), MessageHandler::new());
    publisher.start().await.unwrap();
    publisher.async_message("news", "1").await.unwrap();
    assert_eq!(publisher.pooled_connection_count(), 1);
    assert!(eventually(|| publisher.pooled_connection_count() == 0).await);
    assert!(eventually(|| broker.connection_names().is_empty()).await);

    // subscribed topics are resolved again
    let subscriber = new_client(
        "A",
        ClientSettings {
            async_topics: strings(&["orders"]),
            ..settings
        },
        MessageHandler::new(),
    );
    subscriber.start().await.unwrap();
    assert!(eventually(|| subscriber.metrics().resolution_attempts >= 3).await);
    assert_eq!(subscriber.pooled_connection_count(), 1);
    assert_eq!(broker.subscriptions("A"), Some(strings(&["orders"])));

    subscriber.stop().await.unwrap();
    publisher.stop().await.unwrap();
    broker.stop().await.unwrap();
    resolver.stop().await.unwrap();
}

#[tokio::test]
async fn integration_sync_request_reaches_every_broker() {
    let first_resolver = start_resolver().await;
    let second_resolver = start_resolver().await;
    let first = start_broker("b1", &first_resolver, &[], &["compute"]).await;
    let second = start_broker("b2", &second_resolver, &[], &["compute"]).await;

    let subscribe_compute = |settings: ClientSettings| ClientSettings {
        sync_topics: strings(&["compute"]),
        ..settings
    };
    let one = new_client("S1", subscribe_compute(client_settings(&first_resolver)), answering("compute", "one"));
    let two = new_client("S2", subscribe_compute(client_settings(&second_resolver)), answering("compute", "two"));
    one.start().await.unwrap();
    two.start().await.unwrap();

    let requester = new_client(
        "C",
        ClientSettings {
            resolver_endpoints: vec![
                first_resolver.endpoint().unwrap(),
                second_resolver.endpoint().unwrap(),
            ],
            ..client_settings(&first_resolver)
        },
        MessageHandler::new(),
    );
    requester.start().await.unwrap();

    let responses = requester.sync_request("compute", "x").await.unwrap();
    let mut payloads: Vec<&str> = responses.iter().map(|response| response.payload()).collect();
    payloads.sort();
    assert_eq!(payloads, vec!["one", "two"]);
    assert_eq!(requester.pooled_connection_count(), 2);

    requester.stop().await.unwrap();
    one.stop().await.unwrap();
    two.stop().await.unwrap();
    first.stop().await.unwrap();
    second.stop().await.unwrap();
    first_resolver.stop().await.unwrap();
    second_resolver.stop().await.unwrap();
}

#[tokio::test]
async fn integration_topic_added_over_config_port() {
    let resolver = start_resolver().await;
    let broker = start_broker("b1", &resolver, &[], &[]).await;
    let config = TcpEndpoint::plain(broker.config_address().unwrap().to_string());
    config_request(
        &config,
        "admin",
        topics::ADD_ASYNC_TOPICS,
        &strings(&["news"]),
        &TransportSettings::default(),
    )
    .await
    .unwrap();
    assert_eq!(broker.topics(TopicKind::Async), strings(&["news"]));
    assert_eq!(resolver.resolve(TopicKind::Async, "news"), broker.endpoint());

    let (handler, mut received) = recording_handler(&["news"]);
    let subscriber = new_client("A", client_settings(&resolver), handler);
    subscriber.start().await.unwrap();
    subscriber.add_async_subscribe_topic("news").await.unwrap();

    let publisher = new_client("B", client_settings(&resolver), MessageHandler::new());
    publisher.start().await.unwrap();
    publisher.async_message("news", "hello").await.unwrap();
    assert_eq!(next_message(&mut received).await.payload(), "hello");

    config_request(
        &config,
        "admin",
        topics::REMOVE_ASYNC_TOPICS,
        &strings(&["news"]),
        &TransportSettings::default(),
    )
    .await
    .unwrap();
    assert_eq!(resolver.resolve(TopicKind::Async, "news"), None);
    assert!(broker.subscribers("news").is_empty());

    publisher.stop().await.unwrap();
    subscriber.stop().await.unwrap();
    broker.stop().await.unwrap();
    resolver.stop().await.unwrap();
}

#[tokio::test]
async fn integration_topics_resolve_only_as_their_kind() {
    let resolver = start_resolver().await;
    let broker = start_broker("b1", &resolver, &["orders"], &["compute"]).await;
    let settings = ClientSettings {
        max_resolution_attempts: 1,
        ..client_settings(&resolver)
    };

    let client = new_client("A", settings.clone(), answering("orders", "y"));
    client.start().await.unwrap();
    assert!(matches!(
        client.add_sync_subscribe_topic("orders").await,
        Err(Error::Resolution(_))
    ));
    assert!(matches!(
        client.add_async_subscribe_topic("compute").await,
        Err(Error::Resolution(_))
    ));
    assert!(broker.subscribers("orders").is_empty());
    assert!(broker.subscribers("compute").is_empty());

    let requester = new_client("B", settings, MessageHandler::new());
    requester.start().await.unwrap();
    assert!(matches!(
        requester.sync_request("orders", "p").await,
        Err(Error::Resolution(_))
    ));
    assert!(matches!(
        requester.async_message("compute", "p").await,
        Err(Error::Resolution(_))
    ));
    assert_eq!(requester.pooled_connection_count(), 0);

    requester.stop().await.unwrap();
    client.stop().await.unwrap();
    broker.stop().await.unwrap();
    resolver.stop().await.unwrap();
}

#[tokio::test]
async fn integration_one_name_on_two_brokers_as_both_kinds() {
    let resolver = start_resolver().await;
    let async_broker = start_broker("b1", &resolver, &["x"], &[]).await;
    let sync_broker = start_broker("b2", &resolver, &[], &["x"]).await;

    let (handler, mut received) = recording_handler(&["x"]);
    let listener = new_client(
        "L",
        ClientSettings {
            async_topics: strings(&["x"]),
            ..client_settings(&resolver)
        },
        handler,
    );
    let answerer = new_client(
        "S",
        ClientSettings {
            sync_topics: strings(&["x"]),
            ..client_settings(&resolver)
        },
        answering("x", "answer"),
    );
    listener.start().await.unwrap();
    answerer.start().await.unwrap();
    assert_eq!(async_broker.subscribers("x"), vec!["L"]);
    assert_eq!(sync_broker.subscribers("x"), vec!["S"]);

    let caller = new_client("C", client_settings(&resolver), MessageHandler::new());
    caller.start().await.unwrap();
    caller.async_message("x", "note").await.unwrap();
    assert_eq!(next_message(&mut received).await.payload(), "note");
    assert_eq!(caller.resolved_endpoints("x"), vec![async_broker.endpoint().unwrap()]);

    // the async resolution is not reused for a sync request
    let responses = caller.sync_request("x", "q").await.unwrap();
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].payload(), "answer");
    assert_eq!(caller.resolved_endpoints("x"), vec![sync_broker.endpoint().unwrap()]);

    caller.stop().await.unwrap();
    answerer.stop().await.unwrap();
    listener.stop().await.unwrap();
    sync_broker.stop().await.unwrap();
    async_broker.stop().await.unwrap();
    resolver.stop().await.unwrap();
}
