use super::access::{self, AccessControlList};
use super::framing::{END_OF_MESSAGE, FrameReader, FrameWriter, HEARTBEAT};
use super::message::{join_topic_list, split_topic_list};
use super::{Message, MessageKind, MessageLimits, TcpEndpoint, topics};
use crate::utils::Error;
use std::net::IpAddr;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

fn limits() -> MessageLimits {
    MessageLimits {
        max_topic_size: 16,
        max_origin_size: 16,
        max_payload_size: 32,
        max_token_size: 40,
    }
}

#[test]
fn test_message_serialization_uses_wire_names() {
    let message = Message::new_async("orders", "B", "42");
    let json = String::from_utf8(message.serialize().unwrap()).unwrap();
    assert_eq!(json, r#"{"topic":"orders","origin":"B","payload":"42"}"#);

    let request = Message::new_async("compute", "B", "x").with_sync_request_token("tok1");
    let json = String::from_utf8(request.serialize().unwrap()).unwrap();
    assert!(json.contains(r#""syncRequestToken":"tok1""#));
    assert!(!json.contains("syncResponseToken"));

    let parsed = Message::deserialize(json.as_bytes()).unwrap();
    assert_eq!(parsed, request);
}

#[test]
fn test_response_copies_request_token() {
    let request = Message::new_sync_request("compute", "B", "x");
    assert_eq!(request.sync_request_token().len(), 36);

    let response = request.response("compute", "A", "y");
    assert_eq!(response.sync_response_token(), request.sync_request_token());
    assert!(!response.is_sync_request());
    assert_eq!(response.kind(), MessageKind::SyncResponse);
}

#[test]
fn test_message_kind() {
    let token = "tok";
    let cases = [
        (Message::new_async(topics::CONNECT, "A", ""), MessageKind::Connect),
        (
            Message::new_async(topics::SUBSCRIBE, "A", "orders").with_sync_request_token(token),
            MessageKind::Subscribe,
        ),
        (
            Message::new_async(topics::UNSUBSCRIBE, "A", "orders").with_sync_request_token(token),
            MessageKind::Unsubscribe,
        ),
        (
            Message::new_async("compute", "A", "x").with_sync_request_token(token),
            MessageKind::SyncRequest,
        ),
        (Message::new_async("orders", "A", "42"), MessageKind::AsyncMessage),
    ];
    for (message, kind) in cases {
        assert_eq!(message.kind(), kind, "{}", message.topic());
    }
}

#[test]
fn test_validate_rejects_missing_fields() {
    let limits = limits();
    assert!(matches!(
        limits.validate(&Message::new_async("", "A", "x")),
        Err(Error::Validation(_))
    ));
    assert!(matches!(
        limits.validate(&Message::new_async("orders", "", "x")),
        Err(Error::Validation(_))
    ));
    assert!(limits.validate(&Message::new_async("orders", "A", "")).is_ok());
}

#[test]
fn test_validate_enforces_limits() {
    let limits = limits();
    let long_topic = "t".repeat(17);
    let long_payload = "p".repeat(33);
    assert!(limits.validate(&Message::new_async(long_topic, "A", "x")).is_err());
    assert!(limits.validate(&Message::new_async("orders", "A", long_payload)).is_err());
    assert!(
        limits
            .validate(&Message::new_async("orders", "A", "x").with_sync_request_token("k".repeat(41)))
            .is_err()
    );
    assert!(MessageLimits::unlimited()
        .validate(&Message::new_async("t".repeat(1000), "A", "p".repeat(10_000)))
        .is_ok());
}

#[test]
fn test_validate_rejects_both_tokens() {
    let json = r#"{"topic":"compute","origin":"A","payload":"","syncRequestToken":"a","syncResponseToken":"b"}"#;
    let message = Message::deserialize(json.as_bytes()).unwrap();
    assert!(matches!(
        limits().validate(&message),
        Err(Error::Validation(_))
    ));
}

#[test]
fn test_topic_list_helpers() {
    assert_eq!(split_topic_list("a| b||c "), vec!["a", "b", "c"]);
    assert!(split_topic_list("").is_empty());
    assert_eq!(join_topic_list(&["a", "b"]), "a|b");
}

#[tokio::test]
async fn test_frames_round_trip_over_a_stream() {
    let (client, server) = tokio::io::duplex(1024);
    let mut writer = FrameWriter::new(client, Duration::from_secs(1));
    let mut reader = FrameReader::new(server, 0);

    let first = Message::new_async("orders", "B", "42");
    let second = Message::new_sync_request("compute", "B", "x");
    writer.write_message(&first).await.unwrap();
    writer.write_heartbeat().await.unwrap();
    writer.write_message(&second).await.unwrap();

    assert_eq!(reader.read_message().await.unwrap(), first);
    assert_eq!(reader.read_message().await.unwrap(), second);
}

#[tokio::test]
async fn test_reader_skips_heartbeats_and_empty_frames() {
    let (mut client, server) = tokio::io::duplex(256);
    let mut reader = FrameReader::new(server, 0);

    let mut bytes = vec![HEARTBEAT, END_OF_MESSAGE, HEARTBEAT];
    bytes.extend(Message::new_async("orders", "B", "1").serialize().unwrap());
    bytes.push(END_OF_MESSAGE);
    client.write_all(&bytes).await.unwrap();

    let message = reader.read_message().await.unwrap();
    assert_eq!(message.payload(), "1");
}

#[tokio::test]
async fn test_reader_enforces_byte_limit() {
    let (client, server) = tokio::io::duplex(1024);
    let mut writer = FrameWriter::new(client, Duration::from_secs(1));
    let mut reader = FrameReader::new(server, 32);

    writer
        .write_message(&Message::new_async("orders", "B", "p".repeat(100)))
        .await
        .unwrap();
    let err = reader.read_message().await.unwrap_err();
    assert!(matches!(err, Error::FrameTooLarge { limit: 32 }));
    assert!(err.is_transport());
}

#[tokio::test]
async fn test_malformed_frame_is_not_a_transport_error() {
    let (mut client, server) = tokio::io::duplex(256);
    let mut reader = FrameReader::new(server, 0);

    let mut bytes = b"not json".to_vec();
    bytes.push(END_OF_MESSAGE);
    bytes.extend(Message::new_async("orders", "B", "2").serialize().unwrap());
    bytes.push(END_OF_MESSAGE);
    client.write_all(&bytes).await.unwrap();

    let err = reader.read_message().await.unwrap_err();
    assert!(!err.is_transport());
    assert_eq!(reader.read_message().await.unwrap().payload(), "2");
}

#[tokio::test]
async fn test_reader_reports_closed_stream() {
    let (client, server) = tokio::io::duplex(64);
    let mut reader = FrameReader::new(server, 0);
    drop(client);
    assert!(matches!(
        reader.read_frame().await,
        Err(Error::ConnectionClosed)
    ));
}

#[test]
fn test_endpoint_identity_includes_certificate() {
    let plain = TcpEndpoint::plain("127.0.0.1:6000");
    let tls = TcpEndpoint::with_tls("127.0.0.1:6000", "PEM", None);
    assert_eq!(plain.identity(), "127.0.0.1:6000");
    assert_ne!(plain.identity(), tls.identity());

    let parsed = TcpEndpoint::from_json(&tls.to_json().unwrap()).unwrap();
    assert_eq!(parsed, tls);
    assert_eq!(
        TcpEndpoint::from_json(r#"{"address":"10.0.0.1:1"}"#).unwrap(),
        TcpEndpoint::plain("10.0.0.1:1")
    );
}

#[test]
fn test_access_control() {
    let allow = AccessControlList::default();
    let deny = AccessControlList::from_addresses(&["10.0.0.2"]).unwrap();
    let local: IpAddr = "127.0.0.1".parse().unwrap();
    let denied: IpAddr = "10.0.0.2".parse().unwrap();

    assert!(access::check(&allow, &deny, local).is_ok());
    assert!(matches!(
        access::check(&allow, &deny, denied),
        Err(Error::AccessDenied(_))
    ));

    allow.add(&["10.0.0.3"]).unwrap();
    assert!(access::check(&allow, &deny, local).is_err());

    allow.remove(&["10.0.0.3"]).unwrap();
    assert!(allow.is_empty());
    assert!(allow.add(&["not-an-ip"]).is_err());
}
