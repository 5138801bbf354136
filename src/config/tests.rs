use std::io::Write;
use std::time::Duration;

use serial_test::serial;

use super::load_config_from;
use super::settings::Settings;
use crate::transport::TcpEndpoint;

#[test]
fn test_default_settings() {
    let settings = Settings::default();
    assert_eq!(settings.node.name, "node");
    assert_eq!(settings.logging.level, "info");
    assert_eq!(settings.transport.tcp_timeout(), Duration::from_secs(5));
    assert_eq!(settings.transport.sync_request_timeout(), Duration::from_secs(10));
    assert!(!settings.transport.sequential_processing);
    assert_eq!(settings.broker.node_address, "127.0.0.1:60001");
    assert_eq!(settings.broker.config_address, "127.0.0.1:60002");
    assert_eq!(settings.resolver.address, "127.0.0.1:60000");
    assert_eq!(
        settings.client.resolver_endpoints,
        vec![TcpEndpoint::plain("127.0.0.1:60000")]
    );
    assert_eq!(settings.client.max_resolution_attempts, 10);
    assert_eq!(settings.client.resolution_ttl(), None);
}

#[test]
#[serial]
fn test_load_partial_file() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    write!(
        file,
        r#"
[node]
name = "edge-1"

[transport]
sync_request_timeout_ms = 250

[broker]
async_topics = ["orders", "news"]
sync_topics = ["compute"]

[[broker.resolver_config_endpoints]]
address = "10.0.0.1:60003"

[resolver.async_topics.orders]
address = "10.0.0.2:60001"

[resolver.sync_topics.compute]
address = "10.0.0.2:60001"

[client]
resolution_ttl_ms = 1500
"#
    )
    .unwrap();

    let settings = load_config_from(file.path().to_str()).unwrap();
    assert_eq!(settings.node.name, "edge-1");
    assert_eq!(settings.transport.sync_request_timeout_ms, 250);
    assert_eq!(settings.transport.tcp_timeout_ms, 5000);
    assert_eq!(settings.broker.async_topics, vec!["orders", "news"]);
    assert_eq!(settings.broker.sync_topics, vec!["compute"]);
    assert_eq!(
        settings.broker.resolver_config_endpoints,
        vec![TcpEndpoint::plain("10.0.0.1:60003")]
    );
    assert_eq!(settings.broker.node_address, "127.0.0.1:60001");
    assert_eq!(
        settings.resolver.async_topics.get("orders"),
        Some(&TcpEndpoint::plain("10.0.0.2:60001"))
    );
    assert!(settings.resolver.async_topics.get("compute").is_none());
    assert_eq!(
        settings.resolver.sync_topics.get("compute"),
        Some(&TcpEndpoint::plain("10.0.0.2:60001"))
    );
    assert_eq!(
        settings.client.resolution_ttl(),
        Some(Duration::from_millis(1500))
    );
    assert_eq!(settings.client.max_resolution_attempts, 10);
}

#[test]
#[serial]
fn test_missing_explicit_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing.toml");
    assert!(load_config_from(path.to_str()).is_err());
}

#[test]
#[serial]
fn test_environment_overrides() {
    temp_env::with_vars(
        [
            ("TOPICBROKER_NODE__NAME", Some("from-env")),
            ("TOPICBROKER_TRANSPORT__TCP_TIMEOUT_MS", Some("2000")),
            ("TOPICBROKER_TRANSPORT__SEQUENTIAL_PROCESSING", Some("true")),
            ("TOPICBROKER_CLIENT__MAX_RESOLUTION_ATTEMPTS", Some("0")),
        ],
        || {
            let settings = load_config_from(None).unwrap();
            assert_eq!(settings.node.name, "from-env");
            assert_eq!(settings.transport.tcp_timeout(), Duration::from_secs(2));
            assert!(settings.transport.sequential_processing);
            assert_eq!(settings.client.max_resolution_attempts, 0);
            assert_eq!(settings.logging.level, "info");
        },
    );
}
