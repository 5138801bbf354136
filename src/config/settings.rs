use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;

use crate::transport::TcpEndpoint;

/// Top-level configuration settings for the application.
///
/// Includes settings for the node identity, logging, the transport shared by
/// every component, message limits, and the broker, resolver and client.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    pub node: NodeSettings,
    pub logging: LoggingSettings,
    pub transport: TransportSettings,
    pub limits: LimitSettings,
    pub broker: BrokerSettings,
    pub resolver: ResolverSettings,
    pub client: ClientSettings,
}

/// Identity of this process towards brokers and resolvers.
#[derive(Debug, Deserialize, Clone)]
pub struct NodeSettings {
    pub name: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSettings {
    pub level: String,
}

/// Timeouts and byte limits applied to every framed connection.
#[derive(Debug, Deserialize, Clone)]
pub struct TransportSettings {
    /// Write timeout and handshake read timeout.
    pub tcp_timeout_ms: u64,
    /// 0 disables the limit.
    pub incoming_message_byte_limit: usize,
    pub sync_request_timeout_ms: u64,
    /// Handle incoming messages one at a time instead of concurrently.
    pub sequential_processing: bool,
}

impl TransportSettings {
    pub fn tcp_timeout(&self) -> Duration {
        Duration::from_millis(self.tcp_timeout_ms)
    }

    pub fn sync_request_timeout(&self) -> Duration {
        Duration::from_millis(self.sync_request_timeout_ms)
    }
}

/// Maximum field sizes of a message, in bytes. 0 disables a limit.
#[derive(Debug, Deserialize, Clone)]
pub struct LimitSettings {
    pub max_topic_size: usize,
    pub max_origin_size: usize,
    pub max_payload_size: usize,
    pub max_token_size: usize,
}

/// PEM certificate chain and private key for a listener.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct TlsSettings {
    pub cert_path: String,
    pub key_path: String,
    /// Name clients use to verify the certificate; defaults to the host part
    /// of the advertised address.
    #[serde(default)]
    pub domain: Option<String>,
}

/// Configuration of a broker node.
///
/// The node port carries connections from client nodes; the config port
/// accepts one-shot administrative requests.
#[derive(Debug, Deserialize, Clone)]
pub struct BrokerSettings {
    pub node_address: String,
    pub config_address: String,
    /// Address published to resolvers; defaults to the bound node address.
    pub advertised_address: Option<String>,
    pub tls: Option<TlsSettings>,
    pub config_tls: Option<TlsSettings>,
    pub async_topics: Vec<String>,
    pub sync_topics: Vec<String>,
    pub resolver_config_endpoints: Vec<TcpEndpoint>,
    pub allowlist: Vec<String>,
    pub denylist: Vec<String>,
    pub config_allowlist: Vec<String>,
    pub config_denylist: Vec<String>,
}

/// Configuration of a resolver service.
#[derive(Debug, Deserialize, Clone)]
pub struct ResolverSettings {
    pub address: String,
    pub tls: Option<TlsSettings>,
    /// Static resolutions of async topics loaded at construction.
    pub async_topics: HashMap<String, TcpEndpoint>,
    pub sync_topics: HashMap<String, TcpEndpoint>,
    pub allowlist: Vec<String>,
    pub denylist: Vec<String>,
}

/// Configuration of a broker client.
#[derive(Debug, Deserialize, Clone)]
pub struct ClientSettings {
    pub resolver_endpoints: Vec<TcpEndpoint>,
    pub async_topics: Vec<String>,
    pub sync_topics: Vec<String>,
    pub resolution_retry_interval_ms: u64,
    /// 0 retries until the topic resolves or the client stops.
    pub max_resolution_attempts: u32,
    /// 0 keeps resolutions until their connection closes.
    pub resolution_ttl_ms: u64,
}

impl ClientSettings {
    pub fn resolution_retry_interval(&self) -> Duration {
        Duration::from_millis(self.resolution_retry_interval_ms)
    }

    pub fn resolution_ttl(&self) -> Option<Duration> {
        (self.resolution_ttl_ms > 0).then(|| Duration::from_millis(self.resolution_ttl_ms))
    }
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            name: "node".to_string(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            tcp_timeout_ms: 5000,
            incoming_message_byte_limit: 1024 * 1024,
            sync_request_timeout_ms: 10_000,
            sequential_processing: false,
        }
    }
}

impl Default for LimitSettings {
    fn default() -> Self {
        Self {
            max_topic_size: 255,
            max_origin_size: 255,
            max_payload_size: 512 * 1024,
            max_token_size: 64,
        }
    }
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            node_address: "127.0.0.1:60001".to_string(),
            config_address: "127.0.0.1:60002".to_string(),
            advertised_address: None,
            tls: None,
            config_tls: None,
            async_topics: Vec::new(),
            sync_topics: Vec::new(),
            resolver_config_endpoints: Vec::new(),
            allowlist: Vec::new(),
            denylist: Vec::new(),
            config_allowlist: Vec::new(),
            config_denylist: Vec::new(),
        }
    }
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:60000".to_string(),
            tls: None,
            async_topics: HashMap::new(),
            sync_topics: HashMap::new(),
            allowlist: Vec::new(),
            denylist: Vec::new(),
        }
    }
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            resolver_endpoints: vec![TcpEndpoint::plain("127.0.0.1:60000")],
            async_topics: Vec::new(),
            sync_topics: Vec::new(),
            resolution_retry_interval_ms: 1000,
            max_resolution_attempts: 10,
            resolution_ttl_ms: 0,
        }
    }
}

/// Partial configuration settings loaded from files or environment.
///
/// Every field is optional. Missing values are filled from
/// `Settings::default()` by `load_config`.
#[derive(Debug, Deserialize, Default)]
pub struct PartialSettings {
    pub node: Option<PartialNodeSettings>,
    pub logging: Option<PartialLoggingSettings>,
    pub transport: Option<PartialTransportSettings>,
    pub limits: Option<PartialLimitSettings>,
    pub broker: Option<PartialBrokerSettings>,
    pub resolver: Option<PartialResolverSettings>,
    pub client: Option<PartialClientSettings>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialNodeSettings {
    pub name: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialLoggingSettings {
    pub level: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialTransportSettings {
    pub tcp_timeout_ms: Option<u64>,
    pub incoming_message_byte_limit: Option<usize>,
    pub sync_request_timeout_ms: Option<u64>,
    pub sequential_processing: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialLimitSettings {
    pub max_topic_size: Option<usize>,
    pub max_origin_size: Option<usize>,
    pub max_payload_size: Option<usize>,
    pub max_token_size: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialBrokerSettings {
    pub node_address: Option<String>,
    pub config_address: Option<String>,
    pub advertised_address: Option<String>,
    pub tls: Option<TlsSettings>,
    pub config_tls: Option<TlsSettings>,
    pub async_topics: Option<Vec<String>>,
    pub sync_topics: Option<Vec<String>>,
    pub resolver_config_endpoints: Option<Vec<TcpEndpoint>>,
    pub allowlist: Option<Vec<String>>,
    pub denylist: Option<Vec<String>>,
    pub config_allowlist: Option<Vec<String>>,
    pub config_denylist: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialResolverSettings {
    pub address: Option<String>,
    pub tls: Option<TlsSettings>,
    pub async_topics: Option<HashMap<String, TcpEndpoint>>,
    pub sync_topics: Option<HashMap<String, TcpEndpoint>>,
    pub allowlist: Option<Vec<String>>,
    pub denylist: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialClientSettings {
    pub resolver_endpoints: Option<Vec<TcpEndpoint>>,
    pub async_topics: Option<Vec<String>>,
    pub sync_topics: Option<Vec<String>>,
    pub resolution_retry_interval_ms: Option<u64>,
    pub max_resolution_attempts: Option<u32>,
    pub resolution_ttl_ms: Option<u64>,
}

impl PartialSettings {
    /// Merge with defaults
    pub fn merge(self, default: Settings) -> Settings {
        let node = self.node.unwrap_or_default();
        let logging = self.logging.unwrap_or_default();
        let transport = self.transport.unwrap_or_default();
        let limits = self.limits.unwrap_or_default();
        let broker = self.broker.unwrap_or_default();
        let resolver = self.resolver.unwrap_or_default();
        let client = self.client.unwrap_or_default();

        Settings {
            node: NodeSettings {
                name: node.name.unwrap_or(default.node.name),
            },
            logging: LoggingSettings {
                level: logging.level.unwrap_or(default.logging.level),
            },
            transport: TransportSettings {
                tcp_timeout_ms: transport
                    .tcp_timeout_ms
                    .unwrap_or(default.transport.tcp_timeout_ms),
                incoming_message_byte_limit: transport
                    .incoming_message_byte_limit
                    .unwrap_or(default.transport.incoming_message_byte_limit),
                sync_request_timeout_ms: transport
                    .sync_request_timeout_ms
                    .unwrap_or(default.transport.sync_request_timeout_ms),
                sequential_processing: transport
                    .sequential_processing
                    .unwrap_or(default.transport.sequential_processing),
            },
            limits: LimitSettings {
                max_topic_size: limits.max_topic_size.unwrap_or(default.limits.max_topic_size),
                max_origin_size: limits
                    .max_origin_size
                    .unwrap_or(default.limits.max_origin_size),
                max_payload_size: limits
                    .max_payload_size
                    .unwrap_or(default.limits.max_payload_size),
                max_token_size: limits.max_token_size.unwrap_or(default.limits.max_token_size),
            },
            broker: BrokerSettings {
                node_address: broker.node_address.unwrap_or(default.broker.node_address),
                config_address: broker
                    .config_address
                    .unwrap_or(default.broker.config_address),
                advertised_address: broker
                    .advertised_address
                    .or(default.broker.advertised_address),
                tls: broker.tls.or(default.broker.tls),
                config_tls: broker.config_tls.or(default.broker.config_tls),
                async_topics: broker.async_topics.unwrap_or(default.broker.async_topics),
                sync_topics: broker.sync_topics.unwrap_or(default.broker.sync_topics),
                resolver_config_endpoints: broker
                    .resolver_config_endpoints
                    .unwrap_or(default.broker.resolver_config_endpoints),
                allowlist: broker.allowlist.unwrap_or(default.broker.allowlist),
                denylist: broker.denylist.unwrap_or(default.broker.denylist),
                config_allowlist: broker
                    .config_allowlist
                    .unwrap_or(default.broker.config_allowlist),
                config_denylist: broker
                    .config_denylist
                    .unwrap_or(default.broker.config_denylist),
            },
            resolver: ResolverSettings {
                address: resolver.address.unwrap_or(default.resolver.address),
                tls: resolver.tls.or(default.resolver.tls),
                async_topics: resolver.async_topics.unwrap_or(default.resolver.async_topics),
                sync_topics: resolver.sync_topics.unwrap_or(default.resolver.sync_topics),
                allowlist: resolver.allowlist.unwrap_or(default.resolver.allowlist),
                denylist: resolver.denylist.unwrap_or(default.resolver.denylist),
            },
            client: ClientSettings {
                resolver_endpoints: client
                    .resolver_endpoints
                    .unwrap_or(default.client.resolver_endpoints),
                async_topics: client.async_topics.unwrap_or(default.client.async_topics),
                sync_topics: client.sync_topics.unwrap_or(default.client.sync_topics),
                resolution_retry_interval_ms: client
                    .resolution_retry_interval_ms
                    .unwrap_or(default.client.resolution_retry_interval_ms),
                max_resolution_attempts: client
                    .max_resolution_attempts
                    .unwrap_or(default.client.max_resolution_attempts),
                resolution_ttl_ms: client
                    .resolution_ttl_ms
                    .unwrap_or(default.client.resolution_ttl_ms),
            },
        }
    }
}
