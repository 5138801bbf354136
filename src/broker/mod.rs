//! The `broker` module holds the broker node: its topic table, the
//! connections of subscribed nodes, message routing and sync request
//! correlation, and the administrative config port.

pub mod admin;
mod dispatch;
pub mod engine;
pub mod metrics;
pub mod node_connection;
pub mod routing;
pub mod topic;

pub use admin::config_request;
pub use engine::Broker;
pub use metrics::BrokerMetrics;
pub use topic::TopicKind;
