//! # topicbroker
//!
//! `topicbroker` is a topic based publish/subscribe fabric over framed TCP
//! (optionally TLS). Brokers own topics, resolvers map each topic to the
//! broker that owns it, and nodes reach the brokers through a pooling client.
//!
//! ## Core Modules
//!
//! - `broker`: The broker node: topic table, subscriptions, async fan-out,
//!   sync request correlation and the administrative config port.
//! - `client`: Resolves topics through the resolvers, pools one connection per
//!   broker and keeps subscriptions alive across connection loss.
//! - `config`: Loads settings from defaults, an optional file and the environment.
//! - `resolver`: The topic to broker lookup service and its one-shot client calls.
//! - `transport`: Wire message, framing, endpoints, TLS, access control and
//!   outbound node connections.
//! - `utils`: Shared error type, logging setup and task coordination.

pub mod broker;
pub mod client;
pub mod config;
pub mod resolver;
pub mod transport;
pub mod utils;

#[cfg(test)]
mod tests;
