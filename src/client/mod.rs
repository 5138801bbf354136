//! The `client` module is the node-side access to the broker fabric.
//!
//! It provides the `Client` struct, which resolves topics to brokers through
//! the resolvers, pools one connection per broker, keeps subscriptions alive
//! across connection loss and dispatches incoming messages to a
//! `MessageHandler`.

pub mod handler;
mod lifetime;
mod messaging;
pub mod metrics;
pub mod pubsub_client;
mod resolution;
mod state;

pub use handler::MessageHandler;
pub use metrics::ClientMetrics;
pub use pubsub_client::Client;
