//! The `resolver` module maps topic names to the broker endpoint that
//! currently owns them.
//!
//! `service` is the resolver itself; `client` holds the requests brokers and
//! broker clients send to it.

pub mod client;
pub mod service;

pub use service::{Resolver, ResolverMetrics};

#[cfg(test)]
mod tests;
