//! The `transport` module is responsible for network communication between
//! nodes, brokers and resolvers.
//!
//! It defines the wire message and its framing over TCP (optionally TLS),
//! endpoints and listeners, IP access control, and the dialing side of a
//! node connection.

pub mod access;
pub mod connection;
pub mod endpoint;
pub mod exchange;
pub mod framing;
pub mod message;
pub mod tls;

pub use access::AccessControlList;
pub use connection::{Connection, IncomingHandler};
pub use endpoint::{BoxedStream, Listener, StreamReader, StreamWriter, TcpEndpoint, framed};
pub use message::{Message, MessageKind, MessageLimits, topics};

#[cfg(test)]
mod tests;
