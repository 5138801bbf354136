//! The `error` module defines the error type used throughout `topicbroker`.
//!
//! Variants follow the stage that failed: transport (framing, io, TLS),
//! validation of a single message, protocol violations, the connect
//! handshake, topic resolution, resolver registration, sending, and the
//! start/stop lifecycle.

use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("incoming message exceeds byte limit of {limit}")]
    FrameTooLarge { limit: usize },

    #[error("tls error: {0}")]
    Tls(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid message: {0}")]
    Validation(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("resolution failed: {0}")]
    Resolution(String),

    #[error("registration failed: {0}")]
    Registration(String),

    #[error("send failed: {0}")]
    Send(String),

    #[error("access denied for {0}")]
    AccessDenied(String),

    #[error("{0}")]
    Lifecycle(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl Error {
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation(message.into())
    }

    pub fn protocol<S: Into<String>>(message: S) -> Self {
        Self::Protocol(message.into())
    }

    pub fn handshake<S: Into<String>>(message: S) -> Self {
        Self::Handshake(message.into())
    }

    pub fn resolution<S: Into<String>>(message: S) -> Self {
        Self::Resolution(message.into())
    }

    pub fn lifecycle<S: Into<String>>(message: S) -> Self {
        Self::Lifecycle(message.into())
    }

    /// Errors that leave the underlying connection unusable.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Io(_)
                | Self::ConnectionClosed
                | Self::FrameTooLarge { .. }
                | Self::Tls(_)
                | Self::Timeout(_)
        )
    }
}

