//! One-shot exchanges
//!
//! Resolver requests and broker administration use short-lived connections
//! that carry exactly one request and one reply. There is no `connect`
//! handshake; the request's origin names the caller.

use std::future::Future;

use tracing::debug;

use super::endpoint::{BoxedStream, TcpEndpoint, framed};
use super::message::{Message, MessageLimits};
use crate::config::TransportSettings;
use crate::utils::{Error, Result};

/// Send `request` to `endpoint` and wait for the single reply.
pub async fn request_once(
    endpoint: &TcpEndpoint,
    request: &Message,
    settings: &TransportSettings,
) -> Result<Message> {
    let timeout = settings.tcp_timeout();
    let stream = endpoint.dial(timeout).await?;
    let (mut reader, mut writer) = framed(stream, settings);

    writer.write_message(request).await?;
    let reply = tokio::time::timeout(timeout, reader.read_message())
        .await
        .map_err(|_| Error::Timeout(timeout))??;
    writer.shutdown().await;
    Ok(reply)
}

/// Read one request from `stream`, answer it with `respond` and close.
pub async fn respond_once<F, Fut>(
    stream: BoxedStream,
    settings: &TransportSettings,
    limits: &MessageLimits,
    respond: F,
) -> Result<()>
where
    F: FnOnce(Message) -> Fut,
    Fut: Future<Output = Message>,
{
    let timeout = settings.tcp_timeout();
    let (mut reader, mut writer) = framed(stream, settings);

    let request = tokio::time::timeout(timeout, reader.read_message())
        .await
        .map_err(|_| Error::Timeout(timeout))??;
    limits.validate(&request)?;
    debug!("Handling {} request from {}", request.topic(), request.origin());

    let reply = respond(request).await;
    writer.write_message(&reply).await?;
    writer.shutdown().await;
    Ok(())
}
