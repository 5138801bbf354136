//! Requests against a resolver, used by brokers to publish their topics and
//! by broker clients to find them.

use crate::broker::TopicKind;
use crate::config::TransportSettings;
use crate::transport::exchange::request_once;
use crate::transport::message::join_topic_list;
use crate::transport::{Message, TcpEndpoint, topics};
use crate::utils::{Error, Result};

/// Ask `resolver` which broker serves the `kind` topic `topic`.
pub async fn resolve(
    resolver: &TcpEndpoint,
    origin: &str,
    kind: TopicKind,
    topic: &str,
    transport: &TransportSettings,
) -> Result<TcpEndpoint> {
    let request = Message::new_sync_request(kind.resolve_request(), origin, topic);
    let reply = request_once(resolver, &request, transport).await?;
    match reply.topic() {
        topics::RESOLVED => TcpEndpoint::from_json(reply.payload()),
        topics::FAILURE => Err(Error::resolution(format!(
            "{resolver}: {}",
            reply.payload()
        ))),
        other => Err(Error::protocol(format!(
            "{resolver}: unexpected reply \"{other}\" to {}",
            request.topic()
        ))),
    }
}

/// Register `broker` as the owner of the `kind` topics `names` on `resolver`.
pub async fn add_topics(
    resolver: &TcpEndpoint,
    origin: &str,
    broker: &TcpEndpoint,
    kind: TopicKind,
    names: &[String],
    transport: &TransportSettings,
) -> Result<()> {
    registration(kind.add_request(), resolver, origin, broker, names, transport).await
}

pub async fn remove_topics(
    resolver: &TcpEndpoint,
    origin: &str,
    broker: &TcpEndpoint,
    kind: TopicKind,
    names: &[String],
    transport: &TransportSettings,
) -> Result<()> {
    registration(kind.remove_request(), resolver, origin, broker, names, transport).await
}

async fn registration(
    topic: &str,
    resolver: &TcpEndpoint,
    origin: &str,
    broker: &TcpEndpoint,
    names: &[String],
    transport: &TransportSettings,
) -> Result<()> {
    let payload = format!(
        "{}{}{}",
        broker.to_json()?,
        topics::LIST_SEPARATOR,
        join_topic_list(names)
    );
    let request = Message::new_async(topic, origin, payload);
    let reply = request_once(resolver, &request, transport)
        .await
        .map_err(|err| Error::Registration(format!("{resolver}: {err}")))?;
    match reply.topic() {
        topics::SUCCESS => Ok(()),
        _ => Err(Error::Registration(format!(
            "{resolver}: {}",
            reply.payload()
        ))),
    }
}
