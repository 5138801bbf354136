use std::sync::Arc;

use futures::future::join_all;
use tracing::warn;

use super::pubsub_client::Client;
use crate::broker::TopicKind;
use crate::transport::{Connection, Message, topics};
use crate::utils::{Error, Result};

impl Client {
    /// Publish to every broker responsible for `topic`. Failing brokers are
    /// logged; only a failed resolution is returned as an error.
    pub async fn async_message(self: &Arc<Self>, topic: &str, payload: &str) -> Result<()> {
        let connections = self.topic_resolutions(topic, TopicKind::Async).await?;
        let sends = connections
            .iter()
            .map(|connection| async move { (connection, connection.async_message(topic, payload).await) });
        for (connection, result) in join_all(sends).await {
            match result {
                Ok(()) => self.counters.async_message_sent(),
                Err(err) => warn!(
                    "Client {} failed to send {} to {}: {}",
                    self.name,
                    topic,
                    connection.endpoint(),
                    err
                ),
            }
        }
        Ok(())
    }

    /// Send a sync request to every broker responsible for `topic` and
    /// collect the successful responses. `error` and `failure` responses
    /// count as failures of that broker only.
    pub async fn sync_request(self: &Arc<Self>, topic: &str, payload: &str) -> Result<Vec<Message>> {
        let connections = self.topic_resolutions(topic, TopicKind::Sync).await?;
        let requests = connections.iter().map(|connection| async move {
            (connection, connection.sync_request(topic, payload).await)
        });
        let mut responses = Vec::new();
        for (connection, result) in join_all(requests).await {
            let response = match result {
                Ok(response) => response,
                Err(err) => {
                    warn!(
                        "Client {} sync request {} to {} failed: {}",
                        self.name,
                        topic,
                        connection.endpoint(),
                        err
                    );
                    continue;
                }
            };
            self.counters.sync_request_sent();
            if matches!(response.topic(), topics::ERROR | topics::FAILURE) {
                warn!(
                    "Client {} sync request {} to {} failed: {}",
                    self.name,
                    topic,
                    connection.endpoint(),
                    response.payload()
                );
                continue;
            }
            self.counters.sync_response_received();
            responses.push(response);
        }
        Ok(responses)
    }

    /// Subscribe over `connection` unless this client already did.
    pub(super) async fn ensure_subscribed(&self, connection: &Arc<Connection>, topic: &str) -> Result<()> {
        if !self.state().mark_subscribed(connection, topic) {
            return Ok(());
        }
        let result = self.subscribe_to_topic(connection, topic).await;
        if result.is_err() {
            self.state().unmark_subscribed(connection, topic);
        }
        result
    }

    async fn subscribe_to_topic(&self, connection: &Connection, topic: &str) -> Result<()> {
        let reply = connection.sync_request(topics::SUBSCRIBE, topic).await?;
        match reply.topic() {
            topics::SUBSCRIBED => Ok(()),
            _ => Err(Error::protocol(format!(
                "subscribe to \"{topic}\" rejected: {}",
                reply.payload()
            ))),
        }
    }

    pub(super) async fn unsubscribe_from_topic(&self, connection: &Connection, topic: &str) -> Result<()> {
        let reply = connection.sync_request(topics::UNSUBSCRIBE, topic).await?;
        match reply.topic() {
            topics::UNSUBSCRIBED => Ok(()),
            _ => Err(Error::protocol(format!(
                "unsubscribe from \"{topic}\" rejected: {}",
                reply.payload()
            ))),
        }
    }
}
