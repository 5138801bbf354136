//! Config port
//!
//! Administrative requests arrive as one-shot exchanges on the broker's
//! second listener: one request in, one `success` or `error` message out.
//! Topic requests go through `add_topics`/`remove_topics`, so resolvers see
//! every change; access list requests edit the node port's lists.

use std::sync::Arc;

use tokio::net::TcpStream;
use tracing::{info, warn};

use super::engine::Broker;
use super::topic::TopicKind;
use crate::config::TransportSettings;
use crate::transport::exchange::{request_once, respond_once};
use crate::transport::message::{join_topic_list, split_topic_list};
use crate::transport::{Listener, Message, TcpEndpoint, topics};
use crate::utils::{Error, Result, TaskGroup};

impl Broker {
    pub(super) async fn accept_config_connections(
        self: Arc<Self>,
        listener: Listener,
        tasks: TaskGroup,
    ) {
        let listener = Arc::new(listener);
        let stopped = tasks.stopped();
        tokio::pin!(stopped);
        loop {
            let accepted = tokio::select! {
                _ = &mut stopped => break,
                accepted = listener.accept_checked(&self.config_allowlist, &self.config_denylist) => accepted,
            };
            let (stream, peer) = match accepted {
                Ok(accepted) => accepted,
                Err(err) => {
                    warn!("Broker {} failed to accept config connection: {}", self.name, err);
                    continue;
                }
            };
            let broker = self.clone();
            let listener = listener.clone();
            tasks.spawn(async move {
                if let Err(err) = broker.serve_config_request(&listener, stream).await {
                    warn!("Broker {} failed config request from {}: {}", broker.name, peer, err);
                }
            });
        }
    }

    async fn serve_config_request(&self, listener: &Listener, stream: TcpStream) -> Result<()> {
        let stream = listener
            .upgrade(stream, self.transport.tcp_timeout())
            .await?;
        respond_once(stream, &self.transport, &self.limits, |request| async move {
            self.counters.config_request();
            match self.handle_config_request(&request).await {
                Ok(()) => {
                    info!(
                        "Broker {} handled {} from {}",
                        self.name,
                        request.topic(),
                        request.origin()
                    );
                    Message::new_async(topics::SUCCESS, &self.name, "")
                }
                Err(err) => Message::new_async(
                    topics::ERROR,
                    &self.name,
                    format!("failed to handle config request: {err}"),
                ),
            }
        })
        .await
    }

    async fn handle_config_request(&self, request: &Message) -> Result<()> {
        let entries = split_topic_list(request.payload());
        if entries.is_empty() {
            return Err(Error::validation("no entries provided"));
        }
        match request.topic() {
            topics::ADD_SYNC_TOPICS => self.add_topics(TopicKind::Sync, &entries).await,
            topics::REMOVE_SYNC_TOPICS => self.remove_topics(TopicKind::Sync, &entries).await,
            topics::ADD_ASYNC_TOPICS => self.add_topics(TopicKind::Async, &entries).await,
            topics::REMOVE_ASYNC_TOPICS => self.remove_topics(TopicKind::Async, &entries).await,
            topics::ADD_ALLOWLIST => self.allowlist.add(&entries),
            topics::REMOVE_ALLOWLIST => self.allowlist.remove(&entries),
            topics::ADD_DENYLIST => self.denylist.add(&entries),
            topics::REMOVE_DENYLIST => self.denylist.remove(&entries),
            other => Err(Error::protocol(format!("unknown config request \"{other}\""))),
        }
    }
}

/// Send one administrative request to a broker's config port.
pub async fn config_request(
    config_endpoint: &TcpEndpoint,
    origin: &str,
    topic: &str,
    entries: &[String],
    transport: &TransportSettings,
) -> Result<()> {
    let request = Message::new_async(topic, origin, join_topic_list(entries));
    let reply = request_once(config_endpoint, &request, transport).await?;
    match reply.topic() {
        topics::SUCCESS => Ok(()),
        _ => Err(Error::protocol(reply.payload().to_string())),
    }
}
