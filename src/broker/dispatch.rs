//! Node port: handshake, dispatch loop and message routing.

use std::net::SocketAddr;
use std::sync::Arc;

use futures::future::join_all;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::engine::Broker;
use super::node_connection::NodeConnection;
use super::topic::TopicKind;
use crate::transport::{Listener, Message, MessageKind, StreamReader, framed, topics};
use crate::utils::{Error, Result, TaskGroup};

impl Broker {
    pub(super) async fn accept_node_connections(
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
                accepted = listener.accept_checked(&self.allowlist, &self.denylist) => accepted,
            };
            let (stream, peer) = match accepted {
                Ok(accepted) => accepted,
                Err(err) => {
                    warn!("Broker {} failed to accept connection: {}", self.name, err);
                    continue;
                }
            };
            let broker = self.clone();
            let listener = listener.clone();
            let group = tasks.clone();
            tasks.spawn(async move {
                broker
                    .handle_node_connection(&listener, stream, peer, group)
                    .await
            });
        }
    }

    async fn handle_node_connection(
        self: Arc<Self>,
        listener: &Listener,
        stream: TcpStream,
        peer: SocketAddr,
        tasks: TaskGroup,
    ) {
        let (connection, reader) = match self.handshake(listener, stream, peer).await {
            Ok(accepted) => accepted,
            Err(err) => {
                warn!("Broker {} rejected connection from {}: {}", self.name, peer, err);
                return;
            }
        };
        info!("Broker {} accepted node {} from {}", self.name, connection.name(), peer);

        self.clone().dispatch(connection.clone(), reader, tasks).await;

        self.routing().remove(&connection);
        connection.shutdown().await;
        info!("Broker {} disconnected node {}", self.name, connection.name());
    }

    /// Expect a `connect` message naming the node, register the node and
    /// acknowledge with `connected`.
    async fn handshake(
        &self,
        listener: &Listener,
        stream: TcpStream,
        peer: SocketAddr,
    ) -> Result<(Arc<NodeConnection>, StreamReader)> {
        let timeout = self.transport.tcp_timeout();
        let stream = listener.upgrade(stream, timeout).await?;
        let (mut reader, writer) = framed(stream, &self.transport);

        let request = tokio::time::timeout(timeout, reader.read_message())
            .await
            .map_err(|_| Error::Timeout(timeout))??;
        if request.kind() != MessageKind::Connect
            || request.origin().is_empty()
            || !request.payload().is_empty()
        {
            return Err(Error::handshake(format!(
                "invalid connection request with topic \"{}\"",
                request.topic()
            )));
        }
        self.limits.validate(&request)?;

        let connection = Arc::new(NodeConnection::new(request.origin(), peer, writer));
        self.routing().register(connection.clone())?;
        let ack = Message::new_async(topics::CONNECTED, &self.name, "");
        if let Err(err) = connection.send(&ack).await {
            self.routing().remove(&connection);
            return Err(err);
        }
        Ok((connection, reader))
    }

    /// Read messages in wire order until the connection closes or the broker
    /// stops. Malformed messages are dropped; transport errors end the loop.
    async fn dispatch(
        self: Arc<Self>,
        connection: Arc<NodeConnection>,
        mut reader: StreamReader,
        tasks: TaskGroup,
    ) {
        let stopped = tasks.stopped();
        tokio::pin!(stopped);
        loop {
            let result = tokio::select! {
                _ = connection.closed() => break,
                _ = &mut stopped => break,
                result = reader.read_message() => result,
            };
            let message = match result {
                Ok(message) => message,
                Err(err) if err.is_transport() => {
                    debug!("Broker {} lost node {}: {}", self.name, connection.name(), err);
                    break;
                }
                Err(err) => {
                    warn!("Broker {} dropped message from {}: {}", self.name, connection.name(), err);
                    continue;
                }
            };
            self.counters.incoming();
            if let Err(err) = self.limits.validate(&message) {
                warn!("Broker {} dropped message from {}: {}", self.name, connection.name(), err);
                continue;
            }

            if self.transport.sequential_processing {
                self.clone()
                    .handle_message(connection.clone(), message, tasks.clone())
                    .await;
            } else {
                tasks.spawn(self.clone().handle_message(
                    connection.clone(),
                    message,
                    tasks.clone(),
                ));
            }
        }
    }

    async fn handle_message(
        self: Arc<Self>,
        connection: Arc<NodeConnection>,
        message: Message,
        tasks: TaskGroup,
    ) {
        let kind = message.kind();
        if kind == MessageKind::SyncResponse {
            if let Err(err) = self.handle_sync_response(message) {
                warn!("Broker {} failed to route response from {}: {}", self.name, connection.name(), err);
            }
            return;
        }

        if let Err(err) = self.validate_topic(&message) {
            warn!("Broker {} rejected message from {}: {}", self.name, connection.name(), err);
            if message.is_sync_request() {
                self.reply(&connection, message.response(topics::ERROR, &self.name, err.to_string()))
                    .await;
            }
            return;
        }

        match kind {
            MessageKind::Subscribe => {
                let result = self.routing().subscribe(connection.name(), message.payload());
                let reply = match result {
                    Ok(()) => {
                        info!("Node {} subscribed to {}", connection.name(), message.payload());
                        message.response(topics::SUBSCRIBED, &self.name, message.payload())
                    }
                    Err(err) => message.response(topics::ERROR, &self.name, err.to_string()),
                };
                self.reply(&connection, reply).await;
            }
            MessageKind::Unsubscribe => {
                let result = self.routing().unsubscribe(connection.name(), message.payload());
                let reply = match result {
                    Ok(()) => {
                        info!("Node {} unsubscribed from {}", connection.name(), message.payload());
                        message.response(topics::UNSUBSCRIBED, &self.name, message.payload())
                    }
                    Err(err) => message.response(topics::ERROR, &self.name, err.to_string()),
                };
                self.reply(&connection, reply).await;
            }
            MessageKind::SyncRequest => {
                let registered = self.routing().register_sync_request(
                    message.sync_request_token(),
                    message.topic(),
                    connection.clone(),
                );
                match registered {
                    Ok(response) => {
                        let waiter = self.clone().await_sync_response(
                            connection.clone(),
                            message.clone(),
                            response,
                            tasks.clone(),
                        );
                        if tasks.spawn(waiter) {
                            let delivered = self.propagate(&message).await;
                            // the waiter gives up once the entry is gone
                            if delivered == 0
                                && self.routing().expire_sync_request(message.sync_request_token())
                            {
                                let reply = message.response(
                                    topics::ERROR,
                                    &self.name,
                                    "no subscriber could be reached",
                                );
                                self.reply(&connection, reply).await;
                            }
                        }
                    }
                    Err(err) => {
                        let reply = message.response(
                            topics::ERROR,
                            &self.name,
                            format!("sync request failed: {err}"),
                        );
                        self.reply(&connection, reply).await;
                    }
                }
            }
            MessageKind::AsyncMessage if message.topic() == topics::HEARTBEAT => {
                debug!("Heartbeat from {}", connection.name());
            }
            MessageKind::AsyncMessage => {
                self.propagate(&message).await;
            }
            MessageKind::Connect | MessageKind::SyncResponse => {}
        }
    }

    /// The topic must exist and its kind must match the presence of a sync
    /// request token.
    fn validate_topic(&self, message: &Message) -> Result<()> {
        let kind = self.routing().topic_kind(message.topic());
        match kind {
            None => Err(Error::validation(format!(
                "topic \"{}\" does not exist on broker \"{}\"",
                message.topic(),
                self.name
            ))),
            Some(TopicKind::Sync) if !message.is_sync_request() => Err(Error::validation(format!(
                "topic \"{}\" is a sync topic and the message is not a sync request",
                message.topic()
            ))),
            Some(TopicKind::Async) if message.is_sync_request() => Err(Error::validation(format!(
                "topic \"{}\" is an async topic and the message is a sync request",
                message.topic()
            ))),
            Some(_) => Ok(()),
        }
    }

    fn handle_sync_response(&self, response: Message) -> Result<()> {
        let token = response.sync_response_token().to_string();
        let entry = self
            .routing()
            .take_sync_request(&token)
            .ok_or_else(|| Error::protocol(format!("response to unknown sync request \"{token}\"")))?;
        entry
            .slot
            .send(response)
            .map_err(|_| Error::protocol(format!("sync request \"{token}\" is no longer waiting")))
    }

    /// Forward the response to the requester, or a timeout error if no
    /// response arrives in time. Exactly one of the two is sent.
    async fn await_sync_response(
        self: Arc<Self>,
        requester: Arc<NodeConnection>,
        request: Message,
        mut response: oneshot::Receiver<Message>,
        tasks: TaskGroup,
    ) {
        let timeout = self.transport.sync_request_timeout();
        let outcome = tokio::select! {
            _ = tasks.stopped() => return,
            outcome = tokio::time::timeout(timeout, &mut response) => outcome,
        };
        let reply = match outcome {
            Ok(Ok(reply)) => reply,
            // the entry was dropped with the routing table
            Ok(Err(_)) => return,
            Err(_) => {
                if self.routing().expire_sync_request(request.sync_request_token()) {
                    request.response(topics::ERROR, &self.name, "request timed out")
                } else {
                    match response.await {
                        Ok(reply) => reply,
                        Err(_) => return,
                    }
                }
            }
        };
        self.reply(&requester, reply).await;
    }

    /// Send `message` to every subscriber of its topic concurrently. A
    /// subscriber that cannot be reached is disconnected. Returns how many
    /// subscribers received the message.
    async fn propagate(&self, message: &Message) -> usize {
        let subscribers = self.routing().subscribers(message.topic());
        let sends = subscribers.iter().map(|subscriber| async move {
            (subscriber, subscriber.send(message).await)
        });
        let mut delivered = 0;
        for (subscriber, result) in join_all(sends).await {
            match result {
                Ok(()) => {
                    self.counters.outgoing();
                    delivered += 1;
                }
                Err(err) => {
                    warn!(
                        "Broker {} failed to forward {} to {}: {}",
                        self.name,
                        message.topic(),
                        subscriber.name(),
                        err
                    );
                    self.routing().remove(subscriber);
                }
            }
        }
        delivered
    }

    async fn reply(&self, connection: &NodeConnection, reply: Message) {
        match connection.send(&reply).await {
            Ok(()) => self.counters.outgoing(),
            Err(err) => warn!(
                "Broker {} failed to reply to {}: {}",
                self.name,
                connection.name(),
                err
            ),
        }
    }
}
