//! Outbound node connection
//!
//! A `Connection` is the dialing side of a node connection: it performs the
//! `connect`/`connected` handshake, correlates sync responses with the
//! requests that are waiting for them, and hands every other incoming
//! message to an `IncomingHandler`. The broker client pools these, and the
//! command line uses one for one-shot publishing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{oneshot, watch};
use tracing::{debug, warn};

use super::endpoint::{StreamReader, StreamWriter, TcpEndpoint, framed};
use super::message::{Message, MessageLimits, topics};
use crate::config::TransportSettings;
use crate::utils::{Error, Result, TaskGroup};

/// Handles a message that is not a sync response. A returned message is sent
/// back over the same connection.
pub type IncomingHandler = Arc<dyn Fn(&Message) -> Option<Message> + Send + Sync>;

pub struct Connection {
    name: String,
    endpoint: TcpEndpoint,
    writer: tokio::sync::Mutex<StreamWriter>,
    pending: Mutex<HashMap<String, oneshot::Sender<Message>>>,
    closed: watch::Sender<bool>,
    sync_request_timeout: Duration,
}

impl Connection {
    /// Dial `endpoint`, introduce ourselves as `name` and start reading.
    ///
    /// The reader task belongs to `tasks` and ends when the connection
    /// closes or the group stops.
    pub async fn connect(
        endpoint: &TcpEndpoint,
        name: &str,
        settings: &TransportSettings,
        limits: MessageLimits,
        handler: IncomingHandler,
        tasks: &TaskGroup,
    ) -> Result<Arc<Connection>> {
        let stream = endpoint.dial(settings.tcp_timeout()).await?;
        let (mut reader, mut writer) = framed(stream, settings);

        writer
            .write_message(&Message::new_async(topics::CONNECT, name, ""))
            .await?;
        let timeout = settings.tcp_timeout();
        let reply = tokio::time::timeout(timeout, reader.read_message())
            .await
            .map_err(|_| Error::Timeout(timeout))?
            .map_err(|err| Error::handshake(format!("{endpoint}: {err}")))?;
        if reply.topic() != topics::CONNECTED {
            return Err(Error::handshake(format!(
                "{endpoint}: expected {}, got {}",
                topics::CONNECTED,
                reply.topic()
            )));
        }

        let (closed, _) = watch::channel(false);
        let connection = Arc::new(Connection {
            name: name.to_string(),
            endpoint: endpoint.clone(),
            writer: tokio::sync::Mutex::new(writer),
            pending: Mutex::new(HashMap::new()),
            closed,
            sync_request_timeout: settings.sync_request_timeout(),
        });

        let read_loop = connection.clone().read_loop(
            reader,
            limits,
            handler,
            settings.sequential_processing,
            tasks.clone(),
        );
        if !tasks.spawn(read_loop) {
            connection.close();
            return Err(Error::lifecycle("stopped"));
        }
        debug!("{} connected to {}", name, endpoint);
        Ok(connection)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn endpoint(&self) -> &TcpEndpoint {
        &self.endpoint
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<String, oneshot::Sender<Message>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub async fn send(&self, message: &Message) -> Result<()> {
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }
        let result = self.writer.lock().await.write_message(message).await;
        if let Err(err) = &result {
            if err.is_transport() {
                self.close();
            }
        }
        result
    }

    pub async fn async_message(&self, topic: &str, payload: &str) -> Result<()> {
        self.send(&Message::new_async(topic, &self.name, payload))
            .await
    }

    pub async fn sync_request(&self, topic: &str, payload: &str) -> Result<Message> {
        self.request(Message::new_sync_request(topic, &self.name, payload))
            .await
    }

    /// Send a sync request and wait for the response carrying its token.
    pub async fn request(&self, message: Message) -> Result<Message> {
        if !message.is_sync_request() {
            return Err(Error::validation("message has no sync request token"));
        }
        let token = message.sync_request_token().to_string();
        let (slot, response) = oneshot::channel();
        {
            let mut pending = self.pending();
            if pending.contains_key(&token) {
                return Err(Error::protocol(format!("token {token} is already in use")));
            }
            pending.insert(token.clone(), slot);
        }
        // close() may have run before the slot was registered
        if self.is_closed() {
            self.pending().remove(&token);
            return Err(Error::ConnectionClosed);
        }

        if let Err(err) = self.send(&message).await {
            self.pending().remove(&token);
            return Err(err);
        }

        match tokio::time::timeout(self.sync_request_timeout, response).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(Error::ConnectionClosed),
            Err(_) => {
                self.pending().remove(&token);
                Err(Error::Timeout(self.sync_request_timeout))
            }
        }
    }

    /// Close the connection. Waiting requests fail with `ConnectionClosed`.
    pub fn close(&self) {
        if self.closed.send_replace(true) {
            return;
        }
        self.pending().clear();
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolves once the connection is closed.
    pub async fn closed(&self) {
        let mut closed = self.closed.subscribe();
        let _ = closed.wait_for(|closed| *closed).await;
    }

    fn deliver_response(&self, response: Message) {
        let slot = self.pending().remove(response.sync_response_token());
        match slot {
            Some(slot) => {
                let _ = slot.send(response);
            }
            None => warn!(
                "{}: no request waiting for response token {}",
                self.name,
                response.sync_response_token()
            ),
        }
    }

    async fn read_loop(
        self: Arc<Self>,
        mut reader: StreamReader,
        limits: MessageLimits,
        handler: IncomingHandler,
        sequential: bool,
        tasks: TaskGroup,
    ) {
        let stopped = tasks.stopped();
        tokio::pin!(stopped);

        loop {
            let message = tokio::select! {
                _ = self.closed() => break,
                _ = &mut stopped => break,
                result = reader.read_message() => match result {
                    Ok(message) => message,
                    Err(err) if err.is_transport() => {
                        debug!("{}: connection to {} lost: {}", self.name, self.endpoint, err);
                        break;
                    }
                    Err(err) => {
                        warn!("{}: dropping malformed message from {}: {}", self.name, self.endpoint, err);
                        continue;
                    }
                },
            };
            if let Err(err) = limits.validate(&message) {
                warn!("{}: dropping message from {}: {}", self.name, self.endpoint, err);
                continue;
            }
            if message.is_sync_response() {
                self.deliver_response(message);
                continue;
            }

            if sequential {
                self.handle(&handler, message).await;
            } else {
                let connection = self.clone();
                let handler = handler.clone();
                tasks.spawn(async move { connection.handle(&handler, message).await });
            }
        }

        self.close();
        self.writer.lock().await.shutdown().await;
    }

    async fn handle(&self, handler: &IncomingHandler, message: Message) {
        let Some(reply) = handler(&message) else {
            return;
        };
        if let Err(err) = self.send(&reply).await {
            warn!("{}: failed to reply on {}: {}", self.name, message.topic(), err);
        }
    }
}
