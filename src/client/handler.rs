//! Message handler registry
//!
//! Maps topics to the callbacks a broker client runs for incoming messages.
//! Async handlers consume a message; sync handlers produce the payload of
//! the response, or an error text that is sent back on the `failure` topic.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::transport::{IncomingHandler, Message, topics};

pub type AsyncHandler = Arc<dyn Fn(&Message) + Send + Sync>;
pub type SyncHandler = Arc<dyn Fn(&Message) -> Result<String, String> + Send + Sync>;

#[derive(Clone, Default)]
pub struct MessageHandler {
    async_handlers: HashMap<String, AsyncHandler>,
    sync_handlers: HashMap<String, SyncHandler>,
}

impl MessageHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_async_handler<F>(mut self, topic: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.async_handlers.insert(topic.into(), Arc::new(handler));
        self
    }

    pub fn with_sync_handler<F>(mut self, topic: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&Message) -> Result<String, String> + Send + Sync + 'static,
    {
        self.sync_handlers.insert(topic.into(), Arc::new(handler));
        self
    }

    pub fn async_topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.async_handlers.keys().cloned().collect();
        topics.sort();
        topics
    }

    pub fn sync_topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.sync_handlers.keys().cloned().collect();
        topics.sort();
        topics
    }

    /// Run the handler registered for `message`. Returns the response to a
    /// sync request; a sync request without a handler is answered with a
    /// failure so the requester is not left waiting.
    pub fn handle(&self, origin: &str, message: &Message) -> Option<Message> {
        if message.is_sync_request() {
            let reply = match self.sync_handlers.get(message.topic()) {
                Some(handler) => match handler(message) {
                    Ok(payload) => message.response(message.topic(), origin, payload),
                    Err(err) => message.response(topics::FAILURE, origin, err),
                },
                None => message.response(
                    topics::FAILURE,
                    origin,
                    format!("no handler for sync topic \"{}\"", message.topic()),
                ),
            };
            return Some(reply);
        }
        match self.async_handlers.get(message.topic()) {
            Some(handler) => handler(message),
            None => debug!("{origin}: no handler for topic {}", message.topic()),
        }
        None
    }

    pub(crate) fn into_incoming(self, origin: String) -> IncomingHandler {
        Arc::new(move |message: &Message| self.handle(&origin, message))
    }
}
