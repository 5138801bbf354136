use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Snapshot of a broker client's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClientMetrics {
    pub async_messages_sent: u64,
    pub sync_requests_sent: u64,
    pub sync_responses_received: u64,
    /// Resolver query rounds, one per round regardless of resolver count.
    pub resolution_attempts: u64,
}

#[derive(Debug, Default)]
pub(crate) struct ClientCounters {
    async_messages_sent: AtomicU64,
    sync_requests_sent: AtomicU64,
    sync_responses_received: AtomicU64,
    resolution_attempts: AtomicU64,
}

impl ClientCounters {
    pub fn async_message_sent(&self) {
        self.async_messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn sync_request_sent(&self) {
        self.sync_requests_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn sync_response_received(&self) {
        self.sync_responses_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn resolution_attempt(&self) {
        self.resolution_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ClientMetrics {
        ClientMetrics {
            async_messages_sent: self.async_messages_sent.load(Ordering::Relaxed),
            sync_requests_sent: self.sync_requests_sent.load(Ordering::Relaxed),
            sync_responses_received: self.sync_responses_received.load(Ordering::Relaxed),
            resolution_attempts: self.resolution_attempts.load(Ordering::Relaxed),
        }
    }
}
