use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Snapshot of a broker's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BrokerMetrics {
    pub incoming_messages: u64,
    pub outgoing_messages: u64,
    pub config_requests: u64,
}

#[derive(Debug, Default)]
pub(crate) struct BrokerCounters {
    incoming_messages: AtomicU64,
    outgoing_messages: AtomicU64,
    config_requests: AtomicU64,
}

impl BrokerCounters {
    pub fn incoming(&self) {
        self.incoming_messages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn outgoing(&self) {
        self.outgoing_messages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn config_request(&self) {
        self.config_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> BrokerMetrics {
        BrokerMetrics {
            incoming_messages: self.incoming_messages.load(Ordering::Relaxed),
            outgoing_messages: self.outgoing_messages.load(Ordering::Relaxed),
            config_requests: self.config_requests.load(Ordering::Relaxed),
        }
    }
}
