//! Connection and resolution lifetimes.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use super::pubsub_client::Client;
use super::state::Expiry;
use crate::transport::Connection;
use crate::utils::TaskGroup;

impl Client {
    /// Watch a pooled connection until it closes or the client stops.
    pub(super) fn watch_connection(self: &Arc<Self>, connection: Arc<Connection>, tasks: &TaskGroup) {
        let client = self.clone();
        let stopped = tasks.stopped();
        tasks.spawn(async move {
            tokio::select! {
                _ = stopped => {}
                _ = connection.closed() => client.connection_lost(&connection),
            }
        });
    }

    /// Invalidate every resolution that used `connection` and resolve the
    /// affected subscribed topics again.
    fn connection_lost(self: &Arc<Self>, connection: &Arc<Connection>) {
        let refresh = self.state().connection_lost(connection, Instant::now());
        info!(
            "Client {} lost broker {}; re-resolving {:?}",
            self.name,
            connection.endpoint(),
            refresh
        );
        for (topic, kind) in refresh {
            if let Err(err) = self.start_resolution(&topic, kind) {
                debug!("Client {} cannot re-resolve {}: {}", self.name, topic, err);
            }
        }
    }

    /// When the resolution of `topic` outlives `ttl`, resolve the topic
    /// again if it is still subscribed, otherwise drop the resolution.
    pub(super) fn schedule_expiry(
        self: &Arc<Self>,
        topic: String,
        generation: u64,
        ttl: Duration,
        tasks: &TaskGroup,
    ) {
        let client = self.clone();
        let stopped = tasks.stopped();
        tasks.spawn(async move {
            tokio::select! {
                _ = stopped => return,
                _ = tokio::time::sleep(ttl) => {}
            }
            let expiry = client.state().expire(&topic, generation);
            match expiry {
                Expiry::Refresh(kind) => {
                    if let Err(err) = client.start_resolution(&topic, kind) {
                        debug!("Client {} cannot refresh {}: {}", client.name, topic, err);
                    }
                }
                Expiry::Released => debug!("Client {} released expired resolution of {}", client.name, topic),
                Expiry::Stale => {}
            }
        });
    }
}
