use std::{collections::HashMap, sync::Arc};

use futures_util::future::join_all;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::connection::{ConnectionId, Outbound};

/// Outcome of a single broadcast.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    /// Recipients whose write failed; they have already been removed.
    pub failed: Vec<ConnectionId>,
}

/// Set of live connections, keyed by id.
///
/// The map lock covers mutations and the snapshot step of a broadcast only.
/// Writes to recipients happen after it is released, so a slow peer never
/// blocks registration or removal of others.
#[derive(Default)]
pub struct ParticipantRegistry {
    participants: Mutex<HashMap<ConnectionId, Arc<Outbound>>>,
}

impl ParticipantRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the write half of a live connection under its id.
    pub async fn add(&self, outbound: Arc<Outbound>) -> ConnectionId {
        let id = outbound.id();
        let mut participants = self.participants.lock().await;
        participants.insert(id, outbound);
        debug!(%id, count = participants.len(), "participant registered");
        id
    }

    /// Removes and closes the connection. Removing an unknown id is a no-op.
    pub async fn remove(&self, id: ConnectionId) -> bool {
        let removed = self.participants.lock().await.remove(&id);
        match removed {
            Some(outbound) => {
                outbound.close().await;
                debug!(%id, "participant removed");
                true
            }
            None => false,
        }
    }

    /// Delivers `line` to every registered connection except `exclude`.
    pub async fn broadcast(&self, line: &str, exclude: Option<ConnectionId>) -> BroadcastReport {
        let recipients: Vec<Arc<Outbound>> = {
            let participants = self.participants.lock().await;
            participants
                .iter()
                .filter(|(id, _)| Some(**id) != exclude)
                .map(|(_, outbound)| Arc::clone(outbound))
                .collect()
        };

        if recipients.is_empty() {
            return BroadcastReport::default();
        }

        let results = join_all(recipients.iter().map(|outbound| async move {
            (outbound.id(), outbound.send_line(line).await)
        }))
        .await;

        let mut report = BroadcastReport::default();
        for (id, result) in results {
            match result {
                Ok(()) => report.delivered += 1,
                Err(err) => {
                    warn!(%id, error = %err, "failed to deliver line, dropping participant");
                    report.failed.push(id);
                }
            }
        }

        for id in &report.failed {
            self.remove(*id).await;
        }

        report
    }

    /// Ids registered at the moment of the call, in ascending order.
    pub async fn snapshot_ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<_> = self.participants.lock().await.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Removes and closes every connection.
    pub async fn close_all(&self) -> usize {
        let drained: Vec<_> = self.participants.lock().await.drain().collect();
        let count = drained.len();
        join_all(drained.iter().map(|(_, outbound)| outbound.close())).await;
        count
    }
}
