//! Ownership table of live assessment connections.
//!
//! At most one connection owns an `assessment_id`. A second connect for a
//! live id is rejected and the owner is left untouched. The table is also how
//! administrative requests reach a live session (see
//! [`ConnectionRegistry::terminate`]).

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{LexiError, Result};

/// How often [`ConnectionRegistry::shutdown`] checks for released slots.
const DRAIN_POLL: Duration = Duration::from_millis(20);

// ============================================================================
// Entries
// ============================================================================

#[derive(Debug)]
struct Slot {
    connection_id: String,
    connected_at: DateTime<Utc>,
    terminate_tx: watch::Sender<bool>,
}

/// Public view of one live connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActiveSession {
    /// Assessment owned by the connection.
    pub assessment_id: String,
    /// Opaque connection token.
    pub connection_id: String,
    /// When the connection registered.
    pub connected_at: DateTime<Utc>,
}

// ============================================================================
// Connection Registry
// ============================================================================

/// Maps assessment ids to the connection that owns them.
///
/// Cheap to clone; clones share the same table.
#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    slots: Arc<DashMap<String, Slot>>,
}

impl ConnectionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `assessment_id` for a new connection.
    ///
    /// Fails with `SessionAlreadyActive` if another connection owns it. The
    /// claim is released when the returned guard is dropped.
    pub fn register(
        &self,
        assessment_id: &str,
        connection_id: String,
        now: DateTime<Utc>,
    ) -> Result<Registration> {
        match self.slots.entry(assessment_id.to_string()) {
            Entry::Occupied(_) => Err(LexiError::session_already_active(assessment_id)),
            Entry::Vacant(vacant) => {
                let (terminate_tx, terminate_rx) = watch::channel(false);
                vacant.insert(Slot {
                    connection_id: connection_id.clone(),
                    connected_at: now,
                    terminate_tx,
                });
                info!(assessment_id, connection_id = %connection_id, "Connection registered");
                Ok(Registration {
                    slots: Arc::clone(&self.slots),
                    assessment_id: assessment_id.to_string(),
                    connection_id,
                    terminate_rx,
                })
            }
        }
    }

    /// Asks the live session for `assessment_id` to end.
    ///
    /// Returns `false` if no connection owns the id.
    pub fn terminate(&self, assessment_id: &str) -> bool {
        self.slots.get(assessment_id).map_or(false, |slot| {
            info!(assessment_id, "Termination requested");
            slot.terminate_tx.send(true).is_ok()
        })
    }

    /// Asks every live session to end. Returns how many were signalled.
    pub fn terminate_all(&self) -> usize {
        let signalled = self
            .slots
            .iter()
            .filter(|slot| slot.terminate_tx.send(true).is_ok())
            .count();
        if signalled > 0 {
            info!(signalled, "Termination requested for all sessions");
        }
        signalled
    }

    /// Terminates every live session and waits up to `grace` for each to
    /// store its result and release its slot.
    ///
    /// Returns `true` once the table is empty, `false` if sessions were
    /// still live when `grace` ran out.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.terminate_all();
        let drained = tokio::time::timeout(grace, async {
            while !self.slots.is_empty() {
                tokio::time::sleep(DRAIN_POLL).await;
            }
        })
        .await
        .is_ok();

        if drained {
            debug!("Connection registry drained");
        } else {
            warn!(
                remaining = self.slots.len(),
                "Sessions still live after shutdown grace period"
            );
        }
        drained
    }

    /// Returns `true` if a connection owns `assessment_id`.
    #[must_use]
    pub fn is_active(&self, assessment_id: &str) -> bool {
        self.slots.contains_key(assessment_id)
    }

    /// Lists live connections, ordered by assessment id.
    #[must_use]
    pub fn list(&self) -> Vec<ActiveSession> {
        let mut sessions: Vec<ActiveSession> = self
            .slots
            .iter()
            .map(|entry| ActiveSession {
                assessment_id: entry.key().clone(),
                connection_id: entry.value().connection_id.clone(),
                connected_at: entry.value().connected_at,
            })
            .collect();
        sessions.sort_by(|a, b| a.assessment_id.cmp(&b.assessment_id));
        sessions
    }

    /// Number of live connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns `true` if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

// ============================================================================
// Registration Guard
// ============================================================================

/// Ownership of one `assessment_id`, released on drop.
#[derive(Debug)]
pub struct Registration {
    slots: Arc<DashMap<String, Slot>>,
    assessment_id: String,
    connection_id: String,
    terminate_rx: watch::Receiver<bool>,
}

impl Registration {
    /// Opaque token of the owning connection.
    #[must_use]
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Receiver that flips to `true` when termination is requested.
    #[must_use]
    pub fn terminate_signal(&self) -> watch::Receiver<bool> {
        self.terminate_rx.clone()
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        let removed = self
            .slots
            .remove_if(&self.assessment_id, |_, slot| {
                slot.connection_id == self.connection_id
            })
            .is_some();
        if removed {
            debug!(
                assessment_id = %self.assessment_id,
                connection_id = %self.connection_id,
                "Connection unregistered"
            );
        }
    }
}
