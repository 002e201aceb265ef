//! Connection registry: client identifier → live connection.
//!
//! Locks are `parking_lot` and held only for a single map operation, never
//! across an `.await`. A session owns its slot through a
//! [`RegistrationGuard`]; dropping the guard releases the slot, so cleanup
//! runs exactly once on every exit path.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::gauge;
use parking_lot::RwLock;
use rendezvous_core::{ClientId, ConnectionId};
use rendezvous_settings::CollisionPolicy;
use tracing::debug;

use crate::connection::ClientConnection;
use crate::errors::RegistryError;
use crate::metrics::RELAY_CLIENTS_REGISTERED;

/// Immutable registration metadata for one live session.
pub struct ConnectionRecord {
    /// Registry key.
    pub client_id: ClientId,
    /// Outbound handle of the owning session.
    pub connection: Arc<ClientConnection>,
    /// Remote address, when the transport reported one.
    pub peer_addr: Option<SocketAddr>,
    /// First characters of the client's `token_hash` (empty when absent).
    pub token_fingerprint: String,
    /// When the record was inserted.
    pub registered_at: DateTime<Utc>,
}

impl ConnectionRecord {
    /// Build a record stamped with the current time.
    pub fn new(
        client_id: ClientId,
        connection: Arc<ClientConnection>,
        peer_addr: Option<SocketAddr>,
        token_fingerprint: String,
    ) -> Self {
        Self {
            client_id,
            connection,
            peer_addr,
            token_fingerprint,
            registered_at: Utc::now(),
        }
    }

    /// Connection that owns this record.
    pub fn connection_id(&self) -> &ConnectionId {
        &self.connection.id
    }
}

/// Point-in-time view of registry membership.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegistrySnapshot {
    /// Number of registered identifiers.
    pub count: usize,
    /// Registered identifiers, sorted.
    pub clients: Vec<String>,
}

/// In-memory mapping from [`ClientId`] to [`ConnectionRecord`].
#[derive(Default)]
pub struct Registry {
    entries: RwLock<HashMap<ClientId, Arc<ConnectionRecord>>>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `record`, returning the guard that owns the slot.
    ///
    /// The record is visible to [`lookup`](Self::lookup) before this returns.
    /// Under [`CollisionPolicy::Replace`] a live holder of the same identifier
    /// is displaced (its session keeps running but no longer owns the slot);
    /// under [`CollisionPolicy::Reject`] the call fails and nothing changes.
    pub fn register(
        self: &Arc<Self>,
        record: ConnectionRecord,
        policy: CollisionPolicy,
    ) -> Result<RegistrationGuard, RegistryError> {
        let client_id = record.client_id.clone();
        let connection_id = record.connection_id().clone();

        let (replaced, len) = {
            let mut entries = self.entries.write();
            if policy == CollisionPolicy::Reject && entries.contains_key(&client_id) {
                return Err(RegistryError::Duplicate(client_id));
            }
            let previous = entries.insert(client_id.clone(), Arc::new(record));
            (previous.map(|p| p.connection_id().clone()), entries.len())
        };
        record_size(len);
        debug!(%client_id, conn_id = %connection_id, "registry insert");

        Ok(RegistrationGuard {
            registry: Arc::clone(self),
            client_id,
            connection_id,
            replaced,
        })
    }

    /// Find the record for `client_id`.
    pub fn lookup(&self, client_id: &str) -> Option<Arc<ConnectionRecord>> {
        self.entries.read().get(client_id).cloned()
    }

    /// Whether `client_id` is registered.
    pub fn contains(&self, client_id: &str) -> bool {
        self.entries.read().contains_key(client_id)
    }

    /// Remove `client_id` unconditionally. Removing an absent key is a no-op.
    ///
    /// Returns whether an entry was removed.
    pub fn remove(&self, client_id: &str) -> bool {
        let (removed, len) = {
            let mut entries = self.entries.write();
            (entries.remove(client_id).is_some(), entries.len())
        };
        if removed {
            record_size(len);
        }
        removed
    }

    /// Remove `client_id` only if `connection_id` still holds it.
    ///
    /// A displaced session calling this leaves the newer holder in place.
    pub fn release(&self, client_id: &ClientId, connection_id: &ConnectionId) -> bool {
        let (removed, len) = {
            let mut entries = self.entries.write();
            let owned = entries
                .get(client_id)
                .is_some_and(|r| r.connection_id() == connection_id);
            if owned {
                let _ = entries.remove(client_id);
            }
            (owned, entries.len())
        };
        if removed {
            record_size(len);
        }
        debug!(%client_id, conn_id = %connection_id, removed, "registry release");
        removed
    }

    /// Number of registered identifiers.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Count and sorted identifiers, taken under one read lock.
    pub fn snapshot(&self) -> RegistrySnapshot {
        let entries = self.entries.read();
        let mut clients: Vec<String> = entries.keys().map(|id| id.as_str().to_owned()).collect();
        drop(entries);
        clients.sort_unstable();
        RegistrySnapshot {
            count: clients.len(),
            clients,
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn record_size(len: usize) {
    gauge!(RELAY_CLIENTS_REGISTERED).set(len as f64);
}

/// Ownership of one registry slot. Dropping it releases the slot.
pub struct RegistrationGuard {
    registry: Arc<Registry>,
    client_id: ClientId,
    connection_id: ConnectionId,
    replaced: Option<ConnectionId>,
}

impl RegistrationGuard {
    /// Identifier this guard holds.
    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    /// Connection that registered.
    pub fn connection_id(&self) -> &ConnectionId {
        &self.connection_id
    }

    /// Connection displaced by this registration, if any.
    pub fn replaced(&self) -> Option<&ConnectionId> {
        self.replaced.as_ref()
    }
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        let _ = self.registry.release(&self.client_id, &self.connection_id);
    }
}
