//! Identity key to live client handle.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{OwnedRwLockReadGuard, RwLock};

use crate::error::{Error, Result};
use crate::library::ClientHandle;
use crate::types::IdentityState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Gate {
    Open,
    Paused,
    Retired,
}

/// A registered client plus its pause gate.
///
/// Normal calls hold a read lease on the gate for their whole duration.
/// Pausing and retiring take the write side, which waits for in-flight calls
/// to finish. Later calls fail fast until resumed; a retired entry never
/// reopens.
#[derive(Clone)]
pub struct ClientEntry {
    handle: Arc<dyn ClientHandle>,
    gate: Arc<RwLock<Gate>>,
}

impl fmt::Debug for ClientEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientEntry")
            .field("inbox_id", &self.handle.inbox_id())
            .finish_non_exhaustive()
    }
}

impl ClientEntry {
    fn new(handle: Arc<dyn ClientHandle>) -> Self {
        Self {
            handle,
            gate: Arc::new(RwLock::new(Gate::Open)),
        }
    }

    /// The client handle, bypassing the pause gate.
    #[must_use]
    pub fn handle(&self) -> &Arc<dyn ClientHandle> {
        &self.handle
    }

    /// Acquire a read lease for one call.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Paused`] if the database connection is released and
    /// [`Error::NoClient`] once the entry has been retired.
    pub async fn lease(&self) -> Result<Lease> {
        let guard = Arc::clone(&self.gate).read_owned().await;
        match *guard {
            Gate::Open => {}
            Gate::Paused => return Err(Error::Paused(self.handle.inbox_id().to_owned())),
            Gate::Retired => return Err(Error::NoClient(self.handle.inbox_id().to_owned())),
        }
        Ok(Lease {
            handle: Arc::clone(&self.handle),
            _guard: guard,
        })
    }

    /// Whether the database connection is currently released. A pause in
    /// progress counts as paused.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.gate.try_read().map_or(true, |g| *g != Gate::Open)
    }

    /// Wait for in-flight calls to finish and close the gate for good.
    /// Returns `false` if the entry was already retired.
    pub async fn retire(&self) -> bool {
        let mut gate = self.gate.write().await;
        let was = std::mem::replace(&mut *gate, Gate::Retired);
        was != Gate::Retired
    }

    /// Drain in-flight calls and release the database connection.
    ///
    /// # Errors
    ///
    /// Propagates the library failure; the entry then stays active.
    pub async fn pause(&self) -> Result<()> {
        let mut gate = self.gate.write().await;
        if *gate == Gate::Open {
            self.handle.release_db_connection().await?;
            *gate = Gate::Paused;
            tracing::info!(inbox_id = self.handle.inbox_id(), "database connection released");
        }
        Ok(())
    }

    /// Reconnect the database and reopen the gate.
    ///
    /// # Errors
    ///
    /// Propagates the library failure; the entry then stays paused.
    pub async fn resume(&self) -> Result<()> {
        let mut gate = self.gate.write().await;
        if *gate == Gate::Paused {
            self.handle.reconnect_db().await?;
            *gate = Gate::Open;
            tracing::info!(inbox_id = self.handle.inbox_id(), "database reconnected");
        }
        Ok(())
    }
}

/// A client handle borrowed for the duration of one call.
pub struct Lease {
    handle: Arc<dyn ClientHandle>,
    _guard: OwnedRwLockReadGuard<Gate>,
}

impl fmt::Debug for Lease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("inbox_id", &self.handle.inbox_id())
            .finish_non_exhaustive()
    }
}

impl Lease {
    /// Owned clone of the handle, for work that outlives the lease.
    #[must_use]
    pub fn handle(&self) -> Arc<dyn ClientHandle> {
        Arc::clone(&self.handle)
    }
}

impl Deref for Lease {
    type Target = dyn ClientHandle;

    fn deref(&self) -> &Self::Target {
        &*self.handle
    }
}

/// Registry of live clients keyed by inbox id.
///
/// Lookups also accept the account address (case-insensitive). Identities
/// that are still authenticating are tracked by address through
/// [`AuthTicket`]s.
#[derive(Default)]
pub struct IdentityRegistry {
    clients: DashMap<String, ClientEntry>,
    authenticating: Arc<DashMap<String, usize>>,
}

impl fmt::Debug for IdentityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityRegistry")
            .field("clients", &self.clients.len())
            .field("authenticating", &self.authenticating.len())
            .finish()
    }
}

impl IdentityRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `handle` under its inbox id, returning the entry it replaced.
    ///
    /// This does not tear anything down; callers that replace a live client
    /// stop its subscriptions and evict its cache first.
    pub fn register(&self, handle: Arc<dyn ClientHandle>) -> Option<ClientEntry> {
        let inbox_id = handle.inbox_id().to_owned();
        tracing::info!(inbox_id = %inbox_id, address = handle.address(), "client registered");
        self.clients.insert(inbox_id, ClientEntry::new(handle))
    }

    /// Look up by inbox id, falling back to the account address.
    #[must_use]
    pub fn get(&self, identity: &str) -> Option<ClientEntry> {
        if let Some(entry) = self.clients.get(identity) {
            return Some(entry.clone());
        }
        self.clients
            .iter()
            .find(|e| e.value().handle.address().eq_ignore_ascii_case(identity))
            .map(|e| e.value().clone())
    }

    /// Look up or fail with [`Error::NoClient`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoClient`] when nothing is registered.
    pub fn require(&self, identity: &str) -> Result<ClientEntry> {
        self.get(identity)
            .ok_or_else(|| Error::NoClient(identity.to_owned()))
    }

    /// Remove `entry` if it is still the one registered under its inbox id.
    pub fn remove_entry(&self, entry: &ClientEntry) -> bool {
        let inbox_id = entry.handle.inbox_id();
        let removed = self
            .clients
            .remove_if(inbox_id, |_, e| Arc::ptr_eq(&e.gate, &entry.gate))
            .is_some();
        if removed {
            tracing::info!(inbox_id, "client dropped");
        }
        removed
    }

    /// Snapshot of every registered entry.
    #[must_use]
    pub fn entries(&self) -> Vec<ClientEntry> {
        self.clients.iter().map(|e| e.value().clone()).collect()
    }

    /// Number of registered clients.
    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Whether no client is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Mark `address` as authenticating until the ticket drops.
    #[must_use]
    pub fn begin_auth(&self, address: &str) -> AuthTicket {
        let key = address.to_ascii_lowercase();
        *self.authenticating.entry(key.clone()).or_insert(0) += 1;
        AuthTicket {
            key,
            pending: Arc::clone(&self.authenticating),
        }
    }

    /// Lifecycle position of `identity`.
    #[must_use]
    pub fn state(&self, identity: &str) -> IdentityState {
        if let Some(entry) = self.get(identity) {
            return if entry.is_paused() {
                IdentityState::Paused
            } else {
                IdentityState::Active
            };
        }
        if self
            .authenticating
            .contains_key(&identity.to_ascii_lowercase())
        {
            IdentityState::Authenticating
        } else {
            IdentityState::NoIdentity
        }
    }
}

/// Keeps an address in the authenticating set while alive.
#[derive(Debug)]
pub struct AuthTicket {
    key: String,
    pending: Arc<DashMap<String, usize>>,
}

impl Drop for AuthTicket {
    fn drop(&mut self) {
        self.pending.remove_if_mut(&self.key, |_, n| {
            *n = n.saturating_sub(1);
            *n == 0
        });
    }
}
