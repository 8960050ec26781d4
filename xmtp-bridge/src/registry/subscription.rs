//! At most one background listener per subscription key.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// What a subscription listens to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionKind {
    /// New v2 conversations.
    Conversations,
    /// New groups.
    Groups,
    /// New conversations and groups.
    All,
    /// Messages in every v2 conversation.
    AllMessages,
    /// Messages in every group.
    AllGroupMessages,
    /// Messages in one conversation (entity = topic).
    ConversationMessages,
    /// Messages in one group (entity = group id).
    GroupMessages,
}

impl SubscriptionKind {
    /// Stable name used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Conversations => "conversations",
            Self::Groups => "groups",
            Self::All => "all",
            Self::AllMessages => "allMessages",
            Self::AllGroupMessages => "allGroupMessages",
            Self::ConversationMessages => "conversationMessages",
            Self::GroupMessages => "groupMessages",
        }
    }

    /// Whether keys of this kind carry an entity id.
    #[must_use]
    pub const fn is_per_entity(self) -> bool {
        matches!(self, Self::ConversationMessages | Self::GroupMessages)
    }
}

/// `(kind, identity[, entity])`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionKey {
    kind: SubscriptionKind,
    identity: String,
    entity: Option<String>,
}

impl SubscriptionKey {
    /// Build a key, checking that `entity` is present exactly for the
    /// per-entity kinds.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] on a missing or superfluous entity.
    pub fn new(
        kind: SubscriptionKind,
        identity: impl Into<String>,
        entity: Option<&str>,
    ) -> Result<Self> {
        match (kind.is_per_entity(), entity) {
            (true, None) => Err(Error::InvalidArgument(format!(
                "{} subscriptions need an entity id",
                kind.as_str()
            ))),
            (false, Some(_)) => Err(Error::InvalidArgument(format!(
                "{} subscriptions take no entity id",
                kind.as_str()
            ))),
            _ => Ok(Self {
                kind,
                identity: identity.into(),
                entity: entity.map(str::to_owned),
            }),
        }
    }

    /// Listener kind.
    #[must_use]
    pub const fn kind(&self) -> SubscriptionKind {
        self.kind
    }

    /// Owning identity.
    #[must_use]
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Topic or group id for per-entity kinds.
    #[must_use]
    pub fn entity(&self) -> Option<&str> {
        self.entity.as_deref()
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.identity)?;
        if let Some(entity) = &self.entity {
            write!(f, ":{entity}")?;
        }
        Ok(())
    }
}

struct Listener {
    id: u64,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl Listener {
    async fn shutdown(self) {
        self.token.cancel();
        if let Err(e) = self.handle.await
            && e.is_panic()
        {
            tracing::error!(listener = self.id, "listener panicked");
        }
    }
}

/// Registry of cancellable listener tasks.
///
/// `start` and the `stop*` family are serialized; a replaced listener has
/// fully exited before its successor is spawned, so two listeners never
/// deliver for the same key at once. A listener that ends on its own removes
/// itself. Dropping the registry cancels every listener.
pub struct SubscriptionRegistry {
    listeners: Arc<DashMap<SubscriptionKey, Listener>>,
    ops: Mutex<()>,
    next_id: AtomicU64,
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self {
            listeners: Arc::new(DashMap::new()),
            ops: Mutex::new(()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("listeners", &self.listeners.len())
            .finish_non_exhaustive()
    }
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace whatever listens on `key` with `body`. Returns the new
    /// listener's id.
    ///
    /// `body` is polled until it completes or the key is stopped or
    /// replaced, whichever comes first.
    pub async fn start<F>(&self, key: SubscriptionKey, body: F) -> u64
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let _op = self.ops.lock().await;

        if let Some((_, old)) = self.listeners.remove(&key) {
            tracing::debug!(subscription = %key, listener = old.id, "replacing listener");
            old.shutdown().await;
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        let task_token = token.clone();
        let task_key = key.clone();
        let listeners = Arc::clone(&self.listeners);

        // The slot stays locked until the handle is stored, so a body that
        // finishes immediately cannot race its own removal.
        let slot = self.listeners.entry(key);
        let handle = tokio::spawn(async move {
            tokio::select! {
                biased;
                () = task_token.cancelled() => {}
                () = body => {
                    listeners.remove_if(&task_key, |_, l| l.id == id);
                }
            }
        });
        slot.insert(Listener { id, token, handle });
        tracing::debug!(listener = id, "listener registered");
        id
    }

    /// Cancel and remove the listener at `key`. Returns whether one was
    /// running; stopping an absent key is a no-op.
    pub async fn stop(&self, key: &SubscriptionKey) -> bool {
        let _op = self.ops.lock().await;
        let Some((_, listener)) = self.listeners.remove(key) else {
            return false;
        };
        let live = !listener.handle.is_finished();
        tracing::debug!(subscription = %key, listener = listener.id, "stopping listener");
        listener.shutdown().await;
        live
    }

    /// Stop every listener owned by `identity`. Returns how many were stopped.
    pub async fn stop_identity(&self, identity: &str) -> usize {
        self.stop_where(|k| k.identity == identity).await
    }

    /// Stop every listener.
    pub async fn stop_all(&self) -> usize {
        self.stop_where(|_| true).await
    }

    async fn stop_where(&self, pred: impl Fn(&SubscriptionKey) -> bool) -> usize {
        let _op = self.ops.lock().await;
        let keys: Vec<SubscriptionKey> = self
            .listeners
            .iter()
            .filter(|e| pred(e.key()))
            .map(|e| e.key().clone())
            .collect();

        let mut stopped = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some((_, listener)) = self.listeners.remove(&key) {
                listener.token.cancel();
                stopped.push(listener);
            }
        }
        let n = stopped.len();
        for listener in stopped {
            listener.shutdown().await;
        }
        n
    }

    /// Whether a live listener is registered at `key`.
    #[must_use]
    pub fn is_active(&self, key: &SubscriptionKey) -> bool {
        self.listeners
            .get(key)
            .is_some_and(|l| !l.handle.is_finished())
    }

    /// Id of the live listener at `key`.
    #[must_use]
    pub fn listener_id(&self, key: &SubscriptionKey) -> Option<u64> {
        self.listeners
            .get(key)
            .filter(|l| !l.handle.is_finished())
            .map(|l| l.id)
    }

    /// Number of live listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners
            .iter()
            .filter(|e| !e.value().handle.is_finished())
            .count()
    }

    /// Whether no listener is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for SubscriptionRegistry {
    fn drop(&mut self) {
        for entry in self.listeners.iter() {
            entry.value().token.cancel();
        }
    }
}
