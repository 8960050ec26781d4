//! The session object the host constructs once.
//!
//! [`Bridge`] owns the registries, the event channel and the pending host
//! round trips. Its methods are the request dispatcher; [`Bridge::call`]
//! exposes them by name for JSON hosts.

mod consent;
mod conversations;
mod dispatch;
mod groups;
mod streams;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::callbacks::{HostHooks, PreActionGates};
use crate::codec::ClientInfo;
use crate::config::{BridgeConfig, ClientOptions, WalletOptions};
use crate::error::{Error, Result};
use crate::events::{EventBridge, EventName, EventSink};
use crate::library::{ClientHandle, Container, GroupRef, MessagingLibrary, PreActionHooks};
use crate::prepared::PreparedStore;
use crate::registry::{EntityCache, EntityKey, IdentityRegistry, Lease, SubscriptionRegistry};
use crate::signature::{HostSigner, SignatureRequests};
use crate::types::{IdentityState, PreAction};

/// Multi-identity bridge between a messaging library and a host runtime.
pub struct Bridge {
    library: Arc<dyn MessagingLibrary>,
    identities: IdentityRegistry,
    cache: Arc<EntityCache<Container>>,
    subscriptions: SubscriptionRegistry,
    events: EventBridge,
    signatures: SignatureRequests,
    gates: PreActionGates,
    prepared: PreparedStore,
    config: BridgeConfig,
}

impl fmt::Debug for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("identities", &self.identities)
            .field("cache", &self.cache)
            .field("subscriptions", &self.subscriptions)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn require_mls(client: &Lease) -> Result<()> {
    if client.mls_enabled() {
        Ok(())
    } else {
        Err(Error::MlsNotEnabled)
    }
}

fn strip_0x(s: &str) -> &str {
    s.strip_prefix("0x").unwrap_or(s)
}

impl Bridge {
    /// Create a bridge over `library`, delivering push events to `sink`.
    #[must_use]
    pub fn new(
        library: Arc<dyn MessagingLibrary>,
        sink: Arc<dyn EventSink>,
        config: BridgeConfig,
    ) -> Self {
        Self {
            library,
            identities: IdentityRegistry::new(),
            cache: Arc::new(EntityCache::new()),
            subscriptions: SubscriptionRegistry::new(),
            events: EventBridge::new(sink),
            signatures: SignatureRequests::new(),
            gates: PreActionGates::new(),
            prepared: PreparedStore::new(config.prepared_dir()),
            config,
        }
    }

    /// Client registry.
    #[must_use]
    pub const fn identities(&self) -> &IdentityRegistry {
        &self.identities
    }

    /// Conversation and group handle cache.
    #[must_use]
    pub fn cache(&self) -> &EntityCache<Container> {
        &self.cache
    }

    /// Listener registry.
    #[must_use]
    pub const fn subscriptions(&self) -> &SubscriptionRegistry {
        &self.subscriptions
    }

    /// Bridge settings.
    #[must_use]
    pub const fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Stop every listener. Registered clients stay.
    pub async fn shutdown(&self) {
        let stopped = self.subscriptions.stop_all().await;
        tracing::info!(stopped, "bridge shut down");
    }

    pub(crate) async fn lease(&self, identity: &str) -> Result<Lease> {
        self.identities.require(identity)?.lease().await
    }

    /// Cache `c` under the leased identity.
    pub(crate) fn remember(&self, client: &Lease, c: Container) {
        self.cache
            .put(EntityKey::new(client.inbox_id(), c.id()), c);
    }

    /// Resolve a conversation topic or group id to a cached container.
    pub(crate) async fn container(&self, client: &Lease, id: &str) -> Result<Container> {
        let key = EntityKey::new(client.inbox_id(), id);
        let handle = client.handle();
        self.cache
            .get_or_fetch(&key, || async move {
                if let Some(c) = handle.find_conversation(id).await? {
                    return Ok(Container::Conversation(c));
                }
                if handle.mls_enabled()
                    && let Some(g) = handle.find_group(id).await?
                {
                    return Ok(Container::Group(g));
                }
                Err(Error::ConversationNotFound(id.to_owned()))
            })
            .await
    }

    /// Resolve a group id to a cached group.
    pub(crate) async fn group(&self, client: &Lease, id: &str) -> Result<Arc<dyn GroupRef>> {
        require_mls(client)?;
        let key = EntityKey::new(client.inbox_id(), id);
        let handle = client.handle();
        let found = self
            .cache
            .get_or_fetch(&key, || async move {
                handle
                    .find_group(id)
                    .await?
                    .map(Container::Group)
                    .ok_or_else(|| Error::GroupNotFound(id.to_owned()))
            })
            .await?;
        found
            .as_group()
            .cloned()
            .ok_or_else(|| Error::GroupNotFound(id.to_owned()))
    }

    fn hooks(&self, options: &ClientOptions) -> Arc<dyn PreActionHooks> {
        Arc::new(HostHooks::new(
            self.gates.clone(),
            self.events.clone(),
            options,
            self.config.callback_timeout(),
        ))
    }

    /// Register `handle`, first tearing down any client it replaces.
    async fn install(&self, handle: Arc<dyn ClientHandle>) -> ClientInfo {
        let info = ClientInfo::of(handle.as_ref());
        if self.identities.get(&info.inbox_id).is_some() {
            tracing::info!(inbox_id = %info.inbox_id, "replacing registered client");
            self.teardown(&info.inbox_id).await;
        }
        self.identities.register(handle);
        info
    }

    /// Retire the registered entry, then stop its listeners and evict its
    /// cache. Retiring waits out in-flight calls, so a subscribe that leased
    /// the old client has registered its listener before the stop runs.
    async fn teardown(&self, inbox_id: &str) -> bool {
        let Some(entry) = self.identities.get(inbox_id) else {
            return false;
        };
        if !entry.retire().await {
            return false;
        }
        let stopped = self.subscriptions.stop_identity(inbox_id).await;
        let evicted = self.cache.evict_identity(inbox_id);
        let removed = self.identities.remove_entry(&entry);
        tracing::debug!(inbox_id, stopped, evicted, removed, "identity torn down");
        removed
    }

    // ── Identity ─────────────────────────────────────────────────────────────

    /// Create or load the identity of `address`, asking the host for every
    /// signature. Emits `authed` on success.
    ///
    /// # Errors
    ///
    /// Invalid options, a host timeout, or a library failure.
    pub async fn auth(
        &self,
        address: &str,
        options: &ClientOptions,
        wallet: WalletOptions,
    ) -> Result<ClientInfo> {
        options.validate()?;
        let _ticket = self.identities.begin_auth(address);

        let mut signer = HostSigner::new(
            address,
            self.events.clone(),
            self.signatures.clone(),
            self.config.signature_timeout(),
        );
        if wallet.is_smart_contract_wallet {
            let chain_id = wallet.chain_id.ok_or_else(|| {
                Error::InvalidArgument("smart contract wallets need a chainId".into())
            })?;
            signer = signer.smart_contract_wallet(chain_id, wallet.block_number);
        }

        let handle = self
            .library
            .create_identity(Arc::new(signer), self.hooks(options), options)
            .await?;
        let info = self.install(handle).await;
        self.events.emit(EventName::Authed, serde_json::to_value(&info)?);
        Ok(info)
    }

    /// Create an identity for a fresh random key.
    ///
    /// # Errors
    ///
    /// Invalid options, a host callback timeout, or a library failure.
    pub async fn create_random(&self, options: ClientOptions) -> Result<ClientInfo> {
        options.validate()?;
        let handle = self
            .library
            .create_random_identity(self.hooks(&options), &options)
            .await?;
        Ok(self.install(handle).await)
    }

    /// Load an identity that already exists locally, without signing.
    ///
    /// # Errors
    ///
    /// Invalid options or a library failure.
    pub async fn build(&self, address: &str, options: &ClientOptions) -> Result<ClientInfo> {
        options.validate()?;
        let handle = self.library.build_identity(address, options).await?;
        Ok(self.install(handle).await)
    }

    /// Restore an identity from a hex-encoded exported key bundle.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidKeyBundle`] if the bundle is not valid hex or the
    /// library rejects it.
    pub async fn create_from_key_bundle(
        &self,
        bundle_hex: &str,
        options: &ClientOptions,
    ) -> Result<ClientInfo> {
        options.validate()?;
        let bundle = hex::decode(strip_0x(bundle_hex)).map_err(|_| Error::InvalidKeyBundle)?;
        let handle = self
            .library
            .create_from_key_bundle(&bundle, options)
            .await?;
        Ok(self.install(handle).await)
    }

    /// Hex-encoded key bundle of `identity`.
    ///
    /// # Errors
    ///
    /// [`Error::NoClient`], [`Error::Paused`] or a library failure.
    pub async fn export_key_bundle(&self, identity: &str) -> Result<String> {
        let client = self.lease(identity).await?;
        Ok(hex::encode(client.export_key_bundle().await?))
    }

    /// Answer a `sign` event. Unknown or already answered ids are ignored.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] if `signature_hex` is not hex.
    pub fn receive_signature(&self, request_id: &str, signature_hex: &str) -> Result<bool> {
        let signature = hex::decode(strip_0x(signature_hex))
            .map_err(|e| Error::InvalidArgument(format!("signature: {e}")))?;
        Ok(self.signatures.resolve(request_id, signature))
    }

    /// Complete a pre-action callback. With no `request_id` every waiter of
    /// `action` is released.
    pub fn pre_action_completed(&self, action: PreAction, request_id: Option<&str>) -> usize {
        self.gates.complete(action, request_id)
    }

    /// Drop the client for `identity` with its subscriptions and cache.
    /// Returns whether a client was registered.
    pub async fn drop_client(&self, identity: &str) -> bool {
        let Some(entry) = self.identities.get(identity) else {
            return false;
        };
        let inbox_id = entry.handle().inbox_id().to_owned();
        self.teardown(&inbox_id).await
    }

    /// Lifecycle position of `identity`.
    #[must_use]
    pub fn identity_state(&self, identity: &str) -> IdentityState {
        self.identities.state(identity)
    }

    /// Identity details of a registered client, paused or not.
    ///
    /// # Errors
    ///
    /// [`Error::NoClient`].
    pub fn client_info(&self, identity: &str) -> Result<ClientInfo> {
        let entry = self.identities.require(identity)?;
        Ok(ClientInfo::of(entry.handle().as_ref()))
    }

    /// Which of `peers` can receive messages.
    ///
    /// # Errors
    ///
    /// [`Error::NoClient`], [`Error::Paused`] or a library failure.
    pub async fn can_message(
        &self,
        identity: &str,
        peers: &[String],
    ) -> Result<HashMap<String, bool>> {
        let client = self.lease(identity).await?;
        client.can_message(peers).await
    }

    /// Which of `peers` can receive messages, without a client.
    ///
    /// # Errors
    ///
    /// Invalid options or a library failure.
    pub async fn static_can_message(
        &self,
        peers: &[String],
        options: &ClientOptions,
    ) -> Result<HashMap<String, bool>> {
        options.validate()?;
        self.library.can_message(peers, options).await
    }

    /// Sign a hex-encoded 32-byte digest with the identity key.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidDigest`] unless `digest_hex` is 32 bytes of hex.
    pub async fn sign(&self, identity: &str, digest_hex: &str) -> Result<String> {
        let digest = hex::decode(strip_0x(digest_hex)).map_err(|_| Error::InvalidDigest)?;
        if digest.len() != 32 {
            return Err(Error::InvalidDigest);
        }
        let client = self.lease(identity).await?;
        Ok(hex::encode(client.sign_digest(&digest).await?))
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    /// Release the database connection of every registered client. Waits
    /// for in-flight calls; later calls fail with [`Error::Paused`].
    ///
    /// # Errors
    ///
    /// The first library failure. Every client is still attempted.
    pub async fn drop_local_database_connection(&self) -> Result<usize> {
        let mut first_err = None;
        let mut paused = 0;
        for entry in self.identities.entries() {
            match entry.pause().await {
                Ok(()) => paused += 1,
                Err(e) => {
                    tracing::warn!(
                        inbox_id = entry.handle().inbox_id(),
                        error = %e,
                        "pause failed"
                    );
                    first_err.get_or_insert(e);
                }
            }
        }
        first_err.map_or(Ok(paused), Err)
    }

    /// Reconnect the database of every registered client.
    ///
    /// # Errors
    ///
    /// The first library failure. Every client is still attempted.
    pub async fn reconnect_local_database(&self) -> Result<usize> {
        let mut first_err = None;
        let mut resumed = 0;
        for entry in self.identities.entries() {
            match entry.resume().await {
                Ok(()) => resumed += 1,
                Err(e) => {
                    tracing::warn!(
                        inbox_id = entry.handle().inbox_id(),
                        error = %e,
                        "resume failed"
                    );
                    first_err.get_or_insert(e);
                }
            }
        }
        first_err.map_or(Ok(resumed), Err)
    }
}
