//! In-process messaging network.
//!
//! [`LoopbackNetwork`] implements the [`library`](crate::library) traits with
//! plain in-memory state: every client created from one network instance
//! can talk to every other one. There is no cryptography beyond Keccak-256
//! ids and no persistence. Live streams hang off a broadcast bus; a
//! subscriber that falls behind gets one stream error and is done.

mod client;
mod contacts;
mod conversation;
mod group;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream;
use prost::Message as ProstMessage;
use sha3::{Digest, Keccak256};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use crate::config::ClientOptions;
use crate::error::{Error, Result};
use crate::library::{ClientHandle, EventStream, MessagingLibrary, PreActionHooks, SigningKey};
use crate::types::{ConsentEntityType, ConsentState, DecodedMessage, PreAction};

pub use client::LoopbackClient;

use client::ClientCore;
use conversation::ConversationState;
use group::GroupState;

const BUS_CAPACITY: usize = 1024;

/// Exported identity: account address plus the secret the loopback signs
/// digests with.
#[derive(Clone, PartialEq, Eq, ProstMessage)]
struct KeyBundle {
    #[prost(string, tag = "1")]
    address: String,
    #[prost(bytes = "vec", tag = "2")]
    secret: Vec<u8>,
}

/// Sealed form of a prepared message.
#[derive(Clone, PartialEq, Eq, ProstMessage)]
struct Envelope {
    #[prost(string, tag = "1")]
    sender_inbox_id: String,
    #[prost(int64, tag = "2")]
    sent_at_ns: i64,
    #[prost(bytes = "vec", tag = "3")]
    content: Vec<u8>,
}

/// What travels on the bus.
#[derive(Debug, Clone)]
enum NetEvent {
    Conversation { topic: String },
    GroupJoined { group_id: String, inbox_id: String },
    Message { message: DecodedMessage, group_id: Option<String> },
}

#[derive(Debug, Clone)]
struct InboxRecord {
    address: String,
    secret: [u8; 32],
}

type ConsentKey = (ConsentEntityType, String);

/// Shared state of one loopback network.
struct Network {
    inboxes: DashMap<String, InboxRecord>,
    by_address: DashMap<String, String>,
    conversations: DashMap<String, Arc<ConversationState>>,
    groups: DashMap<String, Arc<GroupState>>,
    messages: DashMap<String, Vec<DecodedMessage>>,
    consent: DashMap<String, HashMap<ConsentKey, ConsentState>>,
    bus: broadcast::Sender<NetEvent>,
    clock: AtomicI64,
}

impl Network {
    fn new() -> Self {
        let (bus, _) = broadcast::channel(BUS_CAPACITY);
        Self {
            inboxes: DashMap::new(),
            by_address: DashMap::new(),
            conversations: DashMap::new(),
            groups: DashMap::new(),
            messages: DashMap::new(),
            consent: DashMap::new(),
            bus,
            clock: AtomicI64::new(0),
        }
    }

    /// Wall-clock nanoseconds, strictly increasing across calls.
    fn now_ns(&self) -> i64 {
        let wall = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX));
        let prev = self
            .clock
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                Some(wall.max(last.saturating_add(1)))
            })
            .unwrap_or(wall);
        wall.max(prev.saturating_add(1))
    }

    fn publish(&self, event: NetEvent) {
        // No receivers is fine; nobody is streaming.
        let _ = self.bus.send(event);
    }

    fn register(&self, address: &str, secret: [u8; 32]) -> String {
        let address = address.to_lowercase();
        let inbox_id = inbox_id_for(&address);
        self.inboxes
            .entry(inbox_id.clone())
            .or_insert_with(|| InboxRecord {
                address: address.clone(),
                secret,
            });
        self.by_address.insert(address, inbox_id.clone());
        inbox_id
    }

    fn inbox_of(&self, address: &str) -> Option<String> {
        self.by_address
            .get(&address.to_lowercase())
            .map(|e| e.value().clone())
    }

    fn address_of(&self, inbox_id: &str) -> String {
        self.inboxes
            .get(inbox_id)
            .map(|r| r.address.clone())
            .unwrap_or_default()
    }

    /// Resolve addresses to inbox ids, failing on the first unknown one.
    fn resolve_all(&self, addresses: &[String]) -> Result<Vec<String>> {
        addresses
            .iter()
            .map(|a| {
                self.inbox_of(a)
                    .ok_or_else(|| Error::Library(format!("{a} is not on the network")))
            })
            .collect()
    }

    /// Store `message` under its topic and announce it.
    fn deliver(&self, message: DecodedMessage, group_id: Option<String>) {
        self.messages
            .entry(message.topic.clone())
            .or_default()
            .push(message.clone());
        self.publish(NetEvent::Message { message, group_id });
    }

    /// Live view of the bus through `select`, which maps the events the
    /// caller cares about and drops the rest.
    fn watch<T, F>(&self, select: F) -> EventStream<T>
    where
        T: Send + 'static,
        F: FnMut(NetEvent) -> Option<T> + Send + 'static,
    {
        let rx = self.bus.subscribe();
        Box::pin(stream::unfold(
            (rx, select),
            |(mut rx, mut select)| async move {
                loop {
                    match rx.recv().await {
                        Ok(ev) => {
                            if let Some(item) = select(ev) {
                                return Some((Ok(item), (rx, select)));
                            }
                        }
                        Err(RecvError::Lagged(missed)) => {
                            let err =
                                Error::Stream(format!("subscriber lagged by {missed} events"));
                            return Some((Err(err), (rx, select)));
                        }
                        Err(RecvError::Closed) => return None,
                    }
                }
            },
        ))
    }
}

/// Hex Keccak-256 of the lower-cased address.
#[must_use]
pub fn inbox_id_for(address: &str) -> String {
    hex::encode(Keccak256::digest(address.to_lowercase().as_bytes()))
}

fn keccak(parts: &[&[u8]]) -> [u8; 32] {
    let mut h = Keccak256::new();
    for p in parts {
        h.update(p);
    }
    h.finalize().into()
}

fn random_bytes<const N: usize>() -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    getrandom::fill(&mut buf).map_err(|e| Error::Library(format!("rng: {e}")))?;
    Ok(buf)
}

/// `0x`-prefixed address derived from a secret.
fn address_for(secret: &[u8; 32]) -> String {
    let digest = keccak(&[secret.as_slice()]);
    format!("0x{}", hex::encode(&digest[12..]))
}

fn check_signature(signature: &[u8], purpose: &str) -> Result<()> {
    if signature.is_empty() {
        return Err(Error::Library(format!("empty signature for {purpose}")));
    }
    Ok(())
}

/// An in-process messaging network.
///
/// Cloning is cheap; clones share the same network.
#[derive(Clone)]
pub struct LoopbackNetwork {
    net: Arc<Network>,
}

impl fmt::Debug for LoopbackNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopbackNetwork")
            .field("inboxes", &self.net.inboxes.len())
            .field("conversations", &self.net.conversations.len())
            .field("groups", &self.net.groups.len())
            .finish_non_exhaustive()
    }
}

impl Default for LoopbackNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackNetwork {
    /// An empty network.
    #[must_use]
    pub fn new() -> Self {
        Self {
            net: Arc::new(Network::new()),
        }
    }

    /// Number of registered inboxes.
    #[must_use]
    pub fn inbox_count(&self) -> usize {
        self.net.inboxes.len()
    }

    /// Record consent for `inbox_id` on the network side only, as another
    /// installation of the same inbox would. Local copies see it after a
    /// refresh.
    pub fn set_remote_consent(
        &self,
        inbox_id: &str,
        kind: ConsentEntityType,
        value: &str,
        state: ConsentState,
    ) {
        self.net
            .consent
            .entry(inbox_id.to_owned())
            .or_default()
            .insert((kind, value.to_owned()), state);
    }

    fn client(&self, inbox_id: String, options: &ClientOptions) -> Result<Arc<dyn ClientHandle>> {
        let record = self
            .net
            .inboxes
            .get(&inbox_id)
            .map(|r| r.value().clone())
            .ok_or_else(|| Error::Library(format!("unknown inbox {inbox_id}")))?;
        let installation_id = hex::encode(random_bytes::<16>()?);
        let core = ClientCore::new(
            Arc::clone(&self.net),
            inbox_id,
            record,
            installation_id,
            options,
        );
        tracing::debug!(
            inbox_id = core.inbox_id(),
            installation_id = core.installation_id(),
            "loopback client created"
        );
        Ok(Arc::new(LoopbackClient::new(core)))
    }
}

#[async_trait]
impl MessagingLibrary for LoopbackNetwork {
    async fn create_identity(
        &self,
        signer: Arc<dyn SigningKey>,
        hooks: Arc<dyn PreActionHooks>,
        options: &ClientOptions,
    ) -> Result<Arc<dyn ClientHandle>> {
        let address = signer.address().to_lowercase();
        if signer.is_smart_contract_wallet() && signer.chain_id().is_none() {
            return Err(Error::Library(
                "smart contract wallet without a chain id".into(),
            ));
        }
        let inbox_id = inbox_id_for(&address);

        if !self.net.inboxes.contains_key(&inbox_id) {
            hooks.before(PreAction::CreateIdentity, &address).await?;
            let text = format!("XMTP : Create Identity\nInbox ID: {inbox_id}");
            check_signature(&signer.sign(&text).await?, "identity creation")?;
        }
        hooks.before(PreAction::EnableIdentity, &address).await?;
        hooks.before(PreAction::AuthenticateToInbox, &address).await?;
        let text = format!("XMTP : Authenticate to inbox\nInbox ID: {inbox_id}");
        check_signature(&signer.sign(&text).await?, "inbox authentication")?;

        let secret = keccak(&[b"loopback-identity".as_slice(), address.as_bytes()]);
        let inbox_id = self.net.register(&address, secret);
        self.client(inbox_id, options)
    }

    async fn create_random_identity(
        &self,
        hooks: Arc<dyn PreActionHooks>,
        options: &ClientOptions,
    ) -> Result<Arc<dyn ClientHandle>> {
        let secret = random_bytes::<32>()?;
        let address = address_for(&secret);
        for action in [
            PreAction::CreateIdentity,
            PreAction::EnableIdentity,
            PreAction::AuthenticateToInbox,
        ] {
            hooks.before(action, &address).await?;
        }
        let inbox_id = self.net.register(&address, secret);
        self.client(inbox_id, options)
    }

    async fn build_identity(
        &self,
        address: &str,
        options: &ClientOptions,
    ) -> Result<Arc<dyn ClientHandle>> {
        let inbox_id = self
            .net
            .inbox_of(address)
            .ok_or_else(|| Error::Library(format!("no identity for {address}; create it first")))?;
        self.client(inbox_id, options)
    }

    async fn create_from_key_bundle(
        &self,
        bundle: &[u8],
        options: &ClientOptions,
    ) -> Result<Arc<dyn ClientHandle>> {
        let bundle = KeyBundle::decode(bundle).map_err(|_| Error::InvalidKeyBundle)?;
        let secret: [u8; 32] = bundle
            .secret
            .as_slice()
            .try_into()
            .map_err(|_| Error::InvalidKeyBundle)?;
        if bundle.address.is_empty() {
            return Err(Error::InvalidKeyBundle);
        }
        let inbox_id = self.net.register(&bundle.address, secret);
        self.client(inbox_id, options)
    }

    async fn can_message(
        &self,
        addresses: &[String],
        _options: &ClientOptions,
    ) -> Result<HashMap<String, bool>> {
        Ok(addresses
            .iter()
            .map(|a| (a.clone(), self.net.inbox_of(a).is_some()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;

    #[test]
    fn inbox_ids_ignore_address_case() {
        assert_eq!(
            inbox_id_for("0xABCdef0000000000000000000000000000000001"),
            inbox_id_for("0xabcdef0000000000000000000000000000000001")
        );
        assert_eq!(inbox_id_for("0x1").len(), 64);
    }

    #[test]
    fn clock_is_strictly_increasing() {
        let net = Network::new();
        let a = net.now_ns();
        let b = net.now_ns();
        assert!(b > a);
    }

    #[tokio::test]
    async fn lagging_watcher_gets_one_error() {
        let net = Network::new();
        let mut watched = net.watch(|ev| match ev {
            NetEvent::Conversation { topic } => Some(topic),
            _ => None,
        });
        for i in 0..=BUS_CAPACITY {
            net.publish(NetEvent::Conversation {
                topic: i.to_string(),
            });
        }
        assert!(matches!(watched.next().await, Some(Err(Error::Stream(_)))));
    }

    #[tokio::test]
    async fn key_bundle_must_carry_a_32_byte_secret() {
        let network = LoopbackNetwork::new();
        let bundle = KeyBundle {
            address: "0xabc".into(),
            secret: vec![1; 12],
        }
        .encode_to_vec();
        let err = network
            .create_from_key_bundle(&bundle, &ClientOptions::default())
            .await
            .err();
        assert!(matches!(err, Some(Error::InvalidKeyBundle)));
    }
}
