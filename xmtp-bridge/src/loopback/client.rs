use std::cmp::Reverse;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use prost::Message as ProstMessage;

use super::contacts::LoopbackContacts;
use super::conversation::{ConversationState, LoopbackConversation, topic_for};
use super::group::{GroupState, LoopbackGroup};
use super::{ConsentKey, Envelope, InboxRecord, KeyBundle, NetEvent, Network, keccak};
use crate::config::ClientOptions;
use crate::error::{Error, Result};
use crate::library::{ClientHandle, Contacts, ConversationRef, EventStream, GroupRef};
use crate::types::{
    ConsentEntityType, ConsentEntry, ConsentState, ConversationContext, CreateGroupOptions,
    DecodedMessage, DeliveryStatus, ListGroupsParams, ListMessagesOptions, PreparedEnvelope,
    SortDirection,
};

/// Per-installation state shared by a client and every handle it hands out.
pub(super) struct ClientCore {
    net: Arc<Network>,
    inbox_id: String,
    address: String,
    secret: [u8; 32],
    installation_id: String,
    mls_enabled: bool,
    db_path: Option<String>,
    released: AtomicBool,
    consent: DashMap<ConsentKey, ConsentState>,
}

impl ClientCore {
    pub(super) fn new(
        net: Arc<Network>,
        inbox_id: String,
        record: InboxRecord,
        installation_id: String,
        options: &ClientOptions,
    ) -> Arc<Self> {
        let db_path = options
            .db_directory
            .as_ref()
            .map(|dir| format!("{dir}/xmtp-{}-{inbox_id}.db3", options.env.as_str()));
        Arc::new(Self {
            net,
            inbox_id,
            address: record.address,
            secret: record.secret,
            installation_id,
            mls_enabled: options.enable_v3,
            db_path,
            released: AtomicBool::new(false),
            consent: DashMap::new(),
        })
    }

    pub(super) fn inbox_id(&self) -> &str {
        &self.inbox_id
    }

    pub(super) fn installation_id(&self) -> &str {
        &self.installation_id
    }

    pub(super) fn net(&self) -> &Network {
        &self.net
    }

    /// Fail while the database connection is released.
    pub(super) fn check(&self) -> Result<()> {
        if self.released.load(Ordering::Acquire) {
            return Err(Error::Library(format!(
                "database connection of {} is released",
                self.inbox_id
            )));
        }
        Ok(())
    }

    // ── Consent ──────────────────────────────────────────────────────────────

    pub(super) fn local_consent(&self, kind: ConsentEntityType, value: &str) -> ConsentState {
        self.consent
            .get(&(kind, normalize(kind, value)))
            .map_or(ConsentState::Unknown, |s| *s)
    }

    /// Record `state` locally and on the network.
    pub(super) fn record_consent(
        &self,
        kind: ConsentEntityType,
        values: &[String],
        state: ConsentState,
    ) {
        let mut remote = self.net.consent.entry(self.inbox_id.clone()).or_default();
        for value in values {
            let key = (kind, normalize(kind, value));
            remote.insert(key.clone(), state);
            self.consent.insert(key, state);
        }
    }

    pub(super) fn consent_entries(&self) -> Vec<ConsentEntry> {
        let mut list: Vec<ConsentEntry> = self
            .consent
            .iter()
            .map(|e| ConsentEntry {
                entry_type: e.key().0,
                value: e.key().1.clone(),
                state: *e.value(),
            })
            .collect();
        list.sort_by(|a, b| a.value.cmp(&b.value));
        list
    }

    /// Replace the local copy with the network copy.
    pub(super) fn pull_consent(&self) {
        let remote = self
            .net
            .consent
            .get(&self.inbox_id)
            .map(|m| m.value().clone())
            .unwrap_or_default();
        self.consent.clear();
        for (key, state) in remote {
            self.consent.insert(key, state);
        }
    }

    // ── Messages ─────────────────────────────────────────────────────────────

    fn message_id(&self, topic: &str, sent_at_ns: i64, content: &[u8]) -> String {
        hex::encode(keccak(&[
            topic.as_bytes(),
            self.inbox_id.as_bytes(),
            &sent_at_ns.to_be_bytes(),
            content,
        ]))
    }

    fn compose(
        &self,
        topic: &str,
        message_id: String,
        sent_at_ns: i64,
        content: Vec<u8>,
    ) -> DecodedMessage {
        DecodedMessage {
            id: message_id,
            topic: topic.to_owned(),
            sender_address: self.address.clone(),
            sender_inbox_id: self.inbox_id.clone(),
            sent_at_ns,
            content,
            delivery_status: DeliveryStatus::Published,
        }
    }

    /// Publish `content` on `topic`. Returns the message id.
    pub(super) fn send(&self, topic: &str, group_id: Option<&str>, content: &[u8]) -> String {
        let sent_at_ns = self.net.now_ns();
        let id = self.message_id(topic, sent_at_ns, content);
        let message = self.compose(topic, id.clone(), sent_at_ns, content.to_vec());
        self.net.deliver(message, group_id.map(str::to_owned));
        id
    }

    /// Seal `content` for `topic` without publishing it.
    pub(super) fn seal(&self, topic: &str, content: &[u8]) -> PreparedEnvelope {
        let sent_at_ns = self.net.now_ns();
        let envelope = Envelope {
            sender_inbox_id: self.inbox_id.clone(),
            sent_at_ns,
            content: content.to_vec(),
        };
        PreparedEnvelope {
            message_id: self.message_id(topic, sent_at_ns, content),
            topic: topic.to_owned(),
            payload: envelope.encode_to_vec(),
        }
    }

    /// Publish an envelope produced by [`seal`](Self::seal).
    pub(super) fn publish_sealed(
        &self,
        topic: &str,
        group_id: Option<&str>,
        prepared: &PreparedEnvelope,
    ) -> Result<String> {
        if prepared.topic != topic {
            return Err(Error::Library(format!(
                "envelope for {} sent to {topic}",
                prepared.topic
            )));
        }
        let envelope = Envelope::decode(prepared.payload.as_slice())
            .map_err(|e| Error::Library(format!("corrupt envelope: {e}")))?;
        if envelope.sender_inbox_id != self.inbox_id {
            return Err(Error::Library("envelope sealed by another inbox".into()));
        }
        let message = self.compose(
            topic,
            prepared.message_id.clone(),
            envelope.sent_at_ns,
            envelope.content,
        );
        self.net.deliver(message, group_id.map(str::to_owned));
        Ok(prepared.message_id.clone())
    }

    pub(super) fn stored(&self, topic: &str, options: &ListMessagesOptions) -> Vec<DecodedMessage> {
        let mut list: Vec<DecodedMessage> = self
            .net
            .messages
            .get(topic)
            .map(|stored| {
                stored
                    .iter()
                    .filter(|m| options.before_ns.is_none_or(|t| m.sent_at_ns < t))
                    .filter(|m| options.after_ns.is_none_or(|t| m.sent_at_ns > t))
                    .filter(|m| options.delivery_status.is_none_or(|s| m.delivery_status == s))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        match options.direction.unwrap_or(SortDirection::Descending) {
            SortDirection::Ascending => list.sort_by_key(|m| m.sent_at_ns),
            SortDirection::Descending => list.sort_by_key(|m| Reverse(m.sent_at_ns)),
        }
        if let Some(limit) = options.limit {
            list.truncate(limit);
        }
        list
    }

    /// Live messages on `topic`.
    pub(super) fn stream_topic(&self, topic: &str) -> EventStream<DecodedMessage> {
        let topic = topic.to_owned();
        self.net.watch(move |ev| match ev {
            NetEvent::Message { message, .. } if message.topic == topic => Some(message),
            _ => None,
        })
    }
}

/// Addresses compare case-insensitively.
fn normalize(kind: ConsentEntityType, value: &str) -> String {
    match kind {
        ConsentEntityType::Address => value.to_lowercase(),
        ConsentEntityType::GroupId | ConsentEntityType::InboxId => value.to_owned(),
    }
}

fn conversation(
    core: &Arc<ClientCore>,
    state: Arc<ConversationState>,
) -> Arc<dyn ConversationRef> {
    Arc::new(LoopbackConversation::new(Arc::clone(core), state))
}

fn group(core: &Arc<ClientCore>, state: Arc<GroupState>) -> Arc<dyn GroupRef> {
    Arc::new(LoopbackGroup::new(Arc::clone(core), state))
}

/// A client on a [`LoopbackNetwork`](super::LoopbackNetwork).
pub struct LoopbackClient {
    core: Arc<ClientCore>,
}

impl fmt::Debug for LoopbackClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopbackClient")
            .field("inbox_id", &self.core.inbox_id)
            .field("installation_id", &self.core.installation_id)
            .finish_non_exhaustive()
    }
}

impl LoopbackClient {
    pub(super) const fn new(core: Arc<ClientCore>) -> Self {
        Self { core }
    }

    /// Whether the database connection is currently released.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.core.released.load(Ordering::Acquire)
    }
}

#[async_trait]
impl ClientHandle for LoopbackClient {
    fn inbox_id(&self) -> &str {
        &self.core.inbox_id
    }

    fn address(&self) -> &str {
        &self.core.address
    }

    fn installation_id(&self) -> &str {
        &self.core.installation_id
    }

    fn db_path(&self) -> Option<String> {
        self.core.db_path.clone()
    }

    fn mls_enabled(&self) -> bool {
        self.core.mls_enabled
    }

    async fn can_message(&self, addresses: &[String]) -> Result<HashMap<String, bool>> {
        self.core.check()?;
        Ok(addresses
            .iter()
            .map(|a| (a.clone(), self.core.net.inbox_of(a).is_some()))
            .collect())
    }

    async fn list_conversations(&self) -> Result<Vec<Arc<dyn ConversationRef>>> {
        self.core.check()?;
        let mut states: Vec<Arc<ConversationState>> = self
            .core
            .net
            .conversations
            .iter()
            .filter(|e| e.value().has_member(&self.core.inbox_id))
            .map(|e| Arc::clone(e.value()))
            .collect();
        states.sort_by_key(|s| s.created_at_ns());
        Ok(states
            .into_iter()
            .map(|s| conversation(&self.core, s))
            .collect())
    }

    async fn list_groups(&self, params: &ListGroupsParams) -> Result<Vec<Arc<dyn GroupRef>>> {
        self.core.check()?;
        let mut states: Vec<Arc<GroupState>> = self
            .core
            .net
            .groups
            .iter()
            .filter(|e| e.value().has_history(&self.core.inbox_id))
            .map(|e| Arc::clone(e.value()))
            .filter(|g| params.created_after_ns.is_none_or(|t| g.created_at_ns() > t))
            .filter(|g| params.created_before_ns.is_none_or(|t| g.created_at_ns() < t))
            .filter(|g| {
                params.consent_state.is_none_or(|s| {
                    self.core.local_consent(ConsentEntityType::GroupId, g.id()) == s
                })
            })
            .collect();
        states.sort_by_key(|g| g.created_at_ns());
        if let Some(limit) = params.limit {
            states.truncate(limit);
        }
        Ok(states.into_iter().map(|g| group(&self.core, g)).collect())
    }

    async fn find_conversation(&self, topic: &str) -> Result<Option<Arc<dyn ConversationRef>>> {
        self.core.check()?;
        Ok(self
            .core
            .net
            .conversations
            .get(topic)
            .filter(|e| e.value().has_member(&self.core.inbox_id))
            .map(|e| conversation(&self.core, Arc::clone(e.value()))))
    }

    async fn find_group(&self, id: &str) -> Result<Option<Arc<dyn GroupRef>>> {
        self.core.check()?;
        Ok(self
            .core
            .net
            .groups
            .get(id)
            .filter(|e| e.value().has_history(&self.core.inbox_id))
            .map(|e| group(&self.core, Arc::clone(e.value()))))
    }

    async fn new_conversation(
        &self,
        peer_address: &str,
        context: Option<ConversationContext>,
    ) -> Result<Arc<dyn ConversationRef>> {
        self.core.check()?;
        let net = &self.core.net;
        let peer = net
            .inbox_of(peer_address)
            .ok_or_else(|| Error::Library(format!("{peer_address} is not on the network")))?;
        if peer == self.core.inbox_id {
            return Err(Error::Library("cannot start a conversation with yourself".into()));
        }

        let topic = topic_for(
            &self.core.inbox_id,
            &peer,
            context.as_ref().map(|c| c.conversation_id.as_str()),
        );
        let mut created = false;
        let state = Arc::clone(
            net.conversations
                .entry(topic.clone())
                .or_insert_with(|| {
                    created = true;
                    Arc::new(ConversationState::new(
                        topic.clone(),
                        [self.core.inbox_id.clone(), peer],
                        net.now_ns(),
                        context,
                    ))
                })
                .value(),
        );
        if created {
            tracing::debug!(%topic, "loopback conversation created");
            net.publish(NetEvent::Conversation { topic });
        }
        self.core.record_consent(
            ConsentEntityType::Address,
            &[peer_address.to_owned()],
            ConsentState::Allowed,
        );
        Ok(conversation(&self.core, state))
    }

    async fn create_group(
        &self,
        peer_addresses: &[String],
        options: &CreateGroupOptions,
    ) -> Result<Arc<dyn GroupRef>> {
        self.core.check()?;
        if !self.core.mls_enabled {
            return Err(Error::MlsNotEnabled);
        }
        let net = &self.core.net;
        let peers = net.resolve_all(peer_addresses)?;
        let id = hex::encode(super::random_bytes::<16>()?);
        let state = Arc::new(GroupState::new(
            id.clone(),
            &self.core.inbox_id,
            net.now_ns(),
            &peers,
            options,
        ));
        net.groups.insert(id.clone(), Arc::clone(&state));
        self.core.record_consent(
            ConsentEntityType::GroupId,
            std::slice::from_ref(&id),
            ConsentState::Allowed,
        );
        for inbox_id in std::iter::once(self.core.inbox_id.clone()).chain(peers) {
            net.publish(NetEvent::GroupJoined {
                group_id: id.clone(),
                inbox_id,
            });
        }
        tracing::debug!(group_id = %id, "loopback group created");
        Ok(group(&self.core, state))
    }

    async fn sync_groups(&self) -> Result<()> {
        self.core.check()
    }

    async fn stream_conversations(&self) -> Result<EventStream<Arc<dyn ConversationRef>>> {
        self.core.check()?;
        let core = Arc::clone(&self.core);
        Ok(self.core.net.watch(move |ev| match ev {
            NetEvent::Conversation { topic } => core
                .net
                .conversations
                .get(&topic)
                .filter(|e| e.value().has_member(&core.inbox_id))
                .map(|e| conversation(&core, Arc::clone(e.value()))),
            _ => None,
        }))
    }

    async fn stream_groups(&self) -> Result<EventStream<Arc<dyn GroupRef>>> {
        self.core.check()?;
        let core = Arc::clone(&self.core);
        Ok(self.core.net.watch(move |ev| match ev {
            NetEvent::GroupJoined { group_id, inbox_id } if inbox_id == core.inbox_id => core
                .net
                .groups
                .get(&group_id)
                .map(|e| group(&core, Arc::clone(e.value()))),
            _ => None,
        }))
    }

    async fn stream_all_messages(&self) -> Result<EventStream<DecodedMessage>> {
        self.core.check()?;
        let core = Arc::clone(&self.core);
        Ok(self.core.net.watch(move |ev| match ev {
            NetEvent::Message {
                message,
                group_id: None,
            } => core
                .net
                .conversations
                .get(&message.topic)
                .is_some_and(|e| e.value().has_member(&core.inbox_id))
                .then_some(message),
            _ => None,
        }))
    }

    async fn stream_all_group_messages(&self) -> Result<EventStream<DecodedMessage>> {
        self.core.check()?;
        let core = Arc::clone(&self.core);
        Ok(self.core.net.watch(move |ev| match ev {
            NetEvent::Message {
                message,
                group_id: Some(id),
            } => core
                .net
                .groups
                .get(&id)
                .is_some_and(|e| e.value().is_member(&core.inbox_id))
                .then_some(message),
            _ => None,
        }))
    }

    fn contacts(&self) -> Arc<dyn Contacts> {
        Arc::new(LoopbackContacts::new(Arc::clone(&self.core)))
    }

    async fn export_key_bundle(&self) -> Result<Vec<u8>> {
        self.core.check()?;
        Ok(KeyBundle {
            address: self.core.address.clone(),
            secret: self.core.secret.to_vec(),
        }
        .encode_to_vec())
    }

    async fn sign_digest(&self, digest: &[u8]) -> Result<Vec<u8>> {
        self.core.check()?;
        Ok(keccak(&[self.core.secret.as_slice(), digest]).to_vec())
    }

    async fn release_db_connection(&self) -> Result<()> {
        self.core.released.store(true, Ordering::Release);
        Ok(())
    }

    async fn reconnect_db(&self) -> Result<()> {
        self.core.released.store(false, Ordering::Release);
        Ok(())
    }
}
