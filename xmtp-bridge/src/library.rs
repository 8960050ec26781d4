//! Capability interface of the wrapped messaging library.
//!
//! The bridge never touches keys, MLS state, transport or storage. It reaches
//! the protocol only through these traits. Every `async` method is a
//! suspension point; callers must not hold a registry lock across one.

use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;

use crate::config::ClientOptions;
use crate::error::Result;
use crate::types::{
    ConsentEntityType, ConsentEntry, ConsentState, ConversationContext, CreateGroupOptions,
    DecodedMessage, GroupMember, GroupMetadata, ListGroupsParams, ListMessagesOptions,
    MetadataField, PermissionOption, PermissionPolicySet, PermissionUpdateType, PreAction,
    PreparedEnvelope,
};

/// A lazy, non-restartable sequence of protocol events. Dropping the stream
/// closes it and releases whatever the library holds for it.
pub type EventStream<T> = Pin<Box<dyn Stream<Item = Result<T>> + Send + 'static>>;

/// Signs identity payloads on behalf of an account.
#[async_trait]
pub trait SigningKey: Send + Sync {
    /// The account address this key signs for.
    fn address(&self) -> &str;

    /// Sign the given text and return raw signature bytes.
    async fn sign(&self, text: &str) -> Result<Vec<u8>>;

    /// Whether this is a smart contract wallet (ERC-1271). Default: `false`.
    fn is_smart_contract_wallet(&self) -> bool {
        false
    }

    /// EVM chain ID for SCW verification.
    fn chain_id(&self) -> Option<u64> {
        None
    }

    /// Block number for SCW verification. `None` = latest.
    fn block_number(&self) -> Option<u64> {
        None
    }
}

/// Points where the library yields to the host during authentication.
#[async_trait]
pub trait PreActionHooks: Send + Sync {
    /// Called before `action` proceeds. An error aborts authentication.
    async fn before(&self, action: PreAction, address: &str) -> Result<()>;
}

/// Hooks that never wait.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

#[async_trait]
impl PreActionHooks for NoHooks {
    async fn before(&self, _action: PreAction, _address: &str) -> Result<()> {
        Ok(())
    }
}

/// Entry point of the messaging library.
#[async_trait]
pub trait MessagingLibrary: Send + Sync {
    /// Create (or load) the identity owned by `signer`.
    async fn create_identity(
        &self,
        signer: Arc<dyn SigningKey>,
        hooks: Arc<dyn PreActionHooks>,
        options: &ClientOptions,
    ) -> Result<Arc<dyn ClientHandle>>;

    /// Create an identity for a freshly generated key.
    async fn create_random_identity(
        &self,
        hooks: Arc<dyn PreActionHooks>,
        options: &ClientOptions,
    ) -> Result<Arc<dyn ClientHandle>>;

    /// Load an identity that already exists in local storage. No signer.
    async fn build_identity(
        &self,
        address: &str,
        options: &ClientOptions,
    ) -> Result<Arc<dyn ClientHandle>>;

    /// Restore an identity from an exported key bundle.
    async fn create_from_key_bundle(
        &self,
        bundle: &[u8],
        options: &ClientOptions,
    ) -> Result<Arc<dyn ClientHandle>>;

    /// Which addresses can receive messages, without a client.
    async fn can_message(
        &self,
        addresses: &[String],
        options: &ClientOptions,
    ) -> Result<HashMap<String, bool>>;
}

/// A live client for one identity.
#[async_trait]
pub trait ClientHandle: Send + Sync {
    /// The inbox ID.
    fn inbox_id(&self) -> &str;
    /// The account address.
    fn address(&self) -> &str;
    /// Hex installation ID.
    fn installation_id(&self) -> &str;
    /// Local database path, if persistent.
    fn db_path(&self) -> Option<String>;
    /// Whether MLS groups are enabled for this client.
    fn mls_enabled(&self) -> bool;

    /// Which addresses can receive messages.
    async fn can_message(&self, addresses: &[String]) -> Result<HashMap<String, bool>>;
    /// All v2 conversations.
    async fn list_conversations(&self) -> Result<Vec<Arc<dyn ConversationRef>>>;
    /// Groups matching `params`.
    async fn list_groups(&self, params: &ListGroupsParams) -> Result<Vec<Arc<dyn GroupRef>>>;
    /// Look up a conversation by topic.
    async fn find_conversation(&self, topic: &str) -> Result<Option<Arc<dyn ConversationRef>>>;
    /// Look up a group by id.
    async fn find_group(&self, id: &str) -> Result<Option<Arc<dyn GroupRef>>>;
    /// Find or create a conversation with `peer_address`.
    async fn new_conversation(
        &self,
        peer_address: &str,
        context: Option<ConversationContext>,
    ) -> Result<Arc<dyn ConversationRef>>;
    /// Create a group with the given member addresses.
    async fn create_group(
        &self,
        peer_addresses: &[String],
        options: &CreateGroupOptions,
    ) -> Result<Arc<dyn GroupRef>>;
    /// Pull group welcomes from the network.
    async fn sync_groups(&self) -> Result<()>;

    /// New conversations as they appear.
    async fn stream_conversations(&self) -> Result<EventStream<Arc<dyn ConversationRef>>>;
    /// New groups as they appear.
    async fn stream_groups(&self) -> Result<EventStream<Arc<dyn GroupRef>>>;
    /// Messages across every v2 conversation.
    async fn stream_all_messages(&self) -> Result<EventStream<DecodedMessage>>;
    /// Messages across every group.
    async fn stream_all_group_messages(&self) -> Result<EventStream<DecodedMessage>>;

    /// Consent preferences of this identity.
    fn contacts(&self) -> Arc<dyn Contacts>;

    /// Serialize the identity's keys.
    async fn export_key_bundle(&self) -> Result<Vec<u8>>;
    /// Sign a 32-byte digest with the identity key.
    async fn sign_digest(&self, digest: &[u8]) -> Result<Vec<u8>>;

    /// Release the local database connection (app backgrounded).
    async fn release_db_connection(&self) -> Result<()>;
    /// Reconnect the local database after a release.
    async fn reconnect_db(&self) -> Result<()>;
}

/// Operations shared by conversations and groups.
#[async_trait]
pub trait MessageContainer: Send + Sync {
    /// Cache key: topic for conversations, group id for groups.
    fn id(&self) -> &str;
    /// Network topic.
    fn topic(&self) -> &str;
    /// Creation timestamp in nanoseconds.
    fn created_at_ns(&self) -> i64;

    /// Send encoded content. Returns the message ID.
    async fn send(&self, content: &[u8]) -> Result<String>;
    /// Encrypt content without publishing it.
    async fn prepare_message(&self, content: &[u8]) -> Result<PreparedEnvelope>;
    /// Publish a previously prepared envelope. Returns the message ID.
    async fn send_prepared(&self, envelope: &PreparedEnvelope) -> Result<String>;
    /// Pull new messages from the network.
    async fn sync(&self) -> Result<()>;
    /// Stored messages.
    async fn messages(&self, options: &ListMessagesOptions) -> Result<Vec<DecodedMessage>>;
    /// Messages as they arrive.
    async fn stream_messages(&self) -> Result<EventStream<DecodedMessage>>;
    /// Consent state for this container.
    async fn consent_state(&self) -> Result<ConsentState>;
}

/// A v2 one-to-one conversation.
pub trait ConversationRef: MessageContainer {
    /// The other participant's address.
    fn peer_address(&self) -> &str;
    /// Application context, if any.
    fn context(&self) -> Option<&ConversationContext>;
}

/// A v3 MLS group.
#[async_trait]
pub trait GroupRef: MessageContainer {
    /// Local metadata snapshot.
    fn metadata(&self) -> GroupMetadata;
    /// Whether this client is still a member.
    fn is_active(&self) -> bool;
    /// Inbox that added this client.
    fn added_by_inbox_id(&self) -> String;
    /// Inbox that created the group.
    fn creator_inbox_id(&self) -> String;

    /// Current members.
    async fn members(&self) -> Result<Vec<GroupMember>>;
    /// Add members by address.
    async fn add_members(&self, addresses: &[String]) -> Result<()>;
    /// Remove members by address.
    async fn remove_members(&self, addresses: &[String]) -> Result<()>;
    /// Add members by inbox ID.
    async fn add_members_by_inbox_id(&self, inbox_ids: &[String]) -> Result<()>;
    /// Remove members by inbox ID.
    async fn remove_members_by_inbox_id(&self, inbox_ids: &[String]) -> Result<()>;
    /// Promote to admin.
    async fn add_admin(&self, inbox_id: &str) -> Result<()>;
    /// Demote from admin.
    async fn remove_admin(&self, inbox_id: &str) -> Result<()>;
    /// Promote to super admin.
    async fn add_super_admin(&self, inbox_id: &str) -> Result<()>;
    /// Demote from super admin.
    async fn remove_super_admin(&self, inbox_id: &str) -> Result<()>;
    /// Overwrite a metadata field.
    async fn update_metadata(&self, field: MetadataField, value: &str) -> Result<()>;
    /// Current permission policies.
    async fn permission_policy_set(&self) -> Result<PermissionPolicySet>;
    /// Change one permission policy.
    async fn update_permission_policy(
        &self,
        update: PermissionUpdateType,
        option: PermissionOption,
        field: Option<MetadataField>,
    ) -> Result<()>;
    /// Record consent for this group.
    async fn update_consent_state(&self, state: ConsentState) -> Result<()>;
}

/// Consent preferences of one identity.
#[async_trait]
pub trait Contacts: Send + Sync {
    /// Locally known state for a subject.
    async fn consent_state(&self, kind: ConsentEntityType, value: &str) -> Result<ConsentState>;
    /// Record a state for several subjects.
    async fn set_consent(
        &self,
        kind: ConsentEntityType,
        values: &[String],
        state: ConsentState,
    ) -> Result<()>;
    /// Locally known entries.
    async fn consent_list(&self) -> Result<Vec<ConsentEntry>>;
    /// Pull the authoritative list from the network and return it.
    async fn refresh_consent_list(&self) -> Result<Vec<ConsentEntry>>;
}

/// Conversation-or-group handle kept in the entity cache.
#[derive(Clone)]
pub enum Container {
    /// A v2 conversation.
    Conversation(Arc<dyn ConversationRef>),
    /// A v3 group.
    Group(Arc<dyn GroupRef>),
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Conversation(c) => f.debug_tuple("Conversation").field(&c.id()).finish(),
            Self::Group(g) => f.debug_tuple("Group").field(&g.id()).finish(),
        }
    }
}

/// Forward a [`MessageContainer`] call to whichever variant is present.
macro_rules! delegate {
    ($self:ident, $c:ident => $body:expr) => {
        match $self {
            Self::Conversation($c) => $body,
            Self::Group($c) => $body,
        }
    };
}

impl Container {
    /// Cache key.
    #[must_use]
    pub fn id(&self) -> &str {
        delegate!(self, c => c.id())
    }

    /// Network topic.
    #[must_use]
    pub fn topic(&self) -> &str {
        delegate!(self, c => c.topic())
    }

    /// Creation timestamp in nanoseconds.
    #[must_use]
    pub fn created_at_ns(&self) -> i64 {
        delegate!(self, c => c.created_at_ns())
    }

    /// Whether this is a group.
    #[must_use]
    pub const fn is_group(&self) -> bool {
        matches!(self, Self::Group(_))
    }

    /// The group, if this is one.
    #[must_use]
    pub fn as_group(&self) -> Option<&Arc<dyn GroupRef>> {
        match self {
            Self::Group(g) => Some(g),
            Self::Conversation(_) => None,
        }
    }

    /// The conversation, if this is one.
    #[must_use]
    pub fn as_conversation(&self) -> Option<&Arc<dyn ConversationRef>> {
        match self {
            Self::Conversation(c) => Some(c),
            Self::Group(_) => None,
        }
    }

    /// Send encoded content.
    pub async fn send(&self, content: &[u8]) -> Result<String> {
        delegate!(self, c => c.send(content).await)
    }

    /// Encrypt content without publishing.
    pub async fn prepare_message(&self, content: &[u8]) -> Result<PreparedEnvelope> {
        delegate!(self, c => c.prepare_message(content).await)
    }

    /// Publish a prepared envelope.
    pub async fn send_prepared(&self, envelope: &PreparedEnvelope) -> Result<String> {
        delegate!(self, c => c.send_prepared(envelope).await)
    }

    /// Pull new messages.
    pub async fn sync(&self) -> Result<()> {
        delegate!(self, c => c.sync().await)
    }

    /// Stored messages.
    pub async fn messages(&self, options: &ListMessagesOptions) -> Result<Vec<DecodedMessage>> {
        delegate!(self, c => c.messages(options).await)
    }

    /// Messages as they arrive.
    pub async fn stream_messages(&self) -> Result<EventStream<DecodedMessage>> {
        delegate!(self, c => c.stream_messages().await)
    }

    /// Consent state.
    pub async fn consent_state(&self) -> Result<ConsentState> {
        delegate!(self, c => c.consent_state().await)
    }

    /// Whether two containers are the same handle instance.
    #[must_use]
    pub fn same_handle(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Conversation(a), Self::Conversation(b)) => Arc::ptr_eq(a, b),
            (Self::Group(a), Self::Group(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<Arc<dyn ConversationRef>> for Container {
    fn from(c: Arc<dyn ConversationRef>) -> Self {
        Self::Conversation(c)
    }
}

impl From<Arc<dyn GroupRef>> for Container {
    fn from(g: Arc<dyn GroupRef>) -> Self {
        Self::Group(g)
    }
}
