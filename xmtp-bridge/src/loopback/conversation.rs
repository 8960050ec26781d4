use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use super::client::ClientCore;
use super::keccak;
use crate::error::Result;
use crate::library::{ConversationRef, EventStream, MessageContainer};
use crate::types::{
    ConsentEntityType, ConsentState, ConversationContext, DecodedMessage, ListMessagesOptions,
    PreparedEnvelope,
};

/// Deterministic topic of the conversation between two inboxes, optionally
/// scoped by an application conversation id.
pub(super) fn topic_for(a: &str, b: &str, conversation_id: Option<&str>) -> String {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    let digest = keccak(&[
        lo.as_bytes(),
        hi.as_bytes(),
        conversation_id.unwrap_or_default().as_bytes(),
    ]);
    format!("/xmtp/0/m-{}/proto", hex::encode(&digest[..16]))
}

/// Network-side record of a one-to-one conversation.
pub(super) struct ConversationState {
    topic: String,
    members: [String; 2],
    created_at_ns: i64,
    context: Option<ConversationContext>,
}

impl ConversationState {
    pub(super) const fn new(
        topic: String,
        members: [String; 2],
        created_at_ns: i64,
        context: Option<ConversationContext>,
    ) -> Self {
        Self {
            topic,
            members,
            created_at_ns,
            context,
        }
    }

    pub(super) fn has_member(&self, inbox_id: &str) -> bool {
        self.members.iter().any(|m| m == inbox_id)
    }

    pub(super) const fn created_at_ns(&self) -> i64 {
        self.created_at_ns
    }

    fn peer_of(&self, inbox_id: &str) -> &str {
        if self.members[0] == inbox_id {
            &self.members[1]
        } else {
            &self.members[0]
        }
    }
}

/// One client's view of a conversation.
pub(super) struct LoopbackConversation {
    core: Arc<ClientCore>,
    state: Arc<ConversationState>,
    peer_address: String,
}

impl fmt::Debug for LoopbackConversation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopbackConversation")
            .field("topic", &self.state.topic)
            .field("peer_address", &self.peer_address)
            .finish_non_exhaustive()
    }
}

impl LoopbackConversation {
    pub(super) fn new(core: Arc<ClientCore>, state: Arc<ConversationState>) -> Self {
        let peer_address = core.net().address_of(state.peer_of(core.inbox_id()));
        Self {
            core,
            state,
            peer_address,
        }
    }
}

#[async_trait]
impl MessageContainer for LoopbackConversation {
    fn id(&self) -> &str {
        &self.state.topic
    }

    fn topic(&self) -> &str {
        &self.state.topic
    }

    fn created_at_ns(&self) -> i64 {
        self.state.created_at_ns
    }

    async fn send(&self, content: &[u8]) -> Result<String> {
        self.core.check()?;
        Ok(self.core.send(&self.state.topic, None, content))
    }

    async fn prepare_message(&self, content: &[u8]) -> Result<PreparedEnvelope> {
        self.core.check()?;
        Ok(self.core.seal(&self.state.topic, content))
    }

    async fn send_prepared(&self, envelope: &PreparedEnvelope) -> Result<String> {
        self.core.check()?;
        self.core.publish_sealed(&self.state.topic, None, envelope)
    }

    async fn sync(&self) -> Result<()> {
        self.core.check()
    }

    async fn messages(&self, options: &ListMessagesOptions) -> Result<Vec<DecodedMessage>> {
        self.core.check()?;
        Ok(self.core.stored(&self.state.topic, options))
    }

    async fn stream_messages(&self) -> Result<EventStream<DecodedMessage>> {
        self.core.check()?;
        Ok(self.core.stream_topic(&self.state.topic))
    }

    async fn consent_state(&self) -> Result<ConsentState> {
        self.core.check()?;
        Ok(self
            .core
            .local_consent(ConsentEntityType::Address, &self.peer_address))
    }
}

impl ConversationRef for LoopbackConversation {
    fn peer_address(&self) -> &str {
        &self.peer_address
    }

    fn context(&self) -> Option<&ConversationContext> {
        self.state.context.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_is_symmetric_and_scoped_by_context() {
        let ab = topic_for("alice", "bob", None);
        assert_eq!(ab, topic_for("bob", "alice", None));
        assert_ne!(ab, topic_for("alice", "bob", Some("invoice-7")));
        assert!(ab.starts_with("/xmtp/0/m-") && ab.ends_with("/proto"));
    }
}
