use super::Bridge;
use crate::error::Result;
use crate::types::{ConsentEntityType, ConsentEntry, ConsentState};

impl Bridge {
    async fn consent_of(
        &self,
        identity: &str,
        kind: ConsentEntityType,
        value: &str,
    ) -> Result<ConsentState> {
        let client = self.lease(identity).await?;
        client.contacts().consent_state(kind, value).await
    }

    async fn set_consent(
        &self,
        identity: &str,
        kind: ConsentEntityType,
        values: &[String],
        state: ConsentState,
    ) -> Result<()> {
        let client = self.lease(identity).await?;
        client.contacts().set_consent(kind, values, state).await?;
        tracing::debug!(
            inbox_id = client.inbox_id(),
            %kind,
            %state,
            count = values.len(),
            "consent recorded"
        );
        Ok(())
    }

    // ── Addresses ────────────────────────────────────────────────────────────

    /// Whether `address` is explicitly allowed.
    ///
    /// # Errors
    ///
    /// [`Error::NoClient`](crate::Error::NoClient),
    /// [`Error::Paused`](crate::Error::Paused) or a library failure. Every
    /// consent operation fails the same way.
    pub async fn is_allowed(&self, identity: &str, address: &str) -> Result<bool> {
        let state = self
            .consent_of(identity, ConsentEntityType::Address, address)
            .await?;
        Ok(state == ConsentState::Allowed)
    }

    /// Whether `address` is explicitly denied.
    ///
    /// # Errors
    ///
    /// As [`is_allowed`](Self::is_allowed).
    pub async fn is_denied(&self, identity: &str, address: &str) -> Result<bool> {
        let state = self
            .consent_of(identity, ConsentEntityType::Address, address)
            .await?;
        Ok(state == ConsentState::Denied)
    }

    /// Allow `addresses`.
    ///
    /// # Errors
    ///
    /// As [`is_allowed`](Self::is_allowed).
    pub async fn allow(&self, identity: &str, addresses: &[String]) -> Result<()> {
        self.set_consent(identity, ConsentEntityType::Address, addresses, ConsentState::Allowed)
            .await
    }

    /// Deny `addresses`.
    ///
    /// # Errors
    ///
    /// As [`is_allowed`](Self::is_allowed).
    pub async fn deny(&self, identity: &str, addresses: &[String]) -> Result<()> {
        self.set_consent(identity, ConsentEntityType::Address, addresses, ConsentState::Denied)
            .await
    }

    // ── Groups and inboxes ───────────────────────────────────────────────────

    /// Allow `group_ids`.
    ///
    /// # Errors
    ///
    /// As [`is_allowed`](Self::is_allowed).
    pub async fn allow_groups(&self, identity: &str, group_ids: &[String]) -> Result<()> {
        self.set_consent(identity, ConsentEntityType::GroupId, group_ids, ConsentState::Allowed)
            .await
    }

    /// Deny `group_ids`.
    ///
    /// # Errors
    ///
    /// As [`is_allowed`](Self::is_allowed).
    pub async fn deny_groups(&self, identity: &str, group_ids: &[String]) -> Result<()> {
        self.set_consent(identity, ConsentEntityType::GroupId, group_ids, ConsentState::Denied)
            .await
    }

    /// Allow `inbox_ids`.
    ///
    /// # Errors
    ///
    /// As [`is_allowed`](Self::is_allowed).
    pub async fn allow_inboxes(&self, identity: &str, inbox_ids: &[String]) -> Result<()> {
        self.set_consent(identity, ConsentEntityType::InboxId, inbox_ids, ConsentState::Allowed)
            .await
    }

    /// Deny `inbox_ids`.
    ///
    /// # Errors
    ///
    /// As [`is_allowed`](Self::is_allowed).
    pub async fn deny_inboxes(&self, identity: &str, inbox_ids: &[String]) -> Result<()> {
        self.set_consent(identity, ConsentEntityType::InboxId, inbox_ids, ConsentState::Denied)
            .await
    }

    /// Whether the group is explicitly allowed.
    ///
    /// # Errors
    ///
    /// As [`is_allowed`](Self::is_allowed).
    pub async fn is_group_allowed(&self, identity: &str, group_id: &str) -> Result<bool> {
        let state = self
            .consent_of(identity, ConsentEntityType::GroupId, group_id)
            .await?;
        Ok(state == ConsentState::Allowed)
    }

    /// Whether the group is explicitly denied.
    ///
    /// # Errors
    ///
    /// As [`is_allowed`](Self::is_allowed).
    pub async fn is_group_denied(&self, identity: &str, group_id: &str) -> Result<bool> {
        let state = self
            .consent_of(identity, ConsentEntityType::GroupId, group_id)
            .await?;
        Ok(state == ConsentState::Denied)
    }

    /// Whether the inbox is explicitly allowed.
    ///
    /// # Errors
    ///
    /// As [`is_allowed`](Self::is_allowed).
    pub async fn is_inbox_allowed(&self, identity: &str, inbox_id: &str) -> Result<bool> {
        let state = self
            .consent_of(identity, ConsentEntityType::InboxId, inbox_id)
            .await?;
        Ok(state == ConsentState::Allowed)
    }

    /// Whether the inbox is explicitly denied.
    ///
    /// # Errors
    ///
    /// As [`is_allowed`](Self::is_allowed).
    pub async fn is_inbox_denied(&self, identity: &str, inbox_id: &str) -> Result<bool> {
        let state = self
            .consent_of(identity, ConsentEntityType::InboxId, inbox_id)
            .await?;
        Ok(state == ConsentState::Denied)
    }

    // ── Lists ────────────────────────────────────────────────────────────────

    /// Pull the network consent list and return it.
    ///
    /// # Errors
    ///
    /// As [`is_allowed`](Self::is_allowed).
    pub async fn refresh_consent_list(&self, identity: &str) -> Result<Vec<ConsentEntry>> {
        let client = self.lease(identity).await?;
        client.contacts().refresh_consent_list().await
    }

    /// Locally known consent entries.
    ///
    /// # Errors
    ///
    /// As [`is_allowed`](Self::is_allowed).
    pub async fn consent_list(&self, identity: &str) -> Result<Vec<ConsentEntry>> {
        let client = self.lease(identity).await?;
        client.contacts().consent_list().await
    }

    /// Consent state of a conversation, or of a group by id.
    ///
    /// # Errors
    ///
    /// [`Error::ConversationNotFound`](crate::Error::ConversationNotFound)
    /// plus the usual client failures.
    pub async fn conversation_consent_state(
        &self,
        identity: &str,
        topic: &str,
    ) -> Result<ConsentState> {
        let client = self.lease(identity).await?;
        self.container(&client, topic).await?.consent_state().await
    }

    /// Consent state of a group.
    ///
    /// # Errors
    ///
    /// [`Error::GroupNotFound`](crate::Error::GroupNotFound),
    /// [`Error::MlsNotEnabled`](crate::Error::MlsNotEnabled) plus the usual
    /// client failures.
    pub async fn group_consent_state(&self, identity: &str, id: &str) -> Result<ConsentState> {
        let client = self.lease(identity).await?;
        self.group(&client, id).await?.consent_state().await
    }

    /// Record consent for a group.
    ///
    /// # Errors
    ///
    /// As [`group_consent_state`](Self::group_consent_state).
    pub async fn update_group_consent(
        &self,
        identity: &str,
        id: &str,
        state: ConsentState,
    ) -> Result<()> {
        let client = self.lease(identity).await?;
        self.group(&client, id)
            .await?
            .update_consent_state(state)
            .await
    }
}
