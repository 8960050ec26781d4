use serde_json::Value;

use super::{Bridge, require_mls};
use crate::codec;
use crate::content;
use crate::error::{Error, Result};
use crate::library::Container;
use crate::prepared::PreparedMessage;
use crate::types::{
    ConversationContext, CreateGroupOptions, ListGroupsParams, ListMessagesOptions,
};

impl Bridge {
    /// Every v2 conversation of `identity`. Results are cached.
    ///
    /// # Errors
    ///
    /// [`Error::NoClient`], [`Error::Paused`] or a library failure.
    pub async fn list_conversations(&self, identity: &str) -> Result<Vec<Value>> {
        let client = self.lease(identity).await?;
        let list = client.list_conversations().await?;
        Ok(list
            .into_iter()
            .map(|c| {
                let v = codec::conversation(client.address(), c.as_ref());
                self.remember(&client, Container::Conversation(c));
                v
            })
            .collect())
    }

    /// Groups of `identity` matching `params`. Results are cached.
    ///
    /// # Errors
    ///
    /// [`Error::MlsNotEnabled`] plus the usual client failures.
    pub async fn list_groups(&self, identity: &str, params: &ListGroupsParams) -> Result<Vec<Value>> {
        let client = self.lease(identity).await?;
        require_mls(&client)?;
        let list = client.list_groups(params).await?;
        Ok(list
            .into_iter()
            .map(|g| {
                let v = codec::group(client.inbox_id(), g.as_ref());
                self.remember(&client, Container::Group(g));
                v
            })
            .collect())
    }

    /// Conversations and, when MLS is on, groups, oldest first.
    ///
    /// # Errors
    ///
    /// [`Error::NoClient`], [`Error::Paused`] or a library failure.
    pub async fn list_all(&self, identity: &str) -> Result<Vec<Value>> {
        let client = self.lease(identity).await?;
        let mut all: Vec<Container> = client
            .list_conversations()
            .await?
            .into_iter()
            .map(Container::Conversation)
            .collect();
        if client.mls_enabled() {
            let groups = client.list_groups(&ListGroupsParams::default()).await?;
            all.extend(groups.into_iter().map(Container::Group));
        }
        all.sort_by_key(Container::created_at_ns);

        Ok(all
            .into_iter()
            .map(|c| {
                let v = codec::container(client.address(), client.inbox_id(), &c);
                self.remember(&client, c);
                v
            })
            .collect())
    }

    /// Find or start a conversation with `peer_address`.
    ///
    /// # Errors
    ///
    /// [`Error::NoClient`], [`Error::Paused`] or a library failure.
    pub async fn create_conversation(
        &self,
        identity: &str,
        peer_address: &str,
        context: Option<ConversationContext>,
    ) -> Result<Value> {
        let client = self.lease(identity).await?;
        let conv = client.new_conversation(peer_address, context).await?;
        let v = codec::conversation(client.address(), conv.as_ref());
        self.remember(&client, Container::Conversation(conv));
        Ok(v)
    }

    /// Create a group with `peer_addresses`.
    ///
    /// # Errors
    ///
    /// [`Error::MlsNotEnabled`] plus the usual client failures.
    pub async fn create_group(
        &self,
        identity: &str,
        peer_addresses: &[String],
        options: &CreateGroupOptions,
    ) -> Result<Value> {
        let client = self.lease(identity).await?;
        require_mls(&client)?;
        let group = client.create_group(peer_addresses, options).await?;
        let v = codec::group(client.inbox_id(), group.as_ref());
        self.remember(&client, Container::Group(group));
        Ok(v)
    }

    /// Look a conversation up by topic. `None` when it does not exist.
    ///
    /// # Errors
    ///
    /// [`Error::NoClient`], [`Error::Paused`] or a library failure.
    pub async fn find_conversation(&self, identity: &str, topic: &str) -> Result<Option<Value>> {
        let client = self.lease(identity).await?;
        match self.container(&client, topic).await {
            Ok(Container::Conversation(c)) => {
                Ok(Some(codec::conversation(client.address(), c.as_ref())))
            }
            Ok(Container::Group(_)) | Err(Error::ConversationNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Look a group up by id. `None` when it does not exist.
    ///
    /// # Errors
    ///
    /// [`Error::MlsNotEnabled`] plus the usual client failures.
    pub async fn find_group(&self, identity: &str, id: &str) -> Result<Option<Value>> {
        let client = self.lease(identity).await?;
        match self.group(&client, id).await {
            Ok(g) => Ok(Some(codec::group(client.inbox_id(), g.as_ref()))),
            Err(Error::GroupNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Pull group welcomes.
    ///
    /// # Errors
    ///
    /// [`Error::MlsNotEnabled`] plus the usual client failures.
    pub async fn sync_groups(&self, identity: &str) -> Result<()> {
        let client = self.lease(identity).await?;
        require_mls(&client)?;
        client.sync_groups().await
    }

    /// Pull new messages of one group.
    ///
    /// # Errors
    ///
    /// [`Error::GroupNotFound`], [`Error::MlsNotEnabled`] plus the usual
    /// client failures.
    pub async fn sync_group(&self, identity: &str, id: &str) -> Result<()> {
        let client = self.lease(identity).await?;
        self.group(&client, id).await?.sync().await
    }

    /// Send host content to a conversation topic or group id. Returns the
    /// message id.
    ///
    /// # Errors
    ///
    /// [`Error::NoMessage`] for content the codec cannot encode,
    /// [`Error::ConversationNotFound`] for an unknown id.
    pub async fn send_message(&self, identity: &str, id: &str, content: &Value) -> Result<String> {
        let bytes = content::encode(content)?;
        let client = self.lease(identity).await?;
        self.container(&client, id).await?.send(&bytes).await
    }

    /// Encrypt content now and store it for [`send_prepared_message`].
    ///
    /// [`send_prepared_message`]: Self::send_prepared_message
    ///
    /// # Errors
    ///
    /// As [`send_message`](Self::send_message), plus filesystem failures.
    pub async fn prepare_message(
        &self,
        identity: &str,
        id: &str,
        content: &Value,
    ) -> Result<PreparedMessage> {
        let bytes = content::encode(content)?;
        let client = self.lease(identity).await?;
        let container = self.container(&client, id).await?;
        let envelope = container.prepare_message(&bytes).await?;
        self.prepared.save(container.id(), &envelope).await
    }

    /// Publish a stored preparation and delete its file. Returns the
    /// message id.
    ///
    /// # Errors
    ///
    /// [`Error::BadPreparation`] when the file is missing or corrupt.
    pub async fn send_prepared_message(
        &self,
        identity: &str,
        prepared: &PreparedMessage,
    ) -> Result<String> {
        let client = self.lease(identity).await?;
        let (container_id, envelope) = self.prepared.load(prepared).await?;
        let container = self.container(&client, &container_id).await?;
        let message_id = container.send_prepared(&envelope).await?;
        self.prepared.remove(&prepared.message_id).await?;
        Ok(message_id)
    }

    /// Stored messages of a conversation or group.
    ///
    /// # Errors
    ///
    /// [`Error::ConversationNotFound`] plus the usual client failures.
    pub async fn conversation_messages(
        &self,
        identity: &str,
        topic: &str,
        options: &ListMessagesOptions,
    ) -> Result<Vec<Value>> {
        let client = self.lease(identity).await?;
        let list = self.container(&client, topic).await?.messages(options).await?;
        Ok(codec::messages(&list))
    }

    /// Stored messages of a group.
    ///
    /// # Errors
    ///
    /// [`Error::GroupNotFound`], [`Error::MlsNotEnabled`] plus the usual
    /// client failures.
    pub async fn group_messages(
        &self,
        identity: &str,
        id: &str,
        options: &ListMessagesOptions,
    ) -> Result<Vec<Value>> {
        let client = self.lease(identity).await?;
        let list = self.group(&client, id).await?.messages(options).await?;
        Ok(codec::messages(&list))
    }
}
