use std::sync::Arc;

use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt, stream};
use serde_json::json;

use super::{Bridge, require_mls};
use crate::codec;
use crate::error::Result;
use crate::events::EventName;
use crate::library::{Container, EventStream};
use crate::registry::{EntityKey, SubscriptionKey, SubscriptionKind};

impl Bridge {
    /// Start the listener for `(kind, identity[, entity])`, replacing any
    /// listener already on that key. `entity` is the topic or group id for
    /// the per-entity kinds.
    ///
    /// The stream is opened before the listener is registered, so opening
    /// errors reach the caller. Errors after that only end the listener.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`](crate::Error::InvalidArgument) for a
    /// missing or superfluous entity, lookup failures for the entity, and
    /// the usual client failures.
    pub async fn subscribe(
        &self,
        kind: SubscriptionKind,
        identity: &str,
        entity: Option<&str>,
    ) -> Result<u64> {
        let client = self.lease(identity).await?;
        let inbox_id = client.inbox_id().to_owned();
        let address = client.address().to_owned();
        let key = SubscriptionKey::new(kind, inbox_id.as_str(), entity)?;
        let label = key.to_string();
        let events = self.events.clone();

        let body: BoxFuture<'static, ()> = match kind {
            SubscriptionKind::Conversations => {
                let stream = client.stream_conversations().await?;
                let cache = Arc::clone(&self.cache);
                events
                    .pump(label, EventName::Conversation, stream, move |c| {
                        let payload = json!({
                            "inboxId": inbox_id,
                            "conversation": codec::conversation(&address, c.as_ref()),
                        });
                        cache.put(
                            EntityKey::new(inbox_id.as_str(), c.id()),
                            Container::Conversation(c),
                        );
                        Ok(payload)
                    })
                    .boxed()
            }
            SubscriptionKind::Groups => {
                require_mls(&client)?;
                let stream = client.stream_groups().await?;
                let cache = Arc::clone(&self.cache);
                events
                    .pump(label, EventName::Group, stream, move |g| {
                        let payload = json!({
                            "inboxId": inbox_id,
                            "group": codec::group(&inbox_id, g.as_ref()),
                        });
                        cache.put(EntityKey::new(inbox_id.as_str(), g.id()), Container::Group(g));
                        Ok(payload)
                    })
                    .boxed()
            }
            SubscriptionKind::All => {
                let conversations = client
                    .stream_conversations()
                    .await?
                    .map(|r| r.map(Container::Conversation));
                let merged: EventStream<Container> = if client.mls_enabled() {
                    let groups = client
                        .stream_groups()
                        .await?
                        .map(|r| r.map(Container::Group));
                    Box::pin(stream::select(conversations, groups))
                } else {
                    Box::pin(conversations)
                };
                let cache = Arc::clone(&self.cache);
                events
                    .pump(label, EventName::ConversationContainer, merged, move |c| {
                        let payload = json!({
                            "inboxId": inbox_id,
                            "conversationContainer": codec::container(&address, &inbox_id, &c),
                        });
                        cache.put(EntityKey::new(inbox_id.as_str(), c.id()), c);
                        Ok(payload)
                    })
                    .boxed()
            }
            SubscriptionKind::AllMessages => {
                let stream = client.stream_all_messages().await?;
                events
                    .pump(label, EventName::Message, stream, move |m| {
                        Ok(json!({ "inboxId": inbox_id, "message": codec::message(&m)? }))
                    })
                    .boxed()
            }
            SubscriptionKind::AllGroupMessages => {
                require_mls(&client)?;
                let stream = client.stream_all_group_messages().await?;
                events
                    .pump(label, EventName::AllGroupMessage, stream, move |m| {
                        Ok(json!({ "inboxId": inbox_id, "message": codec::message(&m)? }))
                    })
                    .boxed()
            }
            SubscriptionKind::ConversationMessages => {
                let topic = key.entity().unwrap_or_default().to_owned();
                let stream = self
                    .container(&client, &topic)
                    .await?
                    .stream_messages()
                    .await?;
                events
                    .pump(label, EventName::ConversationMessage, stream, move |m| {
                        Ok(json!({
                            "inboxId": inbox_id,
                            "message": codec::message(&m)?,
                            "topic": topic,
                        }))
                    })
                    .boxed()
            }
            SubscriptionKind::GroupMessages => {
                let group_id = key.entity().unwrap_or_default().to_owned();
                let stream = self
                    .group(&client, &group_id)
                    .await?
                    .stream_messages()
                    .await?;
                events
                    .pump(label, EventName::GroupMessage, stream, move |m| {
                        Ok(json!({
                            "inboxId": inbox_id,
                            "message": codec::message(&m)?,
                            "groupId": group_id,
                        }))
                    })
                    .boxed()
            }
        };

        // Keep the lease until the listener is registered so a concurrent
        // teardown sees it. The body itself never holds the gate.
        let id = self.subscriptions.start(key, body).await;
        drop(client);
        Ok(id)
    }

    /// Stop the listener for `(kind, identity[, entity])`. Returns whether
    /// one was running. Works while the identity is paused.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`](crate::Error::InvalidArgument) for a
    /// missing or superfluous entity.
    pub async fn unsubscribe(
        &self,
        kind: SubscriptionKind,
        identity: &str,
        entity: Option<&str>,
    ) -> Result<bool> {
        let key = self.subscription_key(kind, identity, entity)?;
        Ok(self.subscriptions.stop(&key).await)
    }

    /// Whether a live listener exists for `(kind, identity[, entity])`.
    ///
    /// # Errors
    ///
    /// As [`unsubscribe`](Self::unsubscribe).
    pub fn is_subscribed(
        &self,
        kind: SubscriptionKind,
        identity: &str,
        entity: Option<&str>,
    ) -> Result<bool> {
        let key = self.subscription_key(kind, identity, entity)?;
        Ok(self.subscriptions.is_active(&key))
    }

    /// Key under the canonical inbox id when `identity` is registered.
    fn subscription_key(
        &self,
        kind: SubscriptionKind,
        identity: &str,
        entity: Option<&str>,
    ) -> Result<SubscriptionKey> {
        let owner = self.identities.get(identity).map_or_else(
            || identity.to_owned(),
            |e| e.handle().inbox_id().to_owned(),
        );
        SubscriptionKey::new(kind, owner, entity)
    }
}
