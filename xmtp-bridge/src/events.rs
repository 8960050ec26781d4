//! Push-event channel to the host.
//!
//! Delivery is fire-and-forget: [`EventBridge::emit`] never blocks and never
//! fails. Within one listener, events leave in the order the underlying
//! stream produced them.

use std::fmt;
use std::sync::Arc;

use futures::StreamExt;
use serde::{Serialize, Serializer};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::library::EventStream;
use crate::types::PreAction;

/// Named event types the host can receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventName {
    /// The library needs the host to sign a message.
    Sign,
    /// Authentication finished.
    Authed,
    /// A new v2 conversation.
    Conversation,
    /// A new group.
    Group,
    /// A message in any v2 conversation.
    Message,
    /// A message in one subscribed conversation.
    ConversationMessage,
    /// A message in one subscribed group.
    GroupMessage,
    /// A message in any group.
    AllGroupMessage,
    /// A new conversation or group.
    ConversationContainer,
    /// The library is waiting on a pre-action callback.
    PreAction(PreAction),
}

impl EventName {
    /// Host string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sign => "sign",
            Self::Authed => "authed",
            Self::Conversation => "conversation",
            Self::Group => "group",
            Self::Message => "message",
            Self::ConversationMessage => "conversationMessage",
            Self::GroupMessage => "groupMessage",
            Self::AllGroupMessage => "allGroupMessage",
            Self::ConversationContainer => "conversationContainer",
            Self::PreAction(action) => action.as_str(),
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for EventName {
    fn serialize<S: Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_str(self.as_str())
    }
}

/// One notification for the host.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HostEvent {
    /// Event type.
    #[serde(rename = "event")]
    pub name: EventName,
    /// JSON payload.
    pub payload: Value,
}

/// Receives host events. Implementations must not block.
pub trait EventSink: Send + Sync {
    /// Deliver one event.
    fn deliver(&self, event: HostEvent);
}

/// An [`EventSink`] backed by an unbounded Tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<HostEvent>,
}

impl ChannelSink {
    /// Create a sink and the receiver the host drains.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<HostEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn deliver(&self, event: HostEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!("host event receiver closed; event discarded");
        }
    }
}

/// Cloneable emitter shared by the dispatcher and every listener task.
#[derive(Clone)]
pub struct EventBridge {
    sink: Arc<dyn EventSink>,
}

impl fmt::Debug for EventBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBridge").finish_non_exhaustive()
    }
}

impl EventBridge {
    /// Wrap a sink.
    #[must_use]
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self { sink }
    }

    /// Send one event to the host.
    pub fn emit(&self, name: EventName, payload: Value) {
        tracing::trace!(event = %name, "emit");
        self.sink.deliver(HostEvent { name, payload });
    }

    /// Drain `stream`, encoding each item and emitting it as `name`.
    ///
    /// An item whose encoding fails is dropped with a warning and the loop
    /// goes on. A stream error ends the loop; it is not retried.
    pub async fn pump<T, F>(
        self,
        label: String,
        name: EventName,
        mut stream: EventStream<T>,
        mut encode: F,
    ) where
        T: Send + 'static,
        F: FnMut(T) -> Result<Value> + Send + 'static,
    {
        tracing::debug!(subscription = %label, "listener started");
        while let Some(next) = stream.next().await {
            match next {
                Ok(item) => match encode(item) {
                    Ok(payload) => self.emit(name, payload),
                    Err(e) => {
                        tracing::warn!(
                            subscription = %label,
                            error = %e,
                            "dropping item that failed to encode"
                        );
                    }
                },
                Err(e) => {
                    tracing::error!(
                        subscription = %label,
                        error = %e,
                        "stream failed; listener stopped"
                    );
                    return;
                }
            }
        }
        tracing::debug!(subscription = %label, "stream ended");
    }
}

#[cfg(test)]
mod tests {
    use futures::stream;
    use serde_json::json;

    use super::*;
    use crate::error::Error;

    fn items(raw: Vec<Result<i64>>) -> EventStream<i64> {
        Box::pin(stream::iter(raw))
    }

    fn encode_positive(n: i64) -> Result<Value> {
        if n < 0 {
            return Err(Error::NoMessage(format!("negative {n}")));
        }
        Ok(json!(n))
    }

    #[tokio::test]
    async fn bad_item_is_skipped_and_order_kept() {
        let (sink, mut rx) = ChannelSink::new();
        let bridge = EventBridge::new(Arc::new(sink));
        let src = items(vec![Ok(1), Ok(-2), Ok(3)]);
        bridge
            .pump("test".into(), EventName::Message, src, encode_positive)
            .await;

        let mut got = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            assert_eq!(ev.name, EventName::Message);
            got.push(ev.payload);
        }
        assert_eq!(got, vec![json!(1), json!(3)]);
    }

    #[tokio::test]
    async fn stream_error_ends_the_loop() {
        let (sink, mut rx) = ChannelSink::new();
        let bridge = EventBridge::new(Arc::new(sink));
        let src = items(vec![Ok(1), Err(Error::Stream("reset".into())), Ok(2)]);
        bridge
            .pump("test".into(), EventName::Message, src, encode_positive)
            .await;

        assert_eq!(rx.try_recv().map(|e| e.payload).ok(), Some(json!(1)));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn pre_action_events_use_callback_names() {
        let name = EventName::PreAction(PreAction::EnableIdentity);
        assert_eq!(name.as_str(), "preEnableIdentityCallback");
        let ev = HostEvent { name, payload: json!({}) };
        assert_eq!(serde_json::to_value(ev).unwrap()["event"], "preEnableIdentityCallback");
    }
}
