//! JSON encodings of protocol entities for the host.
//!
//! Timestamps leave the bridge in milliseconds.

use serde::Serialize;
use serde_json::{Value, json};

use crate::content;
use crate::error::Result;
use crate::library::{ClientHandle, Container, ConversationRef, GroupRef};
use crate::types::DecodedMessage;

const NS_PER_MS: i64 = 1_000_000;

/// Identity details returned by every client-creating call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    /// Inbox ID.
    pub inbox_id: String,
    /// Account address.
    pub address: String,
    /// Hex installation ID.
    pub installation_id: String,
    /// Local database path, if any.
    pub db_path: Option<String>,
}

impl ClientInfo {
    /// Snapshot of `client`.
    #[must_use]
    pub fn of(client: &dyn ClientHandle) -> Self {
        Self {
            inbox_id: client.inbox_id().to_owned(),
            address: client.address().to_owned(),
            installation_id: client.installation_id().to_owned(),
            db_path: client.db_path(),
        }
    }
}

/// A v2 conversation.
#[must_use]
pub fn conversation(client_address: &str, c: &dyn ConversationRef) -> Value {
    json!({
        "clientAddress": client_address,
        "topic": c.topic(),
        "peerAddress": c.peer_address(),
        "createdAt": c.created_at_ns() / NS_PER_MS,
        "context": c.context(),
        "version": "v2",
    })
}

/// A group.
#[must_use]
pub fn group(client_inbox_id: &str, g: &dyn GroupRef) -> Value {
    let meta = g.metadata();
    json!({
        "clientInboxId": client_inbox_id,
        "id": g.id(),
        "topic": g.topic(),
        "createdAt": g.created_at_ns() / NS_PER_MS,
        "name": meta.name,
        "imageUrlSquare": meta.image_url_square,
        "description": meta.description,
        "pinnedFrameUrl": meta.pinned_frame_url,
        "isActive": g.is_active(),
        "addedByInboxId": g.added_by_inbox_id(),
        "creatorInboxId": g.creator_inbox_id(),
        "version": "v3",
    })
}

/// Either kind, tagged by `version`.
#[must_use]
pub fn container(client_address: &str, client_inbox_id: &str, c: &Container) -> Value {
    match c {
        Container::Conversation(conv) => conversation(client_address, conv.as_ref()),
        Container::Group(g) => group(client_inbox_id, g.as_ref()),
    }
}

/// A message with its content decoded.
///
/// # Errors
///
/// [`Error::NoMessage`](crate::Error::NoMessage) if the content bytes do not
/// decode.
pub fn message(m: &DecodedMessage) -> Result<Value> {
    let decoded = content::decode(&m.content)?;
    Ok(json!({
        "id": m.id,
        "topic": m.topic,
        "contentTypeId": decoded.content_type_id,
        "content": decoded.content,
        "fallback": decoded.fallback,
        "senderAddress": m.sender_address,
        "senderInboxId": m.sender_inbox_id,
        "sent": m.sent_at_ns / NS_PER_MS,
        "deliveryStatus": m.delivery_status,
    }))
}

/// Encode a listing, dropping messages whose content does not decode.
#[must_use]
pub fn messages(list: &[DecodedMessage]) -> Vec<Value> {
    list.iter()
        .filter_map(|m| match message(m) {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!(message_id = %m.id, error = %e, "skipping undecodable message");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::types::DeliveryStatus;

    fn raw(content: Vec<u8>) -> DecodedMessage {
        DecodedMessage {
            id: "m1".into(),
            topic: "t".into(),
            sender_address: "0xabc".into(),
            sender_inbox_id: "inbox".into(),
            sent_at_ns: 1_700_000_000_123_456_789,
            content,
            delivery_status: DeliveryStatus::Published,
        }
    }

    #[test]
    fn message_carries_decoded_content_and_ms_timestamp() {
        let bytes = content::encode(&json!({ "text": "hi" })).unwrap();
        let v = message(&raw(bytes)).unwrap();
        assert_eq!(v["content"], json!({ "text": "hi" }));
        assert_eq!(v["sent"], 1_700_000_000_123_i64);
        assert_eq!(v["deliveryStatus"], "published");
    }

    #[test]
    fn listing_skips_undecodable_messages() {
        let good = content::encode(&json!({ "text": "ok" })).unwrap();
        let list = [raw(good.clone()), raw(vec![0xff, 0xff]), raw(good)];
        assert!(matches!(message(&list[1]), Err(Error::NoMessage(_))));
        assert_eq!(messages(&list).len(), 2);
    }
}
