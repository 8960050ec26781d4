//! Content codec: host JSON content objects to protobuf `EncodedContent`
//! bytes and back.
//!
//! The host describes content as a single-key object, e.g. `{"text": "hi"}`
//! or `{"reaction": {...}}`. Anything the codec cannot map is
//! [`Error::NoMessage`].

use std::collections::HashMap;

use prost::Message as ProstMessage;
use serde_json::{Map, Value, json};

use crate::error::{Error, Result};

/// Content type identifier on the XMTP network.
#[derive(Clone, PartialEq, Eq, Hash, ProstMessage)]
pub struct ContentTypeId {
    /// Authority (e.g. `"xmtp.org"`).
    #[prost(string, tag = "1")]
    pub authority_id: String,
    /// Type name (e.g. `"text"`).
    #[prost(string, tag = "2")]
    pub type_id: String,
    /// Major version.
    #[prost(uint32, tag = "3")]
    pub version_major: u32,
    /// Minor version.
    #[prost(uint32, tag = "4")]
    pub version_minor: u32,
}

impl ContentTypeId {
    fn xmtp(type_id: &str, version_major: u32) -> Self {
        Self {
            authority_id: XMTP_ORG.into(),
            type_id: type_id.into(),
            version_major,
            version_minor: 0,
        }
    }

    /// `authority/type:major.minor`.
    #[must_use]
    pub fn display(&self) -> String {
        format!(
            "{}/{}:{}.{}",
            self.authority_id, self.type_id, self.version_major, self.version_minor
        )
    }
}

/// Encoded content envelope.
#[derive(Clone, PartialEq, Eq, ProstMessage)]
pub struct EncodedContent {
    /// Content type identifier.
    #[prost(message, optional, tag = "1")]
    pub r#type: Option<ContentTypeId>,
    /// Encoding parameters (e.g. `encoding=UTF-8`).
    #[prost(map = "string, string", tag = "2")]
    pub parameters: HashMap<String, String>,
    /// Fallback text for clients that cannot decode this content type.
    #[prost(string, optional, tag = "3")]
    pub fallback: Option<String>,
    /// Raw content bytes.
    #[prost(bytes = "vec", tag = "4")]
    pub content: Vec<u8>,
}

/// Reaction payload.
#[derive(Clone, PartialEq, Eq, Hash, ProstMessage)]
pub struct ReactionV2 {
    /// Hex-encoded message ID being reacted to.
    #[prost(string, tag = "1")]
    pub reference: String,
    /// Inbox ID of the sender of the referenced message.
    #[prost(string, tag = "2")]
    pub reference_inbox_id: String,
    /// Reaction action.
    #[prost(enumeration = "ReactionAction", tag = "3")]
    pub action: i32,
    /// The emoji / shortcode / custom string.
    #[prost(string, tag = "4")]
    pub content: String,
    /// Content schema.
    #[prost(enumeration = "ReactionSchema", tag = "5")]
    pub schema: i32,
}

/// Reaction action.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, prost::Enumeration)]
#[repr(i32)]
pub enum ReactionAction {
    /// Unspecified.
    Unspecified = 0,
    /// Reaction added.
    Added = 1,
    /// Reaction removed.
    Removed = 2,
}

/// Reaction content schema.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, prost::Enumeration)]
#[repr(i32)]
pub enum ReactionSchema {
    /// Unspecified.
    Unspecified = 0,
    /// Unicode emoji.
    Unicode = 1,
    /// Shortcode (e.g. ":thumbsup:").
    Shortcode = 2,
    /// Custom string.
    Custom = 3,
}

const XMTP_ORG: &str = "xmtp.org";

impl ReactionAction {
    fn from_host(s: &str) -> Self {
        match s {
            "added" => Self::Added,
            "removed" => Self::Removed,
            _ => Self::Unspecified,
        }
    }

    const fn as_host(self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Removed => "removed",
            Self::Unspecified => "unknown",
        }
    }
}

impl ReactionSchema {
    fn from_host(s: &str) -> Self {
        match s {
            "unicode" => Self::Unicode,
            "shortcode" => Self::Shortcode,
            "custom" => Self::Custom,
            _ => Self::Unspecified,
        }
    }

    const fn as_host(self) -> &'static str {
        match self {
            Self::Unicode => "unicode",
            Self::Shortcode => "shortcode",
            Self::Custom => "custom",
            Self::Unspecified => "unknown",
        }
    }
}

/// A message content decoded for the host.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedContent {
    /// `authority/type:major.minor`, empty if the envelope carried no type.
    pub content_type_id: String,
    /// Host JSON content object.
    pub content: Value,
    /// Fallback text, if any.
    pub fallback: Option<String>,
}

fn no_message(reason: impl Into<String>) -> Error {
    Error::NoMessage(reason.into())
}

fn str_field<'a>(obj: &'a Value, key: &str) -> Result<&'a str> {
    obj.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| no_message(format!("missing string field `{key}`")))
}

fn utf8(type_id: &str, text: &str) -> EncodedContent {
    EncodedContent {
        r#type: Some(ContentTypeId::xmtp(type_id, 1)),
        parameters: HashMap::from([("encoding".into(), "UTF-8".into())]),
        fallback: None,
        content: text.as_bytes().to_vec(),
    }
}

fn to_envelope(content: &Value) -> Result<EncodedContent> {
    let obj = content
        .as_object()
        .filter(|o| o.len() == 1)
        .ok_or_else(|| no_message("content must be an object with exactly one key"))?;
    let Some((kind, body)) = obj.iter().next() else {
        return Err(no_message("empty content"));
    };

    match kind.as_str() {
        "text" => body
            .as_str()
            .map(|s| utf8("text", s))
            .ok_or_else(|| no_message("text content must be a string")),
        "markdown" => body
            .as_str()
            .map(|s| utf8("markdown", s))
            .ok_or_else(|| no_message("markdown content must be a string")),
        "reaction" => {
            let emoji = str_field(body, "content")?;
            let reaction = ReactionV2 {
                reference: str_field(body, "reference")?.to_owned(),
                reference_inbox_id: body
                    .get("referenceInboxId")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_owned(),
                action: ReactionAction::from_host(str_field(body, "action")?) as i32,
                content: emoji.to_owned(),
                schema: ReactionSchema::from_host(
                    body.get("schema").and_then(Value::as_str).unwrap_or("unicode"),
                ) as i32,
            };
            Ok(EncodedContent {
                r#type: Some(ContentTypeId::xmtp("reaction", 2)),
                parameters: HashMap::new(),
                fallback: Some(format!("Reacted with \"{emoji}\" to an earlier message")),
                content: reaction.encode_to_vec(),
            })
        }
        "reply" => {
            let reference = str_field(body, "reference")?;
            let inner = body
                .get("content")
                .ok_or_else(|| no_message("reply without content"))?;
            let inner = to_envelope(inner)?;
            Ok(EncodedContent {
                r#type: Some(ContentTypeId::xmtp("reply", 1)),
                parameters: HashMap::from([("reference".into(), reference.to_owned())]),
                fallback: Some("Replied to an earlier message".into()),
                content: inner.encode_to_vec(),
            })
        }
        "readReceipt" => Ok(EncodedContent {
            r#type: Some(ContentTypeId::xmtp("readReceipt", 1)),
            ..EncodedContent::default()
        }),
        other => Err(no_message(format!("unsupported content type `{other}`"))),
    }
}

/// Encode a host content object into protobuf bytes ready to send.
///
/// # Errors
///
/// Returns [`Error::NoMessage`] for content the codec does not support.
pub fn encode(content: &Value) -> Result<Vec<u8>> {
    to_envelope(content).map(|ec| ec.encode_to_vec())
}

fn from_envelope(ec: EncodedContent) -> Result<Value> {
    let type_id = ec.r#type.as_ref().map(|t| t.type_id.as_str());
    let text = |bytes: Vec<u8>| {
        String::from_utf8(bytes).map_err(|e| no_message(format!("invalid UTF-8: {e}")))
    };

    let mut obj = Map::new();
    match type_id {
        Some("text") => {
            obj.insert("text".into(), text(ec.content)?.into());
        }
        Some("markdown") => {
            obj.insert("markdown".into(), text(ec.content)?.into());
        }
        Some("reaction") => {
            let r = ReactionV2::decode(ec.content.as_slice())
                .map_err(|e| no_message(format!("reaction decode: {e}")))?;
            let action = ReactionAction::try_from(r.action).unwrap_or(ReactionAction::Unspecified);
            let schema = ReactionSchema::try_from(r.schema).unwrap_or(ReactionSchema::Unspecified);
            obj.insert(
                "reaction".into(),
                json!({
                    "reference": r.reference,
                    "referenceInboxId": r.reference_inbox_id,
                    "action": action.as_host(),
                    "schema": schema.as_host(),
                    "content": r.content,
                }),
            );
        }
        Some("reply") => {
            let inner = EncodedContent::decode(ec.content.as_slice())
                .map_err(|e| no_message(format!("reply decode: {e}")))?;
            let reference = ec.parameters.get("reference").cloned().unwrap_or_default();
            obj.insert(
                "reply".into(),
                json!({ "reference": reference, "content": from_envelope(inner)? }),
            );
        }
        Some("readReceipt") => {
            obj.insert("readReceipt".into(), json!({}));
        }
        _ => {
            let ct = ec.r#type.as_ref().map(ContentTypeId::display).unwrap_or_default();
            obj.insert("unknown".into(), json!({ "contentTypeId": ct }));
        }
    }
    Ok(Value::Object(obj))
}

/// Decode raw message content bytes for the host.
///
/// # Errors
///
/// Returns [`Error::NoMessage`] if the bytes are not a decodable envelope.
pub fn decode(raw: &[u8]) -> Result<DecodedContent> {
    let ec = EncodedContent::decode(raw).map_err(|e| no_message(format!("protobuf decode: {e}")))?;
    let content_type_id = ec.r#type.as_ref().map(ContentTypeId::display).unwrap_or_default();
    let fallback = ec.fallback.clone();
    Ok(DecodedContent {
        content_type_id,
        content: from_envelope(ec)?,
        fallback,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_survives_the_wire() {
        let bytes = encode(&json!({ "text": "gm" })).unwrap();
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.content_type_id, "xmtp.org/text:1.0");
        assert_eq!(decoded.content, json!({ "text": "gm" }));
    }

    #[test]
    fn reply_nests_inner_content() {
        let bytes = encode(&json!({
            "reply": { "reference": "abcd", "content": { "reaction": {
                "reference": "abcd", "action": "added", "content": "👍"
            }}}
        }))
        .unwrap();
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.fallback.as_deref(), Some("Replied to an earlier message"));
        let reaction = &decoded.content["reply"]["content"]["reaction"];
        assert_eq!(reaction["action"], "added");
        assert_eq!(reaction["schema"], "unicode");
    }

    #[test]
    fn unsupported_or_garbled_content_is_no_message() {
        assert!(matches!(encode(&json!({ "sticker": 1 })), Err(Error::NoMessage(_))));
        assert!(matches!(encode(&json!({ "text": 5 })), Err(Error::NoMessage(_))));
        assert!(matches!(decode(&[0xff, 0xff, 0xff]), Err(Error::NoMessage(_))));
    }

    #[test]
    fn unknown_type_keeps_fallback() {
        let ec = EncodedContent {
            r#type: Some(ContentTypeId {
                authority_id: "example.com".into(),
                type_id: "poll".into(),
                version_major: 1,
                version_minor: 2,
            }),
            fallback: Some("a poll".into()),
            ..EncodedContent::default()
        };
        let decoded = decode(&ec.encode_to_vec()).unwrap();
        assert_eq!(
            decoded.content,
            json!({ "unknown": { "contentTypeId": "example.com/poll:1.2" } })
        );
        assert_eq!(decoded.fallback.as_deref(), Some("a poll"));
    }
}
