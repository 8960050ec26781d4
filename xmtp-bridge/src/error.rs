//! Unified error types for the bridge.

use serde_json::{Value, json};

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for the bridge.
///
/// Dispatcher failures surface to the host as a failed call carrying
/// [`code`](Self::code). Listener failures never reach the host this way;
/// they are logged and end the affected subscription only.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No client is registered for the identity.
    #[error("no client registered for {0}")]
    NoClient(String),

    /// No conversation could be resolved for the topic.
    #[error("conversation not found: {0}")]
    ConversationNotFound(String),

    /// No group could be resolved for the id.
    #[error("group not found: {0}")]
    GroupNotFound(String),

    /// A message payload was malformed or could not be decoded.
    #[error("no message: {0}")]
    NoMessage(String),

    /// An exported key bundle could not be parsed.
    #[error("invalid key bundle")]
    InvalidKeyBundle,

    /// A digest to sign was malformed.
    #[error("invalid digest")]
    InvalidDigest,

    /// A prepared-message file was missing or corrupt.
    #[error("bad preparation: {0}")]
    BadPreparation(String),

    /// A permission option string is not recognised.
    #[error("invalid permission option: {0}")]
    InvalidPermissionOption(String),

    /// A group operation was requested on a client created without MLS.
    #[error("groups require a client created with enableV3")]
    MlsNotEnabled,

    /// An argument passed to the bridge was invalid.
    #[error("{0}")]
    InvalidArgument(String),

    /// The host called an operation that does not exist.
    #[error("unknown method: {0}")]
    UnknownMethod(String),

    /// An error originating from the wrapped messaging library.
    #[error("library: {0}")]
    Library(String),

    /// The identity's local database connection is released.
    #[error("client {0} is paused; reconnect the local database first")]
    Paused(String),

    /// The host did not answer a signature or callback request in time.
    #[error("timed out waiting for {0}")]
    Timeout(String),

    /// A pending wait was abandoned before it resolved.
    #[error("{0} was cancelled")]
    Cancelled(String),

    /// An event stream failed.
    #[error("stream: {0}")]
    Stream(String),

    /// Filesystem access failed.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Stable machine-readable code reported to the host.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::NoClient(_) => "NoClient",
            Self::ConversationNotFound(_) => "ConversationNotFound",
            Self::GroupNotFound(_) => "GroupNotFound",
            Self::NoMessage(_) => "NoMessage",
            Self::InvalidKeyBundle => "InvalidKeyBundle",
            Self::InvalidDigest => "InvalidDigest",
            Self::BadPreparation(_) => "BadPreparation",
            Self::InvalidPermissionOption(_) => "InvalidPermissionOption",
            Self::MlsNotEnabled => "MlsNotEnabled",
            Self::InvalidArgument(_) => "InvalidArgument",
            Self::UnknownMethod(_) => "UnknownMethod",
            Self::Library(_) => "Library",
            Self::Paused(_) => "Paused",
            Self::Timeout(_) => "Timeout",
            Self::Cancelled(_) => "Cancelled",
            Self::Stream(_) => "Stream",
            Self::Io(_) => "Io",
        }
    }

    /// JSON failure payload: `{"code": …, "message": …}`.
    #[must_use]
    pub fn to_json(&self) -> Value {
        json!({ "code": self.code(), "message": self.to_string() })
    }
}

impl Error {
    /// Host input that failed to decode.
    #[must_use]
    pub fn decode(e: &serde_json::Error) -> Self {
        Self::InvalidArgument(e.to_string())
    }
}

/// Encoding a response or file failed. Decoding host input goes through
/// [`Error::decode`] instead.
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Library(format!("json encoding: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_payload_carries_code_and_message() {
        let v = Error::GroupNotFound("abc".into()).to_json();
        assert_eq!(v["code"], "GroupNotFound");
        assert_eq!(v["message"], "group not found: abc");
    }

    #[test]
    fn decode_failures_blame_the_input_and_encode_failures_do_not() {
        let err = serde_json::from_str::<u8>("\"x\"").map_err(|e| Error::decode(&e));
        assert!(matches!(err, Err(Error::InvalidArgument(_))));

        let mut keyed = std::collections::HashMap::new();
        keyed.insert(vec![1u8], 1);
        let err = serde_json::to_value(&keyed).map_err(Error::from);
        assert!(matches!(err, Err(Error::Library(_))));
    }
}
