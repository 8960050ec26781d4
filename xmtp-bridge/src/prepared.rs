//! On-disk store for messages prepared now and published later.
//!
//! One JSON file per message: `<dir>/<messageId>.prepared`.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::PreparedEnvelope;

const EXTENSION: &str = "prepared";

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PreparedFile {
    message_id: String,
    container_id: String,
    topic: String,
    payload: String,
    prepared_at: i64,
}

/// What the host gets back from `prepareMessage` and hands to
/// `sendPreparedMessage`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreparedMessage {
    /// Id the message will carry once published.
    pub message_id: String,
    /// `file://` URI of the stored envelope.
    #[serde(default)]
    pub prepared_file_uri: String,
    /// Preparation time, milliseconds since the Unix epoch.
    #[serde(default)]
    pub prepared_at: i64,
}

/// Prepared-message files under one directory.
#[derive(Debug, Clone)]
pub struct PreparedStore {
    dir: PathBuf,
}

impl PreparedStore {
    /// Store rooted at `dir`. The directory is created on first save.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Root directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, message_id: &str) -> Result<PathBuf> {
        if message_id.is_empty() || !message_id.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(Error::BadPreparation(format!(
                "invalid message id {message_id:?}"
            )));
        }
        Ok(self.dir.join(format!("{message_id}.{EXTENSION}")))
    }

    /// Persist `envelope`, prepared in the conversation or group
    /// `container_id`.
    ///
    /// # Errors
    ///
    /// [`Error::Io`] if the file cannot be written.
    pub async fn save(
        &self,
        container_id: &str,
        envelope: &PreparedEnvelope,
    ) -> Result<PreparedMessage> {
        let path = self.path_for(&envelope.message_id)?;
        let prepared_at = now_ms();
        let file = PreparedFile {
            message_id: envelope.message_id.clone(),
            container_id: container_id.to_owned(),
            topic: envelope.topic.clone(),
            payload: hex::encode(&envelope.payload),
            prepared_at,
        };
        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(&path, serde_json::to_vec(&file)?).await?;
        tracing::debug!(
            message_id = %envelope.message_id,
            path = %path.display(),
            "prepared message stored"
        );

        Ok(PreparedMessage {
            message_id: envelope.message_id.clone(),
            prepared_file_uri: format!("file://{}", path.display()),
            prepared_at,
        })
    }

    /// Read a stored envelope back, with the id of the container it was
    /// prepared in.
    ///
    /// # Errors
    ///
    /// [`Error::BadPreparation`] if the file is missing or unreadable.
    pub async fn load(&self, prepared: &PreparedMessage) -> Result<(String, PreparedEnvelope)> {
        let path = self.path_for(&prepared.message_id)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::BadPreparation(format!(
                    "missing prepared file for {}",
                    prepared.message_id
                )));
            }
            Err(e) => return Err(e.into()),
        };
        let file: PreparedFile = serde_json::from_slice(&bytes).map_err(|e| {
            Error::BadPreparation(format!("corrupt prepared file {}: {e}", path.display()))
        })?;
        let payload = hex::decode(&file.payload).map_err(|e| {
            Error::BadPreparation(format!("corrupt payload in {}: {e}", path.display()))
        })?;
        if file.message_id != prepared.message_id {
            return Err(Error::BadPreparation(format!(
                "prepared file {} belongs to {}",
                path.display(),
                file.message_id
            )));
        }
        let envelope = PreparedEnvelope {
            message_id: file.message_id,
            topic: file.topic,
            payload,
        };
        Ok((file.container_id, envelope))
    }

    /// Delete the file for `message_id`. Missing files are fine.
    ///
    /// # Errors
    ///
    /// [`Error::Io`] for failures other than a missing file.
    pub async fn remove(&self, message_id: &str) -> Result<()> {
        let path = self.path_for(message_id)?;
        match tokio::fs::remove_file(&path).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope() -> PreparedEnvelope {
        PreparedEnvelope {
            message_id: "abc123".into(),
            topic: "/xmtp/0/dm-1/proto".into(),
            payload: vec![1, 2, 3, 4],
        }
    }

    #[tokio::test]
    async fn saved_envelope_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = PreparedStore::new(dir.path().join("nested"));
        let prepared = store.save("group-1", &envelope()).await.unwrap();
        assert!(prepared.prepared_file_uri.ends_with("abc123.prepared"));

        let (container_id, loaded) = store.load(&prepared).await.unwrap();
        assert_eq!(container_id, "group-1");
        assert_eq!(loaded, envelope());
        store.remove(&prepared.message_id).await.unwrap();
        assert!(matches!(store.load(&prepared).await, Err(Error::BadPreparation(_))));
    }

    #[tokio::test]
    async fn corrupt_file_is_bad_preparation() {
        let dir = tempfile::tempdir().unwrap();
        let store = PreparedStore::new(dir.path());
        let prepared = store.save("/xmtp/0/dm-1/proto", &envelope()).await.unwrap();
        std::fs::write(dir.path().join("abc123.prepared"), b"{not json").unwrap();

        let err = store.load(&prepared).await.unwrap_err();
        assert!(matches!(err, Error::BadPreparation(ref m) if m.contains("corrupt")));
    }

    #[tokio::test]
    async fn path_like_ids_are_rejected() {
        let store = PreparedStore::new(std::env::temp_dir());
        let prepared = PreparedMessage {
            message_id: "../../etc/passwd".into(),
            prepared_file_uri: String::new(),
            prepared_at: 0,
        };
        assert!(matches!(store.load(&prepared).await, Err(Error::BadPreparation(_))));
    }
}
