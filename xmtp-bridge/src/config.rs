//! Configuration: per-client options passed through from the host, and the
//! bridge's own settings.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{Env, PreAction};

/// Options the host supplies when creating or building a client. The bridge
/// validates them and hands them to the messaging library unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientOptions {
    /// Network environment.
    pub env: Env,
    /// App version reported to the network.
    pub app_version: Option<String>,
    /// Directory holding the local database. `None` = library default.
    pub db_directory: Option<String>,
    /// 32-byte database encryption key.
    pub db_encryption_key: Option<Vec<u8>>,
    /// History sync server URL.
    pub history_sync_url: Option<String>,
    /// Enable MLS groups.
    #[serde(rename = "enableV3")]
    pub enable_v3: bool,
    /// Host wants to be asked before identity creation.
    pub has_pre_create_identity_callback: bool,
    /// Host wants to be asked before identity enablement.
    pub has_pre_enable_identity_callback: bool,
    /// Host wants to be asked before inbox authentication.
    pub has_pre_authenticate_to_inbox_callback: bool,
}

impl ClientOptions {
    /// Reject options the library cannot use.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the encryption key is not
    /// exactly 32 bytes.
    pub fn validate(&self) -> Result<()> {
        if let Some(key) = &self.db_encryption_key
            && key.len() != 32
        {
            return Err(Error::InvalidArgument(format!(
                "dbEncryptionKey must be 32 bytes, got {}",
                key.len()
            )));
        }
        Ok(())
    }

    /// Whether the host registered a callback for `action`.
    #[must_use]
    pub const fn wants_callback(&self, action: PreAction) -> bool {
        match action {
            PreAction::CreateIdentity => self.has_pre_create_identity_callback,
            PreAction::EnableIdentity => self.has_pre_enable_identity_callback,
            PreAction::AuthenticateToInbox => self.has_pre_authenticate_to_inbox_callback,
        }
    }
}

/// Account details for host-signed authentication.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WalletOptions {
    /// The account is an ERC-1271 smart contract wallet.
    pub is_smart_contract_wallet: bool,
    /// Chain the wallet lives on. Required for smart contract wallets.
    pub chain_id: Option<u64>,
    /// Block to verify at. `None` = latest.
    pub block_number: Option<u64>,
}

/// Default wait for host signatures and pre-action callbacks.
pub const DEFAULT_HOST_TIMEOUT: Duration = Duration::from_secs(300);

/// Settings of a [`Bridge`](crate::Bridge) instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    prepared_dir: PathBuf,
    signature_timeout: Duration,
    callback_timeout: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            prepared_dir: std::env::temp_dir().join("xmtp-bridge").join("prepared"),
            signature_timeout: DEFAULT_HOST_TIMEOUT,
            callback_timeout: DEFAULT_HOST_TIMEOUT,
        }
    }
}

impl BridgeConfig {
    /// Create a new [`BridgeConfigBuilder`].
    #[must_use]
    pub fn builder() -> BridgeConfigBuilder {
        BridgeConfigBuilder::default()
    }

    /// Directory holding prepared-message files.
    #[must_use]
    pub fn prepared_dir(&self) -> &Path {
        &self.prepared_dir
    }

    /// How long a host signature request may stay unanswered.
    #[must_use]
    pub const fn signature_timeout(&self) -> Duration {
        self.signature_timeout
    }

    /// How long a pre-action callback may stay uncompleted.
    #[must_use]
    pub const fn callback_timeout(&self) -> Duration {
        self.callback_timeout
    }
}

/// Builder for [`BridgeConfig`].
#[derive(Debug, Clone, Default)]
pub struct BridgeConfigBuilder {
    prepared_dir: Option<PathBuf>,
    signature_timeout: Option<Duration>,
    callback_timeout: Option<Duration>,
}

impl BridgeConfigBuilder {
    /// Set the prepared-message directory.
    #[must_use]
    pub fn prepared_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.prepared_dir = Some(dir.into());
        self
    }

    /// Set the host signature timeout.
    #[must_use]
    pub const fn signature_timeout(mut self, t: Duration) -> Self {
        self.signature_timeout = Some(t);
        self
    }

    /// Set the pre-action callback timeout.
    #[must_use]
    pub const fn callback_timeout(mut self, t: Duration) -> Self {
        self.callback_timeout = Some(t);
        self
    }

    /// Build the configuration, filling unset fields with defaults.
    #[must_use]
    pub fn build(self) -> BridgeConfig {
        let defaults = BridgeConfig::default();
        BridgeConfig {
            prepared_dir: self.prepared_dir.unwrap_or(defaults.prepared_dir),
            signature_timeout: self.signature_timeout.unwrap_or(defaults.signature_timeout),
            callback_timeout: self.callback_timeout.unwrap_or(defaults.callback_timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_json_maps_to_options() {
        let opts: ClientOptions = serde_json::from_value(serde_json::json!({
            "env": "production",
            "dbDirectory": "/data/xmtp",
            "enableV3": true,
            "hasPreAuthenticateToInboxCallback": true,
        }))
        .unwrap();
        assert_eq!(opts.env, Env::Production);
        assert!(opts.enable_v3);
        assert!(opts.wants_callback(PreAction::AuthenticateToInbox));
        assert!(!opts.wants_callback(PreAction::CreateIdentity));
        assert_eq!(opts.db_directory.as_deref(), Some("/data/xmtp"));
    }

    #[test]
    fn short_encryption_key_is_rejected() {
        let opts = ClientOptions {
            db_encryption_key: Some(vec![7; 16]),
            ..ClientOptions::default()
        };
        assert!(matches!(opts.validate(), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn builder_keeps_unset_defaults() {
        let cfg = BridgeConfig::builder()
            .signature_timeout(Duration::from_secs(3))
            .build();
        assert_eq!(cfg.signature_timeout(), Duration::from_secs(3));
        assert_eq!(cfg.callback_timeout(), DEFAULT_HOST_TIMEOUT);
    }
}
