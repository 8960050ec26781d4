//! Host settings read from a `key = value` file.

use std::fs;
use std::path::{Path, PathBuf};

use xmtp_bridge::{Error, Result};

/// Default config location: `<config dir>/xmtp-bridge/bridge.conf`.
pub fn default_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("xmtp-bridge")
        .join("bridge.conf")
}

/// Settings a config file may provide. Command-line flags win.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostConfig {
    pub log_level: Option<String>,
    pub prepared_dir: Option<PathBuf>,
    pub signature_timeout_secs: Option<u64>,
    pub callback_timeout_secs: Option<u64>,
    pub auto_sign_key: Option<String>,
}

impl HostConfig {
    /// Load `path`, or the default file if it exists. An explicit path that
    /// cannot be read is an error; a missing default file is not.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let text = match path {
            Some(p) => fs::read_to_string(p)?,
            None => match fs::read_to_string(default_path()) {
                Ok(text) => text,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
                Err(e) => return Err(e.into()),
            },
        };
        Self::parse(&text)
    }

    /// Parse `key = value` lines. Blank lines and `#` comments are skipped;
    /// unknown keys are ignored.
    pub fn parse(text: &str) -> Result<Self> {
        let mut cfg = Self::default();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((k, v)) = line.split_once('=') else {
                return Err(Error::InvalidArgument(format!("config: expected key = value, got {line:?}")));
            };
            let v = v.trim();
            match k.trim() {
                "log_level" => cfg.log_level = Some(v.to_owned()),
                "prepared_dir" => cfg.prepared_dir = Some(PathBuf::from(v)),
                "signature_timeout_secs" => cfg.signature_timeout_secs = Some(secs(k, v)?),
                "callback_timeout_secs" => cfg.callback_timeout_secs = Some(secs(k, v)?),
                "auto_sign_key" => cfg.auto_sign_key = Some(v.to_owned()),
                other => tracing::debug!(key = other, "ignoring unknown config key"),
            }
        }
        Ok(cfg)
    }
}

fn secs(key: &str, value: &str) -> Result<u64> {
    value
        .parse()
        .map_err(|e| Error::InvalidArgument(format!("config: {}: {e}", key.trim())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_keys_and_skips_comments() {
        let cfg = HostConfig::parse(
            "# host settings\nlog_level = debug\nsignature_timeout_secs=30\n\ncolor = auto\n",
        )
        .unwrap();
        assert_eq!(cfg.log_level.as_deref(), Some("debug"));
        assert_eq!(cfg.signature_timeout_secs, Some(30));
        assert_eq!(cfg.callback_timeout_secs, None);
    }

    #[test]
    fn bad_numbers_and_lines_are_rejected() {
        assert!(HostConfig::parse("callback_timeout_secs = soon").is_err());
        assert!(HostConfig::parse("just words").is_err());
    }

    #[test]
    fn explicit_file_is_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.conf");
        fs::write(&path, "prepared_dir = /var/lib/xmtp\n").unwrap();
        let cfg = HostConfig::load(Some(&path)).unwrap();
        assert_eq!(cfg.prepared_dir, Some(PathBuf::from("/var/lib/xmtp")));
        assert!(HostConfig::load(Some(&dir.path().join("missing.conf"))).is_err());
    }
}
