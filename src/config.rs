use std::{fs, io, path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

const MAX_QR_TTL_SECS: u64 = 365 * 24 * 60 * 60;

/// Base configuration used by the session client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SessionConfig {
    /// Path to the JSON snapshot holding contacts and message state.
    pub store_path: String,
    /// Human-readable device name announced to the transport.
    pub device_name: String,
    /// Seconds a QR code stays scannable after it is issued.
    pub qr_ttl_secs: u64,
    /// Messages imported per chat after the session becomes ready.
    pub import_message_limit: usize,
    /// Chats imported in parallel.
    pub import_concurrency: usize,
    /// Deadline for individual transport commands. `None` waits forever.
    pub command_timeout_secs: Option<u64>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            store_path: "./data/store.json".into(),
            device_name: "wa-session".into(),
            qr_ttl_secs: 60,
            import_message_limit: 50,
            import_concurrency: 4,
            command_timeout_secs: None,
        }
    }
}

impl SessionConfig {
    /// Load from a JSON file. A missing file yields the defaults; missing keys
    /// fall back to their default values.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        match fs::read_to_string(path) {
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(err.into()),
        }
    }

    /// Override the store snapshot path.
    pub fn with_store_path(mut self, path: impl Into<String>) -> Self {
        self.store_path = path.into();
        self
    }

    /// Override the device name.
    pub fn with_device_name(mut self, name: impl Into<String>) -> Self {
        self.device_name = name.into();
        self
    }

    /// Override the QR code lifetime.
    pub fn with_qr_ttl_secs(mut self, secs: u64) -> Self {
        self.qr_ttl_secs = secs;
        self
    }

    /// Override how many messages per chat the bulk import pulls.
    pub fn with_import_message_limit(mut self, limit: usize) -> Self {
        self.import_message_limit = limit;
        self
    }

    /// Override how many chats are imported concurrently.
    pub fn with_import_concurrency(mut self, concurrency: usize) -> Self {
        self.import_concurrency = concurrency;
        self
    }

    /// Put a deadline on transport commands.
    pub fn with_command_timeout_secs(mut self, secs: u64) -> Self {
        self.command_timeout_secs = Some(secs);
        self
    }

    pub fn qr_ttl(&self) -> chrono::Duration {
        // Clamped to a year; chrono panics past its range.
        chrono::Duration::seconds(self.qr_ttl_secs.min(MAX_QR_TTL_SECS) as i64)
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "qr_ttl_secs": 20, "command_timeout_secs": 5 }"#).unwrap();

        let config = SessionConfig::from_json_file(&path).unwrap();
        assert_eq!(config.qr_ttl_secs, 20);
        assert_eq!(config.command_timeout(), Some(Duration::from_secs(5)));
        assert_eq!(config.import_message_limit, 50);
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = SessionConfig::from_json_file(dir.path().join("nope.json")).unwrap();
        assert_eq!(config, SessionConfig::default());
        assert_eq!(config.command_timeout(), None);
    }
}
