//! Manager configuration

use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::Result;
use crate::notify::NotificationOptions;

/// Default number of concurrently running tasks per manager.
pub const DEFAULT_LANES: i32 = 3;

pub const DOWNLOAD_CONNECT_TIMEOUT_SECS: u64 = 30;
pub const UPLOAD_CONNECT_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Bytes read and written per loop iteration.
    pub chunk_size: usize,
    pub progress_update_interval_ms: u64,
    /// Maximum running tasks; `<= 0` means unlimited.
    pub lanes: i32,
    pub connect_timeout_secs: u64,
    /// Manager-wide notification look, used by tasks without their own.
    pub notification: Option<NotificationOptions>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            chunk_size: range_dl::DEFAULT_CHUNK_SIZE,
            progress_update_interval_ms: 1000,
            lanes: DEFAULT_LANES,
            connect_timeout_secs: DOWNLOAD_CONNECT_TIMEOUT_SECS,
            notification: None,
        }
    }
}

impl ManagerConfig {
    pub fn for_downloads() -> Self {
        Self::default()
    }

    pub fn for_uploads() -> Self {
        Self {
            connect_timeout_secs: UPLOAD_CONNECT_TIMEOUT_SECS,
            ..Self::default()
        }
    }

    /// Parses a JSON document; missing keys keep their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_update_interval_ms)
    }

    pub(crate) fn build_client(&self) -> Result<Client> {
        Ok(Client::builder()
            .connect_timeout(Duration::from_secs(self.connect_timeout_secs))
            .build()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_transfer_constants() {
        let config = ManagerConfig::for_downloads();
        assert_eq!(config.chunk_size, 2048);
        assert_eq!(config.progress_update_interval_ms, 1000);
        assert_eq!(config.lanes, 3);
        assert_eq!(config.connect_timeout_secs, 30);
        assert_eq!(ManagerConfig::for_uploads().connect_timeout_secs, 60);
    }

    #[test]
    fn json_overrides_only_given_keys() {
        let config = ManagerConfig::from_json(r#"{"lanes": 0, "chunk_size": 4096}"#).unwrap();
        assert_eq!(config.lanes, 0);
        assert_eq!(config.chunk_size, 4096);
        assert_eq!(config.progress_update_interval_ms, 1000);
        assert!(config.notification.is_none());
    }

    #[test]
    fn json_notification_options_fill_defaults() {
        let config =
            ManagerConfig::from_json(r#"{"notification": {"title": "{fileName}"}}"#).unwrap();
        let options = config.notification.unwrap();
        assert_eq!(options.title, "{fileName}");
        assert!(options.enabled);
        assert_eq!(options.progress_text, "{length} | {percentage}");
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        let err = ManagerConfig::from_json("{lanes:").unwrap_err();
        assert!(matches!(err, crate::error::TransferError::Config(_)));
    }
}
