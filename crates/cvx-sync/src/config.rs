use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncResult};

/// Tuning knobs of an export transaction.
///
/// ```toml
/// fetch_timeout_ms = 30000
/// max_concurrent_fetches = 8
/// consult_session_peers = true
/// verify_blobs = true
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Upper bound for every single remote call.
    pub fetch_timeout_ms: u64,
    /// Maximum number of in-flight fetches per resolution wave.
    pub max_concurrent_fetches: usize,
    /// Fall back to scopes already consulted during the session when a
    /// version's own scope does not have it.
    pub consult_session_peers: bool,
    /// Re-hash fetched blobs before accepting them.
    pub verify_blobs: bool,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_ms: 30_000,
            max_concurrent_fetches: 8,
            consult_session_peers: true,
            verify_blobs: true,
        }
    }
}

impl ExportConfig {
    /// Parse and validate a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(text: &str) -> SyncResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| SyncError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> SyncResult<Self> {
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }

    pub fn validate(&self) -> SyncResult<()> {
        if self.fetch_timeout_ms == 0 {
            return Err(SyncError::Config("fetch_timeout_ms must be positive".into()));
        }
        if self.max_concurrent_fetches == 0 {
            return Err(SyncError::Config(
                "max_concurrent_fetches must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout_ms = timeout.as_millis().max(1) as u64;
        self
    }

    pub fn with_session_peers(mut self, enabled: bool) -> Self {
        self.consult_session_peers = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let c = ExportConfig::default();
        assert_eq!(c.fetch_timeout(), Duration::from_secs(30));
        assert_eq!(c.max_concurrent_fetches, 8);
        assert!(c.consult_session_peers);
        assert!(c.verify_blobs);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let c = ExportConfig::from_toml_str("max_concurrent_fetches = 2\n").unwrap();
        assert_eq!(c.max_concurrent_fetches, 2);
        assert_eq!(c.fetch_timeout_ms, 30_000);
    }

    #[test]
    fn zero_values_are_rejected() {
        assert!(matches!(
            ExportConfig::from_toml_str("fetch_timeout_ms = 0"),
            Err(SyncError::Config(_))
        ));
        assert!(matches!(
            ExportConfig::from_toml_str("max_concurrent_fetches = 0"),
            Err(SyncError::Config(_))
        ));
    }

    #[test]
    fn malformed_toml_is_config_error() {
        assert!(matches!(
            ExportConfig::from_toml_str("verify_blobs = \"yes\""),
            Err(SyncError::Config(_))
        ));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.toml");
        std::fs::write(&path, "consult_session_peers = false\n").unwrap();
        let c = ExportConfig::from_file(&path).unwrap();
        assert!(!c.consult_session_peers);
    }
}
