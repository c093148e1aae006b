use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default tuning values for the orchestrator.
pub mod defaults {
    /// Ceiling on circuits concurrently building or extending a stream.
    pub const MAX_INFLIGHT: usize = 32;

    /// Retries granted to a circuit after its first failed attempt.
    pub const MAX_RETRIES: u32 = 3;

    /// Deadline for a single circuit-build attempt.
    pub const BUILD_TIMEOUT_SECS: u64 = 60;

    /// Deadline for a single stream-attach attempt.
    pub const STREAM_TIMEOUT_SECS: u64 = 30;

    /// Port used for stream attachment when a destination omits one.
    pub const STREAM_PORT: u16 = 443;
}

/// Orchestrator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Maximum circuits in `Building` or `ExtendingStream` at once.
    pub max_inflight: usize,

    /// Retries per circuit after the initial attempt.
    pub max_retries: u32,

    /// Per-attempt circuit build deadline, in seconds.
    pub build_timeout_secs: u64,

    /// Per-attempt stream attach deadline, in seconds.
    pub stream_timeout_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_inflight: defaults::MAX_INFLIGHT,
            max_retries: defaults::MAX_RETRIES,
            build_timeout_secs: defaults::BUILD_TIMEOUT_SECS,
            stream_timeout_secs: defaults::STREAM_TIMEOUT_SECS,
        }
    }
}

impl OrchestratorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_inflight(mut self, ceiling: usize) -> Self {
        self.max_inflight = ceiling.max(1);
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_build_timeout(mut self, timeout: Duration) -> Self {
        self.build_timeout_secs = timeout.as_secs().max(1);
        self
    }

    pub fn with_stream_timeout(mut self, timeout: Duration) -> Self {
        self.stream_timeout_secs = timeout.as_secs().max(1);
        self
    }

    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.build_timeout_secs)
    }

    pub fn stream_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_timeout_secs)
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(e.to_string()))?;

        toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Save configuration to a TOML file.
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, contents).map_err(|e| ConfigError::WriteError(e.to_string()))?;

        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Failed to serialize config: {0}")]
    SerializeError(String),

    #[error("Failed to write config file: {0}")]
    WriteError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.max_inflight, defaults::MAX_INFLIGHT);
        assert_eq!(config.max_retries, defaults::MAX_RETRIES);
        assert_eq!(
            config.build_timeout(),
            Duration::from_secs(defaults::BUILD_TIMEOUT_SECS)
        );
    }

    #[test]
    fn test_config_builder() {
        let config = OrchestratorConfig::new()
            .with_max_inflight(4)
            .with_max_retries(1)
            .with_build_timeout(Duration::from_secs(5));

        assert_eq!(config.max_inflight, 4);
        assert_eq!(config.max_retries, 1);
        assert_eq!(config.build_timeout_secs, 5);
    }

    #[test]
    fn test_ceiling_never_below_one() {
        let config = OrchestratorConfig::new().with_max_inflight(0);
        assert_eq!(config.max_inflight, 1);
    }

    #[test]
    fn test_toml_round_trip() {
        let config = OrchestratorConfig::new().with_max_inflight(7);
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: OrchestratorConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.max_inflight, 7);
        assert_eq!(parsed.max_retries, config.max_retries);
    }
}
