//! Configuration values, built once at startup and read-only afterwards.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Preview length used by metadata-tier payloads, independent of config.
pub const METADATA_PREVIEW_ELEMENTS: usize = 3;

/// Tier boundaries and preview size for workspace compression.
///
/// * `small_threshold`: element counts up to this value are sent in full.
///   Raising it sends more raw data; lowering it summarizes sooner.
/// * `medium_threshold`: counts above this value are sent as metadata only.
///   Raising it keeps statistical summaries for larger arrays.
/// * `preview_element_count`: sample size embedded in summary payloads.
///   Metadata payloads always use [`METADATA_PREVIEW_ELEMENTS`] at most.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    pub small_threshold: usize,
    pub medium_threshold: usize,
    pub preview_element_count: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            small_threshold: 100,
            medium_threshold: 10_000,
            preview_element_count: 10,
        }
    }
}

impl CompressionConfig {
    /// Build a validated config.
    pub fn new(
        small_threshold: usize,
        medium_threshold: usize,
        preview_element_count: usize,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            small_threshold,
            medium_threshold,
            preview_element_count,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.small_threshold == 0 {
            return Err(ConfigError::Compression(
                "small_threshold must be at least 1".into(),
            ));
        }
        if self.small_threshold >= self.medium_threshold {
            return Err(ConfigError::Compression(format!(
                "small_threshold ({}) must be below medium_threshold ({})",
                self.small_threshold, self.medium_threshold
            )));
        }
        if self.preview_element_count == 0 {
            return Err(ConfigError::Compression(
                "preview_element_count must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Preview length for metadata payloads.
    pub fn metadata_preview(&self) -> usize {
        METADATA_PREVIEW_ELEMENTS.min(self.preview_element_count)
    }
}

/// Bridge-wide settings: compression, directories, limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub compression: CompressionConfig,
    /// Root directory for exported figures.
    pub output_dir: PathBuf,
    /// Directory for scripts written by `create_script`.
    pub scripts_dir: PathBuf,
    /// Wall-clock limit for one execution; `None` disables it.
    pub execution_timeout_ms: Option<u64>,
    /// Workspace size above which large variables are cleared before a run.
    pub memory_limit_mb: Option<f64>,
    /// Size above which a variable counts as large for the memory guard.
    pub large_variable_mb: f64,
    /// Maximum number of concurrently open sessions.
    pub max_sessions: usize,
    /// Idle time after which the pool reaps a session.
    pub idle_timeout_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        let base = std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir)
            .join(".matbridge");
        Self {
            compression: CompressionConfig::default(),
            output_dir: base.join("output"),
            scripts_dir: PathBuf::from("matlab_scripts"),
            execution_timeout_ms: Some(300_000),
            memory_limit_mb: None,
            large_variable_mb: 100.0,
            max_sessions: 3,
            idle_timeout_secs: 300,
        }
    }
}

impl BridgeConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and validate a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.compression.validate()?;
        if self.max_sessions == 0 {
            return Err(ConfigError::Bridge("max_sessions must be at least 1".into()));
        }
        if self.execution_timeout_ms == Some(0) {
            return Err(ConfigError::Bridge(
                "execution_timeout_ms must be positive when set".into(),
            ));
        }
        if let Some(limit) = self.memory_limit_mb {
            if !(limit > 0.0) {
                return Err(ConfigError::Bridge("memory_limit_mb must be positive".into()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        CompressionConfig::default().validate().unwrap();
        BridgeConfig::default().validate().unwrap();
    }

    #[test]
    fn thresholds_must_be_ordered() {
        let err = CompressionConfig::new(500, 500, 10).unwrap_err();
        assert!(err.to_string().contains("below medium_threshold"));
        assert!(CompressionConfig::new(0, 10, 1).is_err());
        assert!(CompressionConfig::new(1, 10, 0).is_err());
    }

    #[test]
    fn metadata_preview_is_capped() {
        let wide = CompressionConfig::new(10, 100, 50).unwrap();
        assert_eq!(wide.metadata_preview(), 3);
        let narrow = CompressionConfig::new(10, 100, 2).unwrap();
        assert_eq!(narrow.metadata_preview(), 2);
    }

    #[test]
    fn toml_overrides_selected_fields() {
        let config = BridgeConfig::from_toml_str(
            r#"
            execution_timeout_ms = 1000
            max_sessions = 1

            [compression]
            small_threshold = 20
            "#,
        )
        .unwrap();
        assert_eq!(config.execution_timeout_ms, Some(1000));
        assert_eq!(config.max_sessions, 1);
        assert_eq!(config.compression.small_threshold, 20);
        assert_eq!(config.compression.medium_threshold, 10_000);
    }

    #[test]
    fn toml_rejects_invalid_thresholds() {
        let err = BridgeConfig::from_toml_str(
            r#"
            [compression]
            small_threshold = 50000
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Compression(_)));
    }

    #[test]
    fn config_serde_roundtrip() {
        let config = BridgeConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: BridgeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, back);
    }
}
