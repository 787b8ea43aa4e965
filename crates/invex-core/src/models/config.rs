//! Configuration structures for the extraction pipeline.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for the invex pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InvexConfig {
    /// Registry (orchestration) configuration.
    pub registry: RegistryConfig,

    /// Template strategy configuration.
    pub template: TemplateConfig,

    /// Table-aware strategy configuration.
    pub table: TableConfig,

    /// Vision strategy configuration.
    pub vision: VisionConfig,
}

/// Parser registry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Confidence at which the fallback chain stops early (0.0 - 1.0).
    pub confidence_threshold: f32,

    /// Pre-filter score below which a parser is skipped.
    pub min_can_parse: f32,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.75,
            min_can_parse: 0.1,
        }
    }
}

/// Template strategy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateConfig {
    /// Directory scanned for `*.json` template files.
    pub template_dir: Option<PathBuf>,

    /// Minimum detection score for a template to be accepted.
    pub min_confidence: f32,

    /// Maximum number of cached detection results.
    pub cache_capacity: usize,

    /// Number of leading characters hashed into the cache key.
    pub fingerprint_chars: usize,
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            template_dir: None,
            min_confidence: 0.5,
            cache_capacity: 128,
            fingerprint_chars: 1000,
        }
    }
}

/// Table-aware strategy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TableConfig {
    /// Minimum whitespace run separating two cells.
    pub min_gap: usize,

    /// Lines scanned when looking for a header row.
    pub header_scan_lines: usize,

    /// Lines scanned when testing for the vertical block layout.
    pub vertical_scan_lines: usize,

    /// Numbered item lines required for the vertical layout.
    pub vertical_min_numbered: usize,

    /// HS-code data lines required for the vertical layout.
    pub vertical_min_hs_lines: usize,

    /// Confidence reported by header/column mode.
    pub column_confidence: f32,

    /// Confidence reported by vertical block mode.
    pub vertical_confidence: f32,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            min_gap: 2,
            header_scan_lines: 30,
            vertical_scan_lines: 100,
            vertical_min_numbered: 3,
            vertical_min_hs_lines: 3,
            column_confidence: 0.75,
            vertical_confidence: 0.8,
        }
    }
}

/// Vision strategy and client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
    /// Enable the vision strategy.
    pub enabled: bool,

    /// OpenAI-compatible chat completions endpoint.
    pub endpoint: String,

    /// Vision-capable model name.
    pub model: String,

    /// Environment variable holding the API key.
    pub api_key_env: String,

    /// Maximum tokens requested from the model.
    pub max_tokens: u32,

    /// Per-attempt request timeout in seconds.
    pub request_timeout_secs: u64,

    /// Retries after the first attempt for timeout/connection failures.
    pub max_retries: usize,

    /// First backoff delay in milliseconds.
    pub retry_min_delay_ms: u64,

    /// Backoff delay cap in milliseconds.
    pub retry_max_delay_ms: u64,

    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,

    /// Seconds the circuit stays open before a probe is allowed.
    pub cooldown_secs: u64,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            max_tokens: 4096,
            request_timeout_secs: 60,
            max_retries: 3,
            retry_min_delay_ms: 500,
            retry_max_delay_ms: 8000,
            failure_threshold: 3,
            cooldown_secs: 60,
        }
    }
}

impl VisionConfig {
    /// Per-attempt request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Circuit breaker cooldown.
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

impl InvexConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &std::path::Path) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
        })
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &std::path::Path) -> Result<(), std::io::Error> {
        let content = serde_json::to_string_pretty(self).map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
        })?;
        std::fs::write(path, content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = InvexConfig::default();
        assert_eq!(config.registry.confidence_threshold, 0.75);
        assert_eq!(config.table.min_gap, 2);
        assert_eq!(config.table.vertical_confidence, 0.8);
        assert_eq!(config.vision.failure_threshold, 3);
        assert_eq!(config.vision.cooldown(), Duration::from_secs(60));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: InvexConfig =
            serde_json::from_str(r#"{"table": {"min_gap": 3}, "vision": {"enabled": false}}"#)
                .unwrap();
        assert_eq!(config.table.min_gap, 3);
        assert_eq!(config.table.header_scan_lines, 30);
        assert!(!config.vision.enabled);
        assert_eq!(config.vision.max_tokens, 4096);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = InvexConfig::default();
        config.registry.confidence_threshold = 0.9;
        config.save(&path).unwrap();

        let loaded = InvexConfig::from_file(&path).unwrap();
        assert_eq!(loaded.registry.confidence_threshold, 0.9);
    }
}
