use std::{fs, path::Path, time::Duration};

use parley_memory::MemoryConfig;
use serde::{Deserialize, Serialize};

use crate::error::ConsultationError;

/// Pipeline bounds and behaviour (`[consultation]`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsultationSettings {
    /// Cache validity in seconds.
    pub cache_ttl_secs: u64,
    /// Decimal places kept when rounding coordinates for fingerprints.
    pub location_grid_precision: u32,
    /// Bound on one specialist call.
    pub specialist_timeout_ms: u64,
    /// Bound on the synthesis call; must exceed the specialist bound.
    pub synthesis_timeout_ms: u64,
    /// Bound on the final reply.
    pub reply_timeout_ms: u64,
    /// Specialist calls in flight per request.
    pub max_concurrency: usize,
    /// Fold recorded success ratios into base weights.
    pub adaptive_weights: bool,
    /// Memories rendered into the synthesis prompt.
    pub memory_context_limit: usize,
    /// Document snippets added to specialist prompts.
    pub document_limit: usize,
}

impl Default for ConsultationSettings {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 30 * 60,
            location_grid_precision: 2,
            specialist_timeout_ms: 35_000,
            synthesis_timeout_ms: 45_000,
            reply_timeout_ms: 45_000,
            max_concurrency: 4,
            adaptive_weights: false,
            memory_context_limit: 3,
            document_limit: 3,
        }
    }
}

impl ConsultationSettings {
    /// Cache TTL.
    #[must_use]
    pub const fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Specialist bound.
    #[must_use]
    pub const fn specialist_timeout(&self) -> Duration {
        Duration::from_millis(self.specialist_timeout_ms)
    }

    /// Synthesis bound.
    #[must_use]
    pub const fn synthesis_timeout(&self) -> Duration {
        Duration::from_millis(self.synthesis_timeout_ms)
    }

    /// Final reply bound.
    #[must_use]
    pub const fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }
}

/// Text-generation backend (`[inference]`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    /// OpenAI-compatible chat completions URL.
    pub endpoint: String,
    /// Model name sent with every request.
    pub model: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Completion length cap.
    pub max_tokens: u32,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:11434/v1/chat/completions".into(),
            model: "llama3.1".into(),
            api_key_env: "PARLEY_API_KEY".into(),
            temperature: 0.7,
            max_tokens: 1024,
        }
    }
}

/// Optional sinks (`[events]`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// HTTP endpoint receiving completed conversations.
    pub endpoint: Option<String>,
    /// JSON-lines log file.
    pub log_path: Option<String>,
}

/// Complete configuration document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParleyConfig {
    /// Pipeline settings.
    pub consultation: ConsultationSettings,
    /// Memory store settings.
    pub memory: MemoryConfig,
    /// Backend settings.
    pub inference: InferenceConfig,
    /// Sink settings.
    pub events: EventsConfig,
}

impl ParleyConfig {
    /// Reads and validates a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConsultationError> {
        let raw = fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&raw)
    }

    /// Parses and validates TOML text.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConsultationError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field constraints.
    pub fn validate(&self) -> Result<(), ConsultationError> {
        let c = &self.consultation;
        if c.cache_ttl_secs == 0 {
            return Err(invalid("consultation.cache_ttl_secs must be positive"));
        }
        if c.specialist_timeout_ms == 0 || c.reply_timeout_ms == 0 {
            return Err(invalid("consultation timeouts must be positive"));
        }
        if c.synthesis_timeout_ms <= c.specialist_timeout_ms {
            return Err(invalid(
                "consultation.synthesis_timeout_ms must exceed specialist_timeout_ms",
            ));
        }
        if c.max_concurrency == 0 {
            return Err(invalid("consultation.max_concurrency must be at least 1"));
        }
        if c.location_grid_precision > 6 {
            return Err(invalid("consultation.location_grid_precision must be at most 6"));
        }
        self.memory.validate()?;
        if self.inference.endpoint.trim().is_empty() {
            return Err(invalid("inference.endpoint must not be empty"));
        }
        if !(0.0..=2.0).contains(&self.inference.temperature) {
            return Err(invalid("inference.temperature must be within [0, 2]"));
        }
        if let Some(endpoint) = &self.events.endpoint {
            if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
                return Err(invalid("events.endpoint must be an http(s) URL"));
            }
        }
        Ok(())
    }
}

fn invalid(message: &str) -> ConsultationError {
    ConsultationError::InvalidConfig(message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_document_is_all_defaults() {
        let config = ParleyConfig::from_toml_str("").unwrap();
        assert_eq!(config, ParleyConfig::default());
        assert_eq!(config.consultation.cache_ttl(), Duration::from_secs(1800));
        assert_eq!(config.memory.working_capacity, 10);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = ParleyConfig::from_toml_str(
            r#"
            [consultation]
            max_concurrency = 2
            adaptive_weights = true

            [memory]
            share_location_index = false

            [events]
            endpoint = "http://localhost:8080/api/store-communication"
            "#,
        )
        .unwrap();
        assert_eq!(config.consultation.max_concurrency, 2);
        assert!(config.consultation.adaptive_weights);
        assert_eq!(config.consultation.specialist_timeout_ms, 35_000);
        assert!(!config.memory.share_location_index);
        assert_eq!(config.memory.long_term_capacity, 500);
    }

    #[test]
    fn synthesis_must_outlast_specialists() {
        let err = ParleyConfig::from_toml_str(
            "[consultation]\nspecialist_timeout_ms = 5000\nsynthesis_timeout_ms = 5000\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConsultationError::InvalidConfig(msg) if msg.contains("synthesis")));
    }

    #[test]
    fn memory_and_event_errors_surface() {
        assert!(ParleyConfig::from_toml_str("[memory]\nworking_capacity = 0\n").is_err());
        assert!(ParleyConfig::from_toml_str("[events]\nendpoint = \"ftp://x\"\n").is_err());
        assert!(matches!(
            ParleyConfig::from_toml_str("[consultation]\nmax_concurrency = \"four\"\n"),
            Err(ConsultationError::Toml(_))
        ));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[inference]\nmodel = \"mistral\"").unwrap();
        let config = ParleyConfig::load(file.path()).unwrap();
        assert_eq!(config.inference.model, "mistral");
        assert!(matches!(
            ParleyConfig::load("/definitely/not/here.toml"),
            Err(ConsultationError::Io(_))
        ));
    }
}
