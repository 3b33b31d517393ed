//! Application configuration for the CLI binary.
//!
//! Sources, in priority order: CLI flags > environment variables > `.env`
//! values > defaults. The `.env` file is loaded by the binary before this
//! module reads the environment, so both look identical here.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::realtime::{RealtimeConfig, RealtimeModel, RealtimeVoice, VadConfig};

/// Built-in system instructions, used when no instructions file is given.
/// Kept deliberately short; real deployments ship their full prompt via
/// `VECTOR_INSTRUCTIONS_FILE`.
pub const DEFAULT_INSTRUCTIONS: &str = "You are Vector, a perceptive and warm career \
     forensicist conducting a spoken assessment. Keep every turn to two or three short \
     sentences ending in exactly one question. When you have gathered enough signal, emit \
     your full profile as a fenced ```json block inside your text output.";

/// Errors raised while assembling the application configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No API key in flags, environment, or .env
    #[error("missing API key: set OPENAI_API_KEY or pass --api-key")]
    MissingApiKey,

    /// Instructions file could not be read
    #[error("failed to read instructions file {path}: {source}")]
    InstructionsUnreadable {
        /// Offending path
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// A numeric environment variable did not parse
    #[error("invalid value for {name}: {value}")]
    InvalidValue {
        /// Variable name
        name: &'static str,
        /// Rejected value
        value: String,
    },
}

/// Resolved application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Connection credential
    pub api_key: String,
    /// Realtime model
    pub model: RealtimeModel,
    /// Assistant voice
    pub voice: RealtimeVoice,
    /// System instructions text
    pub instructions: String,
    /// VAD parameters
    pub vad: VadConfig,
    /// Endpoint override (testing against a local server)
    pub endpoint: Option<String>,
}

impl AppConfig {
    /// Assemble configuration from the environment, applying CLI overrides
    /// where given.
    pub fn load(
        api_key_flag: Option<String>,
        model_flag: Option<String>,
        voice_flag: Option<String>,
        instructions_flag: Option<PathBuf>,
    ) -> Result<Self, ConfigError> {
        let api_key = api_key_flag
            .or_else(|| env_nonempty("OPENAI_API_KEY"))
            .ok_or(ConfigError::MissingApiKey)?;

        let model = model_flag
            .or_else(|| env_nonempty("VECTOR_MODEL"))
            .map(|s| RealtimeModel::from_str_or_default(&s))
            .unwrap_or_default();

        let voice = voice_flag
            .or_else(|| env_nonempty("VECTOR_VOICE"))
            .map(|s| RealtimeVoice::from_str_or_default(&s))
            .unwrap_or_default();

        let instructions = match instructions_flag
            .or_else(|| env_nonempty("VECTOR_INSTRUCTIONS_FILE").map(PathBuf::from))
        {
            Some(path) => read_instructions(&path)?,
            None => DEFAULT_INSTRUCTIONS.to_string(),
        };

        let vad = VadConfig {
            threshold: env_parsed("VECTOR_VAD_THRESHOLD")?.unwrap_or(0.5),
            prefix_padding_ms: env_parsed("VECTOR_VAD_PREFIX_PADDING_MS")?.unwrap_or(300),
            silence_duration_ms: env_parsed("VECTOR_VAD_SILENCE_DURATION_MS")?.unwrap_or(500),
        };

        Ok(Self {
            api_key,
            model,
            voice,
            instructions,
            vad,
            endpoint: env_nonempty("VECTOR_ENDPOINT"),
        })
    }

    /// Build the engine configuration.
    pub fn realtime_config(&self) -> RealtimeConfig {
        RealtimeConfig {
            api_key: self.api_key.clone(),
            model: self.model,
            voice: self.voice,
            instructions: self.instructions.clone(),
            vad: self.vad,
            endpoint: self.endpoint.clone(),
            ..Default::default()
        }
    }
}

fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_parsed<T: std::str::FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    match env_nonempty(name) {
        None => Ok(None),
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { name, value }),
    }
}

fn read_instructions(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::InstructionsUnreadable {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_requires_api_key_flag_or_env() {
        // Flag takes priority and satisfies the requirement on its own.
        let config = AppConfig::load(Some("sk-flag".to_string()), None, None, None).unwrap();
        assert_eq!(config.api_key, "sk-flag");
        assert_eq!(config.model, RealtimeModel::default());
        assert_eq!(config.voice, RealtimeVoice::default());
        assert_eq!(config.instructions, DEFAULT_INSTRUCTIONS);
    }

    #[test]
    fn test_flag_overrides_select_model_and_voice() {
        let config = AppConfig::load(
            Some("sk-flag".to_string()),
            Some("gpt-4o-mini-realtime-preview".to_string()),
            Some("shimmer".to_string()),
            None,
        )
        .unwrap();
        assert_eq!(config.model, RealtimeModel::Gpt4oMiniRealtimePreview);
        assert_eq!(config.voice, RealtimeVoice::Shimmer);
    }

    #[test]
    fn test_missing_instructions_file_is_an_error() {
        let result = AppConfig::load(
            Some("sk-flag".to_string()),
            None,
            None,
            Some(PathBuf::from("/definitely/not/here.txt")),
        );
        assert!(matches!(
            result,
            Err(ConfigError::InstructionsUnreadable { .. })
        ));
    }

    #[test]
    fn test_realtime_config_carries_fields_through() {
        let config = AppConfig::load(Some("sk-flag".to_string()), None, None, None).unwrap();
        let realtime = config.realtime_config();
        assert_eq!(realtime.api_key, "sk-flag");
        assert_eq!(realtime.instructions, DEFAULT_INSTRUCTIONS);
        assert_eq!(realtime.vad, config.vad);
    }
}
