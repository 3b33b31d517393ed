//! Realtime session configuration: endpoint, model and voice identities,
//! and voice-activity-detection parameters.

use serde::{Deserialize, Serialize};

use crate::audio::WIRE_SAMPLE_RATE;

/// Realtime API WebSocket endpoint.
pub const REALTIME_URL: &str = "wss://api.openai.com/v1/realtime";

/// Audio sample rate the protocol fixes on both directions.
pub const REALTIME_SAMPLE_RATE: u32 = WIRE_SAMPLE_RATE;

/// Delay between the session acknowledgement and the synthetic
/// `response.create` that makes the assistant open the conversation.
pub const RESPONSE_TRIGGER_DELAY_MS: u64 = 500;

/// Instruction override sent with the synthetic opening `response.create`.
pub const DEFAULT_GREETING_INSTRUCTIONS: &str = "Begin the conversation now with your opening \
     line. Introduce yourself as Vector and ask the user about the last time they lost track \
     of time doing something.";

// =============================================================================
// Models
// =============================================================================

/// Supported realtime models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RealtimeModel {
    /// GPT-4o Realtime Preview
    #[serde(rename = "gpt-4o-realtime-preview")]
    Gpt4oRealtimePreview,
    /// GPT-4o Realtime Preview 2024-12-17 (default)
    #[default]
    #[serde(rename = "gpt-4o-realtime-preview-2024-12-17")]
    Gpt4oRealtimePreview20241217,
    /// GPT-4o Mini Realtime Preview
    #[serde(rename = "gpt-4o-mini-realtime-preview")]
    Gpt4oMiniRealtimePreview,
}

impl RealtimeModel {
    /// Convert to the API parameter value.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gpt4oRealtimePreview => "gpt-4o-realtime-preview",
            Self::Gpt4oRealtimePreview20241217 => "gpt-4o-realtime-preview-2024-12-17",
            Self::Gpt4oMiniRealtimePreview => "gpt-4o-mini-realtime-preview",
        }
    }

    /// Parse from string, with fallback to default.
    pub fn from_str_or_default(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "gpt-4o-realtime-preview" => Self::Gpt4oRealtimePreview,
            "gpt-4o-realtime-preview-2024-12-17" => Self::Gpt4oRealtimePreview20241217,
            "gpt-4o-mini-realtime-preview" => Self::Gpt4oMiniRealtimePreview,
            _ => Self::default(),
        }
    }
}

impl std::fmt::Display for RealtimeModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Voices
// =============================================================================

/// Available assistant voices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RealtimeVoice {
    /// Alloy voice (default)
    #[default]
    Alloy,
    /// Ash voice
    Ash,
    /// Coral voice
    Coral,
    /// Echo voice
    Echo,
    /// Sage voice
    Sage,
    /// Shimmer voice
    Shimmer,
    /// Verse voice
    Verse,
}

impl RealtimeVoice {
    /// Convert to the API parameter value.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Alloy => "alloy",
            Self::Ash => "ash",
            Self::Coral => "coral",
            Self::Echo => "echo",
            Self::Sage => "sage",
            Self::Shimmer => "shimmer",
            Self::Verse => "verse",
        }
    }

    /// Parse from string, with fallback to default.
    pub fn from_str_or_default(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "alloy" => Self::Alloy,
            "ash" => Self::Ash,
            "coral" => Self::Coral,
            "echo" => Self::Echo,
            "sage" => Self::Sage,
            "shimmer" => Self::Shimmer,
            "verse" => Self::Verse,
            _ => Self::default(),
        }
    }
}

impl std::fmt::Display for RealtimeVoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Voice Activity Detection
// =============================================================================

/// Server-side voice-activity-detection parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VadConfig {
    /// Activation threshold (0.0 to 1.0)
    pub threshold: f32,
    /// Audio included before detected speech, in ms
    pub prefix_padding_ms: u32,
    /// Trailing silence that ends a turn, in ms
    pub silence_duration_ms: u32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            prefix_padding_ms: 300,
            silence_duration_ms: 500,
        }
    }
}

// =============================================================================
// Client Configuration
// =============================================================================

/// Immutable configuration for one client instance.
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// API key carried as the connection-level credential
    pub api_key: String,
    /// Model identity
    pub model: RealtimeModel,
    /// Assistant voice
    pub voice: RealtimeVoice,
    /// System instructions sent with `session.update`
    pub instructions: String,
    /// Instruction override for the synthetic opening response
    pub greeting_instructions: String,
    /// Voice-activity-detection parameters
    pub vad: VadConfig,
    /// Endpoint override; the production API URL when absent
    pub endpoint: Option<String>,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: RealtimeModel::default(),
            voice: RealtimeVoice::default(),
            instructions: String::new(),
            greeting_instructions: DEFAULT_GREETING_INSTRUCTIONS.to_string(),
            vad: VadConfig::default(),
            endpoint: None,
        }
    }
}

impl RealtimeConfig {
    /// Full WebSocket URL for this configuration.
    pub fn ws_url(&self) -> String {
        let base = self.endpoint.as_deref().unwrap_or(REALTIME_URL);
        format!("{}?model={}", base, self.model.as_str())
    }
}
