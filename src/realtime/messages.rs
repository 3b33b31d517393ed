//! Realtime wire protocol message types.
//!
//! All events are JSON-encoded text frames over the WebSocket, discriminated
//! by a `type` field.
//!
//! Client events (sent):
//! - session.update - Configure the session (sent once per connection)
//! - input_audio_buffer.append - Append a transport-encoded audio chunk
//! - response.create - Ask the assistant to produce a response
//!
//! Server events (received):
//! - session.created / session.updated - Acknowledgements
//! - input_audio_buffer.speech_started / speech_stopped - Server VAD
//! - input_audio_buffer.committed - Turn boundary acknowledgement
//! - response.created - Response generation started
//! - response.audio.delta - Audio chunk
//! - response.done - Response complete, carries the output items
//! - error - Error report
//!
//! Anything else deserializes to [`ServerEvent::Unknown`] and is logged and
//! ignored rather than failing the frame.

use serde::{Deserialize, Serialize};

use crate::audio::to_transport;

use super::config::RealtimeConfig;

// =============================================================================
// Session Configuration
// =============================================================================

/// Session configuration payload for `session.update`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Response modalities (text, audio)
    pub modalities: Vec<String>,

    /// System instructions for the assistant
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,

    /// Voice for audio output
    pub voice: String,

    /// Input audio format
    pub input_audio_format: String,

    /// Output audio format
    pub output_audio_format: String,

    /// Turn detection configuration
    pub turn_detection: TurnDetection,
}

impl SessionConfig {
    /// Build the one-per-connection session configuration from client
    /// config: text+audio modalities, PCM16 both ways, server VAD.
    pub fn from_client_config(config: &RealtimeConfig) -> Self {
        Self {
            modalities: vec!["text".to_string(), "audio".to_string()],
            instructions: Some(config.instructions.clone()),
            voice: config.voice.as_str().to_string(),
            input_audio_format: "pcm16".to_string(),
            output_audio_format: "pcm16".to_string(),
            turn_detection: TurnDetection::ServerVad {
                threshold: config.vad.threshold,
                prefix_padding_ms: config.vad.prefix_padding_ms,
                silence_duration_ms: config.vad.silence_duration_ms,
            },
        }
    }
}

/// Turn detection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TurnDetection {
    /// Server-side VAD
    #[serde(rename = "server_vad")]
    ServerVad {
        /// Activation threshold
        threshold: f32,
        /// Audio prefix padding in ms
        prefix_padding_ms: u32,
        /// Silence duration in ms
        silence_duration_ms: u32,
    },
}

/// Response configuration for `response.create`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseConfig {
    /// Response modalities
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modalities: Option<Vec<String>>,
    /// Instruction override for this response only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

// =============================================================================
// Client Events (sent to server)
// =============================================================================

/// Client events sent over the transport.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Update session configuration
    #[serde(rename = "session.update")]
    SessionUpdate {
        /// Session configuration
        session: SessionConfig,
    },

    /// Append audio to the input buffer
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend {
        /// Transport-encoded PCM16 chunk at the wire rate
        audio: String,
    },

    /// Ask the assistant to produce a response
    #[serde(rename = "response.create")]
    ResponseCreate {
        /// Response configuration
        #[serde(skip_serializing_if = "Option::is_none")]
        response: Option<ResponseConfig>,
    },
}

impl ClientEvent {
    /// Create an audio append event from raw PCM bytes.
    pub fn audio_append(pcm_bytes: &[u8]) -> Self {
        ClientEvent::InputAudioBufferAppend {
            audio: to_transport(pcm_bytes),
        }
    }

    /// Create the synthetic opening response request: text+audio modalities
    /// plus the greeting instruction override, so the assistant speaks
    /// first.
    pub fn opening_response(greeting_instructions: &str) -> Self {
        ClientEvent::ResponseCreate {
            response: Some(ResponseConfig {
                modalities: Some(vec!["text".to_string(), "audio".to_string()]),
                instructions: Some(greeting_instructions.to_string()),
            }),
        }
    }
}

// =============================================================================
// Server Events (received from server)
// =============================================================================

/// Server events received over the transport.
///
/// Fields the engine does not consume are deliberately lenient (`default`)
/// so a richer server payload never fails the parse.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Error occurred
    #[serde(rename = "error")]
    Error {
        /// Error details
        error: ApiError,
    },

    /// Session created
    #[serde(rename = "session.created")]
    SessionCreated {
        /// Session information
        #[serde(default)]
        session: SessionInfo,
    },

    /// Session configuration acknowledged
    #[serde(rename = "session.updated")]
    SessionUpdated {
        /// Session information
        #[serde(default)]
        session: SessionInfo,
    },

    /// Server VAD detected speech
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted {
        /// Audio start timestamp in ms
        #[serde(default)]
        audio_start_ms: u64,
    },

    /// Server VAD detected silence
    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped {
        /// Audio end timestamp in ms
        #[serde(default)]
        audio_end_ms: u64,
    },

    /// Audio buffer committed (turn boundary)
    #[serde(rename = "input_audio_buffer.committed")]
    InputAudioBufferCommitted,

    /// Response generation started
    #[serde(rename = "response.created")]
    ResponseCreated,

    /// Inbound audio chunk
    #[serde(rename = "response.audio.delta")]
    AudioDelta {
        /// Transport-encoded PCM16 chunk at the wire rate
        delta: String,
    },

    /// Response complete
    #[serde(rename = "response.done")]
    ResponseDone {
        /// Response information with output items
        response: ResponseInfo,
    },

    /// Any event kind the engine does not interpret
    #[serde(other)]
    Unknown,
}

// =============================================================================
// Supporting Types
// =============================================================================

/// API error information.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiError {
    /// Error type
    #[serde(rename = "type", default)]
    pub error_type: String,
    /// Error code
    #[serde(default)]
    pub code: Option<String>,
    /// Error message
    #[serde(default)]
    pub message: String,
}

/// Session information carried by acknowledgements.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionInfo {
    /// Session ID
    #[serde(default)]
    pub id: Option<String>,
}

/// Completed response with its output items.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponseInfo {
    /// Response ID
    #[serde(default)]
    pub id: Option<String>,
    /// Output items
    #[serde(default)]
    pub output: Vec<OutputItem>,
}

/// One output item of a completed response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OutputItem {
    /// Item role (assistant)
    #[serde(default)]
    pub role: Option<String>,
    /// Content parts
    #[serde(default)]
    pub content: Vec<ContentPart>,
}

/// Content part within an output item.
#[derive(Debug, Clone, Deserialize)]
pub struct ContentPart {
    /// Content type (text, audio)
    #[serde(rename = "type")]
    pub content_type: String,
    /// Text content
    #[serde(default)]
    pub text: Option<String>,
    /// Transcript of audio content
    #[serde(default)]
    pub transcript: Option<String>,
}
