//! Base types for the realtime protocol client: error taxonomy, connection
//! state, and the caller-facing callback surface.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use thiserror::Error;

use crate::audio::AudioError;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during realtime operations.
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// Transport could not be opened
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Missing or rejected credential
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// WebSocket-level failure on an open connection
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// Event could not be serialized
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Operation requires a live session
    #[error("Not connected")]
    NotConnected,

    /// Audio-layer failure
    #[error(transparent)]
    Audio(#[from] AudioError),
}

/// Result type for realtime operations.
pub type RealtimeResult<T> = Result<T, RealtimeError>;

// =============================================================================
// Connection State
// =============================================================================

/// Connection lifecycle of a client instance.
///
/// Exactly one terminal state is reached per connection attempt: `Error` if
/// the transport never opened (or capture failed), `Disconnected` once an
/// open transport closes for any reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No connection attempted yet
    #[default]
    Idle,
    /// Transport opening
    Connecting,
    /// Transport open and session configured
    Connected,
    /// Connection attempt or capture failed
    Error,
    /// Transport closed
    Disconnected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Idle => write!(f, "idle"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Error => write!(f, "error"),
            ConnectionState::Disconnected => write!(f, "disconnected"),
        }
    }
}

// =============================================================================
// Log Channel
// =============================================================================

/// Severity of a diagnostic log line pushed to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogSeverity {
    /// Routine progress
    Info,
    /// Notable session event (VAD, mute toggles, payload arrival)
    Event,
    /// Something went wrong but the session may continue
    Error,
}

impl fmt::Display for LogSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogSeverity::Info => write!(f, "info"),
            LogSeverity::Event => write!(f, "event"),
            LogSeverity::Error => write!(f, "error"),
        }
    }
}

// =============================================================================
// Callback Types
// =============================================================================

/// Callback for connection state changes.
pub type StatusCallback =
    Arc<dyn Fn(ConnectionState) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Callback for diagnostic log lines.
pub type LogCallback =
    Arc<dyn Fn(String, LogSeverity) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Callback for speaking-state changes (user or assistant direction).
pub type SpeakingCallback =
    Arc<dyn Fn(bool) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Callback for decoded assistant audio chunks (PCM16 at the wire rate).
pub type AudioOutputCallback =
    Arc<dyn Fn(Vec<i16>) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Callback for a structured payload extracted from assistant text.
pub type PayloadCallback =
    Arc<dyn Fn(serde_json::Value) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// The caller-facing callback surface, supplied once at client construction.
///
/// Every field is optional; absent callbacks are simply skipped. After
/// `disconnect()` returns, none of these fire again.
#[derive(Default, Clone)]
pub struct RealtimeCallbacks {
    /// Connection state transitions
    pub on_status: Option<StatusCallback>,
    /// Diagnostic log lines
    pub on_log: Option<LogCallback>,
    /// Server VAD: the user started/stopped speaking
    pub on_user_speaking: Option<SpeakingCallback>,
    /// Playback-derived: the assistant started/finished speaking
    pub on_assistant_speaking: Option<SpeakingCallback>,
    /// Decoded assistant audio, in arrival order
    pub on_audio_output: Option<AudioOutputCallback>,
    /// Structured payload extracted from a completed response
    pub on_structured_payload: Option<PayloadCallback>,
}

impl RealtimeCallbacks {
    pub fn with_status(mut self, cb: StatusCallback) -> Self {
        self.on_status = Some(cb);
        self
    }

    pub fn with_log(mut self, cb: LogCallback) -> Self {
        self.on_log = Some(cb);
        self
    }

    pub fn with_user_speaking(mut self, cb: SpeakingCallback) -> Self {
        self.on_user_speaking = Some(cb);
        self
    }

    pub fn with_assistant_speaking(mut self, cb: SpeakingCallback) -> Self {
        self.on_assistant_speaking = Some(cb);
        self
    }

    pub fn with_audio_output(mut self, cb: AudioOutputCallback) -> Self {
        self.on_audio_output = Some(cb);
        self
    }

    pub fn with_structured_payload(mut self, cb: PayloadCallback) -> Self {
        self.on_structured_payload = Some(cb);
        self
    }
}
