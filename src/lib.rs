pub mod audio;
pub mod config;
pub mod profile;
pub mod realtime;

// Re-export commonly used items for convenience
pub use audio::{AudioError, AudioResult, PlaybackScheduler, WIRE_SAMPLE_RATE};
pub use config::AppConfig;
pub use realtime::{
    ConnectionState, LogSeverity, RealtimeCallbacks, RealtimeClient, RealtimeConfig,
    RealtimeError, RealtimeResult,
};
