//! Realtime protocol client module.
//!
//! The session state machine over a JSON-over-WebSocket wire protocol:
//! connection setup, one-shot session configuration, continuous audio
//! egress, inbound event dispatch, playback feeding, and extraction of the
//! structured profile payload from completed responses.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use vector_voice::audio::{CpalSink, CpalSource, PlaybackScheduler};
//! use vector_voice::realtime::{RealtimeCallbacks, RealtimeClient, RealtimeConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let sink = Arc::new(CpalSink::open()?);
//!     let scheduler = PlaybackScheduler::new(sink);
//!
//!     let callbacks = RealtimeCallbacks::default()
//!         .with_log(Arc::new(|msg, sev| Box::pin(async move {
//!             println!("[{sev}] {msg}");
//!         })));
//!
//!     let client = RealtimeClient::new(
//!         RealtimeConfig { api_key: "sk-...".into(), ..Default::default() },
//!         callbacks,
//!         Box::new(CpalSource::new()),
//!         scheduler,
//!     )?;
//!     client.connect().await?;
//!     Ok(())
//! }
//! ```

mod base;
mod client;
mod config;
mod messages;

pub use base::{
    AudioOutputCallback, ConnectionState, LogCallback, LogSeverity, PayloadCallback,
    RealtimeCallbacks, RealtimeError, RealtimeResult, SpeakingCallback, StatusCallback,
};
pub use client::RealtimeClient;
pub use config::{
    DEFAULT_GREETING_INSTRUCTIONS, REALTIME_SAMPLE_RATE, REALTIME_URL, RESPONSE_TRIGGER_DELAY_MS,
    RealtimeConfig, RealtimeModel, RealtimeVoice, VadConfig,
};
pub use messages::{
    ApiError, ClientEvent, ContentPart, OutputItem, ResponseConfig, ResponseInfo, ServerEvent,
    SessionConfig, SessionInfo, TurnDetection,
};
