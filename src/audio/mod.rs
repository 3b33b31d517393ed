//! Audio capture, playback scheduling, and wire-format conversion.
//!
//! Everything on the wire is PCM 16-bit signed little-endian, mono, 24 kHz.
//! The microphone side runs at whatever rate the device negotiates and is
//! resampled down before encoding; the speaker side receives 24 kHz chunks
//! and schedules them gap-free on the output clock.
//!
//! Device access goes through the [`AudioSource`] and [`AudioSink`]
//! capability traits so the engine logic stays portable across audio stacks;
//! the cpal bindings are the reference implementations.

mod capture;
mod pcm;
mod playback;
mod resample;
mod transport;

pub use capture::{AudioSource, CapturedFrame, CpalSource, frame_rms, CAPTURE_BLOCK_SIZE};
pub use pcm::{decode_samples, encode_samples, samples_to_f32};
pub use playback::{AudioSink, CpalSink, PlaybackEntry, PlaybackScheduler, ScheduledChunk};
pub use resample::resample_to_wire;
pub use transport::{from_transport, to_transport};

use thiserror::Error;

/// Sample rate used on the wire in both directions.
pub const WIRE_SAMPLE_RATE: u32 = 24000;

/// Errors that can occur in the audio layer.
#[derive(Debug, Error)]
pub enum AudioError {
    /// Microphone permission denied or no input device exists
    #[error("Capture unavailable: {0}")]
    CaptureUnavailable(String),

    /// Speaker output could not be opened
    #[error("Playback unavailable: {0}")]
    PlaybackUnavailable(String),

    /// Byte buffer is not a whole number of 16-bit samples
    #[error("Malformed audio data: {len} bytes is not a multiple of 2")]
    MalformedAudioData {
        /// Offending buffer length
        len: usize,
    },

    /// Transport text is not valid base64
    #[error("Malformed encoding: {0}")]
    MalformedEncoding(String),

    /// Underlying device stream error
    #[error("Audio device error: {0}")]
    DeviceError(String),
}

/// Result type for audio operations.
pub type AudioResult<T> = Result<T, AudioError>;
