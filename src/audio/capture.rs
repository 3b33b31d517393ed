//! Microphone capture engine.
//!
//! Capture is modeled as a narrow capability trait ([`AudioSource`]) so the
//! protocol client never touches a device API directly: a source yields
//! fixed-size mono float frames over a channel until stopped. The reference
//! binding ([`CpalSource`]) drives the default cpal input device from a
//! dedicated thread (cpal streams are not `Send`), negotiating the closest
//! supported format and downmixing to mono.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use anyhow::Result as AnyResult;
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, SupportedStreamConfigRange};
use tokio::sync::{mpsc, oneshot};

use super::{AudioError, AudioResult, WIRE_SAMPLE_RATE};

/// Reference capture block size, in mono samples.
pub const CAPTURE_BLOCK_SIZE: usize = 4096;

/// Frame channel depth; the consumer drains far faster than the audio
/// thread produces, so a short queue only matters during teardown.
const FRAME_CHANNEL_CAPACITY: usize = 32;

/// One block of captured audio, tagged with the rate it was captured at.
///
/// Created once per capture callback and consumed immediately by the
/// resample -> encode -> send pipeline; never retained.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    /// Mono samples in [-1.0, 1.0]
    pub samples: Vec<f32>,
    /// Device sample rate in Hz
    pub sample_rate: u32,
}

/// Root-mean-square loudness of a frame, for diagnostic logging only.
pub fn frame_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|&s| s * s).sum();
    (sum / samples.len() as f32).sqrt()
}

/// Microphone capture capability.
///
/// Implementations own the input device exclusively while capturing. `stop`
/// must be idempotent, callable from the teardown path of a failed `start`,
/// and must guarantee that no frames are delivered after it returns.
#[async_trait]
pub trait AudioSource: Send + Sync {
    /// Begin capturing.
    ///
    /// Returns a receiver of [`CapturedFrame`]s, or
    /// [`AudioError::CaptureUnavailable`] if no device exists or access is
    /// denied.
    async fn start(&mut self) -> AudioResult<mpsc::Receiver<CapturedFrame>>;

    /// Stop capturing and release the device.
    async fn stop(&mut self) -> AudioResult<()>;

    /// Whether the source is currently capturing.
    fn is_capturing(&self) -> bool;

    /// Source name for logging.
    fn name(&self) -> &str;
}

// =============================================================================
// cpal binding
// =============================================================================

/// Negotiated input format.
struct InputFormat {
    sample_rate: u32,
    channels: u16,
}

/// Capture source backed by the default cpal input device.
pub struct CpalSource {
    running: Arc<AtomicBool>,
    control: Option<CaptureControl>,
}

struct CaptureControl {
    stop_tx: std::sync::mpsc::Sender<()>,
    thread: JoinHandle<()>,
}

impl CpalSource {
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            control: None,
        }
    }

    fn default_input_device() -> AnyResult<Device> {
        let host = cpal::default_host();
        host.default_input_device()
            .ok_or_else(|| anyhow::anyhow!("no default input device"))
    }

    /// Pick the closest supported input format: the wire rate if the device
    /// offers it, then the common capture rates, mono preferred over stereo.
    fn negotiate_format(device: &Device) -> AnyResult<InputFormat> {
        let configs: Vec<SupportedStreamConfigRange> = device
            .supported_input_configs()
            .map_err(|e| anyhow::anyhow!("failed to query input configs: {e}"))?
            .collect();

        if configs.is_empty() {
            anyhow::bail!("no supported input configurations");
        }

        let preferred_rates = [WIRE_SAMPLE_RATE, 48000, 44100, 16000];
        for &rate in &preferred_rates {
            let target = SampleRate(rate);
            for &channels in &[1u16, 2] {
                if configs.iter().any(|c| {
                    c.channels() == channels
                        && c.min_sample_rate() <= target
                        && c.max_sample_rate() >= target
                }) {
                    return Ok(InputFormat {
                        sample_rate: rate,
                        channels,
                    });
                }
            }
        }

        // Whatever the device offers, lowest channel count first.
        let best = configs
            .iter()
            .min_by_key(|c| (c.channels(), c.min_sample_rate().0))
            .expect("configs is non-empty");
        Ok(InputFormat {
            sample_rate: best.max_sample_rate().0.min(48000),
            channels: best.channels(),
        })
    }
}

impl Default for CpalSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AudioSource for CpalSource {
    async fn start(&mut self) -> AudioResult<mpsc::Receiver<CapturedFrame>> {
        if self.control.is_some() {
            return Err(AudioError::CaptureUnavailable(
                "capture already running".to_string(),
            ));
        }

        let (frame_tx, frame_rx) = mpsc::channel::<CapturedFrame>(FRAME_CHANNEL_CAPACITY);
        let (ready_tx, ready_rx) = oneshot::channel::<AnyResult<u32>>();
        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();

        let running = self.running.clone();

        // The stream is !Send, so a dedicated thread owns it for the whole
        // capture lifetime and tears it down on the stop signal.
        let thread = std::thread::spawn(move || {
            let opened = Self::default_input_device().and_then(|device| {
                let format = Self::negotiate_format(&device)?;
                let config = cpal::StreamConfig {
                    channels: format.channels,
                    sample_rate: cpal::SampleRate(format.sample_rate),
                    buffer_size: cpal::BufferSize::Default,
                };

                let channels = format.channels as usize;
                let sample_rate = format.sample_rate;
                let callback_running = running.clone();
                let mut block: Vec<f32> = Vec::with_capacity(CAPTURE_BLOCK_SIZE * 2);

                let stream = device
                    .build_input_stream(
                        &config,
                        move |data: &[f32], _: &cpal::InputCallbackInfo| {
                            if !callback_running.load(Ordering::SeqCst) {
                                return;
                            }

                            if channels == 1 {
                                block.extend_from_slice(data);
                            } else {
                                for frame in data.chunks(channels) {
                                    let sum: f32 = frame.iter().sum();
                                    block.push(sum / frame.len() as f32);
                                }
                            }

                            while block.len() >= CAPTURE_BLOCK_SIZE {
                                let samples: Vec<f32> =
                                    block.drain(..CAPTURE_BLOCK_SIZE).collect();
                                // Never block the audio thread; a full queue
                                // means the consumer is gone or stalled.
                                if frame_tx
                                    .try_send(CapturedFrame {
                                        samples,
                                        sample_rate,
                                    })
                                    .is_err()
                                {
                                    tracing::trace!("capture frame dropped (queue full)");
                                }
                            }
                        },
                        |err| {
                            tracing::error!("capture stream error: {err}");
                        },
                        None,
                    )
                    .map_err(|e| anyhow::anyhow!("failed to build input stream: {e}"))?;

                stream
                    .play()
                    .map_err(|e| anyhow::anyhow!("failed to start input stream: {e}"))?;

                Ok((stream, sample_rate))
            });

            match opened {
                Ok((stream, rate)) => {
                    running.store(true, Ordering::SeqCst);
                    let _ = ready_tx.send(Ok(rate));
                    // Park until stop is requested or the source is dropped.
                    let _ = stop_rx.recv();
                    running.store(false, Ordering::SeqCst);
                    drop(stream);
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            }
        });

        self.control = Some(CaptureControl { stop_tx, thread });

        match ready_rx.await {
            Ok(Ok(rate)) => {
                tracing::info!("microphone capture started at {rate} Hz");
                Ok(frame_rx)
            }
            Ok(Err(e)) => {
                // Failed-start teardown path: reap the thread before
                // reporting, so stop() afterwards is a clean no-op.
                self.stop().await?;
                Err(AudioError::CaptureUnavailable(e.to_string()))
            }
            Err(_) => {
                self.stop().await?;
                Err(AudioError::CaptureUnavailable(
                    "capture thread exited before reporting".to_string(),
                ))
            }
        }
    }

    async fn stop(&mut self) -> AudioResult<()> {
        // Silence the callback before the stream winds down so no frame can
        // be delivered after this returns.
        self.running.store(false, Ordering::SeqCst);

        if let Some(control) = self.control.take() {
            let _ = control.stop_tx.send(());
            let _ = tokio::task::spawn_blocking(move || control.thread.join()).await;
            tracing::info!("microphone capture stopped");
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "cpal-input"
    }
}
