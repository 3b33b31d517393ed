//! Playback scheduling: gap-free, non-overlapping rendering of inbound
//! audio chunks.
//!
//! The [`PlaybackScheduler`] owns a single monotonic cursor, the earliest
//! time the next chunk may begin on the output clock. Each arriving chunk is
//! scheduled at `max(now, cursor)` and the cursor advances by the chunk's
//! duration, so chunks play strictly in arrival order with no gaps or
//! overlaps regardless of arrival jitter. When the clock catches back up to
//! the cursor the assistant has finished speaking.
//!
//! Output devices sit behind the [`AudioSink`] capability trait: a clock plus
//! scheduled sample submission. [`CpalSink`] renders through the default
//! cpal output device from a dedicated thread.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::Result as AnyResult;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, SupportedStreamConfigRange};
use parking_lot::Mutex;

use super::pcm::samples_to_f32;
use super::{AudioError, AudioResult, WIRE_SAMPLE_RATE};

/// How close the output clock must be to the cursor before the assistant
/// counts as finished speaking, in seconds.
const CATCH_UP_TOLERANCE: f64 = 0.1;

/// Extra slack added to completion watchers so the clock check runs after
/// the chunk's nominal end, not on its edge.
const WATCH_SLACK: Duration = Duration::from_millis(20);

/// A chunk of mono float samples scheduled at an absolute output-clock time.
#[derive(Debug, Clone)]
pub struct ScheduledChunk {
    /// Start time in seconds on the sink's clock
    pub start: f64,
    /// Mono samples at the wire rate
    pub samples: Vec<f32>,
}

/// Computed placement of an enqueued chunk.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackEntry {
    /// Scheduled start time in seconds
    pub start: f64,
    /// Chunk duration in seconds
    pub duration: f64,
}

/// Speaker output capability: an output clock plus scheduled submission.
pub trait AudioSink: Send + Sync {
    /// Current time in seconds on the output clock.
    fn clock(&self) -> f64;

    /// Hand a chunk to the device for rendering at its scheduled start.
    fn submit(&self, chunk: ScheduledChunk) -> AudioResult<()>;

    /// Drop everything still queued.
    fn clear(&self);
}

/// Hook invoked when the assistant transitions between speaking and silent.
pub type SpeakingHook = Arc<dyn Fn(bool) + Send + Sync>;

// =============================================================================
// Scheduler
// =============================================================================

/// Duration-ordered playback scheduler over an [`AudioSink`].
pub struct PlaybackScheduler {
    sink: Arc<dyn AudioSink>,
    next_start: Mutex<f64>,
    speaking: AtomicBool,
    closed: AtomicBool,
    speaking_hook: Mutex<Option<SpeakingHook>>,
}

impl PlaybackScheduler {
    /// Create a scheduler; the cursor starts at the sink's current time.
    pub fn new(sink: Arc<dyn AudioSink>) -> Arc<Self> {
        let now = sink.clock();
        Arc::new(Self {
            sink,
            next_start: Mutex::new(now),
            speaking: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            speaking_hook: Mutex::new(None),
        })
    }

    /// Register the speaking-state hook.
    pub fn set_speaking_hook(&self, hook: SpeakingHook) {
        *self.speaking_hook.lock() = Some(hook);
    }

    /// Whether assistant audio is currently rendering or queued.
    pub fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::SeqCst)
    }

    /// Whether the output clock has caught up to the cursor.
    pub fn caught_up(&self) -> bool {
        self.sink.clock() >= *self.next_start.lock() - CATCH_UP_TOLERANCE
    }

    /// Schedule a decoded PCM16 chunk for gap-free playback.
    ///
    /// Returns the computed placement. Start times over any sequence of
    /// calls are non-decreasing and never overlap the previous chunk.
    pub fn enqueue(self: &Arc<Self>, pcm: &[i16]) -> AudioResult<PlaybackEntry> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AudioError::PlaybackUnavailable(
                "scheduler is closed".to_string(),
            ));
        }

        let samples = samples_to_f32(pcm);
        let duration = samples.len() as f64 / WIRE_SAMPLE_RATE as f64;

        let entry = {
            let mut next_start = self.next_start.lock();
            let start = self.sink.clock().max(*next_start);
            *next_start = start + duration;
            PlaybackEntry { start, duration }
        };

        self.sink.submit(ScheduledChunk {
            start: entry.start,
            samples,
        })?;

        if !self.speaking.swap(true, Ordering::SeqCst) {
            self.emit_speaking(true);
        }

        // Watch for this chunk's end; if nothing further was scheduled by
        // then, the assistant is done until the next delta arrives.
        let scheduler = self.clone();
        tokio::spawn(async move {
            let wait = (entry.start + entry.duration - scheduler.sink.clock()).max(0.0);
            tokio::time::sleep(Duration::from_secs_f64(wait) + WATCH_SLACK).await;

            if scheduler.closed.load(Ordering::SeqCst) {
                return;
            }
            if scheduler.caught_up() && scheduler.speaking.swap(false, Ordering::SeqCst) {
                scheduler.emit_speaking(false);
            }
        });

        Ok(entry)
    }

    /// Re-arm a closed scheduler for a fresh connection: reopen, drop any
    /// stale speaking state, and re-sync the cursor to the output clock.
    pub fn reset(&self) {
        self.closed.store(false, Ordering::SeqCst);
        self.speaking.store(false, Ordering::SeqCst);
        *self.next_start.lock() = self.sink.clock();
    }

    /// Release playback resources. Further `enqueue` calls fail and pending
    /// completion watchers are discarded.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.speaking.store(false, Ordering::SeqCst);
        self.sink.clear();
    }

    fn emit_speaking(&self, speaking: bool) {
        if let Some(hook) = self.speaking_hook.lock().clone() {
            hook(speaking);
        }
    }
}

// =============================================================================
// cpal binding
// =============================================================================

/// Negotiated output format.
struct OutputFormat {
    sample_rate: u32,
    channels: u16,
}

struct ActiveChunk {
    start_frame: u64,
    samples: Vec<f32>,
    pos: usize,
}

/// Render state shared with the device callback.
struct SinkShared {
    queue: VecDeque<ActiveChunk>,
    consumed: u64,
}

impl SinkShared {
    /// Next mono sample due at the current frame, or silence.
    fn next_sample(&mut self) -> f32 {
        let t = self.consumed;
        loop {
            let Some(front) = self.queue.front_mut() else {
                return 0.0;
            };
            if front.pos == 0 && front.start_frame > t {
                return 0.0;
            }
            if front.pos < front.samples.len() {
                let s = front.samples[front.pos];
                front.pos += 1;
                return s;
            }
            self.queue.pop_front();
        }
    }
}

/// Speaker sink backed by the default cpal output device.
///
/// The output clock is derived from frames actually consumed by the device
/// callback, so `clock()` tracks what the listener has heard.
pub struct CpalSink {
    shared: Arc<Mutex<SinkShared>>,
    sample_rate: u32,
    stop_tx: std::sync::mpsc::Sender<()>,
    _thread: JoinHandle<()>,
}

impl CpalSink {
    /// Open the default output device.
    pub fn open() -> AudioResult<Self> {
        let shared = Arc::new(Mutex::new(SinkShared {
            queue: VecDeque::new(),
            consumed: 0,
        }));
        let (ready_tx, ready_rx) = std::sync::mpsc::sync_channel::<AnyResult<u32>>(1);
        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();

        let render_shared = shared.clone();
        let thread = std::thread::spawn(move || {
            let opened = Self::default_output_device().and_then(|device| {
                let format = Self::negotiate_format(&device)?;
                let config = cpal::StreamConfig {
                    channels: format.channels,
                    sample_rate: cpal::SampleRate(format.sample_rate),
                    buffer_size: cpal::BufferSize::Default,
                };

                let channels = format.channels as usize;
                let callback_shared = render_shared.clone();
                let stream = device
                    .build_output_stream(
                        &config,
                        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                            let mut inner = callback_shared.lock();
                            for frame in data.chunks_mut(channels) {
                                let sample = inner.next_sample();
                                inner.consumed += 1;
                                for slot in frame {
                                    *slot = sample;
                                }
                            }
                        },
                        |err| {
                            tracing::error!("playback stream error: {err}");
                        },
                        None,
                    )
                    .map_err(|e| anyhow::anyhow!("failed to build output stream: {e}"))?;

                stream
                    .play()
                    .map_err(|e| anyhow::anyhow!("failed to start output stream: {e}"))?;

                Ok((stream, format.sample_rate))
            });

            match opened {
                Ok((stream, rate)) => {
                    let _ = ready_tx.send(Ok(rate));
                    let _ = stop_rx.recv();
                    drop(stream);
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            }
        });

        match ready_rx.recv() {
            Ok(Ok(sample_rate)) => {
                tracing::info!("speaker output opened at {sample_rate} Hz");
                Ok(Self {
                    shared,
                    sample_rate,
                    stop_tx,
                    _thread: thread,
                })
            }
            Ok(Err(e)) => Err(AudioError::PlaybackUnavailable(e.to_string())),
            Err(_) => Err(AudioError::PlaybackUnavailable(
                "playback thread exited before reporting".to_string(),
            )),
        }
    }

    fn default_output_device() -> AnyResult<Device> {
        let host = cpal::default_host();
        host.default_output_device()
            .ok_or_else(|| anyhow::anyhow!("no default output device"))
    }

    /// Prefer the wire rate so no conversion is needed; otherwise fall back
    /// to the common device rates, stereo before mono (more widely
    /// supported on output).
    fn negotiate_format(device: &Device) -> AnyResult<OutputFormat> {
        let configs: Vec<SupportedStreamConfigRange> = device
            .supported_output_configs()
            .map_err(|e| anyhow::anyhow!("failed to query output configs: {e}"))?
            .collect();

        if configs.is_empty() {
            anyhow::bail!("no supported output configurations");
        }

        let preferred_rates = [WIRE_SAMPLE_RATE, 48000, 44100];
        for &rate in &preferred_rates {
            let target = SampleRate(rate);
            for &channels in &[2u16, 1] {
                if configs.iter().any(|c| {
                    c.channels() == channels
                        && c.min_sample_rate() <= target
                        && c.max_sample_rate() >= target
                }) {
                    return Ok(OutputFormat {
                        sample_rate: rate,
                        channels,
                    });
                }
            }
        }

        let best = configs
            .iter()
            .max_by_key(|c| c.max_sample_rate().0)
            .expect("configs is non-empty");
        Ok(OutputFormat {
            sample_rate: best.max_sample_rate().0.min(48000),
            channels: best.channels(),
        })
    }
}

impl AudioSink for CpalSink {
    fn clock(&self) -> f64 {
        self.shared.lock().consumed as f64 / self.sample_rate as f64
    }

    fn submit(&self, chunk: ScheduledChunk) -> AudioResult<()> {
        let samples = if self.sample_rate == WIRE_SAMPLE_RATE {
            chunk.samples
        } else {
            convert_rate(&chunk.samples, WIRE_SAMPLE_RATE, self.sample_rate)
        };
        let start_frame = (chunk.start * self.sample_rate as f64).round() as u64;

        self.shared.lock().queue.push_back(ActiveChunk {
            start_frame,
            samples,
            pos: 0,
        });
        Ok(())
    }

    fn clear(&self) {
        self.shared.lock().queue.clear();
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
    }
}

/// Linear-interpolation rate conversion for the render path.
fn convert_rate(samples: &[f32], from: u32, to: u32) -> Vec<f32> {
    if from == to || samples.is_empty() {
        return samples.to_vec();
    }
    let ratio = from as f64 / to as f64;
    let out_len = (samples.len() as f64 / ratio).round() as usize;
    let mut out = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let pos = i as f64 * ratio;
        let idx = pos.floor() as usize;
        let frac = (pos - idx as f64) as f32;
        let p0 = samples.get(idx).copied().unwrap_or(0.0);
        let p1 = samples.get(idx + 1).copied().unwrap_or(p0);
        out.push(p0 + (p1 - p0) * frac);
    }
    out
}
