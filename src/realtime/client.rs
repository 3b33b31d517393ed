//! Realtime protocol client.
//!
//! Owns the WebSocket connection and drives the whole session: sends the
//! one-shot session configuration, pumps captured microphone frames through
//! the resample -> PCM -> transport pipeline into `input_audio_buffer.append`
//! events, dispatches inbound events, feeds assistant audio to the playback
//! scheduler, and surfaces the structured profile payload when one appears
//! in a completed response.
//!
//! # Lifecycle
//!
//! `idle -> connecting -> connected -> {error | disconnected}`, with an
//! independent mute flag that suppresses audio egress without touching the
//! connection. All per-connection state lives in one [`SessionState`] built
//! by `connect()` and destroyed by `disconnect()` or transport close; a
//! second `connect()` while a session is live is a no-op.
//!
//! # Concurrency
//!
//! One spawned session task runs a `select!` loop over the outbound event
//! channel and the inbound WebSocket stream; a frame-pump task forwards
//! captured audio into that channel. Both are aborted on teardown, and a
//! per-session liveness gate discards any callback that would fire after
//! teardown has begun.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::audio::{
    AudioSource, CapturedFrame, PlaybackScheduler, decode_samples, encode_samples, frame_rms,
    from_transport, resample_to_wire,
};
use crate::profile;

use super::base::{
    ConnectionState, LogSeverity, RealtimeCallbacks, RealtimeError, RealtimeResult,
};
use super::config::{RESPONSE_TRIGGER_DELAY_MS, RealtimeConfig};
use super::messages::{ClientEvent, ResponseInfo, ServerEvent, SessionConfig};

/// Channel capacity for outbound events.
const WS_CHANNEL_CAPACITY: usize = 256;

/// Log one diagnostic line per this many outbound audio packets.
const PACKET_LOG_INTERVAL: u64 = 100;

// =============================================================================
// Client
// =============================================================================

/// Realtime protocol client.
///
/// Construct once per conversation surface with the audio bindings and the
/// caller's callback set, then `connect()`. The client holds at most one
/// live transport at a time.
pub struct RealtimeClient {
    config: RealtimeConfig,
    callbacks: Arc<RealtimeCallbacks>,
    muted: Arc<AtomicBool>,
    state: Arc<parking_lot::RwLock<ConnectionState>>,
    session: Mutex<Option<SessionState>>,
    source: Arc<Mutex<Box<dyn AudioSource>>>,
    scheduler: Arc<PlaybackScheduler>,
}

/// All state owned by one live connection. Created on connect, destroyed on
/// disconnect or transport close.
struct SessionState {
    live: Arc<AtomicBool>,
    emitter: Emitter,
    session_task: JoinHandle<()>,
    pump_task: Option<JoinHandle<()>>,
    greeting_task: Arc<parking_lot::Mutex<Option<JoinHandle<()>>>>,
}

impl RealtimeClient {
    /// Create a new client.
    ///
    /// Fails with [`RealtimeError::AuthenticationFailed`] if the credential
    /// is missing; the key itself is only validated by the remote end at
    /// connect time.
    pub fn new(
        config: RealtimeConfig,
        callbacks: RealtimeCallbacks,
        source: Box<dyn AudioSource>,
        scheduler: Arc<PlaybackScheduler>,
    ) -> RealtimeResult<Self> {
        if config.api_key.is_empty() {
            return Err(RealtimeError::AuthenticationFailed(
                "API key is required".to_string(),
            ));
        }

        Ok(Self {
            config,
            callbacks: Arc::new(callbacks),
            muted: Arc::new(AtomicBool::new(false)),
            state: Arc::new(parking_lot::RwLock::new(ConnectionState::Idle)),
            session: Mutex::new(None),
            source: Arc::new(Mutex::new(source)),
            scheduler,
        })
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Whether audio egress is currently suppressed.
    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }

    /// Toggle audio egress suppression. Idempotent; does not affect the
    /// connection. Muted frames are dropped silently at the pump.
    pub async fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::SeqCst);
        let label = if muted { "muted" } else { "unmuted" };
        let slot = self.session.lock().await;
        if let Some(session) = slot.as_ref() {
            session
                .emitter
                .log(LogSeverity::Event, format!("Microphone {label}"))
                .await;
        } else {
            tracing::debug!("microphone {label}");
        }
    }

    /// Open the transport, configure the session, and start capture.
    ///
    /// On transport open the client sends a single `session.update` and
    /// begins streaming microphone audio. A capture failure is reported
    /// through the status callback as `error` but leaves the open
    /// connection up (the assistant can still be heard). A second call
    /// while a session is live is a no-op.
    pub async fn connect(&self) -> RealtimeResult<()> {
        let mut slot = self.session.lock().await;
        if let Some(existing) = slot.as_ref()
            && existing.live.load(Ordering::SeqCst)
        {
            tracing::debug!("connect() ignored: session already live");
            return Ok(());
        }

        let live = Arc::new(AtomicBool::new(true));
        let emitter = Emitter {
            callbacks: self.callbacks.clone(),
            live: live.clone(),
            state: self.state.clone(),
        };

        emitter.set_status(ConnectionState::Connecting).await;
        emitter
            .log(LogSeverity::Info, "Connecting to realtime endpoint")
            .await;

        let request = match build_request(&self.config) {
            Ok(request) => request,
            Err(e) => {
                emitter
                    .log(LogSeverity::Error, format!("Bad endpoint: {e}"))
                    .await;
                emitter.set_status(ConnectionState::Error).await;
                return Err(e);
            }
        };
        let (ws, _response) = match tokio_tungstenite::connect_async(request).await {
            Ok(pair) => pair,
            Err(e) => {
                emitter
                    .log(LogSeverity::Error, format!("Connection failed: {e}"))
                    .await;
                emitter.set_status(ConnectionState::Error).await;
                return Err(RealtimeError::ConnectionFailed(e.to_string()));
            }
        };

        emitter.log(LogSeverity::Info, "Transport connected").await;
        emitter.set_status(ConnectionState::Connected).await;

        let (ws_tx, ws_rx) = mpsc::channel::<ClientEvent>(WS_CHANNEL_CAPACITY);

        // The one session.update of this connection; queued ahead of any
        // audio the pump produces.
        emitter
            .log(LogSeverity::Info, "Sending session configuration")
            .await;
        ws_tx
            .send(ClientEvent::SessionUpdate {
                session: SessionConfig::from_client_config(&self.config),
            })
            .await
            .map_err(|e| RealtimeError::WebSocketError(e.to_string()))?;

        // Fresh playback epoch for this connection.
        self.scheduler.reset();
        {
            let hook_emitter = emitter.clone();
            self.scheduler.set_speaking_hook(Arc::new(move |speaking| {
                let emitter = hook_emitter.clone();
                tokio::spawn(async move {
                    emitter.assistant_speaking(speaking).await;
                });
            }));
        }

        let greeting_task: Arc<parking_lot::Mutex<Option<JoinHandle<()>>>> =
            Arc::new(parking_lot::Mutex::new(None));

        let ctx = SessionContext {
            emitter: emitter.clone(),
            scheduler: self.scheduler.clone(),
            ws_tx: ws_tx.clone(),
            greeting_task: greeting_task.clone(),
            greeting_instructions: self.config.greeting_instructions.clone(),
            source: self.source.clone(),
        };
        let session_task = tokio::spawn(run_session(ws, ws_rx, ctx));

        // Microphone egress path.
        let pump_task = {
            let mut source = self.source.lock().await;
            match source.start().await {
                Ok(frames) => {
                    drop(source);
                    emitter
                        .log(LogSeverity::Info, "Audio capture started")
                        .await;
                    Some(tokio::spawn(run_frame_pump(
                        frames,
                        ws_tx,
                        self.muted.clone(),
                        emitter.clone(),
                    )))
                }
                Err(e) => {
                    drop(source);
                    // The connection stays open; no audio will ever be sent.
                    emitter
                        .log(LogSeverity::Error, format!("Audio capture error: {e}"))
                        .await;
                    emitter.set_status(ConnectionState::Error).await;
                    None
                }
            }
        };

        *slot = Some(SessionState {
            live,
            emitter,
            session_task,
            pump_task,
            greeting_task,
        });
        Ok(())
    }

    /// Caller-initiated scoped shutdown: stops capture, closes the
    /// transport, releases playback resources. Safe to call from any state;
    /// once it returns no further callbacks fire. Calling it again is a
    /// no-op.
    pub async fn disconnect(&self) {
        let mut slot = self.session.lock().await;
        let Some(session) = slot.take() else {
            tracing::debug!("disconnect() ignored: no active session");
            return;
        };

        // Gate callbacks before anything is torn down so late-firing tasks
        // are discarded rather than acted on.
        session.live.store(false, Ordering::SeqCst);

        if let Some(handle) = session.greeting_task.lock().take() {
            handle.abort();
        }
        session.session_task.abort();
        if let Some(pump) = session.pump_task {
            pump.abort();
        }

        {
            let mut source = self.source.lock().await;
            let _ = source.stop().await;
        }
        self.scheduler.close();

        *self.state.write() = ConnectionState::Disconnected;
        tracing::info!("disconnected from realtime endpoint");
    }
}

/// Build the WebSocket upgrade request carrying the connection-level
/// credential.
fn build_request(config: &RealtimeConfig) -> RealtimeResult<http::Request<()>> {
    let ws_url = config.ws_url();
    let parsed =
        url::Url::parse(&ws_url).map_err(|e| RealtimeError::ConnectionFailed(e.to_string()))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| RealtimeError::ConnectionFailed("endpoint has no host".to_string()))?;
    let host_header = match parsed.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };

    http::Request::builder()
        .uri(&ws_url)
        .header("Authorization", format!("Bearer {}", config.api_key))
        .header("OpenAI-Beta", "realtime=v1")
        .header(
            "Sec-WebSocket-Key",
            tungstenite::handshake::client::generate_key(),
        )
        .header("Sec-WebSocket-Version", "13")
        .header("Connection", "Upgrade")
        .header("Upgrade", "websocket")
        .header("Host", host_header)
        .body(())
        .map_err(|e| RealtimeError::ConnectionFailed(e.to_string()))
}

// =============================================================================
// Session tasks
// =============================================================================

/// Everything the session task needs to reach the rest of the engine.
struct SessionContext {
    emitter: Emitter,
    scheduler: Arc<PlaybackScheduler>,
    ws_tx: mpsc::Sender<ClientEvent>,
    greeting_task: Arc<parking_lot::Mutex<Option<JoinHandle<()>>>>,
    greeting_instructions: String,
    source: Arc<Mutex<Box<dyn AudioSource>>>,
}

/// The session task: outbound events and inbound frames interleaved on one
/// `select!` loop until the transport closes.
async fn run_session(
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    mut outbound: mpsc::Receiver<ClientEvent>,
    ctx: SessionContext,
) {
    let (mut ws_sink, mut ws_stream) = ws.split();

    loop {
        tokio::select! {
            Some(event) = outbound.recv() => {
                let json = match serde_json::to_string(&event) {
                    Ok(json) => json,
                    Err(e) => {
                        tracing::error!("failed to serialize event: {e}");
                        continue;
                    }
                };
                if let Err(e) = ws_sink.send(Message::Text(json.into())).await {
                    ctx.emitter
                        .log(LogSeverity::Error, format!("Failed to send event: {e}"))
                        .await;
                    break;
                }
            }

            msg = ws_stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ServerEvent>(&text) {
                            Ok(event) => handle_server_event(event, &ctx).await,
                            Err(e) => {
                                // A single bad frame must not end the session.
                                ctx.emitter
                                    .log(
                                        LogSeverity::Error,
                                        format!("Dropped unparseable frame: {e}"),
                                    )
                                    .await;
                            }
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame
                            .map(|f| format!("code {}, reason: {}", f.code, f.reason))
                            .unwrap_or_else(|| "no close frame".to_string());
                        ctx.emitter
                            .log(LogSeverity::Info, format!("Transport closed: {reason}"))
                            .await;
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = ws_sink.send(Message::Pong(data)).await {
                            tracing::error!("failed to send pong: {e}");
                        }
                    }
                    Some(Err(e)) => {
                        ctx.emitter
                            .log(LogSeverity::Error, format!("Transport error: {e}"))
                            .await;
                        break;
                    }
                    None => break,
                    _ => {}
                }
            }

            else => break,
        }
    }

    // Transport is gone, whatever the cause: tear the session down. If the
    // caller already disconnected, the gate is down and this is silent.
    if ctx.emitter.is_live() {
        ctx.emitter.set_status(ConnectionState::Disconnected).await;
        ctx.emitter.live.store(false, Ordering::SeqCst);
    }

    if let Some(handle) = ctx.greeting_task.lock().take() {
        handle.abort();
    }
    {
        let mut source = ctx.source.lock().await;
        let _ = source.stop().await;
    }
    ctx.scheduler.close();

    tracing::info!("realtime session task ended");
}

/// The frame pump: captured frames resampled, PCM-encoded,
/// transport-encoded, and sent in capture order. Muted frames are dropped
/// silently.
async fn run_frame_pump(
    mut frames: mpsc::Receiver<CapturedFrame>,
    ws_tx: mpsc::Sender<ClientEvent>,
    muted: Arc<AtomicBool>,
    emitter: Emitter,
) {
    let mut packet_count: u64 = 0;

    while let Some(frame) = frames.recv().await {
        if !emitter.is_live() {
            break;
        }
        if muted.load(Ordering::SeqCst) {
            continue;
        }

        let rms = frame_rms(&frame.samples);
        let resampled = resample_to_wire(&frame.samples, frame.sample_rate);
        let pcm = encode_samples(&resampled);

        if ws_tx.send(ClientEvent::audio_append(&pcm)).await.is_err() {
            break;
        }

        packet_count += 1;
        if packet_count % PACKET_LOG_INTERVAL == 0 {
            let severity = if rms > 0.01 {
                LogSeverity::Event
            } else {
                LogSeverity::Info
            };
            emitter
                .log(
                    severity,
                    format!("Sent {PACKET_LOG_INTERVAL} audio packets (mic RMS {rms:.4})"),
                )
                .await;
        }
    }

    tracing::debug!("frame pump ended after {packet_count} packets");
}

/// Inbound event dispatch.
async fn handle_server_event(event: ServerEvent, ctx: &SessionContext) {
    match event {
        ServerEvent::SessionCreated { session } => {
            let id = session.id.as_deref().unwrap_or("unknown");
            ctx.emitter
                .log(LogSeverity::Info, format!("Session created: {id}"))
                .await;
        }

        ServerEvent::SessionUpdated { .. } => {
            ctx.emitter
                .log(
                    LogSeverity::Info,
                    "Session updated - scheduling opening response",
                )
                .await;

            // The assistant, not the user, opens the conversation: after a
            // short settle delay send one response.create with the greeting
            // override. The handle is kept so disconnect during the delay
            // cancels the stale trigger.
            let ws_tx = ctx.ws_tx.clone();
            let emitter = ctx.emitter.clone();
            let greeting = ctx.greeting_instructions.clone();
            let handle = tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(RESPONSE_TRIGGER_DELAY_MS)).await;
                if !emitter.is_live() {
                    return;
                }
                emitter
                    .log(LogSeverity::Info, "Triggering opening assistant response")
                    .await;
                let _ = ws_tx.send(ClientEvent::opening_response(&greeting)).await;
            });
            if let Some(previous) = ctx.greeting_task.lock().replace(handle) {
                previous.abort();
            }
        }

        ServerEvent::SpeechStarted { .. } => {
            ctx.emitter
                .log(LogSeverity::Event, "VAD: speech started")
                .await;
            ctx.emitter.user_speaking(true).await;
        }

        ServerEvent::SpeechStopped { .. } => {
            ctx.emitter
                .log(LogSeverity::Event, "VAD: speech stopped")
                .await;
            ctx.emitter.user_speaking(false).await;
        }

        ServerEvent::InputAudioBufferCommitted => {
            ctx.emitter
                .log(LogSeverity::Info, "Audio buffer committed")
                .await;
        }

        ServerEvent::ResponseCreated => {
            ctx.emitter.log(LogSeverity::Info, "Response created").await;
        }

        ServerEvent::AudioDelta { delta } => {
            match from_transport(&delta).and_then(|bytes| decode_samples(&bytes)) {
                Ok(samples) => {
                    if let Err(e) = ctx.scheduler.enqueue(&samples) {
                        ctx.emitter
                            .log(LogSeverity::Error, format!("Playback rejected chunk: {e}"))
                            .await;
                        return;
                    }
                    ctx.emitter.audio_output(samples).await;
                }
                Err(e) => {
                    ctx.emitter
                        .log(
                            LogSeverity::Error,
                            format!("Failed to decode audio delta: {e}"),
                        )
                        .await;
                }
            }
        }

        ServerEvent::ResponseDone { response } => {
            handle_response_done(response, ctx).await;
        }

        ServerEvent::Error { error } => {
            // Logged verbatim; the remote side may still recover, so no
            // state transition. Fatal conditions arrive via transport close.
            ctx.emitter
                .log(
                    LogSeverity::Error,
                    format!("API error: {}: {}", error.error_type, error.message),
                )
                .await;
        }

        ServerEvent::Unknown => {
            tracing::trace!("unhandled server event kind");
        }
    }
}

/// Scan a completed response's text items for the embedded profile payload.
/// The first fenced block decides the outcome either way; a parse failure is
/// logged and swallowed.
async fn handle_response_done(response: ResponseInfo, ctx: &SessionContext) {
    for item in &response.output {
        for part in &item.content {
            if part.content_type != "text" {
                continue;
            }
            let Some(text) = part.text.as_deref() else {
                continue;
            };

            let preview: String = text.chars().take(60).collect();
            ctx.emitter
                .log(LogSeverity::Info, format!("Model text: {preview}..."))
                .await;

            match profile::extract_payload(text) {
                None => {}
                Some(Ok(value)) => {
                    ctx.emitter
                        .log(LogSeverity::Event, "Received structured profile")
                        .await;
                    ctx.emitter.payload(value).await;
                    return;
                }
                Some(Err(e)) => {
                    ctx.emitter
                        .log(
                            LogSeverity::Error,
                            format!("Failed to parse profile JSON: {e}"),
                        )
                        .await;
                    return;
                }
            }
        }
    }
}

// =============================================================================
// Callback emission
// =============================================================================

/// Gated path from the engine to the caller's callbacks. Every emission
/// checks the session liveness gate first, so nothing reaches the caller
/// once teardown has begun.
#[derive(Clone)]
struct Emitter {
    callbacks: Arc<RealtimeCallbacks>,
    live: Arc<AtomicBool>,
    state: Arc<parking_lot::RwLock<ConnectionState>>,
}

impl Emitter {
    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    async fn set_status(&self, state: ConnectionState) {
        *self.state.write() = state;
        if !self.is_live() {
            return;
        }
        if let Some(cb) = &self.callbacks.on_status {
            cb(state).await;
        }
    }

    async fn log(&self, severity: LogSeverity, message: impl Into<String>) {
        let message = message.into();
        match severity {
            LogSeverity::Error => tracing::warn!("{message}"),
            _ => tracing::debug!("{message}"),
        }
        if !self.is_live() {
            return;
        }
        if let Some(cb) = &self.callbacks.on_log {
            cb(message, severity).await;
        }
    }

    async fn user_speaking(&self, speaking: bool) {
        if !self.is_live() {
            return;
        }
        if let Some(cb) = &self.callbacks.on_user_speaking {
            cb(speaking).await;
        }
    }

    async fn assistant_speaking(&self, speaking: bool) {
        if !self.is_live() {
            return;
        }
        if let Some(cb) = &self.callbacks.on_assistant_speaking {
            cb(speaking).await;
        }
    }

    async fn audio_output(&self, samples: Vec<i16>) {
        if !self.is_live() {
            return;
        }
        if let Some(cb) = &self.callbacks.on_audio_output {
            cb(samples).await;
        }
    }

    async fn payload(&self, value: serde_json::Value) {
        if !self.is_live() {
            return;
        }
        if let Some(cb) = &self.callbacks.on_structured_payload {
            cb(value).await;
        }
    }
}
