//! End-to-end session tests against a scripted in-process WebSocket server.
//!
//! Each test stands up a real tokio-tungstenite server on a loopback port,
//! points the client at it via the endpoint override, and scripts the server
//! side of the conversation while recording every caller-facing callback.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;

use vector_voice::audio::{
    AudioResult, AudioSink, AudioSource, CapturedFrame, PlaybackScheduler, ScheduledChunk,
    encode_samples, to_transport,
};
use vector_voice::realtime::{
    ConnectionState, LogSeverity, RealtimeCallbacks, RealtimeClient, RealtimeConfig,
};

type ServerWs = WebSocketStream<TcpStream>;

// =============================================================================
// Scripted server
// =============================================================================

/// Bind a loopback WebSocket server running `script` for one connection and
/// return its URL.
async fn spawn_server<F, Fut>(script: F) -> String
where
    F: FnOnce(ServerWs) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        if let Ok((stream, _)) = listener.accept().await {
            let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            script(ws).await;
        }
    });
    format!("ws://{addr}")
}

/// Read text frames until one of `kind` arrives, skipping others.
async fn next_event_of(ws: &mut ServerWs, kind: &str) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for client event")
            .expect("connection closed while waiting")
            .expect("transport error");
        if let Message::Text(text) = msg {
            let value: Value = serde_json::from_str(&text).unwrap();
            if value["type"] == kind {
                return value;
            }
        }
    }
}

async fn send_event(ws: &mut ServerWs, event: Value) {
    ws.send(Message::Text(event.to_string().into()))
        .await
        .unwrap();
}

fn session_updated() -> Value {
    json!({"type": "session.updated", "session": {"id": "sess_1"}})
}

fn audio_delta(samples: &[f32]) -> Value {
    json!({
        "type": "response.audio.delta",
        "delta": to_transport(&encode_samples(samples)),
    })
}

fn response_done_with_text(text: &str) -> Value {
    json!({
        "type": "response.done",
        "response": {
            "id": "resp_1",
            "output": [{
                "role": "assistant",
                "content": [{"type": "text", "text": text}]
            }]
        }
    })
}

// =============================================================================
// Test doubles and recording callbacks
// =============================================================================

/// Sink whose clock never advances; scheduling math still runs.
struct FrozenSink {
    submitted: Mutex<Vec<ScheduledChunk>>,
}

impl FrozenSink {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            submitted: Mutex::new(Vec::new()),
        })
    }
}

impl AudioSink for FrozenSink {
    fn clock(&self) -> f64 {
        0.0
    }
    fn submit(&self, chunk: ScheduledChunk) -> AudioResult<()> {
        self.submitted.lock().push(chunk);
        Ok(())
    }
    fn clear(&self) {
        self.submitted.lock().clear();
    }
}

/// Source that yields a fixed list of frames, then keeps the channel open.
struct ScriptedSource {
    frames: Vec<CapturedFrame>,
    running: Arc<AtomicBool>,
}

impl ScriptedSource {
    fn new(frames: Vec<CapturedFrame>) -> Self {
        Self {
            frames,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    fn silent_frames(count: usize, block: usize, sample_rate: u32) -> Vec<CapturedFrame> {
        (0..count)
            .map(|_| CapturedFrame {
                samples: vec![0.0; block],
                sample_rate,
            })
            .collect()
    }
}

#[async_trait]
impl AudioSource for ScriptedSource {
    async fn start(&mut self) -> AudioResult<mpsc::Receiver<CapturedFrame>> {
        let (tx, rx) = mpsc::channel(64);
        self.running.store(true, Ordering::SeqCst);
        let frames = self.frames.clone();
        tokio::spawn(async move {
            for frame in frames {
                if tx.send(frame).await.is_err() {
                    return;
                }
            }
            // Hold the channel open like a live microphone would.
            std::future::pending::<()>().await;
        });
        Ok(rx)
    }

    async fn stop(&mut self) -> AudioResult<()> {
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Source that emits one frame every few milliseconds until stopped.
struct TickingSource {
    running: Arc<AtomicBool>,
}

impl TickingSource {
    fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[async_trait]
impl AudioSource for TickingSource {
    async fn start(&mut self) -> AudioResult<mpsc::Receiver<CapturedFrame>> {
        let (tx, rx) = mpsc::channel(64);
        self.running.store(true, Ordering::SeqCst);
        let running = self.running.clone();
        tokio::spawn(async move {
            while running.load(Ordering::SeqCst) {
                let frame = CapturedFrame {
                    samples: vec![0.0; 480],
                    sample_rate: 48000,
                };
                if tx.send(frame).await.is_err() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        });
        Ok(rx)
    }

    async fn stop(&mut self) -> AudioResult<()> {
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "ticking"
    }
}

/// Records every callback the engine emits.
#[derive(Clone, Default)]
struct Recorder {
    statuses: Arc<Mutex<Vec<ConnectionState>>>,
    logs: Arc<Mutex<Vec<(String, LogSeverity)>>>,
    payloads: Arc<Mutex<Vec<Value>>>,
    audio_chunks: Arc<Mutex<Vec<Vec<i16>>>>,
    user_speaking: Arc<Mutex<Vec<bool>>>,
}

impl Recorder {
    fn callbacks(&self) -> RealtimeCallbacks {
        let statuses = self.statuses.clone();
        let logs = self.logs.clone();
        let payloads = self.payloads.clone();
        let audio_chunks = self.audio_chunks.clone();
        let user_speaking = self.user_speaking.clone();

        RealtimeCallbacks::default()
            .with_status(Arc::new(move |state| {
                let statuses = statuses.clone();
                Box::pin(async move {
                    statuses.lock().push(state);
                })
            }))
            .with_log(Arc::new(move |message, severity| {
                let logs = logs.clone();
                Box::pin(async move {
                    logs.lock().push((message, severity));
                })
            }))
            .with_structured_payload(Arc::new(move |value| {
                let payloads = payloads.clone();
                Box::pin(async move {
                    payloads.lock().push(value);
                })
            }))
            .with_audio_output(Arc::new(move |samples| {
                let audio_chunks = audio_chunks.clone();
                Box::pin(async move {
                    audio_chunks.lock().push(samples);
                })
            }))
            .with_user_speaking(Arc::new(move |speaking| {
                let user_speaking = user_speaking.clone();
                Box::pin(async move {
                    user_speaking.lock().push(speaking);
                })
            }))
    }
}

fn test_client(
    endpoint: String,
    recorder: &Recorder,
    source: Box<dyn AudioSource>,
) -> Arc<RealtimeClient> {
    let scheduler = PlaybackScheduler::new(FrozenSink::new());
    Arc::new(
        RealtimeClient::new(
            RealtimeConfig {
                api_key: "sk-test".to_string(),
                endpoint: Some(endpoint),
                ..Default::default()
            },
            recorder.callbacks(),
            source,
            scheduler,
        )
        .unwrap(),
    )
}

async fn wait_until(deadline: Duration, mut check: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

// =============================================================================
// Scenario A: session.updated triggers exactly one opening response
// =============================================================================

#[tokio::test]
async fn scenario_a_opening_response_after_session_updated() {
    let (result_tx, result_rx) = tokio::sync::oneshot::channel::<(Duration, usize)>();

    let url = spawn_server(move |mut ws| async move {
        let update = next_event_of(&mut ws, "session.update").await;
        assert_eq!(update["session"]["input_audio_format"], "pcm16");
        assert_eq!(update["session"]["turn_detection"]["type"], "server_vad");

        let sent_at = Instant::now();
        send_event(&mut ws, session_updated()).await;

        let first = next_event_of(&mut ws, "response.create").await;
        let elapsed = sent_at.elapsed();
        assert!(
            first["response"]["instructions"]
                .as_str()
                .unwrap()
                .contains("Begin the conversation"),
        );

        // Nothing else should request a response afterwards.
        let mut extra = 0usize;
        let window = tokio::time::sleep(Duration::from_millis(800));
        tokio::pin!(window);
        loop {
            tokio::select! {
                _ = &mut window => break,
                msg = ws.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        let value: Value = serde_json::from_str(&text).unwrap();
                        if value["type"] == "response.create" {
                            extra += 1;
                        }
                    }
                    _ => break,
                }
            }
        }

        let _ = result_tx.send((elapsed, extra));
    })
    .await;

    let recorder = Recorder::default();
    let client = test_client(url, &recorder, Box::new(ScriptedSource::new(Vec::new())));
    client.connect().await.unwrap();

    let (elapsed, extra) = tokio::time::timeout(Duration::from_secs(5), result_rx)
        .await
        .expect("server script did not finish")
        .unwrap();

    assert!(
        elapsed >= Duration::from_millis(400),
        "opening response arrived before the settle delay: {elapsed:?}"
    );
    assert!(
        elapsed < Duration::from_secs(2),
        "opening response took too long: {elapsed:?}"
    );
    assert_eq!(extra, 0, "more than one response.create was sent");

    client.disconnect().await;
}

#[tokio::test]
async fn scenario_a_disconnect_during_delay_cancels_opening_response() {
    let saw_response_create = Arc::new(AtomicBool::new(false));
    let saw = saw_response_create.clone();

    let url = spawn_server(move |mut ws| async move {
        let _ = next_event_of(&mut ws, "session.update").await;
        send_event(&mut ws, session_updated()).await;
        // Watch the wire for longer than the trigger delay.
        let window = tokio::time::sleep(Duration::from_millis(1200));
        tokio::pin!(window);
        loop {
            tokio::select! {
                _ = &mut window => break,
                msg = ws.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        let value: Value = serde_json::from_str(&text).unwrap();
                        if value["type"] == "response.create" {
                            saw.store(true, Ordering::SeqCst);
                        }
                    }
                    _ => break,
                }
            }
        }
    })
    .await;

    let recorder = Recorder::default();
    let client = test_client(url, &recorder, Box::new(ScriptedSource::new(Vec::new())));
    client.connect().await.unwrap();

    // Give the session time to receive session.updated, then tear down
    // inside the 500 ms delay window.
    tokio::time::sleep(Duration::from_millis(150)).await;
    client.disconnect().await;

    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert!(
        !saw_response_create.load(Ordering::SeqCst),
        "stale opening response fired after disconnect"
    );
}

// =============================================================================
// Scenario B: capture frames become append events, one per frame
// =============================================================================

#[tokio::test]
async fn scenario_b_ten_frames_yield_ten_append_events() {
    let (result_tx, result_rx) = tokio::sync::oneshot::channel::<Vec<usize>>();

    let url = spawn_server(move |mut ws| async move {
        let _ = next_event_of(&mut ws, "session.update").await;

        let mut sizes = Vec::new();
        while sizes.len() < 10 {
            let event = next_event_of(&mut ws, "input_audio_buffer.append").await;
            let decoded = vector_voice::audio::from_transport(
                event["audio"].as_str().expect("audio field"),
            )
            .unwrap();
            sizes.push(decoded.len());
        }
        let _ = result_tx.send(sizes);
    })
    .await;

    let recorder = Recorder::default();
    let frames = ScriptedSource::silent_frames(10, 4096, 48000);
    let client = test_client(url, &recorder, Box::new(ScriptedSource::new(frames)));
    client.connect().await.unwrap();

    let sizes = tokio::time::timeout(Duration::from_secs(5), result_rx)
        .await
        .expect("server script did not finish")
        .unwrap();

    // 4096 samples at 48 kHz downsample to round(4096/2) wire samples of 2
    // bytes each.
    assert_eq!(sizes.len(), 10);
    for size in sizes {
        assert_eq!(size, 2048 * 2);
    }

    client.disconnect().await;
}

#[tokio::test]
async fn muted_frames_are_dropped_silently_and_idempotently() {
    let append_count = Arc::new(Mutex::new(0usize));
    let server_count = append_count.clone();

    let url = spawn_server(move |mut ws| async move {
        let _ = next_event_of(&mut ws, "session.update").await;
        while let Some(Ok(msg)) = ws.next().await {
            if let Message::Text(text) = msg {
                let value: Value = serde_json::from_str(&text).unwrap();
                if value["type"] == "input_audio_buffer.append" {
                    *server_count.lock() += 1;
                }
            }
        }
    })
    .await;

    let recorder = Recorder::default();
    let client = test_client(url, &recorder, Box::new(TickingSource::new()));
    client.connect().await.unwrap();

    // Frames flow while unmuted.
    assert!(
        wait_until(Duration::from_secs(2), || *append_count.lock() > 0).await,
        "no audio flowed before muting"
    );

    // Double mute behaves exactly like a single mute.
    client.set_muted(true).await;
    client.set_muted(true).await;
    assert!(client.is_muted());

    tokio::time::sleep(Duration::from_millis(100)).await;
    let muted_baseline = *append_count.lock();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(
        *append_count.lock(),
        muted_baseline,
        "append events were sent while muted"
    );

    // Unmute resumes the flow.
    client.set_muted(false).await;
    assert!(
        wait_until(Duration::from_secs(2), || *append_count.lock() > muted_baseline).await,
        "audio did not resume after unmute"
    );

    client.disconnect().await;
}

// =============================================================================
// Scenario C: structured payload extraction from response.done
// =============================================================================

#[tokio::test]
async fn scenario_c_payload_extracted_once_and_malformed_fence_logged() {
    let url = spawn_server(move |mut ws| async move {
        let _ = next_event_of(&mut ws, "session.update").await;

        let good = "Here you go.\n```json\n{\"archetype\":\"X\"}\n```";
        send_event(&mut ws, response_done_with_text(good)).await;

        let bad = "Another try.\n```json\n{archetype: nope\n```";
        send_event(&mut ws, response_done_with_text(bad)).await;

        // Keep the connection up while the client processes.
        tokio::time::sleep(Duration::from_secs(3)).await;
    })
    .await;

    let recorder = Recorder::default();
    let client = test_client(url, &recorder, Box::new(ScriptedSource::new(Vec::new())));
    client.connect().await.unwrap();

    let payloads = recorder.payloads.clone();
    assert!(
        wait_until(Duration::from_secs(2), || !payloads.lock().is_empty()).await,
        "payload callback never fired"
    );

    // Allow the malformed turn to be processed too.
    let logs = recorder.logs.clone();
    assert!(
        wait_until(Duration::from_secs(2), || {
            logs.lock()
                .iter()
                .any(|(message, severity)| {
                    *severity == LogSeverity::Error && message.contains("parse")
                })
        })
        .await,
        "malformed fence was not logged"
    );

    let payloads = recorder.payloads.lock();
    assert_eq!(payloads.len(), 1, "expected exactly one payload");
    assert_eq!(payloads[0], json!({"archetype": "X"}));

    let parse_errors = recorder
        .logs
        .lock()
        .iter()
        .filter(|(message, severity)| {
            *severity == LogSeverity::Error && message.contains("parse")
        })
        .count();
    assert_eq!(parse_errors, 1, "expected exactly one parse-failure log");

    client.disconnect().await;
}

// =============================================================================
// VAD and state transitions
// =============================================================================

#[tokio::test]
async fn vad_events_toggle_user_speaking() {
    let url = spawn_server(move |mut ws| async move {
        let _ = next_event_of(&mut ws, "session.update").await;
        send_event(
            &mut ws,
            json!({"type": "input_audio_buffer.speech_started", "audio_start_ms": 10, "item_id": "i1"}),
        )
        .await;
        send_event(
            &mut ws,
            json!({"type": "input_audio_buffer.speech_stopped", "audio_end_ms": 900, "item_id": "i1"}),
        )
        .await;
        tokio::time::sleep(Duration::from_secs(2)).await;
    })
    .await;

    let recorder = Recorder::default();
    let client = test_client(url, &recorder, Box::new(ScriptedSource::new(Vec::new())));
    client.connect().await.unwrap();

    let user_speaking = recorder.user_speaking.clone();
    assert!(
        wait_until(Duration::from_secs(2), || user_speaking.lock().len() >= 2).await,
        "VAD callbacks did not fire"
    );
    assert_eq!(recorder.user_speaking.lock().as_slice(), &[true, false]);

    client.disconnect().await;
}

#[tokio::test]
async fn server_close_transitions_to_disconnected() {
    let url = spawn_server(move |mut ws| async move {
        let _ = next_event_of(&mut ws, "session.update").await;
        let _ = ws.close(None).await;
    })
    .await;

    let recorder = Recorder::default();
    let client = test_client(url, &recorder, Box::new(ScriptedSource::new(Vec::new())));
    client.connect().await.unwrap();

    let statuses = recorder.statuses.clone();
    assert!(
        wait_until(Duration::from_secs(2), || {
            statuses.lock().contains(&ConnectionState::Disconnected)
        })
        .await,
        "client never reported disconnection"
    );
    assert_eq!(client.state(), ConnectionState::Disconnected);

    let observed = recorder.statuses.lock().clone();
    assert_eq!(
        observed,
        vec![
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Disconnected
        ]
    );
}

#[tokio::test]
async fn malformed_inbound_frame_does_not_end_session() {
    let url = spawn_server(move |mut ws| async move {
        let _ = next_event_of(&mut ws, "session.update").await;
        ws.send(Message::Text("this is not json{{".to_string().into()))
            .await
            .unwrap();
        // Session should still be alive to receive this.
        send_event(&mut ws, audio_delta(&[0.5; 240])).await;
        tokio::time::sleep(Duration::from_secs(2)).await;
    })
    .await;

    let recorder = Recorder::default();
    let client = test_client(url, &recorder, Box::new(ScriptedSource::new(Vec::new())));
    client.connect().await.unwrap();

    let audio_chunks = recorder.audio_chunks.clone();
    assert!(
        wait_until(Duration::from_secs(2), || !audio_chunks.lock().is_empty()).await,
        "audio after the bad frame never arrived"
    );
    assert_eq!(client.state(), ConnectionState::Connected);
    assert!(
        recorder
            .logs
            .lock()
            .iter()
            .any(|(message, _)| message.contains("unparseable"))
    );

    client.disconnect().await;
}

// =============================================================================
// Teardown
// =============================================================================

#[tokio::test]
async fn disconnect_mid_playback_stops_all_callbacks() {
    let url = spawn_server(move |mut ws| async move {
        let _ = next_event_of(&mut ws, "session.update").await;
        for _ in 0..5 {
            send_event(&mut ws, audio_delta(&[0.1; 2400])).await;
        }
        tokio::time::sleep(Duration::from_secs(3)).await;
    })
    .await;

    let recorder = Recorder::default();
    let client = test_client(url, &recorder, Box::new(ScriptedSource::new(Vec::new())));
    client.connect().await.unwrap();

    let audio_chunks = recorder.audio_chunks.clone();
    assert!(
        wait_until(Duration::from_secs(2), || audio_chunks.lock().len() >= 5).await,
        "playback audio never arrived"
    );

    client.disconnect().await;
    // Aborted tasks may still be mid-poll for an instant; settle before
    // snapshotting.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let chunks_after = recorder.audio_chunks.lock().len();
    let logs_after = recorder.logs.lock().len();

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(recorder.audio_chunks.lock().len(), chunks_after);
    assert_eq!(recorder.logs.lock().len(), logs_after);
    assert_eq!(client.state(), ConnectionState::Disconnected);

    // Second disconnect is a no-op.
    client.disconnect().await;
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn second_connect_while_live_is_noop() {
    let accept_count = Arc::new(Mutex::new(0usize));
    let server_accepts = accept_count.clone();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            if let Ok((stream, _)) = listener.accept().await {
                *server_accepts.lock() += 1;
                tokio::spawn(async move {
                    let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
                    while ws.next().await.is_some() {}
                });
            }
        }
    });

    let recorder = Recorder::default();
    let client = test_client(
        format!("ws://{addr}"),
        &recorder,
        Box::new(ScriptedSource::new(Vec::new())),
    );

    client.connect().await.unwrap();
    client.connect().await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(*accept_count.lock(), 1, "second connect opened a transport");
    client.disconnect().await;
}
