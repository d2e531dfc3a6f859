//! Relay integration tests — start a real relay and drive both legs over
//! WebSocket with a scripted translator.
//!
//! Run with: `cargo test -p voicebridge-relay --test integration`

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use voicebridge_core::config::Config;
use voicebridge_core::error::{Result, VoiceBridgeError};
use voicebridge_relay::RelayState;
use voicebridge_translate::{Fragment, FragmentStream, Translator};

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Translator yielding a fixed fragment script for every call, with an
/// optional per-fragment delay to keep a translation in flight.
struct ScriptedTranslator {
    script: Vec<&'static str>,
    fragment_delay: Duration,
}

impl ScriptedTranslator {
    fn new(script: Vec<&'static str>) -> Self {
        Self {
            script,
            fragment_delay: Duration::ZERO,
        }
    }

    fn with_delay(script: Vec<&'static str>, fragment_delay: Duration) -> Self {
        Self {
            script,
            fragment_delay,
        }
    }
}

#[async_trait]
impl Translator for ScriptedTranslator {
    async fn translate(&self, _text: &str, _source: &str, _target: &str) -> Result<FragmentStream> {
        let delay = self.fragment_delay;
        let mut items: Vec<Result<Fragment>> =
            self.script.iter().map(|t| Ok(Fragment::text(*t))).collect();
        items.push(Ok(Fragment::terminal()));

        Ok(Box::pin(futures::stream::iter(items).then(
            move |fragment| async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                fragment
            },
        )))
    }
}

/// Translator whose stream yields one fragment and then fails, as a cut
/// upstream connection would.
struct FailingMidStreamTranslator;

#[async_trait]
impl Translator for FailingMidStreamTranslator {
    async fn translate(&self, _text: &str, _source: &str, _target: &str) -> Result<FragmentStream> {
        Ok(Box::pin(futures::stream::iter(vec![
            Ok(Fragment::text("Hal")),
            Err(VoiceBridgeError::UpstreamError("stream cut short".into())),
        ])))
    }
}

/// Find an available port.
fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Start a relay on a free port and wait until it answers health checks.
async fn start_test_relay(translator: Arc<dyn Translator>) -> (Arc<RelayState>, u16) {
    let port = find_free_port();
    let state = Arc::new(RelayState::new(Arc::new(Config::default()), translator));

    let server_state = state.clone();
    tokio::spawn(async move {
        let _ = voicebridge_relay::start_relay(server_state, port).await;
    });

    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        if reqwest::get(format!("http://127.0.0.1:{port}/health"))
            .await
            .is_ok()
        {
            break;
        }
    }

    (state, port)
}

async fn create_session(port: u16, source_language: &str, target_language: &str) -> String {
    let response = reqwest::Client::new()
        .post(format!("http://127.0.0.1:{port}/sessions"))
        .json(&json!({
            "sourceLanguage": source_language,
            "targetLanguage": target_language,
        }))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());

    let body: Value = response.json().await.unwrap();
    body["sessionId"].as_str().unwrap().to_string()
}

async fn connect_leg(port: u16, role: &str, session_id: &str) -> WsStream {
    let (ws, _) = connect_async(format!("ws://127.0.0.1:{port}/ws/{role}/{session_id}"))
        .await
        .unwrap();
    ws
}

async fn send_event(ws: &mut WsStream, event: Value) {
    ws.send(Message::Text(event.to_string().into())).await.unwrap();
}

/// Next JSON event from a leg, or None on close/timeout.
async fn next_event(ws: &mut WsStream) -> Option<Value> {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(3), ws.next())
            .await
            .ok()??
            .ok()?;
        match msg {
            Message::Text(text) => return serde_json::from_str(&text).ok(),
            Message::Close(_) => return None,
            _ => continue,
        }
    }
}

/// Collect every event arriving within `window`.
async fn events_within(ws: &mut WsStream, window: Duration) -> Vec<Value> {
    let mut events = Vec::new();
    let deadline = tokio::time::Instant::now() + window;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return events;
        }
        match tokio::time::timeout(remaining, ws.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => {
                if let Ok(value) = serde_json::from_str(&text) {
                    events.push(value);
                }
            }
            Ok(Some(Ok(_))) => continue,
            _ => return events,
        }
    }
}

/// Read events until the ready announcement's terminal fragment.
async fn drain_ready_announcement(ws: &mut WsStream) {
    while let Some(event) = next_event(ws).await {
        if event["type"] == "textFragment" && event["isFinal"] == true {
            return;
        }
    }
    panic!("leg never received the ready announcement");
}

#[tokio::test]
async fn test_lone_leg_is_held_not_translated() {
    let translator = Arc::new(ScriptedTranslator::new(vec!["Hal", "lo"]));
    let (_state, port) = start_test_relay(translator).await;

    let session_id = create_session(port, "en-US", "de-DE").await;
    let mut source = connect_leg(port, "source", &session_id).await;

    // Attach alone: waiting audio, no fragments.
    let first = next_event(&mut source).await.unwrap();
    assert_eq!(first["type"], "sideChannelAudio");

    send_event(&mut source, json!({"type": "setup", "legId": "A1"})).await;
    send_event(&mut source, json!({"type": "utterance", "text": "hello"})).await;

    // The held utterance produces another waiting cue and never a fragment.
    let events = events_within(&mut source, Duration::from_millis(600)).await;
    assert!(events.iter().any(|e| e["type"] == "sideChannelAudio"));
    assert!(events.iter().all(|e| e["type"] != "textFragment"));
}

#[tokio::test]
async fn test_fragments_relayed_in_order_with_hold_cue() {
    let translator = Arc::new(ScriptedTranslator::new(vec!["Hal", "lo"]));
    let (_state, port) = start_test_relay(translator).await;

    let session_id = create_session(port, "en-US", "de-DE").await;
    let mut source = connect_leg(port, "source", &session_id).await;
    let mut target = connect_leg(port, "target", &session_id).await;

    // Both legs hear the one-time ready announcement once paired.
    drain_ready_announcement(&mut source).await;
    drain_ready_announcement(&mut target).await;

    send_event(&mut source, json!({"type": "setup", "legId": "A1"})).await;
    send_event(&mut target, json!({"type": "setup", "legId": "B1"})).await;
    send_event(&mut source, json!({"type": "utterance", "text": "hello"})).await;

    // Counterpart receives the full fragment sequence in emission order,
    // terminal marker unchanged.
    let fragments: Vec<Value> = vec![
        next_event(&mut target).await.unwrap(),
        next_event(&mut target).await.unwrap(),
        next_event(&mut target).await.unwrap(),
    ];
    assert_eq!(fragments[0]["text"], "Hal");
    assert_eq!(fragments[0]["isFinal"], false);
    assert_eq!(fragments[1]["text"], "lo");
    assert_eq!(fragments[2]["text"], "");
    assert_eq!(fragments[2]["isFinal"], true);

    // The speaking leg gets exactly one hold cue, no fragments.
    let source_events = events_within(&mut source, Duration::from_millis(600)).await;
    let holds = source_events
        .iter()
        .filter(|e| e["type"] == "sideChannelAudio")
        .count();
    assert_eq!(holds, 1);
    assert!(source_events.iter().all(|e| e["type"] != "textFragment"));
}

#[tokio::test]
async fn test_midstream_translation_failure_still_terminates_utterance() {
    let (state, port) = start_test_relay(Arc::new(FailingMidStreamTranslator)).await;

    let session_id = create_session(port, "en-US", "de-DE").await;
    let mut source = connect_leg(port, "source", &session_id).await;
    let mut target = connect_leg(port, "target", &session_id).await;
    drain_ready_announcement(&mut source).await;
    drain_ready_announcement(&mut target).await;

    send_event(&mut source, json!({"type": "utterance", "text": "hello"})).await;

    // The counterpart sees the partial fragment, then the terminal marker
    // closing the utterance, never an open-ended sequence.
    let first = next_event(&mut target).await.unwrap();
    assert_eq!(first["type"], "textFragment");
    assert_eq!(first["text"], "Hal");
    assert_eq!(first["isFinal"], false);

    let second = next_event(&mut target).await.unwrap();
    assert_eq!(second["type"], "textFragment");
    assert_eq!(second["text"], "");
    assert_eq!(second["isFinal"], true);

    // Only the utterance is lost; the session stays up.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(state.registry.len().await, 1);
}

#[tokio::test]
async fn test_peer_disconnect_ends_session_for_both_legs() {
    let translator = Arc::new(ScriptedTranslator::new(vec!["Hal", "lo"]));
    let (state, port) = start_test_relay(translator).await;

    let session_id = create_session(port, "en-US", "de-DE").await;
    let mut source = connect_leg(port, "source", &session_id).await;
    let mut target = connect_leg(port, "target", &session_id).await;
    drain_ready_announcement(&mut source).await;
    drain_ready_announcement(&mut target).await;

    target.close(None).await.unwrap();

    // The surviving leg is told the session ended, then the session is
    // gone from the registry.
    let mut saw_session_end = false;
    while let Some(event) = next_event(&mut source).await {
        if event["type"] == "sessionEnd" {
            saw_session_end = true;
            break;
        }
    }
    assert!(saw_session_end);

    for _ in 0..50 {
        if state.registry.len().await == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(state.registry.len().await, 0);
}

#[tokio::test]
async fn test_in_flight_translation_discarded_when_peer_leaves() {
    // Slow fragments keep the translation in flight while the peer leaves.
    let translator = Arc::new(ScriptedTranslator::with_delay(
        vec!["Hal", "lo"],
        Duration::from_millis(300),
    ));
    let (state, port) = start_test_relay(translator).await;

    let session_id = create_session(port, "en-US", "de-DE").await;
    let mut source = connect_leg(port, "source", &session_id).await;
    let mut target = connect_leg(port, "target", &session_id).await;
    drain_ready_announcement(&mut source).await;
    drain_ready_announcement(&mut target).await;

    send_event(&mut source, json!({"type": "utterance", "text": "hello"})).await;
    target.close(None).await.unwrap();

    // Fragments arriving after the counterpart is gone are discarded; the
    // session drains and the surviving leg hears sessionEnd, never the
    // orphaned fragments.
    let source_events = events_within(&mut source, Duration::from_secs(2)).await;
    assert!(source_events.iter().any(|e| e["type"] == "sessionEnd"));
    assert!(source_events.iter().all(|e| e["type"] != "textFragment"));

    for _ in 0..50 {
        if state.registry.len().await == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(state.registry.len().await, 0);
}

#[tokio::test]
async fn test_repeated_leg_errors_escalate_to_teardown() {
    let translator = Arc::new(ScriptedTranslator::new(vec![]));
    let (state, port) = start_test_relay(translator).await;

    let session_id = create_session(port, "en-US", "de-DE").await;
    let mut source = connect_leg(port, "source", &session_id).await;
    assert!(next_event(&mut source).await.is_some());

    // One error is soft; the second escalates.
    send_event(&mut source, json!({"type": "error"})).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(state.registry.len().await, 1);

    send_event(&mut source, json!({"type": "error"})).await;

    let mut saw_session_end = false;
    while let Some(event) = next_event(&mut source).await {
        if event["type"] == "sessionEnd" {
            saw_session_end = true;
            break;
        }
    }
    assert!(saw_session_end);
    for _ in 0..50 {
        if state.registry.len().await == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(state.registry.len().await, 0);
}

#[tokio::test]
async fn test_reattach_replaces_and_closes_prior_leg_connection() {
    let translator = Arc::new(ScriptedTranslator::new(vec!["Hal", "lo"]));
    let (state, port) = start_test_relay(translator).await;

    let session_id = create_session(port, "en-US", "de-DE").await;
    let mut first = connect_leg(port, "source", &session_id).await;
    assert!(next_event(&mut first).await.is_some()); // waiting cue

    // Duplicate attach: the prior handle must be closed, never leaked.
    let mut second = connect_leg(port, "source", &session_id).await;

    let mut first_closed = false;
    for _ in 0..50 {
        match tokio::time::timeout(Duration::from_millis(100), first.next()).await {
            Ok(None) | Ok(Some(Ok(Message::Close(_)))) | Ok(Some(Err(_))) => {
                first_closed = true;
                break;
            }
            _ => continue,
        }
    }
    assert!(first_closed, "replaced leg connection was not closed");

    // Replacing a handle must not tear the session down.
    assert_eq!(state.registry.len().await, 1);

    // The replacement handle is live: it still hears waiting cues.
    let event = next_event(&mut second).await.unwrap();
    assert_eq!(event["type"], "sideChannelAudio");
}

#[tokio::test]
async fn test_unknown_event_kind_is_ignored() {
    let translator = Arc::new(ScriptedTranslator::new(vec!["Hal", "lo"]));
    let (state, port) = start_test_relay(translator).await;

    let session_id = create_session(port, "en-US", "de-DE").await;
    let mut source = connect_leg(port, "source", &session_id).await;
    assert!(next_event(&mut source).await.is_some());

    send_event(&mut source, json!({"type": "dtmf", "digit": "5"})).await;
    send_event(&mut source, json!({"type": "interruption"})).await;
    send_event(&mut source, json!({"type": "status", "name": "codec", "value": "opus"})).await;

    // None of these are fatal; the session survives.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(state.registry.len().await, 1);
}

#[tokio::test]
async fn test_invalid_leg_role_is_rejected() {
    let translator = Arc::new(ScriptedTranslator::new(vec![]));
    let (_state, port) = start_test_relay(translator).await;

    let result = connect_async(format!("ws://127.0.0.1:{port}/ws/middle/some-session")).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_voice_webhook_answers_with_connect_document() {
    let translator = Arc::new(ScriptedTranslator::new(vec![]));
    let (_state, port) = start_test_relay(translator).await;

    let response = reqwest::Client::new()
        .post(format!("http://127.0.0.1:{port}/voice"))
        .form(&[("CallSid", "CA123"), ("From", "+15550001111")])
        .send()
        .await
        .unwrap();

    assert!(response.status().is_success());
    let content_type = response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(content_type.starts_with("text/xml"));
    let body = response.text().await.unwrap();
    assert!(body.contains("/ws/source/"));
}
