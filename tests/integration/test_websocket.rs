//! Integration tests for assessment sessions over a real WebSocket.
//!
//! These tests run the full router on a local port and drive it with a
//! tungstenite client: the greeting sequence, typed and spoken turns,
//! duplicate connections, disconnects, and the admin API.

use std::sync::Arc;
use std::time::Duration;

use futures::SinkExt;
use futures::StreamExt;
use lexi_orchestrator::session::TERMINATED_MESSAGE;
use lexi_orchestrator::testing::{services, speaking_reply, ScriptedModel};
use lexi_orchestrator::{
    create_router, AppState, AssessmentStatus, Config, MemoryStore, Phase, ServerMessage, Speaker,
};
use lexi_report::ProficiencyLevel;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tungstenite::Message;

/// Helper type for WebSocket client
type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Transcript returned by the test transcriber for every utterance.
const SPOKEN_TEXT: &str = "Me llamo Ana y trabajo en un hospital en Madrid.";

struct TestServer {
    base: String,
    store: Arc<MemoryStore>,
    _handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    fn ws_url(&self, assessment_id: &str) -> String {
        format!("ws://{}/ws/assessment/{assessment_id}", self.base)
    }

    fn http_url(&self, path: &str) -> String {
        format!("http://{}{path}", self.base)
    }
}

/// Spawns the router with scripted backends and an in-memory store.
async fn spawn_test_server(model: ScriptedModel) -> TestServer {
    let store = Arc::new(MemoryStore::new());
    let state = AppState::new(Config::default(), services(model), store.clone());
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind");
    let addr = listener.local_addr().expect("Failed to get local addr");

    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.expect("Server failed");
    });

    TestServer {
        base: addr.to_string(),
        store,
        _handle: handle,
    }
}

/// Connects a WebSocket client to the given URL.
async fn connect_client(url: &str) -> WsClient {
    let (ws_stream, _) = connect_async(url)
        .await
        .expect("Failed to connect to WebSocket");
    ws_stream
}

/// Receives the next server message, answering pings on the way.
async fn receive_message(client: &mut WsClient) -> ServerMessage {
    loop {
        let msg = timeout(Duration::from_secs(5), client.next())
            .await
            .expect("Timeout waiting for message")
            .expect("Stream ended")
            .expect("WebSocket error");

        match msg {
            Message::Text(text) => {
                return serde_json::from_str(&text).expect("Failed to parse message");
            }
            Message::Ping(data) => {
                client
                    .send(Message::Pong(data))
                    .await
                    .expect("Failed to send pong");
            }
            Message::Pong(_) => {}
            other => unreachable!("Expected text message, got: {other:?}"),
        }
    }
}

/// Returns true once the server has closed the connection.
async fn wait_for_close(client: &mut WsClient) -> bool {
    loop {
        match timeout(Duration::from_secs(5), client.next()).await {
            Ok(Some(Ok(Message::Close(_))) | None | Some(Err(_))) => return true,
            Ok(Some(Ok(_))) => {}
            Err(_) => return false,
        }
    }
}

async fn send_json(client: &mut WsClient, value: serde_json::Value) {
    client
        .send(Message::Text(value.to_string()))
        .await
        .expect("Failed to send message");
}

async fn say(client: &mut WsClient, text: &str) {
    send_json(
        client,
        serde_json::json!({ "type": "user_transcript", "text": text }),
    )
    .await;
}

/// Consumes the greeting, the speaking transition, and the first prompt.
async fn skip_greeting(client: &mut WsClient) {
    for expected in ["transcript", "phase_transition", "transcript"] {
        let message = receive_message(client).await;
        assert_eq!(message.message_type(), expected);
    }
}

/// Polls the store until a result shows up for the assessment.
async fn wait_for_result(store: &MemoryStore, assessment_id: &str) -> bool {
    for _ in 0..100 {
        if store.result(assessment_id).await.is_some() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

// ============================================================================
// Connection Tests
// ============================================================================

/// The server opens with a spoken greeting, announces the speaking phase,
/// then asks the first question.
#[tokio::test]
async fn test_greeting_sequence_on_connect() {
    let server = spawn_test_server(ScriptedModel::new(Vec::<String>::new())).await;
    let mut client = connect_client(&server.ws_url("asm_ws_greet")).await;

    match receive_message(&mut client).await {
        ServerMessage::Transcript {
            speaker,
            text,
            audio,
        } => {
            assert_eq!(speaker, Speaker::Ai);
            assert!(text.starts_with("Hello! Welcome to your Spanish proficiency assessment."));
            assert_eq!(audio.as_deref(), Some("AAAAAA=="));
        }
        other => unreachable!("Expected greeting, got: {other:?}"),
    }

    assert!(matches!(
        receive_message(&mut client).await,
        ServerMessage::PhaseTransition {
            new_phase: Phase::SpeakingTest,
            ..
        }
    ));

    match receive_message(&mut client).await {
        ServerMessage::Transcript { speaker, text, .. } => {
            assert_eq!(speaker, Speaker::Ai);
            assert!(!text.is_empty());
        }
        other => unreachable!("Expected first prompt, got: {other:?}"),
    }
}

/// A second connection for a live assessment gets an error and is closed.
#[tokio::test]
async fn test_duplicate_connection_is_rejected() {
    let server = spawn_test_server(ScriptedModel::new(Vec::<String>::new())).await;
    let mut first = connect_client(&server.ws_url("asm_ws_dup")).await;
    skip_greeting(&mut first).await;

    let mut second = connect_client(&server.ws_url("asm_ws_dup")).await;
    match receive_message(&mut second).await {
        ServerMessage::Error { message } => assert!(message.contains("asm_ws_dup")),
        other => unreachable!("Expected error, got: {other:?}"),
    }
    assert!(wait_for_close(&mut second).await);

    // the original session keeps going
    say(&mut first, "Sigo aquí.").await;
    assert!(matches!(
        receive_message(&mut first).await,
        ServerMessage::Transcript {
            speaker: Speaker::User,
            ..
        }
    ));
}

// ============================================================================
// Turn Tests
// ============================================================================

/// A typed answer is echoed back, scored, and followed by the next question.
#[tokio::test]
async fn test_user_transcript_turn() {
    let server = spawn_test_server(ScriptedModel::new([speaking_reply(72.0, 74.0)])).await;
    let mut client = connect_client(&server.ws_url("asm_ws_turn")).await;
    skip_greeting(&mut client).await;

    say(&mut client, "Vivo en Sevilla y estudio medicina.").await;

    match receive_message(&mut client).await {
        ServerMessage::Transcript {
            speaker,
            text,
            audio,
        } => {
            assert_eq!(speaker, Speaker::User);
            assert_eq!(text, "Vivo en Sevilla y estudio medicina.");
            assert!(audio.is_none());
        }
        other => unreachable!("Expected echo, got: {other:?}"),
    }
    match receive_message(&mut client).await {
        ServerMessage::Transcript { speaker, text, .. } => {
            assert_eq!(speaker, Speaker::Ai);
            assert_eq!(text, "Thanks, good answer.");
        }
        other => unreachable!("Expected feedback, got: {other:?}"),
    }
    assert_eq!(receive_message(&mut client).await.message_type(), "transcript");
}

/// `audio_complete` followed by a binary frame is transcribed and scored.
#[tokio::test]
async fn test_spoken_turn_is_transcribed() {
    let server = spawn_test_server(ScriptedModel::new([speaking_reply(80.0, 80.0)])).await;
    let mut client = connect_client(&server.ws_url("asm_ws_audio")).await;
    skip_greeting(&mut client).await;

    send_json(&mut client, serde_json::json!({ "type": "audio_complete" })).await;
    client
        .send(Message::Binary(vec![1, 2, 3, 4, 5, 6]))
        .await
        .expect("Failed to send audio");

    match receive_message(&mut client).await {
        ServerMessage::Transcript { speaker, text, .. } => {
            assert_eq!(speaker, Speaker::User);
            assert_eq!(text, SPOKEN_TEXT);
        }
        other => unreachable!("Expected transcript, got: {other:?}"),
    }
}

/// Binary frames without a preceding `audio_complete` are dropped, and
/// unknown text frames do not end the session.
#[tokio::test]
async fn test_stray_frames_are_ignored() {
    let server = spawn_test_server(ScriptedModel::new([speaking_reply(70.0, 70.0)])).await;
    let mut client = connect_client(&server.ws_url("asm_ws_stray")).await;
    skip_greeting(&mut client).await;

    client
        .send(Message::Binary(vec![9; 32]))
        .await
        .expect("Failed to send audio");
    client
        .send(Message::Text("not a control message".to_string()))
        .await
        .expect("Failed to send text");
    say(&mut client, "Prefiero el té al café.").await;

    match receive_message(&mut client).await {
        ServerMessage::Transcript { speaker, text, .. } => {
            assert_eq!(speaker, Speaker::User);
            assert_eq!(text, "Prefiero el té al café.");
        }
        other => unreachable!("Expected typed echo, got: {other:?}"),
    }
}

// ============================================================================
// Persistence Tests
// ============================================================================

/// Closing the socket after one scored turn stores a provisional result.
#[tokio::test]
async fn test_disconnect_persists_partial_result() {
    let server = spawn_test_server(ScriptedModel::new([speaking_reply(90.0, 92.0)])).await;
    let mut client = connect_client(&server.ws_url("asm_ws_partial")).await;
    skip_greeting(&mut client).await;

    say(&mut client, "Me encanta viajar por América Latina.").await;
    for _ in 0..3 {
        receive_message(&mut client).await;
    }
    client.close(None).await.expect("Failed to close");

    assert!(wait_for_result(&server.store, "asm_ws_partial").await);
    let result = server
        .store
        .result("asm_ws_partial")
        .await
        .expect("result stored");
    assert!(!result.completed);
    assert!((result.report.overall_score - 91.0).abs() < 1e-9);
    assert_eq!(result.report.proficiency_level, ProficiencyLevel::C2);
    assert_eq!(
        server.store.status("asm_ws_partial").await,
        Some(AssessmentStatus::Interrupted)
    );
}

// ============================================================================
// Admin API Tests
// ============================================================================

/// Live connections show up in `/api/sessions` and can be terminated.
#[tokio::test]
async fn test_admin_lists_and_terminates_sessions() {
    let server = spawn_test_server(ScriptedModel::new([speaking_reply(60.0, 64.0)])).await;
    let mut client = connect_client(&server.ws_url("asm_ws_admin")).await;
    skip_greeting(&mut client).await;

    say(&mut client, "Trabajo en una escuela pequeña.").await;
    for _ in 0..3 {
        receive_message(&mut client).await;
    }

    let http = reqwest::Client::new();
    let sessions: serde_json::Value = http
        .get(server.http_url("/api/sessions"))
        .send()
        .await
        .expect("Failed to list sessions")
        .json()
        .await
        .expect("Invalid JSON");
    assert_eq!(sessions["sessions"][0]["assessment_id"], "asm_ws_admin");

    let response = http
        .post(server.http_url("/api/assessments/asm_ws_admin/terminate"))
        .send()
        .await
        .expect("Failed to terminate");
    assert!(response.status().is_success());

    match receive_message(&mut client).await {
        ServerMessage::Error { message } => assert_eq!(message, TERMINATED_MESSAGE),
        other => unreachable!("Expected termination notice, got: {other:?}"),
    }
    assert!(wait_for_close(&mut client).await);
    assert!(wait_for_result(&server.store, "asm_ws_admin").await);

    let record: serde_json::Value = http
        .get(server.http_url("/api/assessments/asm_ws_admin/result"))
        .send()
        .await
        .expect("Failed to fetch result")
        .json()
        .await
        .expect("Invalid JSON");
    assert_eq!(record["status"], "interrupted");
    assert_eq!(record["result"]["report"]["proficiency_level"], "B1");
}

// ============================================================================
// Shutdown Tests
// ============================================================================

/// Stopping the server ends live sessions with a stored provisional result.
#[tokio::test]
async fn test_server_shutdown_drains_live_sessions() {
    let store = Arc::new(MemoryStore::new());
    let state = AppState::new(
        Config::default(),
        services(ScriptedModel::new([speaking_reply(90.0, 92.0)])),
        store.clone(),
    );
    let registry = state.registry.clone();
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind");
    let addr = listener.local_addr().expect("Failed to get local addr");
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async {
                let _ = stop_rx.await;
            })
            .await
            .expect("Server failed");
    });

    let mut client = connect_client(&format!("ws://{addr}/ws/assessment/asm_ws_shutdown")).await;
    skip_greeting(&mut client).await;
    say(&mut client, "Mi barrio tiene un mercado muy antiguo.").await;
    for _ in 0..3 {
        receive_message(&mut client).await;
    }
    assert_eq!(registry.len(), 1);

    stop_tx.send(()).expect("Server already stopped");
    assert!(registry.shutdown(Duration::from_secs(5)).await);
    assert!(registry.is_empty());
    timeout(Duration::from_secs(5), server)
        .await
        .expect("Server did not stop")
        .expect("Server task panicked");

    match receive_message(&mut client).await {
        ServerMessage::Error { message } => assert_eq!(message, TERMINATED_MESSAGE),
        other => unreachable!("Expected termination notice, got: {other:?}"),
    }
    assert!(wait_for_close(&mut client).await);

    let result = store.result("asm_ws_shutdown").await.expect("result stored");
    assert!(!result.completed);
    assert_eq!(result.report.proficiency_level, ProficiencyLevel::C2);
    assert_eq!(
        store.status("asm_ws_shutdown").await,
        Some(AssessmentStatus::Interrupted)
    );
}
