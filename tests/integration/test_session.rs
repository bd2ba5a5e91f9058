//! Integration tests for sessions backed by the file store.
//!
//! Sessions run over the in-memory channel transport with a manual clock,
//! while snapshots and results go to a real directory on disk.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use lexi_orchestrator::testing::{
    channel_transport, services, speaking_reply, translation_reply, ChannelClient, ManualClock,
    ScriptedModel,
};
use lexi_orchestrator::{
    AssessmentSession, AssessmentStatus, Config, ConnectionRegistry, EndReason, FileStore, Phase,
    ResultStore, ServerMessage, SessionOutcome, Speaker,
};
use lexi_report::{MarkdownGenerator, ProficiencyLevel};
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// Per-test store directory, emptied on creation.
fn store_root(name: &str) -> PathBuf {
    let root = std::env::temp_dir().join(format!("lexi_it_{name}_{}", std::process::id()));
    std::fs::remove_dir_all(&root).ok();
    root
}

struct Harness {
    root: PathBuf,
    store: Arc<FileStore>,
    clock: Arc<ManualClock>,
    registry: ConnectionRegistry,
}

impl Harness {
    fn new(name: &str) -> Self {
        let root = store_root(name);
        Self {
            store: Arc::new(FileStore::new(&root)),
            root,
            clock: Arc::new(ManualClock::default()),
            registry: ConnectionRegistry::new(),
        }
    }

    /// Starts a session run with its own model script.
    fn start(
        &self,
        assessment_id: &str,
        model: ScriptedModel,
    ) -> (
        JoinHandle<lexi_orchestrator::Result<SessionOutcome>>,
        ChannelClient,
    ) {
        let mut services = services(model);
        services.clock = self.clock.clone();
        let session = AssessmentSession::new(
            Arc::new(Config::default()),
            services,
            self.store.clone(),
        );

        let (mut transport, client) = channel_transport();
        let registry = self.registry.clone();
        let id = assessment_id.to_string();
        let handle = tokio::spawn(async move { session.run(&id, &mut transport, &registry).await });
        (handle, client)
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        std::fs::remove_dir_all(&self.root).ok();
    }
}

async fn next(client: &mut ChannelClient) -> ServerMessage {
    timeout(Duration::from_secs(5), client.recv())
        .await
        .expect("Timeout waiting for message")
        .expect("Session hung up")
}

async fn skip_greeting(client: &mut ChannelClient) {
    for expected in ["transcript", "phase_transition", "transcript"] {
        assert_eq!(next(client).await.message_type(), expected);
    }
}

fn ai_text(message: ServerMessage) -> String {
    match message {
        ServerMessage::Transcript {
            speaker: Speaker::Ai,
            text,
            ..
        } => text,
        other => unreachable!("Expected AI transcript, got: {other:?}"),
    }
}

// ============================================================================
// Persistence
// ============================================================================

/// A session that ends before any scored turn leaves nothing on disk.
#[tokio::test]
async fn test_no_exercises_writes_no_files() {
    let harness = Harness::new("empty");
    let (handle, mut client) = harness.start("asm_it_empty", ScriptedModel::new(Vec::<String>::new()));
    skip_greeting(&mut client).await;

    client.disconnect();
    let outcome = handle.await.expect("join").expect("run");
    assert_eq!(outcome, SessionOutcome::Interrupted(EndReason::Disconnected));

    assert!(!harness.root.join("sessions/asm_it_empty.json").exists());
    let record = harness
        .store
        .load_record("asm_it_empty")
        .await
        .expect("load")
        .expect("status record");
    assert_eq!(record.status, AssessmentStatus::InProgress);
    assert!(record.result.is_none());
}

/// One strong speaking turn then a disconnect stores a provisional C2.
#[tokio::test]
async fn test_disconnect_after_one_turn_saves_provisional_result() {
    let harness = Harness::new("partial");
    let (handle, mut client) =
        harness.start("asm_it_partial", ScriptedModel::new([speaking_reply(90.0, 92.0)]));
    skip_greeting(&mut client).await;

    client.say("Trabajo en un laboratorio de biología marina.");
    for _ in 0..3 {
        next(&mut client).await;
    }
    client.disconnect();
    handle.await.expect("join").expect("run");

    assert!(harness.root.join("results/asm_it_partial.json").exists());
    let record = harness
        .store
        .load_record("asm_it_partial")
        .await
        .expect("load")
        .expect("record");
    assert_eq!(record.status, AssessmentStatus::Interrupted);
    let result = record.result.expect("result");
    assert!(!result.completed);
    assert!((result.report.overall_score - 91.0).abs() < 1e-9);
    assert_eq!(result.report.proficiency_level, ProficiencyLevel::C2);
}

/// Reconnecting resumes from the snapshot and repeats the pending question.
#[tokio::test]
async fn test_reconnect_resumes_pending_question() {
    let harness = Harness::new("resume");
    let (handle, mut client) =
        harness.start("asm_it_resume", ScriptedModel::new([speaking_reply(70.0, 74.0)]));
    skip_greeting(&mut client).await;

    client.say("Mi ciudad tiene un río muy largo.");
    next(&mut client).await;
    next(&mut client).await;
    let pending = ai_text(next(&mut client).await);
    client.disconnect();
    handle.await.expect("join").expect("run");

    let (handle, mut client) = harness.start("asm_it_resume", ScriptedModel::new(Vec::<String>::new()));
    assert_eq!(
        ai_text(next(&mut client).await),
        "Welcome back! Let's pick up where we left off."
    );
    assert_eq!(ai_text(next(&mut client).await), pending);

    client.disconnect();
    handle.await.expect("join").expect("run");

    let state = harness
        .store
        .load_session("asm_it_resume")
        .await
        .expect("load")
        .expect("snapshot");
    assert_eq!(state.current_phase, Phase::SpeakingTest);
    assert_eq!(state.speaking_count, 1);
}

// ============================================================================
// Full Assessment
// ============================================================================

/// Speaking then reading reaches a final result that renders and blocks a rerun.
#[tokio::test]
async fn test_full_assessment_then_rerun_is_rejected() {
    let harness = Harness::new("full");
    let (handle, mut client) = harness.start(
        "asm_it_full",
        ScriptedModel::new([speaking_reply(80.0, 84.0), translation_reply(76.0, 70.0)]),
    );
    skip_greeting(&mut client).await;

    harness.clock.advance(Duration::from_secs(121));
    client.say("Llevo cinco años trabajando como enfermera.");
    let kinds: Vec<&str> = [
        next(&mut client).await,
        next(&mut client).await,
        next(&mut client).await,
        next(&mut client).await,
    ]
    .iter()
    .map(ServerMessage::message_type)
    .collect();
    assert_eq!(
        kinds,
        vec!["transcript", "transcript", "phase_transition", "reading_passage"]
    );

    harness.clock.advance(Duration::from_secs(91));
    client.say("The old town fills with visitors every summer.");
    next(&mut client).await;
    assert!(matches!(
        next(&mut client).await,
        ServerMessage::ReadingEvaluation { .. }
    ));
    assert!(matches!(
        next(&mut client).await,
        ServerMessage::AssessmentComplete {
            proficiency: ProficiencyLevel::B2,
            total_evaluations: 2,
            ..
        }
    ));
    assert_eq!(
        handle.await.expect("join").expect("run"),
        SessionOutcome::Completed
    );

    let record = harness
        .store
        .load_record("asm_it_full")
        .await
        .expect("load")
        .expect("record");
    assert_eq!(record.status, AssessmentStatus::Completed);
    let result = record.result.expect("result");
    assert!(result.completed);
    let markdown = MarkdownGenerator::new(&result).generate();
    assert!(markdown.contains("# Lexi Proficiency Report"));
    assert!(markdown.contains("B2"));

    let (handle, mut client) = harness.start("asm_it_full", ScriptedModel::new(Vec::<String>::new()));
    assert!(matches!(next(&mut client).await, ServerMessage::Error { .. }));
    assert_eq!(
        handle.await.expect("join").expect("run"),
        SessionOutcome::Rejected
    );
}
