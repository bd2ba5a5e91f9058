//! Lexi assessment orchestrator
//!
//! Runs adaptive language proficiency assessments over WebSocket: a speaking
//! interview followed by a reading and translation section, scored turn by
//! turn and aggregated into a CEFR band.

pub mod api;
pub mod config;
pub mod difficulty;
pub mod error;
pub mod evaluator;
pub mod generator;
pub mod openai;
pub mod phase;
pub mod protocol;
pub mod registry;
pub mod services;
pub mod session;
pub mod session_state;
pub mod store;
pub mod testing;
pub mod transport;
pub mod websocket;

pub use api::{create_router, AppState, ErrorResponse, SessionsResponse, TerminateResponse};
pub use config::{Config, LlmConfig, LlmProvider, NotificationConfig};
pub use difficulty::{next_difficulty, Difficulty, DifficultyDelta};
pub use error::{LexiError, Result, ServiceKind};
pub use openai::OpenAiBackend;
pub use phase::{decide, Decision, DecisionContext, PhaseDurations};
pub use protocol::{ClientFrame, ClientMessage, ServerMessage, Speaker};
pub use registry::{ActiveSession, ConnectionRegistry, Registration};
pub use services::{
    Clock, DisabledService, LanguageModel, LogNotifier, Notifier, Services, SpeechSynthesizer,
    TokenGenerator, Transcriber,
};
pub use session::{AssessmentSession, EndReason, SessionOutcome};
pub use session_state::{
    Evaluation, Exercise, ExerciseTask, Insight, Phase, SessionState, TranscriptLine,
    STATE_VERSION,
};
pub use store::{AssessmentStatus, FileStore, MemoryStore, ResultRecord, ResultStore};
pub use transport::{Transport, WsTransport};
