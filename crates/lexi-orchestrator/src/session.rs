//! Session orchestrator: drives one assessment over one connection.
//!
//! A session claims its `assessment_id` in the [`ConnectionRegistry`],
//! resolves or creates the [`SessionState`], greets the user and then
//! processes one utterance at a time:
//!
//! 1. transcribe (binary utterances only)
//! 2. evaluate against the pending task
//! 3. record the exercise
//! 4. echo the utterance and send feedback
//! 5. run the decision policy (phase windows, then difficulty)
//! 6. send the transition and/or the next task
//!
//! A normal end aggregates and stores a final result, sends
//! `assessment_complete` and closes. Any other end (client gone, transport
//! error, administrative termination) stores a provisional result instead,
//! unless no exercise was scored.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use lexi_report::{aggregate, AssessmentResult, MarkdownGenerator};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::difficulty::Difficulty;
use crate::error::{LexiError, Result, ServiceKind};
use crate::evaluator::ExerciseEvaluator;
use crate::generator::ExerciseGenerator;
use crate::phase::{decide, Decision, DecisionContext};
use crate::protocol::{encode_audio, ClientFrame, ClientMessage, ServerMessage};
use crate::registry::ConnectionRegistry;
use crate::services::{with_timeout, Services};
use crate::session_state::{Exercise, ExerciseTask, Phase, SessionState, Speaker};
use crate::store::{is_valid_assessment_id, AssessmentStatus, ResultStore};
use crate::transport::Transport;

/// Sent when a binary utterance cannot be transcribed.
pub const TRANSCRIPTION_FAILED: &str = "Failed to process audio";

/// Sent before closing a session ended through the registry (admin API or
/// server shutdown).
pub const TERMINATED_MESSAGE: &str = "This assessment was ended by the server.";

// ============================================================================
// Outcomes
// ============================================================================

/// Why a session ended before completing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// The client closed or dropped the connection.
    Disconnected,
    /// Termination was requested through the registry.
    Terminated,
    /// An unrecoverable error in the session loop.
    Failed,
}

/// How a call to [`AssessmentSession::run`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The assessment ran to completion and the final result was stored.
    Completed,
    /// The session ended early; a provisional result was stored if any
    /// exercise was scored.
    Interrupted(EndReason),
    /// The connection was refused (duplicate, finished or invalid id).
    Rejected,
}

enum Ended {
    Concluded,
    Interrupted(EndReason),
}

#[derive(Debug, PartialEq, Eq)]
enum TurnEnd {
    Continue,
    Concluded,
}

// ============================================================================
// Assessment Session
// ============================================================================

/// Runs assessment sessions. One instance is shared by every connection.
pub struct AssessmentSession {
    config: Arc<Config>,
    services: Services,
    store: Arc<dyn ResultStore>,
    evaluator: ExerciseEvaluator,
    generator: ExerciseGenerator,
}

impl std::fmt::Debug for AssessmentSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssessmentSession")
            .field("config", &self.config)
            .field("services", &self.services)
            .finish_non_exhaustive()
    }
}

impl AssessmentSession {
    /// Creates a session runner over the given capabilities and store.
    #[must_use]
    pub fn new(config: Arc<Config>, services: Services, store: Arc<dyn ResultStore>) -> Self {
        let evaluator = ExerciseEvaluator::new(Arc::clone(&services.model), services.timeout);
        let generator = ExerciseGenerator::new(Arc::clone(&services.model), services.timeout);
        Self {
            config,
            services,
            store,
            evaluator,
            generator,
        }
    }

    /// Shared configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    fn now(&self) -> DateTime<Utc> {
        self.services.clock.now()
    }

    /// Runs the session for `assessment_id` until it ends.
    ///
    /// Only fatal faults are returned as errors: a failed terminal commit or
    /// a store that cannot be read at start. Everything else ends in a
    /// [`SessionOutcome`].
    pub async fn run<T: Transport>(
        &self,
        assessment_id: &str,
        transport: &mut T,
        registry: &ConnectionRegistry,
    ) -> Result<SessionOutcome> {
        if !is_valid_assessment_id(assessment_id) {
            warn!(assessment_id, "Rejecting invalid assessment id");
            reject(transport, format!("Invalid assessment id '{assessment_id}'")).await;
            return Ok(SessionOutcome::Rejected);
        }

        let registration =
            match registry.register(assessment_id, self.services.tokens.generate(), self.now()) {
                Ok(registration) => registration,
                Err(e) => {
                    warn!(assessment_id, "Rejecting duplicate connection");
                    reject(transport, e.to_string()).await;
                    return Ok(SessionOutcome::Rejected);
                }
            };

        let (state, resumed) = match self.store.load_session(assessment_id).await {
            Ok(Some(state)) if state.is_complete() => {
                info!(assessment_id, "Assessment already complete");
                reject(
                    transport,
                    LexiError::session_complete(assessment_id).to_string(),
                )
                .await;
                return Ok(SessionOutcome::Rejected);
            }
            Ok(Some(state)) => (state, true),
            Ok(None) => (
                SessionState::new(
                    assessment_id,
                    self.config.default_language.clone(),
                    Difficulty::new(self.config.initial_difficulty),
                    self.now(),
                ),
                false,
            ),
            Err(e) => {
                error!(assessment_id, error = %e, "Failed to load session");
                reject(transport, e.to_string()).await;
                return Err(e);
            }
        };

        if let Err(e) = self
            .store
            .set_status(assessment_id, AssessmentStatus::InProgress)
            .await
        {
            warn!(assessment_id, error = %e, "Failed to mark assessment in progress");
        }

        info!(
            assessment_id,
            connection_id = registration.connection_id(),
            phase = %state.current_phase,
            resumed,
            "Session started"
        );

        let mut terminate = registration.terminate_signal();
        let mut live = Live {
            session: self,
            transport,
            state,
            expecting_audio: false,
        };
        let outcome = live.drive(resumed, &mut terminate).await;

        // release ownership only after the terminal commit
        drop(registration);
        outcome
    }
}

async fn reject<T: Transport>(transport: &mut T, message: String) {
    if let Err(e) = transport.send(&ServerMessage::error(message)).await {
        debug!(error = %e, "Failed to send rejection");
    }
    transport.close().await;
}

// ============================================================================
// Live Session
// ============================================================================

struct Live<'a, T: Transport> {
    session: &'a AssessmentSession,
    transport: &'a mut T,
    state: SessionState,
    expecting_audio: bool,
}

impl<T: Transport> Live<'_, T> {
    async fn drive(
        &mut self,
        resumed: bool,
        terminate: &mut watch::Receiver<bool>,
    ) -> Result<SessionOutcome> {
        let reason = match self.converse(resumed, terminate).await {
            Ok(Ended::Concluded) => return self.finish().await,
            Ok(Ended::Interrupted(reason)) => reason,
            Err(e) => {
                error!(
                    assessment_id = %self.state.assessment_id,
                    error = %e,
                    "Session failed"
                );
                self.notify_client(ServerMessage::error(e.to_string())).await;
                EndReason::Failed
            }
        };

        if reason == EndReason::Terminated {
            self.notify_client(ServerMessage::error(TERMINATED_MESSAGE))
                .await;
        }
        let committed = self.commit_partial(reason).await;
        if reason != EndReason::Disconnected {
            self.transport.close().await;
        }
        committed.map(|()| SessionOutcome::Interrupted(reason))
    }

    async fn converse(
        &mut self,
        resumed: bool,
        terminate: &mut watch::Receiver<bool>,
    ) -> Result<Ended> {
        self.open(resumed).await?;

        loop {
            let frame = tokio::select! {
                frame = self.transport.recv() => frame,
                changed = terminate.changed() => {
                    if changed.is_err() || *terminate.borrow() {
                        return Ok(Ended::Interrupted(EndReason::Terminated));
                    }
                    continue;
                }
            };

            let utterance = match frame {
                None => return Ok(Ended::Interrupted(EndReason::Disconnected)),
                Some(Err(e)) => return Err(e),
                Some(Ok(ClientFrame::Control(ClientMessage::AudioComplete))) => {
                    self.expecting_audio = true;
                    continue;
                }
                Some(Ok(ClientFrame::Control(ClientMessage::UserTranscript { text }))) => {
                    self.expecting_audio = false;
                    text
                }
                Some(Ok(ClientFrame::Binary(audio))) if self.expecting_audio => {
                    self.expecting_audio = false;
                    match self.transcribe(audio).await? {
                        Some(text) => text,
                        None => continue,
                    }
                }
                Some(Ok(ClientFrame::Binary(audio))) => {
                    debug!(
                        assessment_id = %self.state.assessment_id,
                        bytes = audio.len(),
                        "Discarding binary frame without audio_complete"
                    );
                    continue;
                }
                Some(Ok(ClientFrame::Malformed(text))) => {
                    warn!(
                        assessment_id = %self.state.assessment_id,
                        len = text.len(),
                        "Ignoring malformed control message"
                    );
                    continue;
                }
            };

            match self.take_turn(&utterance).await {
                Ok(TurnEnd::Concluded) => return Ok(Ended::Concluded),
                Ok(TurnEnd::Continue) => {}
                Err(e) if !e.is_fatal() => {
                    warn!(
                        assessment_id = %self.state.assessment_id,
                        error = %e,
                        "Turn failed, session continues"
                    );
                    self.send(ServerMessage::error(e.to_string())).await?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    // ------------------------------------------------------------------------
    // Opening
    // ------------------------------------------------------------------------

    async fn open(&mut self, resumed: bool) -> Result<()> {
        let language = self.state.target_language.clone();
        if resumed {
            self.say("Welcome back! Let's pick up where we left off.")
                .await?;
        } else {
            self.say(&format!(
                "Hello! Welcome to your {language} proficiency assessment. \
                 Let's begin the interview. Tell me a bit about yourself and your background."
            ))
            .await?;
        }

        if self.state.current_phase == Phase::Intro {
            let now = self.now();
            let ctx = DecisionContext {
                phase: Phase::Intro,
                elapsed: self.state.phase_elapsed(now),
                previous_score: None,
                difficulty: self.state.current_difficulty,
            };
            let decision = decide(&ctx, &self.session.config.phase_durations());
            self.apply(decision, &ctx, now).await?;
            return Ok(());
        }

        match self.state.current_task.clone() {
            Some(task) => self.present(&task).await,
            None => self.issue_task().await,
        }
    }

    // ------------------------------------------------------------------------
    // Turns
    // ------------------------------------------------------------------------

    async fn transcribe(&mut self, audio: Vec<u8>) -> Result<Option<String>> {
        let services = &self.session.services;
        let transcribed = with_timeout(
            ServiceKind::Transcription,
            services.timeout,
            services
                .transcriber
                .transcribe(audio, &self.state.target_language),
        )
        .await;

        match transcribed {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.is_transient() => {
                warn!(
                    assessment_id = %self.state.assessment_id,
                    error = %e,
                    "Transcription failed"
                );
                self.send(ServerMessage::error(TRANSCRIPTION_FAILED)).await?;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn take_turn(&mut self, text: &str) -> Result<TurnEnd> {
        let Some(task) = self.state.current_task.clone() else {
            debug!(
                assessment_id = %self.state.assessment_id,
                "Utterance arrived with no pending task"
            );
            self.issue_task().await?;
            return Ok(TurnEnd::Continue);
        };

        let kind = task.kind();
        let difficulty = self.state.current_difficulty;
        let evaluation = match &task {
            ExerciseTask::Speaking { prompt } => {
                self.session
                    .evaluator
                    .evaluate_speaking(text, prompt, &self.state.target_language, difficulty)
                    .await
            }
            ExerciseTask::Translation {
                source_passage,
                source_language,
            } => {
                self.session
                    .evaluator
                    .evaluate_translation(
                        text,
                        source_passage,
                        source_language,
                        &self.session.config.response_language,
                        difficulty,
                    )
                    .await
            }
        };

        let now = self.now();
        let score = evaluation.driving_score(kind);
        self.state.add_exercise(Exercise::new(
            task,
            difficulty,
            text,
            evaluation.clone(),
            now,
        ))?;
        self.state.current_task = None;
        info!(
            assessment_id = %self.state.assessment_id,
            phase = %self.state.current_phase,
            difficulty = difficulty.level(),
            score = score.unwrap_or_default(),
            "Exercise scored"
        );

        self.send(ServerMessage::user_transcript(text)).await?;
        self.state.push_history(Speaker::User, text, now);
        match self.state.current_phase {
            Phase::ReadingTest => {
                let audio = self.speak(&evaluation.feedback).await;
                self.state
                    .push_history(Speaker::Ai, evaluation.feedback.clone(), now);
                self.send(ServerMessage::ReadingEvaluation {
                    text: evaluation.feedback.clone(),
                    audio,
                    evaluation,
                })
                .await?;
            }
            _ => self.say(&evaluation.feedback).await?,
        }

        let now = self.now();
        let ctx = DecisionContext {
            phase: self.state.current_phase,
            elapsed: self.state.phase_elapsed(now),
            previous_score: score,
            difficulty,
        };
        let decision = decide(&ctx, &self.session.config.phase_durations());
        self.apply(decision, &ctx, now).await
    }

    async fn apply(
        &mut self,
        decision: Decision,
        ctx: &DecisionContext,
        now: DateTime<Utc>,
    ) -> Result<TurnEnd> {
        self.state
            .record_insight(decision.name(), decision.rationale(ctx), now);
        let difficulty = self.state.apply_difficulty(decision.delta());
        debug!(
            assessment_id = %self.state.assessment_id,
            decision = decision.name(),
            delta = decision.delta().as_i8(),
            difficulty = difficulty.level(),
            "Decision applied"
        );

        match decision {
            Decision::GiveSpeakingPrompt { .. } | Decision::GiveTranslationPrompt { .. } => {
                self.issue_task().await?;
                Ok(TurnEnd::Continue)
            }
            Decision::SwitchPhase { to, .. } => {
                self.enter_phase(to, now).await?;
                Ok(TurnEnd::Continue)
            }
            Decision::Conclude => Ok(TurnEnd::Concluded),
        }
    }

    async fn enter_phase(&mut self, to: Phase, now: DateTime<Utc>) -> Result<()> {
        self.state.advance_phase(to, now)?;
        self.state.current_task = None;
        info!(
            assessment_id = %self.state.assessment_id,
            phase = %to,
            "Phase changed"
        );

        let text = self.announcement(to);
        let audio = self.speak(&text).await;
        self.state.push_history(Speaker::Ai, text.clone(), now);
        self.send(ServerMessage::PhaseTransition {
            text,
            audio,
            new_phase: to,
        })
        .await?;

        self.issue_task().await?;
        self.snapshot().await;
        Ok(())
    }

    fn announcement(&self, phase: Phase) -> String {
        let language = &self.state.target_language;
        let response = &self.session.config.response_language;
        match phase {
            Phase::ReadingTest => format!(
                "Alright! We've had a great conversation. Now we're going to move to the \
                 reading portion of the evaluation. I'll show you some text in {language}, \
                 and I'd like you to read it and then translate it to {response}. Ready?"
            ),
            Phase::SpeakingTest => format!(
                "Let's start with the speaking portion. I'll ask you a few questions; \
                 please answer each one in {language}."
            ),
            Phase::Intro | Phase::Complete => String::new(),
        }
    }

    async fn issue_task(&mut self) -> Result<()> {
        let Some(kind) = self.state.current_phase.exercise_kind() else {
            return Ok(());
        };
        let language = self.state.target_language.clone();
        let difficulty = self.state.current_difficulty;
        let previous = self.state.used_texts(kind);

        let task = match self.state.current_phase {
            Phase::ReadingTest => ExerciseTask::Translation {
                source_passage: self
                    .session
                    .generator
                    .reading_passage(&language, difficulty, &previous)
                    .await,
                source_language: language,
            },
            _ => ExerciseTask::Speaking {
                prompt: self
                    .session
                    .generator
                    .speaking_prompt(&language, difficulty, &previous)
                    .await,
            },
        };

        self.state.current_task = Some(task.clone());
        self.present(&task).await
    }

    async fn present(&mut self, task: &ExerciseTask) -> Result<()> {
        match task {
            ExerciseTask::Speaking { prompt } => self.say(prompt).await,
            ExerciseTask::Translation {
                source_passage,
                source_language,
            } => {
                let instruction = format!(
                    "Please translate the following passage to {}:",
                    self.session.config.response_language
                );
                let now = self.now();
                self.state
                    .push_history(Speaker::Ai, format!("{instruction} {source_passage}"), now);
                self.send(ServerMessage::ReadingPassage {
                    passage: source_passage.clone(),
                    language: source_language.clone(),
                    difficulty: self.state.current_difficulty.level(),
                    instruction,
                })
                .await
            }
        }
    }

    // ------------------------------------------------------------------------
    // Endings
    // ------------------------------------------------------------------------

    async fn finish(&mut self) -> Result<SessionOutcome> {
        match self.conclude().await {
            Ok(()) => {
                self.transport.close().await;
                Ok(SessionOutcome::Completed)
            }
            Err(e) => {
                error!(
                    assessment_id = %self.state.assessment_id,
                    error = %e,
                    "Failed to store final result"
                );
                self.notify_client(ServerMessage::error(e.to_string())).await;
                self.transport.close().await;
                Err(e)
            }
        }
    }

    async fn conclude(&mut self) -> Result<()> {
        let now = self.now();
        self.state.advance_phase(Phase::Complete, now)?;
        self.state.current_task = None;

        let report = aggregate(&self.state.exercise_scores());
        self.state.record_aggregate(&report, now);
        let text = format!(
            "Assessment complete! Your {} proficiency level is {}. Grammar: {:.1}%, Fluency: {:.1}%",
            self.state.target_language,
            report.proficiency_level,
            report.grammar_score.unwrap_or_default(),
            report.fluency_score.unwrap_or_default(),
        );
        self.state.push_history(Speaker::Ai, text.clone(), now);

        let result = AssessmentResult::new(
            self.state.assessment_id.clone(),
            self.state.target_language.clone(),
            true,
            report,
        );
        self.session.store.save_session(&self.state).await?;
        self.session.store.save_result(&result).await?;
        info!(
            assessment_id = %self.state.assessment_id,
            overall_score = result.report.overall_score,
            proficiency = %result.report.proficiency_level,
            exercises = result.report.total_exercises(),
            "Assessment complete"
        );

        let audio = self.speak(&text).await;
        self.notify_client(ServerMessage::AssessmentComplete {
            text,
            audio,
            proficiency: result.report.proficiency_level,
            total_evaluations: self.state.exercises_completed.len(),
        })
        .await;
        self.send_notice(&result).await;
        Ok(())
    }

    async fn commit_partial(&mut self, reason: EndReason) -> Result<()> {
        if self.state.exercises_completed.is_empty() {
            info!(
                assessment_id = %self.state.assessment_id,
                ?reason,
                "Session ended before any exercise was scored"
            );
            return Ok(());
        }

        let now = self.now();
        let report = aggregate(&self.state.exercise_scores());
        self.state.record_aggregate(&report, now);
        let result = AssessmentResult::new(
            self.state.assessment_id.clone(),
            self.state.target_language.clone(),
            false,
            report,
        );

        self.session.store.save_session(&self.state).await?;
        self.session.store.save_result(&result).await?;
        info!(
            assessment_id = %self.state.assessment_id,
            ?reason,
            overall_score = result.report.overall_score,
            proficiency = %result.report.proficiency_level,
            exercises = result.report.total_exercises(),
            "Provisional result saved"
        );
        Ok(())
    }

    async fn send_notice(&mut self, result: &AssessmentResult) {
        let Some(recipient) = &self.session.config.notifications.recipient else {
            return;
        };
        let subject = format!(
            "Lexi assessment {} complete: {}",
            result.assessment_id, result.report.proficiency_level
        );
        let body = MarkdownGenerator::new(result).generate();
        if let Err(e) = self
            .session
            .services
            .notifier
            .notify(recipient, &subject, &body)
            .await
        {
            warn!(
                assessment_id = %result.assessment_id,
                error = %e,
                "Failed to send completion notice"
            );
        }
    }

    /// Stores the snapshot between turns. Failures are logged; the terminal
    /// commit is what must succeed.
    async fn snapshot(&mut self) {
        // nothing worth resuming yet
        if self.state.exercises_completed.is_empty() {
            return;
        }
        if let Err(e) = self.session.store.save_session(&self.state).await {
            warn!(
                assessment_id = %self.state.assessment_id,
                error = %e,
                "Failed to store session snapshot"
            );
        }
    }

    // ------------------------------------------------------------------------
    // Output
    // ------------------------------------------------------------------------

    fn now(&self) -> DateTime<Utc> {
        self.session.now()
    }

    async fn speak(&mut self, text: &str) -> Option<String> {
        let services = &self.session.services;
        match with_timeout(
            ServiceKind::SpeechSynthesis,
            services.timeout,
            services.synthesizer.synthesize(text),
        )
        .await
        {
            Ok(audio) => encode_audio(Some(&audio)),
            Err(e) => {
                debug!(error = %e, "Sending text without audio");
                None
            }
        }
    }

    async fn say(&mut self, text: &str) -> Result<()> {
        let audio = self.speak(text).await;
        let now = self.now();
        self.state.push_history(Speaker::Ai, text, now);
        self.send(ServerMessage::ai_transcript(text, audio)).await
    }

    async fn send(&mut self, message: ServerMessage) -> Result<()> {
        self.transport.send(&message).await
    }

    /// Best-effort send on paths that are ending anyway.
    async fn notify_client(&mut self, message: ServerMessage) {
        if let Err(e) = self.transport.send(&message).await {
            debug!(
                message_type = message.message_type(),
                error = %e,
                "Client did not receive message"
            );
        }
    }
}
