//! HTTP API and router for the Lexi orchestrator.
//!
//! # Endpoints
//!
//! - `GET /ws/assessment/:assessment_id` - WebSocket assessment session
//! - `GET /api/sessions` - Live connections
//! - `GET /api/assessments/:assessment_id/state` - Stored session snapshot
//! - `GET /api/assessments/:assessment_id/result` - Stored result record
//! - `POST /api/assessments/:assessment_id/terminate` - End a live session
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use lexi_orchestrator::{create_router, AppState, Config, FileStore, Services};
//!
//! # async fn example() {
//! let config = Config::default();
//! let services = Services::disabled(config.service_timeout());
//! let store = Arc::new(FileStore::new(&config.store_dir));
//! let router = create_router(AppState::new(config, services, store));
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8000").await.unwrap();
//! axum::serve(listener, router).await.unwrap();
//! # }
//! ```

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

use crate::config::Config;
use crate::error::LexiError;
use crate::registry::{ActiveSession, ConnectionRegistry};
use crate::services::Services;
use crate::session::AssessmentSession;
use crate::session_state::SessionState;
use crate::store::{is_valid_assessment_id, ResultRecord, ResultStore};
use crate::websocket::assessment_ws;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Response body for `GET /api/sessions`.
#[derive(Debug, Clone, Serialize)]
pub struct SessionsResponse {
    /// Live connections ordered by assessment id.
    pub sessions: Vec<ActiveSession>,
}

/// Response body for the terminate endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminateResponse {
    /// Whether a live session was signalled.
    pub terminated: bool,
}

/// Error response body returned on failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Description of the error.
    pub error: String,
}

// ============================================================================
// Application State
// ============================================================================

/// Shared application state for HTTP and WebSocket handlers.
#[derive(Clone)]
pub struct AppState {
    /// Session runner shared by every connection.
    pub session: Arc<AssessmentSession>,
    /// Record store for snapshots and results.
    pub store: Arc<dyn ResultStore>,
    /// Live connection table.
    pub registry: ConnectionRegistry,
}

impl AppState {
    /// Creates the state from configuration, capabilities and a store.
    #[must_use]
    pub fn new(config: Config, services: Services, store: Arc<dyn ResultStore>) -> Self {
        let session = AssessmentSession::new(Arc::new(config), services, Arc::clone(&store));
        Self {
            session: Arc::new(session),
            store,
            registry: ConnectionRegistry::new(),
        }
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("session", &self.session)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// API Error Type
// ============================================================================

#[derive(Debug)]
enum ApiError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl From<LexiError> for ApiError {
    fn from(e: LexiError) -> Self {
        warn!(error = %e, "API request failed");
        Self::Internal(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(ErrorResponse { error: message });
        (status, body).into_response()
    }
}

fn checked_id(assessment_id: String) -> Result<String, ApiError> {
    if is_valid_assessment_id(&assessment_id) {
        Ok(assessment_id)
    } else {
        Err(ApiError::BadRequest(format!(
            "Invalid assessment id '{assessment_id}'"
        )))
    }
}

// ============================================================================
// Router Setup
// ============================================================================

/// Creates the router with the WebSocket route and the admin API under `/api`.
pub fn create_router(state: AppState) -> Router {
    // browser clients connect from other origins
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/sessions", get(handle_sessions))
        .route("/assessments/:assessment_id/state", get(handle_state))
        .route("/assessments/:assessment_id/result", get(handle_result))
        .route("/assessments/:assessment_id/terminate", post(handle_terminate));

    Router::new()
        .route("/ws/assessment/:assessment_id", get(assessment_ws))
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(Arc::new(state))
}

// ============================================================================
// Handlers
// ============================================================================

async fn handle_sessions(State(state): State<Arc<AppState>>) -> Json<SessionsResponse> {
    Json(SessionsResponse {
        sessions: state.registry.list(),
    })
}

async fn handle_state(
    State(state): State<Arc<AppState>>,
    Path(assessment_id): Path<String>,
) -> Result<Json<SessionState>, ApiError> {
    let assessment_id = checked_id(assessment_id)?;
    state
        .store
        .load_session(&assessment_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("No session for '{assessment_id}'")))
}

async fn handle_result(
    State(state): State<Arc<AppState>>,
    Path(assessment_id): Path<String>,
) -> Result<Json<ResultRecord>, ApiError> {
    let assessment_id = checked_id(assessment_id)?;
    state
        .store
        .load_record(&assessment_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("No result for '{assessment_id}'")))
}

async fn handle_terminate(
    State(state): State<Arc<AppState>>,
    Path(assessment_id): Path<String>,
) -> Result<Json<TerminateResponse>, ApiError> {
    let assessment_id = checked_id(assessment_id)?;
    if state.registry.terminate(&assessment_id) {
        info!(assessment_id = %assessment_id, "Session termination requested via API");
        Ok(Json(TerminateResponse { terminated: true }))
    } else {
        Err(ApiError::NotFound(format!(
            "No live session for '{assessment_id}'"
        )))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use axum::{
        body::Body,
        http::{Method, Request, StatusCode},
    };
    use chrono::Utc;
    use lexi_report::{aggregate, AssessmentResult, ExerciseScores};
    use tower::util::ServiceExt;

    use super::*;
    use crate::difficulty::Difficulty;
    use crate::store::{AssessmentStatus, MemoryStore};
    use crate::testing::{services, ScriptedModel};

    fn test_state() -> (AppState, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let state = AppState::new(
            Config::default(),
            services(ScriptedModel::new(Vec::<String>::new())),
            store.clone(),
        );
        (state, store)
    }

    async fn call(router: Router, method: Method, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = router
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_sessions_lists_live_connections() {
        let (state, _) = test_state();
        let _registration = state
            .registry
            .register("asm_live", "conn-9".to_string(), Utc::now())
            .unwrap();
        let router = create_router(state);

        let (status, json) = call(router, Method::GET, "/api/sessions").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["sessions"][0]["assessment_id"], "asm_live");
        assert_eq!(json["sessions"][0]["connection_id"], "conn-9");
    }

    #[tokio::test]
    async fn test_state_returns_snapshot() {
        let (state, store) = test_state();
        let snapshot = SessionState::new("asm_s", "German", Difficulty::new(4), Utc::now());
        store.save_session(&snapshot).await.unwrap();

        let (status, json) =
            call(create_router(state), Method::GET, "/api/assessments/asm_s/state").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["target_language"], "German");
        assert_eq!(json["current_phase"], "intro");
        assert_eq!(json["current_difficulty"], 4);
    }

    #[tokio::test]
    async fn test_state_missing_is_not_found() {
        let (state, _) = test_state();
        let (status, json) =
            call(create_router(state), Method::GET, "/api/assessments/nope/state").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(json["error"].as_str().unwrap().contains("nope"));
    }

    #[tokio::test]
    async fn test_result_returns_record() {
        let (state, store) = test_state();
        let result = AssessmentResult::new(
            "asm_r",
            "Spanish",
            false,
            aggregate(&[ExerciseScores::speaking(90.0, 92.0)]),
        );
        store.save_result(&result).await.unwrap();

        let (status, json) =
            call(create_router(state), Method::GET, "/api/assessments/asm_r/result").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "interrupted");
        assert_eq!(json["result"]["completed"], false);
        assert_eq!(json["result"]["report"]["proficiency_level"], "C2");
        assert_eq!(
            store.status("asm_r").await,
            Some(AssessmentStatus::Interrupted)
        );
    }

    #[tokio::test]
    async fn test_invalid_id_is_bad_request() {
        let (state, _) = test_state();
        let (status, _) = call(
            create_router(state),
            Method::GET,
            "/api/assessments/bad%20id/result",
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_terminate_signals_live_session() {
        let (state, _) = test_state();
        let registration = state
            .registry
            .register("asm_t", "conn-1".to_string(), Utc::now())
            .unwrap();
        let signal = registration.terminate_signal();
        let router = create_router(state);

        let (status, json) = call(
            router.clone(),
            Method::POST,
            "/api/assessments/asm_t/terminate",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["terminated"], true);
        assert!(*signal.borrow());

        let (status, _) = call(router, Method::POST, "/api/assessments/other/terminate").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
