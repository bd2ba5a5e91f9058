//! WebSocket entry point for assessment sessions.
//!
//! `GET /ws/assessment/:assessment_id` upgrades the connection and hands the
//! socket to [`AssessmentSession::run`](crate::session::AssessmentSession::run).
//! One task per connection; the session owns the socket until it ends.

use std::sync::Arc;

use axum::{
    extract::{ws::WebSocket, Path, State, WebSocketUpgrade},
    response::Response,
};
use tracing::{error, info};

use crate::api::AppState;
use crate::session::SessionOutcome;
use crate::transport::WsTransport;

/// Upgrade handler for `/ws/assessment/:assessment_id`.
pub async fn assessment_ws(
    ws: WebSocketUpgrade,
    Path(assessment_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Response {
    info!(assessment_id = %assessment_id, "New assessment connection request");
    ws.on_upgrade(move |socket| handle_socket(socket, assessment_id, state))
}

async fn handle_socket(socket: WebSocket, assessment_id: String, state: Arc<AppState>) {
    let mut transport = WsTransport::new(socket);

    match state
        .session
        .run(&assessment_id, &mut transport, &state.registry)
        .await
    {
        Ok(SessionOutcome::Completed) => {
            info!(assessment_id = %assessment_id, "Assessment connection finished");
        }
        Ok(SessionOutcome::Interrupted(reason)) => {
            info!(assessment_id = %assessment_id, ?reason, "Assessment connection interrupted");
        }
        Ok(SessionOutcome::Rejected) => {
            info!(assessment_id = %assessment_id, "Assessment connection rejected");
        }
        Err(e) => {
            error!(assessment_id = %assessment_id, error = %e, "Assessment session failed");
        }
    }
}
