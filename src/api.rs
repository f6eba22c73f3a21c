//! Admin HTTP surface.
//!
//! - `POST /api/process-email`: run one item through the worker now,
//!   bypassing the queue and the ledger
//! - `GET /api/queue-status`: queue, dead-letter and ledger sizes
//! - `GET /health`: liveness plus a config summary

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::config::Environment;
use crate::pipeline::artifact::ResultArtifact;
use crate::pipeline::types::{Outcome, Role, WorkItem, id_from_string_or_number};
use crate::pipeline::worker::Worker;
use crate::store::{DurableQueue, Ledger};

/// Shared state for the admin routes.
#[derive(Clone)]
pub struct AdminState {
    pub worker: Arc<Worker>,
    pub queue: Arc<DurableQueue>,
    pub dead_letters: Arc<DurableQueue>,
    pub ledger: Arc<Ledger>,
    pub environment: Environment,
    pub poll_interval: Duration,
    pub max_concurrent: usize,
}

/// Body of `POST /api/process-email`.
#[derive(Debug, Deserialize)]
pub struct ProcessEmailRequest {
    #[serde(deserialize_with = "id_from_string_or_number")]
    pub interaction_id: String,
    pub from_email: String,
    pub to_email: String,
    pub subject: String,
    pub content: String,
    #[serde(default)]
    pub user_type: Role,
}

impl From<ProcessEmailRequest> for WorkItem {
    fn from(req: ProcessEmailRequest) -> Self {
        let mut item = WorkItem::new(
            req.interaction_id,
            req.from_email,
            req.to_email,
            req.subject,
            req.content,
            Utc::now(),
        );
        item.resolved_role = req.user_type;
        item
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum ProcessEmailResponse {
    Success {
        #[serde(flatten)]
        artifact: ResultArtifact,
    },
    Failed {
        error: String,
    },
}

/// POST /api/process-email
async fn process_email(
    State(state): State<AdminState>,
    Json(request): Json<ProcessEmailRequest>,
) -> impl IntoResponse {
    info!(interaction_id = %request.interaction_id, "Ad-hoc processing requested");
    let report = state.worker.process(request.into()).await;

    let response = match (report.outcome, report.artifact) {
        (Outcome::Retry { error } | Outcome::Reject { error }, _) => {
            ProcessEmailResponse::Failed { error }
        }
        (_, Some(artifact)) => ProcessEmailResponse::Success { artifact },
        (_, None) => ProcessEmailResponse::Failed {
            error: "no artifact produced".into(),
        },
    };
    Json(response)
}

/// GET /api/queue-status
async fn queue_status(State(state): State<AdminState>) -> impl IntoResponse {
    Json(json!({
        "status": "active",
        "queue_size": state.queue.len().await,
        "dead_letter_size": state.dead_letters.len().await,
        "completed_count": state.ledger.len().await,
        "max_concurrent_processing": state.max_concurrent,
    }))
}

/// GET /health
async fn health(State(state): State<AdminState>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "environment": state.environment.to_string(),
        "poll_interval": format!("{} minutes", state.poll_interval.as_secs() / 60),
        "queue_size": state.queue.len().await,
        "max_concurrent": state.max_concurrent,
    }))
}

/// Build the admin routes with permissive CORS.
pub fn admin_routes(state: AdminState) -> Router {
    Router::new()
        .route("/api/process-email", post(process_email))
        .route("/api/queue-status", get(queue_status))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
