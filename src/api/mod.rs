//! HTTP intake for controllers.
//!
//! | Method | Path              | Body                 |
//! |--------|-------------------|----------------------|
//! | POST   | `/api/jobs`       | [`JobSubmission`]    |
//! | PUT    | `/api/controller` | [`ControllerUpdate`] |
//! | GET    | `/api/status`     |                      |
//! | GET    | `/health`         |                      |

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::NodeError;
use crate::node::NodeServer;
use crate::scheduler::{JobId, JobKind, TaskId};

/// A job as submitted over HTTP: ids plus the `type`-tagged payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSubmission {
    pub task_id: TaskId,
    pub job_id: JobId,
    #[serde(flatten)]
    pub kind: JobKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerUpdate {
    pub url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ControllerResponse {
    pub controller_set: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub fn router(node: Arc<NodeServer>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/status", get(status_handler))
        .route("/api/jobs", post(submit_job_handler))
        .route("/api/controller", put(set_controller_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(node)
}

async fn health_handler() -> &'static str {
    "ok"
}

async fn status_handler(State(node): State<Arc<NodeServer>>) -> impl IntoResponse {
    Json(node.status())
}

async fn submit_job_handler(
    State(node): State<Arc<NodeServer>>,
    Json(submission): Json<JobSubmission>,
) -> impl IntoResponse {
    match node.submit(submission.task_id, submission.job_id, submission.kind) {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(SubmitResponse {
                accepted: true,
                error: None,
            }),
        ),
        Err(e) => {
            let status = match e {
                NodeError::WorkerStopped => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            tracing::warn!(
                task_id = submission.task_id,
                job_id = submission.job_id,
                error = %e,
                "Job rejected"
            );
            (
                status,
                Json(SubmitResponse {
                    accepted: false,
                    error: Some(e.to_string()),
                }),
            )
        }
    }
}

async fn set_controller_handler(
    State(node): State<Arc<NodeServer>>,
    Json(update): Json<ControllerUpdate>,
) -> impl IntoResponse {
    match node.set_controller_url(update.url.as_deref()) {
        Ok(()) => (
            StatusCode::OK,
            Json(ControllerResponse {
                controller_set: update.url.is_some(),
                error: None,
            }),
        ),
        Err(e) => {
            tracing::warn!(url = ?update.url, error = %e, "Controller update rejected");
            (
                StatusCode::BAD_REQUEST,
                Json(ControllerResponse {
                    controller_set: node.status().controller_set,
                    error: Some(e.to_string()),
                }),
            )
        }
    }
}
