//! HTTP server for the archiver service.
//!
//! Provides endpoints for:
//! - `POST /archive` - Archive a submission's sequence files
//! - `GET /status` - Get active/recent archive requests
//! - `GET /health` - Health check
//! - `GET /metrics` - Prometheus metrics

use axum::{
    extract::{Extension, Json},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use archive_common::{BatchResult, FileStatus};

use crate::archiver::{ArchiveRequest, Archiver};

/// Shared state for the HTTP server.
pub struct ServerState {
    pub archiver: Archiver,
    pub tracker: ArchiveTracker,
    pub metrics: PrometheusHandle,
}

/// Tracking for archive requests.
pub struct ArchiveTracker {
    active: Mutex<HashMap<String, ActiveArchive>>,
    completed: Mutex<VecDeque<CompletedArchive>>,
    max_completed: usize,
}

/// An archive request in progress.
#[derive(Debug, Clone, Serialize)]
pub struct ActiveArchive {
    pub id: String,
    pub submission: String,
    pub files_requested: usize,
    pub started_at: DateTime<Utc>,
}

/// A finished archive request.
#[derive(Debug, Clone, Serialize)]
pub struct CompletedArchive {
    pub id: String,
    pub submission: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub success: bool,
    pub archived: usize,
    pub already_uploaded: usize,
    pub failed: usize,
    pub error_message: Option<String>,
}

impl Default for ArchiveTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ArchiveTracker {
    pub fn new() -> Self {
        Self {
            active: Mutex::new(HashMap::new()),
            completed: Mutex::new(VecDeque::new()),
            max_completed: 100,
        }
    }

    pub async fn start(&self, id: &str, request: &ArchiveRequest) {
        let archive = ActiveArchive {
            id: id.to_string(),
            submission: request.sub_uuid.clone(),
            files_requested: request.files.len(),
            started_at: Utc::now(),
        };
        self.active.lock().await.insert(id.to_string(), archive);
    }

    pub async fn complete(&self, id: &str, result: &BatchResult) {
        let mut active = self.active.lock().await;
        if let Some(archive) = active.remove(id) {
            let completed_at = Utc::now();
            let duration_ms = (completed_at - archive.started_at).num_milliseconds() as u64;
            let count = |status: FileStatus| result.files.iter().filter(|f| f.status == status).count();

            let completed = CompletedArchive {
                id: archive.id,
                submission: archive.submission,
                started_at: archive.started_at,
                completed_at,
                duration_ms,
                success: result.success,
                archived: count(FileStatus::Archived),
                already_uploaded: count(FileStatus::AlreadyUploaded),
                failed: result.files.iter().filter(|f| !f.success).count(),
                error_message: result.error.clone(),
            };

            let mut completed_list = self.completed.lock().await;
            completed_list.push_front(completed);

            // Keep only recent entries
            while completed_list.len() > self.max_completed {
                completed_list.pop_back();
            }
        }
    }

    pub async fn get_status(&self) -> StatusResponse {
        let active = self.active.lock().await;
        let completed = self.completed.lock().await;

        StatusResponse {
            active: active.values().cloned().collect(),
            recent: completed.iter().take(20).cloned().collect(),
            total_completed: completed.len(),
        }
    }
}

/// Response for /status endpoint.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub active: Vec<ActiveArchive>,
    pub recent: Vec<CompletedArchive>,
    pub total_completed: usize,
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// POST /archive - Archive a submission
async fn archive_handler(
    Extension(state): Extension<Arc<ServerState>>,
    Json(request): Json<ArchiveRequest>,
) -> impl IntoResponse {
    let id = Uuid::new_v4().to_string();

    info!(
        id = %id,
        submission = %request.sub_uuid,
        files = request.files.len(),
        "Received archive request"
    );
    counter!("archiver_requests_total").increment(1);

    state.tracker.start(&id, &request).await;
    let result = state.archiver.archive(&request).await;
    state.tracker.complete(&id, &result).await;

    info!(id = %id, success = result.success, "Archive request finished");
    (StatusCode::OK, Json(result))
}

/// GET /status - Get archive status
async fn status_handler(Extension(state): Extension<Arc<ServerState>>) -> impl IntoResponse {
    Json(state.tracker.get_status().await)
}

/// GET /health - Health check
async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: "archiver".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// GET /metrics - Prometheus metrics
async fn metrics_handler(Extension(state): Extension<Arc<ServerState>>) -> impl IntoResponse {
    state.metrics.render()
}

/// Build the HTTP router.
pub fn build_router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/archive", post(archive_handler))
        .route("/status", get(status_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(Extension(state))
        .layer(TraceLayer::new_for_http())
}

/// Start the HTTP server.
pub async fn start_server(state: Arc<ServerState>, port: u16) -> anyhow::Result<()> {
    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(port = port, "Starting archiver HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use archive_common::FileResult;

    fn file_result(name: &str, status: FileStatus) -> FileResult {
        FileResult {
            uuid: None,
            name: name.to_string(),
            destination_path: None,
            size: None,
            compressed: false,
            checksum: None,
            success: status == FileStatus::Archived,
            status,
            error: None,
        }
    }

    fn request() -> ArchiveRequest {
        ArchiveRequest {
            sub_uuid: "0169d6f3-f65b-4d8a-b04c-857eec3b805e".to_string(),
            files: vec![],
        }
    }

    #[tokio::test]
    async fn test_tracker_moves_request_to_recent() {
        let tracker = ArchiveTracker::new();
        tracker.start("r1", &request()).await;

        let status = tracker.get_status().await;
        assert_eq!(status.active.len(), 1);
        assert_eq!(status.total_completed, 0);

        let result = BatchResult {
            submission_id: request().sub_uuid,
            success: false,
            error: Some("1 of 3 files failed to archive".to_string()),
            files: vec![
                file_result("a", FileStatus::Archived),
                file_result("b", FileStatus::AlreadyUploaded),
                file_result("c", FileStatus::Archived),
            ],
        };
        tracker.complete("r1", &result).await;

        let status = tracker.get_status().await;
        assert!(status.active.is_empty());
        assert_eq!(status.total_completed, 1);
        let recent = &status.recent[0];
        assert_eq!(recent.archived, 2);
        assert_eq!(recent.already_uploaded, 1);
        assert_eq!(recent.failed, 1);
        assert!(!recent.success);
    }

    #[tokio::test]
    async fn test_tracker_keeps_bounded_history() {
        let tracker = ArchiveTracker::new();
        let result = BatchResult {
            submission_id: "s".to_string(),
            success: true,
            error: None,
            files: vec![],
        };
        for i in 0..120 {
            let id = format!("r{}", i);
            tracker.start(&id, &request()).await;
            tracker.complete(&id, &result).await;
        }

        let status = tracker.get_status().await;
        assert_eq!(status.total_completed, 100);
        assert_eq!(status.recent.len(), 20);
        assert_eq!(status.recent[0].id, "r119");
    }

    #[tokio::test]
    async fn test_unknown_request_completion_is_ignored() {
        let tracker = ArchiveTracker::new();
        let result = BatchResult {
            submission_id: "s".to_string(),
            success: true,
            error: None,
            files: vec![],
        };
        tracker.complete("never-started", &result).await;
        assert_eq!(tracker.get_status().await.total_completed, 0);
    }
}
