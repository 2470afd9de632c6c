//! HTTP API for vidsqueeze
//!
//! Thin axum layer over [`JobExecutor`]: multipart upload, compression start,
//! status and listing, download, cleanup, and health.

use crate::artifacts::{
    discard_artifact, upload_file_name, validate_content_type, validate_extension,
};
use crate::config::{StorageConfig, UploadConfig};
use crate::error::{ErrorKind, JobError};
use crate::job_executor::JobExecutor;
use crate::jobs::JobView;
use crate::metrics::HealthReport;
use crate::presets::PresetKey;
use axum::body::Body;
use axum::extract::multipart::{Field, MultipartError};
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::middleware::map_response;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;

/// Slack on top of the upload ceiling for multipart framing and text fields
const MULTIPART_OVERHEAD_BYTES: u64 = 64 * 1024;

/// Errors that can occur when running the API server
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind to address: {0}")]
    BindError(#[from] std::io::Error),
}

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub executor: Arc<JobExecutor>,
    pub uploads: UploadConfig,
    pub storage: StorageConfig,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(executor: Arc<JobExecutor>, uploads: UploadConfig, storage: StorageConfig) -> Self {
        Self {
            executor,
            uploads,
            storage,
            started_at: Instant::now(),
        }
    }
}

/// A [`JobError`] rendered as a JSON error response
#[derive(Debug)]
pub struct ApiError {
    inner: JobError,
    status: Option<StatusCode>,
}

impl ApiError {
    /// Override the status derived from the error kind
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }

    pub fn status(&self) -> StatusCode {
        if let Some(status) = self.status {
            return status;
        }
        match self.inner.kind() {
            ErrorKind::Validation | ErrorKind::Conflict => StatusCode::BAD_REQUEST,
            ErrorKind::Capacity => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<JobError> for ApiError {
    fn from(inner: JobError) -> Self {
        Self {
            inner,
            status: None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        let body = match &self.inner {
            JobError::Busy { active, limit } => json!({
                "error": self.inner.to_string(),
                "activeJobs": active,
                "limit": limit,
            }),
            _ if status.is_server_error() => {
                tracing::error!(
                    status = %status,
                    error = %self.inner,
                    "Server error in API handler"
                );
                json!({ "error": "Internal server error" })
            }
            _ => json!({ "error": self.inner.to_string() }),
        };

        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadResponse {
    job_id: String,
    message: &'static str,
    resolution: PresetKey,
    original_size: u64,
    file_name: String,
}

/// Creates the axum Router with every API route
pub fn create_router(state: AppState) -> Router {
    let body_limit = usize::try_from(
        state
            .uploads
            .max_upload_bytes
            .saturating_add(MULTIPART_OVERHEAD_BYTES),
    )
    .unwrap_or(usize::MAX);

    Router::new()
        .route(
            "/api/upload",
            post(upload_video).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/api/compress/:id", post(start_compression))
        .route("/api/status/:id", get(job_status))
        .route("/api/jobs", get(list_jobs))
        .route("/api/download/:id", get(download))
        .route("/api/cleanup/:id", delete(cleanup))
        .route("/api/health", get(health))
        .layer(map_response(no_cache))
        .with_state(state)
}

/// Serve the API until `shutdown` resolves
pub async fn run_server<F>(
    state: AppState,
    addr: SocketAddr,
    shutdown: F,
) -> Result<(), ServerError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "API server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

async fn no_cache(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-store, must-revalidate"),
    );
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(header::EXPIRES, HeaderValue::from_static("0"));
    response
}

/// Upload stored on disk but not yet handed to a job; removed on drop
struct PendingUpload {
    file_name: String,
    path: PathBuf,
    size_bytes: u64,
    committed: bool,
}

impl PendingUpload {
    /// Hand the file over; the caller now owns its cleanup
    fn commit(mut self) -> (String, PathBuf, u64) {
        self.committed = true;
        (
            std::mem::take(&mut self.file_name),
            std::mem::take(&mut self.path),
            self.size_bytes,
        )
    }
}

impl Drop for PendingUpload {
    fn drop(&mut self) {
        if !self.committed {
            discard_artifact("upload", &self.path);
        }
    }
}

fn multipart_error(err: MultipartError, limit_bytes: u64) -> JobError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        JobError::TooLarge { limit_bytes }
    } else {
        JobError::MalformedUpload(err.body_text())
    }
}

async fn persist_video(state: &AppState, mut field: Field<'_>) -> Result<PendingUpload, JobError> {
    let limit = state.uploads.max_upload_bytes;
    let original_name = field
        .file_name()
        .map(str::to_string)
        .ok_or_else(|| JobError::MalformedUpload("video field has no file name".to_string()))?;

    let ext = validate_extension(&original_name, &state.uploads.allowed_extensions)?;
    validate_content_type(field.content_type(), &state.uploads.allowed_extensions)?;

    let mut pending = PendingUpload {
        file_name: original_name,
        path: state.storage.uploads_dir.join(upload_file_name(&ext)),
        size_bytes: 0,
        committed: false,
    };

    let mut file = tokio::fs::File::create(&pending.path).await?;
    while let Some(chunk) = field.chunk().await.map_err(|e| multipart_error(e, limit))? {
        pending.size_bytes += chunk.len() as u64;
        if pending.size_bytes > limit {
            return Err(JobError::TooLarge { limit_bytes: limit });
        }
        file.write_all(&chunk).await?;
    }
    file.flush().await?;

    Ok(pending)
}

/// Handler for POST /api/upload
async fn upload_video(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Json<UploadResponse>> {
    let limit = state.uploads.max_upload_bytes;
    let mut video: Option<PendingUpload> = None;
    let mut resolution: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, limit))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("video") if video.is_none() => {
                video = Some(persist_video(&state, field).await?);
            }
            Some("resolution") => {
                resolution = Some(field.text().await.map_err(|e| multipart_error(e, limit))?);
            }
            _ => {}
        }
    }

    let video =
        video.ok_or_else(|| JobError::MalformedUpload("No video file uploaded".to_string()))?;
    let (file_name, path, size_bytes) = video.commit();

    let view = state
        .executor
        .register_upload(file_name, path, size_bytes, resolution.as_deref())?;

    Ok(Json(UploadResponse {
        job_id: view.id,
        message: "Video uploaded successfully. Ready to compress.",
        resolution: view.resolution,
        original_size: view.original_size,
        file_name: view.input_file,
    }))
}

/// Handler for POST /api/compress/:id
async fn start_compression(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let view = state.executor.start(&id)?;
    Ok(Json(json!({
        "jobId": view.id,
        "message": "Compression started",
        "status": view.status,
    })))
}

/// Handler for GET /api/status/:id
async fn job_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<JobView>> {
    Ok(Json(state.executor.store().view(&id)?))
}

/// Handler for GET /api/jobs
async fn list_jobs(State(state): State<AppState>) -> Json<Vec<JobView>> {
    Json(state.executor.store().list())
}

/// Handler for GET /api/download/:id
async fn download(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Response> {
    let artifact = state.executor.download(&id)?;
    let file = match tokio::fs::File::open(&artifact.path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(JobError::FileMissing.into())
        }
        Err(e) => return Err(JobError::Io(e).into()),
    };
    let length = file.metadata().await.map_err(JobError::Io)?.len();

    let header_name: String = artifact
        .file_name
        .chars()
        .map(|c| if c.is_ascii_graphic() || c == ' ' { c } else { '_' })
        .collect();
    let disposition = format!("attachment; filename=\"{}\"", header_name);
    let disposition = HeaderValue::from_str(&disposition)
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"));

    tracing::info!(job_id = %id, file = %artifact.file_name, bytes = length, "Download started");

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("application/octet-stream")),
            (header::CONTENT_DISPOSITION, disposition),
            (header::CONTENT_LENGTH, HeaderValue::from(length)),
        ],
        Body::from_stream(ReaderStream::new(file)),
    )
        .into_response())
}

/// Handler for DELETE /api/cleanup/:id
async fn cleanup(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    state.executor.delete(&id).map_err(|e| match e {
        JobError::AlreadyProcessing => ApiError::from(e).with_status(StatusCode::CONFLICT),
        e => ApiError::from(e),
    })?;
    Ok(Json(json!({ "message": "Job cleaned up successfully" })))
}

/// Handler for GET /api/health
async fn health(State(state): State<AppState>) -> ApiResult<Json<HealthReport>> {
    let store = state.executor.store().clone();
    let admission = state.executor.admission();
    let storage = state.storage.clone();
    let uptime = state.started_at.elapsed();

    let report = tokio::task::spawn_blocking(move || {
        HealthReport::collect(&store, &admission, &storage, uptime)
    })
    .await
    .map_err(|e| JobError::Io(std::io::Error::other(e)))?;

    Ok(Json(report))
}
