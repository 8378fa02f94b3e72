//! HTTP surface.
//!
//! Endpoints:
//! - GET  /          service metadata
//! - GET  /health    liveness
//! - POST /separate  multipart `audio` (+ optional `model`, `device`, `format`), returns a zip
//! - POST /cleanup   purge stale workspaces, optional `?older_than_secs=`

use std::{fs, sync::Arc, time::Duration};

use axum::{
    body::Body,
    extract::{
        multipart::{Multipart, MultipartError, MultipartRejection},
        DefaultBodyLimit, Query, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    config::ServiceConfig,
    core::{
        packager::{archive_name, package},
        separator::Separator,
    },
    error::{Result, StemError},
    io::workspace::{WorkspaceGuard, WorkspaceManager},
    types::{
        DevicePreference, OutputFormat, SeparationRequest, SUPPORTED_INPUT_FORMATS,
    },
};

#[derive(Clone)]
pub struct AppState {
    pub separator: Separator,
    pub workspaces: WorkspaceManager,
    pub config: Arc<ServiceConfig>,
}

impl AppState {
    pub fn new(separator: Separator, workspaces: WorkspaceManager, config: ServiceConfig) -> Self {
        Self {
            separator,
            workspaces,
            config: Arc::new(config),
        }
    }
}

pub fn router(state: AppState) -> Router {
    let limit = state.config.max_upload_bytes;
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/separate", post(separate))
        .route("/cleanup", post(cleanup))
        .layer(DefaultBodyLimit::max(limit))
        .with_state(state)
}

/// JSON error body `{error, message}` with a mapped status.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    error: &'static str,
    message: String,
    uploaded_format: Option<String>,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    uploaded_format: Option<&'a str>,
}

impl ApiError {
    fn new(status: StatusCode, error: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            error,
            message: message.into(),
            uploaded_format: None,
        }
    }

    fn bad_request(error: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, error, message)
    }

    fn timeout(after: Duration) -> Self {
        Self::new(
            StatusCode::GATEWAY_TIMEOUT,
            "Processing timed out",
            format!("Separation did not finish within {}s", after.as_secs()),
        )
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<StemError> for ApiError {
    fn from(e: StemError) -> Self {
        let (status, error) = match &e {
            StemError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "Invalid input"),
            StemError::ModelNotFound(_) => (StatusCode::NOT_FOUND, "Model not found"),
            StemError::ModelLoad { .. } => (StatusCode::SERVICE_UNAVAILABLE, "Model unavailable"),
            StemError::DeviceUnavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "Device unavailable")
            }
            StemError::DeviceOom { .. } => (StatusCode::SERVICE_UNAVAILABLE, "Out of memory"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "Processing failed"),
        };
        if status.is_server_error() {
            tracing::error!(error = %e, "request failed");
        }
        Self::new(status, error, e.to_string())
    }
}

impl From<MultipartError> for ApiError {
    fn from(e: MultipartError) -> Self {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            return Self::new(
                StatusCode::PAYLOAD_TOO_LARGE,
                "File too large",
                "Upload exceeds the configured size limit",
            );
        }
        Self::bad_request("Invalid request", e.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.error,
            message: &self.message,
            uploaded_format: self.uploaded_format.as_deref(),
        };
        (self.status, Json(body)).into_response()
    }
}

async fn index(State(state): State<AppState>) -> Json<serde_json::Value> {
    let loader = state.separator.cache().loader();
    Json(json!({
        "message": "Audio Stem Separation API",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "/separate": "POST - upload audio file for stem separation",
            "/health": "GET - health check",
            "/cleanup": "POST - remove stale workspaces",
        },
        "supported_formats": SUPPORTED_INPUT_FORMATS,
        "output_formats": OutputFormat::ALL.iter().map(|f| f.extension()).collect::<Vec<_>>(),
        "models": loader.available_models(),
        "default_model": loader.default_model(),
        "max_file_size": state.config.max_upload_bytes,
    }))
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "message": "Stem separation service is running",
        "accelerator": state.separator.resolver().accelerator_available(),
    }))
}

/// Werkzeug-style: basename only, ASCII word characters, dots and dashes.
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or("");
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches(['.', '_']).to_string();
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned
    }
}

struct Upload {
    /// `None` when the part carried no `filename`, i.e. it was not a file.
    file_name: Option<String>,
    bytes: Vec<u8>,
}

#[derive(Default)]
struct SeparateForm {
    audio: Option<Upload>,
    model: Option<String>,
    device: Option<String>,
    format: Option<String>,
}

async fn read_form(mut multipart: Multipart) -> std::result::Result<SeparateForm, ApiError> {
    let mut form = SeparateForm::default();
    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "audio" => {
                let file_name = field.file_name().map(str::to_owned);
                let bytes = field.bytes().await?;
                form.audio = Some(Upload {
                    file_name,
                    bytes: bytes.to_vec(),
                });
            }
            "model" => form.model = Some(field.text().await?),
            "device" => form.device = Some(field.text().await?),
            "format" => form.format = Some(field.text().await?),
            _ => {}
        }
    }
    Ok(form)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

async fn separate(
    State(state): State<AppState>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> std::result::Result<Response, ApiError> {
    let multipart =
        multipart.map_err(|e| ApiError::bad_request("Invalid request", e.body_text()))?;
    let form = read_form(multipart).await?;

    // Everything below is validated before a workspace exists.
    let (upload_name, bytes) = match form.audio {
        Some(Upload {
            file_name: Some(name),
            bytes,
        }) => (name, bytes),
        _ => {
            return Err(ApiError::bad_request(
                "No audio file provided",
                "Form field `audio` must be a file upload",
            ))
        }
    };
    if upload_name.trim().is_empty() {
        return Err(ApiError::bad_request("No file selected", "The uploaded file has no name"));
    }
    let file_name = sanitize_file_name(&upload_name);
    let extension = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_else(|| "unknown".to_string());
    if !SUPPORTED_INPUT_FORMATS.contains(&extension.as_str()) {
        let mut err = ApiError::bad_request(
            "Invalid file format",
            format!("Supported formats: {}", SUPPORTED_INPUT_FORMATS.join(", ")),
        );
        err.uploaded_format = Some(extension);
        return Err(err);
    }

    let device = match non_empty(form.device) {
        Some(d) => d.parse::<DevicePreference>()?,
        None => state.config.default_device,
    };
    let format = match non_empty(form.format) {
        Some(f) => f.parse::<OutputFormat>()?,
        None => state.config.default_format,
    };
    let model = non_empty(form.model).unwrap_or_else(|| state.config.default_model.clone());
    let model = state.separator.cache().resolve(&model)?;
    state.separator.resolver().resolve(device)?;

    let guard = state.workspaces.acquire()?;
    tracing::info!(
        workspace = %guard.id,
        file = %file_name,
        model = %model,
        %device,
        %format,
        "separation request"
    );

    let separator = state.separator.clone();
    let job = tokio::task::spawn_blocking(move || {
        run_job(&separator, guard, &file_name, &bytes, model, device, format)
    });

    let timeout = state.config.request_timeout();
    let (archive_name, body) = match tokio::time::timeout(timeout, job).await {
        Ok(Ok(result)) => result?,
        Ok(Err(join)) => {
            return Err(StemError::Separation(format!("separation task aborted: {join}")).into())
        }
        // The blocking job still owns its guard and releases it when it ends.
        Err(_) => return Err(ApiError::timeout(timeout)),
    };

    Ok((
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{archive_name}\""),
            ),
        ],
        Body::from(body),
    )
        .into_response())
}

/// Blocking half of `/separate`. The guard is consumed, so the workspace is
/// gone when this returns on every path.
fn run_job(
    separator: &Separator,
    guard: WorkspaceGuard,
    file_name: &str,
    bytes: &[u8],
    model: String,
    device: DevicePreference,
    format: OutputFormat,
) -> Result<(String, Vec<u8>)> {
    let upload_path = guard.upload_dir.join(file_name);
    fs::write(&upload_path, bytes)?;

    let request = SeparationRequest::new(upload_path, model, device, format);
    let stems = separator.separate(&request, &guard.output_dir)?;
    let archive = package(&stems, &guard.root)?;
    let body = fs::read(&archive)?;
    let name = archive_name(&stems);

    if let Err(e) = guard.release() {
        tracing::warn!(error = %e, "workspace release failed after success");
    }
    Ok((name, body))
}

#[derive(Debug, Deserialize)]
pub struct CleanupParams {
    pub older_than_secs: Option<u64>,
}

async fn cleanup(
    State(state): State<AppState>,
    Query(params): Query<CleanupParams>,
) -> std::result::Result<Json<serde_json::Value>, ApiError> {
    let retention = params
        .older_than_secs
        .map(Duration::from_secs)
        .unwrap_or_else(|| state.config.cleanup_retention());
    let workspaces = state.workspaces.clone();

    let report = tokio::task::spawn_blocking(move || workspaces.purge_all(retention))
        .await
        .map_err(|e| StemError::Workspace(format!("cleanup task aborted: {e}")))??;

    Ok(Json(json!({
        "status": "success",
        "message": format!("Removed {} workspace(s)", report.removed),
        "removed": report.removed,
        "skipped_active": report.skipped_active,
        "failed": report.failed,
    })))
}
