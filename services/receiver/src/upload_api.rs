use crate::config::ApiConfig;
use crate::store::{ArtifactStore, StoreError};
use crate::validation::{check_filename, check_payload, UploadRejection};
use anyhow::{Context, Result};
use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        DefaultBodyLimit, Multipart, State,
    },
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument, warn};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ArtifactStore>,
    /// Multipart field carrying the file
    pub field_name: String,
    /// Route accepting uploads, shown on the home page
    pub upload_path: String,
}

impl AppState {
    pub fn new(store: Arc<dyn ArtifactStore>, config: &ApiConfig) -> Self {
        Self {
            store,
            field_name: config.field_name.clone(),
            upload_path: config.upload_path.clone(),
        }
    }
}

/// Successful upload response
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub success: bool,
    pub message: String,
    /// Generated storage name
    pub filename: String,
    /// Bucket, when backed by object storage
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    /// Size of the uploaded file in bytes
    pub size: u64,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// Handler failure, rendered as an `ErrorResponse`.
#[derive(Debug)]
pub enum ApiError {
    Rejected(UploadRejection),
    Store(StoreError),
}

impl From<UploadRejection> for ApiError {
    fn from(rejection: UploadRejection) -> Self {
        ApiError::Rejected(rejection)
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError::Store(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, code) = match &self {
            ApiError::Rejected(rejection) => {
                metrics::counter!("receiver.uploads.rejected", "reason" => rejection.code())
                    .increment(1);
                (rejection.status(), rejection.to_string(), rejection.code())
            }
            ApiError::Store(StoreError::AlreadyExists(name)) => {
                metrics::counter!("receiver.uploads.failed", "reason" => "conflict").increment(1);
                (
                    StatusCode::CONFLICT,
                    format!("File {} already exists", name),
                    "ALREADY_EXISTS",
                )
            }
            ApiError::Store(_) => {
                metrics::counter!("receiver.uploads.failed", "reason" => "storage").increment(1);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Failed to upload file to storage".to_string(),
                    "STORAGE_ERROR",
                )
            }
        };

        (
            status,
            Json(ErrorResponse {
                error,
                code: code.to_string(),
            }),
        )
            .into_response()
    }
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let cors = if config.cors_enabled {
        if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/", get(home))
        .route("/health", get(health_check))
        .route(&config.upload_path, post(upload))
        .layer(DefaultBodyLimit::max(config.max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Landing page describing the upload endpoint
async fn home(State(state): State<AppState>) -> Html<String> {
    Html(format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <title>Image Upload Server</title>
</head>
<body>
    <h1>Image Upload Server</h1>
    <p>Upload endpoint: <code>{path}</code></p>
    <p>Method: POST</p>
    <p>Content-Type: multipart/form-data</p>
    <p>File field: <code>{field}</code></p>
</body>
</html>
"#,
        path = state.upload_path,
        field = state.field_name,
    ))
}

/// Health check endpoint
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "camlink-receiver",
        "storage": state.store.describe(),
    }))
}

/// Accept one image upload
#[instrument(skip(state, multipart))]
async fn upload(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut multipart = multipart.map_err(|e| {
        warn!(error = %e.body_text(), "Failed to parse multipart form");
        UploadRejection::MalformedMultipart(e.body_text())
    })?;

    while let Some(field) = multipart.next_field().await.map_err(multipart_rejection)? {
        if field.name() != Some(state.field_name.as_str()) {
            continue;
        }

        let filename = field
            .file_name()
            .map(str::to_string)
            .ok_or(UploadRejection::MissingFile)?;
        let name = check_filename(&filename)?;

        let data = field.bytes().await.map_err(multipart_rejection)?;
        info!(filename = %filename, size = data.len(), "Received file");

        check_payload(name.kind, &data)?;

        let storage_name = name.storage_name(Utc::now());
        let content_type = name.kind.content_type();
        let size = data.len() as u64;

        let start = Instant::now();
        let artifact = state
            .store
            .put(&storage_name, content_type, data)
            .await
            .map_err(|e| {
                error!(name = %storage_name, error = %e, "Failed to store upload");
                ApiError::from(e)
            })?;

        metrics::histogram!("receiver.store.duration_seconds")
            .record(start.elapsed().as_secs_f64());
        metrics::counter!("receiver.uploads.accepted").increment(1);
        metrics::counter!("receiver.bytes.stored").increment(size);

        info!(
            name = %artifact.name,
            bucket = artifact.bucket.as_deref(),
            size_bytes = size,
            content_type = %artifact.content_type,
            "File stored"
        );

        let message = if artifact.bucket.is_some() {
            "File uploaded successfully to cloud storage"
        } else {
            "File uploaded successfully"
        };

        return Ok(Json(UploadResponse {
            success: true,
            message: message.to_string(),
            filename: artifact.name,
            bucket: artifact.bucket,
            size,
        }));
    }

    warn!(field = %state.field_name, "Failed to get file from form");
    Err(UploadRejection::MissingFile.into())
}

fn multipart_rejection(e: MultipartError) -> UploadRejection {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        UploadRejection::TooLarge
    } else {
        UploadRejection::MalformedMultipart(e.body_text())
    }
}

/// Start the API server and run until `shutdown` resolves
pub async fn start_api_server<F>(state: AppState, config: &ApiConfig, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, upload_path = %config.upload_path, "Starting upload API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .context("API server error")?;

    Ok(())
}
