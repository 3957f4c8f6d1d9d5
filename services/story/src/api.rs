use crate::config::ApiConfig;
use crate::error::{PipelineError, ValidationError};
use crate::pipeline::{PipelineOrchestrator, PipelineOutcome, ResultMetadata};
use crate::validator::RawUpload;
use anyhow::{Context, Result};
use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        rejection::JsonRejection,
        DefaultBodyLimit, Multipart, State,
    },
    http::StatusCode,
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument, warn};

/// Field names older clients send the image under
const LEGACY_UPLOAD_FIELDS: &[&str] = &["image", "file"];

/// Room for multipart boundaries and headers on top of the image itself
const MULTIPART_OVERHEAD_BYTES: usize = 1024 * 1024;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<PipelineOrchestrator>,
    /// Multipart field carrying the image
    pub upload_field: String,
}

impl AppState {
    pub fn new(orchestrator: Arc<PipelineOrchestrator>, upload_field: impl Into<String>) -> Self {
        Self {
            orchestrator,
            upload_field: upload_field.into(),
        }
    }

    fn max_upload_bytes(&self) -> u64 {
        self.orchestrator.validator().policy().max_size_bytes
    }
}

/// Story generation response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    pub success: bool,
    pub story: String,
    /// `null` when the story could not be read aloud
    pub audio_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub metadata: ResultMetadata,
}

impl From<PipelineOutcome> for GenerateResponse {
    fn from(outcome: PipelineOutcome) -> Self {
        match outcome {
            PipelineOutcome::Assembled(result) => Self {
                success: true,
                story: result.story,
                audio_url: Some(result.audio_url),
                message: None,
                metadata: result.metadata,
            },
            PipelineOutcome::PartiallyAssembled {
                story, metadata, ..
            } => Self {
                success: true,
                story,
                audio_url: None,
                message: Some("Story generated, but audio generation failed".to_string()),
                metadata,
            },
        }
    }
}

/// Text-to-audio request
#[derive(Debug, Deserialize)]
pub struct NarrateRequest {
    #[serde(default)]
    pub text: String,
}

/// Text-to-audio response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NarrateResponse {
    pub success: bool,
    pub audio_url: String,
}

/// Upload check response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadTestResponse {
    pub success: bool,
    pub message: String,
    pub file_name: String,
    pub size_bytes: u64,
    pub mime_type: String,
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

    let body_limit = usize::try_from(state.max_upload_bytes())
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD_BYTES);
    let artifacts = ServeDir::new(state.orchestrator.store().root());
    let public_prefix = format!("/{}", config.public_prefix.trim_matches('/'));

    Router::new()
        .route("/api/generate", post(generate_story))
        .route("/api/generate-audio", post(generate_audio))
        .route("/api/upload-test", post(upload_test))
        .nest_service(&public_prefix, artifacts)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Generate a story and its audio from an uploaded image
#[instrument(skip(state, multipart))]
async fn generate_story(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<GenerateResponse>, PipelineError> {
    let upload = read_upload(multipart?, &state.upload_field, state.max_upload_bytes()).await?;
    let outcome = state.orchestrator.run(upload).await?;
    Ok(Json(outcome.into()))
}

/// Read caller-supplied text aloud
#[instrument(skip(state, request))]
async fn generate_audio(
    State(state): State<AppState>,
    request: Result<Json<NarrateRequest>, JsonRejection>,
) -> Result<Json<NarrateResponse>, PipelineError> {
    let Json(request) = request?;
    let asset = state.orchestrator.narrate(&request.text).await?;
    Ok(Json(NarrateResponse {
        success: true,
        audio_url: asset.public_url,
    }))
}

/// Validate and store an upload without generating anything
#[instrument(skip(state, multipart))]
async fn upload_test(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadTestResponse>, PipelineError> {
    let upload = read_upload(multipart?, &state.upload_field, state.max_upload_bytes()).await?;
    let image = state.orchestrator.accept(upload).await?;

    Ok(Json(UploadTestResponse {
        success: true,
        message: "File uploaded successfully".to_string(),
        file_name: image.file_name(),
        size_bytes: image.size_bytes,
        mime_type: image.declared_mime_type,
    }))
}

/// Pull the image out of a multipart form.
///
/// The configured field wins; a legacy field name is used when the configured
/// one is absent. Buffering stops once the ceiling is passed, but the rest of
/// the field is still drained and counted so the validator sees the real size.
async fn read_upload(
    mut multipart: Multipart,
    field_name: &str,
    max_bytes: u64,
) -> Result<RawUpload, PipelineError> {
    let mut fallback: Option<RawUpload> = None;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, max_bytes))?
    {
        let name = field.name().unwrap_or("").to_string();
        let is_configured = name == field_name;
        let is_legacy = fallback.is_none() && LEGACY_UPLOAD_FIELDS.contains(&name.as_str());

        if !is_configured && !is_legacy {
            continue;
        }

        let declared_mime_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let original_name = field.file_name().unwrap_or("upload").to_string();

        let mut bytes = Vec::new();
        let mut size_bytes = 0u64;

        while let Some(chunk) = field.chunk().await.map_err(|e| multipart_error(e, max_bytes))? {
            size_bytes += chunk.len() as u64;
            if size_bytes <= max_bytes {
                bytes.extend_from_slice(&chunk);
            }
        }

        if size_bytes > max_bytes {
            warn!(field = %name, size_bytes, max_bytes, "Upload exceeds size ceiling");
            bytes = Vec::new();
        }

        let upload = RawUpload {
            bytes,
            declared_mime_type,
            size_bytes,
            original_name,
        };

        if is_configured {
            return Ok(upload);
        }
        fallback = Some(upload);
    }

    fallback.ok_or_else(|| ValidationError::MissingImage.into())
}

fn multipart_error(e: MultipartError, max_bytes: u64) -> PipelineError {
    warn!(error = %e, "Failed to read multipart upload");
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        // The request body limit tripped before the field was fully read
        ValidationError::TooLarge {
            size_bytes: max_bytes.saturating_add(1),
            max_bytes,
        }
        .into()
    } else {
        ValidationError::Malformed {
            detail: e.body_text(),
        }
        .into()
    }
}

impl From<MultipartRejection> for PipelineError {
    fn from(rejection: MultipartRejection) -> Self {
        warn!(error = %rejection, "Request is not a multipart form");
        ValidationError::MissingImage.into()
    }
}

impl From<JsonRejection> for PipelineError {
    fn from(rejection: JsonRejection) -> Self {
        warn!(error = %rejection, status = %rejection.status(), "Rejected audio request body");
        ValidationError::EmptyText.into()
    }
}

/// Start the story API server and run it until `shutdown` completes
pub async fn start_api_server<F>(state: AppState, config: &ApiConfig, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting story API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .context("API server error")?;

    Ok(())
}
