use crate::config::ApiConfig;
use crate::error::ImageError;
use crate::file_store::UploadedImage;
use crate::image_service::{ImageService, Submitted, ThumbnailResult};
use anyhow::{Context, Result};
use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        DefaultBodyLimit, Multipart, Path, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::future::Future;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, instrument, warn};

/// Multipart field carrying the image
pub const UPLOAD_FIELD: &str = "image";

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ImageService>,
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
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/image", post(upload_image))
        .route("/image/:image_id/thumbnail", get(get_thumbnail))
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "thumbnail-service"
    }))
}

/// Readiness check endpoint
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.service.ready().await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "metadata_store": "connected"
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "not_ready",
                "metadata_store": "disconnected",
                "error": e.to_string()
            })),
        ),
    }
}

/// Accept an image upload and start its thumbnail job
#[instrument(skip(state, multipart))]
async fn upload_image(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<Submitted>, ImageError> {
    let Ok(multipart) = multipart else {
        debug!("Request body is not multipart");
        return Err(ImageError::MissingUpload);
    };

    let upload = read_upload(multipart)
        .await
        .map_err(|e| {
            let status = e.status();
            warn!(error = %e, status = %status, "Rejected multipart body");
            multipart_error(status, e.to_string())
        })?
        .ok_or(ImageError::MissingUpload)?;

    let submitted = state.service.submit(upload).await?;

    Ok(Json(submitted))
}

/// Pull the first file part named `image` out of the form
async fn read_upload(mut multipart: Multipart) -> Result<Option<UploadedImage>, MultipartError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let Some(file_name) = field.file_name().map(str::to_string) else {
            continue;
        };
        let content_type = field.content_type().map(str::to_string);
        let data = field.bytes().await?;

        return Ok(Some(UploadedImage {
            file_name,
            content_type,
            data,
        }));
    }

    Ok(None)
}

/// Map the status axum assigns a multipart failure onto the error taxonomy.
///
/// A malformed form (4xx) yields no readable file part, so it is reported
/// as a missing upload. Server-side stream failures stay 5xx.
fn multipart_error(status: StatusCode, detail: String) -> ImageError {
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        ImageError::PayloadTooLarge
    } else if status.is_client_error() {
        ImageError::MissingUpload
    } else {
        ImageError::UploadRead(detail)
    }
}

/// Report job status, or serve the thumbnail once it exists
#[instrument(skip(state))]
async fn get_thumbnail(
    State(state): State<AppState>,
    Path(image_id): Path<String>,
) -> Result<Response, ImageError> {
    match state.service.get_status(&image_id).await? {
        ThumbnailResult::Ready {
            content,
            content_type,
        } => Ok(([(header::CONTENT_TYPE, content_type)], content).into_response()),
        ThumbnailResult::Pending(envelope) => Ok(Json(envelope).into_response()),
    }
}

/// Start the image API server, draining connections once `shutdown` resolves
pub async fn start_api_server<F>(state: AppState, config: &ApiConfig, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting image API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .context("API server error")?;

    Ok(())
}
