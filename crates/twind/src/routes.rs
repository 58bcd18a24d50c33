//! HTTP surface: the single-page UI, the match API and celebrity photos.
//!
//! NOTE: Path params use `:param` syntax (axum 0.7).

use crate::error::ApiError;
use crate::photos::{celebrity_dir_name, photo_urls};
use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use twin_core::EngineHandle;
use twin_pipeline::{find_matches, MatchOptions};
use twin_store::VectorStore;

pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

const INDEX_HTML: &str = include_str!("../static/index.html");

/// Shared handler state. Cloned per request; everything heavy is behind an `Arc`
/// or a channel.
pub struct AppState<S> {
    pub store: Arc<S>,
    pub engine: EngineHandle,
    pub matching: Arc<MatchOptions>,
    pub celebrities_dir: Arc<PathBuf>,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            engine: self.engine.clone(),
            matching: Arc::clone(&self.matching),
            celebrities_dir: Arc::clone(&self.celebrities_dir),
        }
    }
}

impl<S> AppState<S> {
    pub fn new(store: S, engine: EngineHandle, matching: MatchOptions, celebrities_dir: PathBuf) -> Self {
        Self {
            store: Arc::new(store),
            engine,
            matching: Arc::new(matching),
            celebrities_dir: Arc::new(celebrities_dir),
        }
    }
}

pub fn router<S: VectorStore + 'static>(state: AppState<S>) -> Router {
    let photos = ServeDir::new(state.celebrities_dir.as_path());

    Router::new()
        .route("/", get(index))
        .route("/health", get(health::<S>))
        .route("/api/match", post(match_photo::<S>))
        .route("/api/celebrities/:label/photos", get(celebrity_photos::<S>))
        .nest_service("/celebrities", photos)
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

#[derive(Debug, Serialize)]
pub struct MatchResponse {
    pub label: String,
    pub score: f32,
    pub photos: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct PhotosResponse {
    pub label: String,
    pub photos: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub collection: String,
    pub points: Option<u64>,
}

fn multipart_error(err: MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge
    } else {
        ApiError::BadRequest(err.body_text())
    }
}

/// Bytes of the `image` field; other fields are ignored.
async fn read_image(multipart: &mut Multipart) -> Result<Vec<u8>, ApiError> {
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some("image") {
            continue;
        }
        let bytes = field.bytes().await.map_err(multipart_error)?;
        if bytes.is_empty() {
            return Err(ApiError::BadRequest("image is empty".into()));
        }
        return Ok(bytes.to_vec());
    }
    Err(ApiError::BadRequest("missing `image` field".into()))
}

/// `POST /api/match`: multipart photo in, closest celebrity out.
async fn match_photo<S: VectorStore + 'static>(
    State(state): State<AppState<S>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<MatchResponse>, ApiError> {
    let mut multipart = multipart.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let image = read_image(&mut multipart).await?;
    let size = image.len();

    let matches = find_matches(state.store.as_ref(), &state.engine, &state.matching, image).await?;
    let best = matches.into_iter().next().ok_or(ApiError::NoMatch)?;
    tracing::info!(label = %best.label, score = best.score, bytes = size, "matched photo");

    let photos = photo_urls(&state.celebrities_dir, &best.label);
    Ok(Json(MatchResponse { label: best.label, score: best.score, photos }))
}

/// `GET /api/celebrities/:label/photos`
async fn celebrity_photos<S: VectorStore + 'static>(
    State(state): State<AppState<S>>,
    Path(label): Path<String>,
) -> Result<Json<PhotosResponse>, ApiError> {
    if celebrity_dir_name(&label).is_none() {
        return Err(ApiError::BadRequest(format!("invalid celebrity name {label:?}")));
    }
    let photos = photo_urls(&state.celebrities_dir, &label);
    Ok(Json(PhotosResponse { label, photos }))
}

/// `GET /health`. Always 200; `status` says whether the catalog is usable.
async fn health<S: VectorStore + 'static>(State(state): State<AppState<S>>) -> Json<HealthResponse> {
    let collection = state.matching.collection.clone();
    let (status, points) = match state.store.collection_info(&collection).await {
        Ok(Some(info)) => ("ok", Some(info.points_count)),
        Ok(None) => ("empty", None),
        Err(e) => {
            tracing::warn!(error = %e, "health check could not reach vector database");
            ("degraded", None)
        }
    };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        collection,
        points,
    })
}
