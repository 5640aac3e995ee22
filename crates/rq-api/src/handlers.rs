//! # rq-api Handlers
//!
//! This module coordinates the flow between HTTP requests and the `Catalog`.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::multipart::MultipartError;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use rq_core::error::AppError;
use rq_core::models::{Card, CounterUpdate, Download, QslForm};
use rq_core::Catalog;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::ApiError;

/// Name of the multipart field carrying the photo.
pub const FILE_FIELD: &str = "qsl";

/// State shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<Catalog>,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub success: bool,
    pub qsl: Card,
}

#[derive(Debug, Deserialize)]
pub struct CallQuery {
    #[serde(default)]
    pub call: String,
}

#[derive(Debug, Deserialize)]
pub struct PidQuery {
    #[serde(default)]
    pub pid: String,
}

/// One raw store entry, as shown by the debug listing.
#[derive(Debug, Serialize)]
pub struct DebugAsset {
    pub public_id: String,
    pub url: String,
    pub created_at: DateTime<Utc>,
    pub fields: BTreeMap<String, String>,
}

/// Liveness check.
pub async fn health() -> Json<Value> {
    Json(json!({ "ok": true }))
}

/// Every card, newest first.
pub async fn list_qsl(State(state): State<AppState>) -> Result<Json<Vec<Card>>, ApiError> {
    Ok(Json(state.catalog.list().await?))
}

/// Raw store listing with decoded context, for operators.
pub async fn debug_qsl(State(state): State<AppState>) -> Result<Json<Vec<DebugAsset>>, ApiError> {
    let assets = state.catalog.assets().await?;
    Ok(Json(
        assets
            .into_iter()
            .map(|asset| DebugAsset {
                fields: asset.context.decode(),
                public_id: asset.public_id,
                url: asset.url,
                created_at: asset.created_at,
            })
            .collect(),
    ))
}

/// Orchestrates the creation of a new card from a multipart form.
pub async fn upload_qsl(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut photo = None;
    let mut form = QslForm::default();

    while let Some(field) = multipart.next_field().await.map_err(bad_multipart)? {
        let name = field.name().unwrap_or_default().to_string();
        let slot = match name.as_str() {
            FILE_FIELD => {
                photo = Some(field.bytes().await.map_err(bad_multipart)?.to_vec());
                continue;
            }
            "indicatif" => &mut form.indicatif,
            "date" => &mut form.date,
            "time" => &mut form.time,
            "band" => &mut form.band,
            "mode" => &mut form.mode,
            "report" => &mut form.report,
            "note" => &mut form.note,
            other => {
                tracing::debug!(field = other, "ignoring unknown upload field");
                continue;
            }
        };
        *slot = field.text().await.map_err(bad_multipart)?;
    }

    let card = state.catalog.create_card(photo, form).await?;
    Ok(Json(UploadResponse {
        success: true,
        qsl: card,
    }))
}

/// `GET /download/{call}`
pub async fn search_by_path(
    State(state): State<AppState>,
    Path(call): Path<String>,
) -> Result<Json<Vec<Card>>, ApiError> {
    Ok(Json(state.catalog.search(&call).await?))
}

/// `GET /download?call=`
pub async fn search_by_query(
    State(state): State<AppState>,
    Query(query): Query<CallQuery>,
) -> Result<Json<Vec<Card>>, ApiError> {
    Ok(Json(state.catalog.search(&query.call).await?))
}

/// `GET /file/{*public_id}`
pub async fn file_by_path(
    State(state): State<AppState>,
    Path(public_id): Path<String>,
) -> Result<Response, ApiError> {
    serve_file(&state, &public_id).await
}

/// `GET /file?pid=`
pub async fn file_by_query(
    State(state): State<AppState>,
    Query(query): Query<PidQuery>,
) -> Result<Response, ApiError> {
    serve_file(&state, &query.pid).await
}

async fn serve_file(state: &AppState, public_id: &str) -> Result<Response, ApiError> {
    if public_id.trim().is_empty() {
        return Err(AppError::ValidationError("missing public id".to_string()).into());
    }
    let download = state.catalog.download(public_id).await?;
    if let CounterUpdate::Recorded(count) = download.counter {
        tracing::debug!(public_id = %download.public_id, downloads = count, "qsl downloaded");
    }
    Ok(attachment(download))
}

fn attachment(download: Download) -> Response {
    let content_type = mime_guess::from_path(&download.url)
        .first()
        .filter(|m| m.type_() == mime::IMAGE)
        .unwrap_or(mime::IMAGE_JPEG);
    let disposition = format!("attachment; filename=\"{}\"", download.filename);

    (
        [
            (CONTENT_TYPE, content_type.to_string()),
            (CONTENT_DISPOSITION, disposition),
        ],
        download.bytes,
    )
        .into_response()
}

fn bad_multipart(err: MultipartError) -> ApiError {
    let reason = format!("invalid upload: {}", err.body_text());
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge(reason).into()
    } else {
        AppError::ValidationError(reason).into()
    }
}
