//! Upload handler.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::lifecycle::upload_prefix;
use crate::state::AppState;

/// Longest accepted file name.
const MAX_FILENAME_LEN: usize = 128;

/// Upload query parameters.
#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    /// Original file name.
    pub filename: String,
}

/// Upload response.
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    /// Object key, usable as a job's `input_key`.
    pub key: String,
    /// Public URL of the object.
    pub url: String,
    /// Stored size in bytes.
    pub size: usize,
}

/// Store the request body under the caller's upload prefix.
pub async fn upload(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(query): Query<UploadQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<UploadResponse>, ApiError> {
    let filename = sanitize_filename(&query.filename)
        .ok_or_else(|| ApiError::BadRequest("invalid filename".into()))?;
    if body.is_empty() {
        return Err(ApiError::BadRequest("empty upload".into()));
    }

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();

    let key = format!(
        "{}{}/{filename}",
        upload_prefix(&auth.user_id),
        uuid::Uuid::new_v4()
    );
    let size = body.len();

    state
        .objects
        .put(&key, body.to_vec(), &content_type)
        .await
        .map_err(crate::error::ServiceError::from)?;

    tracing::info!(user_id = %auth.user_id, key = %key, size, "Upload stored");

    Ok(Json(UploadResponse {
        url: state.objects.public_url(&key),
        key,
        size,
    }))
}

/// Keep the last path segment and replace anything unusual with `_`.
fn sanitize_filename(raw: &str) -> Option<String> {
    let name = raw.rsplit(['/', '\\']).next()?.trim();
    if name.is_empty() || name == "." || name == ".." || name.len() > MAX_FILENAME_LEN {
        return None;
    }
    Some(
        name.chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                    c
                } else {
                    '_'
                }
            })
            .collect(),
    )
}
