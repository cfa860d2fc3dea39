//! The playback endpoint: signature verification glued to the stream engine.

use crate::auth::{SignatureError, SignaturePayload};
use crate::server::AppContext;
use crate::streaming::StreamError;
use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    #[serde(default)]
    pub signature: String,
    #[serde(default)]
    pub path: String,
}

/// `GET /stream?signature=<token>&path=<relpath>`
pub async fn stream(
    State(ctx): State<AppContext>,
    Query(query): Query<StreamQuery>,
    headers: HeaderMap,
) -> Response {
    let payload = match authenticate(&ctx, &query.signature) {
        Ok(payload) => payload,
        Err(response) => return response,
    };

    tracing::info!(
        path = %query.path,
        item_id = %payload.item_id,
        media_id = %payload.media_id,
        expire_at = payload.expire_at,
        "Authentication successful"
    );

    // The storage base is a plain prefix; any normalization happens in the
    // engine's path resolution.
    let file_path = format!("{}{}", ctx.config.storage_base_path, query.path);
    let range_header = headers
        .get(header::RANGE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);

    let streamer = Arc::clone(&ctx.streamer);
    match streamer.stream(PathBuf::from(file_path), range_header).await {
        Ok(stream) => {
            let mut response = Response::builder()
                .status(stream.head.status)
                .header(header::CONTENT_TYPE, stream.head.content_type)
                .header(header::CONTENT_LENGTH, stream.head.content_length.to_string())
                .header(header::ACCEPT_RANGES, "bytes");
            if let Some(ref content_range) = stream.head.content_range {
                response = response.header(header::CONTENT_RANGE, content_range.as_str());
            }
            response
                .body(stream.body)
                .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
        }
        Err(e) => stream_error_response(e),
    }
}

/// Verify the token and enforce the call-site rules: non-empty ids and a
/// future expiry.
fn authenticate(ctx: &AppContext, token: &str) -> Result<SignaturePayload, Response> {
    let payload = ctx.signer.decrypt(token).map_err(|e| {
        tracing::error!(error = %e, "Authentication failed");
        match e {
            SignatureError::InvalidStructure => unauthorized("Invalid signature structure"),
            _ => unauthorized("Invalid signature"),
        }
    })?;

    if payload.item_id.is_empty() {
        tracing::error!("Authentication failed: itemId is empty");
        return Err(unauthorized("itemId is empty"));
    }
    if payload.media_id.is_empty() {
        tracing::error!("Authentication failed: mediaId is empty");
        return Err(unauthorized("mediaId is empty"));
    }

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or_default();
    if payload.expire_at < now {
        tracing::error!(expire_at = payload.expire_at, "Authentication failed: signature expired");
        return Err(unauthorized("Signature has expired"));
    }

    Ok(payload)
}

fn unauthorized(message: &str) -> Response {
    (StatusCode::UNAUTHORIZED, Json(json!({ "error": message }))).into_response()
}

fn stream_error_response(error: StreamError) -> Response {
    match error {
        StreamError::NotFound(_) => StatusCode::NOT_FOUND.into_response(),
        StreamError::RangeUnsatisfiable { size } => Response::builder()
            .status(StatusCode::RANGE_NOT_SATISFIABLE)
            .header(header::CONTENT_RANGE, format!("bytes */{size}"))
            .body(Body::empty())
            .unwrap_or_else(|_| StatusCode::RANGE_NOT_SATISFIABLE.into_response()),
        StreamError::Internal(_) | StreamError::ClientGone => {
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
