use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::header::{ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_RANGE, CONTENT_TYPE, RANGE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use bytes::Bytes;
use graft_crypto::ContentHasher;
use graft_transport::wire::{self, HasObjectsResponse, ObjectsRequest, UploadResponse};
use graft_types::ContentHash;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value as JsonValue};
use tracing::debug;

use crate::auth::authorize;
use crate::error::{ServerError, ServerResult};
use crate::state::AppState;

const FRAGMENT_CONTENT_TYPE: &str = "application/json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "ok".into(),
            version: env!("CARGO_PKG_VERSION").into(),
        }
    }
}

/// Health check handler.
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::default())
}

/// Info handler.
pub async fn info_handler(State(state): State<Arc<AppState>>) -> Json<JsonValue> {
    let config = state.config();
    Json(json!({
        "name": "graft-server",
        "version": env!("CARGO_PKG_VERSION"),
        "storage": if config.storage_root.is_some() { "sqlite" } else { "memory" },
        "max_request_size": config.max_request_size,
        "namespaces": state.namespaces(),
    }))
}

/// Store a batch of `hash\tfragment` lines.
pub async fn upload_handler(
    State(state): State<Arc<AppState>>,
    Path(namespace): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ServerResult<Json<UploadResponse>> {
    authorize(&headers, state.config())?;
    let compressed = has_encoding(&headers, CONTENT_ENCODING);
    let ns = namespace.clone();
    let stored = blocking(move || {
        let body = if compressed {
            wire::decompress(&body)?
        } else {
            body.to_vec()
        };
        let fragments = wire::decode_lines(&body)?;
        if state.config().verify_uploads {
            for (hash, fragment) in &fragments {
                verify(hash, fragment)?;
            }
        }
        let transport = state.namespace(&ns)?;
        transport.put_many(&fragments)?;
        transport.flush()?;
        Ok(fragments.len())
    })
    .await?;
    debug!(namespace = %namespace, stored, compressed, "upload stored");
    Ok(Json(UploadResponse { stored }))
}

/// Serve one fragment, honouring a single `Range`.
pub async fn single_handler(
    State(state): State<Arc<AppState>>,
    Path((namespace, hash)): Path<(String, String)>,
    headers: HeaderMap,
) -> ServerResult<Response> {
    authorize(&headers, state.config())?;
    let hash = ContentHash::from_hex(&hash).map_err(|e| ServerError::BadRequest(e.to_string()))?;
    let fragment = blocking(move || Ok(state.namespace(&namespace)?.get(&hash)?)).await?;
    let Some(fragment) = fragment else {
        return Ok(StatusCode::NOT_FOUND.into_response());
    };

    let len = fragment.len();
    let Some(range) = headers.get(RANGE).and_then(|v| v.to_str().ok()) else {
        return Ok(([(CONTENT_TYPE, FRAGMENT_CONTENT_TYPE)], fragment).into_response());
    };
    match wire::parse_range(range, len) {
        Some((start, end)) => Ok((
            StatusCode::PARTIAL_CONTENT,
            [
                (CONTENT_TYPE, FRAGMENT_CONTENT_TYPE.to_string()),
                (CONTENT_RANGE, format!("bytes {start}-{end}/{len}")),
            ],
            fragment[start..=end].to_vec(),
        )
            .into_response()),
        None => Ok((
            StatusCode::RANGE_NOT_SATISFIABLE,
            [(CONTENT_RANGE, format!("bytes */{len}"))],
        )
            .into_response()),
    }
}

/// Bulk download. Missing hashes are left out of the answer.
pub async fn get_objects_handler(
    State(state): State<Arc<AppState>>,
    Path(namespace): Path<String>,
    headers: HeaderMap,
    Json(request): Json<ObjectsRequest>,
) -> ServerResult<Response> {
    authorize(&headers, state.config())?;
    let compress = has_encoding(&headers, ACCEPT_ENCODING);
    let requested = request.objects.len();
    let (body, found) = blocking(move || {
        let transport = state.namespace(&namespace)?;
        let fragments = transport.get_many(&request.objects)?;
        let present: Vec<(&ContentHash, &[u8])> = request
            .objects
            .iter()
            .zip(&fragments)
            .filter_map(|(hash, fragment)| fragment.as_deref().map(|f| (hash, f)))
            .collect();
        let found = present.len();
        let body = wire::encode_lines(present);
        let body = if compress {
            wire::compress(&body)?
        } else {
            body
        };
        Ok((body, found))
    })
    .await?;
    debug!(requested, found, compress, "bulk download");

    let mut response = ([(CONTENT_TYPE, wire::LINES_CONTENT_TYPE)], body).into_response();
    if compress {
        response
            .headers_mut()
            .insert(CONTENT_ENCODING, HeaderValue::from_static(wire::ZSTD_ENCODING));
    }
    Ok(response)
}

/// Presence check, answered in request order.
pub async fn diff_handler(
    State(state): State<Arc<AppState>>,
    Path(namespace): Path<String>,
    headers: HeaderMap,
    Json(request): Json<ObjectsRequest>,
) -> ServerResult<Json<HasObjectsResponse>> {
    authorize(&headers, state.config())?;
    let present = blocking(move || Ok(state.namespace(&namespace)?.has_many(&request.objects)?))
        .await?;
    Ok(Json(HasObjectsResponse { present }))
}

/// Transports are synchronous; keep them off the async workers.
async fn blocking<T, F>(f: F) -> ServerResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> ServerResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ServerError::Internal(e.to_string()))?
}

fn has_encoding(headers: &HeaderMap, name: axum::http::HeaderName) -> bool {
    headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case(wire::ZSTD_ENCODING))
}

fn verify(hash: &ContentHash, fragment: &[u8]) -> ServerResult<()> {
    let body: Map<String, JsonValue> = serde_json::from_slice(fragment)
        .map_err(|e| ServerError::BadRequest(format!("fragment {hash}: {e}")))?;
    let actual = ContentHasher::FRAGMENT
        .hash_fragment(&body)
        .map_err(|e| ServerError::Internal(e.to_string()))?;
    if actual == *hash {
        Ok(())
    } else {
        Err(ServerError::HashMismatch {
            claimed: hash.to_hex(),
            actual: actual.to_hex(),
        })
    }
}
