//! REST read access to chunk snapshots.

#[cfg(test)]
#[path = "chunks_test.rs"]
mod chunks_test;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use frames::ErrorCode;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::services::chunk::{self, ChunkError};
use crate::state::AppState;

#[derive(Serialize)]
pub struct ChunkBody {
    pub namespace: String,
    pub key: String,
    /// Map of record id to record, `null` when empty.
    pub value: Value,
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

/// `GET /api/chunks/{namespace}/{key}`: the chunk's current value, `null` when empty.
pub async fn get_chunk(State(state): State<AppState>, Path((namespace, key)): Path<(String, String)>) -> Response {
    let result = match chunk::parse_path(&namespace, &key) {
        Ok(path) => chunk::snapshot(&state, path).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(value) => Json(ChunkBody { namespace, key, value }).into_response(),
        Err(e) => {
            let status = chunk_error_to_status(&e);
            if status.is_server_error() {
                warn!(error = %e, %namespace, %key, "chunk read failed");
            }
            (status, Json(ErrorBody { code: e.error_code(), message: e.to_string() })).into_response()
        }
    }
}

fn chunk_error_to_status(err: &ChunkError) -> StatusCode {
    match err {
        ChunkError::UnknownNamespace(_) => StatusCode::NOT_FOUND,
        ChunkError::NotChunked(_)
        | ChunkError::InvalidKey(_)
        | ChunkError::InvalidRecord(_)
        | ChunkError::WrongChunk { .. } => StatusCode::BAD_REQUEST,
        ChunkError::Database(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}
