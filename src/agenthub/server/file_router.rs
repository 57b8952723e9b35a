//! File upload and download endpoints.
//!
//! Paths are taken from the URL tail and must be absolute. Uploads stream
//! multipart chunks to disk instead of buffering whole files in memory.

use crate::agenthub::error::ApiError;
use crate::agenthub::models::Success;
use crate::agenthub::server::AppState;
use axum::extract::{Multipart, Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/file/upload/{*path}", post(upload_file))
        .route("/file/download/{*path}", get(download_file))
}

fn absolute_path(raw: &str) -> Result<PathBuf, ApiError> {
    // The wildcard capture keeps the leading slash of an absolute path.
    let path = PathBuf::from(raw);
    if !path.is_absolute() {
        return Err(ApiError::Validation(format!(
            "path must be absolute: {}",
            raw
        )));
    }
    Ok(path)
}

async fn upload_file(
    State(state): State<AppState>,
    Path(raw_path): Path<String>,
    mut multipart: Multipart,
) -> Result<Json<Success>, ApiError> {
    state.health.touch();
    let path = absolute_path(&raw_path)?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(ApiError::from)?;
    }

    let mut field = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::Validation(format!("invalid multipart body: {}", err)))?
        .ok_or_else(|| ApiError::Validation("multipart body contained no file".to_string()))?;

    let mut file = tokio::fs::File::create(&path).await.map_err(ApiError::from)?;
    let mut written: u64 = 0;
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|err| ApiError::Validation(format!("error reading upload: {}", err)))?
    {
        file.write_all(&chunk).await.map_err(ApiError::from)?;
        written += chunk.len() as u64;
    }
    file.flush().await.map_err(ApiError::from)?;
    log::info!("uploaded {} bytes to {:?}", written, path);
    Ok(Json(Success::default()))
}

async fn download_file(
    State(_state): State<AppState>,
    Path(raw_path): Path<String>,
) -> Result<Response, ApiError> {
    let path = absolute_path(&raw_path)?;
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::NotFound(format!("file {}", raw_path)));
        }
        Err(err) => return Err(ApiError::from(err)),
    };
    Ok((
        [(header::CONTENT_TYPE, "application/octet-stream")],
        bytes,
    )
        .into_response())
}
