use std::str::FromStr;

use axum::{
    body::Body,
    extract::rejection::{JsonRejection, QueryRejection},
    extract::{Path, Query, State},
    http::{header, HeaderMap},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use hoard_blob::{ChunkedInit, FileType, FileUpload, ListScope, MetadataPatch, StorageKey};
use hoard_core::errors::HoardError;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::multipart::MultipartForm;
use crate::response::{content, success};
use crate::{HoardAxumError, HoardState};

type JsonResult = Result<Json<Value>, HoardAxumError>;

const DEFAULT_PAGE_SIZE: usize = 100;

pub fn router(state: HoardState) -> Router<()> {
    Router::new()
        .route("/health", get(health))
        .route("/upload", post(upload_file))
        .route("/upload/chunk/init", get(init_chunked))
        .route("/upload/chunk", post(upload_chunk))
        .route("/upload/chunk/progress", get(chunk_progress))
        .route("/files", get(list_files))
        .route("/file/{key}", get(read_file).delete(delete_file).patch(update_file))
        .route("/file/{key}/meta", get(file_meta))
        .route("/trash", get(list_trash))
        .route("/trash/{key}", get(read_trashed).delete(delete_trashed))
        .route("/trash/{key}/move", post(move_to_trash))
        .route("/trash/{key}/restore", post(restore_from_trash))
        .with_state(state)
}

fn map_query_rejection(rejection: QueryRejection) -> HoardAxumError {
    HoardError::bad_request(format!("Invalid query: {}", rejection.body_text())).into()
}

fn map_json_rejection(rejection: JsonRejection) -> HoardAxumError {
    HoardError::bad_request(format!("Failed to parse the request body as JSON: {}", rejection.body_text())).into()
}

fn parse_key(raw: &str) -> Result<StorageKey, HoardAxumError> {
    Ok(StorageKey::parse(raw)?)
}

fn range_header(headers: &HeaderMap) -> Option<&str> {
    headers.get(header::RANGE).and_then(|v| v.to_str().ok())
}

async fn health() -> &'static str {
    "ok"
}

async fn upload_file(State(state): State<HoardState>, headers: HeaderMap, body: Body) -> JsonResult {
    let mut form = MultipartForm::parse(&headers, body, state.limits).await?;
    let file = form
        .take_file("file")
        .or_else(|| form.take_any_file())
        .ok_or_else(|| HoardError::bad_request("No file uploaded"))?;

    let file_name = file
        .file_name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| "upload.bin".to_string());
    let content_type = file
        .content_type
        .filter(|ct| ct != "application/octet-stream")
        .or_else(|| mime_guess::from_path(&file_name).first().map(|m| m.to_string()));
    let mut upload = FileUpload::new(file_name, file.data);
    if let Some(content_type) = content_type {
        upload = upload.with_content_type(content_type);
    }
    if let Some(file_type) = form.text("fileType") {
        upload = upload.with_file_type(FileType::from_str(file_type)?);
    }
    if let Some(tags) = form.text("tags") {
        upload = upload.with_tags(split_tags(tags));
    }

    let key = state.adapter.upload_file(upload).await?;
    success(json!({ "key": key }))
}

fn split_tags(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitQuery {
    file_type: String,
    file_name: String,
    file_size: u64,
    total_chunks: u32,
}

async fn init_chunked(
    State(state): State<HoardState>,
    query: Result<Query<InitQuery>, QueryRejection>,
) -> JsonResult {
    let Query(query) = query.map_err(map_query_rejection)?;
    let key = state
        .adapter
        .init_chunked(ChunkedInit {
            file_type: FileType::from_str(&query.file_type)?,
            file_name: query.file_name,
            file_size: query.file_size,
            total_chunks: query.total_chunks,
        })
        .await?;
    success(json!({ "key": key }))
}

async fn upload_chunk(State(state): State<HoardState>, headers: HeaderMap, body: Body) -> JsonResult {
    let mut form = MultipartForm::parse(&headers, body, state.limits).await?;
    let key = parse_key(form.require_text("key")?)?;
    let index: u32 = form
        .require_text("chunkIndex")?
        .trim()
        .parse()
        .map_err(|_| HoardError::bad_request("chunkIndex must be a non-negative integer"))?;
    let chunk: Bytes = form
        .take_file("chunkFile")
        .map(|f| f.data)
        .ok_or_else(|| HoardError::bad_request("Missing field: chunkFile"))?;

    debug!("Chunk {} for {} ({} bytes)", index, key, chunk.len());
    let ack = state.adapter.upload_chunk(&key, index, chunk).await?;
    success(ack)
}

#[derive(Debug, Deserialize)]
struct KeyQuery {
    key: String,
}

async fn chunk_progress(
    State(state): State<HoardState>,
    query: Result<Query<KeyQuery>, QueryRejection>,
) -> JsonResult {
    let Query(query) = query.map_err(map_query_rejection)?;
    let key = parse_key(&query.key)?;
    let progress = state.adapter.progress(&key).await?;
    success(progress)
}

async fn read_file(
    State(state): State<HoardState>,
    Path(key): Path<String>,
    headers: HeaderMap,
) -> Result<Response, HoardAxumError> {
    let key = parse_key(&key)?;
    let read = state.adapter.get(&key, range_header(&headers)).await?;
    Ok(content(read))
}

async fn read_trashed(
    State(state): State<HoardState>,
    Path(key): Path<String>,
    headers: HeaderMap,
) -> Result<Response, HoardAxumError> {
    let key = parse_key(&key)?;
    let read = state.adapter.get_trashed(&key, range_header(&headers)).await?;
    Ok(content(read))
}

async fn delete_file(State(state): State<HoardState>, Path(key): Path<String>) -> JsonResult {
    let key = parse_key(&key)?;
    if !state.adapter.delete(&key).await? {
        return Err(HoardError::not_found(format!("No record found for {key}")).into());
    }
    success(json!({ "key": key }))
}

async fn delete_trashed(State(state): State<HoardState>, Path(key): Path<String>) -> JsonResult {
    let key = parse_key(&key)?;
    if !state.adapter.delete_trashed(&key).await? {
        return Err(HoardError::not_found(format!("No trashed record found for {key}")).into());
    }
    success(json!({ "key": key }))
}

async fn file_meta(State(state): State<HoardState>, Path(key): Path<String>) -> JsonResult {
    let key = parse_key(&key)?;
    let view = state.adapter.get_metadata(&key).await?;
    success(json!({
        "key": key,
        "metadata": view.metadata,
        "value": view.value,
    }))
}

async fn update_file(
    State(state): State<HoardState>,
    Path(key): Path<String>,
    patch: Result<Json<MetadataPatch>, JsonRejection>,
) -> JsonResult {
    let key = parse_key(&key)?;
    let Json(patch) = patch.map_err(map_json_rejection)?;
    let metadata = state.adapter.update_metadata(&key, patch).await?;
    success(json!({ "key": key, "metadata": metadata }))
}

async fn move_to_trash(State(state): State<HoardState>, Path(key): Path<String>) -> JsonResult {
    let key = parse_key(&key)?;
    state.adapter.move_to_trash(&key).await?;
    success(json!({ "key": key }))
}

async fn restore_from_trash(State(state): State<HoardState>, Path(key): Path<String>) -> JsonResult {
    let key = parse_key(&key)?;
    state.adapter.restore_from_trash(&key).await?;
    success(json!({ "key": key }))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListQuery {
    cursor: Option<String>,
    limit: Option<usize>,
    file_type: Option<String>,
}

async fn list_files(
    State(state): State<HoardState>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> JsonResult {
    let Query(query) = query.map_err(map_query_rejection)?;
    let only = query.file_type.as_deref().map(FileType::from_str).transpose()?;
    let page = state
        .adapter
        .list(
            ListScope::Live(only),
            query.cursor.as_deref(),
            query.limit.unwrap_or(DEFAULT_PAGE_SIZE),
        )
        .await?;
    success(page)
}

async fn list_trash(
    State(state): State<HoardState>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> JsonResult {
    let Query(query) = query.map_err(map_query_rejection)?;
    let page = state
        .adapter
        .list(
            ListScope::Trash,
            query.cursor.as_deref(),
            query.limit.unwrap_or(DEFAULT_PAGE_SIZE),
        )
        .await?;
    success(page)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_are_trimmed_and_empty_ones_dropped() {
        assert_eq!(split_tags(" a, b ,,c "), vec!["a", "b", "c"]);
        assert!(split_tags("").is_empty());
    }
}
