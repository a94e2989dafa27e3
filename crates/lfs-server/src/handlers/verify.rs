//! Verification handlers for single-shot and multipart uploads

use super::{status_message, RepoPath};
use crate::auth::{authorize, object_accessible, Caller};
use crate::{ApiError, AppState};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Response,
};
use bytes::Bytes;
use lfs_core::{AccessMode, CommitManifest, CoreError, OpContext};
use lfs_store::{Pointer, StoreError};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info, warn};

/// POST /{owner}/{repo}/info/lfs/verify
pub async fn verify(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(path): Path<RepoPath>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let request_id = caller.request_id.clone();
    verify_object(&state, &caller, &path, &body)
        .await
        .map_err(|e| e.with_request_id(request_id))
}

async fn verify_object(state: &AppState, caller: &Caller, path: &RepoPath, body: &[u8]) -> Result<Response, ApiError> {
    let pointer: Pointer =
        serde_json::from_slice(body).map_err(|e| ApiError::validation(format!("invalid verify request: {e}")))?;
    if !pointer.is_valid() {
        return Err(ApiError::validation("Oid or size are invalid"));
    }

    let granted = authorize(state, caller, &path.owner, &path.repo, AccessMode::Write).await?;
    let meta = state
        .meta
        .get(granted.repository.id, &pointer.oid)
        .await?
        .ok_or_else(|| ApiError::not_found("Not Found"))?;

    let recorded = meta.pointer();
    match state.store.verify(&recorded).await {
        Ok(true) => Ok(status_message(StatusCode::OK)),
        Ok(false) => {
            warn!(oid = %recorded.oid, size = recorded.size, "stored object failed verification");
            Ok(status_message(StatusCode::NOT_FOUND))
        }
        Err(e) => {
            error!(oid = %recorded.oid, key = %recorded.relative_path(), error = %e, "verifying object failed");
            Ok(status_message(StatusCode::INTERNAL_SERVER_ERROR))
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct MultipartVerifyQuery {
    #[serde(default)]
    pub oid: String,
    #[serde(default)]
    pub size: String,
}

/// POST /{owner}/{repo}/info/lfs/multipart-verify?oid=..&size=..
pub async fn multipart_verify(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(path): Path<RepoPath>,
    Query(query): Query<MultipartVerifyQuery>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let request_id = caller.request_id.clone();
    commit_object(&state, &caller, &path, query, &body)
        .await
        .map_err(|e| e.with_request_id(request_id))
}

async fn commit_object(
    state: &AppState,
    caller: &Caller,
    path: &RepoPath,
    query: MultipartVerifyQuery,
    body: &[u8],
) -> Result<Response, ApiError> {
    let size: i64 = query.size.parse().map_err(|_| {
        warn!(size = %query.size, "unable to parse object size from query");
        ApiError::validation("invalid object size")
    })?;
    let pointer = Pointer::new(query.oid, size);
    if !pointer.is_valid() {
        return Err(ApiError::validation("Oid or size are invalid"));
    }
    let manifest: CommitManifest =
        serde_json::from_slice(body).map_err(|e| ApiError::validation(format!("invalid part manifest: {e}")))?;

    let granted = authorize(state, caller, &path.owner, &path.repo, AccessMode::Write).await?;

    // A backend that no longer knows the upload id reports the commit as
    // already done. That only stands when the caller could read the stored
    // bytes anyway; otherwise possession has to be proven by a basic upload.
    if pointer.size > 0
        && state.store.exists(&pointer).await?
        && !object_accessible(state, granted.user_id, &pointer).await?
    {
        warn!(
            oid = %pointer.oid,
            repo = granted.repository.id,
            upload_id = %manifest.upload_id,
            "multipart commit for an object stored elsewhere refused"
        );
        return Ok(status_message(StatusCode::NOT_FOUND));
    }

    let ctx = OpContext::new(caller.request_id.clone())
        .with_attr("repo", format!("{}/{}", path.owner, granted.repository.name))
        .with_attr("oid", &pointer.oid)
        .with_attr("upload_id", &manifest.upload_id);

    match state
        .coordinator
        .commit_and_verify(&ctx, granted.repository.id, &pointer, &manifest)
        .await
    {
        Ok(true) => {
            info!(oid = %pointer.oid, size = pointer.size, upload_id = %manifest.upload_id, "multipart upload committed");
            Ok(status_message(StatusCode::OK))
        }
        Ok(false) => Ok(status_message(StatusCode::NOT_FOUND)),
        Err(e @ (CoreError::Validation(_) | CoreError::NotSupported(_))) => Err(e.into()),
        Err(CoreError::Store(StoreError::NotFound(_) | StoreError::NoSuchUpload(_))) => {
            Ok(status_message(StatusCode::NOT_FOUND))
        }
        Err(e) => Err(ApiError::internal("multipart.commit", &pointer.relative_path(), e)),
    }
}
