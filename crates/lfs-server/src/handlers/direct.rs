//! Direct download URL listing

use super::RepoPath;
use crate::auth::{authorize, Caller};
use crate::{ApiError, AppState, LfsErrorCode};
use axum::{
    extract::{Path, State},
    response::{IntoResponse, Response},
    Json,
};
use lfs_core::{AccessMode, DirectUrl};
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Serialize)]
pub struct DirectUrls {
    pub objects: Vec<DirectUrl>,
}

/// GET /{owner}/{repo}/info/lfs/objects/direct-urls
pub async fn direct_urls(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(path): Path<RepoPath>,
) -> Result<Response, ApiError> {
    let request_id = caller.request_id.clone();
    list_direct_urls(&state, &caller, &path)
        .await
        .map(|urls| Json(urls).into_response())
        .map_err(|e| e.with_request_id(request_id))
}

async fn list_direct_urls(state: &AppState, caller: &Caller, path: &RepoPath) -> Result<DirectUrls, ApiError> {
    if !state.store.serves_direct() {
        return Err(ApiError::new(
            LfsErrorCode::Forbidden,
            "direct download URLs are disabled",
        ));
    }
    let granted = authorize(state, caller, &path.owner, &path.repo, AccessMode::Read).await?;

    // TODO: page through the rows once the metadata store grows a cursor API.
    let rows = state.meta.list(granted.repository.id).await?;
    let mut objects = Vec::with_capacity(rows.len());
    for row in rows {
        let pointer = row.pointer();
        if !state.store.exists(&pointer).await? {
            warn!(oid = %pointer.oid, repo = granted.repository.id, "owned object missing from storage, skipped");
            continue;
        }
        match state.store.url(&pointer, &pointer.oid).await {
            Ok(Some(url)) => objects.push(DirectUrl {
                oid: pointer.oid,
                size: pointer.size,
                url,
            }),
            Ok(None) => {}
            Err(e) => warn!(oid = %pointer.oid, error = %e, "presigning failed, object skipped"),
        }
    }
    Ok(DirectUrls { objects })
}
