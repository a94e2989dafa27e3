//! Batch negotiation
//!
//! Each object of a batch request is judged on its own; the response lists
//! one entry per requested object in request order. Only a malformed request,
//! a failed authorization or a backend failure fails the whole batch.

use super::{lfs_json, RepoPath};
use crate::auth::{authorize, repo_name, Authorized, Caller};
use crate::links::{auth_header, LinkBuilder};
use crate::{ApiError, AppState, LfsErrorCode};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Response,
};
use bytes::Bytes;
use lfs_core::{
    AccessMode, BatchRequest, BatchResponse, Link, MultipartActions, ObjectActions, ObjectError, ObjectResponse,
    OpContext, MEDIA_TYPE, TRANSFER_BASIC, TRANSFER_MULTIPART,
};
use lfs_crypto::Operation;
use lfs_store::Pointer;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// POST /{owner}/{repo}/info/lfs/objects/batch
pub async fn batch(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(path): Path<RepoPath>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let request_id = caller.request_id.clone();
    async {
        let response = negotiate(&state, &caller, &path, &body).await?;
        lfs_json(StatusCode::OK, &response)
    }
    .await
    .map_err(|e| e.with_request_id(request_id))
}

/// Everything an object decision needs from the surrounding request
struct BatchScope<'a> {
    state: &'a AppState,
    granted: Authorized,
    links: LinkBuilder,
    header: BTreeMap<String, String>,
    multipart: bool,
    ctx: OpContext,
}

async fn negotiate(state: &AppState, caller: &Caller, path: &RepoPath, body: &[u8]) -> Result<BatchResponse, ApiError> {
    let request: BatchRequest =
        serde_json::from_slice(body).map_err(|e| ApiError::validation(format!("invalid batch request: {e}")))?;

    let operation = match request.operation.as_str() {
        "upload" => Operation::Upload,
        "download" => Operation::Download,
        other => {
            debug!(operation = other, "batch with invalid operation");
            return Err(ApiError::new(
                LfsErrorCode::BadRequest,
                format!("unknown operation {other:?}"),
            ));
        }
    };
    let mode = match operation {
        Operation::Upload => AccessMode::Write,
        Operation::Download => AccessMode::Read,
    };

    let granted = authorize(state, caller, &path.owner, &path.repo, mode).await?;
    let name = repo_name(&path.repo);
    let multipart = request.transfers.contains(TRANSFER_MULTIPART) && state.coordinator.is_available();
    let header = action_header(state, caller, &granted, operation)?;

    let scope = BatchScope {
        state,
        links: LinkBuilder::new(&state.config.base_url(), &path.owner, name),
        header,
        multipart,
        ctx: OpContext::new(caller.request_id.clone())
            .with_attr("repo", format!("{}/{}", path.owner, name))
            .with_attr("operation", operation),
        granted,
    };

    debug!(
        repo = %format!("{}/{}", path.owner, name),
        operation = %operation,
        objects = request.objects.len(),
        multipart,
        "batch request"
    );

    let mut objects = Vec::with_capacity(request.objects.len());
    for pointer in request.objects {
        let response = match operation {
            Operation::Upload => scope.upload(pointer).await?,
            Operation::Download => scope.download(pointer).await?,
        };
        objects.push(response);
    }

    Ok(BatchResponse {
        transfer: if multipart { TRANSFER_MULTIPART } else { TRANSFER_BASIC }.to_string(),
        objects,
    })
}

/// Headers the client must send when following the returned actions
fn action_header(
    state: &AppState,
    caller: &Caller,
    granted: &Authorized,
    operation: Operation,
) -> Result<BTreeMap<String, String>, ApiError> {
    if let Some(authorization) = caller.authorization.as_deref() {
        return Ok(auth_header(Some(authorization)));
    }
    match (granted.user_id, state.codec.as_ref()) {
        (Some(user_id), Some(codec)) => {
            let token = codec.issue(granted.repository.id, operation, user_id, state.config.token_ttl_secs)?;
            Ok(auth_header(Some(&format!("Bearer {token}"))))
        }
        _ => Ok(BTreeMap::new()),
    }
}

impl BatchScope<'_> {
    fn repository_id(&self) -> i64 {
        self.granted.repository.id
    }

    /// Checks shared by both operations; `Err` carries the per-object error
    async fn inspect(&self, pointer: &Pointer) -> Result<Result<(bool, bool), ObjectError>, ApiError> {
        if !pointer.is_valid() {
            return Ok(Err(ObjectError::new(422, "Oid or size are invalid")));
        }

        let exists = self.state.store.exists(pointer).await?;
        let meta = self.state.meta.get(self.repository_id(), &pointer.oid).await?;
        if let Some(meta) = &meta {
            if meta.size != pointer.size {
                return Ok(Err(ObjectError::new(
                    422,
                    format!("Object {} is not {} bytes", pointer.oid, pointer.size),
                )));
            }
        }
        Ok(Ok((exists, meta.is_some())))
    }

    async fn upload(&self, pointer: Pointer) -> Result<ObjectResponse, ApiError> {
        let (exists, owned) = match self.inspect(&pointer).await? {
            Ok(found) => found,
            Err(error) => return Ok(ObjectResponse::with_error(pointer, error)),
        };

        if exists && owned {
            return Ok(ObjectResponse::new(pointer));
        }
        if !exists && self.state.config.exceeds_max_file_size(pointer.size) {
            let error = ObjectError::new(
                422,
                format!("Size must be less than or equal to {}", self.state.config.max_file_size),
            );
            return Ok(ObjectResponse::with_error(pointer, error));
        }

        // Existing but unowned objects go through the single-shot upload,
        // where the bytes are checked before ownership is granted.
        if self.multipart && !exists {
            return self.multipart_upload(pointer).await;
        }

        let actions = BTreeMap::from([
            (
                "upload".to_string(),
                Link {
                    href: self.links.upload(&pointer),
                    header: self.header.clone(),
                    ..Link::default()
                },
            ),
            (
                "verify".to_string(),
                Link {
                    href: self.links.verify(),
                    header: self.verify_header(),
                    ..Link::default()
                },
            ),
        ]);
        Ok(ObjectResponse::with_actions(pointer, ObjectActions::Basic(actions)))
    }

    async fn multipart_upload(&self, pointer: Pointer) -> Result<ObjectResponse, ApiError> {
        let ctx = self.ctx.clone().with_attr("oid", &pointer.oid);
        let plan = self.state.coordinator.plan(&ctx, &pointer).await?;
        let verify = plan.verify_endpoint(self.links.multipart_verify(&pointer), self.verify_header());

        let actions = MultipartActions {
            parts: plan.parts,
            verify: Some(verify),
            ..MultipartActions::default()
        };
        Ok(ObjectResponse::with_actions(pointer, ObjectActions::Multipart(actions)))
    }

    async fn download(&self, pointer: Pointer) -> Result<ObjectResponse, ApiError> {
        let (exists, owned) = match self.inspect(&pointer).await? {
            Ok(found) => found,
            Err(error) => return Ok(ObjectResponse::with_error(pointer, error)),
        };
        if !exists || !owned {
            return Ok(ObjectResponse::with_error(pointer, ObjectError::new(404, "Not Found")));
        }

        let link = self.download_link(&pointer).await;
        let actions = if self.multipart {
            ObjectActions::Multipart(MultipartActions {
                download: Some(link),
                ..MultipartActions::default()
            })
        } else {
            ObjectActions::Basic(BTreeMap::from([("download".to_string(), link)]))
        };
        Ok(ObjectResponse::with_actions(pointer, actions))
    }

    /// Presigned backend URL when available, otherwise the proxied endpoint
    async fn download_link(&self, pointer: &Pointer) -> Link {
        if self.state.store.serves_direct() {
            match self.state.store.url(pointer, &pointer.oid).await {
                // A presigned URL carries its own credentials.
                Ok(Some(href)) => return Link { href, ..Link::default() },
                Ok(None) => {}
                Err(e) => warn!(oid = %pointer.oid, error = %e, "presigning download failed, using proxied link"),
            }
        }
        Link {
            href: self.links.download(pointer),
            header: self.header.clone(),
            ..Link::default()
        }
    }

    fn verify_header(&self) -> BTreeMap<String, String> {
        let mut header = self.header.clone();
        header.insert("Accept".to_string(), MEDIA_TYPE.to_string());
        header
    }
}
