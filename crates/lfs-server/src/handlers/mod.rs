//! LFS request handlers

pub mod batch;
pub mod direct;
pub mod service;
pub mod transfer;
pub mod verify;

pub use batch::*;
pub use direct::*;
pub use service::*;
pub use transfer::*;
pub use verify::*;

use crate::ApiError;
use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use lfs_core::MEDIA_TYPE;
use serde::{Deserialize, Serialize};

/// Path of every repository-scoped route
#[derive(Debug, Deserialize)]
pub struct RepoPath {
    pub owner: String,
    pub repo: String,
}

/// Serialize `body` as an LFS JSON response
pub(crate) fn lfs_json<T: Serialize>(status: StatusCode, body: &T) -> Result<Response, ApiError> {
    let json = serde_json::to_vec(body).map_err(|e| ApiError::internal("encode", "-", e))?;
    Ok((status, [(header::CONTENT_TYPE, MEDIA_TYPE)], json).into_response())
}

/// A bare status with its reason phrase as the message
pub(crate) fn status_message(status: StatusCode) -> Response {
    let body = serde_json::json!({ "message": status.canonical_reason().unwrap_or_default() });
    (status, [(header::CONTENT_TYPE, MEDIA_TYPE)], body.to_string()).into_response()
}
