//! Object transfer handlers: range-aware download and direct upload

use super::status_message;
use crate::auth::{authorize, object_accessible, Caller};
use crate::{ApiError, AppState, LfsErrorCode};
use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::Response,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use futures::{StreamExt, TryStreamExt};
use lfs_core::{AccessMode, MetaObject};
use lfs_crypto::{is_valid_oid, ObjectHasher};
use lfs_store::{take_bytes, Pointer, StoreError};
use serde::Deserialize;
use std::io;
use std::sync::Arc;
use tracing::{debug, error, warn};

#[derive(Debug, Deserialize)]
pub struct ObjectPath {
    pub owner: String,
    pub repo: String,
    pub oid: String,
}

/// `{segment}` is a base64url file name on GET and the object size on PUT
#[derive(Debug, Deserialize)]
pub struct ObjectSegmentPath {
    pub owner: String,
    pub repo: String,
    pub oid: String,
    pub segment: String,
}

/// Byte window selected by a `Range` header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

/// Parse the first `bytes=N-M` spec of a `Range` header.
///
/// `Ok(None)` means the header is absent or unparseable and the whole object
/// is served. A start at or beyond `size` is not satisfiable. An end outside
/// `start..size - 1` is clamped to the last byte.
pub fn parse_range(value: Option<&str>, size: u64) -> Result<Option<ByteRange>, ApiError> {
    let Some(spec) = value.and_then(|v| v.split_once("bytes=")).map(|(_, spec)| spec) else {
        return Ok(None);
    };
    let Some((start, rest)) = spec.split_once('-') else {
        return Ok(None);
    };
    let Ok(start) = start.parse::<u64>() else {
        return Ok(None);
    };
    if start >= size {
        return Err(ApiError::new(
            LfsErrorCode::RangeNotSatisfiable,
            format!("range start {start} beyond object size {size}"),
        ));
    }

    let last = size - 1;
    let digits: &str = &rest[..rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len())];
    let end = match digits.parse::<u64>() {
        Ok(end) if end >= start && end < last => end,
        _ => last,
    };
    Ok(Some(ByteRange { start, end }))
}

/// GET /{owner}/{repo}/info/lfs/objects/{oid}
pub async fn download(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(path): Path<ObjectPath>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let request_id = caller.request_id.clone();
    serve_object(&state, &caller, &path.owner, &path.repo, &path.oid, None, &headers)
        .await
        .map_err(|e| e.with_request_id(request_id))
}

/// GET /{owner}/{repo}/info/lfs/objects/{oid}/{filename}
pub async fn download_named(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(path): Path<ObjectSegmentPath>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let request_id = caller.request_id.clone();
    serve_object(
        &state,
        &caller,
        &path.owner,
        &path.repo,
        &path.oid,
        Some(&path.segment),
        &headers,
    )
    .await
    .map_err(|e| e.with_request_id(request_id))
}

fn decode_filename(segment: &str) -> Result<String, ApiError> {
    URL_SAFE_NO_PAD
        .decode(segment)
        .ok()
        .and_then(|raw| String::from_utf8(raw).ok())
        .ok_or_else(|| ApiError::new(LfsErrorCode::BadRequest, "file name is not valid base64url"))
}

async fn serve_object(
    state: &AppState,
    caller: &Caller,
    owner: &str,
    repo: &str,
    oid: &str,
    filename: Option<&str>,
    headers: &HeaderMap,
) -> Result<Response, ApiError> {
    if !is_valid_oid(oid) {
        return Err(ApiError::validation("Oid or size are invalid"));
    }
    let granted = authorize(state, caller, owner, repo, AccessMode::Read).await?;
    let meta = state
        .meta
        .get(granted.repository.id, oid)
        .await?
        .ok_or_else(|| ApiError::not_found("Not Found"))?;
    let pointer = meta.pointer();
    let size = pointer.size_u64();

    let range = parse_range(headers.get(header::RANGE).and_then(|v| v.to_str().ok()), size)?;
    let disposition = filename.map(decode_filename).transpose()?;

    let (status, start, length) = match range {
        Some(r) => (StatusCode::PARTIAL_CONTENT, r.start, r.end + 1 - r.start),
        None => (StatusCode::OK, 0, size),
    };

    let stream = state.store.get(&pointer, start).await?;
    let oid_for_log = pointer.oid.clone();
    let body = take_bytes(stream, length).inspect_err(move |e| {
        error!(oid = %oid_for_log, error = %e, "streaming object to client failed");
    });

    let mut builder = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::CONTENT_LENGTH, length);
    let mut exposed = Vec::new();
    if let Some(r) = range {
        builder = builder.header(
            header::CONTENT_RANGE,
            format!("bytes {}-{}/{}", r.start, r.end, size - r.start),
        );
        exposed.push("Content-Range");
    }
    if let Some(name) = disposition {
        let value = HeaderValue::from_str(&format!("attachment; filename=\"{name}\""))
            .map_err(|_| ApiError::new(LfsErrorCode::BadRequest, "file name is not a valid header value"))?;
        builder = builder.header(header::CONTENT_DISPOSITION, value);
        exposed.push("Content-Disposition");
    }
    if !exposed.is_empty() {
        builder = builder.header(header::ACCESS_CONTROL_EXPOSE_HEADERS, exposed.join(", "));
    }

    debug!(oid = %pointer.oid, start, length, status = status.as_u16(), "serving object");
    builder
        .body(Body::from_stream(body))
        .map_err(|e| ApiError::internal("download", &pointer.relative_path(), e))
}

/// PUT /{owner}/{repo}/info/lfs/objects/{oid}/{size}
pub async fn upload(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(path): Path<ObjectSegmentPath>,
    body: Body,
) -> Result<Response, ApiError> {
    let request_id = caller.request_id.clone();
    receive_object(&state, &caller, path, body)
        .await
        .map_err(|e| e.with_request_id(request_id))
}

async fn receive_object(state: &AppState, caller: &Caller, path: ObjectSegmentPath, body: Body) -> Result<Response, ApiError> {
    let size: i64 = path
        .segment
        .parse()
        .map_err(|e| ApiError::validation(format!("invalid size {:?}: {e}", path.segment)))?;
    let pointer = Pointer::new(path.oid, size);
    if !pointer.is_valid() {
        debug!(oid = %pointer.oid, "upload of invalid pointer");
        return Err(ApiError::validation("Oid or size are invalid"));
    }

    let granted = authorize(state, caller, &path.owner, &path.repo, AccessMode::Write).await?;
    if state.config.exceeds_max_file_size(pointer.size) {
        return Err(ApiError::validation(format!(
            "Size must be less than or equal to {}",
            state.config.max_file_size
        )));
    }

    let repository_id = granted.repository.id;
    let stream = body.into_data_stream().map_err(io::Error::other).boxed();

    // The ownership row is written only once the bytes are settled, so a
    // failed upload never has a row of its own to undo.
    let stored = async {
        if state.store.exists(&pointer).await? {
            if !object_accessible(state, granted.user_id, &pointer).await? {
                // The bytes exist but the caller never had access to them;
                // they have to prove possession by sending them again.
                prove_possession(&pointer, stream).await?;
            }
        } else {
            state.store.put(&pointer, stream).await?;
        }
        let (_, existed) = state.meta.create(MetaObject::new(repository_id, &pointer)).await?;
        Ok::<_, ApiError>(existed)
    }
    .await;

    match stored {
        Ok(existed) => debug!(oid = %pointer.oid, repo = repository_id, existed, "upload accepted"),
        Err(e) => {
            warn!(oid = %pointer.oid, repo = repository_id, error = %e, "upload rejected");
            return Err(e);
        }
    }

    Ok(status_message(StatusCode::OK))
}

/// Hash the request body and compare it with `pointer`
async fn prove_possession(pointer: &Pointer, mut stream: lfs_store::ObjectStream) -> Result<(), ApiError> {
    let mut hasher = ObjectHasher::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(StoreError::from)?;
        hasher.update(&chunk);
        if hasher.bytes_processed() > pointer.size_u64() {
            return Err(StoreError::SizeMismatch {
                expected: pointer.size_u64(),
                actual: hasher.bytes_processed(),
            }
            .into());
        }
    }
    pointer.check(hasher).map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Some("bytes=10-19"), 100, Some((10, 19)))]
    #[case(Some("bytes=10-"), 100, Some((10, 99)))]
    #[case(Some("bytes=0-99"), 100, Some((0, 99)))]
    #[case(Some("bytes=5-2"), 100, Some((5, 99)))]
    #[case(Some("bytes=99-99"), 100, Some((99, 99)))]
    #[case(Some("bytes=0-0,5-9"), 100, Some((0, 0)))]
    #[case(Some("items=1-2"), 100, None)]
    #[case(Some("bytes=-5"), 100, None)]
    #[case(None, 100, None)]
    fn test_parse_range(#[case] header: Option<&str>, #[case] size: u64, #[case] expected: Option<(u64, u64)>) {
        let parsed = parse_range(header, size).unwrap().map(|r| (r.start, r.end));
        assert_eq!(parsed, expected);
    }

    #[test]
    fn test_range_beyond_size() {
        let err = parse_range(Some("bytes=100-"), 100).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert!(parse_range(Some("bytes=0-"), 0).is_err());
    }

    #[test]
    fn test_decode_filename() {
        assert_eq!(decode_filename("bW9kZWwuYmlu").unwrap(), "model.bin");
        assert!(decode_filename("***").is_err());
    }

    #[tokio::test]
    async fn test_prove_possession() {
        let data = b"proof bytes";
        let pointer = Pointer::new(lfs_crypto::hashing::hash(data).to_hex(), data.len() as i64);
        assert!(prove_possession(&pointer, lfs_store::stream_from_bytes(&data[..])).await.is_ok());

        let err = prove_possession(&pointer, lfs_store::stream_from_bytes(&b"other bytes"[..]))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
