//! Error types and LFS error codes

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use lfs_core::{CoreError, MEDIA_TYPE};
use lfs_crypto::CryptoError;
use lfs_store::StoreError;
use serde::Serialize;
use thiserror::Error;

/// Error classes returned by the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LfsErrorCode {
    BadRequest,
    Unauthenticated,
    Forbidden,
    NotFound,
    UnsupportedMediaType,
    RangeNotSatisfiable,
    ValidationFailed,
    SlowDown,
    InternalError,
}

impl LfsErrorCode {
    /// Get the error code string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BadRequest => "bad_request",
            Self::Unauthenticated => "unauthenticated",
            Self::Forbidden => "forbidden",
            Self::NotFound => "not_found",
            Self::UnsupportedMediaType => "unsupported_media_type",
            Self::RangeNotSatisfiable => "range_not_satisfiable",
            Self::ValidationFailed => "validation_failed",
            Self::SlowDown => "slow_down",
            Self::InternalError => "internal_error",
        }
    }

    /// Get the HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest => StatusCode::BAD_REQUEST,
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::RangeNotSatisfiable => StatusCode::RANGE_NOT_SATISFIABLE,
            Self::ValidationFailed => StatusCode::UNPROCESSABLE_ENTITY,
            Self::SlowDown => StatusCode::TOO_MANY_REQUESTS,
            Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

const INTERNAL_MESSAGE: &str = "internal server error";

/// API error type
#[derive(Error, Debug)]
#[error("{} - {message}", code.as_str())]
pub struct ApiError {
    pub code: LfsErrorCode,
    pub message: String,
    pub request_id: Option<String>,
    /// Realm for the `WWW-Authenticate` challenge on 401
    pub realm: Option<String>,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_id: Option<&'a str>,
}

impl ApiError {
    pub fn new(code: LfsErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            request_id: None,
            realm: None,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(LfsErrorCode::NotFound, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(LfsErrorCode::ValidationFailed, message)
    }

    /// A 401 carrying a Basic challenge for `realm`
    pub fn unauthenticated(realm: &str) -> Self {
        Self {
            realm: Some(realm.to_string()),
            ..Self::new(LfsErrorCode::Unauthenticated, "credentials needed")
        }
    }

    /// Log `error` with its operation and key and hide it from the client
    pub fn internal(operation: &str, key: &str, error: impl std::fmt::Display) -> Self {
        tracing::error!(operation, key, error = %error, "request failed");
        Self::new(LfsErrorCode::InternalError, INTERNAL_MESSAGE)
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn status_code(&self) -> StatusCode {
        self.code.status_code()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(key) => Self::not_found(format!("object {key} not found")),
            StoreError::NoSuchUpload(id) => Self::not_found(format!("upload {id} not found")),
            e if e.is_integrity() => Self::validation(e.to_string()),
            StoreError::Backend {
                ref operation,
                ref key,
                ..
            } => Self::internal(operation, key, &e),
            e => Self::internal("store", "-", e),
        }
    }
}

impl From<CoreError> for ApiError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::Validation(message) => Self::validation(message),
            CoreError::NotSupported(message) => Self::new(LfsErrorCode::BadRequest, message),
            CoreError::Store(e) => e.into(),
        }
    }
}

impl From<CryptoError> for ApiError {
    fn from(e: CryptoError) -> Self {
        Self::internal("token", "-", e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            message: &self.message,
            request_id: self.request_id.as_deref(),
        };
        let json = serde_json::to_vec(&body).unwrap_or_default();

        let mut response = (self.status_code(), [(header::CONTENT_TYPE, MEDIA_TYPE)], json).into_response();
        if let Some(realm) = self.realm.as_deref().filter(|_| self.code == LfsErrorCode::Unauthenticated) {
            if let Ok(value) = HeaderValue::from_str(&format!("Basic realm=\"{realm}\"")) {
                response.headers_mut().insert(header::WWW_AUTHENTICATE, value);
            }
        }
        response
    }
}
