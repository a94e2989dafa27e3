//! Authentication and authorization
//!
//! The gate resolves who is calling and whether they may touch a repository
//! at the requested level. A pre-authenticated [`Actor`] placed in the request
//! extensions by the session layer is consulted first; the `Authorization`
//! header is only parsed when that is not enough.

use crate::middleware::RequestId;
use crate::{ApiError, AppState, LfsErrorCode};
use axum::extract::FromRequestParts;
use axum::http::{header, request::Parts};
use lfs_core::{AccessMode, Actor, Repository};
use lfs_store::Pointer;
use std::convert::Infallible;
use tracing::{debug, warn};

/// Caller identity as seen by the handlers
#[derive(Clone, Debug)]
pub struct Caller {
    pub actor: Actor,
    /// Raw `Authorization` header, if any
    pub authorization: Option<String>,
    pub request_id: String,
}

impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let actor = parts.extensions.get::<Actor>().cloned().unwrap_or_default();
        let authorization = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .filter(|h| !h.is_empty())
            .map(str::to_string);
        let request_id = parts
            .extensions
            .get::<RequestId>()
            .map(|id| id.0.clone())
            .unwrap_or_default();
        Ok(Self {
            actor,
            authorization,
            request_id,
        })
    }
}

/// A repository the caller was granted access to
#[derive(Clone, Debug)]
pub struct Authorized {
    pub repository: Repository,
    /// Resolved user, if the caller is one
    pub user_id: Option<i64>,
    /// Granted through the session context rather than a header credential
    pub via_session: bool,
}

/// Strip the `.git` suffix clients append to repository paths
pub fn repo_name(segment: &str) -> &str {
    segment.strip_suffix(".git").unwrap_or(segment)
}

/// Look up `owner/repo` and check the caller holds `mode` on it
pub async fn authorize(
    state: &AppState,
    caller: &Caller,
    owner: &str,
    repo: &str,
    mode: AccessMode,
) -> Result<Authorized, ApiError> {
    let name = repo_name(repo);
    let repository = state
        .directory
        .repositories
        .by_owner_and_name(owner, name)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("repository {owner}/{name} not found")))?;

    if !state.config.auth_enabled {
        debug!(repo = %format!("{owner}/{name}"), "auth disabled, granting development identity");
        return Ok(Authorized {
            repository,
            user_id: caller.actor.user_id(),
            via_session: true,
        });
    }

    let realm = state.config.realm.as_str();

    if let Actor::ServiceTask {
        task_id,
        repository_id,
        is_fork_pull_request,
    } = caller.actor
    {
        if repository_id != repository.id {
            warn!(task_id, repository_id, repo = repository.id, "task token used on another repository");
            return Err(ApiError::unauthenticated(realm));
        }
        let ceiling = if is_fork_pull_request {
            AccessMode::Read
        } else {
            AccessMode::Write
        };
        if mode > ceiling {
            return Err(ApiError::unauthenticated(realm));
        }
        return Ok(Authorized {
            repository,
            user_id: None,
            via_session: true,
        });
    }

    let session_user = caller.actor.user_id();
    let level = state
        .directory
        .permissions
        .access_level(session_user, &repository)
        .await?;
    if level >= mode {
        return Ok(Authorized {
            repository,
            user_id: session_user,
            via_session: true,
        });
    }

    let Some(authorization) = caller.authorization.as_deref() else {
        return Err(ApiError::unauthenticated(realm));
    };
    let user_id = match parse_token(state, authorization, &repository, mode).await {
        Ok(user_id) => user_id,
        Err(e) => {
            warn!(repo = repository.id, error = %e, "authentication failure for provided token");
            return Err(e);
        }
    };

    let active = state
        .directory
        .users
        .user(user_id)
        .await?
        .is_some_and(|user| user.active);
    if !active {
        return Err(ApiError::unauthenticated(realm));
    }
    let level = state
        .directory
        .permissions
        .access_level(Some(user_id), &repository)
        .await?;
    if level < mode {
        return Err(ApiError::unauthenticated(realm));
    }

    Ok(Authorized {
        repository,
        user_id: Some(user_id),
        via_session: false,
    })
}

/// Resolve the user behind an `Authorization` header value
async fn parse_token(
    state: &AppState,
    authorization: &str,
    repository: &Repository,
    mode: AccessMode,
) -> Result<i64, ApiError> {
    let realm = state.config.realm.as_str();
    let Some((scheme, value)) = authorization.split_once(' ') else {
        return Err(ApiError::unauthenticated(realm));
    };

    match scheme.to_ascii_lowercase().as_str() {
        "access_token" => {
            let token = state
                .directory
                .tokens
                .lookup(value)
                .await?
                .ok_or_else(|| ApiError::unauthenticated(realm))?;
            if !token.allows(mode) {
                return Err(ApiError::new(
                    LfsErrorCode::Forbidden,
                    "token scope does not cover this operation",
                ));
            }
            Ok(token.user_id)
        }
        "bearer" | "token" => {
            let codec = state.codec.as_ref().ok_or_else(|| ApiError::unauthenticated(realm))?;
            let claims = codec.validate(value).map_err(|_| ApiError::unauthenticated(realm))?;
            claims
                .permits(repository.id, mode >= AccessMode::Write)
                .map_err(|_| ApiError::unauthenticated(realm))?;
            Ok(claims.user_id)
        }
        _ => Err(ApiError::unauthenticated(realm)),
    }
}

/// Whether any repository the caller can read already holds `pointer`
pub async fn object_accessible(state: &AppState, user_id: Option<i64>, pointer: &Pointer) -> Result<bool, ApiError> {
    for repository_id in state.meta.repositories_with(&pointer.oid).await? {
        let recorded = state.meta.get(repository_id, &pointer.oid).await?;
        if recorded.map_or(true, |row| row.size != pointer.size) {
            continue;
        }
        let Some(repository) = state.directory.repositories.by_id(repository_id).await? else {
            continue;
        };
        let level = state
            .directory
            .permissions
            .access_level(user_id, &repository)
            .await?;
        if level >= AccessMode::Read {
            return Ok(true);
        }
    }
    Ok(false)
}
