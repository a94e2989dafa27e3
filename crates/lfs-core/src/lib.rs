//! # LFS Core
//!
//! Protocol and coordination layer of the LFS gateway.
//!
//! This crate provides:
//! - **Protocol types**: batch request/response and multipart action shapes
//! - **Ownership records**: which repository may reference which object
//! - **Access collaborators**: repositories, users, tokens and permissions
//! - **Multipart coordination**: resumable, presigned part uploads
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │           HTTP gateway (server)         │
//! ├─────────────────────────────────────────┤
//! │  Multipart coordinator  │  Meta store   │
//! ├─────────────────────────────────────────┤
//! │        Content store (lfs-store)        │
//! └─────────────────────────────────────────┘
//! ```

pub mod access;
pub mod context;
pub mod error;
pub mod hooks;
pub mod meta;
pub mod multipart;
pub mod protocol;

pub use access::{
    AccessMode, AccessToken, AccessTokenStore, Actor, MemoryDirectory, PermissionResolver, Repository,
    RepositoryStore, User, UserStore,
};
pub use context::OpContext;
pub use error::{CoreError, Result};
pub use hooks::{notify_committed, CommitHook, NoopHook};
pub use meta::{MemoryMetaStore, MetaObject, MetaStore};
pub use multipart::{partition, CommitOutcome, MultipartCoordinator, MultipartPlan, MultipartSettings};
pub use protocol::{
    BatchRequest, BatchResponse, CommitManifest, DirectUrl, Link, MultipartActions, ObjectActions, ObjectError,
    ObjectResponse, PartAction, PartId, MEDIA_TYPE, TRANSFER_BASIC, TRANSFER_MULTIPART,
};
