//! # LFS Crypto
//!
//! Hashing and token primitives for the LFS object service.
//!
//! This crate provides:
//! - **SHA-256 object ids**: validation and streaming hashing with byte counts
//! - **Capability tokens**: HS256 JWTs scoped to one repository and one operation
//!
//! ## Example
//!
//! ```rust,ignore
//! use lfs_crypto::{hashing, TokenCodec, Operation};
//!
//! let oid = hashing::hash(b"payload").to_hex();
//!
//! let codec = TokenCodec::new(b"secret");
//! let token = codec.issue(repo_id, Operation::Upload, user_id, 300)?;
//! let claims = codec.validate(&token)?;
//! ```

pub mod error;
pub mod hashing;
pub mod token;

pub use error::{CryptoError, Result};
pub use hashing::{is_valid_oid, ContentHash, ObjectHasher, EMPTY_OID};
pub use token::{Claims, Operation, TokenCodec};
