//! # LFS Gateway
//!
//! HTTP front end of the content-addressed large object store.
//!
//! This crate provides:
//! - **Batch API**: per-object upload/download negotiation, basic or multipart
//! - **Transfers**: range-aware downloads, verified uploads, verify endpoints
//! - **Authorization**: session actors, access tokens and capability tokens
//! - **Rate Limiting**: per-caller request throttling
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                   LFS Clients                       │
//! └─────────────────────────┬───────────────────────────┘
//!                           │
//! ┌─────────────────────────▼───────────────────────────┐
//! │                    LFS Gateway                      │
//! ├─────────────────────────────────────────────────────┤
//! │  Request ID │ Rate Limiter │ Media Type │ Auth Gate │
//! ├─────────────────────────────────────────────────────┤
//! │   Batch │ Download │ Upload │ Verify │ Direct URLs  │
//! ├─────────────────────────────────────────────────────┤
//! │                     lfs-core                        │
//! │      (multipart coordinator, ownership rows)        │
//! ├─────────────────────────────────────────────────────┤
//! │                     lfs-store                       │
//! │           (memory, local, minio, s3)                │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod links;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod state;

pub use config::GatewayConfig;
pub use error::{ApiError, LfsErrorCode};
pub use routes::create_router;
pub use server::{run_server, run_server_with_shutdown, shutdown_signal};
pub use state::{AppState, Directory};
