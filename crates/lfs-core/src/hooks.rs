//! Post-commit notification
//!
//! Runs after an object has been committed and recorded, e.g. to purge a CDN
//! cache. Hooks run detached from the request and their failures are only
//! logged.

use crate::context::OpContext;
use async_trait::async_trait;
use lfs_store::Pointer;
use std::sync::Arc;
use tracing::Instrument;

#[async_trait]
pub trait CommitHook: Send + Sync {
    async fn object_committed(&self, ctx: &OpContext, repository_id: i64, pointer: &Pointer) -> anyhow::Result<()>;
}

/// Hook that does nothing
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopHook;

#[async_trait]
impl CommitHook for NoopHook {
    async fn object_committed(&self, _ctx: &OpContext, _repository_id: i64, _pointer: &Pointer) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Fire `hook` without waiting for it
pub fn notify_committed(hook: Arc<dyn CommitHook>, ctx: OpContext, repository_id: i64, pointer: Pointer) {
    let span = ctx.span("commit_hook");
    tokio::spawn(
        async move {
            if let Err(e) = hook.object_committed(&ctx, repository_id, &pointer).await {
                tracing::warn!(oid = %pointer.oid, error = %e, "post-commit hook failed");
            }
        }
        .instrument(span),
    );
}
