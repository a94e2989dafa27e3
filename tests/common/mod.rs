//! Shared harness: spawns the gateway on an ephemeral port

#![allow(dead_code)]

use axum::{extract::Request, http::HeaderMap, middleware::Next, response::Response};
use lfs_core::{Actor, MemoryDirectory, MemoryMetaStore, NoopHook, Repository, User, MEDIA_TYPE};
use lfs_server::{create_router, AppState, Directory, GatewayConfig};
use lfs_store::{MemoryStore, Pointer};
use reqwest::Client;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tokio::net::TcpListener;

pub const SECRET: &str = "test-secret-123";

/// Header the fake session layer turns into `Actor::User`
pub const USER_HEADER: &str = "x-test-user";
/// Header the fake session layer turns into a CI task actor, `<repo_id>` or `<repo_id>:fork`
pub const TASK_HEADER: &str = "x-test-task";

pub struct Harness {
    pub base: String,
    pub client: Client,
    pub store: MemoryStore,
    pub meta: MemoryMetaStore,
    pub dir: MemoryDirectory,
    pub alice: User,
    pub bob: User,
    /// Private repository owned by alice
    pub models: Repository,
    /// Private repository owned by bob
    pub scratch: Repository,
}

pub fn pointer_for(data: &[u8]) -> Pointer {
    Pointer::new(hex::encode(Sha256::digest(data)), data.len() as i64)
}

/// Actor described by the test headers, if any
fn actor_from_headers(headers: &HeaderMap) -> Option<Actor> {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    if let Some(user) = header(USER_HEADER) {
        return user.parse().ok().map(Actor::user);
    }
    let task = header(TASK_HEADER)?;
    let (repo, fork) = match task.split_once(':') {
        Some((repo, flag)) => (repo, flag == "fork"),
        None => (task, false),
    };
    repo.parse().ok().map(|repository_id| Actor::ServiceTask {
        task_id: 77,
        repository_id,
        is_fork_pull_request: fork,
    })
}

/// Stand-in for the hosting platform's session layer
async fn fake_session(mut request: Request, next: Next) -> Response {
    let actor = actor_from_headers(request.headers());
    if let Some(actor) = actor {
        request.extensions_mut().insert(actor);
    }
    next.run(request).await
}

impl Harness {
    pub async fn spawn() -> Self {
        Self::spawn_with(|_| {}).await
    }

    pub async fn spawn_with(configure: impl FnOnce(&mut GatewayConfig)) -> Self {
        Self::spawn_on(MemoryStore::new(), configure).await
    }

    pub async fn spawn_on(store: MemoryStore, configure: impl FnOnce(&mut GatewayConfig)) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let base = format!("http://{addr}");

        let mut config = GatewayConfig {
            host: "127.0.0.1".to_string(),
            port: addr.port(),
            app_url: format!("{base}/"),
            jwt_secret: Some(SECRET.to_string()),
            rate_limit_rps: 0,
            multipart_chunk_size: 8,
            ..Default::default()
        };
        configure(&mut config);

        let dir = MemoryDirectory::new().with_auto_create(!config.auth_enabled);
        let alice = dir.add_user("alice");
        let bob = dir.add_user("bob");
        let models = dir.add_repository("alice", "models", true);
        let scratch = dir.add_repository("bob", "scratch", true);
        let meta = MemoryMetaStore::new();

        let state = AppState::from_parts(
            config,
            Arc::new(store.clone()),
            Arc::new(meta.clone()),
            Directory::from_memory(dir.clone()),
            Arc::new(NoopHook),
        )
        .unwrap();
        let app = create_router(Arc::new(state)).layer(axum::middleware::from_fn(fake_session));

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base,
            client: Client::new(),
            store,
            meta,
            dir,
            alice,
            bob,
            models,
            scratch,
        }
    }

    pub fn lfs_url(&self, repo: &Repository, rest: &str) -> String {
        format!("{}/{}/{}.git/info/lfs/{}", self.base, repo.owner, repo.name, rest)
    }

    /// POST a batch request as `user` (None = no session)
    pub async fn batch(&self, repo: &Repository, user: Option<&User>, body: Value) -> reqwest::Response {
        let mut request = self
            .client
            .post(self.lfs_url(repo, "objects/batch"))
            .header("Accept", MEDIA_TYPE)
            .header("Content-Type", MEDIA_TYPE)
            .body(body.to_string());
        if let Some(user) = user {
            request = request.header(USER_HEADER, user.id.to_string());
        }
        request.send().await.unwrap()
    }

    pub async fn batch_json(&self, repo: &Repository, user: Option<&User>, body: Value) -> Value {
        let res = self.batch(repo, user, body).await;
        assert_eq!(res.status(), 200, "batch failed");
        res.json().await.unwrap()
    }

    /// Upload `data` to `repo` through the batch flow as `user`
    pub async fn upload(&self, repo: &Repository, user: &User, data: &[u8]) -> Pointer {
        let pointer = pointer_for(data);
        let response = self
            .batch_json(
                repo,
                Some(user),
                json!({"operation": "upload", "objects": [{"oid": pointer.oid, "size": pointer.size}]}),
            )
            .await;
        let actions = &response["objects"][0]["actions"];
        let upload = &actions["upload"];
        let res = self
            .client
            .put(upload["href"].as_str().unwrap())
            .header("Authorization", upload["header"]["Authorization"].as_str().unwrap())
            .body(data.to_vec())
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), 200, "upload failed");
        pointer
    }
}
