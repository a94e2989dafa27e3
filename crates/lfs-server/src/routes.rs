//! HTTP route definitions

use crate::{handlers, middleware, AppState};
use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderName, HeaderValue},
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

const LFS: &str = "/{owner}/{repo}/info/lfs";

/// Create the main router
pub fn create_router(state: Arc<AppState>) -> Router {
    // Protocol endpoints insist on the LFS media type.
    let protocol = Router::new()
        .route(&format!("{LFS}/objects/batch"), post(handlers::batch))
        .route(&format!("{LFS}/verify"), post(handlers::verify))
        .route(&format!("{LFS}/multipart-verify"), post(handlers::multipart_verify))
        .route_layer(axum_middleware::from_fn(middleware::accept_media_type_middleware));

    let transfer = Router::new()
        .route(&format!("{LFS}/objects/direct-urls"), get(handlers::direct_urls))
        .route(&format!("{LFS}/objects/{{oid}}"), get(handlers::download))
        .route(
            &format!("{LFS}/objects/{{oid}}/{{segment}}"),
            get(handlers::download_named).put(handlers::upload),
        );

    let mut router = Router::new()
        .route("/", get(handlers::health_check))
        .merge(protocol)
        .merge(transfer)
        .layer(DefaultBodyLimit::max(state.config.max_body_size))
        .layer(axum_middleware::from_fn(middleware::logging_middleware));

    if let Some(limiter) = middleware::create_rate_limiter(state.config.rate_limit_rps) {
        router = router.layer(axum_middleware::from_fn_with_state(
            limiter,
            middleware::rate_limit_middleware,
        ));
    }

    router = router.layer(axum_middleware::from_fn(middleware::request_id_middleware));

    if state.config.cors_enabled {
        router = router.layer(cors_layer(&state.config.cors_origins));
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.is_empty() || origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(origins.iter().filter_map(|o| HeaderValue::from_str(o).ok()))
    };
    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([
            header::CONTENT_RANGE,
            header::CONTENT_DISPOSITION,
            HeaderName::from_static(middleware::REQUEST_ID_HEADER),
        ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Directory, GatewayConfig};
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use lfs_core::{MemoryDirectory, MemoryMetaStore, NoopHook, MEDIA_TYPE};
    use lfs_store::MemoryStore;
    use tower::ServiceExt;

    fn router(configure: impl FnOnce(&mut GatewayConfig)) -> Router {
        let mut config = GatewayConfig {
            auth_enabled: false,
            ..Default::default()
        };
        configure(&mut config);
        let state = AppState::from_parts(
            config,
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryMetaStore::new()),
            Directory::from_memory(MemoryDirectory::new().with_auto_create(true)),
            Arc::new(NoopHook),
        )
        .unwrap();
        create_router(Arc::new(state))
    }

    fn batch(accept: &str) -> Request<Body> {
        Request::post("/org/repo.git/info/lfs/objects/batch")
            .header(header::ACCEPT, accept)
            .body(Body::from(r#"{"operation":"download","objects":[]}"#))
            .unwrap()
    }

    #[tokio::test]
    async fn test_media_type_only_on_protocol_routes() {
        let app = router(|_| {});

        let res = app.clone().oneshot(batch("text/html")).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);

        let res = app.clone().oneshot(batch(MEDIA_TYPE)).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        let oid = "ab".repeat(32);
        let res = app
            .oneshot(
                Request::get(format!("/org/repo.git/info/lfs/objects/{oid}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_rate_limit_applies() {
        let app = router(|config| config.rate_limit_rps = 1);

        let res = app.clone().oneshot(batch(MEDIA_TYPE)).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let res = app.oneshot(batch(MEDIA_TYPE)).await.unwrap();
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(res.headers().contains_key(crate::middleware::REQUEST_ID_HEADER));
    }

    #[tokio::test]
    async fn test_cors_preflight() {
        let app = router(|_| {});
        let res = app
            .oneshot(
                Request::options("/org/repo.git/info/lfs/objects/batch")
                    .header(header::ORIGIN, "https://git.example.com")
                    .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    }

    #[tokio::test]
    async fn test_cors_exposes_transfer_headers() {
        let app = router(|_| {});
        let res = app
            .oneshot(
                Request::get("/")
                    .header(header::ORIGIN, "https://git.example.com")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let exposed = res.headers()[header::ACCESS_CONTROL_EXPOSE_HEADERS]
            .to_str()
            .unwrap()
            .to_ascii_lowercase();
        for name in ["content-range", "content-disposition", "x-request-id"] {
            assert!(exposed.contains(name), "{name} not exposed in {exposed}");
        }
    }
}
