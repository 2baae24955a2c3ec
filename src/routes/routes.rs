//! Defines routes for the photo library.
//!
//! ## Structure
//! - `GET  /` — redirect to `/navigator`
//! - `GET  /navigator` — browse the bucket root (`?get_subdir_content=&show_hidden_content=`)
//! - `GET  /navigator/{*path}` — browse a nested directory
//! - `GET  /thumbnail/{*key}` — cached thumbnail for a source key
//! - `GET  /media/{*key}` — original object
//! - `POST /cache` — ensure thumbnails for a list of keys
//!
//! The wildcard segments allow nested keys like `photos/2025/img.jpg`.

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        navigation_handlers::{
            ensure_cache, get_media, get_thumbnail, index, navigate_path, navigate_root,
        },
    },
    services::navigator::Navigator,
};
use axum::{
    Router,
    routing::{get, post},
};

/// Build the router. Shared state (`Navigator`) is attached by the caller.
pub fn routes() -> Router<Navigator> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/", get(index))
        .route("/navigator", get(navigate_root))
        .route("/navigator/", get(navigate_root))
        .route("/navigator/{*path}", get(navigate_path))
        .route("/thumbnail/{*key}", get(get_thumbnail))
        .route("/media/{*key}", get(get_media))
        .route("/cache", post(ensure_cache))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{
        cache_orchestrator::CacheOrchestrator,
        gateway::ObjectStoreGateway,
        memory_backend::MemoryBackend,
        store::ObjectStoreBackend,
        transcoder::ImageTranscoder,
    };
    use axum::{
        body::{Body, to_bytes},
        http::{Request, StatusCode, header},
    };
    use bytes::Bytes;
    use std::sync::Arc;
    use tower::ServiceExt;

    async fn app() -> (Router, Arc<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::new());
        let gateway = ObjectStoreGateway::new(backend.clone(), 1000);
        let orchestrator = CacheOrchestrator::new(
            gateway.clone(),
            Arc::new(ImageTranscoder::default()),
            "libression-data",
            "libression-cache",
            "cache.jpg",
        );
        let navigator = Navigator::new(
            gateway,
            orchestrator,
            "libression-data",
            "libression-cache",
            "us-east-2",
            2,
        );
        navigator.init_buckets().await.unwrap();
        (routes().with_state(navigator), backend)
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    async fn json(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn root_redirects_to_navigator() {
        let (app, _) = app().await;
        let response = app
            .oneshot(get_request("/"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[header::LOCATION], "/navigator");
    }

    #[tokio::test]
    async fn navigator_lists_nested_path() {
        let (app, backend) = app().await;
        for key in ["a/b/notes.txt", "a/b/c/d.txt", "a/b/.hidden"] {
            backend
                .put_object("libression-data", key, Bytes::from_static(b"x"), None)
                .await
                .unwrap();
        }

        let response = app
            .oneshot(get_request("/navigator/a/b"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json(response).await;
        assert_eq!(body["cur_dir"], "a/b");
        assert_eq!(body["nav_dirs"], serde_json::json!(["a", "a/b/c"]));
        assert_eq!(body["keys"], serde_json::json!(["a/b/notes.txt"]));
        assert_eq!(
            body["cache"]["a/b/notes.txt"]["outcome"],
            "skipped_not_image"
        );
    }

    #[tokio::test]
    async fn media_streams_with_content_type_and_missing_is_404() {
        let (app, backend) = app().await;
        backend
            .put_object(
                "libression-data",
                "clips/a.mov",
                Bytes::from_static(b"movie"),
                Some("video/quicktime"),
            )
            .await
            .unwrap();

        let response = app
            .clone()
            .oneshot(get_request("/media/clips/a.mov"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "video/quicktime");
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"movie");

        let missing = app
            .oneshot(get_request("/thumbnail/clips/a.mov"))
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn cache_endpoint_reports_per_key_outcomes() {
        let (app, backend) = app().await;
        backend
            .put_object(
                "libression-data",
                "doc.pdf",
                Bytes::from_static(b"%PDF"),
                None,
            )
            .await
            .unwrap();

        let request = Request::post("/cache")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"keys":["doc.pdf","gone.png"]}"#))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json(response).await;
        assert_eq!(body["doc.pdf"]["outcome"], "skipped_not_image");
        assert_eq!(body["gone.png"]["outcome"], "failed");
    }

    #[tokio::test]
    async fn readiness_reports_ok_once_buckets_exist() {
        let (app, _) = app().await;
        let response = app
            .oneshot(get_request("/readyz"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json(response).await;
        assert_eq!(body["checks"]["memory"]["ok"], true);
    }
}
