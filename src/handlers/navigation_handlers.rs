//! HTTP handlers for browsing the library.
//! Object bodies are streamed straight from the store; listing and cache
//! semantics live in `Navigator`.

use crate::{
    errors::AppError,
    models::{
        cache::CacheOutcome,
        listing::{ListingOptions, ObjectBody},
    },
    services::navigator::{NavigationView, Navigator},
};
use axum::{
    Json,
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Redirect, Response},
};
use serde::Deserialize;
use std::collections::BTreeMap;

/// Query params accepted by the navigator routes.
#[derive(Debug, Default, Deserialize)]
pub struct NavigationQuery {
    #[serde(default)]
    pub get_subdir_content: bool,
    #[serde(default)]
    pub show_hidden_content: bool,
}

impl From<&NavigationQuery> for ListingOptions {
    fn from(q: &NavigationQuery) -> Self {
        ListingOptions {
            recursive: q.get_subdir_content,
            include_hidden: q.show_hidden_content,
        }
    }
}

/// Body of `POST /cache`.
#[derive(Debug, Deserialize)]
pub struct EnsureCacheReq {
    pub keys: Vec<String>,
    #[serde(default)]
    pub overwrite: bool,
}

/// `GET /` — send browsers to the navigator root.
pub async fn index() -> Redirect {
    Redirect::to("/navigator")
}

/// `GET /navigator` — browse the root of the source bucket.
pub async fn navigate_root(
    State(navigator): State<Navigator>,
    Query(q): Query<NavigationQuery>,
) -> Result<Json<NavigationView>, AppError> {
    let view = navigator.navigate("", (&q).into()).await?;
    Ok(Json(view))
}

/// `GET /navigator/{*path}` — browse a nested directory.
pub async fn navigate_path(
    State(navigator): State<Navigator>,
    Path(path): Path<String>,
    Query(q): Query<NavigationQuery>,
) -> Result<Json<NavigationView>, AppError> {
    let view = navigator.navigate(&path, (&q).into()).await?;
    Ok(Json(view))
}

/// `GET /thumbnail/{*key}` — the cached thumbnail for a source key.
pub async fn get_thumbnail(
    State(navigator): State<Navigator>,
    Path(key): Path<String>,
) -> Result<Response, AppError> {
    let body = navigator.thumbnail(&key).await?;
    Ok(stream_response(body))
}

/// `GET /media/{*key}` — the original object with its stored content type.
pub async fn get_media(
    State(navigator): State<Navigator>,
    Path(key): Path<String>,
) -> Result<Response, AppError> {
    let body = navigator.media(&key).await?;
    Ok(stream_response(body))
}

/// `POST /cache` — ensure thumbnails for a set of keys.
pub async fn ensure_cache(
    State(navigator): State<Navigator>,
    Json(req): Json<EnsureCacheReq>,
) -> Result<Json<BTreeMap<String, CacheOutcome>>, AppError> {
    if req.keys.is_empty() {
        return Err(AppError::new(StatusCode::BAD_REQUEST, "no keys given"));
    }
    let outcomes = navigator.ensure(req.keys, req.overwrite).await?;
    Ok(Json(outcomes))
}

fn stream_response(body: ObjectBody) -> Response {
    let content_type = body
        .content_type
        .clone()
        .unwrap_or_else(|| "application/octet-stream".into());
    let content_length = body.content_length;

    let mut response = Response::new(Body::from_stream(body.stream));
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    if let Some(length) = content_length {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    }
    response.into_response()
}
