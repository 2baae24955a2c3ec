//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that checks the store and both buckets

use crate::services::navigator::Navigator;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::collections::HashMap;

/// `GET /healthz`
///
/// Liveness probe. Always 200 and never performs I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// Readiness probe that:
/// 1. Lists buckets through the gateway (store reachable, credentials valid).
/// 2. Confirms the source and cache buckets both exist.
///
/// HTTP 200 when all checks pass, HTTP 503 otherwise.
pub async fn readyz(State(navigator): State<Navigator>) -> impl IntoResponse {
    let gateway = navigator.gateway();
    let (store_check, buckets_check) = match gateway.list_buckets().await {
        Ok(buckets) => {
            let missing: Vec<&str> = navigator
                .bucket_names()
                .into_iter()
                .filter(|name| !buckets.iter().any(|b| b.as_str() == *name))
                .collect();
            let buckets_check = if missing.is_empty() {
                CheckStatus::ok()
            } else {
                CheckStatus::failed(format!("missing buckets: {}", missing.join(", ")))
            };
            (CheckStatus::ok(), buckets_check)
        }
        Err(e) => (
            CheckStatus::failed(format!("error: {}", e)),
            CheckStatus::failed("store unreachable".into()),
        ),
    };

    let overall_ok = store_check.ok && buckets_check.ok;
    let mut checks = HashMap::new();
    checks.insert(gateway.backend_name(), store_check);
    checks.insert("buckets", buckets_check);

    let body = ReadyResponse {
        status: if overall_ok { "ok" } else { "error" }.into(),
        checks,
    };
    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}

impl CheckStatus {
    fn ok() -> Self {
        Self {
            ok: true,
            error: None,
        }
    }

    fn failed(error: String) -> Self {
        Self {
            ok: false,
            error: Some(error),
        }
    }
}
