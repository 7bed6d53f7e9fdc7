use crate::infra::AppState;
use axum::extract::Path;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Extension, Json, Router};
use caregate::access::{restriction_summary, AccountRole};
use caregate::error::{error_response, ErrorKind};
use caregate::workflows::compliance::{
    compliance_router, AccountRepository, ComplianceService, LockState,
};
use caregate::workflows::verification::{
    verification_router, CaseRepository, InterviewScheduler, VerificationService,
};
use serde_json::json;
use std::sync::Arc;

pub(crate) fn with_platform_routes<R, S, A>(
    verification: Arc<VerificationService<R, S>>,
    compliance: Arc<ComplianceService<A>>,
) -> Router
where
    R: CaseRepository + 'static,
    S: InterviewScheduler + 'static,
    A: AccountRepository + 'static,
{
    verification_router(verification)
        .merge(compliance_router(compliance))
        .route("/health", get(healthcheck))
        .route("/ready", get(readiness_endpoint))
        .route("/metrics", get(metrics_endpoint))
        .route("/api/v1/access/:role/:lock_state", get(access_endpoint))
}

pub(crate) async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub(crate) async fn readiness_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let ready = state.readiness.load(std::sync::atomic::Ordering::Relaxed);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let payload = if ready {
        json!({ "status": "ready" })
    } else {
        json!({ "status": "initializing" })
    };

    (status, Json(payload))
}

pub(crate) async fn metrics_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

/// Restriction table lookup for the account-restrictions screen.
pub(crate) async fn access_endpoint(Path((role, lock_state)): Path<(String, String)>) -> Response {
    let Some(role) = AccountRole::parse(&role) else {
        return error_response(ErrorKind::NotFound, format!("unknown account role '{role}'"));
    };
    let Some(lock_state) = LockState::parse(&lock_state) else {
        return error_response(
            ErrorKind::NotFound,
            format!("unknown lock state '{lock_state}'"),
        );
    };

    (StatusCode::OK, Json(restriction_summary(role, lock_state))).into_response()
}
