//! HTTP handlers.
//!
//! Policy writes commit through `PolicyStore` and then reconcile right
//! away through the shared `Reconciler`.

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use kubeflux_autoscale::ReconcileReport;
use kubeflux_state::{FactorMatrix, Mode, PolicyError, PolicyUpdate, RawFactorMatrix};

use crate::ApiState;

/// Response wrapper for consistent error and acknowledgement bodies.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

/// Body of `PUT /policy`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyRequest {
    pub mode: String,
    #[serde(default)]
    pub factor_matrix: Option<RawFactorMatrix>,
}

impl PolicyRequest {
    fn into_update(self) -> Result<PolicyUpdate, PolicyError> {
        let mode: Mode = self.mode.parse()?;
        let update = PolicyUpdate::mode(mode);
        match self.factor_matrix {
            Some(raw) => Ok(update.with_matrix(FactorMatrix::try_from(raw)?)),
            None => Ok(update),
        }
    }
}

/// Body returned when the policy was committed but the reconcile it
/// triggered had failures.
#[derive(Debug, Serialize)]
pub struct ReconcileFailure {
    pub policy_committed: bool,
    pub report: ReconcileReport,
}

// ── Policy ─────────────────────────────────────────────────────

/// GET /policy
pub async fn get_policy(State(state): State<ApiState>) -> impl IntoResponse {
    Json(state.store.snapshot().await)
}

/// PUT /policy
pub async fn put_policy(
    State(state): State<ApiState>,
    payload: Result<Json<PolicyRequest>, JsonRejection>,
) -> impl IntoResponse {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            warn!(error = %rejection.body_text(), "rejected policy body");
            return error_response(&rejection.body_text(), StatusCode::BAD_REQUEST).into_response();
        }
    };

    match request.into_update() {
        Ok(update) => commit_and_reconcile(&state, update).await,
        Err(e) => {
            warn!(error = %e, "rejected policy");
            error_response(&e.to_string(), StatusCode::BAD_REQUEST).into_response()
        }
    }
}

/// PUT /factor
pub async fn put_factor(
    State(state): State<ApiState>,
    payload: Result<Json<RawFactorMatrix>, JsonRejection>,
) -> impl IntoResponse {
    let raw = match payload {
        Ok(Json(raw)) => raw,
        Err(rejection) => {
            warn!(error = %rejection.body_text(), "rejected factor matrix body");
            return error_response(&rejection.body_text(), StatusCode::BAD_REQUEST).into_response();
        }
    };

    match FactorMatrix::try_from(raw) {
        Ok(matrix) => commit_and_reconcile(&state, PolicyUpdate::matrix(matrix)).await,
        Err(e) => {
            warn!(error = %e, "rejected factor matrix");
            error_response(&e.to_string(), StatusCode::BAD_REQUEST).into_response()
        }
    }
}

/// OPTIONS preflight.
pub async fn preflight() -> StatusCode {
    StatusCode::OK
}

/// Commit `update`, then reconcile on a spawned task that outlives the
/// request.
async fn commit_and_reconcile(state: &ApiState, update: PolicyUpdate) -> axum::response::Response {
    match state.store.apply(update).await {
        Ok(policy) => info!(mode = %policy.mode, "policy committed"),
        Err(e) => {
            error!(error = %e, "policy commit failed");
            return error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
                .into_response();
        }
    }

    let reconciler = state.reconciler.clone();
    let report = match tokio::spawn(async move { reconciler.reconcile_now().await }).await {
        Ok(report) => report,
        Err(e) => {
            error!(error = %e, "reconcile task failed");
            return error_response("reconcile task failed", StatusCode::INTERNAL_SERVER_ERROR)
                .into_response();
        }
    };

    if report.has_failures() {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ReconcileFailure {
                policy_committed: true,
                report,
            }),
        )
            .into_response();
    }

    StatusCode::NO_CONTENT.into_response()
}

// ── Control ────────────────────────────────────────────────────

/// GET /status
pub async fn get_status(State(state): State<ApiState>) -> impl IntoResponse {
    Json(state.reconciler.status().await)
}

/// POST /reconcile
pub async fn trigger_reconcile(State(state): State<ApiState>) -> impl IntoResponse {
    state.control.trigger();
    (StatusCode::ACCEPTED, ApiResponse::ok("reconcile scheduled"))
}

/// GET /healthz
pub async fn healthz() -> &'static str {
    "ok"
}

// ── Prometheus ─────────────────────────────────────────────────

/// GET /metrics
pub async fn prometheus_metrics(State(state): State<ApiState>) -> impl IntoResponse {
    let status = state.reconciler.status().await;
    let policy = state.store.snapshot().await;

    let body = kubeflux_metrics::render_prometheus(status.usage.as_ref(), &policy);
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}
