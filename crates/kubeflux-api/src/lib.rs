//! kubeflux-api — HTTP control surface for kube-flux.
//!
//! # Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/policy` | Current mode and factor matrix |
//! | PUT | `/policy` | Set mode (and optionally the matrix), then reconcile |
//! | PUT | `/factor` | Replace the factor matrix, then reconcile |
//! | OPTIONS | `/policy`, `/factor`, `/reconcile` | CORS preflight |
//! | GET | `/status` | Usage and report of the latest pass |
//! | POST | `/reconcile` | Schedule a control loop cycle |
//! | GET | `/metrics` | Prometheus exposition |
//! | GET | `/healthz` | Liveness |
//!
//! Every response carries permissive CORS headers.

pub mod handlers;

use axum::Router;
use axum::http::HeaderValue;
use axum::http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
};
use axum::middleware;
use axum::response::Response;
use axum::routing::{get, post, put};

use kubeflux_autoscale::{LoopHandle, Reconciler};
use kubeflux_state::PolicyStore;

pub const ALLOW_METHODS: &str = "GET, PUT, POST, OPTIONS";
pub const ALLOW_HEADERS: &str =
    "Accept, Content-Type, Content-Length, Accept-Encoding, X-CSRF-Token, Authorization";

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: PolicyStore,
    pub reconciler: Reconciler,
    pub control: LoopHandle,
}

impl ApiState {
    pub fn new(reconciler: Reconciler, control: LoopHandle) -> Self {
        Self {
            store: reconciler.store().clone(),
            reconciler,
            control,
        }
    }
}

/// Build the complete API router.
pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route(
            "/policy",
            get(handlers::get_policy)
                .put(handlers::put_policy)
                .options(handlers::preflight),
        )
        .route("/factor", put(handlers::put_factor).options(handlers::preflight))
        .route("/status", get(handlers::get_status))
        .route(
            "/reconcile",
            post(handlers::trigger_reconcile).options(handlers::preflight),
        )
        .route("/metrics", get(handlers::prometheus_metrics))
        .route("/healthz", get(handlers::healthz))
        .layer(middleware::map_response(cors_headers))
        .with_state(state)
}

async fn cors_headers(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(ALLOW_METHODS),
    );
    headers.insert(
        ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(ALLOW_HEADERS),
    );
    response
}
