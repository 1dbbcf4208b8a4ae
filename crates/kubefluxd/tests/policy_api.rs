//! Policy API regression tests.
//!
//! Drives the full router against a static cluster: policy changes,
//! validation, CORS, status and the forced-cycle trigger.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode};
use redb::StorageBackend;
use redb::backends::InMemoryBackend;
use serde_json::{Value, json};
use tokio::sync::watch;
use tower::ServiceExt;

use kubeflux_api::{ALLOW_HEADERS, ALLOW_METHODS, ApiState, build_router};
use kubeflux_autoscale::{ControlLoop, LoopHandle, Reconciler, ReplicaController};
use kubeflux_cluster::{Selector, StaticCluster, StaticWorkload};
use kubeflux_metrics::UsageAggregator;
use kubeflux_state::{FactorMatrix, Mode, Policy, PolicyDb, PolicyStore, Tier};

fn test_cluster() -> StaticCluster {
    StaticCluster::new([
        StaticWorkload::new("web-high", Tier::High, 4)
            .with_pod("web-high-0", "200m", "64Mi")
            .with_pod("web-high-1", "400m", "64Mi"),
        StaticWorkload::new("api-medium", Tier::Medium, 10)
            .with_pod("api-medium-0", "100m", "32Mi"),
        StaticWorkload::new("batch-low", Tier::Low, 10)
            .with_pod("batch-low-0", "100m", "16Mi")
            .with_pod("batch-low-1", "300m", "16Mi")
            .with_pod("batch-low-2", "900m", "16Mi"),
    ])
}

fn test_reconciler(cluster: &StaticCluster, store: PolicyStore) -> Reconciler {
    let shared = Arc::new(cluster.clone());
    Reconciler::new(
        store,
        UsageAggregator::new(shared.clone(), shared.clone(), Selector::default()),
        ReplicaController::new(shared, Selector::default()),
    )
}

fn test_router(cluster: &StaticCluster) -> (Router, Reconciler) {
    let reconciler = test_reconciler(cluster, PolicyStore::new(Policy::default()));
    let router = build_router(ApiState::new(reconciler.clone(), LoopHandle::default()));
    (router, reconciler)
}

fn put_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(Method::PUT)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_json(resp: axum::response::Response) -> Value {
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn get_policy_returns_startup_default() {
    let (router, _) = test_router(&test_cluster());

    let resp = router.oneshot(get("/policy")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let json = body_json(resp).await;
    assert_eq!(json["mode"], "Green");
    assert_eq!(
        json["factorMatrix"],
        json!({
            "Green": { "High": 10, "Medium": 10, "Low": 10 },
            "Yellow": { "High": 8, "Medium": 8, "Low": 8 },
            "Red": { "High": 3, "Medium": 3, "Low": 3 },
        })
    );
}

#[tokio::test]
async fn put_red_scales_every_tier() {
    let cluster = test_cluster();
    let (router, _) = test_router(&cluster);
    let matrix = json!({
        "Green": { "High": 10, "Medium": 10, "Low": 10 },
        "Yellow": { "High": 8, "Medium": 8, "Low": 8 },
        "Red": { "High": 3, "Medium": 1, "Low": 1 },
    });

    let resp = router
        .clone()
        .oneshot(put_json("/policy", json!({ "mode": "Red", "factorMatrix": matrix })))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    assert_eq!(cluster.replicas("web-high").await, Some(3));
    assert_eq!(cluster.replicas("api-medium").await, Some(1));
    assert_eq!(cluster.replicas("batch-low").await, Some(1));

    let json = body_json(router.oneshot(get("/policy")).await.unwrap()).await;
    assert_eq!(json["mode"], "Red");
    assert_eq!(json["factorMatrix"], matrix);
}

#[tokio::test]
async fn unknown_mode_leaves_policy_unchanged() {
    let cluster = test_cluster();
    let (router, _) = test_router(&cluster);

    let resp = router
        .clone()
        .oneshot(put_json("/policy", json!({ "mode": "Purple" })))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let json = body_json(router.oneshot(get("/policy")).await.unwrap()).await;
    assert_eq!(json["mode"], "Green");
    assert!(cluster.updates().await.is_empty());
}

#[tokio::test]
async fn malformed_body_is_rejected() {
    let (router, reconciler) = test_router(&test_cluster());

    let req = Request::builder()
        .method(Method::PUT)
        .uri("/policy")
        .header("content-type", "application/json")
        .body(Body::from("{\"mode\": "))
        .unwrap();
    let resp = router.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let req = Request::builder()
        .method(Method::PUT)
        .uri("/factor")
        .body(Body::from("{}"))
        .unwrap();
    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    assert_eq!(reconciler.store().snapshot().await, Policy::default());
}

#[tokio::test]
async fn put_factor_replaces_matrix_only() {
    let cluster = test_cluster();
    let (router, reconciler) = test_router(&cluster);
    let matrix = FactorMatrix::from_fn(|_, tier| if tier == Tier::High { 6 } else { 2 });

    let resp = router
        .oneshot(put_json("/factor", serde_json::to_value(&matrix).unwrap()))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let policy = reconciler.store().snapshot().await;
    assert_eq!(policy.mode, Mode::Green);
    assert_eq!(policy.factor_matrix, matrix);
    assert_eq!(cluster.replicas("web-high").await, Some(6));
    assert_eq!(cluster.replicas("batch-low").await, Some(2));
}

#[tokio::test]
async fn failed_update_reports_committed_policy() {
    let cluster = test_cluster();
    cluster.fail_updates_for("api-medium").await;
    let (router, _) = test_router(&cluster);

    let resp = router
        .clone()
        .oneshot(put_json("/policy", json!({ "mode": "Yellow" })))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let json = body_json(resp).await;
    assert_eq!(json["policy_committed"], true);
    let failed: Vec<&Value> = json["report"]["entries"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|e| e["outcome"]["status"] == "failed")
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0]["workload"], "api-medium");

    let json = body_json(router.oneshot(get("/policy")).await.unwrap()).await;
    assert_eq!(json["mode"], "Yellow");
    assert_eq!(cluster.replicas("web-high").await, Some(8));
}

#[tokio::test]
async fn every_response_carries_cors_headers() {
    let (router, _) = test_router(&test_cluster());

    let preflight = Request::builder()
        .method(Method::OPTIONS)
        .uri("/policy")
        .body(Body::empty())
        .unwrap();
    let rejected = put_json("/policy", json!({ "mode": "Purple" }));

    for req in [get("/policy"), preflight, rejected, get("/healthz")] {
        let resp = router.clone().oneshot(req).await.unwrap();
        let headers = resp.headers();
        assert_eq!(headers["access-control-allow-origin"], "*");
        assert_eq!(headers["access-control-allow-methods"], ALLOW_METHODS);
        assert_eq!(headers["access-control-allow-headers"], ALLOW_HEADERS);
    }
}

#[tokio::test]
async fn options_returns_empty_ok() {
    let (router, _) = test_router(&test_cluster());
    let req = Request::builder()
        .method(Method::OPTIONS)
        .uri("/factor")
        .body(Body::empty())
        .unwrap();

    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    assert!(bytes.is_empty());
}

#[tokio::test]
async fn status_and_metrics_follow_cycles() {
    let cluster = test_cluster();
    cluster.fail_metrics_for("batch-low-2").await;
    let (router, reconciler) = test_router(&cluster);

    let json = body_json(router.clone().oneshot(get("/status")).await.unwrap()).await;
    assert!(json["usage"].is_null());

    reconciler.run_cycle().await.unwrap();

    let json = body_json(router.clone().oneshot(get("/status")).await.unwrap()).await;
    assert_eq!(json["cycles"], 1);
    assert_eq!(json["usage"]["tiers"]["Low"]["sampled_pods"], 2);
    assert_eq!(json["usage"]["tiers"]["Low"]["excluded_pods"], 1);
    assert_eq!(json["usage"]["tiers"]["Low"]["cpu_nanocores"], 200_000_000);
    assert_eq!(json["usage"]["tiers"]["High"]["cpu_nanocores"], 300_000_000);
    assert_eq!(json["report"]["mode"], "Green");

    let resp = router.oneshot(get("/metrics")).await.unwrap();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("kubeflux_tier_cpu_nanocores{tier=\"High\"} 300000000"));
    assert!(text.contains("kubeflux_replica_target{tier=\"Low\"} 10"));
}

#[tokio::test]
async fn post_reconcile_runs_a_cycle() {
    let cluster = test_cluster();
    let reconciler = test_reconciler(&cluster, PolicyStore::new(Policy::default()));
    let control = ControlLoop::new(reconciler.clone(), Duration::from_secs(3600));
    let router = build_router(ApiState::new(reconciler.clone(), control.handle()));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(control.run(shutdown_rx));

    let wait_for = |cycles: u64| {
        let reconciler = reconciler.clone();
        async move {
            tokio::time::timeout(Duration::from_secs(5), async {
                while reconciler.status().await.cycles < cycles {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
            .await
            .unwrap();
        }
    };

    wait_for(1).await;

    let req = Request::builder()
        .method(Method::POST)
        .uri("/reconcile")
        .body(Body::empty())
        .unwrap();
    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::ACCEPTED);

    wait_for(2).await;

    shutdown_tx.send(true).unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn healthz_is_ok() {
    let (router, _) = test_router(&test_cluster());
    let resp = router.oneshot(get("/healthz")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn persisted_policy_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("kubeflux.redb");
    let cluster = test_cluster();

    {
        let db = PolicyDb::open(&db_path).unwrap();
        let store = PolicyStore::open(db, Policy::default()).unwrap();
        let router = build_router(ApiState::new(
            test_reconciler(&cluster, store),
            LoopHandle::default(),
        ));
        let resp = router
            .oneshot(put_json("/policy", json!({ "mode": "Yellow" })))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    }

    let store = PolicyStore::open(PolicyDb::open(&db_path).unwrap(), Policy::default()).unwrap();
    let router = build_router(ApiState::new(
        test_reconciler(&cluster, store),
        LoopHandle::default(),
    ));
    let json = body_json(router.oneshot(get("/policy")).await.unwrap()).await;
    assert_eq!(json["mode"], "Yellow");
}

/// In-memory redb storage that starts refusing writes once `broken` is set.
#[derive(Debug)]
struct FailingBackend {
    inner: InMemoryBackend,
    broken: Arc<AtomicBool>,
}

impl FailingBackend {
    fn check(&self) -> io::Result<()> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(io::Error::other("disk full"));
        }
        Ok(())
    }
}

impl StorageBackend for FailingBackend {
    fn len(&self) -> io::Result<u64> {
        self.inner.len()
    }

    fn read(&self, offset: u64, out: &mut [u8]) -> io::Result<()> {
        self.inner.read(offset, out)
    }

    fn set_len(&self, len: u64) -> io::Result<()> {
        self.check()?;
        self.inner.set_len(len)
    }

    fn sync_data(&self) -> io::Result<()> {
        self.check()?;
        self.inner.sync_data()
    }

    fn write(&self, offset: u64, data: &[u8]) -> io::Result<()> {
        self.check()?;
        self.inner.write(offset, data)
    }
}

#[tokio::test]
async fn storage_failure_returns_500_and_keeps_policy() {
    let broken = Arc::new(AtomicBool::new(false));
    let db = PolicyDb::open_with_backend(FailingBackend {
        inner: InMemoryBackend::new(),
        broken: broken.clone(),
    })
    .unwrap();
    let cluster = test_cluster();
    let store = PolicyStore::open(db, Policy::default()).unwrap();
    let router = build_router(ApiState::new(
        test_reconciler(&cluster, store),
        LoopHandle::default(),
    ));
    broken.store(true, Ordering::SeqCst);

    let resp = router
        .clone()
        .oneshot(put_json("/policy", json!({ "mode": "Red" })))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json = body_json(resp).await;
    assert_eq!(json["success"], false);

    let json = body_json(router.oneshot(get("/policy")).await.unwrap()).await;
    assert_eq!(json["mode"], "Green");
    assert!(cluster.updates().await.is_empty());
}
