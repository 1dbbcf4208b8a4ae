//! Kubernetes REST client.
//!
//! Speaks HTTP/1.1 to the API server, over rustls when the endpoint is
//! `https` or in plain text for `kubectl proxy` and authenticating
//! sidecars. Workloads are `apps/v1` Deployments in one namespace, replica
//! changes go through the `scale` subresource, and pod usage is read from
//! `metrics.k8s.io/v1beta1`.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::{Method, Request, Uri};
use http_body_util::{BodyExt, Full};
use rustls::pki_types::ServerName;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio_rustls::TlsConnector;
use tracing::debug;

use kubeflux_state::Tier;

use crate::error::{ClusterError, ClusterResult};
use crate::provider::{ClusterFuture, ClusterProvider, MetricsSource};
use crate::types::{ContainerUsage, Pod, PodUsageSample, Selector, Workload};

/// Connection settings for [`KubeClient`].
#[derive(Debug, Clone)]
pub struct KubeConfig {
    /// Base URL of the API server, `http[s]://host[:port]`.
    pub api_url: String,
    pub namespace: String,
    /// File holding a bearer token, sent on every request when set.
    pub token_file: Option<PathBuf>,
    /// PEM bundle trusted for an `https` API server. Mozilla roots when unset.
    pub ca_file: Option<PathBuf>,
    /// Deadline for each API call.
    pub timeout: Duration,
}

impl Default for KubeConfig {
    fn default() -> Self {
        Self {
            api_url: "http://127.0.0.1:8001".to_string(),
            namespace: "default".to_string(),
            token_file: None,
            ca_file: None,
            timeout: Duration::from_secs(5),
        }
    }
}

/// TLS settings for an `https` endpoint.
#[derive(Clone)]
struct Tls {
    connector: TlsConnector,
    server_name: ServerName<'static>,
}

impl fmt::Debug for Tls {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tls")
            .field("server_name", &self.server_name)
            .finish_non_exhaustive()
    }
}

/// Cluster provider and metrics source backed by the Kubernetes API.
#[derive(Debug)]
pub struct KubeClient {
    /// `host:port` to connect to.
    address: String,
    /// Value of the `host` header.
    host: String,
    namespace: String,
    token: Option<String>,
    tls: Option<Tls>,
    timeout: Duration,
}

impl KubeClient {
    /// Build a client. Fails with `Authentication` when the endpoint or
    /// the credentials cannot be used.
    pub fn new(config: &KubeConfig) -> ClusterResult<Self> {
        let uri: Uri = config.api_url.parse().map_err(|e| {
            ClusterError::Authentication(format!("invalid api_url {:?}: {e}", config.api_url))
        })?;

        let secure = match uri.scheme_str() {
            Some("http") => false,
            Some("https") => true,
            Some(other) => {
                return Err(ClusterError::Authentication(format!(
                    "unsupported scheme {other:?}, expected http or https"
                )));
            }
            None => {
                return Err(ClusterError::Authentication(format!(
                    "api_url {:?} has no scheme",
                    config.api_url
                )));
            }
        };

        let authority = uri.authority().ok_or_else(|| {
            ClusterError::Authentication(format!("api_url {:?} has no host", config.api_url))
        })?;
        let port = authority
            .port_u16()
            .unwrap_or(if secure { 443 } else { 80 });

        let token = match &config.token_file {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|e| {
                    ClusterError::Authentication(format!("read token {}: {e}", path.display()))
                })?;
                let token = raw.trim().to_string();
                if token.is_empty() {
                    return Err(ClusterError::Authentication(format!(
                        "token file {} is empty",
                        path.display()
                    )));
                }
                Some(token)
            }
            None => None,
        };

        let tls = if secure {
            let host = authority.host().trim_start_matches('[').trim_end_matches(']');
            let server_name = ServerName::try_from(host.to_string()).map_err(|e| {
                ClusterError::Authentication(format!("invalid tls server name {host:?}: {e}"))
            })?;
            Some(Tls {
                connector: tls_connector(config.ca_file.as_deref())?,
                server_name,
            })
        } else {
            None
        };

        debug!(
            api_url = %config.api_url,
            namespace = %config.namespace,
            tls = tls.is_some(),
            "kubernetes client configured"
        );

        Ok(Self {
            address: format!("{}:{port}", authority.host()),
            host: authority.as_str().to_string(),
            namespace: config.namespace.clone(),
            token,
            tls,
            timeout: config.timeout,
        })
    }

    /// Issue one request and return the body of a 2xx response.
    async fn send(
        &self,
        method: Method,
        path_and_query: &str,
        merge_patch: Option<Vec<u8>>,
    ) -> Result<Bytes, String> {
        let req = self.request(method, path_and_query, merge_patch)?;

        let call = async {
            let stream = tokio::net::TcpStream::connect(&self.address)
                .await
                .map_err(|e| format!("connect {}: {e}", self.address))?;

            match &self.tls {
                Some(tls) => {
                    let stream = tls
                        .connector
                        .connect(tls.server_name.clone(), stream)
                        .await
                        .map_err(|e| format!("tls handshake with {}: {e}", self.address))?;
                    exchange(hyper_util::rt::TokioIo::new(stream), req).await
                }
                None => exchange(hyper_util::rt::TokioIo::new(stream), req).await,
            }
        };

        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(format!("timed out after {:?}", self.timeout)),
        }
    }

    fn request(
        &self,
        method: Method,
        path_and_query: &str,
        merge_patch: Option<Vec<u8>>,
    ) -> Result<Request<Full<Bytes>>, String> {
        let mut builder = Request::builder()
            .method(method)
            .uri(path_and_query)
            .header("host", &self.host)
            .header("accept", "application/json")
            .header("user-agent", "kubeflux/0.1");
        if let Some(token) = &self.token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let body = match merge_patch {
            Some(patch) => {
                builder = builder.header("content-type", "application/merge-patch+json");
                Full::new(Bytes::from(patch))
            }
            None => Full::new(Bytes::new()),
        };
        builder
            .body(body)
            .map_err(|e| format!("build request: {e}"))
    }

    async fn get_json<T: DeserializeOwned>(&self, path_and_query: &str) -> Result<T, String> {
        let body = self.send(Method::GET, path_and_query, None).await?;
        serde_json::from_slice(&body).map_err(|e| format!("decode response: {e}"))
    }
}

/// Send `req` over an established connection and return the body of a
/// 2xx response.
async fn exchange<T>(io: T, req: Request<Full<Bytes>>) -> Result<Bytes, String>
where
    T: hyper::rt::Read + hyper::rt::Write + Unpin + Send + 'static,
{
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .map_err(|e| format!("handshake: {e}"))?;

    // Drive the connection in the background.
    tokio::spawn(async move {
        let _ = conn.await;
    });

    let resp = sender
        .send_request(req)
        .await
        .map_err(|e| format!("request failed: {e}"))?;
    let status = resp.status();
    let body = resp
        .into_body()
        .collect()
        .await
        .map_err(|e| format!("read body: {e}"))?
        .to_bytes();

    if !status.is_success() {
        return Err(format!("{status}: {}", snippet(&body)));
    }
    Ok(body)
}

/// Client TLS config trusting `ca_file`, or the Mozilla roots without one.
fn tls_connector(ca_file: Option<&Path>) -> ClusterResult<TlsConnector> {
    let mut roots = rustls::RootCertStore::empty();
    match ca_file {
        Some(path) => {
            let pem = std::fs::read(path).map_err(|e| {
                ClusterError::Authentication(format!("read CA {}: {e}", path.display()))
            })?;
            let certs = rustls_pemfile::certs(&mut pem.as_slice())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| {
                    ClusterError::Authentication(format!("parse CA {}: {e}", path.display()))
                })?;
            if certs.is_empty() {
                return Err(ClusterError::Authentication(format!(
                    "no certificates in CA {}",
                    path.display()
                )));
            }
            for cert in certs {
                roots.add(cert).map_err(|e| {
                    ClusterError::Authentication(format!("invalid CA {}: {e}", path.display()))
                })?;
            }
        }
        None => roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned()),
    }

    let config = rustls::ClientConfig::builder_with_provider(
        rustls::crypto::ring::default_provider().into(),
    )
    .with_safe_default_protocol_versions()
    .map_err(|e| ClusterError::Authentication(format!("tls protocol versions: {e}")))?
    .with_root_certificates(roots)
    .with_no_client_auth();

    Ok(TlsConnector::from(Arc::new(config)))
}

impl ClusterProvider for KubeClient {
    fn list_workloads<'a>(&'a self, selector: &'a Selector) -> ClusterFuture<'a, Vec<Workload>> {
        Box::pin(async move {
            let mut path = format!("/apis/apps/v1/namespaces/{}/deployments", self.namespace);
            if let Some(labels) = selector.labels.as_deref().filter(|l| !l.is_empty()) {
                path.push_str("?labelSelector=");
                path.push_str(&encode_query(labels));
            }

            let list: ObjectList<DeploymentObject> = self
                .get_json(&path)
                .await
                .map_err(|reason| ClusterError::list("workloads", reason))?;

            let workloads: Vec<Workload> = list
                .items
                .into_iter()
                .map(|d| d.into_workload(&selector.tier_key))
                .collect();
            debug!(count = workloads.len(), namespace = %self.namespace, "listed deployments");
            Ok(workloads)
        })
    }

    fn list_pods<'a>(
        &'a self,
        workload: &'a Workload,
        selector: &'a Selector,
    ) -> ClusterFuture<'a, Vec<Pod>> {
        Box::pin(async move {
            if workload.pod_selector.is_empty() {
                debug!(workload = %workload.id, "deployment has no matchLabels, skipping pods");
                return Ok(Vec::new());
            }

            let path = format!(
                "/api/v1/namespaces/{}/pods?labelSelector={}",
                self.namespace,
                encode_query(&workload.pod_selector)
            );
            let list: ObjectList<PodObject> = self
                .get_json(&path)
                .await
                .map_err(|reason| ClusterError::list("pods", reason))?;

            Ok(list
                .items
                .into_iter()
                .map(|p| Pod {
                    tier: p.metadata.tier(&selector.tier_key),
                    id: p.metadata.name,
                    workload_id: workload.id.clone(),
                })
                .collect())
        })
    }

    fn set_replicas<'a>(&'a self, workload_id: &'a str, replicas: u32) -> ClusterFuture<'a, ()> {
        Box::pin(async move {
            let path = format!(
                "/apis/apps/v1/namespaces/{}/deployments/{workload_id}/scale",
                self.namespace
            );
            let patch = serde_json::json!({ "spec": { "replicas": replicas } });
            let body = serde_json::to_vec(&patch).map_err(|e| ClusterError::ReplicaUpdate {
                workload: workload_id.to_string(),
                reason: e.to_string(),
            })?;

            self.send(Method::PATCH, &path, Some(body))
                .await
                .map_err(|reason| ClusterError::ReplicaUpdate {
                    workload: workload_id.to_string(),
                    reason,
                })?;
            debug!(workload = %workload_id, replicas, "scale subresource patched");
            Ok(())
        })
    }
}

impl MetricsSource for KubeClient {
    fn pod_usage<'a>(&'a self, pod: &'a Pod) -> ClusterFuture<'a, PodUsageSample> {
        Box::pin(async move {
            let path = format!(
                "/apis/metrics.k8s.io/v1beta1/namespaces/{}/pods/{}",
                self.namespace, pod.id
            );
            let metrics: PodMetrics =
                self.get_json(&path)
                    .await
                    .map_err(|reason| ClusterError::MetricsFetch {
                        pod: pod.id.clone(),
                        reason,
                    })?;

            Ok(PodUsageSample {
                pod_id: pod.id.clone(),
                containers: metrics
                    .containers
                    .into_iter()
                    .map(|c| ContainerUsage {
                        name: c.name,
                        cpu: c.usage.cpu,
                        memory: c.usage.memory,
                    })
                    .collect(),
            })
        })
    }
}

// ── Wire types ─────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ObjectList<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Debug, Default, Deserialize)]
struct ObjectMeta {
    name: String,
    #[serde(default)]
    labels: BTreeMap<String, String>,
    #[serde(default)]
    annotations: BTreeMap<String, String>,
}

impl ObjectMeta {
    /// Tier from the label `key`, else from the annotation `key`.
    fn tier(&self, key: &str) -> Option<Tier> {
        self.labels
            .get(key)
            .or_else(|| self.annotations.get(key))
            .and_then(|value| value.parse().ok())
    }
}

#[derive(Debug, Deserialize)]
struct DeploymentObject {
    metadata: ObjectMeta,
    #[serde(default)]
    spec: DeploymentSpec,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeploymentSpec {
    replicas: Option<u32>,
    #[serde(default)]
    selector: LabelSelector,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LabelSelector {
    #[serde(default)]
    match_labels: BTreeMap<String, String>,
}

impl DeploymentObject {
    fn into_workload(self, tier_key: &str) -> Workload {
        let pod_selector = self
            .spec
            .selector
            .match_labels
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",");

        Workload {
            tier: self.metadata.tier(tier_key),
            id: self.metadata.name,
            // The API server defaults an unset replica count to 1.
            replicas: self.spec.replicas.unwrap_or(1),
            pod_selector,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PodObject {
    metadata: ObjectMeta,
}

#[derive(Debug, Deserialize)]
struct PodMetrics {
    #[serde(default)]
    containers: Vec<ContainerMetrics>,
}

#[derive(Debug, Deserialize)]
struct ContainerMetrics {
    name: String,
    usage: UsageQuantities,
}

#[derive(Debug, Deserialize)]
struct UsageQuantities {
    #[serde(default)]
    cpu: String,
    #[serde(default)]
    memory: String,
}

/// Percent-encode a query parameter value.
fn encode_query(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for b in value.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

/// First part of an error body, for log-friendly messages.
fn snippet(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    text.chars().take(200).collect::<String>().trim().to_string()
}
