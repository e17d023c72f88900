//! Kubernetes API server implementation of [`VolumeStore`].
//!
//! Talks to the core `v1` PersistentVolume endpoints over HTTPS using
//! [`reqwest`], authenticating with the pod's service-account token:
//!
//! - `GET /api/v1/persistentvolumes?limit=N&continue=T` (paginated)
//! - `PATCH /api/v1/persistentvolumes/{name}` (strategic merge patch)
//!
//! Annotation patches carry `metadata.resourceVersion` when a precondition
//! is requested; the API server answers 409 if the volume moved on.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pvreclaim_core::{ReclaimPolicy, VolumePhase, VolumeSnapshot};
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;

use crate::error::StoreError;
use crate::store::{VolumeFilter, VolumeStore};

/// Where the kubelet mounts the service-account credentials.
pub const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

/// Default HTTP request timeout for a single API call.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default number of volumes requested per list page.
pub const DEFAULT_PAGE_SIZE: u32 = 500;

const PERSISTENT_VOLUMES_PATH: &str = "/api/v1/persistentvolumes";
const STRATEGIC_MERGE_PATCH: &str = "application/strategic-merge-patch+json";

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Connection settings for the API server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KubeConfig {
    /// Base URL, e.g. `https://10.0.0.1:443`.
    pub api_url: String,
    /// Bearer token file. `None` uses the service-account token if mounted.
    pub token_file: Option<PathBuf>,
    /// Extra root certificate. `None` uses the service-account CA if mounted.
    pub ca_file: Option<PathBuf>,
    pub request_timeout: Duration,
    pub page_size: u32,
}

impl KubeConfig {
    /// Build from environment-style lookups.
    ///
    /// | Variable                    | Default                                   |
    /// |-----------------------------|-------------------------------------------|
    /// | `KUBE_API_URL`              | `https://$KUBERNETES_SERVICE_HOST:$KUBERNETES_SERVICE_PORT` |
    /// | `KUBE_TOKEN_FILE`           | service-account `token`, if present        |
    /// | `KUBE_CA_FILE`              | service-account `ca.crt`, if present       |
    /// | `KUBE_REQUEST_TIMEOUT_SECS` | `30`                                      |
    /// | `KUBE_PAGE_SIZE`            | `500`                                     |
    pub fn from_lookup<F>(lookup: F) -> Result<Self, StoreError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_url = match lookup("KUBE_API_URL") {
            Some(url) => url,
            None => in_cluster_url(&lookup)?,
        };

        let request_timeout = match lookup("KUBE_REQUEST_TIMEOUT_SECS") {
            Some(raw) => Duration::from_secs(raw.parse().map_err(|_| {
                StoreError::Config(format!(
                    "KUBE_REQUEST_TIMEOUT_SECS must be a whole number of seconds, got '{raw}'"
                ))
            })?),
            None => DEFAULT_REQUEST_TIMEOUT,
        };

        let page_size = match lookup("KUBE_PAGE_SIZE") {
            Some(raw) => raw
                .parse::<u32>()
                .ok()
                .filter(|size| *size > 0)
                .ok_or_else(|| {
                    StoreError::Config(format!(
                        "KUBE_PAGE_SIZE must be a positive integer, got '{raw}'"
                    ))
                })?,
            None => DEFAULT_PAGE_SIZE,
        };

        Ok(Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            token_file: lookup("KUBE_TOKEN_FILE").map(PathBuf::from),
            ca_file: lookup("KUBE_CA_FILE").map(PathBuf::from),
            request_timeout,
            page_size,
        })
    }
}

fn in_cluster_url<F>(lookup: &F) -> Result<String, StoreError>
where
    F: Fn(&str) -> Option<String>,
{
    let host = lookup("KUBERNETES_SERVICE_HOST").ok_or_else(|| {
        StoreError::Config(
            "KUBE_API_URL is not set and KUBERNETES_SERVICE_HOST is missing (not running in a cluster?)"
                .into(),
        )
    })?;
    let port = lookup("KUBERNETES_SERVICE_PORT").unwrap_or_else(|| "443".into());
    if host.contains(':') {
        Ok(format!("https://[{host}]:{port}"))
    } else {
        Ok(format!("https://{host}:{port}"))
    }
}

/// Read an explicitly configured file, or the default one if it exists.
async fn read_credential(
    explicit: Option<&Path>,
    default_name: &str,
) -> Result<Option<Vec<u8>>, StoreError> {
    if let Some(path) = explicit {
        return tokio::fs::read(path).await.map(Some).map_err(|e| {
            StoreError::Config(format!("cannot read {}: {e}", path.display()))
        });
    }
    let default = Path::new(SERVICE_ACCOUNT_DIR).join(default_name);
    match tokio::fs::read(&default).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StoreError::Config(format!(
            "cannot read {}: {e}",
            default.display()
        ))),
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct PersistentVolumeList {
    #[serde(default)]
    metadata: ListMeta,
    #[serde(default)]
    items: Vec<PersistentVolume>,
}

#[derive(Debug, Default, Deserialize)]
struct ListMeta {
    #[serde(rename = "continue")]
    continue_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PersistentVolume {
    #[serde(default)]
    metadata: ObjectMeta,
    #[serde(default)]
    spec: PersistentVolumeSpec,
    #[serde(default)]
    status: PersistentVolumeStatus,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectMeta {
    name: Option<String>,
    creation_timestamp: Option<DateTime<Utc>>,
    annotations: Option<BTreeMap<String, String>>,
    resource_version: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistentVolumeSpec {
    storage_class_name: Option<String>,
    persistent_volume_reclaim_policy: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PersistentVolumeStatus {
    phase: Option<String>,
}

impl PersistentVolume {
    fn into_snapshot(self) -> Result<VolumeSnapshot, StoreError> {
        let name = self
            .metadata
            .name
            .filter(|name| !name.is_empty())
            .ok_or_else(|| StoreError::Decode("volume has no metadata.name".into()))?;
        let created_at = self.metadata.creation_timestamp.ok_or_else(|| {
            StoreError::Decode(format!("volume {name} has no creationTimestamp"))
        })?;
        let reclaim_policy = match self.spec.persistent_volume_reclaim_policy.as_deref() {
            None => ReclaimPolicy::Retain,
            Some(raw) => ReclaimPolicy::from_name(raw).ok_or_else(|| {
                StoreError::Decode(format!("volume {name} has unknown reclaim policy '{raw}'"))
            })?,
        };

        Ok(VolumeSnapshot {
            phase: VolumePhase::from_name(self.status.phase.as_deref().unwrap_or("Pending")),
            created_at,
            storage_class: self.spec.storage_class_name.unwrap_or_default(),
            annotations: self.metadata.annotations.unwrap_or_default(),
            reclaim_policy,
            resource_version: self.metadata.resource_version,
            id: name,
        })
    }
}

/// Decode one page of a PersistentVolume list. Items that cannot be turned
/// into snapshots are returned separately so one bad object does not hide
/// the rest of the fleet.
fn decode_page(
    body: &str,
) -> Result<(Vec<VolumeSnapshot>, Vec<StoreError>, Option<String>), StoreError> {
    let page: PersistentVolumeList =
        serde_json::from_str(body).map_err(|e| StoreError::Decode(e.to_string()))?;

    let mut volumes = Vec::with_capacity(page.items.len());
    let mut rejected = Vec::new();
    for item in page.items {
        match item.into_snapshot() {
            Ok(volume) => volumes.push(volume),
            Err(e) => rejected.push(e),
        }
    }
    let next = page.metadata.continue_token.filter(|token| !token.is_empty());
    Ok((volumes, rejected, next))
}

// ---------------------------------------------------------------------------
// Patch bodies
// ---------------------------------------------------------------------------

/// Strategic-merge body adding `annotations`, optionally pinned to a
/// resource version.
pub fn annotation_patch(
    annotations: &BTreeMap<String, String>,
    expected_version: Option<&str>,
) -> serde_json::Value {
    let mut metadata = serde_json::json!({ "annotations": annotations });
    if let Some(version) = expected_version {
        metadata["resourceVersion"] = serde_json::Value::String(version.to_string());
    }
    serde_json::json!({ "metadata": metadata })
}

/// Strategic-merge body setting the reclaim policy.
pub fn reclaim_policy_patch(policy: ReclaimPolicy) -> serde_json::Value {
    serde_json::json!({ "spec": { "persistentVolumeReclaimPolicy": policy.name() } })
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// PersistentVolume store backed by the Kubernetes API server.
pub struct KubeVolumeStore {
    client: reqwest::Client,
    api_url: String,
    token: Option<String>,
    page_size: u32,
}

impl KubeVolumeStore {
    /// Build a store from `config`, loading credentials from disk.
    pub async fn connect(config: &KubeConfig) -> Result<Self, StoreError> {
        let token = read_credential(config.token_file.as_deref(), "token")
            .await?
            .map(|bytes| String::from_utf8_lossy(&bytes).trim().to_string());
        let ca = read_credential(config.ca_file.as_deref(), "ca.crt").await?;

        let mut builder = reqwest::Client::builder().timeout(config.request_timeout);
        if let Some(pem) = ca {
            builder = builder.add_root_certificate(reqwest::Certificate::from_pem(&pem)?);
        }

        tracing::debug!(
            api_url = %config.api_url,
            authenticated = token.is_some(),
            "Kubernetes volume store configured"
        );

        Ok(Self::with_client(
            builder.build()?,
            config.api_url.clone(),
            token,
            config.page_size,
        ))
    }

    /// Create a store reusing an existing [`reqwest::Client`].
    pub fn with_client(
        client: reqwest::Client,
        api_url: String,
        token: Option<String>,
        page_size: u32,
    ) -> Self {
        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            token,
            page_size,
        }
    }

    fn collection_url(&self) -> String {
        format!("{}{PERSISTENT_VOLUMES_PATH}", self.api_url)
    }

    fn volume_url(&self, volume: &str) -> String {
        format!("{}{PERSISTENT_VOLUMES_PATH}/{volume}", self.api_url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Send a strategic merge patch for one volume.
    async fn patch(&self, volume: &str, body: &serde_json::Value) -> Result<(), StoreError> {
        let request = self
            .client
            .patch(self.volume_url(volume))
            .header(CONTENT_TYPE, STRATEGIC_MERGE_PATCH)
            .body(body.to_string());
        let response = self.authorize(request).send().await?;

        match Self::ensure_success(response).await {
            Ok(_) => Ok(()),
            Err(StoreError::Api { status: 409, .. }) => Err(StoreError::Conflict {
                volume: volume.to_string(),
            }),
            Err(StoreError::Api { status: 404, .. }) => Err(StoreError::NotFound {
                volume: volume.to_string(),
            }),
            Err(e) => Err(e),
        }
    }

    /// Ensure the response has a success status code, or turn it into
    /// [`StoreError::Api`] with the body text.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, StoreError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(StoreError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl VolumeStore for KubeVolumeStore {
    async fn list_volumes(
        &self,
        filter: &VolumeFilter,
    ) -> Result<Vec<VolumeSnapshot>, StoreError> {
        let mut volumes = Vec::new();
        let mut continue_token: Option<String> = None;
        let mut pages = 0u32;

        loop {
            let mut request = self
                .client
                .get(self.collection_url())
                .query(&[("limit", self.page_size.to_string())]);
            if let Some(token) = &continue_token {
                request = request.query(&[("continue", token)]);
            }

            let response = Self::ensure_success(self.authorize(request).send().await?).await?;
            let body = response.text().await?;
            let (page, rejected, next) = decode_page(&body)?;
            pages += 1;

            for e in rejected {
                tracing::warn!(error = %e, "Skipping undecodable persistent volume");
            }
            volumes.extend(page.into_iter().filter(|volume| filter.matches(volume)));

            match next {
                Some(token) => continue_token = Some(token),
                None => break,
            }
        }

        tracing::debug!(pages, volumes = volumes.len(), "Listed persistent volumes");
        Ok(volumes)
    }

    async fn patch_annotations(
        &self,
        volume: &str,
        annotations: &BTreeMap<String, String>,
        expected_version: Option<&str>,
    ) -> Result<(), StoreError> {
        self.patch(volume, &annotation_patch(annotations, expected_version))
            .await
    }

    async fn patch_reclaim_policy(
        &self,
        volume: &str,
        policy: ReclaimPolicy,
    ) -> Result<(), StoreError> {
        self.patch(volume, &reclaim_policy_patch(policy)).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use assert_matches::assert_matches;
    use chrono::TimeZone;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn config_uses_in_cluster_service_address() {
        let config = KubeConfig::from_lookup(lookup_from(&[
            ("KUBERNETES_SERVICE_HOST", "10.96.0.1"),
            ("KUBERNETES_SERVICE_PORT", "6443"),
        ]))
        .unwrap();
        assert_eq!(config.api_url, "https://10.96.0.1:6443");
        assert_eq!(config.request_timeout, DEFAULT_REQUEST_TIMEOUT);
        assert_eq!(config.page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(config.token_file, None);
    }

    #[test]
    fn config_brackets_ipv6_hosts() {
        let lookup = lookup_from(&[("KUBERNETES_SERVICE_HOST", "fd00::1")]);
        let config = KubeConfig::from_lookup(lookup).unwrap();
        assert_eq!(config.api_url, "https://[fd00::1]:443");
    }

    #[test]
    fn config_prefers_explicit_url() {
        let config = KubeConfig::from_lookup(lookup_from(&[
            ("KUBE_API_URL", "http://127.0.0.1:8001/"),
            ("KUBERNETES_SERVICE_HOST", "10.96.0.1"),
            ("KUBE_TOKEN_FILE", "/tmp/token"),
            ("KUBE_PAGE_SIZE", "50"),
            ("KUBE_REQUEST_TIMEOUT_SECS", "5"),
        ]))
        .unwrap();
        assert_eq!(config.api_url, "http://127.0.0.1:8001");
        assert_eq!(config.token_file, Some(PathBuf::from("/tmp/token")));
        assert_eq!(config.page_size, 50);
        assert_eq!(config.request_timeout, Duration::from_secs(5));
    }

    #[test]
    fn config_rejects_missing_address_and_bad_numbers() {
        assert_matches!(
            KubeConfig::from_lookup(lookup_from(&[])),
            Err(StoreError::Config(_))
        );
        assert_matches!(
            KubeConfig::from_lookup(lookup_from(&[
                ("KUBE_API_URL", "http://localhost"),
                ("KUBE_PAGE_SIZE", "0"),
            ])),
            Err(StoreError::Config(_))
        );
        assert_matches!(
            KubeConfig::from_lookup(lookup_from(&[
                ("KUBE_API_URL", "http://localhost"),
                ("KUBE_REQUEST_TIMEOUT_SECS", "soon"),
            ])),
            Err(StoreError::Config(_))
        );
    }

    #[test]
    fn decodes_persistent_volume_page() {
        let body = serde_json::json!({
            "kind": "PersistentVolumeList",
            "metadata": { "continue": "abc", "resourceVersion": "99" },
            "items": [
                {
                    "metadata": {
                        "name": "pvc-1",
                        "creationTimestamp": "2026-10-17T09:00:00Z",
                        "resourceVersion": "42",
                        "annotations": {
                            "reclaim-volumes.cern.ch/deletion-grace-period-after-release": "1h"
                        }
                    },
                    "spec": {
                        "storageClassName": "cephfs",
                        "persistentVolumeReclaimPolicy": "Retain",
                        "capacity": { "storage": "1Gi" }
                    },
                    "status": { "phase": "Released" }
                },
                {
                    "metadata": {
                        "name": "pvc-2",
                        "creationTimestamp": "2026-10-16T09:00:00Z"
                    },
                    "spec": {},
                    "status": { "phase": "Bound" }
                }
            ]
        })
        .to_string();

        let (volumes, rejected, next) = decode_page(&body).unwrap();
        assert!(rejected.is_empty());
        assert_eq!(next.as_deref(), Some("abc"));
        assert_eq!(volumes.len(), 2);

        let first = &volumes[0];
        assert_eq!(first.id, "pvc-1");
        assert_eq!(first.phase, VolumePhase::Released);
        assert_eq!(first.storage_class, "cephfs");
        assert_eq!(first.reclaim_policy, ReclaimPolicy::Retain);
        assert_eq!(first.resource_version.as_deref(), Some("42"));
        assert_eq!(
            first.created_at,
            Utc.with_ymd_and_hms(2026, 10, 17, 9, 0, 0).unwrap()
        );
        assert_eq!(
            first.annotation("reclaim-volumes.cern.ch/deletion-grace-period-after-release"),
            Some("1h")
        );

        let second = &volumes[1];
        assert_eq!(second.phase, VolumePhase::Bound);
        assert_eq!(second.storage_class, "");
        assert!(second.annotations.is_empty());
    }

    #[test]
    fn decode_rejects_bad_items_individually() {
        let body = serde_json::json!({
            "metadata": { "continue": "" },
            "items": [
                { "metadata": { "name": "no-timestamp" } },
                {
                    "metadata": { "name": "odd-policy", "creationTimestamp": "2026-10-17T09:00:00Z" },
                    "spec": { "persistentVolumeReclaimPolicy": "Shred" }
                },
                { "metadata": { "creationTimestamp": "2026-10-17T09:00:00Z" } },
                { "spec": { "storageClassName": "cephfs" } },
                {
                    "metadata": { "name": "fine", "creationTimestamp": "2026-10-17T09:00:00Z" }
                }
            ]
        })
        .to_string();

        let (volumes, rejected, next) = decode_page(&body).unwrap();
        assert_eq!(next, None);
        assert_eq!(rejected.len(), 4);
        assert_eq!(volumes.len(), 1);
        assert_eq!(volumes[0].id, "fine");
        assert_eq!(volumes[0].phase, VolumePhase::Pending);
    }

    #[test]
    fn decode_rejects_malformed_body() {
        assert_matches!(decode_page("not json"), Err(StoreError::Decode(_)));
    }

    #[test]
    fn annotation_patch_carries_resource_version() {
        let annotations = BTreeMap::from([(
            "volume-ready-to-delete.cern.ch/delete-volume".to_string(),
            "2026-10-17T10:00:00Z".to_string(),
        )]);
        assert_eq!(
            annotation_patch(&annotations, Some("42")),
            serde_json::json!({
                "metadata": {
                    "resourceVersion": "42",
                    "annotations": {
                        "volume-ready-to-delete.cern.ch/delete-volume": "2026-10-17T10:00:00Z"
                    }
                }
            })
        );
        assert!(annotation_patch(&annotations, None)["metadata"]
            .get("resourceVersion")
            .is_none());
    }

    #[test]
    fn reclaim_policy_patch_sets_delete() {
        assert_eq!(
            reclaim_policy_patch(ReclaimPolicy::Delete),
            serde_json::json!({ "spec": { "persistentVolumeReclaimPolicy": "Delete" } })
        );
    }

    #[test]
    fn urls_are_built_from_trimmed_base() {
        let store = KubeVolumeStore::with_client(
            reqwest::Client::new(),
            "https://api.example:6443/".into(),
            None,
            DEFAULT_PAGE_SIZE,
        );
        assert_eq!(
            store.collection_url(),
            "https://api.example:6443/api/v1/persistentvolumes"
        );
        assert_eq!(
            store.volume_url("pvc-1"),
            "https://api.example:6443/api/v1/persistentvolumes/pvc-1"
        );
    }

    #[test]
    fn store_error_display_api() {
        let err = StoreError::Api {
            status: 403,
            body: "forbidden".into(),
        };
        assert_eq!(err.to_string(), "API error (403): forbidden");
    }
}
