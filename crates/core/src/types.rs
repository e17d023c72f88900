//! Volume snapshot types shared by the decision engine, the stores and the
//! reconciliation loop.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

// ---------------------------------------------------------------------------
// Annotation keys
// ---------------------------------------------------------------------------

/// Default annotation holding the grace period after release.
pub const DEFAULT_GRACE_PERIOD_KEY: &str =
    "reclaim-volumes.cern.ch/deletion-grace-period-after-release";

/// Default annotation holding the immediate-reclaim age threshold.
pub const DEFAULT_IMMEDIATE_RECLAIM_KEY: &str =
    "reclaim-volumes.cern.ch/no-grace-period-if-time-since-creation-is-less-than";

/// Default annotation the engine writes its deletion marker to.
pub const DEFAULT_DELETION_MARKER_KEY: &str = "volume-ready-to-delete.cern.ch/delete-volume";

/// The three annotation keys the engine reads. Only `deletion_marker` is
/// ever written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotationKeys {
    pub grace_period: String,
    pub immediate_reclaim_threshold: String,
    pub deletion_marker: String,
}

impl Default for AnnotationKeys {
    fn default() -> Self {
        Self {
            grace_period: DEFAULT_GRACE_PERIOD_KEY.to_string(),
            immediate_reclaim_threshold: DEFAULT_IMMEDIATE_RECLAIM_KEY.to_string(),
            deletion_marker: DEFAULT_DELETION_MARKER_KEY.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Lifecycle phase of a persistent volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum VolumePhase {
    Pending,
    Available,
    Bound,
    Released,
    Failed,
    /// Any phase name this crate does not know about.
    Other(String),
}

impl VolumePhase {
    /// Parse from the API `status.phase` value.
    pub fn from_name(name: &str) -> Self {
        match name {
            "Pending" => Self::Pending,
            "Available" => Self::Available,
            "Bound" => Self::Bound,
            "Released" => Self::Released,
            "Failed" => Self::Failed,
            other => Self::Other(other.to_string()),
        }
    }

    /// API name value.
    pub fn name(&self) -> &str {
        match self {
            Self::Pending => "Pending",
            Self::Available => "Available",
            Self::Bound => "Bound",
            Self::Released => "Released",
            Self::Failed => "Failed",
            Self::Other(name) => name,
        }
    }
}

/// Volume-level reclaim policy (`spec.persistentVolumeReclaimPolicy`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReclaimPolicy {
    Retain,
    Delete,
    Recycle,
}

impl ReclaimPolicy {
    /// Parse from the API name. Unknown values yield `None`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Retain" => Some(Self::Retain),
            "Delete" => Some(Self::Delete),
            "Recycle" => Some(Self::Recycle),
            _ => None,
        }
    }

    /// API name value.
    pub fn name(self) -> &'static str {
        match self {
            Self::Retain => "Retain",
            Self::Delete => "Delete",
            Self::Recycle => "Recycle",
        }
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Read-only view of one volume, fetched fresh on every pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VolumeSnapshot {
    pub id: String,
    pub phase: VolumePhase,
    pub created_at: DateTime<Utc>,
    pub storage_class: String,
    pub annotations: BTreeMap<String, String>,
    pub reclaim_policy: ReclaimPolicy,
    /// Opaque version token used as a write precondition, when the store
    /// supports optimistic concurrency.
    pub resource_version: Option<String>,
}

impl VolumeSnapshot {
    /// Build a snapshot with no annotations and a `Retain` policy.
    pub fn new(
        id: impl Into<String>,
        phase: VolumePhase,
        created_at: DateTime<Utc>,
        storage_class: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            phase,
            created_at,
            storage_class: storage_class.into(),
            annotations: BTreeMap::new(),
            reclaim_policy: ReclaimPolicy::Retain,
            resource_version: None,
        }
    }

    /// Builder-style annotation setter.
    #[must_use]
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    /// Builder-style reclaim policy setter.
    #[must_use]
    pub fn with_reclaim_policy(mut self, policy: ReclaimPolicy) -> Self {
        self.reclaim_policy = policy;
        self
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }
}
