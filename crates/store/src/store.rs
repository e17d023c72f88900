//! The volume store collaborator.

use std::collections::BTreeMap;

use async_trait::async_trait;
use pvreclaim_core::{ReclaimPolicy, VolumePhase, VolumeSnapshot};

use crate::error::StoreError;

/// Narrows a listing. Stores may filter server-side or client-side; the
/// decision engine re-checks scope either way.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VolumeFilter {
    pub storage_class: Option<String>,
    pub phase: Option<VolumePhase>,
}

impl VolumeFilter {
    pub fn matches(&self, volume: &VolumeSnapshot) -> bool {
        self.storage_class
            .as_deref()
            .map_or(true, |class| volume.storage_class == class)
            && self.phase.as_ref().map_or(true, |phase| volume.phase == *phase)
    }
}

/// Read and patch access to the external volume set. Patches are partial
/// merges, never full-object replacements.
#[async_trait]
pub trait VolumeStore: Send + Sync {
    /// List the volumes matching `filter`, fresh from the source of truth.
    async fn list_volumes(&self, filter: &VolumeFilter)
        -> Result<Vec<VolumeSnapshot>, StoreError>;

    /// Merge `annotations` into the volume's annotations. When
    /// `expected_version` is given the write only succeeds if the volume is
    /// still at that version, otherwise [`StoreError::Conflict`].
    async fn patch_annotations(
        &self,
        volume: &str,
        annotations: &BTreeMap<String, String>,
        expected_version: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Set the volume's reclaim policy.
    async fn patch_reclaim_policy(
        &self,
        volume: &str,
        policy: ReclaimPolicy,
    ) -> Result<(), StoreError>;
}
