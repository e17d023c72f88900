//! In-memory volume store.
//!
//! Same contract as the Kubernetes store, including resource-version
//! preconditions, plus a log of every applied write and failure injection.
//! Backs the reconciliation tests and local dry runs.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use pvreclaim_core::{ReclaimPolicy, VolumeSnapshot};

use crate::error::StoreError;
use crate::store::{VolumeFilter, VolumeStore};

/// One write applied to the in-memory store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedWrite {
    Annotations {
        volume: String,
        annotations: BTreeMap<String, String>,
    },
    ReclaimPolicy {
        volume: String,
        policy: ReclaimPolicy,
    },
}

#[derive(Debug, Default)]
struct State {
    volumes: BTreeMap<String, VolumeSnapshot>,
    writes: Vec<RecordedWrite>,
    failing_volumes: BTreeSet<String>,
    fail_listing: bool,
    next_version: u64,
}

impl State {
    fn bump_version(&mut self) -> String {
        self.next_version += 1;
        self.next_version.to_string()
    }

    fn volume_mut(&mut self, volume: &str) -> Result<&mut VolumeSnapshot, StoreError> {
        self.volumes.get_mut(volume).ok_or_else(|| StoreError::NotFound {
            volume: volume.to_string(),
        })
    }

    fn check_injected(&self, volume: &str) -> Result<(), StoreError> {
        if self.failing_volumes.contains(volume) {
            return Err(StoreError::Injected(format!("write to {volume} rejected")));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryVolumeStore {
    state: Mutex<State>,
}

impl InMemoryVolumeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_volumes(volumes: impl IntoIterator<Item = VolumeSnapshot>) -> Self {
        let store = Self::new();
        for volume in volumes {
            store.insert(volume);
        }
        store
    }

    /// Insert or replace a volume, assigning it a fresh resource version.
    pub fn insert(&self, mut volume: VolumeSnapshot) {
        let mut state = self.lock();
        volume.resource_version = Some(state.bump_version());
        state.volumes.insert(volume.id.clone(), volume);
    }

    pub fn get(&self, volume: &str) -> Option<VolumeSnapshot> {
        self.lock().volumes.get(volume).cloned()
    }

    /// Change an annotation the way an outside actor would: not recorded as
    /// a write, but it does bump the resource version.
    pub fn set_annotation(&self, volume: &str, key: &str, value: &str) {
        let mut state = self.lock();
        let version = state.bump_version();
        if let Some(snapshot) = state.volumes.get_mut(volume) {
            snapshot.annotations.insert(key.to_string(), value.to_string());
            snapshot.resource_version = Some(version);
        }
    }

    /// Writes applied so far, oldest first.
    pub fn writes(&self) -> Vec<RecordedWrite> {
        self.lock().writes.clone()
    }

    pub fn clear_writes(&self) {
        self.lock().writes.clear();
    }

    /// Make every write to `volume` fail until [`Self::heal`] is called.
    pub fn fail_writes_for(&self, volume: &str) {
        self.lock().failing_volumes.insert(volume.to_string());
    }

    pub fn heal(&self, volume: &str) {
        self.lock().failing_volumes.remove(volume);
    }

    pub fn fail_listing(&self, fail: bool) {
        self.lock().fail_listing = fail;
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl VolumeStore for InMemoryVolumeStore {
    async fn list_volumes(
        &self,
        filter: &VolumeFilter,
    ) -> Result<Vec<VolumeSnapshot>, StoreError> {
        let state = self.lock();
        if state.fail_listing {
            return Err(StoreError::Injected("listing rejected".into()));
        }
        Ok(state
            .volumes
            .values()
            .filter(|volume| filter.matches(volume))
            .cloned()
            .collect())
    }

    async fn patch_annotations(
        &self,
        volume: &str,
        annotations: &BTreeMap<String, String>,
        expected_version: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.check_injected(volume)?;

        let current = state.volume_mut(volume)?.resource_version.clone();
        if let Some(expected) = expected_version {
            if current.as_deref() != Some(expected) {
                return Err(StoreError::Conflict {
                    volume: volume.to_string(),
                });
            }
        }

        let version = state.bump_version();
        let snapshot = state.volume_mut(volume)?;
        snapshot
            .annotations
            .extend(annotations.iter().map(|(k, v)| (k.clone(), v.clone())));
        snapshot.resource_version = Some(version);

        state.writes.push(RecordedWrite::Annotations {
            volume: volume.to_string(),
            annotations: annotations.clone(),
        });
        Ok(())
    }

    async fn patch_reclaim_policy(
        &self,
        volume: &str,
        policy: ReclaimPolicy,
    ) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.check_injected(volume)?;

        let version = state.bump_version();
        let snapshot = state.volume_mut(volume)?;
        snapshot.reclaim_policy = policy;
        snapshot.resource_version = Some(version);

        state.writes.push(RecordedWrite::ReclaimPolicy {
            volume: volume.to_string(),
            policy,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use chrono::Utc;
    use pvreclaim_core::VolumePhase;

    use super::*;

    fn volume(id: &str, class: &str, phase: VolumePhase) -> VolumeSnapshot {
        VolumeSnapshot::new(id, phase, Utc::now(), class)
    }

    #[tokio::test]
    async fn list_applies_filter() {
        let store = InMemoryVolumeStore::with_volumes([
            volume("a", "cephfs", VolumePhase::Released),
            volume("b", "rbd", VolumePhase::Released),
            volume("c", "cephfs", VolumePhase::Bound),
        ]);
        let filter = VolumeFilter {
            storage_class: Some("cephfs".into()),
            phase: Some(VolumePhase::Released),
        };
        let listed = store.list_volumes(&filter).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, "a");

        let all = store.list_volumes(&VolumeFilter::default()).await.unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn patch_unknown_volume_is_not_found() {
        let store = InMemoryVolumeStore::new();
        let result = store
            .patch_reclaim_policy("missing", ReclaimPolicy::Delete)
            .await;
        assert_matches!(result, Err(StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn injected_failures_can_be_healed() {
        let store =
            InMemoryVolumeStore::with_volumes([volume("a", "cephfs", VolumePhase::Released)]);
        store.fail_writes_for("a");
        assert_matches!(
            store.patch_reclaim_policy("a", ReclaimPolicy::Delete).await,
            Err(StoreError::Injected(_))
        );
        store.heal("a");
        assert!(store.patch_reclaim_policy("a", ReclaimPolicy::Delete).await.is_ok());
        assert_eq!(store.get("a").unwrap().reclaim_policy, ReclaimPolicy::Delete);
    }

    #[tokio::test]
    async fn annotation_patch_merges_and_bumps_version() {
        let store = InMemoryVolumeStore::with_volumes([
            volume("a", "cephfs", VolumePhase::Released).with_annotation("keep", "me")
        ]);
        let before = store.get("a").unwrap().resource_version;
        let patch = BTreeMap::from([("new".to_string(), "value".to_string())]);
        store
            .patch_annotations("a", &patch, before.as_deref())
            .await
            .unwrap();

        let after = store.get("a").unwrap();
        assert_eq!(after.annotation("keep"), Some("me"));
        assert_eq!(after.annotation("new"), Some("value"));
        assert_ne!(after.resource_version, before);
    }

    #[tokio::test]
    async fn listing_failure_is_reported() {
        let store = InMemoryVolumeStore::new();
        store.fail_listing(true);
        assert!(store.list_volumes(&VolumeFilter::default()).await.is_err());
    }
}
