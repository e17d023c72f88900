//! Annotation ledger: the deletion marker and reclaim-policy writes, on top
//! of a [`VolumeStore`].
//!
//! Marker writes are conditioned on the resource version of the snapshot
//! the decision was made from, so two instances that both saw "no marker"
//! cannot both commit one.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use pvreclaim_core::marker::encode_marker;
use pvreclaim_core::{DeletionMarker, MarkerParseError, ReclaimPolicy, VolumeSnapshot};

use crate::error::StoreError;
use crate::store::VolumeStore;

/// Whether a ledger write reached the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerWrite {
    Applied,
    /// The volume already carried the requested state.
    Unchanged,
}

pub struct AnnotationLedger<'a, S: VolumeStore + ?Sized> {
    store: &'a S,
    marker_key: &'a str,
}

impl<'a, S: VolumeStore + ?Sized> AnnotationLedger<'a, S> {
    pub fn new(store: &'a S, marker_key: &'a str) -> Self {
        Self { store, marker_key }
    }

    /// The marker as stored on `volume`.
    pub fn read_marker(&self, volume: &VolumeSnapshot) -> Result<DeletionMarker, MarkerParseError> {
        DeletionMarker::from_annotation(volume.annotation(self.marker_key))
    }

    /// Persist `at` as the volume's deletion marker. A stored marker for the
    /// same instant counts as already written, whatever its offset.
    pub async fn write_marker(
        &self,
        volume: &VolumeSnapshot,
        at: DateTime<Utc>,
    ) -> Result<LedgerWrite, StoreError> {
        if self.read_marker(volume) == Ok(DeletionMarker::Scheduled(at)) {
            return Ok(LedgerWrite::Unchanged);
        }

        let annotations = BTreeMap::from([(self.marker_key.to_string(), encode_marker(at))]);
        self.store
            .patch_annotations(&volume.id, &annotations, volume.resource_version.as_deref())
            .await?;
        Ok(LedgerWrite::Applied)
    }

    /// Hand the volume to the orchestrator's own deletion machinery.
    pub async fn set_reclaim_policy_delete(
        &self,
        volume: &VolumeSnapshot,
    ) -> Result<LedgerWrite, StoreError> {
        if volume.reclaim_policy == ReclaimPolicy::Delete {
            return Ok(LedgerWrite::Unchanged);
        }
        self.store
            .patch_reclaim_policy(&volume.id, ReclaimPolicy::Delete)
            .await?;
        Ok(LedgerWrite::Applied)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use chrono::TimeZone;
    use pvreclaim_core::types::DEFAULT_DELETION_MARKER_KEY;
    use pvreclaim_core::VolumePhase;

    use super::*;
    use crate::memory::{InMemoryVolumeStore, RecordedWrite};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 17, 9, 0, 0).unwrap()
    }

    fn volume() -> VolumeSnapshot {
        VolumeSnapshot::new("pv-1", VolumePhase::Released, t0(), "cephfs")
    }

    #[tokio::test]
    async fn write_marker_patches_store() {
        let store = InMemoryVolumeStore::with_volumes([volume()]);
        let snapshot = store.get("pv-1").unwrap();
        let ledger = AnnotationLedger::new(&store, DEFAULT_DELETION_MARKER_KEY);

        let result = ledger.write_marker(&snapshot, t0()).await.unwrap();
        assert_eq!(result, LedgerWrite::Applied);

        let stored = store.get("pv-1").unwrap();
        assert_eq!(
            ledger.read_marker(&stored),
            Ok(DeletionMarker::Scheduled(t0()))
        );
    }

    #[tokio::test]
    async fn write_marker_is_noop_when_identical() {
        let store = InMemoryVolumeStore::with_volumes([
            volume().with_annotation(DEFAULT_DELETION_MARKER_KEY, encode_marker(t0()))
        ]);
        let snapshot = store.get("pv-1").unwrap();
        let ledger = AnnotationLedger::new(&store, DEFAULT_DELETION_MARKER_KEY);

        let result = ledger.write_marker(&snapshot, t0()).await.unwrap();
        assert_eq!(result, LedgerWrite::Unchanged);
        assert!(store.writes().is_empty());
    }

    #[tokio::test]
    async fn write_marker_reads_existing_marker_before_writing() {
        let store = InMemoryVolumeStore::with_volumes([
            volume().with_annotation(DEFAULT_DELETION_MARKER_KEY, "2026-10-17T11:00:00+02:00")
        ]);
        let ledger = AnnotationLedger::new(&store, DEFAULT_DELETION_MARKER_KEY);

        let same_instant = store.get("pv-1").unwrap();
        assert_eq!(
            ledger.write_marker(&same_instant, t0()).await.unwrap(),
            LedgerWrite::Unchanged
        );
        assert!(store.writes().is_empty());

        store.set_annotation("pv-1", DEFAULT_DELETION_MARKER_KEY, "soon");
        let unreadable = store.get("pv-1").unwrap();
        assert_eq!(
            ledger.write_marker(&unreadable, t0()).await.unwrap(),
            LedgerWrite::Applied
        );
        assert_eq!(
            store.get("pv-1").unwrap().annotation(DEFAULT_DELETION_MARKER_KEY),
            Some(encode_marker(t0()).as_str())
        );
    }

    #[tokio::test]
    async fn write_marker_fails_on_stale_snapshot() {
        let store = InMemoryVolumeStore::with_volumes([volume()]);
        let stale = store.get("pv-1").unwrap();
        store.set_annotation("pv-1", "owner", "someone-else");

        let ledger = AnnotationLedger::new(&store, DEFAULT_DELETION_MARKER_KEY);
        let result = ledger.write_marker(&stale, t0()).await;
        assert_matches!(result, Err(StoreError::Conflict { ref volume }) if volume == "pv-1");
    }

    #[tokio::test]
    async fn set_reclaim_policy_delete_skips_when_already_delete() {
        let store = InMemoryVolumeStore::with_volumes([volume()]);
        let ledger = AnnotationLedger::new(&store, DEFAULT_DELETION_MARKER_KEY);

        let snapshot = store.get("pv-1").unwrap();
        assert_eq!(
            ledger.set_reclaim_policy_delete(&snapshot).await.unwrap(),
            LedgerWrite::Applied
        );
        assert_eq!(
            store.writes(),
            vec![RecordedWrite::ReclaimPolicy {
                volume: "pv-1".into(),
                policy: ReclaimPolicy::Delete,
            }]
        );

        let refreshed = store.get("pv-1").unwrap();
        assert_eq!(
            ledger.set_reclaim_policy_delete(&refreshed).await.unwrap(),
            LedgerWrite::Unchanged
        );
        assert_eq!(store.writes().len(), 1);
    }

    #[test]
    fn read_marker_surfaces_unreadable_values() {
        let store = InMemoryVolumeStore::new();
        let ledger = AnnotationLedger::new(&store, DEFAULT_DELETION_MARKER_KEY);
        let snapshot = volume().with_annotation(DEFAULT_DELETION_MARKER_KEY, "soon");
        assert_matches!(ledger.read_marker(&snapshot), Err(MarkerParseError { .. }));
        assert_eq!(ledger.read_marker(&volume()), Ok(DeletionMarker::Unset));
    }
}
