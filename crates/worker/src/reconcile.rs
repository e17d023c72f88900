//! One reconciliation pass over the released volumes.
//!
//! Each volume is evaluated and acted on independently and strictly in
//! sequence: a decision maps to exactly one ledger write (or none), and a
//! failed write is recorded against that volume only. Only a failure to
//! list volumes aborts the pass. Nothing is retried inside a pass; every
//! effect is idempotent, so the next pass picks up where this one stopped.

use chrono::{DateTime, Utc};
use pvreclaim_core::{Clock, Decision, ReclaimDecisionEngine, VolumePhase, VolumeSnapshot};
use pvreclaim_store::{AnnotationLedger, LedgerWrite, StoreError, VolumeFilter, VolumeStore};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("Failed to list persistent volumes: {0}")]
    ListVolumes(#[source] StoreError),
}

/// A write that failed for one volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VolumeFailure {
    pub volume: String,
    pub error: String,
}

/// Counts for one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassSummary {
    pub evaluated: usize,
    pub scheduled: usize,
    pub reclaimed: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Malformed policy annotations seen, across all volumes.
    pub warnings: usize,
    /// The pass stopped early on cancellation.
    pub interrupted: bool,
    pub failures: Vec<VolumeFailure>,
}

/// Applies reclaim decisions through a [`VolumeStore`].
pub struct Reconciler<S> {
    store: S,
    engine: ReclaimDecisionEngine,
    dry_run: bool,
}

impl<S: VolumeStore> Reconciler<S> {
    pub fn new(store: S, engine: ReclaimDecisionEngine) -> Self {
        Self {
            store,
            engine,
            dry_run: false,
        }
    }

    /// Log decisions instead of writing them.
    #[must_use]
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn engine(&self) -> &ReclaimDecisionEngine {
        &self.engine
    }

    /// Read the clock once, list the volumes in scope and run a pass.
    pub async fn reconcile_once(
        &self,
        clock: &dyn Clock,
        cancel: &CancellationToken,
    ) -> Result<PassSummary, ReconcileError> {
        let now = clock.now();
        let filter = VolumeFilter {
            storage_class: Some(self.engine.config().storage_class.clone()),
            phase: Some(VolumePhase::Released),
        };

        let volumes = self
            .store
            .list_volumes(&filter)
            .await
            .map_err(ReconcileError::ListVolumes)?;
        tracing::info!(
            volumes = volumes.len(),
            storage_class = %filter.storage_class.as_deref().unwrap_or_default(),
            now = %now,
            dry_run = self.dry_run,
            "Starting reconciliation pass"
        );

        Ok(self.run_pass_until(&volumes, now, cancel).await)
    }

    /// Run a pass over `volumes` at the instant `now`.
    pub async fn run_pass(&self, volumes: &[VolumeSnapshot], now: DateTime<Utc>) -> PassSummary {
        self.run_pass_until(volumes, now, &CancellationToken::new())
            .await
    }

    /// Run a pass, stopping before the next volume once `cancel` fires.
    pub async fn run_pass_until(
        &self,
        volumes: &[VolumeSnapshot],
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> PassSummary {
        let ledger = AnnotationLedger::new(&self.store, &self.engine.keys().deletion_marker);
        let mut summary = PassSummary::default();

        for volume in volumes {
            if cancel.is_cancelled() {
                tracing::warn!(
                    remaining = volumes.len() - summary.evaluated,
                    "Reconciliation pass cancelled"
                );
                summary.interrupted = true;
                break;
            }
            summary.evaluated += 1;

            let evaluation = self.engine.decide(volume, now);
            for warning in &evaluation.warnings {
                tracing::warn!(
                    volume = %volume.id,
                    key = %warning.key,
                    value = %warning.value,
                    reason = %warning.reason,
                    "Ignoring malformed reclaim annotation"
                );
            }
            summary.warnings += evaluation.warnings.len();

            match evaluation.decision {
                Decision::NoAction => {
                    tracing::debug!(volume = %volume.id, reason = ?evaluation.reason, "No action");
                    summary.skipped += 1;
                }
                Decision::ScheduleFor(at) => {
                    match self.schedule(&ledger, volume, at).await {
                        Ok(()) => summary.scheduled += 1,
                        Err(e) => record_failure(&mut summary, volume, "schedule reclaim", e),
                    }
                }
                Decision::ReclaimNow => match self.reclaim(&ledger, volume).await {
                    Ok(()) => {
                        tracing::info!(
                            volume = %volume.id,
                            reason = ?evaluation.reason,
                            dry_run = self.dry_run,
                            "Reclaim policy set to Delete"
                        );
                        summary.reclaimed += 1;
                    }
                    Err(e) => record_failure(&mut summary, volume, "set reclaim policy", e),
                },
            }
        }

        summary
    }

    async fn schedule(
        &self,
        ledger: &AnnotationLedger<'_, S>,
        volume: &VolumeSnapshot,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        if !self.dry_run && ledger.write_marker(volume, at).await? == LedgerWrite::Unchanged {
            tracing::debug!(volume = %volume.id, "Deletion marker already in place");
        }
        tracing::info!(
            volume = %volume.id,
            delete_at = %at,
            dry_run = self.dry_run,
            "Volume scheduled for reclaim"
        );
        Ok(())
    }

    async fn reclaim(
        &self,
        ledger: &AnnotationLedger<'_, S>,
        volume: &VolumeSnapshot,
    ) -> Result<(), StoreError> {
        if self.dry_run {
            return Ok(());
        }
        if ledger.set_reclaim_policy_delete(volume).await? == LedgerWrite::Unchanged {
            tracing::debug!(volume = %volume.id, "Reclaim policy already Delete");
        }
        Ok(())
    }
}

fn record_failure(summary: &mut PassSummary, volume: &VolumeSnapshot, action: &str, e: StoreError) {
    tracing::error!(volume = %volume.id, error = %e, "Failed to {action}");
    summary.failed += 1;
    summary.failures.push(VolumeFailure {
        volume: volume.id.clone(),
        error: e.to_string(),
    });
}

/// Log a finished pass at info level.
pub fn log_summary(summary: &PassSummary) {
    tracing::info!(
        evaluated = summary.evaluated,
        scheduled = summary.scheduled,
        reclaimed = summary.reclaimed,
        skipped = summary.skipped,
        failed = summary.failed,
        warnings = summary.warnings,
        interrupted = summary.interrupted,
        "All released volumes have been processed"
    );
}
