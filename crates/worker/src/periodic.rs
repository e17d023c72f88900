//! Periodic reconciliation.
//!
//! Runs a pass on a fixed interval using `tokio::time::interval` until the
//! cancellation token fires. A failed listing is logged and retried on the
//! next tick instead of stopping the loop.

use std::time::Duration;

use pvreclaim_core::Clock;
use pvreclaim_store::VolumeStore;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::reconcile::{log_summary, Reconciler};

/// Run passes every `interval` until `cancel` is triggered. Returns the
/// number of passes that completed listing.
pub async fn run<S: VolumeStore>(
    reconciler: &Reconciler<S>,
    clock: &dyn Clock,
    interval: Duration,
    cancel: CancellationToken,
) -> u64 {
    tracing::info!(interval_secs = interval.as_secs(), "Periodic reclaimer started");

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut passes = 0u64;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(passes, "Periodic reclaimer stopping");
                break;
            }
            _ = ticker.tick() => {
                match reconciler.reconcile_once(clock, &cancel).await {
                    Ok(summary) => {
                        passes += 1;
                        log_summary(&summary);
                    }
                    Err(e) => {
                        tracing::error!(
                            error = %e,
                            "Reconciliation pass failed, retrying next interval"
                        );
                    }
                }
            }
        }
    }

    passes
}
