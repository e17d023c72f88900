//! `pvreclaim-worker` -- released persistent volume reclaimer.
//!
//! Lists the released PersistentVolumes of one storage class and, following
//! the grace-period annotations their owners set, either schedules a
//! deletion marker or sets the reclaim policy to `Delete` so the cluster's
//! own machinery removes the volume.
//!
//! By default a single pass runs and the process exits (for a CronJob).
//! Set `RUN_INTERVAL_SECS` to keep running. See [`ReclaimerConfig`] for the
//! full list of environment variables.
//!
//! | Variable     | Default | Description                                 |
//! |--------------|---------|---------------------------------------------|
//! | `RUST_LOG`   | `pvreclaim_worker=info,pvreclaim_store=info` | Log filter |
//! | `LOG_FORMAT` | `text`  | `json` for structured JSON log lines        |

use pvreclaim_core::{Clock, FixedClock, ReclaimDecisionEngine, SystemClock};
use pvreclaim_store::KubeVolumeStore;
use pvreclaim_worker::reconcile::log_summary;
use pvreclaim_worker::{periodic, ReclaimerConfig, Reconciler};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_LOG_FILTER: &str = "pvreclaim_worker=info,pvreclaim_store=info";

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    let registry = tracing_subscriber::registry().with(filter);
    if std::env::var("LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json")) {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    // --- Configuration ---
    let config = ReclaimerConfig::from_env().unwrap_or_else(|e| {
        tracing::error!(error = %e, "Invalid configuration");
        std::process::exit(1);
    });
    tracing::info!(
        storage_class = %config.engine.storage_class,
        dry_run = config.dry_run,
        run_interval_secs = config.run_interval.map(|interval| interval.as_secs()),
        api_url = %config.kube.api_url,
        "Loaded reclaimer configuration"
    );

    // --- Volume store ---
    let store = KubeVolumeStore::connect(&config.kube)
        .await
        .unwrap_or_else(|e| {
            tracing::error!(error = %e, "Failed to set up Kubernetes client");
            std::process::exit(1);
        });

    let reconciler = Reconciler::new(store, ReclaimDecisionEngine::new(config.engine.clone()))
        .dry_run(config.dry_run);

    let clock: Box<dyn Clock> = match config.now_override {
        Some(now) => {
            tracing::warn!(now = %now, "Clock pinned by RECLAIM_NOW");
            Box::new(FixedClock(now))
        }
        None => Box::new(SystemClock),
    };

    // --- Shutdown ---
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Shutdown signal received, finishing current volume");
                cancel.cancel();
            }
        });
    }

    match config.run_interval {
        None => match reconciler.reconcile_once(clock.as_ref(), &cancel).await {
            Ok(summary) => log_summary(&summary),
            Err(e) => {
                tracing::error!(error = %e, "Reconciliation pass aborted");
                std::process::exit(1);
            }
        },
        Some(interval) => {
            periodic::run(&reconciler, clock.as_ref(), interval, cancel).await;
        }
    }
}
