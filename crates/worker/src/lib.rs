//! `pvreclaim-worker` library crate.
//!
//! Re-exports internal modules for integration testing. The binary
//! entrypoint lives in `main.rs`.

pub mod config;
pub mod periodic;
pub mod reconcile;

pub use config::{ConfigError, ReclaimerConfig};
pub use reconcile::{PassSummary, ReconcileError, Reconciler, VolumeFailure};
