//! Volume store collaborators for the reclaimer.
//!
//! - [`VolumeStore`] — list and patch access to the external volume set.
//! - [`AnnotationLedger`] — deletion-marker and reclaim-policy writes.
//! - [`KubeVolumeStore`] — Kubernetes API server implementation.
//! - [`InMemoryVolumeStore`] — in-process implementation for tests and
//!   local dry runs.

pub mod error;
pub mod kube;
pub mod ledger;
pub mod memory;
pub mod store;

pub use error::StoreError;
pub use kube::{KubeConfig, KubeVolumeStore};
pub use ledger::{AnnotationLedger, LedgerWrite};
pub use memory::{InMemoryVolumeStore, RecordedWrite};
pub use store::{VolumeFilter, VolumeStore};
