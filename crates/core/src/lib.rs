//! Reclaim decision domain logic.
//!
//! Pure business logic with no I/O and no logging: volume stores live in
//! `pvreclaim-store`, the reconciliation loop in `pvreclaim-worker`. This
//! crate provides:
//!
//! - Volume snapshot types and annotation keys
//! - Grace-period policy parsing ([`policy`])
//! - The pass clock and instant arithmetic ([`clock`])
//! - The deletion marker codec ([`marker`])
//! - The reclaim decision engine ([`decision`])

pub mod clock;
pub mod decision;
pub mod error;
pub mod marker;
pub mod policy;
pub mod types;

pub use clock::{Clock, FixedClock, SystemClock};
pub use decision::{Decision, DecisionReason, EngineConfig, Evaluation, ReclaimDecisionEngine};
pub use error::{MarkerParseError, PolicyParseError};
pub use marker::DeletionMarker;
pub use policy::{PolicySetting, PolicyWarning};
pub use types::{AnnotationKeys, ReclaimPolicy, VolumePhase, VolumeSnapshot};
