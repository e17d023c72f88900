//! Reclaim decision engine.
//!
//! [`ReclaimDecisionEngine::decide`] is a pure function of a volume snapshot
//! and the pass instant. It never fails: malformed policy input degrades to
//! the most conservative branch and comes back as a [`PolicyWarning`].
//!
//! Order of evaluation for a released volume in the target class:
//!
//! 1. No usable grace period: leave the volume alone.
//! 2. Immediate-reclaim threshold set and the volume is younger than it:
//!    reclaim now, whatever the marker says.
//! 3. Otherwise consult the deletion marker: schedule one if unset, reclaim
//!    once it has passed, wait while it has not.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::clock::{add_duration, ceil_to_second, has_reached};
use crate::marker::DeletionMarker;
use crate::policy::{
    parse_grace_period, parse_immediate_reclaim_threshold, PolicySetting, PolicyWarning,
};
use crate::types::{AnnotationKeys, ReclaimPolicy, VolumePhase, VolumeSnapshot};

/// What to do with one volume in this pass. Dictates exactly one side effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Decision {
    NoAction,
    ReclaimNow,
    ScheduleFor(DateTime<Utc>),
}

/// The branch that produced a [`Decision`], for logging and reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum DecisionReason {
    NotReleased,
    OtherStorageClass,
    /// Reclaim policy is already `Delete`; the orchestrator owns it now.
    AlreadyReclaiming,
    NoGracePeriod,
    /// `now + grace` does not fit in the instant range.
    ScheduleOutOfRange,
    WithinImmediateReclaimWindow { deadline: DateTime<Utc> },
    MarkerUnset,
    /// Grace period of zero with no marker yet: reclaimed in the same pass.
    ZeroGracePeriod,
    MarkerElapsed { marker: DateTime<Utc> },
    MarkerPending { marker: DateTime<Utc> },
}

/// Result of evaluating one volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub decision: Decision,
    pub reason: DecisionReason,
    pub warnings: Vec<PolicyWarning>,
}

impl Evaluation {
    fn new(decision: Decision, reason: DecisionReason, warnings: Vec<PolicyWarning>) -> Self {
        Self {
            decision,
            reason,
            warnings,
        }
    }

    fn no_action(reason: DecisionReason, warnings: Vec<PolicyWarning>) -> Self {
        Self::new(Decision::NoAction, reason, warnings)
    }
}

/// Scope and annotation keys the engine works with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Only volumes of this storage class are governed.
    pub storage_class: String,
    pub keys: AnnotationKeys,
}

impl EngineConfig {
    pub fn new(storage_class: impl Into<String>) -> Self {
        Self {
            storage_class: storage_class.into(),
            keys: AnnotationKeys::default(),
        }
    }
}

/// Decides whether and when each released volume is reclaimed.
#[derive(Debug, Clone)]
pub struct ReclaimDecisionEngine {
    config: EngineConfig,
}

impl ReclaimDecisionEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn keys(&self) -> &AnnotationKeys {
        &self.config.keys
    }

    /// Evaluate one volume against the pass instant `now`.
    pub fn decide(&self, snapshot: &VolumeSnapshot, now: DateTime<Utc>) -> Evaluation {
        let mut warnings = Vec::new();

        if snapshot.phase != VolumePhase::Released {
            return Evaluation::no_action(DecisionReason::NotReleased, warnings);
        }
        if snapshot.storage_class != self.config.storage_class {
            return Evaluation::no_action(DecisionReason::OtherStorageClass, warnings);
        }
        if snapshot.reclaim_policy == ReclaimPolicy::Delete {
            return Evaluation::no_action(DecisionReason::AlreadyReclaiming, warnings);
        }

        let keys = &self.config.keys;

        // 1. Grace period.
        let grace = match self.read_setting(
            snapshot,
            &keys.grace_period,
            parse_grace_period,
            &mut warnings,
        ) {
            Some(grace) => grace,
            None => return Evaluation::no_action(DecisionReason::NoGracePeriod, warnings),
        };

        // 2. Immediate reclaim, checked every pass ahead of the marker.
        if let Some(threshold) = self.read_setting(
            snapshot,
            &keys.immediate_reclaim_threshold,
            parse_immediate_reclaim_threshold,
            &mut warnings,
        ) {
            match add_duration(snapshot.created_at, threshold) {
                Some(deadline) if now < deadline => {
                    return Evaluation::new(
                        Decision::ReclaimNow,
                        DecisionReason::WithinImmediateReclaimWindow { deadline },
                        warnings,
                    );
                }
                Some(_) => {}
                None => warnings.push(PolicyWarning::new(
                    &keys.immediate_reclaim_threshold,
                    snapshot
                        .annotation(&keys.immediate_reclaim_threshold)
                        .unwrap_or_default(),
                    "creation time plus threshold is out of range",
                )),
            }
        }

        // 3. Deletion marker.
        let raw_marker = snapshot.annotation(&keys.deletion_marker);
        let marker = DeletionMarker::from_annotation(raw_marker).unwrap_or_else(|e| {
            warnings.push(PolicyWarning::new(
                &keys.deletion_marker,
                &e.value,
                "unreadable deletion marker, rescheduling",
            ));
            DeletionMarker::Unset
        });

        match marker {
            DeletionMarker::Scheduled(marker) if has_reached(now, marker) => Evaluation::new(
                Decision::ReclaimNow,
                DecisionReason::MarkerElapsed { marker },
                warnings,
            ),
            DeletionMarker::Scheduled(marker) => {
                Evaluation::no_action(DecisionReason::MarkerPending { marker }, warnings)
            }
            DeletionMarker::Unset if grace == Duration::zero() => Evaluation::new(
                Decision::ReclaimNow,
                DecisionReason::ZeroGracePeriod,
                warnings,
            ),
            DeletionMarker::Unset => match add_duration(now, grace).and_then(ceil_to_second) {
                Some(at) => Evaluation::new(
                    Decision::ScheduleFor(at),
                    DecisionReason::MarkerUnset,
                    warnings,
                ),
                None => {
                    warnings.push(PolicyWarning::new(
                        &keys.grace_period,
                        snapshot.annotation(&keys.grace_period).unwrap_or_default(),
                        "scheduled time is out of range",
                    ));
                    Evaluation::no_action(DecisionReason::ScheduleOutOfRange, warnings)
                }
            },
        }
    }

    /// Read one duration annotation, recording a warning when the owner
    /// wrote something unusable.
    fn read_setting(
        &self,
        snapshot: &VolumeSnapshot,
        key: &str,
        parse: fn(Option<&str>) -> PolicySetting,
        warnings: &mut Vec<PolicyWarning>,
    ) -> Option<Duration> {
        let raw = snapshot.annotation(key);
        match parse(raw) {
            PolicySetting::Enabled(duration) => Some(duration),
            PolicySetting::Disabled(reason) => {
                if reason.is_reportable() {
                    warnings.push(PolicyWarning::new(key, raw.unwrap_or_default(), &reason));
                }
                None
            }
        }
    }
}
