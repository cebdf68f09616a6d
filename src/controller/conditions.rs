//! Status conditions
//!
//! Pure projections from operation outcomes to typed conditions. Setting a
//! condition replaces the previous condition of the same type only; the
//! transition time moves only when the status flips.

use chrono::Utc;

use crate::crd::{
    ConditionStatus, ConditionType, ReplicationCondition, ReplicationState,
};

pub const REASON_PROMOTED: &str = "Promoted";
pub const REASON_DEMOTED: &str = "Demoted";
pub const REASON_RESYNC_TRIGGERED: &str = "ResyncTriggered";
pub const REASON_FAILED_TO_PROMOTE: &str = "FailedToPromote";
pub const REASON_FAILED_TO_DEMOTE: &str = "FailedToDemote";
pub const REASON_FAILED_TO_RESYNC: &str = "FailedToResync";
pub const REASON_VOLUME_DEGRADED: &str = "VolumeDegraded";
pub const REASON_HEALTHY: &str = "Healthy";
pub const REASON_ERROR: &str = "Error";

/// Set or replace a condition
pub fn set_condition(
    conditions: &mut Vec<ReplicationCondition>,
    r#type: ConditionType,
    status: ConditionStatus,
    reason: &str,
    message: &str,
    generation: i64,
) {
    if let Some(existing) = conditions.iter_mut().find(|c| c.r#type == r#type) {
        if existing.status != status {
            existing.status = status;
            existing.last_transition_time = Some(Utc::now());
        }
        existing.reason = reason.to_string();
        existing.message = message.to_string();
        existing.observed_generation = Some(generation);
    } else {
        conditions.push(ReplicationCondition {
            r#type,
            status,
            observed_generation: Some(generation),
            last_transition_time: Some(Utc::now()),
            reason: reason.to_string(),
            message: message.to_string(),
        });
    }
}

pub fn set_promoted(conditions: &mut Vec<ReplicationCondition>, generation: i64) {
    set_condition(
        conditions,
        ConditionType::Promoted,
        ConditionStatus::True,
        REASON_PROMOTED,
        "volume is promoted to primary",
        generation,
    );
}

pub fn set_failed_promotion(conditions: &mut Vec<ReplicationCondition>, generation: i64) {
    set_condition(
        conditions,
        ConditionType::Promoted,
        ConditionStatus::False,
        REASON_FAILED_TO_PROMOTE,
        "failed to promote volume",
        generation,
    );
}

/// A demoted volume stays degraded until a resync reports it ready
pub fn set_demoted(conditions: &mut Vec<ReplicationCondition>, generation: i64) {
    set_condition(
        conditions,
        ConditionType::Demoted,
        ConditionStatus::True,
        REASON_DEMOTED,
        "volume is demoted to secondary",
        generation,
    );
    set_condition(
        conditions,
        ConditionType::Degraded,
        ConditionStatus::True,
        REASON_VOLUME_DEGRADED,
        "volume is secondary and not yet in sync",
        generation,
    );
}

pub fn set_failed_demotion(conditions: &mut Vec<ReplicationCondition>, generation: i64) {
    set_condition(
        conditions,
        ConditionType::Demoted,
        ConditionStatus::False,
        REASON_FAILED_TO_DEMOTE,
        "failed to demote volume",
        generation,
    );
}

pub fn set_resynced(conditions: &mut Vec<ReplicationCondition>, generation: i64) {
    set_condition(
        conditions,
        ConditionType::Resynced,
        ConditionStatus::True,
        REASON_RESYNC_TRIGGERED,
        "volume resync triggered",
        generation,
    );
}

pub fn set_failed_resync(conditions: &mut Vec<ReplicationCondition>, generation: i64) {
    set_condition(
        conditions,
        ConditionType::Resynced,
        ConditionStatus::False,
        REASON_FAILED_TO_RESYNC,
        "failed to resync volume",
        generation,
    );
}

pub fn set_degraded(conditions: &mut Vec<ReplicationCondition>, generation: i64) {
    set_condition(
        conditions,
        ConditionType::Degraded,
        ConditionStatus::True,
        REASON_VOLUME_DEGRADED,
        "volume is not yet ready",
        generation,
    );
}

pub fn set_not_degraded(conditions: &mut Vec<ReplicationCondition>, generation: i64) {
    set_condition(
        conditions,
        ConditionType::Degraded,
        ConditionStatus::False,
        REASON_HEALTHY,
        "volume is in sync",
        generation,
    );
}

/// Failure condition for the operation implied by the desired state.
///
/// `None` stands for a desired state the controller does not understand;
/// the Degraded condition then carries `message`, the cause of the failure.
pub fn set_failure(
    conditions: &mut Vec<ReplicationCondition>,
    desired: Option<ReplicationState>,
    message: &str,
    generation: i64,
) {
    match desired {
        Some(ReplicationState::Primary) => set_failed_promotion(conditions, generation),
        Some(ReplicationState::Secondary) => set_failed_demotion(conditions, generation),
        Some(ReplicationState::Resync) => set_failed_resync(conditions, generation),
        None => set_condition(
            conditions,
            ConditionType::Degraded,
            ConditionStatus::True,
            REASON_ERROR,
            message,
            generation,
        ),
    }
}
