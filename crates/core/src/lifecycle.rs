//! Variant lifecycle: the finite set of legal state transitions.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{VariantError, VariantResult};
use crate::types::{VariantId, VariantState};

/// Why a variant changed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionTrigger {
    /// Cleared the quality gate and joined the pool.
    Admitted,
    /// Decayed CTR spiked well above the pool median.
    CtrSpike,
    /// Spiked again while already anomalous.
    RepeatedAnomaly,
    /// Spike large enough to skip the anomalous stage.
    SevereAnomaly,
    /// Decayed CTR stayed below the baseline floor.
    Underperforming,
    /// Spike with automatic quarantine enabled.
    QuarantineOnAnomaly,
    OperatorQuarantine,
    OperatorClearAnomaly,
    OperatorUnsuppress,
}

impl fmt::Display for TransitionTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransitionTrigger::Admitted => "admitted",
            TransitionTrigger::CtrSpike => "ctr_spike",
            TransitionTrigger::RepeatedAnomaly => "repeated_anomaly",
            TransitionTrigger::SevereAnomaly => "severe_anomaly",
            TransitionTrigger::Underperforming => "underperforming",
            TransitionTrigger::QuarantineOnAnomaly => "quarantine_on_anomaly",
            TransitionTrigger::OperatorQuarantine => "operator_quarantine",
            TransitionTrigger::OperatorClearAnomaly => "operator_clear_anomaly",
            TransitionTrigger::OperatorUnsuppress => "operator_unsuppress",
        };
        f.write_str(s)
    }
}

/// A transition that was applied to a variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransition {
    pub variant_id: VariantId,
    pub from: VariantState,
    pub to: VariantState,
    pub trigger: TransitionTrigger,
}

use TransitionTrigger as T;
use VariantState as S;

/// Every legal (from, to, trigger) row. Quarantined has no outgoing rows.
const TRANSITIONS: &[(VariantState, VariantState, TransitionTrigger)] = &[
    // Proposed ->
    (S::Proposed, S::Active, T::Admitted),
    // Active ->
    (S::Active, S::Anomalous, T::CtrSpike),
    (S::Active, S::Suppressed, T::SevereAnomaly),
    (S::Active, S::Suppressed, T::Underperforming),
    (S::Active, S::Quarantined, T::QuarantineOnAnomaly),
    (S::Active, S::Quarantined, T::OperatorQuarantine),
    // Anomalous ->
    (S::Anomalous, S::Suppressed, T::RepeatedAnomaly),
    (S::Anomalous, S::Suppressed, T::SevereAnomaly),
    (S::Anomalous, S::Suppressed, T::Underperforming),
    (S::Anomalous, S::Quarantined, T::QuarantineOnAnomaly),
    (S::Anomalous, S::Quarantined, T::OperatorQuarantine),
    (S::Anomalous, S::Active, T::OperatorClearAnomaly),
    // Suppressed ->
    (S::Suppressed, S::Quarantined, T::OperatorQuarantine),
    (S::Suppressed, S::Active, T::OperatorUnsuppress),
];

pub fn is_valid(from: VariantState, to: VariantState, trigger: TransitionTrigger) -> bool {
    TRANSITIONS
        .iter()
        .any(|&(f, t, trig)| f == from && t == to && trig == trigger)
}

pub fn validate(
    variant_id: VariantId,
    from: VariantState,
    to: VariantState,
    trigger: TransitionTrigger,
) -> VariantResult<StateTransition> {
    if !is_valid(from, to, trigger) {
        return Err(VariantError::InvalidTransition { from, to });
    }
    Ok(StateTransition {
        variant_id,
        from,
        to,
        trigger,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{TraitVector, Variant};
    use chrono::Utc;
    use uuid::Uuid;

    #[test]
    fn test_admission_then_spike() {
        let now = Utc::now();
        let mut v = Variant::new(Uuid::new_v4(), "a", TraitVector::default(), 50.0, now);
        assert_eq!(v.state(), S::Proposed);
        v.transition(S::Active, T::Admitted, now).unwrap();
        let t = v.transition(S::Anomalous, T::CtrSpike, now).unwrap();
        assert_eq!(t.from, S::Active);
        assert_eq!(t.to, S::Anomalous);
        assert_eq!(v.state_changed_at, Some(now));
    }

    #[test]
    fn test_quarantine_is_terminal() {
        for to in [S::Proposed, S::Active, S::Anomalous, S::Suppressed] {
            for &(_, _, trigger) in TRANSITIONS {
                assert!(!is_valid(S::Quarantined, to, trigger));
            }
        }
    }

    #[test]
    fn test_trigger_must_match_row() {
        assert!(!is_valid(S::Active, S::Anomalous, T::OperatorQuarantine));
        assert!(!is_valid(S::Proposed, S::Suppressed, T::Underperforming));
        assert!(is_valid(S::Suppressed, S::Active, T::OperatorUnsuppress));
    }
}
