//! Replenishes pools whose active set has become too thin.
//!
//! A pool is regenerated when it is non-empty and either has fewer than
//! `min_active` active variants or at least `max(2, total / 2)` suppressed or
//! quarantined ones. Regeneration tops the active set up to `target` with
//! fresh candidates that clear the quality gate and do not repeat an existing
//! value. Excluded variants are never revived.

use std::sync::Arc;

use chrono::Utc;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use variant_core::config::ExperimentConfig;
use variant_core::{
    AuditKind, AuditRecord, AuditSink, Pool, PoolKey, TraitVector, Variant, VariantError,
    VariantId,
};
use variant_ledger::{admit_candidates, Admission, PoolStore, RetryPolicy};
use variant_planner::{GenerationRequest, GenerationStrategy, QualityGate, StrategyRegistry};

use crate::catalog::ContentCatalog;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NotTriggered,
    NothingNeeded,
    NoUniqueGenerated,
    PoolNotFound,
    ContentNotFound,
    InvalidBaseVariant,
    UnknownStrategy,
    PersistenceConflict,
    StorageUnavailable,
    /// A candidate or the pool it was checked against failed validation.
    ValidationFailed,
    InternalError,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::NotTriggered => "not_triggered",
            SkipReason::NothingNeeded => "nothing_needed",
            SkipReason::NoUniqueGenerated => "no_unique_generated",
            SkipReason::PoolNotFound => "pool_not_found",
            SkipReason::ContentNotFound => "content_not_found",
            SkipReason::InvalidBaseVariant => "invalid_base_variant",
            SkipReason::UnknownStrategy => "unknown_strategy",
            SkipReason::PersistenceConflict => "persistence_conflict",
            SkipReason::StorageUnavailable => "storage_unavailable",
            SkipReason::ValidationFailed => "validation_failed",
            SkipReason::InternalError => "internal_error",
        }
    }

    fn from_error(e: &VariantError) -> Self {
        match e {
            VariantError::PoolNotFound(_) => SkipReason::PoolNotFound,
            VariantError::InvalidBaseVariant(_) => SkipReason::InvalidBaseVariant,
            VariantError::UnknownStrategy(_) => SkipReason::UnknownStrategy,
            VariantError::PersistenceConflict { .. } => SkipReason::PersistenceConflict,
            VariantError::GenerationExhausted(_) => SkipReason::NoUniqueGenerated,
            VariantError::Storage(_) | VariantError::Serialization(_) | VariantError::Io(_) => {
                SkipReason::StorageUnavailable
            }
            VariantError::Validation(_)
            | VariantError::InvalidTransition { .. }
            | VariantError::VariantNotFound(_)
            | VariantError::InsufficientData(_)
            | VariantError::NoSelectableVariant(_) => SkipReason::ValidationFailed,
            VariantError::Config(_) | VariantError::Internal(_) => SkipReason::InternalError,
        }
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RegenerationOutcome {
    Added {
        added: usize,
        strategy: String,
        variant_ids: Vec<VariantId>,
    },
    Skipped {
        reason: SkipReason,
    },
}

impl RegenerationOutcome {
    pub fn added(&self) -> usize {
        match self {
            RegenerationOutcome::Added { added, .. } => *added,
            RegenerationOutcome::Skipped { .. } => 0,
        }
    }

    pub fn skip_reason(&self) -> Option<SkipReason> {
        match self {
            RegenerationOutcome::Skipped { reason } => Some(*reason),
            RegenerationOutcome::Added { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegenerationPolicy {
    pub min_active: usize,
    pub target: usize,
    pub magnitude: f64,
    pub strategy: String,
}

impl RegenerationPolicy {
    pub fn from_config(config: &ExperimentConfig) -> Self {
        Self {
            min_active: config.min_active,
            target: config.regeneration_target,
            magnitude: config.mutation_magnitude,
            strategy: config.generation_strategy.clone(),
        }
    }

    /// Why `pool` needs regeneration, if it does.
    pub fn trigger(&self, pool: &Pool) -> Option<&'static str> {
        let total = pool.variants.len();
        if total == 0 {
            return None;
        }
        if pool.active_count() < self.min_active {
            Some("diversity_low")
        } else if pool.excluded_count() >= (total / 2).max(2) {
            Some("suppression_heavy")
        } else {
            None
        }
    }

    /// How many variants to add to reach the target.
    pub fn need(&self, pool: &Pool) -> usize {
        self.target.saturating_sub(pool.active_count())
    }
}

impl Default for RegenerationPolicy {
    fn default() -> Self {
        Self::from_config(&ExperimentConfig::default())
    }
}

enum Step {
    Skip(SkipReason),
    Add(Admission),
}

pub struct Regenerator {
    store: Arc<dyn PoolStore>,
    catalog: Arc<dyn ContentCatalog>,
    registry: StrategyRegistry,
    gate: QualityGate,
    policy: RegenerationPolicy,
    retry: RetryPolicy,
    audit: Arc<dyn AuditSink>,
}

impl Regenerator {
    pub fn new(
        store: Arc<dyn PoolStore>,
        catalog: Arc<dyn ContentCatalog>,
        registry: StrategyRegistry,
        gate: QualityGate,
        policy: RegenerationPolicy,
        retry: RetryPolicy,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            store,
            catalog,
            registry,
            gate,
            policy,
            retry,
            audit,
        }
    }

    pub fn policy(&self) -> &RegenerationPolicy {
        &self.policy
    }

    /// Check the pool and top it up if needed. Failures come back as skip
    /// reasons. Additions land in a single commit, so two concurrent calls
    /// cannot both add for the same shortfall.
    pub fn regenerate_if_needed(&self, key: &PoolKey, rng: &mut dyn RngCore) -> RegenerationOutcome {
        let strategy = match self.registry.get(&self.policy.strategy) {
            Ok(s) => s,
            Err(e) => return self.skipped(key, SkipReason::from_error(&e)),
        };

        let mut attempt = 1;
        loop {
            let mut pool = match self.store.load(key) {
                Ok(Some(pool)) => pool,
                Ok(None) => return self.skipped(key, SkipReason::PoolNotFound),
                Err(e) => {
                    warn!(pool = %key, error = %e, "failed to load pool for regeneration");
                    return self.skipped(key, SkipReason::from_error(&e));
                }
            };

            let admission = match self.plan(&mut pool, strategy.as_ref(), rng) {
                Step::Skip(reason) => return self.skipped(key, reason),
                Step::Add(admission) => admission,
            };

            match self.store.commit(&pool) {
                Ok(_) => return self.added(key, strategy.name(), admission),
                Err(e) if e.is_conflict() && attempt < self.retry.max_attempts => {
                    debug!(pool = %key, attempt, "regeneration conflict, retrying");
                    std::thread::sleep(self.retry.backoff * attempt);
                    attempt += 1;
                }
                Err(e) => return self.skipped(key, SkipReason::from_error(&e)),
            }
        }
    }

    fn plan(&self, pool: &mut Pool, strategy: &dyn GenerationStrategy, rng: &mut dyn RngCore) -> Step {
        let Some(trigger) = self.policy.trigger(pool) else {
            return Step::Skip(SkipReason::NotTriggered);
        };
        let need = self.policy.need(pool);
        if need == 0 {
            return Step::Skip(SkipReason::NothingNeeded);
        }
        let Some(context) = self.catalog.context(&pool.key.content_id) else {
            return Step::Skip(SkipReason::ContentNotFound);
        };

        let base = best_active_traits(pool).unwrap_or_else(|| context.seed_traits.resolve().0);
        let request = GenerationRequest {
            title: &context.title,
            base,
            count: need,
            magnitude: self.policy.magnitude,
        };
        let candidates = match strategy.generate(&request, rng) {
            Ok(c) => c,
            Err(e) => return Step::Skip(SkipReason::from_error(&e)),
        };

        let now = Utc::now();
        let variants: Vec<Variant> = candidates
            .into_iter()
            .map(|c| {
                let quality = self.gate.quality(&c.value, &c.traits);
                Variant::new(c.id, c.value, c.traits, quality, now)
            })
            .collect();

        match admit_candidates(pool, variants, self.gate.min_quality, now) {
            Ok(admission) if admission.admitted.is_empty() => {
                debug!(
                    pool = %pool.key,
                    trigger,
                    duplicates = admission.duplicates,
                    below_quality = admission.below_quality,
                    "no usable candidates"
                );
                Step::Skip(SkipReason::NoUniqueGenerated)
            }
            Ok(admission) => {
                debug!(pool = %pool.key, trigger, need, admitted = admission.admitted.len(), "regenerating");
                Step::Add(admission)
            }
            Err(e) => Step::Skip(SkipReason::from_error(&e)),
        }
    }

    fn added(&self, key: &PoolKey, strategy: &str, admission: Admission) -> RegenerationOutcome {
        let added = admission.admitted.len();
        metrics::counter!("regeneration.added").increment(added as u64);
        info!(pool = %key, added, strategy, "pool regenerated");
        self.audit.emit(AuditRecord::new(
            key.clone(),
            AuditKind::Regenerated {
                added,
                strategy: strategy.to_string(),
                variant_ids: admission.admitted.clone(),
            },
            Utc::now(),
        ));
        RegenerationOutcome::Added {
            added,
            strategy: strategy.to_string(),
            variant_ids: admission.admitted,
        }
    }

    fn skipped(&self, key: &PoolKey, reason: SkipReason) -> RegenerationOutcome {
        metrics::counter!("regeneration.skipped").increment(1);
        if reason != SkipReason::NotTriggered {
            info!(pool = %key, %reason, "regeneration skipped");
            self.audit.emit(AuditRecord::new(
                key.clone(),
                AuditKind::RegenerationSkipped {
                    reason: reason.as_str().to_string(),
                },
                Utc::now(),
            ));
        }
        RegenerationOutcome::Skipped { reason }
    }
}

/// Traits of the active variant with the best decayed CTR, if any has posts.
fn best_active_traits(pool: &Pool) -> Option<TraitVector> {
    pool.active()
        .filter(|v| v.decayed_posts > 0.0)
        .max_by(|a, b| {
            a.decayed_ctr()
                .partial_cmp(&b.decayed_ctr())
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|v| v.traits)
}
