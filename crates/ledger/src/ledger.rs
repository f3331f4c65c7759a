use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};
use variant_core::types::ArmStats;
use variant_core::{
    AppConfig, AuditRecord, AuditSink, EventType, Pool, PoolKey, StateTransition,
    TransitionTrigger, Variant, VariantError, VariantId, VariantResult, VariantState,
};

use crate::decay::{self, DecayCurve};
use crate::health::{self, HealthPolicy};
use crate::store::{transact, PoolStore, RetryPolicy};

/// Outcome of admitting a batch of candidates into a pool.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Admission {
    pub admitted: Vec<VariantId>,
    pub below_quality: usize,
    pub duplicates: usize,
}

/// Admit candidates that clear `min_quality` and whose value is not already
/// in the pool. Rejects are dropped silently.
pub fn admit_candidates(
    pool: &mut Pool,
    candidates: Vec<Variant>,
    min_quality: f64,
    now: DateTime<Utc>,
) -> VariantResult<Admission> {
    let mut admission = Admission::default();
    for mut candidate in candidates {
        if candidate.quality_score() < min_quality {
            admission.below_quality += 1;
            continue;
        }
        if pool.contains_value(&candidate.value) || pool.variant(&candidate.id).is_some() {
            admission.duplicates += 1;
            continue;
        }
        if candidate.state() == VariantState::Proposed {
            candidate.transition(VariantState::Active, TransitionTrigger::Admitted, now)?;
        }
        admission.admitted.push(candidate.id);
        pool.push(candidate)?;
    }
    pool.updated_at = now;
    Ok(admission)
}

/// Persists and decays per-variant counters and applies health transitions.
///
/// Every mutation is an optimistic transaction on the pool; at most one
/// variant changes state per call.
pub struct MetricsLedger {
    store: Arc<dyn PoolStore>,
    curve: DecayCurve,
    health: HealthPolicy,
    retry: RetryPolicy,
    audit: Arc<dyn AuditSink>,
}

impl MetricsLedger {
    pub fn new(
        store: Arc<dyn PoolStore>,
        curve: DecayCurve,
        health: HealthPolicy,
        retry: RetryPolicy,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            store,
            curve,
            health,
            retry,
            audit,
        }
    }

    pub fn from_config(
        store: Arc<dyn PoolStore>,
        config: &AppConfig,
        audit: Arc<dyn AuditSink>,
    ) -> VariantResult<Self> {
        Ok(Self::new(
            store,
            DecayCurve::from_config(&config.ledger)?,
            HealthPolicy::from_config(&config.health),
            RetryPolicy::from_config(&config.ledger),
            audit,
        ))
    }

    pub fn store(&self) -> &Arc<dyn PoolStore> {
        &self.store
    }

    pub fn snapshot(&self, key: &PoolKey) -> VariantResult<Pool> {
        self.store
            .load(key)?
            .ok_or_else(|| VariantError::PoolNotFound(key.to_string()))
    }

    /// Create a pool from seed variants. Proposed seeds are admitted as
    /// active; duplicate values are rejected.
    pub fn create_pool(
        &self,
        key: &PoolKey,
        seeds: Vec<Variant>,
        now: DateTime<Utc>,
    ) -> VariantResult<Pool> {
        let mut pool = Pool::new(key.clone(), now);
        for mut seed in seeds {
            if seed.state() == VariantState::Proposed {
                seed.transition(VariantState::Active, TransitionTrigger::Admitted, now)?;
            }
            pool.push(seed)?;
        }
        pool.version = self.store.commit(&pool)?;
        info!(pool = %key, variants = pool.variants.len(), "created variant pool");
        Ok(pool)
    }

    pub fn record(
        &self,
        key: &PoolKey,
        variant_id: &VariantId,
        event: EventType,
    ) -> VariantResult<Option<StateTransition>> {
        self.record_at(key, variant_id, event, Utc::now())
    }

    /// Increment the raw counter for `event`. Clicks and posts also decay the
    /// variant to `now`, bump the decayed counter, and re-assess its health.
    pub fn record_at(
        &self,
        key: &PoolKey,
        variant_id: &VariantId,
        event: EventType,
        now: DateTime<Utc>,
    ) -> VariantResult<Option<StateTransition>> {
        let transition = transact(self.store.as_ref(), key, self.retry, |pool| {
            let variant = pool.variant_mut(variant_id)?;
            match event {
                EventType::Impression => {
                    variant.impressions += 1;
                    return Ok(None);
                }
                EventType::Click => {
                    decay::apply(variant, &self.curve, now);
                    variant.clicks += 1;
                    variant.decayed_clicks += 1.0;
                }
                EventType::Post => {
                    decay::apply(variant, &self.curve, now);
                    variant.posts += 1;
                    variant.decayed_posts += 1.0;
                }
            }
            pool.updated_at = now;
            self.reassess(pool, variant_id, now)
        })?;

        metrics::counter!("ledger.events.recorded").increment(1);
        debug!(pool = %key, %variant_id, ?event, "recorded event");
        if let Some(t) = &transition {
            self.emit_transition(key, t.clone(), now);
        }
        Ok(transition)
    }

    fn reassess(
        &self,
        pool: &mut Pool,
        variant_id: &VariantId,
        now: DateTime<Utc>,
    ) -> VariantResult<Option<StateTransition>> {
        let median = health::median_decayed_ctr(pool);
        let variant = pool.variant_mut(variant_id)?;
        let verdict = self.health.assess(variant, median);
        if verdict.spiked {
            variant.anomaly_strikes += 1;
        }
        match verdict.transition {
            Some((to, trigger)) => variant.transition(to, trigger, now).map(Some),
            None => Ok(None),
        }
    }

    /// Decay one variant to `now`. Returns whether anything changed.
    pub fn decay(
        &self,
        key: &PoolKey,
        variant_id: &VariantId,
        now: DateTime<Utc>,
    ) -> VariantResult<bool> {
        transact(self.store.as_ref(), key, self.retry, |pool| {
            let variant = pool.variant_mut(variant_id)?;
            Ok(decay::apply(variant, &self.curve, now))
        })
    }

    /// Decay every variant of the pool to `now`. Returns how many moved.
    pub fn decay_pool(&self, key: &PoolKey, now: DateTime<Utc>) -> VariantResult<usize> {
        let decayed = transact(self.store.as_ref(), key, self.retry, |pool| {
            Ok(pool
                .variants
                .iter_mut()
                .map(|v| decay::apply(v, &self.curve, now))
                .filter(|moved| *moved)
                .count())
        })?;
        debug!(pool = %key, decayed, "decayed pool");
        Ok(decayed)
    }

    /// Record an observed bandit reward in `[0, 1]` for a served variant.
    pub fn record_outcome(
        &self,
        key: &PoolKey,
        variant_id: &VariantId,
        reward: f64,
    ) -> VariantResult<ArmStats> {
        if !(reward.is_finite() && (0.0..=1.0).contains(&reward)) {
            return Err(VariantError::Validation(format!(
                "reward must be within [0, 1], got {reward}"
            )));
        }
        let arm = transact(self.store.as_ref(), key, self.retry, |pool| {
            pool.variant_mut(variant_id)?;
            pool.bandit.record(*variant_id, reward);
            Ok(pool.bandit.arm(variant_id))
        })?;
        metrics::counter!("ledger.outcomes.recorded").increment(1);
        Ok(arm)
    }

    /// Admit candidates in one commit.
    pub fn admit(
        &self,
        key: &PoolKey,
        candidates: Vec<Variant>,
        min_quality: f64,
        now: DateTime<Utc>,
    ) -> VariantResult<Admission> {
        let admission = transact(self.store.as_ref(), key, self.retry, |pool| {
            admit_candidates(pool, candidates.clone(), min_quality, now)
        })?;
        info!(
            pool = %key,
            admitted = admission.admitted.len(),
            below_quality = admission.below_quality,
            duplicates = admission.duplicates,
            "admitted candidates"
        );
        Ok(admission)
    }

    pub fn quarantine(&self, key: &PoolKey, variant_id: &VariantId) -> VariantResult<StateTransition> {
        self.operator_transition(
            key,
            variant_id,
            VariantState::Quarantined,
            TransitionTrigger::OperatorQuarantine,
        )
    }

    pub fn unsuppress(&self, key: &PoolKey, variant_id: &VariantId) -> VariantResult<StateTransition> {
        self.operator_transition(
            key,
            variant_id,
            VariantState::Active,
            TransitionTrigger::OperatorUnsuppress,
        )
    }

    /// Return an anomalous variant to service and reset its strikes.
    pub fn clear_anomaly(
        &self,
        key: &PoolKey,
        variant_id: &VariantId,
    ) -> VariantResult<StateTransition> {
        self.operator_transition(
            key,
            variant_id,
            VariantState::Active,
            TransitionTrigger::OperatorClearAnomaly,
        )
    }

    fn operator_transition(
        &self,
        key: &PoolKey,
        variant_id: &VariantId,
        to: VariantState,
        trigger: TransitionTrigger,
    ) -> VariantResult<StateTransition> {
        let now = Utc::now();
        let transition = transact(self.store.as_ref(), key, self.retry, |pool| {
            let variant = pool.variant_mut(variant_id)?;
            let t = variant.transition(to, trigger, now)?;
            if trigger == TransitionTrigger::OperatorClearAnomaly {
                variant.anomaly_strikes = 0;
            }
            pool.updated_at = now;
            Ok(t)
        })?;
        self.emit_transition(key, transition.clone(), now);
        Ok(transition)
    }

    fn emit_transition(&self, key: &PoolKey, transition: StateTransition, now: DateTime<Utc>) {
        info!(
            pool = %key,
            variant_id = %transition.variant_id,
            from = %transition.from,
            to = %transition.to,
            trigger = %transition.trigger,
            "variant state changed"
        );
        metrics::counter!("ledger.transitions").increment(1);
        self.audit
            .emit(AuditRecord::new(key.clone(), transition.into(), now));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryPoolStore;
    use chrono::Duration;
    use uuid::Uuid;
    use variant_core::{AuditKind, MemoryAuditSink, TraitVector};

    fn setup(values: &[&str]) -> (MetricsLedger, Arc<MemoryAuditSink>, PoolKey, Vec<VariantId>) {
        let store = Arc::new(InMemoryPoolStore::new());
        let audit = Arc::new(MemoryAuditSink::new());
        let ledger = MetricsLedger::new(
            store,
            DecayCurve::default(),
            HealthPolicy::default(),
            RetryPolicy::default(),
            audit.clone(),
        );
        let key = PoolKey::new("content-1", "tiktok");
        let now = Utc::now();
        let seeds: Vec<Variant> = values
            .iter()
            .map(|v| Variant::new(Uuid::new_v4(), *v, TraitVector::default(), 60.0, now))
            .collect();
        let ids = seeds.iter().map(|v| v.id).collect();
        ledger.create_pool(&key, seeds, now).unwrap();
        (ledger, audit, key, ids)
    }

    #[test]
    fn test_create_pool_admits_seeds() {
        let (ledger, _, key, _) = setup(&["a", "b"]);
        let pool = ledger.snapshot(&key).unwrap();
        assert_eq!(pool.active_count(), 2);
        assert_eq!(pool.version, 1);
        // A second create for the same key conflicts.
        assert!(ledger.create_pool(&key, vec![], Utc::now()).unwrap_err().is_conflict());
    }

    #[test]
    fn test_record_increments_counters() {
        let (ledger, _, key, ids) = setup(&["a", "b"]);
        let now = Utc::now();
        ledger.record_at(&key, &ids[0], EventType::Impression, now).unwrap();
        ledger.record_at(&key, &ids[0], EventType::Impression, now).unwrap();
        ledger.record_at(&key, &ids[0], EventType::Post, now).unwrap();
        ledger.record_at(&key, &ids[0], EventType::Click, now).unwrap();

        let pool = ledger.snapshot(&key).unwrap();
        let v = pool.variant(&ids[0]).unwrap();
        assert_eq!((v.impressions, v.posts, v.clicks), (2, 1, 1));
        assert!((v.decayed_posts - 1.0).abs() < 1e-9);
        assert!((v.decayed_clicks - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_record_unknown_variant() {
        let (ledger, _, key, _) = setup(&["a"]);
        let err = ledger.record(&key, &Uuid::new_v4(), EventType::Click).unwrap_err();
        assert!(matches!(err, VariantError::VariantNotFound(_)));
    }

    #[test]
    fn test_concurrent_records_are_not_lost() {
        let (ledger, _, key, ids) = setup(&["a"]);
        let ledger = Arc::new(ledger);
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let ledger = ledger.clone();
                let key = key.clone();
                let id = ids[0];
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        let mut attempts = 0;
                        loop {
                            match ledger.record(&key, &id, EventType::Impression) {
                                Ok(_) => break,
                                Err(e) if e.is_conflict() && attempts < 100 => attempts += 1,
                                Err(e) => panic!("{e}"),
                            }
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let pool = ledger.snapshot(&key).unwrap();
        assert_eq!(pool.variant(&ids[0]).unwrap().impressions, 100);
    }

    #[test]
    fn test_decay_is_idempotent_per_tick() {
        let (ledger, _, key, ids) = setup(&["a"]);
        let start = Utc::now();
        ledger.record_at(&key, &ids[0], EventType::Post, start).unwrap();
        let tick = start + Duration::minutes(720);
        assert!(ledger.decay(&key, &ids[0], tick).unwrap());
        assert!(!ledger.decay(&key, &ids[0], tick).unwrap());
        assert_eq!(ledger.decay_pool(&key, tick).unwrap(), 0);
        let pool = ledger.snapshot(&key).unwrap();
        let v = pool.variant(&ids[0]).unwrap();
        assert!((v.decayed_posts - 0.5).abs() < 1e-9);
        assert_eq!(v.posts, 1);
    }

    #[test]
    fn test_decay_pool_counts_moved_variants() {
        let (ledger, _, key, _) = setup(&["a", "b", "c"]);
        let tick = Utc::now() + Duration::minutes(60);
        assert_eq!(ledger.decay_pool(&key, tick).unwrap(), 3);
        assert_eq!(ledger.decay_pool(&key, tick).unwrap(), 0);
        let pool = ledger.snapshot(&key).unwrap();
        assert!(pool.variants.iter().all(|v| v.last_decay_at == tick));
    }

    #[test]
    fn test_posts_before_clicks_stay_active() {
        let (ledger, _, key, ids) = setup(&["a", "b"]);
        let now = Utc::now();
        for _ in 0..5 {
            assert_eq!(ledger.record_at(&key, &ids[0], EventType::Post, now).unwrap(), None);
        }
        for _ in 0..3 {
            ledger.record_at(&key, &ids[0], EventType::Click, now).unwrap();
        }
        let pool = ledger.snapshot(&key).unwrap();
        let v = pool.variant(&ids[0]).unwrap();
        assert_eq!(v.state(), VariantState::Active);
        assert_eq!((v.clicks, v.posts), (3, 5));
    }

    #[test]
    fn test_enabled_suppression_waits_for_impressions() {
        let store = Arc::new(InMemoryPoolStore::new());
        let policy = HealthPolicy {
            suppression_enabled: true,
            ..HealthPolicy::default()
        };
        let ledger = MetricsLedger::new(
            store,
            DecayCurve::default(),
            policy,
            RetryPolicy::default(),
            Arc::new(MemoryAuditSink::new()),
        );
        let key = PoolKey::new("content-2", "youtube");
        let now = Utc::now();
        let seed = Variant::new(Uuid::new_v4(), "quiet", TraitVector::default(), 60.0, now);
        let id = seed.id;
        ledger.create_pool(&key, vec![seed], now).unwrap();

        for _ in 0..5 {
            assert_eq!(ledger.record_at(&key, &id, EventType::Post, now).unwrap(), None);
        }
        for _ in 0..50 {
            ledger.record_at(&key, &id, EventType::Impression, now).unwrap();
        }
        let t = ledger.record_at(&key, &id, EventType::Post, now).unwrap();
        assert_eq!(t.map(|t| t.to), Some(VariantState::Suppressed));
    }

    #[test]
    fn test_spike_marks_anomalous_and_audits() {
        let (ledger, audit, key, ids) = setup(&["a", "b", "c"]);
        let now = Utc::now();
        // Baselines: 1 click per 10 posts on b and c. The click lands first so
        // neither trips the underperformer rule on the way.
        for id in &ids[1..] {
            ledger.record_at(&key, id, EventType::Click, now).unwrap();
            for _ in 0..10 {
                ledger.record_at(&key, id, EventType::Post, now).unwrap();
            }
        }
        // a: 3 posts, 2 clicks -> ctr 0.67 vs median 0.1.
        for _ in 0..3 {
            ledger.record_at(&key, &ids[0], EventType::Post, now).unwrap();
        }
        ledger.record_at(&key, &ids[0], EventType::Click, now).unwrap();
        let t = ledger.record_at(&key, &ids[0], EventType::Click, now).unwrap();
        assert_eq!(t.map(|t| t.to), Some(VariantState::Anomalous));

        let pool = ledger.snapshot(&key).unwrap();
        assert_eq!(pool.variant(&ids[0]).unwrap().state(), VariantState::Anomalous);
        assert_eq!(pool.active_count(), 2);
        assert!(audit
            .records()
            .iter()
            .any(|r| matches!(r.kind, AuditKind::StateChanged { to: VariantState::Anomalous, .. })));

        let cleared = ledger.clear_anomaly(&key, &ids[0]).unwrap();
        assert_eq!(cleared.to, VariantState::Active);
        assert_eq!(ledger.snapshot(&key).unwrap().variant(&ids[0]).unwrap().anomaly_strikes, 0);
    }

    #[test]
    fn test_operator_quarantine_is_final() {
        let (ledger, _, key, ids) = setup(&["a", "b"]);
        ledger.quarantine(&key, &ids[1]).unwrap();
        let err = ledger.unsuppress(&key, &ids[1]).unwrap_err();
        assert!(matches!(err, VariantError::InvalidTransition { .. }));
        assert_eq!(ledger.snapshot(&key).unwrap().excluded_count(), 1);
    }

    #[test]
    fn test_record_outcome_validates_reward() {
        let (ledger, _, key, ids) = setup(&["a"]);
        assert!(ledger.record_outcome(&key, &ids[0], 1.5).is_err());
        assert!(ledger.record_outcome(&key, &ids[0], f64::NAN).is_err());
        let arm = ledger.record_outcome(&key, &ids[0], 1.0).unwrap();
        assert_eq!(arm.trials, 1);
        let arm = ledger.record_outcome(&key, &ids[0], 0.0).unwrap();
        assert_eq!(arm.trials, 2);
        assert_eq!(arm.mean_reward(), 0.5);
    }

    #[test]
    fn test_admit_gates_quality_and_dedups() {
        let (ledger, _, key, _) = setup(&["a"]);
        let now = Utc::now();
        let candidates = vec![
            Variant::new(Uuid::new_v4(), "a", TraitVector::default(), 90.0, now),
            Variant::new(Uuid::new_v4(), "fresh", TraitVector::default(), 80.0, now),
            Variant::new(Uuid::new_v4(), "weak", TraitVector::default(), 20.0, now),
        ];
        let admission = ledger.admit(&key, candidates, 45.0, now).unwrap();
        assert_eq!(admission.admitted.len(), 1);
        assert_eq!(admission.duplicates, 1);
        assert_eq!(admission.below_quality, 1);
        let pool = ledger.snapshot(&key).unwrap();
        assert_eq!(pool.active_count(), 2);
        assert!(pool.contains_value("fresh"));
    }
}
