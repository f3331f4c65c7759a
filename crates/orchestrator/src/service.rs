use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::RngCore;
use tracing::info;
use variant_core::types::ArmStats;
use variant_core::{
    AppConfig, AuditKind, AuditRecord, AuditSink, ConfidenceMethod, ConfidenceReport, EventType,
    Pool, PoolKey, StateTransition, Variant, VariantError, VariantId, VariantMetrics,
    VariantResult,
};
use variant_ledger::{MetricsLedger, PoolStore, RetryPolicy};
use variant_planner::{BaseVariant, PlanOptions, PlannedVariant, StrategyRegistry, VariantPlanner};
use variant_selection::{select_with_rng, SelectionStrategy};
use variant_stats::{calculate_bayesian_confidence, calculate_confidence_for_variants, Decision, DecisionEngine};

use crate::catalog::ContentCatalog;
use crate::regenerator::{RegenerationOutcome, RegenerationPolicy, Regenerator};

/// Entry point for callers: plans, seeds, serves, records, evaluates and
/// regenerates variant pools.
pub struct ExperimentService {
    config: AppConfig,
    ledger: MetricsLedger,
    planner: VariantPlanner,
    selection: SelectionStrategy,
    decision: DecisionEngine,
    regenerator: Regenerator,
    catalog: Arc<dyn ContentCatalog>,
    audit: Arc<dyn AuditSink>,
}

impl ExperimentService {
    pub fn new(
        config: AppConfig,
        store: Arc<dyn PoolStore>,
        catalog: Arc<dyn ContentCatalog>,
        audit: Arc<dyn AuditSink>,
    ) -> VariantResult<Self> {
        Self::with_registry(config, store, catalog, audit, StrategyRegistry::with_builtins())
    }

    /// Like [`ExperimentService::new`] with extra generation strategies.
    pub fn with_registry(
        config: AppConfig,
        store: Arc<dyn PoolStore>,
        catalog: Arc<dyn ContentCatalog>,
        audit: Arc<dyn AuditSink>,
        registry: StrategyRegistry,
    ) -> VariantResult<Self> {
        // Fail at startup rather than on the first request.
        registry.get(&config.experiment.generation_strategy)?;
        let selection = SelectionStrategy::from_config(&config.selection)?;
        let ledger = MetricsLedger::from_config(store.clone(), &config, audit.clone())?;
        let planner = VariantPlanner::from_config(&config.experiment, registry.clone());
        let regenerator = Regenerator::new(
            store,
            catalog.clone(),
            registry,
            *planner.gate(),
            RegenerationPolicy::from_config(&config.experiment),
            RetryPolicy::from_config(&config.ledger),
            audit.clone(),
        );
        let decision = DecisionEngine::from_config(&config.decision, &config.experiment);

        info!(
            strategy = %config.experiment.generation_strategy,
            selection = selection.name(),
            "experiment service ready"
        );
        Ok(Self {
            config,
            ledger,
            planner,
            selection,
            decision,
            regenerator,
            catalog,
            audit,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn ledger(&self) -> &MetricsLedger {
        &self.ledger
    }

    pub fn plan_variants(
        &self,
        base: &BaseVariant,
        options: &PlanOptions,
        rng: &mut dyn RngCore,
    ) -> VariantResult<Vec<PlannedVariant>> {
        self.planner.plan_variants(base, options, rng)
    }

    /// Plan variants from the catalog entry and create the pool from those
    /// that clear the quality gate.
    pub fn seed_pool(&self, key: &PoolKey, rng: &mut dyn RngCore) -> VariantResult<Pool> {
        let context = self
            .catalog
            .context(&key.content_id)
            .ok_or_else(|| VariantError::InvalidBaseVariant(format!("no catalog entry for {}", key.content_id)))?;
        let base = BaseVariant::new(context.title, context.seed_traits);
        let planned = self.plan_variants(&base, &PlanOptions::from_config(&self.config.experiment), rng)?;

        let gate = *self.planner.gate();
        let mut seeds: Vec<Variant> = Vec::new();
        for planned in planned {
            if planned.admissible(&gate) && !seeds.iter().any(|s| s.value == planned.variant.value) {
                seeds.push(planned.variant);
            }
        }
        if seeds.is_empty() {
            return Err(VariantError::GenerationExhausted(format!(
                "no candidate for {key} cleared quality {}",
                gate.min_quality
            )));
        }
        self.ledger.create_pool(key, seeds, Utc::now())
    }

    pub fn select(&self, key: &PoolKey, rng: &mut dyn RngCore) -> VariantResult<VariantId> {
        let pool = self.ledger.snapshot(key)?;
        select_with_rng(&pool, &self.selection, rng)
    }

    pub fn record_event(
        &self,
        key: &PoolKey,
        variant_id: &VariantId,
        event: EventType,
    ) -> VariantResult<Option<StateTransition>> {
        self.ledger.record(key, variant_id, event)
    }

    /// Same as `record_event`, stamped with a caller-supplied clock.
    pub fn record_event_at(
        &self,
        key: &PoolKey,
        variant_id: &VariantId,
        event: EventType,
        now: DateTime<Utc>,
    ) -> VariantResult<Option<StateTransition>> {
        self.ledger.record_at(key, variant_id, event, now)
    }

    pub fn record_outcome(
        &self,
        key: &PoolKey,
        variant_id: &VariantId,
        reward: f64,
    ) -> VariantResult<ArmStats> {
        self.ledger.record_outcome(key, variant_id, reward)
    }

    pub fn decay(&self, key: &PoolKey, now: DateTime<Utc>) -> VariantResult<usize> {
        self.ledger.decay_pool(key, now)
    }

    /// Clicks over impressions of the pool's active variants.
    pub fn active_metrics(&self, key: &PoolKey) -> VariantResult<Vec<VariantMetrics>> {
        let pool = self.ledger.snapshot(key)?;
        Ok(pool.active().map(|v| v.metrics()).collect())
    }

    pub fn calculate_confidence(
        &self,
        key: &PoolKey,
        method: ConfidenceMethod,
        rng: &mut dyn RngCore,
    ) -> VariantResult<ConfidenceReport> {
        let metrics = self.active_metrics(key)?;
        match method {
            ConfidenceMethod::Frequentist => calculate_confidence_for_variants(&metrics),
            ConfidenceMethod::Bayesian => {
                calculate_bayesian_confidence(&metrics, self.decision.posterior_samples, rng)
            }
        }
    }

    /// Run the decision engine over the active variants and audit the result.
    pub fn evaluate(&self, key: &PoolKey, rng: &mut dyn RngCore) -> VariantResult<Decision> {
        let metrics = self.active_metrics(key)?;
        let decision = self.decision.evaluate(&metrics, rng)?;
        let reason = match &decision {
            Decision::KeepServing { reason, .. } => Some(reason.clone()),
            Decision::Winner { .. } => None,
        };
        self.audit.emit(AuditRecord::new(
            key.clone(),
            AuditKind::Decision {
                winner: decision.winner(),
                reason,
                reports: decision.reports().to_vec(),
            },
            Utc::now(),
        ));
        Ok(decision)
    }

    pub fn regenerate_if_needed(&self, key: &PoolKey, rng: &mut dyn RngCore) -> RegenerationOutcome {
        self.regenerator.regenerate_if_needed(key, rng)
    }

    pub fn quarantine(&self, key: &PoolKey, variant_id: &VariantId) -> VariantResult<StateTransition> {
        self.ledger.quarantine(key, variant_id)
    }

    pub fn unsuppress(&self, key: &PoolKey, variant_id: &VariantId) -> VariantResult<StateTransition> {
        self.ledger.unsuppress(key, variant_id)
    }

    pub fn clear_anomaly(&self, key: &PoolKey, variant_id: &VariantId) -> VariantResult<StateTransition> {
        self.ledger.clear_anomaly(key, variant_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ContentContext, InMemoryCatalog};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use variant_core::MemoryAuditSink;
    use variant_ledger::InMemoryPoolStore;
    use variant_planner::{Candidate, GenerationRequest, GenerationStrategy};

    /// Emits candidates with blank values, which never clear the gate.
    struct BlankStrategy;

    impl GenerationStrategy for BlankStrategy {
        fn name(&self) -> &str {
            "blank"
        }

        fn generate(
            &self,
            request: &GenerationRequest<'_>,
            rng: &mut dyn RngCore,
        ) -> VariantResult<Vec<Candidate>> {
            Ok((0..request.count)
                .map(|_| Candidate {
                    id: uuid::Uuid::from_u64_pair(rng.next_u64(), rng.next_u64()),
                    value: String::new(),
                    traits: request.base,
                })
                .collect())
        }
    }

    fn service_with(config: AppConfig, registry: StrategyRegistry) -> (ExperimentService, Arc<MemoryAuditSink>) {
        let catalog = InMemoryCatalog::new();
        catalog.insert("clip-7", ContentContext::new("Sunset Timelapse"));
        let audit = Arc::new(MemoryAuditSink::new());
        let service = ExperimentService::with_registry(
            config,
            Arc::new(InMemoryPoolStore::new()),
            Arc::new(catalog),
            audit.clone(),
            registry,
        )
        .unwrap();
        (service, audit)
    }

    fn service() -> (ExperimentService, Arc<MemoryAuditSink>) {
        service_with(AppConfig::default(), StrategyRegistry::with_builtins())
    }

    #[test]
    fn test_unknown_strategy_rejected_at_startup() {
        let mut config = AppConfig::default();
        config.experiment.generation_strategy = "llm".into();
        let result = ExperimentService::new(
            config,
            Arc::new(InMemoryPoolStore::new()),
            Arc::new(InMemoryCatalog::new()),
            Arc::new(MemoryAuditSink::new()),
        );
        assert!(matches!(result, Err(VariantError::UnknownStrategy(_))));
    }

    #[test]
    fn test_seed_pool_admits_unique_quality_variants() {
        let (service, _) = service();
        let key = PoolKey::new("clip-7", "tiktok");
        let pool = service.seed_pool(&key, &mut StdRng::seed_from_u64(11)).unwrap();

        assert!(!pool.variants.is_empty());
        assert!(pool.variants.iter().all(|v| v.is_active()));
        assert!(pool.variants.iter().all(|v| v.quality_score() >= 45.0));
        let mut values: Vec<_> = pool.variants.iter().map(|v| v.value.as_str()).collect();
        values.sort_unstable();
        values.dedup();
        assert_eq!(values.len(), pool.variants.len());
    }

    #[test]
    fn test_seed_pool_unknown_content() {
        let (service, _) = service();
        let result = service.seed_pool(&PoolKey::new("missing", "tiktok"), &mut StdRng::seed_from_u64(1));
        assert!(matches!(result, Err(VariantError::InvalidBaseVariant(_))));
    }

    #[test]
    fn test_seed_pool_exhausted_when_nothing_qualifies() {
        let mut registry = StrategyRegistry::with_builtins();
        registry.register(Arc::new(BlankStrategy));
        let mut config = AppConfig::default();
        config.experiment.generation_strategy = "blank".into();
        let (service, _) = service_with(config, registry);

        let result = service.seed_pool(&PoolKey::new("clip-7", "tiktok"), &mut StdRng::seed_from_u64(1));
        assert!(matches!(result, Err(VariantError::GenerationExhausted(_))));
    }

    #[test]
    fn test_select_and_record_round() {
        let (service, _) = service();
        let key = PoolKey::new("clip-7", "youtube");
        let mut rng = StdRng::seed_from_u64(3);
        let pool = service.seed_pool(&key, &mut rng).unwrap();

        let chosen = service.select(&key, &mut rng).unwrap();
        assert!(pool.variant(&chosen).is_some());
        service.record_event(&key, &chosen, EventType::Impression).unwrap();
        let arm = service.record_outcome(&key, &chosen, 1.0).unwrap();
        assert_eq!(arm.trials, 1);

        let snapshot = service.ledger().snapshot(&key).unwrap();
        assert_eq!(snapshot.variant(&chosen).unwrap().impressions, 1);
        assert_eq!(snapshot.bandit.total_trials(), 1);
    }

    #[test]
    fn test_events_and_decay_share_the_callers_clock() {
        let (service, _) = service();
        let key = PoolKey::new("clip-7", "facebook");
        let mut rng = StdRng::seed_from_u64(5);
        let pool = service.seed_pool(&key, &mut rng).unwrap();
        let clicked = pool.variants[0].id;
        let later = Utc::now() + chrono::Duration::minutes(10);

        service
            .record_event_at(&key, &clicked, EventType::Click, later)
            .unwrap();
        let snapshot = service.ledger().snapshot(&key).unwrap();
        assert_eq!(snapshot.updated_at, later);
        assert_eq!(snapshot.variant(&clicked).unwrap().last_decay_at, later);

        // The clicked variant is already at `later`.
        assert_eq!(service.decay(&key, later).unwrap(), pool.variants.len() - 1);
    }

    #[test]
    fn test_evaluate_without_data_keeps_serving_and_audits() {
        let (service, audit) = service();
        let key = PoolKey::new("clip-7", "youtube");
        let mut rng = StdRng::seed_from_u64(4);
        service.seed_pool(&key, &mut rng).unwrap();

        let decision = service.evaluate(&key, &mut rng).unwrap();
        assert_eq!(decision.winner(), None);
        let records = audit.records();
        let last = records.last().unwrap();
        assert!(matches!(
            &last.kind,
            AuditKind::Decision { winner: None, reason: Some(reason), .. } if reason.starts_with("insufficient_data")
        ));
    }

    #[test]
    fn test_confidence_needs_two_viewed_variants() {
        let (service, _) = service();
        let key = PoolKey::new("clip-7", "youtube");
        let mut rng = StdRng::seed_from_u64(8);
        service.seed_pool(&key, &mut rng).unwrap();
        let result = service.calculate_confidence(&key, ConfidenceMethod::Frequentist, &mut rng);
        assert!(matches!(result, Err(VariantError::InsufficientData(_))));
    }
}
