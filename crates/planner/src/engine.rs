use std::time::Instant;

use chrono::Utc;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use variant_core::config::ExperimentConfig;
use variant_core::{SeedTraits, SimulationResult, Variant, VariantError, VariantResult};

use crate::scorer::{HeuristicScorer, QualityGate};
use crate::simulator::MemeticSimulator;
use crate::strategy::{Candidate, GenerationRequest, StrategyRegistry};

/// The variant that planning starts from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BaseVariant {
    pub title: String,
    #[serde(default)]
    pub traits: SeedTraits,
}

impl BaseVariant {
    pub fn new(title: impl Into<String>, traits: SeedTraits) -> Self {
        Self {
            title: title.into(),
            traits,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanOptions {
    pub count: usize,
    pub magnitude: f64,
    pub strategy: String,
}

impl PlanOptions {
    pub fn from_config(config: &ExperimentConfig) -> Self {
        Self {
            count: config.candidate_count,
            magnitude: config.mutation_magnitude,
            strategy: config.generation_strategy.clone(),
        }
    }
}

impl Default for PlanOptions {
    fn default() -> Self {
        Self::from_config(&ExperimentConfig::default())
    }
}

/// A scored candidate. `variant` is still `proposed`; its quality score is
/// fixed here and carried into the pool on admission.
#[derive(Debug, Clone)]
pub struct PlannedVariant {
    pub variant: Variant,
    pub simulation: SimulationResult,
}

impl PlannedVariant {
    pub fn admissible(&self, gate: &QualityGate) -> bool {
        gate.admits(self.variant.quality_score())
    }
}

/// Generates, simulates, scores and ranks candidate variants.
#[derive(Clone)]
pub struct VariantPlanner {
    registry: StrategyRegistry,
    simulator: MemeticSimulator,
    scorer: HeuristicScorer,
    gate: QualityGate,
    resonance_weight: f64,
    heuristic_weight: f64,
}

impl VariantPlanner {
    pub fn new(
        registry: StrategyRegistry,
        simulator: MemeticSimulator,
        scorer: HeuristicScorer,
        gate: QualityGate,
        resonance_weight: f64,
        heuristic_weight: f64,
    ) -> Self {
        Self {
            registry,
            simulator,
            scorer,
            gate,
            resonance_weight,
            heuristic_weight,
        }
    }

    pub fn from_config(config: &ExperimentConfig, registry: StrategyRegistry) -> Self {
        Self::new(
            registry,
            MemeticSimulator::from_config(config),
            HeuristicScorer::default(),
            QualityGate::new(config.min_quality),
            config.resonance_weight,
            config.heuristic_weight,
        )
    }

    pub fn registry(&self) -> &StrategyRegistry {
        &self.registry
    }

    pub fn gate(&self) -> &QualityGate {
        &self.gate
    }

    /// Generate `options.count` candidates from `base` and rank them by
    /// combined score, highest first. Equal scores keep generation order.
    ///
    /// Missing seed traits fall back to defaults; a blank title is rejected.
    pub fn plan_variants(
        &self,
        base: &BaseVariant,
        options: &PlanOptions,
        rng: &mut dyn RngCore,
    ) -> VariantResult<Vec<PlannedVariant>> {
        let start = Instant::now();
        let strategy = self.registry.get(&options.strategy)?;
        let (traits, defaulted) = base.traits.resolve();
        if !defaulted.is_empty() {
            warn!(title = %base.title, ?defaulted, "seed traits missing, using defaults");
        }

        let request = GenerationRequest {
            title: &base.title,
            base: traits,
            count: options.count,
            magnitude: options.magnitude,
        };
        let candidates = strategy.generate(&request, rng)?;
        if candidates.len() != options.count {
            return Err(VariantError::GenerationExhausted(format!(
                "strategy '{}' produced {} of {} candidates",
                strategy.name(),
                candidates.len(),
                options.count
            )));
        }

        let mut planned: Vec<PlannedVariant> = candidates
            .into_iter()
            .map(|c| {
                let seed = rng.next_u64();
                self.evaluate(c, seed)
            })
            .collect();
        planned.sort_by(|a, b| {
            b.simulation
                .combined_score
                .partial_cmp(&a.simulation.combined_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        metrics::counter!("planner.candidates.evaluated").increment(planned.len() as u64);
        info!(
            strategy = strategy.name(),
            candidates = planned.len(),
            latency_us = start.elapsed().as_micros() as u64,
            "plan_variants complete"
        );
        Ok(planned)
    }

    /// Score one candidate. The simulation is seeded with `seed`.
    pub fn evaluate(&self, candidate: Candidate, seed: u64) -> PlannedVariant {
        let resonance_score = self.simulator.resonance(&candidate.traits, seed);
        let model_score = self.scorer.model_score(&candidate.traits);
        let quality = self.gate.quality(&candidate.value, &candidate.traits);
        PlannedVariant {
            variant: Variant::new(candidate.id, candidate.value, candidate.traits, quality, Utc::now()),
            simulation: SimulationResult {
                resonance_score,
                model_score,
                combined_score: self.resonance_weight * resonance_score
                    + self.heuristic_weight * model_score,
            },
        }
    }
}

impl Default for VariantPlanner {
    fn default() -> Self {
        Self::from_config(&ExperimentConfig::default(), StrategyRegistry::with_builtins())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use variant_core::VariantState;

    use crate::strategy::{GenerationStrategy, HeuristicStrategy};

    fn base() -> BaseVariant {
        BaseVariant::new(
            "Sunrise Timelapse",
            SeedTraits {
                hook_strength: Some(0.7),
                shareability: Some(0.2),
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_plan_ranks_descending() {
        let planner = VariantPlanner::default();
        let mut rng = StdRng::seed_from_u64(21);
        let planned = planner
            .plan_variants(&base(), &PlanOptions::default(), &mut rng)
            .unwrap();
        assert_eq!(planned.len(), 6);
        for pair in planned.windows(2) {
            assert!(pair[0].simulation.combined_score >= pair[1].simulation.combined_score);
        }
        for p in &planned {
            assert_eq!(p.variant.state(), VariantState::Proposed);
            assert!((0.0..=1.0).contains(&p.simulation.resonance_score));
            let expected = 0.7 * p.simulation.resonance_score + 0.3 * p.simulation.model_score;
            assert!((p.simulation.combined_score - expected).abs() < 1e-12);
        }
    }

    #[test]
    fn test_plan_is_reproducible() {
        let planner = VariantPlanner::default();
        let a = planner
            .plan_variants(&base(), &PlanOptions::default(), &mut StdRng::seed_from_u64(4))
            .unwrap();
        let b = planner
            .plan_variants(&base(), &PlanOptions::default(), &mut StdRng::seed_from_u64(4))
            .unwrap();
        let ids = |p: &[PlannedVariant]| p.iter().map(|v| v.variant.id).collect::<Vec<_>>();
        assert_eq!(ids(&a), ids(&b));
    }

    #[test]
    fn test_missing_traits_use_defaults() {
        let planner = VariantPlanner::default();
        let bare = BaseVariant::new("Just a title", SeedTraits::default());
        let options = PlanOptions {
            count: 3,
            ..PlanOptions::default()
        };
        let planned = planner
            .plan_variants(&bare, &options, &mut StdRng::seed_from_u64(0))
            .unwrap();
        assert_eq!(planned.len(), 3);
    }

    #[test]
    fn test_unknown_strategy() {
        let planner = VariantPlanner::default();
        let options = PlanOptions {
            strategy: "llm".into(),
            ..PlanOptions::default()
        };
        let err = planner
            .plan_variants(&base(), &options, &mut StdRng::seed_from_u64(0))
            .unwrap_err();
        assert!(matches!(err, VariantError::UnknownStrategy(_)));
    }

    #[test]
    fn test_ties_keep_generation_order() {
        let planner = VariantPlanner::new(
            StrategyRegistry::with_builtins(),
            MemeticSimulator::default(),
            HeuristicScorer::default(),
            QualityGate::new(45.0),
            0.0,
            0.0,
        );
        let planned = planner
            .plan_variants(&base(), &PlanOptions::default(), &mut StdRng::seed_from_u64(8))
            .unwrap();
        let generated = HeuristicStrategy
            .generate(
                &GenerationRequest {
                    title: "Sunrise Timelapse",
                    base: base().traits.resolve().0,
                    count: 6,
                    magnitude: 0.15,
                },
                &mut StdRng::seed_from_u64(8),
            )
            .unwrap();
        let planned_ids: Vec<_> = planned.iter().map(|p| p.variant.id).collect();
        let generated_ids: Vec<_> = generated.iter().map(|c| c.id).collect();
        assert_eq!(planned_ids, generated_ids);
    }
}
