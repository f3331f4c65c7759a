use serde::{Deserialize, Serialize};
use variant_core::TraitVector;

/// Weights of the linear heuristic model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeuristicWeights {
    pub hook_strength: f64,
    pub shareability: f64,
    pub cta_intensity: f64,
    pub remix_probability: f64,
    pub tempo: f64,
}

impl Default for HeuristicWeights {
    fn default() -> Self {
        Self {
            hook_strength: 1.2,
            shareability: 1.5,
            cta_intensity: 0.4,
            remix_probability: 0.8,
            tempo: 0.3,
        }
    }
}

/// Scores candidates with a weighted sum over their traits.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HeuristicScorer {
    weights: HeuristicWeights,
}

impl HeuristicScorer {
    pub fn new(weights: HeuristicWeights) -> Self {
        Self { weights }
    }

    /// Non-negative and unbounded above as weights grow.
    pub fn model_score(&self, traits: &TraitVector) -> f64 {
        let w = &self.weights;
        w.hook_strength * traits.hook_strength
            + w.shareability * traits.shareability
            + w.cta_intensity * traits.cta_intensity
            + w.remix_probability * traits.remix_probability
            + w.tempo * traits.tempo
    }
}

/// Admission gate over a 0..=100 quality heuristic.
///
/// The heuristic favours strong hooks, a moderate CTA, and a tempo close to
/// natural speed. Shareability and remix probability contribute with
/// diminishing returns.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityGate {
    pub min_quality: f64,
}

impl QualityGate {
    pub fn new(min_quality: f64) -> Self {
        Self { min_quality }
    }

    pub fn quality(&self, value: &str, traits: &TraitVector) -> f64 {
        if value.trim().is_empty() {
            return 0.0;
        }
        let cta_balance = 1.0 - ((traits.cta_intensity - 0.5).abs() * 2.0);
        let tempo_fit = (1.0 - (traits.tempo - 1.0).abs() / 0.4).max(0.0);
        let raw = 0.45 * traits.hook_strength
            + 0.15 * traits.shareability.sqrt()
            + 0.15 * cta_balance
            + 0.10 * traits.remix_probability.sqrt()
            + 0.15 * tempo_fit;
        (raw * 100.0).clamp(0.0, 100.0)
    }

    pub fn admits(&self, quality: f64) -> bool {
        quality >= self.min_quality
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_score_rewards_engagement_traits() {
        let scorer = HeuristicScorer::default();
        let base = TraitVector::default();
        let better = TraitVector {
            hook_strength: 0.9,
            shareability: 0.3,
            ..base
        };
        assert!(scorer.model_score(&better) > scorer.model_score(&base));
        assert!(scorer.model_score(&base) > 0.0);
    }

    #[test]
    fn test_quality_bounds() {
        let gate = QualityGate::new(45.0);
        let best = TraitVector {
            hook_strength: 1.0,
            shareability: 1.0,
            cta_intensity: 0.5,
            remix_probability: 1.0,
            tempo: 1.0,
            ..TraitVector::default()
        };
        assert!((gate.quality("caption", &best) - 100.0).abs() < 1e-9);
        assert_eq!(gate.quality("   ", &best), 0.0);
    }

    #[test]
    fn test_default_traits_clear_gate() {
        // 0.27 + 0.0335 + 0.06 + 0.01 + 0.15 = 0.5235
        let gate = QualityGate::new(45.0);
        let q = gate.quality("caption", &TraitVector::default());
        assert!((q - 52.35).abs() < 0.1, "quality {q}");
        assert!(gate.admits(q));
        let weak = TraitVector {
            hook_strength: 0.1,
            cta_intensity: 1.0,
            ..TraitVector::default()
        };
        assert!(!gate.admits(gate.quality("caption", &weak)));
    }
}
