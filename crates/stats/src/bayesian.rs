use rand::distributions::Distribution;
use rand::RngCore;
use statrs::distribution::Beta;
use variant_core::{
    ConfidenceMethod, ConfidenceReport, VariantError, VariantMetrics, VariantResult,
};

use crate::comparison::Comparison;

/// Paired Monte Carlo draws from the top and baseline posteriors.
#[derive(Debug, Clone, PartialEq)]
pub struct PosteriorSamples {
    pub top: Vec<f64>,
    pub baseline: Vec<f64>,
}

impl PosteriorSamples {
    /// Fraction of pairs where the top draw beats the baseline draw.
    pub fn probability_top_wins(&self) -> f64 {
        let n = self.top.len().min(self.baseline.len());
        if n == 0 {
            return 0.0;
        }
        let wins = self
            .top
            .iter()
            .zip(&self.baseline)
            .filter(|(t, b)| t > b)
            .count();
        wins as f64 / n as f64
    }

    /// Sorted `top - baseline` differences, one per pair.
    pub fn differences(&self) -> Vec<f64> {
        let mut diffs: Vec<f64> = self
            .top
            .iter()
            .zip(&self.baseline)
            .map(|(t, b)| t - b)
            .collect();
        diffs.sort_by(f64::total_cmp);
        diffs
    }

    /// Percentile `p` in `[0, 1]` of the difference distribution, taken at
    /// index `floor((n - 1) * p)`. Zero when there are no pairs.
    pub fn difference_percentile(&self, p: f64) -> f64 {
        percentile(&self.differences(), p)
    }
}

/// Nearest-rank percentile over an already sorted slice.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() - 1) as f64 * p.clamp(0.0, 1.0)).floor() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

/// Draw `samples` pairs from Beta(c + 1, v - c + 1) for the top variant and
/// for the pooled baseline.
pub fn generate_posterior_samples_for_top_vs_baseline(
    variants: &[VariantMetrics],
    samples: usize,
    rng: &mut dyn RngCore,
) -> VariantResult<(Comparison, PosteriorSamples)> {
    if samples == 0 {
        return Err(VariantError::Validation(
            "posterior sample count must be positive".into(),
        ));
    }
    let comparison = Comparison::build(variants)?;
    let (top_alpha, top_beta) = posterior(comparison.top.conversions, comparison.top.views);
    let (base_alpha, base_beta) =
        posterior(comparison.baseline_conversions, comparison.baseline_views);
    let top_dist = beta_posterior(top_alpha, top_beta)?;
    let base_dist = beta_posterior(base_alpha, base_beta)?;

    let mut top = Vec::with_capacity(samples);
    let mut baseline = Vec::with_capacity(samples);
    for _ in 0..samples {
        top.push(top_dist.sample(&mut *rng));
        baseline.push(base_dist.sample(&mut *rng));
    }
    Ok((comparison, PosteriorSamples { top, baseline }))
}

/// `P(top > baseline)` in `[0, 1]` estimated from `samples` posterior pairs.
pub fn calculate_bayesian_confidence(
    variants: &[VariantMetrics],
    samples: usize,
    rng: &mut dyn RngCore,
) -> VariantResult<ConfidenceReport> {
    let (comparison, draws) = generate_posterior_samples_for_top_vs_baseline(variants, samples, rng)?;
    Ok(comparison.report(ConfidenceMethod::Bayesian, draws.probability_top_wins()))
}

/// Beta(alpha, beta) posterior, rejecting non-positive or non-finite shapes.
pub fn beta_posterior(alpha: f64, beta: f64) -> VariantResult<Beta> {
    Beta::new(alpha, beta)
        .map_err(|e| VariantError::Validation(format!("beta({alpha}, {beta}): {e}")))
}

fn posterior(conversions: u64, views: u64) -> (f64, f64) {
    (
        conversions as f64 + 1.0,
        views.saturating_sub(conversions) as f64 + 1.0,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparison::calculate_confidence_for_variants;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use uuid::Uuid;

    fn metrics(conversions: u64, views: u64) -> VariantMetrics {
        VariantMetrics::new(Uuid::new_v4(), conversions, views)
    }

    #[test]
    fn test_large_gap_is_near_certain() {
        let variants = [metrics(60, 1000), metrics(18, 800)];
        let mut rng = StdRng::seed_from_u64(17);
        let report = calculate_bayesian_confidence(&variants, 4000, &mut rng).unwrap();
        assert!(report.confidence > 0.99, "confidence {}", report.confidence);
        assert!(report.as_percent() >= 80.0);
    }

    #[test]
    fn test_agrees_with_frequentist() {
        let variants = [metrics(60, 1000), metrics(18, 800)];
        let mut rng = StdRng::seed_from_u64(3);
        let bayes = calculate_bayesian_confidence(&variants, 4000, &mut rng).unwrap();
        let freq = calculate_confidence_for_variants(&variants).unwrap();
        assert!((bayes.as_percent() - freq.confidence).abs() < 20.0);
    }

    #[test]
    fn test_near_equal_is_uncertain() {
        let variants = [metrics(25, 1000), metrics(23, 900)];
        let mut rng = StdRng::seed_from_u64(8);
        let report = calculate_bayesian_confidence(&variants, 4000, &mut rng).unwrap();
        assert!(report.confidence < 0.8, "confidence {}", report.confidence);
    }

    #[test]
    fn test_samples_are_paired_and_reproducible() {
        let variants = [metrics(30, 300), metrics(20, 300)];
        let (_, a) =
            generate_posterior_samples_for_top_vs_baseline(&variants, 500, &mut StdRng::seed_from_u64(1))
                .unwrap();
        let (_, b) =
            generate_posterior_samples_for_top_vs_baseline(&variants, 500, &mut StdRng::seed_from_u64(1))
                .unwrap();
        assert_eq!(a.top.len(), 500);
        assert_eq!(a.baseline.len(), 500);
        assert_eq!(a, b);
    }

    #[test]
    fn test_posterior_draws_center_on_rate() {
        let dist = beta_posterior(61.0, 941.0).unwrap();
        let mut rng = StdRng::seed_from_u64(99);
        let n = 20_000;
        let mean: f64 = (0..n).map(|_| dist.sample(&mut rng)).sum::<f64>() / n as f64;
        // E = 61 / 1002
        assert!((mean - 0.0609).abs() < 0.002, "mean {mean}");
    }

    #[test]
    fn test_invalid_posterior_shape() {
        assert!(matches!(beta_posterior(0.0, 1.0), Err(VariantError::Validation(_))));
        assert!(beta_posterior(f64::NAN, 1.0).is_err());
    }

    #[test]
    fn test_difference_percentiles() {
        let draws = PosteriorSamples {
            top: vec![0.5, 0.4, 0.3, 0.2, 0.1],
            baseline: vec![0.1, 0.1, 0.1, 0.1, 0.1],
        };
        assert_eq!(draws.differences().len(), 5);
        assert!((draws.difference_percentile(0.5) - 0.2).abs() < 1e-12);
        assert!((draws.difference_percentile(0.95) - 0.3).abs() < 1e-12);
        assert!((draws.difference_percentile(1.0) - 0.4).abs() < 1e-12);
        assert_eq!(percentile(&[], 0.5), 0.0);
    }

    #[test]
    fn test_zero_samples_rejected() {
        let variants = [metrics(30, 300), metrics(20, 300)];
        let mut rng = StdRng::seed_from_u64(1);
        assert!(calculate_bayesian_confidence(&variants, 0, &mut rng).is_err());
    }
}
