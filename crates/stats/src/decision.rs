use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::info;
use variant_core::config::{DecisionConfig, ExperimentConfig};
use variant_core::{
    ConfidenceMethod, ConfidenceReport, VariantError, VariantId, VariantMetrics, VariantResult,
};

use crate::bayesian::{generate_posterior_samples_for_top_vs_baseline, percentile};
use crate::comparison::calculate_confidence_for_variants;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Decision {
    Winner {
        variant_id: VariantId,
        reports: Vec<ConfidenceReport>,
        projection: Projection,
    },
    KeepServing {
        reason: String,
        reports: Vec<ConfidenceReport>,
    },
}

impl Decision {
    pub fn winner(&self) -> Option<VariantId> {
        match self {
            Decision::Winner { variant_id, .. } => Some(*variant_id),
            Decision::KeepServing { .. } => None,
        }
    }

    pub fn reports(&self) -> &[ConfidenceReport] {
        match self {
            Decision::Winner { reports, .. } | Decision::KeepServing { reports, .. } => reports,
        }
    }

    pub fn projection(&self) -> Option<&Projection> {
        match self {
            Decision::Winner { projection, .. } => Some(projection),
            Decision::KeepServing { .. } => None,
        }
    }

    fn keep_serving(reason: impl Into<String>, reports: Vec<ConfidenceReport>) -> Self {
        Decision::KeepServing {
            reason: reason.into(),
            reports,
        }
    }
}

/// Expected impact of promoting the top variant over the pooled baseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Projection {
    pub top_rate: f64,
    pub baseline_rate: f64,
    /// Relative lift over the baseline in percent; zero when the baseline
    /// rate is zero.
    pub predicted_uplift: f64,
    pub inc_conversions_per_1000_views: f64,
    /// Median of the posterior `top - baseline` difference.
    pub diff_p50: f64,
    pub diff_p95: f64,
    /// 0 (safe) to 100, from frequentist doubt plus missing sample size.
    pub risk_score: f64,
    pub total_views: u64,
}

impl Projection {
    fn new(
        top_rate: f64,
        baseline_rate: f64,
        diff_p50: f64,
        diff_p95: f64,
        frequentist_confidence: f64,
        total_views: u64,
        min_total_views: u64,
    ) -> Self {
        let predicted_uplift = if baseline_rate > 0.0 {
            (top_rate - baseline_rate) / baseline_rate * 100.0
        } else {
            0.0
        };
        let sample_safety = (total_views as f64 / min_total_views.max(1) as f64).clamp(0.0, 1.0);
        let risk = (1.0 - frequentist_confidence / 100.0) + (1.0 - sample_safety);
        Self {
            top_rate,
            baseline_rate,
            predicted_uplift,
            inc_conversions_per_1000_views: (top_rate - baseline_rate) * 1000.0,
            diff_p50,
            diff_p95,
            risk_score: (risk * 100.0).round().clamp(0.0, 100.0),
            total_views,
        }
    }
}

/// Declares a winner only when both methods agree it is significant and every
/// compared variant has enough views. Anything short of that keeps serving.
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionEngine {
    pub confidence_threshold: f64,
    pub bayesian_threshold: f64,
    pub min_views: u64,
    pub min_total_views: u64,
    pub posterior_samples: usize,
}

impl DecisionEngine {
    pub fn from_config(decision: &DecisionConfig, experiment: &ExperimentConfig) -> Self {
        Self {
            confidence_threshold: decision.confidence_threshold,
            bayesian_threshold: decision.bayesian_threshold,
            min_views: decision.min_views,
            min_total_views: decision.min_total_views,
            posterior_samples: experiment.posterior_samples,
        }
    }

    /// Malformed counts are returned as errors; too little data is a
    /// `KeepServing` outcome.
    pub fn evaluate(
        &self,
        variants: &[VariantMetrics],
        rng: &mut dyn RngCore,
    ) -> VariantResult<Decision> {
        let frequentist = match calculate_confidence_for_variants(variants) {
            Ok(report) => report,
            Err(VariantError::InsufficientData(reason)) => {
                return Ok(Decision::keep_serving(format!("insufficient_data: {reason}"), vec![]));
            }
            Err(e) => return Err(e),
        };
        let total_views: u64 = variants.iter().map(|v| v.views).sum();
        if total_views < self.min_total_views {
            return Ok(Decision::keep_serving("min_sample_not_met", vec![frequentist]));
        }

        let (comparison, draws) =
            generate_posterior_samples_for_top_vs_baseline(variants, self.posterior_samples, rng)?;
        let bayesian = comparison.report(ConfidenceMethod::Bayesian, draws.probability_top_wins());
        let top = frequentist.top_variant_id;
        let diffs = draws.differences();
        let projection = Projection::new(
            comparison.top.rate().unwrap_or(0.0),
            rate(comparison.baseline_conversions, comparison.baseline_views),
            percentile(&diffs, 0.5),
            percentile(&diffs, 0.95),
            frequentist.confidence,
            total_views,
            self.min_total_views,
        );
        let reports = vec![frequentist, bayesian];

        let under_sampled = variants
            .iter()
            .filter(|v| reports[0].compared_variant_ids.contains(&v.variant_id))
            .any(|v| v.views < self.min_views);

        let decision = if under_sampled {
            Decision::keep_serving("min_views_not_reached", reports)
        } else if reports[0].confidence < self.confidence_threshold {
            Decision::keep_serving("frequentist_below_threshold", reports)
        } else if reports[1].confidence < self.bayesian_threshold {
            Decision::keep_serving("bayesian_below_threshold", reports)
        } else {
            Decision::Winner {
                variant_id: top,
                reports,
                projection,
            }
        };

        match &decision {
            Decision::Winner {
                variant_id,
                reports,
                projection,
            } => {
                metrics::counter!("decision.winners").increment(1);
                info!(
                    %variant_id,
                    frequentist = reports[0].confidence,
                    bayesian = reports[1].confidence,
                    uplift = projection.predicted_uplift,
                    risk = projection.risk_score,
                    "winner declared"
                );
            }
            Decision::KeepServing { reason, .. } => {
                metrics::counter!("decision.keep_serving").increment(1);
                info!(%reason, "no winner yet, keep serving");
            }
        }
        Ok(decision)
    }
}

fn rate(conversions: u64, views: u64) -> f64 {
    if views == 0 {
        0.0
    } else {
        conversions as f64 / views as f64
    }
}

impl Default for DecisionEngine {
    fn default() -> Self {
        Self::from_config(&DecisionConfig::default(), &ExperimentConfig::default())
    }
}
