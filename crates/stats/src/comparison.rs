//! Top-variant-versus-baseline comparison and its frequentist confidence.

use tracing::debug;
use variant_core::{
    ConfidenceMethod, ConfidenceReport, VariantError, VariantId, VariantMetrics, VariantResult,
};

use crate::ztest::two_proportion_z_test;

/// The best variant by conversion rate against every other compared variant
/// pooled together.
#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub top: VariantMetrics,
    pub baseline_conversions: u64,
    pub baseline_views: u64,
    pub compared: Vec<VariantId>,
    /// Variants without views.
    pub excluded: Vec<VariantId>,
}

impl Comparison {
    /// Validates every input, drops zero-view variants, and requires at least
    /// two variants left to compare.
    pub fn build(variants: &[VariantMetrics]) -> VariantResult<Self> {
        if let Some(bad) = variants.iter().find(|v| v.conversions > v.views) {
            return Err(VariantError::Validation(format!(
                "variant {} has {} conversions over {} views",
                bad.variant_id, bad.conversions, bad.views
            )));
        }

        let (with_views, without): (Vec<&VariantMetrics>, Vec<&VariantMetrics>) =
            variants.iter().partition(|v| v.views > 0);
        let excluded: Vec<VariantId> = without.iter().map(|v| v.variant_id).collect();
        if !excluded.is_empty() {
            debug!(excluded = excluded.len(), "excluding variants without views");
        }
        if with_views.len() < 2 {
            return Err(VariantError::InsufficientData(format!(
                "{} of {} variants have views, need at least 2",
                with_views.len(),
                variants.len()
            )));
        }

        // First-found wins ties.
        let mut top = with_views[0];
        for &v in &with_views[1..] {
            if v.rate() > top.rate() {
                top = v;
            }
        }

        let others = with_views.iter().filter(|v| v.variant_id != top.variant_id);
        let (baseline_conversions, baseline_views) = others
            .fold((0u64, 0u64), |(c, n), v| (c + v.conversions, n + v.views));

        Ok(Self {
            top: *top,
            baseline_conversions,
            baseline_views,
            compared: with_views.iter().map(|v| v.variant_id).collect(),
            excluded,
        })
    }

    pub(crate) fn report(&self, method: ConfidenceMethod, confidence: f64) -> ConfidenceReport {
        ConfidenceReport {
            method,
            confidence,
            top_variant_id: self.top.variant_id,
            compared_variant_ids: self.compared.clone(),
            excluded_variant_ids: self.excluded.clone(),
        }
    }
}

/// Confidence in `[0, 100]` that the top variant beats the pooled baseline:
/// `(1 - p) * 100` of a two-proportion z-test.
pub fn calculate_confidence_for_variants(
    variants: &[VariantMetrics],
) -> VariantResult<ConfidenceReport> {
    let comparison = Comparison::build(variants)?;
    let test = two_proportion_z_test(
        comparison.top.conversions,
        comparison.top.views,
        comparison.baseline_conversions,
        comparison.baseline_views,
    )?;
    let confidence = ((1.0 - test.p_value) * 100.0).clamp(0.0, 100.0);
    Ok(comparison.report(ConfidenceMethod::Frequentist, confidence))
}
