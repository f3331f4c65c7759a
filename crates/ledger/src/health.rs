//! Anomaly, suppression and quarantine policy for pool variants.
//!
//! * anomalous: decayed CTR at least `spike_factor` times the pool median
//!   once the variant has `anomaly_min_posts` decayed posts.
//! * suppressed: a second spike while anomalous (up to `max_anomaly_strikes`),
//!   a spike beyond `spike_factor * severe_multiplier`, or (when enabled) a
//!   decayed CTR under `baseline_ctr * suppression_ratio` after
//!   `suppression_min_posts` posts and `suppression_min_impressions` impressions.
//! * quarantined: any spike when `quarantine_on_anomaly` is set, or an
//!   operator action. Terminal.

use variant_core::config::HealthConfig;
use variant_core::{Pool, TransitionTrigger, Variant, VariantState};

#[derive(Debug, Clone, PartialEq)]
pub struct HealthPolicy {
    pub spike_factor: f64,
    pub anomaly_min_posts: f64,
    pub severe_multiplier: f64,
    pub max_anomaly_strikes: u32,
    pub suppression_enabled: bool,
    pub suppression_min_posts: u64,
    pub suppression_min_impressions: u64,
    pub baseline_ctr: f64,
    pub suppression_ratio: f64,
    pub quarantine_on_anomaly: bool,
}

/// Result of assessing one variant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Verdict {
    /// The variant's decayed CTR crossed the spike threshold.
    pub spiked: bool,
    pub transition: Option<(VariantState, TransitionTrigger)>,
}

impl HealthPolicy {
    pub fn from_config(config: &HealthConfig) -> Self {
        Self {
            spike_factor: config.anomaly_spike_factor,
            anomaly_min_posts: config.anomaly_min_posts,
            severe_multiplier: config.severe_spike_multiplier,
            max_anomaly_strikes: config.max_anomaly_strikes.max(1),
            suppression_enabled: config.suppression_enabled,
            suppression_min_posts: config.suppression_min_posts,
            suppression_min_impressions: config.suppression_min_impressions,
            baseline_ctr: config.baseline_ctr,
            suppression_ratio: config.suppression_ratio,
            quarantine_on_anomaly: config.quarantine_on_anomaly,
        }
    }

    /// Assess `variant` against the pool median. Only active and anomalous
    /// variants can move; everything else is left alone.
    pub fn assess(&self, variant: &Variant, median_ctr: f64) -> Verdict {
        let state = variant.state();
        if !matches!(state, VariantState::Active | VariantState::Anomalous) {
            return Verdict {
                spiked: false,
                transition: None,
            };
        }

        let ctr = variant.decayed_ctr();
        let threshold = median_ctr * self.spike_factor;
        let spiked = ctr > 0.0
            && median_ctr > 0.0
            && ctr >= threshold
            && variant.decayed_posts >= self.anomaly_min_posts;

        let transition = if spiked {
            if self.quarantine_on_anomaly {
                Some((VariantState::Quarantined, TransitionTrigger::QuarantineOnAnomaly))
            } else if ctr >= threshold * self.severe_multiplier {
                Some((VariantState::Suppressed, TransitionTrigger::SevereAnomaly))
            } else if state == VariantState::Anomalous {
                (variant.anomaly_strikes + 1 >= self.max_anomaly_strikes)
                    .then_some((VariantState::Suppressed, TransitionTrigger::RepeatedAnomaly))
            } else {
                Some((VariantState::Anomalous, TransitionTrigger::CtrSpike))
            }
        } else if self.suppression_enabled
            && variant.posts >= self.suppression_min_posts
            && variant.impressions >= self.suppression_min_impressions
            && ctr < self.baseline_ctr * self.suppression_ratio
        {
            Some((VariantState::Suppressed, TransitionTrigger::Underperforming))
        } else {
            None
        };

        Verdict { spiked, transition }
    }
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self::from_config(&HealthConfig::default())
    }
}

/// Upper median of decayed CTR across every variant in the pool.
pub fn median_decayed_ctr(pool: &Pool) -> f64 {
    let mut ctrs: Vec<f64> = pool
        .variants
        .iter()
        .map(Variant::decayed_ctr)
        .filter(|c| c.is_finite())
        .collect();
    if ctrs.is_empty() {
        return 0.0;
    }
    ctrs.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    ctrs[ctrs.len() / 2]
}
