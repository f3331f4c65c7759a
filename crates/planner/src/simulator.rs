//! Agent-based propagation rollout used to estimate audience resonance.
//!
//! A seed audience is split 60/30/10 across fans, casual viewers and
//! strangers. Every step, seeded viewers watch in proportion to hook strength,
//! share in proportion to shareability (boosted by CTA intensity) and remix in
//! proportion to remix probability. Each share reaches a handful of new
//! viewers who become seeds for the next step.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use variant_core::config::ExperimentConfig;
use variant_core::TraitVector;

struct Cluster {
    size: f64,
    share_factor: f64,
    remix_factor: f64,
    seed_share: f64,
}

const CLUSTERS: [Cluster; 3] = [
    // fans
    Cluster {
        size: 1_000.0,
        share_factor: 0.08,
        remix_factor: 0.02,
        seed_share: 0.6,
    },
    // casual
    Cluster {
        size: 10_000.0,
        share_factor: 0.02,
        remix_factor: 0.005,
        seed_share: 0.3,
    },
    // strangers
    Cluster {
        size: 100_000.0,
        share_factor: 0.004,
        remix_factor: 0.001,
        seed_share: 0.1,
    },
];

const REACH_PER_SHARE: f64 = 10.0;
/// Fraction of reached viewers that turn into seeds.
const SEED_CONVERSION: f64 = 0.01;
const CTA_SHARE_BOOST: f64 = 0.3;
const SHARE_WEIGHT: f64 = 3.0;
const REMIX_WEIGHT: f64 = 5.0;
/// Raw score at which resonance reaches `1 - 1/e`.
const RESONANCE_SCALE: f64 = 5.0;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Totals {
    pub views: f64,
    pub shares: f64,
    pub remixes: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemeticSimulator {
    pub steps: usize,
    pub seed_audience: u32,
    /// Width of the per-step multiplicative noise on hook and shareability.
    pub randomness: f64,
}

impl MemeticSimulator {
    pub fn new(steps: usize, seed_audience: u32, randomness: f64) -> Self {
        Self {
            steps,
            seed_audience: seed_audience.max(1),
            randomness: randomness.clamp(0.0, 1.0),
        }
    }

    pub fn from_config(config: &ExperimentConfig) -> Self {
        Self::new(config.simulation_steps, config.seed_audience, config.randomness)
    }

    /// Resonance in `[0, 1)`. Identical `(traits, seed)` always give the same
    /// score, and for a fixed seed the score never drops when hook strength or
    /// shareability rise.
    pub fn resonance(&self, traits: &TraitVector, seed: u64) -> f64 {
        let totals = self.rollout(traits, seed);
        let audience = self.seed_audience as f64;
        let raw = (totals.views * watch_through(traits.tempo)
            + totals.shares * SHARE_WEIGHT
            + totals.remixes * REMIX_WEIGHT)
            / audience;
        1.0 - (-raw / RESONANCE_SCALE).exp()
    }

    pub fn rollout(&self, traits: &TraitVector, seed: u64) -> Totals {
        let mut rng = StdRng::seed_from_u64(seed);
        let audience = self.seed_audience as f64;
        let mut seeds: Vec<f64> = CLUSTERS.iter().map(|c| (audience * c.seed_share).round()).collect();
        let total_size: f64 = CLUSTERS.iter().map(|c| c.size).sum();
        let mut totals = Totals::default();

        for _ in 0..self.steps {
            let hook = self.jitter(traits.hook_strength, &mut rng);
            let shareability = self.jitter(traits.shareability, &mut rng);

            let mut step_shares = 0.0;
            for (cluster, seed) in CLUSTERS.iter().zip(&seeds) {
                let views = seed * hook;
                let shares = views
                    * cluster.share_factor
                    * shareability
                    * (1.0 + traits.cta_intensity * CTA_SHARE_BOOST);
                let remixes = shares * cluster.remix_factor * traits.remix_probability;
                totals.views += views;
                totals.shares += shares;
                totals.remixes += remixes;
                step_shares += shares;
            }

            let reached = step_shares * REACH_PER_SHARE;
            for (cluster, seed) in CLUSTERS.iter().zip(seeds.iter_mut()) {
                *seed += reached * (cluster.size / total_size) * SEED_CONVERSION;
            }
        }
        totals
    }

    fn jitter(&self, value: f64, rng: &mut StdRng) -> f64 {
        let u: f64 = rng.gen();
        (value * (1.0 + (u - 0.5) * self.randomness)).clamp(0.0, 1.0)
    }
}

impl Default for MemeticSimulator {
    fn default() -> Self {
        Self::from_config(&ExperimentConfig::default())
    }
}

/// Expected watch-through: best at natural tempo, falling off either side.
fn watch_through(tempo: f64) -> f64 {
    0.6 * (1.0 - (tempo - 1.0).abs() * 0.5)
}
