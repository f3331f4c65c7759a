//! Rotation, UCB1, weighted UCB and Thompson sampling over a pool's active
//! variants.
//!
//! Selection only reads the pool. Trial and reward counters live in the
//! pool's durable `BanditRecord` and are updated by the ledger once an
//! outcome is observed.

use rand::distributions::Distribution;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::debug;
use variant_core::config::SelectionConfig;
use variant_core::{Pool, Variant, VariantError, VariantId, VariantResult};
use variant_stats::beta_posterior;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightedUcbParams {
    pub weight_ctr: f64,
    pub weight_reach: f64,
    pub weight_quality: f64,
    /// Scales the UCB1 exploration bonus.
    pub exploration_factor: f64,
}

impl Default for WeightedUcbParams {
    fn default() -> Self {
        let config = SelectionConfig::default();
        Self {
            weight_ctr: config.weight_ctr,
            weight_reach: config.weight_reach,
            weight_quality: config.weight_quality,
            exploration_factor: config.exploration_factor,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[derive(Default)]
pub enum SelectionStrategy {
    /// Round-robin by position in the active list.
    Rotation,
    #[default]
    Ucb1,
    WeightedUcb(WeightedUcbParams),
    ThompsonSampling,
}

impl SelectionStrategy {
    pub fn from_config(config: &SelectionConfig) -> VariantResult<Self> {
        match config.strategy.as_str() {
            "rotation" => Ok(Self::Rotation),
            "ucb1" => Ok(Self::Ucb1),
            "weighted_ucb" => Ok(Self::WeightedUcb(WeightedUcbParams {
                weight_ctr: config.weight_ctr,
                weight_reach: config.weight_reach,
                weight_quality: config.weight_quality,
                exploration_factor: config.exploration_factor,
            })),
            "thompson" => Ok(Self::ThompsonSampling),
            other => Err(VariantError::UnknownStrategy(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Rotation => "rotation",
            Self::Ucb1 => "ucb1",
            Self::WeightedUcb(_) => "weighted_ucb",
            Self::ThompsonSampling => "thompson",
        }
    }
}

pub fn select(pool: &Pool, strategy: &SelectionStrategy) -> VariantResult<VariantId> {
    select_with_rng(pool, strategy, &mut rand::thread_rng())
}

/// Pick the next variant to serve. Never returns a variant that is not
/// active; an empty active set is `NoSelectableVariant`.
pub fn select_with_rng(
    pool: &Pool,
    strategy: &SelectionStrategy,
    rng: &mut dyn RngCore,
) -> VariantResult<VariantId> {
    let active: Vec<&Variant> = pool.active().collect();
    if active.is_empty() {
        return Err(VariantError::NoSelectableVariant(pool.key.to_string()));
    }

    let chosen = match strategy {
        SelectionStrategy::Rotation => rotation(pool, &active),
        SelectionStrategy::Ucb1 => ucb1(pool, &active),
        SelectionStrategy::WeightedUcb(params) => weighted_ucb(pool, &active, params),
        SelectionStrategy::ThompsonSampling => thompson_sampling(pool, &active, rng)?,
    };
    debug!(pool = %pool.key, strategy = strategy.name(), variant_id = %chosen, "selected variant");
    Ok(chosen)
}

fn rotation(pool: &Pool, active: &[&Variant]) -> VariantId {
    let idx = (pool.bandit.total_trials() % active.len() as u64) as usize;
    active[idx].id
}

/// First active variant with no trials, if any.
fn cold_start(pool: &Pool, active: &[&Variant]) -> Option<VariantId> {
    let id = active
        .iter()
        .find(|v| pool.bandit.arm(&v.id).trials == 0)
        .map(|v| v.id)?;
    metrics::counter!("selection.cold_start").increment(1);
    Some(id)
}

fn active_trials(pool: &Pool, active: &[&Variant]) -> u64 {
    active.iter().map(|v| pool.bandit.arm(&v.id).trials).sum()
}

/// Argmax with strict `>`, so ties go to the first variant.
fn argmax(active: &[&Variant], mut score: impl FnMut(&Variant) -> f64) -> VariantId {
    let mut best_score = f64::NEG_INFINITY;
    let mut best = active[0].id;
    for v in active {
        let s = score(v);
        if s > best_score {
            best_score = s;
            best = v.id;
        }
    }
    best
}

fn ucb1(pool: &Pool, active: &[&Variant]) -> VariantId {
    if let Some(id) = cold_start(pool, active) {
        return id;
    }
    let log_total = ((active_trials(pool, active) + 1) as f64).ln();
    argmax(active, |v| {
        let arm = pool.bandit.arm(&v.id);
        arm.mean_reward() + (2.0 * log_total / arm.trials as f64).sqrt()
    })
}

/// Composite score: CTR normalised against twice the pool median, a log
/// reach proxy, and quality, plus the scaled UCB1 bonus.
fn weighted_ucb(pool: &Pool, active: &[&Variant], params: &WeightedUcbParams) -> VariantId {
    if let Some(id) = cold_start(pool, active) {
        return id;
    }
    let median = median_ctr(active);
    let log_total = ((active_trials(pool, active) + 1) as f64).ln();

    argmax(active, |v| {
        let ctr = v.decayed_ctr();
        let ctr_norm = if median > 0.0 {
            (ctr / (median * 2.0)).min(1.0)
        } else if ctr > 0.0 {
            1.0
        } else {
            0.0
        };
        let reach_basis = if v.impressions > 0 {
            v.impressions
        } else if v.posts > 0 {
            v.posts * 100
        } else {
            1
        };
        let reach = ((reach_basis + 10) as f64).log10() / 3.0;
        let quality = v.quality_score() / 100.0;
        let trials = pool.bandit.arm(&v.id).trials as f64;
        let bonus = (2.0 * log_total / trials).sqrt() * params.exploration_factor;

        params.weight_ctr * ctr_norm
            + params.weight_reach * reach
            + params.weight_quality * quality
            + bonus
    })
}

fn thompson_sampling(
    pool: &Pool,
    active: &[&Variant],
    rng: &mut dyn RngCore,
) -> VariantResult<VariantId> {
    let mut draws = Vec::with_capacity(active.len());
    for v in active {
        let arm = pool.bandit.arm(&v.id);
        let alpha = arm.reward + 1.0;
        let beta = (arm.trials as f64 - arm.reward).max(0.0) + 1.0;
        draws.push(beta_posterior(alpha, beta)?.sample(&mut *rng));
    }
    let mut draws = draws.into_iter();
    Ok(argmax(active, |_| draws.next().unwrap_or(f64::NEG_INFINITY)))
}

fn median_ctr(active: &[&Variant]) -> f64 {
    let mut ctrs: Vec<f64> = active.iter().map(|v| v.decayed_ctr()).collect();
    ctrs.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    ctrs.get(ctrs.len() / 2).copied().unwrap_or(0.0)
}
