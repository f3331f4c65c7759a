//! Time decay of per-variant counters so recent activity outweighs old.

use chrono::{DateTime, Utc};
use variant_core::config::LedgerConfig;
use variant_core::{Variant, VariantError, VariantResult};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DecayCurve {
    /// `factor = 2^(-elapsed / half_life)`. Splitting an interval into
    /// several ticks gives the same result as one tick over the whole.
    Exponential { half_life_minutes: f64 },
    /// `factor = max(0, 1 - elapsed / window)`.
    Linear { window_minutes: f64 },
}

impl DecayCurve {
    pub fn from_config(config: &LedgerConfig) -> VariantResult<Self> {
        let curve = match config.decay_curve.as_str() {
            "exponential" => DecayCurve::Exponential {
                half_life_minutes: config.half_life_minutes,
            },
            "linear" => DecayCurve::Linear {
                window_minutes: config.linear_window_minutes,
            },
            other => {
                return Err(VariantError::Config(format!("unknown decay curve '{other}'")));
            }
        };
        let span = match curve {
            DecayCurve::Exponential { half_life_minutes } => half_life_minutes,
            DecayCurve::Linear { window_minutes } => window_minutes,
        };
        if !(span.is_finite() && span > 0.0) {
            return Err(VariantError::Config(format!(
                "decay span must be positive, got {span}"
            )));
        }
        Ok(curve)
    }

    /// Weight kept after `elapsed_minutes`.
    pub fn factor(&self, elapsed_minutes: f64) -> f64 {
        if elapsed_minutes <= 0.0 {
            return 1.0;
        }
        match *self {
            DecayCurve::Exponential { half_life_minutes } => {
                (-std::f64::consts::LN_2 * elapsed_minutes / half_life_minutes).exp()
            }
            DecayCurve::Linear { window_minutes } => {
                (1.0 - elapsed_minutes / window_minutes).max(0.0)
            }
        }
    }
}

impl Default for DecayCurve {
    fn default() -> Self {
        DecayCurve::Exponential {
            half_life_minutes: 720.0,
        }
    }
}

/// Bring the decayed counters of `variant` forward to `now`.
///
/// Returns `false` without touching anything when `now` is not after the last
/// decay, so repeating a tick is a no-op.
pub fn apply(variant: &mut Variant, curve: &DecayCurve, now: DateTime<Utc>) -> bool {
    if now <= variant.last_decay_at {
        return false;
    }
    let elapsed_minutes = (now - variant.last_decay_at).num_milliseconds() as f64 / 60_000.0;
    let factor = curve.factor(elapsed_minutes);
    variant.decayed_clicks *= factor;
    variant.decayed_posts *= factor;
    variant.last_decay_at = now;
    true
}
