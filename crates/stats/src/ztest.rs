use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};
use variant_core::{VariantError, VariantResult};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZTest {
    pub z: f64,
    /// Two-tailed, normal approximation.
    pub p_value: f64,
}

/// Pooled two-proportion z-test of `(conversions_a / views_a)` against
/// `(conversions_b / views_b)`.
///
/// Fails with `Validation` when conversions exceed views and with
/// `InsufficientData` when either side has no views.
pub fn two_proportion_z_test(
    conversions_a: u64,
    views_a: u64,
    conversions_b: u64,
    views_b: u64,
) -> VariantResult<ZTest> {
    for (conversions, views) in [(conversions_a, views_a), (conversions_b, views_b)] {
        if conversions > views {
            return Err(VariantError::Validation(format!(
                "conversions ({conversions}) exceed views ({views})"
            )));
        }
    }
    if views_a == 0 || views_b == 0 {
        return Err(VariantError::InsufficientData(
            "proportion undefined with zero views".into(),
        ));
    }

    let (na, nb) = (views_a as f64, views_b as f64);
    let p1 = conversions_a as f64 / na;
    let p2 = conversions_b as f64 / nb;
    let p = (conversions_a + conversions_b) as f64 / (na + nb);
    let se = (p * (1.0 - p) * (1.0 / na + 1.0 / nb)).sqrt();
    if se == 0.0 {
        // Both sides all-or-nothing with identical rates.
        return Ok(ZTest { z: 0.0, p_value: 1.0 });
    }
    let z = (p1 - p2) / se;
    Ok(ZTest {
        z,
        p_value: two_tailed_p(z),
    })
}

/// Two-tailed standard normal tail probability of `z`.
pub fn two_tailed_p(z: f64) -> f64 {
    if z.is_nan() {
        return 1.0;
    }
    (2.0 * Normal::standard().sf(z.abs())).clamp(0.0, 1.0)
}
