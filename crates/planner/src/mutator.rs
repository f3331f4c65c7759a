use rand::seq::SliceRandom;
use rand::{Rng, RngCore};
use uuid::{Builder, Uuid};
use variant_core::types::TraitDomain;
use variant_core::{CaptionStyle, ThumbnailStyle, TraitVector, VariantError, VariantResult};

/// One perturbed copy of a seed trait vector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mutation {
    pub id: Uuid,
    pub traits: TraitVector,
}

/// Bounded randomized perturbation of a trait vector.
///
/// Each numeric trait is scaled by `1 + u` with `u` uniform in
/// `[-magnitude, magnitude]`, then clamped to its domain. Categorical traits
/// are resampled uniformly when `resample_categorical` is set. Output is never
/// deduplicated.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MutationGenerator {
    magnitude: f64,
    resample_categorical: bool,
}

impl MutationGenerator {
    pub fn new(magnitude: f64) -> VariantResult<Self> {
        if !(magnitude.is_finite() && (0.0..=1.0).contains(&magnitude)) {
            return Err(VariantError::Validation(format!(
                "mutation magnitude must be within [0, 1], got {magnitude}"
            )));
        }
        Ok(Self {
            magnitude,
            resample_categorical: true,
        })
    }

    /// Keep the seed's caption and thumbnail styles.
    pub fn keep_categorical(mut self) -> Self {
        self.resample_categorical = false;
        self
    }

    pub fn magnitude(&self) -> f64 {
        self.magnitude
    }

    /// Produce exactly `count` mutations of `base`.
    pub fn mutate(&self, base: &TraitVector, count: usize, rng: &mut dyn RngCore) -> Vec<Mutation> {
        (0..count).map(|_| self.mutate_one(base, rng)).collect()
    }

    fn mutate_one(&self, base: &TraitVector, rng: &mut dyn RngCore) -> Mutation {
        let p = self.magnitude;
        let mut perturb = |value: f64, domain: TraitDomain| {
            domain.clamp(value * (1.0 + rng.gen_range(-p..=p)))
        };

        let mut traits = TraitVector {
            hook_strength: perturb(base.hook_strength, TraitDomain::UNIT),
            shareability: perturb(base.shareability, TraitDomain::UNIT),
            cta_intensity: perturb(base.cta_intensity, TraitDomain::UNIT),
            remix_probability: perturb(base.remix_probability, TraitDomain::UNIT),
            tempo: perturb(base.tempo, TraitDomain::TEMPO),
            ..*base
        };

        if self.resample_categorical {
            traits.caption_style = *CaptionStyle::ALL
                .choose(&mut *rng)
                .unwrap_or(&base.caption_style);
            traits.thumbnail_style = *ThumbnailStyle::ALL
                .choose(&mut *rng)
                .unwrap_or(&base.thumbnail_style);
        }

        Mutation {
            id: Builder::from_random_bytes(rng.gen()).into_uuid(),
            traits,
        }
    }
}
