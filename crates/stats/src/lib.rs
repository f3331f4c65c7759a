//! Significance testing for variant pools: a two-proportion z-test, Beta
//! posterior sampling, and the decision engine that combines both.

pub mod bayesian;
pub mod comparison;
pub mod decision;
pub mod ztest;

pub use bayesian::{
    beta_posterior, calculate_bayesian_confidence, generate_posterior_samples_for_top_vs_baseline,
    percentile, PosteriorSamples,
};
pub use comparison::{calculate_confidence_for_variants, Comparison};
pub use decision::{Decision, DecisionEngine, Projection};
pub use ztest::{two_proportion_z_test, ZTest};
