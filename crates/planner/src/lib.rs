//! Variant planning: randomized mutation of a seed trait vector, simulated
//! and heuristic scoring of the candidates, and the admission quality gate.

pub mod engine;
pub mod mutator;
pub mod scorer;
pub mod simulator;
pub mod strategy;

pub use engine::{BaseVariant, PlanOptions, PlannedVariant, VariantPlanner};
pub use mutator::{Mutation, MutationGenerator};
pub use scorer::{HeuristicScorer, HeuristicWeights, QualityGate};
pub use simulator::MemeticSimulator;
pub use strategy::{
    render_value, Candidate, ConservativeStrategy, GenerationRequest, GenerationStrategy,
    HeuristicStrategy, StrategyRegistry,
};
