//! Serving policies over the active variants of a pool.

pub mod bandits;

pub use bandits::{select, select_with_rng, SelectionStrategy, WeightedUcbParams};
