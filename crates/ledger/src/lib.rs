//! Metrics ledger for variant pools: atomic counters, time decay, health
//! transitions, and the pool stores that back them.

pub mod decay;
pub mod health;
pub mod ledger;
pub mod redis_store;
pub mod store;

pub use decay::DecayCurve;
pub use health::HealthPolicy;
pub use ledger::{admit_candidates, Admission, MetricsLedger};
pub use redis_store::RedisPoolStore;
pub use store::{transact, InMemoryPoolStore, PoolStore, RetryPolicy};
