pub mod audit;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod types;

pub use audit::{AuditKind, AuditRecord, AuditSink, MemoryAuditSink, TracingAuditSink};
pub use config::AppConfig;
pub use error::{VariantError, VariantResult};
pub use lifecycle::{StateTransition, TransitionTrigger};
pub use types::{
    BanditRecord, CaptionStyle, ConfidenceMethod, ConfidenceReport, EventType, Pool, PoolKey,
    SeedTraits, SimulationResult, ThumbnailStyle, TraitVector, Variant, VariantId,
    VariantMetrics, VariantState,
};
