//! Audit records for regeneration, lifecycle and decision outcomes, and the
//! sink trait they are emitted through.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::lifecycle::{StateTransition, TransitionTrigger};
use crate::types::{ConfidenceReport, PoolKey, VariantId, VariantState};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub pool: PoolKey,
    pub kind: AuditKind,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditKind {
    Regenerated {
        added: usize,
        strategy: String,
        variant_ids: Vec<VariantId>,
    },
    RegenerationSkipped {
        reason: String,
    },
    StateChanged {
        variant_id: VariantId,
        from: VariantState,
        to: VariantState,
        trigger: TransitionTrigger,
    },
    Decision {
        winner: Option<VariantId>,
        reason: Option<String>,
        reports: Vec<ConfidenceReport>,
    },
}

impl AuditKind {
    pub fn label(&self) -> &'static str {
        match self {
            AuditKind::Regenerated { .. } => "regenerated",
            AuditKind::RegenerationSkipped { .. } => "regeneration_skipped",
            AuditKind::StateChanged { .. } => "state_changed",
            AuditKind::Decision { .. } => "decision",
        }
    }
}

impl From<StateTransition> for AuditKind {
    fn from(t: StateTransition) -> Self {
        AuditKind::StateChanged {
            variant_id: t.variant_id,
            from: t.from,
            to: t.to,
            trigger: t.trigger,
        }
    }
}

impl AuditRecord {
    pub fn new(pool: PoolKey, kind: AuditKind, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            pool,
            kind,
            timestamp,
        }
    }
}

/// Destination for audit records. Implementations must not block the caller.
pub trait AuditSink: Send + Sync {
    fn emit(&self, record: AuditRecord);
}

/// Writes each record to the `tracing` log.
#[derive(Debug, Default, Clone)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, record: AuditRecord) {
        info!(
            audit_id = %record.id,
            pool = %record.pool,
            kind = record.kind.label(),
            "audit record"
        );
    }
}

/// Keeps records in memory; used by tests and short-lived tools.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    records: parking_lot::Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl AuditSink for MemoryAuditSink {
    fn emit(&self, record: AuditRecord) {
        self.records.lock().push(record);
    }
}
