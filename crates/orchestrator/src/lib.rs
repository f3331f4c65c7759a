//! Pool health watching, regeneration, and the service facade that wires
//! ledger, planner, selection and decision together.

pub mod catalog;
pub mod regenerator;
pub mod service;

pub use catalog::{ContentCatalog, ContentContext, InMemoryCatalog};
pub use regenerator::{RegenerationOutcome, RegenerationPolicy, Regenerator, SkipReason};
pub use service::ExperimentService;
