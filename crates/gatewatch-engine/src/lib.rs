//! # gatewatch-engine
//!
//! The admission decision layer: a single pipeline that turns
//! normalized events into durable, idempotent admission records.
//!
//! Policy lives here (clearance window, debounce, enrichment
//! precedence); durability and idempotency live in `gatewatch-store`;
//! the pipeline composes the two and is the only write path.

pub mod debounce;
pub mod enrich;
pub mod errors;
pub mod metrics;
pub mod outcome;
pub mod pipeline;
pub mod policy;

pub use debounce::DebounceFilter;
pub use enrich::{ClearanceDetail, merge};
pub use errors::{EngineError, Result};
pub use self::metrics::{MetricsSink, NullSink, RunCounts, SnapshotSink};
pub use outcome::{BatchOutcome, Outcome, reason};
pub use pipeline::AdmissionPipeline;
pub use policy::{ClearancePolicy, clearance_precedence};
