//! Admission outcomes returned to callers.

use gatewatch_store::AdmissionRow;

/// Canonical reject / drop reasons. Stored verbatim in `reject_reason`
/// and reported to callers, so they are constants rather than ad-hoc
/// strings.
pub mod reason {
    /// Gated action with no accepted clearance inside the window.
    pub const NO_RECENT_CLEARANCE: &str = "no recent clearance";
    /// Candidate subject key matched nothing in the store.
    pub const SUBJECT_NOT_FOUND: &str = "subject not found";
    /// Device is unknown or deactivated.
    pub const DEVICE_NOT_REGISTERED: &str = "device not registered";
    /// Event arrived without an idempotency key.
    pub const MISSING_DEDUP_KEY: &str = "missing dedup key";
}

/// Result of admitting one normalized event.
#[derive(Clone, Debug)]
pub enum Outcome {
    /// Admitted; the persisted record.
    Accepted {
        /// The committed record.
        record: AdmissionRow,
    },
    /// Persisted as a rejection (auditable occurrence that failed policy).
    Rejected {
        /// The committed record, disposition REJECTED.
        record: AdmissionRow,
        /// Why policy rejected it.
        reason: String,
    },
    /// The `(device, dedup_key)` pair was already committed. Carries the
    /// prior record so re-deliveries observe the original disposition.
    Duplicate {
        /// The previously committed record.
        record: AdmissionRow,
    },
    /// Dropped without persisting anything (unresolvable subject,
    /// unregistered device, structural defect). Counted, never guessed.
    Dropped {
        /// Why the event could not be admitted.
        reason: &'static str,
    },
    /// The batch could not commit; every item is safe to resubmit.
    TransientError {
        /// Failure description.
        reason: String,
    },
}

impl Outcome {
    /// The persisted record, when one exists.
    pub fn record(&self) -> Option<&AdmissionRow> {
        match self {
            Self::Accepted { record } | Self::Rejected { record, .. } | Self::Duplicate { record } => {
                Some(record)
            }
            Self::Dropped { .. } | Self::TransientError { .. } => None,
        }
    }
}

/// One batch item's outcome, correlated by the caller's dedup key.
#[derive(Clone, Debug)]
pub struct BatchOutcome {
    /// The submitted event's dedup key (empty when the event had none).
    pub dedup_key: String,
    /// What happened to it.
    pub outcome: Outcome,
}
