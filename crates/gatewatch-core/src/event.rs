//! Event vocabulary: kinds, dispositions, subject keys, and the
//! [`NormalizedEvent`] every adapter must produce before admission.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// The kind of physical occurrence an event records.
///
/// Stored as SCREAMING_SNAKE_CASE strings in SQL; round-trips via
/// [`EventKind::as_sql`] and [`FromStr`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    /// Turnstile pass into the perimeter.
    EntryPass,
    /// Turnstile pass out of the perimeter.
    ExitPass,
    /// Safety clearance granted (medical exam passed).
    ClearanceOk,
    /// Safety clearance denied.
    ClearanceFail,
    /// Tool checked out of the crib.
    ToolTake,
    /// Tool returned to the crib.
    ToolReturn,
    /// Entry into the hazard area proper.
    GateIn,
    /// Exit from the hazard area.
    GateOut,
}

impl EventKind {
    /// SQL string representation.
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::EntryPass => "ENTRY_PASS",
            Self::ExitPass => "EXIT_PASS",
            Self::ClearanceOk => "CLEARANCE_OK",
            Self::ClearanceFail => "CLEARANCE_FAIL",
            Self::ToolTake => "TOOL_TAKE",
            Self::ToolReturn => "TOOL_RETURN",
            Self::GateIn => "GATE_IN",
            Self::GateOut => "GATE_OUT",
        }
    }

    /// Whether admitting this kind requires a prior safety clearance
    /// within the configured window.
    pub fn requires_clearance(self) -> bool {
        matches!(self, Self::GateIn | Self::ToolTake)
    }

    /// Whether this kind is itself a clearance record.
    pub fn is_clearance(self) -> bool {
        matches!(self, Self::ClearanceOk | Self::ClearanceFail)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// Error returned when a SQL string is not a known [`EventKind`].
#[derive(Debug, thiserror::Error)]
#[error("unknown event kind: {0}")]
pub struct ParseKindError(pub String);

impl FromStr for EventKind {
    type Err = ParseKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ENTRY_PASS" => Ok(Self::EntryPass),
            "EXIT_PASS" => Ok(Self::ExitPass),
            "CLEARANCE_OK" => Ok(Self::ClearanceOk),
            "CLEARANCE_FAIL" => Ok(Self::ClearanceFail),
            "TOOL_TAKE" => Ok(Self::ToolTake),
            "TOOL_RETURN" => Ok(Self::ToolReturn),
            "GATE_IN" => Ok(Self::GateIn),
            "GATE_OUT" => Ok(Self::GateOut),
            other => Err(ParseKindError(other.to_string())),
        }
    }
}

/// Persisted outcome of an admission decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Disposition {
    /// The event was admitted.
    Accepted,
    /// The event was admitted as a rejection (auditable occurrence).
    Rejected,
}

impl Disposition {
    /// SQL string representation.
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Accepted => "ACCEPTED",
            Self::Rejected => "REJECTED",
        }
    }
}

impl FromStr for Disposition {
    type Err = ParseKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACCEPTED" => Ok(Self::Accepted),
            "REJECTED" => Ok(Self::Rejected),
            other => Err(ParseKindError(other.to_string())),
        }
    }
}

/// Result of a safety clearance exam.
///
/// The rank (`Passed > UnderReview > Failed > Unknown`) is the final
/// leg of the deterministic tie-break ordering when clearance records
/// compete for "most recent". Enrichment precedence is separate: it
/// moves toward certainty, so a concrete `Passed`/`Failed` is never
/// downgraded by a later, less certain read.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClearanceResult {
    /// No reliable result parsed from the source.
    Unknown,
    /// Exam failed.
    Failed,
    /// Exam awaiting manual review at the source.
    UnderReview,
    /// Exam passed.
    Passed,
}

impl ClearanceResult {
    /// Total rank used by the deterministic tie-break ordering.
    pub fn rank(self) -> u8 {
        match self {
            Self::Unknown => 0,
            Self::Failed => 1,
            Self::UnderReview => 2,
            Self::Passed => 3,
        }
    }

    /// Whether this result is terminal (a later ambiguous read must not
    /// overwrite it).
    pub fn is_concrete(self) -> bool {
        matches!(self, Self::Passed | Self::Failed)
    }

    /// SQL string representation.
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Failed => "failed",
            Self::UnderReview => "under_review",
            Self::Passed => "passed",
        }
    }
}

impl FromStr for ClearanceResult {
    type Err = ParseKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unknown" => Ok(Self::Unknown),
            "failed" => Ok(Self::Failed),
            "under_review" => Ok(Self::UnderReview),
            "passed" => Ok(Self::Passed),
            other => Err(ParseKindError(other.to_string())),
        }
    }
}

/// Unresolved candidate key identifying the person an event is about.
///
/// Adapters never resolve subjects themselves; the pipeline resolves
/// the key against the store and drops events whose key matches nothing.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "by")]
pub enum SubjectKey {
    /// Badge / employee number printed on the pass card.
    EmployeeNo {
        /// The employee number.
        no: String,
    },
    /// Identifier scoped to an external system (e.g. a vendor terminal).
    External {
        /// External system name, e.g. `"EXAM_PORTAL"`.
        system: String,
        /// Identifier within that system.
        id: String,
    },
}

impl SubjectKey {
    /// Convenience constructor for employee-number keys.
    pub fn employee_no(no: impl Into<String>) -> Self {
        Self::EmployeeNo { no: no.into() }
    }

    /// Convenience constructor for external-system keys.
    pub fn external(system: impl Into<String>, id: impl Into<String>) -> Self {
        Self::External {
            system: system.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for SubjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmployeeNo { no } => write!(f, "no:{no}"),
            Self::External { system, id } => write!(f, "{system}:{id}"),
        }
    }
}

/// The common shape every adapter must produce before the engine sees
/// an occurrence. Transient; never persisted as-is.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NormalizedEvent {
    /// Stable code of the reporting device / channel.
    pub device_code: String,
    /// Candidate key for the person involved.
    pub subject: SubjectKey,
    /// What happened.
    pub kind: EventKind,
    /// Source-reported occurrence time; `None` falls back to receipt
    /// time at admission.
    pub occurred_at: Option<DateTime<Utc>>,
    /// Source-scoped string unique per occurrence (vendor serial number,
    /// portal record id, or composite fallback). The idempotency key.
    pub dedup_key: String,
    /// Source-native ordinal for pull sources; drives sync checkpoints.
    pub ordinal: Option<i64>,
    /// Pull-source identifier the ordinal is scoped to. Stamped by the
    /// sync loop; push events leave it empty.
    pub source_id: Option<String>,
    /// Opaque structured blob retained for audit/debug. Never
    /// interpreted by the engine.
    pub payload: Value,
}

impl NormalizedEvent {
    /// Build a minimal event with an empty payload.
    pub fn new(
        device_code: impl Into<String>,
        subject: SubjectKey,
        kind: EventKind,
        dedup_key: impl Into<String>,
    ) -> Self {
        Self {
            device_code: device_code.into(),
            subject,
            kind,
            occurred_at: None,
            dedup_key: dedup_key.into(),
            ordinal: None,
            source_id: None,
            payload: Value::Null,
        }
    }

    /// Set the occurrence time.
    #[must_use]
    pub fn at(mut self, ts: DateTime<Utc>) -> Self {
        self.occurred_at = Some(ts);
        self
    }

    /// Set the source-native ordinal.
    #[must_use]
    pub fn with_ordinal(mut self, ordinal: i64) -> Self {
        self.ordinal = Some(ordinal);
        self
    }

    /// Set the pull-source identifier the ordinal belongs to.
    #[must_use]
    pub fn from_source(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = Some(source_id.into());
        self
    }

    /// Set the opaque payload.
    #[must_use]
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
