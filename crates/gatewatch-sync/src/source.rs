//! The pull-source abstraction.
//!
//! A pull source is any upstream the loop polls for ordered records;
//! an exam portal, a vendor event API. Adapters normalize upstream rows
//! into [`NormalizedEvent`]s before the loop sees them; rows missing a
//! kind, subject, or dedup key never leave the adapter.

use async_trait::async_trait;

use gatewatch_core::NormalizedEvent;

use crate::errors::Result;

/// An upstream system polled for ordered records.
///
/// Every returned event must carry a source-native `ordinal`; the loop
/// drops and counts any that do not, because checkpointing is
/// meaningless without them.
#[async_trait]
pub trait PullSource: Send + Sync {
    /// Stable identifier, the checkpoint key.
    fn source_id(&self) -> &str;

    /// Records with ordinal strictly greater than `high_water_mark`,
    /// oldest first, bounded by `max_pages`.
    async fn fetch_since(&self, high_water_mark: i64, max_pages: u32)
    -> Result<Vec<NormalizedEvent>>;

    /// The most recent records regardless of the checkpoint, for the
    /// bounded re-scan that catches rows the source corrected or
    /// back-filled.
    async fn fetch_recent(&self, max_pages: u32) -> Result<Vec<NormalizedEvent>>;

    /// Full detail for one record by ordinal, for the repair pass.
    /// Sources without a detail endpoint keep the default.
    async fn fetch_detail(&self, ordinal: i64) -> Result<Option<NormalizedEvent>> {
        let _ = ordinal;
        Ok(None)
    }
}
