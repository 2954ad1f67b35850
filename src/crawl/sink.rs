use std::collections::HashSet;

use super::JobRecord;
use crate::error::SinkError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    Inserted,
    /// A record with this URL was already stored. Not an error.
    AlreadyStored,
}

/// Durable storage for finished records.
///
/// Idempotency on `url` is the sink's job. Errors are reported back but the
/// crawl treats them as recoverable.
pub trait ResultSink {
    fn persist(&self, record: &JobRecord) -> Result<PersistOutcome, SinkError>;

    /// URLs already stored, used to skip jobs seen by earlier runs.
    fn known_urls(&self) -> Result<HashSet<String>, SinkError>;
}
