use std::time::Duration;

use thiserror::Error;

use dv_store::StoreError;

use crate::state::ExtractionStatus;

/// Failure reported by a [`SourceProvider`](crate::source::SourceProvider).
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    /// The single item could not be fetched. The job continues.
    #[error("Item unavailable: {0}")]
    ItemUnavailable(String),

    /// The item was fetched but is missing required fields.
    #[error("Malformed item: {0}")]
    Malformed(String),

    #[error("Fetch timed out after {0:?}")]
    Timeout(Duration),

    /// The source as a whole cannot be reached. Aborts the job.
    #[error("Source unreachable: {0}")]
    Unreachable(String),
}

impl SourceError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Unreachable(_))
    }
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Failed to fetch item {index}: {source}")]
    ItemFetch { index: usize, source: SourceError },

    #[error("Extraction aborted: {0}")]
    JobFatal(String),

    #[error("An extraction job for {0} is already running")]
    AlreadyRunning(String),

    #[error("Cannot {action} while {status}")]
    InvalidTransition {
        action: &'static str,
        status: ExtractionStatus,
    },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}
