//! Feed-side plumbing for Fieldlapse: normalization of raw plext records
//! and the paginated newest-first ingest loop that feeds the history store.

use thiserror::Error;

pub mod ingest;
pub mod normalize;

pub use ingest::{FeedConfig, IngestSummary, Ingester, build_page_request, normalize_page};
pub use normalize::{NormalizedEvent, normalize_record};

/// Feed error wrapper.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("malformed feed payload: {0}")]
    Malformed(&'static str),
    #[error("storage error: {0}")]
    Storage(#[from] fieldlapse_storage::StorageError),
}
