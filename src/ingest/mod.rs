//! Log ingestion for traceroute results.
//!
//! Each hop becomes one flat record with dotted attribute keys; records are
//! handed to a [`LogSink`].

mod records;
mod sink;

pub use records::*;
pub use sink::*;

use thiserror::Error;

/// Ingestion error types.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Invalid traceroute result provided")]
    InvalidResult,
    #[error("network error: {0}")]
    Network(String),
    #[error("log ingest returned HTTP {0}")]
    Status(u16),
    #[error("failed to encode records: {0}")]
    Encode(#[from] serde_json::Error),
}
