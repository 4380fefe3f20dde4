//! Error taxonomy for the ingestion pipeline.
//!
//! Timeouts and oversized datagrams are deliberately *not* errors: the
//! source reports them as recoverable read outcomes (see [`crate::source`]).

use std::io;
use thiserror::Error;

/// Errors surfaced by endpoint classification, capability acquisition,
/// socket setup and transport-stream demuxing.
#[derive(Debug, Error)]
pub enum IngestError {
    /// The stream URL or host could not be parsed/classified.
    #[error("malformed stream URL: {0}")]
    Classification(String),

    /// The platform refused the multicast-receive capability.
    #[error("multicast capability unavailable: {0}")]
    Capability(String),

    /// Socket bind / multicast join failed. Fatal for the open attempt,
    /// never retried internally.
    #[error("failed to open datagram source ({context})")]
    Open {
        context: String,
        #[source]
        source: io::Error,
    },

    /// Socket receive failure after a successful open.
    #[error("transport error")]
    Transport(#[source] io::Error),

    /// The demuxer could not produce a single access unit within its
    /// resynchronization bound.
    #[error("transport stream demux failure: {0}")]
    Demux(String),
}

impl IngestError {
    pub(crate) fn open(context: impl Into<String>, source: io::Error) -> Self {
        IngestError::Open {
            context: context.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;
