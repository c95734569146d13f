//! Error type shared by every pipeline stage.

use std::collections::TryReserveError;
use std::io;

use symphonia::core::errors::Error as SymphoniaError;
use thiserror::Error;

use crate::format::SampleFormat;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, StreamError>;

/// Failures (and the end-of-stream status) reported by sample sources.
#[derive(Debug, Error)]
pub enum StreamError {
    /// A typed reader was applied to a source with a different storage layout.
    #[error("sample format mismatch: expected {expected:?}, found {found:?}")]
    FormatMismatch {
        expected: SampleFormat,
        found: SampleFormat,
    },

    /// A converter context or sample buffer could not be allocated.
    #[error("allocation failed: {0}")]
    Allocation(String),

    /// The demuxer, codec or converter reported an error.
    #[error("upstream error: {0:#}")]
    Upstream(anyhow::Error),

    /// No further data will be produced by this source.
    #[error("end of stream")]
    EndOfStream,
}

impl StreamError {
    pub fn upstream(msg: impl std::fmt::Display) -> Self {
        StreamError::Upstream(anyhow::anyhow!("{msg}"))
    }

    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, StreamError::EndOfStream)
    }
}

impl From<anyhow::Error> for StreamError {
    fn from(e: anyhow::Error) -> Self {
        StreamError::Upstream(e)
    }
}

impl From<TryReserveError> for StreamError {
    fn from(e: TryReserveError) -> Self {
        StreamError::Allocation(e.to_string())
    }
}

impl From<SymphoniaError> for StreamError {
    fn from(e: SymphoniaError) -> Self {
        match e {
            SymphoniaError::IoError(err) if err.kind() == io::ErrorKind::UnexpectedEof => {
                StreamError::EndOfStream
            }
            other => StreamError::Upstream(anyhow::Error::new(other)),
        }
    }
}
