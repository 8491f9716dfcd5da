#![forbid(unsafe_code)]

//! Shared identifiers and the crate-wide error type.

use std::fmt;

use thiserror::Error;

/// Zero-based page number: line `i` lives on page `i / page_size`.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
pub struct PageNo(pub usize);

impl PageNo {
    /// Absolute distance between two page numbers.
    pub fn distance(self, other: PageNo) -> usize {
        self.0.abs_diff(other.0)
    }
}

impl fmt::Display for PageNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors surfaced by buffer, pager and configuration code.
#[derive(Debug, Error)]
pub enum BufferError {
    /// Underlying file operation failed.
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    /// A line or column index was past the end.
    #[error("{what} index {index} out of range (len {len})")]
    OutOfRange {
        /// What was being indexed (`"line"`, `"column"`, ...).
        what: &'static str,
        /// Requested index.
        index: usize,
        /// Current length of the indexed sequence.
        len: usize,
    },
    /// A start/end pair was reversed or otherwise unusable.
    #[error("invalid range: {0}")]
    InvalidRange(&'static str),
    /// An argument or option value was rejected.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// Persisted data failed validation.
    #[error("corruption: {0}")]
    Corruption(&'static str),
}

impl BufferError {
    /// Shorthand for an [`BufferError::OutOfRange`] on a line index.
    pub fn line(index: usize, len: usize) -> Self {
        BufferError::OutOfRange {
            what: "line",
            index,
            len,
        }
    }

    /// Shorthand for an [`BufferError::OutOfRange`] on a column.
    pub fn column(index: usize, len: usize) -> Self {
        BufferError::OutOfRange {
            what: "column",
            index,
            len,
        }
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, BufferError>;
