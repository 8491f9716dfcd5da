//! Paged, file-backed text buffer for editing files larger than memory.
//!
//! Lines are grouped into fixed-size pages that are loaded on demand from
//! the backing file, kept in a bounded cache under one of several eviction
//! policies, and speculatively prefetched based on observed access
//! patterns. Edits never touch the backing file until the buffer is saved.
//!
//! ```no_run
//! use pagebuf::{BufferOptions, VirtualBuffer};
//!
//! # fn main() -> pagebuf::Result<()> {
//! let mut buffer = VirtualBuffer::open("big.log", BufferOptions::default())?;
//! buffer.insert_string(10, 0, "// ")?;
//! buffer.save_to_file("big.log")?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod buffer;
pub mod cli;
pub mod primitives;
pub mod types;

pub use buffer::{BufferOptions, SharedBuffer, VirtualBuffer};
pub use primitives::pager::{BufferStats, EvictionPolicy};
pub use primitives::prefetch::PrefetchStrategy;
pub use types::{BufferError, PageNo, Result};
