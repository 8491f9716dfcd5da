//! Reader/writer-locked handle to a [`VirtualBuffer`].

use std::io::Write;
use std::ops::Range;
use std::path::Path;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::primitives::pager::{BufferStats, EvictionPolicy};
use crate::primitives::prefetch::PrefetchStrategy;
use crate::types::Result;

use super::VirtualBuffer;

/// Cloneable, thread-safe handle to one [`VirtualBuffer`].
///
/// Each method holds the lock for one call: shared for reads, exclusive for
/// edits. Multi-step sequences that must appear atomic take a guard from
/// [`SharedBuffer::lock_for_reading`] or [`SharedBuffer::lock_for_writing`];
/// the lock is released when the guard drops.
///
/// There is no accessor handing out a reference into the buffer. Reads
/// return copies and in-place edits go through [`SharedBuffer::modify_line`].
#[derive(Clone, Debug)]
pub struct SharedBuffer {
    inner: Arc<RwLock<VirtualBuffer>>,
}

macro_rules! shared_read {
    ($($(#[$meta:meta])* fn $name:ident($($arg:ident: $ty:ty),*) $(-> $ret:ty)?;)*) => {
        $(
            $(#[$meta])*
            pub fn $name(&self, $($arg: $ty),*) $(-> $ret)? {
                self.inner.read().$name($($arg),*)
            }
        )*
    };
}

macro_rules! shared_write {
    ($($(#[$meta:meta])* fn $name:ident($($arg:ident: $ty:ty),*) $(-> $ret:ty)?;)*) => {
        $(
            $(#[$meta])*
            pub fn $name(&self, $($arg: $ty),*) $(-> $ret)? {
                self.inner.write().$name($($arg),*)
            }
        )*
    };
}

impl SharedBuffer {
    /// Wraps `buffer`.
    pub fn new(buffer: VirtualBuffer) -> Self {
        Self {
            inner: Arc::new(RwLock::new(buffer)),
        }
    }

    /// Shared lock held until the guard drops. Other readers may proceed;
    /// writers wait.
    pub fn lock_for_reading(&self) -> RwLockReadGuard<'_, VirtualBuffer> {
        self.inner.read()
    }

    /// Exclusive lock held until the guard drops.
    pub fn lock_for_writing(&self) -> RwLockWriteGuard<'_, VirtualBuffer> {
        self.inner.write()
    }

    /// Runs `f` on line `index` in place under the exclusive lock.
    pub fn modify_line<R>(&self, index: usize, f: impl FnOnce(&mut String) -> R) -> Result<R> {
        self.inner.write().modify_line(index, f)
    }

    /// Appends a line.
    pub fn add_line(&self, text: impl Into<String>) -> Result<()> {
        self.inner.write().add_line(text)
    }

    /// Inserts a line before `index`.
    pub fn insert_line(&self, index: usize, text: impl Into<String>) -> Result<()> {
        self.inner.write().insert_line(index, text)
    }

    /// Replaces the content of line `index`.
    pub fn set_line(&self, index: usize, text: impl Into<String>) -> Result<()> {
        self.inner.write().set_line(index, text)
    }

    /// Same as [`SharedBuffer::set_line`].
    pub fn replace_line(&self, index: usize, text: impl Into<String>) -> Result<()> {
        self.inner.write().replace_line(index, text)
    }

    /// Inserts `lines` before `index`.
    pub fn insert_lines(&self, index: usize, lines: Vec<String>) -> Result<()> {
        self.inner.write().insert_lines(index, lines)
    }

    /// Writes every line to `out`.
    pub fn write_to<W: Write>(&self, out: &mut W) -> Result<()> {
        self.inner.read().write_to(out)
    }

    /// Saves under the exclusive lock, since saving may rebind the buffer.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        self.inner.write().save_to_file(path)
    }

    /// Replaces the content with `path`.
    pub fn load_from_file(&self, path: impl AsRef<Path>) -> Result<()> {
        self.inner.write().load_from_file(path)
    }

    shared_read! {
        /// Copy of line `index`.
        fn line(index: usize) -> Result<String>;
        /// Number of lines.
        fn line_count() -> usize;
        /// Copies of the lines in `range`.
        fn lines_in(range: Range<usize>) -> Result<Vec<String>>;
        /// True when the buffer holds a single empty line.
        fn is_empty() -> bool;
        /// Length of line `index` in chars.
        fn line_length(index: usize) -> Result<usize>;
        /// Total chars over all lines.
        fn character_count() -> Result<usize>;
        /// Every line; empty for a buffer holding one empty line.
        fn all_lines() -> Result<Vec<String>>;
        /// Every line.
        fn lines() -> Result<Vec<String>>;
        /// Whether `(line, col)` is inside the buffer.
        fn is_valid_position(line: usize, col: usize) -> bool;
        /// Nearest valid position.
        fn clamp_position(line: usize, col: usize) -> (usize, usize);
        /// Chars `start..end` of `line`.
        fn line_segment(line: usize, start: usize, end: usize) -> Result<String>;
        /// Next match of `needle` at or after `(line, col)`.
        fn find(needle: &str, line: usize, col: usize) -> Result<Option<(usize, usize)>>;
        /// Whether the content changed since the last load or save.
        fn is_modified() -> bool;
        /// Lines per page.
        fn page_size() -> usize;
        /// Maximum resident pages.
        fn cache_size() -> usize;
        /// Pages currently resident.
        fn pages_in_memory() -> usize;
        /// Whether page `no` is resident.
        fn is_page_resident(no: usize) -> bool;
        /// Active eviction policy.
        fn eviction_policy() -> EvictionPolicy;
        /// Active prefetch strategy.
        fn prefetch_strategy() -> PrefetchStrategy;
        /// Current adjacent-prefetch distance.
        fn prefetch_distance() -> usize;
        /// Pages the prefetcher loads per triggering access.
        fn prefetch_batch() -> usize;
        /// Bound on pending prefetch requests.
        fn max_prefetch_queue_size() -> usize;
        /// Pending prefetch requests.
        fn pending_prefetches() -> usize;
        /// Fraction of demand page accesses served from memory.
        fn cache_hit_rate() -> f64;
        /// Snapshot of cache counters.
        fn stats() -> BufferStats;
        /// Zeroes the cache counters.
        fn reset_cache_stats();
        /// Loads the pages covering lines `start..=end`.
        fn prefetch_lines(start: usize, end: usize) -> usize;
        /// Loads up to `max_pages` pending prefetch requests.
        fn process_prefetch_queue(max_pages: usize) -> usize;
    }

    shared_write! {
        /// Removes line `index`.
        fn delete_line(index: usize) -> Result<()>;
        /// Removes lines `start..end`.
        fn delete_lines(start: usize, end: usize) -> Result<()>;
        /// Inserts `ch` at `(line, col)`.
        fn insert_char(line: usize, col: usize, ch: char) -> Result<()>;
        /// Backspace at `(line, col)`.
        fn delete_char(line: usize, col: usize) -> Result<()>;
        /// Delete at `(line, col)`.
        fn delete_char_forward(line: usize, col: usize) -> Result<()>;
        /// Replaces chars `start..end` of `line`.
        fn replace_line_segment(line: usize, start: usize, end: usize, text: &str) -> Result<()>;
        /// Removes chars `start..end` of `line`.
        fn delete_line_segment(line: usize, start: usize, end: usize) -> Result<()>;
        /// Splits `line` at `col`.
        fn split_line(line: usize, col: usize) -> Result<()>;
        /// Joins `line` with the next line.
        fn join_lines(line: usize) -> Result<()>;
        /// Inserts `text` at `(line, col)`.
        fn insert_string(line: usize, col: usize, text: &str) -> Result<()>;
        /// Same as [`SharedBuffer::insert_string`].
        fn insert_text(line: usize, col: usize, text: &str) -> Result<()>;
        /// Removes the text between two positions.
        fn delete_text(start_line: usize, start_col: usize, end_line: usize, end_col: usize) -> Result<()>;
        /// Replaces the text between two positions.
        fn replace_text(start_line: usize, start_col: usize, end_line: usize, end_col: usize, text: &str) -> Result<()>;
        /// Resets to a single empty line.
        fn clear();
        /// Overrides the modified flag.
        fn set_modified(modified: bool);
        /// Changes lines per page.
        fn set_page_size(page_size: usize) -> Result<()>;
        /// Changes the page budget.
        fn set_cache_size(cache_size: usize) -> Result<()>;
        /// Switches eviction policy, keeping resident pages.
        fn set_eviction_policy(policy: EvictionPolicy);
        /// Switches prefetch strategy.
        fn set_prefetch_strategy(strategy: PrefetchStrategy);
        /// Sets the adjacent-prefetch distance.
        fn set_prefetch_distance(distance: usize);
        /// Changes pages loaded per triggering access.
        fn set_prefetch_batch(batch: usize);
        /// Changes the bound on pending prefetch requests.
        fn set_max_prefetch_queue_size(max_len: usize);
        /// Changes how many page accesses predictive prefetching remembers.
        fn set_recent_accesses_max(max_recent: usize);
        /// Writes dirty resident pages to the spill file.
        fn flush() -> Result<usize>;
    }
}

impl From<VirtualBuffer> for SharedBuffer {
    fn from(buffer: VirtualBuffer) -> Self {
        Self::new(buffer)
    }
}
