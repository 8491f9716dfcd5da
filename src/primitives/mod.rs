//! Low-level building blocks of the paged buffer.
//!
//! Includes positioned file I/O, the pager with its line index, page store
//! and eviction policies, and the prefetch engine.

/// Positioned file I/O and the spill file.
///
/// Reads and writes at explicit offsets, plus the append-only record file
/// that holds lines evicted while dirty.
pub mod io;

/// Paging subsystem.
///
/// Maps line numbers to pages, loads pages on demand and keeps a bounded
/// set of them resident under a pluggable eviction policy.
pub mod pager;

/// Speculative page loading.
///
/// Tracks page access patterns and queues pages likely to be needed next.
pub mod prefetch;
