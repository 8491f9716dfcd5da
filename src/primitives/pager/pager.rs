use std::ops::Range;
use std::path::Path;

use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::primitives::io::FileIo;
use crate::types::{BufferError, PageNo, Result};

use super::cache::PageCache;
use super::index::{LineIndex, LineLoc};
use super::page::Page;
use super::policy::EvictionPolicy;
use super::store::PageStore;

/// Snapshot of cache and I/O counters.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BufferStats {
    /// Demand accesses served from a resident page.
    pub hits: u64,
    /// Demand accesses that had to load the page.
    pub misses: u64,
    /// Pages removed to stay within the page budget.
    pub evictions: u64,
    /// Dirty pages written to the spill file.
    pub dirty_writebacks: u64,
    /// Page loads that failed and produced a placeholder page.
    pub load_failures: u64,
    /// Write-backs that failed during eviction; those edits are lost.
    pub writeback_failures: u64,
    /// Demand accesses that landed on a page brought in by the prefetcher.
    pub prefetch_hits: u64,
    /// Prefetched pages evicted before any demand access.
    pub prefetch_misses: u64,
    /// Pages currently resident.
    pub pages_in_memory: usize,
    /// Bytes appended to the spill file since it was last emptied by a save,
    /// load or clear. Rewritten pages are appended again, so this only grows.
    pub spill_bytes: u64,
}

impl BufferStats {
    /// Fraction of demand accesses that hit, `0.0` before any access.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Fraction of resolved prefetches that were used, if any resolved.
    pub fn prefetch_effectiveness(&self) -> Option<f64> {
        let total = self.prefetch_hits + self.prefetch_misses;
        (total > 0).then(|| self.prefetch_hits as f64 / total as f64)
    }
}

/// Why a page is being made resident.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Access {
    /// A buffer operation needs the page now; counts as a hit or miss.
    Demand,
    /// Speculative load; never counted as a hit or miss.
    Prefetch,
}

/// Pages lines in and out of memory on top of a [`LineIndex`] and [`PageStore`].
///
/// Line `i` lives on page `i / page_size` at slot `i % page_size`. Every
/// resident page holds exactly the lines its range covers in the index.
#[derive(Debug)]
pub struct Pager {
    page_size: usize,
    index: LineIndex,
    store: PageStore,
    cache: PageCache,
    stats: BufferStats,
}

impl Pager {
    /// Creates a pager. `page_size` and `cache_size` must be non-zero.
    pub fn new(
        index: LineIndex,
        store: PageStore,
        page_size: usize,
        cache_size: usize,
        policy: EvictionPolicy,
    ) -> Result<Self> {
        if page_size == 0 {
            return Err(BufferError::Invalid("page size must be non-zero"));
        }
        if cache_size == 0 {
            return Err(BufferError::Invalid("cache size must be non-zero"));
        }
        Ok(Self {
            page_size,
            index,
            store,
            cache: PageCache::new(cache_size, policy),
            stats: BufferStats::default(),
        })
    }

    /// Lines per page.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Page budget.
    pub fn cache_size(&self) -> usize {
        self.cache.capacity()
    }

    /// Total number of lines; at least one.
    pub fn line_count(&self) -> usize {
        self.index.len()
    }

    /// Number of pages covering the buffer.
    pub fn page_count(&self) -> usize {
        self.line_count().div_ceil(self.page_size).max(1)
    }

    /// Page number and in-page slot of `line`.
    pub fn locate(&self, line: usize) -> (PageNo, usize) {
        (PageNo(line / self.page_size), line % self.page_size)
    }

    /// Line numbers covered by page `no`, clipped to the buffer length.
    pub fn page_range(&self, no: PageNo) -> Range<usize> {
        let len = self.line_count();
        let start = no.0.saturating_mul(self.page_size).min(len);
        let end = start.saturating_add(self.page_size).min(len);
        start..end
    }

    /// Line index backing this pager.
    pub fn index(&self) -> &LineIndex {
        &self.index
    }

    /// Backing file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.store.path()
    }

    /// Page cache, for inspection.
    pub fn cache(&self) -> &PageCache {
        &self.cache
    }

    /// Active eviction policy.
    pub fn policy(&self) -> EvictionPolicy {
        self.cache.policy()
    }

    /// Current counters.
    pub fn stats(&self) -> BufferStats {
        BufferStats {
            pages_in_memory: self.cache.len(),
            spill_bytes: self.store.spill_len(),
            ..self.stats.clone()
        }
    }

    /// Zeroes every counter.
    pub fn reset_stats(&mut self) {
        self.stats = BufferStats::default();
    }

    /// Routes future write-backs through `io`.
    pub fn install_spill(&mut self, io: Box<dyn FileIo>) -> Result<()> {
        self.store.install_spill(io)
    }

    /// Whether page `no` is resident.
    pub fn is_resident(&self, no: PageNo) -> bool {
        self.cache.contains(no)
    }

    /// Resident page, without touching it.
    pub fn page(&self, no: PageNo) -> Option<&Page> {
        self.cache.get(no)
    }

    /// Resident page for mutation, without touching it.
    pub fn page_mut(&mut self, no: PageNo) -> Option<&mut Page> {
        self.cache.get_mut(no)
    }

    /// Pins a resident page so it cannot be chosen as a victim.
    pub fn pin(&mut self, no: PageNo) -> bool {
        self.cache.pin(no)
    }

    /// Releases a pin taken with [`Pager::pin`].
    pub fn unpin(&mut self, no: PageNo) {
        self.cache.unpin(no);
    }

    /// Makes page `no` resident, loading it and evicting as needed.
    ///
    /// A prefetch is skipped when the cache is full and every resident page
    /// is pinned, so speculative loads never exceed the budget.
    ///
    /// Load failures never surface here: the page comes back degraded and
    /// the failure is logged and counted.
    pub fn access(&mut self, no: PageNo, access: Access) {
        match access {
            Access::Demand => {
                if let Some(was_prefetched) = self.cache.touch(no) {
                    self.stats.hits += 1;
                    if was_prefetched {
                        self.stats.prefetch_hits += 1;
                    }
                    trace!(page = no.0, prefetched = was_prefetched, "pager.cache.hit");
                    return;
                }
                self.stats.misses += 1;
                trace!(page = no.0, "pager.cache.miss");
            }
            Access::Prefetch => {
                if self.cache.contains(no) {
                    return;
                }
                if self.cache.len() >= self.cache.capacity() && self.cache.victim().is_none() {
                    trace!(page = no.0, "pager.cache.prefetch_skipped");
                    return;
                }
                trace!(page = no.0, "pager.cache.prefetch_load");
            }
        }
        let page = self.load(no);
        self.cache.admit(no, page, access == Access::Demand);
        self.cache.pin(no);
        self.evict_over_budget();
        self.cache.unpin(no);
    }

    fn load(&mut self, no: PageNo) -> Page {
        let range = self.page_range(no);
        let expected = range.len();
        match self.store.read_lines(self.index.slice(range)) {
            Ok(lines) => Page::new(lines, 0),
            Err(err) => {
                self.stats.load_failures += 1;
                warn!(page = no.0, lines = expected, error = %err, "pager.store.load_failed");
                Page::degraded(expected, 0)
            }
        }
    }

    /// Evicts unpinned pages until the budget is met or only pinned pages remain.
    pub fn evict_over_budget(&mut self) {
        while self.cache.over_budget() {
            let Some(victim) = self.cache.victim() else {
                debug!(
                    resident = self.cache.len(),
                    capacity = self.cache.capacity(),
                    "pager.cache.all_pinned"
                );
                break;
            };
            self.evict(victim);
        }
    }

    fn evict(&mut self, no: PageNo) {
        let Some(page) = self.cache.remove(no, true) else {
            return;
        };
        self.stats.evictions += 1;
        if page.prefetched {
            self.stats.prefetch_misses += 1;
        }
        if page.dirty {
            if let Err(err) = self.write_lines_back(no, &page.lines) {
                self.stats.writeback_failures += 1;
                warn!(page = no.0, error = %err, "pager.store.writeback_failed");
            }
        }
        trace!(
            page = no.0,
            dirty = page.dirty,
            arc_target = ?self.cache.arc_target(),
            "pager.cache.evict"
        );
    }

    fn write_lines_back(&mut self, no: PageNo, lines: &[String]) -> Result<()> {
        let range = self.page_range(no);
        if range.len() != lines.len() {
            return Err(BufferError::Corruption("page length disagrees with line index"));
        }
        let locs = self.store.write_lines(lines)?;
        self.index.redirect(range.start, &locs)?;
        self.stats.dirty_writebacks += 1;
        Ok(())
    }

    fn write_back_resident(&mut self, no: PageNo) -> Result<()> {
        let range = self.page_range(no);
        let Some(page) = self.cache.get(no) else {
            return Ok(());
        };
        if !page.dirty {
            return Ok(());
        }
        if range.len() != page.lines.len() {
            return Err(BufferError::Corruption("page length disagrees with line index"));
        }
        let locs = self.store.write_lines(&page.lines)?;
        self.index.redirect(range.start, &locs)?;
        self.stats.dirty_writebacks += 1;
        if let Some(page) = self.cache.get_mut(no) {
            page.dirty = false;
        }
        Ok(())
    }

    /// Re-reads a resident placeholder page before it is edited.
    ///
    /// Fails, leaving the placeholder in place, if the store still cannot
    /// produce the lines.
    pub fn repair(&mut self, no: PageNo) -> Result<()> {
        if !self.cache.get(no).is_some_and(|page| page.degraded && !page.dirty) {
            return Ok(());
        }
        let range = self.page_range(no);
        let lines = self.store.read_lines(self.index.slice(range))?;
        if let Some(page) = self.cache.get_mut(no) {
            page.lines = lines;
            page.degraded = false;
        }
        debug!(page = no.0, "pager.store.page_repaired");
        Ok(())
    }

    /// Writes every dirty resident page to the spill file; pages stay resident.
    pub fn flush_dirty(&mut self) -> Result<usize> {
        let mut flushed = 0;
        for no in self.cache.resident() {
            if self.cache.get(no).is_some_and(|page| page.dirty) {
                self.write_back_resident(no)?;
                flushed += 1;
            }
        }
        Ok(flushed)
    }

    /// Writes back and drops every resident page numbered `from` or higher.
    ///
    /// Stops at the first failed write-back, leaving that page and the ones
    /// after it resident.
    fn invalidate_from(&mut self, from: PageNo) -> Result<()> {
        for no in self.cache.resident().into_iter().filter(|no| *no >= from) {
            self.write_back_resident(no)?;
            self.cache.remove(no, false);
        }
        Ok(())
    }

    /// Drops every resident page without writing anything back.
    fn drop_all(&mut self) {
        for no in self.cache.resident() {
            self.cache.remove(no, false);
        }
    }

    /// Replaces the lines in `range` with `lines`, shifting later lines.
    ///
    /// Resident pages at or after the first affected page are written back
    /// and dropped first, so no resident page ever straddles a shift.
    pub fn splice(&mut self, range: Range<usize>, lines: Vec<String>) -> Result<()> {
        if range.start > range.end || range.end > self.line_count() {
            return Err(BufferError::InvalidRange("splice range"));
        }
        let (first, _) = self.locate(range.start);
        self.invalidate_from(first)?;
        let locs = self.store.write_lines(&lines)?;
        self.index.splice(range.clone(), locs)?;
        debug!(
            start = range.start,
            removed = range.len(),
            inserted = lines.len(),
            lines = self.line_count(),
            "pager.index.spliced"
        );
        Ok(())
    }

    /// Appends a line after the last one without shifting any page.
    pub fn append_line(&mut self, text: String) -> Result<()> {
        let line = self.line_count();
        let (no, slot) = self.locate(line);
        self.repair(no)?;
        match self.cache.get_mut(no) {
            Some(page) if page.lines.len() == slot => {
                page.lines.push(text);
                page.dirty = true;
                self.index.push(LineLoc::Blank);
            }
            Some(_) => return Err(BufferError::Corruption("page length disagrees with line index")),
            None => {
                let locs = self.store.write_lines(std::slice::from_ref(&text))?;
                let loc = locs.first().copied().unwrap_or(LineLoc::Blank);
                self.index.push(loc);
            }
        }
        Ok(())
    }

    /// Calls `f` with the lines of page `no` without admitting it.
    ///
    /// Resident pages are used as-is unless they are clean placeholders from
    /// a failed load, in which case the store is asked again.
    pub fn with_page_lines<R>(
        &mut self,
        no: PageNo,
        f: impl FnOnce(&[String]) -> Result<R>,
    ) -> Result<R> {
        if let Some(page) = self.cache.get(no) {
            if !page.degraded || page.dirty {
                return f(&page.lines);
            }
        }
        let range = self.page_range(no);
        let lines = self.store.read_lines(self.index.slice(range))?;
        f(&lines)
    }

    /// Reads a single line without admitting its page.
    pub fn peek_line(&mut self, line: usize) -> Result<String> {
        let (no, slot) = self.locate(line);
        self.with_page_lines(no, |lines| {
            lines
                .get(slot)
                .cloned()
                .ok_or(BufferError::line(line, lines.len()))
        })
    }

    /// Changes lines per page. Dirty pages are written back and the cache emptied.
    pub fn set_page_size(&mut self, page_size: usize) -> Result<()> {
        if page_size == 0 {
            return Err(BufferError::Invalid("page size must be non-zero"));
        }
        if page_size == self.page_size {
            return Ok(());
        }
        self.flush_dirty()?;
        self.drop_all();
        self.page_size = page_size;
        debug!(page_size, "pager.page_size_changed");
        Ok(())
    }

    /// Changes the page budget and evicts down to it.
    pub fn set_cache_size(&mut self, cache_size: usize) -> Result<()> {
        if cache_size == 0 {
            return Err(BufferError::Invalid("cache size must be non-zero"));
        }
        self.cache.set_capacity(cache_size);
        self.evict_over_budget();
        Ok(())
    }

    /// Switches the eviction policy, keeping resident pages.
    pub fn set_policy(&mut self, policy: EvictionPolicy) {
        if policy != self.cache.policy() {
            self.cache.set_policy(policy);
            debug!(policy = policy.as_str(), "pager.cache.policy_changed");
        }
    }

    /// Resets to a single empty line, discarding pages and spill records.
    pub fn clear(&mut self) {
        self.drop_all();
        self.index = LineIndex::blank();
        self.store.reset_spill();
    }

    /// Swaps in a freshly opened store, e.g. after saving over the backing file.
    ///
    /// The new index must describe the same lines, so clean copies of
    /// resident pages stay valid; placeholder pages are dropped.
    pub fn rebind(&mut self, store: PageStore, index: LineIndex) -> Result<()> {
        if index.len() != self.index.len() {
            return Err(BufferError::Corruption("rebound index changed line count"));
        }
        self.store = store;
        self.index = index;
        for no in self.cache.resident() {
            let degraded = match self.cache.get_mut(no) {
                Some(page) => {
                    page.dirty = false;
                    page.degraded
                }
                None => false,
            };
            if degraded {
                self.cache.remove(no, false);
            }
        }
        Ok(())
    }

    /// Replaces store, index and cache wholesale, e.g. when loading another file.
    pub fn replace(&mut self, store: PageStore, index: LineIndex) {
        self.drop_all();
        self.store = store;
        self.index = index;
    }
}
