#![forbid(unsafe_code)]

//! Line-oriented text buffer paged in and out of memory on demand.
//!
//! [`VirtualBuffer`] resolves every line to a page and an in-page slot,
//! asks the pager for the page and lets the prefetch engine react to the
//! access. [`SharedBuffer`] wraps it in a reader/writer lock for use from
//! several threads.

mod lines;
mod options;
mod shared;
mod text;

use std::fs;
use std::io::{BufWriter, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::primitives::io::FileIo;
use crate::primitives::pager::{
    side_index_path, Access, BufferStats, EvictionPolicy, LineIndex, PageStore, Pager,
};
use crate::primitives::prefetch::{PrefetchEngine, PrefetchStrategy};
use crate::types::{BufferError, PageNo, Result};

pub use options::BufferOptions;
pub use shared::SharedBuffer;

#[derive(Debug)]
struct Inner {
    pager: Pager,
    prefetch: PrefetchEngine,
    modified: bool,
}

impl Inner {
    fn check_line(&self, line: usize) -> Result<()> {
        let len = self.pager.line_count();
        if line >= len {
            return Err(BufferError::line(line, len));
        }
        Ok(())
    }

    /// Demand access to page `no` followed by the prefetch hook.
    fn touch(&mut self, no: PageNo) {
        self.pager.access(no, Access::Demand);
        self.prefetch.on_demand_access(no, &mut self.pager);
    }

    fn read_line(&mut self, line: usize) -> Result<String> {
        self.check_line(line)?;
        let (no, slot) = self.pager.locate(line);
        self.touch(no);
        let page = self
            .pager
            .page(no)
            .ok_or(BufferError::Corruption("page not resident after access"))?;
        page.lines
            .get(slot)
            .cloned()
            .ok_or(BufferError::Corruption("page shorter than line index"))
    }

    /// Runs `f` on line `line` in place and marks its page dirty.
    fn edit_line<R>(&mut self, line: usize, f: impl FnOnce(&mut String) -> R) -> Result<R> {
        self.check_line(line)?;
        let (no, slot) = self.pager.locate(line);
        self.touch(no);
        self.pager.repair(no)?;
        let page = self
            .pager
            .page_mut(no)
            .ok_or(BufferError::Corruption("page not resident after access"))?;
        let text = page
            .lines
            .get_mut(slot)
            .ok_or(BufferError::Corruption("page shorter than line index"))?;
        let out = f(text);
        page.dirty = true;
        self.modified = true;
        Ok(out)
    }

    /// Replaces `range` with `lines`, then touches the page where the edit landed.
    fn splice(&mut self, range: Range<usize>, lines: Vec<String>) -> Result<()> {
        let start = range.start;
        self.pager.splice(range, lines)?;
        self.modified = true;
        let line = start.min(self.pager.line_count() - 1);
        let (no, _) = self.pager.locate(line);
        self.touch(no);
        Ok(())
    }

    /// Calls `f` once per page, in order, without admitting pages.
    fn for_each_page(&mut self, mut f: impl FnMut(&[String]) -> Result<()>) -> Result<()> {
        for no in 0..self.pager.page_count() {
            self.pager.with_page_lines(PageNo(no), &mut f)?;
        }
        Ok(())
    }

    fn write_to<W: Write>(&mut self, out: &mut W) -> Result<()> {
        self.for_each_page(|lines| {
            for line in lines {
                out.write_all(line.as_bytes())?;
                out.write_all(b"\n")?;
            }
            Ok(())
        })?;
        out.flush()?;
        Ok(())
    }
}

/// A text buffer whose lines live in a file-backed page cache.
///
/// Reads take `&self`; an internal mutex guards the cache bookkeeping they
/// update. Edits take `&mut self`. The buffer always holds at least one line.
#[derive(Debug)]
pub struct VirtualBuffer {
    inner: Mutex<Inner>,
}

impl VirtualBuffer {
    /// Empty buffer (a single empty line) with no backing file.
    pub fn new(options: BufferOptions) -> Result<Self> {
        Self::build(PageStore::detached(), LineIndex::blank(), options)
    }

    /// Opens `path` as the backing file. Only the line index is built up front.
    pub fn open(path: impl AsRef<Path>, options: BufferOptions) -> Result<Self> {
        let path = path.as_ref();
        let (store, index) = PageStore::open(path)?;
        info!(path = %path.display(), lines = index.len(), "buffer.open");
        Self::build(store, index, options)
    }

    fn build(store: PageStore, index: LineIndex, options: BufferOptions) -> Result<Self> {
        options.validate()?;
        let pager = Pager::new(
            index,
            store,
            options.page_size,
            options.cache_size,
            options.eviction_policy,
        )?;
        Ok(Self {
            inner: Mutex::new(Inner {
                pager,
                prefetch: PrefetchEngine::new(options.prefetch_options()),
                modified: false,
            }),
        })
    }

    fn read<R>(&self, f: impl FnOnce(&mut Inner) -> R) -> R {
        f(&mut self.inner.lock())
    }

    fn edit<R>(&mut self, f: impl FnOnce(&mut Inner) -> R) -> R {
        f(self.inner.get_mut())
    }

    /// Backing file, if the buffer has one.
    pub fn path(&self) -> Option<PathBuf> {
        self.read(|inner| inner.pager.path().map(Path::to_path_buf))
    }

    /// True once the content differs from what was last loaded or saved.
    pub fn is_modified(&self) -> bool {
        self.read(|inner| inner.modified)
    }

    /// Overrides the modified flag.
    pub fn set_modified(&mut self, modified: bool) {
        self.edit(|inner| inner.modified = modified);
    }

    /// Lines per page.
    pub fn page_size(&self) -> usize {
        self.read(|inner| inner.pager.page_size())
    }

    /// Changes lines per page. Dirty pages are written back and the cache
    /// and access history are dropped since page numbers change meaning.
    pub fn set_page_size(&mut self, page_size: usize) -> Result<()> {
        self.edit(|inner| {
            inner.pager.set_page_size(page_size)?;
            inner.prefetch.reset();
            Ok(())
        })
    }

    /// Maximum resident pages.
    pub fn cache_size(&self) -> usize {
        self.read(|inner| inner.pager.cache_size())
    }

    /// Changes the page budget, evicting down to it.
    pub fn set_cache_size(&mut self, cache_size: usize) -> Result<()> {
        self.edit(|inner| inner.pager.set_cache_size(cache_size))
    }

    /// Active eviction policy.
    pub fn eviction_policy(&self) -> EvictionPolicy {
        self.read(|inner| inner.pager.policy())
    }

    /// Switches eviction policy, keeping resident pages.
    pub fn set_eviction_policy(&mut self, policy: EvictionPolicy) {
        self.edit(|inner| inner.pager.set_policy(policy));
    }

    /// Active prefetch strategy.
    pub fn prefetch_strategy(&self) -> PrefetchStrategy {
        self.read(|inner| inner.prefetch.strategy())
    }

    /// Switches prefetch strategy; pending requests are dropped.
    pub fn set_prefetch_strategy(&mut self, strategy: PrefetchStrategy) {
        self.edit(|inner| inner.prefetch.set_strategy(strategy));
    }

    /// Current adjacent-prefetch distance.
    pub fn prefetch_distance(&self) -> usize {
        self.read(|inner| inner.prefetch.distance())
    }

    /// Sets the adjacent-prefetch distance.
    pub fn set_prefetch_distance(&mut self, distance: usize) {
        self.edit(|inner| inner.prefetch.set_distance(distance));
    }

    /// Bound on pending prefetch requests.
    pub fn max_prefetch_queue_size(&self) -> usize {
        self.read(|inner| inner.prefetch.max_queue_len())
    }

    /// Changes the bound on pending prefetch requests.
    pub fn set_max_prefetch_queue_size(&mut self, max_len: usize) {
        self.edit(|inner| inner.prefetch.set_max_queue_len(max_len));
    }

    /// Pages the prefetcher loads per triggering access.
    pub fn prefetch_batch(&self) -> usize {
        self.read(|inner| inner.prefetch.batch())
    }

    /// Changes pages loaded per triggering access; zero leaves requests queued
    /// for [`VirtualBuffer::process_prefetch_queue`].
    pub fn set_prefetch_batch(&mut self, batch: usize) {
        self.edit(|inner| inner.prefetch.set_batch(batch));
    }

    /// Changes how many page accesses predictive prefetching remembers.
    pub fn set_recent_accesses_max(&mut self, max_recent: usize) {
        self.edit(|inner| inner.prefetch.set_recent_accesses_max(max_recent));
    }

    /// Snapshot of cache counters.
    pub fn stats(&self) -> BufferStats {
        self.read(|inner| inner.pager.stats())
    }

    /// Fraction of demand page accesses served from memory.
    pub fn cache_hit_rate(&self) -> f64 {
        self.stats().hit_rate()
    }

    /// Pages currently resident.
    pub fn pages_in_memory(&self) -> usize {
        self.read(|inner| inner.pager.cache().len())
    }

    /// Zeroes hit, miss and prefetch counters.
    pub fn reset_cache_stats(&self) {
        self.read(|inner| inner.pager.reset_stats());
    }

    /// Whether page `no` is resident.
    pub fn is_page_resident(&self, no: usize) -> bool {
        self.read(|inner| inner.pager.is_resident(PageNo(no)))
    }

    /// Pending prefetch requests.
    pub fn pending_prefetches(&self) -> usize {
        self.read(|inner| inner.prefetch.queue().len())
    }

    /// Loads the pages covering lines `start..=end` ahead of use.
    ///
    /// Both bounds are clamped to the buffer; at most `cache_size` pages are
    /// loaded. Returns the number of pages brought in.
    pub fn prefetch_lines(&self, start: usize, end: usize) -> usize {
        self.read(|inner| {
            let last = inner.pager.line_count() - 1;
            let (start, end) = (start.min(last), end.min(last));
            if start > end {
                return 0;
            }
            let (first, _) = inner.pager.locate(start);
            let (last, _) = inner.pager.locate(end);
            let budget = inner.pager.cache_size();
            let mut loaded = 0;
            for no in (first.0..=last.0).map(PageNo).take(budget) {
                if !inner.pager.is_resident(no) {
                    inner.pager.access(no, Access::Prefetch);
                    if inner.pager.is_resident(no) {
                        loaded += 1;
                    }
                }
            }
            debug!(start, end, loaded, "buffer.prefetch_lines");
            loaded
        })
    }

    /// Loads up to `max_pages` pending prefetch requests. Lets a caller
    /// drain the queue off the editing path.
    pub fn process_prefetch_queue(&self, max_pages: usize) -> usize {
        self.read(|inner| inner.prefetch.process(&mut inner.pager, None, max_pages))
    }

    /// Routes dirty-page write-backs through `io` instead of an anonymous
    /// temp file. Only allowed before anything has been written back.
    pub fn set_spill_io(&mut self, io: Box<dyn FileIo>) -> Result<()> {
        self.edit(|inner| inner.pager.install_spill(io))
    }

    /// Writes dirty resident pages to the spill file. Returns the number of
    /// pages written.
    pub fn flush(&mut self) -> Result<usize> {
        self.edit(|inner| inner.pager.flush_dirty())
    }

    /// Writes every line followed by `\n` to `out`. Pages are read without
    /// being admitted to the cache.
    pub fn write_to<W: Write>(&self, out: &mut W) -> Result<()> {
        self.read(|inner| inner.write_to(out))
    }

    /// Saves the buffer to `path` through a temp file and rename.
    ///
    /// Saving over the backing file, or saving a buffer that has none,
    /// binds the buffer to `path` and clears the modified flag. Saving
    /// anywhere else is an export and leaves the buffer untouched.
    pub fn save_to_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let inner = self.inner.get_mut();
        let rebind = match inner.pager.path() {
            Some(current) => same_file(current, path),
            None => true,
        };
        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let tmp = NamedTempFile::new_in(dir)?;
        {
            let mut out = BufWriter::new(tmp.as_file());
            inner.write_to(&mut out)?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|err| BufferError::Io(err.error))?;
        info!(path = %path.display(), lines = inner.pager.line_count(), rebind, "buffer.save");
        if !rebind {
            return Ok(());
        }
        match fs::remove_file(side_index_path(path)) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        let (store, index) = PageStore::open(path)?;
        if index.len() == inner.pager.line_count() {
            inner.pager.rebind(store, index)?;
        } else {
            // Lines holding raw terminators re-split on reload.
            debug!(
                before = inner.pager.line_count(),
                after = index.len(),
                "buffer.save.resplit"
            );
            inner.pager.replace(store, index);
            inner.prefetch.reset();
        }
        inner.modified = false;
        Ok(())
    }

    /// Replaces the content with `path`, which becomes the backing file.
    pub fn load_from_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let (store, index) = PageStore::open(path)?;
        info!(path = %path.display(), lines = index.len(), "buffer.load");
        self.edit(|inner| {
            inner.pager.replace(store, index);
            inner.prefetch.reset();
            inner.modified = false;
        });
        Ok(())
    }

    /// Resets to a single empty line. The backing file is kept for saving.
    pub fn clear(&mut self) {
        self.edit(|inner| {
            inner.pager.clear();
            inner.prefetch.reset();
            inner.modified = true;
        });
    }
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}
