/// A run of up to `page_size` consecutive lines resident in memory.
#[derive(Clone, Debug, Default)]
pub struct Page {
    /// Line contents, terminators stripped.
    pub lines: Vec<String>,
    /// Logical clock value of the most recent touch.
    pub last_accessed: u64,
    /// Set once any line changed since the page was loaded or written back.
    pub dirty: bool,
    /// Number of demand touches since the page became resident.
    pub access_count: u64,
    /// Non-zero while an operation holds the page; pinned pages are never evicted.
    pub pin_count: u32,
    /// Ranking score maintained by the active eviction policy.
    pub priority: f64,
    /// Loaded by the prefetcher and not yet touched by a demand access.
    pub prefetched: bool,
    /// Content is a placeholder because the load failed.
    pub degraded: bool,
}

impl Page {
    /// Wraps freshly loaded lines.
    pub fn new(lines: Vec<String>, now: u64) -> Self {
        Self {
            lines,
            last_accessed: now,
            ..Self::default()
        }
    }

    /// Placeholder for a page whose load failed: `len` empty lines.
    pub fn degraded(len: usize, now: u64) -> Self {
        Self {
            lines: vec![String::new(); len],
            last_accessed: now,
            degraded: true,
            ..Self::default()
        }
    }

    /// True while at least one pin is held.
    pub fn is_pinned(&self) -> bool {
        self.pin_count > 0
    }

    /// Records a demand touch at logical time `now`.
    pub fn touch(&mut self, now: u64) {
        self.last_accessed = now;
        self.access_count += 1;
    }
}
