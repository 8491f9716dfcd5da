use rustc_hash::FxHashMap;

use crate::types::PageNo;

use super::page::Page;
use super::policy::{EvictionPolicy, PolicyState};

/// Resident pages keyed by page number plus the active policy's bookkeeping.
///
/// The cache only tracks membership and recency; writing dirty pages back
/// before removal is the caller's job.
#[derive(Debug)]
pub struct PageCache {
    pages: FxHashMap<PageNo, Page>,
    capacity: usize,
    policy: PolicyState,
    clock: u64,
}

impl PageCache {
    /// Empty cache holding at most `capacity` unpinned pages.
    pub fn new(capacity: usize, policy: EvictionPolicy) -> Self {
        Self {
            pages: FxHashMap::default(),
            capacity,
            policy: PolicyState::new(policy, capacity),
            clock: 0,
        }
    }

    /// Page budget.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of resident pages.
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    /// Returns true if no page is resident.
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// True when more pages are resident than the budget allows.
    pub fn over_budget(&self) -> bool {
        self.pages.len() > self.capacity
    }

    /// Whether `no` is resident.
    pub fn contains(&self, no: PageNo) -> bool {
        self.pages.contains_key(&no)
    }

    /// Shared access to a resident page.
    pub fn get(&self, no: PageNo) -> Option<&Page> {
        self.pages.get(&no)
    }

    /// Exclusive access to a resident page. Does not count as a touch.
    pub fn get_mut(&mut self, no: PageNo) -> Option<&mut Page> {
        self.pages.get_mut(&no)
    }

    /// Resident page numbers in ascending order.
    pub fn resident(&self) -> Vec<PageNo> {
        let mut nos: Vec<PageNo> = self.pages.keys().copied().collect();
        nos.sort_unstable();
        nos
    }

    /// Active eviction policy.
    pub fn policy(&self) -> EvictionPolicy {
        self.policy.kind()
    }

    /// Current ARC recency target, when ARC is active.
    pub fn arc_target(&self) -> Option<usize> {
        self.policy.arc().map(|arc| arc.target())
    }

    /// Switches policy, seeding its bookkeeping from the resident pages.
    pub fn set_policy(&mut self, policy: EvictionPolicy) {
        self.policy = PolicyState::rebuild(policy, self.capacity, &mut self.pages);
    }

    /// Changes the budget. Callers evict down to it afterwards.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
        self.policy.set_capacity(capacity);
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Makes `page` resident. `demand` is false for prefetch loads.
    pub fn admit(&mut self, no: PageNo, mut page: Page, demand: bool) {
        let now = self.tick();
        page.last_accessed = now;
        if demand {
            page.access_count = 1;
        }
        page.prefetched = !demand;
        self.pages.insert(no, page);
        self.policy.on_admit(no, demand, &mut self.pages);
    }

    /// Records a demand touch on a resident page. Returns whether the page
    /// had been brought in by the prefetcher and not touched since.
    pub fn touch(&mut self, no: PageNo) -> Option<bool> {
        let now = self.tick();
        let page = self.pages.get_mut(&no)?;
        page.touch(now);
        let was_prefetched = std::mem::take(&mut page.prefetched);
        self.policy.on_hit(no, &mut self.pages);
        Some(was_prefetched)
    }

    /// Page the active policy would evict next, ignoring pinned pages.
    pub fn victim(&self) -> Option<PageNo> {
        self.policy.victim(&self.pages)
    }

    /// Removes a page. `evicted` distinguishes budget evictions from
    /// invalidation, which matters for ARC ghost tracking.
    pub fn remove(&mut self, no: PageNo, evicted: bool) -> Option<Page> {
        let page = self.pages.remove(&no)?;
        self.policy.on_remove(no, evicted);
        Some(page)
    }

    /// Increments the pin count of a resident page.
    pub fn pin(&mut self, no: PageNo) -> bool {
        match self.pages.get_mut(&no) {
            Some(page) => {
                page.pin_count += 1;
                true
            }
            None => false,
        }
    }

    /// Releases one pin.
    pub fn unpin(&mut self, no: PageNo) {
        if let Some(page) = self.pages.get_mut(&no) {
            page.pin_count = page.pin_count.saturating_sub(1);
        }
    }
}
