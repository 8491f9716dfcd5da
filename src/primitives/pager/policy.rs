use std::collections::VecDeque;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::types::PageNo;

use super::page::Page;

/// Algorithm used to pick a victim when the page cache exceeds its budget.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    /// Least recently used page goes first.
    #[default]
    Lru,
    /// Segmented LRU: probationary pages go before protected ones.
    Slru,
    /// Adaptive Replacement Cache with ghost lists.
    Arc,
    /// Lowest spatial-locality score goes first.
    Spatial,
}

impl EvictionPolicy {
    /// Every policy, in declaration order.
    pub const ALL: [EvictionPolicy; 4] = [
        EvictionPolicy::Lru,
        EvictionPolicy::Slru,
        EvictionPolicy::Arc,
        EvictionPolicy::Spatial,
    ];

    /// Returns the string representation of the policy.
    pub fn as_str(self) -> &'static str {
        match self {
            EvictionPolicy::Lru => "lru",
            EvictionPolicy::Slru => "slru",
            EvictionPolicy::Arc => "arc",
            EvictionPolicy::Spatial => "spatial",
        }
    }

    /// Parses a policy from a string (case-insensitive).
    pub fn from_str(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "lru" => Some(EvictionPolicy::Lru),
            "slru" => Some(EvictionPolicy::Slru),
            "arc" => Some(EvictionPolicy::Arc),
            "spatial" => Some(EvictionPolicy::Spatial),
            _ => None,
        }
    }
}

const SPATIAL_INITIAL: f64 = 0.5;
const SPATIAL_HIT_BOOST: f64 = 0.2;
const SPATIAL_NEIGHBOR_BOOST: f64 = 0.1;
const SPATIAL_NEIGHBOR_SPAN: usize = 2;
const SPATIAL_DECAY: f64 = 0.99;

type Pages = FxHashMap<PageNo, Page>;

fn first_unpinned(order: &VecDeque<PageNo>, pages: &Pages) -> Option<PageNo> {
    order
        .iter()
        .copied()
        .find(|no| pages.get(no).is_some_and(|page| !page.is_pinned()))
}

fn remove_from(order: &mut VecDeque<PageNo>, no: PageNo) -> bool {
    match order.iter().position(|p| *p == no) {
        Some(pos) => {
            order.remove(pos);
            true
        }
        None => false,
    }
}

/// Probationary/protected segments, least recent at the front.
#[derive(Debug, Default)]
pub(crate) struct SlruState {
    probationary: VecDeque<PageNo>,
    protected: VecDeque<PageNo>,
    protected_cap: usize,
}

impl SlruState {
    fn new(capacity: usize) -> Self {
        let mut state = Self::default();
        state.set_capacity(capacity);
        state
    }

    fn set_capacity(&mut self, capacity: usize) {
        self.protected_cap = (capacity - capacity / 5).max(1);
        self.demote_overflow();
    }

    fn demote_overflow(&mut self) {
        while self.protected.len() > self.protected_cap {
            if let Some(no) = self.protected.pop_front() {
                self.probationary.push_back(no);
            }
        }
    }

    fn hit(&mut self, no: PageNo) {
        if remove_from(&mut self.probationary, no) || remove_from(&mut self.protected, no) {
            self.protected.push_back(no);
            self.demote_overflow();
        }
    }
}

/// ARC resident lists (`t1` recency, `t2` frequency), ghost lists and target `p`.
#[derive(Debug, Default)]
pub(crate) struct ArcState {
    t1: VecDeque<PageNo>,
    t2: VecDeque<PageNo>,
    b1: VecDeque<PageNo>,
    b2: VecDeque<PageNo>,
    p: usize,
    capacity: usize,
    last_ghost_b2: bool,
}

impl ArcState {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    /// Current recency target.
    pub(crate) fn target(&self) -> usize {
        self.p
    }

    fn admit(&mut self, no: PageNo, demand: bool) {
        self.last_ghost_b2 = false;
        if remove_from(&mut self.b1, no) {
            if demand {
                let delta = (self.b2.len() / (self.b1.len() + 1)).max(1);
                self.p = (self.p + delta).min(self.capacity);
                self.t2.push_back(no);
                return;
            }
        } else if remove_from(&mut self.b2, no) && demand {
            let delta = (self.b1.len() / (self.b2.len() + 1)).max(1);
            self.p = self.p.saturating_sub(delta);
            self.last_ghost_b2 = true;
            self.t2.push_back(no);
            return;
        }
        self.t1.push_back(no);
    }

    fn hit(&mut self, no: PageNo) {
        if remove_from(&mut self.t1, no) || remove_from(&mut self.t2, no) {
            self.t2.push_back(no);
        }
    }

    fn remove(&mut self, no: PageNo, evicted: bool) {
        if remove_from(&mut self.t1, no) {
            if evicted {
                self.b1.push_back(no);
            }
        } else if remove_from(&mut self.t2, no) && evicted {
            self.b2.push_back(no);
        }
        self.trim_ghosts();
    }

    fn trim_ghosts(&mut self) {
        while self.t1.len() + self.b1.len() > self.capacity && self.b1.pop_front().is_some() {}
        while self.t1.len() + self.t2.len() + self.b1.len() + self.b2.len() > 2 * self.capacity {
            if self.b2.pop_front().is_none() && self.b1.pop_front().is_none() {
                break;
            }
        }
    }

    fn victim(&self, pages: &Pages) -> Option<PageNo> {
        let from_t1 = !self.t1.is_empty()
            && (self.t1.len() > self.p || (self.t1.len() == self.p && self.last_ghost_b2));
        let t1 = first_unpinned(&self.t1, pages);
        let t2 = first_unpinned(&self.t2, pages);
        if from_t1 {
            t1.or(t2)
        } else {
            t2.or(t1)
        }
    }
}

/// Bookkeeping of the active eviction policy.
///
/// Spatial scores live in [`Page::priority`]; LRU order comes from
/// [`Page::last_accessed`]. SLRU and ARC keep their own ordered lists.
#[derive(Debug)]
pub(crate) enum PolicyState {
    Lru,
    Slru(SlruState),
    Arc(ArcState),
    Spatial,
}

impl PolicyState {
    pub(crate) fn new(policy: EvictionPolicy, capacity: usize) -> Self {
        match policy {
            EvictionPolicy::Lru => PolicyState::Lru,
            EvictionPolicy::Slru => PolicyState::Slru(SlruState::new(capacity)),
            EvictionPolicy::Arc => PolicyState::Arc(ArcState::new(capacity)),
            EvictionPolicy::Spatial => PolicyState::Spatial,
        }
    }

    /// Fresh state for `policy` seeded from the resident pages, oldest first.
    ///
    /// Pages touched more than once start in the frequency segment.
    pub(crate) fn rebuild(policy: EvictionPolicy, capacity: usize, pages: &mut Pages) -> Self {
        let mut state = Self::new(policy, capacity);
        let mut resident: Vec<(u64, PageNo)> = pages
            .iter()
            .map(|(no, page)| (page.last_accessed, *no))
            .collect();
        resident.sort_unstable();
        for (_, no) in resident {
            let frequent = pages.get(&no).is_some_and(|page| page.access_count > 1);
            match &mut state {
                PolicyState::Slru(slru) if frequent => slru.protected.push_back(no),
                PolicyState::Slru(slru) => slru.probationary.push_back(no),
                PolicyState::Arc(arc) if frequent => arc.t2.push_back(no),
                PolicyState::Arc(arc) => arc.t1.push_back(no),
                PolicyState::Spatial => {
                    if let Some(page) = pages.get_mut(&no) {
                        page.priority = SPATIAL_INITIAL;
                    }
                }
                PolicyState::Lru => {}
            }
        }
        if let PolicyState::Slru(slru) = &mut state {
            slru.demote_overflow();
        }
        state
    }

    pub(crate) fn kind(&self) -> EvictionPolicy {
        match self {
            PolicyState::Lru => EvictionPolicy::Lru,
            PolicyState::Slru(_) => EvictionPolicy::Slru,
            PolicyState::Arc(_) => EvictionPolicy::Arc,
            PolicyState::Spatial => EvictionPolicy::Spatial,
        }
    }

    pub(crate) fn arc(&self) -> Option<&ArcState> {
        match self {
            PolicyState::Arc(arc) => Some(arc),
            _ => None,
        }
    }

    pub(crate) fn set_capacity(&mut self, capacity: usize) {
        match self {
            PolicyState::Slru(slru) => slru.set_capacity(capacity),
            PolicyState::Arc(arc) => {
                arc.capacity = capacity;
                arc.p = arc.p.min(capacity);
                arc.trim_ghosts();
            }
            PolicyState::Lru | PolicyState::Spatial => {}
        }
    }

    /// A page just became resident. `demand` is false for prefetch loads.
    pub(crate) fn on_admit(&mut self, no: PageNo, demand: bool, pages: &mut Pages) {
        match self {
            PolicyState::Lru => {}
            PolicyState::Slru(slru) => slru.probationary.push_back(no),
            PolicyState::Arc(arc) => arc.admit(no, demand),
            PolicyState::Spatial => {
                if let Some(page) = pages.get_mut(&no) {
                    page.priority = SPATIAL_INITIAL;
                }
                if demand {
                    spatial_ripple(no, pages);
                }
            }
        }
    }

    /// A resident page was touched by a demand access.
    pub(crate) fn on_hit(&mut self, no: PageNo, pages: &mut Pages) {
        match self {
            PolicyState::Lru => {}
            PolicyState::Slru(slru) => slru.hit(no),
            PolicyState::Arc(arc) => arc.hit(no),
            PolicyState::Spatial => {
                if let Some(page) = pages.get_mut(&no) {
                    page.priority = (page.priority + SPATIAL_HIT_BOOST).min(1.0);
                }
                spatial_ripple(no, pages);
            }
        }
    }

    /// A page left the cache. Only real evictions feed the ARC ghost lists.
    pub(crate) fn on_remove(&mut self, no: PageNo, evicted: bool) {
        match self {
            PolicyState::Lru | PolicyState::Spatial => {}
            PolicyState::Slru(slru) => {
                if !remove_from(&mut slru.probationary, no) {
                    remove_from(&mut slru.protected, no);
                }
            }
            PolicyState::Arc(arc) => arc.remove(no, evicted),
        }
    }

    /// Picks the page to evict among unpinned resident pages.
    pub(crate) fn victim(&self, pages: &Pages) -> Option<PageNo> {
        let unpinned = pages.iter().filter(|(_, page)| !page.is_pinned());
        match self {
            PolicyState::Lru => unpinned
                .min_by_key(|(no, page)| (page.last_accessed, **no))
                .map(|(no, _)| *no),
            PolicyState::Spatial => unpinned
                .min_by(|(a_no, a), (b_no, b)| {
                    a.priority
                        .total_cmp(&b.priority)
                        .then_with(|| a_no.cmp(b_no))
                })
                .map(|(no, _)| *no),
            PolicyState::Slru(slru) => first_unpinned(&slru.probationary, pages)
                .or_else(|| first_unpinned(&slru.protected, pages)),
            PolicyState::Arc(arc) => arc.victim(pages),
        }
    }
}

fn spatial_ripple(center: PageNo, pages: &mut Pages) {
    for (no, page) in pages.iter_mut() {
        if *no == center {
            continue;
        }
        let distance = no.distance(center);
        if distance <= SPATIAL_NEIGHBOR_SPAN {
            let boost = SPATIAL_NEIGHBOR_BOOST / (1.0 + distance as f64);
            page.priority = (page.priority + boost).min(1.0);
        } else {
            page.priority *= SPATIAL_DECAY;
        }
    }
}
