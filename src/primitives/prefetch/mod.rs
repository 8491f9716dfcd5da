#![forbid(unsafe_code)]
//! Access-pattern tracking and speculative page loading.

use std::collections::VecDeque;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::primitives::pager::{Access, BufferStats, Pager};
use crate::types::PageNo;

/// How the prefetcher picks pages to load ahead of demand.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrefetchStrategy {
    /// Never prefetch.
    None,
    /// Pages within the prefetch distance of the trigger page.
    #[default]
    Adjacent,
    /// Historical successors of the trigger page.
    Predictive,
    /// Adjacent plus weighted predictive, retuned from measured effectiveness.
    Adaptive,
}

impl PrefetchStrategy {
    /// Every strategy, in declaration order.
    pub const ALL: [PrefetchStrategy; 4] = [
        PrefetchStrategy::None,
        PrefetchStrategy::Adjacent,
        PrefetchStrategy::Predictive,
        PrefetchStrategy::Adaptive,
    ];

    /// Returns the string representation of the strategy.
    pub fn as_str(self) -> &'static str {
        match self {
            PrefetchStrategy::None => "none",
            PrefetchStrategy::Adjacent => "adjacent",
            PrefetchStrategy::Predictive => "predictive",
            PrefetchStrategy::Adaptive => "adaptive",
        }
    }

    /// Parses a strategy from a string (case-insensitive).
    pub fn from_str(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "none" => Some(PrefetchStrategy::None),
            "adjacent" => Some(PrefetchStrategy::Adjacent),
            "predictive" => Some(PrefetchStrategy::Predictive),
            "adaptive" => Some(PrefetchStrategy::Adaptive),
            _ => None,
        }
    }
}

/// A pending speculative load.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PrefetchRequest {
    /// Page to load.
    pub page: PageNo,
    /// Higher loads sooner.
    pub priority: f64,
}

/// Bounded max-priority queue of prefetch requests, one entry per page.
#[derive(Clone, Debug, Default)]
pub struct PrefetchQueue {
    entries: Vec<PrefetchRequest>,
    max_len: usize,
}

impl PrefetchQueue {
    /// Queue holding at most `max_len` requests.
    pub fn new(max_len: usize) -> Self {
        Self {
            entries: Vec::with_capacity(max_len),
            max_len,
        }
    }

    /// Number of pending requests.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of pending requests.
    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Whether `page` is pending.
    pub fn contains(&self, page: PageNo) -> bool {
        self.entries.iter().any(|req| req.page == page)
    }

    fn lowest(&self) -> Option<usize> {
        self.entries
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                a.priority
                    .total_cmp(&b.priority)
                    .then_with(|| b.page.cmp(&a.page))
            })
            .map(|(pos, _)| pos)
    }

    /// Queues `page`. A duplicate keeps the higher priority; a full queue
    /// drops its lowest-priority request to make room.
    pub fn push(&mut self, page: PageNo, priority: f64) {
        if let Some(existing) = self.entries.iter_mut().find(|req| req.page == page) {
            existing.priority = existing.priority.max(priority);
            return;
        }
        if self.max_len == 0 {
            return;
        }
        if self.entries.len() >= self.max_len {
            if let Some(pos) = self.lowest() {
                let dropped = self.entries.swap_remove(pos);
                trace!(page = dropped.page.0, priority = dropped.priority, "prefetch.queue.dropped");
            }
        }
        self.entries.push(PrefetchRequest { page, priority });
    }

    /// Removes and returns the highest-priority request, lowest page first on ties.
    pub fn pop(&mut self) -> Option<PrefetchRequest> {
        let pos = self
            .entries
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| {
                a.priority
                    .total_cmp(&b.priority)
                    .then_with(|| b.page.cmp(&a.page))
            })
            .map(|(pos, _)| pos)?;
        Some(self.entries.swap_remove(pos))
    }

    /// Drops any pending request for `page`.
    pub fn remove(&mut self, page: PageNo) -> bool {
        match self.entries.iter().position(|req| req.page == page) {
            Some(pos) => {
                self.entries.swap_remove(pos);
                true
            }
            None => false,
        }
    }

    /// Drops every pending request.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Changes the bound, dropping the lowest-priority requests if needed.
    pub fn set_max_len(&mut self, max_len: usize) {
        self.max_len = max_len;
        while self.entries.len() > max_len {
            match self.lowest() {
                Some(pos) => {
                    self.entries.swap_remove(pos);
                }
                None => break,
            }
        }
    }
}

/// Recent page accesses and page-to-page transition counts.
#[derive(Clone, Debug, Default)]
pub struct AccessTracker {
    recent: VecDeque<PageNo>,
    max_recent: usize,
    transitions: FxHashMap<PageNo, FxHashMap<PageNo, u64>>,
}

impl AccessTracker {
    /// Tracker remembering the last `max_recent` accesses.
    pub fn new(max_recent: usize) -> Self {
        Self {
            recent: VecDeque::with_capacity(max_recent.min(1024)),
            max_recent,
            transitions: FxHashMap::default(),
        }
    }

    /// Records a demand access. Repeated accesses to one page are not transitions.
    pub fn record(&mut self, page: PageNo) {
        if let Some(&prev) = self.recent.back() {
            if prev != page {
                *self
                    .transitions
                    .entry(prev)
                    .or_default()
                    .entry(page)
                    .or_insert(0) += 1;
            }
        }
        self.recent.push_back(page);
        while self.recent.len() > self.max_recent {
            self.recent.pop_front();
        }
    }

    /// Recent accesses, oldest first.
    pub fn recent(&self) -> impl Iterator<Item = PageNo> + '_ {
        self.recent.iter().copied()
    }

    /// Number of times `to` directly followed `from`.
    pub fn transition_count(&self, from: PageNo, to: PageNo) -> u64 {
        self.transitions
            .get(&from)
            .and_then(|next| next.get(&to))
            .copied()
            .unwrap_or(0)
    }

    /// Up to `limit` most frequent successors of `page`, most frequent first
    /// and lowest page number on ties.
    pub fn successors(&self, page: PageNo, limit: usize) -> Vec<(PageNo, u64)> {
        let Some(next) = self.transitions.get(&page) else {
            return Vec::new();
        };
        let mut out: Vec<(PageNo, u64)> = next.iter().map(|(p, c)| (*p, *c)).collect();
        out.sort_unstable_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        out.truncate(limit);
        out
    }

    /// Forgets every recorded access.
    pub fn clear(&mut self) {
        self.recent.clear();
        self.transitions.clear();
    }

    /// Changes how many recent accesses are remembered.
    pub fn set_max_recent(&mut self, max_recent: usize) {
        self.max_recent = max_recent;
        while self.recent.len() > max_recent {
            self.recent.pop_front();
        }
    }
}

const ADAPTIVE_EVAL_INTERVAL: u32 = 16;
const ADAPTIVE_LOW_WATER: f64 = 0.3;
const ADAPTIVE_HIGH_WATER: f64 = 0.7;
const ADAPTIVE_MAX_DISTANCE: usize = 8;
const ADAPTIVE_MIN_WEIGHT: f64 = 0.1;
const ADAPTIVE_MAX_WEIGHT: f64 = 1.0;

/// Prefetch tuning knobs.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PrefetchOptions {
    /// Strategy in effect.
    pub strategy: PrefetchStrategy,
    /// Pages on each side of the trigger considered by adjacent prefetching.
    pub distance: usize,
    /// Bound on pending requests.
    pub max_queue_len: usize,
    /// Pages loaded per triggering access.
    pub batch: usize,
    /// Accesses remembered for pattern tracking.
    pub recent_accesses_max: usize,
}

/// Chooses and loads pages ahead of demand.
///
/// Runs synchronously inside the triggering access; at most `batch` pages
/// are loaded per trigger.
#[derive(Clone, Debug)]
pub struct PrefetchEngine {
    strategy: PrefetchStrategy,
    base_distance: usize,
    distance: usize,
    batch: usize,
    queue: PrefetchQueue,
    tracker: AccessTracker,
    predictive_weight: f64,
    triggers_since_eval: u32,
    window_hits: u64,
    window_misses: u64,
}

impl PrefetchEngine {
    /// Engine configured from `options`.
    pub fn new(options: PrefetchOptions) -> Self {
        Self {
            strategy: options.strategy,
            base_distance: options.distance,
            distance: options.distance,
            batch: options.batch,
            queue: PrefetchQueue::new(options.max_queue_len),
            tracker: AccessTracker::new(options.recent_accesses_max),
            predictive_weight: ADAPTIVE_MAX_WEIGHT,
            triggers_since_eval: 0,
            window_hits: 0,
            window_misses: 0,
        }
    }

    /// Strategy in effect.
    pub fn strategy(&self) -> PrefetchStrategy {
        self.strategy
    }

    /// Switches strategy, dropping pending requests and adaptive tuning.
    pub fn set_strategy(&mut self, strategy: PrefetchStrategy) {
        self.strategy = strategy;
        self.queue.clear();
        self.reset_tuning();
        debug!(strategy = strategy.as_str(), "prefetch.strategy_changed");
    }

    /// Current adjacent-prefetch distance (adaptive tuning may move it).
    pub fn distance(&self) -> usize {
        self.distance
    }

    /// Sets the adjacent-prefetch distance.
    pub fn set_distance(&mut self, distance: usize) {
        self.base_distance = distance;
        self.distance = distance;
    }

    /// Weight applied to predictive requests by the adaptive strategy.
    pub fn predictive_weight(&self) -> f64 {
        self.predictive_weight
    }

    /// Bound on pending requests.
    pub fn max_queue_len(&self) -> usize {
        self.queue.max_len()
    }

    /// Changes the pending-request bound.
    pub fn set_max_queue_len(&mut self, max_len: usize) {
        self.queue.set_max_len(max_len);
    }

    /// Pages loaded per trigger.
    pub fn batch(&self) -> usize {
        self.batch
    }

    /// Changes pages loaded per trigger.
    pub fn set_batch(&mut self, batch: usize) {
        self.batch = batch;
    }

    /// Pending requests.
    pub fn queue(&self) -> &PrefetchQueue {
        &self.queue
    }

    /// Changes how many recent accesses the tracker remembers.
    pub fn set_recent_accesses_max(&mut self, max_recent: usize) {
        self.tracker.set_max_recent(max_recent);
    }

    /// Drops pending requests and access history, e.g. after the page
    /// geometry changed.
    pub fn reset(&mut self) {
        self.queue.clear();
        self.tracker.clear();
        self.reset_tuning();
    }

    fn reset_tuning(&mut self) {
        self.distance = self.base_distance;
        self.predictive_weight = ADAPTIVE_MAX_WEIGHT;
        self.triggers_since_eval = 0;
        self.window_hits = 0;
        self.window_misses = 0;
    }

    /// Full demand-access hook: records the access, plans requests for the
    /// active strategy and loads up to one batch.
    pub fn on_demand_access(&mut self, trigger: PageNo, pager: &mut Pager) -> usize {
        self.record_access(trigger);
        if self.strategy == PrefetchStrategy::None {
            return 0;
        }
        self.plan(trigger, pager);
        self.process(pager, Some(trigger), self.batch)
    }

    /// Records a demand access; a pending request for that page is dropped
    /// since the page is now resident.
    pub fn record_access(&mut self, page: PageNo) {
        self.tracker.record(page);
        self.queue.remove(page);
    }

    /// Queues `page` unless it is already resident. Returns whether it was queued.
    pub fn queue_for_prefetch(&mut self, pager: &Pager, page: PageNo, priority: f64) -> bool {
        if page.0 >= pager.page_count() || pager.is_resident(page) {
            return false;
        }
        self.queue.push(page, priority);
        true
    }

    /// Queues requests around `trigger` according to the active strategy.
    pub fn plan(&mut self, trigger: PageNo, pager: &Pager) {
        match self.strategy {
            PrefetchStrategy::None => {}
            PrefetchStrategy::Adjacent => self.plan_adjacent(trigger, pager, self.distance),
            PrefetchStrategy::Predictive => {
                if self.plan_predictive(trigger, pager, 1.0) == 0 {
                    self.plan_adjacent(trigger, pager, self.distance);
                }
            }
            PrefetchStrategy::Adaptive => {
                self.maybe_retune(&pager.stats());
                self.plan_adjacent(trigger, pager, self.distance);
                self.plan_predictive(trigger, pager, self.predictive_weight);
            }
        }
    }

    fn plan_adjacent(&mut self, trigger: PageNo, pager: &Pager, distance: usize) {
        let last = pager.page_count().saturating_sub(1);
        let start = trigger.0.saturating_sub(distance);
        let end = trigger.0.saturating_add(distance).min(last);
        for no in start..=end {
            let page = PageNo(no);
            if page == trigger {
                continue;
            }
            let priority = 1.0 / (1.0 + page.distance(trigger) as f64);
            self.queue_for_prefetch(pager, page, priority);
        }
    }

    /// Queues the historical successors of `trigger`; returns how many were queued.
    fn plan_predictive(&mut self, trigger: PageNo, pager: &Pager, weight: f64) -> usize {
        let successors = self.tracker.successors(trigger, self.queue.max_len());
        let Some(&(_, top)) = successors.first() else {
            return 0;
        };
        let mut queued = 0;
        for (page, count) in successors {
            let priority = weight * count as f64 / top as f64;
            if self.queue_for_prefetch(pager, page, priority) {
                queued += 1;
            }
        }
        queued
    }

    fn maybe_retune(&mut self, stats: &BufferStats) {
        self.triggers_since_eval += 1;
        if self.triggers_since_eval < ADAPTIVE_EVAL_INTERVAL {
            return;
        }
        self.triggers_since_eval = 0;
        let hits = stats.prefetch_hits.saturating_sub(self.window_hits);
        let misses = stats.prefetch_misses.saturating_sub(self.window_misses);
        self.window_hits = stats.prefetch_hits;
        self.window_misses = stats.prefetch_misses;
        let resolved = hits + misses;
        if resolved == 0 {
            if self.distance == 0 {
                self.distance = 1;
                debug!(distance = self.distance, "prefetch.adaptive.probe");
            }
            return;
        }
        let effectiveness = hits as f64 / resolved as f64;
        let (distance, weight) = if effectiveness < ADAPTIVE_LOW_WATER {
            (
                self.distance.saturating_sub(1),
                (self.predictive_weight * 0.5).max(ADAPTIVE_MIN_WEIGHT),
            )
        } else if effectiveness > ADAPTIVE_HIGH_WATER {
            (
                (self.distance + 1).min(ADAPTIVE_MAX_DISTANCE.max(self.base_distance)),
                (self.predictive_weight * 1.5).min(ADAPTIVE_MAX_WEIGHT),
            )
        } else {
            return;
        };
        if distance != self.distance || weight != self.predictive_weight {
            debug!(
                effectiveness,
                from_distance = self.distance,
                to_distance = distance,
                weight,
                "prefetch.adaptive.adjust"
            );
        }
        self.distance = distance;
        self.predictive_weight = weight;
    }

    /// Loads up to `max_pages` queued pages through the pager.
    ///
    /// `keep` stays pinned while loading so prefetches never evict the page
    /// that triggered them. Stops early once the pager has no room left.
    /// Returns the number of pages loaded.
    pub fn process(&mut self, pager: &mut Pager, keep: Option<PageNo>, max_pages: usize) -> usize {
        let pinned = keep.is_some_and(|page| pager.pin(page));
        let mut loaded = 0;
        while loaded < max_pages {
            let Some(req) = self.queue.pop() else {
                break;
            };
            if req.page.0 >= pager.page_count() || pager.is_resident(req.page) {
                continue;
            }
            pager.access(req.page, Access::Prefetch);
            if !pager.is_resident(req.page) {
                break;
            }
            trace!(page = req.page.0, priority = req.priority, "prefetch.loaded");
            loaded += 1;
        }
        if pinned {
            if let Some(page) = keep {
                pager.unpin(page);
            }
        }
        loaded
    }
}
