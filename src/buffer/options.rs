use serde::{Deserialize, Serialize};

use crate::primitives::pager::EvictionPolicy;
use crate::primitives::prefetch::{PrefetchOptions, PrefetchStrategy};
use crate::types::{BufferError, Result};

/// Tuning knobs for a [`VirtualBuffer`](super::VirtualBuffer).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferOptions {
    /// Lines per page.
    pub page_size: usize,
    /// Maximum resident pages.
    pub cache_size: usize,
    /// Pages on each side of an access considered by adjacent prefetching.
    pub prefetch_distance: usize,
    /// Bound on pending prefetch requests.
    pub max_prefetch_queue_size: usize,
    /// Pages loaded by the prefetcher per triggering access.
    pub prefetch_batch: usize,
    /// Page accesses remembered for predictive prefetching.
    pub recent_accesses_max: usize,
    /// Victim selection policy.
    pub eviction_policy: EvictionPolicy,
    /// Prefetch strategy.
    pub prefetch_strategy: PrefetchStrategy,
}

impl Default for BufferOptions {
    fn default() -> Self {
        Self {
            page_size: 1000,
            cache_size: 10,
            prefetch_distance: 1,
            max_prefetch_queue_size: 10,
            prefetch_batch: 2,
            recent_accesses_max: 100,
            eviction_policy: EvictionPolicy::Lru,
            prefetch_strategy: PrefetchStrategy::Adjacent,
        }
    }
}

impl BufferOptions {
    /// Rejects geometry the pager cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(BufferError::Invalid("page size must be non-zero"));
        }
        if self.cache_size == 0 {
            return Err(BufferError::Invalid("cache size must be non-zero"));
        }
        Ok(())
    }

    /// Prefetch engine settings derived from these options.
    pub fn prefetch_options(&self) -> PrefetchOptions {
        PrefetchOptions {
            strategy: self.prefetch_strategy,
            distance: self.prefetch_distance,
            max_queue_len: self.max_prefetch_queue_size,
            batch: self.prefetch_batch,
            recent_accesses_max: self.recent_accesses_max,
        }
    }
}
