#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};

use pagebuf::{BufferOptions, EvictionPolicy, PrefetchStrategy, Result, VirtualBuffer};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tempfile::TempDir;

fn write_numbered(dir: &TempDir, name: &str, lines: usize) -> Result<PathBuf> {
    let path = dir.path().join(name);
    let mut text = String::with_capacity(lines * 10);
    for i in 0..lines {
        text.push_str(&format!("line {i}\n"));
    }
    fs::write(&path, text)?;
    Ok(path)
}

fn options(page_size: usize, cache_size: usize, policy: EvictionPolicy) -> BufferOptions {
    BufferOptions {
        page_size,
        cache_size,
        eviction_policy: policy,
        prefetch_strategy: PrefetchStrategy::None,
        ..BufferOptions::default()
    }
}

#[test]
fn one_access_per_page_then_revisit() -> Result<()> {
    let dir = TempDir::new()?;
    let path = write_numbered(&dir, "ten_thousand.txt", 10_000)?;
    let buf = VirtualBuffer::open(&path, options(100, 10, EvictionPolicy::Lru))?;

    for page in 0..10 {
        assert_eq!(buf.line(page * 100)?, format!("line {}", page * 100));
    }
    let stats = buf.stats();
    assert_eq!((stats.hits, stats.misses), (0, 10));
    assert_eq!(stats.evictions, 0);
    assert_eq!(buf.pages_in_memory(), 10);
    assert!((0..10).all(|page| buf.is_page_resident(page)));

    assert_eq!(buf.line(0)?, "line 0");
    assert_eq!(buf.stats().hits, 1);
    Ok(())
}

#[test]
fn every_line_matches_source_under_any_geometry() -> Result<()> {
    let dir = TempDir::new()?;
    let path = write_numbered(&dir, "geometry.txt", 257)?;
    for (page_size, cache_size) in [(1, 1), (7, 2), (16, 3), (100, 1), (1000, 4)] {
        for policy in EvictionPolicy::ALL {
            let buf = VirtualBuffer::open(&path, options(page_size, cache_size, policy))?;
            assert_eq!(buf.line_count(), 257);
            for i in (0..257).rev() {
                assert_eq!(buf.line(i)?, format!("line {i}"), "page size {page_size}");
            }
        }
    }
    Ok(())
}

#[test]
fn mixed_terminators_split_into_lines() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("terminators.txt");
    fs::write(&path, "alpha\r\nbeta\n\ngamma\rdelta")?;
    let buf = VirtualBuffer::open(&path, options(2, 1, EvictionPolicy::Lru))?;
    assert_eq!(buf.lines()?, vec!["alpha", "beta", "", "gamma", "delta"]);
    Ok(())
}

#[test]
fn resident_pages_stay_within_budget() -> Result<()> {
    let dir = TempDir::new()?;
    let path = write_numbered(&dir, "budget.txt", 600)?;
    for policy in EvictionPolicy::ALL {
        for strategy in PrefetchStrategy::ALL {
            for cache_size in [1, 4] {
                check_budget(&path, policy, strategy, cache_size)?;
            }
        }
    }
    Ok(())
}

fn check_budget(
    path: &Path,
    policy: EvictionPolicy,
    strategy: PrefetchStrategy,
    cache_size: usize,
) -> Result<()> {
    let mut buf = VirtualBuffer::open(
        path,
        BufferOptions {
            page_size: 10,
            cache_size,
            eviction_policy: policy,
            prefetch_strategy: strategy,
            prefetch_distance: 3,
            ..BufferOptions::default()
        },
    )?;
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    for step in 0..400 {
        let line = rng.gen_range(0..buf.line_count());
        match step % 7 {
            0 => buf.set_line(line, format!("edited {step}"))?,
            1 => buf.insert_line(line, "inserted")?,
            2 if buf.line_count() > 1 => buf.delete_line(line)?,
            3 => {
                buf.prefetch_lines(line, line + 80);
            }
            _ => {
                buf.line(line)?;
            }
        }
        assert!(
            buf.pages_in_memory() <= cache_size,
            "{} pages resident under {} / {} with budget {cache_size}",
            buf.pages_in_memory(),
            policy.as_str(),
            strategy.as_str()
        );
    }
    Ok(())
}

#[test]
fn default_options_respect_a_single_page_budget() -> Result<()> {
    let dir = TempDir::new()?;
    let path = write_numbered(&dir, "single.txt", 100)?;
    let buf = VirtualBuffer::open(
        &path,
        BufferOptions {
            page_size: 10,
            cache_size: 1,
            ..BufferOptions::default()
        },
    )?;
    assert_eq!(buf.line(50)?, "line 50");
    assert_eq!(buf.pages_in_memory(), 1);
    assert!(buf.is_page_resident(5));
    assert_eq!(buf.line(51)?, "line 51");
    assert_eq!(buf.stats().hits, 1);
    Ok(())
}

#[test]
fn second_sequential_pass_hits_every_time() -> Result<()> {
    let dir = TempDir::new()?;
    let path = write_numbered(&dir, "sequential.txt", 2_000)?;
    for policy in EvictionPolicy::ALL {
        let buf = VirtualBuffer::open(&path, options(100, 20, policy))?;
        for i in 0..buf.line_count() {
            buf.line(i)?;
        }
        assert_eq!(buf.stats().misses, 20);
        buf.reset_cache_stats();
        for i in 0..buf.line_count() {
            buf.line(i)?;
        }
        let stats = buf.stats();
        assert_eq!(stats.misses, 0, "{}", policy.as_str());
        assert_eq!(stats.hits, 2_000);
        assert_eq!(buf.cache_hit_rate(), 1.0);
    }
    Ok(())
}

/// Every fifth access jumps anywhere; the rest stay within 50 lines.
fn replay_mixed(path: &Path, policy: EvictionPolicy, seed: u64) -> Result<u64> {
    let buf = VirtualBuffer::open(path, options(100, 10, policy))?;
    let lines = buf.line_count();
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut current = 0usize;
    for i in 0..1000 {
        current = if i % 5 == 0 {
            rng.gen_range(0..lines)
        } else {
            let delta: i64 = rng.gen_range(-50..=50);
            (current as i64 + delta).clamp(0, lines as i64 - 1) as usize
        };
        buf.line(current)?;
    }
    let stats = buf.stats();
    assert_eq!(stats.hits + stats.misses, 1000);
    Ok(stats.hits)
}

#[test]
fn some_policy_beats_lru_on_mixed_workload() -> Result<()> {
    let dir = TempDir::new()?;
    let path = write_numbered(&dir, "mixed.txt", 10_000)?;
    let total = |policy: EvictionPolicy| -> Result<u64> {
        (0..32).map(|seed| replay_mixed(&path, policy, seed)).sum()
    };
    let lru = total(EvictionPolicy::Lru)?;
    let mut best = 0;
    for policy in [EvictionPolicy::Slru, EvictionPolicy::Arc, EvictionPolicy::Spatial] {
        best = best.max(total(policy)?);
    }
    assert!(best > lru, "best alternative {best} hits vs lru {lru}");
    Ok(())
}

#[test]
fn adjacent_prefetch_saves_misses_on_a_scan() -> Result<()> {
    let dir = TempDir::new()?;
    let path = write_numbered(&dir, "scan.txt", 1_000)?;
    let scan = |strategy: PrefetchStrategy| -> Result<pagebuf::BufferStats> {
        let buf = VirtualBuffer::open(
            &path,
            BufferOptions {
                prefetch_strategy: strategy,
                ..options(10, 4, EvictionPolicy::Lru)
            },
        )?;
        for i in 0..buf.line_count() {
            buf.line(i)?;
        }
        Ok(buf.stats())
    };
    let cold = scan(PrefetchStrategy::None)?;
    let warm = scan(PrefetchStrategy::Adjacent)?;
    assert_eq!(cold.misses, 100);
    assert_eq!(cold.prefetch_hits, 0);
    assert!(warm.misses < cold.misses);
    assert!(warm.prefetch_hits > 0);
    Ok(())
}

/// Demand reads cycling over five far-apart pages, one line per page.
fn replay_cycle(path: &Path, strategy: PrefetchStrategy) -> Result<pagebuf::BufferStats> {
    let buf = VirtualBuffer::open(
        path,
        BufferOptions {
            prefetch_strategy: strategy,
            prefetch_batch: 1,
            ..options(10, 4, EvictionPolicy::Lru)
        },
    )?;
    for _ in 0..40 {
        for page in [100, 700, 300, 900, 500] {
            assert_eq!(buf.line(page * 10)?, format!("line {}", page * 10));
        }
    }
    Ok(buf.stats())
}

#[test]
fn history_based_prefetch_learns_a_repeating_jump_pattern() -> Result<()> {
    let dir = TempDir::new()?;
    let path = write_numbered(&dir, "jumps.txt", 10_000)?;
    let cold = replay_cycle(&path, PrefetchStrategy::None)?;
    assert_eq!(cold.misses, 200);
    assert_eq!(cold.prefetch_hits, 0);
    for strategy in [PrefetchStrategy::Predictive, PrefetchStrategy::Adaptive] {
        let warm = replay_cycle(&path, strategy)?;
        assert!(warm.prefetch_hits > 0, "{}", strategy.as_str());
        assert!(
            warm.misses * 4 < cold.misses,
            "{} missed {} times",
            strategy.as_str(),
            warm.misses
        );
        assert!(warm.pages_in_memory <= 4);
    }
    Ok(())
}

#[test]
fn switching_policy_keeps_content_and_residents() -> Result<()> {
    let dir = TempDir::new()?;
    let path = write_numbered(&dir, "switch.txt", 100)?;
    let mut buf = VirtualBuffer::open(&path, options(10, 3, EvictionPolicy::Lru))?;
    buf.set_line(5, "dirty")?;
    buf.line(25)?;
    buf.line(45)?;
    for policy in EvictionPolicy::ALL {
        buf.set_eviction_policy(policy);
        assert_eq!(buf.eviction_policy(), policy);
        assert_eq!(buf.pages_in_memory(), 3);
    }
    for i in (0..100).step_by(10) {
        buf.line(i)?;
    }
    assert_eq!(buf.line(5)?, "dirty");
    buf.set_cache_size(1)?;
    assert_eq!(buf.pages_in_memory(), 1);
    assert_eq!(buf.line(5)?, "dirty");
    Ok(())
}
