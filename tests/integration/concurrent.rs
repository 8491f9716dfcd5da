#![allow(missing_docs)]

use std::fs;
use std::sync::{Arc, Barrier};
use std::thread;

use pagebuf::{BufferOptions, EvictionPolicy, Result, SharedBuffer, VirtualBuffer};
use tempfile::TempDir;

const NUM_READERS: usize = 8;
const LINES: usize = 2_000;

fn expected(i: usize) -> String {
    format!("{i:05} {}", "x".repeat(i % 37))
}

fn open_shared(dir: &TempDir, policy: EvictionPolicy) -> Result<SharedBuffer> {
    let path = dir.path().join("shared.txt");
    let text: String = (0..LINES).map(|i| expected(i) + "\n").collect();
    fs::write(&path, text)?;
    let buf = VirtualBuffer::open(
        &path,
        BufferOptions {
            page_size: 25,
            cache_size: 4,
            eviction_policy: policy,
            ..BufferOptions::default()
        },
    )?;
    Ok(SharedBuffer::new(buf))
}

#[test]
fn concurrent_readers_see_whole_lines() -> Result<()> {
    let dir = TempDir::new()?;
    for policy in EvictionPolicy::ALL {
        let shared = open_shared(&dir, policy)?;
        let barrier = Arc::new(Barrier::new(NUM_READERS));
        let mut handles = Vec::new();

        for reader in 0..NUM_READERS {
            let shared = shared.clone();
            let barrier = Arc::clone(&barrier);
            handles.push(thread::spawn(move || -> Result<()> {
                barrier.wait();
                for step in 0..LINES {
                    let i = (step * (reader + 7) * 31) % LINES;
                    assert_eq!(shared.line(i)?, expected(i));
                }
                if reader % 4 == 0 {
                    let all = shared.all_lines()?;
                    assert_eq!(all.len(), LINES);
                    assert!(all.iter().enumerate().all(|(i, line)| *line == expected(i)));
                }
                Ok(())
            }));
        }

        for handle in handles {
            handle.join().unwrap()?;
        }
        let stats = shared.stats();
        assert_eq!(stats.hits + stats.misses, (NUM_READERS * LINES) as u64);
        assert!(shared.pages_in_memory() <= 4);
        assert!(!shared.is_modified());
    }
    Ok(())
}

#[test]
fn writers_and_readers_interleave_safely() -> Result<()> {
    let dir = TempDir::new()?;
    let shared = open_shared(&dir, EvictionPolicy::Slru)?;
    let barrier = Arc::new(Barrier::new(4));
    let mut handles = Vec::new();

    for writer in 0..2 {
        let shared = shared.clone();
        let barrier = Arc::clone(&barrier);
        handles.push(thread::spawn(move || -> Result<()> {
            barrier.wait();
            for step in 0..200 {
                let line = (step * 10 + writer) % LINES;
                shared.modify_line(line, |text| text.push('!'))?;
            }
            Ok(())
        }));
    }
    for reader in 0..2 {
        let shared = shared.clone();
        let barrier = Arc::clone(&barrier);
        handles.push(thread::spawn(move || -> Result<()> {
            barrier.wait();
            for step in 0..500 {
                let i = (step * 13 + reader) % LINES;
                let line = shared.line(i)?;
                let base = expected(i);
                assert!(line.starts_with(&base), "line {i} was {line:?}");
                assert!(line[base.len()..].chars().all(|c| c == '!'));
            }
            Ok(())
        }));
    }
    for handle in handles {
        handle.join().unwrap()?;
    }

    assert_eq!(shared.line_count(), LINES);
    let guard = shared.lock_for_reading();
    for writer in 0..2 {
        for step in 0..200 {
            let line = (step * 10 + writer) % LINES;
            assert_eq!(guard.line(line)?, expected(line) + "!");
        }
    }
    assert!(guard.is_modified());
    Ok(())
}

#[test]
fn write_guard_makes_multi_step_edits_atomic() -> Result<()> {
    let dir = TempDir::new()?;
    let shared = open_shared(&dir, EvictionPolicy::Lru)?;
    let barrier = Arc::new(Barrier::new(3));
    let mut handles = Vec::new();

    for _ in 0..2 {
        let shared = shared.clone();
        let barrier = Arc::clone(&barrier);
        handles.push(thread::spawn(move || -> Result<()> {
            barrier.wait();
            for _ in 0..50 {
                let mut buf = shared.lock_for_writing();
                buf.insert_line(0, "pair-a")?;
                buf.insert_line(1, "pair-b")?;
            }
            Ok(())
        }));
    }
    let observer = {
        let shared = shared.clone();
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || -> Result<()> {
            barrier.wait();
            for _ in 0..100 {
                let buf = shared.lock_for_reading();
                let count = buf.line_count() - LINES;
                assert_eq!(count % 2, 0);
                if count > 0 {
                    assert_eq!(buf.line(0)?, "pair-a");
                    assert_eq!(buf.line(1)?, "pair-b");
                }
            }
            Ok(())
        })
    };
    for handle in handles {
        handle.join().unwrap()?;
    }
    observer.join().unwrap()?;
    assert_eq!(shared.line_count(), LINES + 200);
    Ok(())
}
