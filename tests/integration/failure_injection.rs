#![allow(missing_docs)]

use std::fs::{self, OpenOptions};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use pagebuf::primitives::io::FileIo;
use pagebuf::{BufferError, BufferOptions, PrefetchStrategy, Result, VirtualBuffer};
use tempfile::TempDir;

/// Spill target whose writes always fail.
#[derive(Default)]
struct FailingSpill {
    writes: Arc<AtomicUsize>,
}

impl FileIo for FailingSpill {
    fn read_at(&self, _off: u64, _dst: &mut [u8]) -> Result<()> {
        Err(io::Error::new(io::ErrorKind::UnexpectedEof, "nothing was ever written").into())
    }

    fn write_at(&self, _off: u64, _src: &[u8]) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        Err(io::Error::new(io::ErrorKind::Other, "injected write failure").into())
    }
}

fn options() -> BufferOptions {
    BufferOptions {
        page_size: 10,
        cache_size: 2,
        prefetch_strategy: PrefetchStrategy::None,
        ..BufferOptions::default()
    }
}

fn numbered(dir: &TempDir, lines: usize) -> Result<PathBuf> {
    let path = dir.path().join("numbered.txt");
    let text: String = (0..lines).map(|i| format!("line {i}\n")).collect();
    fs::write(&path, text)?;
    Ok(path)
}

#[test]
fn failed_writeback_is_counted_and_page_still_evicted() -> Result<()> {
    let dir = TempDir::new()?;
    let path = numbered(&dir, 100)?;
    let mut buf = VirtualBuffer::open(&path, options())?;
    let spill = FailingSpill::default();
    let writes = Arc::clone(&spill.writes);
    buf.set_spill_io(Box::new(spill))?;

    buf.set_line(3, "changed")?;
    assert_eq!(buf.line(3)?, "changed");
    buf.line(15)?;
    buf.line(25)?;

    let stats = buf.stats();
    assert_eq!(stats.evictions, 1);
    assert_eq!(stats.writeback_failures, 1);
    assert_eq!(stats.dirty_writebacks, 0);
    assert_eq!(writes.load(Ordering::SeqCst), 1);
    assert!(!buf.is_page_resident(0));
    assert!(buf.pages_in_memory() <= 2);

    // The edit could not be persisted, so the source content comes back.
    assert_eq!(buf.line(3)?, "line 3");
    assert!(buf.is_modified());
    Ok(())
}

#[test]
fn explicit_flush_reports_spill_errors() -> Result<()> {
    let dir = TempDir::new()?;
    let path = numbered(&dir, 30)?;
    let mut buf = VirtualBuffer::open(&path, options())?;
    buf.set_spill_io(Box::new(FailingSpill::default()))?;
    buf.set_line(12, "dirty")?;
    assert!(matches!(buf.flush(), Err(BufferError::Io(_))));
    assert_eq!(buf.line(12)?, "dirty");
    Ok(())
}

#[test]
fn spill_cannot_be_swapped_after_use() -> Result<()> {
    let dir = TempDir::new()?;
    let path = numbered(&dir, 30)?;
    let mut buf = VirtualBuffer::open(&path, options())?;
    buf.set_line(1, "spilled")?;
    assert_eq!(buf.flush()?, 1);
    assert!(matches!(
        buf.set_spill_io(Box::new(FailingSpill::default())),
        Err(BufferError::Invalid(_))
    ));
    Ok(())
}

#[test]
fn truncated_source_yields_degraded_pages() -> Result<()> {
    let dir = TempDir::new()?;
    let path = numbered(&dir, 100)?;
    let mut buf = VirtualBuffer::open(&path, options())?;

    let keep: usize = (0..50).map(|i| format!("line {i}\n").len()).sum();
    OpenOptions::new()
        .write(true)
        .open(&path)?
        .set_len(keep as u64)?;

    assert_eq!(buf.line(45)?, "line 45");
    assert_eq!(buf.line(55)?, "");
    assert_eq!(buf.line(59)?, "");
    assert_eq!(buf.line_count(), 100);
    let stats = buf.stats();
    assert_eq!(stats.load_failures, 1);
    assert!(!buf.is_modified());

    // Placeholder lines are never written out or edited.
    let copy = dir.path().join("copy.txt");
    assert!(buf.save_to_file(&copy).is_err());
    assert!(buf.set_line(55, "over a hole").is_err());
    assert!(buf.lines().is_err());

    // Pages before the cut are unaffected.
    buf.set_line(40, "still fine")?;
    assert_eq!(buf.line(40)?, "still fine");
    Ok(())
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = TempDir::new().unwrap();
    let err = VirtualBuffer::open(dir.path().join("absent.txt"), options()).unwrap_err();
    assert!(matches!(err, BufferError::Io(_)));
}

#[test]
fn out_of_range_requests_fail_without_side_effects() -> Result<()> {
    let dir = TempDir::new()?;
    let path = numbered(&dir, 20)?;
    let mut buf = VirtualBuffer::open(&path, options())?;
    assert!(matches!(buf.line(20), Err(BufferError::OutOfRange { index: 20, len: 20, .. })));
    assert!(buf.set_line(99, "x").is_err());
    assert!(buf.insert_line(21, "x").is_err());
    assert!(matches!(buf.delete_lines(5, 2), Err(BufferError::InvalidRange(_))));
    assert!(buf.join_lines(19).is_err());
    assert_eq!(buf.line_count(), 20);
    assert!(!buf.is_modified());
    assert_eq!(buf.stats().misses, 0);
    assert!(matches!(
        buf.line_segment(0, 9, 12),
        Err(BufferError::OutOfRange { what: "column", .. })
    ));
    Ok(())
}
