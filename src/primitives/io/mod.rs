#![forbid(unsafe_code)]

use std::fs::File;
use std::io::{self, ErrorKind};
use std::path::Path;

use crate::types::{BufferError, Result};

/// Positioned reads and writes against a file-like target.
///
/// The spill file goes through this trait so tests can substitute a target
/// that fails on demand.
pub trait FileIo: Send + Sync + 'static {
    /// Fills `dst` from offset `off`; a short read is an error.
    fn read_at(&self, off: u64, dst: &mut [u8]) -> Result<()>;
    /// Writes all of `src` at offset `off`.
    fn write_at(&self, off: u64, src: &[u8]) -> Result<()>;
}

#[cfg(unix)]
fn pread(file: &File, buf: &mut [u8], off: u64) -> io::Result<usize> {
    std::os::unix::fs::FileExt::read_at(file, buf, off)
}

#[cfg(unix)]
fn pwrite(file: &File, buf: &[u8], off: u64) -> io::Result<usize> {
    std::os::unix::fs::FileExt::write_at(file, buf, off)
}

#[cfg(windows)]
fn pread(file: &File, buf: &mut [u8], off: u64) -> io::Result<usize> {
    std::os::windows::fs::FileExt::seek_read(file, buf, off)
}

#[cfg(windows)]
fn pwrite(file: &File, buf: &[u8], off: u64) -> io::Result<usize> {
    std::os::windows::fs::FileExt::seek_write(file, buf, off)
}

/// Reads exactly `dst.len()` bytes starting at `off`.
pub fn read_exact_at(file: &File, mut off: u64, mut dst: &mut [u8]) -> io::Result<()> {
    while !dst.is_empty() {
        match pread(file, dst, off)? {
            0 => return Err(io::Error::new(ErrorKind::UnexpectedEof, "positioned read hit EOF")),
            n => {
                dst = &mut dst[n..];
                off += n as u64;
            }
        }
    }
    Ok(())
}

/// Writes all of `src` starting at `off`.
pub fn write_all_at(file: &File, mut off: u64, mut src: &[u8]) -> io::Result<()> {
    while !src.is_empty() {
        match pwrite(file, src, off)? {
            0 => return Err(io::Error::new(ErrorKind::WriteZero, "positioned write stalled")),
            n => {
                src = &src[n..];
                off += n as u64;
            }
        }
    }
    Ok(())
}

/// [`FileIo`] over a plain [`File`].
#[derive(Debug)]
pub struct StdFileIo {
    file: File,
}

impl StdFileIo {
    /// Wraps an open file.
    pub fn new(file: File) -> Self {
        Self { file }
    }

    /// Anonymous scratch file, removed by the OS once dropped.
    pub fn scratch() -> Result<Self> {
        Ok(Self::new(tempfile::tempfile()?))
    }

    /// Opens `path` read-only.
    pub fn open_read(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(File::open(path)?))
    }
}

impl FileIo for StdFileIo {
    fn read_at(&self, off: u64, dst: &mut [u8]) -> Result<()> {
        read_exact_at(&self.file, off, dst).map_err(BufferError::from)
    }

    fn write_at(&self, off: u64, src: &[u8]) -> Result<()> {
        write_all_at(&self.file, off, src).map_err(BufferError::from)
    }
}

const RECORD_HDR_LEN: usize = 4;

/// Append-only file of length-prefixed line records.
///
/// Dirty lines written back from evicted pages land here so the backing text
/// file is never rewritten in place while the buffer is being edited.
pub struct SpillFile {
    io: Box<dyn FileIo>,
    len: u64,
}

impl SpillFile {
    /// Creates a spill file over an anonymous scratch file.
    pub fn create() -> Result<Self> {
        Ok(Self::with_io(Box::new(StdFileIo::scratch()?)))
    }

    /// Wraps an arbitrary [`FileIo`], starting at offset zero.
    pub fn with_io(io: Box<dyn FileIo>) -> Self {
        Self { io, len: 0 }
    }

    /// Number of bytes appended so far.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Returns true if nothing has been appended yet.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Appends `lines` as consecutive records, returning each record's offset.
    ///
    /// The batch goes out as one positioned write. A failed write leaves the
    /// logical length unchanged.
    pub fn append_lines<'a, I>(&mut self, lines: I) -> Result<Vec<u64>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut buf = Vec::new();
        let mut offsets = Vec::new();
        for line in lines {
            let len = u32::try_from(line.len()).map_err(|_| BufferError::Invalid("line too long"))?;
            offsets.push(self.len + buf.len() as u64);
            buf.extend_from_slice(&len.to_le_bytes());
            buf.extend_from_slice(line.as_bytes());
        }
        if buf.is_empty() {
            return Ok(offsets);
        }
        self.io.write_at(self.len, &buf)?;
        self.len += buf.len() as u64;
        Ok(offsets)
    }

    /// Reads the record starting at `off`.
    pub fn read_line(&self, off: u64) -> Result<String> {
        if off >= self.len {
            return Err(BufferError::Corruption("spill offset past end"));
        }
        let mut hdr = [0u8; RECORD_HDR_LEN];
        self.io.read_at(off, &mut hdr)?;
        let len = u32::from_le_bytes(hdr) as usize;
        let mut bytes = vec![0u8; len];
        self.io.read_at(off + RECORD_HDR_LEN as u64, &mut bytes)?;
        String::from_utf8(bytes).map_err(|_| BufferError::Corruption("spill record not utf-8"))
    }
}

impl std::fmt::Debug for SpillFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpillFile").field("len", &self.len).finish()
    }
}
