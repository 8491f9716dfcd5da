use std::convert::TryInto;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, ErrorKind, Seek, SeekFrom, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use tracing::debug;

use crate::types::{BufferError, Result};

/// Where the current content of a line lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LineLoc {
    /// Byte offset of the line start in the backing text file.
    Source(u64),
    /// Offset of a length-prefixed record in the spill file.
    Spill(u64),
    /// Empty line with no stored content.
    Blank,
}

/// Line number to storage location map.
///
/// A freshly scanned index holds only [`LineLoc::Source`] entries in
/// non-decreasing offset order and is flagged pristine. Any write-back or
/// structural splice clears the flag; only pristine indexes are persisted.
#[derive(Clone, Debug)]
pub struct LineIndex {
    locs: Vec<LineLoc>,
    pristine: bool,
}

impl LineIndex {
    /// Index of a buffer holding a single empty line.
    pub fn blank() -> Self {
        Self {
            locs: vec![LineLoc::Blank],
            pristine: false,
        }
    }

    /// Builds a pristine index from scanned line-start offsets.
    ///
    /// An empty offset list describes an empty file, which still has one line.
    pub fn from_offsets(offsets: Vec<u64>) -> Self {
        if offsets.is_empty() {
            return Self {
                locs: vec![LineLoc::Blank],
                pristine: true,
            };
        }
        Self {
            locs: offsets.into_iter().map(LineLoc::Source).collect(),
            pristine: true,
        }
    }

    /// Total number of lines; never zero.
    pub fn len(&self) -> usize {
        self.locs.len()
    }

    /// Always false: a buffer has at least one line.
    pub fn is_empty(&self) -> bool {
        self.locs.is_empty()
    }

    /// True while the index still mirrors the backing file exactly.
    pub fn is_pristine(&self) -> bool {
        self.pristine
    }

    /// Location of line `line`.
    pub fn get(&self, line: usize) -> Option<LineLoc> {
        self.locs.get(line).copied()
    }

    /// Locations for a contiguous line range, clamped to the index length.
    pub fn slice(&self, range: Range<usize>) -> &[LineLoc] {
        let end = range.end.min(self.locs.len());
        let start = range.start.min(end);
        &self.locs[start..end]
    }

    /// Overwrites the locations starting at `first`.
    pub fn redirect(&mut self, first: usize, locs: &[LineLoc]) -> Result<()> {
        let end = first
            .checked_add(locs.len())
            .filter(|end| *end <= self.locs.len())
            .ok_or(BufferError::Corruption("redirect past end of line index"))?;
        self.locs[first..end].copy_from_slice(locs);
        self.pristine = false;
        Ok(())
    }

    /// Replaces `range` with `locs`, shifting every later line.
    pub fn splice(&mut self, range: Range<usize>, locs: Vec<LineLoc>) -> Result<()> {
        if range.start > range.end || range.end > self.locs.len() {
            return Err(BufferError::InvalidRange("line index splice"));
        }
        self.locs.splice(range, locs);
        if self.locs.is_empty() {
            self.locs.push(LineLoc::Blank);
        }
        self.pristine = false;
        Ok(())
    }

    /// Appends one location at the end.
    pub fn push(&mut self, loc: LineLoc) {
        self.locs.push(loc);
        self.pristine = false;
    }

    /// Source offsets of a pristine index, in line order.
    fn source_offsets(&self) -> Option<Vec<u64>> {
        if !self.pristine {
            return None;
        }
        let mut out = Vec::with_capacity(self.locs.len());
        for loc in &self.locs {
            match loc {
                LineLoc::Source(off) => out.push(*off),
                LineLoc::Blank if self.locs.len() == 1 => {}
                _ => return None,
            }
        }
        Some(out)
    }
}

/// Incremental line reader over a seekable byte stream.
///
/// Accepts `\n`, `\r\n` and bare `\r` terminators. A trailing segment without
/// a terminator is a line only when it is non-empty.
pub(crate) struct LineReader<R> {
    inner: R,
    pos: u64,
}

impl<R: BufRead + Seek> LineReader<R> {
    pub(crate) fn new(inner: R) -> Self {
        Self { inner, pos: 0 }
    }

    pub(crate) fn seek_to(&mut self, off: u64) -> io::Result<()> {
        if off != self.pos {
            self.inner.seek(SeekFrom::Start(off))?;
            self.pos = off;
        }
        Ok(())
    }

    /// Reads the next line into `out` (terminator stripped) and returns its
    /// start offset, or `None` at end of input.
    pub(crate) fn next_line(&mut self, out: &mut Vec<u8>) -> io::Result<Option<u64>> {
        out.clear();
        let start = self.pos;
        loop {
            let buf = self.inner.fill_buf()?;
            if buf.is_empty() {
                return Ok((!out.is_empty()).then_some(start));
            }
            match buf.iter().position(|b| *b == b'\n' || *b == b'\r') {
                Some(i) => {
                    let cr = buf[i] == b'\r';
                    out.extend_from_slice(&buf[..i]);
                    self.inner.consume(i + 1);
                    self.pos += (i + 1) as u64;
                    if cr && self.inner.fill_buf()?.first() == Some(&b'\n') {
                        self.inner.consume(1);
                        self.pos += 1;
                    }
                    return Ok(Some(start));
                }
                None => {
                    let n = buf.len();
                    out.extend_from_slice(buf);
                    self.inner.consume(n);
                    self.pos += n as u64;
                }
            }
        }
    }
}

/// Full scan of a text stream, returning the start offset of every line.
pub(crate) fn scan_offsets<R: BufRead + Seek>(reader: &mut LineReader<R>) -> io::Result<Vec<u64>> {
    reader.seek_to(0)?;
    let mut offsets = Vec::new();
    let mut scratch = Vec::new();
    while let Some(start) = reader.next_line(&mut scratch)? {
        offsets.push(start);
    }
    Ok(offsets)
}

const IDX_MAGIC: [u8; 4] = *b"PBIX";
const IDX_VERSION: u16 = 1;
const IDX_HDR_LEN: usize = 32;
const IDX_MAGIC_RANGE: Range<usize> = 0..4;
const IDX_VERSION_RANGE: Range<usize> = 4..6;
const IDX_RESERVED: Range<usize> = 6..8;
const IDX_SOURCE_LEN: Range<usize> = 8..16;
const IDX_SOURCE_MTIME: Range<usize> = 16..24;
const IDX_COUNT: Range<usize> = 24..32;
const IDX_CRC_LEN: usize = 4;

/// Identity of the text file an index side file was built from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SourceStamp {
    /// File length in bytes.
    pub len: u64,
    /// Modification time in nanoseconds since the Unix epoch, or 0 if unknown.
    pub mtime_ns: u64,
}

impl SourceStamp {
    /// Reads the stamp from file metadata.
    pub fn of(file: &File) -> Result<Self> {
        let meta = file.metadata()?;
        let mtime_ns = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        Ok(Self {
            len: meta.len(),
            mtime_ns,
        })
    }
}

/// Path of the side file for `source`: `<name>.idx` next to it.
pub fn side_index_path(source: &Path) -> PathBuf {
    let mut name = source
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("buffer"));
    name.push(".idx");
    let mut path = source.to_path_buf();
    path.set_file_name(name);
    path
}

fn encode_side_index(stamp: SourceStamp, offsets: &[u64]) -> Vec<u8> {
    let mut buf = vec![0u8; IDX_HDR_LEN];
    buf[IDX_MAGIC_RANGE].copy_from_slice(&IDX_MAGIC);
    buf[IDX_VERSION_RANGE].copy_from_slice(&IDX_VERSION.to_le_bytes());
    buf[IDX_RESERVED].copy_from_slice(&0u16.to_le_bytes());
    buf[IDX_SOURCE_LEN].copy_from_slice(&stamp.len.to_le_bytes());
    buf[IDX_SOURCE_MTIME].copy_from_slice(&stamp.mtime_ns.to_le_bytes());
    buf[IDX_COUNT].copy_from_slice(&(offsets.len() as u64).to_le_bytes());
    buf.reserve(offsets.len() * 8 + IDX_CRC_LEN);
    for off in offsets {
        buf.extend_from_slice(&off.to_le_bytes());
    }
    let crc = crc32fast::hash(&buf);
    buf.extend_from_slice(&crc.to_le_bytes());
    buf
}

fn read_u64(buf: &[u8], range: Range<usize>) -> Result<u64> {
    let bytes: [u8; 8] = buf[range]
        .try_into()
        .map_err(|_| BufferError::Corruption("index field width"))?;
    Ok(u64::from_le_bytes(bytes))
}

fn decode_side_index(buf: &[u8], stamp: SourceStamp) -> Result<Vec<u64>> {
    if buf.len() < IDX_HDR_LEN + IDX_CRC_LEN {
        return Err(BufferError::Corruption("index file truncated"));
    }
    if buf[IDX_MAGIC_RANGE] != IDX_MAGIC {
        return Err(BufferError::Corruption("index magic mismatch"));
    }
    let version = u16::from_le_bytes([buf[IDX_VERSION_RANGE.start], buf[IDX_VERSION_RANGE.start + 1]]);
    if version != IDX_VERSION {
        return Err(BufferError::Corruption("index version mismatch"));
    }
    let body_len = buf.len() - IDX_CRC_LEN;
    let stored_crc = u32::from_le_bytes(
        buf[body_len..]
            .try_into()
            .map_err(|_| BufferError::Corruption("index crc width"))?,
    );
    if crc32fast::hash(&buf[..body_len]) != stored_crc {
        return Err(BufferError::Corruption("index checksum mismatch"));
    }
    let source_len = read_u64(buf, IDX_SOURCE_LEN)?;
    let mtime_ns = read_u64(buf, IDX_SOURCE_MTIME)?;
    if source_len != stamp.len || mtime_ns != stamp.mtime_ns {
        return Err(BufferError::Corruption("index is stale"));
    }
    let count = usize::try_from(read_u64(buf, IDX_COUNT)?)
        .map_err(|_| BufferError::Corruption("index count overflow"))?;
    if count.checked_mul(8) != Some(body_len - IDX_HDR_LEN) {
        return Err(BufferError::Corruption("index length mismatch"));
    }
    let mut offsets = Vec::with_capacity(count);
    let mut prev = 0u64;
    for chunk in buf[IDX_HDR_LEN..body_len].chunks_exact(8) {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(chunk);
        let off = u64::from_le_bytes(raw);
        if off < prev || off >= source_len {
            return Err(BufferError::Corruption("index offsets out of order"));
        }
        offsets.push(off);
        prev = off;
    }
    Ok(offsets)
}

/// Loads line offsets from the side file of `source`.
///
/// Returns `None` when the side file is missing, unreadable, corrupt or
/// built from a different version of the source; callers fall back to a scan.
pub fn load_side_index(source: &Path, stamp: SourceStamp) -> Option<Vec<u64>> {
    let path = side_index_path(source);
    let buf = match fs::read(&path) {
        Ok(buf) => buf,
        Err(err) if err.kind() == ErrorKind::NotFound => return None,
        Err(err) => {
            debug!(path = %path.display(), error = %err, "pager.index.side_file_unreadable");
            return None;
        }
    };
    match decode_side_index(&buf, stamp) {
        Ok(offsets) => Some(offsets),
        Err(err) => {
            debug!(path = %path.display(), error = %err, "pager.index.side_file_rejected");
            None
        }
    }
}

/// Writes the side file for `source` if `index` is pristine.
///
/// Returns whether a file was written.
pub fn persist_side_index(source: &Path, stamp: SourceStamp, index: &LineIndex) -> Result<bool> {
    let Some(offsets) = index.source_offsets() else {
        return Ok(false);
    };
    let path = side_index_path(source);
    let mut tmp = path.clone();
    tmp.set_extension("idx.tmp");
    {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp)?;
        file.write_all(&encode_side_index(stamp, &offsets))?;
        file.sync_all()?;
    }
    fs::rename(&tmp, &path)?;
    debug!(path = %path.display(), lines = offsets.len(), "pager.index.side_file_written");
    Ok(true)
}
