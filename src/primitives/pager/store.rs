use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::primitives::io::{FileIo, SpillFile};
use crate::types::{BufferError, Result};

use super::index::{
    load_side_index, persist_side_index, scan_offsets, LineIndex, LineLoc, LineReader, SourceStamp,
};

struct SourceFile {
    path: PathBuf,
    reader: LineReader<BufReader<File>>,
}

/// Reads line content from the backing file and the spill file, and writes
/// dirty lines to the spill file.
///
/// The backing file is opened read-only and never modified.
#[derive(Default)]
pub struct PageStore {
    source: Option<SourceFile>,
    spill: Option<SpillFile>,
}

impl PageStore {
    /// Store with no backing file; every line starts out in memory or spill.
    pub fn detached() -> Self {
        Self::default()
    }

    /// Opens `path` and builds its line index, preferring a valid side file.
    pub fn open(path: &Path) -> Result<(Self, LineIndex)> {
        let file = File::open(path)?;
        let stamp = SourceStamp::of(&file)?;
        let mut reader = LineReader::new(BufReader::new(file));
        let index = match load_side_index(path, stamp) {
            Some(offsets) => {
                debug!(path = %path.display(), lines = offsets.len(), "pager.index.side_file_loaded");
                LineIndex::from_offsets(offsets)
            }
            None => {
                let offsets = scan_offsets(&mut reader)?;
                debug!(path = %path.display(), lines = offsets.len(), "pager.index.scanned");
                let index = LineIndex::from_offsets(offsets);
                if let Err(err) = persist_side_index(path, stamp, &index) {
                    warn!(path = %path.display(), error = %err, "pager.index.side_file_write_failed");
                }
                index
            }
        };
        let store = Self {
            source: Some(SourceFile {
                path: path.to_path_buf(),
                reader,
            }),
            spill: None,
        };
        Ok((store, index))
    }

    /// Path of the backing file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.source.as_ref().map(|src| src.path.as_path())
    }

    /// Routes future write-backs through `io`.
    ///
    /// Rejected once records have been written, since existing spill
    /// locations would dangle.
    pub fn install_spill(&mut self, io: Box<dyn FileIo>) -> Result<()> {
        if self.spill.as_ref().is_some_and(|spill| !spill.is_empty()) {
            return Err(BufferError::Invalid("spill file already in use"));
        }
        self.spill = Some(SpillFile::with_io(io));
        Ok(())
    }

    /// Drops every spill record. Only valid once no index entry refers to one.
    pub fn reset_spill(&mut self) {
        self.spill = None;
    }

    /// Bytes currently held in the spill file.
    pub fn spill_len(&self) -> u64 {
        self.spill.as_ref().map_or(0, SpillFile::len)
    }

    /// Reads one line. Invalid UTF-8 in the backing file is replaced lossily.
    pub fn read_line(&mut self, loc: LineLoc) -> Result<String> {
        match loc {
            LineLoc::Blank => Ok(String::new()),
            LineLoc::Source(off) => {
                let source = self
                    .source
                    .as_mut()
                    .ok_or(BufferError::Corruption("source offset without backing file"))?;
                source.reader.seek_to(off)?;
                let mut buf = Vec::new();
                match source.reader.next_line(&mut buf)? {
                    Some(_) => Ok(String::from_utf8_lossy(&buf).into_owned()),
                    None => Err(BufferError::Corruption("line offset past end of backing file")),
                }
            }
            LineLoc::Spill(off) => self
                .spill
                .as_ref()
                .ok_or(BufferError::Corruption("spill offset without spill file"))?
                .read_line(off),
        }
    }

    /// Reads a run of lines in order.
    pub fn read_lines(&mut self, locs: &[LineLoc]) -> Result<Vec<String>> {
        locs.iter().map(|loc| self.read_line(*loc)).collect()
    }

    /// Writes `lines` to the spill file and returns their new locations.
    ///
    /// Empty lines are not stored and map to [`LineLoc::Blank`].
    pub fn write_lines(&mut self, lines: &[String]) -> Result<Vec<LineLoc>> {
        if lines.iter().all(String::is_empty) {
            return Ok(vec![LineLoc::Blank; lines.len()]);
        }
        if self.spill.is_none() {
            self.spill = Some(SpillFile::create()?);
        }
        let spill = self
            .spill
            .as_mut()
            .ok_or(BufferError::Corruption("spill file unavailable"))?;
        let offsets = spill.append_lines(
            lines
                .iter()
                .filter(|line| !line.is_empty())
                .map(String::as_str),
        )?;
        let mut offsets = offsets.into_iter();
        lines
            .iter()
            .map(|line| {
                if line.is_empty() {
                    Ok(LineLoc::Blank)
                } else {
                    offsets
                        .next()
                        .map(LineLoc::Spill)
                        .ok_or(BufferError::Corruption("spill offset count mismatch"))
                }
            })
            .collect()
    }
}

impl std::fmt::Debug for PageStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageStore")
            .field("path", &self.path())
            .field("spill", &self.spill)
            .finish()
    }
}
