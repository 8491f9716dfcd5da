//! Whole-line reads and edits.

use std::ops::Range;

use crate::types::{BufferError, PageNo, Result};

use super::VirtualBuffer;

/// Number of chars in `s`; columns are counted in chars, not bytes.
pub(super) fn char_len(s: &str) -> usize {
    s.chars().count()
}

impl VirtualBuffer {
    /// Number of lines; never zero.
    pub fn line_count(&self) -> usize {
        self.read(|inner| inner.pager.line_count())
    }

    /// True when the buffer holds a single empty line.
    pub fn is_empty(&self) -> bool {
        self.read(|inner| {
            inner.pager.line_count() == 1 && inner.pager.peek_line(0).is_ok_and(|l| l.is_empty())
        })
    }

    /// Copy of line `index`.
    pub fn line(&self, index: usize) -> Result<String> {
        self.read(|inner| inner.read_line(index))
    }

    /// Length of line `index` in chars.
    pub fn line_length(&self, index: usize) -> Result<usize> {
        self.line(index).map(|line| char_len(&line))
    }

    /// Copies of the lines in `range`, loading their pages on demand.
    pub fn lines_in(&self, range: Range<usize>) -> Result<Vec<String>> {
        self.read(|inner| {
            let len = inner.pager.line_count();
            if range.start > range.end {
                return Err(BufferError::InvalidRange("line range start after end"));
            }
            if range.end > len {
                return Err(BufferError::line(range.end, len));
            }
            let mut out = Vec::with_capacity(range.len());
            let mut line = range.start;
            while line < range.end {
                let (no, slot) = inner.pager.locate(line);
                inner.touch(no);
                let page = inner
                    .pager
                    .page(no)
                    .ok_or(BufferError::Corruption("page not resident after access"))?;
                let take = (range.end - line).min(page.lines.len().saturating_sub(slot));
                if take == 0 {
                    return Err(BufferError::Corruption("page shorter than line index"));
                }
                out.extend_from_slice(&page.lines[slot..slot + take]);
                line += take;
            }
            Ok(out)
        })
    }

    /// Copy of every line. Pages are read without entering the cache.
    pub fn lines(&self) -> Result<Vec<String>> {
        self.read(|inner| {
            let mut out = Vec::with_capacity(inner.pager.line_count());
            inner.for_each_page(|lines| {
                out.extend_from_slice(lines);
                Ok(())
            })?;
            Ok(out)
        })
    }

    /// Like [`VirtualBuffer::lines`], but a buffer holding one empty line
    /// yields no lines.
    pub fn all_lines(&self) -> Result<Vec<String>> {
        let lines = self.lines()?;
        if lines.len() == 1 && lines[0].is_empty() {
            return Ok(Vec::new());
        }
        Ok(lines)
    }

    /// Total chars over all lines, line terminators excluded.
    pub fn character_count(&self) -> Result<usize> {
        self.read(|inner| {
            let mut count = 0;
            inner.for_each_page(|lines| {
                count += lines.iter().map(|line| char_len(line)).sum::<usize>();
                Ok(())
            })?;
            Ok(count)
        })
    }

    /// Appends a line at the end. Never shifts existing pages.
    pub fn add_line(&mut self, text: impl Into<String>) -> Result<()> {
        let text = text.into();
        self.edit(|inner| {
            inner.pager.append_line(text)?;
            inner.modified = true;
            Ok(())
        })
    }

    /// Inserts a line before `index`; `index == line_count()` appends.
    pub fn insert_line(&mut self, index: usize, text: impl Into<String>) -> Result<()> {
        let text = text.into();
        self.edit(|inner| {
            let len = inner.pager.line_count();
            if index > len {
                return Err(BufferError::line(index, len));
            }
            if index == len {
                inner.pager.append_line(text)?;
                inner.modified = true;
                return Ok(());
            }
            inner.splice(index..index, vec![text])
        })
    }

    /// Inserts `lines` before `index`; `index == line_count()` appends.
    pub fn insert_lines<I, S>(&mut self, index: usize, lines: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let lines: Vec<String> = lines.into_iter().map(Into::into).collect();
        self.edit(|inner| {
            let len = inner.pager.line_count();
            if index > len {
                return Err(BufferError::line(index, len));
            }
            if lines.is_empty() {
                return Ok(());
            }
            inner.splice(index..index, lines)
        })
    }

    /// Removes line `index`. The sole remaining line is emptied instead.
    pub fn delete_line(&mut self, index: usize) -> Result<()> {
        self.edit(|inner| {
            inner.check_line(index)?;
            if inner.pager.line_count() == 1 {
                return inner.edit_line(0, String::clear);
            }
            inner.splice(index..index + 1, Vec::new())
        })
    }

    /// Removes lines `start..end`; `end` is clamped to the buffer length.
    ///
    /// Removing every line leaves a single empty line.
    pub fn delete_lines(&mut self, start: usize, end: usize) -> Result<()> {
        self.edit(|inner| {
            if start > end {
                return Err(BufferError::InvalidRange("delete_lines start after end"));
            }
            inner.check_line(start)?;
            let end = end.min(inner.pager.line_count());
            if start == end {
                return Ok(());
            }
            inner.splice(start..end, Vec::new())
        })
    }

    /// Replaces the content of line `index`.
    pub fn set_line(&mut self, index: usize, text: impl Into<String>) -> Result<()> {
        let text = text.into();
        self.edit(|inner| inner.edit_line(index, |line| *line = text))
    }

    /// Same as [`VirtualBuffer::set_line`].
    pub fn replace_line(&mut self, index: usize, text: impl Into<String>) -> Result<()> {
        self.set_line(index, text)
    }

    /// Runs `f` on line `index` in place.
    pub fn modify_line<R>(&mut self, index: usize, f: impl FnOnce(&mut String) -> R) -> Result<R> {
        self.edit(|inner| inner.edit_line(index, f))
    }

    /// True if `(line, col)` addresses a char boundary inside the buffer;
    /// the position just past the last char counts.
    pub fn is_valid_position(&self, line: usize, col: usize) -> bool {
        self.line(line).is_ok_and(|text| col <= char_len(&text))
    }

    /// Nearest valid position to `(line, col)`.
    pub fn clamp_position(&self, line: usize, col: usize) -> (usize, usize) {
        let line = line.min(self.line_count() - 1);
        let len = self.line_length(line).unwrap_or(0);
        (line, col.min(len))
    }

    /// Page holding line `index`.
    pub fn page_of(&self, index: usize) -> usize {
        self.read(|inner| {
            let (PageNo(no), _) = inner.pager.locate(index);
            no
        })
    }
}
