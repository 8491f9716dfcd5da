//! Character, segment and multi-line text edits.
//!
//! Write operations clamp columns past the end of a line to its length;
//! read operations reject them.

use crate::types::{BufferError, PageNo, Result};

use super::lines::char_len;
use super::{Inner, VirtualBuffer};

/// Byte offset of char column `col`, or `s.len()` past the end.
fn byte_at(s: &str, col: usize) -> usize {
    s.char_indices().nth(col).map_or(s.len(), |(at, _)| at)
}

fn is_break(c: char) -> bool {
    c == '\n' || c == '\r'
}

/// Splits `text` on `\n`, `\r\n` and lone `\r`, the terminators recognised
/// when a file is read.
fn split_breaks(text: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut rest = text;
    while let Some(at) = rest.find(is_break) {
        parts.push(rest[..at].to_string());
        let width = if rest[at..].starts_with("\r\n") { 2 } else { 1 };
        rest = &rest[at + width..];
    }
    parts.push(rest.to_string());
    parts
}

fn check_span(start: usize, end: usize) -> Result<()> {
    if start > end {
        return Err(BufferError::InvalidRange("segment start after end"));
    }
    Ok(())
}

impl Inner {
    fn join_lines(&mut self, line: usize) -> Result<()> {
        self.check_line(line)?;
        let len = self.pager.line_count();
        if line + 1 >= len {
            return Err(BufferError::line(line + 1, len));
        }
        let mut joined = self.read_line(line)?;
        joined.push_str(&self.read_line(line + 1)?);
        self.splice(line..line + 2, vec![joined])
    }

    fn split_line(&mut self, line: usize, col: usize) -> Result<()> {
        let text = self.read_line(line)?;
        let at = byte_at(&text, col);
        let (head, tail) = text.split_at(at);
        self.splice(line..line + 1, vec![head.to_string(), tail.to_string()])
    }

    fn insert_string(&mut self, line: usize, col: usize, text: &str) -> Result<()> {
        if !text.contains(is_break) {
            return self.edit_line(line, |current| {
                let at = byte_at(current, col);
                current.insert_str(at, text);
            });
        }
        let current = self.read_line(line)?;
        let at = byte_at(&current, col);
        let (head, tail) = current.split_at(at);
        let mut parts = split_breaks(text);
        if let Some(first) = parts.first_mut() {
            first.insert_str(0, head);
        }
        if let Some(last) = parts.last_mut() {
            last.push_str(tail);
        }
        self.splice(line..line + 1, parts)
    }

    fn delete_text(&mut self, start: (usize, usize), end: (usize, usize)) -> Result<()> {
        self.check_line(start.0)?;
        self.check_line(end.0)?;
        if start > end {
            return Err(BufferError::InvalidRange("text range start after end"));
        }
        if start.0 == end.0 {
            return self.edit_line(start.0, |line| {
                let from = byte_at(line, start.1);
                let to = byte_at(line, end.1);
                line.replace_range(from..to, "");
            });
        }
        let first = self.read_line(start.0)?;
        let last = self.read_line(end.0)?;
        let mut merged = first[..byte_at(&first, start.1)].to_string();
        merged.push_str(&last[byte_at(&last, end.1)..]);
        self.splice(start.0..end.0 + 1, vec![merged])
    }
}

impl VirtualBuffer {
    /// Inserts `ch` at `(line, col)`. `\n` or `\r` splits the line.
    pub fn insert_char(&mut self, line: usize, col: usize, ch: char) -> Result<()> {
        if is_break(ch) {
            return self.split_line(line, col);
        }
        self.edit(|inner| {
            inner.edit_line(line, |text| {
                let at = byte_at(text, col);
                text.insert(at, ch);
            })
        })
    }

    /// Backspace at `(line, col)`.
    ///
    /// Column 0 joins the line onto the previous one; a column past the end
    /// removes the last char.
    pub fn delete_char(&mut self, line: usize, col: usize) -> Result<()> {
        self.edit(|inner| {
            inner.check_line(line)?;
            if col == 0 {
                if line == 0 {
                    return Ok(());
                }
                return inner.join_lines(line - 1);
            }
            let text = inner.read_line(line)?;
            let len = char_len(&text);
            if len == 0 {
                return Ok(());
            }
            let target = col.min(len) - 1;
            inner.edit_line(line, |text| {
                let at = byte_at(text, target);
                text.remove(at);
            })
        })
    }

    /// Delete at `(line, col)`.
    ///
    /// At or past the end of a line the next line is joined on; at the end
    /// of the last line nothing happens.
    pub fn delete_char_forward(&mut self, line: usize, col: usize) -> Result<()> {
        self.edit(|inner| {
            let text = inner.read_line(line)?;
            if col < char_len(&text) {
                return inner.edit_line(line, |text| {
                    let at = byte_at(text, col);
                    text.remove(at);
                });
            }
            if line + 1 < inner.pager.line_count() {
                return inner.join_lines(line);
            }
            Ok(())
        })
    }

    /// Splits `line` at `col`; the tail becomes a new line below.
    pub fn split_line(&mut self, line: usize, col: usize) -> Result<()> {
        self.edit(|inner| inner.split_line(line, col))
    }

    /// Appends line `line + 1` to `line` and removes it. Fails on the last line.
    pub fn join_lines(&mut self, line: usize) -> Result<()> {
        self.edit(|inner| inner.join_lines(line))
    }

    /// Inserts `text` at `(line, col)`; embedded `\n`, `\r\n` or `\r`
    /// split lines.
    pub fn insert_string(&mut self, line: usize, col: usize, text: &str) -> Result<()> {
        self.edit(|inner| inner.insert_string(line, col, text))
    }

    /// Same as [`VirtualBuffer::insert_string`].
    pub fn insert_text(&mut self, line: usize, col: usize, text: &str) -> Result<()> {
        self.insert_string(line, col, text)
    }

    /// Chars `start..end` of `line`. `end` is clamped; `start` past the end
    /// of the line is an error.
    pub fn line_segment(&self, line: usize, start: usize, end: usize) -> Result<String> {
        check_span(start, end)?;
        let text = self.line(line)?;
        let len = char_len(&text);
        if start > len {
            return Err(BufferError::column(start, len));
        }
        Ok(text.chars().skip(start).take(end.min(len) - start).collect())
    }

    /// Replaces chars `start..end` of `line` with `text`. Both columns are
    /// clamped to the line.
    pub fn replace_line_segment(
        &mut self,
        line: usize,
        start: usize,
        end: usize,
        text: &str,
    ) -> Result<()> {
        check_span(start, end)?;
        self.edit(|inner| {
            inner.edit_line(line, |current| {
                let from = byte_at(current, start);
                let to = byte_at(current, end);
                current.replace_range(from..to, text);
            })
        })
    }

    /// Removes chars `start..end` of `line`. Both columns are clamped.
    pub fn delete_line_segment(&mut self, line: usize, start: usize, end: usize) -> Result<()> {
        check_span(start, end)?;
        self.edit(|inner| {
            let len = char_len(&inner.read_line(line)?);
            if start.min(len) == end.min(len) {
                return Ok(());
            }
            inner.edit_line(line, |current| {
                let from = byte_at(current, start);
                let to = byte_at(current, end);
                current.replace_range(from..to, "");
            })
        })
    }

    /// Removes the text between two positions, joining lines as needed.
    pub fn delete_text(
        &mut self,
        start_line: usize,
        start_col: usize,
        end_line: usize,
        end_col: usize,
    ) -> Result<()> {
        self.edit(|inner| inner.delete_text((start_line, start_col), (end_line, end_col)))
    }

    /// Replaces the text between two positions with `text`.
    pub fn replace_text(
        &mut self,
        start_line: usize,
        start_col: usize,
        end_line: usize,
        end_col: usize,
        text: &str,
    ) -> Result<()> {
        self.edit(|inner| {
            inner.delete_text((start_line, start_col), (end_line, end_col))?;
            inner.insert_string(start_line, start_col, text)
        })
    }

    /// Position of the next occurrence of `needle` at or after `(line, col)`.
    ///
    /// Matches never span lines. Pages are scanned in order without being
    /// admitted to the cache.
    pub fn find(&self, needle: &str, line: usize, col: usize) -> Result<Option<(usize, usize)>> {
        if needle.is_empty() {
            return Err(BufferError::Invalid("empty search pattern"));
        }
        self.read(|inner| {
            inner.check_line(line)?;
            let (first, _) = inner.pager.locate(line);
            for no in first.0..inner.pager.page_count() {
                let base = inner.pager.page_range(PageNo(no)).start;
                let hit = inner.pager.with_page_lines(PageNo(no), |lines| {
                    for (slot, text) in lines.iter().enumerate() {
                        let at = base + slot;
                        if at < line {
                            continue;
                        }
                        let from = if at == line { byte_at(text, col) } else { 0 };
                        if let Some(pos) = text[from..].find(needle) {
                            return Ok(Some((at, char_len(&text[..from + pos]))));
                        }
                    }
                    Ok(None)
                })?;
                if hit.is_some() {
                    return Ok(hit);
                }
            }
            Ok(None)
        })
    }
}
