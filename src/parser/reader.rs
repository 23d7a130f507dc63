//! Boundary-aware line reading.
//!
//! [`LineSource`] wraps the caller's byte stream and lets the parser push a
//! line back. [`BoundaryReader`] knows the boundaries of every enclosing
//! multipart and splits the stream at them: a line matching the innermost
//! boundary ends the current part, a line matching an outer one is pushed
//! back so the level that owns it can see it.

use std::io::{self, BufRead, Read, Write};

use crate::error::{MimeError, Result};

/// A buffered byte source with line pushback.
pub struct LineSource<'a> {
    inner: Box<dyn BufRead + 'a>,
    pending: Vec<u8>,
    pos: usize,
}

impl<'a> LineSource<'a> {
    pub fn new(inner: impl BufRead + 'a) -> Self {
        Self {
            inner: Box::new(inner),
            pending: Vec::new(),
            pos: 0,
        }
    }

    /// Append the next line, `\n` included, to `buf`. Returns 0 at EOF.
    pub fn read_line_bytes(&mut self, buf: &mut Vec<u8>) -> Result<usize> {
        Ok(self.read_until(b'\n', buf)?)
    }

    /// Make `line` the next thing read.
    pub fn unread_line(&mut self, mut line: Vec<u8>) {
        line.extend_from_slice(&self.pending[self.pos..]);
        self.pending = line;
        self.pos = 0;
    }
}

impl Read for LineSource<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let avail = self.fill_buf()?;
        let n = avail.len().min(buf.len());
        buf[..n].copy_from_slice(&avail[..n]);
        self.consume(n);
        Ok(n)
    }
}

impl BufRead for LineSource<'_> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        if self.pos < self.pending.len() {
            return Ok(&self.pending[self.pos..]);
        }
        self.inner.fill_buf()
    }

    fn consume(&mut self, amt: usize) {
        if self.pos < self.pending.len() {
            self.pos += amt;
            if self.pos >= self.pending.len() {
                self.pending.clear();
                self.pos = 0;
            }
        } else {
            self.inner.consume(amt);
        }
    }
}

/// How a header block ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderEnd {
    /// The blank separator line (consumed).
    Blank,
    /// End of input.
    Eof,
    /// A boundary line (pushed back, not consumed).
    Boundary,
}

/// What stopped a boundary-bounded read, relative to the reader used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminator {
    /// `--boundary`: another part follows.
    Delim,
    /// `--boundary--`: the multipart is finished.
    Close,
    /// End of input.
    Eof,
    /// An enclosing multipart's boundary line. It has been pushed back.
    Outer,
}

/// The boundaries in effect at one nesting level, innermost last.
#[derive(Debug, Clone, Default)]
pub struct BoundaryReader {
    bounds: Vec<Vec<u8>>,
}

impl BoundaryReader {
    /// A reader with no boundaries: reads run to end of input.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reader for the parts of a multipart with `boundary`.
    pub fn child(&self, boundary: &str) -> Self {
        let mut bounds = self.bounds.clone();
        let mut delim = b"--".to_vec();
        delim.extend_from_slice(boundary.as_bytes());
        bounds.push(delim);
        Self { bounds }
    }

    pub fn has_declared_bounds(&self) -> bool {
        !self.bounds.is_empty()
    }

    /// Number of enclosing boundaries.
    pub fn depth(&self) -> usize {
        self.bounds.len()
    }

    /// Classify `line` as a boundary line, if it is one.
    fn classify(&self, line: &[u8]) -> Option<Terminator> {
        if !line.starts_with(b"--") {
            return None;
        }
        let (innermost, outer) = self.bounds.split_last()?;
        let text = trim_line_end(line);

        if text == &innermost[..] {
            return Some(Terminator::Delim);
        }
        if is_close(text, innermost) {
            return Some(Terminator::Close);
        }
        outer
            .iter()
            .any(|b| text == &b[..] || is_close(text, b))
            .then_some(Terminator::Outer)
    }

    /// Read header lines up to and including the blank separator line.
    /// The separator itself is not returned.
    pub fn read_header_lines(&self, src: &mut LineSource<'_>) -> Result<(Vec<Vec<u8>>, HeaderEnd)> {
        let mut lines = Vec::new();
        loop {
            let mut line = Vec::new();
            if src.read_line_bytes(&mut line)? == 0 {
                return Ok((lines, HeaderEnd::Eof));
            }
            if trim_eol(&line).is_empty() {
                return Ok((lines, HeaderEnd::Blank));
            }
            if self.classify(&line).is_some() {
                src.unread_line(line);
                return Ok((lines, HeaderEnd::Boundary));
            }
            lines.push(line);
        }
    }

    /// Copy data to `out` up to the next boundary line or end of input.
    ///
    /// The line ending just before a boundary belongs to the boundary and
    /// is not copied. Delimiter and close lines of the innermost boundary
    /// are consumed; outer boundary lines are pushed back.
    pub fn read_until_boundary(
        &self,
        src: &mut LineSource<'_>,
        out: &mut dyn Write,
    ) -> Result<Terminator> {
        let mut held: Vec<u8> = Vec::with_capacity(2);
        let mut line = Vec::new();
        loop {
            line.clear();
            if src.read_line_bytes(&mut line)? == 0 {
                out.write_all(&held)?;
                return Ok(Terminator::Eof);
            }
            if let Some(term) = self.classify(&line) {
                if term == Terminator::Outer {
                    src.unread_line(std::mem::take(&mut line));
                }
                return Ok(term);
            }
            out.write_all(&held)?;
            let content = trim_eol(&line);
            out.write_all(content)?;
            held.clear();
            held.extend_from_slice(&line[content.len()..]);
        }
    }

    /// Re-read a boundary line that a deeper reader pushed back and
    /// classify it at this level. Outer lines are pushed back again.
    pub fn resolve_outer(&self, src: &mut LineSource<'_>) -> Result<Terminator> {
        let mut line = Vec::new();
        if src.read_line_bytes(&mut line)? == 0 {
            return Ok(Terminator::Eof);
        }
        match self.classify(&line) {
            Some(Terminator::Outer) => {
                src.unread_line(line);
                Ok(Terminator::Outer)
            }
            Some(term) => Ok(term),
            None => {
                src.unread_line(line);
                Err(MimeError::Internal(
                    "pushed-back line is not a boundary at the enclosing level".to_string(),
                ))
            }
        }
    }
}

fn is_close(text: &[u8], delim: &[u8]) -> bool {
    text.len() == delim.len() + 2 && text.starts_with(delim) && text.ends_with(b"--")
}

/// Strip `\n` and `\r\n` line endings.
fn trim_eol(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Strip trailing blanks and line-ending bytes, as allowed after a
/// boundary (RFC 2046 §5.1.1).
fn trim_line_end(mut line: &[u8]) -> &[u8] {
    while let Some((&last, rest)) = line.split_last() {
        if !matches!(last, b' ' | b'\t' | b'\r' | b'\n') {
            break;
        }
        line = rest;
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(data: &[u8]) -> LineSource<'_> {
        LineSource::new(data)
    }

    fn read_all(src: &mut LineSource<'_>) -> Vec<u8> {
        let mut rest = Vec::new();
        src.read_to_end(&mut rest).unwrap();
        rest
    }

    #[test]
    fn test_unread_line_comes_back_first() {
        let mut src = source(b"one\ntwo\n");
        let mut line = Vec::new();
        src.read_line_bytes(&mut line).unwrap();
        assert_eq!(line, b"one\n");
        src.unread_line(line);
        src.unread_line(b"zero\n".to_vec());
        assert_eq!(read_all(&mut src), b"zero\none\ntwo\n");
    }

    #[test]
    fn test_header_lines_stop_at_blank() {
        let mut src = source(b"A: 1\r\nB: 2\r\n\r\nbody\r\n");
        let (lines, end) = BoundaryReader::new().read_header_lines(&mut src).unwrap();
        assert_eq!(end, HeaderEnd::Blank);
        assert_eq!(lines, vec![b"A: 1\r\n".to_vec(), b"B: 2\r\n".to_vec()]);
        assert_eq!(read_all(&mut src), b"body\r\n");
    }

    #[test]
    fn test_header_lines_eof_and_boundary() {
        let mut src = source(b"A: 1\n");
        let (_, end) = BoundaryReader::new().read_header_lines(&mut src).unwrap();
        assert_eq!(end, HeaderEnd::Eof);

        let rdr = BoundaryReader::new().child("XX");
        let mut src = source(b"A: 1\n--XX\nrest\n");
        let (lines, end) = rdr.read_header_lines(&mut src).unwrap();
        assert_eq!(end, HeaderEnd::Boundary);
        assert_eq!(lines.len(), 1);
        assert_eq!(read_all(&mut src), b"--XX\nrest\n");
    }

    #[test]
    fn test_read_until_boundary_withholds_line_end() {
        let rdr = BoundaryReader::new().child("XX");
        let mut src = source(b"line1\r\nline2\r\n--XX  \r\nnext\r\n--XX--\r\n");
        let mut out = Vec::new();
        assert_eq!(rdr.read_until_boundary(&mut src, &mut out).unwrap(), Terminator::Delim);
        assert_eq!(out, b"line1\r\nline2");

        out.clear();
        assert_eq!(rdr.read_until_boundary(&mut src, &mut out).unwrap(), Terminator::Close);
        assert_eq!(out, b"next");

        out.clear();
        assert_eq!(rdr.read_until_boundary(&mut src, &mut out).unwrap(), Terminator::Eof);
        assert!(out.is_empty());
    }

    #[test]
    fn test_unbounded_read_keeps_everything() {
        let mut src = source(b"a\n--XX\nb\n");
        let mut out = Vec::new();
        let term = BoundaryReader::new().read_until_boundary(&mut src, &mut out).unwrap();
        assert_eq!(term, Terminator::Eof);
        assert_eq!(out, b"a\n--XX\nb\n");
    }

    #[test]
    fn test_outer_boundary_is_pushed_back() {
        let outer = BoundaryReader::new().child("OUT");
        let inner = outer.child("IN");
        let mut src = source(b"data\n--OUT--\nepilogue\n");
        let mut out = Vec::new();
        assert_eq!(inner.read_until_boundary(&mut src, &mut out).unwrap(), Terminator::Outer);
        assert_eq!(out, b"data");

        assert_eq!(outer.resolve_outer(&mut src).unwrap(), Terminator::Close);
        assert_eq!(read_all(&mut src), b"epilogue\n");
    }

    #[test]
    fn test_boundary_prefix_is_not_a_match() {
        let rdr = BoundaryReader::new().child("XX");
        let mut src = source(b"--XXY\n--XX-\n--XX\n");
        let mut out = Vec::new();
        assert_eq!(rdr.read_until_boundary(&mut src, &mut out).unwrap(), Terminator::Delim);
        assert_eq!(out, b"--XXY\n--XX-");
    }
}
