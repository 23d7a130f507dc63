//! Uuencode (`x-uu`, `x-uuencode`).
//!
//! Besides the plain codec contract, [`UuCodec::decode_section`] walks a
//! text stream one `begin ... end` block at a time and reports the text
//! that preceded each block, which is what the uuencode sniffer needs.

use std::io::{BufRead, Write};

use super::{read_full, Codec};
use crate::error::{MimeError, Result};

/// Names served by [`UuCodec`].
pub const NAMES: [&str; 2] = ["x-uu", "x-uuencode"];

/// Raw bytes per encoded line.
const LINE_INPUT: usize = 45;

/// One decoded `begin ... end` block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UuSection {
    /// Text lines seen before the `begin` line, line endings included.
    pub preamble: Vec<u8>,
    /// File name from the `begin` line.
    pub filename: String,
    /// Unix permission bits from the `begin` line.
    pub mode: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct UuCodec {
    name: &'static str,
}

impl UuCodec {
    pub fn new(name: &'static str) -> Self {
        Self { name }
    }

    /// Decode the next block of `input` into `output`.
    ///
    /// Returns `None` once no further `begin` line exists; any text read
    /// while looking for one is dropped.
    pub fn decode_section(
        &self,
        input: &mut dyn BufRead,
        output: &mut dyn Write,
    ) -> Result<Option<UuSection>> {
        let mut preamble = Vec::new();
        let mut line = Vec::new();

        let (mode, filename) = loop {
            line.clear();
            if input.read_until(b'\n', &mut line)? == 0 {
                return Ok(None);
            }
            if let Some(begin) = parse_begin_line(&line) {
                break begin;
            }
            preamble.extend_from_slice(&line);
        };

        let mut decoded = Vec::with_capacity(LINE_INPUT);
        loop {
            line.clear();
            if input.read_until(b'\n', &mut line)? == 0 {
                break;
            }
            let text = trim_eol(&line);
            if text == b"end" {
                break;
            }
            decoded.clear();
            decode_line(text, &mut decoded);
            output.write_all(&decoded)?;
        }

        Ok(Some(UuSection {
            preamble,
            filename,
            mode,
        }))
    }
}

impl Codec for UuCodec {
    fn name(&self) -> &str {
        self.name
    }

    /// Decode the first block; text around it is ignored.
    fn decode(&self, input: &mut dyn BufRead, output: &mut dyn Write) -> Result<()> {
        match self.decode_section(input, output)? {
            Some(_) => Ok(()),
            None => Err(MimeError::decode(self.name, "no 'begin' line found")),
        }
    }

    fn encode(&self, input: &mut dyn BufRead, output: &mut dyn Write) -> Result<()> {
        output.write_all(b"begin 644 uuencode.out\n")?;
        let mut buf = [0u8; LINE_INPUT];
        loop {
            let n = read_full(input, &mut buf)?;
            if n == 0 {
                break;
            }
            let mut encoded = Vec::with_capacity(62);
            encoded.push(enc_char(n as u8));
            for group in buf[..n].chunks(3) {
                let b0 = group[0];
                let b1 = group.get(1).copied().unwrap_or(0);
                let b2 = group.get(2).copied().unwrap_or(0);
                encoded.push(enc_char(b0 >> 2));
                encoded.push(enc_char(((b0 << 4) | (b1 >> 4)) & 0x3f));
                encoded.push(enc_char(((b1 << 2) | (b2 >> 6)) & 0x3f));
                encoded.push(enc_char(b2 & 0x3f));
            }
            encoded.push(b'\n');
            output.write_all(&encoded)?;
            if n < LINE_INPUT {
                break;
            }
        }
        output.write_all(b"`\nend\n")?;
        Ok(())
    }
}

/// `begin <octal mode> <name>`; the mode must have at least three digits.
pub fn parse_begin_line(line: &[u8]) -> Option<(u32, String)> {
    let rest = trim_eol(line).strip_prefix(b"begin ")?;
    let rest = String::from_utf8_lossy(rest);
    let (mode, name) = rest.trim_start().split_once([' ', '\t'])?;
    if mode.len() < 3 || !mode.bytes().all(|b| (b'0'..=b'7').contains(&b)) {
        return None;
    }
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    let mode = u32::from_str_radix(mode, 8).ok()?;
    Some((mode, name.to_string()))
}

fn trim_eol(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn dec_char(c: u8) -> u8 {
    c.wrapping_sub(b' ') & 0x3f
}

fn enc_char(v: u8) -> u8 {
    if v == 0 {
        b'`'
    } else {
        v + b' '
    }
}

/// Decode one body line. Short lines are padded as if trailing blanks
/// had been stripped in transit.
fn decode_line(text: &[u8], out: &mut Vec<u8>) {
    let Some((&len_char, data)) = text.split_first() else {
        return;
    };
    let want = dec_char(len_char) as usize;
    let mut bytes = Vec::with_capacity(want + 2);

    for group in data.chunks(4) {
        if bytes.len() >= want {
            break;
        }
        let c = |i: usize| dec_char(group.get(i).copied().unwrap_or(b' '));
        bytes.push((c(0) << 2) | (c(1) >> 4));
        bytes.push((c(1) << 4) | (c(2) >> 2));
        bytes.push((c(2) << 6) | c(3));
    }
    bytes.resize(want, 0);
    out.extend_from_slice(&bytes);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_hi() {
        let mut out = Vec::new();
        UuCodec::new("x-uu")
            .decode(&mut &b"begin 644 a.txt\n\":&D`\n`\nend\n"[..], &mut out)
            .unwrap();
        assert_eq!(out, b"hi");
    }

    #[test]
    fn test_decode_without_begin_fails() {
        let mut out = Vec::new();
        let err = UuCodec::new("x-uuencode")
            .decode(&mut &b"just text\n"[..], &mut out)
            .unwrap_err();
        assert!(err.to_string().contains("x-uuencode"));
    }

    #[test]
    fn test_sections_report_preamble_name_and_mode() {
        let input = b"hello\nbegin 644 a.txt\n\":&D`\n`\nend\nbetween\nbegin 600 b.bin\n!80``\n`\nend\n";
        let codec = UuCodec::new("x-uuencode");
        let mut src = &input[..];

        let mut first = Vec::new();
        let s1 = codec.decode_section(&mut src, &mut first).unwrap().unwrap();
        assert_eq!(s1.preamble, b"hello\n");
        assert_eq!(s1.filename, "a.txt");
        assert_eq!(s1.mode, 0o644);
        assert_eq!(first, b"hi");

        let mut second = Vec::new();
        let s2 = codec.decode_section(&mut src, &mut second).unwrap().unwrap();
        assert_eq!(s2.preamble, b"between\n");
        assert_eq!(s2.filename, "b.bin");
        assert_eq!(s2.mode, 0o600);
        assert_eq!(second, b"a");

        let mut rest = Vec::new();
        assert!(codec.decode_section(&mut src, &mut rest).unwrap().is_none());
    }

    #[test]
    fn test_parse_begin_line() {
        assert_eq!(
            parse_begin_line(b"begin 644 my file.gif\r\n"),
            Some((0o644, "my file.gif".to_string()))
        );
        assert_eq!(parse_begin_line(b"begin 64 x"), None);
        assert_eq!(parse_begin_line(b"begin 648 x"), None);
        assert_eq!(parse_begin_line(b"beginning of the story"), None);
        assert_eq!(parse_begin_line(b"begin 644"), None);
    }

    #[test]
    fn test_encode_then_decode() {
        let data: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        let codec = UuCodec::new("x-uu");
        let mut encoded = Vec::new();
        codec.encode(&mut &data[..], &mut encoded).unwrap();
        assert!(encoded.starts_with(b"begin 644 "));
        assert!(encoded.ends_with(b"`\nend\n"));

        let mut decoded = Vec::new();
        codec.decode(&mut &encoded[..], &mut decoded).unwrap();
        assert_eq!(decoded, data);
    }
}
