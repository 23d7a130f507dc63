//! `quoted-printable` transfer encoding (RFC 2045 §6.7).

use std::io::{BufRead, Write};

use super::Codec;
use crate::error::Result;

/// Maximum encoded line length, soft-break `=` included.
const MAX_LINE_LENGTH: usize = 76;

#[derive(Debug, Clone, Copy, Default)]
pub struct QuotedPrintableCodec;

impl Codec for QuotedPrintableCodec {
    fn name(&self) -> &str {
        "quoted-printable"
    }

    /// Hard line breaks come out as `\n`. Trailing blanks on an encoded
    /// line are transport padding and are dropped. Invalid escapes pass
    /// through untransformed.
    fn decode(&self, input: &mut dyn BufRead, output: &mut dyn Write) -> Result<()> {
        let mut line = Vec::new();
        let mut decoded = Vec::new();

        loop {
            line.clear();
            if input.read_until(b'\n', &mut line)? == 0 {
                break;
            }
            let (content, hard_break) = match line.strip_suffix(b"\n") {
                Some(rest) => (rest.strip_suffix(b"\r").unwrap_or(rest), true),
                None => (&line[..], false),
            };
            let content = trim_trailing_blanks(content);

            decoded.clear();
            match content.strip_suffix(b"=") {
                Some(soft) => qp_decode_into(soft, &mut decoded),
                None => {
                    qp_decode_into(content, &mut decoded);
                    if hard_break {
                        decoded.push(b'\n');
                    }
                }
            }
            output.write_all(&decoded)?;
        }
        Ok(())
    }

    /// Only `\n` is treated as a hard line break; every other control byte,
    /// `=`, and blanks at the end of a line are escaped.
    fn encode(&self, input: &mut dyn BufRead, output: &mut dyn Write) -> Result<()> {
        let mut line = Vec::new();
        let mut encoded = Vec::new();

        loop {
            line.clear();
            if input.read_until(b'\n', &mut line)? == 0 {
                break;
            }
            let (content, hard_break) = match line.strip_suffix(b"\n") {
                Some(rest) => (rest, true),
                None => (&line[..], false),
            };

            encoded.clear();
            let mut line_length = 0;
            for (i, &byte) in content.iter().enumerate() {
                let last = i + 1 == content.len();
                let literal = match byte {
                    b'!'..=b'<' | b'>'..=b'~' => true,
                    b' ' | b'\t' => !last,
                    _ => false,
                };
                let width = if literal { 1 } else { 3 };

                // Check if we need soft line break
                if line_length + width > MAX_LINE_LENGTH - 1 {
                    encoded.extend_from_slice(b"=\n");
                    line_length = 0;
                }

                if literal {
                    encoded.push(byte);
                } else {
                    encoded.extend_from_slice(format!("={byte:02X}").as_bytes());
                }
                line_length += width;
            }
            if hard_break {
                encoded.push(b'\n');
            }
            output.write_all(&encoded)?;
        }
        Ok(())
    }
}

fn trim_trailing_blanks(mut s: &[u8]) -> &[u8] {
    while let Some((&last, rest)) = s.split_last() {
        if last != b' ' && last != b'\t' {
            break;
        }
        s = rest;
    }
    s
}

/// Decode `=XX` escapes in one line without its line break.
fn qp_decode_into(s: &[u8], out: &mut Vec<u8>) {
    let mut i = 0;
    while i < s.len() {
        if s[i] == b'=' {
            if let Some(byte) = s.get(i + 1..i + 3).and_then(hex_byte) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(s[i]);
        i += 1;
    }
}

fn hex_byte(pair: &[u8]) -> Option<u8> {
    let hi = (pair[0] as char).to_digit(16)?;
    let lo = (pair[1] as char).to_digit(16)?;
    u8::try_from(hi * 16 + lo).ok()
}
