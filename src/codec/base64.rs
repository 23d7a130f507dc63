//! `base64` transfer encoding (RFC 2045 §6.8).
//!
//! Decoding is lenient: characters outside the alphabet (line breaks,
//! stray punctuation) are skipped, and `=` only closes the current quantum,
//! so independently padded chunks glued together still decode.

use std::io::{BufRead, Write};

use ::base64::alphabet;
use ::base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD};
use ::base64::engine::DecodePaddingMode;
use ::base64::Engine;

use super::{read_full, Codec};
use crate::error::{MimeError, Result};

/// Raw bytes per encoded output line (76 characters).
const LINE_INPUT: usize = 57;

/// Flush decoded output once this many alphabet characters are pending.
const DECODE_CHUNK: usize = 4096;

const LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

#[derive(Debug, Clone, Copy, Default)]
pub struct Base64Codec;

impl Codec for Base64Codec {
    fn name(&self) -> &str {
        "base64"
    }

    fn decode(&self, input: &mut dyn BufRead, output: &mut dyn Write) -> Result<()> {
        let mut pending: Vec<u8> = Vec::with_capacity(DECODE_CHUNK + 80);
        let mut line = Vec::new();

        loop {
            line.clear();
            if input.read_until(b'\n', &mut line)? == 0 {
                break;
            }
            for &b in &line {
                if is_alphabet(b) {
                    pending.push(b);
                } else if b == b'=' && pending.len() % 4 != 0 {
                    // Padding closes the current quantum
                    flush(&mut pending, output)?;
                }
            }

            if pending.len() >= DECODE_CHUNK {
                let whole = pending.len() - pending.len() % 4;
                let decoded = LENIENT
                    .decode(&pending[..whole])
                    .map_err(|e| MimeError::decode("base64", e.to_string()))?;
                output.write_all(&decoded)?;
                pending.drain(..whole);
            }
        }
        flush(&mut pending, output)
    }

    fn encode(&self, input: &mut dyn BufRead, output: &mut dyn Write) -> Result<()> {
        let mut buf = [0u8; LINE_INPUT * 64];
        loop {
            let n = read_full(input, &mut buf)?;
            for chunk in buf[..n].chunks(LINE_INPUT) {
                output.write_all(STANDARD.encode(chunk).as_bytes())?;
                output.write_all(b"\n")?;
            }
            if n < buf.len() {
                break;
            }
        }
        Ok(())
    }
}

/// Decode everything pending. A single dangling character cannot carry a
/// byte and is dropped.
fn flush(pending: &mut Vec<u8>, output: &mut dyn Write) -> Result<()> {
    if pending.len() % 4 == 1 {
        pending.pop();
    }
    if !pending.is_empty() {
        let decoded = LENIENT
            .decode(&pending[..])
            .map_err(|e| MimeError::decode("base64", e.to_string()))?;
        output.write_all(&decoded)?;
        pending.clear();
    }
    Ok(())
}

fn is_alphabet(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'+' || b == b'/'
}
