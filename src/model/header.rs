//! Message and part headers: lenient extraction, unfolding, encoded-words
//! (RFC 2047), and the handful of MIME values the parser needs.

use std::fmt;
use std::io::{self, Write};

use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use tracing::warn;

use super::mime_type::{FieldParams, MimeType};

/// One header field, name as written and value unfolded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub value: String,
}

/// Ordered list of header fields. Lookups are case-insensitive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Header {
    fields: Vec<Field>,
}

/// Outcome of [`Header::extract`].
#[derive(Debug, Default)]
pub struct Extracted {
    pub header: Header,
    /// Lines that were neither a field nor a continuation.
    pub leftover: Vec<String>,
}

impl Header {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a header from raw lines (line endings included or not).
    ///
    /// Continuation lines are joined to the previous field by dropping the
    /// line break only. With `decode` set, encoded-words in values are
    /// decoded as they are stored.
    pub fn extract(lines: &[Vec<u8>], decode: bool) -> Extracted {
        let mut out = Extracted::default();

        for raw in lines {
            let line = decode_header_bytes(raw);
            let line = line.trim_end_matches(['\r', '\n']);

            if line.starts_with(' ') || line.starts_with('\t') {
                match out.header.fields.last_mut() {
                    Some(last) => last.value.push_str(line),
                    None => out.leftover.push(line.to_string()),
                }
                continue;
            }

            match line.split_once(':') {
                Some((name, value)) if is_field_name(name) => {
                    out.header.fields.push(Field {
                        name: name.to_string(),
                        value: value.trim_start_matches([' ', '\t']).to_string(),
                    });
                }
                _ => out.leftover.push(line.to_string()),
            }
        }

        for field in &mut out.header.fields {
            let trimmed = field.value.trim_end_matches([' ', '\t']);
            field.value = if decode {
                decode_encoded_words(trimmed)
            } else {
                trimmed.to_string()
            };
        }
        out
    }

    /// Gets the first value for a field.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.name.eq_ignore_ascii_case(name))
            .map(|f| f.value.as_str())
    }

    /// Gets all values for a field, in order.
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|f| f.name.eq_ignore_ascii_case(name))
            .map(|f| f.value.as_str())
            .collect()
    }

    /// Appends a field.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.push(Field {
            name: name.into(),
            value: value.into(),
        });
    }

    /// Sets a field, replacing the first occurrence in place and dropping
    /// any others.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self
            .fields
            .iter()
            .position(|f| f.name.eq_ignore_ascii_case(name))
        {
            Some(pos) => {
                self.fields[pos].value = value;
                let mut idx = 0;
                self.fields.retain(|f| {
                    let keep = idx <= pos || !f.name.eq_ignore_ascii_case(name);
                    idx += 1;
                    keep
                });
            }
            None => self.add(name, value),
        }
    }

    /// Removes all values for a field.
    pub fn remove(&mut self, name: &str) {
        self.fields.retain(|f| !f.name.eq_ignore_ascii_case(name));
    }

    pub fn iter(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Parsed `Content-Type`, if the field is present.
    pub fn content_type(&self) -> Option<FieldParams> {
        self.get("content-type").map(FieldParams::parse)
    }

    /// Declared MIME type; `text/plain` when absent or unparseable.
    pub fn mime_type(&self) -> MimeType {
        self.content_type()
            .and_then(|ct| MimeType::parse(&ct.value))
            .unwrap_or_else(MimeType::text_plain)
    }

    /// Declared transfer encoding, lowercased; `7bit` when absent.
    pub fn mime_encoding(&self) -> String {
        self.get("content-transfer-encoding")
            .map(|v| {
                v.split(['(', ';'])
                    .next()
                    .unwrap_or_default()
                    .trim()
                    .to_ascii_lowercase()
            })
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| "7bit".to_string())
    }

    /// The `boundary` parameter of `Content-Type`, verbatim.
    pub fn multipart_boundary(&self) -> Option<String> {
        self.content_type()?.get("boundary").map(str::to_string)
    }

    /// Attribute access in the `field.param` form, e.g.
    /// `content-type.charset`. A bare field name returns the value before
    /// the first `;`.
    pub fn mime_attr(&self, spec: &str) -> Option<String> {
        let (field, param) = match spec.split_once('.') {
            Some((field, param)) => (field, Some(param)),
            None => (spec, None),
        };
        let parsed = FieldParams::parse(self.get(field)?);
        match param {
            Some(param) => parsed.get(param).map(str::to_string),
            None => Some(parsed.value),
        }
    }

    /// Filename suggested by the sender: `Content-Disposition` `filename`,
    /// then `Content-Type` `name`.
    pub fn recommended_filename(&self) -> Option<String> {
        self.mime_attr("content-disposition.filename")
            .or_else(|| self.mime_attr("content-type.name"))
            .map(|name| decode_encoded_words(&name))
            .filter(|name| !name.trim().is_empty())
    }

    /// Replace the `type/subtype` of `Content-Type`, keeping its parameters.
    pub fn set_mime_type(&mut self, mime_type: &MimeType) {
        let value = match self.get("content-type") {
            Some(existing) => match existing.split_once(';') {
                Some((_, params)) => format!("{mime_type};{params}"),
                None => mime_type.to_string(),
            },
            None => mime_type.to_string(),
        };
        self.set("Content-Type", value);
    }

    /// Replace the declared transfer encoding.
    pub fn set_mime_encoding(&mut self, encoding: &str) {
        self.set("Content-Transfer-Encoding", encoding);
    }

    /// Write the fields followed by the blank separator line.
    pub fn write_to(&self, out: &mut dyn Write) -> io::Result<()> {
        write!(out, "{self}")?;
        out.write_all(b"\n")
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for field in &self.fields {
            writeln!(f, "{}: {}", field.name, field.value)?;
        }
        Ok(())
    }
}

/// Field names are printable ASCII without spaces or colons (RFC 5322).
fn is_field_name(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| (33..=126).contains(&b) && b != b':')
}

/// Decode raw header bytes to a string.
///
/// Tries UTF-8 first, then falls back to Windows-1252 (which accepts every byte).
pub fn decode_header_bytes(bytes: &[u8]) -> String {
    // Strip BOM if present
    let bytes = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes);

    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => {
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
            decoded.into_owned()
        }
    }
}

/// Decode RFC 2047 encoded-words in a header value.
///
/// Example: `"=?UTF-8?B?SG9sYQ==?= =?UTF-8?B?IG11bmRv?="` → `"Hola mundo"`
///
/// If decoding fails for any token, the original text is preserved.
pub fn decode_encoded_words(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut remaining = input;
    let mut last_was_encoded = false;

    while let Some(start) = remaining.find("=?") {
        let before = &remaining[..start];
        // Whitespace between two encoded words is dropped (RFC 2047 §6.2)
        if !last_was_encoded || !before.trim().is_empty() {
            result.push_str(before);
        }

        let after_start = &remaining[start + 2..];

        if let Some(decoded) = try_decode_one_word(after_start) {
            result.push_str(&decoded.text);
            remaining = &remaining[start + 2 + decoded.consumed..];
            last_was_encoded = true;
        } else {
            result.push_str("=?");
            remaining = after_start;
            last_was_encoded = false;
        }
    }

    result.push_str(remaining);
    result
}

struct DecodedWord {
    text: String,
    consumed: usize, // bytes consumed from the string *after* the initial "=?"
}

fn try_decode_one_word(s: &str) -> Option<DecodedWord> {
    // Format: charset?encoding?encoded_text?=
    let first_q = s.find('?')?;
    let charset = &s[..first_q];

    let rest = &s[first_q + 1..];
    let second_q = rest.find('?')?;
    let encoding = &rest[..second_q];

    let rest2 = &rest[second_q + 1..];
    let end = rest2.find("?=")?;
    let encoded_text = &rest2[..end];

    let total_consumed = first_q + 1 + second_q + 1 + end + 2;

    let bytes = match encoding.to_ascii_uppercase().as_str() {
        "B" => STANDARD_NO_PAD
            .decode(encoded_text.trim_end_matches('='))
            .ok()?,
        "Q" => decode_q_encoding(encoded_text),
        _ => return None,
    };

    // RFC 2231 language suffix: charset*lang
    let charset = charset.split('*').next().unwrap_or(charset);

    Some(DecodedWord {
        text: decode_charset(charset, &bytes),
        consumed: total_consumed,
    })
}

/// Decode Q-encoding (RFC 2047): underscores → spaces, `=XX` → byte.
fn decode_q_encoding(input: &str) -> Vec<u8> {
    let mut result = Vec::with_capacity(input.len());
    let bytes = input.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'_' => {
                result.push(b' ');
                i += 1;
            }
            b'=' if i + 2 < bytes.len() => match hex_pair(bytes[i + 1], bytes[i + 2]) {
                Some(byte) => {
                    result.push(byte);
                    i += 3;
                }
                None => {
                    result.push(b'=');
                    i += 1;
                }
            },
            b => {
                result.push(b);
                i += 1;
            }
        }
    }
    result
}

fn hex_pair(hi: u8, lo: u8) -> Option<u8> {
    let hi = (hi as char).to_digit(16)?;
    let lo = (lo as char).to_digit(16)?;
    u8::try_from(hi * 16 + lo).ok()
}

/// Decode bytes using a named charset.
fn decode_charset(charset: &str, bytes: &[u8]) -> String {
    match charset.to_ascii_lowercase().as_str() {
        "utf-8" | "utf8" => String::from_utf8_lossy(bytes).into_owned(),
        _ => {
            if let Some(encoding) = encoding_rs::Encoding::for_label(charset.as_bytes()) {
                let (decoded, _, _) = encoding.decode(bytes);
                decoded.into_owned()
            } else {
                warn!(charset, "Unknown charset, falling back to UTF-8 lossy");
                String::from_utf8_lossy(bytes).into_owned()
            }
        }
    }
}
