//! MIME types, `Content-Type` parameters, and part classification.

use std::fmt;

/// A validated `type/subtype` pair, always lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize)]
pub struct MimeType {
    typ: String,
    subtype: String,
}

impl MimeType {
    /// Build a MIME type from its two halves.
    pub fn new(typ: &str, subtype: &str) -> Self {
        Self {
            typ: typ.trim().to_ascii_lowercase(),
            subtype: subtype.trim().to_ascii_lowercase(),
        }
    }

    /// Parse `type/subtype`. Returns `None` when either half is missing or
    /// contains characters that cannot appear in a MIME token.
    pub fn parse(s: &str) -> Option<Self> {
        let (typ, subtype) = s.trim().split_once('/')?;
        let (typ, subtype) = (typ.trim(), subtype.trim());
        if !is_token(typ) || !is_token(subtype) {
            return None;
        }
        Some(Self::new(typ, subtype))
    }

    pub fn text_plain() -> Self {
        Self::new("text", "plain")
    }

    pub fn octet_stream() -> Self {
        Self::new("application", "octet-stream")
    }

    pub fn message_rfc822() -> Self {
        Self::new("message", "rfc822")
    }

    /// Pseudo-type given to multiparts whose boundary is unusable.
    pub fn unparseable_multipart() -> Self {
        Self::new("application", "x-unparseable-multipart")
    }

    /// Primary type (`text`, `multipart`, ...).
    pub fn typ(&self) -> &str {
        &self.typ
    }

    pub fn subtype(&self) -> &str {
        &self.subtype
    }

    pub fn is_multipart(&self) -> bool {
        self.typ == "multipart"
    }

    /// Whether this is one of the types that wrap a complete message.
    pub fn is_nested_message(&self) -> bool {
        matches!(
            (self.typ.as_str(), self.subtype.as_str()),
            ("message", "rfc822") | ("application", "x-pkcs7-mime")
        )
    }
}

impl fmt::Display for MimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.typ, self.subtype)
    }
}

/// RFC 2045 token: printable ASCII minus space and tspecials.
fn is_token(s: &str) -> bool {
    !s.is_empty()
        && s.bytes()
            .all(|b| b.is_ascii_graphic() && !b"()<>@,;:\\\"/[]?=".contains(&b))
}

/// How the engine treats a part's body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Boundary-delimited children.
    Multipart,
    /// A complete message wrapped in a body.
    Message,
    /// A leaf payload.
    Singlepart,
}

impl Classification {
    /// Decide how to parse a body of type `mime_type`.
    ///
    /// `extract_nested` is false when nested-message extraction is off, in
    /// which case message bodies are plain leaves.
    pub fn of(mime_type: &MimeType, extract_nested: bool) -> Self {
        if mime_type.is_multipart() {
            Self::Multipart
        } else if extract_nested && mime_type.is_nested_message() {
            Self::Message
        } else {
            Self::Singlepart
        }
    }
}

/// A parsed structured field value such as `Content-Type` or
/// `Content-Disposition`: a leading value plus `key=value` parameters.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FieldParams {
    /// The part before the first `;`, trimmed.
    pub value: String,
    /// Parameters in the order they appear, keys lowercased.
    pub params: Vec<(String, String)>,
}

impl FieldParams {
    /// Parse `value; key=val; key2="quoted; val"`.
    ///
    /// Quoted strings may contain `;` and backslash escapes. Parameters
    /// without `=` are ignored.
    pub fn parse(s: &str) -> Self {
        let mut segments = split_params(s).into_iter();
        let value = segments.next().unwrap_or_default().trim().to_string();

        let params = segments
            .filter_map(|seg| {
                let (key, val) = seg.split_once('=')?;
                let key = key.trim().to_ascii_lowercase();
                if key.is_empty() {
                    return None;
                }
                Some((key, unquote(val.trim_start_matches([' ', '\t']))))
            })
            .collect();

        Self { value, params }
    }

    /// Look up a parameter (case-insensitive key).
    pub fn get(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }
}

/// Split on `;` outside quoted strings.
fn split_params(s: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            current.push(ch);
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_quotes => {
                current.push(ch);
                escaped = true;
            }
            '"' => {
                current.push(ch);
                in_quotes = !in_quotes;
            }
            ';' if !in_quotes => out.push(std::mem::take(&mut current)),
            _ => current.push(ch),
        }
    }
    out.push(current);
    out
}

/// Strip surrounding quotes and resolve backslash escapes. Unquoted values
/// lose only trailing blanks, so a stray CR inside a value survives.
fn unquote(s: &str) -> String {
    let Some(inner) = s.strip_prefix('"') else {
        return s.trim_end_matches([' ', '\t']).to_string();
    };
    let inner = inner.trim_end_matches([' ', '\t']);
    let inner = inner.strip_suffix('"').unwrap_or(inner);

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(ch);
        }
    }
    out
}
