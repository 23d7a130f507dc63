//! Post-decode hooks that may restructure a finished leaf.
//!
//! After a leaf's body is written, each installed [`RedoHook`] gets a look
//! at the decoded bytes. The first hook to return
//! [`RedoResult::Replace`] wins and the parser swaps the new entity into
//! the leaf's slot.

use std::io::{BufRead, Read, Write};

use tracing::debug;

use crate::codec::uu::UuCodec;
use crate::codec::CodecRegistry;
use crate::config::{RedoConfig, RedoHookKind};
use crate::error::Result;
use crate::model::entity::{make_boundary, split_lines};
use crate::model::{Entity, Header, MimeType};
use crate::store::Filer;

/// Outcome of one hook attempt.
#[derive(Debug)]
pub enum RedoResult {
    /// Leave the leaf alone.
    NoMatch,
    /// Replace the leaf with this entity.
    Replace(Box<Entity>),
}

/// Resources a hook may use to build a replacement.
pub struct RedoContext<'c> {
    pub filer: &'c mut dyn Filer,
    pub codecs: &'c CodecRegistry,
}

pub trait RedoHook {
    fn name(&self) -> &str;

    /// Inspect `entity`, whose decoded body is readable from `body`.
    /// Hooks must not modify `entity`; errors count as no match.
    fn try_redo(
        &self,
        body: &mut dyn BufRead,
        entity: &Entity,
        ctx: &mut RedoContext<'_>,
    ) -> Result<RedoResult>;
}

/// Instantiate a built-in hook.
pub fn hook_from_kind(kind: RedoHookKind, config: &RedoConfig) -> Box<dyn RedoHook> {
    match kind {
        RedoHookKind::UuSniff => Box::new(UuSniff::new(config.uu_horizon)),
    }
}

const UU_PREAMBLE: &[u8] = b"This message was rebuilt from uuencoded data found in a\n\
plain-text part. The text around the encoded blocks is kept as the\n\
first part; each block follows as its own attachment.\n";

/// Finds uuencoded blocks inside `text/plain` leaves and turns the leaf
/// into a `multipart/mixed` of the surrounding text and the decoded files.
#[derive(Debug, Clone)]
pub struct UuSniff {
    horizon: i64,
}

impl UuSniff {
    /// Look at the first `horizon` lines for a `begin` line; a negative
    /// horizon means the whole body.
    pub fn new(horizon: i64) -> Self {
        Self { horizon }
    }

    /// Read lines up to the horizon. Returns them and whether one of them
    /// opens a uuencoded block.
    fn scan(&self, body: &mut dyn BufRead) -> Result<(Vec<u8>, bool)> {
        let mut seen = Vec::new();
        let mut line = Vec::new();
        let mut count: i64 = 0;
        while self.horizon < 0 || count < self.horizon {
            line.clear();
            if body.read_until(b'\n', &mut line)? == 0 {
                break;
            }
            seen.extend_from_slice(&line);
            if looks_like_begin(&line) {
                return Ok((seen, true));
            }
            count += 1;
        }
        Ok((seen, false))
    }
}

impl RedoHook for UuSniff {
    fn name(&self) -> &str {
        "uu-sniff"
    }

    fn try_redo(
        &self,
        body: &mut dyn BufRead,
        entity: &Entity,
        ctx: &mut RedoContext<'_>,
    ) -> Result<RedoResult> {
        if entity.effective_type() != MimeType::text_plain() {
            return Ok(RedoResult::NoMatch);
        }
        if !matches!(
            entity.head().mime_encoding().as_str(),
            "7bit" | "8bit" | "binary"
        ) {
            return Ok(RedoResult::NoMatch);
        }

        if !ctx.codecs.supports("x-uuencode") {
            debug!("No x-uuencode codec registered, skipping uuencode sniff");
            return Ok(RedoResult::NoMatch);
        }

        let (seen, found) = self.scan(body)?;
        if !found {
            return Ok(RedoResult::NoMatch);
        }

        let codec = UuCodec::new("x-uuencode");
        let mut input = (&seen[..]).chain(body);
        let mut parts = Vec::new();
        let mut blocks = 0;

        loop {
            let mut data = Vec::new();
            let Some(section) = codec.decode_section(&mut input, &mut data)? else {
                break;
            };
            if blocks == 0 && parts.is_empty() && !section.preamble.is_empty() {
                parts.push(leaf(ctx, text_head(), &section.preamble)?);
            }
            debug!(
                filename = %section.filename,
                mode = %format!("{:o}", section.mode),
                bytes = data.len(),
                "Decoded uuencoded block"
            );
            parts.push(leaf(ctx, block_head(&section.filename, section.mode), &data)?);
            blocks += 1;
        }

        if blocks == 0 {
            return Ok(RedoResult::NoMatch);
        }

        let mut head = entity.head().clone();
        head.set(
            "Content-Type",
            format!("multipart/mixed; boundary=\"{}\"", make_boundary()),
        );
        head.set_mime_encoding("7bit");
        let mut replacement = Entity::new(head);
        replacement.set_preamble(split_lines(UU_PREAMBLE));
        replacement.set_parts(parts);
        Ok(RedoResult::Replace(Box::new(replacement)))
    }
}

/// `begin` followed by a blank and three octal digits.
fn looks_like_begin(line: &[u8]) -> bool {
    line.strip_prefix(b"begin ")
        .and_then(|rest| rest.get(..3))
        .is_some_and(|mode| mode.iter().all(|b| (b'0'..=b'7').contains(b)))
}

fn text_head() -> Header {
    let mut head = Header::new();
    head.add("Content-Type", "text/plain");
    head.add("Content-Transfer-Encoding", "7bit");
    head
}

fn block_head(filename: &str, mode: u32) -> Header {
    let mime_type = mime_type_for_filename(filename);
    let quoted = filename.replace('\\', "\\\\").replace('"', "\\\"");
    let mut head = Header::new();
    head.add("Content-Type", format!("{mime_type}; name=\"{quoted}\""));
    head.add(
        "Content-Disposition",
        format!("inline; filename=\"{quoted}\""),
    );
    head.add("Content-Transfer-Encoding", "base64");
    head.add("X-Unix-Mode", format!("{mode:04o}"));
    head
}

/// Guess a type from the extension of a uuencoded file name.
pub fn mime_type_for_filename(filename: &str) -> MimeType {
    let ext = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "gif" => MimeType::new("image", "gif"),
        "jpg" | "jpeg" => MimeType::new("image", "jpeg"),
        "xbm" => MimeType::new("image", "xbm"),
        "xpm" => MimeType::new("image", "xpm"),
        "png" => MimeType::new("image", "png"),
        _ => MimeType::octet_stream(),
    }
}

fn leaf(ctx: &mut RedoContext<'_>, head: Header, data: &[u8]) -> Result<Entity> {
    let mut body = ctx.filer.new_output_body(&head)?;
    {
        let mut out = body.open_write()?;
        out.write_all(data)?;
        out.flush()?;
    }
    let mut ent = Entity::new(head);
    ent.set_body(body);
    Ok(ent)
}
