//! The parsed entity tree.
//!
//! An [`Entity`] is either a leaf with a decoded [`Body`] or a container
//! with child parts (a multipart, or a wrapper around one nested message).
//! Deferred parser work refers to entities by [`EntityPath`], the list of
//! child indices leading from the root.

use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use super::body::Body;
use super::header::Header;
use super::mime_type::MimeType;
use crate::codec::CodecRegistry;
use crate::error::Result;

/// Child indices from the root to an entity. The root is `[]`.
pub type EntityPath = Vec<usize>;

/// One node of the parsed message tree.
#[derive(Debug, Clone, Default)]
pub struct Entity {
    head: Header,
    body: Option<Body>,
    parts: Vec<Entity>,
    preamble: Vec<Vec<u8>>,
    epilogue: Vec<Vec<u8>>,
    effective_type: Option<MimeType>,
}

impl Entity {
    pub fn new(head: Header) -> Self {
        Self {
            head,
            ..Self::default()
        }
    }

    pub fn head(&self) -> &Header {
        &self.head
    }

    pub fn head_mut(&mut self) -> &mut Header {
        &mut self.head
    }

    pub fn body(&self) -> Option<&Body> {
        self.body.as_ref()
    }

    pub fn body_mut(&mut self) -> Option<&mut Body> {
        self.body.as_mut()
    }

    pub fn set_body(&mut self, body: Body) {
        self.body = Some(body);
    }

    /// Detach the body, leaving the entity without one.
    pub fn take_body(&mut self) -> Option<Body> {
        self.body.take()
    }

    pub fn parts(&self) -> &[Entity] {
        &self.parts
    }

    pub fn parts_mut(&mut self) -> &mut Vec<Entity> {
        &mut self.parts
    }

    pub fn part(&self, index: usize) -> Option<&Entity> {
        self.parts.get(index)
    }

    pub fn num_parts(&self) -> usize {
        self.parts.len()
    }

    pub fn add_part(&mut self, part: Entity) {
        self.parts.push(part);
    }

    pub fn set_parts(&mut self, parts: Vec<Entity>) {
        self.parts = parts;
    }

    /// Whether this entity holds children rather than a body.
    pub fn is_container(&self) -> bool {
        !self.parts.is_empty()
    }

    /// Raw preamble lines, line endings included.
    pub fn preamble(&self) -> &[Vec<u8>] {
        &self.preamble
    }

    pub fn set_preamble(&mut self, lines: Vec<Vec<u8>>) {
        self.preamble = lines;
    }

    /// Raw epilogue lines, line endings included.
    pub fn epilogue(&self) -> &[Vec<u8>] {
        &self.epilogue
    }

    pub fn set_epilogue(&mut self, lines: Vec<Vec<u8>>) {
        self.epilogue = lines;
    }

    /// The type the parser actually treated this entity as. Equal to the
    /// declared type unless recovery forced another interpretation.
    pub fn effective_type(&self) -> MimeType {
        self.effective_type
            .clone()
            .unwrap_or_else(|| self.head.mime_type())
    }

    pub fn set_effective_type(&mut self, mime_type: MimeType) {
        self.effective_type = Some(mime_type);
    }

    /// Entity at `path` below this one.
    pub fn descendant(&self, path: &[usize]) -> Option<&Entity> {
        path.iter().try_fold(self, |ent, &idx| ent.parts.get(idx))
    }

    pub fn descendant_mut(&mut self, path: &[usize]) -> Option<&mut Entity> {
        path.iter()
            .try_fold(self, |ent, &idx| ent.parts.get_mut(idx))
    }

    /// All leaf entities, depth first.
    pub fn leaves(&self) -> Vec<&Entity> {
        if self.parts.is_empty() {
            return vec![self];
        }
        self.parts.iter().flat_map(Entity::leaves).collect()
    }

    /// Delete on-disk bodies throughout the tree.
    pub fn purge(&mut self) -> Result<()> {
        if let Some(body) = self.body.as_mut() {
            body.purge()?;
        }
        self.parts.iter_mut().try_for_each(Entity::purge)
    }

    /// Write an indented outline of the tree, one block per entity.
    pub fn dump_skeleton(&self, out: &mut dyn Write) -> std::io::Result<()> {
        self.dump_at(out, 0)
    }

    fn dump_at(&self, out: &mut dyn Write, level: usize) -> std::io::Result<()> {
        let ind = "    ".repeat(level);
        writeln!(out, "{ind}Content-type: {}", self.head.mime_type())?;
        writeln!(out, "{ind}Effective-type: {}", self.effective_type())?;
        match &self.body {
            None => writeln!(out, "{ind}Body-file: NONE")?,
            Some(Body::OnDisk(path)) => writeln!(out, "{ind}Body-file: {}", path.display())?,
            Some(Body::InCore(data)) => {
                writeln!(out, "{ind}Body-file: IN-CORE ({} bytes)", data.len())?
            }
        }
        if let Some(name) = self.head.recommended_filename() {
            writeln!(out, "{ind}Recommended-filename: {name}")?;
        }
        if let Some(subject) = self.head.get("subject") {
            writeln!(out, "{ind}Subject: {subject}")?;
        }
        if !self.parts.is_empty() {
            writeln!(out, "{ind}Num-parts: {}", self.parts.len())?;
            writeln!(out, "{ind}--")?;
            for part in &self.parts {
                part.dump_at(out, level + 1)?;
            }
        }
        Ok(())
    }

    /// Serialize the entity back to MIME, re-encoding leaf bodies with
    /// their declared transfer encoding.
    pub fn print(&self, out: &mut dyn Write, codecs: &CodecRegistry) -> Result<()> {
        let mime_type = self.head.mime_type();

        if mime_type.is_multipart() && self.body.is_none() {
            let mut head = self.head.clone();
            let boundary = match head.multipart_boundary() {
                Some(b) if !b.contains(['\r', '\n']) => b,
                _ => {
                    let b = make_boundary();
                    head.set("Content-Type", format!("{mime_type}; boundary=\"{b}\""));
                    b
                }
            };
            head.write_to(out)?;
            if !self.preamble.is_empty() {
                self.preamble.iter().try_for_each(|l| out.write_all(l))?;
                out.write_all(b"\n")?;
            }
            for part in &self.parts {
                writeln!(out, "--{boundary}")?;
                part.print(out, codecs)?;
                out.write_all(b"\n")?;
            }
            writeln!(out, "--{boundary}--")?;
            self.epilogue.iter().try_for_each(|l| out.write_all(l))?;
            return Ok(());
        }

        self.head.write_to(out)?;
        if let Some(inner) = self.parts.first() {
            return inner.print(out, codecs);
        }
        if let Some(body) = &self.body {
            let encoding = self.head.mime_encoding();
            let codec = codecs.best(&encoding)?;
            let mut input = body.open_read()?;
            codec.encode(&mut input, out)?;
        }
        Ok(())
    }

    /// Serializable outline of the tree, for JSON output.
    pub fn summary(&self) -> EntitySummary {
        EntitySummary {
            content_type: self.head.mime_type().to_string(),
            effective_type: self.effective_type().to_string(),
            encoding: self.head.mime_encoding(),
            filename: self.head.recommended_filename(),
            subject: self.head.get("subject").map(str::to_string),
            body_size: self.body.as_ref().and_then(|b| b.size().ok()),
            body_path: self.body.as_ref().and_then(|b| b.path().map(PathBuf::from)),
            preamble_lines: self.preamble.len(),
            epilogue_lines: self.epilogue.len(),
            parts: self.parts.iter().map(Entity::summary).collect(),
        }
    }
}

/// Read-only outline of an [`Entity`] produced by [`Entity::summary`].
#[derive(Debug, Clone, Serialize)]
pub struct EntitySummary {
    pub content_type: String,
    pub effective_type: String,
    pub encoding: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_path: Option<PathBuf>,
    pub preamble_lines: usize,
    pub epilogue_lines: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub parts: Vec<EntitySummary>,
}

static BOUNDARY_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A fresh multipart boundary, unique within this process.
pub fn make_boundary() -> String {
    let n = BOUNDARY_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!(
        "----------=_{}-{}-{}",
        chrono::Utc::now().timestamp(),
        std::process::id(),
        n
    )
}

/// Split raw bytes into lines, each keeping its terminating `\n`.
pub(crate) fn split_lines(data: &[u8]) -> Vec<Vec<u8>> {
    data.split_inclusive(|&b| b == b'\n')
        .map(<[u8]>::to_vec)
        .collect()
}
