//! Filers decide where decoded bodies live.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::config::OutputConfig;
use crate::error::{MimeError, Result};
use crate::model::{Body, Header, MimeType};

/// Hands out fresh output bodies for decoded leaves.
pub trait Filer {
    fn new_output_body(&mut self, head: &Header) -> Result<Body>;
}

/// Keeps every body in memory.
#[derive(Debug, Clone, Copy, Default)]
pub struct InCoreFiler;

impl Filer for InCoreFiler {
    fn new_output_body(&mut self, _head: &Header) -> Result<Body> {
        Ok(Body::in_core())
    }
}

/// Writes each body to its own file in one output directory.
///
/// The sender's recommended filename is used when it survives
/// sanitizing; otherwise a `msg-<pid>-<n>.<ext>` name is generated.
/// Existing files are never overwritten.
#[derive(Debug)]
pub struct DirFiler {
    dir: PathBuf,
    counter: usize,
}

impl DirFiler {
    /// Use `dir`, creating it if needed.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|e| MimeError::io(&dir, e))?;
        Ok(Self { dir, counter: 0 })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn generated_name(&mut self, mime_type: &MimeType) -> String {
        self.counter += 1;
        format!(
            "msg-{}-{}.{}",
            std::process::id(),
            self.counter,
            extension_for(mime_type)
        )
    }
}

impl Filer for DirFiler {
    fn new_output_body(&mut self, head: &Header) -> Result<Body> {
        let name = match head.recommended_filename().map(|n| sanitize_filename(&n)) {
            Some(Some(clean)) => clean,
            Some(None) => {
                warn!("Recommended filename is unusable, generating one");
                self.generated_name(&head.mime_type())
            }
            None => self.generated_name(&head.mime_type()),
        };
        let path = unique_path(&self.dir.join(name));
        debug!(path = %path.display(), "New output body");
        Ok(Body::on_disk(path))
    }
}

/// Build the filer an [`OutputConfig`] asks for.
pub fn filer_from_config(output: &OutputConfig) -> Result<Box<dyn Filer>> {
    if output.to_core {
        return Ok(Box::new(InCoreFiler));
    }
    match &output.dir {
        Some(dir) => Ok(Box::new(DirFiler::new(dir)?)),
        None => Err(MimeError::InvalidPath(
            "output.to_core is false but no output.dir is set".to_string(),
        )),
    }
}

/// Make a sender-supplied filename safe to create in the output
/// directory. Only the last path component is kept; characters outside
/// `[A-Za-z0-9._@-]` become `_`, and leading dots are replaced so the
/// result is never hidden. Returns `None` when nothing useful is left.
pub fn sanitize_filename(name: &str) -> Option<String> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name).trim();

    let mut sanitized: String = base
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '.' || c == '_' || c == '@' {
                c
            } else {
                '_'
            }
        })
        .take(120)
        .collect();

    let dots = sanitized.len() - sanitized.trim_start_matches('.').len();
    if dots > 0 {
        sanitized.replace_range(..dots, &"_".repeat(dots));
    }

    if sanitized.chars().all(|c| c == '_') {
        None
    } else {
        Some(sanitized)
    }
}

/// File extension for generated names.
pub fn extension_for(mime_type: &MimeType) -> &'static str {
    match (mime_type.typ(), mime_type.subtype()) {
        ("text", "plain") => "txt",
        ("text", "html") => "html",
        ("text", "csv") => "csv",
        ("image", "gif") => "gif",
        ("image", "jpeg") => "jpg",
        ("image", "png") => "png",
        ("application", "pdf") => "pdf",
        ("application", "zip") => "zip",
        ("message", _) => "msg",
        ("text", _) => "txt",
        _ => "dat",
    }
}

/// Generate a unique path by appending `_1`, `_2`, ... if the file exists.
fn unique_path(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }

    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("file");
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let parent = path.parent().unwrap_or(Path::new("."));

    for i in 1..1000 {
        let candidate = if ext.is_empty() {
            parent.join(format!("{stem}_{i}"))
        } else {
            parent.join(format!("{stem}_{i}.{ext}"))
        };
        if !candidate.exists() {
            return candidate;
        }
    }

    parent.join(format!(
        "{stem}_{}.{ext}",
        chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
    ))
}
