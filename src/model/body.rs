//! Decoded body storage.
//!
//! A body is written once by the parser and read back afterwards. Where
//! the bytes live is decided by the [`Filer`](crate::store::filer::Filer)
//! that created it.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::error::{MimeError, Result};

/// Decoded bytes of a leaf entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    /// Bytes held in memory.
    InCore(Vec<u8>),
    /// Bytes stored in a file owned by this body.
    OnDisk(PathBuf),
}

impl Body {
    pub fn in_core() -> Self {
        Self::InCore(Vec::new())
    }

    pub fn on_disk(path: impl Into<PathBuf>) -> Self {
        Self::OnDisk(path.into())
    }

    /// Body holding `data` in memory.
    pub fn from_bytes(data: impl Into<Vec<u8>>) -> Self {
        Self::InCore(data.into())
    }

    /// Open for writing, truncating previous contents. Callers must
    /// `flush` before dropping the writer to see write errors.
    pub fn open_write(&mut self) -> Result<Box<dyn Write + '_>> {
        match self {
            Self::InCore(data) => {
                data.clear();
                Ok(Box::new(data))
            }
            Self::OnDisk(path) => {
                let file = File::create(&*path).map_err(|e| MimeError::io(&*path, e))?;
                Ok(Box::new(BufWriter::new(file)))
            }
        }
    }

    /// Open for reading.
    pub fn open_read(&self) -> Result<Box<dyn BufRead + '_>> {
        match self {
            Self::InCore(data) => Ok(Box::new(data.as_slice())),
            Self::OnDisk(path) => {
                let file = File::open(path).map_err(|e| MimeError::io(path, e))?;
                Ok(Box::new(BufReader::new(file)))
            }
        }
    }

    /// Open an owned reader that does not borrow the body, so the entity
    /// holding it can be replaced while the bytes are still being read.
    pub fn reopen(&self) -> Result<Box<dyn BufRead + Send>> {
        match self {
            Self::InCore(data) => Ok(Box::new(std::io::Cursor::new(data.clone()))),
            Self::OnDisk(path) => {
                let file = File::open(path).map_err(|e| MimeError::io(path, e))?;
                Ok(Box::new(BufReader::new(file)))
            }
        }
    }

    /// Read the whole body into memory.
    pub fn read_all(&self) -> Result<Vec<u8>> {
        match self {
            Self::InCore(data) => Ok(data.clone()),
            Self::OnDisk(path) => {
                let mut buf = Vec::new();
                File::open(path)
                    .and_then(|mut f| f.read_to_end(&mut buf))
                    .map_err(|e| MimeError::io(path, e))?;
                Ok(buf)
            }
        }
    }

    /// Size of the decoded bytes.
    pub fn size(&self) -> Result<u64> {
        match self {
            Self::InCore(data) => Ok(data.len() as u64),
            Self::OnDisk(path) => std::fs::metadata(path)
                .map(|m| m.len())
                .map_err(|e| MimeError::io(path, e)),
        }
    }

    /// Path of the backing file, if any.
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::InCore(_) => None,
            Self::OnDisk(path) => Some(path),
        }
    }

    /// Delete the backing file. In-core bodies are simply emptied.
    pub fn purge(&mut self) -> Result<()> {
        match self {
            Self::InCore(data) => {
                data.clear();
                Ok(())
            }
            Self::OnDisk(path) => match std::fs::remove_file(&*path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(MimeError::io(&*path, e)),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_core_write_then_read() {
        let mut body = Body::in_core();
        {
            let mut w = body.open_write().unwrap();
            w.write_all(b"hello ").unwrap();
            w.write_all(b"world").unwrap();
            w.flush().unwrap();
        }
        assert_eq!(body.read_all().unwrap(), b"hello world");
        assert_eq!(body.size().unwrap(), 11);

        let mut line = String::new();
        body.open_read().unwrap().read_line(&mut line).unwrap();
        assert_eq!(line, "hello world");
    }

    #[test]
    fn test_on_disk_write_read_purge() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("part.bin");
        let mut body = Body::on_disk(&path);
        {
            let mut w = body.open_write().unwrap();
            w.write_all(&[0, 1, 2, 255]).unwrap();
            w.flush().unwrap();
        }
        assert_eq!(body.path(), Some(path.as_path()));
        assert_eq!(body.read_all().unwrap(), vec![0, 1, 2, 255]);

        let mut reopened = Vec::new();
        body.reopen().unwrap().read_to_end(&mut reopened).unwrap();
        assert_eq!(reopened, vec![0, 1, 2, 255]);

        body.purge().unwrap();
        assert!(!path.exists());
        // Purging twice is harmless
        body.purge().unwrap();
    }
}
