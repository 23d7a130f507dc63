//! Recyclable temporary storage for boundary-bounded encoded data.
//!
//! The encoded bytes of a part inside a multipart are copied here first so
//! the codec sees a plain stream ending at the boundary. One store serves
//! every part of a parse: each fill truncates and rewinds it.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Seek, SeekFrom, Write};

use tracing::debug;

use crate::error::{MimeError, Result};

#[derive(Debug)]
pub struct ScratchStore {
    to_core: bool,
    core: Vec<u8>,
    file: Option<File>,
}

impl ScratchStore {
    /// A store kept in memory (`to_core`) or in an anonymous temp file
    /// created on first use.
    pub fn new(to_core: bool) -> Self {
        Self {
            to_core,
            core: Vec::new(),
            file: None,
        }
    }

    pub fn is_in_core(&self) -> bool {
        self.to_core
    }

    /// Replace the contents with whatever `fill` writes.
    pub fn fill<T>(&mut self, fill: impl FnOnce(&mut dyn Write) -> Result<T>) -> Result<T> {
        if self.to_core {
            self.core.clear();
            return fill(&mut self.core);
        }

        let file = self.file_mut()?;
        file.set_len(0).map_err(scratch_err)?;
        file.seek(SeekFrom::Start(0)).map_err(scratch_err)?;
        let mut writer = BufWriter::new(file);
        let value = fill(&mut writer)?;
        writer.flush().map_err(scratch_err)?;
        Ok(value)
    }

    /// Read back what the last fill wrote.
    pub fn reader(&mut self) -> Result<Box<dyn BufRead + '_>> {
        if self.to_core {
            return Ok(Box::new(self.core.as_slice()));
        }
        let file = self.file_mut()?;
        file.seek(SeekFrom::Start(0)).map_err(scratch_err)?;
        Ok(Box::new(BufReader::new(file)))
    }

    fn file_mut(&mut self) -> Result<&mut File> {
        if self.file.is_none() {
            debug!("Creating scratch temp file");
            self.file = Some(tempfile::tempfile().map_err(scratch_err)?);
        }
        self.file
            .as_mut()
            .ok_or_else(|| MimeError::Internal("scratch file missing".to_string()))
    }
}

fn scratch_err(e: std::io::Error) -> MimeError {
    MimeError::io("<scratch>", e)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn roundtrip(store: &mut ScratchStore) {
        store
            .fill(|w| {
                w.write_all(b"a much longer first payload")?;
                Ok(())
            })
            .unwrap();
        store
            .fill(|w| {
                w.write_all(b"short")?;
                Ok(())
            })
            .unwrap();

        let mut back = Vec::new();
        store.reader().unwrap().read_to_end(&mut back).unwrap();
        assert_eq!(back, b"short");
    }

    #[test]
    fn test_in_core_recycles() {
        let mut store = ScratchStore::new(true);
        roundtrip(&mut store);
        assert!(store.is_in_core());
    }

    #[test]
    fn test_temp_file_recycles() {
        let mut store = ScratchStore::new(false);
        roundtrip(&mut store);
        assert!(!store.is_in_core());
    }

    #[test]
    fn test_fill_returns_value() {
        let mut store = ScratchStore::new(true);
        let n = store
            .fill(|w| {
                w.write_all(b"xyz")?;
                Ok(3usize)
            })
            .unwrap();
        assert_eq!(n, 3);
    }
}
