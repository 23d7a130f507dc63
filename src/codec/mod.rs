//! Transfer-encoding codecs and the registry that names them.
//!
//! A [`Codec`] is a stateless strategy that streams an encoded byte source
//! into a decoded sink (and back). The [`CodecRegistry`] maps lowercase
//! encoding names to factories producing fresh codec instances; each
//! parser owns one, so installing a custom codec never affects another
//! parser.

pub mod base64;
pub mod identity;
pub mod quoted_printable;
pub mod uu;

use std::collections::HashMap;
use std::fmt;
use std::io::{self, BufRead, Read, Write};
use std::sync::Arc;

use tracing::debug;

use crate::error::{MimeError, Result};

/// Streaming decode/encode for one transfer encoding.
pub trait Codec: Send {
    /// Encoding name this instance was built for.
    fn name(&self) -> &str;

    /// Read encoded bytes from `input` until EOF, write decoded bytes.
    fn decode(&self, input: &mut dyn BufRead, output: &mut dyn Write) -> Result<()>;

    /// Read raw bytes from `input` until EOF, write encoded bytes.
    fn encode(&self, input: &mut dyn BufRead, output: &mut dyn Write) -> Result<()>;
}

/// Produces a fresh codec instance.
pub type CodecFactory = Arc<dyn Fn() -> Box<dyn Codec> + Send + Sync>;

/// Name → factory table for transfer encodings.
#[derive(Clone)]
pub struct CodecRegistry {
    factories: HashMap<String, CodecFactory>,
}

impl CodecRegistry {
    /// A registry with nothing installed.
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Install `factory` under `name`, replacing any previous codec.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> Box<dyn Codec> + Send + Sync + 'static,
    {
        self.factories
            .insert(name.to_ascii_lowercase(), Arc::new(factory));
    }

    /// Remove the codec for `name`. Returns whether one was installed.
    pub fn unregister(&mut self, name: &str) -> bool {
        self.factories.remove(&name.to_ascii_lowercase()).is_some()
    }

    pub fn supports(&self, name: &str) -> bool {
        self.factories.contains_key(&name.to_ascii_lowercase())
    }

    /// A fresh codec for `name`, if one is installed.
    pub fn lookup(&self, name: &str) -> Option<Box<dyn Codec>> {
        self.factories
            .get(&name.to_ascii_lowercase())
            .map(|factory| factory())
    }

    /// The codec for `name`, or the `binary` codec when `name` is unknown.
    pub fn best(&self, name: &str) -> Result<Box<dyn Codec>> {
        if let Some(codec) = self.lookup(name) {
            return Ok(codec);
        }
        debug!(encoding = name, "No codec installed, using binary");
        self.lookup("binary")
            .ok_or_else(|| MimeError::NoFallbackCodec(name.to_string()))
    }

    /// Installed names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Decode with the codec for `name` (falling back to `binary`).
    pub fn decode(
        &self,
        name: &str,
        input: &mut dyn BufRead,
        output: &mut dyn Write,
    ) -> Result<()> {
        self.best(name)?.decode(input, output)
    }

    /// Encode with the codec for `name` (falling back to `binary`).
    pub fn encode(
        &self,
        name: &str,
        input: &mut dyn BufRead,
        output: &mut dyn Write,
    ) -> Result<()> {
        self.best(name)?.encode(input, output)
    }
}

impl Default for CodecRegistry {
    /// The built-in set: identity encodings, base64, quoted-printable and
    /// uuencode.
    fn default() -> Self {
        let mut reg = Self::empty();
        for name in identity::NAMES {
            reg.register(name, move || Box::new(identity::IdentityCodec::new(name)));
        }
        reg.register("base64", || Box::new(base64::Base64Codec));
        reg.register("quoted-printable", || {
            Box::new(quoted_printable::QuotedPrintableCodec)
        });
        for name in uu::NAMES {
            reg.register(name, move || Box::new(uu::UuCodec::new(name)));
        }
        reg
    }
}

impl fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodecRegistry")
            .field("names", &self.names())
            .finish()
    }
}

/// Fill `buf` as far as the input allows. Returns the number of bytes
/// read, which is short only at EOF.
pub(crate) fn read_full<R: Read + ?Sized>(input: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match input.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Shout;

    impl Codec for Shout {
        fn name(&self) -> &str {
            "x-shout"
        }

        fn decode(&self, input: &mut dyn BufRead, output: &mut dyn Write) -> Result<()> {
            let mut buf = Vec::new();
            input.read_to_end(&mut buf)?;
            output.write_all(&buf.to_ascii_lowercase())?;
            Ok(())
        }

        fn encode(&self, input: &mut dyn BufRead, output: &mut dyn Write) -> Result<()> {
            let mut buf = Vec::new();
            input.read_to_end(&mut buf)?;
            output.write_all(&buf.to_ascii_uppercase())?;
            Ok(())
        }
    }

    #[test]
    fn test_default_names() {
        let reg = CodecRegistry::default();
        assert_eq!(
            reg.names(),
            vec![
                "7bit",
                "8bit",
                "base64",
                "binary",
                "none",
                "quoted-printable",
                "x-uu",
                "x-uuencode"
            ]
        );
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let reg = CodecRegistry::default();
        assert_eq!(reg.lookup("BASE64").unwrap().name(), "base64");
        assert!(reg.lookup("x-gzip").is_none());
    }

    #[test]
    fn test_best_falls_back_to_binary() {
        let reg = CodecRegistry::default();
        assert_eq!(reg.best("x-gzip").unwrap().name(), "binary");
    }

    #[test]
    fn test_best_without_binary_fails() {
        let mut reg = CodecRegistry::default();
        assert!(reg.unregister("binary"));
        assert!(!reg.unregister("binary"));
        assert!(matches!(
            reg.best("x-gzip"),
            Err(MimeError::NoFallbackCodec(name)) if name == "x-gzip"
        ));
    }

    #[test]
    fn test_register_custom_codec() {
        let mut reg = CodecRegistry::default();
        reg.register("X-Shout", || Box::new(Shout));
        assert!(reg.supports("x-shout"));

        let mut out = Vec::new();
        reg.decode("x-shout", &mut &b"HeLLo"[..], &mut out).unwrap();
        assert_eq!(out, b"hello");

        out.clear();
        reg.encode("x-shout", &mut &b"hello"[..], &mut out).unwrap();
        assert_eq!(out, b"HELLO");
    }

    #[test]
    fn test_registries_are_independent() {
        let mut a = CodecRegistry::default();
        let b = a.clone();
        a.unregister("base64");
        assert!(!a.supports("base64"));
        assert!(b.supports("base64"));
    }
}
