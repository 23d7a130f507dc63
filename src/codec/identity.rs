//! Identity encodings: `7bit`, `8bit`, `binary`, `none`.

use std::io::{self, BufRead, Write};

use super::Codec;
use crate::error::Result;

/// Names served by [`IdentityCodec`].
pub const NAMES: [&str; 4] = ["7bit", "8bit", "binary", "none"];

/// Copies bytes through unchanged.
#[derive(Debug, Clone, Copy)]
pub struct IdentityCodec {
    name: &'static str,
}

impl IdentityCodec {
    pub fn new(name: &'static str) -> Self {
        Self { name }
    }
}

impl Codec for IdentityCodec {
    fn name(&self) -> &str {
        self.name
    }

    fn decode(&self, input: &mut dyn BufRead, output: &mut dyn Write) -> Result<()> {
        io::copy(input, output)?;
        Ok(())
    }

    fn encode(&self, input: &mut dyn BufRead, output: &mut dyn Write) -> Result<()> {
        io::copy(input, output)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_copies_bytes() {
        let mut out = Vec::new();
        IdentityCodec::new("8bit")
            .decode(&mut &b"caf\xc3\xa9\r\n\x00"[..], &mut out)
            .unwrap();
        assert_eq!(out, b"caf\xc3\xa9\r\n\x00");
    }

    proptest! {
        #[test]
        fn identity_roundtrip(
            data in prop::collection::vec(any::<u8>(), 0..512),
            idx in 0usize..4
        ) {
            let codec = IdentityCodec::new(NAMES[idx]);
            let mut encoded = Vec::new();
            codec.encode(&mut &data[..], &mut encoded).unwrap();
            let mut decoded = Vec::new();
            codec.decode(&mut &encoded[..], &mut decoded).unwrap();
            prop_assert_eq!(decoded, data);
        }
    }
}
