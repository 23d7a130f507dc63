//! `mimexplode` is a tolerant MIME parser.
//!
//! It reads a message into a tree of [`model::Entity`] values, decoding
//! every leaf's transfer encoding through a pluggable [`codec`] registry.
//! Encoded containers (a base64 `multipart/mixed`, say) are decoded first
//! and re-parsed from a task queue, and optional redo hooks can rebuild
//! leaves that hide uuencoded files in plain text.

pub mod codec;
pub mod config;
pub mod error;
pub mod model;
pub mod parser;
pub mod store;

pub use error::{MimeError, Result};
pub use parser::Parser;
