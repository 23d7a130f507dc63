//! Storage for decoded bodies and for scratch data read between boundaries.

pub mod filer;
pub mod scratch;

pub use filer::{DirFiler, Filer, InCoreFiler};
pub use scratch::ScratchStore;
