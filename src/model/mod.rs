//! Value objects of the parsed tree: MIME types, headers, bodies, entities.

pub mod body;
pub mod entity;
pub mod header;
pub mod mime_type;

pub use body::Body;
pub use entity::{Entity, EntityPath, EntitySummary};
pub use header::Header;
pub use mime_type::{Classification, MimeType};
