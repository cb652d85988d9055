//! Byte-level plumbing shared by the importer, signature codecs and exporter.
//!
//! # Key Types
//! - [`Parser`] - bounds-checked read cursor over a borrowed byte slice
//! - [`BodyBuffer`] - growable little-endian output builder with patch support
//! - [`CilIO`] - endian conversion trait backing both

pub(crate) mod buffer;
pub(crate) mod parser;
pub(crate) mod raw;

pub use buffer::BodyBuffer;
pub use parser::Parser;
pub use raw::{read_le, read_le_at, write_le_at, CilIO};
