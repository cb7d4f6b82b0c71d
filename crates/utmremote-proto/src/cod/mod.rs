//! COD, the self-describing binary value codec.
//!
//! Every request and reply body on the wire is one COD document:
//!
//! ```text
//! document  := shape_table root_value
//! shape     := field names, distinct, canonical (ASCII ascending) order
//! value     := primitive | keyed container | unkeyed container
//! ```
//!
//! Keyed containers (records, string-keyed mappings, enumerations) reference
//! a shape by index and carry one size-prefixed payload per present field.
//! Unkeyed containers (sequences, byte strings) come in homogeneous,
//! heterogeneous, and nullable layouts. Shape indices are meaningful only
//! within the document that declares them.
//!
//! Encoding is infallible and deterministic; decoding fails with a
//! [`CodError`] on any grammar violation, including residual bytes after a
//! fully-parsed value.
//!
//! # Round trip
//!
//! For every supported value `v` of type `T`,
//! `from_bytes::<T>(&to_bytes(&v)) == Ok(v)`.

mod decode;
mod encode;
mod error;
mod shape;
mod wire;

pub use decode::{from_bytes, CodDecode, Decoder, RecordDecoder};
pub use encode::{to_bytes, CodEncode, Encoder, RecordEncoder};
pub use error::CodError;
