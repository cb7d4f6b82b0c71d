//! Decode failures.
//!
//! Every variant is a malformed-document condition: the bytes violated the
//! COD grammar or did not fit the requested type. Encoding is total over the
//! supported type set and cannot fail.

use thiserror::Error;

/// A COD document could not be decoded.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodError {
    /// The input ended before the value it declared.
    #[error("truncated document: needed {needed} more bytes, had {available}")]
    UnexpectedEnd {
        /// Bytes the current token still required.
        needed: usize,
        /// Bytes left in the input.
        available: usize,
    },

    /// A ULEB128 or integer value did not fit in 64 bits.
    #[error("integer does not fit in 64 bits")]
    IntegerOverflow,

    /// A shape listed the same field name twice.
    #[error("duplicate key {key:?} in shape")]
    DuplicateShapeKey {
        /// The repeated field name.
        key: String,
    },

    /// A keyed container referenced a shape index the document never declared.
    #[error("unknown shape {id} (document declares {count})")]
    UnknownShape {
        /// The referenced shape index.
        id: u64,
        /// Number of shapes in the document's table.
        count: usize,
    },

    /// A string field held bytes that are not valid UTF-8.
    #[error("string is not valid UTF-8")]
    InvalidUtf8,

    /// A container carried a metadata tag outside the enumerated range.
    #[error("invalid container tag {0:#04x}")]
    InvalidContainerTag(u8),

    /// Bytes remained after the declared value was fully parsed.
    #[error("{count} trailing bytes after value")]
    TrailingBytes {
        /// How many bytes were left over.
        count: usize,
    },

    /// A sequence declared a nonzero element count with zero-sized elements.
    ///
    /// No conforming encoder produces this (every encodable value is at
    /// least one byte); rejecting it bounds decode work by input length.
    #[error("sequence of {count} zero-sized elements")]
    ZeroSizedElements {
        /// The declared element count.
        count: u64,
    },

    /// A sequence declared more elements than this decoder accepts.
    #[error("sequence of {count} elements exceeds the limit of {max}")]
    SequenceTooLong {
        /// The declared element count.
        count: u64,
        /// The decoder's element limit.
        max: u64,
    },

    /// A required record field was absent from the shape or marked null.
    #[error("missing field {name:?}")]
    MissingField {
        /// The field the target type requires.
        name: &'static str,
    },

    /// An enumeration carried a variant identifier the target type lacks.
    #[error("unknown variant {variant:?}")]
    UnknownVariant {
        /// The identifier found on the wire.
        variant: String,
    },

    /// An enumeration's keyed container did not have exactly one field.
    #[error("enumeration shape has {fields} fields, expected 1")]
    InvalidEnum {
        /// Field count found in the shape.
        fields: usize,
    },

    /// A nullable sequence held an absent element where the target sequence
    /// type has no room for one.
    #[error("unexpected absent element in sequence")]
    UnexpectedNull,
}
