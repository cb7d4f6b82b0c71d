//! COD decoding.
//!
//! Decoding is driven by the requested type: the caller asks the decoder for
//! a boolean, a record, a sequence, and the decoder checks the wire against
//! that request. Every value is decoded from an exactly-sized slice and must
//! consume it fully; leftover bytes anywhere are a malformed document rather
//! than silently ignored.

use std::collections::BTreeMap;

use bytes::Bytes;

use super::error::CodError;
use super::shape::Shapes;
use super::wire::{
    BitVector, Input, KEYED_ALL_PRESENT, KEYED_SOME_ABSENT, UNKEYED_HETEROGENEOUS,
    UNKEYED_HOMOGENEOUS, UNKEYED_NULLABLE,
};

/// Upper bound on declared sequence element counts. Absent elements occupy
/// no payload bytes, so without a cap a short document could declare a
/// sequence large enough to exhaust memory before any byte check fails.
const MAX_SEQUENCE_ELEMENTS: u64 = 1 << 20;

/// A value that can be read out of a COD document.
pub trait CodDecode: Sized {
    /// Decode one value; the decoder's input is exactly this value's bytes.
    fn decode(dec: &mut Decoder<'_, '_>) -> Result<Self, CodError>;
}

/// Decode a complete COD document (shape table, then root value) into `T`.
pub fn from_bytes<T: CodDecode>(data: &[u8]) -> Result<T, CodError> {
    let mut input = Input::new(data);
    let shapes = Shapes::parse(&mut input)?;
    let mut dec = Decoder { input, shapes: &shapes };
    let value = T::decode(&mut dec)?;
    dec.finish()?;
    Ok(value)
}

/// Cursor over one value's bytes, sharing the document's shape table.
pub struct Decoder<'d, 'a> {
    input: Input<'a>,
    shapes: &'d Shapes<'a>,
}

impl<'d, 'a> Decoder<'d, 'a> {
    /// Error unless this value's bytes were fully consumed.
    pub fn finish(&self) -> Result<(), CodError> {
        match self.input.remaining() {
            0 => Ok(()),
            count => Err(CodError::TrailingBytes { count }),
        }
    }

    /// Any nonzero byte is true.
    pub fn boolean(&mut self) -> Result<bool, CodError> {
        Ok(self.input.pop()? != 0)
    }

    /// Little-endian, zero-extended from however many bytes are present,
    /// reinterpreted as two's complement. More than eight bytes are only
    /// acceptable as zero padding.
    pub fn integer(&mut self) -> Result<i64, CodError> {
        self.unsigned().map(|v| v as i64)
    }

    /// Unsigned variant of [`Decoder::integer`] (bitflag masks).
    pub fn unsigned(&mut self) -> Result<u64, CodError> {
        let bytes = self.input.rest();
        let mut value = 0u64;
        for (i, byte) in bytes.iter().enumerate() {
            if i >= 8 {
                if *byte != 0 {
                    return Err(CodError::IntegerOverflow);
                }
            } else {
                value |= u64::from(*byte) << (8 * i as u32);
            }
        }
        Ok(value)
    }

    /// ULEB128 byte length, then UTF-8 bytes.
    pub fn string(&mut self) -> Result<String, CodError> {
        let len = usize::try_from(self.input.uleb128()?).map_err(|_| CodError::IntegerOverflow)?;
        std::str::from_utf8(self.input.take(len)?)
            .map(str::to_owned)
            .map_err(|_| CodError::InvalidUtf8)
    }

    /// An unkeyed container read as one contiguous byte string.
    pub fn byte_seq(&mut self) -> Result<Bytes, CodError> {
        let tag = self.input.pop()?;
        let count = self.input.uleb128()?;
        let total = match tag {
            UNKEYED_HOMOGENEOUS => {
                let size = self.input.uleb128()?;
                count.checked_mul(size).ok_or(CodError::IntegerOverflow)?
            }
            UNKEYED_HETEROGENEOUS => self.read_sizes(count)?.1,
            UNKEYED_NULLABLE => {
                let count = usize::try_from(count).map_err(|_| CodError::IntegerOverflow)?;
                let absent = BitVector::read(&mut self.input, count)?;
                self.read_sizes((count - absent.count_set()) as u64)?.1
            }
            other => return Err(CodError::InvalidContainerTag(other)),
        };
        let total = usize::try_from(total).map_err(|_| CodError::IntegerOverflow)?;
        Ok(Bytes::copy_from_slice(self.input.take(total)?))
    }

    /// A sequence with no room for absent elements.
    pub fn seq<T: CodDecode>(&mut self) -> Result<Vec<T>, CodError> {
        let slots = self.element_slices()?;
        let mut items = Vec::with_capacity(slots.len());
        for slot in slots {
            match slot {
                Some(slice) => items.push(self.decode_slice(slice)?),
                None => return Err(CodError::UnexpectedNull),
            }
        }
        Ok(items)
    }

    /// A sequence whose elements may be absent.
    pub fn seq_optional<T: CodDecode>(&mut self) -> Result<Vec<Option<T>>, CodError> {
        let slots = self.element_slices()?;
        let mut items = Vec::with_capacity(slots.len());
        for slot in slots {
            items.push(match slot {
                Some(slice) => Some(self.decode_slice(slice)?),
                None => None,
            });
        }
        Ok(items)
    }

    /// A keyed container applied to a record type by field name.
    pub fn record(&mut self) -> Result<RecordDecoder<'d, 'a>, CodError> {
        let fields = self.keyed_fields()?;
        Ok(RecordDecoder { shapes: self.shapes, fields })
    }

    /// A keyed container read as a string-keyed mapping. Absent keys are
    /// dropped.
    pub fn map<T: CodDecode>(&mut self) -> Result<BTreeMap<String, T>, CodError> {
        let fields = self.keyed_fields()?;
        let mut entries = BTreeMap::new();
        for (name, slot) in fields {
            if let Some(slice) = slot {
                entries.insert(name.to_owned(), self.decode_slice(slice)?);
            }
        }
        Ok(entries)
    }

    /// An enumeration: a one-field keyed container whose field name is the
    /// variant identifier and whose value is a (content-free) record.
    pub fn enum_variant(&mut self) -> Result<&'a str, CodError> {
        let fields = self.keyed_fields()?;
        if fields.len() != 1 {
            return Err(CodError::InvalidEnum { fields: fields.len() });
        }
        let (name, slot) = fields[0];
        let slice = slot.ok_or(CodError::InvalidEnum { fields: 0 })?;
        let mut inner = Decoder { input: Input::new(slice), shapes: self.shapes };
        let _ = inner.record()?;
        inner.finish()?;
        Ok(name)
    }

    fn decode_slice<T: CodDecode>(&self, slice: &'a [u8]) -> Result<T, CodError> {
        let mut dec = Decoder { input: Input::new(slice), shapes: self.shapes };
        let value = T::decode(&mut dec)?;
        dec.finish()?;
        Ok(value)
    }

    /// Read an unkeyed container header and slice the payload into
    /// per-element slots (`None` for absent elements).
    fn element_slices(&mut self) -> Result<Vec<Option<&'a [u8]>>, CodError> {
        let tag = self.input.pop()?;
        let count = self.input.uleb128()?;
        if count > MAX_SEQUENCE_ELEMENTS {
            return Err(CodError::SequenceTooLong { count, max: MAX_SEQUENCE_ELEMENTS });
        }
        match tag {
            UNKEYED_HOMOGENEOUS => {
                let size = self.input.uleb128()?;
                if size == 0 && count > 0 {
                    return Err(CodError::ZeroSizedElements { count });
                }
                let count = usize::try_from(count).map_err(|_| CodError::IntegerOverflow)?;
                let size = usize::try_from(size).map_err(|_| CodError::IntegerOverflow)?;
                let mut slots = Vec::with_capacity(count.min(self.input.remaining()));
                for _ in 0..count {
                    slots.push(Some(self.input.take(size)?));
                }
                Ok(slots)
            }
            UNKEYED_HETEROGENEOUS => {
                let (sizes, _) = self.read_sizes(count)?;
                let mut slots = Vec::with_capacity(sizes.len());
                for size in sizes {
                    slots.push(Some(self.input.take(size)?));
                }
                Ok(slots)
            }
            UNKEYED_NULLABLE => {
                let count = usize::try_from(count).map_err(|_| CodError::IntegerOverflow)?;
                let absent = BitVector::read(&mut self.input, count)?;
                let (sizes, _) = self.read_sizes((count - absent.count_set()) as u64)?;
                let mut sizes = sizes.into_iter();
                let mut slots = Vec::with_capacity(count);
                for index in 0..count {
                    if absent.get(index) {
                        slots.push(None);
                    } else {
                        let size = sizes.next().ok_or(CodError::UnexpectedEnd {
                            needed: 1,
                            available: 0,
                        })?;
                        slots.push(Some(self.input.take(size)?));
                    }
                }
                Ok(slots)
            }
            other => Err(CodError::InvalidContainerTag(other)),
        }
    }

    /// Read a keyed container header and slice the payload into per-field
    /// slots in shape order.
    fn keyed_fields(&mut self) -> Result<Vec<(&'a str, Option<&'a [u8]>)>, CodError> {
        let tag = self.input.pop()?;
        if tag != KEYED_ALL_PRESENT && tag != KEYED_SOME_ABSENT {
            return Err(CodError::InvalidContainerTag(tag));
        }
        let shape_id = self.input.uleb128()?;
        let names = self.shapes.get(shape_id)?;

        let absent = if tag == KEYED_SOME_ABSENT {
            Some(BitVector::read(&mut self.input, names.len())?)
        } else {
            None
        };
        let is_absent =
            |index: usize| absent.as_ref().is_some_and(|mask| mask.get(index));

        let mut sizes = Vec::with_capacity(names.len());
        for (index, _) in names.iter().enumerate() {
            if is_absent(index) {
                sizes.push(None);
            } else {
                let size =
                    usize::try_from(self.input.uleb128()?).map_err(|_| CodError::IntegerOverflow)?;
                sizes.push(Some(size));
            }
        }

        let mut fields = Vec::with_capacity(names.len());
        for (name, size) in names.iter().zip(sizes) {
            match size {
                Some(size) => fields.push((*name, Some(self.input.take(size)?))),
                None => fields.push((*name, None)),
            }
        }
        Ok(fields)
    }

    /// Read `count` ULEB128 sizes and their checked sum.
    fn read_sizes(&mut self, count: u64) -> Result<(Vec<usize>, u64), CodError> {
        let mut sizes = Vec::new();
        let mut total = 0u64;
        for _ in 0..count {
            let size = self.input.uleb128()?;
            total = total.checked_add(size).ok_or(CodError::IntegerOverflow)?;
            sizes.push(usize::try_from(size).map_err(|_| CodError::IntegerOverflow)?);
        }
        Ok((sizes, total))
    }
}

/// Present and absent fields of one decoded keyed container.
pub struct RecordDecoder<'d, 'a> {
    shapes: &'d Shapes<'a>,
    fields: Vec<(&'a str, Option<&'a [u8]>)>,
}

impl RecordDecoder<'_, '_> {
    /// A field the target type requires; absent is a malformed document.
    pub fn required<T: CodDecode>(&self, name: &'static str) -> Result<T, CodError> {
        self.optional(name)?.ok_or(CodError::MissingField { name })
    }

    /// A field the target type can live without. Fields not in the shape
    /// decode as `None`; fields in the shape the target does not know are
    /// ignored.
    pub fn optional<T: CodDecode>(&self, name: &'static str) -> Result<Option<T>, CodError> {
        let slot = self
            .fields
            .iter()
            .find(|(field, _)| *field == name)
            .and_then(|(_, slot)| *slot);
        match slot {
            Some(slice) => {
                let mut dec = Decoder { input: Input::new(slice), shapes: self.shapes };
                let value = T::decode(&mut dec)?;
                dec.finish()?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }
}

impl CodDecode for bool {
    fn decode(dec: &mut Decoder<'_, '_>) -> Result<Self, CodError> {
        dec.boolean()
    }
}

impl CodDecode for i64 {
    fn decode(dec: &mut Decoder<'_, '_>) -> Result<Self, CodError> {
        dec.integer()
    }
}

impl CodDecode for String {
    fn decode(dec: &mut Decoder<'_, '_>) -> Result<Self, CodError> {
        dec.string()
    }
}

impl CodDecode for Bytes {
    fn decode(dec: &mut Decoder<'_, '_>) -> Result<Self, CodError> {
        dec.byte_seq()
    }
}

impl<T: CodDecode> CodDecode for Vec<T> {
    fn decode(dec: &mut Decoder<'_, '_>) -> Result<Self, CodError> {
        dec.seq()
    }
}

impl<T: CodDecode> CodDecode for BTreeMap<String, T> {
    fn decode(dec: &mut Decoder<'_, '_>) -> Result<Self, CodError> {
        dec.map()
    }
}
