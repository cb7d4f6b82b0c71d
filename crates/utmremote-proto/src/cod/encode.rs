//! COD encoding.
//!
//! Encoding is total and deterministic: a value encodes the same way every
//! time, with record fields in canonical (ASCII ascending) name order and
//! shapes interned on first occurrence. Absent optional fields are omitted
//! from the shape entirely, so records never need the some-absent container
//! tag.

use std::collections::BTreeMap;

use bytes::Bytes;

use super::shape::ShapeTable;
use super::wire::{
    write_bitvector, write_uleb128, KEYED_ALL_PRESENT, UNKEYED_HETEROGENEOUS,
    UNKEYED_HOMOGENEOUS, UNKEYED_NULLABLE,
};

/// A value that can be written into a COD document.
pub trait CodEncode {
    /// Append this value's encoding.
    fn encode(&self, enc: &mut Encoder<'_>);
}

/// Encode `value` as a complete COD document (shape table, then root value).
pub fn to_bytes<T: CodEncode + ?Sized>(value: &T) -> Bytes {
    let mut shapes = ShapeTable::default();
    let mut body = Vec::new();
    value.encode(&mut Encoder { out: &mut body, shapes: &mut shapes });

    let mut doc = Vec::with_capacity(body.len() + 16);
    shapes.write(&mut doc);
    doc.extend_from_slice(&body);
    Bytes::from(doc)
}

/// Sink for one value's encoding, sharing the document's shape table.
pub struct Encoder<'a> {
    out: &'a mut Vec<u8>,
    shapes: &'a mut ShapeTable,
}

impl Encoder<'_> {
    /// One byte, `0x00` or `0x01`.
    pub fn boolean(&mut self, value: bool) {
        self.out.push(u8::from(value));
    }

    /// Eight little-endian two's-complement bytes. The decoder is lenient
    /// about width; the encoder always writes exactly eight bytes.
    pub fn integer(&mut self, value: i64) {
        self.out.extend_from_slice(&value.to_le_bytes());
    }

    /// Eight little-endian bytes (bitflag masks).
    pub fn unsigned(&mut self, value: u64) {
        self.out.extend_from_slice(&value.to_le_bytes());
    }

    /// ULEB128 byte length, then UTF-8 bytes.
    pub fn string(&mut self, value: &str) {
        write_uleb128(self.out, value.len() as u64);
        self.out.extend_from_slice(value.as_bytes());
    }

    /// Byte sequences are the homogeneous unkeyed container with element
    /// size 1.
    pub fn byte_seq(&mut self, value: &[u8]) {
        self.out.push(UNKEYED_HOMOGENEOUS);
        write_uleb128(self.out, value.len() as u64);
        write_uleb128(self.out, 1);
        self.out.extend_from_slice(value);
    }

    /// A sequence of values; homogeneous when every element encoding has the
    /// same length (including the empty sequence), heterogeneous otherwise.
    pub fn seq<T: CodEncode>(&mut self, items: &[T]) {
        let mut bufs = Vec::with_capacity(items.len());
        for item in items {
            bufs.push(self.encode_child(item));
        }
        self.unkeyed_from_bufs(&bufs);
    }

    /// A sequence with absent slots, encoded with the nullable tag when any
    /// element is `None`.
    pub fn nullable_seq<T: CodEncode>(&mut self, items: &[Option<T>]) {
        if items.iter().all(Option::is_some) {
            let mut bufs = Vec::with_capacity(items.len());
            for item in items.iter().flatten() {
                bufs.push(self.encode_child(item));
            }
            self.unkeyed_from_bufs(&bufs);
            return;
        }
        let mut bufs = Vec::new();
        let mut absent = Vec::with_capacity(items.len());
        for item in items {
            absent.push(item.is_none());
            if let Some(value) = item {
                bufs.push(self.encode_child(value));
            }
        }
        self.out.push(UNKEYED_NULLABLE);
        write_uleb128(self.out, items.len() as u64);
        write_bitvector(self.out, &absent);
        for buf in &bufs {
            write_uleb128(self.out, buf.len() as u64);
        }
        for buf in &bufs {
            self.out.extend_from_slice(buf);
        }
    }

    /// A string-keyed mapping; the shape is the sorted key set.
    pub fn map<T: CodEncode>(&mut self, entries: &BTreeMap<String, T>) {
        let names: Vec<&str> = entries.keys().map(String::as_str).collect();
        let id = self.shapes.intern(&names);
        let mut bufs = Vec::with_capacity(entries.len());
        for value in entries.values() {
            bufs.push(self.encode_child(value));
        }
        self.out.push(KEYED_ALL_PRESENT);
        write_uleb128(self.out, id);
        for buf in &bufs {
            write_uleb128(self.out, buf.len() as u64);
        }
        for buf in &bufs {
            self.out.extend_from_slice(buf);
        }
    }

    /// Start a record. Declare fields in any order; `finish` canonicalizes.
    pub fn record(&mut self) -> RecordEncoder<'_, '_> {
        RecordEncoder { out: &mut *self.out, shapes: &mut *self.shapes, fields: Vec::new() }
    }

    /// An enumeration value: a one-field record named after the variant,
    /// holding an empty record.
    pub fn enum_variant(&mut self, name: &str) {
        let outer = self.shapes.intern(&[name]);
        let inner_id = self.shapes.intern(&[]);
        let mut inner = Vec::with_capacity(2);
        inner.push(KEYED_ALL_PRESENT);
        write_uleb128(&mut inner, inner_id);

        self.out.push(KEYED_ALL_PRESENT);
        write_uleb128(self.out, outer);
        write_uleb128(self.out, inner.len() as u64);
        self.out.extend_from_slice(&inner);
    }

    fn encode_child(&mut self, value: &dyn CodEncode) -> Vec<u8> {
        let mut buf = Vec::new();
        value.encode(&mut Encoder { out: &mut buf, shapes: &mut *self.shapes });
        buf
    }

    fn unkeyed_from_bufs(&mut self, bufs: &[Vec<u8>]) {
        let homogeneous = bufs.windows(2).all(|pair| pair[0].len() == pair[1].len());
        if homogeneous {
            self.out.push(UNKEYED_HOMOGENEOUS);
            write_uleb128(self.out, bufs.len() as u64);
            write_uleb128(self.out, bufs.first().map_or(0, Vec::len) as u64);
        } else {
            self.out.push(UNKEYED_HETEROGENEOUS);
            write_uleb128(self.out, bufs.len() as u64);
            for buf in bufs {
                write_uleb128(self.out, buf.len() as u64);
            }
        }
        for buf in bufs {
            self.out.extend_from_slice(buf);
        }
    }
}

/// Builder for one keyed container. The shape is interned before any field
/// value is encoded, so a record's shape always precedes its children's in
/// the document table.
pub struct RecordEncoder<'e, 'v> {
    out: &'e mut Vec<u8>,
    shapes: &'e mut ShapeTable,
    fields: Vec<(&'static str, &'v dyn CodEncode)>,
}

impl<'e, 'v> RecordEncoder<'e, 'v> {
    /// Declare a present field.
    pub fn field(mut self, name: &'static str, value: &'v dyn CodEncode) -> Self {
        self.fields.push((name, value));
        self
    }

    /// Declare an optionally-absent field; `None` is omitted from the shape.
    pub fn optional<T: CodEncode>(mut self, name: &'static str, value: &'v Option<T>) -> Self {
        if let Some(value) = value {
            self.fields.push((name, value));
        }
        self
    }

    /// Sort, intern the shape, and write the container.
    pub fn finish(self) {
        let Self { out, shapes, mut fields } = self;
        fields.sort_by(|a, b| a.0.cmp(b.0));
        debug_assert!(
            fields.windows(2).all(|pair| pair[0].0 != pair[1].0),
            "duplicate record field"
        );
        let names: Vec<&str> = fields.iter().map(|f| f.0).collect();
        let id = shapes.intern(&names);

        let mut bufs = Vec::with_capacity(fields.len());
        for (_, value) in &fields {
            let mut buf = Vec::new();
            value.encode(&mut Encoder { out: &mut buf, shapes: &mut *shapes });
            bufs.push(buf);
        }

        out.push(KEYED_ALL_PRESENT);
        write_uleb128(out, id);
        for buf in &bufs {
            write_uleb128(out, buf.len() as u64);
        }
        for buf in &bufs {
            out.extend_from_slice(buf);
        }
    }
}

impl CodEncode for bool {
    fn encode(&self, enc: &mut Encoder<'_>) {
        enc.boolean(*self);
    }
}

impl CodEncode for i64 {
    fn encode(&self, enc: &mut Encoder<'_>) {
        enc.integer(*self);
    }
}

impl CodEncode for str {
    fn encode(&self, enc: &mut Encoder<'_>) {
        enc.string(self);
    }
}

impl CodEncode for String {
    fn encode(&self, enc: &mut Encoder<'_>) {
        enc.string(self);
    }
}

impl CodEncode for Bytes {
    fn encode(&self, enc: &mut Encoder<'_>) {
        enc.byte_seq(self);
    }
}

impl<T: CodEncode> CodEncode for Vec<T> {
    fn encode(&self, enc: &mut Encoder<'_>) {
        enc.seq(self);
    }
}

impl<T: CodEncode> CodEncode for BTreeMap<String, T> {
    fn encode(&self, enc: &mut Encoder<'_>) {
        enc.map(self);
    }
}
