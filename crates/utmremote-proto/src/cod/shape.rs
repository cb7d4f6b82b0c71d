//! The per-document shape dictionary.
//!
//! A shape is a sequence of distinct field names in canonical (ASCII
//! ascending) order; keyed containers reference shapes by index. Shapes are
//! document-local: the encoder interns them on a single pass through the
//! value tree, the decoder reads the whole table up front, and indices never
//! persist across documents.

use std::collections::HashMap;

use super::error::CodError;
use super::wire::{write_uleb128, Input};

/// Encoder-side shape table with lookup-or-insert interning.
#[derive(Default)]
pub(crate) struct ShapeTable {
    shapes: Vec<Vec<String>>,
    index: HashMap<Vec<String>, u64>,
}

impl ShapeTable {
    /// Index of the shape with exactly these names, inserting it on first
    /// occurrence. `names` must already be in canonical order.
    pub(crate) fn intern(&mut self, names: &[&str]) -> u64 {
        debug_assert!(names.windows(2).all(|w| w[0] < w[1]), "shape not canonical");
        let key: Vec<String> = names.iter().map(|n| (*n).to_owned()).collect();
        if let Some(id) = self.index.get(&key) {
            return *id;
        }
        let id = self.shapes.len() as u64;
        self.shapes.push(key.clone());
        self.index.insert(key, id);
        id
    }

    /// Serialize the table header: shape count, then each shape as a
    /// field count followed by length-prefixed UTF-8 names.
    pub(crate) fn write(&self, out: &mut Vec<u8>) {
        write_uleb128(out, self.shapes.len() as u64);
        for shape in &self.shapes {
            write_uleb128(out, shape.len() as u64);
            for name in shape {
                write_uleb128(out, name.len() as u64);
                out.extend_from_slice(name.as_bytes());
            }
        }
    }
}

/// Decoder-side shape table, parsed in full before the root value.
pub(crate) struct Shapes<'a> {
    shapes: Vec<Vec<&'a str>>,
}

impl<'a> Shapes<'a> {
    pub(crate) fn parse(input: &mut Input<'a>) -> Result<Self, CodError> {
        let count = input.uleb128()?;
        let mut shapes = Vec::new();
        for _ in 0..count {
            let field_count = input.uleb128()?;
            let mut shape = Vec::new();
            for _ in 0..field_count {
                let len = usize::try_from(input.uleb128()?)
                    .map_err(|_| CodError::IntegerOverflow)?;
                let name = std::str::from_utf8(input.take(len)?)
                    .map_err(|_| CodError::InvalidUtf8)?;
                if shape.contains(&name) {
                    return Err(CodError::DuplicateShapeKey { key: name.to_owned() });
                }
                shape.push(name);
            }
            shapes.push(shape);
        }
        Ok(Self { shapes })
    }

    /// The shape at `id`, or `UnknownShape` if the table is shorter.
    pub(crate) fn get(&self, id: u64) -> Result<&[&'a str], CodError> {
        usize::try_from(id)
            .ok()
            .and_then(|id| self.shapes.get(id))
            .map(Vec::as_slice)
            .ok_or(CodError::UnknownShape { id, count: self.shapes.len() })
    }

    /// Number of shapes declared by the document.
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.shapes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_deduplicates() {
        let mut table = ShapeTable::default();
        assert_eq!(table.intern(&["id", "name"]), 0);
        assert_eq!(table.intern(&["state"]), 1);
        assert_eq!(table.intern(&["id", "name"]), 0);
        assert_eq!(table.intern(&[]), 2);
    }

    #[test]
    fn write_parse_round_trip() {
        let mut table = ShapeTable::default();
        table.intern(&["id", "name"]);
        table.intern(&[]);
        let mut buf = Vec::new();
        table.write(&mut buf);

        let mut input = Input::new(&buf);
        let shapes = Shapes::parse(&mut input).unwrap();
        assert_eq!(shapes.len(), 2);
        assert_eq!(shapes.get(0).unwrap(), ["id", "name"]);
        assert!(shapes.get(1).unwrap().is_empty());
        assert!(matches!(shapes.get(2), Err(CodError::UnknownShape { id: 2, count: 2 })));
        assert_eq!(input.remaining(), 0);
    }

    #[test]
    fn duplicate_keys_rejected() {
        // One shape with two identical single-byte names.
        let buf = [0x01, 0x02, 0x01, b'a', 0x01, b'a'];
        let mut input = Input::new(&buf);
        assert!(matches!(
            Shapes::parse(&mut input),
            Err(CodError::DuplicateShapeKey { .. })
        ));
    }
}
