//! Binary codec for the wire protocol
//!
//! All integers are big-endian, all text is UTF-8. Optional values carry a
//! presence byte (1 = absent), arrays carry a presence byte (1 = empty)
//! followed by a signed count. Reads never go out of bounds and never
//! expose partially decoded values.

use bytes::{BufMut, Bytes, BytesMut};

use super::Vector3;

/// Errors raised while decoding a frame payload
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("read of {needed} bytes at offset {offset} exceeds buffer of {len} bytes")]
    OutOfBounds {
        offset: usize,
        needed: usize,
        len: usize,
    },

    #[error("negative length in buffer: {0}")]
    NegativeLength(i32),

    #[error("invalid UTF-8 in string field")]
    InvalidUtf8,
}

/// Cursor over an immutable frame payload
pub struct BufferReader<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> BufferReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, offset: 0 }
    }

    pub fn has_remaining(&self) -> bool {
        self.offset < self.buf.len()
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.offset
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        if self.offset + len > self.buf.len() {
            return Err(CodecError::OutOfBounds {
                offset: self.offset,
                needed: len,
                len: self.buf.len(),
            });
        }
        let slice = &self.buf[self.offset..self.offset + len];
        self.offset += len;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_i8(&mut self) -> Result<i8, CodecError> {
        Ok(self.take(1)?[0] as i8)
    }

    pub fn read_i16(&mut self) -> Result<i16, CodecError> {
        let b = self.take(2)?;
        Ok(i16::from_be_bytes([b[0], b[1]]))
    }

    pub fn read_u16(&mut self) -> Result<u16, CodecError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn read_i32(&mut self) -> Result<i32, CodecError> {
        let b = self.take(4)?;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_u32(&mut self) -> Result<u32, CodecError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_f32(&mut self) -> Result<f32, CodecError> {
        let b = self.take(4)?;
        Ok(f32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        self.take(len)
    }

    /// Presence byte, then i32 length + UTF-8 payload. `None` is distinct
    /// from an empty string.
    pub fn read_optional_string(&mut self) -> Result<Option<String>, CodecError> {
        if self.read_u8()? == 1 {
            return Ok(None);
        }
        let len = self.read_i32()?;
        if len < 0 {
            return Err(CodecError::NegativeLength(len));
        }
        let raw = self.take(len as usize)?;
        let s = std::str::from_utf8(raw).map_err(|_| CodecError::InvalidUtf8)?;
        Ok(Some(s.to_owned()))
    }

    pub fn read_optional_vector3(&mut self) -> Result<Option<Vector3>, CodecError> {
        if self.read_u8()? == 1 {
            return Ok(None);
        }
        Ok(Some(Vector3 {
            x: self.read_f32()?,
            y: self.read_f32()?,
            z: self.read_f32()?,
        }))
    }

    fn read_count(&mut self) -> Result<Option<usize>, CodecError> {
        if self.read_u8()? == 1 {
            return Ok(None);
        }
        let count = self.read_i32()?;
        if count < 0 {
            return Err(CodecError::NegativeLength(count));
        }
        Ok(Some(count as usize))
    }

    /// Null elements inside the array are skipped, matching the wire
    /// contract for string lists.
    pub fn read_string_array(&mut self) -> Result<Vec<String>, CodecError> {
        let Some(count) = self.read_count()? else {
            return Ok(Vec::new());
        };
        let mut out = Vec::new();
        for _ in 0..count {
            if let Some(s) = self.read_optional_string()? {
                out.push(s);
            }
        }
        Ok(out)
    }

    pub fn read_i16_array(&mut self) -> Result<Vec<i16>, CodecError> {
        let Some(count) = self.read_count()? else {
            return Ok(Vec::new());
        };
        let mut out = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            out.push(self.read_i16()?);
        }
        Ok(out)
    }

    pub fn read_vector3_array(&mut self) -> Result<Vec<Option<Vector3>>, CodecError> {
        let Some(count) = self.read_count()? else {
            return Ok(Vec::new());
        };
        let mut out = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            out.push(self.read_optional_vector3()?);
        }
        Ok(out)
    }
}

/// Append-only writer for outbound frames
#[derive(Default)]
pub struct BufferWriter {
    buf: BytesMut,
}

impl BufferWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(cap),
        }
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    pub fn write_i8(&mut self, v: i8) {
        self.buf.put_i8(v);
    }

    pub fn write_i16(&mut self, v: i16) {
        self.buf.put_i16(v);
    }

    pub fn write_u16(&mut self, v: u16) {
        self.buf.put_u16(v);
    }

    pub fn write_i32(&mut self, v: i32) {
        self.buf.put_i32(v);
    }

    pub fn write_u32(&mut self, v: u32) {
        self.buf.put_u32(v);
    }

    pub fn write_f32(&mut self, v: f32) {
        self.buf.put_f32(v);
    }

    pub fn write_bytes(&mut self, v: &[u8]) {
        self.buf.put_slice(v);
    }

    pub fn write_optional_string(&mut self, v: Option<&str>) {
        match v {
            None => self.buf.put_u8(1),
            Some(s) => {
                self.buf.put_u8(0);
                self.buf.put_i32(s.len() as i32);
                self.buf.put_slice(s.as_bytes());
            }
        }
    }

    pub fn write_optional_vector3(&mut self, v: Option<Vector3>) {
        match v {
            None => self.buf.put_u8(1),
            Some(vec) => {
                self.buf.put_u8(0);
                self.buf.put_f32(vec.x);
                self.buf.put_f32(vec.y);
                self.buf.put_f32(vec.z);
            }
        }
    }

    fn write_count(&mut self, count: usize) -> bool {
        if count == 0 {
            self.buf.put_u8(1);
            return false;
        }
        self.buf.put_u8(0);
        self.buf.put_i32(count as i32);
        true
    }

    pub fn write_string_array(&mut self, items: &[String]) {
        if self.write_count(items.len()) {
            for s in items {
                self.write_optional_string(Some(s));
            }
        }
    }

    pub fn write_i16_array(&mut self, items: &[i16]) {
        if self.write_count(items.len()) {
            for v in items {
                self.buf.put_i16(*v);
            }
        }
    }

    pub fn write_vector3_array(&mut self, items: &[Option<Vector3>]) {
        if self.write_count(items.len()) {
            for v in items {
                self.write_optional_vector3(*v);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_round_trip() {
        let mut w = BufferWriter::new();
        w.write_u8(0xfe);
        w.write_i8(-5);
        w.write_i16(-12345);
        w.write_i32(i32::MIN);
        w.write_i32(0);
        w.write_i32(i32::MAX);
        w.write_f32(3.5);
        let buf = w.freeze();

        let mut r = BufferReader::new(&buf);
        assert_eq!(r.read_u8().unwrap(), 0xfe);
        assert_eq!(r.read_i8().unwrap(), -5);
        assert_eq!(r.read_i16().unwrap(), -12345);
        assert_eq!(r.read_i32().unwrap(), i32::MIN);
        assert_eq!(r.read_i32().unwrap(), 0);
        assert_eq!(r.read_i32().unwrap(), i32::MAX);
        assert_eq!(r.read_f32().unwrap(), 3.5);
        assert!(!r.has_remaining());
    }

    #[test]
    fn null_and_empty_strings_are_distinct() {
        let mut w = BufferWriter::new();
        w.write_optional_string(None);
        w.write_optional_string(Some(""));
        w.write_optional_string(Some("tanker"));
        let buf = w.freeze();

        let mut r = BufferReader::new(&buf);
        assert_eq!(r.read_optional_string().unwrap(), None);
        assert_eq!(r.read_optional_string().unwrap(), Some(String::new()));
        assert_eq!(r.read_optional_string().unwrap(), Some("tanker".into()));
    }

    #[test]
    fn optional_vector3_round_trip() {
        let v = Vector3 {
            x: 1.0,
            y: -250.5,
            z: 200.0,
        };
        let mut w = BufferWriter::new();
        w.write_optional_vector3(Some(v));
        w.write_optional_vector3(None);
        let buf = w.freeze();

        let mut r = BufferReader::new(&buf);
        assert_eq!(r.read_optional_vector3().unwrap(), Some(v));
        assert_eq!(r.read_optional_vector3().unwrap(), None);
    }

    #[test]
    fn empty_array_is_one_byte() {
        let mut w = BufferWriter::new();
        w.write_string_array(&[]);
        let buf = w.freeze();
        assert_eq!(buf.as_ref(), &[1]);

        let mut r = BufferReader::new(&buf);
        assert_eq!(r.read_string_array().unwrap(), Vec::<String>::new());
        assert!(!r.has_remaining());
    }

    #[test]
    fn array_round_trips() {
        let mut w = BufferWriter::new();
        w.write_string_array(&["a".into(), "".into()]);
        w.write_i16_array(&[-1, 0, 32767]);
        w.write_vector3_array(&[
            None,
            Some(Vector3 {
                x: 0.0,
                y: 1.0,
                z: 2.0,
            }),
        ]);
        let buf = w.freeze();

        let mut r = BufferReader::new(&buf);
        assert_eq!(r.read_string_array().unwrap(), vec!["a".to_owned(), String::new()]);
        assert_eq!(r.read_i16_array().unwrap(), vec![-1, 0, 32767]);
        let vecs = r.read_vector3_array().unwrap();
        assert_eq!(vecs.len(), 2);
        assert_eq!(vecs[0], None);
        assert_eq!(
            vecs[1],
            Some(Vector3 {
                x: 0.0,
                y: 1.0,
                z: 2.0
            })
        );
    }

    #[test]
    fn negative_string_length_is_rejected() {
        let mut w = BufferWriter::new();
        w.write_u8(0);
        w.write_i32(-4);
        let buf = w.freeze();

        let mut r = BufferReader::new(&buf);
        assert_eq!(
            r.read_optional_string().unwrap_err(),
            CodecError::NegativeLength(-4)
        );
    }

    #[test]
    fn truncation_at_every_offset_fails_cleanly() {
        let mut w = BufferWriter::new();
        w.write_i32(77);
        w.write_optional_string(Some("hull"));
        w.write_optional_vector3(Some(Vector3 {
            x: 1.0,
            y: 2.0,
            z: 3.0,
        }));
        let full = w.freeze();

        for cut in 0..full.len() {
            let mut r = BufferReader::new(&full[..cut]);
            let result = r
                .read_i32()
                .and_then(|_| r.read_optional_string())
                .and_then(|_| r.read_optional_vector3());
            assert!(result.is_err(), "no error for truncation at {cut}");
        }

        // The untruncated buffer decodes fully.
        let mut r = BufferReader::new(&full);
        r.read_i32().unwrap();
        r.read_optional_string().unwrap();
        r.read_optional_vector3().unwrap();
        assert!(!r.has_remaining());
    }

    #[test]
    fn invalid_utf8_is_rejected() {
        let mut w = BufferWriter::new();
        w.write_u8(0);
        w.write_i32(2);
        w.write_bytes(&[0xff, 0xfe]);
        let buf = w.freeze();

        let mut r = BufferReader::new(&buf);
        assert_eq!(r.read_optional_string().unwrap_err(), CodecError::InvalidUtf8);
    }
}
