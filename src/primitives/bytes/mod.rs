#![forbid(unsafe_code)]
//! Typed field codecs shared by page cursors and record buffers.
//!
//! [`TypedWriter`] and [`TypedReader`] provide the width-checked primitives
//! (thread ids, timestamps, page pointers, tagged values, ...) on top of two
//! required methods, so the same encoding logic serves an in-memory buffer and
//! a cursor positioned inside a cached page.

use crate::types::{
    Field, InternalPointer, Limits, ObjectId, ObjectValue, PageId, Result, TraceError,
};

/// Sink for width-checked fields.
pub trait TypedWriter {
    /// Widths governing id fields.
    fn limits(&self) -> &Limits;

    /// Appends raw bytes at the current position.
    fn put_bytes(&mut self, src: &[u8]) -> Result<()>;

    /// Writes one byte.
    fn write_u8(&mut self, v: u8) -> Result<()> {
        self.put_bytes(&[v])
    }

    /// Writes a boolean as one byte.
    fn write_bool(&mut self, v: bool) -> Result<()> {
        self.write_u8(u8::from(v))
    }

    /// Writes a big-endian u16.
    fn write_u16(&mut self, v: u16) -> Result<()> {
        self.put_bytes(&v.to_be_bytes())
    }

    /// Writes a big-endian u32.
    fn write_u32(&mut self, v: u32) -> Result<()> {
        self.put_bytes(&v.to_be_bytes())
    }

    /// Writes a big-endian i32.
    fn write_i32(&mut self, v: i32) -> Result<()> {
        self.put_bytes(&v.to_be_bytes())
    }

    /// Writes a big-endian u64.
    fn write_u64(&mut self, v: u64) -> Result<()> {
        self.put_bytes(&v.to_be_bytes())
    }

    /// Writes the low `width` bytes of `v`, big-endian.
    fn write_uint(&mut self, v: u64, width: usize) -> Result<()> {
        let bytes = v.to_be_bytes();
        self.put_bytes(&bytes[8 - width.min(8)..])
    }

    /// Writes `v` using the configured width of `field`.
    fn write_field(&mut self, field: Field, v: u64) -> Result<()> {
        let limits = *self.limits();
        let v = limits.check(field, v)?;
        self.write_uint(v, limits.bytes(field))
    }

    /// Writes a thread id.
    fn write_thread_id(&mut self, v: u32) -> Result<()> {
        self.write_field(Field::Thread, u64::from(v))
    }

    /// Writes a stack depth.
    fn write_depth(&mut self, v: u32) -> Result<()> {
        self.write_field(Field::Depth, u64::from(v))
    }

    /// Writes a probe id.
    fn write_probe_id(&mut self, v: u32) -> Result<()> {
        self.write_field(Field::Probe, u64::from(v))
    }

    /// Writes a behavior id.
    fn write_behavior_id(&mut self, v: u32) -> Result<()> {
        self.write_field(Field::Behavior, u64::from(v))
    }

    /// Writes a timestamp.
    fn write_timestamp(&mut self, v: u64) -> Result<()> {
        self.write_field(Field::Timestamp, v)
    }

    /// Writes a running tuple count.
    fn write_tuple_count(&mut self, v: u64) -> Result<()> {
        self.write_field(Field::TupleCount, v)
    }

    /// Writes an optional page reference: 0 for none, `id + 1` otherwise.
    fn write_page_pointer(&mut self, page: Option<PageId>) -> Result<()> {
        let raw = match page {
            None => 0,
            Some(id) => id
                .0
                .checked_add(1)
                .ok_or(TraceError::Invalid("page id overflow"))?,
        };
        let limits = *self.limits();
        let raw = limits.check(Field::Page, raw)?;
        self.write_uint(raw, limits.page_pointer_size())
    }

    /// Writes a packed internal pointer.
    fn write_internal_pointer(&mut self, ptr: InternalPointer) -> Result<()> {
        let width = self.limits().pointer_size();
        self.write_uint(ptr.0, width)
    }

    /// Writes a tag byte followed by the value payload.
    fn write_object(&mut self, value: &ObjectValue) -> Result<()> {
        self.write_u8(value.tag())?;
        match value {
            ObjectValue::Null => Ok(()),
            ObjectValue::Object(id) => {
                if id.0 == 0 {
                    return Err(TraceError::Invalid("object id 0 is reserved"));
                }
                self.write_u64(id.0)
            }
            ObjectValue::Long(v) => self.put_bytes(&v.to_be_bytes()),
            ObjectValue::Int(v) => self.put_bytes(&v.to_be_bytes()),
            ObjectValue::Char(v) => self.write_u16(*v),
            ObjectValue::Short(v) => self.put_bytes(&v.to_be_bytes()),
            ObjectValue::Byte(v) => self.put_bytes(&v.to_be_bytes()),
            ObjectValue::Boolean(v) => self.write_bool(*v),
            ObjectValue::Float(v) => self.put_bytes(&v.to_bits().to_be_bytes()),
            ObjectValue::Double(v) => self.put_bytes(&v.to_bits().to_be_bytes()),
        }
    }
}

/// Source of width-checked fields.
pub trait TypedReader {
    /// Widths governing id fields.
    fn limits(&self) -> &Limits;

    /// Fills `dst` from the current position.
    fn take_bytes(&mut self, dst: &mut [u8]) -> Result<()>;

    /// Reads one byte.
    fn read_u8(&mut self) -> Result<u8> {
        let mut b = [0u8; 1];
        self.take_bytes(&mut b)?;
        Ok(b[0])
    }

    /// Reads a boolean.
    fn read_bool(&mut self) -> Result<bool> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(TraceError::Corruption("invalid boolean byte")),
        }
    }

    /// Reads a big-endian u16.
    fn read_u16(&mut self) -> Result<u16> {
        let mut b = [0u8; 2];
        self.take_bytes(&mut b)?;
        Ok(u16::from_be_bytes(b))
    }

    /// Reads a big-endian u32.
    fn read_u32(&mut self) -> Result<u32> {
        let mut b = [0u8; 4];
        self.take_bytes(&mut b)?;
        Ok(u32::from_be_bytes(b))
    }

    /// Reads a big-endian i32.
    fn read_i32(&mut self) -> Result<i32> {
        let mut b = [0u8; 4];
        self.take_bytes(&mut b)?;
        Ok(i32::from_be_bytes(b))
    }

    /// Reads a big-endian u64.
    fn read_u64(&mut self) -> Result<u64> {
        let mut b = [0u8; 8];
        self.take_bytes(&mut b)?;
        Ok(u64::from_be_bytes(b))
    }

    /// Reads `width` big-endian bytes into a u64.
    fn read_uint(&mut self, width: usize) -> Result<u64> {
        let width = width.min(8);
        let mut b = [0u8; 8];
        self.take_bytes(&mut b[8 - width..])?;
        Ok(u64::from_be_bytes(b))
    }

    /// Reads a value stored with the configured width of `field`.
    fn read_field(&mut self, field: Field) -> Result<u64> {
        let width = self.limits().bytes(field);
        self.read_uint(width)
    }

    /// Reads a thread id.
    fn read_thread_id(&mut self) -> Result<u32> {
        Ok(self.read_field(Field::Thread)? as u32)
    }

    /// Reads a stack depth.
    fn read_depth(&mut self) -> Result<u32> {
        Ok(self.read_field(Field::Depth)? as u32)
    }

    /// Reads a probe id.
    fn read_probe_id(&mut self) -> Result<u32> {
        Ok(self.read_field(Field::Probe)? as u32)
    }

    /// Reads a behavior id.
    fn read_behavior_id(&mut self) -> Result<u32> {
        Ok(self.read_field(Field::Behavior)? as u32)
    }

    /// Reads a timestamp.
    fn read_timestamp(&mut self) -> Result<u64> {
        self.read_field(Field::Timestamp)
    }

    /// Reads a running tuple count.
    fn read_tuple_count(&mut self) -> Result<u64> {
        self.read_field(Field::TupleCount)
    }

    /// Reads an optional page reference.
    fn read_page_pointer(&mut self) -> Result<Option<PageId>> {
        let width = self.limits().page_pointer_size();
        match self.read_uint(width)? {
            0 => Ok(None),
            raw => Ok(Some(PageId(raw - 1))),
        }
    }

    /// Reads a packed internal pointer.
    fn read_internal_pointer(&mut self) -> Result<InternalPointer> {
        let width = self.limits().pointer_size();
        Ok(InternalPointer(self.read_uint(width)?))
    }

    /// Reads a tagged value.
    fn read_object(&mut self) -> Result<ObjectValue> {
        let value = match self.read_u8()? {
            0 => ObjectValue::Null,
            1 => {
                let id = self.read_u64()?;
                if id == 0 {
                    return Err(TraceError::Corruption("object reference with id 0"));
                }
                ObjectValue::Object(ObjectId(id))
            }
            2 => ObjectValue::Long(self.read_u64()? as i64),
            3 => ObjectValue::Int(self.read_i32()?),
            4 => ObjectValue::Char(self.read_u16()?),
            5 => ObjectValue::Short(self.read_u16()? as i16),
            6 => ObjectValue::Byte(self.read_u8()? as i8),
            7 => ObjectValue::Boolean(self.read_bool()?),
            8 => ObjectValue::Float(f32::from_bits(self.read_u32()?)),
            9 => ObjectValue::Double(f64::from_bits(self.read_u64()?)),
            _ => return Err(TraceError::Corruption("unknown value tag")),
        };
        Ok(value)
    }
}

/// Growable in-memory writer, used to size a record before it is placed on a page.
#[derive(Debug, Clone)]
pub struct ByteBuf {
    limits: Limits,
    buf: Vec<u8>,
}

impl ByteBuf {
    /// Creates an empty buffer.
    pub fn new(limits: Limits) -> Self {
        Self {
            limits,
            buf: Vec::new(),
        }
    }

    /// Creates an empty buffer with room for `cap` bytes.
    pub fn with_capacity(limits: Limits, cap: usize) -> Self {
        Self {
            limits,
            buf: Vec::with_capacity(cap),
        }
    }

    /// Bytes written so far.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Number of bytes written.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// True when nothing was written.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Resets the buffer, keeping its allocation.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Consumes the buffer.
    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }
}

impl TypedWriter for ByteBuf {
    fn limits(&self) -> &Limits {
        &self.limits
    }

    fn put_bytes(&mut self, src: &[u8]) -> Result<()> {
        self.buf.extend_from_slice(src);
        Ok(())
    }
}

/// Reader over a borrowed byte slice.
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    limits: Limits,
    src: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    /// Reads `src` from the start.
    pub fn new(limits: Limits, src: &'a [u8]) -> Self {
        Self { limits, src, pos: 0 }
    }

    /// Current offset.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Moves to an absolute offset.
    pub fn seek(&mut self, pos: usize) {
        self.pos = pos;
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        self.src.len().saturating_sub(self.pos)
    }

    /// Advances without decoding.
    pub fn skip(&mut self, n: usize) -> Result<()> {
        if n > self.remaining() {
            return Err(TraceError::Corruption("skip past end of buffer"));
        }
        self.pos += n;
        Ok(())
    }
}

impl TypedReader for ByteReader<'_> {
    fn limits(&self) -> &Limits {
        &self.limits
    }

    fn take_bytes(&mut self, dst: &mut [u8]) -> Result<()> {
        let end = self
            .pos
            .checked_add(dst.len())
            .filter(|end| *end <= self.src.len())
            .ok_or(TraceError::Corruption("read past end of buffer"))?;
        dst.copy_from_slice(&self.src[self.pos..end]);
        self.pos = end;
        Ok(())
    }
}

pub mod keycode {
    //! Delta codes for non-decreasing keys stored back to back on a page.
    //!
    //! | first byte  | meaning                                  | size |
    //! |-------------|------------------------------------------|------|
    //! | `0x00`      | end of page                              | 1    |
    //! | `1xxxxxxx`  | delta below `0x7f`                       | 1    |
    //! | `001xxxxx`  | 21-bit delta, low 16 bits follow         | 3    |
    //! | `010xxxxx`  | 37-bit delta, low 32 bits follow         | 5    |
    //! | `0x60`      | absolute key follows                     | 9    |

    use super::{TypedReader, TypedWriter};
    use crate::types::{Result, TraceError};

    /// End-of-page marker.
    pub const END: u8 = 0;
    /// Largest encoded size of one key.
    pub const MAX_LEN: usize = 9;

    const ONE_BYTE_LIMIT: u64 = 0x7f;
    const THREE_BYTE_LIMIT: u64 = 0x1f_ffff;
    const FIVE_BYTE_LIMIT: u64 = 0x1f_ffff_ffff;

    /// Encoded size of `key` following `prev`.
    pub fn encoded_len(prev: u64, key: u64) -> usize {
        match key.checked_sub(prev) {
            Some(d) if d < ONE_BYTE_LIMIT => 1,
            Some(d) if d < THREE_BYTE_LIMIT => 3,
            Some(d) if d < FIVE_BYTE_LIMIT => 5,
            _ => MAX_LEN,
        }
    }

    /// Writes `key` relative to `prev`.
    pub fn write<W: TypedWriter + ?Sized>(w: &mut W, prev: u64, key: u64) -> Result<()> {
        let delta = key
            .checked_sub(prev)
            .ok_or(TraceError::KeyOrder { last: prev, key })?;
        if delta < ONE_BYTE_LIMIT {
            w.write_u8(delta as u8 | 0x80)
        } else if delta < THREE_BYTE_LIMIT {
            w.write_u8(((delta >> 16) as u8) | 0x20)?;
            w.write_u16(delta as u16)
        } else if delta < FIVE_BYTE_LIMIT {
            w.write_u8(((delta >> 32) as u8) | 0x40)?;
            w.write_u32(delta as u32)
        } else {
            w.write_u8(0x60)?;
            w.write_u64(key)
        }
    }

    /// Reads the next key, or `None` at an end-of-page marker.
    pub fn read<R: TypedReader + ?Sized>(r: &mut R, prev: u64) -> Result<Option<u64>> {
        let head = r.read_u8()?;
        if head == END {
            return Ok(None);
        }
        let delta = if head & 0x80 != 0 {
            u64::from(head & 0x7f)
        } else {
            match head & 0xe0 {
                0x20 => (u64::from(head & 0x1f) << 16) | u64::from(r.read_u16()?),
                0x40 => (u64::from(head & 0x1f) << 32) | u64::from(r.read_u32()?),
                0x60 if head == 0x60 => return r.read_u64().map(Some),
                _ => return Err(TraceError::Corruption("invalid key code")),
            }
        };
        prev.checked_add(delta)
            .map(Some)
            .ok_or(TraceError::Corruption("key delta overflows"))
    }
}
