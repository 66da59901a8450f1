//! Fixed-size payloads stored next to tuple keys.

use std::fmt;

use crate::primitives::bytes::{TypedReader, TypedWriter};
use crate::types::{Field, InternalPointer, Limits, Result};

/// A payload with a fixed encoded size for a given set of limits.
pub trait Payload: Clone + fmt::Debug + PartialEq + Send + Sync + 'static {
    /// Encoded size in bytes.
    fn encoded_len(limits: &Limits) -> usize;
    /// Writes the payload.
    fn encode<W: TypedWriter + ?Sized>(&self, w: &mut W) -> Result<()>;
    /// Reads a payload written by [`Payload::encode`].
    fn decode<R: TypedReader + ?Sized>(r: &mut R) -> Result<Self>;
}

/// Presence-only tuples.
impl Payload for () {
    fn encoded_len(_: &Limits) -> usize {
        0
    }

    fn encode<W: TypedWriter + ?Sized>(&self, _: &mut W) -> Result<()> {
        Ok(())
    }

    fn decode<R: TypedReader + ?Sized>(_: &mut R) -> Result<Self> {
        Ok(())
    }
}

/// Tuple payload pointing at one event record.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct EventRef(pub InternalPointer);

impl Payload for EventRef {
    fn encoded_len(limits: &Limits) -> usize {
        limits.pointer_size()
    }

    fn encode<W: TypedWriter + ?Sized>(&self, w: &mut W) -> Result<()> {
        w.write_internal_pointer(self.0)
    }

    fn decode<R: TypedReader + ?Sized>(r: &mut R) -> Result<Self> {
        r.read_internal_pointer().map(EventRef)
    }
}

/// Registration of an object: where its registration record lives and its class.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    /// Registration record.
    pub pointer: InternalPointer,
    /// Class of the object.
    pub class_id: u32,
}

impl Payload for ObjectRef {
    fn encoded_len(limits: &Limits) -> usize {
        limits.pointer_size() + limits.bytes(Field::Type)
    }

    fn encode<W: TypedWriter + ?Sized>(&self, w: &mut W) -> Result<()> {
        w.write_internal_pointer(self.pointer)?;
        w.write_field(Field::Type, u64::from(self.class_id))
    }

    fn decode<R: TypedReader + ?Sized>(r: &mut R) -> Result<Self> {
        Ok(Self {
            pointer: r.read_internal_pointer()?,
            class_id: r.read_field(Field::Type)? as u32,
        })
    }
}
