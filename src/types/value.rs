//! Tagged values carried inside event records.

use serde::{Deserialize, Serialize};

/// Identity of a traced heap object. Zero is reserved for "no object".
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct ObjectId(pub u64);

/// A value observed by the instrumentation: a primitive or an object reference.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ObjectValue {
    /// Java-style null.
    Null,
    /// Reference to an object registered elsewhere.
    Object(ObjectId),
    /// 64-bit signed integer.
    Long(i64),
    /// 32-bit signed integer.
    Int(i32),
    /// UTF-16 code unit.
    Char(u16),
    /// 16-bit signed integer.
    Short(i16),
    /// 8-bit signed integer.
    Byte(i8),
    /// Boolean.
    Boolean(bool),
    /// 32-bit float.
    Float(f32),
    /// 64-bit float.
    Double(f64),
}

impl ObjectValue {
    /// Tag byte written ahead of the value.
    pub const fn tag(&self) -> u8 {
        match self {
            ObjectValue::Null => 0,
            ObjectValue::Object(_) => 1,
            ObjectValue::Long(_) => 2,
            ObjectValue::Int(_) => 3,
            ObjectValue::Char(_) => 4,
            ObjectValue::Short(_) => 5,
            ObjectValue::Byte(_) => 6,
            ObjectValue::Boolean(_) => 7,
            ObjectValue::Float(_) => 8,
            ObjectValue::Double(_) => 9,
        }
    }

    /// Payload size in bytes, excluding the tag.
    pub const fn payload_len(&self) -> usize {
        match self {
            ObjectValue::Null => 0,
            ObjectValue::Object(_) | ObjectValue::Long(_) | ObjectValue::Double(_) => 8,
            ObjectValue::Int(_) | ObjectValue::Float(_) => 4,
            ObjectValue::Char(_) | ObjectValue::Short(_) => 2,
            ObjectValue::Byte(_) | ObjectValue::Boolean(_) => 1,
        }
    }

    /// Object id when the value is a reference.
    pub fn object_id(&self) -> Option<ObjectId> {
        match self {
            ObjectValue::Object(id) => Some(*id),
            _ => None,
        }
    }
}
