//! Event records and their byte codec.
//!
//! Every record starts with the same header:
//!
//! | field            | width                       |
//! |------------------|-----------------------------|
//! | kind             | 1 byte                      |
//! | thread           | `Limits::thread_bits`       |
//! | depth            | `Limits::depth_bits`        |
//! | timestamp        | `Limits::timestamp_bits`    |
//! | advice cflow     | 1 byte count + advice ids   |
//! | probe            | `Limits::probe_bits`        |
//! | parent timestamp | `Limits::timestamp_bits`    |
//!
//! The kind byte selects a decoder from [`DECODERS`] for the payload that
//! follows.

use core::convert::TryFrom;

use serde::{Deserialize, Serialize};

use crate::primitives::bytes::{ByteBuf, ByteReader, TypedReader, TypedWriter};
use crate::types::{ExternalPointer, Field, Limits, ObjectId, ObjectValue, Result, TraceError};

/// Discriminant of a record payload.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum RecordKind {
    /// Call of a regular method.
    MethodCall = 1,
    /// Constructor call through `new`.
    Instantiation = 2,
    /// Call of a super constructor or method.
    SuperCall = 3,
    /// Return or throw out of a behavior.
    BehaviorExit = 4,
    /// Write to an object or static field.
    FieldWrite = 5,
    /// Write to an array slot.
    ArrayWrite = 6,
    /// Array allocation.
    NewArray = 7,
    /// Write to a local variable.
    VariableWrite = 8,
    /// Type test.
    InstanceOf = 9,
    /// Exception raised.
    Exception = 10,
    /// Text written to a standard stream.
    Output = 11,
    /// Object registration (class and serialized state).
    Registration = 12,
}

impl RecordKind {
    /// Every kind in discriminant order.
    pub const ALL: [RecordKind; 12] = [
        RecordKind::MethodCall,
        RecordKind::Instantiation,
        RecordKind::SuperCall,
        RecordKind::BehaviorExit,
        RecordKind::FieldWrite,
        RecordKind::ArrayWrite,
        RecordKind::NewArray,
        RecordKind::VariableWrite,
        RecordKind::InstanceOf,
        RecordKind::Exception,
        RecordKind::Output,
        RecordKind::Registration,
    ];

    /// Raw discriminant.
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Lower-case name used by the command line.
    pub const fn name(self) -> &'static str {
        match self {
            RecordKind::MethodCall => "method-call",
            RecordKind::Instantiation => "instantiation",
            RecordKind::SuperCall => "super-call",
            RecordKind::BehaviorExit => "behavior-exit",
            RecordKind::FieldWrite => "field-write",
            RecordKind::ArrayWrite => "array-write",
            RecordKind::NewArray => "new-array",
            RecordKind::VariableWrite => "variable-write",
            RecordKind::InstanceOf => "instance-of",
            RecordKind::Exception => "exception",
            RecordKind::Output => "output",
            RecordKind::Registration => "registration",
        }
    }

    /// True for the three call kinds.
    pub const fn is_call(self) -> bool {
        matches!(
            self,
            RecordKind::MethodCall | RecordKind::Instantiation | RecordKind::SuperCall
        )
    }
}

impl TryFrom<u8> for RecordKind {
    type Error = TraceError;

    fn try_from(value: u8) -> Result<Self> {
        value
            .checked_sub(1)
            .and_then(|i| RecordKind::ALL.get(i as usize).copied())
            .ok_or(TraceError::Corruption("unknown record kind"))
    }
}

/// Fields common to every record.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordHeader {
    /// Thread that produced the event.
    pub thread: u32,
    /// Call stack depth.
    pub depth: u32,
    /// Event timestamp.
    pub timestamp: u64,
    /// Advice sources whose control flow the event is in.
    pub advice_cflow: Vec<u32>,
    /// Location descriptor.
    pub probe: u32,
    /// Timestamp of the enclosing call.
    pub parent_timestamp: u64,
}

/// Payload of the three call kinds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BehaviorCall {
    /// Argument values.
    pub arguments: Vec<ObjectValue>,
    /// Behavior named at the call site.
    pub called: Option<u32>,
    /// Behavior that actually ran.
    pub executed: Option<u32>,
    /// Whether the caller is instrumented.
    pub direct_parent: bool,
    /// Receiver.
    pub target: ObjectValue,
}

/// Standard stream an output record was written to.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum OutputStream {
    /// Standard output.
    Out = 0,
    /// Standard error.
    Err = 1,
}

/// Kind-specific part of a record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum RecordPayload {
    /// See [`RecordKind::MethodCall`].
    MethodCall(BehaviorCall),
    /// See [`RecordKind::Instantiation`].
    Instantiation(BehaviorCall),
    /// See [`RecordKind::SuperCall`].
    SuperCall(BehaviorCall),
    /// See [`RecordKind::BehaviorExit`].
    BehaviorExit {
        /// Behavior being left.
        behavior: u32,
        /// True when left by an exception.
        has_thrown: bool,
        /// Returned value or thrown exception.
        result: ObjectValue,
    },
    /// See [`RecordKind::FieldWrite`].
    FieldWrite {
        /// Field written.
        field: u32,
        /// Owner of the field, null for statics.
        target: ObjectValue,
        /// Written value.
        value: ObjectValue,
    },
    /// See [`RecordKind::ArrayWrite`].
    ArrayWrite {
        /// Array written.
        target: ObjectValue,
        /// Slot written.
        index: u32,
        /// Written value.
        value: ObjectValue,
    },
    /// See [`RecordKind::NewArray`].
    NewArray {
        /// The new array.
        target: ObjectValue,
        /// Element type.
        base_type: u32,
        /// Length.
        size: u32,
    },
    /// See [`RecordKind::VariableWrite`].
    VariableWrite {
        /// Local variable slot.
        variable: u32,
        /// Written value.
        value: ObjectValue,
    },
    /// See [`RecordKind::InstanceOf`].
    InstanceOf {
        /// Tested value.
        object: ObjectValue,
        /// Type tested against.
        type_id: u32,
        /// Outcome.
        passed: bool,
    },
    /// See [`RecordKind::Exception`].
    Exception {
        /// Behavior the exception was raised in.
        behavior: u32,
        /// The exception object.
        exception: ObjectValue,
    },
    /// See [`RecordKind::Output`].
    Output {
        /// Stream written to.
        stream: OutputStream,
        /// Text written.
        text: String,
    },
    /// See [`RecordKind::Registration`].
    Registration {
        /// Object being registered.
        object: ObjectId,
        /// Its class.
        class_id: u32,
        /// Serialized state.
        data: Vec<u8>,
    },
}

impl RecordPayload {
    /// Discriminant of this payload.
    pub fn kind(&self) -> RecordKind {
        match self {
            RecordPayload::MethodCall(_) => RecordKind::MethodCall,
            RecordPayload::Instantiation(_) => RecordKind::Instantiation,
            RecordPayload::SuperCall(_) => RecordKind::SuperCall,
            RecordPayload::BehaviorExit { .. } => RecordKind::BehaviorExit,
            RecordPayload::FieldWrite { .. } => RecordKind::FieldWrite,
            RecordPayload::ArrayWrite { .. } => RecordKind::ArrayWrite,
            RecordPayload::NewArray { .. } => RecordKind::NewArray,
            RecordPayload::VariableWrite { .. } => RecordKind::VariableWrite,
            RecordPayload::InstanceOf { .. } => RecordKind::InstanceOf,
            RecordPayload::Exception { .. } => RecordKind::Exception,
            RecordPayload::Output { .. } => RecordKind::Output,
            RecordPayload::Registration { .. } => RecordKind::Registration,
        }
    }

    /// Call details for the three call kinds.
    pub fn call(&self) -> Option<&BehaviorCall> {
        match self {
            RecordPayload::MethodCall(call)
            | RecordPayload::Instantiation(call)
            | RecordPayload::SuperCall(call) => Some(call),
            _ => None,
        }
    }
}

/// One traced occurrence: header plus payload. Immutable once appended.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Common fields.
    pub header: RecordHeader,
    /// Kind-specific fields.
    pub payload: RecordPayload,
}

impl EventRecord {
    /// Builds a record.
    pub fn new(header: RecordHeader, payload: RecordPayload) -> Self {
        Self { header, payload }
    }

    /// Payload discriminant.
    pub fn kind(&self) -> RecordKind {
        self.payload.kind()
    }

    /// Event timestamp.
    pub fn timestamp(&self) -> u64 {
        self.header.timestamp
    }

    /// Identity of the record above the storage layer.
    pub fn external_pointer(&self) -> ExternalPointer {
        ExternalPointer {
            thread: self.header.thread,
            timestamp: self.header.timestamp,
        }
    }

    /// Appends the encoded record to `w`.
    pub fn encode<W: TypedWriter + ?Sized>(&self, w: &mut W) -> Result<()> {
        let h = &self.header;
        w.write_u8(self.kind().as_u8())?;
        w.write_thread_id(h.thread)?;
        w.write_depth(h.depth)?;
        w.write_timestamp(h.timestamp)?;
        write_count(w, "advice cflow count", h.advice_cflow.len())?;
        for advice in &h.advice_cflow {
            w.write_field(Field::Advice, u64::from(*advice))?;
        }
        w.write_probe_id(h.probe)?;
        w.write_timestamp(h.parent_timestamp)?;
        encode_payload(w, &self.payload)
    }

    /// Encodes into a fresh buffer.
    pub fn to_bytes(&self, limits: &Limits) -> Result<Vec<u8>> {
        let mut buf = ByteBuf::with_capacity(*limits, 64);
        self.encode(&mut buf)?;
        Ok(buf.into_vec())
    }

    /// Decodes a record written by [`EventRecord::encode`].
    pub fn decode(r: &mut ByteReader<'_>) -> Result<Self> {
        let kind = RecordKind::try_from(r.read_u8()?)?;
        let thread = r.read_thread_id()?;
        let depth = r.read_depth()?;
        let timestamp = r.read_timestamp()?;
        let count = r.read_u8()?;
        let advice_cflow = (0..count)
            .map(|_| r.read_field(Field::Advice).map(|v| v as u32))
            .collect::<Result<Vec<_>>>()?;
        let probe = r.read_probe_id()?;
        let parent_timestamp = r.read_timestamp()?;
        let decode = DECODERS[(kind.as_u8() - 1) as usize];
        let payload = decode(r)?;
        Ok(Self {
            header: RecordHeader {
                thread,
                depth,
                timestamp,
                advice_cflow,
                probe,
                parent_timestamp,
            },
            payload,
        })
    }

    /// Decodes a record occupying all of `bytes`.
    pub fn from_bytes(limits: &Limits, bytes: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(*limits, bytes);
        let record = Self::decode(&mut r)?;
        if r.remaining() != 0 {
            return Err(TraceError::Corruption("trailing bytes after record"));
        }
        Ok(record)
    }

    /// Reads only the kind byte and timestamp of an encoded record.
    pub fn peek_timestamp(limits: &Limits, bytes: &[u8]) -> Result<(RecordKind, u32, u64)> {
        let mut r = ByteReader::new(*limits, bytes);
        let kind = RecordKind::try_from(r.read_u8()?)?;
        let thread = r.read_thread_id()?;
        r.read_depth()?;
        Ok((kind, thread, r.read_timestamp()?))
    }
}

fn write_count<W: TypedWriter + ?Sized>(w: &mut W, field: &'static str, len: usize) -> Result<()> {
    let count = u8::try_from(len).map_err(|_| TraceError::EncodingOverflow {
        field,
        value: len as u64,
        bits: 8,
    })?;
    w.write_u8(count)
}

fn write_blob<W: TypedWriter + ?Sized>(w: &mut W, field: &'static str, bytes: &[u8]) -> Result<()> {
    let len = u16::try_from(bytes.len()).map_err(|_| TraceError::EncodingOverflow {
        field,
        value: bytes.len() as u64,
        bits: 16,
    })?;
    w.write_u16(len)?;
    w.put_bytes(bytes)
}

fn read_blob(r: &mut ByteReader<'_>) -> Result<Vec<u8>> {
    let len = r.read_u16()? as usize;
    let mut out = vec![0u8; len];
    r.take_bytes(&mut out)?;
    Ok(out)
}

const CALLED: u8 = 0b001;
const EXECUTED: u8 = 0b010;
const DIRECT_PARENT: u8 = 0b100;

fn encode_call<W: TypedWriter + ?Sized>(w: &mut W, call: &BehaviorCall) -> Result<()> {
    write_count(w, "argument count", call.arguments.len())?;
    for arg in &call.arguments {
        w.write_object(arg)?;
    }
    let mut flags = 0u8;
    if call.called.is_some() {
        flags |= CALLED;
    }
    if call.executed.is_some() {
        flags |= EXECUTED;
    }
    if call.direct_parent {
        flags |= DIRECT_PARENT;
    }
    w.write_u8(flags)?;
    if let Some(called) = call.called {
        w.write_behavior_id(called)?;
    }
    if let Some(executed) = call.executed {
        w.write_behavior_id(executed)?;
    }
    w.write_object(&call.target)
}

fn encode_payload<W: TypedWriter + ?Sized>(w: &mut W, payload: &RecordPayload) -> Result<()> {
    match payload {
        RecordPayload::MethodCall(call)
        | RecordPayload::Instantiation(call)
        | RecordPayload::SuperCall(call) => encode_call(w, call),
        RecordPayload::BehaviorExit {
            behavior,
            has_thrown,
            result,
        } => {
            w.write_behavior_id(*behavior)?;
            w.write_bool(*has_thrown)?;
            w.write_object(result)
        }
        RecordPayload::FieldWrite {
            field,
            target,
            value,
        } => {
            w.write_field(Field::FieldId, u64::from(*field))?;
            w.write_object(target)?;
            w.write_object(value)
        }
        RecordPayload::ArrayWrite {
            target,
            index,
            value,
        } => {
            w.write_object(target)?;
            w.write_field(Field::ArrayIndex, u64::from(*index))?;
            w.write_object(value)
        }
        RecordPayload::NewArray {
            target,
            base_type,
            size,
        } => {
            w.write_object(target)?;
            w.write_field(Field::Type, u64::from(*base_type))?;
            w.write_u32(*size)
        }
        RecordPayload::VariableWrite { variable, value } => {
            w.write_field(Field::Variable, u64::from(*variable))?;
            w.write_object(value)
        }
        RecordPayload::InstanceOf {
            object,
            type_id,
            passed,
        } => {
            w.write_object(object)?;
            w.write_field(Field::Type, u64::from(*type_id))?;
            w.write_bool(*passed)
        }
        RecordPayload::Exception {
            behavior,
            exception,
        } => {
            w.write_behavior_id(*behavior)?;
            w.write_object(exception)
        }
        RecordPayload::Output { stream, text } => {
            w.write_u8(*stream as u8)?;
            write_blob(w, "output length", text.as_bytes())
        }
        RecordPayload::Registration {
            object,
            class_id,
            data,
        } => {
            if object.0 == 0 {
                return Err(TraceError::Invalid("object id 0 is reserved"));
            }
            w.write_u64(object.0)?;
            w.write_field(Field::Type, u64::from(*class_id))?;
            write_blob(w, "registration length", data)
        }
    }
}

type Decoder = fn(&mut ByteReader<'_>) -> Result<RecordPayload>;

/// Payload decoders indexed by `kind - 1`.
const DECODERS: [Decoder; 12] = [
    decode_method_call,
    decode_instantiation,
    decode_super_call,
    decode_behavior_exit,
    decode_field_write,
    decode_array_write,
    decode_new_array,
    decode_variable_write,
    decode_instance_of,
    decode_exception,
    decode_output,
    decode_registration,
];

fn decode_call(r: &mut ByteReader<'_>) -> Result<BehaviorCall> {
    let count = r.read_u8()?;
    let arguments = (0..count)
        .map(|_| r.read_object())
        .collect::<Result<Vec<_>>>()?;
    let flags = r.read_u8()?;
    let called = if flags & CALLED != 0 {
        Some(r.read_behavior_id()?)
    } else {
        None
    };
    let executed = if flags & EXECUTED != 0 {
        Some(r.read_behavior_id()?)
    } else {
        None
    };
    Ok(BehaviorCall {
        arguments,
        called,
        executed,
        direct_parent: flags & DIRECT_PARENT != 0,
        target: r.read_object()?,
    })
}

fn decode_method_call(r: &mut ByteReader<'_>) -> Result<RecordPayload> {
    decode_call(r).map(RecordPayload::MethodCall)
}

fn decode_instantiation(r: &mut ByteReader<'_>) -> Result<RecordPayload> {
    decode_call(r).map(RecordPayload::Instantiation)
}

fn decode_super_call(r: &mut ByteReader<'_>) -> Result<RecordPayload> {
    decode_call(r).map(RecordPayload::SuperCall)
}

fn decode_behavior_exit(r: &mut ByteReader<'_>) -> Result<RecordPayload> {
    Ok(RecordPayload::BehaviorExit {
        behavior: r.read_behavior_id()?,
        has_thrown: r.read_bool()?,
        result: r.read_object()?,
    })
}

fn decode_field_write(r: &mut ByteReader<'_>) -> Result<RecordPayload> {
    Ok(RecordPayload::FieldWrite {
        field: r.read_field(Field::FieldId)? as u32,
        target: r.read_object()?,
        value: r.read_object()?,
    })
}

fn decode_array_write(r: &mut ByteReader<'_>) -> Result<RecordPayload> {
    Ok(RecordPayload::ArrayWrite {
        target: r.read_object()?,
        index: r.read_field(Field::ArrayIndex)? as u32,
        value: r.read_object()?,
    })
}

fn decode_new_array(r: &mut ByteReader<'_>) -> Result<RecordPayload> {
    Ok(RecordPayload::NewArray {
        target: r.read_object()?,
        base_type: r.read_field(Field::Type)? as u32,
        size: r.read_u32()?,
    })
}

fn decode_variable_write(r: &mut ByteReader<'_>) -> Result<RecordPayload> {
    Ok(RecordPayload::VariableWrite {
        variable: r.read_field(Field::Variable)? as u32,
        value: r.read_object()?,
    })
}

fn decode_instance_of(r: &mut ByteReader<'_>) -> Result<RecordPayload> {
    Ok(RecordPayload::InstanceOf {
        object: r.read_object()?,
        type_id: r.read_field(Field::Type)? as u32,
        passed: r.read_bool()?,
    })
}

fn decode_exception(r: &mut ByteReader<'_>) -> Result<RecordPayload> {
    Ok(RecordPayload::Exception {
        behavior: r.read_behavior_id()?,
        exception: r.read_object()?,
    })
}

fn decode_output(r: &mut ByteReader<'_>) -> Result<RecordPayload> {
    let stream = match r.read_u8()? {
        0 => OutputStream::Out,
        1 => OutputStream::Err,
        _ => return Err(TraceError::Corruption("unknown output stream")),
    };
    let text = String::from_utf8(read_blob(r)?)
        .map_err(|_| TraceError::Corruption("output text is not UTF-8"))?;
    Ok(RecordPayload::Output { stream, text })
}

fn decode_registration(r: &mut ByteReader<'_>) -> Result<RecordPayload> {
    let object = r.read_u64()?;
    if object == 0 {
        return Err(TraceError::Corruption("registration of object 0"));
    }
    Ok(RecordPayload::Registration {
        object: ObjectId(object),
        class_id: r.read_field(Field::Type)? as u32,
        data: read_blob(r)?,
    })
}
