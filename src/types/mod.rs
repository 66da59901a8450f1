#![forbid(unsafe_code)]
//! Identifiers, the crate error type and shared on-disk constants.

use std::fmt;

use serde::{Deserialize, Serialize};

pub mod checksum;
pub mod limits;
pub mod page;
pub mod value;

pub use checksum::page_crc32;
pub use limits::{Field, Limits};
pub use value::{ObjectId, ObjectValue};

/// Identifier of a fixed-size page in the backing file.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct PageId(pub u64);

/// Packed `(node, page, slot)` address of one event record.
///
/// The bit layout is `node | page | slot` from the most significant end, with
/// widths taken from [`Limits`]. Within one node, pointers issued later compare
/// greater, so sorting by pointer reproduces append order.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct InternalPointer(pub u64);

/// Stable `(thread, timestamp)` identity of an event.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct ExternalPointer {
    /// Thread that produced the event.
    pub thread: u32,
    /// Event timestamp.
    pub timestamp: u64,
}

impl InternalPointer {
    /// Packs the three components, checking each against its configured width.
    pub fn pack(node: u32, page: PageId, slot: u32, limits: &Limits) -> Result<Self> {
        let node = limits.check(Field::Node, u64::from(node))?;
        let page = limits.check(Field::Page, page.0)?;
        let slot = limits.check(Field::Slot, u64::from(slot))?;
        let slot_bits = u32::from(limits.slot_bits);
        let page_bits = u32::from(limits.page_bits);
        let raw = shl(node, page_bits + slot_bits) | shl(page, slot_bits) | slot;
        Ok(Self(raw))
    }

    /// Splits the pointer back into `(node, page, slot)`.
    pub fn unpack(self, limits: &Limits) -> (u32, PageId, u32) {
        let slot_bits = u32::from(limits.slot_bits);
        let page_bits = u32::from(limits.page_bits);
        let slot = self.0 & limits::mask(limits.slot_bits);
        let page = shr(self.0, slot_bits) & limits::mask(limits.page_bits);
        let node = shr(self.0, slot_bits + page_bits) & limits::mask(limits.node_bits);
        (node as u32, PageId(page), slot as u32)
    }

    /// Node component.
    pub fn node(self, limits: &Limits) -> u32 {
        self.unpack(limits).0
    }

    /// Page component.
    pub fn page(self, limits: &Limits) -> PageId {
        self.unpack(limits).1
    }

    /// Slot component.
    pub fn slot(self, limits: &Limits) -> u32 {
        self.unpack(limits).2
    }
}

fn shl(v: u64, by: u32) -> u64 {
    v.checked_shl(by).unwrap_or(0)
}

fn shr(v: u64, by: u32) -> u64 {
    v.checked_shr(by).unwrap_or(0)
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for InternalPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::Display for ExternalPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.thread, self.timestamp)
    }
}

/// Errors raised by the storage and query engine.
#[derive(thiserror::Error, Debug)]
pub enum TraceError {
    /// Underlying file I/O failed.
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    /// A value does not fit in the bit width configured for its field.
    #[error("encoding overflow: {field} value {value} exceeds {bits} bits")]
    EncodingOverflow {
        /// Name of the field being written.
        field: &'static str,
        /// Offending value.
        value: u64,
        /// Configured width.
        bits: u8,
    },
    /// An internal pointer does not resolve to a stored record.
    #[error("record not found: {0}")]
    RecordNotFound(InternalPointer),
    /// An event arrived too late for the reordering window.
    #[error("ordering violation: dropped {dropped} after releasing {last_released}")]
    OrderingViolation {
        /// Timestamp most recently released by the buffer.
        last_released: u64,
        /// Timestamp of the dropped event.
        dropped: u64,
    },
    /// An append-only structure received a key below its last key.
    #[error("key {key} is below last appended key {last}")]
    KeyOrder {
        /// Last key already stored.
        last: u64,
        /// Rejected key.
        key: u64,
    },
    /// Stored bytes could not be decoded.
    #[error("corruption: {0}")]
    Corruption(&'static str),
    /// The caller passed an argument the engine cannot honor.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// The file was written with settings that differ from the configuration.
    #[error("configuration mismatch on {field}: stored {stored}, configured {configured}")]
    ConfigMismatch {
        /// Setting that differs.
        field: &'static str,
        /// Value found in the file.
        stored: u64,
        /// Value requested by the caller.
        configured: u64,
    },
    /// A configuration file could not be parsed.
    #[error("config: {0}")]
    Config(String),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, TraceError>;
