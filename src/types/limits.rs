//! Bit widths of every id space the engine stores.
//!
//! Widths are configuration, not format constants: they are written to the
//! meta page when a file is created and compared against the caller's
//! configuration every time it is opened.

use serde::{Deserialize, Serialize};

use super::{Result, TraceError};

/// A value class whose width is governed by [`Limits`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Field {
    /// Thread id.
    Thread,
    /// Call stack depth.
    Depth,
    /// Probe (location descriptor) id.
    Probe,
    /// Behavior (method or constructor) id.
    Behavior,
    /// Field id.
    FieldId,
    /// Local variable id.
    Variable,
    /// Advice source id.
    Advice,
    /// Type or class id.
    Type,
    /// Array index.
    ArrayIndex,
    /// Event timestamp.
    Timestamp,
    /// Running tuple counts stored in tree pages.
    TupleCount,
    /// Storage node id.
    Node,
    /// Page id.
    Page,
    /// Slot index within an event page.
    Slot,
}

impl Field {
    /// Every field, in the order their widths are persisted.
    pub const ALL: [Field; 14] = [
        Field::Thread,
        Field::Depth,
        Field::Probe,
        Field::Behavior,
        Field::FieldId,
        Field::Variable,
        Field::Advice,
        Field::Type,
        Field::ArrayIndex,
        Field::Timestamp,
        Field::TupleCount,
        Field::Node,
        Field::Page,
        Field::Slot,
    ];

    /// Stable name used in errors and logs.
    pub const fn name(self) -> &'static str {
        match self {
            Field::Thread => "thread",
            Field::Depth => "depth",
            Field::Probe => "probe",
            Field::Behavior => "behavior",
            Field::FieldId => "field",
            Field::Variable => "variable",
            Field::Advice => "advice",
            Field::Type => "type",
            Field::ArrayIndex => "array_index",
            Field::Timestamp => "timestamp",
            Field::TupleCount => "tuple_count",
            Field::Node => "node",
            Field::Page => "page",
            Field::Slot => "slot",
        }
    }
}

/// Per-attribute id-space widths, in bits.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Thread id width.
    pub thread_bits: u8,
    /// Stack depth width.
    pub depth_bits: u8,
    /// Probe id width.
    pub probe_bits: u8,
    /// Behavior id width.
    pub behavior_bits: u8,
    /// Field id width.
    pub field_bits: u8,
    /// Variable id width.
    pub variable_bits: u8,
    /// Advice source id width.
    pub advice_bits: u8,
    /// Type id width.
    pub type_bits: u8,
    /// Array index width.
    pub array_index_bits: u8,
    /// Timestamp width.
    pub timestamp_bits: u8,
    /// Tuple count width.
    pub tuple_count_bits: u8,
    /// Node component of an internal pointer.
    pub node_bits: u8,
    /// Page component of an internal pointer, also bounds page pointers.
    pub page_bits: u8,
    /// Slot component of an internal pointer.
    pub slot_bits: u8,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            thread_bits: 16,
            depth_bits: 16,
            probe_bits: 32,
            behavior_bits: 24,
            field_bits: 24,
            variable_bits: 16,
            advice_bits: 16,
            type_bits: 24,
            array_index_bits: 32,
            timestamp_bits: 64,
            tuple_count_bits: 48,
            node_bits: 8,
            page_bits: 40,
            slot_bits: 16,
        }
    }
}

pub(crate) fn mask(bits: u8) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

impl Limits {
    /// Width of `field` in bits.
    pub fn bits(&self, field: Field) -> u8 {
        match field {
            Field::Thread => self.thread_bits,
            Field::Depth => self.depth_bits,
            Field::Probe => self.probe_bits,
            Field::Behavior => self.behavior_bits,
            Field::FieldId => self.field_bits,
            Field::Variable => self.variable_bits,
            Field::Advice => self.advice_bits,
            Field::Type => self.type_bits,
            Field::ArrayIndex => self.array_index_bits,
            Field::Timestamp => self.timestamp_bits,
            Field::TupleCount => self.tuple_count_bits,
            Field::Node => self.node_bits,
            Field::Page => self.page_bits,
            Field::Slot => self.slot_bits,
        }
    }

    /// Number of bytes a value of `field` occupies on a page.
    pub fn bytes(&self, field: Field) -> usize {
        (usize::from(self.bits(field)) + 7) / 8
    }

    /// Returns `value` unchanged if it fits in the width of `field`.
    pub fn check(&self, field: Field, value: u64) -> Result<u64> {
        let bits = self.bits(field);
        if value & !mask(bits) != 0 {
            return Err(TraceError::EncodingOverflow {
                field: field.name(),
                value,
                bits,
            });
        }
        Ok(value)
    }

    /// Bytes taken by an encoded page pointer.
    pub fn page_pointer_size(&self) -> usize {
        self.bytes(Field::Page)
    }

    /// Total width of a packed internal pointer.
    pub fn pointer_bits(&self) -> u8 {
        self.node_bits + self.page_bits + self.slot_bits
    }

    /// Bytes taken by an encoded internal pointer.
    pub fn pointer_size(&self) -> usize {
        (usize::from(self.pointer_bits()) + 7) / 8
    }

    /// Rejects widths that cannot be encoded.
    pub fn validate(&self) -> Result<()> {
        for field in Field::ALL {
            let bits = self.bits(field);
            if bits == 0 || bits > 64 {
                return Err(TraceError::Invalid("limit width must be within 1..=64 bits"));
            }
        }
        if u32::from(self.node_bits) + u32::from(self.page_bits) + u32::from(self.slot_bits) > 64 {
            return Err(TraceError::Invalid("internal pointer wider than 64 bits"));
        }
        Ok(())
    }

    /// Widths in persisted order.
    pub fn to_bytes(&self) -> [u8; Field::ALL.len()] {
        let mut out = [0u8; Field::ALL.len()];
        for (slot, field) in out.iter_mut().zip(Field::ALL) {
            *slot = self.bits(field);
        }
        out
    }

    /// Compares persisted widths against `self`.
    pub fn ensure_matches(&self, stored: &[u8]) -> Result<()> {
        if stored.len() != Field::ALL.len() {
            return Err(TraceError::Corruption("limits block has wrong length"));
        }
        for (field, &bits) in Field::ALL.iter().zip(stored) {
            let configured = self.bits(*field);
            if configured != bits {
                return Err(TraceError::ConfigMismatch {
                    field: field.name(),
                    stored: u64::from(bits),
                    configured: u64::from(configured),
                });
            }
        }
        Ok(())
    }

    /// Sets the thread id width.
    pub fn with_thread_bits(mut self, bits: u8) -> Self {
        self.thread_bits = bits;
        self
    }

    /// Sets the behavior id width.
    pub fn with_behavior_bits(mut self, bits: u8) -> Self {
        self.behavior_bits = bits;
        self
    }

    /// Sets the field id width.
    pub fn with_field_bits(mut self, bits: u8) -> Self {
        self.field_bits = bits;
        self
    }

    /// Sets the page pointer width.
    pub fn with_page_bits(mut self, bits: u8) -> Self {
        self.page_bits = bits;
        self
    }

    /// Sets the slot width.
    pub fn with_slot_bits(mut self, bits: u8) -> Self {
        self.slot_bits = bits;
        self
    }

    /// Sets the node width.
    pub fn with_node_bits(mut self, bits: u8) -> Self {
        self.node_bits = bits;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_accepts_boundary_and_rejects_next() {
        let limits = Limits::default().with_thread_bits(10);
        assert_eq!(limits.check(Field::Thread, 1023).unwrap(), 1023);
        assert!(limits.check(Field::Thread, 1024).is_err());
        assert_eq!(limits.bytes(Field::Thread), 2);
    }

    #[test]
    fn validate_rejects_wide_pointer() {
        let limits = Limits::default().with_page_bits(48);
        assert!(limits.validate().is_err());
        assert!(Limits::default().validate().is_ok());
    }

    #[test]
    fn mismatch_names_field() {
        let stored = Limits::default().to_bytes();
        let configured = Limits::default().with_behavior_bits(20);
        match configured.ensure_matches(&stored) {
            Err(TraceError::ConfigMismatch { field, stored, configured }) => {
                assert_eq!(field, "behavior");
                assert_eq!(stored, 24);
                assert_eq!(configured, 20);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
