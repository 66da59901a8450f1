//! Page kinds and sizing constants shared by every paged structure.

use core::convert::TryFrom;

use super::{Result, TraceError};

/// Magic bytes at the start of the meta page.
pub const PAGE_MAGIC: [u8; 4] = *b"TRDB";
/// On-disk format revision.
pub const PAGE_FORMAT_VERSION: u16 = 1;
/// Page size used when the configuration does not say otherwise.
pub const DEFAULT_PAGE_SIZE: u32 = 4096;
/// Smallest supported page size.
pub const MIN_PAGE_SIZE: u32 = 256;
/// Largest supported page size; record length prefixes are 16 bits.
pub const MAX_PAGE_SIZE: u32 = 65536;
/// Offset of the kind byte every data page starts with.
pub const KIND_OFFSET: usize = 0;

/// Discriminates what a page holds.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PageKind {
    /// Page 0.
    Meta = 1,
    /// Event log records.
    EventLog = 2,
    /// Leaf of an append-mostly sequence tree.
    SequenceLeaf = 3,
    /// Internal level of an append-mostly sequence tree.
    SequenceInternal = 4,
    /// Leaf of a general insertable tree.
    DeltaLeaf = 5,
    /// Internal node of a general insertable tree.
    DeltaInternal = 6,
    /// Bitmap leaf of an open/close sequence.
    BitLeaf = 7,
    /// Range-min-max summary page.
    BitSummary = 8,
    /// Directory blob chain.
    Directory = 9,
}

impl PageKind {
    /// Raw discriminant.
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for PageKind {
    type Error = TraceError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(PageKind::Meta),
            2 => Ok(PageKind::EventLog),
            3 => Ok(PageKind::SequenceLeaf),
            4 => Ok(PageKind::SequenceInternal),
            5 => Ok(PageKind::DeltaLeaf),
            6 => Ok(PageKind::DeltaInternal),
            7 => Ok(PageKind::BitLeaf),
            8 => Ok(PageKind::BitSummary),
            9 => Ok(PageKind::Directory),
            _ => Err(TraceError::Corruption("unknown page kind")),
        }
    }
}

/// Verifies the kind byte of a data page.
pub fn expect_kind(buf: &[u8], kind: PageKind) -> Result<()> {
    let found = buf
        .get(KIND_OFFSET)
        .copied()
        .ok_or(TraceError::Corruption("page truncated"))?;
    if PageKind::try_from(found)? != kind {
        return Err(TraceError::Corruption("unexpected page kind"));
    }
    Ok(())
}
