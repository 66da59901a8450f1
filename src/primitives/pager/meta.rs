use crate::primitives::io::FileIo;
use crate::types::{
    page::{self, PageKind},
    page_crc32, Limits, PageId, Result, TraceError,
};
use rand::{rngs::OsRng, RngCore};
use std::convert::{TryFrom, TryInto};
use std::ops::Range;

const META_MAGIC: Range<usize> = 0..4;
const META_FORMAT_VERSION: Range<usize> = 4..6;
const META_KIND: usize = 6;
const META_RESERVED: usize = 7;
const META_PAGE_SIZE: Range<usize> = 8..12;
const META_SALT: Range<usize> = 12..20;
const META_NEXT_PAGE: Range<usize> = 20..28;
const META_DIRECTORY_ROOT: Range<usize> = 28..36;
const META_NODE_ID: Range<usize> = 36..40;
const META_LIMITS: Range<usize> = 40..54;
const META_CRC32: Range<usize> = 60..64;

/// Bytes of page 0 that carry metadata; the rest of the page is zero.
pub const META_LEN: usize = 64;

/// Contents of page 0.
#[derive(Clone, Debug, PartialEq)]
pub struct Meta {
    /// Size of every page in bytes.
    pub page_size: u32,
    /// Random salt mixed into the meta checksum.
    pub salt: u64,
    /// Format revision the file was written with.
    pub format_version: u16,
    /// Next page id to hand out.
    pub next_page: PageId,
    /// Head of the directory blob chain, if one was written.
    pub directory_root: Option<PageId>,
    /// Storage node that owns the file.
    pub node_id: u32,
    /// Persisted limit widths, in `Field::ALL` order.
    pub limits: [u8; 14],
}

impl Meta {
    /// Fresh metadata for a new file.
    pub fn new(page_size: u32, limits: &Limits, node_id: u32) -> Result<Self> {
        if !(page::MIN_PAGE_SIZE..=page::MAX_PAGE_SIZE).contains(&page_size) {
            return Err(TraceError::Invalid("page size out of supported range"));
        }
        Ok(Self {
            page_size,
            salt: OsRng.next_u64(),
            format_version: page::PAGE_FORMAT_VERSION,
            next_page: PageId(1),
            directory_root: None,
            node_id,
            limits: limits.to_bytes(),
        })
    }

    /// Serializes into the first [`META_LEN`] bytes of `dst`, checksum included.
    pub fn encode(&self, dst: &mut [u8]) -> Result<()> {
        if dst.len() < META_LEN {
            return Err(TraceError::Invalid("meta buffer too small"));
        }
        let buf = &mut dst[..META_LEN];
        buf.fill(0);
        buf[META_MAGIC].copy_from_slice(&page::PAGE_MAGIC);
        buf[META_FORMAT_VERSION].copy_from_slice(&self.format_version.to_be_bytes());
        buf[META_KIND] = PageKind::Meta.as_u8();
        buf[META_RESERVED] = 0;
        buf[META_PAGE_SIZE].copy_from_slice(&self.page_size.to_be_bytes());
        buf[META_SALT].copy_from_slice(&self.salt.to_be_bytes());
        buf[META_NEXT_PAGE].copy_from_slice(&self.next_page.0.to_be_bytes());
        let root = self.directory_root.map(|p| p.0 + 1).unwrap_or(0);
        buf[META_DIRECTORY_ROOT].copy_from_slice(&root.to_be_bytes());
        buf[META_NODE_ID].copy_from_slice(&self.node_id.to_be_bytes());
        buf[META_LIMITS].copy_from_slice(&self.limits);
        let crc = page_crc32(0, self.salt, &buf[..META_CRC32.start]);
        buf[META_CRC32].copy_from_slice(&crc.to_be_bytes());
        Ok(())
    }

    /// Parses and verifies the meta block.
    pub fn decode(src: &[u8]) -> Result<Self> {
        if src.len() < META_LEN {
            return Err(TraceError::Corruption("meta page truncated"));
        }
        let buf = &src[..META_LEN];
        if buf[META_MAGIC] != page::PAGE_MAGIC {
            return Err(TraceError::Corruption("invalid meta magic"));
        }
        let format_version = u16::from_be_bytes(be(&buf[META_FORMAT_VERSION])?);
        if format_version != page::PAGE_FORMAT_VERSION {
            return Err(TraceError::Corruption("unsupported format version"));
        }
        if PageKind::try_from(buf[META_KIND])? != PageKind::Meta {
            return Err(TraceError::Corruption("unexpected page kind"));
        }
        if buf[META_RESERVED] != 0 {
            return Err(TraceError::Corruption("meta reserved byte not zero"));
        }
        let salt = u64::from_be_bytes(be(&buf[META_SALT])?);
        let stored_crc = u32::from_be_bytes(be(&buf[META_CRC32])?);
        if page_crc32(0, salt, &buf[..META_CRC32.start]) != stored_crc {
            return Err(TraceError::Corruption("meta checksum mismatch"));
        }
        let root = u64::from_be_bytes(be(&buf[META_DIRECTORY_ROOT])?);
        Ok(Self {
            page_size: u32::from_be_bytes(be(&buf[META_PAGE_SIZE])?),
            salt,
            format_version,
            next_page: PageId(u64::from_be_bytes(be(&buf[META_NEXT_PAGE])?)),
            directory_root: root.checked_sub(1).map(PageId),
            node_id: u32::from_be_bytes(be(&buf[META_NODE_ID])?),
            limits: be(&buf[META_LIMITS])?,
        })
    }

    /// Writes page 0 in full.
    pub fn store(&self, io: &dyn FileIo) -> Result<()> {
        let mut page = vec![0u8; self.page_size as usize];
        self.encode(&mut page)?;
        io.write_at(0, &page)
    }

    /// Reads the meta block from page 0.
    pub fn load(io: &dyn FileIo) -> Result<Self> {
        let mut buf = [0u8; META_LEN];
        io.read_at(0, &mut buf)?;
        Self::decode(&buf)
    }
}

fn be<const N: usize>(src: &[u8]) -> Result<[u8; N]> {
    src.try_into()
        .map_err(|_| TraceError::Corruption("meta field has wrong width"))
}
