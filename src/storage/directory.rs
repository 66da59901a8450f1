//! Page chain holding one checksummed blob: the serialized roots of every
//! structure in the file.
//!
//! Each page is `kind | next page pointer | used (u16) | data`. The data of
//! all pages concatenated is `len (u32) | crc32 (u32) | blob`. Rewriting the
//! blob reuses the existing chain and only allocates when it grows; pages past
//! the end of a shorter blob stay linked with `used = 0`.

use tracing::debug;

use crate::primitives::bytes::{ByteReader, TypedReader, TypedWriter};
use crate::primitives::pager::{Page, PageIOStream, PagedFile};
use crate::types::page::{expect_kind, PageKind};
use crate::types::{PageId, Result, TraceError};

const BLOB_HEADER: usize = 8;

fn header_len(pager: &PagedFile) -> usize {
    1 + pager.limits().page_pointer_size() + 2
}

fn read_header(pager: &PagedFile, page: &Page) -> Result<(Option<PageId>, usize)> {
    let limits = *pager.limits();
    page.read(|buf| {
        expect_kind(buf, PageKind::Directory)?;
        let mut r = ByteReader::new(limits, buf);
        r.skip(1)?;
        let next = r.read_page_pointer()?;
        let used = r.read_u16()? as usize;
        Ok((next, used))
    })
}

fn chain(pager: &PagedFile, root: Option<PageId>) -> Result<Vec<Page>> {
    let mut pages = Vec::new();
    let mut next = root;
    while let Some(id) = next {
        if pages.len() as u64 > pager.page_count() {
            return Err(TraceError::Corruption("directory chain loops"));
        }
        let page = pager.get(id)?;
        next = read_header(pager, &page)?.0;
        pages.push(page);
    }
    Ok(pages)
}

/// Writes `blob` into the chain starting at `root`, extending it as needed.
/// Returns the head of the chain.
pub fn store_blob(pager: &PagedFile, root: Option<PageId>, blob: &[u8]) -> Result<PageId> {
    let len = u32::try_from(blob.len()).map_err(|_| TraceError::EncodingOverflow {
        field: "directory length",
        value: blob.len() as u64,
        bits: 32,
    })?;
    let mut data = Vec::with_capacity(BLOB_HEADER + blob.len());
    data.extend_from_slice(&len.to_be_bytes());
    data.extend_from_slice(&crc32fast::hash(blob).to_be_bytes());
    data.extend_from_slice(blob);

    let limits = *pager.limits();
    let header = header_len(pager);
    let room = pager.page_size() - header;
    let needed = data.len().div_ceil(room).max(1);
    let mut pages = chain(pager, root)?;
    while pages.len() < needed {
        let page = pager.allocate(PageKind::Directory)?;
        if let Some(last) = pages.last() {
            PageIOStream::at(last.clone(), limits, 1).write_page_pointer(Some(page.id()))?;
        }
        pages.push(page);
    }

    let mut chunks = data.chunks(room);
    for page in &pages {
        let chunk = chunks.next().unwrap_or(&[]);
        let mut w = PageIOStream::at(page.clone(), limits, 1 + limits.page_pointer_size());
        w.write_u16(chunk.len() as u16)?;
        w.put_bytes(chunk)?;
    }
    debug!(
        target: "tracedb::db",
        bytes = blob.len(),
        pages = pages.len(),
        "stored directory"
    );
    pages
        .first()
        .map(Page::id)
        .ok_or(TraceError::Corruption("directory chain is empty"))
}

/// Reads the blob stored at `root`, verifying its checksum.
pub fn load_blob(pager: &PagedFile, root: PageId) -> Result<Vec<u8>> {
    let header = header_len(pager);
    let mut data = Vec::new();
    for page in chain(pager, Some(root))? {
        let (_, used) = read_header(pager, &page)?;
        if header + used > page.len() {
            return Err(TraceError::Corruption("directory page overfull"));
        }
        page.read(|buf| data.extend_from_slice(&buf[header..header + used]));
    }
    if data.len() < BLOB_HEADER {
        return Err(TraceError::Corruption("directory truncated"));
    }
    let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
    let crc = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
    let blob = data
        .get(BLOB_HEADER..BLOB_HEADER + len)
        .ok_or(TraceError::Corruption("directory truncated"))?;
    if crc32fast::hash(blob) != crc {
        return Err(TraceError::Corruption("directory checksum mismatch"));
    }
    Ok(blob.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::io::MemFileIo;
    use crate::primitives::pager::PagerOptions;
    use std::sync::Arc;

    fn pager() -> Result<PagedFile> {
        PagedFile::create(Arc::new(MemFileIo::new()), PagerOptions::default().page_size(256))
    }

    #[test]
    fn blob_spans_pages_and_shrinks_in_place() -> Result<()> {
        let pager = pager()?;
        let big: Vec<u8> = (0..2000u32).map(|i| (i % 251) as u8).collect();
        let root = store_blob(&pager, None, &big)?;
        assert_eq!(load_blob(&pager, root)?, big);
        let pages = pager.page_count();

        let root2 = store_blob(&pager, Some(root), b"small")?;
        assert_eq!(root2, root);
        assert_eq!(pager.page_count(), pages);
        assert_eq!(load_blob(&pager, root)?, b"small");
        Ok(())
    }

    #[test]
    fn flipped_byte_fails_the_checksum() -> Result<()> {
        let pager = pager()?;
        let root = store_blob(&pager, None, b"{\"roots\":[]}")?;
        let page = pager.get(root)?;
        let at = header_len(&pager) + BLOB_HEADER + 2;
        page.write(|buf| buf[at] ^= 0xff);
        assert!(matches!(
            load_blob(&pager, root),
            Err(TraceError::Corruption("directory checksum mismatch"))
        ));
        Ok(())
    }
}
