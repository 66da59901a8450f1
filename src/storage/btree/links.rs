//! Header shared by every linked tree page: kind byte, previous and next page.

use crate::primitives::bytes::TypedReader;
use crate::primitives::pager::{Page, PageIOStream};
use crate::primitives::bytes::TypedWriter;
use crate::types::{Limits, PageId, Result};

pub(crate) const PREV_OFFSET: usize = 1;

pub(crate) fn next_offset(limits: &Limits) -> usize {
    PREV_OFFSET + limits.page_pointer_size()
}

/// Bytes taken by the kind byte and both sibling pointers.
pub(crate) fn links_len(limits: &Limits) -> usize {
    PREV_OFFSET + 2 * limits.page_pointer_size()
}

pub(crate) fn set_prev(page: &Page, limits: &Limits, prev: Option<PageId>) -> Result<()> {
    PageIOStream::at(page.clone(), *limits, PREV_OFFSET).write_page_pointer(prev)
}

pub(crate) fn set_next(page: &Page, limits: &Limits, next: Option<PageId>) -> Result<()> {
    PageIOStream::at(page.clone(), *limits, next_offset(limits)).write_page_pointer(next)
}

/// Reads both sibling pointers; `r` must sit right after the kind byte.
pub(crate) fn read_links<R: TypedReader + ?Sized>(
    r: &mut R,
) -> Result<(Option<PageId>, Option<PageId>)> {
    let prev = r.read_page_pointer()?;
    let next = r.read_page_pointer()?;
    Ok((prev, next))
}

/// Copies a pre-encoded entry into `page` under a single lock.
pub(crate) fn put_entry(page: &Page, pos: usize, bytes: &[u8]) {
    page.write(|buf| buf[pos..pos + bytes.len()].copy_from_slice(bytes));
}
