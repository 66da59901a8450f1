use crate::primitives::bytes::{TypedReader, TypedWriter};
use crate::types::{Limits, PageId, Result, TraceError};

use super::Page;

/// Typed cursor over one cached page.
///
/// Every primitive takes the page lock only for the bytes it touches, so a
/// reader can follow a writer through the tail page of a chain.
#[derive(Clone, Debug)]
pub struct PageIOStream {
    page: Page,
    limits: Limits,
    pos: usize,
    end: usize,
}

impl PageIOStream {
    /// Cursor at the start of `page`.
    pub fn new(page: Page, limits: Limits) -> Self {
        Self::at(page, limits, 0)
    }

    /// Cursor at byte offset `pos` of `page`.
    pub fn at(page: Page, limits: Limits, pos: usize) -> Self {
        let end = page.len();
        Self {
            page,
            limits,
            pos,
            end,
        }
    }

    /// Page under the cursor.
    pub fn page(&self) -> &Page {
        &self.page
    }

    /// Id of the page under the cursor.
    pub fn page_id(&self) -> PageId {
        self.page.id()
    }

    /// Current byte offset.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Moves to an absolute byte offset.
    pub fn set_position(&mut self, pos: usize) {
        self.pos = pos;
    }

    /// Bytes between the cursor and the end of the page.
    pub fn remaining(&self) -> usize {
        self.end.saturating_sub(self.pos)
    }

    /// Advances without reading.
    pub fn skip(&mut self, n: usize) -> Result<()> {
        if n > self.remaining() {
            return Err(TraceError::Corruption("skip past end of page"));
        }
        self.pos += n;
        Ok(())
    }

    fn span(&self, len: usize) -> Option<(usize, usize)> {
        let end = self.pos.checked_add(len)?;
        (end <= self.end).then_some((self.pos, end))
    }
}

impl TypedWriter for PageIOStream {
    fn limits(&self) -> &Limits {
        &self.limits
    }

    fn put_bytes(&mut self, src: &[u8]) -> Result<()> {
        let (start, end) = self
            .span(src.len())
            .ok_or(TraceError::Invalid("write past end of page"))?;
        self.page.write(|buf| buf[start..end].copy_from_slice(src));
        self.pos = end;
        Ok(())
    }
}

impl TypedReader for PageIOStream {
    fn limits(&self) -> &Limits {
        &self.limits
    }

    fn take_bytes(&mut self, dst: &mut [u8]) -> Result<()> {
        let (start, end) = self
            .span(dst.len())
            .ok_or(TraceError::Corruption("read past end of page"))?;
        self.page.read(|buf| dst.copy_from_slice(&buf[start..end]));
        self.pos = end;
        Ok(())
    }
}
