use std::sync::Arc;

use crate::types::{PageId, Result};

/// Decoded contents of one leaf page.
#[derive(Clone, Debug)]
pub struct LeafView<P> {
    /// Page the entries were read from.
    pub page: PageId,
    /// Previous leaf in key order.
    pub prev: Option<PageId>,
    /// Next leaf in key order.
    pub next: Option<PageId>,
    /// `(key, payload)` tuples in key order.
    pub entries: Vec<(u64, P)>,
    /// Number of tuples stored before this page, when the tree tracks it.
    pub base_rank: Option<u64>,
}

impl<P> LeafView<P> {
    /// A view with no neighbors and no entries.
    pub fn detached(page: PageId) -> Self {
        Self {
            page,
            prev: None,
            next: None,
            entries: Vec::new(),
            base_rank: None,
        }
    }
}

/// Something that can decode its leaf pages for a [`TupleIterator`].
pub trait LeafSource<P>: Send + Sync {
    /// Loads and decodes the leaf stored in `page`.
    fn load_leaf(&self, page: PageId) -> Result<LeafView<P>>;
}

/// Bidirectional cursor over the tuples of one index.
///
/// The cursor sits between two tuples: `next` returns the tuple after it and
/// moves forward, `previous` returns the tuple before it and moves back, so a
/// `next` followed by `previous` yields the same tuple twice. Page boundaries
/// are crossed transparently in both directions, and reaching the end of the
/// tail page re-reads it to pick up tuples appended since.
pub struct TupleIterator<P> {
    source: Option<Arc<dyn LeafSource<P>>>,
    leaf: Option<LeafView<P>>,
    index: usize,
}

impl<P: Clone> TupleIterator<P> {
    /// An iterator over nothing.
    pub fn empty() -> Self {
        Self {
            source: None,
            leaf: None,
            index: 0,
        }
    }

    /// Positions a cursor before `entries[index]` of `leaf`.
    pub fn new(source: Arc<dyn LeafSource<P>>, leaf: LeafView<P>, index: usize) -> Self {
        let index = index.min(leaf.entries.len());
        Self {
            source: Some(source),
            leaf: Some(leaf),
            index,
        }
    }

    /// Returns the next tuple and moves past it.
    pub fn next(&mut self) -> Result<Option<(u64, P)>> {
        loop {
            let (Some(source), Some(leaf)) = (self.source.as_ref(), self.leaf.as_ref()) else {
                return Ok(None);
            };
            if let Some(item) = leaf.entries.get(self.index) {
                self.index += 1;
                return Ok(Some(item.clone()));
            }
            match leaf.next {
                Some(next) => {
                    let view = source.load_leaf(next)?;
                    self.leaf = Some(view);
                    self.index = 0;
                }
                None => {
                    let reloaded = source.load_leaf(leaf.page)?;
                    let grown = reloaded.entries.len() > self.index || reloaded.next.is_some();
                    if !grown {
                        return Ok(None);
                    }
                    self.index = self.index.min(reloaded.entries.len());
                    self.leaf = Some(reloaded);
                }
            }
        }
    }

    /// Returns the previous tuple and moves before it.
    pub fn previous(&mut self) -> Result<Option<(u64, P)>> {
        loop {
            let (Some(source), Some(leaf)) = (self.source.as_ref(), self.leaf.as_ref()) else {
                return Ok(None);
            };
            if self.index > 0 {
                self.index -= 1;
                return Ok(leaf.entries.get(self.index).cloned());
            }
            match leaf.prev {
                Some(prev) => {
                    let view = source.load_leaf(prev)?;
                    self.index = view.entries.len();
                    self.leaf = Some(view);
                }
                None => return Ok(None),
            }
        }
    }

    /// Returns the next tuple without moving.
    pub fn peek_next(&mut self) -> Result<Option<(u64, P)>> {
        let item = self.next()?;
        if item.is_some() {
            self.previous()?;
        }
        Ok(item)
    }

    /// Returns the previous tuple without moving.
    pub fn peek_previous(&mut self) -> Result<Option<(u64, P)>> {
        let item = self.previous()?;
        if item.is_some() {
            self.next()?;
        }
        Ok(item)
    }

    /// Number of tuples before the cursor, for trees that track ranks.
    pub fn rank(&self) -> Option<u64> {
        let leaf = self.leaf.as_ref()?;
        leaf.base_rank.map(|base| base + self.index as u64)
    }

    /// Page currently under the cursor.
    pub fn page(&self) -> Option<PageId> {
        self.leaf.as_ref().map(|leaf| leaf.page)
    }
}
