//! General insertable tree with delta-compressed keys.
//!
//! Unlike [`SequenceTree`](super::SequenceTree) this tree accepts keys in any
//! order. Nodes are decoded, edited and re-encoded whole; a node that no longer
//! fits is split in half and the right half is announced to its parent.
//!
//! Leaf layout: kind, previous leaf, next leaf, `u16` entry count, then
//! `keycode + payload` entries where each key is coded against the previous
//! one (the first against zero). Internal pages use the same header with
//! `keycode + child page pointer` entries, the key being a lower bound of the
//! keys below the child. The first entry always carries the smallest key of
//! the whole subtree.

use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::cursor::{LeafSource, LeafView, TupleIterator};
use super::links;
use super::payload::Payload;
use super::stats::BTreeStats;
use super::TupleIndex;
use crate::primitives::bytes::{keycode, ByteBuf, ByteReader, TypedReader, TypedWriter};
use crate::primitives::pager::{Page, PagedFile};
use crate::types::page::{expect_kind, PageKind};
use crate::types::{Limits, PageId, Result, TraceError};

/// Persisted form of a [`DeltaTree`].
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeltaRoot {
    /// Root page.
    pub root: Option<u64>,
    /// Levels including the leaves.
    pub height: u32,
    /// Number of tuples.
    pub len: u64,
    /// Smallest key.
    pub first_key: Option<u64>,
    /// Largest key.
    pub last_key: Option<u64>,
}

#[derive(Default)]
struct DeltaState {
    root: Option<PageId>,
    height: u32,
    len: u64,
    first_key: Option<u64>,
    last_key: Option<u64>,
}

struct Node<T> {
    prev: Option<PageId>,
    next: Option<PageId>,
    entries: Vec<(u64, T)>,
}

struct DeltaPages<P> {
    pager: Arc<PagedFile>,
    limits: Limits,
    stats: Arc<BTreeStats>,
    _payload: PhantomData<fn() -> P>,
}

impl<P: Payload> DeltaPages<P> {
    fn count_offset(&self) -> usize {
        links::links_len(&self.limits)
    }

    fn entries_offset(&self) -> usize {
        self.count_offset() + 2
    }

    fn decode<T>(
        &self,
        page: &Page,
        kind: PageKind,
        mut value: impl FnMut(&mut ByteReader<'_>) -> Result<T>,
    ) -> Result<Node<T>> {
        page.read(|buf| {
            expect_kind(buf, kind)?;
            let mut r = ByteReader::new(self.limits, buf);
            r.skip(links::PREV_OFFSET)?;
            let (prev, next) = links::read_links(&mut r)?;
            let count = r.read_u16()?;
            let mut entries = Vec::with_capacity(count as usize);
            let mut last = 0u64;
            for _ in 0..count {
                let key = keycode::read(&mut r, last)?
                    .ok_or(TraceError::Corruption("delta page shorter than its count"))?;
                entries.push((key, value(&mut r)?));
                last = key;
            }
            Ok(Node {
                prev,
                next,
                entries,
            })
        })
    }

    fn decode_leaf(&self, page: &Page) -> Result<Node<P>> {
        self.stats.inc_leaf_loads();
        self.decode(page, PageKind::DeltaLeaf, |r| P::decode(r))
    }

    fn decode_internal(&self, page: &Page) -> Result<Node<PageId>> {
        self.stats.inc_internal_searches();
        self.decode(page, PageKind::DeltaInternal, |r| {
            r.read_page_pointer()?
                .ok_or(TraceError::Corruption("internal entry without child"))
        })
    }

    /// Encodes `node`; `None` when it does not fit in a page.
    fn encode<T>(
        &self,
        node: &Node<T>,
        mut value: impl FnMut(&mut ByteBuf, &T) -> Result<()>,
    ) -> Result<Option<Vec<u8>>> {
        let page_size = self.pager.page_size();
        let mut buf = ByteBuf::with_capacity(self.limits, page_size);
        buf.write_page_pointer(node.prev)?;
        buf.write_page_pointer(node.next)?;
        let count = u16::try_from(node.entries.len())
            .map_err(|_| TraceError::Invalid("too many entries in one node"))?;
        buf.write_u16(count)?;
        let mut last = 0u64;
        for (key, item) in &node.entries {
            keycode::write(&mut buf, last, *key)?;
            value(&mut buf, item)?;
            last = *key;
            if links::PREV_OFFSET + buf.len() > page_size {
                return Ok(None);
            }
        }
        Ok(Some(buf.into_vec()))
    }

    fn store(&self, page: &Page, bytes: &[u8]) {
        page.write(|buf| {
            let end = links::PREV_OFFSET + bytes.len();
            buf[links::PREV_OFFSET..end].copy_from_slice(bytes);
            buf[end..].fill(0);
        });
    }
}

impl<P: Payload> LeafSource<P> for DeltaPages<P> {
    fn load_leaf(&self, page: PageId) -> Result<LeafView<P>> {
        let handle = self.pager.get(page)?;
        let node = self.decode_leaf(&handle)?;
        Ok(LeafView {
            page,
            prev: node.prev,
            next: node.next,
            entries: node.entries,
            base_rank: None,
        })
    }
}

/// Ordered tuple index accepting keys in any order.
///
/// Duplicate keys are kept in insertion order.
pub struct DeltaTree<P: Payload> {
    pages: Arc<DeltaPages<P>>,
    state: RwLock<DeltaState>,
}

impl<P: Payload> DeltaTree<P> {
    /// Creates an empty tree.
    pub fn new(pager: Arc<PagedFile>, stats: Arc<BTreeStats>) -> Self {
        let limits = *pager.limits();
        Self {
            pages: Arc::new(DeltaPages {
                pager,
                limits,
                stats,
                _payload: PhantomData,
            }),
            state: RwLock::new(DeltaState::default()),
        }
    }

    /// Reattaches a tree previously described by [`DeltaTree::root`].
    pub fn restore(pager: Arc<PagedFile>, stats: Arc<BTreeStats>, root: &DeltaRoot) -> Result<Self> {
        let tree = Self::new(pager, stats);
        if let Some(page) = root.root {
            if !tree.pages.pager.contains(PageId(page)) {
                return Err(TraceError::Corruption("delta tree root out of range"));
            }
        }
        *tree.state.write() = DeltaState {
            root: root.root.map(PageId),
            height: root.height,
            len: root.len,
            first_key: root.first_key,
            last_key: root.last_key,
        };
        Ok(tree)
    }

    /// Describes where the tree lives.
    pub fn root(&self) -> DeltaRoot {
        let state = self.state.read();
        DeltaRoot {
            root: state.root.map(|p| p.0),
            height: state.height,
            len: state.len,
            first_key: state.first_key,
            last_key: state.last_key,
        }
    }

    /// Number of tuples.
    pub fn len(&self) -> u64 {
        self.state.read().len
    }

    /// True when the tree holds nothing.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Smallest key.
    pub fn first_key(&self) -> Option<u64> {
        self.state.read().first_key
    }

    /// Largest key.
    pub fn last_key(&self) -> Option<u64> {
        self.state.read().last_key
    }

    /// Inserts a tuple after any tuple already stored under `key`.
    pub fn insert(&self, key: u64, payload: &P) -> Result<()> {
        let mut state = self.state.write();
        let Some(root) = state.root else {
            let page = self.pages.pager.allocate(PageKind::DeltaLeaf)?;
            let node = Node {
                prev: None,
                next: None,
                entries: vec![(key, payload.clone())],
            };
            let bytes = self
                .encode_leaf(&node)?
                .ok_or(TraceError::Invalid("tuple does not fit in a page"))?;
            self.pages.store(&page, &bytes);
            *state = DeltaState {
                root: Some(page.id()),
                height: 1,
                len: 1,
                first_key: Some(key),
                last_key: Some(key),
            };
            self.pages.stats.inc_inserts();
            return Ok(());
        };

        // Path of (internal page, chosen child index, lowered) from the root
        // down. The first separator of a node is kept equal to the smallest key
        // below it, so a key under it lowers it on the way down.
        let mut path: Vec<(Page, Node<PageId>, usize, bool)> = Vec::new();
        let mut page = self.pages.pager.get(root)?;
        for _ in 1..state.height {
            let mut node = self.pages.decode_internal(&page)?;
            let idx = node
                .entries
                .partition_point(|(sep, _)| *sep <= key)
                .saturating_sub(1);
            let (first, child) = node
                .entries
                .get_mut(idx)
                .ok_or(TraceError::Corruption("empty internal node"))?;
            let lowered = key < *first;
            if lowered {
                *first = key;
            }
            let child = *child;
            path.push((page, node, idx, lowered));
            page = self.pages.pager.get(child)?;
        }

        let mut leaf = self.pages.decode_leaf(&page)?;
        let at = leaf.entries.partition_point(|(k, _)| *k <= key);
        leaf.entries.insert(at, (key, payload.clone()));
        let mut split = match self.encode_leaf(&leaf)? {
            Some(bytes) => {
                self.pages.store(&page, &bytes);
                None
            }
            None => Some(self.split_leaf(&page, leaf)?),
        };

        while let Some((parent, mut node, idx, lowered)) = path.pop() {
            let Some((sep, right)) = split.take() else {
                if lowered {
                    split = self.store_internal(&parent, node)?;
                }
                continue;
            };
            node.entries.insert(idx + 1, (sep, right));
            split = self.store_internal(&parent, node)?;
        }

        if let Some((sep, right)) = split {
            let left = state.root.ok_or(TraceError::Corruption("delta tree lost its root"))?;
            let left_key = state.first_key.unwrap_or(0).min(key);
            let new_root = self.pages.pager.allocate(PageKind::DeltaInternal)?;
            let node = Node {
                prev: None,
                next: None,
                entries: vec![(left_key, left), (sep, right)],
            };
            let bytes = self
                .encode_internal(&node)?
                .ok_or(TraceError::Invalid("page too small for a root"))?;
            self.pages.store(&new_root, &bytes);
            state.root = Some(new_root.id());
            state.height += 1;
            tracing::debug!(
                target: "tracedb::index",
                root = new_root.id().0,
                height = state.height,
                "grew delta tree"
            );
        }

        state.len += 1;
        state.first_key = Some(state.first_key.map_or(key, |k| k.min(key)));
        state.last_key = Some(state.last_key.map_or(key, |k| k.max(key)));
        self.pages.stats.inc_inserts();
        Ok(())
    }

    fn encode_leaf(&self, node: &Node<P>) -> Result<Option<Vec<u8>>> {
        self.pages.encode(node, |w, payload| payload.encode(w))
    }

    fn encode_internal(&self, node: &Node<PageId>) -> Result<Option<Vec<u8>>> {
        self.pages
            .encode(node, |w, child| w.write_page_pointer(Some(*child)))
    }

    /// Writes `node` back to `page`, splitting it when it no longer fits.
    fn store_internal(&self, page: &Page, node: Node<PageId>) -> Result<Option<(u64, PageId)>> {
        match self.encode_internal(&node)? {
            Some(bytes) => {
                self.pages.store(page, &bytes);
                Ok(None)
            }
            None => Ok(Some(self.split_internal(page, node)?)),
        }
    }

    /// Moves the upper half of an overfull leaf to a new right sibling.
    fn split_leaf(&self, page: &Page, mut node: Node<P>) -> Result<(u64, PageId)> {
        let limits = self.pages.limits;
        let mid = node.entries.len() / 2;
        let upper = node.entries.split_off(mid);
        let sep = upper
            .first()
            .map(|(k, _)| *k)
            .ok_or(TraceError::Corruption("split of an empty leaf"))?;
        let right_page = self.pages.pager.allocate(PageKind::DeltaLeaf)?;
        let right = Node {
            prev: Some(page.id()),
            next: node.next,
            entries: upper,
        };
        if let Some(after) = node.next {
            let after = self.pages.pager.get(after)?;
            links::set_prev(&after, &limits, Some(right_page.id()))?;
        }
        node.next = Some(right_page.id());
        let right_bytes = self
            .encode_leaf(&right)?
            .ok_or(TraceError::Invalid("tuple does not fit in a page"))?;
        let left_bytes = self
            .encode_leaf(&node)?
            .ok_or(TraceError::Invalid("tuple does not fit in a page"))?;
        self.pages.store(&right_page, &right_bytes);
        self.pages.store(page, &left_bytes);
        self.pages.stats.inc_leaf_splits();
        tracing::debug!(
            target: "tracedb::index",
            left = page.id().0,
            right = right_page.id().0,
            "split delta leaf"
        );
        Ok((sep, right_page.id()))
    }

    fn split_internal(&self, page: &Page, mut node: Node<PageId>) -> Result<(u64, PageId)> {
        let mid = node.entries.len() / 2;
        let upper = node.entries.split_off(mid);
        let sep = upper
            .first()
            .map(|(k, _)| *k)
            .ok_or(TraceError::Corruption("split of an empty node"))?;
        let right_page = self.pages.pager.allocate(PageKind::DeltaInternal)?;
        let right = Node {
            prev: Some(page.id()),
            next: node.next,
            entries: upper,
        };
        node.next = Some(right_page.id());
        let right_bytes = self
            .encode_internal(&right)?
            .ok_or(TraceError::Invalid("page too small for an internal node"))?;
        let left_bytes = self
            .encode_internal(&node)?
            .ok_or(TraceError::Invalid("page too small for an internal node"))?;
        self.pages.store(&right_page, &right_bytes);
        self.pages.store(page, &left_bytes);
        self.pages.stats.inc_internal_splits();
        Ok((sep, right_page.id()))
    }

    /// Cursor before the first tuple whose key is at least `key`.
    pub fn seek(&self, key: u64) -> Result<TupleIterator<P>> {
        let state = self.state.read();
        let Some(root) = state.root else {
            return Ok(TupleIterator::empty());
        };
        let mut page = self.pages.pager.get(root)?;
        for _ in 1..state.height {
            let node = self.pages.decode_internal(&page)?;
            let idx = node
                .entries
                .partition_point(|(sep, _)| *sep < key)
                .saturating_sub(1);
            let child = node
                .entries
                .get(idx)
                .map(|(_, child)| *child)
                .ok_or(TraceError::Corruption("empty internal node"))?;
            page = self.pages.pager.get(child)?;
        }
        let view = self.pages.load_leaf(page.id())?;
        let index = view.entries.partition_point(|(k, _)| *k < key);
        let source: Arc<dyn LeafSource<P>> = self.pages.clone();
        Ok(TupleIterator::new(source, view, index))
    }

    /// Every payload stored under `key`, in insertion order.
    pub fn get_values(&self, key: u64) -> Result<Vec<P>> {
        let mut it = self.seek(key)?;
        let mut out = Vec::new();
        while let Some((k, payload)) = it.next()? {
            if k != key {
                break;
            }
            out.push(payload);
        }
        Ok(out)
    }

    /// First payload stored under `key`.
    pub fn get(&self, key: u64) -> Result<Option<P>> {
        let mut it = self.seek(key)?;
        Ok(it.next()?.filter(|(k, _)| *k == key).map(|(_, p)| p))
    }
}

impl<P: Payload> TupleIndex<P> for DeltaTree<P> {
    fn insert(&self, key: u64, payload: P) -> Result<()> {
        DeltaTree::insert(self, key, &payload)
    }

    fn tuple_iterator(&self, from_key: u64) -> Result<TupleIterator<P>> {
        self.seek(from_key)
    }

    fn get_values(&self, key: u64) -> Result<Vec<P>> {
        DeltaTree::get_values(self, key)
    }

    fn len(&self) -> u64 {
        DeltaTree::len(self)
    }
}
