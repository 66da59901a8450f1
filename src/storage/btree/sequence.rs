//! Append-mostly sequence tree.
//!
//! Tuples arrive with non-decreasing keys and are written into the tail leaf
//! until it is full, at which point the leaf is sealed and a fresh one is
//! linked after it. Every level above the leaves is built the same way: the
//! first page of a new leaf is announced to the level above as
//! `(first key, page, tuples before page)`, so levels never split and pages
//! never move once written.
//!
//! Page layout (both leaves and internal pages):
//!
//! | bytes            | contents                                  |
//! |------------------|-------------------------------------------|
//! | `0`              | page kind                                 |
//! | page pointer     | previous page at the same level           |
//! | page pointer     | next page at the same level               |
//! | 8                | base key (key of the first entry)         |
//! | tuple count      | tuples stored before the first entry      |
//! | ...              | entries, then a `0` end marker            |
//!
//! Leaf entries are `keycode + payload`; internal entries are
//! `keycode + child page pointer + tuples before child`.

use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::cursor::{LeafSource, LeafView, TupleIterator};
use super::finder::{find_tuple_index_by, Lookup, Match, NoMatch};
use super::links;
use super::payload::Payload;
use super::stats::BTreeStats;
use super::TupleIndex;
use crate::primitives::bytes::{keycode, ByteBuf, ByteReader, TypedReader, TypedWriter};
use crate::primitives::pager::{Page, PageIOStream, PagedFile};
use crate::types::page::{expect_kind, PageKind};
use crate::types::{Limits, PageId, Result, TraceError};

#[derive(Copy, Clone, Debug)]
struct Layout {
    base_key: usize,
    base_rank: usize,
    entries: usize,
}

impl Layout {
    fn new(limits: &Limits) -> Self {
        let base_key = links::links_len(limits);
        let base_rank = base_key + 8;
        Self {
            base_key,
            base_rank,
            entries: base_rank + limits.bytes(crate::types::Field::TupleCount),
        }
    }
}

#[derive(Copy, Clone, Debug)]
struct InternalEntry {
    key: u64,
    child: PageId,
    rank: u64,
}

struct LevelTail {
    first_page: PageId,
    tail: Page,
    pos: usize,
    last_key: u64,
}

#[derive(Default)]
struct TreeState {
    levels: Vec<LevelTail>,
    len: u64,
    first_key: Option<u64>,
    last_key: Option<u64>,
}

/// Persisted form of one level.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LevelRoot {
    /// First page of the level.
    pub first_page: u64,
    /// Page currently receiving entries.
    pub tail_page: u64,
    /// Write offset inside the tail page.
    pub pos: u32,
    /// Last key written to the level.
    pub last_key: u64,
}

/// Persisted form of a [`SequenceTree`].
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SequenceRoot {
    /// Levels from the leaves up.
    pub levels: Vec<LevelRoot>,
    /// Number of tuples.
    pub len: u64,
    /// Smallest key.
    pub first_key: Option<u64>,
    /// Largest key.
    pub last_key: Option<u64>,
}

struct SequencePages<P> {
    pager: Arc<PagedFile>,
    limits: Limits,
    layout: Layout,
    stats: Arc<BTreeStats>,
    _payload: PhantomData<fn() -> P>,
}

impl<P: Payload> SequencePages<P> {
    fn decode_leaf(&self, page: &Page) -> Result<LeafView<P>> {
        self.stats.inc_leaf_loads();
        let id = page.id();
        page.read(|buf| {
            expect_kind(buf, PageKind::SequenceLeaf)?;
            let mut r = ByteReader::new(self.limits, buf);
            r.skip(links::PREV_OFFSET)?;
            let (prev, next) = links::read_links(&mut r)?;
            let base_key = r.read_u64()?;
            let base_rank = r.read_tuple_count()?;
            let mut entries = Vec::new();
            let mut last = base_key;
            while r.remaining() > 0 {
                let Some(key) = keycode::read(&mut r, last)? else {
                    break;
                };
                entries.push((key, P::decode(&mut r)?));
                last = key;
            }
            Ok(LeafView {
                page: id,
                prev,
                next,
                entries,
                base_rank: Some(base_rank),
            })
        })
    }

    fn decode_internal(&self, page: &Page) -> Result<Vec<InternalEntry>> {
        self.stats.inc_internal_searches();
        page.read(|buf| {
            expect_kind(buf, PageKind::SequenceInternal)?;
            let mut r = ByteReader::new(self.limits, buf);
            r.seek(self.layout.base_key);
            let mut last = r.read_u64()?;
            r.seek(self.layout.entries);
            let mut entries = Vec::new();
            while r.remaining() > 0 {
                let Some(key) = keycode::read(&mut r, last)? else {
                    break;
                };
                let child = r
                    .read_page_pointer()?
                    .ok_or(TraceError::Corruption("internal entry without child"))?;
                let rank = r.read_tuple_count()?;
                entries.push(InternalEntry { key, child, rank });
                last = key;
            }
            Ok(entries)
        })
    }
}

impl<P: Payload> LeafSource<P> for SequencePages<P> {
    fn load_leaf(&self, page: PageId) -> Result<LeafView<P>> {
        let page = self.pager.get(page)?;
        self.decode_leaf(&page)
    }
}

/// Ordered tuple index for keys that arrive in non-decreasing order.
pub struct SequenceTree<P: Payload> {
    pages: Arc<SequencePages<P>>,
    state: Mutex<TreeState>,
}

impl<P: Payload> SequenceTree<P> {
    /// Creates an empty tree; pages are allocated on the first insert.
    pub fn new(pager: Arc<PagedFile>, stats: Arc<BTreeStats>) -> Self {
        let limits = *pager.limits();
        Self {
            pages: Arc::new(SequencePages {
                pager,
                layout: Layout::new(&limits),
                limits,
                stats,
                _payload: PhantomData,
            }),
            state: Mutex::new(TreeState::default()),
        }
    }

    /// Reattaches a tree previously described by [`SequenceTree::root`].
    pub fn restore(pager: Arc<PagedFile>, stats: Arc<BTreeStats>, root: &SequenceRoot) -> Result<Self> {
        let tree = Self::new(pager, stats);
        {
            let mut state = tree.state.lock();
            for level in &root.levels {
                let tail = tree.pages.pager.get(PageId(level.tail_page))?;
                state.levels.push(LevelTail {
                    first_page: PageId(level.first_page),
                    tail,
                    pos: level.pos as usize,
                    last_key: level.last_key,
                });
            }
            state.len = root.len;
            state.first_key = root.first_key;
            state.last_key = root.last_key;
        }
        Ok(tree)
    }

    /// Describes where the tree lives so it can be reattached after reopening.
    pub fn root(&self) -> SequenceRoot {
        let state = self.state.lock();
        SequenceRoot {
            levels: state
                .levels
                .iter()
                .map(|level| LevelRoot {
                    first_page: level.first_page.0,
                    tail_page: level.tail.id().0,
                    pos: level.pos as u32,
                    last_key: level.last_key,
                })
                .collect(),
            len: state.len,
            first_key: state.first_key,
            last_key: state.last_key,
        }
    }

    /// Number of tuples.
    pub fn len(&self) -> u64 {
        self.state.lock().len
    }

    /// True when no tuple has been inserted.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Smallest key stored.
    pub fn first_key(&self) -> Option<u64> {
        self.state.lock().first_key
    }

    /// Largest key stored.
    pub fn last_key(&self) -> Option<u64> {
        self.state.lock().last_key
    }

    /// Number of levels, leaves included.
    pub fn height(&self) -> usize {
        self.state.lock().levels.len()
    }

    /// Appends a tuple; `key` must not be below the last key.
    pub fn insert(&self, key: u64, payload: &P) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(last) = state.last_key {
            if key < last {
                return Err(TraceError::KeyOrder { last, key });
            }
        }
        let mut body = ByteBuf::with_capacity(self.pages.limits, P::encoded_len(&self.pages.limits));
        payload.encode(&mut body)?;
        let rank = state.len;
        if state.levels.is_empty() {
            let page = self.start_page(PageKind::SequenceLeaf, None, key, rank)?;
            state.levels.push(LevelTail {
                first_page: page.id(),
                tail: page,
                pos: self.pages.layout.entries,
                last_key: key,
            });
            state.first_key = Some(key);
        }
        self.push_entry(&mut state, key, body.as_slice(), rank)?;
        state.len += 1;
        state.last_key = Some(key);
        self.pages.stats.inc_appends();
        Ok(())
    }

    fn start_page(&self, kind: PageKind, prev: Option<PageId>, key: u64, rank: u64) -> Result<Page> {
        let page = self.pages.pager.allocate(kind)?;
        let mut w = PageIOStream::at(page.clone(), self.pages.limits, links::PREV_OFFSET);
        w.write_page_pointer(prev)?;
        w.write_page_pointer(None)?;
        w.write_u64(key)?;
        w.write_tuple_count(rank)?;
        Ok(page)
    }

    /// Writes an entry at `level`, sealing the tail and announcing its
    /// successor to the level above as often as needed.
    fn push_entry(&self, state: &mut TreeState, key: u64, body: &[u8], rank: u64) -> Result<()> {
        let page_size = self.pages.pager.page_size();
        let limits = self.pages.limits;
        let mut level = 0usize;
        let mut body = body.to_vec();
        loop {
            let tail = &mut state.levels[level];
            let mut entry = ByteBuf::with_capacity(limits, keycode::MAX_LEN + body.len());
            keycode::write(&mut entry, tail.last_key, key)?;
            entry.put_bytes(&body)?;
            if tail.pos + entry.len() < page_size {
                links::put_entry(&tail.tail, tail.pos, entry.as_slice());
                tail.pos += entry.len();
                tail.last_key = key;
                return Ok(());
            }

            let fresh_len = keycode::encoded_len(key, key) + body.len();
            if self.pages.layout.entries + fresh_len >= page_size {
                return Err(TraceError::Invalid("tuple does not fit in a page"));
            }
            let kind = if level == 0 {
                PageKind::SequenceLeaf
            } else {
                PageKind::SequenceInternal
            };
            let old = tail.tail.clone();
            let page = self.start_page(kind, Some(old.id()), key, rank)?;
            let mut entry = ByteBuf::with_capacity(limits, fresh_len);
            keycode::write(&mut entry, key, key)?;
            entry.put_bytes(&body)?;
            links::put_entry(&page, self.pages.layout.entries, entry.as_slice());
            links::set_next(&old, &limits, Some(page.id()))?;
            tracing::debug!(
                target: "tracedb::index",
                level,
                sealed = old.id().0,
                next = page.id().0,
                "sealed sequence page"
            );
            self.pages.stats.inc_pages_sealed();
            let new_id = page.id();
            *tail = LevelTail {
                first_page: tail.first_page,
                tail: page,
                pos: self.pages.layout.entries + entry.len(),
                last_key: key,
            };

            if level + 1 == state.levels.len() {
                let first_key = state.first_key.unwrap_or(key);
                let first_page = state.levels[level].first_page;
                let root = self.start_page(PageKind::SequenceInternal, None, first_key, 0)?;
                let mut first = ByteBuf::new(limits);
                keycode::write(&mut first, first_key, first_key)?;
                first.write_page_pointer(Some(first_page))?;
                first.write_tuple_count(0)?;
                links::put_entry(&root, self.pages.layout.entries, first.as_slice());
                state.levels.push(LevelTail {
                    first_page: root.id(),
                    tail: root,
                    pos: self.pages.layout.entries + first.len(),
                    last_key: first_key,
                });
            }

            let mut announce = ByteBuf::new(limits);
            announce.write_page_pointer(Some(new_id))?;
            announce.write_tuple_count(rank)?;
            body = announce.into_vec();
            level += 1;
        }
    }

    fn snapshot_root(&self) -> Option<(PageId, usize)> {
        let state = self.state.lock();
        state
            .levels
            .last()
            .map(|top| (top.first_page, state.levels.len()))
    }

    /// Walks from the root to a leaf, choosing a child per internal page.
    fn descend(&self, choose: impl Fn(&[InternalEntry]) -> usize) -> Result<Option<Page>> {
        let Some((mut page_id, height)) = self.snapshot_root() else {
            return Ok(None);
        };
        for _ in 1..height {
            let page = self.pages.pager.get(page_id)?;
            let entries = self.pages.decode_internal(&page)?;
            if entries.is_empty() {
                return Err(TraceError::Corruption("empty internal page"));
            }
            let idx = choose(&entries).min(entries.len() - 1);
            page_id = entries[idx].child;
        }
        self.pages.pager.get(page_id).map(Some)
    }

    fn iterator(&self, leaf: LeafView<P>, index: usize) -> TupleIterator<P> {
        let source: Arc<dyn LeafSource<P>> = self.pages.clone();
        TupleIterator::new(source, leaf, index)
    }

    /// Cursor placed before the first tuple whose key is at least `key`
    /// (`Match::First`) or after the last tuple whose key is at most `key`
    /// (`Match::Last`).
    pub fn seek(&self, key: u64, on_match: Match) -> Result<TupleIterator<P>> {
        let leaf = self.descend(|entries| {
            let lookup = find_tuple_index_by(entries, key, |e| e.key, on_match, NoMatch::Before);
            match (lookup, on_match) {
                (Lookup::Exact(i), Match::First) => i.saturating_sub(1),
                (Lookup::Exact(i), Match::Last) | (Lookup::Nearest(i), _) => i,
                _ => 0,
            }
        })?;
        let Some(leaf) = leaf else {
            return Ok(TupleIterator::empty());
        };
        let view = self.pages.decode_leaf(&leaf)?;
        let index = match on_match {
            Match::First => view.entries.partition_point(|(k, _)| *k < key),
            Match::Last => view.entries.partition_point(|(k, _)| *k <= key),
        };
        Ok(self.iterator(view, index))
    }

    /// Cursor before the first tuple.
    pub fn iter(&self) -> Result<TupleIterator<P>> {
        let first = self.state.lock().levels.first().map(|level| level.first_page);
        let Some(first) = first else {
            return Ok(TupleIterator::empty());
        };
        let view = self.pages.load_leaf(first)?;
        Ok(self.iterator(view, 0))
    }

    /// Cursor after the last tuple.
    pub fn iter_from_end(&self) -> Result<TupleIterator<P>> {
        let tail = self.state.lock().levels.first().map(|level| level.tail.id());
        let Some(tail) = tail else {
            return Ok(TupleIterator::empty());
        };
        let view = self.pages.load_leaf(tail)?;
        let index = view.entries.len();
        Ok(self.iterator(view, index))
    }

    /// Cursor before the tuple of rank `rank` (0-based).
    pub fn iter_at_rank(&self, rank: u64) -> Result<TupleIterator<P>> {
        let leaf = self.descend(|entries| entries.partition_point(|e| e.rank <= rank).saturating_sub(1))?;
        let Some(leaf) = leaf else {
            return Ok(TupleIterator::empty());
        };
        let view = self.pages.decode_leaf(&leaf)?;
        let base = view.base_rank.unwrap_or(0);
        let index = usize::try_from(rank.saturating_sub(base)).unwrap_or(usize::MAX);
        Ok(self.iterator(view, index))
    }

    /// Tuple of rank `rank`.
    pub fn nth(&self, rank: u64) -> Result<Option<(u64, P)>> {
        if rank >= self.len() {
            return Ok(None);
        }
        self.iter_at_rank(rank)?.next()
    }

    /// Number of tuples whose key is below `key`.
    pub fn rank_of(&self, key: u64) -> Result<u64> {
        Ok(self.seek(key, Match::First)?.rank().unwrap_or(0))
    }

    /// Number of tuples with `low <= key <= high`.
    pub fn count_between(&self, low: u64, high: u64) -> Result<u64> {
        if high < low {
            return Ok(0);
        }
        let start = self.rank_of(low)?;
        let end = self.seek(high, Match::Last)?.rank().unwrap_or(0);
        Ok(end.saturating_sub(start))
    }

    /// Payloads stored under `key`, in insertion order.
    pub fn get_values(&self, key: u64) -> Result<Vec<P>> {
        let mut it = self.seek(key, Match::First)?;
        let mut out = Vec::new();
        while let Some((k, payload)) = it.next()? {
            if k != key {
                break;
            }
            out.push(payload);
        }
        Ok(out)
    }
}

impl<P: Payload> TupleIndex<P> for SequenceTree<P> {
    fn insert(&self, key: u64, payload: P) -> Result<()> {
        SequenceTree::insert(self, key, &payload)
    }

    fn tuple_iterator(&self, from_key: u64) -> Result<TupleIterator<P>> {
        self.seek(from_key, Match::First)
    }

    fn get_values(&self, key: u64) -> Result<Vec<P>> {
        SequenceTree::get_values(self, key)
    }

    fn len(&self) -> u64 {
        SequenceTree::len(self)
    }
}
