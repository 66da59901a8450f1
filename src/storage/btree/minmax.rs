//! Succinct open/close sequence.
//!
//! An append-only sequence of parentheses stored one bit per event: `1` for
//! an open, `0` for a close. Excess `E(i)` is the number of opens minus the
//! number of closes in `[0, i]`, with `E(-1) = 0`. Bit leaves are summarized
//! by range-min-max entries `(sum, min, max)` of the excess walk inside each
//! leaf, and every summary level is summarized again by the next one, so
//! matching-parenthesis searches skip whole blocks instead of scanning bits.
//!
//! Bit leaf layout: kind, previous, next, `u64` first position, `u32` bit
//! count, bits (LSB first). Summary pages: kind, previous, next, then 24-byte
//! entries of three big-endian `i64`.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::cursor::{LeafSource, LeafView, TupleIterator};
use super::links;
use super::payload::EventRef;
use super::sequence::{SequenceRoot, SequenceTree};
use super::stats::BTreeStats;
use super::finder::Match;
use super::TupleIndex;
use crate::primitives::bytes::{ByteReader, TypedReader, TypedWriter};
use crate::primitives::pager::{Page, PageIOStream, PagedFile};
use crate::types::page::{expect_kind, PageKind};
use crate::types::{InternalPointer, Limits, PageId, Result, TraceError};

const SUMMARY_LEN: usize = 24;

/// Excess walk summary of a block of bits.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    /// Opens minus closes.
    pub sum: i64,
    /// Lowest prefix excess inside the block.
    pub min: i64,
    /// Highest prefix excess inside the block.
    pub max: i64,
}

impl Summary {
    const EMPTY: Summary = Summary {
        sum: 0,
        min: i64::MAX,
        max: i64::MIN,
    };

    fn push(&mut self, open: bool) {
        self.sum += step(open);
        self.min = self.min.min(self.sum);
        self.max = self.max.max(self.sum);
    }

    /// True when a walk entering the block at `base` passes through `target`.
    fn reaches(&self, base: i64, target: i64) -> bool {
        base + self.min <= target && target <= base + self.max
    }
}

fn step(open: bool) -> i64 {
    if open {
        1
    } else {
        -1
    }
}

fn bit(bits: &[u8], p: usize) -> bool {
    bits[p / 8] & (1 << (p % 8)) != 0
}

fn delta(bits: &[u8], p: usize) -> i64 {
    step(bit(bits, p))
}

struct SummaryLevel {
    pages: Vec<PageId>,
    tail: Option<Page>,
    entries: u64,
    current: Summary,
}

#[derive(Default)]
struct SequenceState {
    len: u64,
    leaves: Vec<PageId>,
    tail_leaf: Option<Page>,
    levels: Vec<SummaryLevel>,
    total: Option<Summary>,
}

/// Persisted form of one summary level.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SummaryLevelRoot {
    /// First summary page.
    pub first_page: u64,
    /// Entries written at this level.
    pub entries: u64,
    /// Summary of the entry still growing.
    pub current: Summary,
}

/// Persisted form of an [`OpenCloseSequence`].
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct OpenCloseRoot {
    /// Number of bits.
    pub len: u64,
    /// First bit leaf.
    pub first_leaf: Option<u64>,
    /// Summary levels from the leaves up.
    pub levels: Vec<SummaryLevelRoot>,
    /// Summary of every bit.
    pub total: Option<Summary>,
}

struct BitPages {
    pager: Arc<PagedFile>,
    limits: Limits,
    stats: Arc<BTreeStats>,
}

impl BitPages {
    fn start_offset(&self) -> usize {
        links::links_len(&self.limits)
    }

    fn count_offset(&self) -> usize {
        self.start_offset() + 8
    }

    fn bits_offset(&self) -> usize {
        self.count_offset() + 4
    }

    fn bits_per_leaf(&self) -> u64 {
        ((self.pager.page_size() - self.bits_offset()) * 8) as u64
    }

    fn entries_per_page(&self) -> u64 {
        ((self.pager.page_size() - links::links_len(&self.limits)) / SUMMARY_LEN) as u64
    }

    /// Bits covered by one entry of summary level `level`.
    fn span(&self, level: usize) -> u64 {
        let fanout = self.entries_per_page();
        (0..level).fold(self.bits_per_leaf(), |span, _| span.saturating_mul(fanout))
    }

    fn read_bits(&self, page: PageId) -> Result<(u64, Vec<u8>, usize)> {
        let page = self.pager.get(page)?;
        page.read(|buf| {
            expect_kind(buf, PageKind::BitLeaf)?;
            let mut r = ByteReader::new(self.limits, buf);
            r.seek(self.start_offset());
            let start = r.read_u64()?;
            let count = r.read_u32()? as usize;
            Ok((start, buf[self.bits_offset()..].to_vec(), count))
        })
    }

    fn decode_leaf(&self, page: PageId) -> Result<LeafView<bool>> {
        self.stats.inc_leaf_loads();
        let handle = self.pager.get(page)?;
        let (prev, next) = handle.read(|buf| {
            let mut r = ByteReader::new(self.limits, buf);
            r.skip(links::PREV_OFFSET)?;
            links::read_links(&mut r)
        })?;
        let (start, bits, count) = self.read_bits(page)?;
        Ok(LeafView {
            page,
            prev,
            next,
            entries: (0..count).map(|p| (start + p as u64, bit(&bits, p))).collect(),
            base_rank: Some(start),
        })
    }

    fn read_summary(&self, page: PageId, slot: u64) -> Result<Summary> {
        let page = self.pager.get(page)?;
        let offset = links::links_len(&self.limits) + slot as usize * SUMMARY_LEN;
        page.read(|buf| {
            expect_kind(buf, PageKind::BitSummary)?;
            let mut r = ByteReader::new(self.limits, buf);
            r.seek(offset);
            Ok(Summary {
                sum: r.read_u64()? as i64,
                min: r.read_u64()? as i64,
                max: r.read_u64()? as i64,
            })
        })
    }

    fn write_summary(&self, page: &Page, slot: u64, summary: &Summary) -> Result<()> {
        let offset = links::links_len(&self.limits) + slot as usize * SUMMARY_LEN;
        let mut bytes = [0u8; SUMMARY_LEN];
        bytes[0..8].copy_from_slice(&summary.sum.to_be_bytes());
        bytes[8..16].copy_from_slice(&summary.min.to_be_bytes());
        bytes[16..24].copy_from_slice(&summary.max.to_be_bytes());
        links::put_entry(page, offset, &bytes);
        Ok(())
    }

    fn chain(&self, first: Option<PageId>) -> Result<Vec<PageId>> {
        let mut out = Vec::new();
        let mut cursor = first;
        while let Some(id) = cursor {
            if out.len() as u64 > self.pager.page_count() {
                return Err(TraceError::Corruption("cycle in page chain"));
            }
            out.push(id);
            let page = self.pager.get(id)?;
            cursor = page.read(|buf| {
                let mut r = ByteReader::new(self.limits, buf);
                r.seek(links::next_offset(&self.limits));
                r.read_page_pointer()
            })?;
        }
        Ok(out)
    }
}

impl LeafSource<bool> for BitPages {
    fn load_leaf(&self, page: PageId) -> Result<LeafView<bool>> {
        self.decode_leaf(page)
    }
}

/// Append-only balanced-parenthesis sequence with range-min-max summaries.
pub struct OpenCloseSequence {
    pages: Arc<BitPages>,
    state: RwLock<SequenceState>,
}

impl OpenCloseSequence {
    /// Creates an empty sequence.
    pub fn new(pager: Arc<PagedFile>, stats: Arc<BTreeStats>) -> Self {
        let limits = *pager.limits();
        Self {
            pages: Arc::new(BitPages {
                pager,
                limits,
                stats,
            }),
            state: RwLock::new(SequenceState::default()),
        }
    }

    /// Reattaches a sequence described by [`OpenCloseSequence::root`].
    pub fn restore(pager: Arc<PagedFile>, stats: Arc<BTreeStats>, root: &OpenCloseRoot) -> Result<Self> {
        let seq = Self::new(pager, stats);
        let pages = &seq.pages;
        let leaves = pages.chain(root.first_leaf.map(PageId))?;
        let tail_leaf = leaves.last().map(|id| pages.pager.get(*id)).transpose()?;
        let mut levels = Vec::with_capacity(root.levels.len());
        for level in &root.levels {
            let chain = pages.chain(Some(PageId(level.first_page)))?;
            let tail = chain.last().map(|id| pages.pager.get(*id)).transpose()?;
            levels.push(SummaryLevel {
                pages: chain,
                tail,
                entries: level.entries,
                current: level.current,
            });
        }
        *seq.state.write() = SequenceState {
            len: root.len,
            leaves,
            tail_leaf,
            levels,
            total: root.total,
        };
        Ok(seq)
    }

    /// Describes where the sequence lives.
    pub fn root(&self) -> OpenCloseRoot {
        let state = self.state.read();
        OpenCloseRoot {
            len: state.len,
            first_leaf: state.leaves.first().map(|p| p.0),
            levels: state
                .levels
                .iter()
                .filter_map(|level| {
                    level.pages.first().map(|first| SummaryLevelRoot {
                        first_page: first.0,
                        entries: level.entries,
                        current: level.current,
                    })
                })
                .collect(),
            total: state.total,
        }
    }

    /// Number of bits.
    pub fn len(&self) -> u64 {
        self.state.read().len
    }

    /// True when nothing was pushed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends an open (`true`) or a close (`false`).
    pub fn push(&self, open: bool) -> Result<()> {
        let pages = &self.pages;
        let limits = pages.limits;
        let per_leaf = pages.bits_per_leaf();
        let mut state = self.state.write();
        let pos = state.len;
        let slot = (pos % per_leaf) as usize;

        if slot == 0 || state.tail_leaf.is_none() {
            let page = pages.pager.allocate(PageKind::BitLeaf)?;
            let prev = state.tail_leaf.as_ref().map(Page::id);
            let mut w = PageIOStream::at(page.clone(), limits, links::PREV_OFFSET);
            w.write_page_pointer(prev)?;
            w.write_page_pointer(None)?;
            w.write_u64(pos)?;
            if let Some(prev) = &state.tail_leaf {
                links::set_next(prev, &limits, Some(page.id()))?;
                pages.stats.inc_pages_sealed();
            }
            state.leaves.push(page.id());
            state.tail_leaf = Some(page);
        }
        let tail = state
            .tail_leaf
            .as_ref()
            .ok_or(TraceError::Corruption("open/close sequence without tail"))?;
        let count_at = pages.count_offset();
        let byte_at = pages.bits_offset() + slot / 8;
        tail.write(|buf| {
            if open {
                buf[byte_at] |= 1 << (slot % 8);
            }
            buf[count_at..count_at + 4].copy_from_slice(&(slot as u32 + 1).to_be_bytes());
        });

        let mut total = state.total.unwrap_or(Summary::EMPTY);
        total.push(open);
        state.total = Some(total);

        if state.levels.is_empty() {
            state.levels.push(SummaryLevel {
                pages: Vec::new(),
                tail: None,
                entries: 0,
                current: Summary::EMPTY,
            });
        }
        for level in 0..state.levels.len() {
            let idx = pos / pages.span(level);
            let entry = &mut state.levels[level];
            self.update_entry(entry, idx, open)?;
        }
        let grow = state.levels.last().map_or(false, |top| top.entries > 1);
        if grow {
            let mut level = SummaryLevel {
                pages: Vec::new(),
                tail: None,
                entries: 1,
                current: total,
            };
            let page = self.summary_page(&mut level)?;
            pages.write_summary(&page, 0, &total)?;
            tracing::debug!(
                target: "tracedb::index",
                levels = state.levels.len() + 1,
                "added open/close summary level"
            );
            state.levels.push(level);
        }
        state.len = pos + 1;
        pages.stats.inc_appends();
        Ok(())
    }

    fn summary_page(&self, level: &mut SummaryLevel) -> Result<Page> {
        let limits = self.pages.limits;
        let page = self.pages.pager.allocate(PageKind::BitSummary)?;
        let prev = level.tail.as_ref().map(Page::id);
        links::set_prev(&page, &limits, prev)?;
        if let Some(prev) = &level.tail {
            links::set_next(prev, &limits, Some(page.id()))?;
        }
        level.pages.push(page.id());
        level.tail = Some(page.clone());
        Ok(page)
    }

    fn update_entry(&self, level: &mut SummaryLevel, idx: u64, open: bool) -> Result<()> {
        let fanout = self.pages.entries_per_page();
        if idx >= level.entries {
            level.entries = idx + 1;
            level.current = Summary::EMPTY;
            if idx % fanout == 0 || level.tail.is_none() {
                self.summary_page(level)?;
            }
        }
        level.current.push(open);
        let tail = level
            .tail
            .as_ref()
            .ok_or(TraceError::Corruption("summary level without tail"))?;
        self.pages.write_summary(tail, idx % fanout, &level.current)
    }

    fn summary(&self, state: &SequenceState, level: usize, idx: u64) -> Result<Summary> {
        let fanout = self.pages.entries_per_page();
        let page = state.levels[level]
            .pages
            .get((idx / fanout) as usize)
            .copied()
            .ok_or(TraceError::Corruption("summary entry out of range"))?;
        self.pages.read_summary(page, idx % fanout)
    }

    fn leaf(&self, state: &SequenceState, idx: u64) -> Result<(Vec<u8>, usize)> {
        let page = state
            .leaves
            .get(idx as usize)
            .copied()
            .ok_or(TraceError::Corruption("bit leaf out of range"))?;
        let (_, bits, count) = self.pages.read_bits(page)?;
        Ok((bits, count))
    }

    /// Bit at `i`: `true` for an open.
    pub fn get(&self, i: u64) -> Result<Option<bool>> {
        let state = self.state.read();
        if i >= state.len {
            return Ok(None);
        }
        let per_leaf = self.pages.bits_per_leaf();
        let (bits, _) = self.leaf(&state, i / per_leaf)?;
        Ok(Some(bit(&bits, (i % per_leaf) as usize)))
    }

    /// Excess `E(i)`.
    pub fn excess(&self, i: u64) -> Result<i64> {
        let state = self.state.read();
        if i >= state.len {
            return Err(TraceError::Invalid("position beyond the sequence"));
        }
        self.excess_locked(&state, i)
    }

    fn excess_locked(&self, state: &SequenceState, i: u64) -> Result<i64> {
        let fanout = self.pages.entries_per_page();
        let per_leaf = self.pages.bits_per_leaf();
        let top = state.levels.len().saturating_sub(1);
        let mut total = 0i64;
        for level in 0..state.levels.len() {
            let idx = i / self.pages.span(level);
            let start = if level == top { 0 } else { idx / fanout * fanout };
            for s in start..idx {
                total += self.summary(state, level, s)?.sum;
            }
        }
        let (bits, _) = self.leaf(state, i / per_leaf)?;
        let upto = (i % per_leaf) as usize;
        total += (0..=upto).map(|p| delta(&bits, p)).sum::<i64>();
        Ok(total)
    }

    /// Smallest `j > i` with `E(j) = E(i) + d`.
    fn fwd_search(&self, state: &SequenceState, i: u64, d: i64) -> Result<Option<u64>> {
        let fanout = self.pages.entries_per_page();
        let per_leaf = self.pages.bits_per_leaf();
        let mut e = self.excess_locked(state, i)?;
        let target = e + d;
        let leaf = i / per_leaf;
        let (bits, count) = self.leaf(state, leaf)?;
        for p in (i % per_leaf) as usize + 1..count {
            e += delta(&bits, p);
            if e == target {
                return Ok(Some(leaf * per_leaf + p as u64));
            }
        }
        let top = state.levels.len().saturating_sub(1);
        let mut idx = leaf;
        for level in 0..state.levels.len() {
            let entries = state.levels[level].entries;
            let end = if level == top {
                entries
            } else {
                ((idx / fanout + 1) * fanout).min(entries)
            };
            for s in idx + 1..end {
                let summary = self.summary(state, level, s)?;
                if summary.reaches(e, target) {
                    return self.descend_fwd(state, level, s, e, target).map(Some);
                }
                e += summary.sum;
            }
            idx /= fanout;
        }
        Ok(None)
    }

    fn descend_fwd(
        &self,
        state: &SequenceState,
        mut level: usize,
        mut s: u64,
        mut e: i64,
        target: i64,
    ) -> Result<u64> {
        let fanout = self.pages.entries_per_page();
        while level > 0 {
            let children = state.levels[level - 1].entries;
            let mut found = None;
            for c in s * fanout..((s + 1) * fanout).min(children) {
                let summary = self.summary(state, level - 1, c)?;
                if summary.reaches(e, target) {
                    found = Some(c);
                    break;
                }
                e += summary.sum;
            }
            s = found.ok_or(TraceError::Corruption("summary disagrees with its children"))?;
            level -= 1;
        }
        let per_leaf = self.pages.bits_per_leaf();
        let (bits, count) = self.leaf(state, s)?;
        for p in 0..count {
            e += delta(&bits, p);
            if e == target {
                return Ok(s * per_leaf + p as u64);
            }
        }
        Err(TraceError::Corruption("summary disagrees with its bits"))
    }

    /// Largest `k < i` with `E(k) = E(i) + d`; `-1` stands for the empty prefix.
    fn bwd_search(&self, state: &SequenceState, i: u64, d: i64) -> Result<Option<i64>> {
        let fanout = self.pages.entries_per_page();
        let per_leaf = self.pages.bits_per_leaf();
        let mut e = self.excess_locked(state, i)?;
        let target = e + d;
        let leaf = i / per_leaf;
        let (bits, _) = self.leaf(state, leaf)?;
        let offset = (i % per_leaf) as usize;
        for p in (0..offset).rev() {
            e -= delta(&bits, p + 1);
            if e == target {
                return Ok(Some((leaf * per_leaf + p as u64) as i64));
            }
        }
        e -= delta(&bits, 0);
        let top = state.levels.len().saturating_sub(1);
        let mut idx = leaf;
        for level in 0..state.levels.len() {
            let start = if level == top { 0 } else { idx / fanout * fanout };
            for s in (start..idx).rev() {
                let summary = self.summary(state, level, s)?;
                let base = e - summary.sum;
                if summary.reaches(base, target) {
                    return self.descend_bwd(state, level, s, e, target).map(Some);
                }
                e = base;
            }
            idx /= fanout;
        }
        Ok((target == 0).then_some(-1))
    }

    fn descend_bwd(
        &self,
        state: &SequenceState,
        mut level: usize,
        mut s: u64,
        mut e: i64,
        target: i64,
    ) -> Result<i64> {
        let fanout = self.pages.entries_per_page();
        while level > 0 {
            let children = state.levels[level - 1].entries;
            let mut found = None;
            for c in (s * fanout..((s + 1) * fanout).min(children)).rev() {
                let summary = self.summary(state, level - 1, c)?;
                let base = e - summary.sum;
                if summary.reaches(base, target) {
                    found = Some(c);
                    break;
                }
                e = base;
            }
            s = found.ok_or(TraceError::Corruption("summary disagrees with its children"))?;
            level -= 1;
        }
        let per_leaf = self.pages.bits_per_leaf();
        let (bits, count) = self.leaf(state, s)?;
        for p in (0..count).rev() {
            if e == target {
                return Ok((s * per_leaf + p as u64) as i64);
            }
            e -= delta(&bits, p);
        }
        Err(TraceError::Corruption("summary disagrees with its bits"))
    }

    /// Close matching the open at `i`, if it has been pushed.
    pub fn find_close(&self, i: u64) -> Result<Option<u64>> {
        let state = self.state.read();
        if !self.is_open_locked(&state, i)? {
            return Ok(None);
        }
        self.fwd_search(&state, i, -1)
    }

    /// Open matching the close at `i`, if the sequence contains it.
    pub fn find_open(&self, i: u64) -> Result<Option<u64>> {
        let state = self.state.read();
        if i >= state.len || self.is_open_locked(&state, i)? {
            return Ok(None);
        }
        Ok(self.bwd_search(&state, i, 0)?.map(|k| (k + 1) as u64))
    }

    /// Nearest open strictly enclosing the open at `i`.
    pub fn enclose(&self, i: u64) -> Result<Option<u64>> {
        let state = self.state.read();
        if !self.is_open_locked(&state, i)? {
            return Ok(None);
        }
        Ok(self.bwd_search(&state, i, -2)?.map(|k| (k + 1) as u64))
    }

    /// Innermost open at or before `i` whose close comes after `i`.
    pub fn innermost_open(&self, i: u64) -> Result<Option<u64>> {
        let state = self.state.read();
        if i >= state.len {
            return Ok(None);
        }
        Ok(self.bwd_search(&state, i, -1)?.map(|k| (k + 1) as u64))
    }

    fn is_open_locked(&self, state: &SequenceState, i: u64) -> Result<bool> {
        if i >= state.len {
            return Ok(false);
        }
        let per_leaf = self.pages.bits_per_leaf();
        let (bits, _) = self.leaf(state, i / per_leaf)?;
        Ok(bit(&bits, (i % per_leaf) as usize))
    }

    /// Cursor before position `from` over `(position, open)` tuples.
    pub fn iter_from(&self, from: u64) -> Result<TupleIterator<bool>> {
        let state = self.state.read();
        let per_leaf = self.pages.bits_per_leaf();
        let Some(last) = state.leaves.len().checked_sub(1) else {
            return Ok(TupleIterator::empty());
        };
        let leaf = ((from / per_leaf) as usize).min(last);
        let view = self.pages.decode_leaf(state.leaves[leaf])?;
        let index = usize::try_from(from.saturating_sub(leaf as u64 * per_leaf)).unwrap_or(usize::MAX);
        let source: Arc<dyn LeafSource<bool>> = self.pages.clone();
        Ok(TupleIterator::new(source, view, index))
    }
}

impl TupleIndex<bool> for OpenCloseSequence {
    fn insert(&self, key: u64, open: bool) -> Result<()> {
        let len = self.len();
        if key != len {
            return Err(TraceError::KeyOrder { last: len, key });
        }
        self.push(open)
    }

    fn tuple_iterator(&self, from_key: u64) -> Result<TupleIterator<bool>> {
        self.iter_from(from_key)
    }

    fn get_values(&self, key: u64) -> Result<Vec<bool>> {
        Ok(self.get(key)?.into_iter().collect())
    }

    fn len(&self) -> u64 {
        OpenCloseSequence::len(self)
    }
}

/// Persisted form of an [`OpenCloseIndex`].
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct OpenCloseIndexRoot {
    /// Parenthesis bits.
    pub bits: OpenCloseRoot,
    /// Events in bit order, keyed by timestamp.
    pub events: SequenceRoot,
}

/// Open/close sequence keyed by timestamp.
///
/// Position `i` of the bit sequence is the `i`-th event of the timestamp
/// tree, so scope questions asked at a timestamp map to a rank first.
pub struct OpenCloseIndex {
    bits: OpenCloseSequence,
    events: SequenceTree<EventRef>,
}

impl OpenCloseIndex {
    /// Creates an empty index.
    pub fn new(pager: Arc<PagedFile>, stats: Arc<BTreeStats>) -> Self {
        Self {
            bits: OpenCloseSequence::new(Arc::clone(&pager), Arc::clone(&stats)),
            events: SequenceTree::new(pager, stats),
        }
    }

    /// Reattaches an index described by [`OpenCloseIndex::root`].
    pub fn restore(pager: Arc<PagedFile>, stats: Arc<BTreeStats>, root: &OpenCloseIndexRoot) -> Result<Self> {
        Ok(Self {
            bits: OpenCloseSequence::restore(Arc::clone(&pager), Arc::clone(&stats), &root.bits)?,
            events: SequenceTree::restore(pager, stats, &root.events)?,
        })
    }

    /// Describes where the index lives.
    pub fn root(&self) -> OpenCloseIndexRoot {
        OpenCloseIndexRoot {
            bits: self.bits.root(),
            events: self.events.root(),
        }
    }

    /// Records an open or close event at `timestamp`.
    pub fn push(&self, timestamp: u64, pointer: InternalPointer, open: bool) -> Result<()> {
        self.events.insert(timestamp, &EventRef(pointer))?;
        self.bits.push(open)
    }

    /// Number of events recorded.
    pub fn len(&self) -> u64 {
        self.bits.len()
    }

    /// True when nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    /// The bit sequence.
    pub fn bits(&self) -> &OpenCloseSequence {
        &self.bits
    }

    fn position_at(&self, timestamp: u64) -> Result<Option<u64>> {
        let rank = self.events.seek(timestamp, Match::Last)?.rank().unwrap_or(0);
        Ok(rank.checked_sub(1))
    }

    /// Nesting depth after the last event at or before `timestamp`.
    pub fn depth_at(&self, timestamp: u64) -> Result<i64> {
        match self.position_at(timestamp)? {
            Some(pos) => self.bits.excess(pos),
            None => Ok(0),
        }
    }

    /// Innermost open scope at `timestamp`: its timestamp and event.
    pub fn enclosing(&self, timestamp: u64) -> Result<Option<(u64, InternalPointer)>> {
        let Some(pos) = self.position_at(timestamp)? else {
            return Ok(None);
        };
        let Some(open) = self.bits.innermost_open(pos)? else {
            return Ok(None);
        };
        Ok(self.events.nth(open)?.map(|(ts, event)| (ts, event.0)))
    }

    /// True when some scope is open at `timestamp`.
    pub fn is_open_at(&self, timestamp: u64) -> Result<bool> {
        Ok(self.enclosing(timestamp)?.is_some())
    }

    /// Timestamp and event closing the scope opened at `open_timestamp`.
    pub fn closing(&self, open_timestamp: u64) -> Result<Option<(u64, InternalPointer)>> {
        let rank = self.events.rank_of(open_timestamp)?;
        let Some(close) = self.bits.find_close(rank)? else {
            return Ok(None);
        };
        Ok(self.events.nth(close)?.map(|(ts, event)| (ts, event.0)))
    }
}
