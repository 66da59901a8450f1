//! Compiles conditions into merged index scans and runs them.

use std::sync::Arc;

use tracing::debug;

use super::condition::{Condition, RecordFilter};
use super::count::{slot_bounds, CountCache};
use super::merge::{conjunction, disjunction};
use super::stream::{DistinctStream, EmptyStream, Hit, IndexStream, Pos, TupleStream};
use crate::storage::eventlog::EventLog;
use crate::storage::index::{IndexTree, Indexes};
use crate::storage::metrics::StorageMetrics;
use crate::storage::record::EventRecord;
use crate::types::{InternalPointer, Result, TraceError};

fn start_of(key: u64) -> Pos {
    (key, InternalPointer(0))
}

/// Base stream filtered by a test on the decoded record.
struct PredicateStream {
    base: Box<dyn TupleStream>,
    log: Arc<EventLog>,
    filter: RecordFilter,
}

impl PredicateStream {
    fn accepts(&self, hit: &Hit) -> Result<bool> {
        let record = self.log.read(hit.pointer)?;
        Ok((self.filter)(&record))
    }
}

impl TupleStream for PredicateStream {
    fn next(&mut self) -> Result<Option<Hit>> {
        while let Some(hit) = self.base.next()? {
            if self.accepts(&hit)? {
                return Ok(Some(hit));
            }
        }
        Ok(None)
    }

    fn previous(&mut self) -> Result<Option<Hit>> {
        while let Some(hit) = self.base.previous()? {
            if self.accepts(&hit)? {
                return Ok(Some(hit));
            }
        }
        Ok(None)
    }

    fn seek(&mut self, pos: Pos) -> Result<()> {
        self.base.seek(pos)
    }
}

/// Bidirectional cursor over the events matched by a condition, in
/// timestamp order.
///
/// The cursor sits between two events; `next` and `previous` each move
/// over exactly one. It can be repositioned with [`EventCursor::seek`].
/// Cursors are owned by one thread.
pub struct EventCursor {
    stream: Box<dyn TupleStream>,
    log: Arc<EventLog>,
}

#[allow(clippy::should_implement_trait)]
impl EventCursor {
    /// Next match.
    pub fn next(&mut self) -> Result<Option<InternalPointer>> {
        Ok(self.stream.next()?.map(|h| h.pointer))
    }

    /// Previous match.
    pub fn previous(&mut self) -> Result<Option<InternalPointer>> {
        Ok(self.stream.previous()?.map(|h| h.pointer))
    }

    /// Next match, without moving.
    pub fn peek_next(&mut self) -> Result<Option<InternalPointer>> {
        Ok(self.stream.peek_next()?.map(|h| h.pointer))
    }

    /// Previous match, without moving.
    pub fn peek_previous(&mut self) -> Result<Option<InternalPointer>> {
        Ok(self.stream.peek_previous()?.map(|h| h.pointer))
    }

    /// Next match with its timestamp and role.
    pub fn next_hit(&mut self) -> Result<Option<Hit>> {
        self.stream.next()
    }

    /// Previous match with its timestamp and role.
    pub fn previous_hit(&mut self) -> Result<Option<Hit>> {
        self.stream.previous()
    }

    /// Moves the cursor before the first match at or after `key`.
    pub fn seek(&mut self, key: u64) -> Result<()> {
        self.stream.seek(start_of(key))
    }

    /// Next match, decoded.
    pub fn next_event(&mut self) -> Result<Option<(InternalPointer, EventRecord)>> {
        match self.stream.next()? {
            Some(hit) => Ok(Some((hit.pointer, self.log.read(hit.pointer)?))),
            None => Ok(None),
        }
    }

    /// Previous match, decoded.
    pub fn previous_event(&mut self) -> Result<Option<(InternalPointer, EventRecord)>> {
        match self.stream.previous()? {
            Some(hit) => Ok(Some((hit.pointer, self.log.read(hit.pointer)?))),
            None => Ok(None),
        }
    }

    /// Remaining matches in forward order.
    pub fn pointers(mut self) -> impl Iterator<Item = Result<InternalPointer>> {
        std::iter::from_fn(move || self.next().transpose())
    }
}

/// Only a conjunction without deduplication reports one hit per shared role.
fn reports_each_event_once(condition: &Condition) -> bool {
    match condition {
        Condition::And { dedup, .. } => *dedup,
        Condition::Predicate { base, .. } => reports_each_event_once(base),
        _ => true,
    }
}

enum Direct {
    Tree(IndexTree),
    Empty,
    Scan,
}

/// Runs conditions against one node's indexes and event log.
pub struct Evaluator {
    indexes: Arc<Indexes>,
    log: Arc<EventLog>,
    metrics: Arc<dyn StorageMetrics>,
    counts: CountCache,
}

impl Evaluator {
    /// Evaluator over `indexes`, reading records from `log`.
    pub fn new(indexes: Arc<Indexes>, log: Arc<EventLog>, metrics: Arc<dyn StorageMetrics>, count_cache_entries: usize) -> Self {
        Self {
            indexes,
            log,
            metrics,
            counts: CountCache::new(count_cache_entries),
        }
    }

    /// Routes query counters to `metrics`.
    pub fn set_metrics(&mut self, metrics: Arc<dyn StorageMetrics>) {
        self.metrics = metrics;
    }

    /// Opens a cursor over the events matched by `condition`, positioned
    /// before the first match at or after `from_key`.
    pub fn evaluate(&self, condition: &Condition, from_key: u64) -> Result<EventCursor> {
        let stream = self.open(condition, start_of(from_key))?;
        self.metrics.query_evaluated();
        debug!(target: "tracedb::query", ?condition, from_key, "evaluating condition");
        Ok(EventCursor {
            stream,
            log: Arc::clone(&self.log),
        })
    }

    fn open(&self, condition: &Condition, from: Pos) -> Result<Box<dyn TupleStream>> {
        condition.validate()?;
        let mut stream: Box<dyn TupleStream> = match condition {
            Condition::Predicate { base, filter } => Box::new(PredicateStream {
                base: self.open_nested(base, from)?,
                log: Arc::clone(&self.log),
                filter: Arc::clone(filter),
            }),
            other => self.open_nested(other, from)?,
        };
        if reports_each_event_once(condition) {
            stream = Box::new(DistinctStream::new(stream));
        }
        stream.seek(from)?;
        Ok(stream)
    }

    fn open_nested(&self, condition: &Condition, from: Pos) -> Result<Box<dyn TupleStream>> {
        let stream: Box<dyn TupleStream> = match condition {
            Condition::All => Box::new(IndexStream::all(Arc::clone(self.indexes.timestamps()), from)?),
            Condition::Attribute { index, value, role } => match self.indexes.tree(*index, *value)? {
                Some(tree) => {
                    let filter = match (role, index.attribute.role_domain()) {
                        (Some(role), Some(domain)) => Some((domain, *role)),
                        _ => None,
                    };
                    Box::new(IndexStream::new(tree, filter, from)?)
                }
                None => Box::new(EmptyStream),
            },
            Condition::And {
                children,
                match_roles,
                dedup,
            } => {
                let streams = children
                    .iter()
                    .map(|c| self.open_nested(c, from))
                    .collect::<Result<Vec<_>>>()?;
                conjunction(streams, *match_roles, *dedup)
            }
            Condition::Or(children) => {
                let streams = children
                    .iter()
                    .map(|c| self.open_nested(c, from))
                    .collect::<Result<Vec<_>>>()?;
                disjunction(streams)
            }
            Condition::Predicate { .. } => {
                return Err(TraceError::Invalid("predicate must be the outermost condition"))
            }
        };
        Ok(stream)
    }

    /// Leaves whose count is a plain tuple count of one tree.
    fn direct(&self, condition: &Condition) -> Result<Direct> {
        Ok(match condition {
            Condition::All => Direct::Tree(IndexTree::Plain(Arc::clone(self.indexes.timestamps()))),
            Condition::Attribute { index, value, .. } => match self.indexes.tree(*index, *value)? {
                // one event can sit under several roles of the same value
                Some(IndexTree::Roles(_)) => Direct::Scan,
                Some(tree) => Direct::Tree(tree),
                None => Direct::Empty,
            },
            _ => Direct::Scan,
        })
    }

    fn count_scan(&self, condition: &Condition, t1: u64, t2: u64) -> Result<u64> {
        let mut stream = self.open(condition, start_of(t1))?;
        let mut count = 0;
        while let Some(hit) = stream.next()? {
            if hit.key > t2 {
                break;
            }
            count += 1;
        }
        Ok(count)
    }

    /// Matches with `t1 <= timestamp <= t2`.
    pub fn count(&self, condition: &Condition, t1: u64, t2: u64) -> Result<u64> {
        if t2 < t1 {
            return Ok(0);
        }
        let events = self.log.len();
        let key = condition.cache_key();
        if let Some(key) = key.as_deref() {
            if let Some(count) = self.counts.get(key, t1, t2, events) {
                self.metrics.count_query(true);
                return Ok(count);
            }
        }
        self.metrics.count_query(false);
        let count = match self.direct(condition)? {
            Direct::Tree(tree) => tree.count_between(t1, t2)?,
            Direct::Empty => 0,
            Direct::Scan => self.count_scan(condition, t1, t2)?,
        };
        if let Some(key) = key {
            self.counts
                .put(key, t1, t2, count, self.indexes.timestamps().last_key(), events);
        }
        Ok(count)
    }

    /// Match counts in `slots` equal-width buckets over `[t1, t2]`.
    pub fn fast_counts(&self, condition: &Condition, t1: u64, t2: u64, slots: usize) -> Result<Vec<u64>> {
        let bounds = slot_bounds(t1, t2, slots)?;
        match self.direct(condition)? {
            Direct::Tree(tree) => bounds
                .iter()
                .map(|&(low, high)| if low > high { Ok(0) } else { tree.count_between(low, high) })
                .collect(),
            Direct::Empty => Ok(vec![0; slots]),
            Direct::Scan => {
                let mut counts = vec![0u64; slots];
                let mut stream = self.open(condition, start_of(t1))?;
                let mut slot = 0;
                while let Some(hit) = stream.next()? {
                    if hit.key > t2 {
                        break;
                    }
                    while slot + 1 < slots && hit.key > bounds[slot].1 {
                        slot += 1;
                    }
                    counts[slot] += 1;
                }
                Ok(counts)
            }
        }
    }

    /// Drops every cached count.
    pub fn clear_cache(&self) {
        self.counts.clear();
    }

    /// Counts currently cached.
    pub fn cached_counts(&self) -> usize {
        self.counts.len()
    }
}
