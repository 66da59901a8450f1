//! Ordered tuple indexes stored in pages.
//!
//! Three variants share [`TupleIndex`] and [`TupleIterator`]:
//! [`SequenceTree`] for keys arriving in order, [`DeltaTree`] for keys
//! arriving in any order, and [`OpenCloseSequence`] for append-only
//! parenthesis sequences.

mod cursor;
mod delta;
mod finder;
mod links;
mod minmax;
mod payload;
mod sequence;
mod stats;

pub use cursor::{LeafSource, LeafView, TupleIterator};
pub use delta::{DeltaRoot, DeltaTree};
pub use finder::{find_tuple_index, find_tuple_index_by, Lookup, Match, NoMatch};
pub use minmax::{
    OpenCloseIndex, OpenCloseIndexRoot, OpenCloseRoot, OpenCloseSequence, Summary, SummaryLevelRoot,
};
pub use payload::{EventRef, ObjectRef, Payload};
pub use sequence::{LevelRoot, SequenceRoot, SequenceTree};
pub use stats::{BTreeStats, BTreeStatsSnapshot};

use crate::types::Result;

/// Operations every ordered tuple index supports.
pub trait TupleIndex<P> {
    /// Stores `(key, payload)`.
    fn insert(&self, key: u64, payload: P) -> Result<()>;
    /// Cursor placed before the first tuple whose key is at least `from_key`.
    fn tuple_iterator(&self, from_key: u64) -> Result<TupleIterator<P>>;
    /// Payloads stored under `key` in insertion order.
    fn get_values(&self, key: u64) -> Result<Vec<P>>;
    /// Number of tuples.
    fn len(&self) -> u64;
    /// True when the index holds nothing.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
