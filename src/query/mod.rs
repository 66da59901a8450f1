#![forbid(unsafe_code)]

//! Condition evaluation over the attribute indexes.
//!
//! A [`Condition`] is compiled into a tree of bidirectional hit streams:
//! index scans at the leaves, sorted merges for conjunctions and
//! disjunctions, and an optional record filter at the root.

/// Condition trees and their construction from attribute values.
pub mod condition;

/// Range counts and their cache.
pub mod count;

/// Compilation of conditions into streams, and the public cursor.
pub mod evaluator;

/// Intersection and union of hit streams.
pub mod merge;

/// Hit streams and index scans.
pub mod stream;

pub use condition::{create_condition, Condition, RecordFilter};
pub use count::CountCache;
pub use evaluator::{EventCursor, Evaluator};
pub use stream::{Hit, Pos, TupleStream};
