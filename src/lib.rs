//! Storage and indexing engine for execution traces.
//!
//! Event records are appended to a page-backed log and fanned out to
//! per-attribute ordered tuple indexes. Conditions over those indexes
//! compile into lazy, bidirectional merged scans.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod db;
pub mod primitives;
pub mod query;
pub mod storage;
pub mod types;
pub mod workload;

pub use db::{DbConfig, DbStats, TraceDb};
pub use query::{Condition, EventCursor};
pub use storage::record::{EventRecord, RecordHeader, RecordKind, RecordPayload};
pub use types::{ExternalPointer, InternalPointer, Result, TraceError};
pub use workload::{TraceGenerator, WorkloadConfig};
