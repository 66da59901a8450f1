//! Trace storage engine.
//!
//! The event log holds the encoded records, the indexes map attribute
//! values to the records carrying them, and the reordering buffer sits in
//! front of both.

/// Ordered tuple indexes stored in pages.
pub mod btree;

/// Attribute index registry, role tags and split keys.
pub mod index;

/// Serialized structure roots.
pub mod directory;

/// Page chain of encoded event records.
pub mod eventlog;

/// Ingest and query counters.
pub mod metrics;

/// Event records and their codec.
pub mod record;

/// Timestamp reordering window.
pub mod reorder;

pub use eventlog::{EventLog, EventLogIter, EventLogRoot, EventLogStats};
pub use index::{Attribute, IndexId, Indexes, ProbeCatalog, ProbeInfo, Role, RoleDomain, SplitScheme};
pub use metrics::{default_metrics, CounterMetrics, MetricsSnapshot, NoopMetrics, StorageMetrics};
pub use record::{BehaviorCall, EventRecord, OutputStream, RecordHeader, RecordKind, RecordPayload};
pub use reorder::{DropListener, ReorderingBuffer, Timestamped};
