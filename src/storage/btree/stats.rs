use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use serde::Serialize;

/// Snapshot of tuple index statistics at a point in time.
#[derive(Default, Debug, Clone, Copy, Serialize)]
pub struct BTreeStatsSnapshot {
    /// Tuples appended to append-mostly trees
    pub appends: u64,
    /// Tuples inserted into general trees
    pub inserts: u64,
    /// Leaf pages decoded
    pub leaf_loads: u64,
    /// Internal page searches performed
    pub internal_searches: u64,
    /// Pages sealed because they were full
    pub pages_sealed: u64,
    /// Leaf page splits performed
    pub leaf_splits: u64,
    /// Internal page splits performed
    pub internal_splits: u64,
}

/// Thread-safe statistics shared by every tree of a database.
#[derive(Default, Debug)]
pub struct BTreeStats {
    appends: AtomicU64,
    inserts: AtomicU64,
    leaf_loads: AtomicU64,
    internal_searches: AtomicU64,
    pages_sealed: AtomicU64,
    leaf_splits: AtomicU64,
    internal_splits: AtomicU64,
}

impl BTreeStats {
    pub(crate) fn inc_appends(&self) {
        self.appends.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_inserts(&self) {
        self.inserts.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_leaf_loads(&self) {
        self.leaf_loads.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_internal_searches(&self) {
        self.internal_searches.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_pages_sealed(&self) {
        self.pages_sealed.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_leaf_splits(&self) {
        self.leaf_splits.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_internal_splits(&self) {
        self.internal_splits.fetch_add(1, AtomicOrdering::Relaxed);
    }

    /// Creates a snapshot of all current statistics.
    pub fn snapshot(&self) -> BTreeStatsSnapshot {
        BTreeStatsSnapshot {
            appends: self.appends.load(AtomicOrdering::Relaxed),
            inserts: self.inserts.load(AtomicOrdering::Relaxed),
            leaf_loads: self.leaf_loads.load(AtomicOrdering::Relaxed),
            internal_searches: self.internal_searches.load(AtomicOrdering::Relaxed),
            pages_sealed: self.pages_sealed.load(AtomicOrdering::Relaxed),
            leaf_splits: self.leaf_splits.load(AtomicOrdering::Relaxed),
            internal_splits: self.internal_splits.load(AtomicOrdering::Relaxed),
        }
    }

    /// Emits current statistics to the tracing infrastructure.
    pub fn emit_tracing(&self) {
        let snapshot = self.snapshot();
        tracing::info!(
            target: "tracedb::btree::stats",
            appends = snapshot.appends,
            inserts = snapshot.inserts,
            leaf_loads = snapshot.leaf_loads,
            internal_searches = snapshot.internal_searches,
            pages_sealed = snapshot.pages_sealed,
            leaf_splits = snapshot.leaf_splits,
            internal_splits = snapshot.internal_splits,
            "btree stats snapshot"
        );
    }
}
