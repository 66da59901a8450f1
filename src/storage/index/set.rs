use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::primitives::pager::PagedFile;
use crate::storage::btree::{BTreeStats, Payload, SequenceRoot, SequenceTree};
use crate::types::Result;

/// Persisted form of an [`IndexSet`]: one tree root per attribute value.
pub type IndexSetRoot = BTreeMap<u64, SequenceRoot>;

/// One timestamp-keyed tree per value of an attribute.
///
/// Trees are created on the first event carrying their value.
pub struct IndexSet<P: Payload> {
    name: &'static str,
    pager: Arc<PagedFile>,
    stats: Arc<BTreeStats>,
    trees: RwLock<FxHashMap<u64, Arc<SequenceTree<P>>>>,
}

impl<P: Payload> IndexSet<P> {
    /// Empty set.
    pub fn new(name: &'static str, pager: Arc<PagedFile>, stats: Arc<BTreeStats>) -> Self {
        Self {
            name,
            pager,
            stats,
            trees: RwLock::new(FxHashMap::default()),
        }
    }

    /// Reopens every tree listed in `root`.
    pub fn restore(
        name: &'static str,
        pager: Arc<PagedFile>,
        stats: Arc<BTreeStats>,
        root: &IndexSetRoot,
    ) -> Result<Self> {
        let set = Self::new(name, pager, stats);
        {
            let mut trees = set.trees.write();
            for (value, tree_root) in root {
                let tree = SequenceTree::restore(
                    Arc::clone(&set.pager),
                    Arc::clone(&set.stats),
                    tree_root,
                )?;
                trees.insert(*value, Arc::new(tree));
            }
        }
        Ok(set)
    }

    /// Roots of every tree by value.
    pub fn root(&self) -> IndexSetRoot {
        self.trees
            .read()
            .iter()
            .map(|(value, tree)| (*value, tree.root()))
            .collect()
    }

    /// Attribute name shared by the trees.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Tree holding the events of `value`, if any event carried it.
    pub fn get(&self, value: u64) -> Option<Arc<SequenceTree<P>>> {
        self.trees.read().get(&value).cloned()
    }

    /// Appends `(timestamp, payload)` to the tree of `value`.
    pub fn add(&self, value: u64, timestamp: u64, payload: &P) -> Result<()> {
        let existing = self.trees.read().get(&value).cloned();
        let tree = match existing {
            Some(tree) => tree,
            None => {
                let mut trees = self.trees.write();
                Arc::clone(trees.entry(value).or_insert_with(|| {
                    tracing::debug!(target: "tracedb::index", index = self.name, value, "new index tree");
                    Arc::new(SequenceTree::new(
                        Arc::clone(&self.pager),
                        Arc::clone(&self.stats),
                    ))
                }))
            }
        };
        tree.insert(timestamp, payload)
    }

    /// Number of distinct values seen.
    pub fn value_count(&self) -> usize {
        self.trees.read().len()
    }

    /// Values seen, ascending.
    pub fn values(&self) -> Vec<u64> {
        let mut values: Vec<u64> = self.trees.read().keys().copied().collect();
        values.sort_unstable();
        values
    }

    /// Total tuples across every value.
    pub fn tuple_count(&self) -> u64 {
        self.trees.read().values().map(|tree| tree.len()).sum()
    }
}
