//! Fan-out of one appended event into every index it belongs to.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use super::role::{Role, RoleDomain, RoleRef};
use super::set::{IndexSet, IndexSetRoot};
use super::split::SplitScheme;
use crate::primitives::pager::PagedFile;
use crate::storage::btree::{
    BTreeStats, DeltaRoot, DeltaTree, EventRef, ObjectRef, OpenCloseIndex, OpenCloseIndexRoot,
    SequenceRoot, SequenceTree,
};
use crate::storage::record::{EventRecord, RecordPayload};
use crate::types::{InternalPointer, ObjectId, ObjectValue, Result, TraceError};

/// Attribute an event can be looked up by.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Attribute {
    /// Producing thread.
    Thread,
    /// Call stack depth.
    Depth,
    /// Record kind discriminant.
    Kind,
    /// Location descriptor.
    Probe,
    /// Behavior, role-tagged.
    Behavior,
    /// Written field.
    Field,
    /// Written local variable.
    Variable,
    /// Advice source the probe belongs to.
    Advice,
    /// Advice whose control flow the event is in.
    AdviceCflow,
    /// Object identity, role-tagged and split.
    Object,
    /// Array slot, split.
    ArrayIndex,
}

impl Attribute {
    /// Attributes backed by a single untagged index set.
    pub const SIMPLE: [Attribute; 8] = [
        Attribute::Thread,
        Attribute::Depth,
        Attribute::Kind,
        Attribute::Probe,
        Attribute::Field,
        Attribute::Variable,
        Attribute::Advice,
        Attribute::AdviceCflow,
    ];

    /// Name used in persisted roots and logs.
    pub const fn name(self) -> &'static str {
        match self {
            Attribute::Thread => "thread",
            Attribute::Depth => "depth",
            Attribute::Kind => "kind",
            Attribute::Probe => "probe",
            Attribute::Behavior => "behavior",
            Attribute::Field => "field",
            Attribute::Variable => "variable",
            Attribute::Advice => "advice",
            Attribute::AdviceCflow => "advice_cflow",
            Attribute::Object => "object",
            Attribute::ArrayIndex => "array_index",
        }
    }

    /// Role family of role-tagged attributes.
    pub const fn role_domain(self) -> Option<RoleDomain> {
        match self {
            Attribute::Behavior => Some(RoleDomain::Behavior),
            Attribute::Object => Some(RoleDomain::Object),
            _ => None,
        }
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Attribute {
    type Err = TraceError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "thread" => Attribute::Thread,
            "depth" => Attribute::Depth,
            "kind" => Attribute::Kind,
            "probe" => Attribute::Probe,
            "behavior" => Attribute::Behavior,
            "field" => Attribute::Field,
            "variable" => Attribute::Variable,
            "advice" => Attribute::Advice,
            "advice_cflow" | "advice-cflow" => Attribute::AdviceCflow,
            "object" => Attribute::Object,
            "array_index" | "array-index" => Attribute::ArrayIndex,
            _ => return Err(TraceError::Invalid("unknown attribute")),
        })
    }
}

/// One physical index: an attribute, plus the component for split attributes.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct IndexId {
    /// Indexed attribute.
    pub attribute: Attribute,
    /// Component of a split attribute, 0 otherwise.
    pub part: u8,
}

impl IndexId {
    /// Index of an attribute that is not split.
    pub const fn whole(attribute: Attribute) -> Self {
        Self { attribute, part: 0 }
    }
}

impl fmt::Display for IndexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.attribute {
            Attribute::Object | Attribute::ArrayIndex => write!(f, "{}[{}]", self.attribute, self.part),
            _ => write!(f, "{}", self.attribute),
        }
    }
}

/// What the structure layer knows about a probe.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct ProbeInfo {
    /// Behavior containing the probe.
    pub behavior: Option<u32>,
    /// Bytecode offset of the probe.
    pub bytecode_index: Option<u32>,
    /// Advice source the probe was woven from.
    pub advice_source: Option<u32>,
}

/// Lookup of probe descriptions, provided by the layer above.
pub trait ProbeCatalog: Send + Sync {
    /// Description of probe `id`, if known.
    fn probe(&self, id: u32) -> Option<ProbeInfo>;
}

/// Catalog that knows nothing.
#[derive(Default)]
pub struct NoProbes;

impl ProbeCatalog for NoProbes {
    fn probe(&self, _id: u32) -> Option<ProbeInfo> {
        None
    }
}

/// Catalog backed by a map.
#[derive(Default)]
pub struct StaticProbes {
    probes: FxHashMap<u32, ProbeInfo>,
}

impl StaticProbes {
    /// Empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `info` under probe `id`.
    pub fn with(mut self, id: u32, info: ProbeInfo) -> Self {
        self.probes.insert(id, info);
        self
    }
}

impl ProbeCatalog for StaticProbes {
    fn probe(&self, id: u32) -> Option<ProbeInfo> {
        self.probes.get(&id).copied()
    }
}

/// A physical index resolved for scanning.
#[derive(Clone)]
pub enum IndexTree {
    /// Untagged tuples.
    Plain(Arc<SequenceTree<EventRef>>),
    /// Role-tagged tuples.
    Roles(Arc<SequenceTree<RoleRef>>),
}

impl IndexTree {
    /// Tuples stored.
    pub fn len(&self) -> u64 {
        match self {
            IndexTree::Plain(tree) => tree.len(),
            IndexTree::Roles(tree) => tree.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tuples with `low <= timestamp <= high`.
    pub fn count_between(&self, low: u64, high: u64) -> Result<u64> {
        match self {
            IndexTree::Plain(tree) => tree.count_between(low, high),
            IndexTree::Roles(tree) => tree.count_between(low, high),
        }
    }
}

/// Persisted form of [`Indexes`].
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct IndexesRoot {
    /// Timestamp index.
    pub timestamps: SequenceRoot,
    /// Single-role attribute indexes by name.
    pub simple: BTreeMap<String, IndexSetRoot>,
    /// Role-tagged behavior indexes.
    pub behaviors: IndexSetRoot,
    /// Object indexes, one per split component.
    pub objects: Vec<IndexSetRoot>,
    /// Array index indexes, one per split component.
    pub array_indexes: Vec<IndexSetRoot>,
    /// Object registrations by object id.
    pub registrations: DeltaRoot,
    /// Call nesting per thread.
    pub nesting: BTreeMap<u32, OpenCloseIndexRoot>,
    /// Split of object ids the indexes were built with.
    pub object_split: SplitScheme,
    /// Split of array indexes the indexes were built with.
    pub array_index_split: SplitScheme,
}

/// Every index of one storage node.
pub struct Indexes {
    pager: Arc<PagedFile>,
    stats: Arc<BTreeStats>,
    timestamps: Arc<SequenceTree<EventRef>>,
    simple: FxHashMap<Attribute, IndexSet<EventRef>>,
    behaviors: IndexSet<RoleRef>,
    objects: Vec<IndexSet<RoleRef>>,
    array_indexes: Vec<IndexSet<EventRef>>,
    object_split: SplitScheme,
    array_index_split: SplitScheme,
    registrations: DeltaTree<ObjectRef>,
    nesting: RwLock<FxHashMap<u32, Arc<OpenCloseIndex>>>,
}

const OBJECT_PART_NAMES: [&str; 8] = [
    "object0", "object1", "object2", "object3", "object4", "object5", "object6", "object7",
];
const ARRAY_PART_NAMES: [&str; 8] = [
    "array_index0",
    "array_index1",
    "array_index2",
    "array_index3",
    "array_index4",
    "array_index5",
    "array_index6",
    "array_index7",
];

fn part_name(names: &[&'static str; 8], part: usize) -> &'static str {
    names.get(part).copied().unwrap_or("split_part")
}

impl Indexes {
    /// Creates empty indexes.
    pub fn new(
        pager: Arc<PagedFile>,
        stats: Arc<BTreeStats>,
        object_split: SplitScheme,
        array_index_split: SplitScheme,
    ) -> Result<Self> {
        object_split.validate()?;
        array_index_split.validate()?;
        let simple = Attribute::SIMPLE
            .iter()
            .map(|attr| {
                (
                    *attr,
                    IndexSet::new(attr.name(), Arc::clone(&pager), Arc::clone(&stats)),
                )
            })
            .collect();
        let objects = (0..object_split.parts())
            .map(|i| {
                IndexSet::new(
                    part_name(&OBJECT_PART_NAMES, i),
                    Arc::clone(&pager),
                    Arc::clone(&stats),
                )
            })
            .collect();
        let array_indexes = (0..array_index_split.parts())
            .map(|i| {
                IndexSet::new(
                    part_name(&ARRAY_PART_NAMES, i),
                    Arc::clone(&pager),
                    Arc::clone(&stats),
                )
            })
            .collect();
        Ok(Self {
            timestamps: Arc::new(SequenceTree::new(Arc::clone(&pager), Arc::clone(&stats))),
            behaviors: IndexSet::new("behavior", Arc::clone(&pager), Arc::clone(&stats)),
            registrations: DeltaTree::new(Arc::clone(&pager), Arc::clone(&stats)),
            simple,
            objects,
            array_indexes,
            object_split,
            array_index_split,
            nesting: RwLock::new(FxHashMap::default()),
            pager,
            stats,
        })
    }

    /// Reattaches indexes described by [`Indexes::root`]. The split schemes
    /// must equal the ones the indexes were built with.
    pub fn restore(
        pager: Arc<PagedFile>,
        stats: Arc<BTreeStats>,
        object_split: SplitScheme,
        array_index_split: SplitScheme,
        root: &IndexesRoot,
    ) -> Result<Self> {
        check_split("object_split", &root.object_split, &object_split)?;
        check_split("array_index_split", &root.array_index_split, &array_index_split)?;
        let mut simple = FxHashMap::default();
        for attr in Attribute::SIMPLE {
            let set = match root.simple.get(attr.name()) {
                Some(set_root) => IndexSet::restore(
                    attr.name(),
                    Arc::clone(&pager),
                    Arc::clone(&stats),
                    set_root,
                )?,
                None => IndexSet::new(attr.name(), Arc::clone(&pager), Arc::clone(&stats)),
            };
            simple.insert(attr, set);
        }
        let objects = root
            .objects
            .iter()
            .enumerate()
            .map(|(i, set_root)| {
                IndexSet::restore(
                    part_name(&OBJECT_PART_NAMES, i),
                    Arc::clone(&pager),
                    Arc::clone(&stats),
                    set_root,
                )
            })
            .collect::<Result<Vec<_>>>()?;
        let array_indexes = root
            .array_indexes
            .iter()
            .enumerate()
            .map(|(i, set_root)| {
                IndexSet::restore(
                    part_name(&ARRAY_PART_NAMES, i),
                    Arc::clone(&pager),
                    Arc::clone(&stats),
                    set_root,
                )
            })
            .collect::<Result<Vec<_>>>()?;
        if objects.len() != object_split.parts() || array_indexes.len() != array_index_split.parts() {
            return Err(TraceError::Corruption("split index count differs from scheme"));
        }
        let mut nesting = FxHashMap::default();
        for (thread, nest_root) in &root.nesting {
            let index = OpenCloseIndex::restore(Arc::clone(&pager), Arc::clone(&stats), nest_root)?;
            nesting.insert(*thread, Arc::new(index));
        }
        Ok(Self {
            timestamps: Arc::new(SequenceTree::restore(
                Arc::clone(&pager),
                Arc::clone(&stats),
                &root.timestamps,
            )?),
            behaviors: IndexSet::restore("behavior", Arc::clone(&pager), Arc::clone(&stats), &root.behaviors)?,
            registrations: DeltaTree::restore(Arc::clone(&pager), Arc::clone(&stats), &root.registrations)?,
            simple,
            objects,
            array_indexes,
            object_split,
            array_index_split,
            nesting: RwLock::new(nesting),
            pager,
            stats,
        })
    }

    /// Persisted form of every index.
    pub fn root(&self) -> IndexesRoot {
        IndexesRoot {
            timestamps: self.timestamps.root(),
            simple: self
                .simple
                .iter()
                .map(|(attr, set)| (attr.name().to_string(), set.root()))
                .collect(),
            behaviors: self.behaviors.root(),
            objects: self.objects.iter().map(IndexSet::root).collect(),
            array_indexes: self.array_indexes.iter().map(IndexSet::root).collect(),
            registrations: self.registrations.root(),
            nesting: self
                .nesting
                .read()
                .iter()
                .map(|(thread, index)| (*thread, index.root()))
                .collect(),
            object_split: self.object_split,
            array_index_split: self.array_index_split,
        }
    }

    /// Split scheme used for the attribute, if it is split.
    pub fn split_scheme(&self, attribute: Attribute) -> Option<SplitScheme> {
        match attribute {
            Attribute::Object => Some(self.object_split),
            Attribute::ArrayIndex => Some(self.array_index_split),
            _ => None,
        }
    }

    /// Every event, keyed by timestamp.
    pub fn timestamps(&self) -> &Arc<SequenceTree<EventRef>> {
        &self.timestamps
    }

    /// Resolves a physical index and value to its tree, `None` when no event
    /// carried the value.
    pub fn tree(&self, id: IndexId, value: u64) -> Result<Option<IndexTree>> {
        let part = id.part as usize;
        Ok(match id.attribute {
            Attribute::Behavior => self.behaviors.get(value).map(IndexTree::Roles),
            Attribute::Object => self
                .objects
                .get(part)
                .ok_or(TraceError::Invalid("object part out of range"))?
                .get(value)
                .map(IndexTree::Roles),
            Attribute::ArrayIndex => self
                .array_indexes
                .get(part)
                .ok_or(TraceError::Invalid("array index part out of range"))?
                .get(value)
                .map(IndexTree::Plain),
            simple => self.simple_set(simple)?.get(value).map(IndexTree::Plain),
        })
    }

    fn simple_set(&self, attribute: Attribute) -> Result<&IndexSet<EventRef>> {
        self.simple
            .get(&attribute)
            .ok_or(TraceError::Invalid("attribute has no simple index"))
    }

    /// Number of distinct values indexed for `attribute`.
    pub fn value_count(&self, attribute: Attribute) -> usize {
        match attribute {
            Attribute::Behavior => self.behaviors.value_count(),
            Attribute::Object | Attribute::ArrayIndex => 0,
            simple => self.simple.get(&simple).map_or(0, IndexSet::value_count),
        }
    }

    /// Values seen for a simple attribute, ascending.
    pub fn values(&self, attribute: Attribute) -> Vec<u64> {
        match attribute {
            Attribute::Behavior => self.behaviors.values(),
            simple => self.simple.get(&simple).map(IndexSet::values).unwrap_or_default(),
        }
    }

    /// Indexes `record`, stored at `pointer`. Returns the number of tuples written.
    pub fn index_event(
        &self,
        record: &EventRecord,
        pointer: InternalPointer,
        probes: &dyn ProbeCatalog,
    ) -> Result<usize> {
        let mut w = TupleWriter {
            indexes: self,
            ts: record.header.timestamp,
            pointer,
            written: 0,
        };
        let h = &record.header;
        self.timestamps.insert(w.ts, &EventRef(pointer))?;
        w.written += 1;
        w.simple(Attribute::Kind, u64::from(record.kind().as_u8()))?;
        w.simple(Attribute::Thread, u64::from(h.thread))?;
        w.simple(Attribute::Depth, u64::from(h.depth))?;
        w.simple(Attribute::Probe, u64::from(h.probe))?;
        let mut advice_cflow: SmallVec<[u32; 4]> = h.advice_cflow.iter().copied().collect();
        advice_cflow.sort_unstable();
        advice_cflow.dedup();
        for advice in advice_cflow {
            w.simple(Attribute::AdviceCflow, u64::from(advice))?;
        }
        if let Some(info) = probes.probe(h.probe) {
            if let Some(behavior) = info.behavior {
                w.behavior(behavior, Role::OPERATION)?;
            }
            if let Some(advice) = info.advice_source {
                w.simple(Attribute::Advice, u64::from(advice))?;
            }
        }

        match &record.payload {
            RecordPayload::MethodCall(call)
            | RecordPayload::Instantiation(call)
            | RecordPayload::SuperCall(call) => {
                if let Some(called) = call.called {
                    w.behavior(called, Role::CALLED)?;
                }
                if let Some(executed) = call.executed {
                    w.behavior(executed, Role::EXECUTED)?;
                }
                for (i, arg) in call.arguments.iter().enumerate() {
                    w.object(arg, Role::argument(i)?)?;
                }
                w.object(&call.target, Role::TARGET)?;
                self.nesting(h.thread).push(w.ts, pointer, true)?;
            }
            RecordPayload::BehaviorExit {
                behavior, result, ..
            } => {
                w.behavior(*behavior, Role::EXIT)?;
                w.object(result, Role::RESULT)?;
                self.nesting(h.thread).push(w.ts, pointer, false)?;
            }
            RecordPayload::FieldWrite {
                field,
                target,
                value,
            } => {
                w.simple(Attribute::Field, u64::from(*field))?;
                w.object(target, Role::TARGET)?;
                w.object(value, Role::VALUE)?;
            }
            RecordPayload::ArrayWrite {
                target,
                index,
                value,
            } => {
                w.object(target, Role::TARGET)?;
                w.array_index(u64::from(*index))?;
                w.object(value, Role::VALUE)?;
            }
            RecordPayload::NewArray { target, .. } => {
                w.object(target, Role::TARGET)?;
            }
            RecordPayload::VariableWrite { variable, value } => {
                w.simple(Attribute::Variable, u64::from(*variable))?;
                w.object(value, Role::VALUE)?;
            }
            RecordPayload::InstanceOf { object, .. } => {
                w.object(object, Role::TARGET)?;
            }
            RecordPayload::Exception { exception, .. } => {
                w.object(exception, Role::EXCEPTION)?;
            }
            RecordPayload::Output { .. } => {}
            RecordPayload::Registration {
                object, class_id, ..
            } => {
                self.registrations.insert(
                    object.0,
                    &ObjectRef {
                        pointer,
                        class_id: *class_id,
                    },
                )?;
                w.written += 1;
            }
        }
        Ok(w.written)
    }

    /// Checks that `record` can be indexed, without writing anything: its
    /// timestamp does not go backwards and every split key fits.
    pub fn check_event(&self, record: &EventRecord) -> Result<()> {
        let ts = record.header.timestamp;
        if let Some(last) = self.timestamps.last_key() {
            if ts < last {
                return Err(TraceError::KeyOrder { last, key: ts });
            }
        }
        let mut objects: SmallVec<[&ObjectValue; 4]> = SmallVec::new();
        match &record.payload {
            RecordPayload::MethodCall(call)
            | RecordPayload::Instantiation(call)
            | RecordPayload::SuperCall(call) => {
                if let Some(last) = call.arguments.len().checked_sub(1) {
                    Role::argument(last)?;
                }
                objects.extend(call.arguments.iter());
                objects.push(&call.target);
            }
            RecordPayload::BehaviorExit { result, .. } => objects.push(result),
            RecordPayload::FieldWrite { target, value, .. } => {
                objects.push(target);
                objects.push(value);
            }
            RecordPayload::ArrayWrite {
                target,
                index,
                value,
            } => {
                self.array_index_split.split(u64::from(*index))?;
                objects.push(target);
                objects.push(value);
            }
            RecordPayload::NewArray { target, .. } => objects.push(target),
            RecordPayload::VariableWrite { value, .. } => objects.push(value),
            RecordPayload::InstanceOf { object, .. } => objects.push(object),
            RecordPayload::Exception { exception, .. } => objects.push(exception),
            RecordPayload::Output { .. } | RecordPayload::Registration { .. } => {}
        }
        for id in objects.iter().filter_map(|v| v.object_id()) {
            self.object_split.split(id.0)?;
        }
        Ok(())
    }

    fn nesting(&self, thread: u32) -> Arc<OpenCloseIndex> {
        if let Some(index) = self.nesting.read().get(&thread) {
            return Arc::clone(index);
        }
        let mut nesting = self.nesting.write();
        Arc::clone(nesting.entry(thread).or_insert_with(|| {
            Arc::new(OpenCloseIndex::new(
                Arc::clone(&self.pager),
                Arc::clone(&self.stats),
            ))
        }))
    }

    /// Call nesting of `thread`, if it made any call.
    pub fn thread_nesting(&self, thread: u32) -> Option<Arc<OpenCloseIndex>> {
        self.nesting.read().get(&thread).cloned()
    }

    /// Innermost call of `thread` still open at `timestamp`.
    pub fn enclosing_call(&self, thread: u32, timestamp: u64) -> Result<Option<(u64, InternalPointer)>> {
        match self.thread_nesting(thread) {
            Some(index) => index.enclosing(timestamp),
            None => Ok(None),
        }
    }

    /// True when `thread` is inside some call at `timestamp`.
    pub fn is_inside_call(&self, thread: u32, timestamp: u64) -> Result<bool> {
        match self.thread_nesting(thread) {
            Some(index) => index.is_open_at(timestamp),
            None => Ok(false),
        }
    }

    /// Registration of `object`: the record pointer and class. The most
    /// recent registration wins.
    pub fn find_registration(&self, object: ObjectId) -> Result<Option<ObjectRef>> {
        Ok(self.registrations.get_values(object.0)?.pop())
    }

    /// Number of registered objects, re-registrations included.
    pub fn registration_count(&self) -> u64 {
        self.registrations.len()
    }
}

fn check_split(field: &'static str, stored: &SplitScheme, configured: &SplitScheme) -> Result<()> {
    if stored != configured {
        return Err(TraceError::ConfigMismatch {
            field,
            stored: stored.parts() as u64,
            configured: configured.parts() as u64,
        });
    }
    Ok(())
}

struct TupleWriter<'a> {
    indexes: &'a Indexes,
    ts: u64,
    pointer: InternalPointer,
    written: usize,
}

impl TupleWriter<'_> {
    fn simple(&mut self, attribute: Attribute, value: u64) -> Result<()> {
        self.indexes
            .simple_set(attribute)?
            .add(value, self.ts, &EventRef(self.pointer))?;
        self.written += 1;
        Ok(())
    }

    fn behavior(&mut self, behavior: u32, role: Role) -> Result<()> {
        let tuple = RoleRef {
            pointer: self.pointer,
            role,
        };
        self.indexes.behaviors.add(u64::from(behavior), self.ts, &tuple)?;
        self.written += 1;
        Ok(())
    }

    fn object(&mut self, value: &ObjectValue, role: Role) -> Result<()> {
        let Some(id) = value.object_id() else {
            return Ok(());
        };
        let parts = self.indexes.object_split.split(id.0)?;
        let tuple = RoleRef {
            pointer: self.pointer,
            role,
        };
        for (set, part) in self.indexes.objects.iter().zip(parts) {
            set.add(part, self.ts, &tuple)?;
            self.written += 1;
        }
        Ok(())
    }

    fn array_index(&mut self, index: u64) -> Result<()> {
        let parts = self.indexes.array_index_split.split(index)?;
        for (set, part) in self.indexes.array_indexes.iter().zip(parts) {
            set.add(part, self.ts, &EventRef(self.pointer))?;
            self.written += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::io::MemFileIo;
    use crate::primitives::pager::PagerOptions;
    use crate::storage::record::{BehaviorCall, RecordHeader};
    use crate::types::PageId;

    fn indexes() -> Result<Indexes> {
        let pager = Arc::new(PagedFile::create(
            Arc::new(MemFileIo::new()),
            PagerOptions::default().page_size(1024),
        )?);
        Indexes::new(
            pager,
            Arc::new(BTreeStats::default()),
            SplitScheme::Interleave { parts: 2 },
            SplitScheme::Mask { bits: 16, parts: 2 },
        )
    }

    fn header(ts: u64) -> RecordHeader {
        RecordHeader {
            thread: 1,
            depth: 0,
            timestamp: ts,
            advice_cflow: vec![4],
            probe: 10,
            parent_timestamp: 0,
        }
    }

    fn call(ts: u64, target: u64) -> EventRecord {
        EventRecord::new(
            header(ts),
            RecordPayload::MethodCall(BehaviorCall {
                arguments: vec![ObjectValue::Object(ObjectId(target + 1)), ObjectValue::Int(3)],
                called: Some(7),
                executed: Some(8),
                direct_parent: true,
                target: ObjectValue::Object(ObjectId(target)),
            }),
        )
    }

    #[test]
    fn call_fans_out_to_every_index() -> Result<()> {
        let idx = indexes()?;
        let limits = crate::types::Limits::default();
        let ptr = InternalPointer::pack(0, PageId(1), 0, &limits)?;
        let probes = StaticProbes::new().with(
            10,
            ProbeInfo {
                behavior: Some(7),
                bytecode_index: Some(3),
                advice_source: Some(2),
            },
        );
        let written = idx.index_event(&call(100, 40), ptr, &probes)?;
        // timestamp, kind, thread, depth, probe, cflow, operation, advice,
        // called, executed, two object args split in two, target split in two
        assert_eq!(written, 14);

        let Some(IndexTree::Roles(tree)) = idx.tree(IndexId::whole(Attribute::Behavior), 7)? else {
            panic!("behavior 7 missing");
        };
        let roles: Vec<Role> = tree.get_values(100)?.iter().map(|r| r.role).collect();
        assert_eq!(roles, vec![Role::OPERATION, Role::CALLED]);
        assert!(idx.tree(IndexId::whole(Attribute::Advice), 2)?.is_some());
        assert!(idx.tree(IndexId::whole(Attribute::Field), 7)?.is_none());
        assert!(idx.is_inside_call(1, 150)?);
        assert_eq!(idx.enclosing_call(1, 150)?, Some((100, ptr)));
        assert!(!idx.is_inside_call(2, 150)?);
        Ok(())
    }

    #[test]
    fn exit_closes_the_call() -> Result<()> {
        let idx = indexes()?;
        let limits = crate::types::Limits::default();
        let p0 = InternalPointer::pack(0, PageId(1), 0, &limits)?;
        let p1 = InternalPointer::pack(0, PageId(1), 1, &limits)?;
        idx.index_event(&call(10, 5), p0, &NoProbes)?;
        let exit = EventRecord::new(
            header(20),
            RecordPayload::BehaviorExit {
                behavior: 8,
                has_thrown: false,
                result: ObjectValue::Null,
            },
        );
        idx.index_event(&exit, p1, &NoProbes)?;
        assert!(idx.is_inside_call(1, 15)?);
        assert!(!idx.is_inside_call(1, 25)?);
        let nest = idx.thread_nesting(1).expect("thread 1 nesting");
        assert_eq!(nest.closing(10)?, Some((20, p1)));
        Ok(())
    }

    #[test]
    fn registrations_are_found_by_object() -> Result<()> {
        let idx = indexes()?;
        let limits = crate::types::Limits::default();
        let ptr = InternalPointer::pack(0, PageId(2), 3, &limits)?;
        let reg = EventRecord::new(
            header(5),
            RecordPayload::Registration {
                object: ObjectId(99),
                class_id: 12,
                data: vec![1, 2, 3],
            },
        );
        idx.index_event(&reg, ptr, &NoProbes)?;
        let found = idx.find_registration(ObjectId(99))?.expect("registered");
        assert_eq!(found.pointer, ptr);
        assert_eq!(found.class_id, 12);
        assert!(idx.find_registration(ObjectId(98))?.is_none());
        Ok(())
    }

    #[test]
    fn restore_refuses_other_split() -> Result<()> {
        let idx = indexes()?;
        let root = idx.root();
        let result = Indexes::restore(
            Arc::clone(&idx.pager),
            Arc::new(BTreeStats::default()),
            SplitScheme::Interleave { parts: 3 },
            SplitScheme::Mask { bits: 16, parts: 2 },
            &root,
        );
        assert!(matches!(result, Err(TraceError::ConfigMismatch { field: "object_split", .. })));
        Ok(())
    }
}
