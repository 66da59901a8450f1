use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::db::config::DbConfig;
use crate::primitives::io::{FileIo, MemFileIo, StdFileIo};
use crate::primitives::pager::{PagedFile, PagerStats};
use crate::query::{create_condition, Condition, EventCursor, Evaluator};
use crate::storage::btree::{BTreeStats, BTreeStatsSnapshot, ObjectRef};
use crate::storage::directory::{load_blob, store_blob};
use crate::storage::eventlog::{EventLog, EventLogRoot, EventLogStats};
use crate::storage::index::{Attribute, IndexId, IndexTree, Indexes, IndexesRoot, NoProbes, ProbeCatalog, Role};
use crate::storage::metrics::{default_metrics, StorageMetrics};
use crate::storage::record::EventRecord;
use crate::storage::reorder::{DropListener, ReorderingBuffer};
use crate::types::{ExternalPointer, InternalPointer, ObjectId, Result, TraceError};

const DIRECTORY_VERSION: u32 = 1;

/// Everything needed to reopen the structures of a file.
#[derive(Serialize, Deserialize)]
struct Directory {
    version: u32,
    event_log: EventLogRoot,
    indexes: IndexesRoot,
}

/// Size summary of a database.
#[derive(Clone, Debug, Serialize)]
pub struct DbStats {
    /// Events stored.
    pub events: u64,
    /// Distinct fields written.
    pub fields: usize,
    /// Distinct behaviors seen.
    pub behaviors: usize,
    /// Distinct threads seen.
    pub threads: usize,
    /// Object registrations stored.
    pub registrations: u64,
    /// Pages in the file, meta page included.
    pub pages: u64,
    /// File size implied by the page count.
    pub storage_bytes: u64,
    /// Events waiting in the reordering buffer.
    pub pending: usize,
    /// Events dropped by the reordering buffer.
    pub dropped: u64,
    /// Event log counters.
    pub event_log: EventLogStats,
    /// Page cache counters.
    pub pager: PagerStats,
    /// Tuple index counters.
    pub btree: BTreeStatsSnapshot,
}

/// Trace database of one storage node.
///
/// Ingestion runs through a single writer: events are staged in the
/// reordering buffer by [`TraceDb::push`], or appended directly in
/// timestamp order by [`TraceDb::append`]. Each append writes the record to
/// the event log and then fans it out to every index. Queries may run
/// concurrently from other threads, each owning its cursors.
pub struct TraceDb {
    path: Option<PathBuf>,
    config: DbConfig,
    pager: Arc<PagedFile>,
    btree_stats: Arc<BTreeStats>,
    log: Arc<EventLog>,
    indexes: Arc<Indexes>,
    evaluator: Evaluator,
    ingest: Mutex<ReorderingBuffer<EventRecord>>,
    probes: Arc<dyn ProbeCatalog>,
    metrics: Arc<dyn StorageMetrics>,
}

impl fmt::Debug for TraceDb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TraceDb")
            .field("path", &self.path)
            .field("config", &self.config)
            .field("events", &self.log.len())
            .field("pages", &self.pager.page_count())
            .finish()
    }
}

impl TraceDb {
    /// Creates a database file at `path`, which must not exist or be empty.
    pub fn create(path: impl AsRef<Path>, config: DbConfig) -> Result<Self> {
        config.validate()?;
        let path = path.as_ref();
        let io: Arc<dyn FileIo> = Arc::new(StdFileIo::open(path)?);
        let pager = PagedFile::create(io, config.pager_options())?;
        let db = Self::fresh(Some(path.to_path_buf()), config, pager)?;
        db.flush()?;
        info!(target: "tracedb::db", path = %path.display(), "created trace database");
        Ok(db)
    }

    /// Opens an existing database file. Its persisted settings must match
    /// `config`.
    pub fn open(path: impl AsRef<Path>, config: DbConfig) -> Result<Self> {
        config.validate()?;
        let path = path.as_ref();
        if !path.exists() {
            return Err(TraceError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} does not exist", path.display()),
            )));
        }
        let io: Arc<dyn FileIo> = Arc::new(StdFileIo::open(path)?);
        let pager = Arc::new(PagedFile::open(io, config.pager_options())?);
        let db = match pager.directory_root() {
            Some(root) => {
                let blob = load_blob(&pager, root)?;
                let directory: Directory =
                    serde_json::from_slice(&blob).map_err(|_| TraceError::Corruption("directory is not valid JSON"))?;
                if directory.version != DIRECTORY_VERSION {
                    return Err(TraceError::Corruption("unsupported directory version"));
                }
                Self::restored(Some(path.to_path_buf()), config, pager, &directory)?
            }
            None => Self::assemble(Some(path.to_path_buf()), config, pager, None)?,
        };
        info!(
            target: "tracedb::db",
            path = %path.display(),
            events = db.log.len(),
            pages = db.pager.page_count(),
            "opened trace database"
        );
        Ok(db)
    }

    /// Opens `path` if it holds a database, creates one otherwise.
    pub fn open_or_create(path: impl AsRef<Path>, config: DbConfig) -> Result<Self> {
        let path = path.as_ref();
        let has_data = std::fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false);
        if has_data {
            Self::open(path, config)
        } else {
            Self::create(path, config)
        }
    }

    /// Database backed by memory only.
    pub fn in_memory(config: DbConfig) -> Result<Self> {
        config.validate()?;
        let pager = PagedFile::create(Arc::new(MemFileIo::new()), config.pager_options())?;
        Self::fresh(None, config, pager)
    }

    fn fresh(path: Option<PathBuf>, config: DbConfig, pager: PagedFile) -> Result<Self> {
        Self::assemble(path, config, Arc::new(pager), None)
    }

    fn restored(path: Option<PathBuf>, config: DbConfig, pager: Arc<PagedFile>, directory: &Directory) -> Result<Self> {
        Self::assemble(path, config, pager, Some(directory))
    }

    fn assemble(
        path: Option<PathBuf>,
        config: DbConfig,
        pager: Arc<PagedFile>,
        directory: Option<&Directory>,
    ) -> Result<Self> {
        let btree_stats = Arc::new(BTreeStats::default());
        let (log, indexes) = match directory {
            Some(dir) => (
                EventLog::restore(Arc::clone(&pager), &dir.event_log)?,
                Indexes::restore(
                    Arc::clone(&pager),
                    Arc::clone(&btree_stats),
                    config.object_split,
                    config.array_index_split,
                    &dir.indexes,
                )?,
            ),
            None => (
                EventLog::new(Arc::clone(&pager)),
                Indexes::new(
                    Arc::clone(&pager),
                    Arc::clone(&btree_stats),
                    config.object_split,
                    config.array_index_split,
                )?,
            ),
        };
        let log = Arc::new(log);
        let indexes = Arc::new(indexes);
        let metrics = default_metrics();
        let evaluator = Evaluator::new(
            Arc::clone(&indexes),
            Arc::clone(&log),
            Arc::clone(&metrics),
            config.count_cache_entries,
        );
        let mut ingest = ReorderingBuffer::new(config.reorder_capacity);
        if let Some(last) = indexes.timestamps().last_key() {
            ingest.set_last_released(last);
        }
        Ok(Self {
            path,
            ingest: Mutex::new(ingest),
            config,
            pager,
            btree_stats,
            log,
            indexes,
            evaluator,
            probes: Arc::new(NoProbes),
            metrics,
        })
    }

    /// Routes ingest and query counters to `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<dyn StorageMetrics>) -> Self {
        self.evaluator.set_metrics(Arc::clone(&metrics));
        self.metrics = metrics;
        self
    }

    /// Resolves probe ids to behaviors and advice sources while indexing.
    pub fn with_probes(mut self, probes: Arc<dyn ProbeCatalog>) -> Self {
        self.probes = probes;
        self
    }

    /// Installs the callback told about every event the reordering buffer
    /// drops. Staged events and drop counts are kept.
    pub fn with_drop_listener(self, listener: DropListener) -> Self {
        self.ingest.lock().set_listener(listener);
        self
    }

    /// Settings the database was opened with.
    pub fn config(&self) -> &DbConfig {
        &self.config
    }

    /// Backing file, `None` for in-memory databases.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Index registry.
    pub fn indexes(&self) -> &Arc<Indexes> {
        &self.indexes
    }

    /// Event log.
    pub fn event_log(&self) -> &Arc<EventLog> {
        &self.log
    }

    /// Stages `record` in the reordering buffer, appending the oldest
    /// staged event once the window is full. Returns false when the record
    /// arrived too late and was dropped.
    pub fn push(&self, record: EventRecord) -> Result<bool> {
        let mut ingest = self.ingest.lock();
        if !ingest.push(record) {
            self.metrics.event_dropped();
            return Ok(false);
        }
        if ingest.is_full() {
            if let Some(ready) = ingest.pop() {
                self.append_locked(&ready)?;
            }
        }
        Ok(true)
    }

    /// Appends every staged event.
    pub fn drain(&self) -> Result<usize> {
        let mut ingest = self.ingest.lock();
        let staged = ingest.drain();
        for record in &staged {
            self.append_locked(record)?;
        }
        Ok(staged.len())
    }

    /// Appends `record` directly. Its timestamp must not be below the last
    /// appended one. Later pushes older than `record` are dropped.
    pub fn append(&self, record: &EventRecord) -> Result<InternalPointer> {
        let mut ingest = self.ingest.lock();
        let pointer = self.append_locked(record)?;
        ingest.set_last_released(record.header.timestamp);
        Ok(pointer)
    }

    fn append_locked(&self, record: &EventRecord) -> Result<InternalPointer> {
        self.indexes.check_event(record)?;
        let bytes = record.to_bytes(self.pager.limits())?;
        let pointer = self.log.append_bytes(&bytes)?;
        let tuples = self.indexes.index_event(record, pointer, self.probes.as_ref())?;
        self.metrics.event_appended(bytes.len() + 2);
        self.metrics.tuples_indexed(tuples);
        Ok(pointer)
    }

    /// Persists every structure root and dirty page.
    pub fn flush(&self) -> Result<()> {
        let _ingest = self.ingest.lock();
        self.flush_locked()
    }

    fn flush_locked(&self) -> Result<()> {
        let directory = Directory {
            version: DIRECTORY_VERSION,
            event_log: self.log.root(),
            indexes: self.indexes.root(),
        };
        let blob = serde_json::to_vec(&directory).map_err(|_| TraceError::Invalid("directory cannot be serialized"))?;
        let root = store_blob(&self.pager, self.pager.directory_root(), &blob)?;
        self.pager.set_directory_root(Some(root));
        self.pager.flush()?;
        debug!(target: "tracedb::db", events = self.log.len(), bytes = blob.len(), "flushed trace database");
        Ok(())
    }

    /// Appends staged events, flushes and closes.
    pub fn close(self) -> Result<()> {
        self.drain()?;
        self.flush()?;
        info!(target: "tracedb::db", events = self.log.len(), "closed trace database");
        Ok(())
    }

    /// Drops every event and index, leaving an empty database.
    pub fn clear(&mut self) -> Result<()> {
        self.ingest.lock().reset();
        self.pager.clear()?;
        let fresh = Self::assemble(self.path.clone(), self.config.clone(), Arc::clone(&self.pager), None)?;
        self.btree_stats = fresh.btree_stats;
        self.log = fresh.log;
        self.indexes = fresh.indexes;
        self.evaluator = Evaluator::new(
            Arc::clone(&self.indexes),
            Arc::clone(&self.log),
            Arc::clone(&self.metrics),
            self.config.count_cache_entries,
        );
        self.flush()?;
        info!(target: "tracedb::db", "cleared trace database");
        Ok(())
    }

    /// Condition matching `value` of `attribute`, split as configured.
    pub fn create_condition(&self, attribute: Attribute, value: u64, role: Option<Role>) -> Result<Condition> {
        create_condition(&self.indexes, attribute, value, role)
    }

    /// Cursor over the events matched by `condition`, placed before the
    /// first match at or after `from_key`.
    pub fn evaluate(&self, condition: &Condition, from_key: u64) -> Result<EventCursor> {
        self.evaluator.evaluate(condition, from_key)
    }

    /// Decoded record at `pointer`.
    pub fn resolve(&self, pointer: InternalPointer) -> Result<EventRecord> {
        self.log.read(pointer)
    }

    /// Internal pointer of the event `external` names, if stored. The
    /// first of several events sharing thread and timestamp wins.
    pub fn resolve_external(&self, external: ExternalPointer) -> Result<Option<InternalPointer>> {
        let id = IndexId::whole(Attribute::Thread);
        match self.indexes.tree(id, u64::from(external.thread))? {
            Some(IndexTree::Plain(tree)) => Ok(tree.get_values(external.timestamp)?.first().map(|e| e.0)),
            _ => Ok(None),
        }
    }

    /// External identity of the event at `pointer`.
    pub fn external_pointer(&self, pointer: InternalPointer) -> Result<ExternalPointer> {
        Ok(self.resolve(pointer)?.external_pointer())
    }

    /// Matches of `condition` with `t1 <= timestamp <= t2`.
    pub fn count(&self, condition: &Condition, t1: u64, t2: u64) -> Result<u64> {
        self.evaluator.count(condition, t1, t2)
    }

    /// Match counts of `condition` in `slots` equal buckets over `[t1, t2]`.
    pub fn fast_counts(&self, condition: &Condition, t1: u64, t2: u64, slots: usize) -> Result<Vec<u64>> {
        self.evaluator.fast_counts(condition, t1, t2, slots)
    }

    /// Innermost call of `thread` still open at `timestamp`, as its
    /// timestamp and pointer.
    pub fn enclosing_call(&self, thread: u32, timestamp: u64) -> Result<Option<(u64, InternalPointer)>> {
        self.indexes.enclosing_call(thread, timestamp)
    }

    /// True when `thread` is inside some call at `timestamp`.
    pub fn is_inside_call(&self, thread: u32, timestamp: u64) -> Result<bool> {
        self.indexes.is_inside_call(thread, timestamp)
    }

    /// Most recent registration of `object`.
    pub fn find_registration(&self, object: ObjectId) -> Result<Option<ObjectRef>> {
        self.indexes.find_registration(object)
    }

    /// Newest stored timestamp.
    pub fn last_timestamp(&self) -> Option<u64> {
        self.indexes.timestamps().last_key()
    }

    /// Snapshot of sizes and counters.
    pub fn stats(&self) -> DbStats {
        let (pending, dropped) = {
            let ingest = self.ingest.lock();
            (ingest.len(), ingest.dropped())
        };
        DbStats {
            events: self.log.len(),
            fields: self.indexes.value_count(Attribute::Field),
            behaviors: self.indexes.value_count(Attribute::Behavior),
            threads: self.indexes.value_count(Attribute::Thread),
            registrations: self.indexes.registration_count(),
            pages: self.pager.page_count(),
            storage_bytes: self.pager.storage_bytes(),
            pending,
            dropped,
            event_log: self.log.stats(),
            pager: self.pager.stats(),
            btree: self.btree_stats.snapshot(),
        }
    }
}
