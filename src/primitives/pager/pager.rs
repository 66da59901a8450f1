use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, info};

use super::meta::Meta;
use crate::primitives::io::FileIo;
use crate::types::{
    page::{self, PageKind},
    Limits, PageId, Result, TraceError,
};

const MIN_CACHE_PAGES: usize = 8;

/// Settings for opening or creating a [`PagedFile`].
#[derive(Clone, Debug)]
pub struct PagerOptions {
    /// Size of every page in bytes.
    pub page_size: u32,
    /// Memory budget of the page cache.
    pub cache_bytes: usize,
    /// Id-space widths persisted in the meta page.
    pub limits: Limits,
    /// Storage node that owns the file.
    pub node_id: u32,
}

impl Default for PagerOptions {
    fn default() -> Self {
        Self {
            page_size: page::DEFAULT_PAGE_SIZE,
            cache_bytes: 64 << 20,
            limits: Limits::default(),
            node_id: 0,
        }
    }
}

impl PagerOptions {
    /// Sets the page size.
    pub fn page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    /// Sets the cache budget.
    pub fn cache_bytes(mut self, cache_bytes: usize) -> Self {
        self.cache_bytes = cache_bytes;
        self
    }

    /// Sets the id-space widths.
    pub fn limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Sets the node id.
    pub fn node_id(mut self, node_id: u32) -> Self {
        self.node_id = node_id;
        self
    }
}

/// Counters describing cache behavior.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PagerStats {
    /// Lookups served from the cache.
    pub hits: u64,
    /// Lookups that read the file.
    pub misses: u64,
    /// Frames dropped from the cache.
    pub evictions: u64,
    /// Dirty frames written to the file.
    pub writebacks: u64,
    /// Pages handed out by `allocate`.
    pub allocations: u64,
}

#[derive(Default)]
struct PagerCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    writebacks: AtomicU64,
    allocations: AtomicU64,
}

struct Frame {
    data: RwLock<Box<[u8]>>,
    dirty: AtomicBool,
}

impl Frame {
    fn new(data: Box<[u8]>, dirty: bool) -> Arc<Self> {
        Arc::new(Self {
            data: RwLock::new(data),
            dirty: AtomicBool::new(dirty),
        })
    }
}

/// Shared handle to a cached page.
///
/// Any live handle keeps its frame resident: the cache only evicts frames that
/// nobody holds, which is how structures pin their write tail.
#[derive(Clone)]
pub struct Page {
    id: PageId,
    frame: Arc<Frame>,
}

impl Page {
    /// Page id.
    pub fn id(&self) -> PageId {
        self.id
    }

    /// Page size in bytes.
    pub fn len(&self) -> usize {
        self.frame.data.read().len()
    }

    /// Always false; pages have a fixed non-zero size.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Runs `f` over the page bytes under a shared lock.
    pub fn read<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let guard = self.frame.data.read();
        f(&guard)
    }

    /// Runs `f` over the page bytes under an exclusive lock and marks the page dirty.
    pub fn write<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut guard = self.frame.data.write();
        let out = f(&mut guard);
        self.frame.dirty.store(true, Ordering::Release);
        out
    }

    /// Kind byte at the start of the page.
    pub fn kind(&self) -> Result<PageKind> {
        self.read(|buf| PageKind::try_from(buf[page::KIND_OFFSET]))
    }
}

impl fmt::Debug for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Page")
            .field("id", &self.id)
            .field("dirty", &self.frame.dirty.load(Ordering::Relaxed))
            .finish()
    }
}

struct PagerState {
    cache: LruCache<PageId, Arc<Frame>>,
    meta: Meta,
}

/// Growable file of fixed-size pages behind a bounded write-back cache.
pub struct PagedFile {
    io: Arc<dyn FileIo>,
    page_size: usize,
    limits: Limits,
    capacity_pages: usize,
    state: Mutex<PagerState>,
    counters: PagerCounters,
}

impl PagedFile {
    /// Initializes an empty file.
    pub fn create(io: Arc<dyn FileIo>, options: PagerOptions) -> Result<Self> {
        options.limits.validate()?;
        if !io.is_empty()? {
            return Err(TraceError::Invalid("cannot create over a non-empty file"));
        }
        let meta = Meta::new(options.page_size, &options.limits, options.node_id)?;
        meta.store(io.as_ref())?;
        io.sync_all()?;
        info!(
            target: "tracedb::pager",
            page_size = options.page_size,
            node = options.node_id,
            "created paged file"
        );
        Ok(Self::with_meta(io, options, meta))
    }

    /// Opens an initialized file, validating it against `options`.
    pub fn open(io: Arc<dyn FileIo>, options: PagerOptions) -> Result<Self> {
        options.limits.validate()?;
        let meta = Meta::load(io.as_ref())?;
        if meta.page_size != options.page_size {
            return Err(TraceError::ConfigMismatch {
                field: "page_size",
                stored: u64::from(meta.page_size),
                configured: u64::from(options.page_size),
            });
        }
        if meta.node_id != options.node_id {
            return Err(TraceError::ConfigMismatch {
                field: "node_id",
                stored: u64::from(meta.node_id),
                configured: u64::from(options.node_id),
            });
        }
        options.limits.ensure_matches(&meta.limits)?;
        info!(
            target: "tracedb::pager",
            pages = meta.next_page.0,
            "opened paged file"
        );
        Ok(Self::with_meta(io, options, meta))
    }

    /// Opens `io` if it holds a file, creates one otherwise.
    pub fn open_or_create(io: Arc<dyn FileIo>, options: PagerOptions) -> Result<Self> {
        if io.is_empty()? {
            Self::create(io, options)
        } else {
            Self::open(io, options)
        }
    }

    fn with_meta(io: Arc<dyn FileIo>, options: PagerOptions, meta: Meta) -> Self {
        let page_size = options.page_size as usize;
        let capacity_pages = (options.cache_bytes / page_size).max(MIN_CACHE_PAGES);
        Self {
            io,
            page_size,
            limits: options.limits,
            capacity_pages,
            state: Mutex::new(PagerState {
                cache: LruCache::unbounded(),
                meta,
            }),
            counters: PagerCounters::default(),
        }
    }

    /// Page size in bytes.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Id-space widths of this file.
    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    /// Node id recorded in the meta page.
    pub fn node_id(&self) -> u32 {
        self.state.lock().meta.node_id
    }

    /// Number of pages including the meta page.
    pub fn page_count(&self) -> u64 {
        self.state.lock().meta.next_page.0
    }

    /// Bytes occupied by all pages.
    pub fn storage_bytes(&self) -> u64 {
        self.page_count() * self.page_size as u64
    }

    /// Head of the directory chain.
    pub fn directory_root(&self) -> Option<PageId> {
        self.state.lock().meta.directory_root
    }

    /// Records the head of the directory chain; persisted by the next flush.
    pub fn set_directory_root(&self, root: Option<PageId>) {
        self.state.lock().meta.directory_root = root;
    }

    /// Returns true when `id` names an allocated data page.
    pub fn contains(&self, id: PageId) -> bool {
        id.0 != 0 && id.0 < self.page_count()
    }

    /// Hands out a zeroed page whose first byte is `kind`.
    pub fn allocate(&self, kind: PageKind) -> Result<Page> {
        let mut state = self.state.lock();
        let id = state.meta.next_page;
        state.meta.next_page = PageId(id.0 + 1);
        let mut data = vec![0u8; self.page_size].into_boxed_slice();
        data[page::KIND_OFFSET] = kind.as_u8();
        let frame = Frame::new(data, true);
        state.cache.put(id, Arc::clone(&frame));
        self.counters.allocations.fetch_add(1, Ordering::Relaxed);
        debug!(target: "tracedb::pager", page = id.0, ?kind, "allocated page");
        self.evict(&mut state)?;
        Ok(Page { id, frame })
    }

    /// Returns the page `id`, reading it from the file on a cache miss.
    pub fn get(&self, id: PageId) -> Result<Page> {
        let mut state = self.state.lock();
        if id.0 == 0 || id >= state.meta.next_page {
            return Err(TraceError::Corruption("page id out of range"));
        }
        if let Some(frame) = state.cache.get(&id) {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Page {
                id,
                frame: Arc::clone(frame),
            });
        }
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        let mut data = vec![0u8; self.page_size].into_boxed_slice();
        self.io.read_at(self.offset(id), &mut data)?;
        let frame = Frame::new(data, false);
        state.cache.put(id, Arc::clone(&frame));
        self.evict(&mut state)?;
        Ok(Page { id, frame })
    }

    fn offset(&self, id: PageId) -> u64 {
        id.0 * self.page_size as u64
    }

    fn write_back(&self, id: PageId, frame: &Frame) -> Result<()> {
        if frame.dirty.swap(false, Ordering::AcqRel) {
            let data = frame.data.read();
            self.io.write_at(self.offset(id), &data)?;
            self.counters.writebacks.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    fn evict(&self, state: &mut PagerState) -> Result<()> {
        while state.cache.len() > self.capacity_pages {
            let victim = state
                .cache
                .iter()
                .rev()
                .find(|(_, frame)| Arc::strong_count(frame) == 1)
                .map(|(id, _)| *id);
            let Some(id) = victim else {
                break;
            };
            if let Some(frame) = state.cache.pop(&id) {
                self.write_back(id, &frame)?;
                self.counters.evictions.fetch_add(1, Ordering::Relaxed);
                debug!(target: "tracedb::pager", page = id.0, "evicted page");
            }
        }
        Ok(())
    }

    /// Writes every dirty page and the meta page, then syncs.
    pub fn flush(&self) -> Result<()> {
        let state = self.state.lock();
        let mut written = 0usize;
        for (id, frame) in state.cache.iter() {
            if frame.dirty.load(Ordering::Acquire) {
                self.write_back(*id, frame)?;
                written += 1;
            }
        }
        state.meta.store(self.io.as_ref())?;
        self.io.sync_all()?;
        debug!(target: "tracedb::pager", written, pages = state.meta.next_page.0, "flushed");
        Ok(())
    }

    /// Drops every data page, leaving only the meta page.
    pub fn clear(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.cache.clear();
        state.meta.next_page = PageId(1);
        state.meta.directory_root = None;
        self.io.truncate(self.page_size as u64)?;
        state.meta.store(self.io.as_ref())?;
        self.io.sync_all()?;
        info!(target: "tracedb::pager", "cleared paged file");
        Ok(())
    }

    /// Snapshot of the cache counters.
    pub fn stats(&self) -> PagerStats {
        PagerStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            writebacks: self.counters.writebacks.load(Ordering::Relaxed),
            allocations: self.counters.allocations.load(Ordering::Relaxed),
        }
    }

    /// Number of frames currently cached.
    pub fn cached_pages(&self) -> usize {
        self.state.lock().cache.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::io::{MemFileIo, StdFileIo};
    use tempfile::tempdir;

    fn small() -> PagerOptions {
        PagerOptions::default().page_size(512).cache_bytes(512 * 8)
    }

    #[test]
    fn create_open_roundtrip() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pages.db");
        {
            let io: Arc<dyn FileIo> = Arc::new(StdFileIo::open(&path)?);
            let pager = PagedFile::create(io, small())?;
            let page = pager.allocate(PageKind::EventLog)?;
            page.write(|buf| buf[100..104].copy_from_slice(b"DATA"));
            pager.set_directory_root(Some(page.id()));
            pager.flush()?;
        }
        let io: Arc<dyn FileIo> = Arc::new(StdFileIo::open(&path)?);
        let pager = PagedFile::open(io, small())?;
        assert_eq!(pager.page_count(), 2);
        assert_eq!(pager.directory_root(), Some(PageId(1)));
        let page = pager.get(PageId(1))?;
        assert_eq!(page.kind()?, PageKind::EventLog);
        page.read(|buf| assert_eq!(&buf[100..104], b"DATA"));
        Ok(())
    }

    #[test]
    fn open_rejects_other_page_size() -> Result<()> {
        let io: Arc<dyn FileIo> = Arc::new(MemFileIo::new());
        PagedFile::create(Arc::clone(&io), small())?;
        match PagedFile::open(io, small().page_size(1024)) {
            Err(TraceError::ConfigMismatch { field, .. }) => assert_eq!(field, "page_size"),
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
        Ok(())
    }

    #[test]
    fn eviction_writes_back_and_skips_held_pages() -> Result<()> {
        let io: Arc<dyn FileIo> = Arc::new(MemFileIo::new());
        let pager = PagedFile::create(io, small())?;
        let tail = pager.allocate(PageKind::EventLog)?;
        tail.write(|buf| buf[1] = 0xAB);
        for i in 0..40u8 {
            let page = pager.allocate(PageKind::EventLog)?;
            page.write(|buf| buf[1] = i);
        }
        assert!(pager.cached_pages() <= 9);
        assert!(pager.stats().evictions > 0);
        // The held tail is still resident and shares its frame.
        let again = pager.get(tail.id())?;
        again.read(|buf| assert_eq!(buf[1], 0xAB));
        assert!(pager.stats().hits >= 1);
        // An evicted page comes back from the file intact.
        let early = pager.get(PageId(3))?;
        early.read(|buf| assert_eq!(buf[1], 1));
        Ok(())
    }

    #[test]
    fn get_out_of_range_fails() -> Result<()> {
        let pager = PagedFile::create(Arc::new(MemFileIo::new()), small())?;
        assert!(pager.get(PageId(0)).is_err());
        assert!(pager.get(PageId(1)).is_err());
        Ok(())
    }

    #[test]
    fn clear_resets_page_count() -> Result<()> {
        let pager = PagedFile::create(Arc::new(MemFileIo::new()), small())?;
        for _ in 0..5 {
            pager.allocate(PageKind::SequenceLeaf)?;
        }
        pager.flush()?;
        pager.clear()?;
        assert_eq!(pager.page_count(), 1);
        assert_eq!(pager.storage_bytes(), 512);
        Ok(())
    }
}
