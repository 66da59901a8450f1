//! Append-only page chain of length-prefixed event records.
//!
//! Page layout:
//!
//! | bytes        | contents                                    |
//! |--------------|---------------------------------------------|
//! | `0`          | page kind                                   |
//! | tuple count  | ordinal of the first record on the page     |
//! | ...          | records: `u16` length (itself included) + bytes |
//! | 2            | `0` end marker                              |
//! | page pointer | next page of the chain                      |
//!
//! A record is addressed by `(node, page, slot)`; reading slot `n` walks the
//! `n` records before it.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::primitives::bytes::{ByteBuf, ByteReader, TypedReader, TypedWriter};
use crate::primitives::pager::{Page, PageIOStream, PagedFile};
use crate::storage::record::EventRecord;
use crate::types::page::{expect_kind, PageKind};
use crate::types::{Field, InternalPointer, Limits, PageId, Result, TraceError};

const LEN_PREFIX: usize = 2;

/// Persisted form of an [`EventLog`].
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventLogRoot {
    /// First page of the chain.
    pub first_page: Option<u64>,
    /// Page receiving appends.
    pub tail_page: Option<u64>,
    /// Write offset in the tail page.
    pub pos: u32,
    /// Records in the tail page.
    pub slot: u32,
    /// Records appended.
    pub count: u64,
    /// Record bytes, length prefixes included.
    pub bytes: u64,
    /// Pages in the chain.
    pub pages: u64,
}

/// Size counters of an [`EventLog`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct EventLogStats {
    /// Records appended.
    pub count: u64,
    /// Record bytes, length prefixes included.
    pub bytes: u64,
    /// Pages in the chain.
    pub pages: u64,
    /// Mean record size.
    pub average_size: f64,
}

impl EventLogStats {
    /// Logs the counters at info level.
    pub fn emit_tracing(&self) {
        tracing::info!(
            target: "tracedb::eventlog",
            count = self.count,
            bytes = self.bytes,
            pages = self.pages,
            average_size = self.average_size,
            "event log stats"
        );
    }
}

struct Tail {
    page: Page,
    pos: usize,
    slot: u32,
}

#[derive(Default)]
struct LogState {
    first_page: Option<PageId>,
    tail: Option<Tail>,
    count: u64,
    bytes: u64,
    pages: u64,
}

struct LogPages {
    pager: Arc<PagedFile>,
    limits: Limits,
    header_len: usize,
}

/// Where the walk over one page stopped.
enum Step {
    Record(Vec<u8>, usize),
    End(Option<PageId>),
}

impl LogPages {
    fn load(&self, id: PageId) -> Result<Page> {
        let page = self.pager.get(id)?;
        page.read(|buf| expect_kind(buf, PageKind::EventLog))?;
        Ok(page)
    }

    /// Decodes whatever sits at `pos`: a record or the end marker.
    fn step(&self, page: &Page, pos: usize) -> Result<Step> {
        page.read(|buf| {
            let mut r = ByteReader::new(self.limits, buf);
            r.seek(pos);
            let len = r.read_u16()? as usize;
            if len == 0 {
                return Ok(Step::End(r.read_page_pointer()?));
            }
            if len < LEN_PREFIX || pos + len > buf.len() {
                return Err(TraceError::Corruption("record length out of page"));
            }
            Ok(Step::Record(buf[pos + LEN_PREFIX..pos + len].to_vec(), pos + len))
        })
    }

    fn first_ordinal(&self, page: &Page) -> Result<u64> {
        PageIOStream::at(page.clone(), self.limits, 1).read_tuple_count()
    }
}

/// Append-only store of encoded event records.
pub struct EventLog {
    pages: Arc<LogPages>,
    state: Mutex<LogState>,
}

impl EventLog {
    /// Empty log; pages are allocated on the first append.
    pub fn new(pager: Arc<PagedFile>) -> Self {
        let limits = *pager.limits();
        Self {
            pages: Arc::new(LogPages {
                header_len: 1 + limits.bytes(Field::TupleCount),
                pager,
                limits,
            }),
            state: Mutex::new(LogState::default()),
        }
    }

    /// Reopens a log from its persisted root.
    pub fn restore(pager: Arc<PagedFile>, root: &EventLogRoot) -> Result<Self> {
        let log = Self::new(pager);
        let tail = match root.tail_page {
            Some(id) => Some(Tail {
                page: log.pages.load(PageId(id))?,
                pos: root.pos as usize,
                slot: root.slot,
            }),
            None => None,
        };
        *log.state.lock() = LogState {
            first_page: root.first_page.map(PageId),
            tail,
            count: root.count,
            bytes: root.bytes,
            pages: root.pages,
        };
        Ok(log)
    }

    /// Persisted form of the current state.
    pub fn root(&self) -> EventLogRoot {
        let state = self.state.lock();
        EventLogRoot {
            first_page: state.first_page.map(|p| p.0),
            tail_page: state.tail.as_ref().map(|t| t.page.id().0),
            pos: state.tail.as_ref().map_or(0, |t| t.pos as u32),
            slot: state.tail.as_ref().map_or(0, |t| t.slot),
            count: state.count,
            bytes: state.bytes,
            pages: state.pages,
        }
    }

    /// Largest encoded record a page can hold.
    pub fn max_record_len(&self) -> usize {
        let page_size = self.pages.pager.page_size();
        let trailer = LEN_PREFIX + self.pages.limits.page_pointer_size();
        (page_size - self.pages.header_len - trailer - LEN_PREFIX).min(u16::MAX as usize - LEN_PREFIX)
    }

    /// Number of records appended.
    pub fn len(&self) -> u64 {
        self.state.lock().count
    }

    /// True before the first append.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Size counters.
    pub fn stats(&self) -> EventLogStats {
        let state = self.state.lock();
        EventLogStats {
            count: state.count,
            bytes: state.bytes,
            pages: state.pages,
            average_size: if state.count == 0 {
                0.0
            } else {
                state.bytes as f64 / state.count as f64
            },
        }
    }

    /// Encodes and appends `record`.
    pub fn append(&self, record: &EventRecord) -> Result<InternalPointer> {
        let bytes = record.to_bytes(&self.pages.limits)?;
        self.append_bytes(&bytes)
    }

    /// Appends an already encoded record.
    pub fn append_bytes(&self, bytes: &[u8]) -> Result<InternalPointer> {
        if bytes.len() > self.max_record_len() {
            return Err(TraceError::EncodingOverflow {
                field: "record length",
                value: bytes.len() as u64,
                bits: 16,
            });
        }
        let limits = self.pages.limits;
        let page_size = self.pages.pager.page_size();
        let trailer = LEN_PREFIX + limits.page_pointer_size();
        let total = LEN_PREFIX + bytes.len();

        let mut state = self.state.lock();
        let fits = state
            .tail
            .as_ref()
            .map_or(false, |t| t.pos + total + trailer <= page_size);
        if !fits {
            let page = self.pages.pager.allocate(PageKind::EventLog)?;
            PageIOStream::at(page.clone(), limits, 1).write_tuple_count(state.count)?;
            match state.tail.take() {
                Some(old) => {
                    let mut w = PageIOStream::at(old.page.clone(), limits, old.pos);
                    let mut end = Vec::with_capacity(trailer);
                    end.extend_from_slice(&0u16.to_be_bytes());
                    let mut ptr = ByteBuf::new(limits);
                    ptr.write_page_pointer(Some(page.id()))?;
                    end.extend_from_slice(ptr.as_slice());
                    w.put_bytes(&end)?;
                    debug!(
                        target: "tracedb::eventlog",
                        sealed = old.page.id().0,
                        next = page.id().0,
                        records = old.slot,
                        "sealed event page"
                    );
                }
                None => state.first_page = Some(page.id()),
            }
            state.pages += 1;
            state.tail = Some(Tail {
                page,
                pos: self.pages.header_len,
                slot: 0,
            });
        }

        let node = self.pages.pager.node_id();
        let tail = state
            .tail
            .as_mut()
            .ok_or(TraceError::Corruption("event log has no tail page"))?;
        let pointer = InternalPointer::pack(node, tail.page.id(), tail.slot, &limits)?;
        let mut entry = Vec::with_capacity(total);
        entry.extend_from_slice(&(total as u16).to_be_bytes());
        entry.extend_from_slice(bytes);
        let pos = tail.pos;
        tail.page
            .write(|buf| buf[pos..pos + total].copy_from_slice(&entry));
        tail.pos += total;
        tail.slot += 1;
        state.count += 1;
        state.bytes += total as u64;
        Ok(pointer)
    }

    /// Encoded bytes of the record at `pointer`.
    pub fn read_bytes(&self, pointer: InternalPointer) -> Result<Vec<u8>> {
        let limits = self.pages.limits;
        let (node, page_id, slot) = pointer.unpack(&limits);
        if node != self.pages.pager.node_id() || !self.pages.pager.contains(page_id) {
            return Err(TraceError::RecordNotFound(pointer));
        }
        let page = self.pages.load(page_id).map_err(|_| TraceError::RecordNotFound(pointer))?;
        let mut pos = self.pages.header_len;
        let mut index = 0u32;
        loop {
            match self.pages.step(&page, pos)? {
                Step::Record(bytes, next) => {
                    if index == slot {
                        return Ok(bytes);
                    }
                    index += 1;
                    pos = next;
                }
                Step::End(_) => return Err(TraceError::RecordNotFound(pointer)),
            }
        }
    }

    /// Decoded record at `pointer`.
    pub fn read(&self, pointer: InternalPointer) -> Result<EventRecord> {
        let bytes = self.read_bytes(pointer)?;
        EventRecord::from_bytes(&self.pages.limits, &bytes)
    }

    /// Ordinal of the first record stored on `page`.
    pub fn first_ordinal(&self, page: PageId) -> Result<u64> {
        let page = self.pages.load(page)?;
        self.pages.first_ordinal(&page)
    }

    /// Walks the whole chain in append order. Records appended while the
    /// walk is under way are picked up when it reaches them.
    pub fn iter(&self) -> EventLogIter {
        EventLogIter {
            pages: Arc::clone(&self.pages),
            next_page: self.state.lock().first_page,
            page: None,
            pos: 0,
            slot: 0,
        }
    }
}

/// Iterator over every record of an [`EventLog`].
pub struct EventLogIter {
    pages: Arc<LogPages>,
    next_page: Option<PageId>,
    page: Option<Page>,
    pos: usize,
    slot: u32,
}

impl EventLogIter {
    fn advance(&mut self) -> Result<Option<(InternalPointer, Vec<u8>)>> {
        loop {
            let page = match &self.page {
                Some(page) => page.clone(),
                None => {
                    let Some(id) = self.next_page.take() else {
                        return Ok(None);
                    };
                    let page = self.pages.load(id)?;
                    self.pos = self.pages.header_len;
                    self.slot = 0;
                    self.page = Some(page.clone());
                    page
                }
            };
            match self.pages.step(&page, self.pos)? {
                Step::Record(bytes, next) => {
                    let pointer = InternalPointer::pack(
                        self.pages.pager.node_id(),
                        page.id(),
                        self.slot,
                        &self.pages.limits,
                    )?;
                    self.pos = next;
                    self.slot += 1;
                    return Ok(Some((pointer, bytes)));
                }
                Step::End(Some(next)) => {
                    self.page = None;
                    self.next_page = Some(next);
                }
                Step::End(None) => return Ok(None),
            }
        }
    }

    /// Next record without decoding it.
    pub fn next_raw(&mut self) -> Option<Result<(InternalPointer, Vec<u8>)>> {
        self.advance().transpose()
    }
}

impl Iterator for EventLogIter {
    type Item = Result<(InternalPointer, EventRecord)>;

    fn next(&mut self) -> Option<Self::Item> {
        let limits = self.pages.limits;
        self.advance()
            .and_then(|next| {
                next.map(|(pointer, bytes)| {
                    EventRecord::from_bytes(&limits, &bytes).map(|record| (pointer, record))
                })
                .transpose()
            })
            .transpose()
    }
}
