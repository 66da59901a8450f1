//! Bidirectional streams of index hits.

use std::sync::Arc;

use crate::storage::btree::{EventRef, Match, SequenceTree, TupleIterator};
use crate::storage::index::{IndexTree, Role, RoleDomain, RoleRef};
use crate::types::{InternalPointer, Result};

/// Sort position of a hit: timestamp, then pointer.
pub type Pos = (u64, InternalPointer);

/// First position after `pos`.
pub fn successor(pos: Pos) -> Pos {
    match pos.1 .0.checked_add(1) {
        Some(p) => (pos.0, InternalPointer(p)),
        None => (pos.0.saturating_add(1), InternalPointer(0)),
    }
}

/// One tuple produced by a condition.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Hit {
    /// Timestamp of the event.
    pub key: u64,
    /// Where the event is stored.
    pub pointer: InternalPointer,
    /// Role under which the event was indexed, for role-tagged indexes.
    pub role: Option<Role>,
}

impl Hit {
    /// Sort position.
    pub fn pos(&self) -> Pos {
        (self.key, self.pointer)
    }
}

/// Cursor over hits in `(key, pointer)` order.
///
/// The cursor sits between two hits. `next` returns the hit after it and
/// moves past it; `previous` does the opposite. Streams are not shared
/// between threads.
pub trait TupleStream: Send {
    /// Hit after the cursor; moves past it.
    fn next(&mut self) -> Result<Option<Hit>>;

    /// Hit before the cursor; moves before it.
    fn previous(&mut self) -> Result<Option<Hit>>;

    /// Places the cursor before the first hit at or after `pos`.
    fn seek(&mut self, pos: Pos) -> Result<()>;

    /// Hit after the cursor, without moving.
    fn peek_next(&mut self) -> Result<Option<Hit>> {
        let hit = self.next()?;
        if hit.is_some() {
            self.previous()?;
        }
        Ok(hit)
    }

    /// Hit before the cursor, without moving.
    fn peek_previous(&mut self) -> Result<Option<Hit>> {
        let hit = self.previous()?;
        if hit.is_some() {
            self.next()?;
        }
        Ok(hit)
    }
}

/// Stream that never yields.
pub struct EmptyStream;

impl TupleStream for EmptyStream {
    fn next(&mut self) -> Result<Option<Hit>> {
        Ok(None)
    }

    fn previous(&mut self) -> Result<Option<Hit>> {
        Ok(None)
    }

    fn seek(&mut self, _pos: Pos) -> Result<()> {
        Ok(())
    }
}

/// Collapses hits sharing one position into the first of them, so each
/// event is reported once even when it was indexed under several roles.
pub struct DistinctStream {
    inner: Box<dyn TupleStream>,
}

impl DistinctStream {
    /// Collapses hits of `inner` sharing a position.
    pub fn new(inner: Box<dyn TupleStream>) -> Self {
        Self { inner }
    }
}

impl TupleStream for DistinctStream {
    fn next(&mut self) -> Result<Option<Hit>> {
        let Some(hit) = self.inner.next()? else {
            return Ok(None);
        };
        while let Some(more) = self.inner.peek_next()? {
            if more.pos() != hit.pos() {
                break;
            }
            self.inner.next()?;
        }
        Ok(Some(hit))
    }

    fn previous(&mut self) -> Result<Option<Hit>> {
        let Some(mut hit) = self.inner.previous()? else {
            return Ok(None);
        };
        while let Some(more) = self.inner.peek_previous()? {
            if more.pos() != hit.pos() {
                break;
            }
            hit = more;
            self.inner.previous()?;
        }
        Ok(Some(hit))
    }

    fn seek(&mut self, pos: Pos) -> Result<()> {
        self.inner.seek(pos)
    }
}

enum Cursor {
    Plain(Arc<SequenceTree<EventRef>>, TupleIterator<EventRef>),
    Roles(Arc<SequenceTree<RoleRef>>, TupleIterator<RoleRef>),
}

/// Scan of one index tree, optionally keeping only some roles.
pub struct IndexStream {
    cursor: Cursor,
    filter: Option<(RoleDomain, Role)>,
}

impl IndexStream {
    /// Opens a scan positioned before `from`.
    pub fn new(tree: IndexTree, filter: Option<(RoleDomain, Role)>, from: Pos) -> Result<Self> {
        let cursor = match tree {
            IndexTree::Plain(tree) => {
                let it = tree.seek(from.0, Match::First)?;
                Cursor::Plain(tree, it)
            }
            IndexTree::Roles(tree) => {
                let it = tree.seek(from.0, Match::First)?;
                Cursor::Roles(tree, it)
            }
        };
        let mut stream = Self { cursor, filter };
        stream.skip_below(from)?;
        Ok(stream)
    }

    /// Scan over every event of a timestamp tree.
    pub fn all(tree: Arc<SequenceTree<EventRef>>, from: Pos) -> Result<Self> {
        Self::new(IndexTree::Plain(tree), None, from)
    }

    fn raw_next(&mut self) -> Result<Option<Hit>> {
        Ok(match &mut self.cursor {
            Cursor::Plain(_, it) => it.next()?.map(|(key, e)| Hit {
                key,
                pointer: e.0,
                role: None,
            }),
            Cursor::Roles(_, it) => it.next()?.map(|(key, r)| Hit {
                key,
                pointer: r.pointer,
                role: Some(r.role),
            }),
        })
    }

    fn raw_previous(&mut self) -> Result<Option<Hit>> {
        Ok(match &mut self.cursor {
            Cursor::Plain(_, it) => it.previous()?.map(|(key, e)| Hit {
                key,
                pointer: e.0,
                role: None,
            }),
            Cursor::Roles(_, it) => it.previous()?.map(|(key, r)| Hit {
                key,
                pointer: r.pointer,
                role: Some(r.role),
            }),
        })
    }

    fn accepts(&self, hit: &Hit) -> bool {
        match (self.filter, hit.role) {
            (Some((domain, wanted)), Some(stored)) => wanted.accepts(domain, stored),
            _ => true,
        }
    }

    /// Moves past hits on the seeked key whose pointer is below `from`.
    fn skip_below(&mut self, from: Pos) -> Result<()> {
        while let Some(hit) = self.raw_next()? {
            if hit.pos() >= from {
                self.raw_previous()?;
                break;
            }
        }
        Ok(())
    }
}

impl TupleStream for IndexStream {
    fn next(&mut self) -> Result<Option<Hit>> {
        while let Some(hit) = self.raw_next()? {
            if self.accepts(&hit) {
                return Ok(Some(hit));
            }
        }
        Ok(None)
    }

    fn previous(&mut self) -> Result<Option<Hit>> {
        while let Some(hit) = self.raw_previous()? {
            if self.accepts(&hit) {
                return Ok(Some(hit));
            }
        }
        Ok(None)
    }

    fn seek(&mut self, pos: Pos) -> Result<()> {
        match &mut self.cursor {
            Cursor::Plain(tree, it) => *it = tree.seek(pos.0, Match::First)?,
            Cursor::Roles(tree, it) => *it = tree.seek(pos.0, Match::First)?,
        }
        self.skip_below(pos)
    }
}
