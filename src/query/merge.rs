//! Sorted k-way merges of hit streams.
//!
//! A merge keeps every child positioned at the same gap while idle. Moving
//! forward finds the next position accepted by the rule, consumes that
//! position in every child, and leaves all children right after it. Hits
//! sharing one position are handed out as a group so that direction changes
//! inside a group stay exact.

use smallvec::SmallVec;

use super::stream::{successor, Hit, Pos, TupleStream};
use crate::types::{InternalPointer, Result};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Dir {
    Forward,
    Backward,
}

/// Hits of every child at one position; an empty slot means the child has
/// nothing there.
type Column = SmallVec<[SmallVec<[Hit; 2]>; 4]>;

/// Decides which positions a merge emits and with which hits.
trait MergeRule: Send {
    /// Whether a position has to be present in every child.
    fn needs_all(&self) -> bool;
    /// Hits to emit for a position, in order; empty to skip it.
    fn emit(&self, column: &Column) -> Vec<Hit>;
}

struct Group {
    pos: Pos,
    hits: Vec<Hit>,
    at: usize,
}

struct Merge<R: MergeRule> {
    children: Vec<Box<dyn TupleStream>>,
    rule: R,
    gap: Pos,
    synced: Option<Pos>,
    group: Option<Group>,
}

const START: Pos = (0, InternalPointer(0));

impl<R: MergeRule> Merge<R> {
    fn new(children: Vec<Box<dyn TupleStream>>, rule: R) -> Self {
        Self {
            children,
            rule,
            gap: START,
            synced: None,
            group: None,
        }
    }

    fn sync(&mut self) -> Result<()> {
        if self.synced != Some(self.gap) {
            for child in &mut self.children {
                child.seek(self.gap)?;
            }
            self.synced = Some(self.gap);
        }
        Ok(())
    }

    fn step(child: &mut Box<dyn TupleStream>, dir: Dir) -> Result<Option<Hit>> {
        match dir {
            Dir::Forward => child.next(),
            Dir::Backward => child.previous(),
        }
    }

    fn peek(child: &mut Box<dyn TupleStream>, dir: Dir) -> Result<Option<Hit>> {
        match dir {
            Dir::Forward => child.peek_next(),
            Dir::Backward => child.peek_previous(),
        }
    }

    /// Consumes every hit of `child` at `pos` in direction `dir`.
    fn take_at(child: &mut Box<dyn TupleStream>, pos: Pos, dir: Dir) -> Result<SmallVec<[Hit; 2]>> {
        let mut out = SmallVec::new();
        while let Some(hit) = Self::peek(child, dir)? {
            if hit.pos() != pos {
                break;
            }
            Self::step(child, dir)?;
            out.push(hit);
        }
        if dir == Dir::Backward {
            out.reverse();
        }
        Ok(out)
    }

    /// Finds the next emitted position in `dir`, leaving the children just
    /// past it. Returns `None` with children in an unspecified place.
    fn search(&mut self, dir: Dir) -> Result<Option<(Pos, Vec<Hit>)>> {
        let needs_all = self.rule.needs_all();
        loop {
            let mut heads: SmallVec<[Option<Pos>; 4]> = SmallVec::new();
            for child in &mut self.children {
                heads.push(Self::peek(child, dir)?.map(|h| h.pos()));
            }
            let present = heads.iter().flatten();
            let candidate = if needs_all {
                if heads.iter().any(Option::is_none) {
                    return Ok(None);
                }
                match dir {
                    Dir::Forward => present.max(),
                    Dir::Backward => present.min(),
                }
            } else {
                match dir {
                    Dir::Forward => present.min(),
                    Dir::Backward => present.max(),
                }
            };
            let Some(target) = candidate.copied() else {
                return Ok(None);
            };

            if needs_all {
                let mut aligned = true;
                for child in &mut self.children {
                    while let Some(hit) = Self::peek(child, dir)? {
                        let before = match dir {
                            Dir::Forward => hit.pos() < target,
                            Dir::Backward => hit.pos() > target,
                        };
                        if !before {
                            break;
                        }
                        Self::step(child, dir)?;
                    }
                    if Self::peek(child, dir)?.map(|h| h.pos()) != Some(target) {
                        aligned = false;
                    }
                }
                if !aligned {
                    continue;
                }
            }

            let mut column = Column::new();
            for child in &mut self.children {
                column.push(Self::take_at(child, target, dir)?);
            }
            let hits = self.rule.emit(&column);
            if !hits.is_empty() {
                return Ok(Some((target, hits)));
            }
        }
    }

    fn forward(&mut self) -> Result<Option<Hit>> {
        if let Some(group) = self.group.as_mut() {
            if group.at < group.hits.len() {
                group.at += 1;
                return Ok(Some(group.hits[group.at - 1]));
            }
            self.gap = successor(group.pos);
            self.group = None;
        }
        self.sync()?;
        match self.search(Dir::Forward)? {
            Some((pos, hits)) => {
                self.synced = Some(successor(pos));
                let first = hits[0];
                self.group = Some(Group { pos, hits, at: 1 });
                Ok(Some(first))
            }
            None => {
                self.synced = None;
                Ok(None)
            }
        }
    }

    fn backward(&mut self) -> Result<Option<Hit>> {
        if let Some(group) = self.group.as_mut() {
            if group.at > 0 {
                group.at -= 1;
                return Ok(Some(group.hits[group.at]));
            }
            self.gap = group.pos;
            self.group = None;
        }
        self.sync()?;
        match self.search(Dir::Backward)? {
            Some((pos, hits)) => {
                self.synced = Some(pos);
                let at = hits.len() - 1;
                let last = hits[at];
                self.group = Some(Group { pos, hits, at });
                Ok(Some(last))
            }
            None => {
                self.synced = None;
                Ok(None)
            }
        }
    }

    fn reposition(&mut self, pos: Pos) -> Result<()> {
        self.group = None;
        self.gap = pos;
        self.synced = None;
        self.sync()
    }
}

impl<R: MergeRule> TupleStream for Merge<R> {
    fn next(&mut self) -> Result<Option<Hit>> {
        self.forward()
    }

    fn previous(&mut self) -> Result<Option<Hit>> {
        self.backward()
    }

    fn seek(&mut self, pos: Pos) -> Result<()> {
        self.reposition(pos)
    }
}

struct IntersectRule {
    match_roles: bool,
    dedup: bool,
}

impl MergeRule for IntersectRule {
    fn needs_all(&self) -> bool {
        true
    }

    fn emit(&self, column: &Column) -> Vec<Hit> {
        let Some(first) = column.first().and_then(|hits| hits.first()).copied() else {
            return Vec::new();
        };
        let tagged: SmallVec<[&SmallVec<[Hit; 2]>; 4]> = column
            .iter()
            .filter(|hits| hits.iter().any(|h| h.role.is_some()))
            .collect();

        if self.match_roles && !tagged.is_empty() {
            let mut common: SmallVec<[Hit; 2]> = SmallVec::new();
            for hit in tagged[0].iter() {
                let shared = tagged[1..]
                    .iter()
                    .all(|hits| hits.iter().any(|h| h.role == hit.role));
                if shared && !common.iter().any(|c| c.role == hit.role) {
                    common.push(*hit);
                }
            }
            if self.dedup {
                common.truncate(1);
            }
            return common.into_vec();
        }
        if self.dedup {
            vec![first]
        } else {
            column[0].to_vec()
        }
    }
}

struct UnionRule;

impl MergeRule for UnionRule {
    fn needs_all(&self) -> bool {
        false
    }

    fn emit(&self, column: &Column) -> Vec<Hit> {
        column
            .iter()
            .find_map(|hits| hits.first().copied())
            .into_iter()
            .collect()
    }
}

/// Intersection of child streams: positions present in every child.
///
/// With `match_roles`, role-tagged children must also share a role at the
/// position. With `dedup`, each position is emitted once; otherwise once per
/// shared role.
pub fn conjunction(children: Vec<Box<dyn TupleStream>>, match_roles: bool, dedup: bool) -> Box<dyn TupleStream> {
    Box::new(Merge::new(children, IntersectRule { match_roles, dedup }))
}

/// Union of child streams; each position is emitted once.
pub fn disjunction(children: Vec<Box<dyn TupleStream>>) -> Box<dyn TupleStream> {
    Box::new(Merge::new(children, UnionRule))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::index::Role;

    /// In-memory stream over sorted hits.
    pub(crate) struct VecStream {
        hits: Vec<Hit>,
        at: usize,
    }

    impl VecStream {
        pub(crate) fn boxed(hits: Vec<Hit>) -> Box<dyn TupleStream> {
            Box::new(Self { hits, at: 0 })
        }
    }

    impl TupleStream for VecStream {
        fn next(&mut self) -> Result<Option<Hit>> {
            let hit = self.hits.get(self.at).copied();
            if hit.is_some() {
                self.at += 1;
            }
            Ok(hit)
        }

        fn previous(&mut self) -> Result<Option<Hit>> {
            if self.at == 0 {
                return Ok(None);
            }
            self.at -= 1;
            Ok(Some(self.hits[self.at]))
        }

        fn seek(&mut self, pos: Pos) -> Result<()> {
            self.at = self.hits.partition_point(|h| h.pos() < pos);
            Ok(())
        }
    }

    fn hit(ts: u64) -> Hit {
        Hit {
            key: ts,
            pointer: InternalPointer(ts * 10),
            role: None,
        }
    }

    fn role_hit(ts: u64, role: Role) -> Hit {
        Hit {
            role: Some(role),
            ..hit(ts)
        }
    }

    fn stream(ids: &[u64]) -> Box<dyn TupleStream> {
        VecStream::boxed(ids.iter().map(|i| hit(*i)).collect())
    }

    fn drain(s: &mut Box<dyn TupleStream>) -> Vec<u64> {
        let mut out = Vec::new();
        while let Some(h) = s.next().unwrap() {
            out.push(h.key);
        }
        out
    }

    #[test]
    fn three_way_intersection_and_union() {
        let mut and = conjunction(vec![stream(&[1, 3, 5, 7]), stream(&[3, 5, 9]), stream(&[3, 7])], false, true);
        and.seek(START).unwrap();
        assert_eq!(drain(&mut and), vec![3]);

        let mut or = disjunction(vec![stream(&[1, 3, 5, 7]), stream(&[3, 5, 9]), stream(&[3, 7])]);
        or.seek(START).unwrap();
        assert_eq!(drain(&mut or), vec![1, 3, 5, 7, 9]);
    }

    #[test]
    fn direction_changes_are_exact() {
        let mut or = disjunction(vec![stream(&[1, 4, 8]), stream(&[2, 4, 6])]);
        or.seek((3, InternalPointer(0))).unwrap();
        assert_eq!(or.next().unwrap().map(|h| h.key), Some(4));
        assert_eq!(or.next().unwrap().map(|h| h.key), Some(6));
        assert_eq!(or.previous().unwrap().map(|h| h.key), Some(6));
        assert_eq!(or.previous().unwrap().map(|h| h.key), Some(4));
        assert_eq!(or.previous().unwrap().map(|h| h.key), Some(2));
        assert_eq!(or.previous().unwrap().map(|h| h.key), Some(1));
        assert_eq!(or.previous().unwrap(), None);
        assert_eq!(or.next().unwrap().map(|h| h.key), Some(1));

        let mut and = conjunction(vec![stream(&[1, 2, 4, 6, 8]), stream(&[2, 3, 6, 8])], false, true);
        and.seek(START).unwrap();
        assert_eq!(drain(&mut and), vec![2, 6, 8]);
        assert_eq!(and.previous().unwrap().map(|h| h.key), Some(8));
        assert_eq!(and.previous().unwrap().map(|h| h.key), Some(6));
        assert_eq!(and.peek_next().unwrap().map(|h| h.key), Some(6));
        assert_eq!(and.peek_previous().unwrap().map(|h| h.key), Some(2));
    }

    #[test]
    fn roles_must_match_when_asked() {
        let a = VecStream::boxed(vec![role_hit(1, Role::TARGET), role_hit(2, Role::TARGET), role_hit(2, Role::VALUE)]);
        let b = VecStream::boxed(vec![role_hit(1, Role::VALUE), role_hit(2, Role::VALUE)]);
        let mut and = conjunction(vec![a, b], true, true);
        and.seek(START).unwrap();
        let hits: Vec<Hit> = std::iter::from_fn(|| and.next().unwrap()).collect();
        assert_eq!(hits, vec![role_hit(2, Role::VALUE)]);
    }

    #[test]
    fn without_dedup_each_shared_role_is_emitted() {
        let a = VecStream::boxed(vec![role_hit(5, Role::TARGET), role_hit(5, Role::VALUE)]);
        let b = VecStream::boxed(vec![role_hit(5, Role::TARGET), role_hit(5, Role::VALUE)]);
        let mut and = conjunction(vec![a, b], true, false);
        and.seek(START).unwrap();
        assert_eq!(and.next().unwrap(), Some(role_hit(5, Role::TARGET)));
        assert_eq!(and.next().unwrap(), Some(role_hit(5, Role::VALUE)));
        assert_eq!(and.previous().unwrap(), Some(role_hit(5, Role::VALUE)));
        assert_eq!(and.previous().unwrap(), Some(role_hit(5, Role::TARGET)));
        assert_eq!(and.previous().unwrap(), None);
        assert_eq!(and.next().unwrap(), Some(role_hit(5, Role::TARGET)));
    }
}
