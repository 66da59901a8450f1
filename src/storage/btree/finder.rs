//! Binary search over sorted tuple keys with explicit tie-break rules.

/// Which duplicate to return when the key matches exactly.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Match {
    /// The first tuple carrying the key.
    First,
    /// The last tuple carrying the key.
    Last,
}

/// Which neighbor to return when the key is absent.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum NoMatch {
    /// The last tuple whose key is smaller.
    Before,
    /// The first tuple whose key is greater.
    After,
}

/// Outcome of [`find_tuple_index`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Lookup {
    /// Index of a tuple whose key equals the probe.
    Exact(usize),
    /// Index of the neighbor selected by [`NoMatch`].
    Nearest(usize),
    /// `NoMatch::Before` was requested and every key is greater.
    NoneBefore,
    /// `NoMatch::After` was requested and every key is smaller.
    NoneAfter,
}

impl Lookup {
    /// Index of the selected tuple, if any.
    pub fn index(self) -> Option<usize> {
        match self {
            Lookup::Exact(i) | Lookup::Nearest(i) => Some(i),
            Lookup::NoneBefore | Lookup::NoneAfter => None,
        }
    }

    /// True for [`Lookup::Exact`].
    pub fn is_exact(self) -> bool {
        matches!(self, Lookup::Exact(_))
    }
}

/// Searches `keys`, which must be sorted non-decreasingly.
pub fn find_tuple_index(keys: &[u64], key: u64, on_match: Match, on_miss: NoMatch) -> Lookup {
    find_tuple_index_by(keys, key, |k| *k, on_match, on_miss)
}

/// Searches `items` by the key `key_of` extracts; `items` must be sorted by that key.
pub fn find_tuple_index_by<T>(
    items: &[T],
    key: u64,
    key_of: impl Fn(&T) -> u64,
    on_match: Match,
    on_miss: NoMatch,
) -> Lookup {
    let (Some(first), Some(last)) = (items.first(), items.last()) else {
        return match on_miss {
            NoMatch::Before => Lookup::NoneBefore,
            NoMatch::After => Lookup::NoneAfter,
        };
    };
    if key < key_of(first) {
        return match on_miss {
            NoMatch::Before => Lookup::NoneBefore,
            NoMatch::After => Lookup::Nearest(0),
        };
    }
    if key > key_of(last) {
        return match on_miss {
            NoMatch::Before => Lookup::Nearest(items.len() - 1),
            NoMatch::After => Lookup::NoneAfter,
        };
    }
    let lower = items.partition_point(|item| key_of(item) < key);
    let upper = items.partition_point(|item| key_of(item) <= key);
    if lower < upper {
        return match on_match {
            Match::First => Lookup::Exact(lower),
            Match::Last => Lookup::Exact(upper - 1),
        };
    }
    // key lies strictly between two stored keys, so both neighbors exist.
    match on_miss {
        NoMatch::Before => Lookup::Nearest(lower - 1),
        NoMatch::After => Lookup::Nearest(lower),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const KEYS: [u64; 6] = [1, 1, 3, 3, 3, 7];

    #[test]
    fn exact_match_tie_breaks() {
        assert_eq!(find_tuple_index(&KEYS, 3, Match::First, NoMatch::Before), Lookup::Exact(2));
        assert_eq!(find_tuple_index(&KEYS, 3, Match::Last, NoMatch::Before), Lookup::Exact(4));
        assert_eq!(find_tuple_index(&KEYS, 1, Match::Last, NoMatch::After), Lookup::Exact(1));
        assert_eq!(find_tuple_index(&KEYS, 7, Match::First, NoMatch::After), Lookup::Exact(5));
    }

    #[test]
    fn missing_key_neighbors() {
        assert_eq!(find_tuple_index(&KEYS, 5, Match::First, NoMatch::Before), Lookup::Nearest(4));
        assert_eq!(find_tuple_index(&KEYS, 5, Match::Last, NoMatch::After), Lookup::Nearest(5));
        assert_eq!(find_tuple_index(&KEYS, 0, Match::First, NoMatch::Before), Lookup::NoneBefore);
        assert_eq!(find_tuple_index(&KEYS, 9, Match::First, NoMatch::After), Lookup::NoneAfter);
        assert_eq!(find_tuple_index(&KEYS, 0, Match::First, NoMatch::After), Lookup::Nearest(0));
        assert_eq!(find_tuple_index(&KEYS, 9, Match::Last, NoMatch::Before), Lookup::Nearest(5));
    }

    #[test]
    fn empty_slice_reports_sentinels() {
        assert_eq!(find_tuple_index(&[], 4, Match::First, NoMatch::Before), Lookup::NoneBefore);
        assert_eq!(find_tuple_index(&[], 4, Match::First, NoMatch::After), Lookup::NoneAfter);
    }

    fn oracle(keys: &[u64], key: u64, m: Match, nm: NoMatch) -> Lookup {
        let hits: Vec<usize> = (0..keys.len()).filter(|&i| keys[i] == key).collect();
        if let (Some(&f), Some(&l)) = (hits.first(), hits.last()) {
            return Lookup::Exact(if m == Match::First { f } else { l });
        }
        match nm {
            NoMatch::Before => (0..keys.len())
                .rev()
                .find(|&i| keys[i] < key)
                .map_or(Lookup::NoneBefore, Lookup::Nearest),
            NoMatch::After => (0..keys.len())
                .find(|&i| keys[i] > key)
                .map_or(Lookup::NoneAfter, Lookup::Nearest),
        }
    }

    proptest! {
        #[test]
        fn agrees_with_linear_scan(
            mut keys in proptest::collection::vec(0u64..40, 0..30),
            key in 0u64..45,
            first in any::<bool>(),
            before in any::<bool>(),
        ) {
            keys.sort_unstable();
            let m = if first { Match::First } else { Match::Last };
            let nm = if before { NoMatch::Before } else { NoMatch::After };
            prop_assert_eq!(find_tuple_index(&keys, key, m, nm), oracle(&keys, key, m, nm));
        }
    }
}
