//! Cached event counts over timestamp ranges.
//!
//! A count over `[t1, t2]` can only change while events at or after `t2`
//! may still arrive. Entries computed with `t2` below the newest stored
//! timestamp are final; the others are kept only until the next append.

use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;

use crate::types::{Result, TraceError};

#[derive(Copy, Clone, Debug)]
struct CountEntry {
    count: u64,
    /// Event count the entry was computed at, for entries that later
    /// appends can change.
    valid_at: Option<u64>,
}

type CountKey = (String, u64, u64);

/// Bounded LRU of range counts keyed by condition.
pub struct CountCache {
    entries: Option<Mutex<LruCache<CountKey, CountEntry>>>,
}

impl CountCache {
    /// Cache of `capacity` entries; zero disables caching.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: NonZeroUsize::new(capacity).map(|cap| Mutex::new(LruCache::new(cap))),
        }
    }

    /// Cached count, if still valid for a log holding `events` events.
    pub fn get(&self, key: &str, t1: u64, t2: u64, events: u64) -> Option<u64> {
        let mut entries = self.entries.as_ref()?.lock();
        let cache_key = (key.to_string(), t1, t2);
        let entry = *entries.get(&cache_key)?;
        match entry.valid_at {
            Some(at) if at != events => {
                entries.pop(&cache_key);
                None
            }
            _ => Some(entry.count),
        }
    }

    /// Stores a count. `last_timestamp` is the newest stored timestamp when
    /// the count was computed.
    pub fn put(&self, key: String, t1: u64, t2: u64, count: u64, last_timestamp: Option<u64>, events: u64) {
        let Some(entries) = self.entries.as_ref() else {
            return;
        };
        let settled = last_timestamp.is_some_and(|last| t2 < last);
        let entry = CountEntry {
            count,
            valid_at: (!settled).then_some(events),
        };
        entries.lock().put((key, t1, t2), entry);
    }

    /// Cached entries.
    pub fn len(&self) -> usize {
        self.entries.as_ref().map_or(0, |e| e.lock().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forgets every entry.
    pub fn clear(&self) {
        if let Some(entries) = self.entries.as_ref() {
            entries.lock().clear();
        }
    }
}

/// Inclusive `(low, high)` bounds of `slots` consecutive buckets covering
/// `[t1, t2]`. Buckets may be empty (`low > high`) when the range is
/// narrower than the slot count.
pub fn slot_bounds(t1: u64, t2: u64, slots: usize) -> Result<Vec<(u64, u64)>> {
    if slots == 0 {
        return Err(TraceError::Invalid("slot count must be positive"));
    }
    if t2 < t1 {
        return Err(TraceError::Invalid("range end before range start"));
    }
    let span = u128::from(t2 - t1);
    let mut bounds = Vec::with_capacity(slots);
    let mut low = t1;
    for i in 0..slots {
        let offset = (i as u128 + 1) * span / slots as u128;
        // offset <= span, which fits in u64
        let high = t1 + offset as u64;
        bounds.push((low, high));
        low = high.saturating_add(1);
    }
    Ok(bounds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_ended_entries_expire_on_append() {
        let cache = CountCache::new(8);
        cache.put("thread=1".into(), 0, 100, 7, Some(50), 10);
        assert_eq!(cache.get("thread=1", 0, 100, 10), Some(7));
        assert_eq!(cache.get("thread=1", 0, 100, 11), None);
        assert!(cache.is_empty());

        cache.put("thread=1".into(), 0, 40, 3, Some(50), 10);
        assert_eq!(cache.get("thread=1", 0, 40, 99), Some(3));
    }

    #[test]
    fn zero_capacity_disables() {
        let cache = CountCache::new(0);
        cache.put("*".into(), 0, 1, 1, Some(5), 1);
        assert_eq!(cache.get("*", 0, 1, 1), None);
    }

    #[test]
    fn slots_cover_the_range_exactly() -> Result<()> {
        let bounds = slot_bounds(10, 19, 3)?;
        assert_eq!(bounds, vec![(10, 13), (14, 16), (17, 19)]);

        let narrow = slot_bounds(5, 6, 4)?;
        assert_eq!(narrow.first().map(|b| b.0), Some(5));
        assert_eq!(narrow.last().map(|b| b.1), Some(6));
        let covered: u64 = narrow.iter().filter(|(l, h)| l <= h).map(|(l, h)| h - l + 1).sum();
        assert_eq!(covered, 2);

        let full = slot_bounds(0, u64::MAX, 2)?;
        assert_eq!(full[1].1, u64::MAX);
        assert!(slot_bounds(3, 2, 1).is_err());
        Ok(())
    }
}
