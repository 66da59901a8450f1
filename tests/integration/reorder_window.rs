#![allow(missing_docs)]

use std::sync::{Arc, Mutex};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracedb::storage::reorder::{ReorderingBuffer, Timestamped};
use tracedb::types::{Result, TraceError};
use tracedb::{Condition, DbConfig, TraceDb, TraceGenerator, WorkloadConfig};

#[derive(Debug, Clone, Copy, PartialEq)]
struct Tick(u64);

impl Timestamped for Tick {
    fn timestamp(&self) -> u64 {
        self.0
    }
}

/// Sorted timestamps `0..n` where every event moves at most `max_delay`
/// positions later than its sorted place.
fn delayed_stream(n: u64, max_delay: usize, seed: u64) -> Vec<Tick> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut keyed: Vec<(usize, u64)> = (0..n)
        .map(|ts| (ts as usize + rng.gen_range(0..=max_delay), ts))
        .collect();
    keyed.sort();
    keyed.into_iter().map(|(_, ts)| Tick(ts)).collect()
}

fn run(buffer: &mut ReorderingBuffer<Tick>, input: &[Tick]) -> Vec<u64> {
    let mut out = Vec::new();
    for tick in input {
        if let Some(released) = buffer.push_and_release(*tick) {
            out.push(released.0);
        }
    }
    out.extend(buffer.drain().into_iter().map(|t| t.0));
    out
}

#[test]
fn delays_inside_the_window_are_absorbed() {
    for seed in 0..8 {
        let input = delayed_stream(5_000, 49, seed);
        let mut buffer = ReorderingBuffer::new(50);
        let out = run(&mut buffer, &input);
        assert_eq!(buffer.dropped(), 0, "seed {seed}");
        assert_eq!(out, (0..5_000).collect::<Vec<_>>(), "seed {seed}");
    }
}

#[test]
fn one_event_delayed_past_the_window_is_dropped() {
    let mut input: Vec<Tick> = (0..1_000).map(Tick).collect();
    let late = input.remove(100);
    input.insert(160, late);

    let violations = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&violations);
    let mut buffer = ReorderingBuffer::new(50).with_listener(Box::new(move |err: &TraceError, _reason: &'static str| {
        if let TraceError::OrderingViolation { last_released, dropped } = err {
            sink.lock().expect("listener lock").push((*last_released, *dropped));
        }
    }));
    let out = run(&mut buffer, &input);

    assert_eq!(buffer.dropped(), 1);
    assert_eq!(out.len(), 999);
    assert!(out.windows(2).all(|w| w[0] <= w[1]));
    assert!(!out.contains(&100));
    let violations = violations.lock().expect("listener lock");
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].1, 100);
    assert!(violations[0].0 > 100);
}

#[test]
fn ties_leave_in_arrival_order() {
    let mut buffer = ReorderingBuffer::new(8);
    for ts in [5u64, 3, 5, 3, 4] {
        buffer.push(Tick(ts));
    }
    assert_eq!(buffer.next_available_timestamp(), Some(3));
    assert!(buffer.is_next_flushable(100, 10), "oldest staged event is 97 behind");
    assert!(!buffer.is_next_flushable(13, 10), "oldest staged event is 10 behind");
    let out: Vec<u64> = buffer.drain().into_iter().map(|t| t.0).collect();
    assert_eq!(out, vec![3, 3, 4, 5, 5]);
    assert_eq!(buffer.last_released(), Some(5));
}

#[test]
fn generated_trace_loads_without_drops() -> Result<()> {
    let config = DbConfig::small_pages().reorder_capacity(50);
    let db = TraceDb::in_memory(config)?;
    let mut generator = TraceGenerator::new(
        17,
        WorkloadConfig {
            max_delay: 40,
            delay_ratio: 0.2,
            ..WorkloadConfig::default()
        },
    );
    let records = generator.generate(3_000);
    let expected: Vec<u64> = records.iter().map(|r| r.timestamp()).collect();
    for record in generator.arrival_order(records) {
        assert!(db.push(record)?);
    }
    assert!(db.stats().pending > 0);
    db.drain()?;

    let stats = db.stats();
    assert_eq!(stats.events, 3_000);
    assert_eq!(stats.dropped, 0);
    assert_eq!(stats.pending, 0);

    let mut cursor = db.evaluate(&Condition::All, 0)?;
    let mut stored = Vec::new();
    while let Some((_, record)) = cursor.next_event()? {
        stored.push(record.header.timestamp);
    }
    assert_eq!(stored, expected);
    Ok(())
}
