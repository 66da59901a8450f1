#![allow(missing_docs)]

use proptest::prelude::*;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracedb::storage::index::{Attribute, Role, SplitScheme};
use tracedb::storage::record::{BehaviorCall, RecordPayload};
use tracedb::types::{InternalPointer, ObjectId, ObjectValue, Result};
use tracedb::{Condition, DbConfig, EventRecord, RecordHeader, TraceDb};

fn event(timestamp: u64, advice_cflow: Vec<u32>, payload: RecordPayload) -> EventRecord {
    EventRecord::new(
        RecordHeader {
            thread: 1,
            timestamp,
            advice_cflow,
            ..RecordHeader::default()
        },
        payload,
    )
}

fn write(target: u64, value: ObjectValue) -> RecordPayload {
    RecordPayload::FieldWrite {
        field: 1,
        target: ObjectValue::Object(ObjectId(target)),
        value,
    }
}

fn timestamps(db: &TraceDb, condition: &Condition) -> Result<Vec<u64>> {
    let mut cursor = db.evaluate(condition, 0)?;
    let mut out = Vec::new();
    while let Some((_, record)) = cursor.next_event()? {
        out.push(record.header.timestamp);
    }
    Ok(out)
}

fn timestamps_backward(db: &TraceDb, condition: &Condition) -> Result<Vec<u64>> {
    let mut cursor = db.evaluate(condition, u64::MAX)?;
    let mut out = Vec::new();
    while let Some((_, record)) = cursor.previous_event()? {
        out.push(record.header.timestamp);
    }
    Ok(out)
}

/// Events 1..=9; advice 1 covers {1,3,5,7}, advice 2 {3,5,9}, advice 3 {3,7}.
fn three_sets() -> Result<TraceDb> {
    let db = TraceDb::in_memory(DbConfig::small_pages())?;
    for ts in 1..=9u64 {
        let mut advice = Vec::new();
        if [1, 3, 5, 7].contains(&ts) {
            advice.push(1);
        }
        if [3, 5, 9].contains(&ts) {
            advice.push(2);
        }
        if [3, 7].contains(&ts) {
            advice.push(3);
        }
        db.append(&event(ts, advice, write(100, ObjectValue::Int(ts as i32))))?;
    }
    Ok(db)
}

fn advice(value: u64) -> Condition {
    Condition::attribute(Attribute::AdviceCflow, value)
}

#[test]
fn conjunction_and_disjunction_of_three_sets() -> Result<()> {
    let db = three_sets()?;
    let both = Condition::and(vec![advice(1), advice(2), advice(3)]);
    let either = Condition::or(vec![advice(1), advice(2), advice(3)]);

    assert_eq!(timestamps(&db, &both)?, vec![3]);
    assert_eq!(timestamps(&db, &either)?, vec![1, 3, 5, 7, 9]);
    assert_eq!(timestamps_backward(&db, &either)?, vec![9, 7, 5, 3, 1]);
    assert_eq!(timestamps(&db, &Condition::and(vec![advice(1), advice(2)]))?, vec![3, 5]);
    assert_eq!(db.count(&either, 0, u64::MAX)?, 5);
    assert_eq!(db.count(&either, 4, 8)?, 2);
    Ok(())
}

#[test]
fn merged_cursor_starts_mid_range_and_turns_around() -> Result<()> {
    let db = three_sets()?;
    let either = Condition::or(vec![advice(1), advice(2), advice(3)]);
    let mut cursor = db.evaluate(&either, 4)?;
    let ts = |p: Option<InternalPointer>| -> Result<Option<u64>> {
        p.map(|p| db.resolve(p).map(|r| r.header.timestamp)).transpose()
    };
    assert_eq!(ts(cursor.next()?)?, Some(5));
    assert_eq!(ts(cursor.next()?)?, Some(7));
    assert_eq!(ts(cursor.previous()?)?, Some(7));
    assert_eq!(ts(cursor.previous()?)?, Some(5));
    assert_eq!(ts(cursor.previous()?)?, Some(3));
    assert_eq!(ts(cursor.peek_next()?)?, Some(3));
    cursor.seek(9)?;
    assert_eq!(ts(cursor.next()?)?, Some(9));
    assert_eq!(cursor.next()?, None);
    Ok(())
}

#[test]
fn predicates_run_on_decoded_records() -> Result<()> {
    let db = three_sets()?;
    let divisible_by_three = Condition::predicate(advice(1), |record: &EventRecord| {
        matches!(record.payload, RecordPayload::FieldWrite { value: ObjectValue::Int(v), .. } if v % 3 == 0)
    });
    assert_eq!(timestamps(&db, &divisible_by_three)?, vec![3]);

    let nested = Condition::and(vec![advice(1), Condition::predicate(advice(2), |_: &EventRecord| true)]);
    assert!(db.evaluate(&nested, 0).is_err());
    Ok(())
}

#[test]
fn split_object_lookup_is_exact() -> Result<()> {
    let config = DbConfig::small_pages().object_split(SplitScheme::Mask { bits: 8, parts: 3 });
    let db = TraceDb::in_memory(config)?;
    // every pair below shares at least one 8-bit component
    let objects = [0x01_02_03u64, 0x01_02_04, 0x01_05_03, 0x06_02_03, 0x03_02_01, 0x00_00_03];
    let mut rng = ChaCha8Rng::seed_from_u64(5);
    let mut expected: Vec<Vec<u64>> = vec![Vec::new(); objects.len()];
    for ts in 0..600u64 {
        let which = rng.gen_range(0..objects.len());
        db.append(&event(ts, Vec::new(), write(objects[which], ObjectValue::Null)))?;
        expected[which].push(ts);
    }
    for (object, expected) in objects.iter().zip(&expected) {
        let condition = db.create_condition(Attribute::Object, *object, None)?;
        assert_eq!(&timestamps(&db, &condition)?, expected, "object {object:#x}");
        assert_eq!(db.count(&condition, 0, u64::MAX)?, expected.len() as u64);
    }
    let absent = db.create_condition(Attribute::Object, 0x06_05_04, None)?;
    assert!(timestamps(&db, &absent)?.is_empty());
    Ok(())
}

#[test]
fn role_matching_separates_target_from_argument() -> Result<()> {
    let db = TraceDb::in_memory(DbConfig::small_pages())?;
    let call = |target: u64, argument: u64| {
        RecordPayload::MethodCall(BehaviorCall {
            arguments: vec![ObjectValue::Object(ObjectId(argument))],
            called: Some(1),
            executed: Some(1),
            direct_parent: true,
            target: ObjectValue::Object(ObjectId(target)),
        })
    };
    // 5 and 6 are targets; 6 and 9 are arguments
    db.append(&event(1, Vec::new(), call(5, 6)))?;
    db.append(&event(2, Vec::new(), call(6, 9)))?;
    db.append(&event(3, Vec::new(), call(9, 5)))?;

    let target = |id| db.create_condition(Attribute::Object, id, Some(Role::TARGET));
    let any = |id| db.create_condition(Attribute::Object, id, None);
    assert_eq!(timestamps(&db, &target(6)?)?, vec![2]);
    assert_eq!(timestamps(&db, &any(6)?)?, vec![1, 2]);
    assert_eq!(timestamps(&db, &target(5)?)?, vec![1]);
    assert_eq!(timestamps(&db, &any(5)?)?, vec![1, 3]);
    Ok(())
}

#[test]
fn call_indexed_as_called_and_executed_counts_once() -> Result<()> {
    let db = TraceDb::in_memory(DbConfig::small_pages())?;
    let call = RecordPayload::MethodCall(BehaviorCall {
        arguments: Vec::new(),
        called: Some(17),
        executed: Some(17),
        direct_parent: true,
        target: ObjectValue::Null,
    });
    let exit = RecordPayload::BehaviorExit {
        behavior: 17,
        has_thrown: false,
        result: ObjectValue::Null,
    };
    db.append(&event(10, Vec::new(), call))?;
    db.append(&event(11, Vec::new(), exit))?;

    let any = db.create_condition(Attribute::Behavior, 17, None)?;
    let enter = db.create_condition(Attribute::Behavior, 17, Some(Role::ANY_ENTER))?;
    let called = db.create_condition(Attribute::Behavior, 17, Some(Role::CALLED))?;
    assert_eq!(timestamps(&db, &any)?, vec![10, 11]);
    assert_eq!(timestamps_backward(&db, &any)?, vec![11, 10]);
    assert_eq!(timestamps(&db, &enter)?, vec![10]);
    assert_eq!(timestamps(&db, &called)?, vec![10]);
    assert_eq!(db.count(&any, 0, u64::MAX)?, 2);
    assert_eq!(db.count(&enter, 0, u64::MAX)?, 1);
    assert_eq!(db.fast_counts(&any, 0, 11, 1)?, vec![2]);
    Ok(())
}

#[test]
fn fast_counts_add_up_to_the_range_count() -> Result<()> {
    let db = TraceDb::in_memory(DbConfig::small_pages())?;
    let mut rng = ChaCha8Rng::seed_from_u64(21);
    for ts in 0..2_000u64 {
        let advice = if rng.gen_bool(0.3) { vec![4] } else { Vec::new() };
        db.append(&event(ts, advice, write(7, ObjectValue::Null)))?;
    }
    for condition in [Condition::All, advice(4)] {
        let total = db.count(&condition, 100, 1_899)?;
        let buckets = db.fast_counts(&condition, 100, 1_899, 9)?;
        assert_eq!(buckets.len(), 9);
        assert_eq!(buckets.iter().sum::<u64>(), total);
        // cached on the second call
        assert_eq!(db.fast_counts(&condition, 100, 1_899, 9)?, buckets);
    }
    assert_eq!(db.count(&Condition::All, 100, 1_899)?, 1_800);
    Ok(())
}

proptest! {
    #[test]
    fn split_schemes_never_collide(k1 in 0u64..(1 << 48), k2 in 0u64..(1 << 48)) {
        prop_assume!(k1 != k2);
        for scheme in [
            SplitScheme::Mask { bits: 16, parts: 3 },
            SplitScheme::Mask { bits: 24, parts: 2 },
            SplitScheme::Interleave { parts: 2 },
            SplitScheme::Interleave { parts: 3 },
        ] {
            let a = scheme.split(k1).expect("split");
            let b = scheme.split(k2).expect("split");
            prop_assert_ne!(&a, &b);
            prop_assert_eq!(scheme.join(&a).expect("join"), k1);
        }
    }
}
