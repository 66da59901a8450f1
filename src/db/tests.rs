use std::sync::{Arc, Mutex};

use super::*;
use crate::query::Condition;
use crate::storage::index::{Attribute, ProbeInfo, Role, SplitScheme, StaticProbes};
use crate::storage::metrics::CounterMetrics;
use crate::storage::record::{BehaviorCall, EventRecord, RecordHeader, RecordPayload};
use crate::types::{ExternalPointer, ObjectId, ObjectValue, TraceError};
use tempfile::NamedTempFile;

fn header(thread: u32, timestamp: u64) -> RecordHeader {
    RecordHeader {
        thread,
        timestamp,
        ..RecordHeader::default()
    }
}

fn call(thread: u32, ts: u64, behavior: u32, target: u64) -> EventRecord {
    EventRecord::new(
        header(thread, ts),
        RecordPayload::MethodCall(BehaviorCall {
            arguments: vec![ObjectValue::Int(1), ObjectValue::Object(ObjectId(target + 1))],
            called: Some(behavior),
            executed: Some(behavior),
            direct_parent: true,
            target: ObjectValue::Object(ObjectId(target)),
        }),
    )
}

fn exit(thread: u32, ts: u64, behavior: u32) -> EventRecord {
    EventRecord::new(
        header(thread, ts),
        RecordPayload::BehaviorExit {
            behavior,
            has_thrown: false,
            result: ObjectValue::Null,
        },
    )
}

fn field_write(thread: u32, ts: u64, field: u32, target: u64) -> EventRecord {
    EventRecord::new(
        header(thread, ts),
        RecordPayload::FieldWrite {
            field,
            target: ObjectValue::Object(ObjectId(target)),
            value: ObjectValue::Long(ts as i64),
        },
    )
}

fn pointers(db: &TraceDb, condition: &Condition) -> Vec<crate::types::InternalPointer> {
    db.evaluate(condition, 0)
        .expect("evaluate")
        .pointers()
        .collect::<Result<_, _>>()
        .expect("scan")
}

#[test]
fn tracedb_round_trip() {
    let tmp = NamedTempFile::new().expect("temp file");
    let path = tmp.path().to_path_buf();

    let (calls, writes) = {
        let db = TraceDb::create(&path, DbConfig::small_pages()).expect("create db");
        for ts in 0..300u64 {
            let thread = (ts % 3) as u32;
            let record = match ts % 4 {
                0 => call(thread, ts, 10 + (ts % 5) as u32, 1000 + ts),
                1 => exit(thread, ts, 10),
                _ => field_write(thread, ts, 7, 5000 + ts % 11),
            };
            db.append(&record).expect("append");
        }
        let behavior = db
            .create_condition(Attribute::Behavior, 12, Some(Role::CALLED))
            .expect("condition");
        let calls = pointers(&db, &behavior);
        let object = db.create_condition(Attribute::Object, 5003, None).expect("condition");
        let writes = pointers(&db, &object);
        db.close().expect("close");
        (calls, writes)
    };
    assert_eq!(calls.len(), 15);
    assert!(!writes.is_empty());

    let db = TraceDb::open(&path, DbConfig::small_pages()).expect("reopen db");
    assert_eq!(db.stats().events, 300);
    let behavior = db
        .create_condition(Attribute::Behavior, 12, Some(Role::CALLED))
        .expect("condition");
    assert_eq!(pointers(&db, &behavior), calls);
    let object = db.create_condition(Attribute::Object, 5003, None).expect("condition");
    assert_eq!(pointers(&db, &object), writes);
    for ptr in &writes {
        match db.resolve(*ptr).expect("resolve").payload {
            RecordPayload::FieldWrite { target, .. } => assert_eq!(target, ObjectValue::Object(ObjectId(5003))),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    db.append(&field_write(1, 300, 7, 5003)).expect("append after reopen");
    assert_eq!(pointers(&db, &object).len(), writes.len() + 1);
}

#[test]
fn push_reorders_and_reports_late_events() {
    let dropped = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&dropped);
    let metrics = Arc::new(CounterMetrics::default());
    let db = TraceDb::in_memory(DbConfig::small_pages().reorder_capacity(4))
        .expect("db")
        .with_metrics(metrics.clone())
        .with_drop_listener(Box::new(move |err: &TraceError, _reason: &'static str| {
            if let TraceError::OrderingViolation { dropped, .. } = err {
                sink.lock().expect("listener lock").push(*dropped);
            }
        }));

    for ts in [5u64, 3, 4, 1, 2, 9, 8, 7, 6, 10, 11] {
        assert!(db.push(field_write(0, ts, 1, 1)).expect("push"));
    }
    assert!(!db.push(field_write(0, 0, 1, 1)).expect("push late"));
    db.drain().expect("drain");

    let mut cursor = db.evaluate(&Condition::All, 0).expect("evaluate");
    let mut seen = Vec::new();
    while let Some((_, record)) = cursor.next_event().expect("next") {
        seen.push(record.header.timestamp);
    }
    assert_eq!(seen, (1..=11).collect::<Vec<_>>());
    assert_eq!(*dropped.lock().expect("listener lock"), vec![0]);
    assert_eq!(metrics.snapshot().events_dropped, 1);
    assert_eq!(metrics.snapshot().events_appended, 11);
    assert_eq!(db.stats().dropped, 1);
}

#[test]
fn push_older_than_stored_events_is_dropped() {
    let tmp = NamedTempFile::new().expect("temp file");
    {
        let db = TraceDb::create(tmp.path(), DbConfig::small_pages().reorder_capacity(1)).expect("create");
        db.append(&field_write(0, 100, 1, 1)).expect("append");
        assert!(!db.push(field_write(0, 50, 1, 1)).expect("push after append"));
        assert_eq!(db.stats().dropped, 1);
        assert!(db.push(field_write(0, 100, 1, 1)).expect("push same timestamp"));
        db.close().expect("close");
    }

    let db = TraceDb::open(tmp.path(), DbConfig::small_pages().reorder_capacity(1)).expect("reopen");
    assert!(!db.push(field_write(0, 99, 1, 1)).expect("push after reopen"));
    assert!(db.push(field_write(0, 101, 1, 1)).expect("push newer"));
    db.drain().expect("drain");
    assert_eq!(db.stats().events, 3);
    assert_eq!(db.stats().dropped, 1);
}

#[test]
fn drop_listener_keeps_staged_events_and_counts() {
    let dropped = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&dropped);
    let db = TraceDb::in_memory(DbConfig::small_pages().reorder_capacity(4)).expect("db");
    for ts in 10..14u64 {
        assert!(db.push(field_write(0, ts, 1, 1)).expect("push"));
    }
    assert!(!db.push(field_write(0, 5, 1, 1)).expect("push late"));
    assert_eq!(db.stats().dropped, 1);
    assert_eq!(db.stats().pending, 3);

    let db = db.with_drop_listener(Box::new(move |err: &TraceError, _reason: &'static str| {
        if let TraceError::OrderingViolation { last_released, dropped } = err {
            sink.lock().expect("listener lock").push((*last_released, *dropped));
        }
    }));
    assert_eq!(db.stats().dropped, 1);
    assert_eq!(db.stats().pending, 3);
    assert!(!db.push(field_write(0, 6, 1, 1)).expect("push late"));
    assert_eq!(*dropped.lock().expect("listener lock"), vec![(10, 6)]);
    assert_eq!(db.stats().dropped, 2);
    assert_eq!(db.drain().expect("drain"), 3);
    assert_eq!(db.stats().events, 4);
}

#[test]
fn external_pointers_resolve_both_ways() {
    let db = TraceDb::in_memory(DbConfig::small_pages()).expect("db");
    let a = db.append(&field_write(4, 100, 1, 9)).expect("append");
    let b = db.append(&field_write(5, 100, 1, 9)).expect("append");
    db.append(&field_write(4, 101, 1, 9)).expect("append");

    let ext = ExternalPointer {
        thread: 5,
        timestamp: 100,
    };
    assert_eq!(db.resolve_external(ext).expect("resolve"), Some(b));
    assert_eq!(db.external_pointer(a).expect("external").thread, 4);
    assert_eq!(
        db.resolve_external(ExternalPointer {
            thread: 6,
            timestamp: 100
        })
        .expect("resolve"),
        None
    );
}

#[test]
fn call_nesting_and_registrations() {
    let db = TraceDb::in_memory(DbConfig::small_pages()).expect("db");
    let outer = db.append(&call(1, 10, 3, 50)).expect("append");
    let inner = db.append(&call(1, 20, 4, 60)).expect("append");
    db.append(&exit(1, 30, 4)).expect("append");
    let registration = EventRecord::new(
        header(1, 35),
        RecordPayload::Registration {
            object: ObjectId(50),
            class_id: 77,
            data: vec![1, 2, 3],
        },
    );
    let reg_ptr = db.append(&registration).expect("append");
    db.append(&exit(1, 40, 3)).expect("append");

    assert_eq!(db.enclosing_call(1, 25).expect("enclosing"), Some((20, inner)));
    assert_eq!(db.enclosing_call(1, 32).expect("enclosing"), Some((10, outer)));
    assert!(!db.is_inside_call(1, 45).expect("inside"));
    assert!(!db.is_inside_call(2, 25).expect("inside"));

    let found = db.find_registration(ObjectId(50)).expect("lookup").expect("registered");
    assert_eq!(found.pointer, reg_ptr);
    assert_eq!(found.class_id, 77);
    assert!(db.find_registration(ObjectId(51)).expect("lookup").is_none());
}

#[test]
fn probes_add_operation_roles() {
    let probes = StaticProbes::new().with(
        42,
        ProbeInfo {
            behavior: Some(900),
            bytecode_index: Some(12),
            advice_source: Some(3),
        },
    );
    let db = TraceDb::in_memory(DbConfig::small_pages())
        .expect("db")
        .with_probes(Arc::new(probes));
    let mut record = field_write(0, 1, 1, 1);
    record.header.probe = 42;
    let ptr = db.append(&record).expect("append");
    db.append(&field_write(0, 2, 1, 1)).expect("append");

    let op = db
        .create_condition(Attribute::Behavior, 900, Some(Role::OPERATION))
        .expect("condition");
    assert_eq!(pointers(&db, &op), vec![ptr]);
    assert_eq!(pointers(&db, &Condition::attribute(Attribute::Advice, 3)), vec![ptr]);
}

#[test]
fn rejected_appends_leave_no_trace() {
    let db = TraceDb::in_memory(DbConfig::small_pages().object_split(SplitScheme::Mask { bits: 8, parts: 2 }))
        .expect("db");
    db.append(&field_write(0, 10, 1, 1)).expect("append");

    let err = db.append(&field_write(0, 9, 1, 1)).expect_err("older timestamp");
    assert!(matches!(err, TraceError::KeyOrder { last: 10, key: 9 }));
    let err = db.append(&field_write(0, 11, 1, 1 << 20)).expect_err("object id too wide");
    assert!(matches!(err, TraceError::EncodingOverflow { .. }));

    assert_eq!(db.stats().events, 1);
    assert_eq!(db.count(&Condition::All, 0, u64::MAX).expect("count"), 1);
}

#[test]
fn clear_empties_everything() {
    let tmp = NamedTempFile::new().expect("temp file");
    let mut db = TraceDb::create(tmp.path(), DbConfig::small_pages()).expect("create");
    for ts in 0..100 {
        db.append(&field_write(1, ts, 2, 3)).expect("append");
    }
    db.flush().expect("flush");
    assert!(db.stats().pages > 2);

    db.clear().expect("clear");
    assert_eq!(db.stats().events, 0);
    assert!(pointers(&db, &Condition::attribute(Attribute::Thread, 1)).is_empty());
    db.append(&field_write(1, 0, 2, 3)).expect("append after clear");
    db.close().expect("close");

    let db = TraceDb::open(tmp.path(), DbConfig::small_pages()).expect("reopen");
    assert_eq!(db.stats().events, 1);
}

#[test]
fn push_after_clear_accepts_earlier_timestamps() {
    let mut db = TraceDb::in_memory(DbConfig::small_pages().reorder_capacity(2)).expect("db");
    for ts in 100..104 {
        assert!(db.push(field_write(0, ts, 1, 1)).expect("push"));
    }
    db.clear().expect("clear");
    assert_eq!(db.stats().pending, 0);

    assert!(db.push(field_write(0, 10, 1, 1)).expect("push after clear"));
    assert_eq!(db.drain().expect("drain"), 1);
    assert_eq!(db.stats().events, 1);
    assert_eq!(db.stats().dropped, 0);
}

#[test]
fn reopening_with_other_settings_fails() {
    let tmp = NamedTempFile::new().expect("temp file");
    TraceDb::create(tmp.path(), DbConfig::small_pages())
        .expect("create")
        .close()
        .expect("close");

    let err = TraceDb::open(tmp.path(), DbConfig::small_pages().page_size(1024)).expect_err("page size");
    assert!(matches!(err, TraceError::ConfigMismatch { field: "page_size", .. }));
    let err = TraceDb::open(
        tmp.path(),
        DbConfig::small_pages().object_split(SplitScheme::Interleave { parts: 4 }),
    )
    .expect_err("split");
    assert!(matches!(err, TraceError::ConfigMismatch { field: "object_split", .. }));
}
