#![allow(missing_docs)]

use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};

use tempfile::tempdir;
use tracedb::storage::index::{Attribute, Role};
use tracedb::types::{InternalPointer, Result, TraceError};
use tracedb::{Condition, DbConfig, ExternalPointer, TraceDb, TraceGenerator, WorkloadConfig};

fn pointers(db: &TraceDb, condition: &Condition) -> Result<Vec<InternalPointer>> {
    db.evaluate(condition, 0)?.pointers().collect()
}

#[test]
fn generated_trace_survives_reopen() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("trace.tdb");
    let config = DbConfig::small_pages().page_size(1024);
    let records = TraceGenerator::new(99, WorkloadConfig::default()).generate(4_000);

    let conditions = vec![
        Condition::All,
        Condition::attribute(Attribute::Thread, 2),
        Condition::attribute(Attribute::Field, 3),
    ];
    let (before, stats) = {
        let db = TraceDb::create(&path, config.clone())?;
        for record in &records {
            db.append(record)?;
        }
        let mut before = Vec::new();
        for condition in &conditions {
            before.push(pointers(&db, condition)?);
        }
        let called = db.create_condition(Attribute::Behavior, 17, Some(Role::CALLED))?;
        before.push(pointers(&db, &called)?);
        let stats = db.stats();
        db.close()?;
        (before, stats)
    };
    assert_eq!(before[0].len(), 4_000);

    let db = TraceDb::open(&path, config)?;
    let reopened = db.stats();
    assert_eq!(reopened.events, stats.events);
    assert_eq!(reopened.threads, stats.threads);
    assert_eq!(reopened.behaviors, stats.behaviors);
    assert_eq!(reopened.registrations, stats.registrations);
    assert_eq!(db.last_timestamp(), records.last().map(|r| r.timestamp()));

    for (condition, expected) in conditions.iter().zip(&before) {
        assert_eq!(&pointers(&db, condition)?, expected);
    }
    let called = db.create_condition(Attribute::Behavior, 17, Some(Role::CALLED))?;
    assert_eq!(pointers(&db, &called)?, before[3]);

    for (record, pointer) in records.iter().zip(&before[0]).step_by(97) {
        assert_eq!(&db.resolve(*pointer)?, record);
        let external = ExternalPointer {
            thread: record.header.thread,
            timestamp: record.header.timestamp,
        };
        assert_eq!(db.resolve_external(external)?, Some(*pointer));
    }
    Ok(())
}

#[test]
fn appends_continue_after_reopen() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("trace.tdb");
    let config = DbConfig::small_pages();
    let mut generator = TraceGenerator::new(3, WorkloadConfig::default());
    let first = generator.generate(1_500);
    let second = generator.generate(1_500);

    {
        let db = TraceDb::create(&path, config.clone())?;
        for record in &first {
            db.append(record)?;
        }
        db.close()?;
    }
    {
        let db = TraceDb::open(&path, config.clone())?;
        for record in &second {
            db.append(record)?;
        }
        db.close()?;
    }

    let db = TraceDb::open(&path, config)?;
    let mut cursor = db.evaluate(&Condition::All, 0)?;
    let mut stored = Vec::new();
    while let Some((_, record)) = cursor.next_event()? {
        stored.push(record);
    }
    let expected: Vec<_> = first.into_iter().chain(second).collect();
    assert_eq!(stored, expected);
    Ok(())
}

#[test]
fn damaged_meta_page_is_rejected() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("trace.tdb");
    TraceDb::create(&path, DbConfig::small_pages())?.close()?;

    let mut file = OpenOptions::new().write(true).open(&path)?;
    file.seek(SeekFrom::Start(21))?;
    file.write_all(&[0xff])?;
    drop(file);

    let err = TraceDb::open(&path, DbConfig::small_pages()).expect_err("checksum");
    assert!(matches!(err, TraceError::Corruption(_)), "{err}");
    Ok(())
}

#[test]
fn missing_file_is_not_created_by_open() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("absent.tdb");
    let err = TraceDb::open(&path, DbConfig::small_pages()).expect_err("missing");
    assert!(matches!(err, TraceError::Io(_)));
    assert!(!path.exists());

    let db = TraceDb::open_or_create(&path, DbConfig::small_pages())?;
    assert_eq!(db.stats().events, 0);
    Ok(())
}
