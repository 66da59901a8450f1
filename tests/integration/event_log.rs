#![allow(missing_docs)]

use std::sync::Arc;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tempfile::NamedTempFile;
use tracedb::primitives::io::{MemFileIo, StdFileIo};
use tracedb::primitives::pager::{PagedFile, PagerOptions};
use tracedb::storage::EventLog;
use tracedb::types::{InternalPointer, Result};

fn random_records(rng: &mut ChaCha8Rng, count: usize, max_len: usize) -> Vec<Vec<u8>> {
    (0..count)
        .map(|i| {
            // every 50th record takes more than half a page
            let len = if i % 50 == 0 {
                rng.gen_range(max_len / 2 + 1..=max_len)
            } else {
                rng.gen_range(1..=max_len / 8)
            };
            (0..len).map(|_| rng.gen()).collect()
        })
        .collect()
}

#[test]
fn random_sized_records_read_back_byte_equal() -> Result<()> {
    let pager = Arc::new(PagedFile::create(
        Arc::new(MemFileIo::new()),
        PagerOptions::default().page_size(1024).cache_bytes(1024 * 32),
    )?);
    let log = EventLog::new(pager.clone());
    let mut rng = ChaCha8Rng::seed_from_u64(0x7ace);
    let records = random_records(&mut rng, 10_000, log.max_record_len());

    let pointers = records
        .iter()
        .map(|bytes| log.append_bytes(bytes))
        .collect::<Result<Vec<InternalPointer>>>()?;
    assert_eq!(log.len(), 10_000);
    assert!(pointers.windows(2).all(|w| w[0] < w[1]), "pointers grow with append order");
    assert!(log.stats().pages > 100);
    assert!(pager.stats().evictions > 0, "cache smaller than the log");

    for (pointer, bytes) in pointers.iter().zip(&records) {
        assert_eq!(&log.read_bytes(*pointer)?, bytes);
    }

    let mut iter = log.iter();
    let mut seen = 0usize;
    while let Some(next) = iter.next_raw() {
        let (pointer, bytes) = next?;
        assert_eq!(pointer, pointers[seen]);
        assert_eq!(bytes, records[seen]);
        seen += 1;
    }
    assert_eq!(seen, records.len());
    Ok(())
}

#[test]
fn reopened_log_keeps_appending_on_disk() -> Result<()> {
    let tmp = NamedTempFile::new()?;
    let options = PagerOptions::default().page_size(512).cache_bytes(512 * 8);
    let mut rng = ChaCha8Rng::seed_from_u64(42);

    let (root, first) = {
        let pager = Arc::new(PagedFile::create(Arc::new(StdFileIo::open(tmp.path())?), options.clone())?);
        let log = EventLog::new(pager.clone());
        let records = random_records(&mut rng, 500, log.max_record_len());
        let pointers = records
            .iter()
            .map(|bytes| log.append_bytes(bytes))
            .collect::<Result<Vec<_>>>()?;
        pager.flush()?;
        (log.root(), pointers.into_iter().zip(records).collect::<Vec<_>>())
    };

    let pager = Arc::new(PagedFile::open(Arc::new(StdFileIo::open(tmp.path())?), options)?);
    let log = EventLog::restore(pager, &root)?;
    assert_eq!(log.len(), 500);
    for (pointer, bytes) in &first {
        assert_eq!(&log.read_bytes(*pointer)?, bytes);
    }
    let more = random_records(&mut rng, 200, log.max_record_len());
    let mut last = first.last().map(|(p, _)| *p);
    for bytes in &more {
        let pointer = log.append_bytes(bytes)?;
        assert!(Some(pointer) > last);
        last = Some(pointer);
        assert_eq!(&log.read_bytes(pointer)?, bytes);
    }
    let mut iter = log.iter();
    let mut walked = 0;
    while let Some(next) = iter.next_raw() {
        next?;
        walked += 1;
    }
    assert_eq!(walked, 700);
    Ok(())
}
