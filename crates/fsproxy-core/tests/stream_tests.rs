//! Stream ticket tests through file proxies.
//!
//! Tests cover:
//! - Shared readers coexisting
//! - Exclusive writers excluding everyone else
//! - Bounded waits ending in AccessDenied
//! - Write-close bookkeeping (stamp refresh, one Changed event)

mod common;

use std::io::{Read, Write};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use common::{EventLog, TestRoot, assert_access_denied, fast_config};
use fsproxy_core::{EventKind, StreamArbiter, TicketMode};

#[test]
fn test_parallel_readers() {
    let root = Arc::new(TestRoot::new());
    root.write("shared.txt", b"hello");
    let node = root.resolve("shared.txt");

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let node = Arc::clone(&node);
            thread::spawn(move || {
                let mut reader = node.open_read().expect("open_read failed");
                let mut content = String::new();
                reader.read_to_string(&mut content).expect("read failed");
                assert_eq!(content, "hello");
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("Thread panicked");
    }
    assert_eq!(root.cache.streams().outstanding(node.identity().key()), 0);
}

#[test]
fn test_writer_blocks_readers_and_writers() {
    let root = TestRoot::new();
    root.write("exclusive.txt", b"");
    let node = root.resolve("exclusive.txt");
    let lock = node.lock().unwrap();

    let writer = node.open_write(&lock).unwrap();
    assert!(root.cache.streams().is_being_written(node.identity().key()));
    assert_access_denied(node.open_read());
    assert_access_denied(node.open_write(&lock));

    writer.close().unwrap();
    assert!(node.open_read().is_ok());
}

#[test]
fn test_reader_blocks_writer() {
    let root = TestRoot::new();
    root.write("read-held.txt", b"x");
    let node = root.resolve("read-held.txt");
    let lock = node.lock().unwrap();

    let reader = node.open_read().unwrap();
    assert_access_denied(node.open_write(&lock));
    reader.close();
    assert!(node.open_write(&lock).is_ok());
}

#[test]
fn test_waiting_writer_admitted_after_release() {
    let root = TestRoot::with_config(fast_config().with_stream_retry(100, Duration::from_millis(10)));
    root.write("later.txt", b"");
    let node = root.resolve("later.txt");
    let lock = node.lock().unwrap();
    let reader = node.open_read().unwrap();

    let releaser = thread::spawn(move || {
        thread::sleep(Duration::from_millis(5));
        reader.close();
    });
    let writer = node.open_write(&lock);
    releaser.join().expect("Thread panicked");

    assert!(writer.is_ok());
    assert!(root.cache.metrics().snapshot().ticket_waits >= 1);
}

#[test]
fn test_write_close_fires_one_changed_event() {
    let root = TestRoot::new();
    root.write("data.txt", b"old");
    let node = root.resolve("data.txt");
    let log = EventLog::new();
    node.add_listener(log.clone());

    let lock = node.lock().unwrap();
    let mut writer = node.open_write(&lock).unwrap();
    writer.write_all(b"new content").unwrap();
    writer.close().unwrap();

    let changed = log.of_kind(&EventKind::Changed);
    assert_eq!(changed.len(), 1);
    assert!(changed[0].expected);
    assert_eq!(node.size().unwrap(), 11);

    // The stamp was refreshed on close, so a refresh finds nothing new.
    node.refresh(false).unwrap();
    assert_eq!(log.of_kind(&EventKind::Changed).len(), 1);
}

#[test]
fn test_write_requires_matching_lock() {
    let root = TestRoot::new();
    root.write("one.txt", b"");
    root.write("two.txt", b"");
    let one = root.resolve("one.txt");
    let two = root.resolve("two.txt");

    let lock_two = two.lock().unwrap();
    assert!(matches!(
        one.open_write(&lock_two),
        Err(fsproxy_core::FsError::WrongLock { .. })
    ));
}

#[test]
fn test_ticket_survives_arbiter_drop() {
    let arbiter = StreamArbiter::new(1, Duration::from_millis(1), false);
    let ticket = arbiter.request("k", TicketMode::Exclusive).unwrap();
    drop(arbiter);
    ticket.close();
    ticket.close();
    assert!(ticket.is_closed());
}

#[test]
fn test_renamed_file_keeps_stream_exclusion() {
    let root = TestRoot::new();
    root.write("before.txt", b"");
    let node = root.resolve("before.txt");
    let lock = node.lock().unwrap();

    let _reader = node.open_read().unwrap();
    node.rename(&lock, "after.txt").unwrap();
    assert_eq!(root.cache.streams().outstanding(node.identity().key()), 1);
    assert_access_denied(node.open_write(&lock));
}

#[test]
fn test_writer_released_after_old_name_reopened() {
    let root = TestRoot::new();
    root.write("a.txt", b"");
    let node = root.resolve("a.txt");
    let lock = node.lock().unwrap();

    let writer = node.open_write(&lock).unwrap();
    node.rename(&lock, "b.txt").unwrap();
    let replacement = root.root().create_data("a.txt").unwrap();
    let reader = replacement.open_read().unwrap();

    drop(writer);
    drop(reader);
    let streams = root.cache.streams();
    assert!(!streams.is_being_written(node.identity().key()));
    assert_eq!(streams.outstanding(node.identity().key()), 0);
    assert_eq!(streams.outstanding(replacement.identity().key()), 0);
    drop(node.open_write(&lock).unwrap());
}
