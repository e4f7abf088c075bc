//! Concurrency tests.
//!
//! Tests parallel operations and races:
//! - Parallel creation in one folder
//! - Competing lock acquisitions
//! - Readers racing a writer
//! - Refresh racing structural changes
//! - Lookups racing renames

mod common;

use std::io::{Read, Write};
use std::sync::{Arc, Barrier};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use common::{EventLog, TestRoot, fast_config};
use fsproxy_core::{EventKind, FsError, RefreshOptions};

#[test]
fn test_parallel_creates_in_one_folder() {
    let root = Arc::new(TestRoot::new());
    let top = root.root();

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let top = Arc::clone(&top);
            thread::spawn(move || top.create_data(&format!("file_{i}.txt")).expect("create failed"))
        })
        .collect();
    let created: Vec<_> = handles
        .into_iter()
        .map(|h| h.join().expect("Thread panicked"))
        .collect();

    let listed = top.children().unwrap();
    assert_eq!(listed.len(), 8);
    for node in &created {
        assert!(listed.iter().any(|n| Arc::ptr_eq(n, node)));
    }
}

#[test]
fn test_only_one_thread_wins_the_lock() {
    let root = Arc::new(TestRoot::new());
    root.write("contested.txt", b"");
    let node = root.resolve("contested.txt");
    let winners = Arc::new(AtomicUsize::new(0));
    let tried = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let node = Arc::clone(&node);
            let winners = Arc::clone(&winners);
            let tried = Arc::clone(&tried);
            thread::spawn(move || {
                let attempt = node.lock();
                // Hold until every thread has tried.
                tried.wait();
                match attempt {
                    Ok(_lock) => {
                        winners.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(FsError::AlreadyLocked { .. }) => {}
                    Err(e) => panic!("Unexpected error: {e}"),
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("Thread panicked");
    }
    assert_eq!(winners.load(Ordering::SeqCst), 1);
    assert!(root.cache.locks().is_empty());
}

#[test]
fn test_readers_never_observe_partial_write() {
    let config = fast_config().with_stream_retry(200, Duration::from_millis(5));
    let root = Arc::new(TestRoot::with_config(config));
    root.write("doc.txt", b"AAAA");
    let node = root.resolve("doc.txt");

    let writer_node = Arc::clone(&node);
    let writer = thread::spawn(move || {
        let lock = writer_node.lock().expect("lock failed");
        for fill in [b'B', b'C', b'D'] {
            let mut stream = writer_node.open_write(&lock).expect("open_write failed");
            stream.write_all(&[fill; 4]).expect("write failed");
            stream.close().expect("close failed");
        }
    });

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let node = Arc::clone(&node);
            thread::spawn(move || {
                for _ in 0..10 {
                    let mut stream = node.open_read().expect("open_read failed");
                    let mut content = Vec::new();
                    stream.read_to_end(&mut content).expect("read failed");
                    assert_eq!(content.len(), 4, "observed a truncated file");
                    assert!(content.iter().all(|b| *b == content[0]));
                }
            })
        })
        .collect();

    writer.join().expect("Writer panicked");
    for reader in readers {
        reader.join().expect("Reader panicked");
    }
}

#[test]
fn test_refresh_races_deletes() {
    let root = Arc::new(TestRoot::new());
    for i in 0..20 {
        root.write(&format!("d/f{i}"), b"");
    }
    let folder = root.resolve("d");
    let files = folder.children().unwrap();

    let refresher = {
        let root = Arc::clone(&root);
        thread::spawn(move || {
            for _ in 0..5 {
                root.cache.bulk_refresh(&RefreshOptions::default());
            }
        })
    };
    for file in files.iter().step_by(2) {
        if let Ok(lock) = file.lock() {
            // The refresher may have invalidated it first.
            match file.delete(&lock) {
                Ok(()) | Err(FsError::InvalidProxy { .. } | FsError::Io { .. }) => {}
                Err(e) => panic!("Unexpected error: {e}"),
            }
        }
    }
    refresher.join().expect("Refresher panicked");

    root.cache.bulk_refresh(&RefreshOptions::default());
    assert_eq!(folder.children().unwrap().len(), 10);
    assert_eq!(files.iter().filter(|f| f.is_valid()).count(), 10);
}

#[test]
fn test_lookup_racing_rename_sees_renamed_instance() {
    let root = Arc::new(TestRoot::new());
    let log = EventLog::new();
    root.cache.add_listener(log.clone());

    for i in 0..10 {
        root.write(&format!("a{i}.txt"), b"");
        let node = root.resolve(&format!("a{i}.txt"));
        let target = root.join(&format!("b{i}.txt"));
        let barrier = Arc::new(Barrier::new(4));

        let lookups: Vec<_> = (0..3)
            .map(|_| {
                let root = Arc::clone(&root);
                let barrier = Arc::clone(&barrier);
                let target = target.clone();
                thread::spawn(move || {
                    barrier.wait();
                    loop {
                        if let Some(found) = root.cache.find(&target).expect("find failed") {
                            return found;
                        }
                        thread::yield_now();
                    }
                })
            })
            .collect();

        barrier.wait();
        let lock = node.lock().unwrap();
        node.rename(&lock, &format!("b{i}.txt")).unwrap();

        for lookup in lookups {
            let found = lookup.join().expect("Lookup panicked");
            assert!(Arc::ptr_eq(&found, &node), "lookup published a second proxy");
            assert!(found.is_valid());
        }
    }
    assert!(log.of_kind(&EventKind::Deleted).is_empty());
}

#[test]
fn test_refresh_racing_creates_keeps_new_children() {
    let root = Arc::new(TestRoot::new());
    let top = root.root();
    top.children().unwrap();
    let log = EventLog::new();
    root.cache.add_listener(log.clone());
    let done = Arc::new(AtomicUsize::new(0));

    let refresher = {
        let top = Arc::clone(&top);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            while done.load(Ordering::Acquire) == 0 {
                top.refresh(false).expect("refresh failed");
            }
        })
    };
    let created: Vec<_> = (0..30)
        .map(|i| top.create_data(&format!("new_{i}.txt")).expect("create failed"))
        .collect();
    done.store(1, Ordering::Release);
    refresher.join().expect("Refresher panicked");

    assert!(log.of_kind(&EventKind::Deleted).is_empty());
    assert!(created.iter().all(|n| n.is_valid()));
    assert_eq!(top.children().unwrap().len(), 30);
}
