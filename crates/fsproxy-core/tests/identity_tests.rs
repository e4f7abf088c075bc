//! Identity, instance stability and invalidation tests.
//!
//! Tests cover:
//! - Concurrent resolution converging on one instance
//! - Rename coherence for cached descendants
//! - Terminal invalidation and re-resolution
//! - Kind flips (file replaced by folder)
//! - Bulk refresh not multiplying proxies

mod common;

use std::fs;
use std::sync::Arc;
use std::thread;

use common::{TestRoot, assert_invalid, assert_same_instance};
use fsproxy_core::{EntryKind, FsError, RefreshOptions};

// ============================================================================
// Identity stability
// ============================================================================

#[test]
fn test_repeated_resolution_returns_same_instance() {
    let root = TestRoot::new();
    root.write("docs/a.txt", b"a");

    let first = root.resolve("docs/a.txt");
    let second = root.resolve("docs/../docs/a.txt");
    assert_same_instance(&first, &second);
    assert_eq!(first.identity(), second.identity());
}

#[test]
fn test_concurrent_resolution_converges() {
    let root = Arc::new(TestRoot::new());
    root.write("shared.bin", b"data");

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let root = Arc::clone(&root);
            thread::spawn(move || root.resolve("shared.bin"))
        })
        .collect();
    let nodes: Vec<_> = handles
        .into_iter()
        .map(|h| h.join().expect("Thread panicked"))
        .collect();

    for node in &nodes[1..] {
        assert_same_instance(&nodes[0], node);
    }
}

#[test]
fn test_children_are_cached_instances() {
    let root = TestRoot::new();
    root.write("a.txt", b"");
    root.mkdir("sub");

    let direct = root.resolve("a.txt");
    let listed = root.root().children().unwrap();
    assert_eq!(listed.len(), 2);
    let via_listing = listed.iter().find(|n| n.name() == "a.txt").unwrap();
    assert_same_instance(&direct, via_listing);
    assert_eq!(listed[1].kind(), EntryKind::Folder);
}

// ============================================================================
// Rename coherence
// ============================================================================

#[test]
fn test_folder_rename_keeps_descendant_instances() {
    let root = TestRoot::new();
    root.write("A/x", b"x");
    root.write("A/y", b"y");

    let folder = root.resolve("A");
    let x = root.resolve("A/x");
    let y = root.resolve("A/y");

    let lock = folder.lock().unwrap();
    folder.rename(&lock, "B").unwrap();

    assert_eq!(folder.path(), root.join("B"));
    assert_eq!(x.path(), root.join("B/x"));
    assert_eq!(y.path(), root.join("B/y"));
    assert!(x.is_valid() && y.is_valid());

    assert_same_instance(&x, &root.resolve("B/x"));
    assert_same_instance(&y, &root.resolve("B/y"));
    assert!(root.cache.find(&root.join("A/x")).unwrap().is_none());
}

#[test]
fn test_rename_parent_of_cached_file() {
    let root = TestRoot::new();
    root.write("F/g.txt", b"g");

    let g = root.resolve("F/g.txt");
    let folder = root.resolve("F");
    let lock = folder.lock().unwrap();
    folder.rename(&lock, "F2").unwrap();

    assert!(g.path().ends_with("F2/g.txt"));
    assert!(!root.cache.exists(&root.join("F/g.txt")).unwrap());
    assert!(root.cache.exists(&root.join("F2/g.txt")).unwrap());
    assert_eq!(
        root.root()
            .children()
            .unwrap()
            .iter()
            .map(|n| n.name())
            .collect::<Vec<_>>(),
        vec!["F2".to_string()]
    );
}

#[test]
fn test_rename_onto_existing_fails_without_changes() {
    let root = TestRoot::new();
    root.write("a.txt", b"a");
    root.write("b.txt", b"b");

    let a = root.resolve("a.txt");
    let lock = a.lock().unwrap();
    let err = a.rename(&lock, "b.txt").unwrap_err();
    assert!(matches!(err, FsError::AlreadyExists { .. }));
    assert_eq!(a.path(), root.join("a.txt"));
    assert_eq!(fs::read(root.join("b.txt")).unwrap(), b"b");
}

#[test]
fn test_move_keeps_instance_and_lock_follows() {
    let root = TestRoot::new();
    root.write("src/file.txt", b"payload");
    root.mkdir("dst");

    let file = root.resolve("src/file.txt");
    let dst = root.resolve("dst");
    let lock = file.lock().unwrap();

    let moved = file.move_to(&lock, &dst, "renamed.txt").unwrap();
    assert_same_instance(&file, &moved);
    assert_eq!(file.path(), root.join("dst/renamed.txt"));
    assert!(lock.protects(&root.join("dst/renamed.txt")));
    assert!(root.cache.locks().is_locked(&root.join("dst/renamed.txt")));
    assert_eq!(dst.children().unwrap().len(), 1);
}

#[test]
fn test_move_folder_into_itself_rejected() {
    let root = TestRoot::new();
    root.mkdir("outer/inner");
    let outer = root.resolve("outer");
    let inner = root.resolve("outer/inner");
    let lock = outer.lock().unwrap();
    assert!(matches!(
        outer.move_to(&lock, &inner, "loop"),
        Err(FsError::InvalidTarget { .. })
    ));
}

// ============================================================================
// Invalidation
// ============================================================================

#[test]
fn test_deleted_proxy_stays_invalid() {
    let root = TestRoot::new();
    root.write("gone.txt", b"");

    let node = root.resolve("gone.txt");
    let lock = node.lock().unwrap();
    node.delete(&lock).unwrap();
    drop(lock);
    assert_invalid(&node);

    root.write("gone.txt", b"again");
    let fresh = root.resolve("gone.txt");
    assert!(!Arc::ptr_eq(&node, &fresh));
    assert!(fresh.is_valid());
    assert!(!node.is_valid());
}

#[test]
fn test_folder_delete_invalidates_descendants() {
    let root = TestRoot::new();
    root.write("tree/a/b.txt", b"");

    let tree = root.resolve("tree");
    let leaf = root.resolve("tree/a/b.txt");
    let lock = tree.lock().unwrap();
    tree.delete(&lock).unwrap();

    assert!(!tree.is_valid());
    assert!(!leaf.is_valid());
    assert!(!root.join("tree").exists());
}

#[test]
fn test_folder_delete_refused_while_file_locked() {
    let root = TestRoot::new();
    root.write("busy/file.txt", b"");

    let file = root.resolve("busy/file.txt");
    let _held = file.lock().unwrap();
    let folder = root.resolve("busy");
    let lock = folder.lock().unwrap();
    assert!(matches!(
        folder.delete(&lock),
        Err(FsError::AlreadyLocked { .. })
    ));
    assert!(file.is_valid());
}

#[test]
fn test_file_replaced_by_folder() {
    let root = TestRoot::new();
    root.write("p", b"file");

    let file = root.resolve("p");
    fs::remove_file(root.join("p")).unwrap();
    fs::create_dir(root.join("p")).unwrap();

    file.refresh(false).unwrap();
    assert!(!file.is_valid());

    let folder = root.cache.resolve_folder(&root.join("p")).unwrap();
    assert!(folder.is_folder());
    assert!(!Arc::ptr_eq(&file, &folder));
}

#[test]
fn test_invalidate_subtree_without_stat() {
    let root = TestRoot::new();
    root.write("sub/one", b"");
    root.write("sub/two", b"");

    let one = root.resolve("sub/one");
    let two = root.resolve("sub/two");
    let sub = root.resolve("sub");

    let before = root.cache.metrics().snapshot();
    let count = root.cache.invalidate_subtree(&root.join("sub"));
    assert_eq!(count, 3);
    assert_eq!(root.cache.metrics().snapshot().since(&before).stats, 0);
    for node in [&one, &two, &sub] {
        assert!(!node.is_valid());
    }
}

// ============================================================================
// Refresh and existence
// ============================================================================

#[test]
fn test_bulk_refresh_does_not_multiply_proxies() {
    let root = TestRoot::new();
    for i in 0..10 {
        root.write(&format!("d/f{i}"), b"");
    }
    let folder = root.resolve("d");
    let children = folder.children().unwrap();
    let before = root.cache.len();

    let report = root.cache.bulk_refresh(&RefreshOptions::default());
    assert_eq!(report.errors, 0);
    assert_eq!(root.cache.len(), before);
    assert_eq!(folder.children().unwrap().len(), children.len());
}

#[test]
fn test_existence_of_cached_node_performs_no_stat() {
    let root = TestRoot::new();
    root.write("here.txt", b"");
    let _node = root.resolve("here.txt");

    let before = root.cache.metrics().snapshot();
    for _ in 0..5 {
        assert!(root.cache.exists(&root.join("here.txt")).unwrap());
    }
    let delta = root.cache.metrics().snapshot().since(&before);
    assert_eq!(delta.stats, 0);
    assert_eq!(delta.hits, 5);
}

#[test]
fn test_unsupported_entries_have_no_proxy() {
    #[cfg(unix)]
    {
        use std::os::unix::net::UnixListener;
        let root = TestRoot::new();
        let _listener = UnixListener::bind(root.join("sock")).unwrap();
        assert!(root.cache.find(&root.join("sock")).unwrap().is_none());
        assert!(root.root().children().unwrap().is_empty());
    }
}
