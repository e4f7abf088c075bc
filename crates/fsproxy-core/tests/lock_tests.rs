//! Exclusivity lock tests.
//!
//! Tests cover:
//! - Plain locks on distinct files
//! - Escalation to sentinels on case-insensitive collisions
//! - Claims observed across independent registries
//! - Sentinel cleanup on release and forced release

mod common;

use std::fs;

use common::{TestRoot, assert_already_locked, fast_config};
use fsproxy_core::{LockManager, ProxyRegistry};

#[test]
fn test_distinct_files_lock_plainly() {
    let root = TestRoot::new();
    root.write("a.txt", b"");
    root.write("b.txt", b"");

    let a = root.resolve("a.txt").lock().unwrap();
    let b = root.resolve("b.txt").lock().unwrap();
    assert!(!a.is_escalated());
    assert!(!b.is_escalated());
    assert_eq!(root.cache.locks().len(), 2);
}

#[test]
fn test_second_lock_on_same_file_refused() {
    let root = TestRoot::new();
    root.write("a.txt", b"");
    let node = root.resolve("a.txt");

    let held = node.lock().unwrap();
    assert_already_locked(node.lock());
    drop(held);
    assert!(node.lock().is_ok());
}

#[test]
fn test_case_collision_escalates_every_claimant() {
    let root = TestRoot::new();
    root.write("Foo.txt", b"upper");
    root.write("foo.txt", b"lower");

    let upper = root.resolve("Foo.txt").lock().unwrap();
    assert!(!upper.is_escalated());
    let lower = root.resolve("foo.txt").lock().unwrap();

    assert!(upper.is_escalated());
    assert!(lower.is_escalated());
    let upper_sentinel = upper.sentinel_path().unwrap();
    let lower_sentinel = lower.sentinel_path().unwrap();
    assert_eq!(upper_sentinel, root.join(".LCKFoo.txt~"));
    assert_eq!(lower_sentinel, root.join(".LCKfoo.txt~"));
    assert_eq!(
        fs::read_to_string(&upper_sentinel).unwrap(),
        root.join("Foo.txt").to_string_lossy()
    );

    // Sentinels never surface as children.
    let names: Vec<String> = root
        .root()
        .children()
        .unwrap()
        .iter()
        .map(|n| n.name())
        .collect();
    assert_eq!(names, vec!["Foo.txt".to_string(), "foo.txt".to_string()]);
}

#[test]
fn test_third_claimant_in_other_registry_fails() {
    let root = TestRoot::new();
    root.write("Foo.txt", b"");
    root.write("foo.txt", b"");
    let _upper = root.resolve("Foo.txt").lock().unwrap();
    let _lower = root.resolve("foo.txt").lock().unwrap();

    let other = ProxyRegistry::new(fast_config());
    let other_cache = other.mount(root.path()).unwrap();
    let node = other_cache.resolve(&root.join("Foo.txt")).unwrap();
    assert_already_locked(node.lock());
}

#[test]
fn test_third_spelling_in_same_registry_fails() {
    let root = TestRoot::new();
    for name in ["Foo.txt", "foo.txt", "FOO.txt"] {
        root.write(name, b"");
    }
    let _upper = root.resolve("Foo.txt").lock().unwrap();
    let _lower = root.resolve("foo.txt").lock().unwrap();

    assert_already_locked(root.resolve("FOO.txt").lock());
    assert!(!root.join(".LCKFOO.txt~").exists());
    assert!(!root.cache.locks().is_locked(&root.join("FOO.txt")));
}

#[test]
fn test_release_removes_sentinels() {
    let root = TestRoot::new();
    root.write("Foo.txt", b"");
    root.write("foo.txt", b"");

    let upper = root.resolve("Foo.txt").lock().unwrap();
    let lower = root.resolve("foo.txt").lock().unwrap();
    let sentinel = upper.sentinel_path().unwrap();
    assert!(sentinel.exists());

    upper.release();
    upper.release();
    assert!(!sentinel.exists());
    assert!(lower.sentinel_path().unwrap().exists());
    drop(lower);
    assert!(!root.join(".LCKfoo.txt~").exists());
}

#[test]
fn test_force_release_all_clears_escalated_locks() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("Doc"), b"").unwrap();
    fs::write(dir.path().join("doc"), b"").unwrap();

    let manager = LockManager::default();
    let upper = manager.acquire(&dir.path().join("Doc")).unwrap();
    let lower = manager.acquire(&dir.path().join("doc")).unwrap();

    assert_eq!(manager.force_release_all(), 2);
    assert!(!upper.is_valid());
    assert!(!lower.is_valid());
    assert!(!dir.path().join(".LCKDoc~").exists());
    assert!(!dir.path().join(".LCKdoc~").exists());
    assert!(manager.is_empty());
}

#[test]
fn test_lock_follows_renamed_file() {
    let root = TestRoot::new();
    root.write("Foo.txt", b"");
    root.write("foo.txt", b"");
    let node = root.resolve("Foo.txt");
    let lock = node.lock().unwrap();
    let _other = root.resolve("foo.txt").lock().unwrap();
    assert!(lock.is_escalated());

    node.rename(&lock, "Bar.txt").unwrap();
    assert!(lock.protects(&root.join("Bar.txt")));
    assert!(!root.join(".LCKFoo.txt~").exists());
    assert_eq!(lock.sentinel_path(), Some(root.join(".LCKBar.txt~")));
}

#[test]
fn test_folder_lock_is_lightweight() {
    let root = TestRoot::new();
    root.mkdir("dir");
    let folder = root.resolve("dir");
    let first = folder.lock().unwrap();
    let second = folder.lock().unwrap();
    assert!(first.is_lightweight() && second.is_lightweight());
    assert!(root.cache.locks().is_empty());
}
