//! Custom assertions for fsproxy integration tests.

use std::sync::Arc;

use fsproxy_core::{FsError, FsResult, ProxyNode};

/// Assert that two handles are the same proxy instance.
pub fn assert_same_instance(a: &Arc<ProxyNode>, b: &Arc<ProxyNode>) {
    assert!(
        Arc::ptr_eq(a, b),
        "Expected one instance, got {} and {}",
        a.path().display(),
        b.path().display()
    );
}

/// Assert that a proxy ended in the terminal invalid state.
pub fn assert_invalid(node: &Arc<ProxyNode>) {
    assert!(!node.is_valid(), "Expected {} to be invalid", node.path().display());
    match node.lock() {
        Err(FsError::InvalidProxy { .. }) => {}
        other => panic!("Expected InvalidProxy from lock(), got {other:?}"),
    }
}

/// Assert that a result failed with `AccessDenied`.
pub fn assert_access_denied<T: std::fmt::Debug>(result: FsResult<T>) {
    match result {
        Err(FsError::AccessDenied { .. }) => {}
        other => panic!("Expected AccessDenied, got {other:?}"),
    }
}

/// Assert that a result failed with `AlreadyLocked`.
pub fn assert_already_locked<T: std::fmt::Debug>(result: FsResult<T>) {
    match result {
        Err(FsError::AlreadyLocked { .. }) => {}
        other => panic!("Expected AlreadyLocked, got {other:?}"),
    }
}
