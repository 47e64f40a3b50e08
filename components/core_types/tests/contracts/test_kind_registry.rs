//! Contract tests for the kind registry
//!
//! The collector relies on these properties when it decodes headers and
//! dispatches per-kind behaviour.

use core_types::{CellKind, KindRange};

#[test]
fn test_kind_tags_fit_in_header_byte() {
    assert!(CellKind::COUNT <= u8::MAX as usize);
}

#[test]
fn test_finalizable_kinds_have_native_slot() {
    for kind in CellKind::ALL {
        if kind.has_finalizer() {
            assert!(kind.metadata().native.is_some(), "{kind}");
        }
    }
}

#[test]
fn test_freelist_is_not_an_object() {
    assert!(!CellKind::Freelist.is_object());
    assert!(!CellKind::Freelist.has_finalizer());
    for range in KindRange::ALL {
        assert!(!range.contains(CellKind::Freelist));
    }
}

#[test]
fn test_ranges_are_ordered() {
    for range in KindRange::ALL {
        assert!(range.first <= range.last, "{}", range.name);
    }
}
