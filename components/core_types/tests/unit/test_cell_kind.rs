//! Unit tests for CellKind and KindRange

use core_types::{kind_in_range, CellKind, InvalidCellKind, KindRange};
use proptest::prelude::*;

#[cfg(test)]
mod cell_kind_tests {
    use super::*;

    #[test]
    fn test_every_kind_round_trips_through_tag() {
        for kind in CellKind::ALL {
            assert_eq!(CellKind::from_u8(*kind as u8), Ok(*kind));
        }
    }

    #[test]
    fn test_first_invalid_tag_is_rejected() {
        let tag = CellKind::COUNT as u8;
        assert_eq!(CellKind::from_u8(tag), Err(InvalidCellKind(tag)));
    }

    #[test]
    fn test_names_are_unique() {
        let mut names: Vec<_> = CellKind::ALL.iter().map(|k| k.name()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), CellKind::COUNT);
    }

    #[test]
    fn test_finalizable_kinds() {
        let finalizable: Vec<_> = CellKind::ALL
            .iter()
            .copied()
            .filter(|k| k.has_finalizer())
            .collect();
        assert_eq!(
            finalizable,
            vec![
                CellKind::ExternalAsciiString,
                CellKind::ExternalUtf16String,
                CellKind::Domain,
                CellKind::JSError,
                CellKind::JSArrayBuffer,
                CellKind::HostObject,
            ]
        );
    }

    #[test]
    fn test_weak_kinds() {
        let weak: Vec<_> = CellKind::ALL
            .iter()
            .copied()
            .filter(|k| k.has_weak_refs())
            .collect();
        assert_eq!(weak, vec![CellKind::Domain, CellKind::JSWeakRef]);
    }
}

#[cfg(test)]
mod kind_range_tests {
    use super::*;

    #[test]
    fn test_object_range_bounds() {
        assert!(KindRange::OBJECT.contains(CellKind::JSObject));
        assert!(KindRange::OBJECT.contains(CellKind::HostObject));
        assert!(!KindRange::OBJECT.contains(CellKind::Domain));
        assert!(!KindRange::OBJECT.contains(CellKind::Freelist));
    }

    #[test]
    fn test_nested_ranges() {
        assert!(KindRange::OBJECT.encloses(&KindRange::CALLABLE));
        assert!(KindRange::OBJECT.encloses(&KindRange::TYPED_ARRAY));
        assert!(!KindRange::CALLABLE.encloses(&KindRange::OBJECT));
        assert!(!KindRange::TYPED_ARRAY.encloses(&KindRange::CALLABLE));
    }

    #[test]
    fn test_member_counts() {
        assert_eq!(KindRange::STRING_PRIMITIVE.members().count(), 4);
        assert_eq!(KindRange::EXTERNAL_STRING.members().count(), 2);
        assert_eq!(KindRange::OBJECT.members().count(), 18);
    }

    #[test]
    fn test_range_names() {
        let names: Vec<_> = KindRange::ALL.iter().map(|r| r.name).collect();
        assert!(names.contains(&"TypedArrayBase"));
        assert!(names.contains(&"Callable"));
    }
}

fn any_kind() -> impl Strategy<Value = CellKind> {
    (0..CellKind::COUNT).prop_map(|i| CellKind::ALL[i])
}

proptest! {
    #[test]
    fn prop_range_membership_matches_numeric_bounds(kind in any_kind()) {
        for range in KindRange::ALL {
            let numeric = range.first as u8 <= kind as u8 && kind as u8 <= range.last as u8;
            prop_assert_eq!(range.contains(kind), numeric);
            prop_assert_eq!(kind_in_range(kind, range.first, range.last), numeric);
            prop_assert_eq!(range.members().any(|k| k == kind), numeric);
        }
    }

    #[test]
    fn prop_any_tag_decodes_or_errors(tag in any::<u8>()) {
        match CellKind::from_u8(tag) {
            Ok(kind) => prop_assert_eq!(kind as u8, tag),
            Err(err) => {
                prop_assert!(tag as usize >= CellKind::COUNT);
                prop_assert_eq!(err, InvalidCellKind(tag));
            }
        }
    }
}
