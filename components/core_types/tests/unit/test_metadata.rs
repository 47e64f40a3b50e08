//! Unit tests for per-kind metadata

use core_types::layout::{HEADER_SIZE, MIN_CELL_SIZE};
use core_types::{CellKind, KindRange, SizeRule};

#[cfg(test)]
mod metadata_tests {
    use super::*;

    #[test]
    fn test_object_kinds_share_parent_and_properties() {
        for kind in KindRange::OBJECT.members() {
            let meta = kind.metadata();
            assert_eq!(meta.field("parent").map(|f| f.offset), Some(0), "{kind}");
            assert_eq!(meta.field("properties").map(|f| f.offset), Some(8), "{kind}");
        }
    }

    #[test]
    fn test_allocation_sizes_are_aligned_and_at_least_minimum() {
        for kind in CellKind::ALL {
            let meta = kind.metadata();
            for len in [0usize, 1, 7, 33] {
                let size = meta.allocation_size(len).unwrap();
                assert_eq!(size % 8, 0, "{kind}");
                assert!(size >= MIN_CELL_SIZE, "{kind}");
            }
        }
    }

    #[test]
    fn test_fixed_fields_fit_in_payload() {
        for kind in CellKind::ALL {
            let meta = kind.metadata();
            if let SizeRule::Fixed { payload } = meta.size {
                let fields = meta.pointers.iter().chain(meta.weak).chain(meta.native.iter());
                for field in fields {
                    assert!(field.offset + 8 <= payload, "{kind}.{}", field.name);
                }
            }
        }
    }

    #[test]
    fn test_weak_fields_only_on_weak_kinds() {
        for kind in CellKind::ALL {
            if !kind.metadata().weak.is_empty() {
                assert!(kind.has_weak_refs(), "{kind}");
            }
        }
    }

    #[test]
    fn test_domain_layout() {
        let meta = CellKind::Domain.metadata();
        assert_eq!(meta.native.map(|f| f.offset), Some(0));
        assert_eq!(meta.field("cjsModules").map(|f| f.offset), Some(8));
        assert_eq!(meta.min_size(), HEADER_SIZE + 16);
    }

    #[test]
    fn test_array_storage_elements_are_pointers() {
        let meta = CellKind::ArrayStorage.metadata();
        let mut offsets = Vec::new();
        meta.for_each_pointer_offset(3, |o| offsets.push(o));
        assert_eq!(offsets, vec![8, 16, 24]);
        assert!(meta.has_pointers());
        assert!(meta.is_variable_sized());
    }

    #[test]
    fn test_freelist_size_is_byte_granular() {
        let meta = CellKind::Freelist.metadata();
        assert_eq!(meta.allocation_size(0), Some(MIN_CELL_SIZE));
        assert_eq!(meta.allocation_size(40), Some(48));
        assert!(!meta.has_pointers());
    }
}
