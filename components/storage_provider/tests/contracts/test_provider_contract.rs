//! Contract tests every provider must pass
//!
//! Segments are segment-size aligned, exactly segment-size long, zeroed on
//! hand-out, and distinct while live.

use std::sync::Arc;

use storage_provider::{
    default_provider, CountingStorageProvider, MallocStorageProvider,
    PreAllocatedStorageProvider, StorageProvider,
};

const SEGMENT: usize = 1 << 16;

fn check_contract(provider: &dyn StorageProvider) {
    let size = provider.segment_size();
    let segments: Vec<_> = (0..3)
        .map(|i| provider.new_storage(Some(&format!("seg{i}"))).unwrap())
        .collect();
    for (i, s) in segments.iter().enumerate() {
        assert_eq!(s.size(), size, "{}", provider.provider_name());
        assert_eq!(s.addr() % size, 0, "{}", provider.provider_name());
        // SAFETY: the segment is live and `size` bytes long.
        let bytes = unsafe { std::slice::from_raw_parts_mut(s.as_ptr(), s.size()) };
        assert!(bytes.iter().all(|b| *b == 0));
        bytes.fill(0xA5);
        for other in &segments[i + 1..] {
            assert!(!s.contains(other.addr()));
        }
    }
    for s in segments {
        provider.delete_storage(s);
    }
    // A recycled segment is zeroed again.
    let s = provider.new_storage(None).unwrap();
    // SAFETY: the segment is live and `size` bytes long.
    let bytes = unsafe { std::slice::from_raw_parts(s.as_ptr(), s.size()) };
    assert!(bytes.iter().all(|b| *b == 0));
    provider.delete_storage(s);
}

#[test]
fn test_malloc_provider_contract() {
    check_contract(&MallocStorageProvider::new(SEGMENT).unwrap());
}

#[test]
fn test_preallocated_provider_contract() {
    check_contract(&PreAllocatedStorageProvider::new(SEGMENT, 3).unwrap());
}

#[test]
fn test_default_provider_contract() {
    let provider = default_provider(SEGMENT).unwrap();
    check_contract(provider.as_ref());
}

#[test]
fn test_counting_provider_contract() {
    let _ = env_logger::builder().is_test(true).try_init();
    let counting = CountingStorageProvider::new(Arc::new(MallocStorageProvider::new(SEGMENT).unwrap()));
    check_contract(&counting);
    assert_eq!(counting.num_allocated(), 4);
    assert_eq!(counting.num_deleted(), 4);
}
