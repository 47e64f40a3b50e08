//! Memory Manager - Garbage collector and heap management
//!
//! This component provides:
//! - Generational garbage collection (semi-space young generation,
//!   mark/sweep old generation with free lists)
//! - Segment-based heap allocation over a [`StorageProvider`](storage_provider::StorageProvider)
//! - Write barriers for remembered set maintenance and SATB marking
//! - Incremental old-generation marking
//! - Weak references, finalizers and native resources owned by cells
//! - Domains owning runtime modules through weak back-references
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//! use memory_manager::{GcConfig, GcKind, Heap};
//! use storage_provider::MallocStorageProvider;
//!
//! let provider = Arc::new(MallocStorageProvider::new(1 << 16).unwrap());
//! let mut heap = Heap::new(GcConfig::default(), provider).unwrap();
//!
//! let proto = heap.alloc_object(None).unwrap();
//! let object = heap.alloc_object(Some(proto)).unwrap();
//! let root = heap.add_root(object);
//!
//! heap.collect(GcKind::Full);
//!
//! // Collections move cells; roots are updated.
//! let object = heap.root(root).unwrap();
//! assert!(heap.get_named_field(object, "parent").is_some());
//! assert_eq!(heap.info().full_collections, 1);
//! ```

pub mod cell;
pub mod concurrent_gc;
pub mod config;
pub mod domain;
pub mod error;
pub mod gc;
pub mod heap;
pub mod native;
pub mod object;
pub mod old_gen;
pub mod roots;
pub mod segment;
pub mod stats;
pub mod vtable;
pub mod weak_ref;
pub mod write_barrier;
pub mod young_gen;

// Re-export main types
pub use cell::{CellHandle, CellHeader, HasFinalizer};
pub use config::{ConfigError, GcConfig};
pub use domain::{DeleteHook, Domain, DomainModules, RuntimeModule};
pub use error::{FinalizerError, Generation, HeapError};
pub use gc::GcKind;
pub use heap::Heap;
pub use native::{BackingStore, CapturedStack, ExternalChars, NativeResource, NativeTable};
pub use roots::{RootAcceptor, RootId, RootProvider, RootTable};
pub use stats::{
    CollectionStats, CumulativeHeapStats, DebugHeapInfo, HeapInfo, KindCount, SegmentCounts,
};
pub use vtable::{vtable, VTable};
pub use weak_ref::{WeakRef, WeakRefAcceptor, WeakRefTable};
pub use write_barrier::RememberedSet;

// Re-export incremental marking types
pub use concurrent_gc::{GcPhase, IncrementalConfig, IncrementalStats, MarkStack, WriteBarrierBuffer};

pub use core_types::CellKind;
