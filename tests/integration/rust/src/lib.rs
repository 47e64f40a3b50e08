//! Integration test suite for the Corten heap
//!
//! This crate provides integration tests that verify the storage providers,
//! the cell layouts and the collector work together across component
//! boundaries.

/// Re-export components for test convenience
pub mod components {
    pub use core_types;
    pub use memory_manager;
    pub use storage_provider;
}
