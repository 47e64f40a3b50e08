//! Heap error types.

use std::fmt;
use std::io;

use core_types::CellKind;
use storage_provider::StorageError;
use thiserror::Error;

use crate::config::ConfigError;

/// Logs a heap invariant violation and aborts the current operation.
///
/// Invariant violations are bugs in the runtime or collector (bad kind tag,
/// double finalization, allocation during root scan, field access that does
/// not match a kind's layout). Continuing would risk heap corruption.
macro_rules! invariant_violation {
    ($($arg:tt)*) => {{
        let message = format!($($arg)*);
        log::error!("heap invariant violation: {}", message);
        panic!("heap invariant violation: {}", message)
    }};
}

pub(crate) use invariant_violation;

/// A heap generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Generation {
    /// Bump-allocated nursery, collected by evacuation.
    Young,
    /// Free-list allocated tenured space, collected by mark/sweep.
    Old,
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Generation::Young => f.write_str("young"),
            Generation::Old => f.write_str("old"),
        }
    }
}

/// Errors surfaced by heap operations.
#[derive(Debug, Error)]
pub enum HeapError {
    /// The request could not be satisfied even after a full collection.
    #[error("out of memory allocating {requested} bytes in the {generation} generation")]
    OutOfMemory {
        /// Allocation size in bytes.
        requested: usize,
        /// Generation the request was last attempted in.
        generation: Generation,
    },

    /// The storage provider failed while the heap was being set up.
    #[error("storage provider failure: {0}")]
    Storage(#[from] StorageError),

    /// The heap configuration is inconsistent.
    #[error("invalid heap configuration: {0}")]
    Config(#[from] ConfigError),

    /// A typed constructor was asked for more elements than a cell can hold.
    #[error("{kind} cannot hold {requested} elements")]
    CapacityExceeded {
        /// Kind being constructed.
        kind: CellKind,
        /// Requested element count.
        requested: usize,
    },
}

impl HeapError {
    /// True for out-of-memory conditions.
    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, HeapError::OutOfMemory { .. })
    }
}

/// Failure reported by a native resource while it was being released.
///
/// The collector logs these and carries on; they never abort a cycle.
#[derive(Debug, Error)]
#[error("{resource}: {message}")]
pub struct FinalizerError {
    resource: &'static str,
    message: String,
}

impl FinalizerError {
    /// Creates an error for `resource` with a human-readable message.
    pub fn new(resource: &'static str, message: impl Into<String>) -> Self {
        FinalizerError {
            resource,
            message: message.into(),
        }
    }

    /// Name of the resource that failed.
    pub fn resource(&self) -> &'static str {
        self.resource
    }
}

impl From<io::Error> for FinalizerError {
    fn from(err: io::Error) -> Self {
        FinalizerError::new("io", err.to_string())
    }
}
