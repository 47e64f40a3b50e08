//! Errors produced while decoding heap metadata.

use thiserror::Error;

/// A raw header tag that does not name any [`CellKind`](crate::CellKind).
///
/// Kind tags are only ever written by the allocator, so the heap treats this
/// error as a fatal invariant violation. It exists as a value so decoding
/// code stays free of panics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid cell kind tag {0}")]
pub struct InvalidCellKind(pub u8);
