//! Core heap types shared by the compiler and the collector.
//!
//! This crate provides the closed set of cell kinds that every managed
//! object in the heap is tagged with, together with the per-kind metadata
//! the collector uses to find pointer fields.
//!
//! # Overview
//!
//! - [`CellKind`] - Closed enumeration of heap object kinds
//! - [`KindRange`] - Contiguous sub-ranges of kinds (strings, objects, ...)
//! - [`Metadata`] - Pointer, weak and native field layout of a kind
//! - [`InvalidCellKind`] - Error decoding a raw kind tag
//!
//! # Examples
//!
//! ```
//! use core_types::{CellKind, KindRange};
//!
//! let kind = CellKind::Uint8Array;
//! assert_eq!(kind.name(), "Uint8Array");
//! assert!(kind.is_typed_array());
//! assert!(KindRange::OBJECT.contains(kind));
//! assert!(!KindRange::CALLABLE.contains(kind));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

mod cell_kind;
mod error;
pub mod layout;
mod metadata;

pub use cell_kind::{cell_kinds_contiguous_ascending, kind_in_range, CellKind, KindRange};
pub use error::InvalidCellKind;
pub use metadata::{ArrayDesc, FieldDesc, Metadata, SizeRule};
