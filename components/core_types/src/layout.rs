//! Byte layout of cells.
//!
//! Every cell starts with an 8-byte header followed by its payload. Offsets
//! in this module are relative to the start of the payload and are always a
//! multiple of [`SLOT_SIZE`].

/// Size of the cell header in bytes.
pub const HEADER_SIZE: usize = 8;

/// Size of one payload slot (pointer, native index or raw word).
pub const SLOT_SIZE: usize = 8;

/// Allocation granularity of the heap.
pub const HEAP_ALIGN: usize = 8;

/// Smallest cell the heap will allocate: a header plus one slot, so that a
/// forwarding address always fits.
pub const MIN_CELL_SIZE: usize = HEADER_SIZE + SLOT_SIZE;

/// Rounds `size` up to [`HEAP_ALIGN`].
#[inline]
pub const fn heap_align(size: usize) -> usize {
    (size + HEAP_ALIGN - 1) & !(HEAP_ALIGN - 1)
}

/// Prototype link shared by all object kinds.
pub const OBJECT_PARENT: u32 = 0;
/// Property storage shared by all object kinds.
pub const OBJECT_PROPERTIES: u32 = 8;
/// First kind-specific slot of an object.
pub const OBJECT_FIRST_OWN_SLOT: u32 = 16;

/// `ArrayStorage` element count.
pub const ARRAY_STORAGE_LENGTH: u32 = 0;
/// `ArrayStorage` first element.
pub const ARRAY_STORAGE_ELEMENTS: u32 = 8;

/// `Environment` parent link.
pub const ENVIRONMENT_PARENT: u32 = 0;
/// `Environment` slot count.
pub const ENVIRONMENT_LENGTH: u32 = 8;
/// `Environment` first slot.
pub const ENVIRONMENT_SLOTS: u32 = 16;

/// Character count of heap strings.
pub const STRING_LENGTH: u32 = 0;
/// First character of heap strings.
pub const STRING_CHARS: u32 = 8;

/// Native slot holding an external string's buffer.
pub const EXTERNAL_STRING_BUFFER: u32 = 0;
/// Character count of an external string.
pub const EXTERNAL_STRING_LENGTH: u32 = 8;

/// Native slot holding a domain's module list.
pub const DOMAIN_MODULES: u32 = 0;
/// `ArrayStorage` of CommonJS module records.
pub const DOMAIN_CJS_MODULES: u32 = 8;

/// `JSArray` indexed storage.
pub const ARRAY_INDEXED_STORAGE: u32 = 16;
/// Native slot holding a `JSError`'s captured stack.
pub const ERROR_STACK_TRACE: u32 = 16;
/// Weak slot index of a `JSWeakRef`.
pub const WEAK_REF_SLOT: u32 = 16;
/// Host function identifier of a `NativeFunction`.
pub const NATIVE_FUNCTION_ID: u32 = 16;
/// Closure environment of a `JSFunction`.
pub const FUNCTION_ENVIRONMENT: u32 = 16;
/// Owning domain of a `JSFunction`.
pub const FUNCTION_DOMAIN: u32 = 24;
/// Target of a `BoundFunction`.
pub const BOUND_FUNCTION_TARGET: u32 = 16;
/// Bound arguments of a `BoundFunction`.
pub const BOUND_FUNCTION_ARGS: u32 = 24;
/// Native slot holding an `ArrayBuffer` backing store.
pub const ARRAY_BUFFER_STORE: u32 = 16;
/// `ArrayBuffer` viewed by a typed array.
pub const TYPED_ARRAY_BUFFER: u32 = 16;
/// Byte offset of a typed array into its buffer.
pub const TYPED_ARRAY_BYTE_OFFSET: u32 = 24;
/// Element count of a typed array.
pub const TYPED_ARRAY_LENGTH: u32 = 32;
/// Native slot holding a host object's resource.
pub const HOST_OBJECT_RESOURCE: u32 = 16;
