//! Per-kind heap metadata.
//!
//! The collector never inspects a cell's payload without consulting the
//! kind's [`Metadata`]: it lists which payload offsets hold strong
//! references, which hold weak slot indices, where the native slot is, and
//! how the allocation size of an instance is computed. Metadata is built once
//! per kind in a static table, never per instance.

use crate::layout::{self, heap_align, HEADER_SIZE, MIN_CELL_SIZE, SLOT_SIZE};
use crate::CellKind;

/// A named payload field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDesc {
    /// Field name, for diagnostics and heap dumps.
    pub name: &'static str,
    /// Payload offset in bytes.
    pub offset: u32,
}

impl FieldDesc {
    const fn new(name: &'static str, offset: u32) -> Self {
        FieldDesc { name, offset }
    }
}

/// Trailing variable-length array of a kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArrayDesc {
    /// Payload offset of the `u64` element count.
    pub length_offset: u32,
    /// Payload offset of the first element.
    pub start_offset: u32,
    /// Size of one element in bytes.
    pub elem_size: u32,
    /// Whether elements are strong references.
    pub pointers: bool,
}

/// How the allocation size of an instance is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeRule {
    /// Every instance has the same payload size.
    Fixed {
        /// Payload bytes.
        payload: u32,
    },
    /// Payload is `base + elem * length`.
    Variable {
        /// Fixed part of the payload.
        base: u32,
        /// Bytes per element.
        elem: u32,
    },
}

/// Layout description of one cell kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metadata {
    /// Kind described by this entry.
    pub kind: CellKind,
    /// Fixed strong reference fields.
    pub pointers: &'static [FieldDesc],
    /// Fixed weak slot fields.
    pub weak: &'static [FieldDesc],
    /// Slot holding an index into the heap's native table, if any.
    pub native: Option<FieldDesc>,
    /// Trailing array, if any.
    pub array: Option<ArrayDesc>,
    /// Size computation rule.
    pub size: SizeRule,
}

const NO_FIELDS: &[FieldDesc] = &[];

const OBJECT_FIELDS: &[FieldDesc] = &[
    FieldDesc::new("parent", layout::OBJECT_PARENT),
    FieldDesc::new("properties", layout::OBJECT_PROPERTIES),
];

const ARRAY_FIELDS: &[FieldDesc] = &[
    FieldDesc::new("parent", layout::OBJECT_PARENT),
    FieldDesc::new("properties", layout::OBJECT_PROPERTIES),
    FieldDesc::new("indexedStorage", layout::ARRAY_INDEXED_STORAGE),
];

const FUNCTION_FIELDS: &[FieldDesc] = &[
    FieldDesc::new("parent", layout::OBJECT_PARENT),
    FieldDesc::new("properties", layout::OBJECT_PROPERTIES),
    FieldDesc::new("environment", layout::FUNCTION_ENVIRONMENT),
    FieldDesc::new("domain", layout::FUNCTION_DOMAIN),
];

const BOUND_FUNCTION_FIELDS: &[FieldDesc] = &[
    FieldDesc::new("parent", layout::OBJECT_PARENT),
    FieldDesc::new("properties", layout::OBJECT_PROPERTIES),
    FieldDesc::new("target", layout::BOUND_FUNCTION_TARGET),
    FieldDesc::new("boundArgs", layout::BOUND_FUNCTION_ARGS),
];

const TYPED_ARRAY_FIELDS: &[FieldDesc] = &[
    FieldDesc::new("parent", layout::OBJECT_PARENT),
    FieldDesc::new("properties", layout::OBJECT_PROPERTIES),
    FieldDesc::new("buffer", layout::TYPED_ARRAY_BUFFER),
];

const DOMAIN_FIELDS: &[FieldDesc] = &[FieldDesc::new("cjsModules", layout::DOMAIN_CJS_MODULES)];

const ENVIRONMENT_FIELDS: &[FieldDesc] = &[FieldDesc::new(
    "parentEnvironment",
    layout::ENVIRONMENT_PARENT,
)];

const WEAK_REF_FIELDS: &[FieldDesc] = &[FieldDesc::new("referent", layout::WEAK_REF_SLOT)];

const fn fixed(kind: CellKind, pointers: &'static [FieldDesc], payload: u32) -> Metadata {
    Metadata {
        kind,
        pointers,
        weak: NO_FIELDS,
        native: None,
        array: None,
        size: SizeRule::Fixed { payload },
    }
}

const fn with_native(meta: Metadata, name: &'static str, offset: u32) -> Metadata {
    Metadata {
        native: Some(FieldDesc::new(name, offset)),
        ..meta
    }
}

const fn typed_array(kind: CellKind) -> Metadata {
    fixed(kind, TYPED_ARRAY_FIELDS, 40)
}

static METADATA: [Metadata; CellKind::COUNT] = [
    Metadata {
        kind: CellKind::Freelist,
        pointers: NO_FIELDS,
        weak: NO_FIELDS,
        native: None,
        array: None,
        size: SizeRule::Variable { base: 0, elem: 1 },
    },
    Metadata {
        kind: CellKind::ArrayStorage,
        pointers: NO_FIELDS,
        weak: NO_FIELDS,
        native: None,
        array: Some(ArrayDesc {
            length_offset: layout::ARRAY_STORAGE_LENGTH,
            start_offset: layout::ARRAY_STORAGE_ELEMENTS,
            elem_size: 8,
            pointers: true,
        }),
        size: SizeRule::Variable { base: 8, elem: 8 },
    },
    Metadata {
        kind: CellKind::Environment,
        pointers: ENVIRONMENT_FIELDS,
        weak: NO_FIELDS,
        native: None,
        array: Some(ArrayDesc {
            length_offset: layout::ENVIRONMENT_LENGTH,
            start_offset: layout::ENVIRONMENT_SLOTS,
            elem_size: 8,
            pointers: true,
        }),
        size: SizeRule::Variable { base: 16, elem: 8 },
    },
    Metadata {
        kind: CellKind::DynamicAsciiString,
        pointers: NO_FIELDS,
        weak: NO_FIELDS,
        native: None,
        array: Some(ArrayDesc {
            length_offset: layout::STRING_LENGTH,
            start_offset: layout::STRING_CHARS,
            elem_size: 1,
            pointers: false,
        }),
        size: SizeRule::Variable { base: 8, elem: 1 },
    },
    Metadata {
        kind: CellKind::DynamicUtf16String,
        pointers: NO_FIELDS,
        weak: NO_FIELDS,
        native: None,
        array: Some(ArrayDesc {
            length_offset: layout::STRING_LENGTH,
            start_offset: layout::STRING_CHARS,
            elem_size: 2,
            pointers: false,
        }),
        size: SizeRule::Variable { base: 8, elem: 2 },
    },
    with_native(
        fixed(CellKind::ExternalAsciiString, NO_FIELDS, 16),
        "buffer",
        layout::EXTERNAL_STRING_BUFFER,
    ),
    with_native(
        fixed(CellKind::ExternalUtf16String, NO_FIELDS, 16),
        "buffer",
        layout::EXTERNAL_STRING_BUFFER,
    ),
    with_native(
        fixed(CellKind::Domain, DOMAIN_FIELDS, 16),
        "runtimeModules",
        layout::DOMAIN_MODULES,
    ),
    fixed(CellKind::JSObject, OBJECT_FIELDS, 16),
    fixed(CellKind::JSArray, ARRAY_FIELDS, 24),
    with_native(
        fixed(CellKind::JSError, OBJECT_FIELDS, 24),
        "stacktrace",
        layout::ERROR_STACK_TRACE,
    ),
    Metadata {
        kind: CellKind::JSWeakRef,
        pointers: OBJECT_FIELDS,
        weak: WEAK_REF_FIELDS,
        native: None,
        array: None,
        size: SizeRule::Fixed { payload: 24 },
    },
    fixed(CellKind::NativeFunction, OBJECT_FIELDS, 24),
    fixed(CellKind::JSFunction, FUNCTION_FIELDS, 32),
    fixed(CellKind::BoundFunction, BOUND_FUNCTION_FIELDS, 32),
    with_native(
        fixed(CellKind::JSArrayBuffer, OBJECT_FIELDS, 24),
        "backingStore",
        layout::ARRAY_BUFFER_STORE,
    ),
    typed_array(CellKind::Int8Array),
    typed_array(CellKind::Uint8Array),
    typed_array(CellKind::Uint8ClampedArray),
    typed_array(CellKind::Int16Array),
    typed_array(CellKind::Uint16Array),
    typed_array(CellKind::Int32Array),
    typed_array(CellKind::Uint32Array),
    typed_array(CellKind::Float32Array),
    typed_array(CellKind::Float64Array),
    with_native(
        fixed(CellKind::HostObject, OBJECT_FIELDS, 24),
        "hostResource",
        layout::HOST_OBJECT_RESOURCE,
    ),
];

const fn metadata_table_is_ordered() -> bool {
    let mut i = 0;
    while i < METADATA.len() {
        if METADATA[i].kind as usize != i {
            return false;
        }
        i += 1;
    }
    true
}

const _: () = assert!(metadata_table_is_ordered());

impl CellKind {
    /// Layout metadata for this kind.
    #[inline]
    pub fn metadata(self) -> &'static Metadata {
        &METADATA[self as usize]
    }
}

impl Metadata {
    /// Allocation size in bytes (header included, heap-aligned) of an
    /// instance with `len` trailing elements. `len` is ignored for fixed-size
    /// kinds. Returns `None` on arithmetic overflow.
    pub fn allocation_size(&self, len: usize) -> Option<usize> {
        let payload = match self.size {
            SizeRule::Fixed { payload } => payload as usize,
            SizeRule::Variable { base, elem } => {
                (elem as usize).checked_mul(len)?.checked_add(base as usize)?
            }
        };
        let total = payload.checked_add(HEADER_SIZE + layout::HEAP_ALIGN)?;
        Some(heap_align(total - layout::HEAP_ALIGN).max(MIN_CELL_SIZE))
    }

    /// Smallest valid allocation size for this kind.
    pub fn min_size(&self) -> usize {
        self.allocation_size(0).unwrap_or(MIN_CELL_SIZE)
    }

    /// Whether instances of this kind differ in size.
    pub fn is_variable_sized(&self) -> bool {
        matches!(self.size, SizeRule::Variable { .. })
    }

    /// Whether instances can hold strong references at all.
    pub fn has_pointers(&self) -> bool {
        !self.pointers.is_empty() || self.array.map_or(false, |a| a.pointers)
    }

    /// Calls `f` with the payload offset of every strong reference slot of an
    /// instance whose trailing array holds `array_len` elements.
    pub fn for_each_pointer_offset(&self, array_len: usize, mut f: impl FnMut(u32)) {
        for field in self.pointers {
            f(field.offset);
        }
        if let Some(array) = self.array.filter(|a| a.pointers) {
            for i in 0..array_len {
                f(array.start_offset + (i * SLOT_SIZE) as u32);
            }
        }
    }

    /// Whether `offset` names a strong reference slot of an instance with
    /// `array_len` trailing elements.
    pub fn is_pointer_offset(&self, offset: u32, array_len: usize) -> bool {
        if self.pointers.iter().any(|f| f.offset == offset) {
            return true;
        }
        match self.array {
            Some(array) if array.pointers && offset >= array.start_offset => {
                let rel = (offset - array.start_offset) as usize;
                rel % SLOT_SIZE == 0 && rel / SLOT_SIZE < array_len
            }
            _ => false,
        }
    }

    /// Looks up a strong field by name.
    pub fn field(&self, name: &str) -> Option<FieldDesc> {
        self.pointers.iter().copied().find(|f| f.name == name)
    }
}
