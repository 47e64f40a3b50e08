//! The closed set of heap cell kinds.
//!
//! Every kind is declared exactly once in the `cell_kinds!` table below. The
//! table generates the enum, the display names and the finalizer/weak flags,
//! so the allocator, the collector and any code generator all read the same
//! source of truth. Kind values are assigned by declaration order.

use std::fmt;

use crate::InvalidCellKind;

macro_rules! cell_kinds {
    ($(
        $(#[$doc:meta])*
        $variant:ident => $name:literal, finalizer: $finalizer:literal, weak: $weak:literal;
    )*) => {
        /// The runtime type tag stored in every cell header.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(u8)]
        pub enum CellKind {
            $( $(#[$doc])* $variant, )*
        }

        impl CellKind {
            /// Every kind, in ascending numeric order.
            pub const ALL: &'static [CellKind] = &[$(CellKind::$variant,)*];

            /// Number of kinds.
            pub const COUNT: usize = Self::ALL.len();

            const NAMES: [&'static str; Self::COUNT] = [$($name,)*];
            const FINALIZER: [bool; Self::COUNT] = [$($finalizer,)*];
            const WEAK: [bool; Self::COUNT] = [$($weak,)*];
        }
    };
}

cell_kinds! {
    /// Free space inside an old-generation segment.
    Freelist => "Freelist", finalizer: false, weak: false;
    /// Variable-length array of strong references.
    ArrayStorage => "ArrayStorage", finalizer: false, weak: false;
    /// Closure environment: a parent link plus captured slots.
    Environment => "Environment", finalizer: false, weak: false;
    /// Heap-resident ASCII string.
    DynamicAsciiString => "DynamicASCIIStringPrimitive", finalizer: false, weak: false;
    /// Heap-resident UTF-16 string.
    DynamicUtf16String => "DynamicUTF16StringPrimitive", finalizer: false, weak: false;
    /// ASCII string whose characters live outside the heap.
    ExternalAsciiString => "ExternalASCIIStringPrimitive", finalizer: true, weak: false;
    /// UTF-16 string whose characters live outside the heap.
    ExternalUtf16String => "ExternalUTF16StringPrimitive", finalizer: true, weak: false;
    /// Owner of compiled runtime modules.
    Domain => "Domain", finalizer: true, weak: true;
    /// Plain object.
    JSObject => "JSObject", finalizer: false, weak: false;
    /// Array object with indexed storage.
    JSArray => "JSArray", finalizer: false, weak: false;
    /// Error object carrying a captured native stack.
    JSError => "JSError", finalizer: true, weak: false;
    /// `WeakRef` object.
    JSWeakRef => "JSWeakRef", finalizer: false, weak: true;
    /// Function implemented by the host.
    NativeFunction => "NativeFunction", finalizer: false, weak: false;
    /// Bytecode function closing over an environment.
    JSFunction => "JSFunction", finalizer: false, weak: false;
    /// Result of `Function.prototype.bind`.
    BoundFunction => "BoundFunction", finalizer: false, weak: false;
    /// `ArrayBuffer` with an out-of-heap backing store.
    JSArrayBuffer => "JSArrayBuffer", finalizer: true, weak: false;
    /// `Int8Array`.
    Int8Array => "Int8Array", finalizer: false, weak: false;
    /// `Uint8Array`.
    Uint8Array => "Uint8Array", finalizer: false, weak: false;
    /// `Uint8ClampedArray`.
    Uint8ClampedArray => "Uint8ClampedArray", finalizer: false, weak: false;
    /// `Int16Array`.
    Int16Array => "Int16Array", finalizer: false, weak: false;
    /// `Uint16Array`.
    Uint16Array => "Uint16Array", finalizer: false, weak: false;
    /// `Int32Array`.
    Int32Array => "Int32Array", finalizer: false, weak: false;
    /// `Uint32Array`.
    Uint32Array => "Uint32Array", finalizer: false, weak: false;
    /// `Float32Array`.
    Float32Array => "Float32Array", finalizer: false, weak: false;
    /// `Float64Array`.
    Float64Array => "Float64Array", finalizer: false, weak: false;
    /// Object wrapping a host resource (file descriptor, OS handle, ...).
    HostObject => "HostObject", finalizer: true, weak: false;
}

/// Returns true if `kind` lies in the inclusive numeric range `[first, last]`.
#[inline]
pub const fn kind_in_range(kind: CellKind, first: CellKind, last: CellKind) -> bool {
    kind as u8 >= first as u8 && kind as u8 <= last as u8
}

/// Returns true if `kinds` is non-empty and every kind is exactly one more
/// than its predecessor.
///
/// Used in `const` assertions so that a range whose members are not adjacent
/// in the declaration table fails to compile.
pub const fn cell_kinds_contiguous_ascending(kinds: &[CellKind]) -> bool {
    if kinds.is_empty() {
        return false;
    }
    let mut i = 1;
    while i < kinds.len() {
        if kinds[i] as u8 != kinds[i - 1] as u8 + 1 {
            return false;
        }
        i += 1;
    }
    true
}

impl CellKind {
    /// Human-readable name of this kind.
    #[inline]
    pub fn name(self) -> &'static str {
        Self::NAMES[self as usize]
    }

    /// Whether cells of this kind may own native resources that need a
    /// finalizer.
    #[inline]
    pub fn has_finalizer(self) -> bool {
        Self::FINALIZER[self as usize]
    }

    /// Whether cells of this kind hold weak references and must take part in
    /// weak marking.
    #[inline]
    pub fn has_weak_refs(self) -> bool {
        Self::WEAK[self as usize]
    }

    /// Decodes a raw tag read from a cell header.
    pub fn from_u8(tag: u8) -> Result<CellKind, InvalidCellKind> {
        Self::ALL.get(tag as usize).copied().ok_or(InvalidCellKind(tag))
    }

    /// True for heap and external string primitives.
    pub fn is_string_primitive(self) -> bool {
        KindRange::STRING_PRIMITIVE.contains(self)
    }

    /// True for strings whose characters live outside the heap.
    pub fn is_external_string(self) -> bool {
        KindRange::EXTERNAL_STRING.contains(self)
    }

    /// True for every object kind.
    pub fn is_object(self) -> bool {
        KindRange::OBJECT.contains(self)
    }

    /// True for every callable object kind.
    pub fn is_callable(self) -> bool {
        KindRange::CALLABLE.contains(self)
    }

    /// True for every typed array kind.
    pub fn is_typed_array(self) -> bool {
        KindRange::TYPED_ARRAY.contains(self)
    }

    /// Element size in bytes for typed array kinds.
    pub fn typed_array_element_size(self) -> Option<usize> {
        match self {
            CellKind::Int8Array | CellKind::Uint8Array | CellKind::Uint8ClampedArray => Some(1),
            CellKind::Int16Array | CellKind::Uint16Array => Some(2),
            CellKind::Int32Array | CellKind::Uint32Array | CellKind::Float32Array => Some(4),
            CellKind::Float64Array => Some(8),
            _ => None,
        }
    }
}

impl TryFrom<u8> for CellKind {
    type Error = InvalidCellKind;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        CellKind::from_u8(tag)
    }
}

impl fmt::Display for CellKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A named, inclusive, contiguous range of kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindRange {
    /// Name used in diagnostics.
    pub name: &'static str,
    /// First kind of the range.
    pub first: CellKind,
    /// Last kind of the range (inclusive).
    pub last: CellKind,
}

impl KindRange {
    /// All string primitives.
    pub const STRING_PRIMITIVE: KindRange = KindRange {
        name: "StringPrimitive",
        first: CellKind::DynamicAsciiString,
        last: CellKind::ExternalUtf16String,
    };

    /// Strings with out-of-heap character storage.
    pub const EXTERNAL_STRING: KindRange = KindRange {
        name: "ExternalStringPrimitive",
        first: CellKind::ExternalAsciiString,
        last: CellKind::ExternalUtf16String,
    };

    /// Every object kind.
    pub const OBJECT: KindRange = KindRange {
        name: "JSObject",
        first: CellKind::JSObject,
        last: CellKind::HostObject,
    };

    /// Callable objects.
    pub const CALLABLE: KindRange = KindRange {
        name: "Callable",
        first: CellKind::NativeFunction,
        last: CellKind::BoundFunction,
    };

    /// Typed arrays.
    pub const TYPED_ARRAY: KindRange = KindRange {
        name: "TypedArrayBase",
        first: CellKind::Int8Array,
        last: CellKind::Float64Array,
    };

    /// Every named range.
    pub const ALL: &'static [KindRange] = &[
        Self::STRING_PRIMITIVE,
        Self::EXTERNAL_STRING,
        Self::OBJECT,
        Self::CALLABLE,
        Self::TYPED_ARRAY,
    ];

    /// O(1) membership test.
    #[inline]
    pub const fn contains(&self, kind: CellKind) -> bool {
        kind_in_range(kind, self.first, self.last)
    }

    /// True if `other` lies entirely inside this range.
    pub const fn encloses(&self, other: &KindRange) -> bool {
        self.contains(other.first) && self.contains(other.last)
    }

    /// Members of the range in ascending order.
    pub fn members(&self) -> impl Iterator<Item = CellKind> {
        let (first, last) = (self.first as usize, self.last as usize);
        CellKind::ALL[first..=last].iter().copied()
    }
}

const _: () = assert!(CellKind::COUNT <= u8::MAX as usize);

const _: () = assert!(cell_kinds_contiguous_ascending(&[
    CellKind::DynamicAsciiString,
    CellKind::DynamicUtf16String,
    CellKind::ExternalAsciiString,
    CellKind::ExternalUtf16String,
]));

const _: () = assert!(cell_kinds_contiguous_ascending(&[
    CellKind::NativeFunction,
    CellKind::JSFunction,
    CellKind::BoundFunction,
]));

const _: () = assert!(cell_kinds_contiguous_ascending(&[
    CellKind::Int8Array,
    CellKind::Uint8Array,
    CellKind::Uint8ClampedArray,
    CellKind::Int16Array,
    CellKind::Uint16Array,
    CellKind::Int32Array,
    CellKind::Uint32Array,
    CellKind::Float32Array,
    CellKind::Float64Array,
]));

const _: () = assert!(cell_kinds_contiguous_ascending(&[
    CellKind::JSObject,
    CellKind::JSArray,
    CellKind::JSError,
    CellKind::JSWeakRef,
    CellKind::NativeFunction,
    CellKind::JSFunction,
    CellKind::BoundFunction,
    CellKind::JSArrayBuffer,
    CellKind::Int8Array,
    CellKind::Uint8Array,
    CellKind::Uint8ClampedArray,
    CellKind::Int16Array,
    CellKind::Uint16Array,
    CellKind::Int32Array,
    CellKind::Uint32Array,
    CellKind::Float32Array,
    CellKind::Float64Array,
    CellKind::HostObject,
]));

const _: () = assert!(KindRange::OBJECT.encloses(&KindRange::CALLABLE));
const _: () = assert!(KindRange::OBJECT.encloses(&KindRange::TYPED_ARRAY));
const _: () = assert!(KindRange::STRING_PRIMITIVE.encloses(&KindRange::EXTERNAL_STRING));
