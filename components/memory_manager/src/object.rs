//! Typed cell constructors and field accessors.
//!
//! Every constructor allocates through [`Heap::allocate`], so any of them may
//! collect. Cell arguments are parked in the heap's scratch roots for the
//! duration of the allocation and re-read afterwards, so callers may pass
//! unrooted handles. Handles the caller keeps afterwards are their own
//! business: root them or re-read them.
//!
//! Field access is checked against the kind's [`Metadata`](core_types::Metadata);
//! touching a slot the layout does not declare is an invariant violation.

use std::ptr;
use std::slice;

use core_types::layout::{
    ARRAY_INDEXED_STORAGE, ARRAY_STORAGE_ELEMENTS, ARRAY_STORAGE_LENGTH, BOUND_FUNCTION_ARGS,
    BOUND_FUNCTION_TARGET, ENVIRONMENT_LENGTH, ENVIRONMENT_PARENT, EXTERNAL_STRING_LENGTH,
    FUNCTION_DOMAIN, FUNCTION_ENVIRONMENT, NATIVE_FUNCTION_ID, OBJECT_PARENT, SLOT_SIZE,
    STRING_CHARS, STRING_LENGTH, TYPED_ARRAY_BUFFER, TYPED_ARRAY_BYTE_OFFSET, TYPED_ARRAY_LENGTH,
    WEAK_REF_SLOT,
};
use core_types::CellKind;

use crate::cell::{self, CellHandle, HasFinalizer};
use crate::error::{invariant_violation, HeapError};
use crate::heap::Heap;
use crate::native::{BackingStore, CapturedStack, ExternalChars, NativeResource};
use crate::weak_ref::WeakRef;

impl Heap {
    /// Runs `f` with `roots` parked in the scratch roots, returning its
    /// result and the roots' current addresses.
    fn with_roots<const N: usize, R>(
        &mut self,
        roots: [Option<CellHandle>; N],
        f: impl FnOnce(&mut Heap) -> R,
    ) -> (R, [Option<CellHandle>; N]) {
        let base = self.scratch.len();
        self.scratch.extend_from_slice(&roots);
        let result = f(self);
        let mut moved = roots;
        for (slot, current) in moved.iter_mut().zip(self.scratch.drain(base..)) {
            *slot = current;
        }
        (result, moved)
    }

    /// Allocation size of a `kind` instance with `len` elements, if it fits
    /// in a segment.
    fn sized(&self, kind: CellKind, len: usize) -> Result<usize, HeapError> {
        match kind.metadata().allocation_size(len) {
            Some(size) if size <= self.segment_size => Ok(size),
            _ => Err(HeapError::CapacityExceeded {
                kind,
                requested: len,
            }),
        }
    }

    /// Stores a pointer into a fresh cell. Only the generational half of the
    /// barrier applies: the slot held nothing.
    fn init_field(&mut self, cell: CellHandle, offset: u32, value: Option<CellHandle>) {
        // SAFETY: callers pass a freshly allocated cell of a kind whose
        // layout has a pointer slot at `offset`.
        unsafe { cell::write_word(cell.payload(offset), CellHandle::to_slot(value)) };
        self.write_barrier(cell, None, value);
    }

    /// Stores a raw word into a fresh cell.
    fn init_word(&mut self, cell: CellHandle, offset: u32, value: u64) {
        // SAFETY: as in `init_field`, for a non-pointer word.
        unsafe { cell::write_word(cell.payload(offset), value) };
    }

    /// Stores `resource` in the native slot of a fresh cell.
    pub(crate) fn attach_native(&mut self, cell: CellHandle, resource: Box<dyn NativeResource>) {
        let Some(field) = self.kind_of(cell).metadata().native else {
            invariant_violation!("{} has no native slot", self.kind_of(cell));
        };
        let slot = self.natives.insert(resource);
        self.init_word(cell, field.offset, slot);
    }

    /// Allocates an `ArrayStorage` holding `elements`.
    pub fn alloc_array_storage(
        &mut self,
        elements: &[Option<CellHandle>],
    ) -> Result<CellHandle, HeapError> {
        let size = self.sized(CellKind::ArrayStorage, elements.len())?;
        let base = self.scratch.len();
        self.scratch.extend_from_slice(elements);
        let result = self.allocate(CellKind::ArrayStorage, size, HasFinalizer::No);
        let elements: Vec<_> = self.scratch.drain(base..).collect();
        let storage = result?;
        self.init_word(storage, ARRAY_STORAGE_LENGTH, elements.len() as u64);
        for (i, &element) in elements.iter().enumerate() {
            self.init_field(storage, ARRAY_STORAGE_ELEMENTS + (i * SLOT_SIZE) as u32, element);
        }
        Ok(storage)
    }

    /// Allocates an `Environment` with `slots` null variable slots.
    pub fn alloc_environment(
        &mut self,
        parent: Option<CellHandle>,
        slots: usize,
    ) -> Result<CellHandle, HeapError> {
        let size = self.sized(CellKind::Environment, slots)?;
        let (env, [parent]) = self.with_roots([parent], |heap| {
            heap.allocate(CellKind::Environment, size, HasFinalizer::No)
        });
        let env = env?;
        if let Some(parent) = parent {
            self.expect_kind(parent, CellKind::Environment);
        }
        self.init_field(env, ENVIRONMENT_PARENT, parent);
        self.init_word(env, ENVIRONMENT_LENGTH, slots as u64);
        Ok(env)
    }

    /// Allocates a plain object with the given prototype.
    pub fn alloc_object(&mut self, parent: Option<CellHandle>) -> Result<CellHandle, HeapError> {
        self.alloc_object_kind(CellKind::JSObject, parent, HasFinalizer::No)
    }

    fn alloc_object_kind(
        &mut self,
        kind: CellKind,
        parent: Option<CellHandle>,
        has_finalizer: HasFinalizer,
    ) -> Result<CellHandle, HeapError> {
        let size = kind.metadata().min_size();
        let (object, [parent]) =
            self.with_roots([parent], |heap| heap.allocate(kind, size, has_finalizer));
        let object = object?;
        self.init_field(object, OBJECT_PARENT, parent);
        Ok(object)
    }

    /// Allocates an array whose indexed storage holds `elements`.
    pub fn alloc_array(
        &mut self,
        parent: Option<CellHandle>,
        elements: &[Option<CellHandle>],
    ) -> Result<CellHandle, HeapError> {
        let (storage, [parent]) =
            self.with_roots([parent], |heap| heap.alloc_array_storage(elements));
        let storage = storage?;
        let (array, [_, storage]) = self.with_roots([parent, Some(storage)], |heap| {
            heap.alloc_object_kind(CellKind::JSArray, parent, HasFinalizer::No)
        });
        let array = array?;
        self.init_field(array, ARRAY_INDEXED_STORAGE, storage);
        Ok(array)
    }

    /// Allocates a one-byte string. `chars` must be ASCII.
    pub fn alloc_ascii_string(&mut self, chars: &[u8]) -> Result<CellHandle, HeapError> {
        if !chars.is_ascii() {
            invariant_violation!("non-ASCII bytes in an ASCII string");
        }
        let size = self.sized(CellKind::DynamicAsciiString, chars.len())?;
        let string = self.allocate(CellKind::DynamicAsciiString, size, HasFinalizer::No)?;
        self.init_word(string, STRING_LENGTH, chars.len() as u64);
        // SAFETY: the cell was sized for `chars.len()` bytes of characters.
        unsafe {
            ptr::copy_nonoverlapping(
                chars.as_ptr(),
                string.payload(STRING_CHARS) as *mut u8,
                chars.len(),
            );
        }
        Ok(string)
    }

    /// Allocates a UTF-16 string.
    pub fn alloc_utf16_string(&mut self, units: &[u16]) -> Result<CellHandle, HeapError> {
        let size = self.sized(CellKind::DynamicUtf16String, units.len())?;
        let string = self.allocate(CellKind::DynamicUtf16String, size, HasFinalizer::No)?;
        self.init_word(string, STRING_LENGTH, units.len() as u64);
        // SAFETY: the cell was sized for `units.len()` code units; the
        // character area is 8-byte aligned.
        unsafe {
            ptr::copy_nonoverlapping(
                units.as_ptr(),
                string.payload(STRING_CHARS) as *mut u16,
                units.len(),
            );
        }
        Ok(string)
    }

    /// Allocates `s` as an ASCII string when possible, UTF-16 otherwise.
    pub fn alloc_string(&mut self, s: &str) -> Result<CellHandle, HeapError> {
        if s.is_ascii() {
            self.alloc_ascii_string(s.as_bytes())
        } else {
            let units: Vec<u16> = s.encode_utf16().collect();
            self.alloc_utf16_string(&units)
        }
    }

    /// Allocates a string whose ASCII characters live off-heap.
    pub fn alloc_external_ascii_string(&mut self, chars: Vec<u8>) -> Result<CellHandle, HeapError> {
        if !chars.is_ascii() {
            invariant_violation!("non-ASCII bytes in an ASCII string");
        }
        self.alloc_external_string(CellKind::ExternalAsciiString, ExternalChars::Ascii(chars))
    }

    /// Allocates a string whose UTF-16 code units live off-heap.
    pub fn alloc_external_utf16_string(
        &mut self,
        units: Vec<u16>,
    ) -> Result<CellHandle, HeapError> {
        self.alloc_external_string(CellKind::ExternalUtf16String, ExternalChars::Utf16(units))
    }

    fn alloc_external_string(
        &mut self,
        kind: CellKind,
        chars: ExternalChars,
    ) -> Result<CellHandle, HeapError> {
        let size = kind.metadata().min_size();
        let string = self.allocate(kind, size, HasFinalizer::Yes)?;
        self.init_word(string, EXTERNAL_STRING_LENGTH, chars.len() as u64);
        self.attach_native(string, Box::new(chars));
        Ok(string)
    }

    /// Allocates an error object carrying a captured stack.
    pub fn alloc_error(
        &mut self,
        parent: Option<CellHandle>,
        stack: Vec<String>,
    ) -> Result<CellHandle, HeapError> {
        let error = self.alloc_object_kind(CellKind::JSError, parent, HasFinalizer::Yes)?;
        self.attach_native(error, Box::new(CapturedStack(stack)));
        Ok(error)
    }

    /// Allocates a host-implemented function identified by `id`.
    pub fn alloc_native_function(
        &mut self,
        parent: Option<CellHandle>,
        id: u64,
    ) -> Result<CellHandle, HeapError> {
        let function = self.alloc_object_kind(CellKind::NativeFunction, parent, HasFinalizer::No)?;
        self.init_word(function, NATIVE_FUNCTION_ID, id);
        Ok(function)
    }

    /// Allocates a closure over `environment` belonging to `domain`.
    pub fn alloc_function(
        &mut self,
        parent: Option<CellHandle>,
        environment: Option<CellHandle>,
        domain: Option<CellHandle>,
    ) -> Result<CellHandle, HeapError> {
        if let Some(environment) = environment {
            self.expect_kind(environment, CellKind::Environment);
        }
        if let Some(domain) = domain {
            self.expect_kind(domain, CellKind::Domain);
        }
        let (function, [_, environment, domain]) =
            self.with_roots([parent, environment, domain], |heap| {
                heap.alloc_object_kind(CellKind::JSFunction, parent, HasFinalizer::No)
            });
        let function = function?;
        self.init_field(function, FUNCTION_ENVIRONMENT, environment);
        self.init_field(function, FUNCTION_DOMAIN, domain);
        Ok(function)
    }

    /// Allocates a bound function wrapping the callable `target`.
    pub fn alloc_bound_function(
        &mut self,
        parent: Option<CellHandle>,
        target: CellHandle,
        args: &[Option<CellHandle>],
    ) -> Result<CellHandle, HeapError> {
        let kind = self.kind_of(target);
        if !kind.is_callable() {
            invariant_violation!("cannot bind a {}", kind);
        }
        let (storage, [parent, target]) = self
            .with_roots([parent, Some(target)], |heap| heap.alloc_array_storage(args));
        let storage = storage?;
        let (function, [_, target, storage]) =
            self.with_roots([parent, target, Some(storage)], |heap| {
                heap.alloc_object_kind(CellKind::BoundFunction, parent, HasFinalizer::No)
            });
        let function = function?;
        self.init_field(function, BOUND_FUNCTION_TARGET, target);
        self.init_field(function, BOUND_FUNCTION_ARGS, storage);
        Ok(function)
    }

    /// Allocates an `ArrayBuffer` with `byte_length` zeroed bytes.
    ///
    /// Buffers larger than [`GcConfig::max_external_bytes`](crate::GcConfig::max_external_bytes)
    /// are refused with [`HeapError::CapacityExceeded`].
    pub fn alloc_array_buffer(
        &mut self,
        parent: Option<CellHandle>,
        byte_length: usize,
    ) -> Result<CellHandle, HeapError> {
        if byte_length > self.config.max_external_bytes {
            return Err(HeapError::CapacityExceeded {
                kind: CellKind::JSArrayBuffer,
                requested: byte_length,
            });
        }
        let buffer = self.alloc_object_kind(CellKind::JSArrayBuffer, parent, HasFinalizer::Yes)?;
        self.attach_native(buffer, Box::new(BackingStore(vec![0; byte_length])));
        Ok(buffer)
    }

    /// Allocates a typed array view of `length` elements over `buffer`,
    /// starting `byte_offset` bytes in.
    ///
    /// # Returns
    ///
    /// The view, or [`HeapError::CapacityExceeded`] if the view does not fit
    /// inside the buffer or the offset is misaligned.
    pub fn alloc_typed_array(
        &mut self,
        kind: CellKind,
        parent: Option<CellHandle>,
        buffer: CellHandle,
        byte_offset: usize,
        length: usize,
    ) -> Result<CellHandle, HeapError> {
        let Some(element_size) = kind.typed_array_element_size() else {
            invariant_violation!("{} is not a typed array kind", kind);
        };
        let available = self.array_buffer_bytes(buffer).len();
        let fits = byte_offset % element_size == 0
            && length
                .checked_mul(element_size)
                .and_then(|bytes| bytes.checked_add(byte_offset))
                .map_or(false, |end| end <= available);
        if !fits {
            return Err(HeapError::CapacityExceeded {
                kind,
                requested: length,
            });
        }
        let (view, [_, buffer]) = self.with_roots([parent, Some(buffer)], |heap| {
            heap.alloc_object_kind(kind, parent, HasFinalizer::No)
        });
        let view = view?;
        self.init_field(view, TYPED_ARRAY_BUFFER, buffer);
        self.init_word(view, TYPED_ARRAY_BYTE_OFFSET, byte_offset as u64);
        self.init_word(view, TYPED_ARRAY_LENGTH, length as u64);
        Ok(view)
    }

    /// Allocates an object owning a host resource, released when the object
    /// dies.
    pub fn alloc_host_object<T: NativeResource>(
        &mut self,
        parent: Option<CellHandle>,
        resource: T,
    ) -> Result<CellHandle, HeapError> {
        let object = self.alloc_object_kind(CellKind::HostObject, parent, HasFinalizer::Yes)?;
        self.attach_native(object, Box::new(resource));
        Ok(object)
    }

    /// Allocates a `WeakRef` object whose referent is `target`.
    pub fn alloc_weak_ref(
        &mut self,
        parent: Option<CellHandle>,
        target: CellHandle,
    ) -> Result<CellHandle, HeapError> {
        let (weak, [_, target]) = self.with_roots([parent, Some(target)], |heap| {
            heap.alloc_object_kind(CellKind::JSWeakRef, parent, HasFinalizer::No)
        });
        let weak = weak?;
        let Some(target) = target else {
            invariant_violation!("weak ref target vanished during allocation");
        };
        let slot = self.weak_refs.alloc(target);
        self.init_word(weak, WEAK_REF_SLOT, slot.to_word());
        Ok(weak)
    }

    /// Reads a pointer field.
    ///
    /// # Arguments
    ///
    /// * `cell` - Live cell
    /// * `offset` - Payload offset of a pointer slot declared by the kind
    pub fn get_field(&self, cell: CellHandle, offset: u32) -> Option<CellHandle> {
        self.check_pointer_slot(cell, offset);
        // SAFETY: the slot was checked against the kind's layout.
        CellHandle::from_slot(unsafe { cell::read_word(cell.payload(offset)) })
    }

    /// Writes a pointer field through the write barrier.
    pub fn set_field(&mut self, cell: CellHandle, offset: u32, value: Option<CellHandle>) {
        self.check_pointer_slot(cell, offset);
        let slot = cell.payload(offset);
        // SAFETY: the slot was checked against the kind's layout.
        let old = CellHandle::from_slot(unsafe { cell::read_word(slot) });
        self.write_barrier(cell, old, value);
        // SAFETY: as above.
        unsafe { cell::write_word(slot, CellHandle::to_slot(value)) };
    }

    /// Reads a pointer field by its layout name, such as `"parent"`.
    pub fn get_named_field(&self, cell: CellHandle, name: &str) -> Option<CellHandle> {
        let kind = self.kind_of(cell);
        match kind.metadata().field(name) {
            Some(field) => self.get_field(cell, field.offset),
            None => invariant_violation!("{} has no field {:?}", kind, name),
        }
    }

    /// Number of trailing elements (array slots, variables or characters).
    pub fn array_len(&self, cell: CellHandle) -> usize {
        // SAFETY: handles given out by the heap point at live cells.
        unsafe {
            let header = cell::read_header(cell.addr());
            cell::array_length(cell.addr(), &header)
        }
    }

    /// Reads element `index` of an `ArrayStorage` or variable `index` of an
    /// `Environment`.
    pub fn array_get(&self, cell: CellHandle, index: usize) -> Option<CellHandle> {
        let offset = self.element_offset(cell, index);
        self.get_field(cell, offset)
    }

    /// Writes element `index` through the write barrier.
    pub fn array_set(&mut self, cell: CellHandle, index: usize, value: Option<CellHandle>) {
        let offset = self.element_offset(cell, index);
        self.set_field(cell, offset, value);
    }

    /// Contents of any string kind.
    pub fn string_contents(&self, cell: CellHandle) -> String {
        let kind = self.kind_of(cell);
        match kind {
            CellKind::DynamicAsciiString => {
                let len = self.array_len(cell);
                // SAFETY: the cell holds `len` ASCII bytes after its length.
                let bytes = unsafe {
                    slice::from_raw_parts(cell.payload(STRING_CHARS) as *const u8, len)
                };
                bytes.iter().map(|&b| b as char).collect()
            }
            CellKind::DynamicUtf16String => {
                let len = self.array_len(cell);
                // SAFETY: the cell holds `len` aligned code units after its
                // length.
                let units = unsafe {
                    slice::from_raw_parts(cell.payload(STRING_CHARS) as *const u16, len)
                };
                String::from_utf16_lossy(units)
            }
            CellKind::ExternalAsciiString | CellKind::ExternalUtf16String => self
                .native(cell)
                .and_then(|r| r.downcast_ref::<ExternalChars>())
                .map(ExternalChars::to_string_lossy)
                .unwrap_or_default(),
            _ => invariant_violation!("{} is not a string", kind),
        }
    }

    /// Bytes of an `ArrayBuffer`.
    pub fn array_buffer_bytes(&self, buffer: CellHandle) -> &[u8] {
        self.expect_kind(buffer, CellKind::JSArrayBuffer);
        self.native(buffer)
            .and_then(|r| r.downcast_ref::<BackingStore>())
            .map(|store| store.0.as_slice())
            .unwrap_or_default()
    }

    /// Mutable bytes of an `ArrayBuffer`.
    pub fn array_buffer_bytes_mut(&mut self, buffer: CellHandle) -> &mut [u8] {
        self.expect_kind(buffer, CellKind::JSArrayBuffer);
        match self
            .native_mut(buffer)
            .and_then(|r| r.downcast_mut::<BackingStore>())
        {
            Some(store) => store.0.as_mut_slice(),
            None => &mut [],
        }
    }

    /// Bytes visible through a typed array view.
    pub fn typed_array_bytes(&self, view: CellHandle) -> &[u8] {
        let kind = self.kind_of(view);
        let Some(element_size) = kind.typed_array_element_size() else {
            invariant_violation!("{} is not a typed array", kind);
        };
        // SAFETY: typed array views keep their offset and length at fixed
        // payload words.
        let (offset, length) = unsafe {
            (
                cell::read_word(view.payload(TYPED_ARRAY_BYTE_OFFSET)) as usize,
                cell::read_word(view.payload(TYPED_ARRAY_LENGTH)) as usize,
            )
        };
        match self.get_field(view, TYPED_ARRAY_BUFFER) {
            Some(buffer) => {
                let bytes = self.array_buffer_bytes(buffer);
                &bytes[offset..offset + length * element_size]
            }
            None => &[],
        }
    }

    /// Current referent of a `WeakRef` object.
    pub fn weak_ref_target(&self, weak: CellHandle) -> Option<CellHandle> {
        self.expect_kind(weak, CellKind::JSWeakRef);
        // SAFETY: JSWeakRef cells keep their slot word at a fixed offset.
        let stored = unsafe { cell::read_word(weak.payload(WEAK_REF_SLOT)) };
        let slot = WeakRef::from_word(stored)?;
        self.weak_read_barrier(self.weak_refs.get(&slot))
    }

    /// The resource owned by a host object, if it is a `T`.
    pub fn host_resource<T: NativeResource>(&self, object: CellHandle) -> Option<&T> {
        self.expect_kind(object, CellKind::HostObject);
        self.native(object)?.downcast_ref::<T>()
    }

    /// Mutable access to the resource owned by a host object.
    pub fn host_resource_mut<T: NativeResource>(&mut self, object: CellHandle) -> Option<&mut T> {
        self.expect_kind(object, CellKind::HostObject);
        self.native_mut(object)?.downcast_mut::<T>()
    }

    /// Stack captured when an error object was created.
    pub fn error_stack_trace(&self, error: CellHandle) -> Option<&[String]> {
        self.expect_kind(error, CellKind::JSError);
        self.native(error)?
            .downcast_ref::<CapturedStack>()
            .map(|stack| stack.0.as_slice())
    }

    /// Host id of a native function.
    pub fn native_function_id(&self, function: CellHandle) -> u64 {
        self.expect_kind(function, CellKind::NativeFunction);
        // SAFETY: native functions keep their id at a fixed word.
        unsafe { cell::read_word(function.payload(NATIVE_FUNCTION_ID)) }
    }

    /// Native slot value of `cell`, `0` if its kind has none.
    fn native_slot(&self, cell: CellHandle) -> u64 {
        match self.kind_of(cell).metadata().native {
            // SAFETY: the kind's layout declares a native slot there.
            Some(field) => unsafe { cell::read_word(cell.payload(field.offset)) },
            None => 0,
        }
    }

    /// The resource in `cell`'s native slot.
    pub(crate) fn native(&self, cell: CellHandle) -> Option<&(dyn NativeResource + 'static)> {
        self.natives.get(self.native_slot(cell))
    }

    pub(crate) fn native_mut(
        &mut self,
        cell: CellHandle,
    ) -> Option<&mut (dyn NativeResource + 'static)> {
        let slot = self.native_slot(cell);
        self.natives.get_mut(slot)
    }

    /// Detaches the resource in `cell`'s native slot, leaving the slot empty.
    pub(crate) fn take_native(&mut self, cell: CellHandle) -> Option<Box<dyn NativeResource>> {
        let field = self.kind_of(cell).metadata().native?;
        let slot = self.native_slot(cell);
        // SAFETY: the kind's layout declares a native slot there.
        unsafe { cell::write_word(cell.payload(field.offset), 0) };
        self.natives.take(slot)
    }

    fn element_offset(&self, cell: CellHandle, index: usize) -> u32 {
        let kind = self.kind_of(cell);
        let Some(array) = kind.metadata().array.filter(|a| a.pointers) else {
            invariant_violation!("{} has no element slots", kind);
        };
        let len = self.array_len(cell);
        if index >= len {
            invariant_violation!("index {} out of bounds for {} of length {}", index, kind, len);
        }
        array.start_offset + (index * SLOT_SIZE) as u32
    }

    fn check_pointer_slot(&self, cell: CellHandle, offset: u32) {
        let kind = self.kind_of(cell);
        if !kind.metadata().is_pointer_offset(offset, self.array_len(cell)) {
            invariant_violation!("{} has no pointer slot at offset {}", kind, offset);
        }
    }

    fn expect_kind(&self, cell: CellHandle, expected: CellKind) {
        let kind = self.kind_of(cell);
        if kind != expected {
            invariant_violation!("expected {}, found {} at {:?}", expected, kind, cell);
        }
    }
}
