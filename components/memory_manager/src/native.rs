//! Out-of-heap resources owned by cells.
//!
//! Cells never hold Rust values directly. A cell kind with a native slot
//! stores `index + 1` of an entry in the heap's [`NativeTable`]; `0` means the
//! slot is empty. Entries do not move when their owning cell is evacuated,
//! and are released exactly once by the owning kind's finalizer.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use crate::error::FinalizerError;

/// Access to a resource as [`Any`], implemented for every sized `'static`
/// type.
pub trait AsAny {
    /// The value as `&dyn Any`.
    fn as_any(&self) -> &dyn Any;
    /// The value as `&mut dyn Any`.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A resource kept alive by a cell and released when the cell dies.
pub trait NativeResource: AsAny + 'static {
    /// Releases the resource. Called at most once, from the finalizer of the
    /// owning cell or at heap teardown.
    ///
    /// Errors are logged and swallowed; they never abort a collection.
    fn release(self: Box<Self>) -> Result<(), FinalizerError> {
        Ok(())
    }

    /// Bytes of malloc'd memory held by the resource, for heap accounting.
    fn malloc_size(&self) -> usize {
        0
    }
}

impl dyn NativeResource {
    /// Whether the resource is a `T`.
    pub fn is<T: NativeResource>(&self) -> bool {
        self.as_any().is::<T>()
    }

    /// Borrows the resource as a `T`.
    pub fn downcast_ref<T: NativeResource>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    /// Mutably borrows the resource as a `T`.
    pub fn downcast_mut<T: NativeResource>(&mut self) -> Option<&mut T> {
        self.as_any_mut().downcast_mut::<T>()
    }
}

/// Characters of an external string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExternalChars {
    /// One byte per character, all ASCII.
    Ascii(Vec<u8>),
    /// UTF-16 code units.
    Utf16(Vec<u16>),
}

impl ExternalChars {
    /// Number of characters.
    pub fn len(&self) -> usize {
        match self {
            ExternalChars::Ascii(chars) => chars.len(),
            ExternalChars::Utf16(units) => units.len(),
        }
    }

    /// Whether the string is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Decodes the characters, replacing unpaired surrogates.
    pub fn to_string_lossy(&self) -> String {
        match self {
            ExternalChars::Ascii(chars) => chars.iter().map(|&b| b as char).collect(),
            ExternalChars::Utf16(units) => String::from_utf16_lossy(units),
        }
    }
}

impl NativeResource for ExternalChars {
    fn malloc_size(&self) -> usize {
        match self {
            ExternalChars::Ascii(chars) => chars.capacity(),
            ExternalChars::Utf16(units) => units.capacity() * 2,
        }
    }
}

/// Native stack captured when an error object was created.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedStack(pub Vec<String>);

impl NativeResource for CapturedStack {
    fn malloc_size(&self) -> usize {
        self.0.iter().map(String::capacity).sum::<usize>()
            + self.0.capacity() * std::mem::size_of::<String>()
    }
}

/// Backing store of an `ArrayBuffer`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackingStore(pub Vec<u8>);

impl NativeResource for BackingStore {
    fn malloc_size(&self) -> usize {
        self.0.capacity()
    }
}

/// Slab of native resources indexed by the value stored in native slots.
#[derive(Default)]
pub struct NativeTable {
    entries: Vec<Option<Box<dyn NativeResource>>>,
    free: Vec<u32>,
}

impl NativeTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a resource and returns the slot value (`index + 1`) that
    /// refers to it.
    pub fn insert(&mut self, resource: Box<dyn NativeResource>) -> u64 {
        let index = match self.free.pop() {
            Some(index) => {
                self.entries[index as usize] = Some(resource);
                index
            }
            None => {
                self.entries.push(Some(resource));
                self.entries.len() as u32 - 1
            }
        };
        index as u64 + 1
    }

    /// The resource behind a slot value.
    pub fn get(&self, slot: u64) -> Option<&(dyn NativeResource + 'static)> {
        let index = slot.checked_sub(1)? as usize;
        self.entries.get(index)?.as_deref()
    }

    /// Mutable access to the resource behind a slot value.
    pub fn get_mut(&mut self, slot: u64) -> Option<&mut (dyn NativeResource + 'static)> {
        let index = slot.checked_sub(1)? as usize;
        self.entries.get_mut(index)?.as_deref_mut()
    }

    /// Removes the resource behind a slot value.
    pub fn take(&mut self, slot: u64) -> Option<Box<dyn NativeResource>> {
        let index = slot.checked_sub(1)?;
        let resource = self.entries.get_mut(index as usize)?.take()?;
        self.free.push(index as u32);
        Some(resource)
    }

    /// Removes every remaining resource.
    pub fn drain(&mut self) -> Vec<Box<dyn NativeResource>> {
        self.free.clear();
        self.entries.drain(..).flatten().collect()
    }

    /// Number of live resources.
    pub fn len(&self) -> usize {
        self.entries.len() - self.free.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sum of [`NativeResource::malloc_size`] over every resource.
    pub fn malloc_size(&self) -> usize {
        self.entries
            .iter()
            .flatten()
            .map(|r| r.malloc_size())
            .sum()
    }
}

impl std::fmt::Debug for NativeTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeTable")
            .field("live", &self.len())
            .field("capacity", &self.entries.len())
            .finish()
    }
}

/// Runs a resource's release hook, logging and swallowing both errors and
/// panics.
///
/// # Returns
///
/// `true` if the resource released cleanly.
pub(crate) fn release_resource(resource: Box<dyn NativeResource>, owner: &str) -> bool {
    match panic::catch_unwind(AssertUnwindSafe(|| resource.release())) {
        Ok(Ok(())) => true,
        Ok(Err(err)) => {
            log::warn!("finalizer for {} failed: {}", owner, err);
            false
        }
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            log::error!("finalizer for {} panicked: {}", owner, message);
            false
        }
    }
}
