//! Cell handles, headers and raw slot access.
//!
//! Every cell starts with an 8-byte header:
//!
//! ```text
//! byte 0      kind tag
//! byte 1      flags (FORWARDED, FINALIZED)
//! byte 2      age (young collections survived)
//! byte 3      reserved
//! bytes 4..8  size in bytes, header included
//! ```
//!
//! The header is written and the payload zeroed before an allocation returns,
//! so a collector walking a segment never observes a half-built cell. A
//! forwarded cell keeps its header (and therefore its size) intact; the new
//! address lives in the first payload word.

use std::fmt;
use std::num::NonZeroUsize;
use std::ptr;

use core_types::layout::HEADER_SIZE;
use core_types::CellKind;

use crate::error::invariant_violation;

/// Address of a cell inside the heap.
///
/// Handles to young cells are invalidated by a young collection, which
/// moves every survivor. Anything that must outlive an allocation belongs in
/// the heap's root table or in a [`RootProvider`](crate::RootProvider), whose
/// slots the collector rewrites.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellHandle(NonZeroUsize);

impl CellHandle {
    /// Address of the cell header.
    #[inline]
    pub fn addr(self) -> usize {
        self.0.get()
    }

    #[inline]
    pub(crate) fn from_addr(addr: usize) -> Option<CellHandle> {
        NonZeroUsize::new(addr).map(CellHandle)
    }

    /// Decodes a pointer slot value; `0` is null.
    #[inline]
    pub(crate) fn from_slot(word: u64) -> Option<CellHandle> {
        Self::from_addr(word as usize)
    }

    /// Encodes an optional handle as a pointer slot value.
    #[inline]
    pub(crate) fn to_slot(handle: Option<CellHandle>) -> u64 {
        handle.map_or(0, |h| h.addr() as u64)
    }

    /// Address of the payload byte at `offset`.
    #[inline]
    pub(crate) fn payload(self, offset: u32) -> usize {
        self.addr() + HEADER_SIZE + offset as usize
    }
}

impl fmt::Debug for CellHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CellHandle({:#x})", self.addr())
    }
}

/// Whether a new cell must be registered for finalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HasFinalizer {
    /// The cell owns nothing outside the heap.
    No,
    /// The kind's finalizer must run when the cell dies.
    Yes,
}

impl From<bool> for HasFinalizer {
    fn from(value: bool) -> Self {
        if value {
            HasFinalizer::Yes
        } else {
            HasFinalizer::No
        }
    }
}

/// Header flag: the cell was evacuated; payload word 0 holds the new address.
pub const FORWARDED: u8 = 1 << 0;
/// Header flag: the cell's finalizer has run.
pub const FINALIZED: u8 = 1 << 1;

/// Decoded cell header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellHeader {
    /// Raw kind tag.
    pub tag: u8,
    /// Flag bits.
    pub flags: u8,
    /// Young collections survived.
    pub age: u8,
    /// Size in bytes, header included.
    pub size: u32,
}

impl CellHeader {
    /// Header for a fresh cell.
    pub fn new(kind: CellKind, size: usize, age: u8) -> Self {
        CellHeader {
            tag: kind as u8,
            flags: 0,
            age,
            size: size as u32,
        }
    }

    #[inline]
    fn encode(self) -> u64 {
        self.tag as u64
            | (self.flags as u64) << 8
            | (self.age as u64) << 16
            | (self.size as u64) << 32
    }

    #[inline]
    fn decode(word: u64) -> Self {
        CellHeader {
            tag: word as u8,
            flags: (word >> 8) as u8,
            age: (word >> 16) as u8,
            size: (word >> 32) as u32,
        }
    }

    /// The cell's kind. A tag that names no kind is a fatal invariant
    /// violation.
    pub fn kind(&self) -> CellKind {
        match CellKind::from_u8(self.tag) {
            Ok(kind) => kind,
            Err(err) => invariant_violation!("{}", err),
        }
    }

    /// Size in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.size as usize
    }

    /// Whether the cell has been evacuated.
    #[inline]
    pub fn is_forwarded(&self) -> bool {
        self.flags & FORWARDED != 0
    }

    /// Whether the cell's finalizer has run.
    #[inline]
    pub fn is_finalized(&self) -> bool {
        self.flags & FINALIZED != 0
    }
}

/// Reads the header of the cell at `addr`.
///
/// # Safety
///
/// `addr` must be the start of a cell in a segment owned by the heap.
#[inline]
pub(crate) unsafe fn read_header(addr: usize) -> CellHeader {
    // SAFETY: guaranteed by the caller; headers are 8-byte aligned.
    CellHeader::decode(unsafe { ptr::read(addr as *const u64) })
}

/// Overwrites the header of the cell at `addr`.
///
/// # Safety
///
/// `addr` must be 8-byte aligned and lie in a segment owned by the heap with
/// at least a header's worth of bytes after it.
#[inline]
pub(crate) unsafe fn write_header(addr: usize, header: CellHeader) {
    // SAFETY: guaranteed by the caller.
    unsafe { ptr::write(addr as *mut u64, header.encode()) }
}

/// Reads a payload word.
///
/// # Safety
///
/// `addr` must be an 8-byte aligned address inside a live cell.
#[inline]
pub(crate) unsafe fn read_word(addr: usize) -> u64 {
    // SAFETY: guaranteed by the caller.
    unsafe { ptr::read(addr as *const u64) }
}

/// Writes a payload word.
///
/// # Safety
///
/// `addr` must be an 8-byte aligned address inside a live cell.
#[inline]
pub(crate) unsafe fn write_word(addr: usize, value: u64) {
    // SAFETY: guaranteed by the caller.
    unsafe { ptr::write(addr as *mut u64, value) }
}

/// Writes a fresh header at `addr` and zeroes the payload.
///
/// # Safety
///
/// `[addr, addr + size)` must be unused memory inside a heap segment.
pub(crate) unsafe fn init_cell(addr: usize, kind: CellKind, size: usize, age: u8) {
    // SAFETY: guaranteed by the caller.
    unsafe {
        ptr::write_bytes((addr + HEADER_SIZE) as *mut u8, 0, size - HEADER_SIZE);
        write_header(addr, CellHeader::new(kind, size, age));
    }
}

/// Turns `[addr, addr + size)` into a free-list filler cell.
///
/// # Safety
///
/// The range must lie inside one segment and hold no live cell.
pub(crate) unsafe fn write_free_cell(addr: usize, size: usize) {
    // SAFETY: guaranteed by the caller.
    unsafe { write_header(addr, CellHeader::new(CellKind::Freelist, size, 0)) }
}

/// Marks the cell at `addr` as forwarded to `to`.
///
/// # Safety
///
/// `addr` must be a live from-space cell.
pub(crate) unsafe fn forward(addr: usize, to: usize) {
    // SAFETY: guaranteed by the caller; every cell has at least one payload
    // word.
    unsafe {
        let mut header = read_header(addr);
        header.flags |= FORWARDED;
        write_header(addr, header);
        write_word(addr + HEADER_SIZE, to as u64);
    }
}

/// The forwarding address of an evacuated cell.
///
/// # Safety
///
/// `addr` must be a cell whose header has [`FORWARDED`] set.
#[inline]
pub(crate) unsafe fn forwarding_address(addr: usize) -> usize {
    // SAFETY: guaranteed by the caller.
    unsafe { read_word(addr + HEADER_SIZE) as usize }
}

/// Number of trailing array elements of the cell at `addr`, clamped to what
/// fits in its allocation.
///
/// # Safety
///
/// `addr` must be a live cell.
pub(crate) unsafe fn array_length(addr: usize, header: &CellHeader) -> usize {
    match header.kind().metadata().array {
        Some(array) => {
            // SAFETY: the length word lies in the fixed part of the payload.
            let len = unsafe { read_word(addr + HEADER_SIZE + array.length_offset as usize) };
            let room = header
                .size()
                .saturating_sub(HEADER_SIZE + array.start_offset as usize)
                / array.elem_size as usize;
            (len as usize).min(room)
        }
        None => 0,
    }
}

/// Calls `f` with the address of every strong pointer slot of the cell at
/// `addr`.
///
/// # Safety
///
/// `addr` must be a live, non-forwarded cell.
pub(crate) unsafe fn visit_pointer_slots(addr: usize, mut f: impl FnMut(usize)) {
    // SAFETY: guaranteed by the caller.
    let header = unsafe { read_header(addr) };
    let meta = header.kind().metadata();
    if !meta.has_pointers() {
        return;
    }
    // SAFETY: guaranteed by the caller.
    let len = unsafe { array_length(addr, &header) };
    meta.for_each_pointer_offset(len, |offset| f(addr + HEADER_SIZE + offset as usize));
}
