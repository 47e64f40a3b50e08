//! Root scanning interface and the heap's root table.
//!
//! The collector never guesses where the mutator keeps references. Anything
//! that must stay alive is either registered in the heap's [`RootTable`] or
//! reported by the installed [`RootProvider`] at the start of each
//! collection. Acceptors receive `&mut CellHandle` so that evacuated cells
//! are updated in place.

use crate::cell::CellHandle;
use crate::weak_ref::WeakRefAcceptor;

/// Receives root slots during a collection.
pub trait RootAcceptor {
    /// Visits one strong root. The handle may be rewritten if its cell moves.
    fn accept(&mut self, cell: &mut CellHandle);

    /// Visits a root slot that may be empty.
    fn accept_nullable(&mut self, cell: &mut Option<CellHandle>) {
        if let Some(cell) = cell {
            self.accept(cell);
        }
    }
}

/// Supplies the mutator's roots to the collector.
///
/// Implementations must not touch the heap from inside these callbacks; they
/// only receive an acceptor.
pub trait RootProvider {
    /// Reports every strong root.
    fn mark_roots(&mut self, acceptor: &mut dyn RootAcceptor);

    /// Reports weak references held outside the heap. References not
    /// reported here (or by a live cell) are freed at the end of the cycle.
    fn mark_weak_roots(&mut self, _acceptor: &mut WeakRefAcceptor<'_>) {}
}

/// Identifier of an entry in the [`RootTable`].
///
/// Ids carry the generation of their slot, so an id that was removed keeps
/// resolving to `None` after the slot is reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RootId {
    index: u32,
    generation: u32,
}

impl RootId {
    /// Raw index, for diagnostics.
    pub fn index(self) -> u32 {
        self.index
    }
}

#[derive(Debug, Default)]
struct RootSlot {
    cell: Option<CellHandle>,
    /// Bumped on every removal
    generation: u32,
}

/// Heap-owned global handles, always scanned as strong roots.
#[derive(Debug, Default)]
pub struct RootTable {
    slots: Vec<RootSlot>,
    free: Vec<u32>,
}

impl RootTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `cell` and returns its id.
    pub fn add(&mut self, cell: CellHandle) -> RootId {
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.cell = Some(cell);
                RootId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                self.slots.push(RootSlot {
                    cell: Some(cell),
                    generation: 0,
                });
                RootId {
                    index: self.slots.len() as u32 - 1,
                    generation: 0,
                }
            }
        }
    }

    fn slot_mut(&mut self, id: RootId) -> Option<&mut RootSlot> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation && slot.cell.is_some())
    }

    /// Current handle of a root, or `None` if the id was removed.
    pub fn get(&self, id: RootId) -> Option<CellHandle> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.cell)
    }

    /// Points an existing root at another cell.
    ///
    /// # Returns
    ///
    /// `false` if the id is not registered.
    pub fn set(&mut self, id: RootId, cell: CellHandle) -> bool {
        match self.slot_mut(id) {
            Some(slot) => {
                slot.cell = Some(cell);
                true
            }
            None => false,
        }
    }

    /// Unregisters a root, returning the cell it held.
    pub fn remove(&mut self, id: RootId) -> Option<CellHandle> {
        let slot = self.slot_mut(id)?;
        let cell = slot.cell.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        Some(cell)
    }

    /// Number of registered roots.
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Whether no root is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hands every registered root to `acceptor`.
    pub fn mark(&mut self, acceptor: &mut dyn RootAcceptor) {
        for slot in &mut self.slots {
            acceptor.accept_nullable(&mut slot.cell);
        }
    }
}
