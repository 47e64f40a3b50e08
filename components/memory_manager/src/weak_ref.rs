//! Weak reference slots.
//!
//! A [`WeakRef`] names a slot in the heap's [`WeakRefTable`]. Slots are not
//! traced: a slot's target survives only if something else keeps it alive.
//! During every collection each owner of a weak reference must report it
//! through a [`WeakRefAcceptor`], either from its kind's `mark_weak` hook or
//! from [`RootProvider::mark_weak_roots`](crate::RootProvider::mark_weak_roots).
//! Reported slots are then updated (moved targets) or cleared (dead targets);
//! unreported slots are freed.
//!
//! Every slot carries a generation that is bumped when the slot is freed, so
//! a reference to a freed slot never resolves to the slot's next occupant.

use crate::cell::CellHandle;

/// Owned reference to a weak slot.
///
/// Intentionally not `Clone`: a slot has exactly one owner responsible for
/// reporting it.
#[derive(Debug, PartialEq, Eq)]
pub struct WeakRef {
    index: u32,
    generation: u32,
}

impl WeakRef {
    /// Slot index.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Generation of the slot this reference was created for.
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Encodes the reference as a payload word; `0` is reserved for "none".
    pub(crate) fn to_word(&self) -> u64 {
        (self.generation as u64) << 32 | (self.index as u64 + 1)
    }

    /// Decodes a payload word written by [`to_word`](WeakRef::to_word).
    pub(crate) fn from_word(word: u64) -> Option<WeakRef> {
        let index = (word as u32).checked_sub(1)?;
        Some(WeakRef {
            index,
            generation: (word >> 32) as u32,
        })
    }
}

/// Marking state of a weak slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeakSlotState {
    /// Not reported during the current cycle.
    Unmarked,
    /// Reported during the current cycle.
    Marked,
    /// On the free list.
    Free,
}

/// One entry of the weak reference table.
#[derive(Debug, Clone, Copy)]
pub struct WeakRefSlot {
    /// Marking state.
    pub state: WeakSlotState,
    /// Referent, `None` once cleared.
    pub target: Option<CellHandle>,
    /// Bumped every time the slot is freed.
    pub generation: u32,
}

/// Counters from resolving the weak slots after marking.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WeakSweepResult {
    /// Slots whose referent moved.
    pub updated: usize,
    /// Slots whose referent died.
    pub cleared: usize,
    /// Slots nobody reported.
    pub freed: usize,
}

/// Slab of weak slots with a free list.
#[derive(Debug, Default)]
pub struct WeakRefTable {
    slots: Vec<WeakRefSlot>,
    free: Vec<u32>,
}

impl WeakRefTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a slot pointing at `target`.
    pub fn alloc(&mut self, target: CellHandle) -> WeakRef {
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.state = WeakSlotState::Unmarked;
                slot.target = Some(target);
                WeakRef {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                self.slots.push(WeakRefSlot {
                    state: WeakSlotState::Unmarked,
                    target: Some(target),
                    generation: 0,
                });
                WeakRef {
                    index: self.slots.len() as u32 - 1,
                    generation: 0,
                }
            }
        }
    }

    /// Current referent of `weak`; `None` once the target died or the slot
    /// was freed.
    pub fn get(&self, weak: &WeakRef) -> Option<CellHandle> {
        self.live_slot(weak.index, weak.generation)
            .and_then(|s| s.target)
    }

    fn live_slot(&self, index: u32, generation: u32) -> Option<&WeakRefSlot> {
        self.slots
            .get(index as usize)
            .filter(|s| s.state != WeakSlotState::Free && s.generation == generation)
    }

    /// Marks every reported slot. Reports naming a freed or reused slot are
    /// ignored.
    pub(crate) fn mark_all(&mut self, reported: &[(u32, u32)]) {
        for &(index, generation) in reported {
            if let Some(slot) = self.slots.get_mut(index as usize) {
                if slot.state == WeakSlotState::Unmarked && slot.generation == generation {
                    slot.state = WeakSlotState::Marked;
                }
            }
        }
    }

    /// Resolves every marked slot through `resolve`, frees every unmarked
    /// slot, and resets marked slots for the next cycle.
    pub(crate) fn sweep(
        &mut self,
        mut resolve: impl FnMut(CellHandle) -> Option<CellHandle>,
    ) -> WeakSweepResult {
        let mut result = WeakSweepResult::default();
        for (index, slot) in self.slots.iter_mut().enumerate() {
            match slot.state {
                WeakSlotState::Free => {}
                WeakSlotState::Unmarked => {
                    slot.state = WeakSlotState::Free;
                    slot.target = None;
                    slot.generation = slot.generation.wrapping_add(1);
                    self.free.push(index as u32);
                    result.freed += 1;
                }
                WeakSlotState::Marked => {
                    slot.state = WeakSlotState::Unmarked;
                    if let Some(target) = slot.target {
                        let resolved = resolve(target);
                        match resolved {
                            None => result.cleared += 1,
                            Some(new) if new != target => result.updated += 1,
                            Some(_) => {}
                        }
                        slot.target = resolved;
                    }
                }
            }
        }
        result
    }

    /// Number of slots in use.
    pub fn live_count(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Snapshot of a slot, for diagnostics.
    pub fn slot(&self, index: u32) -> Option<WeakRefSlot> {
        self.slots.get(index as usize).copied()
    }
}

/// Collects the weak slots reported during a cycle.
pub struct WeakRefAcceptor<'a> {
    marked: &'a mut Vec<(u32, u32)>,
}

impl<'a> WeakRefAcceptor<'a> {
    pub(crate) fn new(marked: &'a mut Vec<(u32, u32)>) -> Self {
        WeakRefAcceptor { marked }
    }

    /// Reports `weak` as still owned.
    pub fn accept(&mut self, weak: &WeakRef) {
        self.marked.push((weak.index, weak.generation));
    }

    /// Number of slots reported so far.
    pub fn count(&self) -> usize {
        self.marked.len()
    }
}
