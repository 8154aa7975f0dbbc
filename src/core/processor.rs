//! The processor substrate: stable handles over relocatable slot runs.
//!
//! [`ProcessorCore`] owns the slot allocator and the back-pointer table
//! (slot -> handle binding cell) and enforces the rebinding protocol:
//! whenever the allocator relocates a run, the core moves the table entry
//! and rewrites the handle's binding cell before the algorithm's storage
//! hook runs. Concrete algorithms keep their per-slot state in parallel
//! arrays behind the [`SlotState`] hooks.

use log::trace;

use crate::api::init::{MotivatorKind, ProcessorInit};
use crate::api::motivator::MotivatorLink;
use crate::api::AnimTime;
use crate::core::engine::{AnimEngine, EngineError};
use crate::core::index_allocator::{AllocatorEvents, IndexAllocator, SlotIndex, SlotRange};
use crate::core::matrix::MatrixProcessor;
use crate::core::rig::RigProcessor;
use crate::core::scalar::ScalarProcessor;

/// Storage hooks a concrete algorithm implements over its parallel arrays.
pub trait SlotState {
    /// Current length of the parallel arrays.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resize every parallel array to `count` slots. New slots must come
    /// up in a reset (idle) state.
    fn set_slot_count(&mut self, count: usize);

    /// Copy `src.width` slots from `src.base` to `dst` in every parallel
    /// array. The destination is unoccupied.
    fn move_slots(&mut self, src: SlotRange, dst: SlotIndex);

    /// A run is being released. Plain value arrays need no cleanup; slots
    /// holding owned resources (nested handles, shared splines) drop them
    /// here.
    fn remove_slots(&mut self, _base: SlotIndex, _width: usize) {}
}

/// Proxies allocator events to both the back-pointer table and the
/// algorithm's storage, keeping handle bindings in step with relocations.
struct CoreEvents<'a> {
    kind: MotivatorKind,
    bindings: &'a mut Vec<Option<MotivatorLink>>,
    state: &'a mut dyn SlotState,
}

impl AllocatorEvents for CoreEvents<'_> {
    fn set_slot_count(&mut self, count: usize) {
        self.bindings.resize_with(count, || None);
        self.state.set_slot_count(count);
    }

    fn move_slots(&mut self, src: SlotRange, dst: SlotIndex) {
        trace!(
            "{}: relocating slots {}..{} -> {}",
            self.kind,
            src.base,
            src.end(),
            dst
        );
        let link = self.bindings[src.base].take();
        debug_assert!(link.is_some(), "live run base without a bound handle");
        if let Some(link) = &link {
            link.rebase(dst);
        }
        self.bindings[dst] = link;
        self.state.move_slots(src, dst);
    }
}

/// Bookkeeping shared by every processor: the allocator, the back-pointer
/// table, and the handle-rebinding protocol.
#[derive(Debug)]
pub struct ProcessorCore {
    kind: MotivatorKind,
    allocator: IndexAllocator,
    /// slot -> binding cell. `Some` only at live run bases.
    bindings: Vec<Option<MotivatorLink>>,
}

impl ProcessorCore {
    pub fn new(kind: MotivatorKind) -> Self {
        Self {
            kind,
            allocator: IndexAllocator::new(),
            bindings: Vec::new(),
        }
    }

    pub fn kind(&self) -> MotivatorKind {
        self.kind
    }

    /// Allocate a run of `width` slots, bind `link` to its base, and grow
    /// the algorithm's storage through the events hook. Returns the base;
    /// the caller populates its arrays afterwards.
    pub fn insert(
        &mut self,
        link: MotivatorLink,
        width: usize,
        state: &mut dyn SlotState,
    ) -> SlotIndex {
        let base = self.allocator.alloc(
            width,
            &mut CoreEvents {
                kind: self.kind,
                bindings: &mut self.bindings,
                state,
            },
        );
        debug_assert!(self.bindings[base].is_none(), "reused base still bound");
        link.bind(self.kind, base);
        self.bindings[base] = Some(link);
        base
    }

    /// Release the run based at `base`: run the algorithm's cleanup hook,
    /// reset the bound handle, clear the back-pointer, free the slots.
    pub fn remove(&mut self, base: SlotIndex, state: &mut dyn SlotState) {
        let width = self.allocator.width_at(base);
        if width == 0 {
            debug_assert!(false, "remove on slot {base} that is not a live run base");
            return;
        }
        state.remove_slots(base, width);
        if let Some(link) = self.bindings[base].take() {
            link.reset();
        }
        self.allocator.free(base);
    }

    /// Atomically retarget ownership of the run at `base` to `new_link`.
    /// The previously bound handle is reset; per-slot state is untouched.
    pub fn transfer(&mut self, base: SlotIndex, new_link: MotivatorLink) {
        debug_assert!(self.allocator.width_at(base) > 0, "transfer on dead run");
        if let Some(old) = self.bindings[base].take() {
            old.reset();
        }
        new_link.bind(self.kind, base);
        self.bindings[base] = Some(new_link);
    }

    /// True iff `base` is a live run base owned by exactly this `link`.
    pub fn valid(&self, base: SlotIndex, link: &MotivatorLink) -> bool {
        self.allocator.width_at(base) > 0
            && self
                .bindings
                .get(base)
                .and_then(|entry| entry.as_ref())
                .is_some_and(|entry| MotivatorLink::same_cell(entry, link))
    }

    /// Width of the run based at `base` (0 for non-bases).
    pub fn dimensions(&self, base: SlotIndex) -> usize {
        self.allocator.width_at(base)
    }

    pub fn slot_count(&self) -> usize {
        self.allocator.slot_count()
    }

    pub fn live_runs(&self) -> impl Iterator<Item = SlotRange> + '_ {
        self.allocator.live_runs()
    }

    pub fn contains(&self, slot: SlotIndex) -> bool {
        self.allocator.contains(slot)
    }

    /// Release every run whose handle has been dropped. Called at the
    /// start of each advance, before defragmentation.
    pub fn sweep_abandoned(&mut self, state: &mut dyn SlotState) {
        let abandoned: Vec<SlotIndex> = self
            .bindings
            .iter()
            .enumerate()
            .filter_map(|(slot, entry)| {
                entry
                    .as_ref()
                    .is_some_and(|link| link.is_abandoned())
                    .then_some(slot)
            })
            .collect();
        for base in abandoned {
            trace!("{}: sweeping abandoned run at {base}", self.kind);
            self.remove(base, state);
        }
    }

    /// Compact live runs and rebind the affected handles.
    pub fn defragment(&mut self, state: &mut dyn SlotState) {
        self.allocator.defragment(&mut CoreEvents {
            kind: self.kind,
            bindings: &mut self.bindings,
            state,
        });
    }

    /// Walk the live runs and assert every structural invariant: sizes
    /// agree everywhere, each base carries a handle bound back to it, and
    /// interior/freed slots carry none.
    pub fn verify_integrity(&self, state_len: usize) {
        assert_eq!(
            self.bindings.len(),
            self.allocator.slot_count(),
            "back-pointer table out of step with the allocator"
        );
        assert_eq!(
            state_len,
            self.allocator.slot_count(),
            "algorithm storage out of step with the allocator"
        );
        for run in self.allocator.live_runs() {
            let link = self.bindings[run.base]
                .as_ref()
                .expect("live run base without a bound handle");
            let binding = link.get();
            assert_eq!(binding.kind, Some(self.kind), "handle bound to wrong kind");
            assert_eq!(binding.base, run.base, "handle bound to wrong base");
            for slot in run.base + 1..run.end() {
                assert!(
                    self.bindings[slot].is_none(),
                    "interior slot {slot} holds a handle"
                );
            }
        }
        for (slot, entry) in self.bindings.iter().enumerate() {
            if entry.is_some() {
                assert!(
                    self.allocator.width_at(slot) > 0,
                    "slot {slot} holds a handle but is not a live base"
                );
            }
        }
    }
}

/// The polymorphic base of every processor.
///
/// One processor owns the dense state for all motivators of its kind and
/// advances them together once per engine frame. Capability accessors
/// expose the algorithm-specific face, if any.
pub trait Processor {
    /// The type-tag this processor serves.
    fn kind(&self) -> MotivatorKind;

    /// Position in the engine's frame traversal; lower runs earlier.
    /// Constant for a given processor kind.
    fn priority(&self) -> i32;

    /// The shared bookkeeping.
    fn core(&self) -> &ProcessorCore;

    /// Bind `link` to a fresh run of `width` slots populated from `init`.
    fn initialize(
        &mut self,
        init: &dyn ProcessorInit,
        link: MotivatorLink,
        width: usize,
        engine: &AnimEngine,
    ) -> Result<(), EngineError>;

    /// Release the run based at `base`, resetting its handle.
    fn remove(&mut self, base: SlotIndex);

    /// Retarget the run at `base` to `new_link`.
    fn transfer(&mut self, base: SlotIndex, new_link: MotivatorLink);

    /// Compact live runs now instead of waiting for the next advance.
    fn defragment(&mut self);

    /// Advance all live slots by `delta`. Implementations sweep abandoned
    /// handles and defragment first, then batch-update.
    fn advance(&mut self, delta: AnimTime, engine: &AnimEngine);

    /// Assert structural invariants (debug tooling).
    fn verify(&self) {}

    fn valid_motivator(&self, base: SlotIndex, link: &MotivatorLink) -> bool {
        self.core().valid(base, link)
    }

    fn dimensions(&self, base: SlotIndex) -> usize {
        self.core().dimensions(base)
    }

    fn as_scalar(&self) -> Option<&dyn ScalarProcessor> {
        None
    }

    fn as_scalar_mut(&mut self) -> Option<&mut dyn ScalarProcessor> {
        None
    }

    fn as_matrix(&self) -> Option<&dyn MatrixProcessor> {
        None
    }

    fn as_matrix_mut(&mut self) -> Option<&mut dyn MatrixProcessor> {
        None
    }

    fn as_rig(&self) -> Option<&dyn RigProcessor> {
        None
    }

    fn as_rig_mut(&mut self) -> Option<&mut dyn RigProcessor> {
        None
    }
}
