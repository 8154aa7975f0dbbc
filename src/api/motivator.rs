//! Motivator handles with relocation support.
//!
//! A `Motivator` is a stable external reference to an animated value that
//! lives in a slot run inside a processor pool. The handle stays valid
//! even when the pool relocates the run during defragmentation: handle and
//! pool share one binding cell, and the pool rewrites it in place.

use std::cell::RefCell;
use std::rc::Rc;

use crate::api::init::MotivatorKind;
use crate::core::index_allocator::SlotIndex;

/// Where a handle currently points. `kind == None` means reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Binding {
    pub kind: Option<MotivatorKind>,
    pub base: SlotIndex,
}

impl Binding {
    pub(crate) const RESET: Binding = Binding {
        kind: None,
        base: 0,
    };

    pub(crate) fn is_bound(&self) -> bool {
        self.kind.is_some()
    }
}

/// The binding cell shared between a [`Motivator`] and the owning
/// processor's back-pointer table.
///
/// Identity of the cell *is* the identity of the handle: a processor
/// considers a handle the owner of a run exactly when the table entry and
/// the handle wrap the same cell. Opaque outside the crate.
#[derive(Debug, Clone)]
pub struct MotivatorLink(Rc<RefCell<Binding>>);

impl MotivatorLink {
    pub(crate) fn new_reset() -> Self {
        Self(Rc::new(RefCell::new(Binding::RESET)))
    }

    pub(crate) fn get(&self) -> Binding {
        *self.0.borrow()
    }

    pub(crate) fn bind(&self, kind: MotivatorKind, base: SlotIndex) {
        *self.0.borrow_mut() = Binding {
            kind: Some(kind),
            base,
        };
    }

    pub(crate) fn rebase(&self, base: SlotIndex) {
        self.0.borrow_mut().base = base;
    }

    pub(crate) fn reset(&self) {
        *self.0.borrow_mut() = Binding::RESET;
    }

    /// True when the user-side `Motivator` has been dropped and only the
    /// back-pointer table still holds the cell.
    pub(crate) fn is_abandoned(&self) -> bool {
        Rc::strong_count(&self.0) == 1
    }

    /// Cell identity check.
    pub fn same_cell(a: &Self, b: &Self) -> bool {
        Rc::ptr_eq(&a.0, &b.0)
    }
}

/// Opaque handle to an animated value.
///
/// A motivator is either *bound* to one slot run inside one processor, or
/// *reset*. Binding happens through
/// [`AnimEngine::initialize_motivator`](crate::core::engine::AnimEngine::initialize_motivator);
/// the run is released by
/// [`AnimEngine::remove_motivator`](crate::core::engine::AnimEngine::remove_motivator)
/// or, if the handle is simply dropped, by the owning processor's sweep on
/// the next frame advance.
///
/// Handles are not `Clone`: a run has exactly one owner. Moving the value
/// is free because the shared binding cell does not move with it.
#[derive(Debug)]
pub struct Motivator {
    link: MotivatorLink,
}

impl Motivator {
    /// Create a reset handle.
    pub fn new() -> Self {
        Self {
            link: MotivatorLink::new_reset(),
        }
    }

    /// True when bound to a slot run.
    pub fn is_bound(&self) -> bool {
        self.link.get().is_bound()
    }

    /// The kind of the owning processor, if bound.
    pub fn kind(&self) -> Option<MotivatorKind> {
        self.link.get().kind
    }

    /// The base slot of the bound run, if bound. The value is volatile:
    /// defragmentation may rebase the handle between frames.
    pub fn base(&self) -> Option<SlotIndex> {
        let binding = self.link.get();
        binding.kind.map(|_| binding.base)
    }

    /// The shared binding cell.
    pub fn link(&self) -> &MotivatorLink {
        &self.link
    }
}

impl Default for Motivator {
    fn default() -> Self {
        Self::new()
    }
}
