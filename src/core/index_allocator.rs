//! Dense slot-run allocation with deferred defragmentation.
//!
//! Hands out contiguous runs of slots inside a processor's parallel
//! arrays. Freed runs keep their width on a free list so a later request
//! of the same width reuses them directly; compaction is deferred to an
//! explicit [`defragment`](IndexAllocator::defragment) call that relocates
//! live runs downward through the [`AllocatorEvents`] callback.

use std::collections::BTreeMap;

/// Index of one slot in a processor's parallel arrays.
pub type SlotIndex = usize;

/// A contiguous run of slots `[base, base + width)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotRange {
    pub base: SlotIndex,
    pub width: usize,
}

impl SlotRange {
    pub fn new(base: SlotIndex, width: usize) -> Self {
        Self { base, width }
    }

    /// One past the last slot of the run.
    pub fn end(&self) -> SlotIndex {
        self.base + self.width
    }

    pub fn contains(&self, slot: SlotIndex) -> bool {
        slot >= self.base && slot < self.end()
    }
}

/// Storage events the allocator delegates to its owner.
///
/// The owner keeps parallel arrays sized to the allocator's slot count and
/// relocates their contents when asked. `move_slots` destinations are
/// guaranteed unoccupied at the time of the call.
pub trait AllocatorEvents {
    /// Resize storage to `count` slots. New slots must come up in a reset
    /// state; slots at or beyond `count` are discarded.
    fn set_slot_count(&mut self, count: usize);

    /// Copy `src.width` slots from `src.base` to `dst`.
    fn move_slots(&mut self, src: SlotRange, dst: SlotIndex);
}

/// Allocator for contiguous slot runs of arbitrary positive width.
#[derive(Debug, Default)]
pub struct IndexAllocator {
    /// Live runs, base -> width. Ordered so the highest run is O(log n).
    live: BTreeMap<SlotIndex, usize>,
    /// Freed runs, widths retained for exact reuse.
    free: Vec<SlotRange>,
    /// High-water mark: total slots the owner's arrays must hold.
    count: usize,
}

impl IndexAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a run of `width` slots and return its base.
    ///
    /// Reuses a freed run of exactly `width` when one exists; otherwise
    /// grows the high-water mark and tells the owner to resize.
    pub fn alloc(&mut self, width: usize, events: &mut dyn AllocatorEvents) -> SlotIndex {
        assert!(width >= 1, "slot runs must have positive width");

        if let Some(pos) = self.free.iter().position(|run| run.width == width) {
            let run = self.free.swap_remove(pos);
            self.live.insert(run.base, run.width);
            return run.base;
        }

        let base = self.count;
        self.count += width;
        events.set_slot_count(self.count);
        self.live.insert(base, width);
        base
    }

    /// Free the run based at `base`.
    ///
    /// The slots go on the free list; the high-water mark is untouched
    /// until the next [`defragment`](Self::defragment). Freeing a slot
    /// that is not a live run base is a programming error.
    pub fn free(&mut self, base: SlotIndex) {
        match self.live.remove(&base) {
            Some(width) => self.free.push(SlotRange::new(base, width)),
            None => debug_assert!(false, "free on non-base slot {base}"),
        }
    }

    /// Compact live runs toward slot 0 and shrink the high-water mark.
    ///
    /// Repeatedly relocates the highest live run into the lowest free hole
    /// that can take it, so the tail shrinks monotonically and no run is
    /// ever relocated onto itself. An empty free list makes this a no-op.
    pub fn defragment(&mut self, events: &mut dyn AllocatorEvents) {
        if self.free.is_empty() {
            return;
        }

        loop {
            self.coalesce_free();

            let Some((&live_base, &live_width)) = self.live.iter().next_back() else {
                break;
            };
            // Lowest hole below the run that is wide enough. Holes never
            // straddle a live run, so base order is enough for "below".
            let Some(pos) = self
                .free
                .iter()
                .enumerate()
                .filter(|(_, hole)| hole.base < live_base && hole.width >= live_width)
                .min_by_key(|(_, hole)| hole.base)
                .map(|(pos, _)| pos)
            else {
                // No hole below the highest live run can take it.
                break;
            };
            let hole = self.free[pos];

            self.free.swap_remove(pos);
            self.live.remove(&live_base);
            events.move_slots(SlotRange::new(live_base, live_width), hole.base);
            self.live.insert(hole.base, live_width);

            if live_width < hole.width {
                self.free
                    .push(SlotRange::new(hole.base + live_width, hole.width - live_width));
            }
            self.free.push(SlotRange::new(live_base, live_width));
        }

        let new_count = self
            .live
            .iter()
            .next_back()
            .map_or(0, |(base, width)| base + width);
        if new_count < self.count {
            self.count = new_count;
            // Runs cannot straddle the new mark: the space above it is
            // tiled by whole free runs.
            self.free.retain(|run| run.base < new_count);
            events.set_slot_count(new_count);
        }
    }

    /// Merge adjacent free runs so relocation sees maximal holes.
    fn coalesce_free(&mut self) {
        if self.free.len() < 2 {
            return;
        }
        self.free.sort_unstable_by_key(|run| run.base);
        let mut merged: Vec<SlotRange> = Vec::with_capacity(self.free.len());
        for run in self.free.drain(..) {
            match merged.last_mut() {
                Some(last) if last.end() == run.base => last.width += run.width,
                _ => merged.push(run),
            }
        }
        self.free = merged;
    }

    /// The width of the live run based at `slot`, or 0 when `slot` is not
    /// a live base (interior or freed).
    pub fn width_at(&self, slot: SlotIndex) -> usize {
        self.live.get(&slot).copied().unwrap_or(0)
    }

    /// True when `slot` falls inside any live run.
    pub fn contains(&self, slot: SlotIndex) -> bool {
        self.live
            .range(..=slot)
            .next_back()
            .is_some_and(|(base, width)| slot < base + width)
    }

    /// The high-water mark: how many slots the owner's arrays hold.
    pub fn slot_count(&self) -> usize {
        self.count
    }

    pub fn live_run_count(&self) -> usize {
        self.live.len()
    }

    pub fn free_run_count(&self) -> usize {
        self.free.len()
    }

    /// True when there is nothing to defragment.
    pub fn is_compact(&self) -> bool {
        self.free.is_empty()
    }

    /// Live runs in base order.
    pub fn live_runs(&self) -> impl Iterator<Item = SlotRange> + '_ {
        self.live
            .iter()
            .map(|(&base, &width)| SlotRange::new(base, width))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Records events and mirrors what an owner's storage would do.
    #[derive(Default)]
    struct Recorder {
        len: usize,
        moves: Vec<(SlotRange, SlotIndex)>,
    }

    impl AllocatorEvents for Recorder {
        fn set_slot_count(&mut self, count: usize) {
            self.len = count;
        }

        fn move_slots(&mut self, src: SlotRange, dst: SlotIndex) {
            self.moves.push((src, dst));
        }
    }

    #[test]
    fn test_alloc_extends_high_water_mark() {
        let mut alloc = IndexAllocator::new();
        let mut ev = Recorder::default();

        assert_eq!(alloc.alloc(3, &mut ev), 0);
        assert_eq!(alloc.alloc(1, &mut ev), 3);
        assert_eq!(alloc.alloc(4, &mut ev), 4);
        assert_eq!(alloc.slot_count(), 8);
        assert_eq!(ev.len, 8);
    }

    #[test]
    fn test_free_reuses_exact_width() {
        let mut alloc = IndexAllocator::new();
        let mut ev = Recorder::default();

        let a = alloc.alloc(3, &mut ev);
        let _b = alloc.alloc(3, &mut ev);
        alloc.free(a);
        // High-water mark untouched by free.
        assert_eq!(alloc.slot_count(), 6);

        // Same width comes back at the same base; a different width does not.
        assert_eq!(alloc.alloc(3, &mut ev), a);
        alloc.free(a);
        assert_eq!(alloc.alloc(2, &mut ev), 6);
        assert_eq!(alloc.slot_count(), 8);
    }

    #[test]
    fn test_reuse_is_deterministic() {
        // Two identical alloc/free sequences hand out identical bases.
        let run = || {
            let mut alloc = IndexAllocator::new();
            let mut ev = Recorder::default();
            let a = alloc.alloc(2, &mut ev);
            let b = alloc.alloc(2, &mut ev);
            alloc.free(a);
            alloc.free(b);
            vec![alloc.alloc(2, &mut ev), alloc.alloc(2, &mut ev)]
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_width_at_and_contains() {
        let mut alloc = IndexAllocator::new();
        let mut ev = Recorder::default();

        let a = alloc.alloc(3, &mut ev);
        assert_eq!(alloc.width_at(a), 3);
        assert_eq!(alloc.width_at(a + 1), 0, "interior slots report width 0");
        assert!(alloc.contains(a));
        assert!(alloc.contains(a + 2));
        assert!(!alloc.contains(a + 3));

        alloc.free(a);
        assert_eq!(alloc.width_at(a), 0);
        assert!(!alloc.contains(a));
    }

    #[test]
    fn test_defragment_on_compact_allocator_is_noop() {
        let mut alloc = IndexAllocator::new();
        let mut ev = Recorder::default();
        alloc.alloc(3, &mut ev);
        alloc.alloc(2, &mut ev);

        alloc.defragment(&mut ev);
        assert!(ev.moves.is_empty());
        assert_eq!(alloc.slot_count(), 5);
    }

    #[test]
    fn test_defragment_moves_highest_into_lowest_hole() {
        let mut alloc = IndexAllocator::new();
        let mut ev = Recorder::default();
        let a = alloc.alloc(3, &mut ev);
        let b = alloc.alloc(3, &mut ev);
        let c = alloc.alloc(3, &mut ev);
        assert_eq!((a, b, c), (0, 3, 6));

        alloc.free(b);
        alloc.defragment(&mut ev);

        assert_eq!(ev.moves, vec![(SlotRange::new(6, 3), 3)]);
        assert_eq!(alloc.slot_count(), 6);
        assert_eq!(alloc.width_at(3), 3);
        assert!(alloc.is_compact());
    }

    #[test]
    fn test_defragment_coalesces_adjacent_holes() {
        let mut alloc = IndexAllocator::new();
        let mut ev = Recorder::default();
        let a = alloc.alloc(1, &mut ev);
        let b = alloc.alloc(1, &mut ev);
        let c = alloc.alloc(2, &mut ev);
        assert_eq!((a, b, c), (0, 1, 2));

        // Two width-1 holes merge into one width-2 hole that can take c.
        alloc.free(a);
        alloc.free(b);
        alloc.defragment(&mut ev);

        assert_eq!(ev.moves, vec![(SlotRange::new(2, 2), 0)]);
        assert_eq!(alloc.slot_count(), 2);
        assert_eq!(alloc.width_at(0), 2);
    }

    #[test]
    fn test_defragment_compacts_a_chain_of_runs() {
        let mut alloc = IndexAllocator::new();
        let mut ev = Recorder::default();
        for _ in 0..5 {
            alloc.alloc(2, &mut ev);
        }
        alloc.free(0);
        alloc.free(4);

        alloc.defragment(&mut ev);

        assert_eq!(alloc.slot_count(), 6);
        let bases: Vec<_> = alloc.live_runs().map(|run| run.base).collect();
        assert_eq!(bases, vec![0, 2, 4]);
        assert!(alloc.is_compact());
    }

    #[test]
    fn test_defragment_truncates_to_zero_when_empty() {
        let mut alloc = IndexAllocator::new();
        let mut ev = Recorder::default();
        let a = alloc.alloc(4, &mut ev);
        alloc.free(a);

        alloc.defragment(&mut ev);
        assert_eq!(alloc.slot_count(), 0);
        assert_eq!(ev.len, 0);
        assert!(ev.moves.is_empty(), "no relocation when nothing is live");
    }

    #[test]
    fn test_defragment_splits_oversized_hole() {
        let mut alloc = IndexAllocator::new();
        let mut ev = Recorder::default();
        let a = alloc.alloc(3, &mut ev);
        let b = alloc.alloc(1, &mut ev);
        let c = alloc.alloc(1, &mut ev);
        assert_eq!((a, b, c), (0, 3, 4));

        alloc.free(a);
        alloc.defragment(&mut ev);

        // c (the highest) lands at 0, b fills the split-off leftover.
        assert_eq!(ev.moves[0], (SlotRange::new(4, 1), 0));
        assert_eq!(alloc.slot_count(), 2);
        assert_eq!(alloc.live_run_count(), 2);
        assert!(alloc.is_compact());
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic]
    fn test_free_on_interior_slot_traps() {
        let mut alloc = IndexAllocator::new();
        let mut ev = Recorder::default();
        alloc.alloc(3, &mut ev);
        alloc.free(1);
    }
}
