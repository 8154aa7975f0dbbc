//! Constant-rate scalar driving through scheduled waypoints.
//!
//! Each dimension travels toward its current waypoint at the rate needed
//! to arrive exactly on time, then pops the next waypoint off its
//! schedule. The simplest target-driven backend, and the one nested under
//! matrix operations retargeted at runtime.

use std::collections::VecDeque;

use crate::api::init::{MotivatorKind, ProcessorInit};
use crate::api::motivator::MotivatorLink;
use crate::api::targets::{CurveShape, Targets1f, Waypoint};
use crate::api::AnimTime;
use crate::core::engine::{register_processor_kind, AnimEngine, EngineError};
use crate::core::index_allocator::{SlotIndex, SlotRange};
use crate::core::processor::{Processor, ProcessorCore, SlotState};
use crate::core::scalar::ScalarProcessor;

/// Init descriptor for the linear backend.
#[derive(Debug, Clone, Default)]
pub struct LinearInit {
    /// Initial value per dimension. One entry broadcasts across the run;
    /// empty starts every dimension at 0.
    pub start_values: Vec<f32>,
    /// Initial waypoint schedule per dimension. One entry broadcasts;
    /// empty starts idle.
    pub targets: Vec<Targets1f>,
}

impl LinearInit {
    pub const KIND: MotivatorKind = MotivatorKind::new("linear");

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_start(mut self, values: &[f32]) -> Self {
        self.start_values = values.to_vec();
        self
    }

    pub fn with_targets(mut self, targets: &[Targets1f]) -> Self {
        self.targets = targets.to_vec();
        self
    }

    /// Width-1 convenience: start at `start`, reach `target` after `time`.
    pub fn travel(start: f32, target: f32, time: AnimTime) -> Self {
        Self {
            start_values: vec![start],
            targets: vec![Targets1f::to(target, 0.0, time)],
        }
    }
}

impl ProcessorInit for LinearInit {
    fn kind(&self) -> MotivatorKind {
        Self::KIND
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// Per-slot parallel arrays.
#[derive(Debug, Default)]
struct LinearSlots {
    values: Vec<f32>,
    velocities: Vec<f32>,
    target_values: Vec<f32>,
    target_velocities: Vec<f32>,
    /// Time left to the current waypoint; 0 = resting at target.
    remaining: Vec<AnimTime>,
    /// Waypoints scheduled beyond the current one.
    pending: Vec<VecDeque<Waypoint>>,
    shapes: Vec<CurveShape>,
}

impl SlotState for LinearSlots {
    fn len(&self) -> usize {
        self.values.len()
    }

    fn set_slot_count(&mut self, count: usize) {
        self.values.resize(count, 0.0);
        self.velocities.resize(count, 0.0);
        self.target_values.resize(count, 0.0);
        self.target_velocities.resize(count, 0.0);
        self.remaining.resize(count, 0);
        self.pending.resize_with(count, VecDeque::new);
        self.shapes.resize(count, CurveShape::default());
    }

    fn move_slots(&mut self, src: SlotRange, dst: SlotIndex) {
        self.values.copy_within(src.base..src.end(), dst);
        self.velocities.copy_within(src.base..src.end(), dst);
        self.target_values.copy_within(src.base..src.end(), dst);
        self.target_velocities.copy_within(src.base..src.end(), dst);
        self.remaining.copy_within(src.base..src.end(), dst);
        for offset in 0..src.width {
            self.pending[dst + offset] = std::mem::take(&mut self.pending[src.base + offset]);
        }
        self.shapes.copy_within(src.base..src.end(), dst);
    }

    fn remove_slots(&mut self, base: SlotIndex, width: usize) {
        for slot in base..base + width {
            self.pending[slot].clear();
            self.remaining[slot] = 0;
            #[cfg(feature = "debug")]
            {
                self.values[slot] = f32::NAN;
                self.velocities[slot] = f32::NAN;
            }
        }
    }
}

impl LinearSlots {
    /// Install a waypoint as the current target of one dimension.
    fn apply_waypoint(&mut self, slot: SlotIndex, waypoint: Waypoint) {
        self.target_values[slot] = waypoint.value;
        self.target_velocities[slot] = waypoint.velocity;
        self.remaining[slot] = waypoint.time.max(0);
        if self.remaining[slot] == 0 {
            // Zero travel time snaps.
            self.values[slot] = waypoint.value;
            self.velocities[slot] = waypoint.velocity;
        }
    }

    fn set_schedule(&mut self, slot: SlotIndex, targets: &Targets1f) {
        self.pending[slot].clear();
        let mut waypoints = targets.waypoints().iter().copied();
        match waypoints.next() {
            Some(first) => {
                self.apply_waypoint(slot, first);
                self.pending[slot].extend(waypoints);
                // Drain any zero-time waypoints queued right behind a snap.
                while self.remaining[slot] == 0 {
                    match self.pending[slot].pop_front() {
                        Some(next) => self.apply_waypoint(slot, next),
                        None => break,
                    }
                }
            }
            None => {
                self.remaining[slot] = 0;
                self.velocities[slot] = 0.0;
            }
        }
    }

    fn advance_slot(&mut self, slot: SlotIndex, delta: AnimTime) {
        let mut budget = delta;
        while budget > 0 && self.remaining[slot] > 0 {
            let step = budget.min(self.remaining[slot]);
            let rate =
                (self.target_values[slot] - self.values[slot]) / self.remaining[slot] as f32;
            self.values[slot] += rate * step as f32;
            self.velocities[slot] = rate;
            self.remaining[slot] -= step;
            budget -= step;

            if self.remaining[slot] == 0 {
                // Land exactly, then take the next waypoint if scheduled.
                self.values[slot] = self.target_values[slot];
                self.velocities[slot] = self.target_velocities[slot];
                while self.remaining[slot] == 0 {
                    match self.pending[slot].pop_front() {
                        Some(next) => self.apply_waypoint(slot, next),
                        None => break,
                    }
                }
            }
        }
    }

    /// Time left across the current waypoint and everything scheduled
    /// behind it.
    fn schedule_time(&self, slot: SlotIndex) -> AnimTime {
        self.remaining[slot]
            + self.pending[slot]
                .iter()
                .map(|w| w.time.max(0))
                .sum::<AnimTime>()
    }
}

/// Pool of constant-rate scalar motivators.
pub struct LinearProcessor {
    core: ProcessorCore,
    slots: LinearSlots,
}

impl LinearProcessor {
    pub fn new() -> Self {
        Self {
            core: ProcessorCore::new(LinearInit::KIND),
            slots: LinearSlots::default(),
        }
    }

    /// Register this backend's factory process-wide.
    pub fn register() -> bool {
        register_processor_kind(LinearInit::KIND, || {
            std::rc::Rc::new(std::cell::RefCell::new(LinearProcessor::new()))
        })
    }
}

impl Default for LinearProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor for LinearProcessor {
    fn kind(&self) -> MotivatorKind {
        LinearInit::KIND
    }

    fn priority(&self) -> i32 {
        0
    }

    fn core(&self) -> &ProcessorCore {
        &self.core
    }

    fn initialize(
        &mut self,
        init: &dyn ProcessorInit,
        link: MotivatorLink,
        width: usize,
        _engine: &AnimEngine,
    ) -> Result<(), EngineError> {
        let init = init
            .as_any()
            .downcast_ref::<LinearInit>()
            .ok_or(EngineError::InitMismatch {
                expected: LinearInit::KIND,
                found: init.kind(),
            })?;
        let base = self.core.insert(link, width, &mut self.slots);
        for dim in 0..width {
            let start = pick(&init.start_values, dim).copied().unwrap_or(0.0);
            self.slots.values[base + dim] = start;
            self.slots.velocities[base + dim] = 0.0;
            self.slots.target_values[base + dim] = start;
            self.slots.target_velocities[base + dim] = 0.0;
            self.slots.shapes[base + dim] = CurveShape::default();
            if let Some(targets) = pick(&init.targets, dim) {
                self.slots.set_schedule(base + dim, targets);
            }
        }
        Ok(())
    }

    fn remove(&mut self, base: SlotIndex) {
        self.core.remove(base, &mut self.slots);
    }

    fn transfer(&mut self, base: SlotIndex, new_link: MotivatorLink) {
        self.core.transfer(base, new_link);
    }

    fn defragment(&mut self) {
        self.core.defragment(&mut self.slots);
    }

    fn advance(&mut self, delta: AnimTime, engine: &AnimEngine) {
        if engine.config().sweep_abandoned {
            self.core.sweep_abandoned(&mut self.slots);
        }
        if engine.config().auto_defragment {
            self.core.defragment(&mut self.slots);
        }
        if delta <= 0 {
            return;
        }
        let Self { core, slots } = self;
        for run in core.live_runs() {
            for slot in run.base..run.end() {
                slots.advance_slot(slot, delta);
            }
        }
    }

    fn verify(&self) {
        self.core.verify_integrity(self.slots.len());
    }

    fn as_scalar(&self) -> Option<&dyn ScalarProcessor> {
        Some(self)
    }

    fn as_scalar_mut(&mut self) -> Option<&mut dyn ScalarProcessor> {
        Some(self)
    }
}

impl ScalarProcessor for LinearProcessor {
    fn values(&self, base: SlotIndex) -> &[f32] {
        let width = self.core.dimensions(base);
        &self.slots.values[base..base + width]
    }

    fn velocities(&self, base: SlotIndex, out: &mut [f32]) {
        out.copy_from_slice(&self.slots.velocities[base..base + out.len()]);
    }

    fn target_values(&self, base: SlotIndex, out: &mut [f32]) {
        out.copy_from_slice(&self.slots.target_values[base..base + out.len()]);
    }

    fn target_velocities(&self, base: SlotIndex, out: &mut [f32]) {
        out.copy_from_slice(&self.slots.target_velocities[base..base + out.len()]);
    }

    fn differences(&self, base: SlotIndex, out: &mut [f32]) {
        for (dim, out) in out.iter_mut().enumerate() {
            *out = self.slots.target_values[base + dim] - self.slots.values[base + dim];
        }
    }

    fn target_time(&self, base: SlotIndex, width: usize) -> AnimTime {
        (base..base + width)
            .map(|slot| self.slots.schedule_time(slot))
            .max()
            .unwrap_or(0)
    }

    fn curve_shape(&self, base: SlotIndex) -> CurveShape {
        self.slots.shapes[base]
    }

    fn set_targets(&mut self, base: SlotIndex, width: usize, targets: &[Targets1f]) {
        for dim in 0..width {
            if let Some(targets) = pick(targets, dim) {
                self.slots.set_schedule(base + dim, targets);
            }
        }
    }

    fn set_target_with_shape(
        &mut self,
        base: SlotIndex,
        width: usize,
        target_values: &[f32],
        target_velocities: &[f32],
        shape: CurveShape,
    ) {
        for dim in 0..width {
            let Some(&value) = pick(target_values, dim) else {
                continue;
            };
            let velocity = pick(target_velocities, dim).copied().unwrap_or(0.0);
            let time = shape.travel_time(value - self.slots.values[base + dim]);
            self.slots.shapes[base + dim] = shape;
            self.slots
                .set_schedule(base + dim, &Targets1f::to(value, velocity, time));
        }
    }
}

/// Per-dimension descriptor lookup: exact entry, or a broadcast single.
fn pick<T>(entries: &[T], dim: usize) -> Option<&T> {
    match entries.len() {
        0 => None,
        1 => Some(&entries[0]),
        _ => entries.get(dim),
    }
}
