//! The matrix face: processors composing a 4x4 transform per slot from an
//! ordered sequence of scalar-driven operations.
//!
//! Animated operations are driven by nested width-1 scalar motivators in
//! a lower-priority processor, which is why matrix processors always run
//! after the scalar processors they observe. Drivers that create or
//! retarget those children take the engine so they can reach the child's
//! pool.

use glam::Mat4;

use crate::api::motivator::Motivator;
use crate::api::ops::MatrixOp;
use crate::api::playback::SplinePlayback;
use crate::api::targets::Targets1f;
use crate::core::engine::AnimEngine;
use crate::core::index_allocator::SlotIndex;
use crate::core::processor::Processor;

pub trait MatrixProcessor: Processor {
    /// The composed transform, as of the last advance.
    fn value(&self, base: SlotIndex) -> Mat4;

    /// Number of operations in the composition.
    fn child_count(&self, base: SlotIndex) -> usize;

    /// Current scalar values of operations `child_start ..`, written to
    /// `out`.
    fn child_values(&self, base: SlotIndex, child_start: usize, out: &mut [f32]);

    /// The nested scalar-1 motivator driving operation `child`, or `None`
    /// when the operation is a plain constant.
    fn child_motivator(&self, _base: SlotIndex, _child: usize) -> Option<&Motivator> {
        None
    }

    /// Retarget one operation through a waypoint schedule.
    fn set_child_target(
        &mut self,
        _base: SlotIndex,
        _child: usize,
        _target: &Targets1f,
        _engine: &AnimEngine,
    ) {
    }

    /// Snap operations `child_start ..` to the given values.
    fn set_child_values(
        &mut self,
        _base: SlotIndex,
        _child_start: usize,
        _values: &[f32],
        _engine: &AnimEngine,
    ) {
    }

    /// Smoothly retarget the whole composition to a new operation
    /// sequence.
    fn blend_to_ops(
        &mut self,
        _base: SlotIndex,
        _ops: &[MatrixOp],
        _playback: &SplinePlayback,
        _engine: &AnimEngine,
    ) {
    }

    /// Change playback rate for every spline-driven operation of the run.
    fn set_playback_rate(&mut self, _base: SlotIndex, _rate: f32, _engine: &AnimEngine) {}
}
