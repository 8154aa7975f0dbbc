//! The scalar-N face: processors driving one or more independent floats
//! per slot run.
//!
//! Readers are mandatory; drivers default to no-ops so generic client
//! code can probe several driving styles against whatever backend a
//! motivator happens to use. A driver the algorithm cannot honor is
//! silently ignored, never an abort.

use std::rc::Rc;

use crate::api::playback::SplinePlayback;
use crate::api::targets::{CurveShape, Targets1f};
use crate::api::AnimTime;
use crate::core::index_allocator::SlotIndex;
use crate::core::processor::Processor;
use crate::spline::CompactSpline;

pub trait ScalarProcessor: Processor {
    // ---- readers ---------------------------------------------------------

    /// Current values of the run's dimensions, one float per slot.
    fn values(&self, base: SlotIndex) -> &[f32];

    /// Current rate of change per dimension, written to `out`.
    fn velocities(&self, base: SlotIndex, out: &mut [f32]);

    /// Direction of travel per dimension. Distinct from velocity only for
    /// algorithms with a notion of wrap-around (modular/angular values);
    /// everywhere else the default delegation applies.
    fn directions(&self, base: SlotIndex, out: &mut [f32]) {
        self.velocities(base, out);
    }

    /// Value each dimension is heading toward.
    fn target_values(&self, base: SlotIndex, out: &mut [f32]);

    /// Velocity each dimension should have on arrival.
    fn target_velocities(&self, base: SlotIndex, out: &mut [f32]);

    /// `target - value` per dimension.
    fn differences(&self, base: SlotIndex, out: &mut [f32]);

    /// Time until the last scheduled target across the first `width`
    /// dimensions is reached. 0 when idle.
    fn target_time(&self, base: SlotIndex, width: usize) -> AnimTime;

    /// Current playback position in spline-local time.
    fn spline_time(&self, _base: SlotIndex) -> AnimTime {
        0
    }

    /// The curve shape currently steering the run.
    fn curve_shape(&self, _base: SlotIndex) -> CurveShape {
        CurveShape::default()
    }

    // ---- drivers (defaulted: unsupported means no-op) --------------------

    /// Drive each dimension through a scheduled waypoint sequence.
    fn set_targets(&mut self, _base: SlotIndex, _width: usize, _targets: &[Targets1f]) {}

    /// Drive each dimension to a single target along an explicit shape.
    fn set_target_with_shape(
        &mut self,
        _base: SlotIndex,
        _width: usize,
        _target_values: &[f32],
        _target_velocities: &[f32],
        _shape: CurveShape,
    ) {
    }

    /// Drive each dimension by a precomputed spline.
    fn set_splines(
        &mut self,
        _base: SlotIndex,
        _width: usize,
        _splines: &[Rc<CompactSpline>],
        _playback: &SplinePlayback,
    ) {
    }

    /// Drive dimension `i` by `splines[i]` when present, else by
    /// `targets[i]`.
    fn set_splines_and_targets(
        &mut self,
        _base: SlotIndex,
        _width: usize,
        _splines: &[Option<Rc<CompactSpline>>],
        _targets: &[Targets1f],
        _playback: &SplinePlayback,
    ) {
    }

    /// Jump spline playback to `time`.
    fn set_spline_time(&mut self, _base: SlotIndex, _width: usize, _time: AnimTime) {}

    /// Change spline playback rate.
    fn set_spline_playback_rate(&mut self, _base: SlotIndex, _width: usize, _rate: f32) {}

    // ---- width-1 conveniences --------------------------------------------

    fn value(&self, base: SlotIndex) -> f32 {
        self.values(base)[0]
    }

    fn velocity(&self, base: SlotIndex) -> f32 {
        let mut out = [0.0];
        self.velocities(base, &mut out);
        out[0]
    }

    fn direction(&self, base: SlotIndex) -> f32 {
        let mut out = [0.0];
        self.directions(base, &mut out);
        out[0]
    }

    fn target_value(&self, base: SlotIndex) -> f32 {
        let mut out = [0.0];
        self.target_values(base, &mut out);
        out[0]
    }

    fn target_velocity(&self, base: SlotIndex) -> f32 {
        let mut out = [0.0];
        self.target_velocities(base, &mut out);
        out[0]
    }

    fn difference(&self, base: SlotIndex) -> f32 {
        let mut out = [0.0];
        self.differences(base, &mut out);
        out[0]
    }
}
