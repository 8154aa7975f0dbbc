//! Spline-driven scalar driving.
//!
//! Each dimension plays back a compact spline: value and velocity come
//! from sampling the curve at a per-dimension playback position that
//! advances with engine time, scaled by a rate and optionally looping.
//! Target drivers are not implemented here; callers that want waypoint
//! schedules on a spline-driven dimension go through
//! `set_splines_and_targets`, which synthesizes a curve.

use std::rc::Rc;

use crate::api::init::{MotivatorKind, ProcessorInit};
use crate::api::motivator::MotivatorLink;
use crate::api::playback::SplinePlayback;
use crate::api::targets::Targets1f;
use crate::api::AnimTime;
use crate::core::engine::{register_processor_kind, AnimEngine, EngineError};
use crate::core::index_allocator::{SlotIndex, SlotRange};
use crate::core::processor::{Processor, ProcessorCore, SlotState};
use crate::core::scalar::ScalarProcessor;
use crate::spline::{CompactSpline, SplineNode};

/// Init descriptor for the spline backend.
#[derive(Debug, Clone, Default)]
pub struct SmoothInit {
    /// Spline per dimension. One entry broadcasts across the run; empty
    /// starts every dimension idle.
    pub splines: Vec<Rc<CompactSpline>>,
    pub playback: SplinePlayback,
}

impl SmoothInit {
    pub const KIND: MotivatorKind = MotivatorKind::new("smooth");

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_splines(mut self, splines: &[Rc<CompactSpline>]) -> Self {
        self.splines = splines.to_vec();
        self
    }

    pub fn with_playback(mut self, playback: SplinePlayback) -> Self {
        self.playback = playback;
        self
    }
}

impl ProcessorInit for SmoothInit {
    fn kind(&self) -> MotivatorKind {
        Self::KIND
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

#[derive(Debug, Default)]
struct SmoothSlots {
    values: Vec<f32>,
    velocities: Vec<f32>,
    splines: Vec<Option<Rc<CompactSpline>>>,
    /// Spline-local playback position per dimension.
    times: Vec<f32>,
    rates: Vec<f32>,
    looping: Vec<bool>,
}

impl SlotState for SmoothSlots {
    fn len(&self) -> usize {
        self.values.len()
    }

    fn set_slot_count(&mut self, count: usize) {
        self.values.resize(count, 0.0);
        self.velocities.resize(count, 0.0);
        self.splines.resize(count, None);
        self.times.resize(count, 0.0);
        self.rates.resize(count, 1.0);
        self.looping.resize(count, false);
    }

    fn move_slots(&mut self, src: SlotRange, dst: SlotIndex) {
        self.values.copy_within(src.base..src.end(), dst);
        self.velocities.copy_within(src.base..src.end(), dst);
        for offset in 0..src.width {
            self.splines[dst + offset] = self.splines[src.base + offset].take();
        }
        self.times.copy_within(src.base..src.end(), dst);
        self.rates.copy_within(src.base..src.end(), dst);
        for offset in 0..src.width {
            self.looping[dst + offset] = self.looping[src.base + offset];
        }
    }

    fn remove_slots(&mut self, base: SlotIndex, width: usize) {
        for slot in base..base + width {
            self.splines[slot] = None;
            self.times[slot] = 0.0;
            self.rates[slot] = 1.0;
            self.looping[slot] = false;
            #[cfg(feature = "debug")]
            {
                self.values[slot] = f32::NAN;
                self.velocities[slot] = f32::NAN;
            }
        }
    }
}

impl SmoothSlots {
    fn attach_spline(&mut self, slot: SlotIndex, spline: Rc<CompactSpline>, playback: &SplinePlayback) {
        self.times[slot] = spline.start_time() + playback.start_time;
        self.rates[slot] = playback.rate;
        self.looping[slot] = playback.looping;
        let (value, derivative) = spline.sample(self.times[slot]);
        self.values[slot] = value;
        self.velocities[slot] = derivative * playback.rate;
        self.splines[slot] = Some(spline);
    }

    /// Resample one dimension after its playback position moved by
    /// `delta` engine-time units.
    fn advance_slot(&mut self, slot: SlotIndex, delta: AnimTime) {
        let Some(spline) = &self.splines[slot] else {
            self.velocities[slot] = 0.0;
            return;
        };
        let mut t = self.times[slot] + delta as f32 * self.rates[slot];
        let start = spline.start_time();
        let end = spline.end_time();
        if self.looping[slot] && end > start {
            t = start + (t - start).rem_euclid(end - start);
        } else {
            t = t.clamp(start, end);
        }
        self.times[slot] = t;
        let (value, derivative) = spline.sample(t);
        self.values[slot] = value;
        self.velocities[slot] = derivative * self.rates[slot];
    }

    /// Engine time until the spline's end at the current rate. Looping
    /// dimensions report the time to the end of the current pass.
    fn time_to_end(&self, slot: SlotIndex) -> AnimTime {
        let Some(spline) = &self.splines[slot] else {
            return 0;
        };
        let rate = self.rates[slot];
        if rate <= 0.0 {
            return 0;
        }
        (((spline.end_time() - self.times[slot]) / rate).max(0.0)).round() as AnimTime
    }
}

/// Pool of spline-driven scalar motivators.
pub struct SmoothProcessor {
    core: ProcessorCore,
    slots: SmoothSlots,
}

impl SmoothProcessor {
    pub fn new() -> Self {
        Self {
            core: ProcessorCore::new(SmoothInit::KIND),
            slots: SmoothSlots::default(),
        }
    }

    /// Register this backend's factory process-wide.
    pub fn register() -> bool {
        register_processor_kind(SmoothInit::KIND, || {
            std::rc::Rc::new(std::cell::RefCell::new(SmoothProcessor::new()))
        })
    }

    /// Build a curve realizing a waypoint schedule that starts at the
    /// dimension's current value and velocity.
    fn synthesize_spline(&self, slot: SlotIndex, targets: &Targets1f) -> Option<Rc<CompactSpline>> {
        if targets.is_empty() {
            return None;
        }
        let mut nodes = vec![SplineNode::new(
            0.0,
            self.slots.values[slot],
            self.slots.velocities[slot],
        )];
        let mut time = 0.0;
        for waypoint in targets.waypoints() {
            time += waypoint.time.max(1) as f32;
            nodes.push(SplineNode::new(time, waypoint.value, waypoint.velocity));
        }
        CompactSpline::from_nodes(nodes).ok().map(Rc::new)
    }
}

impl Default for SmoothProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor for SmoothProcessor {
    fn kind(&self) -> MotivatorKind {
        SmoothInit::KIND
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
            .downcast_ref::<SmoothInit>()
            .ok_or(EngineError::InitMismatch {
                expected: SmoothInit::KIND,
                found: init.kind(),
            })?;
        let base = self.core.insert(link, width, &mut self.slots);
        for dim in 0..width {
            self.slots.values[base + dim] = 0.0;
            self.slots.velocities[base + dim] = 0.0;
            let spline = match init.splines.len() {
                0 => None,
                1 => Some(init.splines[0].clone()),
                _ => init.splines.get(dim).cloned(),
            };
            if let Some(spline) = spline {
                self.slots.attach_spline(base + dim, spline, &init.playback);
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

impl ScalarProcessor for SmoothProcessor {
    fn values(&self, base: SlotIndex) -> &[f32] {
        let width = self.core.dimensions(base);
        &self.slots.values[base..base + width]
    }

    fn velocities(&self, base: SlotIndex, out: &mut [f32]) {
        out.copy_from_slice(&self.slots.velocities[base..base + out.len()]);
    }

    fn target_values(&self, base: SlotIndex, out: &mut [f32]) {
        for (dim, out) in out.iter_mut().enumerate() {
            *out = match &self.slots.splines[base + dim] {
                Some(spline) => spline.end_value(),
                None => self.slots.values[base + dim],
            };
        }
    }

    fn target_velocities(&self, base: SlotIndex, out: &mut [f32]) {
        for (dim, out) in out.iter_mut().enumerate() {
            *out = match &self.slots.splines[base + dim] {
                Some(spline) => spline.end_derivative() * self.slots.rates[base + dim],
                None => 0.0,
            };
        }
    }

    fn differences(&self, base: SlotIndex, out: &mut [f32]) {
        self.target_values(base, out);
        for (dim, out) in out.iter_mut().enumerate() {
            *out -= self.slots.values[base + dim];
        }
    }

    fn target_time(&self, base: SlotIndex, width: usize) -> AnimTime {
        (base..base + width)
            .map(|slot| self.slots.time_to_end(slot))
            .max()
            .unwrap_or(0)
    }

    fn spline_time(&self, base: SlotIndex) -> AnimTime {
        self.slots.times[base].round() as AnimTime
    }

    fn set_splines(
        &mut self,
        base: SlotIndex,
        width: usize,
        splines: &[Rc<CompactSpline>],
        playback: &SplinePlayback,
    ) {
        for dim in 0..width {
            let spline = match splines.len() {
                0 => None,
                1 => Some(splines[0].clone()),
                _ => splines.get(dim).cloned(),
            };
            if let Some(spline) = spline {
                self.slots.attach_spline(base + dim, spline, playback);
            }
        }
    }

    fn set_splines_and_targets(
        &mut self,
        base: SlotIndex,
        width: usize,
        splines: &[Option<Rc<CompactSpline>>],
        targets: &[Targets1f],
        playback: &SplinePlayback,
    ) {
        for dim in 0..width {
            let explicit = splines.get(dim).cloned().flatten();
            let scheduled = match targets.len() {
                0 => None,
                1 => targets.first(),
                _ => targets.get(dim),
            };
            let spline = match explicit {
                Some(spline) => Some(spline),
                None => scheduled.and_then(|t| self.synthesize_spline(base + dim, t)),
            };
            if let Some(spline) = spline {
                // Synthesized curves always begin at the dimension's
                // current state, so playback starts at their origin.
                let playback = SplinePlayback {
                    start_time: 0.0,
                    ..*playback
                };
                self.slots.attach_spline(base + dim, spline, &playback);
            }
        }
    }

    fn set_spline_time(&mut self, base: SlotIndex, width: usize, time: AnimTime) {
        for slot in base..base + width {
            self.slots.times[slot] = time as f32;
            self.slots.advance_slot(slot, 0);
        }
    }

    fn set_spline_playback_rate(&mut self, base: SlotIndex, width: usize, rate: f32) {
        for slot in base..base + width {
            self.slots.rates[slot] = rate;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::motivator::Motivator;

    fn engine() -> AnimEngine {
        SmoothProcessor::register();
        AnimEngine::new()
    }

    fn ramp() -> Rc<CompactSpline> {
        // Straight line 0 -> 10 over 10 time units.
        Rc::new(
            CompactSpline::from_nodes(vec![
                SplineNode::new(0.0, 0.0, 1.0),
                SplineNode::new(10.0, 10.0, 1.0),
            ])
            .unwrap(),
        )
    }

    #[test]
    fn test_playback_tracks_spline() {
        let engine = engine();
        let mut m = Motivator::new();
        let init = SmoothInit::new().with_splines(&[ramp()]);
        engine.initialize_motivator(&init, &mut m, 1).unwrap();

        engine.advance_frame(4);
        let value = engine.scalar_value(&m).unwrap();
        assert!((value - 4.0).abs() < 1e-3, "value was {value}");

        let time = engine
            .with_scalar(&m, |s, base| s.spline_time(base))
            .unwrap();
        assert_eq!(time, 4);
        let remaining = engine
            .with_scalar(&m, |s, base| s.target_time(base, 1))
            .unwrap();
        assert_eq!(remaining, 6);
    }

    #[test]
    fn test_playback_rate_scales_time() {
        let engine = engine();
        let mut m = Motivator::new();
        let init = SmoothInit::new()
            .with_splines(&[ramp()])
            .with_playback(SplinePlayback::new().with_rate(2.0));
        engine.initialize_motivator(&init, &mut m, 1).unwrap();

        engine.advance_frame(3);
        let value = engine.scalar_value(&m).unwrap();
        assert!((value - 6.0).abs() < 1e-3, "value was {value}");
        let velocity = engine
            .with_scalar(&m, |s, base| s.velocity(base))
            .unwrap();
        assert!((velocity - 2.0).abs() < 1e-3);
    }

    #[test]
    fn test_non_looping_holds_last_value() {
        let engine = engine();
        let mut m = Motivator::new();
        engine
            .initialize_motivator(&SmoothInit::new().with_splines(&[ramp()]), &mut m, 1)
            .unwrap();

        engine.advance_frame(50);
        assert_eq!(engine.scalar_value(&m), Some(10.0));
        engine.advance_frame(5);
        assert_eq!(engine.scalar_value(&m), Some(10.0));
    }

    #[test]
    fn test_looping_wraps() {
        let engine = engine();
        let mut m = Motivator::new();
        let init = SmoothInit::new()
            .with_splines(&[ramp()])
            .with_playback(SplinePlayback::new().looping(true));
        engine.initialize_motivator(&init, &mut m, 1).unwrap();

        engine.advance_frame(13);
        let value = engine.scalar_value(&m).unwrap();
        assert!((value - 3.0).abs() < 1e-3, "value was {value}");
    }

    #[test]
    fn test_target_drivers_are_noops() {
        // The spline backend ignores waypoint drivers entirely.
        let engine = engine();
        let mut m = Motivator::new();
        engine
            .initialize_motivator(&SmoothInit::new().with_splines(&[ramp()]), &mut m, 1)
            .unwrap();
        engine.advance_frame(4);
        let before = engine.scalar_value(&m).unwrap();

        engine.with_scalar_mut(&m, |s, base| {
            s.set_targets(base, 1, &[Targets1f::to(-100.0, 0.0, 1)]);
        });
        assert_eq!(engine.scalar_value(&m), Some(before));

        engine.advance_frame(1);
        let after = engine.scalar_value(&m).unwrap();
        assert!((after - 5.0).abs() < 1e-3, "spline playback continued");
    }

    #[test]
    fn test_set_spline_time_jumps_playback() {
        let engine = engine();
        let mut m = Motivator::new();
        engine
            .initialize_motivator(&SmoothInit::new().with_splines(&[ramp()]), &mut m, 1)
            .unwrap();

        engine.with_scalar_mut(&m, |s, base| s.set_spline_time(base, 1, 8));
        let value = engine.scalar_value(&m).unwrap();
        assert!((value - 8.0).abs() < 1e-3, "value was {value}");
    }

    #[test]
    fn test_synthesized_schedule_reaches_waypoints() {
        let engine = engine();
        let mut m = Motivator::new();
        engine
            .initialize_motivator(&SmoothInit::new(), &mut m, 1)
            .unwrap();

        engine.with_scalar_mut(&m, |s, base| {
            s.set_splines_and_targets(
                base,
                1,
                &[None],
                &[Targets1f::to(6.0, 0.0, 6)],
                &SplinePlayback::new(),
            );
        });
        engine.advance_frame(6);
        let value = engine.scalar_value(&m).unwrap();
        assert!((value - 6.0).abs() < 1e-3, "value was {value}");
    }
}
