//! 4x4 transform composition driven by scalar children.
//!
//! Each slot composes a matrix from an ordered operation list. Constant
//! operations stay inline; animated operations own a nested width-1
//! scalar motivator (spline ops in the smooth pool, retargeted ops in the
//! linear pool). The engine advances those pools first, since this
//! processor carries a higher priority, so a composition always reads
//! same-frame-fresh child values.

use std::cell::RefCell;
use std::rc::Rc;

use glam::{Mat4, Vec3};
use log::warn;
use smallvec::SmallVec;

use crate::api::init::{MotivatorKind, ProcessorInit};
use crate::api::motivator::{Motivator, MotivatorLink};
use crate::api::ops::{MatrixOp, MatrixOpKind, MatrixOpList, MatrixOpValue};
use crate::api::playback::SplinePlayback;
use crate::api::targets::{CurveShape, Targets1f};
use crate::api::AnimTime;
use crate::core::engine::{register_processor_kind, AnimEngine, EngineError};
use crate::core::index_allocator::{SlotIndex, SlotRange};
use crate::core::matrix::MatrixProcessor;
use crate::core::processor::{Processor, ProcessorCore, SlotState};
use crate::processors::linear::LinearInit;
use crate::processors::smooth::SmoothInit;

/// Init descriptor for the transform backend. Always width 1.
#[derive(Debug, Clone, Default)]
pub struct TransformInit {
    pub ops: MatrixOpList,
    /// Playback for the spline-driven operations.
    pub playback: SplinePlayback,
}

impl TransformInit {
    pub const KIND: MotivatorKind = MotivatorKind::new("transform");

    pub fn new(ops: MatrixOpList) -> Self {
        Self {
            ops,
            playback: SplinePlayback::default(),
        }
    }

    pub fn with_playback(mut self, playback: SplinePlayback) -> Self {
        self.playback = playback;
        self
    }
}

impl ProcessorInit for TransformInit {
    fn kind(&self) -> MotivatorKind {
        Self::KIND
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// What currently drives one operation.
#[derive(Debug)]
enum OpDrive {
    Constant(f32),
    /// Nested width-1 scalar motivator.
    Child(Motivator),
}

/// One operation of a composition at runtime.
#[derive(Debug)]
struct OpInstance {
    kind: MatrixOpKind,
    drive: OpDrive,
    /// Scalar value as of the last advance; what readers see.
    cached: f32,
}

impl OpInstance {
    fn matrix(&self) -> Mat4 {
        op_matrix(self.kind, self.cached)
    }
}

fn op_matrix(kind: MatrixOpKind, value: f32) -> Mat4 {
    match kind {
        MatrixOpKind::TranslateX => Mat4::from_translation(Vec3::new(value, 0.0, 0.0)),
        MatrixOpKind::TranslateY => Mat4::from_translation(Vec3::new(0.0, value, 0.0)),
        MatrixOpKind::TranslateZ => Mat4::from_translation(Vec3::new(0.0, 0.0, value)),
        MatrixOpKind::RotateAboutX => Mat4::from_rotation_x(value),
        MatrixOpKind::RotateAboutY => Mat4::from_rotation_y(value),
        MatrixOpKind::RotateAboutZ => Mat4::from_rotation_z(value),
        MatrixOpKind::ScaleX => Mat4::from_scale(Vec3::new(value, 1.0, 1.0)),
        MatrixOpKind::ScaleY => Mat4::from_scale(Vec3::new(1.0, value, 1.0)),
        MatrixOpKind::ScaleZ => Mat4::from_scale(Vec3::new(1.0, 1.0, value)),
        MatrixOpKind::ScaleUniformly => Mat4::from_scale(Vec3::splat(value)),
    }
}

#[derive(Debug, Default)]
struct TransformSlots {
    matrices: Vec<Mat4>,
    ops: Vec<SmallVec<[OpInstance; 8]>>,
    rates: Vec<f32>,
}

impl SlotState for TransformSlots {
    fn len(&self) -> usize {
        self.matrices.len()
    }

    fn set_slot_count(&mut self, count: usize) {
        self.matrices.resize(count, Mat4::IDENTITY);
        self.ops.resize_with(count, SmallVec::new);
        self.rates.resize(count, 1.0);
    }

    fn move_slots(&mut self, src: SlotRange, dst: SlotIndex) {
        self.matrices.copy_within(src.base..src.end(), dst);
        for offset in 0..src.width {
            self.ops[dst + offset] = std::mem::take(&mut self.ops[src.base + offset]);
        }
        self.rates.copy_within(src.base..src.end(), dst);
    }

    fn remove_slots(&mut self, base: SlotIndex, width: usize) {
        for slot in base..base + width {
            // Dropping the ops drops the child motivators; their pools
            // sweep the runs on the next frame.
            self.ops[slot].clear();
            self.matrices[slot] = Mat4::IDENTITY;
            self.rates[slot] = 1.0;
        }
    }
}

impl TransformSlots {
    fn compose(&mut self, slot: SlotIndex, engine: &AnimEngine) {
        let mut matrix = Mat4::IDENTITY;
        for op in &mut self.ops[slot] {
            if let OpDrive::Child(child) = &op.drive {
                if let Some(value) = engine.scalar_value(child) {
                    op.cached = value;
                }
            }
            matrix *= op.matrix();
        }
        self.matrices[slot] = matrix;
    }
}

/// Build the runtime drive for a described operation, spawning a nested
/// child for animated values.
fn build_op(
    op: &MatrixOp,
    playback: &SplinePlayback,
    engine: &AnimEngine,
) -> Result<OpInstance, EngineError> {
    match &op.value {
        MatrixOpValue::Constant(value) => Ok(OpInstance {
            kind: op.kind,
            drive: OpDrive::Constant(*value),
            cached: *value,
        }),
        MatrixOpValue::Spline(spline) => {
            let mut child = Motivator::new();
            let init = SmoothInit::new()
                .with_splines(std::slice::from_ref(spline))
                .with_playback(*playback);
            engine.initialize_motivator(&init, &mut child, 1)?;
            let cached = engine.scalar_value(&child).unwrap_or(0.0);
            Ok(OpInstance {
                kind: op.kind,
                drive: OpDrive::Child(child),
                cached,
            })
        }
    }
}

/// Swap one operation's drive to a linear child so it can follow a
/// waypoint schedule, keeping the current value as the starting point.
fn retarget_through_linear(
    op: &mut OpInstance,
    targets: &Targets1f,
    engine: &AnimEngine,
) {
    match &op.drive {
        OpDrive::Child(child) if child.kind() == Some(LinearInit::KIND) => {
            engine.with_scalar_mut(child, |scalar, base| {
                scalar.set_targets(base, 1, std::slice::from_ref(targets));
            });
        }
        OpDrive::Child(child) if child.kind() == Some(SmoothInit::KIND) => {
            engine.with_scalar_mut(child, |scalar, base| {
                scalar.set_splines_and_targets(
                    base,
                    1,
                    &[None],
                    std::slice::from_ref(targets),
                    &SplinePlayback::default(),
                );
            });
        }
        _ => {
            let mut child = Motivator::new();
            let init = LinearInit::new()
                .with_start(&[op.cached])
                .with_targets(std::slice::from_ref(targets));
            match engine.initialize_motivator(&init, &mut child, 1) {
                Ok(()) => op.drive = OpDrive::Child(child),
                Err(err) => warn!("could not retarget matrix op: {err}"),
            }
        }
    }
}

/// Pool of composed-matrix motivators.
pub struct TransformProcessor {
    core: ProcessorCore,
    slots: TransformSlots,
}

impl TransformProcessor {
    pub fn new() -> Self {
        Self {
            core: ProcessorCore::new(TransformInit::KIND),
            slots: TransformSlots::default(),
        }
    }

    /// Register this backend's factory process-wide, along with the
    /// scalar backends its children live in.
    pub fn register() -> bool {
        crate::processors::linear::LinearProcessor::register();
        crate::processors::smooth::SmoothProcessor::register();
        register_processor_kind(TransformInit::KIND, || {
            Rc::new(RefCell::new(TransformProcessor::new()))
        })
    }
}

impl Default for TransformProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor for TransformProcessor {
    fn kind(&self) -> MotivatorKind {
        TransformInit::KIND
    }

    fn priority(&self) -> i32 {
        1
    }

    fn core(&self) -> &ProcessorCore {
        &self.core
    }

    fn initialize(
        &mut self,
        init: &dyn ProcessorInit,
        link: MotivatorLink,
        width: usize,
        engine: &AnimEngine,
    ) -> Result<(), EngineError> {
        let init = init
            .as_any()
            .downcast_ref::<TransformInit>()
            .ok_or(EngineError::InitMismatch {
                expected: TransformInit::KIND,
                found: init.kind(),
            })?;
        debug_assert_eq!(width, 1, "transform motivators are width 1");
        let base = self.core.insert(link, width, &mut self.slots);

        let mut ops = SmallVec::with_capacity(init.ops.len());
        for op in &init.ops {
            ops.push(build_op(op, &init.playback, engine)?);
        }
        self.slots.ops[base] = ops;
        self.slots.rates[base] = init.playback.rate;
        self.slots.compose(base, engine);
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

    fn advance(&mut self, _delta: AnimTime, engine: &AnimEngine) {
        if engine.config().sweep_abandoned {
            self.core.sweep_abandoned(&mut self.slots);
        }
        if engine.config().auto_defragment {
            self.core.defragment(&mut self.slots);
        }
        // The children carry all time dependence; composition just reads
        // their already-advanced values.
        let Self { core, slots } = self;
        for run in core.live_runs() {
            slots.compose(run.base, engine);
        }
    }

    fn verify(&self) {
        self.core.verify_integrity(self.slots.len());
    }

    fn as_matrix(&self) -> Option<&dyn MatrixProcessor> {
        Some(self)
    }

    fn as_matrix_mut(&mut self) -> Option<&mut dyn MatrixProcessor> {
        Some(self)
    }
}

impl MatrixProcessor for TransformProcessor {
    fn value(&self, base: SlotIndex) -> Mat4 {
        self.slots.matrices[base]
    }

    fn child_count(&self, base: SlotIndex) -> usize {
        self.slots.ops[base].len()
    }

    fn child_values(&self, base: SlotIndex, child_start: usize, out: &mut [f32]) {
        for (offset, out) in out.iter_mut().enumerate() {
            *out = self.slots.ops[base]
                .get(child_start + offset)
                .map_or(0.0, |op| op.cached);
        }
    }

    fn child_motivator(&self, base: SlotIndex, child: usize) -> Option<&Motivator> {
        match &self.slots.ops[base].get(child)?.drive {
            OpDrive::Child(motivator) => Some(motivator),
            OpDrive::Constant(_) => None,
        }
    }

    fn set_child_target(
        &mut self,
        base: SlotIndex,
        child: usize,
        target: &Targets1f,
        engine: &AnimEngine,
    ) {
        let Some(op) = self.slots.ops[base].get_mut(child) else {
            return;
        };
        retarget_through_linear(op, target, engine);
    }

    fn set_child_values(
        &mut self,
        base: SlotIndex,
        child_start: usize,
        values: &[f32],
        engine: &AnimEngine,
    ) {
        for (offset, &value) in values.iter().enumerate() {
            let Some(op) = self.slots.ops[base].get_mut(child_start + offset) else {
                break;
            };
            match &op.drive {
                OpDrive::Constant(_) => op.drive = OpDrive::Constant(value),
                OpDrive::Child(child) => {
                    // Snap the child: zero travel time.
                    engine.with_scalar_mut(child, |scalar, base| {
                        scalar.set_target_with_shape(
                            base,
                            1,
                            &[value],
                            &[0.0],
                            CurveShape::default(),
                        );
                    });
                }
            }
            op.cached = value;
        }
        self.slots.compose(base, engine);
    }

    fn blend_to_ops(
        &mut self,
        base: SlotIndex,
        ops: &[MatrixOp],
        playback: &SplinePlayback,
        engine: &AnimEngine,
    ) {
        let old = std::mem::take(&mut self.slots.ops[base]);
        let mut new_ops: SmallVec<[OpInstance; 8]> = SmallVec::with_capacity(ops.len());

        for (index, op) in ops.iter().enumerate() {
            // The blend starts from the matching old operation's value, or
            // from the op kind's identity when the shape changed.
            let start = old
                .get(index)
                .filter(|previous| previous.kind == op.kind)
                .map_or(op.kind.identity_value(), |previous| previous.cached);

            match &op.value {
                MatrixOpValue::Constant(value) if playback.blend_time > 0 => {
                    let mut instance = OpInstance {
                        kind: op.kind,
                        drive: OpDrive::Constant(start),
                        cached: start,
                    };
                    retarget_through_linear(
                        &mut instance,
                        &Targets1f::to(*value, 0.0, playback.blend_time),
                        engine,
                    );
                    new_ops.push(instance);
                }
                _ => match build_op(op, playback, engine) {
                    Ok(instance) => new_ops.push(instance),
                    Err(err) => warn!("dropping matrix op {index} in blend: {err}"),
                },
            }
        }

        // Old children drop here; their pools sweep the runs next frame.
        drop(old);
        self.slots.ops[base] = new_ops;
        self.slots.rates[base] = playback.rate;
        self.slots.compose(base, engine);
    }

    fn set_playback_rate(&mut self, base: SlotIndex, rate: f32, engine: &AnimEngine) {
        self.slots.rates[base] = rate;
        for op in &self.slots.ops[base] {
            if let OpDrive::Child(child) = &op.drive {
                if child.kind() == Some(SmoothInit::KIND) {
                    engine.with_scalar_mut(child, |scalar, base| {
                        scalar.set_spline_playback_rate(base, 1, rate);
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    use crate::spline::{CompactSpline, SplineNode};

    fn engine() -> AnimEngine {
        TransformProcessor::register();
        AnimEngine::new()
    }

    fn ramp() -> Rc<CompactSpline> {
        Rc::new(
            CompactSpline::from_nodes(vec![
                SplineNode::new(0.0, 0.0, 1.0),
                SplineNode::new(10.0, 10.0, 1.0),
            ])
            .unwrap(),
        )
    }

    #[test]
    fn test_constant_composition() {
        let engine = engine();
        let mut m = Motivator::new();
        let init = TransformInit::new(smallvec![
            MatrixOp::constant(MatrixOpKind::TranslateX, 3.0),
            MatrixOp::constant(MatrixOpKind::ScaleUniformly, 2.0),
        ]);
        engine.initialize_motivator(&init, &mut m, 1).unwrap();

        let matrix = engine.matrix_value(&m).unwrap();
        let expected =
            Mat4::from_translation(Vec3::new(3.0, 0.0, 0.0)) * Mat4::from_scale(Vec3::splat(2.0));
        assert!(matrix.abs_diff_eq(expected, 1e-5));

        let count = engine.with_matrix(&m, |p, base| p.child_count(base)).unwrap();
        assert_eq!(count, 2);
        let has_child = engine
            .with_matrix(&m, |p, base| p.child_motivator(base, 0).is_some())
            .unwrap();
        assert!(!has_child, "constant ops have no nested motivator");
    }

    #[test]
    fn test_spline_op_spawns_child_and_tracks_it() {
        let engine = engine();
        let mut m = Motivator::new();
        let init = TransformInit::new(smallvec![MatrixOp::spline(
            MatrixOpKind::TranslateY,
            ramp()
        )]);
        engine.initialize_motivator(&init, &mut m, 1).unwrap();

        let has_child = engine
            .with_matrix(&m, |p, base| p.child_motivator(base, 0).is_some())
            .unwrap();
        assert!(has_child);

        engine.advance_frame(4);
        let matrix = engine.matrix_value(&m).unwrap();
        let y = matrix.w_axis.y;
        assert!((y - 4.0).abs() < 1e-3, "translation y was {y}");
    }

    #[test]
    fn test_matrix_reads_same_frame_scalar_output() {
        // The child advances before the composition in the same frame.
        let engine = engine();
        let mut m = Motivator::new();
        let init = TransformInit::new(smallvec![MatrixOp::constant(
            MatrixOpKind::TranslateX,
            0.0
        )]);
        engine.initialize_motivator(&init, &mut m, 1).unwrap();

        engine.with_matrix_mut(&m, |p, base| {
            p.set_child_target(base, 0, &Targets1f::to(1.0, 0.0, 1), &engine);
        });
        engine.advance_frame(1);

        let x = engine.matrix_value(&m).unwrap().w_axis.x;
        assert!((x - 1.0).abs() < 1e-4, "translation x was {x}");
        let mut child_value = [0.0];
        engine.with_matrix(&m, |p, base| p.child_values(base, 0, &mut child_value));
        assert!((child_value[0] - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_set_child_values_snaps() {
        let engine = engine();
        let mut m = Motivator::new();
        let init = TransformInit::new(smallvec![
            MatrixOp::constant(MatrixOpKind::TranslateX, 1.0),
            MatrixOp::constant(MatrixOpKind::TranslateY, 2.0),
        ]);
        engine.initialize_motivator(&init, &mut m, 1).unwrap();

        engine.with_matrix_mut(&m, |p, base| {
            p.set_child_values(base, 0, &[5.0, 6.0], &engine);
        });
        let matrix = engine.matrix_value(&m).unwrap();
        assert!((matrix.w_axis.x - 5.0).abs() < 1e-5);
        assert!((matrix.w_axis.y - 6.0).abs() < 1e-5);
    }

    #[test]
    fn test_blend_to_ops_travels_to_new_constants() {
        let engine = engine();
        let mut m = Motivator::new();
        let init = TransformInit::new(smallvec![MatrixOp::constant(
            MatrixOpKind::TranslateX,
            0.0
        )]);
        engine.initialize_motivator(&init, &mut m, 1).unwrap();

        let target: MatrixOpList = smallvec![MatrixOp::constant(MatrixOpKind::TranslateX, 10.0)];
        engine.with_matrix_mut(&m, |p, base| {
            p.blend_to_ops(
                base,
                &target,
                &SplinePlayback::new().with_blend_time(10),
                &engine,
            );
        });

        engine.advance_frame(5);
        let x = engine.matrix_value(&m).unwrap().w_axis.x;
        assert!((x - 5.0).abs() < 1e-3, "translation x was {x}");

        engine.advance_frame(5);
        let x = engine.matrix_value(&m).unwrap().w_axis.x;
        assert!((x - 10.0).abs() < 1e-3, "translation x was {x}");
    }
}
