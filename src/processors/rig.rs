//! Skeletal animation: one nested transform motivator per bone.
//!
//! A rig slot owns a transform child for every bone of its defining
//! animation. Global transforms come from one forward pass over the
//! flattened bone array (parents precede children), multiplying each
//! bone's local matrix into its parent's global. The transform pool runs
//! earlier in the frame, so locals are always same-frame fresh.

use std::cell::RefCell;
use std::rc::Rc;

use glam::Mat4;
use log::warn;

use crate::api::init::{MotivatorKind, ProcessorInit};
use crate::api::motivator::{Motivator, MotivatorLink};
use crate::api::playback::SplinePlayback;
use crate::api::AnimTime;
use crate::core::engine::{register_processor_kind, AnimEngine, EngineError};
use crate::core::index_allocator::{SlotIndex, SlotRange};
use crate::core::processor::{Processor, ProcessorCore, SlotState};
use crate::core::rig::RigProcessor;
use crate::processors::transform::TransformInit;
use crate::rig_anim::RigAnim;

/// Init descriptor for the rig backend. Always width 1.
#[derive(Debug, Clone)]
pub struct RigInit {
    pub anim: Rc<RigAnim>,
    pub playback: SplinePlayback,
}

impl RigInit {
    pub const KIND: MotivatorKind = MotivatorKind::new("rig");

    pub fn new(anim: Rc<RigAnim>) -> Self {
        Self {
            anim,
            playback: SplinePlayback::default(),
        }
    }

    pub fn with_playback(mut self, playback: SplinePlayback) -> Self {
        self.playback = playback;
        self
    }
}

impl ProcessorInit for RigInit {
    fn kind(&self) -> MotivatorKind {
        Self::KIND
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

#[derive(Debug, Default)]
struct RigSlots {
    anims: Vec<Option<Rc<RigAnim>>>,
    /// One transform child per bone, in bone order.
    bones: Vec<Vec<Motivator>>,
    globals: Vec<Vec<Mat4>>,
    /// Engine-time playback position within the animation.
    times: Vec<AnimTime>,
    rates: Vec<f32>,
}

impl SlotState for RigSlots {
    fn len(&self) -> usize {
        self.anims.len()
    }

    fn set_slot_count(&mut self, count: usize) {
        self.anims.resize(count, None);
        self.bones.resize_with(count, Vec::new);
        self.globals.resize_with(count, Vec::new);
        self.times.resize(count, 0);
        self.rates.resize(count, 1.0);
    }

    fn move_slots(&mut self, src: SlotRange, dst: SlotIndex) {
        for offset in 0..src.width {
            self.anims[dst + offset] = self.anims[src.base + offset].take();
            self.bones[dst + offset] = std::mem::take(&mut self.bones[src.base + offset]);
            self.globals[dst + offset] = std::mem::take(&mut self.globals[src.base + offset]);
        }
        self.times.copy_within(src.base..src.end(), dst);
        self.rates.copy_within(src.base..src.end(), dst);
    }

    fn remove_slots(&mut self, base: SlotIndex, width: usize) {
        for slot in base..base + width {
            self.anims[slot] = None;
            // Dropped bone children are swept by the transform pool.
            self.bones[slot].clear();
            self.globals[slot].clear();
            self.times[slot] = 0;
            self.rates[slot] = 1.0;
        }
    }
}

impl RigSlots {
    /// Forward pass: bone locals into model-space globals.
    fn pose(&mut self, slot: SlotIndex, engine: &AnimEngine) {
        let Some(anim) = &self.anims[slot] else {
            return;
        };
        for (index, bone) in anim.bones().iter().enumerate() {
            let local = engine
                .matrix_value(&self.bones[slot][index])
                .unwrap_or(Mat4::IDENTITY);
            let global = match bone.parent {
                Some(parent) => self.globals[slot][parent] * local,
                None => local,
            };
            self.globals[slot][index] = global;
        }
    }
}

/// Pool of skeletal motivators.
pub struct RigAnimProcessor {
    core: ProcessorCore,
    slots: RigSlots,
}

impl RigAnimProcessor {
    pub fn new() -> Self {
        Self {
            core: ProcessorCore::new(RigInit::KIND),
            slots: RigSlots::default(),
        }
    }

    /// Register this backend's factory process-wide, along with the
    /// transform backend its bones live in.
    pub fn register() -> bool {
        crate::processors::transform::TransformProcessor::register();
        register_processor_kind(RigInit::KIND, || {
            Rc::new(RefCell::new(RigAnimProcessor::new()))
        })
    }
}

impl Default for RigAnimProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor for RigAnimProcessor {
    fn kind(&self) -> MotivatorKind {
        RigInit::KIND
    }

    fn priority(&self) -> i32 {
        2
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
            .downcast_ref::<RigInit>()
            .ok_or(EngineError::InitMismatch {
                expected: RigInit::KIND,
                found: init.kind(),
            })?;
        debug_assert_eq!(width, 1, "rig motivators are width 1");
        let base = self.core.insert(link, width, &mut self.slots);

        let mut bones = Vec::with_capacity(init.anim.bone_count());
        for bone in init.anim.bones() {
            let mut child = Motivator::new();
            let child_init =
                TransformInit::new(bone.ops.clone()).with_playback(init.playback);
            engine.initialize_motivator(&child_init, &mut child, 1)?;
            bones.push(child);
        }
        self.slots.bones[base] = bones;
        self.slots.globals[base] = vec![Mat4::IDENTITY; init.anim.bone_count()];
        self.slots.anims[base] = Some(init.anim.clone());
        self.slots.times[base] = init.playback.start_time.round() as AnimTime;
        self.slots.rates[base] = init.playback.rate;
        self.slots.pose(base, engine);
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
        let Self { core, slots } = self;
        for run in core.live_runs() {
            let slot = run.base;
            if let Some(anim) = &slots.anims[slot] {
                let scaled = (delta as f32 * slots.rates[slot]).round() as AnimTime;
                let mut time = slots.times[slot] + scaled;
                if anim.repeats() && anim.end_time() > 0 {
                    time = time.rem_euclid(anim.end_time());
                } else {
                    time = time.clamp(0, anim.end_time());
                }
                slots.times[slot] = time;
            }
            slots.pose(slot, engine);
        }
    }

    fn verify(&self) {
        self.core.verify_integrity(self.slots.len());
    }

    fn as_rig(&self) -> Option<&dyn RigProcessor> {
        Some(self)
    }

    fn as_rig_mut(&mut self) -> Option<&mut dyn RigProcessor> {
        Some(self)
    }
}

impl RigProcessor for RigAnimProcessor {
    fn global_transforms(&self, base: SlotIndex) -> &[Mat4] {
        &self.slots.globals[base]
    }

    fn time_remaining(&self, base: SlotIndex) -> AnimTime {
        match &self.slots.anims[base] {
            Some(anim) => (anim.end_time() - self.slots.times[base]).max(0),
            None => 0,
        }
    }

    fn defining_anim(&self, base: SlotIndex) -> &Rc<RigAnim> {
        self.slots.anims[base]
            .as_ref()
            .expect("rig slot not initialized")
    }

    fn blend_to_anim(
        &mut self,
        base: SlotIndex,
        anim: &Rc<RigAnim>,
        playback: &SplinePlayback,
        engine: &AnimEngine,
    ) {
        let defining = self.defining_anim(base);
        if anim.bone_count() != defining.bone_count() {
            debug_assert!(
                false,
                "blend target has {} bones, defining animation has {}",
                anim.bone_count(),
                defining.bone_count()
            );
            warn!("ignoring blend to an animation with a different skeleton");
            return;
        }
        for (index, bone) in anim.bones().iter().enumerate() {
            let child = &self.slots.bones[base][index];
            engine.with_matrix_mut(child, |matrix, child_base| {
                matrix.blend_to_ops(child_base, &bone.ops, playback, engine);
            });
        }
        self.slots.times[base] = playback.start_time.round() as AnimTime;
        self.slots.rates[base] = playback.rate;
        self.slots.pose(base, engine);
    }

    fn set_playback_rate(&mut self, base: SlotIndex, rate: f32, engine: &AnimEngine) {
        self.slots.rates[base] = rate;
        for child in &self.slots.bones[base] {
            engine.with_matrix_mut(child, |matrix, child_base| {
                matrix.set_playback_rate(child_base, rate, engine);
            });
        }
    }

    fn csv_header(&self, base: SlotIndex) -> String {
        match &self.slots.anims[base] {
            Some(anim) => {
                let names: Vec<&str> = anim.bones().iter().map(|b| b.name.as_str()).collect();
                names.join(",")
            }
            None => String::new(),
        }
    }

    fn csv_values(&self, base: SlotIndex) -> String {
        self.slots.globals[base]
            .iter()
            .map(|m| {
                let t = m.w_axis;
                format!("{:.3};{:.3};{:.3}", t.x, t.y, t.z)
            })
            .collect::<Vec<_>>()
            .join(",")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    use crate::api::ops::{MatrixOp, MatrixOpKind};
    use crate::rig_anim::BoneAnim;
    use crate::spline::{CompactSpline, SplineNode};

    fn engine() -> AnimEngine {
        RigAnimProcessor::register();
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

    fn two_bone_anim() -> Rc<RigAnim> {
        let bones = vec![
            BoneAnim::new(
                "root",
                None,
                smallvec![MatrixOp::spline(MatrixOpKind::TranslateX, ramp())],
            ),
            BoneAnim::new(
                "tip",
                Some(0),
                smallvec![MatrixOp::constant(MatrixOpKind::TranslateY, 2.0)],
            ),
        ];
        Rc::new(RigAnim::new(bones, 10, false).unwrap())
    }

    #[test]
    fn test_globals_chain_through_parents() {
        let engine = engine();
        let mut m = Motivator::new();
        engine
            .initialize_motivator(&RigInit::new(two_bone_anim()), &mut m, 1)
            .unwrap();

        engine.advance_frame(4);
        let globals = engine
            .with_rig(&m, |rig, base| rig.global_transforms(base).to_vec())
            .unwrap();
        assert_eq!(globals.len(), 2);
        let root = globals[0].w_axis;
        assert!((root.x - 4.0).abs() < 1e-3, "root x was {}", root.x);
        let tip = globals[1].w_axis;
        assert!((tip.x - 4.0).abs() < 1e-3, "tip inherits root x, was {}", tip.x);
        assert!((tip.y - 2.0).abs() < 1e-3, "tip y was {}", tip.y);
    }

    #[test]
    fn test_time_remaining_counts_down() {
        let engine = engine();
        let mut m = Motivator::new();
        engine
            .initialize_motivator(&RigInit::new(two_bone_anim()), &mut m, 1)
            .unwrap();

        assert_eq!(
            engine.with_rig(&m, |rig, base| rig.time_remaining(base)),
            Some(10)
        );
        engine.advance_frame(4);
        assert_eq!(
            engine.with_rig(&m, |rig, base| rig.time_remaining(base)),
            Some(6)
        );
        engine.advance_frame(100);
        assert_eq!(
            engine.with_rig(&m, |rig, base| rig.time_remaining(base)),
            Some(0)
        );
    }

    #[test]
    fn test_defining_anim_and_csv() {
        let engine = engine();
        let mut m = Motivator::new();
        let anim = two_bone_anim();
        engine
            .initialize_motivator(&RigInit::new(anim.clone()), &mut m, 1)
            .unwrap();

        let bone_count = engine
            .with_rig(&m, |rig, base| rig.defining_anim(base).bone_count())
            .unwrap();
        assert_eq!(bone_count, 2);
        assert_eq!(
            engine.with_rig(&m, |rig, base| rig.csv_header(base)),
            Some("root,tip".to_string())
        );
        let values = engine
            .with_rig(&m, |rig, base| rig.csv_values(base))
            .unwrap();
        assert_eq!(values.split(',').count(), 2);
    }

    #[test]
    fn test_blend_to_anim_cross_fades() {
        let engine = engine();
        let mut m = Motivator::new();
        engine
            .initialize_motivator(&RigInit::new(two_bone_anim()), &mut m, 1)
            .unwrap();
        engine.advance_frame(10);

        // Same skeleton, different pose: root walks back to x = 0.
        let still = Rc::new(
            RigAnim::new(
                vec![
                    BoneAnim::new(
                        "root",
                        None,
                        smallvec![MatrixOp::constant(MatrixOpKind::TranslateX, 0.0)],
                    ),
                    BoneAnim::new(
                        "tip",
                        Some(0),
                        smallvec![MatrixOp::constant(MatrixOpKind::TranslateY, 2.0)],
                    ),
                ],
                4,
                false,
            )
            .unwrap(),
        );
        engine.with_rig_mut(&m, |rig, base| {
            rig.blend_to_anim(
                base,
                &still,
                &SplinePlayback::new().with_blend_time(4),
                &engine,
            );
        });

        engine.advance_frame(2);
        let x = engine
            .with_rig(&m, |rig, base| rig.global_transforms(base)[0].w_axis.x)
            .unwrap();
        assert!((x - 5.0).abs() < 1e-3, "mid-blend root x was {x}");

        engine.advance_frame(2);
        let x = engine
            .with_rig(&m, |rig, base| rig.global_transforms(base)[0].w_axis.x)
            .unwrap();
        assert!(x.abs() < 1e-3, "post-blend root x was {x}");
    }
}
