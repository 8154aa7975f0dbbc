//! The rig face: processors driving an articulated skeleton per slot.

use std::rc::Rc;

use glam::Mat4;

use crate::api::playback::SplinePlayback;
use crate::api::AnimTime;
use crate::core::engine::AnimEngine;
use crate::core::index_allocator::SlotIndex;
use crate::core::processor::Processor;
use crate::rig_anim::RigAnim;

pub trait RigProcessor: Processor {
    /// Global (model-space) transforms, one per bone of the defining
    /// animation, in root-to-bone order, as of the last advance.
    fn global_transforms(&self, base: SlotIndex) -> &[Mat4];

    /// Engine time until the current animation finishes its playthrough.
    fn time_remaining(&self, base: SlotIndex) -> AnimTime;

    /// The skeleton schema in effect for this run.
    fn defining_anim(&self, base: SlotIndex) -> &Rc<RigAnim>;

    /// Cross-fade into a new animation over the playback's blend time.
    fn blend_to_anim(
        &mut self,
        _base: SlotIndex,
        _anim: &Rc<RigAnim>,
        _playback: &SplinePlayback,
        _engine: &AnimEngine,
    ) {
    }

    /// Change the playback rate of the current animation.
    fn set_playback_rate(&mut self, _base: SlotIndex, _rate: f32, _engine: &AnimEngine) {}

    /// Debug serializers; backends without debug output return empty.
    fn csv_header(&self, _base: SlotIndex) -> String {
        String::new()
    }

    fn csv_values(&self, _base: SlotIndex) -> String {
        String::new()
    }
}
