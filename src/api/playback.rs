//! Spline playback descriptor.

use crate::api::AnimTime;

/// How a spline-driven value plays back: where in spline-local time it
/// starts, how fast it runs, whether it loops, and how long a blend into
/// the new drive should take.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplinePlayback {
    /// Spline-local start time.
    pub start_time: f32,
    /// Playback rate. 1.0 = spline-local time tracks engine time.
    pub rate: f32,
    /// Wrap around at the spline's end instead of holding the last value.
    pub looping: bool,
    /// Engine-time duration of a blend from the previous drive.
    pub blend_time: AnimTime,
}

impl SplinePlayback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn at_time(mut self, start_time: f32) -> Self {
        self.start_time = start_time;
        self
    }

    pub fn with_rate(mut self, rate: f32) -> Self {
        self.rate = rate;
        self
    }

    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    pub fn with_blend_time(mut self, blend_time: AnimTime) -> Self {
        self.blend_time = blend_time;
        self
    }
}

impl Default for SplinePlayback {
    fn default() -> Self {
        Self {
            start_time: 0.0,
            rate: 1.0,
            looping: false,
            blend_time: 0,
        }
    }
}
