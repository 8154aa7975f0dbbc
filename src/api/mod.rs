//! Public API for animpool.
//!
//! This module contains all user-facing types: the `Motivator` handle,
//! init descriptors, target/curve/playback descriptors, and matrix ops.
//! Most users should only interact with types from this module plus the
//! engine in `crate::core::engine`.

pub mod init;
pub mod motivator;
pub mod ops;
pub mod playback;
pub mod targets;

/// Engine time. Integer units; the interpretation (milliseconds, frames,
/// audio samples) is the caller's and must be consistent across one engine.
pub type AnimTime = i64;
