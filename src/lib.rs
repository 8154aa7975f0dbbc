//! # animpool
//!
//! Pool-per-algorithm animation value driving for Rust game engines.
//!
//! Many independent animated values (scalars, vectors, 4x4 transforms,
//! skeletal rigs) advance together once per frame. User code holds
//! lightweight opaque handles ([`Motivator`]); the dense per-value state
//! lives inside a type-specific processor pool that batch-updates all its
//! slots in one cache-friendly pass and compacts them with deferred
//! defragmentation.
//!
//! ## Quick Start
//!
//! ```rust
//! use animpool::{register_default_processors, AnimEngine, LinearInit, Motivator};
//!
//! register_default_processors();
//! let engine = AnimEngine::new();
//!
//! // Travel from 0 to 10 over 10 time units.
//! let mut value = Motivator::new();
//! engine
//!     .initialize_motivator(&LinearInit::travel(0.0, 10.0, 10), &mut value, 1)
//!     .unwrap();
//!
//! // Game loop
//! engine.advance_frame(1);
//! assert_eq!(engine.scalar_value(&value), Some(1.0));
//! ```
//!
//! ## Architecture
//!
//! - [`IndexAllocator`] hands out contiguous slot runs inside a pool and
//!   compacts them on demand, emitting relocation events.
//! - [`ProcessorCore`] maps stable handles to relocatable runs through a
//!   back-pointer table and rebinding protocol.
//! - Backends implement one face ([`ScalarProcessor`],
//!   [`MatrixProcessor`], or [`RigProcessor`]) over dense parallel
//!   arrays.
//! - [`AnimEngine`] owns one pool per registered kind and advances them
//!   in ascending priority order, so compositions always read
//!   same-frame-fresh inputs.

pub mod api;
pub mod core;
pub mod processors;
pub mod rig_anim;
pub mod spline;

pub use api::init::{MotivatorKind, ProcessorInit};
pub use api::motivator::{Motivator, MotivatorLink};
pub use api::ops::{MatrixOp, MatrixOpKind, MatrixOpList, MatrixOpValue};
pub use api::playback::SplinePlayback;
pub use api::targets::{CurveShape, Targets1f, Waypoint};
pub use api::AnimTime;

pub use crate::core::engine::{
    register_default_processors, register_processor_kind, AnimEngine, EngineConfig, EngineError,
    ProcessorFactory,
};
pub use crate::core::index_allocator::{AllocatorEvents, IndexAllocator, SlotIndex, SlotRange};
pub use crate::core::matrix::MatrixProcessor;
pub use crate::core::processor::{Processor, ProcessorCore, SlotState};
pub use crate::core::rig::RigProcessor;
pub use crate::core::scalar::ScalarProcessor;

pub use processors::linear::{LinearInit, LinearProcessor};
pub use processors::rig::{RigAnimProcessor, RigInit};
pub use processors::smooth::{SmoothInit, SmoothProcessor};
pub use processors::transform::{TransformInit, TransformProcessor};

pub use rig_anim::{BoneAnim, RigAnim, RigError};
pub use spline::{CompactSpline, SplineError, SplineNode};
