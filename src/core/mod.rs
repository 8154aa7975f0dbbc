//! Engine internals: the slot allocator, the processor substrate, the
//! polymorphic faces, and the frame driver.

pub mod engine;
pub mod index_allocator;
pub mod matrix;
pub mod processor;
pub mod rig;
pub mod scalar;
