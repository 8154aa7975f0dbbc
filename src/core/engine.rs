//! The engine: one processor pool per registered kind, advanced in
//! priority order once per frame.
//!
//! Processor kinds register factories in a process-wide registry; an
//! engine instantiates a pool lazily the first time a motivator of that
//! kind is initialized. All engine methods take `&self`: processors live
//! behind interior mutability so that one processor can create or sample
//! motivators in another (matrix ops driven by nested scalar children)
//! while the engine walks the frame.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::RwLock;

use glam::Mat4;
use log::{debug, error};
use once_cell::sync::Lazy;
use thiserror::Error;

use crate::api::init::{MotivatorKind, ProcessorInit};
use crate::api::motivator::Motivator;
use crate::api::AnimTime;
use crate::core::index_allocator::SlotIndex;
use crate::core::matrix::MatrixProcessor;
use crate::core::processor::Processor;
use crate::core::rig::RigProcessor;
use crate::core::scalar::ScalarProcessor;

/// Errors surfaced at the engine boundary. Everything else in the core is
/// either a silent no-op (unsupported driver) or a debug assertion
/// (contract violation).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("no processor registered for motivator kind `{0}`")]
    UnknownKind(MotivatorKind),
    #[error("motivator is already bound to `{0}`")]
    AlreadyBound(MotivatorKind),
    #[error("init descriptor for `{found}` handed to processor `{expected}`")]
    InitMismatch {
        expected: MotivatorKind,
        found: MotivatorKind,
    },
}

/// Creates a fresh processor pool for one kind.
pub type ProcessorFactory = fn() -> Rc<RefCell<dyn Processor>>;

static REGISTRY: Lazy<RwLock<HashMap<MotivatorKind, ProcessorFactory>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Register a processor kind process-wide. Idempotent: the first
/// registration for a tag wins and later ones report `false`, so factory
/// identity stays stable for the life of the process.
pub fn register_processor_kind(kind: MotivatorKind, factory: ProcessorFactory) -> bool {
    let mut registry = REGISTRY.write().expect("processor registry poisoned");
    if registry.contains_key(&kind) {
        return false;
    }
    registry.insert(kind, factory);
    true
}

/// Register every built-in processor kind.
pub fn register_default_processors() {
    crate::processors::linear::LinearProcessor::register();
    crate::processors::smooth::SmoothProcessor::register();
    crate::processors::transform::TransformProcessor::register();
    crate::processors::rig::RigAnimProcessor::register();
}

fn lookup_factory(kind: MotivatorKind) -> Option<ProcessorFactory> {
    REGISTRY
        .read()
        .expect("processor registry poisoned")
        .get(&kind)
        .copied()
}

/// Engine-level configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Release runs whose handles were dropped, at the start of each
    /// processor's advance.
    pub sweep_abandoned: bool,
    /// Compact pools at the start of each processor's advance.
    pub auto_defragment: bool,
    /// Walk every processor's structural invariants after each frame.
    pub verify_each_frame: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sweep_abandoned: true,
            auto_defragment: true,
            verify_each_frame: cfg!(feature = "debug"),
        }
    }
}

impl EngineConfig {
    pub fn with_sweep_abandoned(mut self, enable: bool) -> Self {
        self.sweep_abandoned = enable;
        self
    }

    pub fn with_auto_defragment(mut self, enable: bool) -> Self {
        self.auto_defragment = enable;
        self
    }

    pub fn with_verify_each_frame(mut self, enable: bool) -> Self {
        self.verify_each_frame = enable;
        self
    }
}

/// Container of all processor pools and driver of per-frame advancement.
///
/// Single-threaded by contract: neither the engine nor its processors may
/// be touched from more than one thread.
pub struct AnimEngine {
    config: EngineConfig,
    processors: RefCell<HashMap<MotivatorKind, Rc<RefCell<dyn Processor>>>>,
    /// Priority-sorted traversal order, rebuilt when a pool is added.
    order: RefCell<Vec<Rc<RefCell<dyn Processor>>>>,
    order_stale: Cell<bool>,
    frames: Cell<u64>,
}

impl AnimEngine {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            config,
            processors: RefCell::new(HashMap::new()),
            order: RefCell::new(Vec::new()),
            order_stale: Cell::new(false),
            frames: Cell::new(0),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Frames advanced so far.
    pub fn frame_count(&self) -> u64 {
        self.frames.get()
    }

    /// Bind `motivator` to a fresh slot run of `width` dimensions in the
    /// pool selected by `init`'s kind, creating the pool on first use.
    ///
    /// Fails (and leaves the handle reset) when the kind has no registered
    /// factory or the handle is already bound.
    pub fn initialize_motivator(
        &self,
        init: &dyn ProcessorInit,
        motivator: &mut Motivator,
        width: usize,
    ) -> Result<(), EngineError> {
        if let Some(bound) = motivator.kind() {
            debug_assert!(false, "initializing a motivator already bound to `{bound}`");
            return Err(EngineError::AlreadyBound(bound));
        }
        let processor = self.processor_for(init.kind())?;
        let result = processor
            .borrow_mut()
            .initialize(init, motivator.link().clone(), width, self);
        result
    }

    /// Release the run `motivator` is bound to. Returns `false` when the
    /// handle was not validly bound.
    pub fn remove_motivator(&self, motivator: &mut Motivator) -> bool {
        let Some((kind, base)) = bound_pair(motivator) else {
            return false;
        };
        let Some(processor) = self.processor(kind) else {
            return false;
        };
        let mut processor = processor.borrow_mut();
        if !processor.valid_motivator(base, motivator.link()) {
            return false;
        }
        processor.remove(base);
        true
    }

    /// Retarget the run owned by `from` onto `to`. `from` ends up reset;
    /// a run previously owned by `to` is released first. Per-slot state is
    /// unchanged.
    pub fn transfer_motivator(&self, from: &mut Motivator, to: &mut Motivator) -> bool {
        if !self.valid_motivator(from) {
            return false;
        }
        if to.is_bound() {
            self.remove_motivator(to);
        }
        let (kind, base) = bound_pair(from).expect("validity checked above");
        let processor = self.processor(kind).expect("validity checked above");
        processor.borrow_mut().transfer(base, to.link().clone());
        true
    }

    /// True iff the handle is bound and its pool agrees it owns the run.
    pub fn valid_motivator(&self, motivator: &Motivator) -> bool {
        let Some((kind, base)) = bound_pair(motivator) else {
            return false;
        };
        self.processor(kind)
            .is_some_and(|p| p.borrow().valid_motivator(base, motivator.link()))
    }

    /// Dimension count of the handle's run; 0 when unbound.
    pub fn dimensions(&self, motivator: &Motivator) -> usize {
        let Some((kind, base)) = bound_pair(motivator) else {
            return 0;
        };
        self.processor(kind)
            .map_or(0, |p| p.borrow().dimensions(base))
    }

    /// Advance every processor by `delta`, in ascending priority order.
    ///
    /// The order is recomputed only after a new pool appears. Lower
    /// priority runs first, so a processor sampling another's output must
    /// carry the higher priority.
    pub fn advance_frame(&self, delta: AnimTime) {
        debug_assert!(delta >= 0, "frames cannot advance backwards");
        let delta = delta.max(0);

        if self.order_stale.get() {
            self.rebuild_order();
        }
        let order = self.order.borrow().clone();
        for processor in &order {
            processor.borrow_mut().advance(delta, self);
        }
        if self.config.verify_each_frame {
            for processor in &order {
                processor.borrow().verify();
            }
        }
        self.frames.set(self.frames.get() + 1);
    }

    fn rebuild_order(&self) {
        let mut order: Vec<Rc<RefCell<dyn Processor>>> =
            self.processors.borrow().values().cloned().collect();
        // Kind name breaks priority ties so the traversal is a total
        // order, fixed until the next pool registration.
        order.sort_by_key(|p| {
            let p = p.borrow();
            (p.priority(), p.kind())
        });
        *self.order.borrow_mut() = order;
        self.order_stale.set(false);
    }

    /// The pool for `kind`, if one has been created.
    pub fn processor(&self, kind: MotivatorKind) -> Option<Rc<RefCell<dyn Processor>>> {
        self.processors.borrow().get(&kind).cloned()
    }

    fn processor_for(&self, kind: MotivatorKind) -> Result<Rc<RefCell<dyn Processor>>, EngineError> {
        if let Some(existing) = self.processor(kind) {
            return Ok(existing);
        }
        let Some(factory) = lookup_factory(kind) else {
            error!("no processor factory registered for kind `{kind}`");
            return Err(EngineError::UnknownKind(kind));
        };
        let processor = factory();
        {
            let p = processor.borrow();
            debug_assert_eq!(p.kind(), kind, "factory built a pool of the wrong kind");
            debug!("created processor `{kind}` with priority {}", p.priority());
        }
        self.processors.borrow_mut().insert(kind, processor.clone());
        self.order_stale.set(true);
        Ok(processor)
    }

    // ---- typed access through a handle -----------------------------------

    /// Run `f` against the scalar face of the handle's pool. `None` when
    /// the handle is invalid or the pool has no scalar face.
    pub fn with_scalar<R>(
        &self,
        motivator: &Motivator,
        f: impl FnOnce(&dyn ScalarProcessor, SlotIndex) -> R,
    ) -> Option<R> {
        let (kind, base) = bound_pair(motivator)?;
        let processor = self.processor(kind)?;
        let processor = processor.borrow();
        if !processor.valid_motivator(base, motivator.link()) {
            return None;
        }
        processor.as_scalar().map(|scalar| f(scalar, base))
    }

    pub fn with_scalar_mut<R>(
        &self,
        motivator: &Motivator,
        f: impl FnOnce(&mut dyn ScalarProcessor, SlotIndex) -> R,
    ) -> Option<R> {
        let (kind, base) = bound_pair(motivator)?;
        let processor = self.processor(kind)?;
        let mut processor = processor.borrow_mut();
        if !processor.valid_motivator(base, motivator.link()) {
            return None;
        }
        processor.as_scalar_mut().map(|scalar| f(scalar, base))
    }

    pub fn with_matrix<R>(
        &self,
        motivator: &Motivator,
        f: impl FnOnce(&dyn MatrixProcessor, SlotIndex) -> R,
    ) -> Option<R> {
        let (kind, base) = bound_pair(motivator)?;
        let processor = self.processor(kind)?;
        let processor = processor.borrow();
        if !processor.valid_motivator(base, motivator.link()) {
            return None;
        }
        processor.as_matrix().map(|matrix| f(matrix, base))
    }

    pub fn with_matrix_mut<R>(
        &self,
        motivator: &Motivator,
        f: impl FnOnce(&mut dyn MatrixProcessor, SlotIndex) -> R,
    ) -> Option<R> {
        let (kind, base) = bound_pair(motivator)?;
        let processor = self.processor(kind)?;
        let mut processor = processor.borrow_mut();
        if !processor.valid_motivator(base, motivator.link()) {
            return None;
        }
        processor.as_matrix_mut().map(|matrix| f(matrix, base))
    }

    pub fn with_rig<R>(
        &self,
        motivator: &Motivator,
        f: impl FnOnce(&dyn RigProcessor, SlotIndex) -> R,
    ) -> Option<R> {
        let (kind, base) = bound_pair(motivator)?;
        let processor = self.processor(kind)?;
        let processor = processor.borrow();
        if !processor.valid_motivator(base, motivator.link()) {
            return None;
        }
        processor.as_rig().map(|rig| f(rig, base))
    }

    pub fn with_rig_mut<R>(
        &self,
        motivator: &Motivator,
        f: impl FnOnce(&mut dyn RigProcessor, SlotIndex) -> R,
    ) -> Option<R> {
        let (kind, base) = bound_pair(motivator)?;
        let processor = self.processor(kind)?;
        let mut processor = processor.borrow_mut();
        if !processor.valid_motivator(base, motivator.link()) {
            return None;
        }
        processor.as_rig_mut().map(|rig| f(rig, base))
    }

    /// Width-1 scalar value through a handle.
    pub fn scalar_value(&self, motivator: &Motivator) -> Option<f32> {
        self.with_scalar(motivator, |scalar, base| scalar.value(base))
    }

    /// Composed matrix through a handle.
    pub fn matrix_value(&self, motivator: &Motivator) -> Option<Mat4> {
        self.with_matrix(motivator, |matrix, base| matrix.value(base))
    }
}

impl Default for AnimEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn bound_pair(motivator: &Motivator) -> Option<(MotivatorKind, SlotIndex)> {
    motivator.kind().zip(motivator.base())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processors::linear::{LinearInit, LinearProcessor};

    #[test]
    fn test_registration_is_idempotent() {
        let first = LinearProcessor::register();
        let second = LinearProcessor::register();
        // Whichever test registered the kind first, the repeat loses.
        assert!(!second || first);
        assert!(!LinearProcessor::register());
    }

    #[test]
    fn test_unknown_kind_leaves_handle_reset() {
        #[derive(Debug)]
        struct Nothing;

        impl ProcessorInit for Nothing {
            fn kind(&self) -> MotivatorKind {
                MotivatorKind::new("unregistered")
            }

            fn as_any(&self) -> &dyn std::any::Any {
                self
            }
        }

        let engine = AnimEngine::new();
        let mut m = Motivator::new();
        let err = engine.initialize_motivator(&Nothing, &mut m, 1).unwrap_err();
        assert!(matches!(err, EngineError::UnknownKind(_)));
        assert!(!m.is_bound());
        assert!(engine.processor(MotivatorKind::new("unregistered")).is_none());
    }

    #[test]
    fn test_pools_are_lazy_and_frames_count() {
        LinearProcessor::register();
        let engine = AnimEngine::new();
        assert!(engine.processor(LinearInit::KIND).is_none());

        let mut m = Motivator::new();
        engine
            .initialize_motivator(&LinearInit::new(), &mut m, 1)
            .unwrap();
        assert!(engine.processor(LinearInit::KIND).is_some());

        assert_eq!(engine.frame_count(), 0);
        engine.advance_frame(1);
        engine.advance_frame(1);
        assert_eq!(engine.frame_count(), 2);
    }

    #[test]
    fn test_config_builders() {
        let config = EngineConfig::default()
            .with_sweep_abandoned(false)
            .with_auto_defragment(false)
            .with_verify_each_frame(true);
        assert!(!config.sweep_abandoned);
        assert!(!config.auto_defragment);
        assert!(config.verify_each_frame);

        let engine = AnimEngine::with_config(config);
        assert!(!engine.config().auto_defragment);
    }
}
