#![forbid(unsafe_code)]
//! Frame API conformance checking.
//!
//! Verifies that a library exposing parallel frameless and frame-aware
//! geometric type families upholds the frame API convention: complete
//! overload coverage, reference frame checking on every frame-fixed
//! argument, frame adoption on mutable-frame arguments, and functional
//! equivalence between each frame-aware method and its frameless original.
//!
//! Methods are modeled as data: the caller registers types in a
//! [`TypeCatalog`], signatures plus invokers in a [`MethodCatalog`], and
//! sibling relationships in a [`FrameTypeRegistry`], then drives the
//! checkers through an [`ApiConformanceTester`].

pub mod equivalence;
pub mod fixtures;
pub mod frame_invariant;
pub mod matching_frame;
pub mod overload;
pub mod report;

pub use report::{write_failure_artifact, ConformanceError, FailureArtifact};

use feu_compare::{StructuralComparer, DEFAULT_EPSILON};
use feu_model::{DynValue, FrameId, TypeCatalog, TypeToken, Value};
use feu_random::{DeterministicRng, RandomObjectService};
use feu_registry::FrameTypeRegistry;
use feu_signature::{MethodCatalog, MethodSignature};

/// Default number of randomized iterations per method check.
pub const DEFAULT_ITERATIONS: usize = 10;

/// Builds a frame holder instance in the requested frame.
pub type HolderFactory<'a> = &'a dyn Fn(&mut DeterministicRng, FrameId) -> Value;

/// Copies a frameless value into a frame-aware holder in the given frame.
pub type FrameCopier<'a> = &'a dyn Fn(FrameId, &dyn DynValue) -> Value;

/// Builds a random frameless value.
pub type FramelessBuilder<'a> = &'a dyn Fn(&mut DeterministicRng) -> Value;

/// Filter accepting every method; the usual argument when no exclusion is
/// needed.
#[must_use]
pub fn any_method(_: &MethodSignature) -> bool {
    true
}

/// Shared read-only state threaded through every checker.
pub struct CheckContext<'a> {
    pub types: &'a TypeCatalog,
    pub methods: &'a MethodCatalog,
    pub registry: &'a FrameTypeRegistry,
    pub random: &'a dyn RandomObjectService,
    pub comparer: &'a dyn StructuralComparer,
    /// Working frame; holders and the same-frame passes live here.
    pub frame_a: FrameId,
    /// Foreign frame used to manufacture mismatches.
    pub frame_b: FrameId,
    pub seed: u64,
}

/// Facade bundling the context with iteration and tolerance defaults.
pub struct ApiConformanceTester<'a> {
    ctx: CheckContext<'a>,
    iterations: usize,
    epsilon: f64,
}

impl<'a> ApiConformanceTester<'a> {
    #[must_use]
    pub fn new(ctx: CheckContext<'a>) -> Self {
        Self {
            ctx,
            iterations: DEFAULT_ITERATIONS,
            epsilon: DEFAULT_EPSILON,
        }
    }

    #[must_use]
    pub fn with_iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations;
        self
    }

    #[must_use]
    pub fn with_epsilon(mut self, epsilon: f64) -> Self {
        self.epsilon = epsilon;
        self
    }

    #[must_use]
    pub fn context(&self) -> &CheckContext<'a> {
        &self.ctx
    }

    pub fn assert_overloading_with_frame_objects(
        &self,
        frame_type: TypeToken,
        frameless_type: TypeToken,
        assert_all_combinations: bool,
        min_frameless_params: usize,
        filter: &dyn Fn(&MethodSignature) -> bool,
    ) -> Result<(), ConformanceError> {
        overload::assert_overloading_with_frame_objects(
            &self.ctx,
            frame_type,
            frameless_type,
            assert_all_combinations,
            min_frameless_params,
            filter,
        )
    }

    pub fn assert_api_declare_matching_frame_setters(
        &self,
        frame_type: TypeToken,
        frameless_type: TypeToken,
        filter: &dyn Fn(&MethodSignature) -> bool,
    ) -> Result<(), ConformanceError> {
        overload::assert_api_declare_matching_frame_setters(
            &self.ctx,
            frame_type,
            frameless_type,
            filter,
        )
    }

    pub fn assert_static_methods_check_reference_frame(
        &self,
        declaring: TypeToken,
        filter: &dyn Fn(&MethodSignature) -> bool,
    ) -> Result<(), ConformanceError> {
        frame_invariant::assert_static_methods_check_reference_frame(
            &self.ctx,
            declaring,
            filter,
            self.iterations,
        )
    }

    pub fn assert_frame_holder_methods_check_reference_frame(
        &self,
        holder_factory: HolderFactory<'_>,
        filter: &dyn Fn(&MethodSignature) -> bool,
    ) -> Result<(), ConformanceError> {
        frame_invariant::assert_frame_holder_methods_check_reference_frame(
            &self.ctx,
            holder_factory,
            filter,
            self.iterations,
        )
    }

    pub fn assert_static_methods_preserve_functionality(
        &self,
        frame_type: TypeToken,
        frameless_type: TypeToken,
        filter: &dyn Fn(&MethodSignature) -> bool,
    ) -> Result<(), ConformanceError> {
        equivalence::assert_static_methods_preserve_functionality(
            &self.ctx,
            frame_type,
            frameless_type,
            filter,
            self.iterations,
            self.epsilon,
        )
    }

    pub fn assert_frame_methods_of_frame_holder_preserve_functionality(
        &self,
        copier: FrameCopier<'_>,
        frameless_builder: FramelessBuilder<'_>,
        filter: &dyn Fn(&MethodSignature) -> bool,
    ) -> Result<(), ConformanceError> {
        equivalence::assert_frame_methods_of_frame_holder_preserve_functionality(
            &self.ctx,
            copier,
            frameless_builder,
            filter,
            self.iterations,
            self.epsilon,
        )
    }

    pub fn assert_set_matching_frame_preserve_functionality(
        &self,
        holder_factory: HolderFactory<'_>,
        filter: &dyn Fn(&MethodSignature) -> bool,
    ) -> Result<(), ConformanceError> {
        matching_frame::assert_set_matching_frame_preserve_functionality(
            &self.ctx,
            holder_factory,
            filter,
            self.iterations,
            self.epsilon,
        )
    }

    pub fn assert_set_including_frame_preserve_functionality(
        &self,
        holder_factory: HolderFactory<'_>,
        filter: &dyn Fn(&MethodSignature) -> bool,
    ) -> Result<(), ConformanceError> {
        matching_frame::assert_set_including_frame_preserve_functionality(
            &self.ctx,
            holder_factory,
            filter,
            self.iterations,
            self.epsilon,
        )
    }
}
