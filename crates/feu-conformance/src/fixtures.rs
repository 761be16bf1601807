//! Self-contained target library used by the checker test suites.
//!
//! A translation-only frame tree, three geometry families (`Point3D`,
//! `Point2D`, `Vector3D`), a compliant frame API (`FrameGeometryTools`,
//! `FramePoint3D`, `FramePoint2D`) and deliberately defective counterparts
//! (`BrokenFrameGeometryTools`, `FramePoint3DBuggy`). Each defect triggers
//! exactly one failure variant so the tests can pin the diagnosis.

use crate::CheckContext;
use feu_compare::{epsilon_equals_f64, GeometryComparer};
use feu_model::{
    CatalogError, DynValue, FaultKind, FrameId, MethodFault, TypeCatalog, TypeToken, Value,
};
use feu_random::{DeterministicRng, RandomObjectService, DEFAULT_CHECK_SEED};
use feu_registry::{FrameTypeRegistry, RegistryError};
use feu_signature::{MethodCatalog, MethodSignature};
use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::rc::Rc;

/// Fault raised when an invoker receives a value of the wrong concrete
/// type; indicates a broken fixture, never a checked property.
pub const FIXTURE_TYPE_FAULT: FaultKind = FaultKind("fixture_type_error");

/// Fault the frameless `validate` always raises.
pub const DEGENERATE_FAULT: FaultKind = FaultKind("degenerate_geometry");

/// Divergent fault the broken `validate` raises instead.
pub const SINGULAR_FAULT: FaultKind = FaultKind("singular_matrix");

#[derive(Debug)]
pub enum FixtureError {
    Catalog(CatalogError),
    Registry(RegistryError),
}

impl From<CatalogError> for FixtureError {
    fn from(err: CatalogError) -> Self {
        Self::Catalog(err)
    }
}

impl From<RegistryError> for FixtureError {
    fn from(err: RegistryError) -> Self {
        Self::Registry(err)
    }
}

impl fmt::Display for FixtureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Catalog(err) => write!(f, "fixture catalog setup failed: {err}"),
            Self::Registry(err) => write!(f, "fixture registry setup failed: {err}"),
        }
    }
}

impl std::error::Error for FixtureError {}

/// Tree of reference frames related by pure translations. Translation-only
/// keeps every transform exact, so differential comparisons need no slack
/// beyond the configured epsilon.
#[derive(Debug)]
pub struct TestFrameTree {
    offsets: BTreeMap<u32, [f64; 3]>,
}

impl TestFrameTree {
    /// Root frame 0 plus two offset frames used as frame A and frame B.
    #[must_use]
    pub fn with_default_frames() -> Self {
        let mut offsets = BTreeMap::new();
        offsets.insert(0, [0.0, 0.0, 0.0]);
        offsets.insert(1, [1.0, -2.0, 0.5]);
        offsets.insert(2, [-3.0, 4.0, 7.5]);
        Self { offsets }
    }

    #[must_use]
    pub fn offset(&self, frame: FrameId) -> [f64; 3] {
        self.offsets.get(&frame.0).copied().unwrap_or([0.0; 3])
    }

    /// In-place transform of up to three components from `from` to `to`.
    pub fn transform(&self, from: FrameId, to: FrameId, coords: &mut [f64]) {
        let source = self.offset(from);
        let target = self.offset(to);
        for (axis, coord) in coords.iter_mut().enumerate().take(3) {
            *coord += source[axis] - target[axis];
        }
    }
}

/// Coordinate tuple, optionally tagged with a frame.
#[derive(Clone)]
pub struct GeomValue {
    token: TypeToken,
    frameless_token: Option<TypeToken>,
    coords: Vec<f64>,
    frame: Option<FrameId>,
    tree: Rc<TestFrameTree>,
}

impl GeomValue {
    #[must_use]
    pub fn frameless(token: TypeToken, coords: Vec<f64>, tree: Rc<TestFrameTree>) -> Self {
        Self {
            token,
            frameless_token: None,
            coords,
            frame: None,
            tree,
        }
    }

    #[must_use]
    pub fn framed(
        token: TypeToken,
        frameless_token: TypeToken,
        frame: FrameId,
        coords: Vec<f64>,
        tree: Rc<TestFrameTree>,
    ) -> Self {
        Self {
            token,
            frameless_token: Some(frameless_token),
            coords,
            frame: Some(frame),
            tree,
        }
    }

    #[must_use]
    pub fn coords(&self) -> &[f64] {
        &self.coords
    }

    /// Copies `coords` component-wise, truncated to this value's
    /// dimensionality.
    pub fn assign(&mut self, coords: &[f64]) {
        for (slot, value) in self.coords.iter_mut().zip(coords) {
            *slot = *value;
        }
    }
}

impl fmt::Debug for GeomValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.frame {
            Some(frame) => write!(f, "GeomValue({:?} in {frame})", self.coords),
            None => write!(f, "GeomValue({:?})", self.coords),
        }
    }
}

impl DynValue for GeomValue {
    fn type_token(&self) -> TypeToken {
        self.token
    }

    fn reference_frame(&self) -> Option<FrameId> {
        self.frame
    }

    fn set_reference_frame(&mut self, frame: FrameId) {
        if self.frame.is_some() {
            self.frame = Some(frame);
        }
    }

    fn change_frame(&mut self, frame: FrameId) -> Result<(), MethodFault> {
        if let Some(current) = self.frame {
            let tree = Rc::clone(&self.tree);
            tree.transform(current, frame, &mut self.coords);
            self.frame = Some(frame);
        }
        Ok(())
    }

    fn boxed_clone(&self) -> Value {
        Box::new(self.clone())
    }

    fn epsilon_equals(&self, other: &dyn DynValue, epsilon: f64) -> bool {
        let Some(other) = other.as_any().downcast_ref::<Self>() else {
            return false;
        };
        self.coords.len() == other.coords.len()
            && self
                .coords
                .iter()
                .zip(&other.coords)
                .all(|(a, b)| epsilon_equals_f64(*a, *b, epsilon))
    }

    fn frameless_view(&self) -> Option<Value> {
        let frameless_token = self.frameless_token?;
        Some(Box::new(Self {
            token: frameless_token,
            frameless_token: None,
            coords: self.coords.clone(),
            frame: None,
            tree: Rc::clone(&self.tree),
        }))
    }

    fn describe(&self) -> String {
        format!("{self:?}")
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Plain floating-point value (the `Double` type of the fixture library).
#[derive(Debug, Clone)]
pub struct ScalarValue {
    token: TypeToken,
    pub value: f64,
}

impl ScalarValue {
    #[must_use]
    pub const fn new(token: TypeToken, value: f64) -> Self {
        Self { token, value }
    }
}

impl DynValue for ScalarValue {
    fn type_token(&self) -> TypeToken {
        self.token
    }

    fn boxed_clone(&self) -> Value {
        Box::new(self.clone())
    }

    fn epsilon_equals(&self, other: &dyn DynValue, epsilon: f64) -> bool {
        other
            .as_any()
            .downcast_ref::<Self>()
            .is_some_and(|other| epsilon_equals_f64(self.value, other.value, epsilon))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

enum ValueSpec {
    Scalar,
    Geom {
        dim: usize,
        frameless_token: Option<TypeToken>,
    },
}

/// Random construction over the fixture types. Tokens without an entry in
/// the table are unsupported; tokens on the uncloneable list defeat
/// `clone_instances`, driving the retry ceiling.
pub struct FixtureRandomService {
    specs: BTreeMap<TypeToken, ValueSpec>,
    uncloneable: BTreeSet<TypeToken>,
    tree: Rc<TestFrameTree>,
}

impl FixtureRandomService {
    fn new(tree: Rc<TestFrameTree>) -> Self {
        Self {
            specs: BTreeMap::new(),
            uncloneable: BTreeSet::new(),
            tree,
        }
    }

    fn support_scalar(&mut self, token: TypeToken) {
        self.specs.insert(token, ValueSpec::Scalar);
    }

    fn support_geom(&mut self, token: TypeToken, dim: usize, frameless_token: Option<TypeToken>) {
        self.specs.insert(
            token,
            ValueSpec::Geom {
                dim,
                frameless_token,
            },
        );
    }

    pub fn mark_uncloneable(&mut self, token: TypeToken) {
        self.uncloneable.insert(token);
    }
}

impl RandomObjectService for FixtureRandomService {
    fn next_instance(
        &self,
        rng: &mut DeterministicRng,
        frame: FrameId,
        token: TypeToken,
    ) -> Option<Value> {
        match self.specs.get(&token)? {
            ValueSpec::Scalar => Some(Box::new(ScalarValue::new(token, rng.next_f64_in(-10.0, 10.0)))),
            ValueSpec::Geom {
                dim,
                frameless_token,
            } => {
                let coords: Vec<f64> = (0..*dim).map(|_| rng.next_f64_in(-10.0, 10.0)).collect();
                Some(Box::new(match frameless_token {
                    Some(frameless) => {
                        GeomValue::framed(token, *frameless, frame, coords, Rc::clone(&self.tree))
                    }
                    None => GeomValue::frameless(token, coords, Rc::clone(&self.tree)),
                }))
            }
        }
    }

    fn clone_instances(&self, values: &[Value]) -> Option<Vec<Value>> {
        if values
            .iter()
            .any(|value| self.uncloneable.contains(&value.type_token()))
        {
            return None;
        }
        Some(values.iter().map(|value| value.boxed_clone()).collect())
    }
}

/// Tokens of every fixture type, in registration order.
#[derive(Debug, Clone, Copy)]
pub struct FixtureTokens {
    pub double: TypeToken,
    pub point3d_read_only: TypeToken,
    pub point3d: TypeToken,
    pub frame_point3d_read_only: TypeToken,
    pub fixed_frame_point3d: TypeToken,
    pub frame_point3d: TypeToken,
    pub vector3d_read_only: TypeToken,
    pub vector3d: TypeToken,
    pub frame_vector3d_read_only: TypeToken,
    pub fixed_frame_vector3d: TypeToken,
    pub frame_vector3d: TypeToken,
    pub point2d_read_only: TypeToken,
    pub point2d: TypeToken,
    pub frame_point2d_read_only: TypeToken,
    pub fixed_frame_point2d: TypeToken,
    pub frame_point2d: TypeToken,
    pub geometry_tools: TypeToken,
    pub frame_geometry_tools: TypeToken,
    pub broken_frame_geometry_tools: TypeToken,
    pub frame_point3d_buggy: TypeToken,
}

/// The assembled fixture library: catalogs, registry, random service, and
/// the frame tree every value shares.
pub struct FixtureWorld {
    pub types: TypeCatalog,
    pub methods: MethodCatalog,
    pub registry: FrameTypeRegistry,
    pub random: FixtureRandomService,
    pub comparer: GeometryComparer,
    pub tree: Rc<TestFrameTree>,
    pub tokens: FixtureTokens,
}

impl FixtureWorld {
    pub fn new() -> Result<Self, FixtureError> {
        let tree = Rc::new(TestFrameTree::with_default_frames());
        let mut types = TypeCatalog::new();

        let double = types.declare("Double", &[], None)?;

        let point3d_read_only = types.declare("Point3DReadOnly", &[], Some(3))?;
        let point3d = types.declare("Point3D", &[point3d_read_only], Some(3))?;
        let frame_point3d_read_only = types.declare("FramePoint3DReadOnly", &[], Some(3))?;
        let fixed_frame_point3d =
            types.declare("FixedFramePoint3DBasics", &[frame_point3d_read_only], Some(3))?;
        let frame_point3d = types.declare("FramePoint3D", &[fixed_frame_point3d], Some(3))?;

        let vector3d_read_only = types.declare("Vector3DReadOnly", &[], Some(3))?;
        let vector3d = types.declare("Vector3D", &[vector3d_read_only], Some(3))?;
        let frame_vector3d_read_only = types.declare("FrameVector3DReadOnly", &[], Some(3))?;
        let fixed_frame_vector3d =
            types.declare("FixedFrameVector3DBasics", &[frame_vector3d_read_only], Some(3))?;
        let frame_vector3d = types.declare("FrameVector3D", &[fixed_frame_vector3d], Some(3))?;

        let point2d_read_only = types.declare("Point2DReadOnly", &[], Some(2))?;
        let point2d = types.declare("Point2D", &[point2d_read_only], Some(2))?;
        let frame_point2d_read_only = types.declare("FramePoint2DReadOnly", &[], Some(2))?;
        let fixed_frame_point2d =
            types.declare("FixedFramePoint2DBasics", &[frame_point2d_read_only], Some(2))?;
        let frame_point2d = types.declare("FramePoint2D", &[fixed_frame_point2d], Some(2))?;

        let geometry_tools = types.declare("GeometryTools", &[], None)?;
        let frame_geometry_tools = types.declare("FrameGeometryTools", &[], None)?;
        let broken_frame_geometry_tools = types.declare("BrokenFrameGeometryTools", &[], None)?;
        let frame_point3d_buggy = types.declare("FramePoint3DBuggy", &[], Some(3))?;

        let mut registry = FrameTypeRegistry::new();
        registry.register_frame_type_by_convention(&types, frame_point3d)?;
        registry.register_frame_type_by_convention(&types, frame_vector3d)?;
        registry.register_frame_type_by_convention(&types, frame_point2d)?;
        registry.exclude_frameless(double);

        let mut random = FixtureRandomService::new(Rc::clone(&tree));
        random.support_scalar(double);
        random.support_geom(point3d_read_only, 3, None);
        random.support_geom(point3d, 3, None);
        random.support_geom(frame_point3d_read_only, 3, Some(point3d_read_only));
        random.support_geom(fixed_frame_point3d, 3, Some(point3d));
        random.support_geom(frame_point3d, 3, Some(point3d));
        random.support_geom(vector3d_read_only, 3, None);
        random.support_geom(vector3d, 3, None);
        random.support_geom(frame_vector3d_read_only, 3, Some(vector3d_read_only));
        random.support_geom(fixed_frame_vector3d, 3, Some(vector3d));
        random.support_geom(frame_vector3d, 3, Some(vector3d));
        random.support_geom(point2d_read_only, 2, None);
        random.support_geom(point2d, 2, None);
        random.support_geom(frame_point2d_read_only, 2, Some(point2d_read_only));
        random.support_geom(fixed_frame_point2d, 2, Some(point2d));
        random.support_geom(frame_point2d, 2, Some(point2d));

        let tokens = FixtureTokens {
            double,
            point3d_read_only,
            point3d,
            frame_point3d_read_only,
            fixed_frame_point3d,
            frame_point3d,
            vector3d_read_only,
            vector3d,
            frame_vector3d_read_only,
            fixed_frame_vector3d,
            frame_vector3d,
            point2d_read_only,
            point2d,
            frame_point2d_read_only,
            fixed_frame_point2d,
            frame_point2d,
            geometry_tools,
            frame_geometry_tools,
            broken_frame_geometry_tools,
            frame_point3d_buggy,
        };

        let mut world = Self {
            types,
            methods: MethodCatalog::new(),
            registry,
            random,
            comparer: GeometryComparer::new(),
            tree,
            tokens,
        };
        world.declare_geometry_tools();
        world.declare_frame_geometry_tools();
        world.declare_broken_frame_geometry_tools();
        world.declare_point3d_methods();
        world.declare_frame_point3d_methods();
        world.declare_point2d_methods();
        world.declare_frame_point2d_methods();
        world.declare_buggy_holder_methods();
        Ok(world)
    }

    /// Context over this world with frame A = 1, frame B = 2.
    #[must_use]
    pub fn context(&self) -> CheckContext<'_> {
        CheckContext {
            types: &self.types,
            methods: &self.methods,
            registry: &self.registry,
            random: &self.random,
            comparer: &self.comparer,
            frame_a: FrameId(1),
            frame_b: FrameId(2),
            seed: DEFAULT_CHECK_SEED,
        }
    }

    /// Random frame holder of the given token, for factory closures.
    #[must_use]
    pub fn random_holder(
        &self,
        rng: &mut DeterministicRng,
        frame: FrameId,
        token: TypeToken,
        frameless_token: TypeToken,
        dim: usize,
    ) -> Value {
        let coords: Vec<f64> = (0..dim).map(|_| rng.next_f64_in(-10.0, 10.0)).collect();
        Box::new(GeomValue::framed(
            token,
            frameless_token,
            frame,
            coords,
            Rc::clone(&self.tree),
        ))
    }

    fn declare_geometry_tools(&mut self) {
        let t = self.tokens;
        let tree = Rc::clone(&self.tree);

        self.methods.declare_static(
            t.geometry_tools,
            MethodSignature::new(
                "dist",
                vec![t.point3d_read_only, t.point3d_read_only],
                Some(t.double),
            ),
            Box::new(move |args| {
                let a = geom_at(args, 0)?;
                let b = geom_at(args, 1)?;
                let value = euclidean_dist(a.coords(), b.coords());
                Ok(Some(Box::new(ScalarValue::new(t.double, value))))
            }),
        );

        self.methods.declare_static(
            t.geometry_tools,
            MethodSignature::new("norm", vec![t.point3d_read_only], Some(t.double)),
            Box::new(move |args| {
                let p = geom_at(args, 0)?;
                let value = euclidean_dist(p.coords(), &[0.0, 0.0, 0.0]);
                Ok(Some(Box::new(ScalarValue::new(t.double, value))))
            }),
        );

        let midpoint_tree = Rc::clone(&tree);
        self.methods.declare_static(
            t.geometry_tools,
            MethodSignature::new(
                "midpoint",
                vec![t.point3d_read_only, t.point3d_read_only],
                Some(t.point3d),
            ),
            Box::new(move |args| {
                let a = geom_at(args, 0)?;
                let b = geom_at(args, 1)?;
                let coords = midpoint3(a.coords(), b.coords());
                Ok(Some(Box::new(GeomValue::frameless(
                    t.point3d,
                    coords,
                    Rc::clone(&midpoint_tree),
                ))))
            }),
        );

        let centroid_tree = Rc::clone(&tree);
        self.methods.declare_static(
            t.geometry_tools,
            MethodSignature::new(
                "centroid",
                vec![t.point3d_read_only, t.point3d_read_only],
                Some(t.point3d),
            ),
            Box::new(move |args| {
                let a = geom_at(args, 0)?;
                let b = geom_at(args, 1)?;
                let coords = midpoint3(a.coords(), b.coords());
                Ok(Some(Box::new(GeomValue::frameless(
                    t.point3d,
                    coords,
                    Rc::clone(&centroid_tree),
                ))))
            }),
        );

        let translate_tree = Rc::clone(&tree);
        self.methods.declare_static(
            t.geometry_tools,
            MethodSignature::new(
                "translate",
                vec![t.point3d_read_only, t.vector3d_read_only],
                Some(t.point3d),
            ),
            Box::new(move |args| {
                let p = geom_at(args, 0)?;
                let v = geom_at(args, 1)?;
                let coords = add3(p.coords(), v.coords());
                Ok(Some(Box::new(GeomValue::frameless(
                    t.point3d,
                    coords,
                    Rc::clone(&translate_tree),
                ))))
            }),
        );

        self.methods.declare_static(
            t.geometry_tools,
            MethodSignature::new("packInto", vec![t.point3d_read_only, t.vector3d], None),
            Box::new(move |args| {
                let coords = geom_at(args, 0)?.coords().to_vec();
                let out = geom_at_mut(args, 1)?;
                out.assign(&coords);
                Ok(None)
            }),
        );

        self.methods.declare_static(
            t.geometry_tools,
            MethodSignature::new("validate", vec![t.point3d_read_only], None),
            Box::new(move |_args| {
                Err(MethodFault::new(DEGENERATE_FAULT, "degenerate input"))
            }),
        );
    }

    fn declare_frame_geometry_tools(&mut self) {
        let t = self.tokens;
        let tree = Rc::clone(&self.tree);

        for params in [
            vec![t.frame_point3d_read_only, t.point3d_read_only],
            vec![t.point3d_read_only, t.frame_point3d_read_only],
            vec![t.frame_point3d_read_only, t.frame_point3d_read_only],
        ] {
            self.methods.declare_static(
                t.frame_geometry_tools,
                MethodSignature::new("dist", params, Some(t.double)),
                Box::new(move |args| {
                    let a = geom_at(args, 0)?;
                    let b = geom_at(args, 1)?;
                    require_same_frame(&[a, b])?;
                    let value = euclidean_dist(a.coords(), b.coords());
                    Ok(Some(Box::new(ScalarValue::new(t.double, value))))
                }),
            );
        }

        self.methods.declare_static(
            t.frame_geometry_tools,
            MethodSignature::new("norm", vec![t.frame_point3d_read_only], Some(t.double)),
            Box::new(move |args| {
                let p = geom_at(args, 0)?;
                let value = euclidean_dist(p.coords(), &[0.0, 0.0, 0.0]);
                Ok(Some(Box::new(ScalarValue::new(t.double, value))))
            }),
        );

        let midpoint_tree = Rc::clone(&tree);
        self.methods.declare_static(
            t.frame_geometry_tools,
            MethodSignature::new(
                "midpoint",
                vec![t.frame_point3d_read_only, t.frame_point3d_read_only],
                Some(t.frame_point3d),
            ),
            Box::new(move |args| {
                let a = geom_at(args, 0)?;
                let b = geom_at(args, 1)?;
                let frame = require_same_frame(&[a, b])?;
                let coords = midpoint3(a.coords(), b.coords());
                Ok(Some(Box::new(GeomValue::framed(
                    t.frame_point3d,
                    t.point3d,
                    frame,
                    coords,
                    Rc::clone(&midpoint_tree),
                ))))
            }),
        );

        for params in [
            vec![t.frame_point3d_read_only, t.vector3d_read_only],
            vec![t.point3d_read_only, t.frame_vector3d_read_only],
            vec![t.frame_point3d_read_only, t.frame_vector3d_read_only],
        ] {
            let translate_tree = Rc::clone(&tree);
            self.methods.declare_static(
                t.frame_geometry_tools,
                MethodSignature::new("translate", params, Some(t.frame_point3d)),
                Box::new(move |args| {
                    let p = geom_at(args, 0)?;
                    let v = geom_at(args, 1)?;
                    let frame = require_same_frame(&[p, v])?;
                    let coords = add3(p.coords(), v.coords());
                    Ok(Some(Box::new(GeomValue::framed(
                        t.frame_point3d,
                        t.point3d,
                        frame,
                        coords,
                        Rc::clone(&translate_tree),
                    ))))
                }),
            );
        }

        self.methods.declare_static(
            t.frame_geometry_tools,
            MethodSignature::new(
                "packInto",
                vec![t.frame_point3d_read_only, t.frame_vector3d],
                None,
            ),
            Box::new(move |args| {
                let source = geom_at(args, 0)?;
                let coords = source.coords().to_vec();
                let frame = source.reference_frame();
                let out = geom_at_mut(args, 1)?;
                out.assign(&coords);
                if let Some(frame) = frame {
                    out.set_reference_frame(frame);
                }
                Ok(None)
            }),
        );

        self.methods.declare_static(
            t.frame_geometry_tools,
            MethodSignature::new("validate", vec![t.frame_point3d_read_only], None),
            Box::new(move |_args| {
                Err(MethodFault::new(DEGENERATE_FAULT, "degenerate input"))
            }),
        );
    }

    fn declare_broken_frame_geometry_tools(&mut self) {
        let t = self.tokens;
        let tree = Rc::clone(&self.tree);

        // No frame check at all.
        self.methods.declare_static(
            t.broken_frame_geometry_tools,
            MethodSignature::new(
                "dist",
                vec![t.frame_point3d_read_only, t.frame_point3d_read_only],
                Some(t.double),
            ),
            Box::new(move |args| {
                let a = geom_at(args, 0)?;
                let b = geom_at(args, 1)?;
                let value = euclidean_dist(a.coords(), b.coords());
                Ok(Some(Box::new(ScalarValue::new(t.double, value))))
            }),
        );

        // Checks frames but pins the result to the root frame.
        let midpoint_tree = Rc::clone(&tree);
        self.methods.declare_static(
            t.broken_frame_geometry_tools,
            MethodSignature::new(
                "midpoint",
                vec![t.frame_point3d_read_only, t.frame_point3d_read_only],
                Some(t.frame_point3d),
            ),
            Box::new(move |args| {
                let a = geom_at(args, 0)?;
                let b = geom_at(args, 1)?;
                require_same_frame(&[a, b])?;
                let coords = midpoint3(a.coords(), b.coords());
                Ok(Some(Box::new(GeomValue::framed(
                    t.frame_point3d,
                    t.point3d,
                    FrameId(0),
                    coords,
                    Rc::clone(&midpoint_tree),
                ))))
            }),
        );

        // Copies coordinates but never adopts the operation's frame.
        self.methods.declare_static(
            t.broken_frame_geometry_tools,
            MethodSignature::new(
                "packInto",
                vec![t.frame_point3d_read_only, t.frame_vector3d],
                None,
            ),
            Box::new(move |args| {
                let coords = geom_at(args, 0)?.coords().to_vec();
                let out = geom_at_mut(args, 1)?;
                out.assign(&coords);
                Ok(None)
            }),
        );

        // Off by a constant relative to the frameless original.
        self.methods.declare_static(
            t.broken_frame_geometry_tools,
            MethodSignature::new("norm", vec![t.frame_point3d_read_only], Some(t.double)),
            Box::new(move |args| {
                let p = geom_at(args, 0)?;
                let value = euclidean_dist(p.coords(), &[0.0, 0.0, 0.0]) + 0.25;
                Ok(Some(Box::new(ScalarValue::new(t.double, value))))
            }),
        );

        // Raises a different fault kind than the frameless original.
        self.methods.declare_static(
            t.broken_frame_geometry_tools,
            MethodSignature::new("validate", vec![t.frame_point3d_read_only], None),
            Box::new(move |_args| Err(MethodFault::new(SINGULAR_FAULT, "singular input"))),
        );

        // Overload of `centroid` with a gratuitously wide return type.
        self.methods.declare_static(
            t.broken_frame_geometry_tools,
            MethodSignature::new(
                "centroid",
                vec![t.frame_point3d_read_only, t.frame_point3d_read_only],
                Some(t.double),
            ),
            Box::new(move |args| {
                let a = geom_at(args, 0)?;
                let b = geom_at(args, 1)?;
                let value = euclidean_dist(a.coords(), b.coords()) / 2.0;
                Ok(Some(Box::new(ScalarValue::new(t.double, value))))
            }),
        );
    }

    fn declare_point3d_methods(&mut self) {
        let t = self.tokens;

        self.methods.declare_instance(
            t.point3d,
            MethodSignature::new("set", vec![t.point3d_read_only], None),
            Box::new(move |receiver, args| {
                let coords = geom_at(args, 0)?.coords().to_vec();
                receiver_geom(receiver)?.assign(&coords);
                Ok(None)
            }),
        );

        self.methods.declare_instance(
            t.point3d,
            MethodSignature::new("set", vec![t.point3d_read_only, t.point3d_read_only], None),
            Box::new(move |receiver, args| {
                let a = geom_at(args, 0)?.coords().to_vec();
                let b = geom_at(args, 1)?.coords().to_vec();
                receiver_geom(receiver)?.assign(&midpoint3(&a, &b));
                Ok(None)
            }),
        );

        self.methods.declare_instance(
            t.point3d,
            MethodSignature::new("add", vec![t.point3d_read_only], None),
            Box::new(move |receiver, args| {
                let delta = geom_at(args, 0)?.coords().to_vec();
                let target = receiver_geom(receiver)?;
                let sum = add3(target.coords(), &delta);
                target.assign(&sum);
                Ok(None)
            }),
        );

        self.methods.declare_instance(
            t.point3d,
            MethodSignature::new("setToZero", vec![], None),
            Box::new(move |receiver, _args| {
                receiver_geom(receiver)?.assign(&[0.0, 0.0, 0.0]);
                Ok(None)
            }),
        );
    }

    fn declare_frame_point3d_methods(&mut self) {
        let t = self.tokens;

        self.methods.declare_instance(
            t.frame_point3d,
            MethodSignature::new("set", vec![t.frame_point3d_read_only], None),
            Box::new(move |receiver, args| {
                let arg = geom_at(args, 0)?;
                let coords = arg.coords().to_vec();
                let arg_frame = arg.reference_frame();
                let target = receiver_geom(receiver)?;
                require_frames_equal(target.reference_frame(), arg_frame)?;
                target.assign(&coords);
                Ok(None)
            }),
        );

        self.methods.declare_instance(
            t.frame_point3d,
            MethodSignature::new("set", vec![t.point3d_read_only], None),
            Box::new(move |receiver, args| {
                let coords = geom_at(args, 0)?.coords().to_vec();
                receiver_geom(receiver)?.assign(&coords);
                Ok(None)
            }),
        );

        self.methods.declare_instance(
            t.frame_point3d,
            MethodSignature::new(
                "set",
                vec![t.frame_point3d_read_only, t.frame_point3d_read_only],
                None,
            ),
            Box::new(move |receiver, args| {
                let a = geom_at(args, 0)?;
                let b = geom_at(args, 1)?;
                let frame = require_same_frame(&[a, b])?;
                let coords = midpoint3(a.coords(), b.coords());
                let target = receiver_geom(receiver)?;
                require_frames_equal(target.reference_frame(), Some(frame))?;
                target.assign(&coords);
                Ok(None)
            }),
        );

        self.methods.declare_instance(
            t.frame_point3d,
            MethodSignature::new("set", vec![t.point3d_read_only, t.point3d_read_only], None),
            Box::new(move |receiver, args| {
                let a = geom_at(args, 0)?.coords().to_vec();
                let b = geom_at(args, 1)?.coords().to_vec();
                receiver_geom(receiver)?.assign(&midpoint3(&a, &b));
                Ok(None)
            }),
        );

        self.methods.declare_instance(
            t.frame_point3d,
            MethodSignature::new("add", vec![t.frame_point3d_read_only], None),
            Box::new(move |receiver, args| {
                let arg = geom_at(args, 0)?;
                let delta = arg.coords().to_vec();
                let arg_frame = arg.reference_frame();
                let target = receiver_geom(receiver)?;
                require_frames_equal(target.reference_frame(), arg_frame)?;
                let sum = add3(target.coords(), &delta);
                target.assign(&sum);
                Ok(None)
            }),
        );

        self.methods.declare_instance(
            t.frame_point3d,
            MethodSignature::new("add", vec![t.point3d_read_only], None),
            Box::new(move |receiver, args| {
                let delta = geom_at(args, 0)?.coords().to_vec();
                let target = receiver_geom(receiver)?;
                let sum = add3(target.coords(), &delta);
                target.assign(&sum);
                Ok(None)
            }),
        );

        self.methods.declare_instance(
            t.frame_point3d,
            MethodSignature::new("setToZero", vec![], None),
            Box::new(move |receiver, _args| {
                receiver_geom(receiver)?.assign(&[0.0, 0.0, 0.0]);
                Ok(None)
            }),
        );

        // setMatchingFrame: reconcile by transforming into the receiver's
        // frame; the receiver's frame never changes.
        self.methods.declare_instance(
            t.frame_point3d,
            MethodSignature::new("setMatchingFrame", vec![t.frame_point3d_read_only], None),
            Box::new(move |receiver, args| {
                let arg = geom_at(args, 0)?;
                let mut coords = arg.coords().to_vec();
                let arg_frame = arg.reference_frame();
                let tree = Rc::clone(&arg.tree);
                let target = receiver_geom(receiver)?;
                if let (Some(from), Some(to)) = (arg_frame, target.reference_frame()) {
                    tree.transform(from, to, &mut coords);
                }
                target.assign(&coords);
                Ok(None)
            }),
        );

        self.methods.declare_instance(
            t.frame_point3d,
            MethodSignature::new(
                "setMatchingFrame",
                vec![self.types.reference_frame_token(), t.point3d_read_only],
                None,
            ),
            Box::new(move |receiver, args| {
                let from = frame_of(args, 0)?;
                let mut coords = geom_at(args, 1)?.coords().to_vec();
                let tree = Rc::clone(&geom_at(args, 1)?.tree);
                let target = receiver_geom(receiver)?;
                if let Some(to) = target.reference_frame() {
                    tree.transform(from, to, &mut coords);
                }
                target.assign(&coords);
                Ok(None)
            }),
        );

        self.methods.declare_instance(
            t.frame_point3d,
            MethodSignature::new(
                "setMatchingFrame",
                vec![t.frame_point3d_read_only, t.frame_point3d_read_only],
                None,
            ),
            Box::new(move |receiver, args| {
                let a = geom_at(args, 0)?;
                let b = geom_at(args, 1)?;
                let from = require_same_frame(&[a, b])?;
                let mut coords = midpoint3(a.coords(), b.coords());
                let tree = Rc::clone(&a.tree);
                let target = receiver_geom(receiver)?;
                if let Some(to) = target.reference_frame() {
                    tree.transform(from, to, &mut coords);
                }
                target.assign(&coords);
                Ok(None)
            }),
        );

        self.methods.declare_instance(
            t.frame_point3d,
            MethodSignature::new(
                "setMatchingFrame",
                vec![
                    self.types.reference_frame_token(),
                    t.point3d_read_only,
                    t.point3d_read_only,
                ],
                None,
            ),
            Box::new(move |receiver, args| {
                let from = frame_of(args, 0)?;
                let a = geom_at(args, 1)?.coords().to_vec();
                let b = geom_at(args, 2)?.coords().to_vec();
                let tree = Rc::clone(&geom_at(args, 1)?.tree);
                let mut coords = midpoint3(&a, &b);
                let target = receiver_geom(receiver)?;
                if let Some(to) = target.reference_frame() {
                    tree.transform(from, to, &mut coords);
                }
                target.assign(&coords);
                Ok(None)
            }),
        );

        // setIncludingFrame: adopt the arguments' frame outright.
        self.methods.declare_instance(
            t.frame_point3d,
            MethodSignature::new("setIncludingFrame", vec![t.frame_point3d_read_only], None),
            Box::new(move |receiver, args| {
                let arg = geom_at(args, 0)?;
                let coords = arg.coords().to_vec();
                let arg_frame = arg.reference_frame();
                let target = receiver_geom(receiver)?;
                target.assign(&coords);
                if let Some(frame) = arg_frame {
                    target.set_reference_frame(frame);
                }
                Ok(None)
            }),
        );

        self.methods.declare_instance(
            t.frame_point3d,
            MethodSignature::new(
                "setIncludingFrame",
                vec![self.types.reference_frame_token(), t.point3d_read_only],
                None,
            ),
            Box::new(move |receiver, args| {
                let frame = frame_of(args, 0)?;
                let coords = geom_at(args, 1)?.coords().to_vec();
                let target = receiver_geom(receiver)?;
                target.assign(&coords);
                target.set_reference_frame(frame);
                Ok(None)
            }),
        );

        self.methods.declare_instance(
            t.frame_point3d,
            MethodSignature::new(
                "setIncludingFrame",
                vec![t.frame_point3d_read_only, t.frame_point3d_read_only],
                None,
            ),
            Box::new(move |receiver, args| {
                let a = geom_at(args, 0)?;
                let b = geom_at(args, 1)?;
                let frame = require_same_frame(&[a, b])?;
                let coords = midpoint3(a.coords(), b.coords());
                let target = receiver_geom(receiver)?;
                target.assign(&coords);
                target.set_reference_frame(frame);
                Ok(None)
            }),
        );
    }

    fn declare_point2d_methods(&mut self) {
        let t = self.tokens;

        self.methods.declare_instance(
            t.point2d,
            MethodSignature::new("set", vec![t.point2d_read_only], None),
            Box::new(move |receiver, args| {
                let coords = geom_at(args, 0)?.coords().to_vec();
                receiver_geom(receiver)?.assign(&coords);
                Ok(None)
            }),
        );

        // 2D-from-3D projection.
        self.methods.declare_instance(
            t.point2d,
            MethodSignature::new("set", vec![t.point3d_read_only], None),
            Box::new(move |receiver, args| {
                let coords = geom_at(args, 0)?.coords().to_vec();
                receiver_geom(receiver)?.assign(&coords);
                Ok(None)
            }),
        );
    }

    fn declare_frame_point2d_methods(&mut self) {
        let t = self.tokens;

        self.methods.declare_instance(
            t.frame_point2d,
            MethodSignature::new("set", vec![t.frame_point2d_read_only], None),
            Box::new(move |receiver, args| {
                let arg = geom_at(args, 0)?;
                let coords = arg.coords().to_vec();
                let arg_frame = arg.reference_frame();
                let target = receiver_geom(receiver)?;
                require_frames_equal(target.reference_frame(), arg_frame)?;
                target.assign(&coords);
                Ok(None)
            }),
        );

        self.methods.declare_instance(
            t.frame_point2d,
            MethodSignature::new("set", vec![t.point2d_read_only], None),
            Box::new(move |receiver, args| {
                let coords = geom_at(args, 0)?.coords().to_vec();
                receiver_geom(receiver)?.assign(&coords);
                Ok(None)
            }),
        );

        self.methods.declare_instance(
            t.frame_point2d,
            MethodSignature::new("set", vec![t.point3d_read_only], None),
            Box::new(move |receiver, args| {
                let coords = geom_at(args, 0)?.coords().to_vec();
                receiver_geom(receiver)?.assign(&coords);
                Ok(None)
            }),
        );

        self.methods.declare_instance(
            t.frame_point2d,
            MethodSignature::new("setMatchingFrame", vec![t.frame_point2d_read_only], None),
            Box::new(move |receiver, args| {
                let arg = geom_at(args, 0)?;
                let mut coords = arg.coords().to_vec();
                let arg_frame = arg.reference_frame();
                let tree = Rc::clone(&arg.tree);
                let target = receiver_geom(receiver)?;
                if let (Some(from), Some(to)) = (arg_frame, target.reference_frame()) {
                    tree.transform(from, to, &mut coords);
                }
                target.assign(&coords);
                Ok(None)
            }),
        );

        // 2D receiver, 3D argument: transform the argument copy into the
        // receiver's frame, then project.
        self.methods.declare_instance(
            t.frame_point2d,
            MethodSignature::new("setMatchingFrame", vec![t.frame_point3d_read_only], None),
            Box::new(move |receiver, args| {
                let arg = geom_at(args, 0)?;
                let mut coords = arg.coords().to_vec();
                let arg_frame = arg.reference_frame();
                let tree = Rc::clone(&arg.tree);
                let target = receiver_geom(receiver)?;
                if let (Some(from), Some(to)) = (arg_frame, target.reference_frame()) {
                    tree.transform(from, to, &mut coords);
                }
                target.assign(&coords);
                Ok(None)
            }),
        );

        self.methods.declare_instance(
            t.frame_point2d,
            MethodSignature::new(
                "setMatchingFrame",
                vec![self.types.reference_frame_token(), t.point2d_read_only],
                None,
            ),
            Box::new(move |receiver, args| {
                let from = frame_of(args, 0)?;
                let mut coords = geom_at(args, 1)?.coords().to_vec();
                let tree = Rc::clone(&geom_at(args, 1)?.tree);
                let target = receiver_geom(receiver)?;
                if let Some(to) = target.reference_frame() {
                    tree.transform(from, to, &mut coords);
                }
                target.assign(&coords);
                Ok(None)
            }),
        );

        self.methods.declare_instance(
            t.frame_point2d,
            MethodSignature::new(
                "setMatchingFrame",
                vec![self.types.reference_frame_token(), t.point3d_read_only],
                None,
            ),
            Box::new(move |receiver, args| {
                let from = frame_of(args, 0)?;
                let source = geom_at(args, 1)?;
                let tree = Rc::clone(&source.tree);
                let mut coords = source.coords()[..2].to_vec();
                let target = receiver_geom(receiver)?;
                if let Some(to) = target.reference_frame() {
                    tree.transform(from, to, &mut coords);
                }
                target.assign(&coords);
                Ok(None)
            }),
        );

        // setIncludingFrame: adopt the argument's frame, project verbatim.
        self.methods.declare_instance(
            t.frame_point2d,
            MethodSignature::new("setIncludingFrame", vec![t.frame_point2d_read_only], None),
            Box::new(move |receiver, args| {
                let arg = geom_at(args, 0)?;
                let coords = arg.coords().to_vec();
                let arg_frame = arg.reference_frame();
                let target = receiver_geom(receiver)?;
                target.assign(&coords);
                if let Some(frame) = arg_frame {
                    target.set_reference_frame(frame);
                }
                Ok(None)
            }),
        );

        // 2D receiver, 3D argument: once the receiver adopts the argument's
        // frame there is nothing to transform, only project.
        self.methods.declare_instance(
            t.frame_point2d,
            MethodSignature::new("setIncludingFrame", vec![t.frame_point3d_read_only], None),
            Box::new(move |receiver, args| {
                let arg = geom_at(args, 0)?;
                let coords = arg.coords()[..2].to_vec();
                let arg_frame = arg.reference_frame();
                let target = receiver_geom(receiver)?;
                target.assign(&coords);
                if let Some(frame) = arg_frame {
                    target.set_reference_frame(frame);
                }
                Ok(None)
            }),
        );
    }

    fn declare_buggy_holder_methods(&mut self) {
        let t = self.tokens;

        self.methods.declare_instance(
            t.frame_point3d_buggy,
            MethodSignature::new("set", vec![t.point3d_read_only], None),
            Box::new(move |receiver, args| {
                let coords = geom_at(args, 0)?.coords().to_vec();
                receiver_geom(receiver)?.assign(&coords);
                Ok(None)
            }),
        );

        // Sign error: subtracts where the frameless original adds.
        self.methods.declare_instance(
            t.frame_point3d_buggy,
            MethodSignature::new("add", vec![t.frame_point3d_read_only], None),
            Box::new(move |receiver, args| {
                let arg = geom_at(args, 0)?;
                let delta = arg.coords().to_vec();
                let arg_frame = arg.reference_frame();
                let target = receiver_geom(receiver)?;
                require_frames_equal(target.reference_frame(), arg_frame)?;
                let diff: Vec<f64> = target
                    .coords()
                    .iter()
                    .zip(&delta)
                    .map(|(a, b)| a - b)
                    .collect();
                target.assign(&diff);
                Ok(None)
            }),
        );

        // Never checks the argument frame against the receiver.
        self.methods.declare_instance(
            t.frame_point3d_buggy,
            MethodSignature::new("sub", vec![t.frame_point3d_read_only], None),
            Box::new(move |receiver, args| {
                let delta = geom_at(args, 0)?.coords().to_vec();
                let target = receiver_geom(receiver)?;
                let diff: Vec<f64> = target
                    .coords()
                    .iter()
                    .zip(&delta)
                    .map(|(a, b)| a - b)
                    .collect();
                target.assign(&diff);
                Ok(None)
            }),
        );

        // Copies raw coordinates without reconciling frames.
        self.methods.declare_instance(
            t.frame_point3d_buggy,
            MethodSignature::new("setMatchingFrame", vec![t.frame_point3d_read_only], None),
            Box::new(move |receiver, args| {
                let coords = geom_at(args, 0)?.coords().to_vec();
                receiver_geom(receiver)?.assign(&coords);
                Ok(None)
            }),
        );
    }
}

fn euclidean_dist(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}

fn midpoint3(a: &[f64], b: &[f64]) -> Vec<f64> {
    a.iter().zip(b).map(|(x, y)| (x + y) / 2.0).collect()
}

fn add3(a: &[f64], b: &[f64]) -> Vec<f64> {
    a.iter().zip(b).map(|(x, y)| x + y).collect()
}

fn geom_at(args: &[Value], index: usize) -> Result<&GeomValue, MethodFault> {
    args.get(index)
        .and_then(|value| value.as_any().downcast_ref::<GeomValue>())
        .ok_or_else(|| {
            MethodFault::new(FIXTURE_TYPE_FAULT, format!("argument {index} is not a GeomValue"))
        })
}

fn geom_at_mut(args: &mut [Value], index: usize) -> Result<&mut GeomValue, MethodFault> {
    args.get_mut(index)
        .and_then(|value| value.as_any_mut().downcast_mut::<GeomValue>())
        .ok_or_else(|| {
            MethodFault::new(FIXTURE_TYPE_FAULT, format!("argument {index} is not a GeomValue"))
        })
}

fn receiver_geom(receiver: &mut dyn DynValue) -> Result<&mut GeomValue, MethodFault> {
    receiver
        .as_any_mut()
        .downcast_mut::<GeomValue>()
        .ok_or_else(|| MethodFault::new(FIXTURE_TYPE_FAULT, "receiver is not a GeomValue"))
}

fn frame_of(args: &[Value], index: usize) -> Result<FrameId, MethodFault> {
    args.get(index)
        .and_then(|value| value.reference_frame())
        .ok_or_else(|| {
            MethodFault::new(FIXTURE_TYPE_FAULT, format!("argument {index} carries no frame"))
        })
}

fn require_same_frame(values: &[&GeomValue]) -> Result<FrameId, MethodFault> {
    let mut frames = values.iter().filter_map(|value| value.reference_frame());
    let Some(first) = frames.next() else {
        return Err(MethodFault::new(FIXTURE_TYPE_FAULT, "no frame-bearing argument"));
    };
    for frame in frames {
        if frame != first {
            return Err(MethodFault::frame_mismatch(format!("{first} vs {frame}")));
        }
    }
    Ok(first)
}

fn require_frames_equal(
    receiver: Option<FrameId>,
    argument: Option<FrameId>,
) -> Result<(), MethodFault> {
    match (receiver, argument) {
        (Some(a), Some(b)) if a != b => Err(MethodFault::frame_mismatch(format!("{a} vs {b}"))),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::{FixtureWorld, GeomValue, TestFrameTree};
    use feu_model::{DynValue, FrameId};
    use std::rc::Rc;

    #[test]
    fn frame_tree_transforms_are_invertible() {
        let tree = TestFrameTree::with_default_frames();
        let mut coords = [3.0, -1.0, 2.0];
        tree.transform(FrameId(1), FrameId(2), &mut coords);
        tree.transform(FrameId(2), FrameId(1), &mut coords);
        assert!((coords[0] - 3.0).abs() < 1.0e-12);
        assert!((coords[1] + 1.0).abs() < 1.0e-12);
        assert!((coords[2] - 2.0).abs() < 1.0e-12);
    }

    #[test]
    fn framed_values_project_to_their_frameless_sibling() {
        let world = FixtureWorld::new().expect("fixture world");
        let value = GeomValue::framed(
            world.tokens.frame_point3d,
            world.tokens.point3d,
            FrameId(1),
            vec![1.0, 2.0, 3.0],
            Rc::clone(&world.tree),
        );
        let view = value.frameless_view().expect("frameless view");
        assert_eq!(view.type_token(), world.tokens.point3d);
        assert_eq!(view.reference_frame(), None);
        assert!(view.epsilon_equals(
            &GeomValue::frameless(
                world.tokens.point3d,
                vec![1.0, 2.0, 3.0],
                Rc::clone(&world.tree)
            ),
            1.0e-12
        ));
    }

    #[test]
    fn change_frame_moves_coordinates() {
        let world = FixtureWorld::new().expect("fixture world");
        let mut value = GeomValue::framed(
            world.tokens.frame_point3d,
            world.tokens.point3d,
            FrameId(1),
            vec![0.0, 0.0, 0.0],
            Rc::clone(&world.tree),
        );
        value.change_frame(FrameId(2)).expect("change frame");
        assert_eq!(value.reference_frame(), Some(FrameId(2)));
        // offset(1) - offset(2) = (4.0, -6.0, -7.0)
        assert!((value.coords()[0] - 4.0).abs() < 1.0e-12);
        assert!((value.coords()[1] + 6.0).abs() < 1.0e-12);
        assert!((value.coords()[2] + 7.0).abs() < 1.0e-12);
    }
}
