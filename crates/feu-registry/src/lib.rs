#![forbid(unsafe_code)]

//! Bidirectional frameless ↔ frame-aware type registry.
//!
//! Populated once before verification runs, read-only afterwards. Explicit
//! registration is the source of truth; convention-based discovery over
//! type names (`Frame`/`FixedFrame` prefixes, `Basics`/`ReadOnly` suffixes)
//! is a setup aid that resolves against the same table.

use feu_model::{FaultKind, FrameMutability, TypeCatalog, TypeToken};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// No sibling type with the conventional name exists in the catalog.
    /// Fatal configuration error, surfaced before any checking starts.
    UnresolvedSibling { requesting: String, missing: String },
    DuplicateRegistration { name: String },
    NotAFrameTypeName { name: String },
}

impl RegistryError {
    #[must_use]
    pub const fn reason_code(&self) -> &'static str {
        match self {
            Self::UnresolvedSibling { .. } => "registry_unresolved_sibling",
            Self::DuplicateRegistration { .. } => "registry_duplicate_registration",
            Self::NotAFrameTypeName { .. } => "registry_not_a_frame_type_name",
        }
    }
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnresolvedSibling {
                requesting,
                missing,
            } => write!(
                f,
                "could not resolve sibling '{missing}' while registering '{requesting}'"
            ),
            Self::DuplicateRegistration { name } => {
                write!(f, "type '{name}' is already registered")
            }
            Self::NotAFrameTypeName { name } => write!(
                f,
                "type name '{name}' does not follow the Frame<...> convention"
            ),
        }
    }
}

impl std::error::Error for RegistryError {}

/// Frameless ↔ frame-aware mapping plus auxiliary classification sets.
#[derive(Debug, Default)]
pub struct FrameTypeRegistry {
    frameless_to_frame: BTreeMap<TypeToken, TypeToken>,
    frame_to_frameless: BTreeMap<TypeToken, TypeToken>,
    mutability: BTreeMap<TypeToken, FrameMutability>,
    frameless_without_equivalent: BTreeSet<TypeToken>,
    faults_to_ignore: BTreeSet<FaultKind>,
}

impl FrameTypeRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one frame type family.
    ///
    /// Mapping: frameless read-only → frame read-only, frameless mutable →
    /// fixed-frame mutable (plain overloads must not reassign frames). All
    /// three frame variants map back to their frameless sibling.
    pub fn register_frame_type(
        &mut self,
        catalog: &TypeCatalog,
        mutable_frame_mutable: TypeToken,
        fixed_frame_mutable: TypeToken,
        frame_read_only: TypeToken,
        frameless_mutable: TypeToken,
        frameless_read_only: TypeToken,
    ) -> Result<(), RegistryError> {
        for frameless in [frameless_mutable, frameless_read_only] {
            if self.frameless_to_frame.contains_key(&frameless) {
                return Err(RegistryError::DuplicateRegistration {
                    name: catalog.name(frameless).to_string(),
                });
            }
        }

        self.frameless_to_frame
            .insert(frameless_read_only, frame_read_only);
        self.frameless_to_frame
            .insert(frameless_mutable, fixed_frame_mutable);

        self.frame_to_frameless
            .insert(frame_read_only, frameless_read_only);
        self.frame_to_frameless
            .insert(fixed_frame_mutable, frameless_mutable);
        self.frame_to_frameless
            .insert(mutable_frame_mutable, frameless_mutable);

        self.mutability
            .insert(frame_read_only, FrameMutability::ReadOnly);
        self.mutability
            .insert(fixed_frame_mutable, FrameMutability::FixedFrame);
        self.mutability
            .insert(mutable_frame_mutable, FrameMutability::MutableFrame);
        Ok(())
    }

    /// Derives the four siblings of a `Frame<X>` mutable type by name and
    /// registers the family: `FixedFrame<X>Basics`, `Frame<X>ReadOnly`,
    /// `<X>`, `<X>ReadOnly`.
    pub fn register_frame_type_by_convention(
        &mut self,
        catalog: &TypeCatalog,
        mutable_frame_mutable: TypeToken,
    ) -> Result<(), RegistryError> {
        let frame_name = catalog.name(mutable_frame_mutable).to_string();
        let base = frame_name
            .strip_prefix("Frame")
            .ok_or_else(|| RegistryError::NotAFrameTypeName {
                name: frame_name.clone(),
            })?;

        let fixed_name = format!("FixedFrame{base}Basics");
        let read_only_name = format!("Frame{base}ReadOnly");
        let frameless_name = base.to_string();
        let frameless_read_only_name = format!("{base}ReadOnly");

        let resolve = |name: &str| -> Result<TypeToken, RegistryError> {
            catalog
                .token(name)
                .ok_or_else(|| RegistryError::UnresolvedSibling {
                    requesting: frame_name.clone(),
                    missing: name.to_string(),
                })
        };

        let fixed = resolve(&fixed_name)?;
        let read_only = resolve(&read_only_name)?;
        let frameless = resolve(&frameless_name)?;
        let frameless_read_only = resolve(&frameless_read_only_name)?;

        self.register_frame_type(
            catalog,
            mutable_frame_mutable,
            fixed,
            read_only,
            frameless,
            frameless_read_only,
        )
    }

    /// Marks a frameless type (e.g. a scalar wrapper) as intentionally
    /// having no frame-aware equivalent.
    pub fn exclude_frameless(&mut self, frameless: TypeToken) {
        self.frameless_without_equivalent.insert(frameless);
    }

    pub fn register_faults_to_ignore(&mut self, kinds: &[FaultKind]) {
        self.faults_to_ignore.extend(kinds.iter().copied());
    }

    #[must_use]
    pub fn is_ignored_fault(&self, kind: FaultKind) -> bool {
        self.faults_to_ignore.contains(&kind)
    }

    /// Frame-mutability of a registered frame type; `None` for anything
    /// that is not a registered frame type.
    #[must_use]
    pub fn frame_mutability(&self, token: TypeToken) -> Option<FrameMutability> {
        self.mutability.get(&token).copied()
    }

    #[must_use]
    pub fn is_frame_type(&self, token: TypeToken) -> bool {
        self.mutability.contains_key(&token)
    }

    /// Resolves the frame-aware equivalent of `frameless`, picking the most
    /// specific registered key assignable from it. Array types resolve
    /// component-wise.
    #[must_use]
    pub fn find_corresponding_frame_type(
        &self,
        catalog: &TypeCatalog,
        frameless: TypeToken,
    ) -> Option<TypeToken> {
        if self.frameless_without_equivalent.contains(&frameless) {
            return None;
        }
        if let Some(element) = catalog.element(frameless) {
            let mapped = self.find_corresponding_frame_type(catalog, element)?;
            return catalog.array_of(mapped);
        }
        Self::resolve_most_specific(catalog, &self.frameless_to_frame, frameless)
    }

    /// Reverse resolution: frame-aware → frameless, symmetric rule.
    #[must_use]
    pub fn find_corresponding_frameless_type(
        &self,
        catalog: &TypeCatalog,
        frame: TypeToken,
    ) -> Option<TypeToken> {
        if let Some(element) = catalog.element(frame) {
            let mapped = self.find_corresponding_frameless_type(catalog, element)?;
            return catalog.array_of(mapped);
        }
        Self::resolve_most_specific(catalog, &self.frame_to_frameless, frame)
    }

    /// Among registered keys assignable from `query`, discard any key that
    /// has another candidate strictly assignable to it; the first survivor
    /// in token order wins. Key-side and value-side minimality coincide
    /// because registration inserts whole families at once.
    fn resolve_most_specific(
        catalog: &TypeCatalog,
        table: &BTreeMap<TypeToken, TypeToken>,
        query: TypeToken,
    ) -> Option<TypeToken> {
        let candidates: Vec<TypeToken> = table
            .keys()
            .copied()
            .filter(|key| catalog.is_assignable(*key, query))
            .collect();

        candidates
            .iter()
            .find(|key| {
                !candidates
                    .iter()
                    .any(|other| other != *key && catalog.is_assignable(**key, *other))
            })
            .and_then(|key| table.get(key))
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::{FrameTypeRegistry, RegistryError};
    use feu_model::{FaultKind, FrameMutability, TypeCatalog, TypeToken};

    struct Family {
        frame: TypeToken,
        fixed: TypeToken,
        read_only: TypeToken,
        frameless: TypeToken,
        frameless_read_only: TypeToken,
    }

    fn declare_family(catalog: &mut TypeCatalog, base: &str, dim: u8) -> Family {
        let frameless_read_only = catalog
            .declare(&format!("{base}ReadOnly"), &[], Some(dim))
            .expect("declare");
        let frameless = catalog
            .declare(base, &[frameless_read_only], Some(dim))
            .expect("declare");
        let read_only = catalog
            .declare(&format!("Frame{base}ReadOnly"), &[], Some(dim))
            .expect("declare");
        let fixed = catalog
            .declare(&format!("FixedFrame{base}Basics"), &[read_only], Some(dim))
            .expect("declare");
        let frame = catalog
            .declare(&format!("Frame{base}"), &[fixed], Some(dim))
            .expect("declare");
        Family {
            frame,
            fixed,
            read_only,
            frameless,
            frameless_read_only,
        }
    }

    fn register(registry: &mut FrameTypeRegistry, catalog: &TypeCatalog, family: &Family) {
        registry
            .register_frame_type(
                catalog,
                family.frame,
                family.fixed,
                family.read_only,
                family.frameless,
                family.frameless_read_only,
            )
            .expect("register");
    }

    #[test]
    fn round_trip_between_frameless_and_frame_types() {
        let mut catalog = TypeCatalog::new();
        let family = declare_family(&mut catalog, "Point3D", 3);
        let mut registry = FrameTypeRegistry::new();
        register(&mut registry, &catalog, &family);

        assert_eq!(
            registry.find_corresponding_frame_type(&catalog, family.frameless_read_only),
            Some(family.read_only)
        );
        assert_eq!(
            registry.find_corresponding_frame_type(&catalog, family.frameless),
            Some(family.fixed)
        );
        assert_eq!(
            registry.find_corresponding_frameless_type(&catalog, family.read_only),
            Some(family.frameless_read_only)
        );
        assert_eq!(
            registry.find_corresponding_frameless_type(&catalog, family.frame),
            Some(family.frameless)
        );
    }

    #[test]
    fn most_specific_registration_wins() {
        let mut catalog = TypeCatalog::new();
        // PointReadOnly is a supertype of Point3DReadOnly; both are
        // registered with distinct frame siblings.
        let point_ro = catalog.declare("PointReadOnly", &[], None).expect("declare");
        let point = catalog.declare("Point", &[point_ro], None).expect("declare");
        let frame_point_ro = catalog
            .declare("FramePointReadOnly", &[], None)
            .expect("declare");
        let fixed_point = catalog
            .declare("FixedFramePointBasics", &[frame_point_ro], None)
            .expect("declare");
        let frame_point = catalog
            .declare("FramePoint", &[fixed_point], None)
            .expect("declare");

        let p3_ro = catalog
            .declare("Point3DReadOnly", &[point_ro], Some(3))
            .expect("declare");
        let p3 = catalog.declare("Point3D", &[p3_ro, point], Some(3)).expect("declare");
        let fp3_ro = catalog
            .declare("FramePoint3DReadOnly", &[frame_point_ro], Some(3))
            .expect("declare");
        let ffp3 = catalog
            .declare("FixedFramePoint3DBasics", &[fp3_ro, fixed_point], Some(3))
            .expect("declare");
        let fp3 = catalog
            .declare("FramePoint3D", &[ffp3], Some(3))
            .expect("declare");

        let mut registry = FrameTypeRegistry::new();
        registry
            .register_frame_type(&catalog, frame_point, fixed_point, frame_point_ro, point, point_ro)
            .expect("register");
        registry
            .register_frame_type(&catalog, fp3, ffp3, fp3_ro, p3, p3_ro)
            .expect("register");

        // Point3DReadOnly resolves to its own sibling, not the wider one.
        assert_eq!(
            registry.find_corresponding_frame_type(&catalog, p3_ro),
            Some(fp3_ro)
        );
        assert_eq!(
            registry.find_corresponding_frame_type(&catalog, point_ro),
            Some(frame_point_ro)
        );
    }

    #[test]
    fn excluded_frameless_types_resolve_to_none() {
        let mut catalog = TypeCatalog::new();
        let family = declare_family(&mut catalog, "Point3D", 3);
        let double = catalog.declare("Double", &[], None).expect("declare");

        let mut registry = FrameTypeRegistry::new();
        register(&mut registry, &catalog, &family);
        registry.exclude_frameless(double);

        assert_eq!(registry.find_corresponding_frame_type(&catalog, double), None);
    }

    #[test]
    fn array_types_resolve_component_wise() {
        let mut catalog = TypeCatalog::new();
        let family = declare_family(&mut catalog, "Point3D", 3);
        let frameless_array = catalog
            .declare_array(family.frameless_read_only)
            .expect("declare array");
        let frame_array = catalog.declare_array(family.read_only).expect("declare array");

        let mut registry = FrameTypeRegistry::new();
        register(&mut registry, &catalog, &family);

        assert_eq!(
            registry.find_corresponding_frame_type(&catalog, frameless_array),
            Some(frame_array)
        );
        assert_eq!(
            registry.find_corresponding_frameless_type(&catalog, frame_array),
            Some(frameless_array)
        );
    }

    #[test]
    fn convention_discovery_finds_all_siblings() {
        let mut catalog = TypeCatalog::new();
        let family = declare_family(&mut catalog, "Vector3D", 3);

        let mut registry = FrameTypeRegistry::new();
        registry
            .register_frame_type_by_convention(&catalog, family.frame)
            .expect("convention registration");

        assert_eq!(
            registry.find_corresponding_frame_type(&catalog, family.frameless),
            Some(family.fixed)
        );
        assert_eq!(
            registry.frame_mutability(family.frame),
            Some(FrameMutability::MutableFrame)
        );
    }

    #[test]
    fn convention_discovery_reports_missing_sibling() {
        let mut catalog = TypeCatalog::new();
        // Declare only the mutable frame type; every sibling is missing.
        let lonely = catalog.declare("FrameOrientation2D", &[], Some(2)).expect("declare");

        let mut registry = FrameTypeRegistry::new();
        let err = registry
            .register_frame_type_by_convention(&catalog, lonely)
            .expect_err("missing siblings");
        match err {
            RegistryError::UnresolvedSibling {
                requesting,
                missing,
            } => {
                assert_eq!(requesting, "FrameOrientation2D");
                assert_eq!(missing, "FixedFrameOrientation2DBasics");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn classification_and_ignore_list_are_queryable() {
        let mut catalog = TypeCatalog::new();
        let family = declare_family(&mut catalog, "Point3D", 3);
        let mut registry = FrameTypeRegistry::new();
        register(&mut registry, &catalog, &family);

        assert_eq!(
            registry.frame_mutability(family.read_only),
            Some(FrameMutability::ReadOnly)
        );
        assert_eq!(
            registry.frame_mutability(family.fixed),
            Some(FrameMutability::FixedFrame)
        );
        assert!(registry.is_frame_type(family.frame));
        assert!(!registry.is_frame_type(family.frameless));

        let kind = FaultKind("degenerate_geometry");
        assert!(!registry.is_ignored_fault(kind));
        registry.register_faults_to_ignore(&[kind]);
        assert!(registry.is_ignored_fault(kind));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut catalog = TypeCatalog::new();
        let family = declare_family(&mut catalog, "Point3D", 3);
        let mut registry = FrameTypeRegistry::new();
        register(&mut registry, &catalog, &family);

        let err = registry
            .register_frame_type(
                &catalog,
                family.frame,
                family.fixed,
                family.read_only,
                family.frameless,
                family.frameless_read_only,
            )
            .expect_err("duplicate");
        assert_eq!(err.reason_code(), "registry_duplicate_registration");
    }
}
