#![forbid(unsafe_code)]

//! Type catalog, frame identifiers, fault kinds, and the dynamic value model.
//!
//! The conformance checkers reason about a target geometry library without
//! compile-time knowledge of its types. Every checked object is a
//! [`DynValue`] trait object, every type an interned [`TypeToken`] in a
//! [`TypeCatalog`] that records the declared supertype graph, dimensionality,
//! and array element links the checkers need for assignability reasoning.

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;

/// Fault kind raised by a frame-aware operation when two frame-bearing
/// inputs are expressed in different reference frames.
pub const FRAME_MISMATCH_FAULT: FaultKind = FaultKind("reference_frame_mismatch");

/// Identifier of a reference frame within the caller's frame tree.
///
/// The engine never inspects frame geometry; it only compares identifiers
/// and asks values to move between frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FrameId(pub u32);

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "frame#{}", self.0)
    }
}

/// Frame-mutability classification of a frame-aware type, resolved once at
/// registration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameMutability {
    /// Neither value nor frame can change through this type.
    ReadOnly,
    /// Value is mutable, frame is pinned for the lifetime of the object.
    FixedFrame,
    /// Both value and frame can be reassigned; such parameters adopt the
    /// operation's frame as a side effect of a call.
    MutableFrame,
}

impl FrameMutability {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ReadOnly => "read_only",
            Self::FixedFrame => "fixed_frame",
            Self::MutableFrame => "mutable_frame",
        }
    }

    /// Frame-fixed parameters participate in the mismatch bit-vector;
    /// mutable-frame parameters do not.
    #[must_use]
    pub const fn is_frame_fixed(self) -> bool {
        matches!(self, Self::ReadOnly | Self::FixedFrame)
    }
}

/// Interned identifier of a registered type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TypeToken(u32);

impl TypeToken {
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Runtime kind of a fault thrown by a target-library method.
///
/// Kinds compare by name; the well-known [`FRAME_MISMATCH_FAULT`] kind is
/// what every mismatch pass expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FaultKind(pub &'static str);

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Error value produced by an invoked target-library method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodFault {
    pub kind: FaultKind,
    pub message: String,
}

impl MethodFault {
    #[must_use]
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn frame_mismatch(message: impl Into<String>) -> Self {
        Self::new(FRAME_MISMATCH_FAULT, message)
    }

    #[must_use]
    pub fn is_frame_mismatch(&self) -> bool {
        self.kind == FRAME_MISMATCH_FAULT
    }
}

impl fmt::Display for MethodFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

impl std::error::Error for MethodFault {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    DuplicateType(String),
    UnknownType(String),
}

impl CatalogError {
    #[must_use]
    pub const fn reason_code(&self) -> &'static str {
        match self {
            Self::DuplicateType(_) => "catalog_duplicate_type",
            Self::UnknownType(_) => "catalog_unknown_type",
        }
    }
}

impl fmt::Display for CatalogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateType(name) => write!(f, "type '{name}' is already declared"),
            Self::UnknownType(name) => write!(f, "type '{name}' is not declared"),
        }
    }
}

impl std::error::Error for CatalogError {}

#[derive(Debug, Clone)]
struct TypeDecl {
    name: String,
    supertypes: Vec<TypeToken>,
    dimensionality: Option<u8>,
    element: Option<TypeToken>,
}

/// Interning table for the target library's types.
///
/// Assignability is the reflexive-transitive closure of the declared
/// supertype edges; there is no structural subtyping.
#[derive(Debug, Clone)]
pub struct TypeCatalog {
    decls: Vec<TypeDecl>,
    by_name: BTreeMap<String, TypeToken>,
    reference_frame: TypeToken,
}

impl TypeCatalog {
    /// An empty catalog pre-declares `ReferenceFrame`, the type of explicit
    /// frame arguments in `setMatchingFrame(ReferenceFrame, ...)` overloads.
    #[must_use]
    pub fn new() -> Self {
        let mut catalog = Self {
            decls: Vec::new(),
            by_name: BTreeMap::new(),
            reference_frame: TypeToken(0),
        };
        let token = catalog
            .intern("ReferenceFrame", Vec::new(), None, None)
            .unwrap_or(TypeToken(0));
        catalog.reference_frame = token;
        catalog
    }

    /// Token of the pre-declared `ReferenceFrame` type.
    #[must_use]
    pub const fn reference_frame_token(&self) -> TypeToken {
        self.reference_frame
    }

    pub fn declare(
        &mut self,
        name: &str,
        supertypes: &[TypeToken],
        dimensionality: Option<u8>,
    ) -> Result<TypeToken, CatalogError> {
        self.intern(name, supertypes.to_vec(), dimensionality, None)
    }

    /// Declares the array type of `element`, named `<element>[]`.
    pub fn declare_array(&mut self, element: TypeToken) -> Result<TypeToken, CatalogError> {
        let name = format!("{}[]", self.name(element));
        self.intern(&name, Vec::new(), None, Some(element))
    }

    fn intern(
        &mut self,
        name: &str,
        supertypes: Vec<TypeToken>,
        dimensionality: Option<u8>,
        element: Option<TypeToken>,
    ) -> Result<TypeToken, CatalogError> {
        if self.by_name.contains_key(name) {
            return Err(CatalogError::DuplicateType(name.to_string()));
        }
        let token = TypeToken(u32::try_from(self.decls.len()).unwrap_or(u32::MAX));
        self.decls.push(TypeDecl {
            name: name.to_string(),
            supertypes,
            dimensionality,
            element,
        });
        self.by_name.insert(name.to_string(), token);
        Ok(token)
    }

    #[must_use]
    pub fn token(&self, name: &str) -> Option<TypeToken> {
        self.by_name.get(name).copied()
    }

    pub fn require(&self, name: &str) -> Result<TypeToken, CatalogError> {
        self.token(name)
            .ok_or_else(|| CatalogError::UnknownType(name.to_string()))
    }

    #[must_use]
    pub fn name(&self, token: TypeToken) -> &str {
        self.decls
            .get(token.index())
            .map_or("<unknown>", |decl| decl.name.as_str())
    }

    #[must_use]
    pub fn dimensionality(&self, token: TypeToken) -> Option<u8> {
        self.decls.get(token.index())?.dimensionality
    }

    /// Element token for array types, `None` otherwise.
    #[must_use]
    pub fn element(&self, token: TypeToken) -> Option<TypeToken> {
        self.decls.get(token.index())?.element
    }

    /// Array token whose element is `element`, if one was declared.
    #[must_use]
    pub fn array_of(&self, element: TypeToken) -> Option<TypeToken> {
        let name = format!("{}[]", self.name(element));
        self.token(&name)
    }

    /// Declared direct supertypes of `token`.
    #[must_use]
    pub fn supertypes(&self, token: TypeToken) -> &[TypeToken] {
        self.decls
            .get(token.index())
            .map_or(&[], |decl| decl.supertypes.as_slice())
    }

    /// `true` when a value of type `source` can stand where `target` is
    /// expected: `source == target` or `target` is reachable through the
    /// declared supertype graph of `source`.
    #[must_use]
    pub fn is_assignable(&self, target: TypeToken, source: TypeToken) -> bool {
        if target == source {
            return true;
        }
        let mut stack = vec![source];
        let mut seen = vec![false; self.decls.len()];
        while let Some(current) = stack.pop() {
            if current == target {
                return true;
            }
            if let Some(flag) = seen.get_mut(current.index()) {
                if *flag {
                    continue;
                }
                *flag = true;
            }
            stack.extend_from_slice(self.supertypes(current));
        }
        false
    }

    /// Number of declared types, `ReferenceFrame` included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.decls.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.decls.is_empty()
    }
}

impl Default for TypeCatalog {
    fn default() -> Self {
        Self::new()
    }
}

/// Dynamically typed value flowing through the checkers.
///
/// Target libraries implement this once per concrete geometry type; the
/// engine only ever manipulates `Box<dyn DynValue>`.
pub trait DynValue: fmt::Debug {
    fn type_token(&self) -> TypeToken;

    /// The frame the value is currently expressed in; `None` for frameless
    /// values and scalars.
    fn reference_frame(&self) -> Option<FrameId> {
        None
    }

    /// Reinterpret the value in `frame` without transforming coordinates.
    /// Identity for frameless values.
    fn set_reference_frame(&mut self, _frame: FrameId) {}

    /// Transform the value into `frame`. Identity for frameless values;
    /// frame-aware fixtures implement the actual transform.
    fn change_frame(&mut self, _frame: FrameId) -> Result<(), MethodFault> {
        Ok(())
    }

    fn boxed_clone(&self) -> Box<dyn DynValue>;

    /// Structural epsilon equality against another dynamic value.
    fn epsilon_equals(&self, other: &dyn DynValue, epsilon: f64) -> bool;

    /// Projection of this value with frame information stripped, when the
    /// type has a frameless sibling. `None` for values that are already
    /// frameless or have no projection.
    fn frameless_view(&self) -> Option<Box<dyn DynValue>> {
        None
    }

    /// Human-readable rendering for failure messages.
    fn describe(&self) -> String {
        format!("{self:?}")
    }

    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Owned dynamic value.
pub type Value = Box<dyn DynValue>;

impl Clone for Value {
    fn clone(&self) -> Self {
        self.boxed_clone()
    }
}

/// Concrete dynamic value carrying an explicit `ReferenceFrame` argument.
#[derive(Debug, Clone)]
pub struct FrameHandle {
    frame: FrameId,
    token: TypeToken,
}

impl FrameHandle {
    #[must_use]
    pub const fn new(frame: FrameId, token: TypeToken) -> Self {
        Self { frame, token }
    }

    #[must_use]
    pub const fn frame(&self) -> FrameId {
        self.frame
    }
}

impl DynValue for FrameHandle {
    fn type_token(&self) -> TypeToken {
        self.token
    }

    fn reference_frame(&self) -> Option<FrameId> {
        Some(self.frame)
    }

    fn boxed_clone(&self) -> Value {
        Box::new(self.clone())
    }

    fn epsilon_equals(&self, other: &dyn DynValue, _epsilon: f64) -> bool {
        other.reference_frame() == Some(self.frame)
    }

    fn describe(&self) -> String {
        self.frame.to_string()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::{
        CatalogError, DynValue, FaultKind, FrameHandle, FrameId, FrameMutability, MethodFault,
        TypeCatalog, FRAME_MISMATCH_FAULT,
    };

    #[test]
    fn catalog_predeclares_reference_frame() {
        let catalog = TypeCatalog::new();
        assert_eq!(
            catalog.token("ReferenceFrame"),
            Some(catalog.reference_frame_token())
        );
        assert_eq!(catalog.name(catalog.reference_frame_token()), "ReferenceFrame");
    }

    #[test]
    fn assignability_follows_declared_supertype_graph() {
        let mut catalog = TypeCatalog::new();
        let read_only = catalog.declare("Point3DReadOnly", &[], Some(3)).expect("declare");
        let basics = catalog
            .declare("Point3DBasics", &[read_only], Some(3))
            .expect("declare");
        let concrete = catalog
            .declare("Point3D", &[basics], Some(3))
            .expect("declare");

        assert!(catalog.is_assignable(read_only, concrete));
        assert!(catalog.is_assignable(basics, concrete));
        assert!(catalog.is_assignable(concrete, concrete));
        assert!(!catalog.is_assignable(concrete, read_only));
    }

    #[test]
    fn duplicate_declaration_is_rejected() {
        let mut catalog = TypeCatalog::new();
        catalog.declare("Point3D", &[], Some(3)).expect("declare");
        let err = catalog.declare("Point3D", &[], Some(3)).expect_err("duplicate");
        assert_eq!(err, CatalogError::DuplicateType("Point3D".to_string()));
        assert_eq!(err.reason_code(), "catalog_duplicate_type");
    }

    #[test]
    fn array_tokens_link_back_to_their_element() {
        let mut catalog = TypeCatalog::new();
        let point = catalog.declare("Point3D", &[], Some(3)).expect("declare");
        let array = catalog.declare_array(point).expect("declare array");
        assert_eq!(catalog.element(array), Some(point));
        assert_eq!(catalog.array_of(point), Some(array));
        assert_eq!(catalog.name(array), "Point3D[]");
    }

    #[test]
    fn frame_mismatch_fault_is_recognized_by_kind() {
        let fault = MethodFault::frame_mismatch("frame#0 vs frame#1");
        assert!(fault.is_frame_mismatch());
        assert_eq!(fault.kind, FRAME_MISMATCH_FAULT);

        let other = MethodFault::new(FaultKind("singular_matrix"), "not invertible");
        assert!(!other.is_frame_mismatch());
    }

    #[test]
    fn frame_fixed_classification_excludes_mutable_frame() {
        assert!(FrameMutability::ReadOnly.is_frame_fixed());
        assert!(FrameMutability::FixedFrame.is_frame_fixed());
        assert!(!FrameMutability::MutableFrame.is_frame_fixed());
    }

    #[test]
    fn frame_handle_reports_its_frame() {
        let catalog = TypeCatalog::new();
        let handle = FrameHandle::new(FrameId(7), catalog.reference_frame_token());
        assert_eq!(handle.reference_frame(), Some(FrameId(7)));
        assert_eq!(handle.describe(), "frame#7");
    }
}
