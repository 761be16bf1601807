#![forbid(unsafe_code)]

//! Structural method signatures and the method catalog.
//!
//! Rust has no runtime reflection, so target libraries describe their API as
//! data: every checkable method is a [`MethodRecord`] holding a structural
//! [`MethodSignature`] plus a boxed invoker closure. The checkers derive
//! expected signatures by pure token substitution and look records up by
//! exact name + parameter match, never by assignability search.

use feu_model::{DynValue, MethodFault, TypeCatalog, TypeToken, Value};
use std::fmt;

/// Structural representation of a method: name, ordered parameter types,
/// optional return type. Equality and hashing ignore the declaring type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodSignature {
    pub name: String,
    pub parameters: Vec<TypeToken>,
    pub return_type: Option<TypeToken>,
}

impl MethodSignature {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        parameters: Vec<TypeToken>,
        return_type: Option<TypeToken>,
    ) -> Self {
        Self {
            name: name.into(),
            parameters,
            return_type,
        }
    }

    #[must_use]
    pub fn with_parameter_replaced(&self, index: usize, new_type: TypeToken) -> Self {
        let mut derived = self.clone();
        if let Some(slot) = derived.parameters.get_mut(index) {
            *slot = new_type;
        }
        derived
    }

    #[must_use]
    pub fn with_parameter_inserted(&self, index: usize, new_type: TypeToken) -> Self {
        let mut derived = self.clone();
        let index = index.min(derived.parameters.len());
        derived.parameters.insert(index, new_type);
        derived
    }

    #[must_use]
    pub fn with_parameter_removed(&self, index: usize) -> Self {
        let mut derived = self.clone();
        if index < derived.parameters.len() {
            derived.parameters.remove(index);
        }
        derived
    }

    #[must_use]
    pub fn with_name_replaced(&self, new_name: impl Into<String>) -> Self {
        let mut derived = self.clone();
        derived.name = new_name.into();
        derived
    }

    /// Rendering for failure messages, e.g. `double dist(Point3DReadOnly, Point3DReadOnly)`.
    #[must_use]
    pub fn render(&self, catalog: &TypeCatalog) -> String {
        let params: Vec<&str> = self
            .parameters
            .iter()
            .map(|token| catalog.name(*token))
            .collect();
        let ret = self.return_type.map_or("void", |token| catalog.name(token));
        format!("{ret} {}({})", self.name, params.join(", "))
    }
}

/// Outcome of invoking a target-library method: an optional returned value
/// or a [`MethodFault`].
pub type InvocationResult = Result<Option<Value>, MethodFault>;

/// Invoker closure for a static method; arguments are passed mutably so the
/// method can exercise output parameters.
pub type StaticInvoker = Box<dyn Fn(&mut [Value]) -> InvocationResult>;

/// Invoker closure for an instance method; the receiver is passed separately
/// and is not part of the signature's parameter list.
pub type InstanceInvoker = Box<dyn Fn(&mut dyn DynValue, &mut [Value]) -> InvocationResult>;

enum Dispatch {
    Static(StaticInvoker),
    Instance(InstanceInvoker),
}

impl fmt::Debug for Dispatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(_) => f.write_str("Dispatch::Static"),
            Self::Instance(_) => f.write_str("Dispatch::Instance"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind {
    Static,
    Instance,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogLookupError {
    ReceiverKindMismatch { name: String },
}

impl CatalogLookupError {
    #[must_use]
    pub const fn reason_code(&self) -> &'static str {
        match self {
            Self::ReceiverKindMismatch { .. } => "catalog_receiver_kind_mismatch",
        }
    }
}

impl fmt::Display for CatalogLookupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReceiverKindMismatch { name } => {
                write!(f, "method '{name}' was invoked with the wrong receiver kind")
            }
        }
    }
}

impl std::error::Error for CatalogLookupError {}

/// One registered method of the target library.
#[derive(Debug)]
pub struct MethodRecord {
    pub signature: MethodSignature,
    pub declaring_type: TypeToken,
    dispatch: Dispatch,
}

impl MethodRecord {
    #[must_use]
    pub fn kind(&self) -> MethodKind {
        match &self.dispatch {
            Dispatch::Static(_) => MethodKind::Static,
            Dispatch::Instance(_) => MethodKind::Instance,
        }
    }

    /// Invoke a static method.
    pub fn invoke_static(&self, args: &mut [Value]) -> Result<InvocationResult, CatalogLookupError> {
        match &self.dispatch {
            Dispatch::Static(invoker) => Ok(invoker(args)),
            Dispatch::Instance(_) => Err(CatalogLookupError::ReceiverKindMismatch {
                name: self.signature.name.clone(),
            }),
        }
    }

    /// Invoke an instance method on `receiver`.
    pub fn invoke_instance(
        &self,
        receiver: &mut dyn DynValue,
        args: &mut [Value],
    ) -> Result<InvocationResult, CatalogLookupError> {
        match &self.dispatch {
            Dispatch::Instance(invoker) => Ok(invoker(receiver, args)),
            Dispatch::Static(_) => Err(CatalogLookupError::ReceiverKindMismatch {
                name: self.signature.name.clone(),
            }),
        }
    }
}

/// Registered method table for a whole target library.
///
/// Lookup is exact: same declaring type token, same name, same ordered
/// parameter tokens. Overload discovery works on top of this primitive.
#[derive(Debug, Default)]
pub struct MethodCatalog {
    records: Vec<MethodRecord>,
}

impl MethodCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
        }
    }

    pub fn declare_static(
        &mut self,
        declaring_type: TypeToken,
        signature: MethodSignature,
        invoker: StaticInvoker,
    ) {
        self.records.push(MethodRecord {
            signature,
            declaring_type,
            dispatch: Dispatch::Static(invoker),
        });
    }

    pub fn declare_instance(
        &mut self,
        declaring_type: TypeToken,
        signature: MethodSignature,
        invoker: InstanceInvoker,
    ) {
        self.records.push(MethodRecord {
            signature,
            declaring_type,
            dispatch: Dispatch::Instance(invoker),
        });
    }

    /// All methods declared on `declaring_type`, in declaration order.
    pub fn methods_of(&self, declaring_type: TypeToken) -> impl Iterator<Item = &MethodRecord> {
        self.records
            .iter()
            .filter(move |record| record.declaring_type == declaring_type)
    }

    /// Exact-match lookup; no assignability search.
    #[must_use]
    pub fn find(
        &self,
        declaring_type: TypeToken,
        name: &str,
        parameters: &[TypeToken],
    ) -> Option<&MethodRecord> {
        self.records.iter().find(|record| {
            record.declaring_type == declaring_type
                && record.signature.name == name
                && record.signature.parameters == parameters
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::{MethodCatalog, MethodKind, MethodSignature};
    use feu_model::{TypeCatalog, Value};
    use std::collections::HashSet;

    fn sample_catalog() -> (TypeCatalog, feu_model::TypeToken, feu_model::TypeToken) {
        let mut types = TypeCatalog::new();
        let point = types.declare("Point3DReadOnly", &[], Some(3)).expect("declare");
        let double = types.declare("Double", &[], None).expect("declare");
        (types, point, double)
    }

    #[test]
    fn signature_equality_ignores_declaring_type() {
        let (_, point, double) = sample_catalog();
        let a = MethodSignature::new("dist", vec![point, point], Some(double));
        let b = MethodSignature::new("dist", vec![point, point], Some(double));
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn derivations_produce_new_signatures() {
        let (_, point, double) = sample_catalog();
        let base = MethodSignature::new("dist", vec![point, point], Some(double));

        let replaced = base.with_parameter_replaced(1, double);
        assert_eq!(replaced.parameters, vec![point, double]);

        let inserted = base.with_parameter_inserted(0, double);
        assert_eq!(inserted.parameters, vec![double, point, point]);

        let removed = base.with_parameter_removed(0);
        assert_eq!(removed.parameters, vec![point]);

        let renamed = base.with_name_replaced("distSquared");
        assert_eq!(renamed.name, "distSquared");
        assert_eq!(renamed.parameters, base.parameters);
    }

    #[test]
    fn render_names_return_and_parameter_types() {
        let (types, point, double) = sample_catalog();
        let sig = MethodSignature::new("dist", vec![point, point], Some(double));
        assert_eq!(
            sig.render(&types),
            "Double dist(Point3DReadOnly, Point3DReadOnly)"
        );

        let void_sig = MethodSignature::new("setToZero", vec![], None);
        assert_eq!(void_sig.render(&types), "void setToZero()");
    }

    #[test]
    fn exact_lookup_distinguishes_overloads() {
        let (_, point, double) = sample_catalog();
        let mut methods = MethodCatalog::new();
        methods.declare_static(
            point,
            MethodSignature::new("dist", vec![point, point], Some(double)),
            Box::new(|_args: &mut [Value]| Ok(None)),
        );

        assert!(methods.find(point, "dist", &[point, point]).is_some());
        assert!(methods.find(point, "dist", &[point]).is_none());
        assert!(methods.find(point, "distSquared", &[point, point]).is_none());
        assert!(methods.find(double, "dist", &[point, point]).is_none());
    }

    #[test]
    fn receiver_kind_mismatch_is_reported() {
        let (_, point, double) = sample_catalog();
        let mut methods = MethodCatalog::new();
        methods.declare_static(
            point,
            MethodSignature::new("dist", vec![point, point], Some(double)),
            Box::new(|_args: &mut [Value]| Ok(None)),
        );

        let record = methods
            .find(point, "dist", &[point, point])
            .expect("record present");
        assert_eq!(record.kind(), MethodKind::Static);

        let mut args: Vec<Value> = Vec::new();
        assert!(record.invoke_static(&mut args).is_ok());
    }
}
