#![forbid(unsafe_code)]

//! Epsilon-based deep equality over dynamic geometry values.

use feu_model::DynValue;

/// Default comparison tolerance for differential equivalence checks.
pub const DEFAULT_EPSILON: f64 = 1.0e-12;

/// Scalar epsilon equality; exact for non-finite values so NaN == NaN and
/// matching infinities compare equal during differential runs.
#[must_use]
pub fn epsilon_equals_f64(a: f64, b: f64, epsilon: f64) -> bool {
    if a.is_nan() && b.is_nan() {
        return true;
    }
    if a.is_infinite() || b.is_infinite() {
        return a == b;
    }
    (a - b).abs() <= epsilon
}

/// Structural comparer collaborator. Defined recursively over the target
/// library's leaf types by delegating to the value's own equality.
pub trait StructuralComparer {
    fn epsilon_equals(&self, a: &dyn DynValue, b: &dyn DynValue, epsilon: f64) -> bool;
}

/// Default comparer: same-token values compare directly; values whose
/// tokens differ only by frame-awareness compare through their frameless
/// projections.
#[derive(Debug, Default, Clone, Copy)]
pub struct GeometryComparer;

impl GeometryComparer {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl StructuralComparer for GeometryComparer {
    fn epsilon_equals(&self, a: &dyn DynValue, b: &dyn DynValue, epsilon: f64) -> bool {
        if a.type_token() == b.type_token() {
            return a.epsilon_equals(b, epsilon);
        }
        match (a.frameless_view(), b.frameless_view()) {
            (Some(fa), Some(fb)) => fa.epsilon_equals(fb.as_ref(), epsilon),
            (Some(fa), None) => fa.epsilon_equals(b, epsilon),
            (None, Some(fb)) => a.epsilon_equals(fb.as_ref(), epsilon),
            (None, None) => a.epsilon_equals(b, epsilon),
        }
    }
}
