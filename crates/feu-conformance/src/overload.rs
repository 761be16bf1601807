//! Overload completeness checking.
//!
//! For every frameless method selected by the caller's filter, derives the
//! expected frame-aware signature set by token substitution and requires an
//! exact-match overload on the frame type, with the return-type covariance
//! rule of the frame API convention.

use crate::report::ConformanceError;
use crate::CheckContext;
use feu_model::TypeToken;
use feu_signature::MethodSignature;

/// Verifies that every eligible frameless method of `frameless_type` is
/// overloaded on `frame_type`.
///
/// With `assert_all_combinations` the full power set of per-parameter
/// replacement choices is required (2^k − 1 variants, the all-frameless
/// original excluded); otherwise only the all-frame variant.
pub fn assert_overloading_with_frame_objects(
    ctx: &CheckContext<'_>,
    frame_type: TypeToken,
    frameless_type: TypeToken,
    assert_all_combinations: bool,
    min_frameless_params: usize,
    filter: &dyn Fn(&MethodSignature) -> bool,
) -> Result<(), ConformanceError> {
    for record in ctx.methods.methods_of(frameless_type) {
        let signature = &record.signature;
        if !filter(signature) {
            continue;
        }
        let mappable = frame_mappable_parameters(ctx, signature);
        if mappable.len() < min_frameless_params.max(1) {
            continue;
        }

        for expected in expected_overloads(ctx, signature, &mappable, assert_all_combinations) {
            let found = ctx
                .methods
                .find(frame_type, &expected.name, &expected.parameters)
                .ok_or_else(|| ConformanceError::MissingOverload {
                    original: signature.render(ctx.types),
                    expected: expected.render(ctx.types),
                    frame_type: ctx.types.name(frame_type).to_string(),
                })?;
            check_return_type(ctx, signature, &found.signature)?;
        }
    }
    Ok(())
}

/// Verifies the `setMatchingFrame` declaration contract: every frameless
/// `set` gets both a `setMatchingFrame(ReferenceFrame, <frameless params>)`
/// and a `setMatchingFrame(<frame-mapped params>)` counterpart.
pub fn assert_api_declare_matching_frame_setters(
    ctx: &CheckContext<'_>,
    frame_type: TypeToken,
    frameless_type: TypeToken,
    filter: &dyn Fn(&MethodSignature) -> bool,
) -> Result<(), ConformanceError> {
    for record in ctx.methods.methods_of(frameless_type) {
        let signature = &record.signature;
        if signature.name != "set" || !filter(signature) {
            continue;
        }
        let mappable = frame_mappable_parameters(ctx, signature);
        if mappable.is_empty() {
            continue;
        }

        let with_frame_argument = signature
            .with_name_replaced("setMatchingFrame")
            .with_parameter_inserted(0, ctx.types.reference_frame_token());

        let mut all_mapped = signature.with_name_replaced("setMatchingFrame");
        for &(index, frame_param) in &mappable {
            all_mapped = all_mapped.with_parameter_replaced(index, frame_param);
        }

        for expected in [with_frame_argument, all_mapped] {
            if ctx
                .methods
                .find(frame_type, &expected.name, &expected.parameters)
                .is_none()
            {
                return Err(ConformanceError::MissingOverload {
                    original: signature.render(ctx.types),
                    expected: expected.render(ctx.types),
                    frame_type: ctx.types.name(frame_type).to_string(),
                });
            }
        }
    }
    Ok(())
}

/// Indices and frame-mapped tokens of the parameters that have a frame
/// equivalent.
fn frame_mappable_parameters(
    ctx: &CheckContext<'_>,
    signature: &MethodSignature,
) -> Vec<(usize, TypeToken)> {
    signature
        .parameters
        .iter()
        .enumerate()
        .filter_map(|(index, &param)| {
            ctx.registry
                .find_corresponding_frame_type(ctx.types, param)
                .map(|frame_param| (index, frame_param))
        })
        .collect()
}

fn expected_overloads(
    _ctx: &CheckContext<'_>,
    signature: &MethodSignature,
    mappable: &[(usize, TypeToken)],
    assert_all_combinations: bool,
) -> Vec<MethodSignature> {
    if !assert_all_combinations {
        let mut derived = signature.clone();
        for &(index, frame_param) in mappable {
            derived = derived.with_parameter_replaced(index, frame_param);
        }
        return vec![derived];
    }

    let k = mappable.len().min(63) as u32;
    let top = 1u64 << k;
    let mut variants = Vec::with_capacity((top - 1) as usize);
    // Mask 0 is the all-frameless original and is excluded.
    for mask in 1..top {
        let mut derived = signature.clone();
        for (bit, &(index, frame_param)) in mappable.iter().enumerate() {
            if mask & (1u64 << bit) != 0 {
                derived = derived.with_parameter_replaced(index, frame_param);
            }
        }
        variants.push(derived);
    }
    variants
}

/// Return-type covariance: the overload may return the original type R, the
/// frame-mapped type R', any type R' is assignable from (covariant
/// narrowing), or a declared direct supertype of R'. Anything wider is the
/// reported "Unexpected return type" failure.
fn check_return_type(
    ctx: &CheckContext<'_>,
    original: &MethodSignature,
    overload: &MethodSignature,
) -> Result<(), ConformanceError> {
    let Some(original_return) = original.return_type else {
        return Ok(());
    };
    let mapped_return = ctx
        .registry
        .find_corresponding_frame_type(ctx.types, original_return)
        .unwrap_or(original_return);

    let acceptable = match overload.return_type {
        Some(actual) => {
            actual == original_return
                || actual == mapped_return
                || ctx.types.is_assignable(mapped_return, actual)
                || ctx.types.supertypes(mapped_return).contains(&actual)
        }
        None => false,
    };

    if acceptable {
        Ok(())
    } else {
        Err(ConformanceError::UnexpectedReturnType {
            original: original.render(ctx.types),
            overload: overload.render(ctx.types),
            expected_return: ctx.types.name(mapped_return).to_string(),
            actual_return: overload
                .return_type
                .map_or_else(|| "void".to_string(), |t| ctx.types.name(t).to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{assert_api_declare_matching_frame_setters, assert_overloading_with_frame_objects};
    use crate::fixtures::FixtureWorld;
    use crate::report::ConformanceError;

    #[test]
    fn complete_combinatorial_overloads_pass() {
        let world = FixtureWorld::new().expect("fixture world");
        let ctx = world.context();
        assert_overloading_with_frame_objects(
            &ctx,
            world.tokens.frame_geometry_tools,
            world.tokens.geometry_tools,
            true,
            1,
            &|signature| signature.name == "dist" || signature.name == "translate",
        )
        .expect("every frame/frameless combination is declared");
    }

    #[test]
    fn all_frame_variant_mode_accepts_covariant_returns() {
        let world = FixtureWorld::new().expect("fixture world");
        let ctx = world.context();
        // `midpoint` returns the concrete FramePoint3D where the mapped
        // return type is FixedFramePoint3DBasics.
        assert_overloading_with_frame_objects(
            &ctx,
            world.tokens.frame_geometry_tools,
            world.tokens.geometry_tools,
            false,
            1,
            &|signature| {
                signature.name == "midpoint"
                    || signature.name == "norm"
                    || signature.name == "validate"
            },
        )
        .expect("all-frame variants are declared");
    }

    #[test]
    fn missing_overload_is_reported_with_the_canonical_phrase() {
        let world = FixtureWorld::new().expect("fixture world");
        let ctx = world.context();
        let err = assert_overloading_with_frame_objects(
            &ctx,
            world.tokens.broken_frame_geometry_tools,
            world.tokens.geometry_tools,
            true,
            1,
            &|signature| signature.name == "dist",
        )
        .expect_err("mixed dist variants are missing");
        assert!(matches!(err, ConformanceError::MissingOverload { .. }));
        let message = err.to_string();
        assert!(message.contains("is not properly overloaded"));
        assert!(message.contains("expected to find"));
    }

    #[test]
    fn wide_return_type_is_rejected() {
        let world = FixtureWorld::new().expect("fixture world");
        let ctx = world.context();
        let err = assert_overloading_with_frame_objects(
            &ctx,
            world.tokens.broken_frame_geometry_tools,
            world.tokens.geometry_tools,
            false,
            1,
            &|signature| signature.name == "centroid",
        )
        .expect_err("centroid overload returns Double instead of a point type");
        assert!(matches!(err, ConformanceError::UnexpectedReturnType { .. }));
        assert!(err.to_string().contains("Unexpected return type"));
    }

    #[test]
    fn parameter_threshold_skips_short_methods() {
        let world = FixtureWorld::new().expect("fixture world");
        let ctx = world.context();
        // `norm` has one mappable parameter; with a threshold of two no
        // assertion is made even against the broken type.
        assert_overloading_with_frame_objects(
            &ctx,
            world.tokens.broken_frame_geometry_tools,
            world.tokens.geometry_tools,
            true,
            2,
            &|signature| signature.name == "norm",
        )
        .expect("below-threshold methods are skipped");
    }

    #[test]
    fn matching_frame_setter_declarations_are_complete() {
        let world = FixtureWorld::new().expect("fixture world");
        let ctx = world.context();
        assert_api_declare_matching_frame_setters(
            &ctx,
            world.tokens.frame_point3d,
            world.tokens.point3d,
            &|_| true,
        )
        .expect("FramePoint3D declares both setter forms per frameless set");
        assert_api_declare_matching_frame_setters(
            &ctx,
            world.tokens.frame_point2d,
            world.tokens.point2d,
            &|_| true,
        )
        .expect("FramePoint2D declares both setter forms per frameless set");
    }

    #[test]
    fn missing_matching_frame_setter_is_reported() {
        let world = FixtureWorld::new().expect("fixture world");
        let ctx = world.context();
        let err = assert_api_declare_matching_frame_setters(
            &ctx,
            world.tokens.frame_point3d_buggy,
            world.tokens.point3d,
            &|_| true,
        )
        .expect_err("buggy holder lacks the ReferenceFrame-first setter");
        assert!(matches!(err, ConformanceError::MissingOverload { .. }));
    }
}
