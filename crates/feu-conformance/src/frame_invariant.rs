//! Frame invariant checking.
//!
//! Exercises combinatorial frame assignments against static and instance
//! methods: a same-frame pass that must succeed, a mismatch pass that must
//! raise the dedicated reference-frame-mismatch fault, a frame-adoption
//! pass for mutable-frame parameters, and a result-frame pass for
//! frame-aware return values.

use crate::matching_frame;
use crate::report::ConformanceError;
use crate::{CheckContext, HolderFactory};
use feu_model::{FrameHandle, FrameId, FrameMutability, TypeToken, Value};
use feu_random::DeterministicRng;
use feu_signature::{InvocationResult, MethodKind, MethodRecord, MethodSignature};

/// Exercises every static method of `declaring` passing `filter`.
pub fn assert_static_methods_check_reference_frame(
    ctx: &CheckContext<'_>,
    declaring: TypeToken,
    filter: &dyn Fn(&MethodSignature) -> bool,
    iterations: usize,
) -> Result<(), ConformanceError> {
    for record in ctx.methods.methods_of(declaring) {
        if record.kind() != MethodKind::Static || !filter(&record.signature) {
            continue;
        }
        check_method(ctx, record, None, iterations)?;
    }
    Ok(())
}

/// Exercises every instance method of the holder type produced by
/// `holder_factory`. The holder itself is a frame-fixed participant pinned
/// to frame A.
pub fn assert_frame_holder_methods_check_reference_frame(
    ctx: &CheckContext<'_>,
    holder_factory: HolderFactory<'_>,
    filter: &dyn Fn(&MethodSignature) -> bool,
    iterations: usize,
) -> Result<(), ConformanceError> {
    let mut probe_rng = DeterministicRng::new(ctx.seed).child("holder_probe");
    let probe = holder_factory(&mut probe_rng, ctx.frame_a);
    let holder_type = probe.type_token();

    for record in ctx.methods.methods_of(holder_type) {
        if record.kind() != MethodKind::Instance || !filter(&record.signature) {
            continue;
        }
        check_method(ctx, record, Some(holder_factory), iterations)?;
    }
    Ok(())
}

/// Per-parameter frame classification: `None` for parameters that carry no
/// frame, `Some(mutability)` otherwise. Explicit `ReferenceFrame` arguments
/// classify as read-only (frame-fixed).
pub(crate) fn classify_parameters(
    ctx: &CheckContext<'_>,
    signature: &MethodSignature,
) -> Vec<Option<FrameMutability>> {
    signature
        .parameters
        .iter()
        .map(|&param| {
            if param == ctx.types.reference_frame_token() {
                Some(FrameMutability::ReadOnly)
            } else {
                ctx.registry.frame_mutability(param)
            }
        })
        .collect()
}

/// Builds the argument tuple for one invocation; `frame_for(i)` selects the
/// frame each parameter is expressed in. `None` when any parameter type is
/// unsupported by the random service.
pub(crate) fn build_arguments(
    ctx: &CheckContext<'_>,
    rng: &mut DeterministicRng,
    signature: &MethodSignature,
    frame_for: &dyn Fn(usize) -> FrameId,
) -> Option<Vec<Value>> {
    let mut args = Vec::with_capacity(signature.parameters.len());
    for (index, &param) in signature.parameters.iter().enumerate() {
        let frame = frame_for(index);
        if param == ctx.types.reference_frame_token() {
            args.push(Box::new(FrameHandle::new(frame, param)) as Value);
        } else {
            args.push(ctx.random.next_instance(rng, frame, param)?);
        }
    }
    Some(args)
}

/// Invokes `record` with a fresh holder (instance methods) or directly
/// (static methods). Returns the invocation outcome plus the holder after
/// the call.
pub(crate) fn invoke(
    record: &MethodRecord,
    holder_factory: Option<HolderFactory<'_>>,
    rng: &mut DeterministicRng,
    holder_frame: FrameId,
    args: &mut [Value],
) -> Result<(InvocationResult, Option<Value>), ConformanceError> {
    match holder_factory {
        Some(factory) => {
            let mut holder = factory(rng, holder_frame);
            let outcome = record
                .invoke_instance(&mut *holder, args)
                .map_err(|err| ConformanceError::InvocationMisuse {
                    detail: err.to_string(),
                })?;
            Ok((outcome, Some(holder)))
        }
        None => {
            let outcome =
                record
                    .invoke_static(args)
                    .map_err(|err| ConformanceError::InvocationMisuse {
                        detail: err.to_string(),
                    })?;
            Ok((outcome, None))
        }
    }
}

fn check_method(
    ctx: &CheckContext<'_>,
    record: &MethodRecord,
    holder_factory: Option<HolderFactory<'_>>,
    iterations: usize,
) -> Result<(), ConformanceError> {
    let signature = &record.signature;
    let rendered = signature.render(ctx.types);
    let mut rng = DeterministicRng::new(ctx.seed).child(&rendered);

    let classification = classify_parameters(ctx, signature);
    let is_matching_setter = signature.name.ends_with("MatchingFrame")
        || signature.name.ends_with("IncludingFrame");

    for _ in 0..iterations {
        // Same-frame pass: everything in frame A must go through.
        let all_a = |_: usize| ctx.frame_a;
        let Some(mut args) = build_arguments(ctx, &mut rng, signature, &all_a) else {
            // Unsupported parameter type; nothing to exercise.
            return Ok(());
        };
        let (outcome, _) = invoke(record, holder_factory, &mut rng, ctx.frame_a, &mut args)?;
        if let Err(fault) = outcome {
            if ctx.registry.is_ignored_fault(fault.kind) {
                // This random input is inapplicable to the operation.
                continue;
            }
            return Err(ConformanceError::UnexpectedFault {
                method: rendered,
                fault,
            });
        }

        if is_matching_setter {
            matching_frame::check_frame_rules(ctx, record, holder_factory, &mut rng)?;
        } else {
            mismatch_pass(ctx, record, holder_factory, &mut rng, &classification)?;
        }
        adoption_pass(ctx, record, holder_factory, &mut rng, &classification)?;
        result_frame_pass(ctx, record, holder_factory, &mut rng)?;
    }
    Ok(())
}

/// Enumerates frame A/B bit-vectors over the frame-fixed parameters and
/// requires the mismatch fault for every mixed assignment.
///
/// Static methods exclude the all-ones mask (all parameters in frame B is a
/// coherent same-frame call); instance methods include it because the
/// holder stays pinned to frame A.
fn mismatch_pass(
    ctx: &CheckContext<'_>,
    record: &MethodRecord,
    holder_factory: Option<HolderFactory<'_>>,
    rng: &mut DeterministicRng,
    classification: &[Option<FrameMutability>],
) -> Result<(), ConformanceError> {
    let fixed: Vec<usize> = classification
        .iter()
        .enumerate()
        .filter_map(|(index, class)| match class {
            Some(mutability) if mutability.is_frame_fixed() => Some(index),
            _ => None,
        })
        .collect();

    let participants = fixed.len() + usize::from(holder_factory.is_some());
    if participants < 2 {
        // Not enough degrees of freedom to manufacture a mismatch.
        return Ok(());
    }

    let k = fixed.len().min(63) as u32;
    let top = 1u64 << k;
    let upper = if holder_factory.is_some() { top } else { top - 1 };

    for mask in 1..upper {
        let frame_for = |index: usize| {
            match fixed.iter().position(|&fixed_index| fixed_index == index) {
                Some(bit) if mask & (1u64 << bit) != 0 => ctx.frame_b,
                _ => ctx.frame_a,
            }
        };
        let Some(mut args) = build_arguments(ctx, rng, &record.signature, &frame_for) else {
            return Ok(());
        };
        let (outcome, _) = invoke(record, holder_factory, rng, ctx.frame_a, &mut args)?;
        match outcome {
            Err(fault) if fault.is_frame_mismatch() => {}
            Err(fault) if ctx.registry.is_ignored_fault(fault.kind) => {}
            Err(fault) => {
                return Err(ConformanceError::UnexpectedFault {
                    method: record.signature.render(ctx.types),
                    fault,
                })
            }
            Ok(_) => {
                return Err(ConformanceError::MissingFrameMismatch {
                    method: record.signature.render(ctx.types),
                    frame_assignment: render_assignment(&fixed, mask),
                })
            }
        }
    }
    Ok(())
}

/// Mutable-frame parameters are built in frame B while everything else is
/// in frame A; after the call each of them must have adopted frame A.
fn adoption_pass(
    ctx: &CheckContext<'_>,
    record: &MethodRecord,
    holder_factory: Option<HolderFactory<'_>>,
    rng: &mut DeterministicRng,
    classification: &[Option<FrameMutability>],
) -> Result<(), ConformanceError> {
    let mutable: Vec<usize> = classification
        .iter()
        .enumerate()
        .filter_map(|(index, class)| {
            matches!(class, Some(FrameMutability::MutableFrame)).then_some(index)
        })
        .collect();
    if mutable.is_empty() {
        return Ok(());
    }

    let frame_for = |index: usize| {
        if mutable.contains(&index) {
            ctx.frame_b
        } else {
            ctx.frame_a
        }
    };
    let Some(mut args) = build_arguments(ctx, rng, &record.signature, &frame_for) else {
        return Ok(());
    };
    let (outcome, _) = invoke(record, holder_factory, rng, ctx.frame_a, &mut args)?;
    if let Err(fault) = outcome {
        if ctx.registry.is_ignored_fault(fault.kind) {
            return Ok(());
        }
        return Err(ConformanceError::UnexpectedFault {
            method: record.signature.render(ctx.types),
            fault,
        });
    }

    for index in mutable {
        let actual = args[index].reference_frame();
        if actual != Some(ctx.frame_a) {
            return Err(ConformanceError::MissingFrameAdoption {
                method: record.signature.render(ctx.types),
                parameter_index: index,
                parameter_type: ctx.types.name(record.signature.parameters[index]).to_string(),
                expected_frame: ctx.frame_a,
                actual_frame: actual,
            });
        }
    }
    Ok(())
}

/// Frame-aware results of an all-frame-A invocation must come back in
/// frame A.
fn result_frame_pass(
    ctx: &CheckContext<'_>,
    record: &MethodRecord,
    holder_factory: Option<HolderFactory<'_>>,
    rng: &mut DeterministicRng,
) -> Result<(), ConformanceError> {
    let Some(return_type) = record.signature.return_type else {
        return Ok(());
    };
    if !ctx.registry.is_frame_type(return_type) {
        return Ok(());
    }

    let all_a = |_: usize| ctx.frame_a;
    let Some(mut args) = build_arguments(ctx, rng, &record.signature, &all_a) else {
        return Ok(());
    };
    let (outcome, _) = invoke(record, holder_factory, rng, ctx.frame_a, &mut args)?;
    match outcome {
        Ok(Some(result)) => {
            let actual = result.reference_frame();
            if actual == Some(ctx.frame_a) {
                Ok(())
            } else {
                Err(ConformanceError::WrongResultFrame {
                    method: record.signature.render(ctx.types),
                    expected_frame: ctx.frame_a,
                    actual_frame: actual,
                })
            }
        }
        Ok(None) => Ok(()),
        Err(fault) if ctx.registry.is_ignored_fault(fault.kind) => Ok(()),
        Err(fault) => Err(ConformanceError::UnexpectedFault {
            method: record.signature.render(ctx.types),
            fault,
        }),
    }
}

fn render_assignment(fixed: &[usize], mask: u64) -> String {
    let cells: Vec<String> = fixed
        .iter()
        .enumerate()
        .map(|(bit, index)| {
            let frame = if mask & (1u64 << bit) != 0 { "B" } else { "A" };
            format!("p{index}={frame}")
        })
        .collect();
    format!("[{}]", cells.join(", "))
}

#[cfg(test)]
mod tests {
    use super::{
        assert_frame_holder_methods_check_reference_frame,
        assert_static_methods_check_reference_frame,
    };
    use crate::fixtures::FixtureWorld;
    use crate::report::ConformanceError;
    use crate::HolderFactory;
    use feu_model::{FrameId, Value};
    use feu_random::DeterministicRng;

    #[test]
    fn compliant_static_methods_pass() {
        let world = FixtureWorld::new().expect("fixture world");
        let ctx = world.context();
        assert_static_methods_check_reference_frame(
            &ctx,
            world.tokens.frame_geometry_tools,
            &|signature| signature.name != "validate",
            3,
        )
        .expect("compliant utility raises on every mixed assignment");
    }

    #[test]
    fn unchecked_static_method_reports_missing_mismatch() {
        let world = FixtureWorld::new().expect("fixture world");
        let ctx = world.context();
        let err = assert_static_methods_check_reference_frame(
            &ctx,
            world.tokens.broken_frame_geometry_tools,
            &|signature| signature.name == "dist",
            3,
        )
        .expect_err("broken dist never compares frames");
        assert!(matches!(err, ConformanceError::MissingFrameMismatch { .. }));
    }

    #[test]
    fn single_frame_parameter_static_is_below_threshold() {
        let world = FixtureWorld::new().expect("fixture world");
        let ctx = world.context();
        // Broken norm does not check frames either, but a lone frame-fixed
        // parameter of a static method leaves nothing to mismatch.
        assert_static_methods_check_reference_frame(
            &ctx,
            world.tokens.broken_frame_geometry_tools,
            &|signature| signature.name == "norm",
            3,
        )
        .expect("one frame-fixed parameter is insufficient degrees of freedom");
    }

    #[test]
    fn missing_frame_adoption_is_detected() {
        let world = FixtureWorld::new().expect("fixture world");
        let ctx = world.context();
        let err = assert_static_methods_check_reference_frame(
            &ctx,
            world.tokens.broken_frame_geometry_tools,
            &|signature| signature.name == "packInto",
            3,
        )
        .expect_err("broken packInto keeps the output in its foreign frame");
        assert!(matches!(err, ConformanceError::MissingFrameAdoption { .. }));
    }

    #[test]
    fn wrong_result_frame_is_detected() {
        let world = FixtureWorld::new().expect("fixture world");
        let ctx = world.context();
        let err = assert_static_methods_check_reference_frame(
            &ctx,
            world.tokens.broken_frame_geometry_tools,
            &|signature| signature.name == "midpoint",
            3,
        )
        .expect_err("broken midpoint pins its result to the root frame");
        assert!(matches!(err, ConformanceError::WrongResultFrame { .. }));
    }

    #[test]
    fn compliant_holder_methods_pass() {
        let world = FixtureWorld::new().expect("fixture world");
        let ctx = world.context();
        let factory = |rng: &mut DeterministicRng, frame: FrameId| -> Value {
            world.random_holder(
                rng,
                frame,
                world.tokens.frame_point3d,
                world.tokens.point3d,
                3,
            )
        };
        let factory: HolderFactory<'_> = &factory;
        assert_frame_holder_methods_check_reference_frame(&ctx, factory, &|_| true, 2)
            .expect("FramePoint3D checks frames on every method");
    }

    #[test]
    fn holder_counts_toward_the_mismatch_threshold() {
        let world = FixtureWorld::new().expect("fixture world");
        let ctx = world.context();
        let factory = |rng: &mut DeterministicRng, frame: FrameId| -> Value {
            world.random_holder(
                rng,
                frame,
                world.tokens.frame_point3d_buggy,
                world.tokens.point3d,
                3,
            )
        };
        let factory: HolderFactory<'_> = &factory;
        // `sub` takes a single frame argument; with the receiver pinned to
        // frame A that is already two participants, and the missing check
        // must be reported.
        let err = assert_frame_holder_methods_check_reference_frame(
            &ctx,
            factory,
            &|signature| signature.name == "sub",
            2,
        )
        .expect_err("buggy sub never compares frames");
        assert!(matches!(err, ConformanceError::MissingFrameMismatch { .. }));
    }
}
