//! `setMatchingFrame` / `setIncludingFrame` contract.
//!
//! These setters reconcile a frame difference between receiver and
//! arguments instead of raising: `setMatchingFrame` keeps the receiver's
//! frame, `setIncludingFrame` adopts the arguments' frame. Their observable
//! behavior is pinned to a reference recipe built from the plain frameless
//! `set` overload plus explicit frame bookkeeping.

use crate::frame_invariant::{build_arguments, invoke};
use crate::report::ConformanceError;
use crate::{CheckContext, HolderFactory};
use feu_model::{DynValue, FrameMutability, TypeToken, Value};
use feu_random::DeterministicRng;
use feu_signature::{InvocationResult, MethodKind, MethodRecord, MethodSignature};

/// Frame rules exercised from the frame invariant checker in place of the
/// generic mismatch pass: read-only-only arguments, mixed-frame acceptance,
/// receiver frame outcome, and the mixed-argument mismatch pass.
pub(crate) fn check_frame_rules(
    ctx: &CheckContext<'_>,
    record: &MethodRecord,
    holder_factory: Option<HolderFactory<'_>>,
    rng: &mut DeterministicRng,
) -> Result<(), ConformanceError> {
    assert_read_only_parameters(ctx, &record.signature)?;
    mixed_argument_mismatch_pass(ctx, record, holder_factory, rng)?;

    let Some(factory) = holder_factory else {
        return Ok(());
    };

    // Acceptance pass: arguments in frame B against a frame A receiver
    // must go through, and the receiver must end up in the frame the
    // naming convention promises.
    let all_b = |_: usize| ctx.frame_b;
    let Some(mut args) = build_arguments(ctx, rng, &record.signature, &all_b) else {
        return Ok(());
    };
    let (outcome, holder) = invoke(record, Some(factory), rng, ctx.frame_a, &mut args)?;
    match outcome {
        Err(fault) if fault.is_frame_mismatch() => {
            return Err(ConformanceError::UnexpectedFault {
                method: record.signature.render(ctx.types),
                fault,
            });
        }
        Err(fault) if ctx.registry.is_ignored_fault(fault.kind) => return Ok(()),
        Err(fault) => {
            return Err(ConformanceError::UnexpectedFault {
                method: record.signature.render(ctx.types),
                fault,
            });
        }
        Ok(_) => {}
    }

    let expected_frame = if record.signature.name.ends_with("IncludingFrame") {
        ctx.frame_b
    } else {
        ctx.frame_a
    };
    if let Some(holder) = holder {
        let actual = holder.reference_frame();
        if actual != Some(expected_frame) {
            return Err(ConformanceError::WrongReceiverFrame {
                method: record.signature.render(ctx.types),
                expected_frame,
                actual_frame: actual,
            });
        }
    }
    Ok(())
}

/// Differential check for `setMatchingFrame` overloads against the
/// reference recipe.
pub fn assert_set_matching_frame_preserve_functionality(
    ctx: &CheckContext<'_>,
    holder_factory: HolderFactory<'_>,
    filter: &dyn Fn(&MethodSignature) -> bool,
    iterations: usize,
    epsilon: f64,
) -> Result<(), ConformanceError> {
    assert_setter_family(ctx, holder_factory, filter, iterations, epsilon, "setMatchingFrame")
}

/// Differential check for `setIncludingFrame` overloads.
pub fn assert_set_including_frame_preserve_functionality(
    ctx: &CheckContext<'_>,
    holder_factory: HolderFactory<'_>,
    filter: &dyn Fn(&MethodSignature) -> bool,
    iterations: usize,
    epsilon: f64,
) -> Result<(), ConformanceError> {
    assert_setter_family(ctx, holder_factory, filter, iterations, epsilon, "setIncludingFrame")
}

fn assert_setter_family(
    ctx: &CheckContext<'_>,
    holder_factory: HolderFactory<'_>,
    filter: &dyn Fn(&MethodSignature) -> bool,
    iterations: usize,
    epsilon: f64,
    setter_name: &str,
) -> Result<(), ConformanceError> {
    let mut probe_rng = DeterministicRng::new(ctx.seed).child("setter_probe");
    let probe = holder_factory(&mut probe_rng, ctx.frame_a);
    let holder_type = probe.type_token();
    let including = setter_name == "setIncludingFrame";

    for record in ctx.methods.methods_of(holder_type) {
        if record.kind() != MethodKind::Instance
            || record.signature.name != setter_name
            || !filter(&record.signature)
        {
            continue;
        }
        assert_read_only_parameters(ctx, &record.signature)?;
        check_setter(
            ctx,
            record,
            holder_type,
            holder_factory,
            iterations,
            epsilon,
            including,
        )?;
        let mut rng = DeterministicRng::new(ctx.seed)
            .child(&format!("{}/mismatch", record.signature.render(ctx.types)));
        mixed_argument_mismatch_pass(ctx, record, Some(holder_factory), &mut rng)?;
    }
    Ok(())
}

fn check_setter(
    ctx: &CheckContext<'_>,
    record: &MethodRecord,
    holder_type: TypeToken,
    holder_factory: HolderFactory<'_>,
    iterations: usize,
    epsilon: f64,
    including: bool,
) -> Result<(), ConformanceError> {
    let rendered = record.signature.render(ctx.types);
    let mut rng = DeterministicRng::new(ctx.seed).child(&rendered);

    for _ in 0..iterations {
        // Both the same-frame and the differing-frame case are driven.
        for receiver_frame in [ctx.frame_a, ctx.frame_b] {
            let arg_frame = ctx.frame_a;
            let in_arg_frame = |_: usize| arg_frame;
            let Some(args) = build_arguments(ctx, &mut rng, &record.signature, &in_arg_frame)
            else {
                return Ok(());
            };

            let mut candidate_receiver = holder_factory(&mut rng, receiver_frame);
            let mut reference_receiver = candidate_receiver.boxed_clone();

            let mut candidate_args = args.clone();
            let candidate_out = record
                .invoke_instance(&mut *candidate_receiver, &mut candidate_args)
                .map_err(|err| ConformanceError::InvocationMisuse {
                    detail: err.to_string(),
                })?;

            let mut reference_args = args.clone();
            let reference_out = run_reference_recipe(
                ctx,
                record,
                holder_type,
                &mut *reference_receiver,
                &mut reference_args,
                including,
            )?;

            compare_setter_outcomes(
                ctx,
                record,
                reference_out,
                candidate_out,
                reference_receiver.as_ref(),
                candidate_receiver.as_ref(),
                epsilon,
            )?;
        }
    }
    Ok(())
}

/// Replays the setter through the plain frameless `set` overload.
///
/// Recipe (i), same dimensionality: reinterpret the receiver in the
/// arguments' frame, `set`, then transform back to the original frame
/// (skipped for `setIncludingFrame`). Recipe (ii), 2-D receiver with 3-D
/// arguments: transform private argument copies into the receiver's frame
/// first, then `set`, avoiding a lossy 2D-from-3D frame change. Under
/// `setIncludingFrame` the receiver adopts the arguments' frame instead,
/// so recipe (ii) degenerates to projecting the argument values verbatim.
fn run_reference_recipe(
    ctx: &CheckContext<'_>,
    record: &MethodRecord,
    holder_type: TypeToken,
    receiver: &mut dyn DynValue,
    args: &mut [Value],
    including: bool,
) -> Result<InvocationResult, ConformanceError> {
    let signature = &record.signature;
    let has_frame_handle =
        signature.parameters.first() == Some(&ctx.types.reference_frame_token());
    let value_start = usize::from(has_frame_handle);
    let value_params = &signature.parameters[value_start..];

    let frameless_params: Vec<TypeToken> = value_params
        .iter()
        .map(|&param| {
            ctx.registry
                .find_corresponding_frameless_type(ctx.types, param)
                .unwrap_or(param)
        })
        .collect();
    let set_record = ctx
        .methods
        .find(holder_type, "set", &frameless_params)
        .ok_or_else(|| ConformanceError::MissingOverload {
            original: signature.render(ctx.types),
            expected: MethodSignature::new("set", frameless_params.clone(), None)
                .render(ctx.types),
            frame_type: ctx.types.name(holder_type).to_string(),
        })?;

    let arg_frame = args
        .iter()
        .find_map(|value| value.reference_frame())
        .or_else(|| receiver.reference_frame());
    let Some(arg_frame) = arg_frame else {
        return Ok(Ok(None));
    };
    let original_frame = receiver.reference_frame();

    let receiver_dim = ctx.types.dimensionality(holder_type);
    let frame_value_dims: Vec<Option<u8>> = value_params
        .iter()
        .filter(|&&param| ctx.registry.is_frame_type(param))
        .map(|&param| ctx.types.dimensionality(param))
        .collect();
    let transform_first = receiver_dim == Some(2)
        && !frame_value_dims.is_empty()
        && frame_value_dims.iter().all(|dim| *dim == Some(3));

    if transform_first {
        // `setIncludingFrame` adopts the arguments' frame, so the arguments
        // stay put and the transform is the identity; `setMatchingFrame`
        // reconciles into the receiver's current frame.
        let transform_target = if including {
            Some(arg_frame)
        } else {
            original_frame
        };
        let mut set_args = Vec::with_capacity(value_params.len());
        for value in &args[value_start..] {
            // Private copies: the caller's arguments are never mutated.
            let mut copy = value.boxed_clone();
            if copy.reference_frame().is_some() {
                if let Some(target) = transform_target {
                    if let Err(fault) = copy.change_frame(target) {
                        return Ok(Err(fault));
                    }
                }
            }
            set_args.push(match copy.frameless_view() {
                Some(view) => view,
                None => copy,
            });
        }
        let out = set_record
            .invoke_instance(receiver, &mut set_args)
            .map_err(|err| ConformanceError::InvocationMisuse {
                detail: err.to_string(),
            })?;
        if including && out.is_ok() {
            receiver.set_reference_frame(arg_frame);
        }
        Ok(out)
    } else {
        receiver.set_reference_frame(arg_frame);
        let mut set_args = Vec::with_capacity(value_params.len());
        for value in &args[value_start..] {
            let copy = value.boxed_clone();
            set_args.push(match copy.frameless_view() {
                Some(view) => view,
                None => copy,
            });
        }
        let out = set_record
            .invoke_instance(receiver, &mut set_args)
            .map_err(|err| ConformanceError::InvocationMisuse {
                detail: err.to_string(),
            })?;
        if out.is_ok() && !including {
            if let Some(original) = original_frame {
                if let Err(fault) = receiver.change_frame(original) {
                    return Ok(Err(fault));
                }
            }
        }
        Ok(out)
    }
}

fn compare_setter_outcomes(
    ctx: &CheckContext<'_>,
    record: &MethodRecord,
    reference_out: InvocationResult,
    candidate_out: InvocationResult,
    reference_receiver: &dyn DynValue,
    candidate_receiver: &dyn DynValue,
    epsilon: f64,
) -> Result<(), ConformanceError> {
    let rendered = record.signature.render(ctx.types);
    match (reference_out, candidate_out) {
        (Err(reference_fault), Err(candidate_fault)) => {
            if reference_fault.kind == candidate_fault.kind {
                return Ok(());
            }
            return Err(ConformanceError::DivergentFault {
                reference: rendered.clone(),
                candidate: rendered,
                reference_fault: Some(reference_fault),
                candidate_fault: Some(candidate_fault),
            });
        }
        (Ok(_), Err(candidate_fault)) => {
            return Err(ConformanceError::DivergentFault {
                reference: rendered.clone(),
                candidate: rendered,
                reference_fault: None,
                candidate_fault: Some(candidate_fault),
            });
        }
        (Err(reference_fault), Ok(_)) => {
            return Err(ConformanceError::DivergentFault {
                reference: rendered.clone(),
                candidate: rendered,
                reference_fault: Some(reference_fault),
                candidate_fault: None,
            });
        }
        (Ok(_), Ok(_)) => {}
    }

    let expected_frame = reference_receiver.reference_frame();
    let actual_frame = candidate_receiver.reference_frame();
    if expected_frame != actual_frame {
        return Err(ConformanceError::WrongReceiverFrame {
            method: rendered,
            expected_frame: expected_frame.unwrap_or(ctx.frame_a),
            actual_frame,
        });
    }

    if !ctx
        .comparer
        .epsilon_equals(candidate_receiver, reference_receiver, epsilon)
    {
        return Err(ConformanceError::MethodInconsistency {
            reference: format!("reference recipe for '{rendered}'"),
            candidate: rendered.clone(),
            detail: format!(
                "receiver diverged: candidate={}, reference={}",
                candidate_receiver.describe(),
                reference_receiver.describe()
            ),
        });
    }
    Ok(())
}

/// Matching-frame setters only accept read-only frame-typed arguments.
fn assert_read_only_parameters(
    ctx: &CheckContext<'_>,
    signature: &MethodSignature,
) -> Result<(), ConformanceError> {
    for &param in &signature.parameters {
        if let Some(mutability) = ctx.registry.frame_mutability(param) {
            if mutability != FrameMutability::ReadOnly {
                return Err(ConformanceError::MatchingFrameSetterViolation {
                    method: signature.render(ctx.types),
                    parameter_type: ctx.types.name(param).to_string(),
                });
            }
        }
    }
    Ok(())
}

/// With at least two frame-bearing arguments, every assignment that mixes
/// frames among the arguments must raise the mismatch fault; the setter
/// only reconciles the receiver's frame, never disagreeing arguments.
fn mixed_argument_mismatch_pass(
    ctx: &CheckContext<'_>,
    record: &MethodRecord,
    holder_factory: Option<HolderFactory<'_>>,
    rng: &mut DeterministicRng,
) -> Result<(), ConformanceError> {
    let signature = &record.signature;
    let frame_bearing: Vec<usize> = signature
        .parameters
        .iter()
        .enumerate()
        .filter_map(|(index, &param)| {
            let bears_frame = param == ctx.types.reference_frame_token()
                || ctx.registry.is_frame_type(param);
            bears_frame.then_some(index)
        })
        .collect();
    if frame_bearing.len() < 2 {
        return Ok(());
    }

    let k = frame_bearing.len().min(63) as u32;
    let top = 1u64 << k;
    // Both all-A and all-B are coherent; only mixed assignments must raise.
    for mask in 1..(top - 1) {
        let frame_for = |index: usize| {
            match frame_bearing
                .iter()
                .position(|&bearing_index| bearing_index == index)
            {
                Some(bit) if mask & (1u64 << bit) != 0 => ctx.frame_b,
                _ => ctx.frame_a,
            }
        };
        let Some(mut args) = build_arguments(ctx, rng, signature, &frame_for) else {
            return Ok(());
        };
        let (outcome, _) = invoke(record, holder_factory, rng, ctx.frame_a, &mut args)?;
        match outcome {
            Err(fault) if fault.is_frame_mismatch() => {}
            Err(fault) if ctx.registry.is_ignored_fault(fault.kind) => {}
            Err(fault) => {
                return Err(ConformanceError::UnexpectedFault {
                    method: signature.render(ctx.types),
                    fault,
                })
            }
            Ok(_) => {
                return Err(ConformanceError::MissingFrameMismatch {
                    method: signature.render(ctx.types),
                    frame_assignment: format!("mixed argument mask {mask:#b}"),
                })
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{
        assert_set_including_frame_preserve_functionality,
        assert_set_matching_frame_preserve_functionality,
    };
    use crate::fixtures::{FixtureWorld, GeomValue};
    use crate::report::ConformanceError;
    use crate::HolderFactory;
    use feu_compare::DEFAULT_EPSILON;
    use feu_model::{DynValue, FrameId, TypeToken, Value};
    use feu_random::DeterministicRng;
    use feu_signature::MethodSignature;

    fn factory_for(
        world: &FixtureWorld,
        token: TypeToken,
        frameless: TypeToken,
        dim: usize,
    ) -> impl Fn(&mut DeterministicRng, FrameId) -> Value + '_ {
        move |rng: &mut DeterministicRng, frame: FrameId| -> Value {
            world.random_holder(rng, frame, token, frameless, dim)
        }
    }

    #[test]
    fn matching_setters_follow_the_reference_recipe() {
        let world = FixtureWorld::new().expect("fixture world");
        let ctx = world.context();
        let factory = factory_for(
            &world,
            world.tokens.frame_point3d,
            world.tokens.point3d,
            3,
        );
        let factory: HolderFactory<'_> = &factory;
        assert_set_matching_frame_preserve_functionality(
            &ctx,
            factory,
            &|_| true,
            3,
            DEFAULT_EPSILON,
        )
        .expect("FramePoint3D reconciles frames the canonical way");
    }

    #[test]
    fn including_setters_adopt_the_argument_frame() {
        let world = FixtureWorld::new().expect("fixture world");
        let ctx = world.context();
        let factory = factory_for(
            &world,
            world.tokens.frame_point3d,
            world.tokens.point3d,
            3,
        );
        let factory: HolderFactory<'_> = &factory;
        assert_set_including_frame_preserve_functionality(
            &ctx,
            factory,
            &|_| true,
            3,
            DEFAULT_EPSILON,
        )
        .expect("FramePoint3D adopts the arguments' frame");
    }

    #[test]
    fn two_dimensional_receiver_uses_the_transform_first_recipe() {
        let world = FixtureWorld::new().expect("fixture world");
        let ctx = world.context();
        let factory = factory_for(
            &world,
            world.tokens.frame_point2d,
            world.tokens.point2d,
            2,
        );
        let factory: HolderFactory<'_> = &factory;
        assert_set_matching_frame_preserve_functionality(
            &ctx,
            factory,
            &|_| true,
            3,
            DEFAULT_EPSILON,
        )
        .expect("FramePoint2D transforms 3-D arguments before projecting");
    }

    #[test]
    fn two_dimensional_receiver_adopts_three_dimensional_arguments_verbatim() {
        let world = FixtureWorld::new().expect("fixture world");
        let ctx = world.context();
        let factory = factory_for(
            &world,
            world.tokens.frame_point2d,
            world.tokens.point2d,
            2,
        );
        let factory: HolderFactory<'_> = &factory;
        assert_set_including_frame_preserve_functionality(
            &ctx,
            factory,
            &|_| true,
            3,
            DEFAULT_EPSILON,
        )
        .expect("FramePoint2D projects adopted 3-D arguments without a transform");
    }

    #[test]
    fn frame_ignoring_matching_setter_is_detected() {
        let world = FixtureWorld::new().expect("fixture world");
        let ctx = world.context();
        let factory = factory_for(
            &world,
            world.tokens.frame_point3d_buggy,
            world.tokens.point3d,
            3,
        );
        let factory: HolderFactory<'_> = &factory;
        let err = assert_set_matching_frame_preserve_functionality(
            &ctx,
            factory,
            &|_| true,
            3,
            DEFAULT_EPSILON,
        )
        .expect_err("buggy setter copies coordinates without transforming");
        assert!(matches!(err, ConformanceError::MethodInconsistency { .. }));
    }

    #[test]
    fn mutable_frame_parameter_is_a_violation() {
        let mut world = FixtureWorld::new().expect("fixture world");
        let tokens = world.tokens;
        world.methods.declare_instance(
            tokens.frame_point3d,
            MethodSignature::new("setMatchingFrame", vec![tokens.fixed_frame_point3d], None),
            Box::new(|_receiver: &mut dyn DynValue, _args: &mut [Value]| Ok(None)),
        );
        let ctx = world.context();
        let factory = factory_for(&world, tokens.frame_point3d, tokens.point3d, 3);
        let factory: HolderFactory<'_> = &factory;
        let err = assert_set_matching_frame_preserve_functionality(
            &ctx,
            factory,
            &|_| true,
            3,
            DEFAULT_EPSILON,
        )
        .expect_err("non-read-only frame parameter is rejected");
        assert!(matches!(
            err,
            ConformanceError::MatchingFrameSetterViolation { .. }
        ));
    }

    #[test]
    fn non_adopting_including_setter_is_detected() {
        let mut world = FixtureWorld::new().expect("fixture world");
        let tokens = world.tokens;
        // Sets the value but keeps the receiver's frame.
        world.methods.declare_instance(
            tokens.frame_point3d_buggy,
            MethodSignature::new(
                "setIncludingFrame",
                vec![tokens.frame_point3d_read_only],
                None,
            ),
            Box::new(|receiver: &mut dyn DynValue, args: &mut [Value]| {
                let coords = args[0]
                    .as_any()
                    .downcast_ref::<GeomValue>()
                    .expect("geometry argument")
                    .coords()
                    .to_vec();
                receiver
                    .as_any_mut()
                    .downcast_mut::<GeomValue>()
                    .expect("geometry receiver")
                    .assign(&coords);
                Ok(None)
            }),
        );
        let ctx = world.context();
        let factory = factory_for(&world, tokens.frame_point3d_buggy, tokens.point3d, 3);
        let factory: HolderFactory<'_> = &factory;
        let err = assert_set_including_frame_preserve_functionality(
            &ctx,
            factory,
            &|_| true,
            3,
            DEFAULT_EPSILON,
        )
        .expect_err("receiver must adopt the arguments' frame");
        assert!(matches!(err, ConformanceError::WrongReceiverFrame { .. }));
    }
}
