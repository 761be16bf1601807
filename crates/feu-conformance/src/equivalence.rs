//! Differential equivalence checking.
//!
//! Drives a reference method and a candidate method presumed equivalent up
//! to frame bookkeeping with matched random inputs, and compares mutated
//! arguments, return values, receivers, and fault kinds.

use crate::frame_invariant::build_arguments;
use crate::report::ConformanceError;
use crate::{CheckContext, FrameCopier, FramelessBuilder};
use feu_model::{DynValue, TypeToken, Value};
use feu_random::{DeterministicRng, MAX_CLONE_RETRIES};
use feu_signature::{InvocationResult, MethodKind, MethodRecord, MethodSignature};

/// Static family equivalence: every static method of `frame_type` with at
/// least one frame-typed parameter is checked against the identically named
/// frameless method of `frameless_type`.
pub fn assert_static_methods_preserve_functionality(
    ctx: &CheckContext<'_>,
    frame_type: TypeToken,
    frameless_type: TypeToken,
    filter: &dyn Fn(&MethodSignature) -> bool,
    iterations: usize,
    epsilon: f64,
) -> Result<(), ConformanceError> {
    for candidate in ctx.methods.methods_of(frame_type) {
        if candidate.kind() != MethodKind::Static || !filter(&candidate.signature) {
            continue;
        }
        let reference_params = frameless_parameters(ctx, &candidate.signature);
        if reference_params == candidate.signature.parameters {
            // No frame-typed parameter; nothing to compare differentially.
            continue;
        }
        let Some(reference) =
            ctx.methods
                .find(frameless_type, &candidate.signature.name, &reference_params)
        else {
            // Presence is the overload checker's concern.
            continue;
        };
        check_static_pair(ctx, reference, candidate, iterations, epsilon)?;
    }
    Ok(())
}

/// Instance family equivalence: a frame holder built by copying a random
/// frameless value into the working frame is checked method-by-method
/// against the frameless original.
pub fn assert_frame_methods_of_frame_holder_preserve_functionality(
    ctx: &CheckContext<'_>,
    copier: FrameCopier<'_>,
    frameless_builder: FramelessBuilder<'_>,
    filter: &dyn Fn(&MethodSignature) -> bool,
    iterations: usize,
    epsilon: f64,
) -> Result<(), ConformanceError> {
    let mut probe_rng = DeterministicRng::new(ctx.seed).child("holder_equivalence_probe");
    let probe_frameless = frameless_builder(&mut probe_rng);
    let frameless_type = probe_frameless.type_token();
    let probe_frame = copier(ctx.frame_a, probe_frameless.as_ref());
    let frame_type = probe_frame.type_token();

    for candidate in ctx.methods.methods_of(frame_type) {
        if candidate.kind() != MethodKind::Instance || !filter(&candidate.signature) {
            continue;
        }
        let reference_params = frameless_parameters(ctx, &candidate.signature);
        if reference_params == candidate.signature.parameters {
            continue;
        }
        let Some(reference) =
            ctx.methods
                .find(frameless_type, &candidate.signature.name, &reference_params)
        else {
            continue;
        };
        check_instance_pair(
            ctx,
            reference,
            candidate,
            copier,
            frameless_builder,
            iterations,
            epsilon,
        )?;
    }
    Ok(())
}

/// Candidate parameter list with every frame token replaced by its
/// frameless sibling.
pub(crate) fn frameless_parameters(
    ctx: &CheckContext<'_>,
    signature: &MethodSignature,
) -> Vec<TypeToken> {
    signature
        .parameters
        .iter()
        .map(|&param| {
            ctx.registry
                .find_corresponding_frameless_type(ctx.types, param)
                .unwrap_or(param)
        })
        .collect()
}

/// Clones the candidate tuple for the reference method, projecting each
/// argument to its frameless form wherever the parameter tokens differ.
/// `None` signals a clone failure (retried by the caller).
fn reference_arguments(
    ctx: &CheckContext<'_>,
    candidate_args: &[Value],
    reference_params: &[TypeToken],
    candidate_params: &[TypeToken],
) -> Option<Vec<Value>> {
    let cloned = ctx.random.clone_instances(candidate_args)?;
    let mut out = Vec::with_capacity(cloned.len());
    for (index, value) in cloned.into_iter().enumerate() {
        if reference_params[index] == candidate_params[index] {
            out.push(value);
        } else {
            out.push(value.frameless_view()?);
        }
    }
    Some(out)
}

fn check_static_pair(
    ctx: &CheckContext<'_>,
    reference: &MethodRecord,
    candidate: &MethodRecord,
    iterations: usize,
    epsilon: f64,
) -> Result<(), ConformanceError> {
    let rendered = candidate.signature.render(ctx.types);
    let mut rng = DeterministicRng::new(ctx.seed).child(&rendered);
    let reference_params = frameless_parameters(ctx, &candidate.signature);

    let mut completed = 0usize;
    let mut clone_failures = 0usize;
    while completed < iterations {
        let all_a = |_: usize| ctx.frame_a;
        let Some(mut candidate_args) =
            build_arguments(ctx, &mut rng, &candidate.signature, &all_a)
        else {
            return Ok(());
        };
        let Some(mut reference_args) = reference_arguments(
            ctx,
            &candidate_args,
            &reference_params,
            &candidate.signature.parameters,
        ) else {
            clone_failures += 1;
            if clone_failures >= MAX_CLONE_RETRIES {
                return Err(ConformanceError::CloneRetryExhausted {
                    method: rendered,
                    retries: clone_failures,
                });
            }
            continue;
        };
        clone_failures = 0;

        let reference_out = reference
            .invoke_static(&mut reference_args)
            .map_err(|err| ConformanceError::InvocationMisuse {
                detail: err.to_string(),
            })?;
        let candidate_out = candidate
            .invoke_static(&mut candidate_args)
            .map_err(|err| ConformanceError::InvocationMisuse {
                detail: err.to_string(),
            })?;

        compare_outcomes(
            ctx,
            reference,
            candidate,
            reference_out,
            candidate_out,
            &reference_args,
            &candidate_args,
            None,
            epsilon,
        )?;
        completed += 1;
    }
    Ok(())
}

fn check_instance_pair(
    ctx: &CheckContext<'_>,
    reference: &MethodRecord,
    candidate: &MethodRecord,
    copier: FrameCopier<'_>,
    frameless_builder: FramelessBuilder<'_>,
    iterations: usize,
    epsilon: f64,
) -> Result<(), ConformanceError> {
    let rendered = candidate.signature.render(ctx.types);
    let mut rng = DeterministicRng::new(ctx.seed).child(&rendered);
    let reference_params = frameless_parameters(ctx, &candidate.signature);

    let mut completed = 0usize;
    let mut clone_failures = 0usize;
    while completed < iterations {
        let all_a = |_: usize| ctx.frame_a;
        let Some(mut candidate_args) =
            build_arguments(ctx, &mut rng, &candidate.signature, &all_a)
        else {
            return Ok(());
        };
        let Some(mut reference_args) = reference_arguments(
            ctx,
            &candidate_args,
            &reference_params,
            &candidate.signature.parameters,
        ) else {
            clone_failures += 1;
            if clone_failures >= MAX_CLONE_RETRIES {
                return Err(ConformanceError::CloneRetryExhausted {
                    method: rendered,
                    retries: clone_failures,
                });
            }
            continue;
        };
        clone_failures = 0;

        // Both receivers start from the same underlying value.
        let mut reference_receiver = frameless_builder(&mut rng);
        let mut candidate_receiver = copier(ctx.frame_a, reference_receiver.as_ref());

        let reference_out = reference
            .invoke_instance(&mut *reference_receiver, &mut reference_args)
            .map_err(|err| ConformanceError::InvocationMisuse {
                detail: err.to_string(),
            })?;
        let candidate_out = candidate
            .invoke_instance(&mut *candidate_receiver, &mut candidate_args)
            .map_err(|err| ConformanceError::InvocationMisuse {
                detail: err.to_string(),
            })?;

        compare_outcomes(
            ctx,
            reference,
            candidate,
            reference_out,
            candidate_out,
            &reference_args,
            &candidate_args,
            Some((reference_receiver.as_ref(), candidate_receiver.as_ref())),
            epsilon,
        )?;
        completed += 1;
    }
    Ok(())
}

/// Compares two invocation outcomes: fault kinds, mutated arguments,
/// returned values, and (for instance methods) the receivers.
#[allow(clippy::too_many_arguments)]
pub(crate) fn compare_outcomes(
    ctx: &CheckContext<'_>,
    reference: &MethodRecord,
    candidate: &MethodRecord,
    reference_out: InvocationResult,
    candidate_out: InvocationResult,
    reference_args: &[Value],
    candidate_args: &[Value],
    receivers: Option<(&dyn DynValue, &dyn DynValue)>,
    epsilon: f64,
) -> Result<(), ConformanceError> {
    let divergent_fault = |reference_fault: Option<_>, candidate_fault: Option<_>| {
        ConformanceError::DivergentFault {
            reference: reference.signature.render(ctx.types),
            candidate: candidate.signature.render(ctx.types),
            reference_fault,
            candidate_fault,
        }
    };

    let (reference_value, candidate_value) = match (reference_out, candidate_out) {
        (Err(reference_fault), Err(candidate_fault)) => {
            if reference_fault.kind == candidate_fault.kind {
                // Same fault kind: the iteration is consistent and ends early.
                return Ok(());
            }
            return Err(divergent_fault(Some(reference_fault), Some(candidate_fault)));
        }
        (Ok(_), Err(candidate_fault)) => {
            return Err(divergent_fault(None, Some(candidate_fault)));
        }
        (Err(reference_fault), Ok(_)) => {
            return Err(divergent_fault(Some(reference_fault), None));
        }
        (Ok(reference_value), Ok(candidate_value)) => (reference_value, candidate_value),
    };

    let inconsistency = |detail: String| ConformanceError::MethodInconsistency {
        reference: reference.signature.render(ctx.types),
        candidate: candidate.signature.render(ctx.types),
        detail,
    };

    for (index, (candidate_arg, reference_arg)) in
        candidate_args.iter().zip(reference_args).enumerate()
    {
        if !ctx.comparer.epsilon_equals(
            candidate_arg.as_ref(),
            reference_arg.as_ref(),
            epsilon,
        ) {
            return Err(inconsistency(format!(
                "argument {index} diverged: candidate={}, reference={}",
                candidate_arg.describe(),
                reference_arg.describe()
            )));
        }
    }

    match (&reference_value, &candidate_value) {
        (None, None) => {}
        (Some(reference_ret), Some(candidate_ret)) => {
            if !ctx.comparer.epsilon_equals(
                candidate_ret.as_ref(),
                reference_ret.as_ref(),
                epsilon,
            ) {
                return Err(inconsistency(format!(
                    "return value diverged: candidate={}, reference={}",
                    candidate_ret.describe(),
                    reference_ret.describe()
                )));
            }
        }
        (reference_ret, candidate_ret) => {
            return Err(inconsistency(format!(
                "return presence diverged: candidate={:?}, reference={:?}",
                candidate_ret.as_ref().map(|v| v.describe()),
                reference_ret.as_ref().map(|v| v.describe())
            )));
        }
    }

    if let Some((reference_receiver, candidate_receiver)) = receivers {
        if !ctx
            .comparer
            .epsilon_equals(candidate_receiver, reference_receiver, epsilon)
        {
            return Err(inconsistency(format!(
                "receiver diverged: candidate={}, reference={}",
                candidate_receiver.describe(),
                reference_receiver.describe()
            )));
        }
    }
    Ok(())
}
