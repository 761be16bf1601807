//! Failure taxonomy and diagnostic artifacts.
//!
//! Every violation the checkers can detect is one [`ConformanceError`]
//! variant carrying both method signatures (pre-rendered against the type
//! catalog) and the offending values. A failure aborts the assertion call
//! that detected it; callers let it propagate as a test failure.

use feu_model::{FrameId, MethodFault};
use serde::Serialize;
use std::fmt;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq)]
pub enum ConformanceError {
    /// A frameless method has no frame-aware overload with the expected
    /// parameter list.
    MissingOverload {
        original: String,
        expected: String,
        frame_type: String,
    },
    /// The overload exists but declares a return type wider than necessary.
    UnexpectedReturnType {
        original: String,
        overload: String,
        expected_return: String,
        actual_return: String,
    },
    /// A mixed-frame invocation completed without raising the dedicated
    /// reference-frame-mismatch fault.
    MissingFrameMismatch {
        method: String,
        frame_assignment: String,
    },
    /// A fault that is neither the expected mismatch kind nor on the
    /// registry's ignore list.
    UnexpectedFault { method: String, fault: MethodFault },
    /// A mutable-frame parameter kept its foreign frame after the call.
    MissingFrameAdoption {
        method: String,
        parameter_index: usize,
        parameter_type: String,
        expected_frame: FrameId,
        actual_frame: Option<FrameId>,
    },
    /// A frame-aware result was produced in the wrong frame.
    WrongResultFrame {
        method: String,
        expected_frame: FrameId,
        actual_frame: Option<FrameId>,
    },
    /// A matching-frame setter left its receiver in the wrong frame.
    WrongReceiverFrame {
        method: String,
        expected_frame: FrameId,
        actual_frame: Option<FrameId>,
    },
    /// Differential divergence between a method and its counterpart.
    MethodInconsistency {
        reference: String,
        candidate: String,
        detail: String,
    },
    /// The candidate did not throw the same fault kind as the reference.
    DivergentFault {
        reference: String,
        candidate: String,
        reference_fault: Option<MethodFault>,
        candidate_fault: Option<MethodFault>,
    },
    /// Random construction/cloning kept failing past the retry ceiling.
    CloneRetryExhausted { method: String, retries: usize },
    /// A `setMatchingFrame`/`setIncludingFrame` overload declares a
    /// mutable frame-typed parameter; only read-only frame types are
    /// permitted there.
    MatchingFrameSetterViolation {
        method: String,
        parameter_type: String,
    },
    /// A method record was driven with the wrong receiver kind; indicates
    /// a broken catalog registration, not a target-library bug.
    InvocationMisuse { detail: String },
}

impl ConformanceError {
    #[must_use]
    pub const fn reason_code(&self) -> &'static str {
        match self {
            Self::MissingOverload { .. } => "conformance_missing_overload",
            Self::UnexpectedReturnType { .. } => "conformance_unexpected_return_type",
            Self::MissingFrameMismatch { .. } => "conformance_missing_frame_mismatch",
            Self::UnexpectedFault { .. } => "conformance_unexpected_fault",
            Self::MissingFrameAdoption { .. } => "conformance_missing_frame_adoption",
            Self::WrongResultFrame { .. } => "conformance_wrong_result_frame",
            Self::WrongReceiverFrame { .. } => "conformance_wrong_receiver_frame",
            Self::MethodInconsistency { .. } => "conformance_method_inconsistency",
            Self::DivergentFault { .. } => "conformance_divergent_fault",
            Self::CloneRetryExhausted { .. } => "conformance_clone_retry_exhausted",
            Self::MatchingFrameSetterViolation { .. } => "conformance_matching_frame_setter",
            Self::InvocationMisuse { .. } => "conformance_invocation_misuse",
        }
    }
}

impl fmt::Display for ConformanceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingOverload {
                original,
                expected,
                frame_type,
            } => write!(
                f,
                "original method '{original}' is not properly overloaded: expected to find '{expected}' on {frame_type}"
            ),
            Self::UnexpectedReturnType {
                original,
                overload,
                expected_return,
                actual_return,
            } => write!(
                f,
                "Unexpected return type on '{overload}' overloading '{original}': expected {expected_return}, found {actual_return}"
            ),
            Self::MissingFrameMismatch {
                method,
                frame_assignment,
            } => write!(
                f,
                "method '{method}' did not raise the reference frame mismatch fault for assignment {frame_assignment}"
            ),
            Self::UnexpectedFault { method, fault } => {
                write!(f, "method '{method}' raised an unexpected fault: {fault}")
            }
            Self::MissingFrameAdoption {
                method,
                parameter_index,
                parameter_type,
                expected_frame,
                actual_frame,
            } => write!(
                f,
                "method '{method}' did not adopt {expected_frame} onto mutable-frame parameter {parameter_index} ({parameter_type}); found {actual_frame:?}"
            ),
            Self::WrongResultFrame {
                method,
                expected_frame,
                actual_frame,
            } => write!(
                f,
                "method '{method}' produced its result in {actual_frame:?}, expected {expected_frame}"
            ),
            Self::WrongReceiverFrame {
                method,
                expected_frame,
                actual_frame,
            } => write!(
                f,
                "method '{method}' left its receiver in {actual_frame:?}, expected {expected_frame}"
            ),
            Self::MethodInconsistency {
                reference,
                candidate,
                detail,
            } => write!(
                f,
                "Detected a method inconsistent with its counterpart: '{candidate}' diverged from '{reference}': {detail}"
            ),
            Self::DivergentFault {
                reference,
                candidate,
                reference_fault,
                candidate_fault,
            } => write!(
                f,
                "method '{candidate}' did not throw the same exception as the original method '{reference}': original={reference_fault:?}, candidate={candidate_fault:?}"
            ),
            Self::CloneRetryExhausted { method, retries } => write!(
                f,
                "Retried too many times, aborting: {retries} consecutive clone failures while checking '{method}'"
            ),
            Self::MatchingFrameSetterViolation {
                method,
                parameter_type,
            } => write!(
                f,
                "matching-frame setter '{method}' declares non-read-only frame parameter {parameter_type}"
            ),
            Self::InvocationMisuse { detail } => {
                write!(f, "method catalog misuse: {detail}")
            }
        }
    }
}

impl std::error::Error for ConformanceError {}

/// Serializable failure record for CI artifact capture.
#[derive(Debug, Clone, Serialize)]
pub struct FailureArtifact {
    pub schema_version: u8,
    pub reason_code: &'static str,
    pub message: String,
}

impl From<&ConformanceError> for FailureArtifact {
    fn from(error: &ConformanceError) -> Self {
        Self {
            schema_version: 1,
            reason_code: error.reason_code(),
            message: error.to_string(),
        }
    }
}

pub fn write_failure_artifact(path: &Path, artifact: &FailureArtifact) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|err| format!("failed creating {}: {err}", parent.display()))?;
    }
    let raw = serde_json::to_string_pretty(artifact)
        .map_err(|err| format!("failed to serialize failure artifact: {err}"))?;
    fs::write(path, raw).map_err(|err| format!("failed writing {}: {err}", path.display()))
}
