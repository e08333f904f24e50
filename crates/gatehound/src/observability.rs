//! Metrics for verification outcomes.
//!
//! Uses the `metrics` facade only; installing a recorder/exporter is the host
//! binary's job.
//!
//! # Cardinality
//!
//! Labels are bounded: `outcome` has 2 values, `error_kind` is the closed
//! [`crate::verify::ErrorKind`] set plus `none`.

use crate::verify::VerificationOutcome;
use metrics::counter;

/// Record one verification attempt.
///
/// Metric: `gatehound_verifications_total`
/// Labels: `outcome` (`success`/`failure`), `error_kind`
pub(crate) fn record_verification(outcome: &VerificationOutcome) {
    let (status, error_kind) = match outcome {
        VerificationOutcome::Success { .. } => ("success", "none"),
        VerificationOutcome::Failure { errors } => (
            "failure",
            errors.first().map_or("none", |entry| entry.kind.as_str()),
        ),
    };

    counter!(
        "gatehound_verifications_total",
        "outcome" => status,
        "error_kind" => error_kind
    )
    .increment(1);
}
