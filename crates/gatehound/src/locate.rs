//! Bearer-token extraction.
//!
//! The locator checks the configured header first and only then the parameter
//! path; the header always wins when both carry a value. Whatever candidate is
//! found is reduced to its last whitespace-separated segment, which strips an
//! optional scheme label (`"Bearer <token>"`) while leaving bare tokens
//! untouched.

use crate::config::GateConfig;
use crate::request::TokenSource;

/// Extract the raw bearer token from a request, if any.
///
/// Returns `None` when neither source carries a candidate, or when the
/// candidate contains no non-whitespace content.
pub fn locate(config: &GateConfig, request: &impl TokenSource) -> Option<String> {
    let candidate = request
        .header(&config.token_header)
        .or_else(|| request.param(config.token_param()))?;

    candidate.split_whitespace().last().map(ToString::to_string)
}
