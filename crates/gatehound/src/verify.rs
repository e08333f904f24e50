//! JWT verification and structured error classification.
//!
//! Verification failures are data: [`verify`] always returns a
//! [`VerificationOutcome`] and never propagates a fault. Anticipated decode
//! failures are classified into exactly one [`ErrorEntry`]; anything outside
//! the anticipated taxonomy is logged with full context and downgraded to the
//! generic [`ErrorKind::JwtVerificationError`].
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE any parsing or cryptographic work
//! - Signature verification is always enabled
//! - The decoder is constrained to the single configured algorithm, so a
//!   token declaring a different algorithm is rejected, not silently accepted

use crate::config::{JwtAlgorithm, JwtConfig};
use crate::observability;
use jsonwebtoken::{decode, DecodingKey, Validation};
use secrecy::ExposeSecret;
use std::collections::HashSet;
use std::fmt;
use tracing::instrument;

/// Maximum allowed JWT size in bytes (8 KiB).
///
/// Oversized tokens are rejected before base64 decoding and signature
/// verification so a hostile client cannot burn CPU or memory with a
/// multi-megabyte token. Typical tokens are 200-500 bytes.
pub const MAX_JWT_SIZE_BYTES: usize = 8192;

/// Decoded JWT payload.
///
/// A plain string-keyed JSON map; claim lookup is by exact string key, with no
/// separate symbol-vs-string distinction to reconcile.
pub type Claims = serde_json::Map<String, serde_json::Value>;

/// Classified verification failure causes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// No decode key is configured; verification cannot start.
    DecodeKeyMissing,
    /// The request carried no token in header or parameters.
    TokenMissing,
    /// Signature is valid but the `exp` claim is in the past.
    TokenExpired,
    /// The signature does not verify against the configured key.
    InvalidTokenSignature,
    /// The token's declared algorithm differs from the configured one.
    InvalidTokenAlgorithm,
    /// The token (or the configured key material) is structurally malformed.
    InvalidTokenFormat,
    /// Catch-all for unexpected decoder failures; details go to the log only.
    JwtVerificationError,
}

impl ErrorKind {
    /// Stable snake_case identifier, used as the key in rendered error bodies.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DecodeKeyMissing => "decode_key_missing",
            Self::TokenMissing => "token_missing",
            Self::TokenExpired => "token_expired",
            Self::InvalidTokenSignature => "invalid_token_signature",
            Self::InvalidTokenAlgorithm => "invalid_token_algorithm",
            Self::InvalidTokenFormat => "invalid_token_format",
            Self::JwtVerificationError => "jwt_verification_error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One classified failure: a kind plus a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorEntry {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorEntry {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Result of one verification attempt. Exactly one variant is populated and
/// the value is immutable once constructed.
#[derive(Debug, Clone, PartialEq)]
pub enum VerificationOutcome {
    /// Signature and claims validation passed.
    Success { claims: Claims },
    /// Verification failed; `errors` is ordered and never empty.
    Failure { errors: Vec<ErrorEntry> },
}

impl VerificationOutcome {
    pub(crate) fn failure(entry: ErrorEntry) -> Self {
        Self::Failure {
            errors: vec![entry],
        }
    }

    /// Whether verification succeeded.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Decoded claims on success, `None` on failure.
    #[must_use]
    pub fn claims(&self) -> Option<&Claims> {
        match self {
            Self::Success { claims } => Some(claims),
            Self::Failure { .. } => None,
        }
    }

    /// Classified errors on failure, empty on success.
    #[must_use]
    pub fn errors(&self) -> &[ErrorEntry] {
        match self {
            Self::Success { .. } => &[],
            Self::Failure { errors } => errors,
        }
    }
}

/// Verify a raw bearer token against the given JWT configuration.
///
/// Precondition gates short-circuit in a fixed order: a missing decode key is
/// reported without touching the token at all, then a missing token, then a
/// single constrained decode attempt. Every call produces exactly one
/// [`ErrorEntry`] on failure.
#[instrument(skip_all)]
#[must_use]
pub fn verify(config: &JwtConfig, raw_token: Option<&str>) -> VerificationOutcome {
    let outcome = check_and_decode(config, raw_token);
    observability::record_verification(&outcome);
    outcome
}

fn check_and_decode(config: &JwtConfig, raw_token: Option<&str>) -> VerificationOutcome {
    let Some(key_material) = config.decode_key.as_ref() else {
        tracing::debug!(target: "gatehound.verify", "decode key is not configured");
        return VerificationOutcome::failure(ErrorEntry::new(
            ErrorKind::DecodeKeyMissing,
            "JWT decode key is not configured",
        ));
    };

    let Some(token) = raw_token else {
        tracing::debug!(target: "gatehound.verify", "no token in request");
        return VerificationOutcome::failure(ErrorEntry::new(
            ErrorKind::TokenMissing,
            "No JWT token found",
        ));
    };

    if token.len() > MAX_JWT_SIZE_BYTES {
        tracing::debug!(
            target: "gatehound.verify",
            token_size = token.len(),
            max_size = MAX_JWT_SIZE_BYTES,
            "token rejected: size exceeds maximum allowed"
        );
        return VerificationOutcome::failure(ErrorEntry::new(
            ErrorKind::InvalidTokenFormat,
            "JWT token has invalid format",
        ));
    }

    let algorithm = config.algorithm();
    let decoding_key = match build_decoding_key(algorithm, key_material.expose_secret()) {
        Ok(key) => key,
        Err(err) => return VerificationOutcome::failure(classify_decode_error(&err)),
    };

    let mut validation = Validation::new(algorithm.into());
    // `exp` is validated when present but the claim itself is not mandatory.
    validation.required_spec_claims = HashSet::new();

    match decode::<Claims>(token, &decoding_key, &validation) {
        Ok(data) => VerificationOutcome::Success {
            claims: data.claims,
        },
        Err(err) => VerificationOutcome::failure(classify_decode_error(&err)),
    }
}

fn build_decoding_key(
    algorithm: JwtAlgorithm,
    material: &str,
) -> Result<DecodingKey, jsonwebtoken::errors::Error> {
    if algorithm.is_hmac() {
        Ok(DecodingKey::from_secret(material.as_bytes()))
    } else {
        DecodingKey::from_rsa_pem(material.as_bytes())
    }
}

/// Map a `jsonwebtoken` decode failure onto exactly one [`ErrorEntry`].
///
/// The decoder's own precedence (structure parse, then allowed-algorithm
/// check, then signature, then expiry) means the most specific applicable
/// cause wins: `token_expired` is only ever reported for a token whose
/// signature verified.
pub(crate) fn classify_decode_error(err: &jsonwebtoken::errors::Error) -> ErrorEntry {
    use jsonwebtoken::errors::ErrorKind as JwtError;

    match err.kind() {
        JwtError::ExpiredSignature => {
            tracing::debug!(target: "gatehound.verify", "token is expired");
            ErrorEntry::new(ErrorKind::TokenExpired, "JWT token is expired")
        }
        JwtError::InvalidSignature => {
            tracing::debug!(target: "gatehound.verify", "token signature verification failed");
            ErrorEntry::new(
                ErrorKind::InvalidTokenSignature,
                "JWT token has invalid signature",
            )
        }
        JwtError::InvalidAlgorithm | JwtError::InvalidAlgorithmName | JwtError::MissingAlgorithm => {
            tracing::debug!(target: "gatehound.verify", "token algorithm mismatch");
            ErrorEntry::new(
                ErrorKind::InvalidTokenAlgorithm,
                "JWT token has invalid algorithm",
            )
        }
        JwtError::InvalidToken
        | JwtError::InvalidKeyFormat
        | JwtError::InvalidRsaKey(_)
        | JwtError::InvalidEcdsaKey
        | JwtError::Base64(_)
        | JwtError::Json(_)
        | JwtError::Utf8(_) => {
            tracing::debug!(target: "gatehound.verify", error = %err, "token is malformed");
            ErrorEntry::new(ErrorKind::InvalidTokenFormat, "JWT token has invalid format")
        }
        kind => {
            // Outside the anticipated taxonomy: log everything we know, hand
            // the caller only the generic kind.
            tracing::error!(
                target: "gatehound.verify",
                error = %err,
                error_kind = ?kind,
                "unexpected failure while verifying JWT token"
            );
            ErrorEntry::new(ErrorKind::JwtVerificationError, "Failed to verify JWT token")
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
    use secrecy::SecretString;
    use serde_json::json;

    const SECRET: &str = "test-hmac-secret";

    fn hs256_config() -> JwtConfig {
        let mut config = JwtConfig::default();
        config.set_algorithm("HS256").unwrap();
        config.decode_key = Some(SecretString::from(SECRET));
        config
    }

    fn sign(algorithm: Algorithm, secret: &str, claims: &serde_json::Value) -> String {
        encode(
            &Header::new(algorithm),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .expect("token encoding")
    }

    fn future_exp() -> i64 {
        chrono::Utc::now().timestamp() + 3600
    }

    // -------------------------------------------------------------------------
    // Success path
    // -------------------------------------------------------------------------

    #[test]
    fn test_round_trip_returns_original_claims() {
        let config = hs256_config();
        let payload = json!({"sub": "user-1", "role": "admin", "exp": future_exp()});
        let token = sign(Algorithm::HS256, SECRET, &payload);

        let outcome = verify(&config, Some(&token));

        assert!(outcome.is_valid());
        let claims = outcome.claims().expect("claims on success");
        assert_eq!(claims.get("sub"), Some(&json!("user-1")));
        assert_eq!(claims.get("role"), Some(&json!("admin")));
        assert!(outcome.errors().is_empty());
    }

    #[test]
    fn test_token_without_exp_claim_is_accepted() {
        let config = hs256_config();
        let token = sign(Algorithm::HS256, SECRET, &json!({"sub": "user-1"}));

        assert!(verify(&config, Some(&token)).is_valid());
    }

    // -------------------------------------------------------------------------
    // Precondition gates
    // -------------------------------------------------------------------------

    #[test]
    fn test_missing_decode_key_short_circuits_before_decode() {
        let mut config = JwtConfig::default();
        config.set_algorithm("HS256").unwrap();

        // The token is garbage; if a decode were attempted this would come
        // back as a format error instead.
        let outcome = verify(&config, Some("definitely-not-a-jwt"));

        assert_eq!(outcome.errors().len(), 1);
        assert_eq!(outcome.errors()[0].kind, ErrorKind::DecodeKeyMissing);
    }

    #[test]
    fn test_missing_key_wins_over_missing_token() {
        let config = JwtConfig::default();

        let outcome = verify(&config, None);

        assert_eq!(outcome.errors().len(), 1);
        assert_eq!(outcome.errors()[0].kind, ErrorKind::DecodeKeyMissing);
    }

    #[test]
    fn test_missing_token() {
        let config = hs256_config();

        let outcome = verify(&config, None);

        assert_eq!(outcome.errors().len(), 1);
        assert_eq!(outcome.errors()[0].kind, ErrorKind::TokenMissing);
        assert_eq!(outcome.errors()[0].message, "No JWT token found");
    }

    #[test]
    fn test_oversized_token_is_rejected_before_parsing() {
        let config = hs256_config();
        let oversized = "a".repeat(MAX_JWT_SIZE_BYTES + 1);

        let outcome = verify(&config, Some(&oversized));

        assert_eq!(outcome.errors().len(), 1);
        assert_eq!(outcome.errors()[0].kind, ErrorKind::InvalidTokenFormat);
    }

    // -------------------------------------------------------------------------
    // Decode failure classification
    // -------------------------------------------------------------------------

    #[test]
    fn test_expired_token() {
        let config = hs256_config();
        let expired = chrono::Utc::now().timestamp() - 3600;
        let token = sign(Algorithm::HS256, SECRET, &json!({"sub": "u", "exp": expired}));

        let outcome = verify(&config, Some(&token));

        assert_eq!(outcome.errors().len(), 1);
        assert_eq!(outcome.errors()[0].kind, ErrorKind::TokenExpired);
    }

    #[test]
    fn test_wrong_secret_yields_invalid_signature() {
        let config = hs256_config();
        let token = sign(
            Algorithm::HS256,
            "some-other-secret",
            &json!({"sub": "u", "exp": future_exp()}),
        );

        let outcome = verify(&config, Some(&token));

        assert_eq!(outcome.errors().len(), 1);
        assert_eq!(outcome.errors()[0].kind, ErrorKind::InvalidTokenSignature);
    }

    #[test]
    fn test_signature_check_precedes_expiry_check() {
        // Expired AND signed with a foreign key: the signature failure is the
        // reported cause, expiry is only reachable with a valid signature.
        let config = hs256_config();
        let expired = chrono::Utc::now().timestamp() - 3600;
        let token = sign(
            Algorithm::HS256,
            "some-other-secret",
            &json!({"sub": "u", "exp": expired}),
        );

        let outcome = verify(&config, Some(&token));

        assert_eq!(outcome.errors()[0].kind, ErrorKind::InvalidTokenSignature);
    }

    #[test]
    fn test_algorithm_mismatch() {
        // Signed HS384, gate configured for HS256: rejected on the algorithm
        // check even though the shared secret matches.
        let config = hs256_config();
        let token = sign(
            Algorithm::HS384,
            SECRET,
            &json!({"sub": "u", "exp": future_exp()}),
        );

        let outcome = verify(&config, Some(&token));

        assert_eq!(outcome.errors().len(), 1);
        assert_eq!(outcome.errors()[0].kind, ErrorKind::InvalidTokenAlgorithm);
    }

    #[test]
    fn test_foreign_algorithm_in_header_is_rejected_before_signature_check() {
        use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};

        // Well-formed token declaring ES256; the signature part is garbage,
        // but the algorithm check fires first.
        let config = hs256_config();
        let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"ES256","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(r#"{"sub":"u"}"#);
        let token = format!("{header}.{payload}.sig");

        let outcome = verify(&config, Some(&token));

        assert_eq!(outcome.errors().len(), 1);
        assert_eq!(outcome.errors()[0].kind, ErrorKind::InvalidTokenAlgorithm);
    }

    #[test]
    fn test_malformed_tokens_yield_invalid_format() {
        let config = hs256_config();

        for garbage in ["not.a.jwt", "garbage", "a.b", "..", ""] {
            let outcome = verify(&config, Some(garbage));
            assert_eq!(outcome.errors().len(), 1, "token: {garbage:?}");
            assert_eq!(
                outcome.errors()[0].kind,
                ErrorKind::InvalidTokenFormat,
                "token: {garbage:?}"
            );
        }
    }

    #[test]
    fn test_bad_rsa_key_material_yields_invalid_format() {
        let mut config = JwtConfig::default();
        config.decode_key = Some(SecretString::from("not a pem at all"));
        let token = sign(Algorithm::HS256, SECRET, &json!({"sub": "u"}));

        let outcome = verify(&config, Some(&token));

        assert_eq!(outcome.errors().len(), 1);
        assert_eq!(outcome.errors()[0].kind, ErrorKind::InvalidTokenFormat);
    }

    #[test]
    fn test_unexpected_decoder_error_downgrades_to_generic_kind() {
        let err = jsonwebtoken::errors::Error::from(
            jsonwebtoken::errors::ErrorKind::RsaFailedSigning,
        );

        let entry = classify_decode_error(&err);

        assert_eq!(entry.kind, ErrorKind::JwtVerificationError);
        assert_eq!(entry.message, "Failed to verify JWT token");
    }

    // -------------------------------------------------------------------------
    // Outcome shape
    // -------------------------------------------------------------------------

    #[test]
    fn test_error_kind_identifiers_are_stable() {
        assert_eq!(ErrorKind::DecodeKeyMissing.as_str(), "decode_key_missing");
        assert_eq!(ErrorKind::TokenMissing.as_str(), "token_missing");
        assert_eq!(ErrorKind::TokenExpired.as_str(), "token_expired");
        assert_eq!(
            ErrorKind::InvalidTokenSignature.as_str(),
            "invalid_token_signature"
        );
        assert_eq!(
            ErrorKind::InvalidTokenAlgorithm.as_str(),
            "invalid_token_algorithm"
        );
        assert_eq!(ErrorKind::InvalidTokenFormat.as_str(), "invalid_token_format");
        assert_eq!(
            ErrorKind::JwtVerificationError.as_str(),
            "jwt_verification_error"
        );
    }

    #[test]
    fn test_failure_never_exposes_claims() {
        let config = hs256_config();
        let outcome = verify(&config, Some("not.a.jwt"));

        assert!(!outcome.is_valid());
        assert!(outcome.claims().is_none());
    }
}
