//! Gate configuration: where to find the token and how to verify it.
//!
//! Configuration is an explicit value passed by handle into the locator and
//! verifier at call time. Hosts that want one process-wide instance wrap it in
//! `Arc<RwLock<GateConfig>>` and read it per request; the gate never caches a
//! snapshot beyond a single request.

use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;

/// Signing algorithms the verifier will accept.
///
/// This is a closed allow-list: RSA and HMAC SHA-2 families only. Tokens
/// declaring any other algorithm are rejected during verification, and
/// configuring one is rejected here at the point of misuse.
pub const ACCEPTED_ALGORITHMS: [&str; 6] =
    ["RS256", "RS384", "RS512", "HS256", "HS384", "HS512"];

/// Errors raised by configuration mutation.
///
/// These are programmer-misuse errors: they are reported synchronously to the
/// caller and never deferred to request time.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The algorithm is not in the accepted allow-list.
    #[error("invalid JWT algorithm: {0} (valid values: RS256, RS384, RS512, HS256, HS384, HS512)")]
    InvalidAlgorithm(String),

    /// The token parameter path must contain at least one key.
    #[error("token parameter path must not be empty")]
    EmptyTokenParam,
}

/// An accepted JWT signing algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JwtAlgorithm {
    Rs256,
    Rs384,
    Rs512,
    Hs256,
    Hs384,
    Hs512,
}

impl JwtAlgorithm {
    /// Parse an algorithm name, case-insensitively, against the allow-list.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidAlgorithm`] for anything outside the
    /// allow-list (including algorithms `jsonwebtoken` itself would accept,
    /// such as `EdDSA` or `ES256`).
    pub fn parse(name: &str) -> Result<Self, ConfigError> {
        match name.to_ascii_uppercase().as_str() {
            "RS256" => Ok(Self::Rs256),
            "RS384" => Ok(Self::Rs384),
            "RS512" => Ok(Self::Rs512),
            "HS256" => Ok(Self::Hs256),
            "HS384" => Ok(Self::Hs384),
            "HS512" => Ok(Self::Hs512),
            _ => Err(ConfigError::InvalidAlgorithm(name.to_string())),
        }
    }

    /// Canonical (uppercase) name of the algorithm.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rs256 => "RS256",
            Self::Rs384 => "RS384",
            Self::Rs512 => "RS512",
            Self::Hs256 => "HS256",
            Self::Hs384 => "HS384",
            Self::Hs512 => "HS512",
        }
    }

    /// Whether this algorithm uses a shared HMAC secret rather than an RSA
    /// public key. Decides how the decode key material is interpreted.
    #[must_use]
    pub fn is_hmac(&self) -> bool {
        matches!(self, Self::Hs256 | Self::Hs384 | Self::Hs512)
    }
}

impl From<JwtAlgorithm> for jsonwebtoken::Algorithm {
    fn from(alg: JwtAlgorithm) -> Self {
        match alg {
            JwtAlgorithm::Rs256 => jsonwebtoken::Algorithm::RS256,
            JwtAlgorithm::Rs384 => jsonwebtoken::Algorithm::RS384,
            JwtAlgorithm::Rs512 => jsonwebtoken::Algorithm::RS512,
            JwtAlgorithm::Hs256 => jsonwebtoken::Algorithm::HS256,
            JwtAlgorithm::Hs384 => jsonwebtoken::Algorithm::HS384,
            JwtAlgorithm::Hs512 => jsonwebtoken::Algorithm::HS512,
        }
    }
}

/// JWT verification settings: algorithm plus decode key material.
///
/// The decode key is wrapped in [`SecretString`] so `Debug` output is always
/// redacted. For HMAC algorithms the key is the shared secret; for RSA
/// algorithms it is the public key in PEM format.
#[derive(Debug)]
pub struct JwtConfig {
    algorithm: JwtAlgorithm,
    /// Verification key material. `None` until the host configures one;
    /// verification fails with `decode_key_missing` while unset.
    pub decode_key: Option<SecretString>,
}

impl JwtConfig {
    /// The configured signing algorithm.
    #[must_use]
    pub fn algorithm(&self) -> JwtAlgorithm {
        self.algorithm
    }

    /// Set the signing algorithm from its string name.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidAlgorithm`] if the name is not in the
    /// allow-list; the previously configured algorithm is left untouched.
    pub fn set_algorithm(&mut self, name: &str) -> Result<(), ConfigError> {
        self.algorithm = JwtAlgorithm::parse(name)?;
        Ok(())
    }
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            algorithm: JwtAlgorithm::Rs256,
            decode_key: None,
        }
    }
}

impl Clone for JwtConfig {
    fn clone(&self) -> Self {
        Self {
            algorithm: self.algorithm,
            decode_key: self
                .decode_key
                .as_ref()
                .map(|key| SecretString::from(key.expose_secret())),
        }
    }
}

/// Gate configuration: token location rules, failure status, JWT settings.
///
/// Reads always observe the last successfully set value. The struct itself
/// carries no locking; concurrent reconfiguration is the host's concern
/// (typically `Arc<RwLock<GateConfig>>` mutated at boot only).
#[derive(Debug, Clone)]
pub struct GateConfig {
    /// Request header carrying the bearer token.
    pub token_header: String,
    /// HTTP status forced on verification failure.
    pub unauthorized_status: u16,
    /// JWT verification settings.
    pub jwt: JwtConfig,
    token_param: Vec<String>,
}

impl GateConfig {
    /// Path used to locate the token in request parameters when it is absent
    /// from the headers. Always non-empty.
    #[must_use]
    pub fn token_param(&self) -> &[String] {
        &self.token_param
    }

    /// Set the parameter path used for token lookup.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::EmptyTokenParam`] if the path has no keys; the
    /// previous path is left untouched.
    pub fn set_token_param<I, S>(&mut self, path: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let path: Vec<String> = path.into_iter().map(Into::into).collect();
        if path.is_empty() {
            return Err(ConfigError::EmptyTokenParam);
        }
        self.token_param = path;
        Ok(())
    }
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            token_header: "Authorization".to_string(),
            unauthorized_status: 401,
            jwt: JwtConfig::default(),
            token_param: vec!["token".to_string()],
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    // -------------------------------------------------------------------------
    // Defaults
    // -------------------------------------------------------------------------

    #[test]
    fn test_defaults() {
        let config = GateConfig::default();

        assert_eq!(config.token_header, "Authorization");
        assert_eq!(config.token_param(), ["token".to_string()]);
        assert_eq!(config.unauthorized_status, 401);
        assert_eq!(config.jwt.algorithm(), JwtAlgorithm::Rs256);
        assert!(config.jwt.decode_key.is_none());
    }

    #[test]
    fn test_fresh_instance_restores_default_algorithm() {
        let mut config = GateConfig::default();
        config.jwt.set_algorithm("HS512").unwrap();

        // A freshly constructed config is back at RS256 regardless of what
        // happened to other instances.
        assert_eq!(GateConfig::default().jwt.algorithm(), JwtAlgorithm::Rs256);
        assert_eq!(config.jwt.algorithm(), JwtAlgorithm::Hs512);
    }

    // -------------------------------------------------------------------------
    // Algorithm allow-list
    // -------------------------------------------------------------------------

    #[test]
    fn test_set_algorithm_accepts_allow_list() {
        let mut jwt = JwtConfig::default();
        for name in ACCEPTED_ALGORITHMS {
            jwt.set_algorithm(name).expect("allow-listed algorithm");
            assert_eq!(jwt.algorithm().as_str(), name);
        }
    }

    #[test]
    fn test_set_algorithm_is_case_insensitive() {
        let mut jwt = JwtConfig::default();
        jwt.set_algorithm("hs256").unwrap();
        assert_eq!(jwt.algorithm(), JwtAlgorithm::Hs256);

        jwt.set_algorithm("Rs384").unwrap();
        assert_eq!(jwt.algorithm(), JwtAlgorithm::Rs384);
    }

    #[test]
    fn test_set_algorithm_rejects_unknown() {
        let mut jwt = JwtConfig::default();
        let err = jwt.set_algorithm("none").expect_err("disallowed algorithm");
        assert_eq!(err, ConfigError::InvalidAlgorithm("none".to_string()));

        // The previous value survives a failed set.
        assert_eq!(jwt.algorithm(), JwtAlgorithm::Rs256);
    }

    #[test]
    fn test_set_algorithm_rejects_algorithms_outside_allow_list() {
        // jsonwebtoken supports these, the gate does not.
        let mut jwt = JwtConfig::default();
        for name in ["EdDSA", "ES256", "ES384", "PS256"] {
            assert!(
                matches!(jwt.set_algorithm(name), Err(ConfigError::InvalidAlgorithm(_))),
                "{name} should be rejected"
            );
        }
    }

    // -------------------------------------------------------------------------
    // Token param path
    // -------------------------------------------------------------------------

    #[test]
    fn test_set_token_param_accepts_nested_path() {
        let mut config = GateConfig::default();
        config.set_token_param(["jwt", "token"]).unwrap();
        assert_eq!(
            config.token_param(),
            ["jwt".to_string(), "token".to_string()]
        );
    }

    #[test]
    fn test_set_token_param_rejects_empty_path() {
        let mut config = GateConfig::default();
        let err = config
            .set_token_param(Vec::<String>::new())
            .expect_err("empty path");
        assert_eq!(err, ConfigError::EmptyTokenParam);
        assert_eq!(config.token_param(), ["token".to_string()]);
    }

    // -------------------------------------------------------------------------
    // Secrets
    // -------------------------------------------------------------------------

    #[test]
    fn test_decode_key_is_redacted_in_debug() {
        let mut config = GateConfig::default();
        config.jwt.decode_key = Some(SecretString::from("super-secret-key"));

        let debug_str = format!("{config:?}");
        assert!(
            !debug_str.contains("super-secret-key"),
            "Debug output should not contain key material"
        );
    }

    #[test]
    fn test_clone_preserves_decode_key() {
        let mut config = GateConfig::default();
        config.jwt.decode_key = Some(SecretString::from("hmac-secret"));

        let cloned = config.clone();
        assert_eq!(
            cloned.jwt.decode_key.as_ref().map(ExposeSecret::expose_secret),
            Some("hmac-secret")
        );
    }
}
