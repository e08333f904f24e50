//! Axum gate for `gatehound`.
//!
//! The gate runs as a pre-action middleware: it asks the policy chain whether
//! the action is skipped, locates and verifies the bearer token when it is
//! not, dispatches the resolved success/failure callback, and forces the
//! configured unauthorized status on rejection.
//!
//! # Usage
//!
//! ```rust,ignore
//! let config = Arc::new(RwLock::new(GateConfig::default()));
//! let policy = PolicyNode::new(None);
//! policy.skip_authentication(SkipOptions::only(["health"]))?;
//!
//! let gate = Gate::new(Arc::clone(&config), Arc::clone(&policy));
//! let app = Router::new()
//!     .route("/posts", get(list_posts))
//!     .layer(middleware::from_fn_with_state(gate, require_authentication));
//! ```
//!
//! The action identifier for policy lookups comes from an [`ActionId`]
//! extension when the host installs one, falling back to the matched route
//! path, falling back to the request path.

#![warn(clippy::pedantic)]

use axum::extract::{MatchedPath, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use gatehound::policy::{Callback, FailureHandler, SuccessHandler};
use gatehound::{decide, Claims, ErrorEntry, GateConfig, GateDecision, PolicyNode, TokenSource};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::instrument;
use url::form_urlencoded;

/// Action identifier for policy lookups, installed per route by the host:
///
/// ```rust,ignore
/// .route("/posts", get(list_posts))
///     .layer(middleware::from_fn_with_state(gate, require_authentication))
///     .layer(Extension(ActionId::new("index")))
/// ```
#[derive(Debug, Clone)]
pub struct ActionId(String);

impl ActionId {
    #[must_use]
    pub fn new(action: impl Into<String>) -> Self {
        Self(action.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Named-handler table for [`Callback::Named`] resolution.
///
/// The core cannot resolve handler names (there is no runtime method lookup
/// to fall back on), so the host registers them here; resolution happens at
/// dispatch time, against whatever set is currently installed on the gate.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    success: HashMap<String, SuccessHandler>,
    failure: HashMap<String, FailureHandler>,
}

impl HandlerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a named success handler.
    #[must_use]
    pub fn success(
        mut self,
        name: impl Into<String>,
        handler: impl Fn(&Claims) + Send + Sync + 'static,
    ) -> Self {
        self.success.insert(name.into(), Arc::new(handler));
        self
    }

    /// Register a named failure handler. Returning `Some(value)` replaces the
    /// default failure body.
    #[must_use]
    pub fn failure(
        mut self,
        name: impl Into<String>,
        handler: impl Fn(&[ErrorEntry]) -> Option<serde_json::Value> + Send + Sync + 'static,
    ) -> Self {
        self.failure.insert(name.into(), Arc::new(handler));
        self
    }

    fn resolve_success(&self, name: &str) -> Option<&SuccessHandler> {
        self.success.get(name)
    }

    fn resolve_failure(&self, name: &str) -> Option<&FailureHandler> {
        self.failure.get(name)
    }
}

/// Middleware state: live configuration handle, policy chain entry point,
/// named-handler table.
#[derive(Clone)]
pub struct Gate {
    config: Arc<RwLock<GateConfig>>,
    policy: Arc<PolicyNode>,
    handlers: Arc<HandlerRegistry>,
}

impl Gate {
    #[must_use]
    pub fn new(config: Arc<RwLock<GateConfig>>, policy: Arc<PolicyNode>) -> Self {
        Self {
            config,
            policy,
            handlers: Arc::new(HandlerRegistry::new()),
        }
    }

    /// Install the named-handler table.
    #[must_use]
    pub fn with_handlers(mut self, handlers: HandlerRegistry) -> Self {
        self.handlers = Arc::new(handlers);
        self
    }

    /// One consistent view of the configuration for the current request.
    fn config_snapshot(&self) -> GateConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Verified claims of the current request, stored in request extensions for
/// downstream handlers.
#[derive(Debug, Clone)]
pub struct VerifiedClaims(pub Claims);

/// Accessor for the claims the gate stored on the request.
pub trait ClaimsExt {
    /// The verified claims, or `None` if the gate did not run (or skipped).
    fn verified_claims(&self) -> Option<&Claims>;
}

impl<B> ClaimsExt for axum::http::Request<B> {
    fn verified_claims(&self) -> Option<&Claims> {
        self.extensions()
            .get::<VerifiedClaims>()
            .map(|claims| &claims.0)
    }
}

/// Authentication middleware: run the gate before the wrapped action.
///
/// - `Skipped` passes through untouched: no callback, no status change.
/// - `Authenticated` dispatches the success callback, stores
///   [`VerifiedClaims`] in the request extensions and passes through.
/// - `Rejected` dispatches the failure callback and responds immediately with
///   the configured unauthorized status; the body is the callback's returned
///   value, or the default `{"errors": [...]}` list when no callback is set.
#[instrument(skip_all, name = "gatehound.gate")]
pub async fn require_authentication(
    State(gate): State<Gate>,
    mut req: Request,
    next: Next,
) -> Response {
    let action = action_id(&req);
    let config = gate.config_snapshot();

    let decision = {
        let source = HttpTokenSource {
            headers: req.headers(),
            query: req.uri().query(),
        };
        decide(&config, &gate.policy, &action, &source)
    };

    match decision {
        GateDecision::Skipped => {
            tracing::debug!(target: "gatehound.gate", action = %action, "authentication skipped");
            next.run(req).await
        }
        GateDecision::Authenticated(claims) => {
            dispatch_success(&gate, &claims);
            req.extensions_mut().insert(VerifiedClaims(claims));
            next.run(req).await
        }
        GateDecision::Rejected(errors) => {
            tracing::debug!(
                target: "gatehound.gate",
                action = %action,
                error_kind = errors.first().map_or("none", |e| e.kind.as_str()),
                "authentication failed"
            );
            let body = dispatch_failure(&gate, &errors);
            rejection_response(&config, body)
        }
    }
}

/// Default JSON failure body: `{"errors": [{"<kind>": "<message>"}, ...]}`.
#[must_use]
pub fn default_failure_body(errors: &[ErrorEntry]) -> serde_json::Value {
    let entries: Vec<serde_json::Value> = errors
        .iter()
        .map(|entry| {
            let mut object = serde_json::Map::new();
            object.insert(
                entry.kind.as_str().to_string(),
                serde_json::Value::String(entry.message.clone()),
            );
            serde_json::Value::Object(object)
        })
        .collect();

    serde_json::json!({ "errors": entries })
}

fn action_id(req: &Request) -> String {
    if let Some(action) = req.extensions().get::<ActionId>() {
        return action.as_str().to_string();
    }
    if let Some(matched) = req.extensions().get::<MatchedPath>() {
        return matched.as_str().to_string();
    }
    req.uri().path().to_string()
}

fn dispatch_success(gate: &Gate, claims: &Claims) {
    match gate.policy.success_callback() {
        Some(Callback::Inline(handler)) => handler(claims),
        Some(Callback::Named(name)) => match gate.handlers.resolve_success(&name) {
            Some(handler) => handler(claims),
            None => {
                tracing::warn!(
                    target: "gatehound.gate",
                    handler = %name,
                    "named success handler is not registered"
                );
            }
        },
        None => {}
    }
}

/// Run the failure callback and work out the response body: the callback's
/// returned value when one ran, the default error list when none is
/// configured (or a named handler is missing).
fn dispatch_failure(gate: &Gate, errors: &[ErrorEntry]) -> Option<serde_json::Value> {
    match gate.policy.failure_callback() {
        Some(Callback::Inline(handler)) => handler(errors),
        Some(Callback::Named(name)) => match gate.handlers.resolve_failure(&name) {
            Some(handler) => handler(errors),
            None => {
                tracing::warn!(
                    target: "gatehound.gate",
                    handler = %name,
                    "named failure handler is not registered"
                );
                Some(default_failure_body(errors))
            }
        },
        None => Some(default_failure_body(errors)),
    }
}

fn rejection_response(config: &GateConfig, body: Option<serde_json::Value>) -> Response {
    let status =
        StatusCode::from_u16(config.unauthorized_status).unwrap_or(StatusCode::UNAUTHORIZED);
    match body {
        Some(value) => (status, Json(value)).into_response(),
        None => status.into_response(),
    }
}

/// [`TokenSource`] view over the parts of an HTTP request the locator needs.
///
/// Parameters are read from the query string with bracket nesting: the path
/// `["jwt", "token"]` matches a `jwt[token]=...` pair.
struct HttpTokenSource<'a> {
    headers: &'a HeaderMap,
    query: Option<&'a str>,
}

impl TokenSource for HttpTokenSource<'_> {
    fn header(&self, name: &str) -> Option<String> {
        self.headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(ToString::to_string)
    }

    fn param(&self, path: &[String]) -> Option<String> {
        let query = self.query?;
        form_urlencoded::parse(query.as_bytes())
            .find(|(key, _)| key_segments(key) == path)
            .map(|(_, value)| value.into_owned())
    }
}

/// Split a bracketed parameter key into its path segments:
/// `"jwt[token]"` → `["jwt", "token"]`, `"token"` → `["token"]`.
fn key_segments(key: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    for ch in key.chars() {
        match ch {
            '[' => segments.push(std::mem::take(&mut current)),
            ']' => {}
            _ => current.push(ch),
        }
    }
    if !current.is_empty() {
        segments.push(current);
    }
    segments
}
