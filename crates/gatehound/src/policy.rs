//! Per-controller authentication policy with parent-chain inheritance.
//!
//! Each controller gets one [`PolicyNode`] holding its skip rule and its
//! success/failure callbacks, plus a weak handle to the parent controller's
//! node. Lookup is single-chain: a node's own rules take precedence for the
//! conditions they explicitly state, anything left unset falls through to the
//! parent, and the chain root defaults to "authentication required".
//!
//! Nodes are interior-mutable and cheap to share; the registry
//! ([`crate::registry::PolicyRegistry`]) owns the strong references that keep
//! parent nodes alive for their children.

use crate::config::GateConfig;
use crate::locate::locate;
use crate::request::TokenSource;
use crate::verify::{verify, Claims, ErrorEntry, VerificationOutcome};
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use thiserror::Error;

/// Errors raised by policy mutation. Reported at the point of misuse and
/// never deferred to request time.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PolicyError {
    /// `only` and `except` were both supplied to one skip rule.
    #[error("`only` and `except` cannot be combined in one skip rule")]
    ConflictingOptions,

    /// An action identifier was empty or contained whitespace.
    #[error("invalid action name: {0:?} (identifiers must be non-empty and contain no whitespace)")]
    InvalidActionName(String),
}

/// Options for [`PolicyNode::skip_authentication`].
///
/// At most one of `only`/`except` may be set; supplying neither skips every
/// action with no exceptions.
#[derive(Debug, Default, Clone)]
pub struct SkipOptions {
    pub only: Option<Vec<String>>,
    pub except: Option<Vec<String>>,
}

impl SkipOptions {
    /// Skip every action.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Skip only the listed actions.
    pub fn only<I, S>(actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            only: Some(actions.into_iter().map(Into::into).collect()),
            except: None,
        }
    }

    /// Skip every action except the listed ones.
    pub fn except<I, S>(actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            only: None,
            except: Some(actions.into_iter().map(Into::into).collect()),
        }
    }
}

/// A success or failure handler attached to a policy node.
///
/// `Inline` carries the closure itself; `Named` is an identifier the host
/// resolves at dispatch time (the core cannot know what it names).
#[derive(Clone)]
pub enum Callback<H> {
    Inline(H),
    Named(String),
}

impl<H> fmt::Debug for Callback<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inline(_) => f.write_str("Inline(..)"),
            Self::Named(name) => f.debug_tuple("Named").field(name).finish(),
        }
    }
}

/// Handler invoked with the decoded claims after successful verification.
pub type SuccessHandler = Arc<dyn Fn(&Claims) + Send + Sync>;

/// Handler invoked with the classified errors after failed verification.
/// May return a JSON value to replace the default failure body.
pub type FailureHandler = Arc<dyn Fn(&[ErrorEntry]) -> Option<serde_json::Value> + Send + Sync>;

pub type SuccessCallback = Callback<SuccessHandler>;
pub type FailureCallback = Callback<FailureHandler>;

#[derive(Debug, Default)]
struct SkipRule {
    only: HashSet<String>,
    except: HashSet<String>,
    all: bool,
}

#[derive(Debug, Default)]
struct NodeState {
    skip: SkipRule,
    on_success: Option<SuccessCallback>,
    on_failure: Option<FailureCallback>,
}

/// Policy holder for one controller, chained to its parent's node.
#[derive(Debug)]
pub struct PolicyNode {
    parent: Weak<PolicyNode>,
    state: RwLock<NodeState>,
}

impl PolicyNode {
    /// Create a node, optionally chained to a parent.
    ///
    /// The parent handle is weak: whoever creates nodes (normally the
    /// registry) is responsible for keeping parents alive at least as long as
    /// their children.
    #[must_use]
    pub fn new(parent: Option<&Arc<PolicyNode>>) -> Arc<Self> {
        Arc::new(Self {
            parent: parent.map_or_else(Weak::new, Arc::downgrade),
            state: RwLock::new(NodeState::default()),
        })
    }

    fn read_state(&self) -> RwLockReadGuard<'_, NodeState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, NodeState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Clear the skip rule and both callbacks. The parent link and the
    /// parent's own state are untouched.
    pub fn reset(&self) {
        *self.write_state() = NodeState::default();
    }

    /// Clear only the skip rule.
    pub fn reset_skip(&self) {
        self.write_state().skip = SkipRule::default();
    }

    /// Install a skip rule, replacing any previous one.
    ///
    /// `only` puts the node in only-mode (listed actions skipped, everything
    /// else falls through to the parent chain); `except` or no option puts it
    /// in skip-all mode with the listed exceptions.
    ///
    /// # Errors
    ///
    /// [`PolicyError::ConflictingOptions`] when both `only` and `except` are
    /// supplied, [`PolicyError::InvalidActionName`] for empty or
    /// whitespace-containing identifiers. Validation happens before any state
    /// mutation, so the previous rule survives a failed call.
    pub fn skip_authentication(&self, options: SkipOptions) -> Result<(), PolicyError> {
        if options.only.is_some() && options.except.is_some() {
            return Err(PolicyError::ConflictingOptions);
        }

        let only_given = options.only.is_some();
        let only = sanitize_action_names(options.only)?;
        let except = sanitize_action_names(options.except)?;

        let mut state = self.write_state();
        state.skip = SkipRule {
            only,
            except,
            all: !only_given,
        };
        Ok(())
    }

    /// Whether authentication is skipped for the given action.
    ///
    /// Local `only` membership wins first, then local skip-all minus
    /// exceptions; any other case defers to the parent chain, whose root
    /// answers `false`.
    #[must_use]
    pub fn is_skipped(&self, action: &str) -> bool {
        {
            let state = self.read_state();
            if state.skip.only.contains(action) {
                return true;
            }
            if state.skip.all && !state.skip.except.contains(action) {
                return true;
            }
        }

        match self.parent.upgrade() {
            Some(parent) => parent.is_skipped(action),
            None => false,
        }
    }

    /// Attach the success callback. Local to this node; children see it only
    /// through inheritance.
    pub fn on_authentication_success(&self, callback: SuccessCallback) {
        self.write_state().on_success = Some(callback);
    }

    /// Attach the failure callback. Local to this node.
    pub fn on_authentication_failed(&self, callback: FailureCallback) {
        self.write_state().on_failure = Some(callback);
    }

    /// Resolve the success callback: local if set, else the parent chain's.
    #[must_use]
    pub fn success_callback(&self) -> Option<SuccessCallback> {
        if let Some(callback) = self.read_state().on_success.clone() {
            return Some(callback);
        }
        self.parent.upgrade().and_then(|p| p.success_callback())
    }

    /// Resolve the failure callback: local if set, else the parent chain's.
    #[must_use]
    pub fn failure_callback(&self) -> Option<FailureCallback> {
        if let Some(callback) = self.read_state().on_failure.clone() {
            return Some(callback);
        }
        self.parent.upgrade().and_then(|p| p.failure_callback())
    }

    /// Locate and verify the request's token against the live configuration.
    #[must_use]
    pub fn authenticate(
        &self,
        config: &GateConfig,
        request: &impl TokenSource,
    ) -> VerificationOutcome {
        let raw_token = locate(config, request);
        verify(&config.jwt, raw_token.as_deref())
    }
}

fn sanitize_action_names(names: Option<Vec<String>>) -> Result<HashSet<String>, PolicyError> {
    let mut sanitized = HashSet::new();
    for name in names.unwrap_or_default() {
        if name.is_empty() || name.chars().any(char::is_whitespace) {
            return Err(PolicyError::InvalidActionName(name));
        }
        sanitized.insert(name);
    }
    Ok(sanitized)
}

/// Terminal states of one gate pass over a guarded action.
#[derive(Debug, Clone)]
pub enum GateDecision {
    /// Policy skipped authentication; no locator or verifier work happened.
    Skipped,
    /// Verification succeeded.
    Authenticated(Claims),
    /// Verification failed; the host must force the unauthorized status.
    Rejected(Vec<ErrorEntry>),
}

/// Run the gate state machine for one action.
///
/// The skip check runs first and short-circuits everything else: a skipped
/// action never touches the locator or the verifier.
#[must_use]
pub fn decide(
    config: &GateConfig,
    policy: &PolicyNode,
    action: &str,
    request: &impl TokenSource,
) -> GateDecision {
    if policy.is_skipped(action) {
        return GateDecision::Skipped;
    }

    match policy.authenticate(config, request) {
        VerificationOutcome::Success { claims } => GateDecision::Authenticated(claims),
        VerificationOutcome::Failure { errors } => GateDecision::Rejected(errors),
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    // -------------------------------------------------------------------------
    // Skip rules, single node
    // -------------------------------------------------------------------------

    #[test]
    fn test_root_default_requires_authentication() {
        let node = PolicyNode::new(None);

        assert!(!node.is_skipped("index"));
        assert!(!node.is_skipped("show"));
    }

    #[test]
    fn test_skip_all() {
        let node = PolicyNode::new(None);
        node.skip_authentication(SkipOptions::all()).unwrap();

        assert!(node.is_skipped("index"));
        assert!(node.is_skipped("anything"));
    }

    #[test]
    fn test_skip_only() {
        let node = PolicyNode::new(None);
        node.skip_authentication(SkipOptions::only(["index", "show"]))
            .unwrap();

        assert!(node.is_skipped("index"));
        assert!(node.is_skipped("show"));
        assert!(!node.is_skipped("create"));
    }

    #[test]
    fn test_skip_except() {
        let node = PolicyNode::new(None);
        node.skip_authentication(SkipOptions::except(["create"]))
            .unwrap();

        assert!(node.is_skipped("index"));
        assert!(!node.is_skipped("create"));
    }

    #[test]
    fn test_skip_rule_replaces_previous_rule() {
        let node = PolicyNode::new(None);
        node.skip_authentication(SkipOptions::only(["index"])).unwrap();
        node.skip_authentication(SkipOptions::only(["show"])).unwrap();

        assert!(!node.is_skipped("index"));
        assert!(node.is_skipped("show"));
    }

    #[test]
    fn test_reset_skip_restores_authentication() {
        let node = PolicyNode::new(None);
        node.skip_authentication(SkipOptions::all()).unwrap();
        node.reset_skip();

        assert!(!node.is_skipped("index"));
    }

    // -------------------------------------------------------------------------
    // Skip rule validation
    // -------------------------------------------------------------------------

    #[test]
    fn test_only_and_except_are_mutually_exclusive() {
        let node = PolicyNode::new(None);
        node.skip_authentication(SkipOptions::only(["index"])).unwrap();

        let conflicting = SkipOptions {
            only: Some(vec!["a".to_string()]),
            except: Some(vec!["b".to_string()]),
        };
        let err = node
            .skip_authentication(conflicting)
            .expect_err("conflicting options");
        assert_eq!(err, PolicyError::ConflictingOptions);

        // The failed call must not have mutated the rule.
        assert!(node.is_skipped("index"));
        assert!(!node.is_skipped("a"));
    }

    #[test]
    fn test_invalid_action_names_are_rejected_before_mutation() {
        let node = PolicyNode::new(None);
        node.skip_authentication(SkipOptions::only(["index"])).unwrap();

        for bad in ["", "two words", " leading"] {
            let err = node
                .skip_authentication(SkipOptions::only([bad]))
                .expect_err("invalid action name");
            assert_eq!(err, PolicyError::InvalidActionName(bad.to_string()));
        }

        assert!(node.is_skipped("index"));
    }

    // -------------------------------------------------------------------------
    // Inheritance
    // -------------------------------------------------------------------------

    #[test]
    fn test_child_without_local_rules_mirrors_parent() {
        let parent = PolicyNode::new(None);
        parent
            .skip_authentication(SkipOptions::only(["index"]))
            .unwrap();
        let child = PolicyNode::new(Some(&parent));

        assert!(child.is_skipped("index"));
        assert!(!child.is_skipped("create"));
    }

    #[test]
    fn test_child_rule_shadows_without_touching_parent() {
        let parent = PolicyNode::new(None);
        let child = PolicyNode::new(Some(&parent));
        child.skip_authentication(SkipOptions::all()).unwrap();

        assert!(child.is_skipped("index"));
        assert!(!parent.is_skipped("index"));
    }

    #[test]
    fn test_unmatched_local_only_falls_through_to_parent() {
        let parent = PolicyNode::new(None);
        parent.skip_authentication(SkipOptions::all()).unwrap();
        let child = PolicyNode::new(Some(&parent));
        child
            .skip_authentication(SkipOptions::only(["index"]))
            .unwrap();

        // "show" is outside the child's own rule, so the parent decides.
        assert!(child.is_skipped("show"));
        assert!(child.is_skipped("index"));
    }

    #[test]
    fn test_inheritance_spans_multiple_levels() {
        let root = PolicyNode::new(None);
        root.skip_authentication(SkipOptions::only(["ping"])).unwrap();
        let middle = PolicyNode::new(Some(&root));
        let leaf = PolicyNode::new(Some(&middle));

        assert!(leaf.is_skipped("ping"));
        assert!(!leaf.is_skipped("index"));
    }

    #[test]
    fn test_reset_on_child_restores_inherited_behavior() {
        let parent = PolicyNode::new(None);
        parent.skip_authentication(SkipOptions::all()).unwrap();
        let child = PolicyNode::new(Some(&parent));
        child
            .skip_authentication(SkipOptions::only(["index"]))
            .unwrap();
        child.reset();

        // With no local rule left, every lookup defers to the parent again.
        assert!(child.is_skipped("anything"));
    }

    // -------------------------------------------------------------------------
    // Callback resolution
    // -------------------------------------------------------------------------

    fn counting_success(counter: &Arc<AtomicUsize>) -> SuccessCallback {
        let counter = Arc::clone(counter);
        Callback::Inline(Arc::new(move |_claims: &Claims| {
            counter.fetch_add(1, Ordering::SeqCst);
        }))
    }

    #[test]
    fn test_callbacks_inherit_from_parent() {
        let calls = Arc::new(AtomicUsize::new(0));
        let parent = PolicyNode::new(None);
        parent.on_authentication_success(counting_success(&calls));
        let child = PolicyNode::new(Some(&parent));

        let resolved = child.success_callback().expect("inherited callback");
        if let Callback::Inline(handler) = resolved {
            handler(&Claims::new());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_local_callback_shadows_parent() {
        let parent = PolicyNode::new(None);
        parent.on_authentication_failed(Callback::Named("parent_handler".to_string()));
        let child = PolicyNode::new(Some(&parent));
        child.on_authentication_failed(Callback::Named("child_handler".to_string()));

        let resolved = child.failure_callback().expect("local callback");
        assert!(matches!(resolved, Callback::Named(name) if name == "child_handler"));

        // The parent keeps its own.
        let parent_resolved = parent.failure_callback().expect("parent callback");
        assert!(matches!(parent_resolved, Callback::Named(name) if name == "parent_handler"));
    }

    #[test]
    fn test_unset_callbacks_resolve_to_none() {
        let node = PolicyNode::new(None);

        assert!(node.success_callback().is_none());
        assert!(node.failure_callback().is_none());
    }

    #[test]
    fn test_reset_clears_callbacks() {
        let node = PolicyNode::new(None);
        node.on_authentication_success(Callback::Named("handler".to_string()));
        node.reset();

        assert!(node.success_callback().is_none());
    }

    // -------------------------------------------------------------------------
    // Gate decision
    // -------------------------------------------------------------------------

    #[test]
    fn test_skipped_action_never_reaches_the_verifier() {
        use crate::request::StaticRequest;

        // No decode key: any verification attempt would fail with
        // decode_key_missing, so a Skipped decision proves the verifier never
        // ran.
        let config = GateConfig::default();
        let node = PolicyNode::new(None);
        node.skip_authentication(SkipOptions::only(["index"])).unwrap();

        let decision = decide(&config, &node, "index", &StaticRequest::new());
        assert!(matches!(decision, GateDecision::Skipped));
    }

    #[test]
    fn test_guarded_action_is_rejected_without_token() {
        use crate::request::StaticRequest;
        use crate::verify::ErrorKind;

        let config = GateConfig::default();
        let node = PolicyNode::new(None);
        node.skip_authentication(SkipOptions::only(["index"])).unwrap();

        let decision = decide(&config, &node, "create", &StaticRequest::new());
        match decision {
            GateDecision::Rejected(errors) => {
                // decode_key is unset in the default config.
                assert_eq!(errors[0].kind, ErrorKind::DecodeKeyMissing);
            }
            other => panic!("expected Rejected, got {other:?}"),
        }
    }
}
