//! Gatehound core: bearer-token authentication for HTTP controllers.
//!
//! This crate contains the framework-agnostic pieces of the gate:
//!
//! - `config` - token location rules, JWT algorithm and decode key
//! - `request` - the request abstraction the locator reads from
//! - `locate` - bearer-token extraction (header over parameter)
//! - `verify` - JWT verification and structured error classification
//! - `policy` - per-controller skip rules and callbacks with inheritance
//! - `registry` - lazy, exactly-once policy-node creation
//!
//! Web-framework integration lives in a separate crate (`gatehound-axum`),
//! which drives [`policy::decide`] before each guarded action and applies the
//! resulting side effects (callbacks, response status, failure body).
//!
//! Verification failures are values, not errors: [`verify::verify`] always
//! returns a [`verify::VerificationOutcome`], and only configuration misuse
//! (invalid algorithm, conflicting skip options) surfaces as `Result::Err`.

#![warn(clippy::pedantic)]

pub mod config;
pub mod locate;
pub mod policy;
pub mod registry;
pub mod request;
pub mod verify;

mod observability;

pub use config::{ConfigError, GateConfig, JwtAlgorithm, JwtConfig};
pub use locate::locate;
pub use policy::{
    decide, Callback, FailureCallback, GateDecision, PolicyError, PolicyNode, SkipOptions,
    SuccessCallback,
};
pub use registry::PolicyRegistry;
pub use request::{StaticRequest, TokenSource};
pub use verify::{verify, Claims, ErrorEntry, ErrorKind, VerificationOutcome};
