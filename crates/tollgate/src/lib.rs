//! Core mediation engine for the tollgate proxy.
//!
//! tollgate sits between a semi-trusted guest workload and upstream
//! origins. The guest is configured with *fake* credentials; this crate
//! detects them in request headers, decides the request's fate against a
//! per-secret policy of grant/rejection patterns, asks an operator via an
//! [`ApprovalTransport`] when policy is silent, and substitutes the real
//! credential only on the forward path.
//!
//! Everything in this crate is network-free:
//!
//! - [`pattern`] - the two-dialect pattern matcher (HTTP segment globs,
//!   GraphQL `$ANY` value wildcards)
//! - [`graphql`] - request normalization into canonical top-level fields
//! - [`openapi`] - host-indexed path-template lookup
//! - [`suggest`] - ordered pattern candidates for approval prompts
//! - [`policy`] - the persisted grant/rejection store
//! - [`secrets`] - fake-secret detection and fake->real rewriting
//! - [`mediate`] - the per-request state machine tying it all together
//!
//! The TLS-terminating listeners and the upstream client live in
//! `tollgate-proxy`; the interactive approval transport lives in the
//! binary crate.

pub mod approval;
pub mod audit;
pub mod error;
pub mod graphql;
pub mod mediate;
pub mod openapi;
pub mod pattern;
pub mod policy;
pub mod request;
pub mod secrets;
pub mod suggest;

pub use approval::{ApprovalDecision, ApprovalPrompt, ApprovalTransport};
pub use error::{CoreError, GraphqlParseError, Result};
pub use graphql::{GqlValue, GraphqlField, NormalizedGraphql, OpType};
pub use mediate::{mediate, CoreContext, Denial, Disposition};
pub use openapi::{OpenApiIndex, OpenApiPath};
pub use policy::{HostConfig, OpenApiSource, PolicyStore, SecretConfig};
pub use request::{Headers, NormalizedRequest, Scheme};
pub use suggest::PatternOption;
