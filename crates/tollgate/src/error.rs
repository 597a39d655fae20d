//! Error types for the tollgate core.

use thiserror::Error;

/// Errors surfaced by the core mediation engine.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("malformed pattern '{pattern}': {reason}")]
    MalformedPattern { pattern: String, reason: String },

    #[error("unsupported pattern variable ${name} (only $ANY is recognized)")]
    UnknownPatternVariable { name: String },

    #[error("GraphQL request error: {0}")]
    Graphql(#[from] GraphqlParseError),

    #[error("no real secret configured in ${env_var}")]
    MissingRealSecret { env_var: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to persist configuration: {0}")]
    Persist(#[source] std::io::Error),
}

/// Failures while normalizing a GraphQL request.
///
/// All of these resolve to a `400` at the proxy boundary; the variants
/// exist so diagnostics can say what actually went wrong.
#[derive(Error, Debug)]
pub enum GraphqlParseError {
    #[error("invalid request JSON: {0}")]
    Json(String),

    #[error("GraphQL syntax error: {0}")]
    Syntax(String),

    #[error("unknown fragment '{0}'")]
    UnknownFragment(String),

    #[error("fragment cycle involving '{0}'")]
    FragmentCycle(String),

    #[error("no operation named '{0}'")]
    UnknownOperation(String),

    #[error("request contains no operations")]
    NoOperations,

    #[error("missing query text")]
    MissingQuery,
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
