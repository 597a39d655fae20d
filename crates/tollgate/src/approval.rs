//! Approval transport capability.
//!
//! The interactive channel that obtains the operator's decision is
//! external to the core. Implementations must support many concurrent
//! outstanding prompts and honor cancellation by withdrawing the prompt
//! (the request may have been rejected by a sibling approval or the
//! client may have disconnected).

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::suggest::PatternOption;

/// The operator's answer to an approval prompt.
///
/// The two `*Forever` variants carry the pattern the operator picked.
/// A prompt that times out is the transport's concern: it reports
/// [`RejectOnce`](ApprovalDecision::RejectOnce) after logging the
/// timeout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalDecision {
    AllowOnce,
    AllowForever(String),
    RejectOnce,
    RejectForever(String),
}

impl ApprovalDecision {
    #[must_use]
    pub fn is_allow(&self) -> bool {
        matches!(
            self,
            ApprovalDecision::AllowOnce | ApprovalDecision::AllowForever(_)
        )
    }
}

/// What the operator sees: the origin, the method (or `GRAPHQL`), the
/// concrete resource, and the candidate patterns to persist.
#[derive(Debug, Clone)]
pub struct ApprovalPrompt {
    pub host: String,
    /// HTTP method, or the literal `GRAPHQL` for the GraphQL flow.
    pub method_label: String,
    /// Path with query for HTTP; `<op> <field(args...)>` for GraphQL.
    pub resource: String,
    pub options: Vec<PatternOption>,
}

/// Pluggable decision channel (terminal prompt, chat bot, webhook).
///
/// Internal transport failures and per-prompt timeouts must map to
/// [`ApprovalDecision::RejectOnce`] - errors are denials. When `cancel`
/// fires, the transport should withdraw or amend its prompt and return
/// promptly; the returned decision is then ignored.
#[async_trait]
pub trait ApprovalTransport: Send + Sync {
    async fn request(&self, prompt: ApprovalPrompt, cancel: CancellationToken)
        -> ApprovalDecision;

    /// Human-readable name for diagnostics.
    fn name(&self) -> &str;
}
