//! Per-request mediation state machine.
//!
//! `Received -> Classified -> Decided -> (Forwarded | Rejected)`:
//! a request is normalized by the proxy layer, classified here as
//! pass-through, HTTP, or GraphQL, run through rejection lookup, grant
//! lookup, and (when policy is silent) one or more approval prompts, and
//! finally either rewritten for forwarding or answered with a denial.
//!
//! Fail-closed: any uncertainty on a request that carries a fake secret
//! resolves to a denial, never to silent forwarding. A request without a
//! fake secret is out of policy scope and forwarded unmodified (minus
//! the `Host` header).

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::approval::{ApprovalDecision, ApprovalPrompt, ApprovalTransport};
use crate::audit;
use crate::error::CoreError;
use crate::graphql::{self, NormalizedGraphql};
use crate::openapi::OpenApiIndex;
use crate::pattern::GRAPHQL_METHOD;
use crate::policy::{PolicyStore, SecretConfig};
use crate::request::NormalizedRequest;
use crate::secrets;
use crate::suggest;

/// Everything the mediation core needs, passed explicitly so tests can
/// construct alternate instances. No global state.
pub struct CoreContext {
    pub policy: Arc<PolicyStore>,
    pub openapi: Arc<OpenApiIndex>,
    pub approvals: Option<Arc<dyn ApprovalTransport>>,
}

/// Final disposition of a mediated request.
#[derive(Debug)]
pub enum Disposition {
    /// Forward to the upstream. Headers are already rewritten (real
    /// credential substituted, `Host` stripped).
    Forward(NormalizedRequest),
    /// Answer the client without forwarding.
    Respond(Denial),
}

/// A non-forwarded outcome and the status line it maps to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Denial {
    /// A stored rejection matched, or the operator rejected forever.
    RejectedPermanent { pattern: String },
    /// The operator rejected this request only (a timed-out prompt
    /// reaches the core as the same reject-once).
    RejectedOnce,
    /// Approval was needed but no transport is bound.
    NoApprovalHandler,
    /// GraphQL request on a GraphQL endpoint failed to parse.
    MalformedGraphql { message: String },
    /// The real secret's env var is unset.
    MissingRealSecret { env_var: String },
}

impl Denial {
    #[must_use]
    pub fn status(&self) -> u16 {
        match self {
            Denial::MalformedGraphql { .. } => 400,
            Denial::MissingRealSecret { .. } => 500,
            _ => 403,
        }
    }

    /// Short response body identifying the kind of denial.
    #[must_use]
    pub fn body(&self) -> String {
        match self {
            Denial::RejectedPermanent { pattern } => {
                format!("request rejected (permanent): pattern {pattern}")
            }
            Denial::RejectedOnce => "request rejected (once)".to_string(),
            Denial::NoApprovalHandler => "request rejected (no approval handler)".to_string(),
            Denial::MalformedGraphql { message } => {
                format!("malformed GraphQL request: {message}")
            }
            Denial::MissingRealSecret { env_var } => {
                format!("no real secret configured in ${env_var}")
            }
        }
    }
}

/// State of one request as it moves through mediation.
enum State {
    Received,
    Classified(Flow),
    Decided(Decision),
}

/// Classification of a received request.
enum Flow {
    /// No configured fake secret in the headers.
    PassThrough,
    Http {
        secret: SecretConfig,
    },
    Graphql {
        secret: SecretConfig,
        normalized: NormalizedGraphql,
    },
}

/// Outcome of the decision stage, before substitution.
enum Decision {
    Forward { secret: Option<SecretConfig> },
    Deny(Denial),
}

/// Run a request through the mediation state machine.
///
/// `cancel` is the request-scoped cancellation token; the proxy layer
/// cancels it when the client disconnects, which withdraws any pending
/// approval prompts.
pub async fn mediate(
    ctx: &CoreContext,
    request: NormalizedRequest,
    cancel: CancellationToken,
) -> Disposition {
    let mut state = State::Received;
    loop {
        state = match state {
            State::Received => classify(ctx, &request).await,
            State::Classified(Flow::PassThrough) => {
                State::Decided(Decision::Forward { secret: None })
            }
            State::Classified(Flow::Http { secret }) => {
                State::Decided(http_flow(ctx, &request, secret, &cancel).await)
            }
            State::Classified(Flow::Graphql { secret, normalized }) => {
                State::Decided(graphql_flow(ctx, &request, secret, &normalized, &cancel).await)
            }
            State::Decided(decision) => return finish(ctx, request, decision),
        };
    }
}

/// Classify: detect a fake secret, then split on whether the path is a
/// configured GraphQL endpoint. GraphQL parse failures decide the
/// request immediately (400).
async fn classify(ctx: &CoreContext, request: &NormalizedRequest) -> State {
    let Some(host_config) = ctx.policy.host_config(&request.host).await else {
        return State::Classified(Flow::PassThrough);
    };
    let Some(secret) = secrets::detect(&host_config.secrets, &request.headers).cloned() else {
        return State::Classified(Flow::PassThrough);
    };

    if !host_config
        .graphql_endpoints
        .iter()
        .any(|endpoint| endpoint == request.path())
    {
        return State::Classified(Flow::Http { secret });
    }

    match parse_graphql(request) {
        Ok(normalized) => State::Classified(Flow::Graphql { secret, normalized }),
        Err(e) => {
            debug!(host = %request.host, error = %e, "GraphQL normalization failed");
            State::Decided(Decision::Deny(Denial::MalformedGraphql {
                message: e.to_string(),
            }))
        }
    }
}

fn parse_graphql(request: &NormalizedRequest) -> Result<NormalizedGraphql, CoreError> {
    if request.method == "GET" {
        let query = request.query().unwrap_or("");
        Ok(graphql::normalize_get_query(query)?)
    } else {
        let body = request.body.as_deref().unwrap_or(&[]);
        let text = std::str::from_utf8(body)
            .map_err(|_| CoreError::Config("request body is not UTF-8".to_string()))?;
        Ok(graphql::normalize_post_body(text)?)
    }
}

/// HTTP sub-flow: rejection lookup, grant lookup, then a single approval.
async fn http_flow(
    ctx: &CoreContext,
    request: &NormalizedRequest,
    secret: SecretConfig,
    cancel: &CancellationToken,
) -> Decision {
    let key = request.request_key();

    if let Some(pattern) = ctx
        .policy
        .matching_rejection(&request.host, &secret.secret, &key)
        .await
    {
        audit::log_rejection_matched(&request.host, &key, &pattern);
        return Decision::Deny(Denial::RejectedPermanent { pattern });
    }

    if let Some(pattern) = ctx
        .policy
        .matching_grant(&request.host, &secret.secret, &key)
        .await
    {
        audit::log_grant_matched(&request.host, &key, &pattern);
        return Decision::Forward {
            secret: Some(secret),
        };
    }

    let Some(transport) = &ctx.approvals else {
        audit::log_no_handler(&request.host, &key);
        return Decision::Deny(Denial::NoApprovalHandler);
    };

    let template = ctx
        .openapi
        .lookup(&request.host, &request.method, request.path());
    let prompt = ApprovalPrompt {
        host: request.host.clone(),
        method_label: request.method.clone(),
        resource: request.target.clone(),
        options: suggest::http_options(&request.method, &request.target, template),
    };

    let decision = transport.request(prompt, cancel.child_token()).await;
    settle_single(ctx, request, secret, &request.target, decision).await
}

/// GraphQL sub-flow: normalize, rejection lookup across every key,
/// partition by grants, then one approval per non-granted field -
/// in parallel, with the first rejection cancelling the rest.
async fn graphql_flow(
    ctx: &CoreContext,
    request: &NormalizedRequest,
    secret: SecretConfig,
    normalized: &NormalizedGraphql,
    cancel: &CancellationToken,
) -> Decision {
    // An empty normalization here means the parse failed or the document
    // had no operations; both are malformed input.
    if normalized.is_empty() {
        return Decision::Deny(Denial::MalformedGraphql {
            message: "no executable operations".to_string(),
        });
    }

    let keyed = normalized.keys();

    // Rejections take precedence and short-circuit before any prompt.
    for (_, _, key) in &keyed {
        if let Some(pattern) = ctx
            .policy
            .matching_rejection(&request.host, &secret.secret, key)
            .await
        {
            audit::log_rejection_matched(&request.host, key, &pattern);
            return Decision::Deny(Denial::RejectedPermanent { pattern });
        }
    }

    let mut needs_approval = Vec::new();
    for (op, field, key) in &keyed {
        match ctx
            .policy
            .matching_grant(&request.host, &secret.secret, key)
            .await
        {
            Some(pattern) => audit::log_grant_matched(&request.host, key, &pattern),
            None => needs_approval.push((*op, *field, key.clone())),
        }
    }

    if needs_approval.is_empty() {
        return Decision::Forward {
            secret: Some(secret),
        };
    }

    let Some(transport) = &ctx.approvals else {
        audit::log_no_handler(&request.host, &needs_approval[0].2);
        return Decision::Deny(Denial::NoApprovalHandler);
    };

    // One approval task per field, all sharing one cancellation token so
    // the first rejection (or a client disconnect) withdraws the rest.
    let sibling_cancel = cancel.child_token();
    let (tx, mut rx) = mpsc::channel(needs_approval.len());

    for (op, field, _) in &needs_approval {
        let prompt = ApprovalPrompt {
            host: request.host.clone(),
            method_label: GRAPHQL_METHOD.to_string(),
            resource: format!("{} {}", op, field.canonical()),
            options: suggest::graphql_options(*op, field),
        };
        let transport = Arc::clone(transport);
        let token = sibling_cancel.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            let decision = transport.request(prompt, token).await;
            let _ = tx.send(decision).await;
        });
    }
    drop(tx);

    let mut remaining = needs_approval.len();
    let mut forever_grants: Vec<String> = Vec::new();
    while remaining > 0 {
        let decision = tokio::select! {
            _ = cancel.cancelled() => {
                // Client went away; prompts are withdrawn via the shared
                // token and the response no longer matters.
                sibling_cancel.cancel();
                return Decision::Deny(Denial::RejectedOnce);
            }
            received = rx.recv() => match received {
                Some(decision) => decision,
                None => {
                    sibling_cancel.cancel();
                    return Decision::Deny(Denial::RejectedOnce);
                }
            },
        };

        match decision {
            ApprovalDecision::AllowOnce => remaining -= 1,
            ApprovalDecision::AllowForever(pattern) => {
                remaining -= 1;
                forever_grants.push(pattern);
            }
            ApprovalDecision::RejectOnce => {
                sibling_cancel.cancel();
                audit::log_once_decision(&request.host, &request.target, false);
                return Decision::Deny(Denial::RejectedOnce);
            }
            ApprovalDecision::RejectForever(pattern) => {
                sibling_cancel.cancel();
                audit::log_rejected_forever(&request.host, &pattern);
                if let Err(e) = ctx
                    .policy
                    .add_rejection(&request.host, &secret.secret, &pattern)
                    .await
                {
                    warn!(error = %e, "failed to persist rejection");
                }
                return Decision::Deny(Denial::RejectedPermanent { pattern });
            }
        }
    }

    // Grants persist only once every sibling has approved; a rejection
    // above discards any allow-forever answers that arrived first.
    for pattern in forever_grants {
        audit::log_approved_forever(&request.host, &pattern);
        if let Err(e) = ctx
            .policy
            .add_grant(&request.host, &secret.secret, &pattern)
            .await
        {
            warn!(error = %e, "failed to persist grant");
        }
    }

    Decision::Forward {
        secret: Some(secret),
    }
}

/// Apply a single approval decision (the HTTP flow and the one-field
/// GraphQL flow share these semantics).
async fn settle_single(
    ctx: &CoreContext,
    request: &NormalizedRequest,
    secret: SecretConfig,
    resource: &str,
    decision: ApprovalDecision,
) -> Decision {
    match decision {
        ApprovalDecision::AllowOnce => {
            audit::log_once_decision(&request.host, resource, true);
            Decision::Forward {
                secret: Some(secret),
            }
        }
        ApprovalDecision::AllowForever(pattern) => {
            audit::log_approved_forever(&request.host, &pattern);
            if let Err(e) = ctx
                .policy
                .add_grant(&request.host, &secret.secret, &pattern)
                .await
            {
                warn!(error = %e, "failed to persist grant");
            }
            Decision::Forward {
                secret: Some(secret),
            }
        }
        ApprovalDecision::RejectOnce => {
            audit::log_once_decision(&request.host, resource, false);
            Decision::Deny(Denial::RejectedOnce)
        }
        ApprovalDecision::RejectForever(pattern) => {
            audit::log_rejected_forever(&request.host, &pattern);
            if let Err(e) = ctx
                .policy
                .add_rejection(&request.host, &secret.secret, &pattern)
                .await
            {
                warn!(error = %e, "failed to persist rejection");
            }
            Decision::Deny(Denial::RejectedPermanent { pattern })
        }
    }
}

/// Final stage: substitute and build the forward request, or surface the
/// denial.
fn finish(ctx: &CoreContext, request: NormalizedRequest, decision: Decision) -> Disposition {
    match decision {
        Decision::Forward { secret: None } => {
            audit::log_passthrough(&request.host, &request.method, request.path());
            let headers = secrets::strip_host(&request.headers);
            Disposition::Forward(NormalizedRequest { headers, ..request })
        }
        Decision::Forward {
            secret: Some(secret),
        } => match ctx.policy.resolve_real_secret(&secret) {
            Ok(real) => {
                audit::log_forwarded(&request.host, &request.method, request.path());
                let headers = secrets::rewrite_headers(&request.headers, &secret.secret, &real);
                Disposition::Forward(NormalizedRequest { headers, ..request })
            }
            Err(_) => {
                audit::log_missing_real_secret(&request.host, &secret.secret_env_var_name);
                Disposition::Respond(Denial::MissingRealSecret {
                    env_var: secret.secret_env_var_name,
                })
            }
        },
        Decision::Deny(denial) => Disposition::Respond(denial),
    }
}
