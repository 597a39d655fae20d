//! End-to-end mediation flow tests with a scripted approval transport.

#![allow(clippy::unwrap_used)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use tollgate::mediate::{mediate, CoreContext, Denial, Disposition};
use tollgate::{
    ApprovalDecision, ApprovalPrompt, ApprovalTransport, HostConfig, NormalizedRequest,
    OpenApiIndex, PolicyStore, Scheme, SecretConfig,
};

const HOST: &str = "api.example.com";
const FAKE: &str = "fake-secret-abc";
const ENV_VAR: &str = "TOLLGATE_MEDIATION_TEST_SECRET";

/// Scripted transport: answers by substring of the prompt resource,
/// records prompts, and counts cancellations observed before answering.
struct ScriptedTransport {
    /// (resource substring, decision, delay before answering)
    script: Vec<(String, ApprovalDecision, Duration)>,
    prompts: Mutex<Vec<ApprovalPrompt>>,
    cancelled: AtomicUsize,
}

impl ScriptedTransport {
    fn new(script: Vec<(&str, ApprovalDecision, Duration)>) -> Arc<Self> {
        Arc::new(Self {
            script: script
                .into_iter()
                .map(|(needle, decision, delay)| (needle.to_string(), decision, delay))
                .collect(),
            prompts: Mutex::new(Vec::new()),
            cancelled: AtomicUsize::new(0),
        })
    }

    fn prompt_resources(&self) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap()
            .iter()
            .map(|p| p.resource.clone())
            .collect()
    }

    fn cancelled_count(&self) -> usize {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ApprovalTransport for ScriptedTransport {
    async fn request(
        &self,
        prompt: ApprovalPrompt,
        cancel: CancellationToken,
    ) -> ApprovalDecision {
        let entry = self
            .script
            .iter()
            .find(|(needle, _, _)| prompt.resource.contains(needle.as_str()))
            .map(|(_, decision, delay)| (decision.clone(), *delay));
        self.prompts.lock().unwrap().push(prompt);

        let Some((decision, delay)) = entry else {
            return ApprovalDecision::RejectOnce;
        };
        tokio::select! {
            _ = cancel.cancelled() => {
                self.cancelled.fetch_add(1, Ordering::SeqCst);
                ApprovalDecision::RejectOnce
            }
            _ = tokio::time::sleep(delay) => decision,
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

fn host_config(grants: Vec<&str>, rejections: Vec<&str>) -> HostConfig {
    HostConfig {
        graphql_endpoints: vec!["/graphql".to_string()],
        open_api_spec: None,
        secrets: vec![SecretConfig {
            secret: FAKE.to_string(),
            secret_env_var_name: ENV_VAR.to_string(),
            grants: grants.into_iter().map(String::from).collect(),
            rejections: rejections.into_iter().map(String::from).collect(),
        }],
    }
}

fn context(
    config: HostConfig,
    transport: Option<Arc<dyn ApprovalTransport>>,
) -> CoreContext {
    let mut doc = std::collections::BTreeMap::new();
    doc.insert(HOST.to_string(), config);
    CoreContext {
        policy: Arc::new(PolicyStore::in_memory(doc)),
        openapi: Arc::new(OpenApiIndex::new()),
        approvals: transport,
    }
}

fn http_request(method: &str, target: &str, auth: &str) -> NormalizedRequest {
    NormalizedRequest {
        scheme: Scheme::Https,
        host: HOST.to_string(),
        method: method.to_string(),
        target: target.to_string(),
        headers: vec![
            ("Host".to_string(), HOST.to_string()),
            ("Authorization".to_string(), format!("Bearer {auth}")),
            ("Accept".to_string(), "*/*".to_string()),
        ],
        body: None,
    }
}

fn graphql_request(body: &str) -> NormalizedRequest {
    NormalizedRequest {
        scheme: Scheme::Https,
        host: HOST.to_string(),
        method: "POST".to_string(),
        target: "/graphql".to_string(),
        headers: vec![
            ("Host".to_string(), HOST.to_string()),
            ("Authorization".to_string(), format!("Bearer {FAKE}")),
            ("Content-Type".to_string(), "application/json".to_string()),
        ],
        body: Some(body.as_bytes().to_vec()),
    }
}

fn set_real_secret() {
    std::env::set_var(ENV_VAR, "real-secret-xyz");
}

#[tokio::test]
async fn passthrough_without_fake_secret_is_unmodified_except_host() {
    let ctx = context(host_config(vec![], vec![]), None);
    let request = http_request("GET", "/anything", "unrelated-token");
    let original_headers = request.headers.clone();

    match mediate(&ctx, request, CancellationToken::new()).await {
        Disposition::Forward(fwd) => {
            let expected: Vec<_> = original_headers
                .into_iter()
                .filter(|(n, _)| !n.eq_ignore_ascii_case("host"))
                .collect();
            assert_eq!(fwd.headers, expected);
        }
        other => panic!("expected forward, got {other:?}"),
    }
}

#[tokio::test]
async fn granted_request_is_forwarded_with_substitution() {
    set_real_secret();
    let ctx = context(host_config(vec!["GET /public/*"], vec![]), None);
    let request = http_request("GET", "/public/data?page=1", FAKE);

    match mediate(&ctx, request, CancellationToken::new()).await {
        Disposition::Forward(fwd) => {
            assert!(fwd.headers.iter().all(|(_, v)| !v.contains(FAKE)));
            assert!(fwd
                .headers
                .iter()
                .any(|(_, v)| v.contains("real-secret-xyz")));
            assert!(!fwd.headers.iter().any(|(n, _)| n.eq_ignore_ascii_case("host")));
        }
        other => panic!("expected forward, got {other:?}"),
    }
}

#[tokio::test]
async fn rejection_takes_precedence_over_grant() {
    let ctx = context(
        host_config(vec!["DELETE /repos/*"], vec!["DELETE /repos/*"]),
        None,
    );
    let request = http_request("DELETE", "/repos/acme", FAKE);

    match mediate(&ctx, request, CancellationToken::new()).await {
        Disposition::Respond(Denial::RejectedPermanent { pattern }) => {
            assert_eq!(pattern, "DELETE /repos/*");
        }
        other => panic!("expected permanent rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn no_transport_means_403() {
    let ctx = context(host_config(vec![], vec![]), None);
    let request = http_request("GET", "/private", FAKE);

    match mediate(&ctx, request, CancellationToken::new()).await {
        Disposition::Respond(denial) => {
            assert_eq!(denial, Denial::NoApprovalHandler);
            assert_eq!(denial.status(), 403);
        }
        other => panic!("expected denial, got {other:?}"),
    }
}

#[tokio::test]
async fn allow_once_forwards_without_persisting() {
    set_real_secret();
    let transport = ScriptedTransport::new(vec![(
        "/private",
        ApprovalDecision::AllowOnce,
        Duration::ZERO,
    )]);
    let ctx = context(host_config(vec![], vec![]), Some(transport.clone()));
    let request = http_request("GET", "/private", FAKE);

    match mediate(&ctx, request, CancellationToken::new()).await {
        Disposition::Forward(_) => {}
        other => panic!("expected forward, got {other:?}"),
    }
    let config = ctx.policy.host_config(HOST).await.unwrap();
    assert!(config.secrets[0].grants.is_empty());
}

#[tokio::test]
async fn allow_forever_persists_grant() {
    set_real_secret();
    let transport = ScriptedTransport::new(vec![(
        "/private",
        ApprovalDecision::AllowForever("GET /private".to_string()),
        Duration::ZERO,
    )]);
    let ctx = context(host_config(vec![], vec![]), Some(transport));
    let request = http_request("GET", "/private", FAKE);

    assert!(matches!(
        mediate(&ctx, request, CancellationToken::new()).await,
        Disposition::Forward(_)
    ));
    let config = ctx.policy.host_config(HOST).await.unwrap();
    assert_eq!(config.secrets[0].grants, vec!["GET /private".to_string()]);

    // A second identical request now matches the stored grant without a
    // prompt; the transport would answer RejectOnce for unknown prompts.
    let again = http_request("GET", "/private", FAKE);
    assert!(matches!(
        mediate(&ctx, again, CancellationToken::new()).await,
        Disposition::Forward(_)
    ));
}

#[tokio::test]
async fn reject_forever_persists_rejection() {
    let transport = ScriptedTransport::new(vec![(
        "/private",
        ApprovalDecision::RejectForever("GET *".to_string()),
        Duration::ZERO,
    )]);
    let ctx = context(host_config(vec![], vec![]), Some(transport));

    match mediate(
        &ctx,
        http_request("GET", "/private", FAKE),
        CancellationToken::new(),
    )
    .await
    {
        Disposition::Respond(Denial::RejectedPermanent { pattern }) => {
            assert_eq!(pattern, "GET *");
        }
        other => panic!("expected permanent rejection, got {other:?}"),
    }
    let config = ctx.policy.host_config(HOST).await.unwrap();
    assert_eq!(config.secrets[0].rejections, vec!["GET *".to_string()]);
}

/// Transport whose prompt times out internally; per the capability
/// contract it reports the timeout as a plain reject-once.
struct TimingOutTransport {
    prompt_timeout: Duration,
}

#[async_trait]
impl ApprovalTransport for TimingOutTransport {
    async fn request(
        &self,
        _prompt: ApprovalPrompt,
        _cancel: CancellationToken,
    ) -> ApprovalDecision {
        tokio::time::sleep(self.prompt_timeout).await;
        ApprovalDecision::RejectOnce
    }

    fn name(&self) -> &str {
        "timing-out"
    }
}

#[tokio::test(start_paused = true)]
async fn transport_timeout_collapses_to_reject_once() {
    let transport = Arc::new(TimingOutTransport {
        prompt_timeout: Duration::from_secs(240),
    });
    let ctx = context(host_config(vec![], vec![]), Some(transport));

    match mediate(
        &ctx,
        http_request("GET", "/private", FAKE),
        CancellationToken::new(),
    )
    .await
    {
        Disposition::Respond(denial) => {
            assert_eq!(denial, Denial::RejectedOnce);
            assert_eq!(denial.status(), 403);
        }
        other => panic!("expected denial, got {other:?}"),
    }
}

#[tokio::test]
async fn missing_real_secret_is_500() {
    std::env::remove_var("TOLLGATE_MEDIATION_UNSET");
    let mut config = host_config(vec!["GET *"], vec![]);
    config.secrets[0].secret_env_var_name = "TOLLGATE_MEDIATION_UNSET".to_string();
    let ctx = context(config, None);

    match mediate(
        &ctx,
        http_request("GET", "/private", FAKE),
        CancellationToken::new(),
    )
    .await
    {
        Disposition::Respond(denial) => {
            assert_eq!(denial.status(), 500);
            assert!(matches!(denial, Denial::MissingRealSecret { .. }));
        }
        other => panic!("expected denial, got {other:?}"),
    }
}

#[tokio::test]
async fn malformed_graphql_is_400() {
    let ctx = context(host_config(vec![], vec![]), None);
    let request = graphql_request("{not json");

    match mediate(&ctx, request, CancellationToken::new()).await {
        Disposition::Respond(denial) => assert_eq!(denial.status(), 400),
        other => panic!("expected denial, got {other:?}"),
    }
}

#[tokio::test]
async fn graphql_batch_prompts_only_ungranted_fields() {
    set_real_secret();
    let transport = ScriptedTransport::new(vec![(
        "deleteUser",
        ApprovalDecision::AllowOnce,
        Duration::ZERO,
    )]);
    let ctx = context(
        host_config(vec!["GRAPHQL query user"], vec![]),
        Some(transport.clone()),
    );
    let body = r#"[{"query": "query { user { id } }"},
                   {"query": "mutation { deleteUser(id: \"1\") { ok } }"}]"#;

    assert!(matches!(
        mediate(&ctx, graphql_request(body), CancellationToken::new()).await,
        Disposition::Forward(_)
    ));
    // Only the ungranted mutation prompted.
    assert_eq!(
        transport.prompt_resources(),
        vec!["mutation deleteUser(id: \"1\")".to_string()]
    );
}

#[tokio::test]
async fn graphql_rejection_short_circuits_before_prompts() {
    let transport = ScriptedTransport::new(vec![]);
    let ctx = context(
        host_config(vec![], vec!["GRAPHQL mutation *"]),
        Some(transport.clone()),
    );
    let body = r#"{"query": "mutation { deleteUser(id: \"1\") { ok } }"}"#;

    match mediate(&ctx, graphql_request(body), CancellationToken::new()).await {
        Disposition::Respond(Denial::RejectedPermanent { pattern }) => {
            assert_eq!(pattern, "GRAPHQL mutation *");
        }
        other => panic!("expected permanent rejection, got {other:?}"),
    }
    assert!(transport.prompt_resources().is_empty());
}

#[tokio::test(start_paused = true)]
async fn graphql_parallel_first_reject_cancels_sibling() {
    let transport = ScriptedTransport::new(vec![
        (
            "renameRepo",
            ApprovalDecision::RejectOnce,
            Duration::from_millis(10),
        ),
        (
            "deleteRepo",
            ApprovalDecision::AllowOnce,
            Duration::from_secs(3600),
        ),
    ]);
    let ctx = context(host_config(vec![], vec![]), Some(transport.clone()));
    let body = r#"{"query": "mutation { renameRepo(to: \"x\") { ok } deleteRepo(id: 1) { ok } }"}"#;

    let outcome = mediate(&ctx, graphql_request(body), CancellationToken::new()).await;
    match outcome {
        Disposition::Respond(denial) => assert_eq!(denial, Denial::RejectedOnce),
        other => panic!("expected denial, got {other:?}"),
    }

    // The slow sibling prompt was withdrawn via the shared token rather
    // than waiting the full hour.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(transport.cancelled_count(), 1);
    assert_eq!(transport.prompt_resources().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn graphql_partial_grants_are_discarded_on_rejection() {
    let transport = ScriptedTransport::new(vec![
        (
            "benignRead",
            ApprovalDecision::AllowForever("GRAPHQL query benignRead".to_string()),
            Duration::from_millis(1),
        ),
        (
            "riskyWrite",
            ApprovalDecision::RejectOnce,
            Duration::from_millis(20),
        ),
    ]);
    let ctx = context(host_config(vec![], vec![]), Some(transport));
    let body = r#"[{"query": "query { benignRead { id } }"},
                   {"query": "mutation { riskyWrite(v: 1) { ok } }"}]"#;

    assert!(matches!(
        mediate(&ctx, graphql_request(body), CancellationToken::new()).await,
        Disposition::Respond(Denial::RejectedOnce)
    ));

    // The allow-forever that arrived before the rejection is not persisted.
    let config = ctx.policy.host_config(HOST).await.unwrap();
    assert!(config.secrets[0].grants.is_empty());
}

#[tokio::test]
async fn graphql_all_approved_persists_forever_grants_and_forwards() {
    set_real_secret();
    let transport = ScriptedTransport::new(vec![
        (
            "benignRead",
            ApprovalDecision::AllowForever("GRAPHQL query benignRead".to_string()),
            Duration::ZERO,
        ),
        ("riskyWrite", ApprovalDecision::AllowOnce, Duration::ZERO),
    ]);
    let ctx = context(host_config(vec![], vec![]), Some(transport));
    let body = r#"[{"query": "query { benignRead { id } }"},
                   {"query": "mutation { riskyWrite(v: 1) { ok } }"}]"#;

    assert!(matches!(
        mediate(&ctx, graphql_request(body), CancellationToken::new()).await,
        Disposition::Forward(_)
    ));
    let config = ctx.policy.host_config(HOST).await.unwrap();
    assert_eq!(
        config.secrets[0].grants,
        vec!["GRAPHQL query benignRead".to_string()]
    );
}

#[tokio::test(start_paused = true)]
async fn client_disconnect_cancels_pending_approvals() {
    let transport = ScriptedTransport::new(vec![(
        "slowOp",
        ApprovalDecision::AllowOnce,
        Duration::from_secs(3600),
    )]);
    let ctx = context(host_config(vec![], vec![]), Some(transport.clone()));
    let body = r#"{"query": "mutation { slowOp { ok } }"}"#;

    let cancel = CancellationToken::new();
    let request = graphql_request(body);
    let med = tokio::spawn({
        let cancel = cancel.clone();
        let ctx = Arc::new(ctx);
        async move { mediate(&ctx, request, cancel).await }
    });

    tokio::time::sleep(Duration::from_millis(20)).await;
    cancel.cancel();
    let outcome = med.await.unwrap();
    assert!(matches!(outcome, Disposition::Respond(_)));

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(transport.cancelled_count(), 1);
}

#[tokio::test]
async fn openapi_template_drives_http_suggestions() {
    let transport = ScriptedTransport::new(vec![(
        "/repos/a/b/actions/runs/7/jobs",
        ApprovalDecision::RejectOnce,
        Duration::ZERO,
    )]);
    let doc = serde_json::json!({
        "paths": { "/repos/{owner}/{repo}/actions/runs/{run_id}/jobs": { "get": {} } }
    });
    let mut index = OpenApiIndex::new();
    index.insert_document(HOST, &doc).unwrap();

    let mut doc_cfg = std::collections::BTreeMap::new();
    doc_cfg.insert(HOST.to_string(), host_config(vec![], vec![]));
    let ctx = CoreContext {
        policy: Arc::new(PolicyStore::in_memory(doc_cfg)),
        openapi: Arc::new(index),
        approvals: Some(transport.clone()),
    };

    let request = http_request("GET", "/repos/a/b/actions/runs/7/jobs", FAKE);
    let _ = mediate(&ctx, request, CancellationToken::new()).await;

    let prompts = transport.prompts.lock().unwrap();
    let patterns: Vec<&str> = prompts[0]
        .options
        .iter()
        .map(|o| o.pattern.as_str())
        .collect();
    assert_eq!(
        patterns,
        vec![
            "GET /repos/a/b/actions/runs/7/jobs",
            "GET /repos/a/b/actions/runs/*/jobs",
            "GET /repos/a/*/actions/runs/*/jobs",
            "GET /repos/*/*/actions/runs/*/jobs",
            "GET *",
        ]
    );
}

#[tokio::test]
async fn concurrent_identical_forever_approvals_stay_idempotent() {
    set_real_secret();
    let transport = ScriptedTransport::new(vec![(
        "/private",
        ApprovalDecision::AllowForever("GET /private".to_string()),
        Duration::ZERO,
    )]);
    let ctx = Arc::new(context(host_config(vec![], vec![]), Some(transport)));

    let mut tasks = Vec::new();
    for _ in 0..4 {
        let ctx = Arc::clone(&ctx);
        tasks.push(tokio::spawn(async move {
            mediate(
                &ctx,
                http_request("GET", "/private", FAKE),
                CancellationToken::new(),
            )
            .await
        }));
    }
    for task in tasks {
        assert!(matches!(task.await.unwrap(), Disposition::Forward(_)));
    }

    let config = ctx.policy.host_config(HOST).await.unwrap();
    assert_eq!(config.secrets[0].grants, vec!["GET /private".to_string()]);
}
