//! tollgate - approval-mediated credential substitution proxy.
//!
//! The guest workload is configured with fake credentials and pointed at
//! this proxy (DNS override or `http_proxy`). Requests carrying a fake
//! credential are held for policy lookup and, when policy is silent, an
//! interactive terminal approval; approved requests are forwarded with
//! the real credential from the environment.

mod certs;
mod cli;
mod openapi_load;
mod terminal_approval;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use tollgate::mediate::CoreContext;
use tollgate::{pattern, ApprovalTransport, PolicyStore};
use tollgate_proxy::{LeafCertProvider, ProxyConfig};

use certs::DirCertProvider;
use cli::{Cli, Commands, RunArgs};
use terminal_approval::TerminalApproval;

fn main() {
    // Diagnostics go to stderr; stdout stays clean for command output.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    if let Err(e) = run() {
        error!("{e:#}");
        eprintln!("tollgate: {e:#}");
        std::process::exit(1);
    }
}

#[tokio::main]
async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => cmd_run(&cli.config, args).await,
        Commands::Check => cmd_check(&cli.config).await,
    }
}

async fn cmd_run(config_path: &std::path::Path, args: RunArgs) -> anyhow::Result<()> {
    let policy = Arc::new(PolicyStore::load(config_path).await?);
    let hosts = policy.snapshot().await;
    info!(
        config = %config_path.display(),
        hosts = hosts.len(),
        "policy loaded"
    );

    let openapi = Arc::new(openapi_load::build_index(&policy).await);
    let approvals: Arc<dyn ApprovalTransport> = Arc::new(TerminalApproval::new(
        Duration::from_secs(args.approval_timeout_secs),
    ));
    let core = CoreContext {
        policy,
        openapi,
        approvals: Some(approvals),
    };

    let certs = args
        .cert_dir
        .map(|dir| Arc::new(DirCertProvider::new(dir)) as Arc<dyn LeafCertProvider>);
    let handle = tollgate_proxy::start(
        ProxyConfig {
            http_addr: args.http_listen,
            tls_addr: args.tls_listen,
        },
        core,
        certs,
    )
    .await?;

    info!(http = %handle.http_addr, tls = ?handle.tls_addr, "tollgate running");
    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    handle.shutdown();
    Ok(())
}

/// Validate the config: schema, per-secret pattern syntax, and OpenAPI
/// source reachability are all reported; invalid patterns fail the run.
async fn cmd_check(config_path: &std::path::Path) -> anyhow::Result<()> {
    let policy = PolicyStore::load(config_path).await?;
    let hosts = policy.snapshot().await;
    println!("config: {}", config_path.display());
    println!("hosts: {}", hosts.len());

    let mut bad_patterns = 0usize;
    for (host, config) in &hosts {
        println!(
            "  {host}: {} secret(s), {} GraphQL endpoint(s)",
            config.secrets.len(),
            config.graphql_endpoints.len()
        );
        for secret in &config.secrets {
            for (kind, list) in [("grant", &secret.grants), ("rejection", &secret.rejections)] {
                for p in list {
                    if let Err(e) = pattern::validate(p) {
                        println!("    invalid {kind} pattern: {e}");
                        bad_patterns += 1;
                    }
                }
            }
        }
    }

    if bad_patterns > 0 {
        anyhow::bail!("{bad_patterns} invalid pattern(s)");
    }
    println!("ok");
    Ok(())
}
