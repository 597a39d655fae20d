//! Command-line interface definition.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "tollgate",
    about = "TLS-terminating proxy that swaps fake credentials for real ones after interactive approval",
    version
)]
pub struct Cli {
    /// Path to the policy config document.
    #[arg(long, global = true, default_value = "tollgate.json")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the proxy.
    Run(RunArgs),
    /// Parse and validate the config document, then exit.
    Check,
}

#[derive(clap::Args)]
pub struct RunArgs {
    /// Plaintext HTTP listener address.
    #[arg(long, default_value = "0.0.0.0:80")]
    pub http_listen: SocketAddr,

    /// TLS listener address (requires --cert-dir).
    #[arg(long, default_value = "0.0.0.0:443")]
    pub tls_listen: SocketAddr,

    /// Directory of pre-minted leaf certificates, one `<host>.pem` per
    /// hostname (leaf chain + PKCS#8 key). Without it the TLS listener
    /// is disabled.
    #[arg(long)]
    pub cert_dir: Option<PathBuf>,

    /// Seconds an approval prompt waits before counting as rejected.
    #[arg(long, default_value_t = 240)]
    pub approval_timeout_secs: u64,
}
