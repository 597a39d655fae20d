//! Network layer for the tollgate mediating proxy.
//!
//! Two listeners front the mediation core:
//!
//! 1. **Plaintext HTTP** (typically port 80) - the guest reaches the
//!    proxy directly, origin-form requests with a `Host` header.
//! 2. **TLS with SNI** (typically port 443) - the proxy terminates TLS
//!    with a per-hostname leaf certificate resolved through the
//!    [`LeafCertProvider`] seam; certificate minting is external.
//!
//! Each connection is one task: read a full request, hand it to
//! [`tollgate::mediate`] while watching for client disconnect, then
//! either stream the upstream response back verbatim or answer with the
//! denial the core produced.

pub mod error;
pub mod http;
pub mod server;
pub mod tls;
pub mod upstream;

pub use error::{ProxyError, Result};
pub use server::{start, ProxyConfig, ProxyHandle};
pub use tls::LeafCertProvider;
