//! TLS termination with per-hostname leaf certificates.
//!
//! The proxy impersonates upstream origins toward the guest, presenting
//! a leaf certificate for whatever SNI name the guest asks for. Minting
//! those leaves (from a locally generated CA the guest trusts) is an
//! external concern behind the [`LeafCertProvider`] seam; this module
//! only resolves and caches them per handshake.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;

use crate::error::{ProxyError, Result};

/// Source of leaf certificates, keyed by SNI hostname.
pub trait LeafCertProvider: Send + Sync {
    /// Certificate chain and signing key for `server_name`.
    fn certified_key(&self, server_name: &str) -> Result<Arc<CertifiedKey>>;
}

/// SNI resolver that caches provider results per hostname.
pub struct SniCertResolver {
    provider: Arc<dyn LeafCertProvider>,
    cache: RwLock<HashMap<String, Arc<CertifiedKey>>>,
}

impl SniCertResolver {
    #[must_use]
    pub fn new(provider: Arc<dyn LeafCertProvider>) -> Self {
        Self {
            provider,
            cache: RwLock::new(HashMap::new()),
        }
    }

    fn resolve_name(&self, name: &str) -> Option<Arc<CertifiedKey>> {
        if let Ok(cache) = self.cache.read() {
            if let Some(key) = cache.get(name) {
                return Some(Arc::clone(key));
            }
        }
        match self.provider.certified_key(name) {
            Ok(key) => {
                if let Ok(mut cache) = self.cache.write() {
                    cache.insert(name.to_string(), Arc::clone(&key));
                }
                Some(key)
            }
            Err(e) => {
                tracing::warn!(host = name, error = %e, "no leaf certificate for SNI name");
                None
            }
        }
    }
}

impl std::fmt::Debug for SniCertResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SniCertResolver").finish_non_exhaustive()
    }
}

impl ResolvesServerCert for SniCertResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        let name = client_hello.server_name()?;
        self.resolve_name(name)
    }
}

/// Server config with the SNI resolver installed. The ring provider is
/// selected explicitly to avoid ambiguity when multiple crypto providers
/// are in the dependency tree.
pub fn server_config(resolver: Arc<SniCertResolver>) -> Result<Arc<rustls::ServerConfig>> {
    let config = rustls::ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| ProxyError::Tls(format!("TLS config error: {e}")))?
    .with_no_client_auth()
    .with_cert_resolver(resolver);
    Ok(Arc::new(config))
}
