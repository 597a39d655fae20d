//! Directory-backed leaf certificate provider.
//!
//! Certificates are minted externally (a local CA the guest trusts) and
//! dropped into a directory as `<host>.pem`, each file holding the leaf
//! chain followed by a PKCS#8 private key. The provider parses on demand;
//! the proxy's SNI resolver caches per hostname.

use std::path::PathBuf;
use std::sync::Arc;

use rustls::pki_types::PrivateKeyDer;
use rustls::sign::CertifiedKey;

use tollgate_proxy::error::{ProxyError, Result};
use tollgate_proxy::LeafCertProvider;

pub struct DirCertProvider {
    dir: PathBuf,
}

impl DirCertProvider {
    #[must_use]
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }
}

impl LeafCertProvider for DirCertProvider {
    fn certified_key(&self, server_name: &str) -> Result<Arc<CertifiedKey>> {
        // SNI names come off the wire; never let one traverse out of the
        // certificate directory.
        if server_name.contains('/') || server_name.contains('\\') || server_name.contains("..") {
            return Err(ProxyError::Certificate {
                host: server_name.to_string(),
                reason: "invalid characters in server name".to_string(),
            });
        }

        let path = self.dir.join(format!("{server_name}.pem"));
        let pem = std::fs::read(&path).map_err(|e| ProxyError::Certificate {
            host: server_name.to_string(),
            reason: format!("{}: {e}", path.display()),
        })?;

        let mut chain = Vec::new();
        let mut key: Option<PrivateKeyDer<'static>> = None;
        for item in rustls_pemfile::read_all(&mut pem.as_slice()) {
            match item.map_err(|e| ProxyError::Certificate {
                host: server_name.to_string(),
                reason: format!("PEM parse error: {e}"),
            })? {
                rustls_pemfile::Item::X509Certificate(cert) => chain.push(cert),
                rustls_pemfile::Item::Pkcs8Key(k) => key = Some(PrivateKeyDer::Pkcs8(k)),
                rustls_pemfile::Item::Sec1Key(k) => key = Some(PrivateKeyDer::Sec1(k)),
                rustls_pemfile::Item::Pkcs1Key(k) => key = Some(PrivateKeyDer::Pkcs1(k)),
                _ => {}
            }
        }

        let key = key.ok_or_else(|| ProxyError::Certificate {
            host: server_name.to_string(),
            reason: "no private key in PEM file".to_string(),
        })?;
        if chain.is_empty() {
            return Err(ProxyError::Certificate {
                host: server_name.to_string(),
                reason: "no certificates in PEM file".to_string(),
            });
        }

        let signing_key = rustls::crypto::ring::sign::any_supported_type(&key).map_err(|e| {
            ProxyError::Certificate {
                host: server_name.to_string(),
                reason: format!("unsupported key type: {e}"),
            }
        })?;
        Ok(Arc::new(CertifiedKey::new(chain, signing_key)))
    }
}
