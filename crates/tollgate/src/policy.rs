//! Grant/rejection policy store.
//!
//! In-memory mirror of the persisted config document, keyed by hostname.
//! Reads take a shared lock; mutations take the write lock, apply the
//! idempotent list append, and re-serialize the whole document to disk
//! via write-to-temp + rename so a crash never leaves a torn file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::warn;
use zeroize::Zeroizing;

use crate::error::{CoreError, Result};
use crate::pattern;
use crate::request::Headers;

/// Where a host's OpenAPI document comes from. Fetching happens at
/// startup in the binary; the store only carries the reference.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum OpenApiSource {
    #[serde(rename = "url")]
    Url(String),
    #[serde(rename = "path")]
    Path(String),
}

/// Per-origin configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostConfig {
    /// Request paths treated as GraphQL endpoints (e.g. `/graphql`).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub graphql_endpoints: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open_api_spec: Option<OpenApiSource>,

    #[serde(default)]
    pub secrets: Vec<SecretConfig>,
}

/// One fake credential and the policy attached to it.
///
/// `secret` is the fake value the guest sends; the real value is read
/// from the environment variable at forward time and never stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretConfig {
    pub secret: String,
    pub secret_env_var_name: String,
    #[serde(default)]
    pub grants: Vec<String>,
    #[serde(default)]
    pub rejections: Vec<String>,
}

/// The persisted document: hostname -> [`HostConfig`].
pub type ConfigDoc = BTreeMap<String, HostConfig>;

/// In-memory policy store with write-through persistence.
#[derive(Debug)]
pub struct PolicyStore {
    hosts: RwLock<ConfigDoc>,
    path: Option<PathBuf>,
}

impl PolicyStore {
    /// Store without a backing file; mutations stay in memory. Used in
    /// tests and for ad-hoc runs.
    #[must_use]
    pub fn in_memory(doc: ConfigDoc) -> Self {
        Self {
            hosts: RwLock::new(doc),
            path: None,
        }
    }

    /// Load the store from a JSON config file. An absent file yields an
    /// empty config.
    pub async fn load(path: &Path) -> Result<Self> {
        let doc = match tokio::fs::read_to_string(path).await {
            Ok(text) => serde_json::from_str(&text)
                .map_err(|e| CoreError::Config(format!("{}: {e}", path.display())))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => ConfigDoc::new(),
            Err(e) => return Err(CoreError::Persist(e)),
        };
        Ok(Self {
            hosts: RwLock::new(doc),
            path: Some(path.to_path_buf()),
        })
    }

    /// Snapshot of the whole document (config inspection, OpenAPI
    /// source discovery).
    pub async fn snapshot(&self) -> ConfigDoc {
        self.hosts.read().await.clone()
    }

    /// Snapshot of one host's config.
    pub async fn host_config(&self, host: &str) -> Option<HostConfig> {
        self.hosts.read().await.get(host).cloned()
    }

    /// Find the first configured secret whose fake value appears as a
    /// substring in any header value of the request.
    pub async fn find_secret_config(&self, host: &str, headers: &Headers) -> Option<SecretConfig> {
        let hosts = self.hosts.read().await;
        let config = hosts.get(host)?;
        crate::secrets::detect(&config.secrets, headers).cloned()
    }

    /// First rejection pattern matching the request key, scanning in
    /// insertion order.
    pub async fn matching_rejection(
        &self,
        host: &str,
        fake_secret: &str,
        request_key: &str,
    ) -> Option<String> {
        let hosts = self.hosts.read().await;
        let secret = secret_entry(&hosts, host, fake_secret)?;
        first_match(&secret.rejections, request_key)
    }

    /// First grant pattern matching the request key, scanning in
    /// insertion order.
    pub async fn matching_grant(
        &self,
        host: &str,
        fake_secret: &str,
        request_key: &str,
    ) -> Option<String> {
        let hosts = self.hosts.read().await;
        let secret = secret_entry(&hosts, host, fake_secret)?;
        first_match(&secret.grants, request_key)
    }

    /// Append a grant pattern. Idempotent: re-adding an existing pattern
    /// is a no-op and does not rewrite the file. Returns whether the
    /// list changed.
    pub async fn add_grant(&self, host: &str, fake_secret: &str, pattern: &str) -> Result<bool> {
        self.append(host, fake_secret, pattern, ListKind::Grants).await
    }

    /// Append a rejection pattern; same semantics as [`add_grant`].
    ///
    /// [`add_grant`]: PolicyStore::add_grant
    pub async fn add_rejection(
        &self,
        host: &str,
        fake_secret: &str,
        pattern: &str,
    ) -> Result<bool> {
        self.append(host, fake_secret, pattern, ListKind::Rejections)
            .await
    }

    /// Resolve the real credential for a secret from the process
    /// environment. Missing or empty values are a configuration gap.
    pub fn resolve_real_secret(&self, secret: &SecretConfig) -> Result<Zeroizing<String>> {
        match std::env::var(&secret.secret_env_var_name) {
            Ok(value) if !value.is_empty() => Ok(Zeroizing::new(value)),
            _ => Err(CoreError::MissingRealSecret {
                env_var: secret.secret_env_var_name.clone(),
            }),
        }
    }

    async fn append(
        &self,
        host: &str,
        fake_secret: &str,
        pattern: &str,
        kind: ListKind,
    ) -> Result<bool> {
        let mut hosts = self.hosts.write().await;
        let Some(secret) = secret_entry_mut(&mut hosts, host, fake_secret) else {
            return Err(CoreError::Config(format!(
                "no secret configured for host {host}"
            )));
        };
        let list = match kind {
            ListKind::Grants => &mut secret.grants,
            ListKind::Rejections => &mut secret.rejections,
        };
        if list.iter().any(|p| p == pattern) {
            return Ok(false);
        }
        list.push(pattern.to_string());
        self.persist(&hosts).await?;
        Ok(true)
    }

    /// Re-serialize the full document with a trailing newline, writing
    /// to a temp file in the same directory and renaming over the
    /// target.
    async fn persist(&self, doc: &ConfigDoc) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let mut text = serde_json::to_string_pretty(doc)
            .map_err(|e| CoreError::Config(format!("config serialization failed: {e}")))?;
        text.push('\n');

        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &text)
            .await
            .map_err(CoreError::Persist)?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(CoreError::Persist)
    }
}

enum ListKind {
    Grants,
    Rejections,
}

fn secret_entry<'a>(
    hosts: &'a ConfigDoc,
    host: &str,
    fake_secret: &str,
) -> Option<&'a SecretConfig> {
    hosts
        .get(host)?
        .secrets
        .iter()
        .find(|s| s.secret == fake_secret)
}

fn secret_entry_mut<'a>(
    hosts: &'a mut ConfigDoc,
    host: &str,
    fake_secret: &str,
) -> Option<&'a mut SecretConfig> {
    hosts
        .get_mut(host)?
        .secrets
        .iter_mut()
        .find(|s| s.secret == fake_secret)
}

/// First pattern in the list matching the key. A pattern that errors
/// (malformed, unknown variable) is treated as non-matching and the
/// diagnostic is logged; fail-closed matching must never turn a typo
/// into a silent grant.
fn first_match(patterns: &[String], request_key: &str) -> Option<String> {
    patterns
        .iter()
        .find(|p| match pattern::matches(p, request_key) {
            Ok(matched) => matched,
            Err(e) => {
                warn!(pattern = %p, error = %e, "skipping unusable pattern");
                false
            }
        })
        .cloned()
}
