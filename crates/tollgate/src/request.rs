//! Normalized request representation shared between the proxy layer and
//! the mediation core.
//!
//! Headers are kept as an ordered list of `(name, value)` pairs so a
//! pass-through request can be forwarded with its original header order
//! and casing intact.

/// Ordered request headers. Names keep their original casing; lookups are
/// case-insensitive.
pub type Headers = Vec<(String, String)>;

/// Scheme the client used to reach the proxy, which is also the scheme
/// used toward the upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

/// A fully-read inbound request, decoupled from the wire.
///
/// `target` is the origin-form request target as received (path plus
/// optional query string). The body is buffered only for methods that
/// carry one.
#[derive(Debug, Clone)]
pub struct NormalizedRequest {
    pub scheme: Scheme,
    /// Host the guest addressed, from the `Host` header or SNI.
    pub host: String,
    pub method: String,
    /// Path with optional query string, e.g. `/repos/acme/widget?page=2`.
    pub target: String,
    pub headers: Headers,
    /// Buffered body for non-GET/HEAD requests, `None` otherwise.
    pub body: Option<Vec<u8>>,
}

impl NormalizedRequest {
    /// Path portion of the target, without the query string.
    #[must_use]
    pub fn path(&self) -> &str {
        match self.target.split_once('?') {
            Some((path, _)) => path,
            None => &self.target,
        }
    }

    /// Query string portion of the target, if any.
    #[must_use]
    pub fn query(&self) -> Option<&str> {
        self.target.split_once('?').map(|(_, q)| q)
    }

    /// Canonical HTTP request key: `METHOD <path-without-query>`.
    #[must_use]
    pub fn request_key(&self) -> String {
        format!("{} {}", self.method, self.path())
    }

    /// First header value with the given name, case-insensitively.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}
