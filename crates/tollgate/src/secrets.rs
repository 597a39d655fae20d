//! Fake-secret detection and rewriting.
//!
//! Detection is a plain substring scan over header values: the fake
//! credential only exists to be found, so there is no timing concern and
//! no parsing of auth schemes. Rewriting produces a new header list with
//! every occurrence of the fake replaced by the real value and the
//! `Host` header dropped (the upstream URL carries the host).

use crate::policy::SecretConfig;
use crate::request::Headers;

/// First configured secret whose fake value appears in any header value.
#[must_use]
pub fn detect<'a>(secrets: &'a [SecretConfig], headers: &Headers) -> Option<&'a SecretConfig> {
    secrets.iter().find(|s| contains_fake(headers, &s.secret))
}

/// Whether any header value contains the fake secret as a substring.
/// An empty fake never matches (it would match everything).
#[must_use]
pub fn contains_fake(headers: &Headers, fake: &str) -> bool {
    !fake.is_empty() && headers.iter().any(|(_, value)| value.contains(fake))
}

/// New header list with every occurrence of `fake` replaced by `real`
/// and the `Host` header removed. Names and ordering are preserved.
#[must_use]
pub fn rewrite_headers(headers: &Headers, fake: &str, real: &str) -> Headers {
    headers
        .iter()
        .filter(|(name, _)| !name.eq_ignore_ascii_case("host"))
        .map(|(name, value)| (name.clone(), value.replace(fake, real)))
        .collect()
}

/// New header list with only the `Host` header removed, for requests
/// forwarded without mediation.
#[must_use]
pub fn strip_host(headers: &Headers) -> Headers {
    headers
        .iter()
        .filter(|(name, _)| !name.eq_ignore_ascii_case("host"))
        .cloned()
        .collect()
}
