//! Upstream client: forward a mediated request and stream the response
//! back verbatim.
//!
//! Responses are never decompressed, buffered, or inspected - bytes flow
//! straight from the origin to the guest so SSE and chunked transfers
//! work unchanged. Nothing is retried: idempotency is unknown and the
//! operator is in the loop, so failures escalate as 502s.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::debug;

use tollgate::{NormalizedRequest, Scheme};

use crate::error::{ProxyError, Result};

/// Timeout for the upstream TCP connect.
const UPSTREAM_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared upstream client. The TLS connector is built once at startup;
/// rebuilding the root store per request would dominate small calls.
pub struct UpstreamClient {
    tls: TlsConnector,
}

impl UpstreamClient {
    pub fn new() -> Result<Self> {
        let mut roots = rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let config = rustls::ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .map_err(|e| ProxyError::Tls(format!("TLS config error: {e}")))?
        .with_root_certificates(roots)
        .with_no_client_auth();
        Ok(Self {
            tls: TlsConnector::from(Arc::new(config)),
        })
    }

    /// Forward `request` to its origin and copy the response to `client`
    /// until the origin closes. Returns the upstream status code.
    pub async fn forward<S>(&self, client: &mut S, request: &NormalizedRequest) -> Result<u16>
    where
        S: AsyncWrite + Unpin,
    {
        let (host, port) = host_and_port(request);
        let head = request_head(request);
        debug!(host = %host, port = port, method = %request.method, "forwarding upstream");

        let tcp = connect_tcp(&host, port).await?;
        match request.scheme {
            Scheme::Https => {
                let server_name = rustls::pki_types::ServerName::try_from(host.clone())
                    .map_err(|_| ProxyError::UpstreamConnect {
                        host: host.clone(),
                        reason: "invalid server name for TLS".to_string(),
                    })?;
                let mut stream = self.tls.connect(server_name, tcp).await.map_err(|e| {
                    ProxyError::UpstreamConnect {
                        host: host.clone(),
                        reason: format!("TLS handshake failed: {e}"),
                    }
                })?;
                exchange(&mut stream, client, &head, request.body.as_deref()).await
            }
            Scheme::Http => {
                let mut stream = tcp;
                exchange(&mut stream, client, &head, request.body.as_deref()).await
            }
        }
    }
}

/// Serialize the request head. The core already stripped the `Host`
/// header; hop-by-hop connection headers are replaced with a close so
/// the response copy loop terminates.
fn request_head(request: &NormalizedRequest) -> String {
    let mut head = format!(
        "{} {} HTTP/1.1\r\nHost: {}\r\n",
        request.method, request.target, request.host
    );
    for (name, value) in &request.headers {
        if name.eq_ignore_ascii_case("host")
            || name.eq_ignore_ascii_case("connection")
            || name.eq_ignore_ascii_case("proxy-connection")
        {
            continue;
        }
        head.push_str(name);
        head.push_str(": ");
        head.push_str(value);
        head.push_str("\r\n");
    }
    head.push_str("Connection: close\r\n\r\n");
    head
}

fn host_and_port(request: &NormalizedRequest) -> (String, u16) {
    let default_port = match request.scheme {
        Scheme::Https => 443,
        Scheme::Http => 80,
    };
    match request.host.rsplit_once(':') {
        Some((host, port)) => match port.parse() {
            Ok(port) => (host.to_string(), port),
            Err(_) => (request.host.clone(), default_port),
        },
        None => (request.host.clone(), default_port),
    }
}

async fn connect_tcp(host: &str, port: u16) -> Result<TcpStream> {
    let addr = format!("{host}:{port}");
    match tokio::time::timeout(UPSTREAM_CONNECT_TIMEOUT, TcpStream::connect(&addr)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(ProxyError::UpstreamConnect {
            host: host.to_string(),
            reason: e.to_string(),
        }),
        Err(_) => Err(ProxyError::UpstreamConnect {
            host: host.to_string(),
            reason: "connection timed out".to_string(),
        }),
    }
}

/// Write the request, then stream the response until EOF. The status is
/// parsed out of the first chunk for the audit trail only.
async fn exchange<U, C>(
    upstream: &mut U,
    client: &mut C,
    head: &str,
    body: Option<&[u8]>,
) -> Result<u16>
where
    U: AsyncRead + AsyncWrite + Unpin,
    C: AsyncWrite + Unpin,
{
    upstream.write_all(head.as_bytes()).await?;
    if let Some(body) = body {
        upstream.write_all(body).await?;
    }
    upstream.flush().await?;

    let mut buf = [0u8; 8192];
    let mut status: u16 = 502;
    let mut first_chunk = true;
    loop {
        let n = match upstream.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                debug!(error = %e, "upstream read error");
                break;
            }
        };
        if first_chunk {
            status = parse_response_status(&buf[..n]);
            first_chunk = false;
        }
        client.write_all(&buf[..n]).await?;
        client.flush().await?;
    }
    Ok(status)
}

/// Status code from the first response chunk, 502 when the origin sent
/// garbage or nothing.
fn parse_response_status(data: &[u8]) -> u16 {
    let line_end = data
        .iter()
        .position(|&b| b == b'\r' || b == b'\n')
        .unwrap_or(data.len());
    let first_line = &data[..line_end.min(64)];

    if let Ok(line) = std::str::from_utf8(first_line) {
        let mut parts = line.split_whitespace();
        if parts.next().is_some_and(|v| v.starts_with("HTTP/")) {
            if let Some(code) = parts.next() {
                if code.len() == 3 {
                    return code.parse().unwrap_or(502);
                }
            }
        }
    }
    502
}
