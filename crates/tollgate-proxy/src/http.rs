//! HTTP/1.1 request reading and response writing.
//!
//! The reader consumes exactly one request per connection: request line,
//! headers up to a size cap, and a Content-Length body buffered fully
//! for methods that carry one. Responses always close the connection;
//! the target workloads (API SDKs behind a proxy) reconnect per request.

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use tollgate::Headers;

/// Maximum total size of request headers (64 KiB).
pub const MAX_HEADER_SIZE: usize = 64 * 1024;

/// Maximum buffered request body size (16 MiB).
pub const MAX_REQUEST_BODY: usize = 16 * 1024 * 1024;

/// A fully-read request, still wire-shaped.
#[derive(Debug)]
pub struct ParsedRequest {
    pub method: String,
    /// Request target as received. Origin-form (`/path?query`) or, for
    /// clients configured with an `http_proxy` URL, absolute-form.
    pub target: String,
    pub headers: Headers,
    pub body: Option<Vec<u8>>,
}

/// Outcome of reading one request from a connection.
#[derive(Debug)]
pub enum ReadOutcome {
    Request(ParsedRequest),
    /// Protocol-level rejection to answer immediately.
    Reject { status: u16, reason: String },
    /// Connection closed before a request line arrived.
    Closed,
}

/// Read a single HTTP/1.1 request.
///
/// The body is read through the same buffered reader so bytes the reader
/// pulled ahead of the headers are never lost.
pub async fn read_request<S>(stream: &mut S) -> std::io::Result<ReadOutcome>
where
    S: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);

    let mut request_line = String::new();
    let n = reader.read_line(&mut request_line).await?;
    if n == 0 {
        return Ok(ReadOutcome::Closed);
    }
    let request_line = request_line.trim_end();

    let mut parts = request_line.split_whitespace();
    let (method, target) = match (parts.next(), parts.next(), parts.next()) {
        (Some(method), Some(target), Some(version)) if version.starts_with("HTTP/") => {
            (method.to_string(), target.to_string())
        }
        _ => {
            return Ok(ReadOutcome::Reject {
                status: 400,
                reason: "malformed request line".to_string(),
            });
        }
    };

    // Headers, capped to prevent OOM from unbounded header data.
    let mut headers: Headers = Vec::new();
    let mut header_bytes = 0usize;
    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line).await?;
        if n == 0 || line.trim().is_empty() {
            break;
        }
        header_bytes += n;
        if header_bytes > MAX_HEADER_SIZE {
            return Ok(ReadOutcome::Reject {
                status: 431,
                reason: "request header fields too large".to_string(),
            });
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }
    }

    if header_value(&headers, "transfer-encoding")
        .is_some_and(|v| !v.eq_ignore_ascii_case("identity"))
    {
        return Ok(ReadOutcome::Reject {
            status: 411,
            reason: "length required".to_string(),
        });
    }

    let content_length = match header_value(&headers, "content-length") {
        Some(value) => match value.parse::<usize>() {
            Ok(len) => Some(len),
            Err(_) => {
                return Ok(ReadOutcome::Reject {
                    status: 400,
                    reason: "invalid content-length".to_string(),
                });
            }
        },
        None => None,
    };

    let body = match content_length {
        Some(len) if len > 0 => {
            if len > MAX_REQUEST_BODY {
                return Ok(ReadOutcome::Reject {
                    status: 413,
                    reason: "payload too large".to_string(),
                });
            }
            let mut buf = vec![0u8; len];
            reader.read_exact(&mut buf).await?;
            Some(buf)
        }
        _ => None,
    };

    Ok(ReadOutcome::Request(ParsedRequest {
        method,
        target,
        headers,
        body,
    }))
}

/// First header value by case-insensitive name.
#[must_use]
pub fn header_value<'a>(headers: &'a Headers, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Split an absolute-form target (`http://host[:port]/path`) into the
/// host and the origin-form remainder. Returns `None` for origin-form
/// targets.
#[must_use]
pub fn split_absolute_target(target: &str) -> Option<(String, String)> {
    let rest = target
        .strip_prefix("http://")
        .or_else(|| target.strip_prefix("https://"))?;
    match rest.find('/') {
        Some(pos) => Some((rest[..pos].to_string(), rest[pos..].to_string())),
        None => Some((rest.to_string(), "/".to_string())),
    }
}

/// Write a minimal text response and close.
pub async fn write_simple_response<S>(
    stream: &mut S,
    status: u16,
    body: &str,
) -> std::io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        status_reason(status),
        body.len(),
        body
    );
    stream.write_all(response.as_bytes()).await?;
    stream.flush().await
}

fn status_reason(status: u16) -> &'static str {
    match status {
        400 => "Bad Request",
        403 => "Forbidden",
        411 => "Length Required",
        413 => "Payload Too Large",
        431 => "Request Header Fields Too Large",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        _ => "Error",
    }
}
