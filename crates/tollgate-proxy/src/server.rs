//! Listener setup, connection dispatch, and lifecycle.
//!
//! `start` binds the plaintext and (when a certificate provider is
//! given) TLS listeners, spawns their accept loops, and returns a handle
//! with the bound addresses and a shutdown channel. Each accepted
//! connection becomes one task that reads a single request, runs it
//! through the mediation core while watching for client disconnect, and
//! writes either the upstream response or the core's denial.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tollgate::mediate::{mediate, CoreContext, Disposition};
use tollgate::{NormalizedRequest, Scheme};

use crate::error::{ProxyError, Result};
use crate::http::{self, ReadOutcome};
use crate::tls::{self, LeafCertProvider, SniCertResolver};
use crate::upstream::UpstreamClient;

/// Listener configuration. Port 0 binds an OS-assigned port (tests).
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub http_addr: SocketAddr,
    pub tls_addr: SocketAddr,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], 80).into(),
            tls_addr: ([0, 0, 0, 0], 443).into(),
        }
    }
}

/// Handle returned when the proxy starts. Send to `shutdown` to stop
/// both accept loops.
pub struct ProxyHandle {
    pub http_addr: SocketAddr,
    /// Absent when no certificate provider was configured.
    pub tls_addr: Option<SocketAddr>,
    shutdown_tx: watch::Sender<bool>,
}

impl ProxyHandle {
    /// Signal both listeners to stop accepting. In-flight requests run
    /// to completion on their own tasks.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

struct SharedState {
    core: CoreContext,
    upstream: UpstreamClient,
}

/// Start the proxy listeners.
pub async fn start(
    config: ProxyConfig,
    core: CoreContext,
    certs: Option<Arc<dyn LeafCertProvider>>,
) -> Result<ProxyHandle> {
    let state = Arc::new(SharedState {
        core,
        upstream: UpstreamClient::new()?,
    });
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let http_listener = bind(config.http_addr).await?;
    let http_addr = http_listener.local_addr().map_err(|e| ProxyError::Bind {
        addr: config.http_addr.to_string(),
        source: e,
    })?;
    info!(addr = %http_addr, "plaintext listener bound");
    tokio::spawn(accept_plain(
        http_listener,
        Arc::clone(&state),
        shutdown_rx.clone(),
    ));

    let tls_addr = match certs {
        Some(provider) => {
            let listener = bind(config.tls_addr).await?;
            let addr = listener.local_addr().map_err(|e| ProxyError::Bind {
                addr: config.tls_addr.to_string(),
                source: e,
            })?;
            let resolver = Arc::new(SniCertResolver::new(provider));
            let acceptor = TlsAcceptor::from(tls::server_config(resolver)?);
            info!(addr = %addr, "TLS listener bound");
            tokio::spawn(accept_tls(listener, acceptor, state, shutdown_rx));
            Some(addr)
        }
        None => {
            info!("no certificate provider; TLS listener disabled");
            None
        }
    };

    Ok(ProxyHandle {
        http_addr,
        tls_addr,
        shutdown_tx,
    })
}

async fn bind(addr: SocketAddr) -> Result<TcpListener> {
    TcpListener::bind(addr).await.map_err(|e| ProxyError::Bind {
        addr: addr.to_string(),
        source: e,
    })
}

async fn accept_plain(
    listener: TcpListener,
    state: Arc<SharedState>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            result = listener.accept() => match result {
                Ok((stream, peer)) => {
                    debug!(peer = %peer, "accepted plaintext connection");
                    let state = Arc::clone(&state);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, Scheme::Http, None, state).await {
                            debug!(peer = %peer, error = %e, "connection handler error");
                        }
                    });
                }
                Err(e) => warn!(error = %e, "accept error"),
            },
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    info!("plaintext listener shutting down");
                    return;
                }
            }
        }
    }
}

async fn accept_tls(
    listener: TcpListener,
    acceptor: TlsAcceptor,
    state: Arc<SharedState>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            result = listener.accept() => match result {
                Ok((stream, peer)) => {
                    debug!(peer = %peer, "accepted TLS connection");
                    let acceptor = acceptor.clone();
                    let state = Arc::clone(&state);
                    tokio::spawn(async move {
                        let tls_stream = match acceptor.accept(stream).await {
                            Ok(s) => s,
                            Err(e) => {
                                debug!(peer = %peer, error = %e, "TLS handshake failed");
                                return;
                            }
                        };
                        let sni = tls_stream
                            .get_ref()
                            .1
                            .server_name()
                            .map(str::to_string);
                        if let Err(e) =
                            handle_connection(tls_stream, Scheme::Https, sni, state).await
                        {
                            debug!(peer = %peer, error = %e, "connection handler error");
                        }
                    });
                }
                Err(e) => warn!(error = %e, "accept error"),
            },
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    info!("TLS listener shutting down");
                    return;
                }
            }
        }
    }
}

/// Handle one connection: read a request, mediate it racing a client
/// disconnect probe, then forward or answer.
async fn handle_connection<S>(
    mut stream: S,
    scheme: Scheme,
    sni: Option<String>,
    state: Arc<SharedState>,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let parsed = match http::read_request(&mut stream).await? {
        ReadOutcome::Request(parsed) => parsed,
        ReadOutcome::Reject { status, reason } => {
            http::write_simple_response(&mut stream, status, &reason).await?;
            return Ok(());
        }
        ReadOutcome::Closed => return Ok(()),
    };

    // Absolute-form targets (env-proxy clients) carry the host in the
    // URL; origin-form requests carry it in Host, with SNI as fallback.
    let (host, target) = match http::split_absolute_target(&parsed.target) {
        Some((host, target)) => (Some(host), target),
        None => (
            http::header_value(&parsed.headers, "host")
                .map(str::to_string)
                .or(sni),
            parsed.target.clone(),
        ),
    };
    let Some(host) = host else {
        http::write_simple_response(&mut stream, 400, "missing host").await?;
        return Ok(());
    };

    let body = match parsed.method.as_str() {
        "GET" | "HEAD" => None,
        _ => parsed.body,
    };
    let request = NormalizedRequest {
        scheme,
        host,
        method: parsed.method,
        target,
        headers: parsed.headers,
        body,
    };

    let cancel = CancellationToken::new();
    let mediation = mediate(&state.core, request, cancel.clone());
    tokio::pin!(mediation);

    let disposition = tokio::select! {
        disposition = &mut mediation => disposition,
        _ = client_closed(&mut stream) => {
            cancel.cancel();
            debug!("client disconnected during mediation");
            return Ok(());
        }
    };

    match disposition {
        Disposition::Forward(forward) => {
            match state.upstream.forward(&mut stream, &forward).await {
                Ok(status) => debug!(status = status, "upstream response streamed"),
                Err(e) => {
                    warn!(host = %forward.host, error = %e, "upstream failure");
                    http::write_simple_response(&mut stream, 502, &format!("upstream error: {e}"))
                        .await?;
                }
            }
        }
        Disposition::Respond(denial) => {
            http::write_simple_response(&mut stream, denial.status(), &denial.body()).await?;
        }
    }
    Ok(())
}

/// Resolves when the peer closes or errors. Any stray bytes the client
/// sends before the response (HTTP/1.1 pipelining, which this proxy does
/// not support) are discarded.
async fn client_closed<S>(stream: &mut S)
where
    S: AsyncRead + Unpin,
{
    let mut buf = [0u8; 64];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
    }
}
