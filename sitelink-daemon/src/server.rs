//! Accept loop for the redemption endpoint.
//!
//! One task per connection. With TLS configured every connection must
//! finish its handshake within [`TLS_HANDSHAKE_TIMEOUT`]; the certificate
//! files are checked for rotation every [`TLS_RELOAD_INTERVAL`].

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::services::RedemptionService;
use crate::tls::ReloadableTlsAcceptor;

/// Handshake deadline for slow or stalled clients.
pub const TLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
pub const TLS_RELOAD_INTERVAL: Duration = Duration::from_secs(30);

/// Serve redemptions on `listener` until `shutdown` fires.
///
/// Plain HTTP when `tls` is `None`.
pub async fn serve(
    listener: TcpListener,
    service: RedemptionService,
    tls: Option<Arc<ReloadableTlsAcceptor>>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut reload = tokio::time::interval(TLS_RELOAD_INTERVAL);
    reload.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            _ = shutdown.recv() => {
                tracing::info!("Shutdown signal received, stopping redemption accept loop");
                break;
            }

            _ = reload.tick(), if tls.is_some() => {
                if let Some(acceptor) = &tls {
                    if let Err(e) = acceptor.reload_if_changed() {
                        tracing::error!(error = %e, "TLS reload failed, keeping previous config");
                    }
                }
            }

            result = listener.accept() => {
                let (tcp_stream, peer_addr) = match result {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        tracing::warn!(error = %e, "TCP accept failed");
                        continue;
                    }
                };
                let service = service.clone();

                match &tls {
                    Some(acceptor) => {
                        let acceptor = Arc::clone(&*acceptor.current());
                        tokio::spawn(async move {
                            match tokio::time::timeout(TLS_HANDSHAKE_TIMEOUT, acceptor.accept(tcp_stream)).await {
                                Ok(Ok(tls_stream)) => {
                                    tracing::debug!(peer = %peer_addr, "TLS handshake successful");
                                    serve_connection(tls_stream, service, peer_addr).await;
                                }
                                Ok(Err(e)) => {
                                    tracing::warn!(peer = %peer_addr, error = %e, "TLS handshake failed");
                                }
                                Err(_) => {
                                    tracing::warn!(peer = %peer_addr, timeout_secs = ?TLS_HANDSHAKE_TIMEOUT, "TLS handshake timed out");
                                }
                            }
                        });
                    }
                    None => {
                        tokio::spawn(serve_connection(tcp_stream, service, peer_addr));
                    }
                }
            }
        }
    }
}

async fn serve_connection<S>(stream: S, service: RedemptionService, peer_addr: SocketAddr)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let handler = service_fn(move |req: Request<Incoming>| {
        let service = service.clone();
        async move { Ok::<_, Infallible>(service.handle(req).await) }
    });

    if let Err(e) = http1::Builder::new()
        .serve_connection(TokioIo::new(stream), handler)
        .await
    {
        tracing::debug!(peer = %peer_addr, error = %e, "Connection closed with error");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::{GeneratorError, TokenGenerator};
    use crate::registry::Registry;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use sitelink_core::CredentialBundle;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    struct Unused;

    #[async_trait]
    impl TokenGenerator for Unused {
        async fn generate(
            &self,
            _: &str,
            _: &str,
            _: &str,
        ) -> Result<CredentialBundle, GeneratorError> {
            unreachable!()
        }
    }

    #[tokio::test]
    async fn answers_plain_http_and_stops_on_shutdown() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let registry = Arc::new(Registry::new(Arc::new(MemoryStore::new())));
        let service = RedemptionService::new(registry, Arc::new(Unused));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let server = tokio::spawn(serve(listener, service, None, shutdown_rx));

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /x HTTP/1.1\r\nhost: localhost\r\nconnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 405"));
        assert!(response.ends_with("Only POST is supported"));

        shutdown_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap();
    }
}
