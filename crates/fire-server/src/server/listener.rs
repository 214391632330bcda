//! TLS accept loop.
//!
//! For each incoming TCP connection the listener:
//! 1. Completes the TLS handshake, bounded by the connection timeout.
//! 2. Serves HTTP/1.1 or HTTP/2 (chosen by ALPN / connection preface) with the
//!    router, waiting at most the connection timeout for request headers.
//! 3. Shuts the connection down gracefully once it has had no request in
//!    flight for the connection timeout. HTTP/2 connections are also pinged at
//!    that interval so dead peers are noticed.
//! 4. On shutdown, stops accepting and lets open connections finish their
//!    in-flight requests.

use std::{future::Future, io, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use axum::{extract::Request, Router};
use hyper::body::Incoming;
use hyper_util::{
    rt::{TokioExecutor, TokioIo, TokioTimer},
    server::conn::auto,
};
use rustls::ServerConfig;
use tokio::{net::TcpListener, sync::watch};
use tokio_rustls::TlsAcceptor;
use tower::Service;
use tracing::{debug, error, info, warn};

/// A bound TCP socket paired with the TLS configuration to serve on it.
pub struct Listener {
    tcp: TcpListener,
    acceptor: TlsAcceptor,
    connection_timeout: Duration,
}

/// Bind `addr` without accepting yet.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot be bound.
pub async fn bind(
    addr: SocketAddr,
    tls: Arc<ServerConfig>,
    connection_timeout: Duration,
) -> Result<Listener> {
    let tcp = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind TLS listener on {addr}"))?;
    Ok(Listener {
        tcp,
        acceptor: TlsAcceptor::from(tls),
        connection_timeout,
    })
}

impl Listener {
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.tcp.local_addr()
    }

    /// Accept and serve connections until `shutdown` resolves, then wait for
    /// open connections to close.
    pub async fn serve<F>(self, router: Router, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let mut builder = auto::Builder::new(TokioExecutor::new());
        builder
            .http1()
            .timer(TokioTimer::new())
            .header_read_timeout(self.connection_timeout);
        builder
            .http2()
            .timer(TokioTimer::new())
            .keep_alive_interval(self.connection_timeout)
            .keep_alive_timeout(self.connection_timeout);
        let builder = Arc::new(builder);

        // Dropping the sender tells connections to shut down gracefully; every
        // connection task holds a `close_rx` clone until it is done.
        let (signal_tx, signal_rx) = watch::channel(());
        let (close_tx, close_rx) = watch::channel(());

        tokio::pin!(shutdown);
        loop {
            let (stream, peer_addr) = tokio::select! {
                accepted = self.tcp.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!(error = %e, "accept error");
                        continue;
                    }
                },
                () = &mut shutdown => {
                    info!("shutdown signal received, no longer accepting connections");
                    break;
                }
            };
            debug!(%peer_addr, "accepted TCP connection");

            let acceptor = self.acceptor.clone();
            let builder = builder.clone();
            let router = router.clone();
            let timeout = self.connection_timeout;
            let mut signal_rx = signal_rx.clone();
            let close_rx = close_rx.clone();

            tokio::spawn(async move {
                let tls = match tokio::time::timeout(timeout, acceptor.accept(stream)).await {
                    Ok(Ok(tls)) => tls,
                    Ok(Err(e)) => {
                        debug!(%peer_addr, error = %e, "TLS handshake failed");
                        return;
                    }
                    Err(_) => {
                        debug!(%peer_addr, "TLS handshake timed out");
                        return;
                    }
                };

                let (in_flight_tx, in_flight_rx) = watch::channel(0usize);
                let in_flight_tx = Arc::new(in_flight_tx);
                let service = hyper::service::service_fn(move |req: Request<Incoming>| {
                    let guard = InFlight::enter(in_flight_tx.clone());
                    let response = router.clone().call(req);
                    async move {
                        let response = response.await;
                        drop(guard);
                        response
                    }
                });
                let conn = builder.serve_connection_with_upgrades(TokioIo::new(tls), service);
                tokio::pin!(conn);

                let result = tokio::select! {
                    res = conn.as_mut() => res,
                    _ = signal_rx.changed() => {
                        conn.as_mut().graceful_shutdown();
                        conn.as_mut().await
                    }
                    () = idle_for(in_flight_rx, timeout) => {
                        debug!(%peer_addr, "closing idle connection");
                        conn.as_mut().graceful_shutdown();
                        conn.as_mut().await
                    }
                };
                if let Err(e) = result {
                    warn!(%peer_addr, error = %e, "connection error");
                }
                drop(close_rx);
            });
        }

        drop(self.tcp);
        drop(signal_rx);
        drop(close_rx);
        drop(signal_tx);

        debug!(open = close_tx.receiver_count(), "waiting for open connections");
        close_tx.closed().await;
        Ok(())
    }
}

/// Counts one request as in flight on a connection until dropped.
struct InFlight(Arc<watch::Sender<usize>>);

impl InFlight {
    fn enter(counter: Arc<watch::Sender<usize>>) -> Self {
        counter.send_modify(|n| *n += 1);
        Self(counter)
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.send_modify(|n| *n = n.saturating_sub(1));
    }
}

/// Resolves once the in-flight count has stayed at zero for `timeout`.
async fn idle_for(mut in_flight: watch::Receiver<usize>, timeout: Duration) {
    loop {
        let busy = *in_flight.borrow_and_update() > 0;
        let changed = if busy {
            Ok(in_flight.changed().await)
        } else {
            tokio::time::timeout(timeout, in_flight.changed()).await
        };
        match changed {
            Ok(Ok(())) => continue,
            Err(_) => return,
            // The connection owns the sender; it is gone only once the
            // connection is, so there is nothing left to watch.
            Ok(Err(_)) => std::future::pending::<()>().await,
        }
    }
}

/// Resolves on Ctrl-C or, on Unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
