//! Listener supervision loop.
//!
//! One accept loop per listening socket. Accepted connections are dispatched
//! to their handler on a fresh task so the acceptor never blocks on handler
//! execution; accept failures (fd exhaustion, transient OS errors) are logged
//! and retried after a fixed pause instead of terminating the loop. Bind
//! failures are fatal and happen before the loop ever starts.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn, Instrument};

/// Pause after a failed accept before retrying.
///
/// Undifferentiated between recoverable and terminal accept errors: these
/// proxies run as permanent daemons and retry forever.
pub const ACCEPT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Source of inbound connections for [`supervise`].
///
/// `TcpListener` is the only production implementation; the seam exists so
/// accept failures can be driven deterministically.
pub trait Acceptor {
    fn local_addr(&self) -> io::Result<SocketAddr>;

    fn accept(&mut self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send;
}

impl Acceptor for TcpListener {
    fn local_addr(&self) -> io::Result<SocketAddr> {
        TcpListener::local_addr(self)
    }

    fn accept(&mut self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send {
        TcpListener::accept(self)
    }
}

/// Accept connections on `listener` forever, dispatching each to `handler`.
///
/// Handler errors are per-connection: logged and discarded, never fatal to
/// the loop. The loop has no normal termination condition; it runs until the
/// process exits.
pub async fn supervise<L, H, Fut>(
    mut listener: L,
    service: &'static str,
    handler: H,
) -> io::Result<()>
where
    L: Acceptor + Send,
    H: Fn(TcpStream, SocketAddr) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    let local_addr = listener.local_addr()?;
    info!(service, bind_addr = %local_addr, "listener started");

    let handler = Arc::new(handler);
    loop {
        match listener.accept().await {
            Ok((stream, peer_addr)) => {
                let handler = Arc::clone(&handler);
                tokio::spawn(
                    async move {
                        if let Err(e) = handler(stream, peer_addr).await {
                            warn!(error = format!("{e:#}"), "connection error");
                        }
                    }
                    .instrument(tracing::info_span!("connection", service, peer = %peer_addr)),
                );
            }
            Err(e) => {
                warn!(service, error = %e, "accept failed, retrying");
                tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
            }
        }
    }
}
