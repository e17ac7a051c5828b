//! RTMP relay service.
//!
//! The relay collaborator is constructed from the parsed playback URL
//! (upstream host:port, application name, canonical URL, query string) and
//! exposes a per-connection `serve` entry point that blocks for the
//! connection's lifetime. The built-in collaborator relays the byte stream
//! to the upstream server without touching the chunk stream; the `serve`
//! seam is where a protocol-aware session would slot in.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info};

use crate::config::{RtmpConfig, RtmpTarget};
use crate::proxy::{self, connect_and_relay};
use crate::supervisor::Supervisor;

/// RTMP relay collaborator.
pub struct RtmpRelay {
    target: RtmpTarget,
}

impl RtmpRelay {
    pub fn new(target: RtmpTarget) -> Self {
        Self { target }
    }

    /// The canonical playback URL this relay fronts.
    pub fn canonical_url(&self) -> &str {
        &self.target.canonical_url
    }

    /// Serve one client connection; blocks until the session ends and
    /// returns an error on relay failure.
    pub async fn serve(&self, client: TcpStream) -> Result<()> {
        // Dial failure closes the client and is logged by the helper.
        let Some(stats) = connect_and_relay(client, &self.target.upstream)
            .await
            .with_context(|| format!("rtmp: relay to {} failed", self.target.upstream))?
        else {
            return Ok(());
        };
        debug!(
            app = %self.target.app,
            bytes_published = stats.a_to_b,
            bytes_played = stats.b_to_a,
            "rtmp session ended"
        );
        Ok(())
    }
}

/// Launch the RTMP relay; returns the bound address. Bind failure is fatal
/// to the process.
pub async fn launch(
    config: &RtmpConfig,
    bind: Ipv4Addr,
    supervisor: &mut Supervisor,
) -> Result<SocketAddr> {
    let requested = SocketAddr::from((bind, config.port));
    let listener = TcpListener::bind(requested)
        .await
        .with_context(|| format!("rtmp: failed to listen on {requested}"))?;
    let bound = listener.local_addr()?;

    let server = Arc::new(RtmpRelay::new(config.target.clone()));
    info!(
        bind_addr = %bound,
        upstream = %config.target.upstream,
        app = %config.target.app,
        canonical_url = %server.canonical_url(),
        query = %config.target.query,
        "rtmp relay started"
    );

    supervisor.spawn("rtmp", async move {
        let result = proxy::supervise(listener, "rtmp", move |client, _peer| {
            let server = Arc::clone(&server);
            async move { server.serve(client).await }
        })
        .await;
        if let Err(e) = result {
            error!(error = %e, "rtmp listener failed");
        }
    });

    Ok(bound)
}
