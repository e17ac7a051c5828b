//! Generic TCP forward proxy.
//!
//! Every accepted client gets a fresh outbound connection to the fixed
//! destination, then the pair is handed to the relay. No protocol awareness,
//! no pooling, no dial retry: a failed dial closes the client and is logged,
//! nothing more.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info};

use crate::config::ForwardConfig;
use crate::proxy::{self, connect_and_relay};
use crate::supervisor::Supervisor;

/// Launch the forward proxy; returns the bound address. Bind failure is
/// fatal to the process.
pub async fn launch(
    config: &ForwardConfig,
    bind: Ipv4Addr,
    supervisor: &mut Supervisor,
) -> Result<SocketAddr> {
    let requested = SocketAddr::from((bind, config.port));
    let listener = TcpListener::bind(requested)
        .await
        .with_context(|| format!("forward: failed to listen on {requested}"))?;
    let bound = listener.local_addr()?;

    let destination: Arc<str> = config.destination.clone().into();
    info!(bind_addr = %bound, destination = %destination, "forward proxy started");

    supervisor.spawn("forward", async move {
        let result = proxy::supervise(listener, "forward", move |client, peer| {
            let destination = Arc::clone(&destination);
            async move { handle(client, peer, &destination).await }
        })
        .await;
        if let Err(e) = result {
            error!(error = %e, "forward listener failed");
        }
    });

    Ok(bound)
}

/// Serve one client: dial the destination, then relay until either side
/// disconnects.
async fn handle(client: TcpStream, peer: SocketAddr, destination: &str) -> Result<()> {
    // Dial failure closes the client and is logged by the helper; the dial
    // is not retried and no sibling connection is affected.
    let Some(stats) = connect_and_relay(client, destination).await? else {
        return Ok(());
    };
    debug!(
        peer = %peer,
        bytes_to_upstream = stats.a_to_b,
        bytes_from_upstream = stats.b_to_a,
        "connection closed"
    );
    Ok(())
}
