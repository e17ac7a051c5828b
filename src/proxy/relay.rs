//! Bidirectional stream relay.
//!
//! The relay copies bytes between two already-established connections, one
//! task per direction, with no protocol inspection or buffering beyond the
//! copy buffer. When either direction ends (EOF or error) both sides are
//! torn down so the peer direction unblocks; the caller dropping the streams
//! releases the underlying sockets.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::warn;

/// Copy buffer size per relay direction.
const COPY_BUF_SIZE: usize = 8192;

/// Bytes moved by a completed relay, per direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Bytes copied from connection A to connection B.
    pub a_to_b: u64,
    /// Bytes copied from connection B to connection A.
    pub b_to_a: u64,
}

/// Relay bytes between `a` and `b` until either side disconnects.
///
/// Both directions run concurrently. The first direction to terminate wins:
/// the loser is cancelled and both write halves are shut down, which unblocks
/// anything still reading from the peer. Shutting down an already-closed
/// stream is ignored. Returns the first direction's error, if any, after
/// teardown.
pub async fn relay<A, B>(a: A, b: B) -> io::Result<RelayStats>
where
    A: AsyncRead + AsyncWrite + Send,
    B: AsyncRead + AsyncWrite + Send,
{
    let (mut a_read, mut a_write) = tokio::io::split(a);
    let (mut b_read, mut b_write) = tokio::io::split(b);

    let mut a_to_b = 0u64;
    let mut b_to_a = 0u64;

    let result = tokio::select! {
        r = copy_direction(&mut a_read, &mut b_write, &mut a_to_b) => r,
        r = copy_direction(&mut b_read, &mut a_write, &mut b_to_a) => r,
    };

    let _ = a_write.shutdown().await;
    let _ = b_write.shutdown().await;

    result?;
    Ok(RelayStats { a_to_b, b_to_a })
}

/// Dial `target` and relay `client` against the fresh connection.
///
/// A failed dial is logged and closes the client by dropping it; nothing is
/// retried and `None` comes back. On success the relay runs until either
/// side disconnects and the byte counts are returned.
pub async fn connect_and_relay<C>(client: C, target: &str) -> io::Result<Option<RelayStats>>
where
    C: AsyncRead + AsyncWrite + Send,
{
    let upstream = match TcpStream::connect(target).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!(destination = target, error = %e, "upstream dial failed");
            return Ok(None);
        }
    };
    relay(client, upstream).await.map(Some)
}

/// Copy one direction of flow, updating `total` as bytes land.
async fn copy_direction<R, W>(read: &mut R, write: &mut W, total: &mut u64) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; COPY_BUF_SIZE];
    loop {
        match read.read(&mut buf).await {
            Ok(0) => return Ok(()),
            Ok(n) => {
                write.write_all(&buf[..n]).await?;
                *total += n as u64;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn relay_copies_both_directions() {
        // Two duplex pipes: (client <-> relay side a) and (relay side b <-> server).
        let (client, a) = duplex(64);
        let (b, server) = duplex(64);

        let relay_task = tokio::spawn(relay(a, b));

        let (mut client_read, mut client_write) = tokio::io::split(client);
        let (mut server_read, mut server_write) = tokio::io::split(server);

        client_write.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        server_read.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        server_write.write_all(b"pong").await.unwrap();
        client_read.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");

        // Closing the client's write side ends the relay; counts reflect
        // both directions.
        client_write.shutdown().await.unwrap();
        let stats = relay_task.await.unwrap().unwrap();
        assert_eq!(stats.a_to_b, 4);
        assert_eq!(stats.b_to_a, 4);
    }

    #[tokio::test]
    async fn peer_unblocks_when_either_side_closes() {
        let (client, a) = duplex(64);
        let (b, server) = duplex(64);

        let relay_task = tokio::spawn(relay(a, b));

        // Server hangs up without the client ever writing.
        drop(server);
        relay_task.await.unwrap().unwrap();

        // The relay dropped its side, so the client sees EOF instead of
        // blocking forever.
        let (mut client_read, _client_write) = tokio::io::split(client);
        let mut buf = [0u8; 1];
        let n = client_read.read(&mut buf).await.unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn connect_and_relay_roundtrips_through_the_target() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4];
            sock.read_exact(&mut buf).await.unwrap();
            sock.write_all(&buf).await.unwrap();
        });

        let (client, proxy_side) = duplex(64);
        let relay_task =
            tokio::spawn(async move { connect_and_relay(proxy_side, &target).await });

        let (mut client_read, mut client_write) = tokio::io::split(client);
        client_write.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        client_read.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
        client_write.shutdown().await.unwrap();

        let stats = relay_task.await.unwrap().unwrap().expect("dial succeeded");
        assert_eq!(stats.a_to_b, 4);
        assert_eq!(stats.b_to_a, 4);
    }

    #[tokio::test]
    async fn connect_and_relay_closes_client_when_dial_fails() {
        // A port with no listener behind it.
        let dead = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target = dead.local_addr().unwrap().to_string();
        drop(dead);

        let (client, proxy_side) = duplex(8);
        let stats = connect_and_relay(proxy_side, &target).await.unwrap();
        assert!(stats.is_none());

        // The relay side was dropped without copying, so the client reads EOF.
        let (mut client_read, _client_write) = tokio::io::split(client);
        let mut buf = [0u8; 1];
        assert_eq!(client_read.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn empty_streams_relay_cleanly() {
        let (client, a) = duplex(8);
        let (b, _server) = duplex(8);
        drop(client);
        let stats = relay(a, b).await.unwrap();
        assert_eq!(stats, RelayStats::default());
    }
}
