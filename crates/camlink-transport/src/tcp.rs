//! Raw TCP transport: binary framing, long keepalive period.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use camlink_protocol::FramingKind;

use crate::{Connection, Transport, TransportError};

/// Read chunk size. One chunk routinely carries many frames.
const READ_BUF: usize = 16 * 1024;

/// Keepalive period for raw TCP connections. The servers tolerate long
/// idle spans on this transport.
const TCP_KEEPALIVE: Duration = Duration::from_secs(120);

/// A [`Transport`] that dials chat servers over plain TCP.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpTransport;

impl Transport for TcpTransport {
    type Conn = TcpConnection;

    async fn connect(&self, addr: &str) -> Result<Self::Conn, TransportError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(TransportError::ConnectFailed)?;
        stream.set_nodelay(true).map_err(TransportError::ConnectFailed)?;
        tracing::debug!(addr, "TCP connection established");

        let (read, write) = stream.into_split();
        Ok(TcpConnection {
            read: Mutex::new(read),
            write: Mutex::new(write),
        })
    }

    fn framing(&self) -> FramingKind {
        FramingKind::Binary
    }

    fn keepalive_interval(&self) -> Duration {
        TCP_KEEPALIVE
    }
}

/// One established TCP connection.
///
/// Read and write halves are locked independently so the read loop
/// never blocks an outgoing command.
pub struct TcpConnection {
    read: Mutex<OwnedReadHalf>,
    write: Mutex<OwnedWriteHalf>,
}

impl Connection for TcpConnection {
    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        self.write
            .lock()
            .await
            .write_all(data)
            .await
            .map_err(TransportError::SendFailed)
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, TransportError> {
        let mut buf = vec![0u8; READ_BUF];
        let n = self
            .read
            .lock()
            .await
            .read(&mut buf)
            .await
            .map_err(TransportError::ReceiveFailed)?;
        if n == 0 {
            return Ok(None);
        }
        buf.truncate(n);
        Ok(Some(buf))
    }

    async fn close(&self) -> Result<(), TransportError> {
        // Shutting down the write half makes the peer see EOF; the
        // read loop then observes the close on its side.
        let _ = self.write.lock().await.shutdown().await;
        Ok(())
    }
}
