//! Daemon connections.
//!
//! Every listener and every tunnel opens its own connection to usbmuxd.
//! [`DaemonConnector`] is the seam that produces those connections; the
//! production implementation is [`DaemonAddress`] (Unix socket or TCP), tests
//! substitute in-memory streams.
//!
//! # Exact reads
//!
//! A tunnel connection carries exactly one protocol message (the `Result`
//! answering `Connect`) before it turns into a raw byte pipe to the device.
//! [`read_one_message`] therefore reads the header and then precisely the
//! announced payload with `read_exact`, never a byte more, so the first
//! device bytes stay in the socket for whoever splices the tunnel.

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use usbmux_core::protocol::codec::{decode_header, decode_payload};
use usbmux_core::protocol::messages::HEADER_SIZE;
use usbmux_core::MuxMessage;

use crate::domain::{DaemonAddress, MuxError};

/// Anything that can stand in for a daemon socket.
pub trait DaemonIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send + ?Sized> DaemonIo for T {}

/// An established daemon connection.  After a successful `Connect` this is
/// the raw tunnel to the device port.
pub type DaemonStream = Box<dyn DaemonIo>;

/// Opens connections to usbmuxd.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DaemonConnector: Send + Sync {
    /// Opens a fresh connection.
    async fn connect(&self) -> io::Result<DaemonStream>;
}

/// A connector shared between the tasks that need to open connections.
pub type SharedConnector = Arc<dyn DaemonConnector>;

#[async_trait]
impl DaemonConnector for DaemonAddress {
    async fn connect(&self) -> io::Result<DaemonStream> {
        debug!(daemon = %self, "opening daemon connection");
        match self {
            DaemonAddress::Tcp(addr) => {
                let stream = TcpStream::connect(addr).await?;
                stream.set_nodelay(true)?;
                Ok(Box::new(stream))
            }
            #[cfg(unix)]
            DaemonAddress::Unix(path) => {
                let stream = tokio::net::UnixStream::connect(path).await?;
                Ok(Box::new(stream))
            }
            #[cfg(not(unix))]
            DaemonAddress::Unix(path) => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("Unix sockets are not available here: {}", path.display()),
            )),
        }
    }
}

/// Writes one complete frame and flushes it.
pub async fn write_frame<S>(stream: &mut S, frame: &[u8]) -> io::Result<()>
where
    S: AsyncWrite + Unpin + ?Sized,
{
    stream.write_all(frame).await?;
    stream.flush().await
}

/// Reads exactly one message from `stream` without over-reading.
///
/// # Errors
///
/// [`MuxError::Transport`] if the stream fails or ends mid-frame,
/// [`MuxError::Codec`] if the frame is malformed.
pub async fn read_one_message<S>(stream: &mut S) -> Result<MuxMessage, MuxError>
where
    S: AsyncRead + Unpin + ?Sized,
{
    let mut header = [0u8; HEADER_SIZE];
    stream.read_exact(&mut header).await?;
    let (_, payload_len) = decode_header(&header)?;

    let mut payload = vec![0u8; payload_len];
    stream.read_exact(&mut payload).await?;
    Ok(decode_payload(&payload)?)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio_test::io::Builder;
    use usbmux_core::protocol::codec::encode_message;
    use usbmux_core::ResultCode;

    #[tokio::test]
    async fn test_read_one_message_leaves_trailing_bytes_unread() {
        // Arrange: a Result frame immediately followed by tunnel bytes
        let mut bytes = encode_message(&MuxMessage::Result(ResultCode::OK)).unwrap();
        bytes.extend_from_slice(b"SSH-2.0");
        let mut reader = &bytes[..];

        // Act
        let msg = read_one_message(&mut reader).await.unwrap();

        // Assert
        assert_eq!(msg, MuxMessage::Result(ResultCode::OK));
        assert_eq!(reader, b"SSH-2.0");
    }

    #[tokio::test]
    async fn test_read_one_message_reassembles_split_reads() {
        let frame = encode_message(&MuxMessage::Detached { device_id: 4 }).unwrap();
        let mut mock = Builder::new()
            .read(&frame[..3])
            .read(&frame[3..20])
            .read(&frame[20..])
            .build();

        let msg = read_one_message(&mut mock).await.unwrap();
        assert_eq!(msg, MuxMessage::Detached { device_id: 4 });
    }

    #[tokio::test]
    async fn test_read_one_message_eof_mid_frame_is_transport_error() {
        let frame = encode_message(&MuxMessage::Result(ResultCode::OK)).unwrap();
        let mut reader = &frame[..frame.len() - 1];

        let err = read_one_message(&mut reader).await.unwrap_err();
        assert!(matches!(
            err,
            MuxError::Transport(ref e) if e.kind() == io::ErrorKind::UnexpectedEof
        ));
    }

    #[tokio::test]
    async fn test_write_frame_writes_all_bytes() {
        let mut mock = Builder::new().write(b"frame-bytes").build();
        write_frame(&mut mock, b"frame-bytes").await.unwrap();
    }

    #[tokio::test]
    async fn test_tcp_address_connects() {
        // Arrange
        let server = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = DaemonAddress::Tcp(server.local_addr().unwrap());

        // Act
        let (client, accepted) = tokio::join!(addr.connect(), server.accept());

        // Assert
        assert!(client.is_ok());
        assert!(accepted.is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_tcp_address_fails() {
        let server = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = DaemonAddress::Tcp(server.local_addr().unwrap());
        drop(server);

        assert!(addr.connect().await.is_err());
    }
}
