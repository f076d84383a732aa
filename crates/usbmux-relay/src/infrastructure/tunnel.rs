//! One-shot tunnel negotiation.
//!
//! Opens a fresh daemon connection, asks usbmuxd to `Connect` it to a port on
//! a device, and waits for the single `Result`.  On success the connection is
//! handed back untouched: every later byte belongs to the device service.
//!
//! There is no timeout here; callers that need one wrap the future.

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

use usbmux_core::{build_connect_frame, DeviceId, MuxMessage};

use crate::domain::MuxError;
use crate::infrastructure::transport::{
    read_one_message, write_frame, DaemonConnector, DaemonStream,
};

/// Opens a tunnel to `port` on the device with session handle `device_id`.
///
/// # Errors
///
/// - [`MuxError::Transport`] if the daemon cannot be reached.
/// - [`MuxError::Protocol`] if the daemon refuses; code 2 means the device is
///   gone, 3 that nothing listens on the port.
/// - [`MuxError::UnexpectedMessage`] / [`MuxError::Codec`] for a reply that
///   is not a well-formed `Result`.
///
/// The daemon connection is closed on every error path.
pub async fn connect(
    connector: &dyn DaemonConnector,
    device_id: DeviceId,
    port: u16,
) -> Result<DaemonStream, MuxError> {
    let stream = connector.connect().await?;
    negotiate(stream, device_id, port).await
}

/// Sends `Connect` over `stream` and consumes exactly the `Result` frame.
pub(crate) async fn negotiate<S>(mut stream: S, device_id: DeviceId, port: u16) -> Result<S, MuxError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let frame = build_connect_frame(device_id, port)?;
    write_frame(&mut stream, &frame).await?;

    match read_one_message(&mut stream).await? {
        MuxMessage::Result(code) if code.is_ok() => {
            debug!(device_id, port, "tunnel established");
            Ok(stream)
        }
        MuxMessage::Result(code) => {
            warn!(device_id, port, %code, "usbmuxd refused tunnel");
            Err(MuxError::Protocol(code))
        }
        other => Err(MuxError::UnexpectedMessage(other.message_type().to_string())),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::Arc;

    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio_test::io::Builder;
    use usbmux_core::protocol::codec::encode_message;
    use usbmux_core::ResultCode;

    use crate::infrastructure::transport::MockDaemonConnector;

    fn result(code: u64) -> Vec<u8> {
        encode_message(&MuxMessage::Result(ResultCode(code))).unwrap()
    }

    async fn expect_failure<S>(stream: S, device_id: DeviceId, port: u16) -> MuxError
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        match negotiate(stream, device_id, port).await {
            Ok(_) => panic!("negotiation unexpectedly succeeded"),
            Err(e) => e,
        }
    }

    #[tokio::test]
    async fn test_success_hands_back_untouched_stream() {
        // Arrange: the device's first bytes arrive in the same read as the Result
        let mut reply = result(0);
        reply.extend_from_slice(b"hello");
        let mock = Builder::new()
            .write(&build_connect_frame(7, 22).unwrap())
            .read(&reply)
            .build();

        // Act
        let Ok(mut tunnel) = negotiate(mock, 7, 22).await else {
            panic!("negotiation failed");
        };

        // Assert
        let mut first = [0u8; 5];
        tunnel.read_exact(&mut first).await.unwrap();
        assert_eq!(&first, b"hello");
    }

    #[tokio::test]
    async fn test_port_unavailable_is_protocol_error() {
        let mock = Builder::new()
            .write(&build_connect_frame(7, 22).unwrap())
            .read(&result(3))
            .build();

        let err = expect_failure(mock, 7, 22).await;

        assert_eq!(err.result_code(), Some(ResultCode::PORT_UNAVAILABLE));
    }

    #[tokio::test]
    async fn test_undocumented_code_passes_through() {
        let mock = Builder::new()
            .write(&build_connect_frame(1, 80).unwrap())
            .read(&result(42))
            .build();

        let err = expect_failure(mock, 1, 80).await;

        assert!(matches!(err, MuxError::Protocol(ResultCode(42))));
    }

    #[tokio::test]
    async fn test_non_result_reply_is_unexpected() {
        let reply = encode_message(&MuxMessage::Detached { device_id: 1 }).unwrap();
        let mock = Builder::new()
            .write(&build_connect_frame(1, 80).unwrap())
            .read(&reply)
            .build();

        let err = expect_failure(mock, 1, 80).await;

        assert!(matches!(err, MuxError::UnexpectedMessage(ref t) if t == "Detached"));
    }

    #[tokio::test]
    async fn test_daemon_closing_before_result_is_transport_error() {
        let mock = Builder::new()
            .write(&build_connect_frame(1, 80).unwrap())
            .build();

        let err = expect_failure(mock, 1, 80).await;

        assert!(matches!(err, MuxError::Transport(_)));
    }

    #[tokio::test]
    async fn test_connect_surfaces_unreachable_daemon() {
        // Arrange
        let mut connector = MockDaemonConnector::new();
        connector
            .expect_connect()
            .times(1)
            .returning(|| Err(io::Error::from(io::ErrorKind::NotFound)));
        let connector: Arc<dyn DaemonConnector> = Arc::new(connector);

        // Act
        let result = connect(connector.as_ref(), 7, 22).await;

        // Assert
        assert!(matches!(
            result,
            Err(MuxError::Transport(ref e)) if e.kind() == io::ErrorKind::NotFound
        ));
    }
}
