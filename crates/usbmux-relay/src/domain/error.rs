//! The error taxonomy shared by every usbmuxd operation.

use std::io;

use thiserror::Error;
use usbmux_core::{CodecError, ConnectivityError, ResultCode};

/// Why a usbmuxd operation failed.
///
/// One-shot operations return it; long-lived components (listener, relay)
/// deliver it inside an event instead.
#[derive(Debug, Error)]
pub enum MuxError {
    /// The daemon answered a request with a non-zero `Result`.
    #[error("usbmuxd rejected the request: {0}")]
    Protocol(ResultCode),

    /// No attached device satisfies the request.  Raised before any daemon
    /// round trip.
    #[error(transparent)]
    Connectivity(#[from] ConnectivityError),

    /// The daemon socket failed.
    #[error(transparent)]
    Transport(#[from] io::Error),

    /// The daemon sent bytes that are not a valid frame.
    #[error("malformed usbmuxd frame: {0}")]
    Codec(#[from] CodecError),

    /// A reply of the wrong `MessageType` arrived where a `Result` was due.
    #[error("unexpected {0} message while waiting for a result")]
    UnexpectedMessage(String),
}

impl MuxError {
    /// The daemon's result code, for [`MuxError::Protocol`].
    pub fn result_code(&self) -> Option<ResultCode> {
        match self {
            MuxError::Protocol(code) => Some(*code),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error_names_the_code() {
        let err = MuxError::Protocol(ResultCode::PORT_UNAVAILABLE);
        assert_eq!(
            err.to_string(),
            "usbmuxd rejected the request: code 3 (port requested is unavailable)"
        );
        assert_eq!(err.result_code(), Some(ResultCode(3)));
    }

    #[test]
    fn test_connectivity_error_is_transparent() {
        let err = MuxError::from(ConnectivityError::for_pin(Some("ABC")));
        assert_eq!(err.to_string(), "requested device not connected: ABC");
        assert_eq!(err.result_code(), None);
    }

    #[test]
    fn test_transport_error_keeps_io_kind() {
        let err = MuxError::from(io::Error::from(io::ErrorKind::ConnectionRefused));
        assert!(matches!(
            err,
            MuxError::Transport(ref e) if e.kind() == io::ErrorKind::ConnectionRefused
        ));
    }
}
