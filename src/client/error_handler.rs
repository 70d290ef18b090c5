//! Error classification used by the read loop to decide between polling,
//! reconnecting and shutting down.

use std::io::ErrorKind;

use crate::errors::Error;

/// Checks if the error is a transport failure that should trigger reconnection
pub(crate) fn is_connection_error(error: &Error) -> bool {
    match error {
        Error::Io(io_err) => matches!(
            io_err.kind(),
            ErrorKind::ConnectionReset
                | ErrorKind::ConnectionAborted
                | ErrorKind::UnexpectedEof
                | ErrorKind::BrokenPipe
                | ErrorKind::NotConnected
        ),
        Error::ConnectionLost => true,
        _ => false,
    }
}

/// Checks if the error is a read timeout that can be safely ignored
pub(crate) fn is_timeout_error(error: &Error) -> bool {
    match error {
        Error::Io(io_err) => matches!(io_err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut),
        _ => false,
    }
}
