use std::sync::Arc;

/// Errors returned by the quote and trade clients.
///
/// `Error` is `Clone` so a single transport failure can be delivered to every
/// call that is waiting on the connection.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    // Errors from external libraries
    Io(Arc<std::io::Error>),
    Codec(String),
    Poison(String),

    // Errors from the client runtime
    /// The initial connection could not be established.
    ConnectFailed(String),
    /// The connection is reconnecting or closed and cannot send.
    NotConnected,
    /// No response arrived before the call's deadline.
    Timeout,
    /// The connection dropped while the call was waiting for its response.
    ConnectionLost,
    /// The client has been closed.
    InvalidHandle,
    /// A request was rejected locally before reaching the server.
    InvalidArgument(String),
    /// The server answered with an error message.
    Server(String),
    UnexpectedResponse(String),
}

impl Error {
    /// Returns the server-reported message for [Error::Server], or the display text for other errors.
    pub fn message(&self) -> String {
        match self {
            Error::Server(message) => message.clone(),
            other => other.to_string(),
        }
    }
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::Io(ref err) => err.fmt(f),
            Error::Codec(ref err) => write!(f, "codec error: {err}"),
            Error::Poison(ref err) => write!(f, "{err}"),

            Error::ConnectFailed(ref err) => write!(f, "connection failed: {err}"),
            Error::NotConnected => write!(f, "not connected"),
            Error::Timeout => write!(f, "request timed out"),
            Error::ConnectionLost => write!(f, "connection lost"),
            Error::InvalidHandle => write!(f, "client is closed"),
            Error::InvalidArgument(ref err) => write!(f, "invalid argument: {err}"),
            Error::Server(ref err) => write!(f, "server error: {err}"),
            Error::UnexpectedResponse(ref err) => write!(f, "unexpected response: {err}"),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::Io(Arc::new(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Error {
        Error::Codec(err.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(err: std::sync::PoisonError<T>) -> Error {
        Error::Poison(format!("Mutex poison error: {err}"))
    }
}
