//! Connection to the service: frame I/O, connection state and reconnection.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use log::{debug, info, warn};

use crate::client::error_handler::is_connection_error;
use crate::config::ClientOptions;
use crate::errors::Error;
use crate::messages::{encode_length, Codec, Frame};
use crate::transport::common::FibonacciBackoff;
use crate::transport::recorder::MessageRecorder;
use crate::transport::sync::Stream;

/// Lifecycle of a connection.
///
/// `Disconnected -> Connecting -> Connected -> Reconnecting -> Connected | Closed`.
/// `Closed` is terminal and reachable from every state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Closed,
}

/// Synchronous connection to the service
#[derive(Debug)]
pub(crate) struct Connection<S: Stream> {
    pub(crate) socket: S,
    codec: Arc<dyn Codec>,
    state: RwLock<ConnectionState>,
    options: ClientOptions,
    recorder: MessageRecorder,
    wakeup_send: Sender<()>,
    wakeup_recv: Receiver<()>,
}

impl<S: Stream> Connection<S> {
    pub fn new(socket: S, codec: Arc<dyn Codec>, options: ClientOptions) -> Self {
        let (wakeup_send, wakeup_recv) = channel::bounded(1);

        Self {
            socket,
            codec,
            state: RwLock::new(ConnectionState::Disconnected),
            options,
            recorder: MessageRecorder::from_env(),
            wakeup_send,
            wakeup_recv,
        }
    }

    /// Establishes the initial connection.
    pub fn connect(&self) -> Result<(), Error> {
        if !self.transition(ConnectionState::Disconnected, ConnectionState::Connecting) {
            return Err(match self.state() {
                ConnectionState::Closed => Error::InvalidHandle,
                state => Error::ConnectFailed(format!("cannot connect while {state:?}")),
            });
        }

        match self.socket.connect() {
            Ok(()) => {
                if self.transition(ConnectionState::Connecting, ConnectionState::Connected) {
                    debug!("connected");
                    Ok(())
                } else {
                    Err(Error::InvalidHandle)
                }
            }
            Err(e) => {
                self.transition(ConnectionState::Connecting, ConnectionState::Disconnected);
                Err(Error::ConnectFailed(e.to_string()))
            }
        }
    }

    pub fn state(&self) -> ConnectionState {
        match self.state.read() {
            Ok(state) => *state,
            Err(_) => ConnectionState::Closed,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn is_closed(&self) -> bool {
        self.state() == ConnectionState::Closed
    }

    // Moves from `from` to `to`. Returns false if the connection was in any other state.
    fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        match self.state.write() {
            Ok(mut state) if *state == from => {
                *state = to;
                true
            }
            _ => false,
        }
    }

    /// Leaves `Connected` so writes fail fast until reconnection completes.
    pub fn mark_reconnecting(&self) -> bool {
        self.transition(ConnectionState::Connected, ConnectionState::Reconnecting)
    }

    /// Write a frame to the connection
    pub fn write_frame(&self, frame: &Frame) -> Result<(), Error> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }

        let body = self.codec.encode(frame)?;
        self.recorder.record_request(&body);
        debug!("-> {}", String::from_utf8_lossy(&body));

        let packet = encode_length(&body)?;
        match self.socket.write_all(&packet) {
            Ok(()) => Ok(()),
            Err(ref e) if is_connection_error(e) => {
                warn!("write failed: {e}");
                Err(Error::ConnectionLost)
            }
            Err(e) => Err(e),
        }
    }

    /// Read the next frame from the connection
    pub fn read_frame(&self) -> Result<Frame, Error> {
        let body = self.socket.read_message()?;
        self.recorder.record_response(&body);
        debug!("<- {}", String::from_utf8_lossy(&body));

        self.codec.decode(&body)
    }

    /// Reconnects with Fibonacci backoff.
    ///
    /// Retries until the connection succeeds, the configured attempt limit is
    /// reached, or the connection is closed. Closing interrupts the wait between attempts.
    pub fn reconnect(&self) -> Result<(), Error> {
        self.mark_reconnecting();

        let mut backoff = FibonacciBackoff::new(self.options.backoff_unit, self.options.max_backoff);
        let mut attempt: u32 = 0;

        loop {
            if self.is_closed() {
                return Err(Error::InvalidHandle);
            }

            if let Some(max_attempts) = self.options.max_reconnect_attempts {
                if attempt >= max_attempts {
                    return Err(Error::ConnectFailed(format!("gave up after {attempt} reconnection attempts")));
                }
            }
            attempt += 1;

            let next_delay = backoff.next_delay();
            info!("next reconnection attempt in {next_delay:#?}");

            if self.wait(next_delay) {
                return Err(Error::InvalidHandle);
            }

            match self.socket.connect() {
                Ok(()) => {
                    if !self.transition(ConnectionState::Reconnecting, ConnectionState::Connected) {
                        return Err(Error::InvalidHandle);
                    }
                    info!("reconnected after {attempt} attempt(s)");
                    return Ok(());
                }
                Err(e) => {
                    info!("reconnection attempt {attempt} failed: {e}");
                }
            }
        }
    }

    // Sleeps for `delay`. Returns true if the connection was closed meanwhile.
    fn wait(&self, delay: Duration) -> bool {
        match self.wakeup_recv.recv_timeout(delay) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
            Err(RecvTimeoutError::Timeout) => self.is_closed(),
        }
    }

    /// Closes the connection. Idempotent.
    pub fn close(&self) {
        match self.state.write() {
            Ok(mut state) => {
                if *state == ConnectionState::Closed {
                    return;
                }
                *state = ConnectionState::Closed;
            }
            Err(e) => warn!("closing with poisoned state: {e}"),
        }

        debug!("connection closed");
        let _ = self.wakeup_send.try_send(());
        self.socket.shutdown();
    }
}
