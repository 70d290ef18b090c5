//! This module implements a message bus for communicating with the service.
//! It routes requests from the clients to the service, and responses and pushed
//! events from the service back to the waiting callers and registered callbacks.

use std::fmt::Debug;
use std::io::{prelude::*, Cursor, ErrorKind};
use std::net::{Shutdown, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use byteorder::{BigEndian, ReadBytesExt};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info, warn};
use serde_json::Value;

use super::pending::{PendingCalls, Reply};
use crate::client::error_handler::{is_connection_error, is_timeout_error};
use crate::client::id_generator::IdGenerator;
use crate::connection::{Connection, ConnectionState};
use crate::dispatcher::EventDispatcher;
use crate::messages::Frame;
use crate::Error;


// Frames larger than this mean the byte stream is corrupt.
const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Request/response calls over one connection.
pub(crate) trait MessageBus: Send + Sync + Debug {
    /// Sends a request and waits for the response with the same correlation id.
    fn call(&self, method: &str, params: Value, timeout: Duration) -> Result<Value, Error>;

    /// Receives a signal after every successful reconnect.
    fn reconnected(&self) -> Result<Receiver<()>, Error>;

    fn state(&self) -> ConnectionState;

    fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Stops the read loop and fails every pending call.
    fn ensure_shutdown(&self);
}

#[derive(Debug)]
pub(crate) struct TcpMessageBus<S: Stream> {
    connection: Connection<S>,
    pending: PendingCalls,
    ids: IdGenerator,
    dispatcher: Arc<EventDispatcher>,
    reconnect_listeners: Mutex<Vec<Sender<()>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl<S: Stream> TcpMessageBus<S> {
    pub fn new(connection: Connection<S>, dispatcher: Arc<EventDispatcher>) -> TcpMessageBus<S> {
        TcpMessageBus {
            connection,
            pending: PendingCalls::new(),
            ids: IdGenerator::default(),
            dispatcher,
            reconnect_listeners: Mutex::new(Vec::new()),
            handles: Mutex::new(Vec::new()),
        }
    }

    fn request_shutdown(&self) {
        debug!("shutdown requested");

        self.connection.close();
        self.pending.fail_all(&Error::ConnectionLost);

        // Dropping the senders ends every listener's receive loop.
        if let Ok(mut listeners) = self.reconnect_listeners.lock() {
            listeners.clear();
        }
    }

    fn notify_reconnected(&self) {
        let mut listeners = match self.reconnect_listeners.lock() {
            Ok(listeners) => listeners,
            Err(e) => {
                warn!("could not notify reconnect listeners: {e}");
                return;
            }
        };

        listeners.retain(|listener| listener.send(()).is_ok());
        debug!("notified {} reconnect listener(s)", listeners.len());
    }

    /// Reads and routes one frame. Returns an error when the read loop should stop.
    pub(crate) fn dispatch(&self) -> Result<(), Error> {
        match self.connection.read_frame() {
            Ok(frame) => {
                self.route(frame);
                Ok(())
            }
            Err(_) if self.connection.is_closed() => Err(Error::InvalidHandle),
            Err(ref err) if is_timeout_error(err) => Ok(()),
            Err(Error::Codec(message)) => {
                warn!("dropping undecodable frame: {message}");
                Ok(())
            }
            Err(ref err) if is_connection_error(err) => {
                error!("error reading next frame (will attempt reconnect): {err}");

                self.connection.mark_reconnecting();
                self.pending.fail_all(&Error::ConnectionLost);

                match self.connection.reconnect() {
                    Ok(()) => {
                        info!("successfully reconnected");
                        self.notify_reconnected();
                        Ok(())
                    }
                    Err(e) => {
                        if !matches!(e, Error::InvalidHandle) {
                            error!("failed to reconnect: {e}");
                        }
                        self.request_shutdown();
                        Err(e)
                    }
                }
            }
            Err(err) => {
                error!("error reading next frame (shutting down): {err}");
                self.request_shutdown();
                Err(err)
            }
        }
    }

    fn route(&self, frame: Frame) {
        match frame {
            Frame::Response { id, result, error } => {
                if !self.pending.resolve(id, Ok(Reply { result, error })) {
                    info!("no pending call for response {id}, dropping");
                }
            }
            Frame::Event { method, params } => self.dispatcher.dispatch(&method, params),
            Frame::Request { id, method, .. } => {
                warn!("unexpected request from server: {method} ({id})");
            }
        }
    }

    // The read loop drains the connection and routes every frame.
    fn start_read_loop(self: &Arc<Self>) -> Result<JoinHandle<()>, Error> {
        let message_bus = Arc::clone(self);

        let handle = thread::Builder::new().name("tqapi-reader".into()).spawn(move || {
            loop {
                match message_bus.dispatch() {
                    Ok(_) => {}
                    Err(Error::InvalidHandle) => break,
                    Err(e) => {
                        error!("read loop encountered an error: {e}");
                        break;
                    }
                }
            }
            debug!("read loop finished");
        })?;

        Ok(handle)
    }

    pub(crate) fn process_messages(self: &Arc<Self>) -> Result<(), Error> {
        let handle = self.start_read_loop()?;
        self.handles.lock()?.push(handle);
        Ok(())
    }

    pub fn join(&self) {
        let handles: Vec<JoinHandle<()>> = match self.handles.lock() {
            Ok(mut handles) => handles.drain(..).collect(),
            Err(e) => {
                warn!("could not join threads: {e}");
                return;
            }
        };

        for handle in handles {
            if handle.thread().id() == thread::current().id() {
                continue;
            }
            if let Err(e) = handle.join() {
                warn!("could not join thread: {e:?}");
            }
        }
    }
}

impl<S: Stream> MessageBus for TcpMessageBus<S> {
    fn call(&self, method: &str, params: Value, timeout: Duration) -> Result<Value, Error> {
        let id = self.ids.next();
        let receiver = self.pending.register(id, timeout)?;

        if let Err(e) = self.connection.write_frame(&Frame::request(id, method, params)) {
            self.pending.remove(id);
            return Err(e);
        }

        let response = match receiver.recv_timeout(timeout) {
            Ok(response) => response,
            Err(RecvTimeoutError::Timeout) => {
                self.pending.remove(id);
                warn!("{method} ({id}) timed out after {timeout:?}");
                Err(Error::Timeout)
            }
            Err(RecvTimeoutError::Disconnected) => Err(Error::ConnectionLost),
        };

        let reply = response?;
        match reply.error {
            Some(message) if !message.is_empty() => Err(Error::Server(message)),
            _ => Ok(reply.result),
        }
    }

    fn reconnected(&self) -> Result<Receiver<()>, Error> {
        let (sender, receiver) = channel::unbounded();
        self.reconnect_listeners.lock()?.push(sender);
        Ok(receiver)
    }

    fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    fn ensure_shutdown(&self) {
        self.request_shutdown();
        self.join();
    }
}

// Bytes received but not yet assembled into a whole frame.
#[derive(Debug, Default)]
struct ReadHalf {
    stream: Option<TcpStream>,
    buffer: Vec<u8>,
}

#[derive(Debug)]
pub(crate) struct TcpSocket {
    reader: Mutex<ReadHalf>,
    writer: Mutex<Option<TcpStream>>,
    address: String,
    read_timeout: Duration,
}

impl TcpSocket {
    pub fn new(address: &str, read_timeout: Duration) -> Self {
        Self {
            reader: Mutex::new(ReadHalf::default()),
            writer: Mutex::new(None),
            address: address.to_string(),
            read_timeout: read_timeout.max(Duration::from_millis(1)),
        }
    }
}

impl Dial for TcpSocket {
    fn connect(&self) -> Result<(), Error> {
        let stream = TcpStream::connect(&self.address)?;
        stream.set_read_timeout(Some(self.read_timeout))?;
        stream.set_nodelay(true)?;

        let mut reader = self.reader.lock()?;
        reader.stream = Some(stream.try_clone()?);
        reader.buffer.clear();

        let mut writer = self.writer.lock()?;
        *writer = Some(stream);

        Ok(())
    }
}

impl Io for TcpSocket {
    fn read_message(&self) -> Result<Vec<u8>, Error> {
        let mut reader = self.reader.lock()?;
        let ReadHalf { stream, buffer } = &mut *reader;

        let Some(stream) = stream.as_mut() else {
            return Err(std::io::Error::new(ErrorKind::NotConnected, "socket is not connected").into());
        };

        read_message(stream, buffer)
    }

    fn write_all(&self, buf: &[u8]) -> Result<(), Error> {
        let mut writer = self.writer.lock()?;
        match writer.as_mut() {
            Some(stream) => {
                stream.write_all(buf)?;
                Ok(())
            }
            None => Err(std::io::Error::new(ErrorKind::NotConnected, "socket is not connected").into()),
        }
    }

    fn shutdown(&self) {
        if let Ok(writer) = self.writer.lock() {
            if let Some(stream) = writer.as_ref() {
                if let Err(e) = stream.shutdown(Shutdown::Both) {
                    debug!("socket shutdown: {e}");
                }
            }
        }
    }
}

/// Establishes (or re-establishes) the underlying transport.
pub(crate) trait Dial {
    fn connect(&self) -> Result<(), Error>;
}

pub(crate) trait Io {
    /// Returns the body of the next length-prefixed frame.
    fn read_message(&self) -> Result<Vec<u8>, Error>;
    fn write_all(&self, buf: &[u8]) -> Result<(), Error>;
    /// Unblocks pending reads and refuses further I/O.
    fn shutdown(&self);
}

pub(crate) trait Stream: Io + Dial + Sync + Send + 'static + Debug {}
impl Stream for TcpSocket {}

fn read_header(buffer: &[u8]) -> Result<Option<usize>, Error> {
    if buffer.len() < 4 {
        return Ok(None);
    }
    let mut reader = Cursor::new(&buffer[..4]);
    let count = reader.read_u32::<BigEndian>()?;
    Ok(Some(count as usize))
}

// Splits one complete frame off the front of `buffer`.
pub(crate) fn take_frame(buffer: &mut Vec<u8>) -> Result<Option<Vec<u8>>, Error> {
    let Some(size) = read_header(buffer)? else {
        return Ok(None);
    };

    if size > MAX_FRAME_SIZE {
        return Err(std::io::Error::new(ErrorKind::ConnectionAborted, format!("frame of {size} bytes exceeds limit")).into());
    }

    if buffer.len() < size + 4 {
        return Ok(None);
    }

    let frame = buffer[4..size + 4].to_vec();
    buffer.drain(..size + 4);
    Ok(Some(frame))
}

// Reads until a whole frame is buffered. Partial frames survive read timeouts.
pub(crate) fn read_message(reader: &mut impl Read, buffer: &mut Vec<u8>) -> Result<Vec<u8>, Error> {
    let mut chunk = [0_u8; READ_CHUNK_SIZE];

    loop {
        if let Some(frame) = take_frame(buffer)? {
            return Ok(frame);
        }

        let count = reader.read(&mut chunk)?;
        if count == 0 {
            return Err(std::io::Error::new(ErrorKind::UnexpectedEof, "connection closed by peer").into());
        }
        buffer.extend_from_slice(&chunk[..count]);
    }
}
