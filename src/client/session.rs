//! One open client session: a connection, its read loop and its event delivery thread.

use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam::channel::Receiver;
use log::debug;
use serde_json::Value;

use crate::config::ClientOptions;
use crate::connection::{Connection, ConnectionState};
use crate::dispatcher::{EventDispatcher, EventKind, Handler};
use crate::messages::Codec;
use crate::transport::{MessageBus, TcpMessageBus, TcpSocket};
use crate::Error;

/// Owned exclusively by one client. Every operation fails with
/// [Error::InvalidHandle] once the session is closed.
#[derive(Debug)]
pub(crate) struct Session {
    message_bus: Arc<dyn MessageBus>,
    dispatcher: Arc<EventDispatcher>,
    options: ClientOptions,
    closed: AtomicBool,
}

impl Session {
    /// Connects eagerly and starts the read loop.
    pub fn connect(address: &str, options: ClientOptions, codec: Arc<dyn Codec>) -> Result<Session, Error> {
        debug!("connecting to {address} with {options:?} using {codec:?}");

        let socket = TcpSocket::new(address, options.read_timeout);
        let connection = Connection::new(socket, codec, options.clone());
        connection.connect()?;

        let dispatcher = Arc::new(EventDispatcher::new()?);
        let message_bus = Arc::new(TcpMessageBus::new(connection, Arc::clone(&dispatcher)));
        message_bus.process_messages()?;

        Ok(Session::new(message_bus, dispatcher, options))
    }

    fn new(message_bus: Arc<dyn MessageBus>, dispatcher: Arc<EventDispatcher>, options: ClientOptions) -> Session {
        Session {
            message_bus,
            dispatcher,
            options,
            closed: AtomicBool::new(false),
        }
    }

    fn check_open(&self) -> Result<(), Error> {
        if self.is_closed() {
            Err(Error::InvalidHandle)
        } else {
            Ok(())
        }
    }

    /// Calls `method` with the configured request timeout.
    pub fn call(&self, method: &str, params: Value) -> Result<Value, Error> {
        self.check_open()?;
        self.message_bus.call(method, params, self.options.request_timeout)
    }

    pub fn register(&self, kind: EventKind, handler: Handler) -> Result<(), Error> {
        self.check_open()?;
        self.dispatcher.register(kind, handler)
    }

    pub fn reconnected(&self) -> Result<Receiver<()>, Error> {
        self.check_open()?;
        self.message_bus.reconnected()
    }

    pub fn message_bus(&self) -> Arc<dyn MessageBus> {
        Arc::clone(&self.message_bus)
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub fn state(&self) -> ConnectionState {
        if self.is_closed() {
            ConnectionState::Closed
        } else {
            self.message_bus.state()
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Stops the read loop, failing pending calls, then stops event delivery. Runs once.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        debug!("closing session");
        self.message_bus.ensure_shutdown();
        self.dispatcher.close();
    }

    #[cfg(test)]
    pub fn stubbed(message_bus: Arc<dyn MessageBus>) -> Session {
        let dispatcher = Arc::new(EventDispatcher::new().unwrap());
        Session::new(message_bus, dispatcher, ClientOptions::default())
    }

    #[cfg(test)]
    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}
