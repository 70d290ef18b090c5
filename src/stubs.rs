use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender};
use serde_json::Value;

use crate::connection::ConnectionState;
use crate::transport::MessageBus;
use crate::Error;

/// Records calls and answers them with canned replies per method.
/// Methods without a reply answer `null`.
#[derive(Debug, Default)]
pub(crate) struct MessageBusStub {
    pub request_messages: RwLock<Vec<(String, Value)>>,
    pub responses: HashMap<String, Result<Value, Error>>,
    reconnect_listeners: Mutex<Vec<Sender<()>>>,
    shutdown_calls: AtomicUsize,
    shut_down: AtomicBool,
}

impl MessageBusStub {
    pub fn with_response(mut self, method: &str, result: Value) -> Self {
        self.responses.insert(method.to_string(), Ok(result));
        self
    }

    pub fn with_error(mut self, method: &str, message: &str) -> Self {
        self.responses.insert(method.to_string(), Err(Error::Server(message.to_string())));
        self
    }

    pub fn with_failure(mut self, method: &str, error: Error) -> Self {
        self.responses.insert(method.to_string(), Err(error));
        self
    }

    pub fn request_messages(&self) -> Vec<(String, Value)> {
        self.request_messages.read().unwrap().clone()
    }

    pub fn methods(&self) -> Vec<String> {
        self.request_messages().into_iter().map(|(method, _)| method).collect()
    }

    /// Signals every reconnect listener as the read loop does after a reconnect.
    pub fn simulate_reconnect(&self) {
        self.reconnect_listeners.lock().unwrap().retain(|listener| listener.send(()).is_ok());
    }

    pub fn shutdown_calls(&self) -> usize {
        self.shutdown_calls.load(Ordering::SeqCst)
    }
}

impl MessageBus for MessageBusStub {
    fn call(&self, method: &str, params: Value, _timeout: Duration) -> Result<Value, Error> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(Error::NotConnected);
        }

        self.request_messages.write().unwrap().push((method.to_string(), params));

        match self.responses.get(method) {
            Some(response) => response.clone(),
            None => Ok(Value::Null),
        }
    }

    fn reconnected(&self) -> Result<Receiver<()>, Error> {
        let (sender, receiver) = channel::unbounded();
        self.reconnect_listeners.lock()?.push(sender);
        Ok(receiver)
    }

    fn state(&self) -> ConnectionState {
        if self.shut_down.load(Ordering::SeqCst) {
            ConnectionState::Closed
        } else {
            ConnectionState::Connected
        }
    }

    fn ensure_shutdown(&self) {
        self.shutdown_calls.fetch_add(1, Ordering::SeqCst);
        self.shut_down.store(true, Ordering::SeqCst);
        if let Ok(mut listeners) = self.reconnect_listeners.lock() {
            listeners.clear();
        }
    }
}
