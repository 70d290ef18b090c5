//! Delivery of pushed events to registered callbacks.
//!
//! Events are handed over by the read loop and invoked on a dedicated delivery
//! thread, so a slow callback never holds up responses. Each event kind has at
//! most one callback; registering again replaces the previous one.

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle, ThreadId};

use crossbeam::channel::{self, Receiver, Sender};
use log::{debug, error, trace, warn};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::messages::methods;
use crate::records::decode_record;
use crate::Error;

/// Kinds of events pushed by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Quote,
    Bar,
    OrderStatus,
    OrderTrade,
    AccountStatus,
}

impl EventKind {
    /// Classifies an event frame by its method name.
    pub fn from_method(method: &str) -> Option<EventKind> {
        match method {
            methods::QUOTE_IND => Some(EventKind::Quote),
            methods::BAR_IND => Some(EventKind::Bar),
            methods::ORDER_STATUS_IND => Some(EventKind::OrderStatus),
            methods::ORDER_TRADE_IND => Some(EventKind::OrderTrade),
            methods::ACCOUNT_STATUS_IND => Some(EventKind::AccountStatus),
            _ => None,
        }
    }

    pub fn method(&self) -> &'static str {
        match self {
            EventKind::Quote => methods::QUOTE_IND,
            EventKind::Bar => methods::BAR_IND,
            EventKind::OrderStatus => methods::ORDER_STATUS_IND,
            EventKind::OrderTrade => methods::ORDER_TRADE_IND,
            EventKind::AccountStatus => methods::ACCOUNT_STATUS_IND,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.method())
    }
}

/// Callback receiving the raw event payload.
pub(crate) type Handler = Arc<dyn Fn(&Value) -> Result<(), Error> + Send + Sync>;

/// Wraps a callback taking a typed record. Payloads that do not decode are
/// reported as callback failures.
pub(crate) fn record_handler<T, F>(callback: F) -> Handler
where
    T: DeserializeOwned,
    F: Fn(T) + Send + Sync + 'static,
{
    Arc::new(move |payload: &Value| -> Result<(), Error> {
        let record = decode_record(payload.clone())?;
        callback(record);
        Ok(())
    })
}

enum Delivery {
    Event(EventKind, Value),
    Stop,
}

#[derive(Default)]
struct Slots {
    handlers: RwLock<HashMap<EventKind, Handler>>,
    closed: AtomicBool,
}

impl Slots {
    fn handler(&self, kind: EventKind) -> Option<Handler> {
        match self.handlers.read() {
            Ok(handlers) => handlers.get(&kind).cloned(),
            Err(e) => {
                warn!("event handlers poisoned: {e}");
                None
            }
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

pub(crate) struct EventDispatcher {
    slots: Arc<Slots>,
    queue: Sender<Delivery>,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_id: ThreadId,
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("closed", &self.slots.is_closed())
            .field("queued", &self.queue.len())
            .finish()
    }
}

impl EventDispatcher {
    /// Starts the delivery thread.
    pub fn new() -> Result<EventDispatcher, Error> {
        let slots = Arc::new(Slots::default());
        let (queue, deliveries) = channel::unbounded();

        let worker_slots = Arc::clone(&slots);
        let worker = thread::Builder::new()
            .name("tqapi-events".into())
            .spawn(move || deliver(worker_slots, deliveries))?;
        let worker_id = worker.thread().id();

        Ok(EventDispatcher {
            slots,
            queue,
            worker: Mutex::new(Some(worker)),
            worker_id,
        })
    }

    /// Registers the callback for `kind`, replacing any previous one.
    pub fn register(&self, kind: EventKind, handler: Handler) -> Result<(), Error> {
        if self.slots.is_closed() {
            return Err(Error::InvalidHandle);
        }

        let mut handlers = self.slots.handlers.write()?;
        if handlers.insert(kind, handler).is_some() {
            debug!("replaced {kind} callback");
        }
        Ok(())
    }

    /// Queues an inbound event for delivery. Never blocks.
    pub fn dispatch(&self, method: &str, payload: Value) {
        let Some(kind) = EventKind::from_method(method) else {
            warn!("dropping event with unknown method: {method}");
            return;
        };

        if self.slots.is_closed() {
            return;
        }

        if self.slots.handler(kind).is_none() {
            trace!("no callback for {kind}, dropping event");
            return;
        }

        if self.queue.send(Delivery::Event(kind, payload)).is_err() {
            debug!("delivery thread has stopped, dropping {kind} event");
        }
    }

    /// Stops delivery. Once this returns no callback will be invoked again.
    pub fn close(&self) {
        if self.slots.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Ok(mut handlers) = self.slots.handlers.write() {
            handlers.clear();
        }
        let _ = self.queue.send(Delivery::Stop);

        // A callback closing its own client cannot wait for itself.
        if thread::current().id() == self.worker_id {
            return;
        }

        let worker = match self.worker.lock() {
            Ok(mut worker) => worker.take(),
            Err(_) => None,
        };
        if let Some(worker) = worker {
            if let Err(e) = worker.join() {
                warn!("could not join delivery thread: {e:?}");
            }
        }
    }
}

impl Drop for EventDispatcher {
    fn drop(&mut self) {
        self.close();
    }
}

// Body of the delivery thread.
fn deliver(slots: Arc<Slots>, deliveries: Receiver<Delivery>) {
    for delivery in deliveries.iter() {
        let (kind, payload) = match delivery {
            Delivery::Event(kind, payload) => (kind, payload),
            Delivery::Stop => break,
        };

        if slots.is_closed() {
            break;
        }

        let Some(handler) = slots.handler(kind) else {
            continue;
        };

        match panic::catch_unwind(AssertUnwindSafe(|| handler(&payload))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("{kind} callback failed: {e}"),
            Err(panic) => error!("{kind} callback panicked: {}", panic_message(&*panic)),
        }
    }

    debug!("delivery thread finished");
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
