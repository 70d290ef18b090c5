//! Calls waiting for their response, keyed by correlation id.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, Sender};
use log::{debug, warn};

use crate::Error;

pub(crate) type Response = Result<Reply, Error>;

/// Result carried by a response frame.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Reply {
    pub result: serde_json::Value,
    pub error: Option<String>,
}

#[derive(Debug)]
struct PendingCall {
    issued_at: Instant,
    timeout: Duration,
    result_slot: Sender<Response>,
}

/// Map of in-flight calls. Locks are held only for lookups, inserts and removals.
#[derive(Debug, Default)]
pub(crate) struct PendingCalls {
    calls: Mutex<HashMap<u64, PendingCall>>,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a call and returns the receiver its response will arrive on.
    pub fn register(&self, id: u64, timeout: Duration) -> Result<Receiver<Response>, Error> {
        let (sender, receiver) = channel::bounded(1);

        let mut calls = self.calls.lock()?;
        if calls.contains_key(&id) {
            return Err(Error::InvalidArgument(format!("correlation id {id} is already pending")));
        }

        calls.insert(
            id,
            PendingCall {
                issued_at: Instant::now(),
                timeout,
                result_slot: sender,
            },
        );

        Ok(receiver)
    }

    /// Delivers a response to its call. Returns false when no call is waiting for `id`.
    pub fn resolve(&self, id: u64, response: Response) -> bool {
        let call = match self.calls.lock() {
            Ok(mut calls) => calls.remove(&id),
            Err(e) => {
                warn!("could not resolve call {id}: {e}");
                return false;
            }
        };

        match call {
            Some(call) => {
                debug!("resolved call {id} in {:?} (timeout {:?})", call.issued_at.elapsed(), call.timeout);
                if call.result_slot.send(response).is_err() {
                    debug!("caller for {id} is gone");
                }
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, id: u64) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.remove(&id);
        }
    }

    /// Fails every pending call with a copy of `error`.
    pub fn fail_all(&self, error: &Error) {
        let drained: Vec<(u64, PendingCall)> = match self.calls.lock() {
            Ok(mut calls) => calls.drain().collect(),
            Err(e) => {
                warn!("could not fail pending calls: {e}");
                return;
            }
        };

        for (id, call) in drained {
            debug!("failing call {id}: {error}");
            let _ = call.result_slot.send(Err(error.clone()));
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.calls.lock().map(|calls| calls.len()).unwrap_or(0)
    }

    #[cfg(test)]
    pub fn contains(&self, id: u64) -> bool {
        self.calls.lock().map(|calls| calls.contains_key(&id)).unwrap_or(false)
    }
}
