//! Client settings and the process-wide parameter store.
//!
//! Parameters set with [set_params] apply to every client constructed afterwards.
//! Clients take a snapshot of the parameters when they connect, so changing a
//! parameter never affects a client that is already running.

use std::collections::HashMap;
use std::sync::{OnceLock, RwLock};
use std::time::Duration;

use log::debug;

use crate::errors::Error;

pub(crate) const REQUEST_TIMEOUT_MS: &str = "request_timeout_ms";
pub(crate) const READ_TIMEOUT_MS: &str = "read_timeout_ms";
pub(crate) const BACKOFF_UNIT_MS: &str = "backoff_unit_ms";
pub(crate) const MAX_BACKOFF_MS: &str = "max_backoff_ms";
pub(crate) const MAX_RECONNECT_ATTEMPTS: &str = "max_reconnect_attempts";

const NUMERIC_KEYS: [&str; 5] = [REQUEST_TIMEOUT_MS, READ_TIMEOUT_MS, BACKOFF_UNIT_MS, MAX_BACKOFF_MS, MAX_RECONNECT_ATTEMPTS];

fn params() -> &'static RwLock<HashMap<String, String>> {
    static PARAMS: OnceLock<RwLock<HashMap<String, String>>> = OnceLock::new();
    PARAMS.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Sets a process-wide parameter.
///
/// Recognised keys (`request_timeout_ms`, `read_timeout_ms`, `backoff_unit_ms`,
/// `max_backoff_ms`, `max_reconnect_attempts`) must hold non-negative integers.
/// Other keys are stored as given. An empty value for `max_reconnect_attempts`
/// restores unbounded reconnection.
///
/// ```
/// tqapi::set_params("request_timeout_ms", "5000").expect("valid timeout");
/// assert_eq!(tqapi::get_param("request_timeout_ms").as_deref(), Some("5000"));
/// ```
pub fn set_params(key: &str, value: &str) -> Result<(), Error> {
    let key = key.trim();
    let value = value.trim();

    if key.is_empty() {
        return Err(Error::InvalidArgument("parameter key must not be empty".into()));
    }

    let unbounded = key == MAX_RECONNECT_ATTEMPTS && value.is_empty();
    if NUMERIC_KEYS.contains(&key) && !unbounded && value.parse::<u64>().is_err() {
        return Err(Error::InvalidArgument(format!("{key} expects a non-negative integer, got {value:?}")));
    }

    let mut params = params().write()?;
    debug!("set param {key}={value}");
    if unbounded {
        params.remove(key);
    } else {
        params.insert(key.to_owned(), value.to_owned());
    }

    Ok(())
}

/// Returns the current value of a process-wide parameter.
pub fn get_param(key: &str) -> Option<String> {
    match params().read() {
        Ok(params) => params.get(key.trim()).cloned(),
        Err(_) => None,
    }
}

fn numeric_param(key: &str) -> Option<u64> {
    get_param(key).and_then(|value| value.parse().ok())
}

/// Settings applied to a single client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOptions {
    /// Deadline for each request/response call.
    pub request_timeout: Duration,
    /// How long the read loop blocks on the socket before checking for shutdown.
    pub read_timeout: Duration,
    /// Base unit of the Fibonacci reconnect backoff.
    pub backoff_unit: Duration,
    /// Upper bound of the wait between reconnect attempts.
    pub max_backoff: Duration,
    /// Reconnect attempts before giving up. `None` retries until the client is closed.
    pub max_reconnect_attempts: Option<u32>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(1),
            backoff_unit: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            max_reconnect_attempts: None,
        }
    }
}

impl ClientOptions {
    /// Defaults overridden by any recognised process-wide parameters.
    pub fn from_params() -> Self {
        let mut options = Self::default();

        if let Some(ms) = numeric_param(REQUEST_TIMEOUT_MS) {
            options.request_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = numeric_param(READ_TIMEOUT_MS) {
            options.read_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = numeric_param(BACKOFF_UNIT_MS) {
            options.backoff_unit = Duration::from_millis(ms);
        }
        if let Some(ms) = numeric_param(MAX_BACKOFF_MS) {
            options.max_backoff = Duration::from_millis(ms);
        }
        if let Some(attempts) = numeric_param(MAX_RECONNECT_ATTEMPTS) {
            options.max_reconnect_attempts = Some(u32::try_from(attempts).unwrap_or(u32::MAX));
        }

        options
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn backoff(mut self, unit: Duration, max: Duration) -> Self {
        self.backoff_unit = unit;
        self.max_backoff = max;
        self
    }

    pub fn max_reconnect_attempts(mut self, attempts: Option<u32>) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }
}

#[cfg(test)]
pub(crate) fn clear_params() {
    if let Ok(mut params) = params().write() {
        params.clear();
    }
}
