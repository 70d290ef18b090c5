//! Record of the market data subscriptions held by one data client.
//!
//! The server forgets every subscription when the connection drops, so the
//! registry is the source of truth and is replayed in full after a reconnect.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use std::time::Duration;

use log::{debug, info, warn};
use serde_json::json;

use crate::messages::methods;
use crate::transport::MessageBus;
use crate::Error;

/// Splits codes given as separate items or comma-joined strings.
/// Whitespace and empty entries are ignored.
pub(crate) fn normalize_codes<I, S>(codes: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    codes
        .into_iter()
        .flat_map(|item| {
            item.as_ref()
                .split(',')
                .map(str::trim)
                .filter(|code| !code.is_empty())
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .collect()
}

pub(crate) fn join_codes<'a>(codes: impl IntoIterator<Item = &'a String>) -> String {
    codes.into_iter().map(String::as_str).collect::<Vec<_>>().join(",")
}

/// Instrument codes per bar cycle. A code appears at most once per cycle.
#[derive(Debug, Default)]
pub(crate) struct SubscriptionRegistry {
    cycles: Mutex<BTreeMap<String, BTreeSet<String>>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds codes to the cycle. Returns the codes that were not already present.
    pub fn subscribe(&self, cycle: &str, codes: &BTreeSet<String>) -> Result<BTreeSet<String>, Error> {
        let mut cycles = self.cycles.lock()?;
        let added: BTreeSet<String> = match cycles.get(cycle) {
            Some(subscribed) => codes.difference(subscribed).cloned().collect(),
            None => codes.clone(),
        };

        if !added.is_empty() {
            cycles.entry(cycle.to_string()).or_default().extend(added.iter().cloned());
        }

        Ok(added)
    }

    /// Removes codes from the cycle. Returns the codes that were present.
    pub fn unsubscribe(&self, cycle: &str, codes: &BTreeSet<String>) -> Result<BTreeSet<String>, Error> {
        let mut cycles = self.cycles.lock()?;
        let Some(subscribed) = cycles.get_mut(cycle) else {
            return Ok(BTreeSet::new());
        };

        let removed: BTreeSet<String> = codes.intersection(subscribed).cloned().collect();
        subscribed.retain(|code| !removed.contains(code));
        if subscribed.is_empty() {
            cycles.remove(cycle);
        }

        Ok(removed)
    }

    pub fn codes(&self, cycle: &str) -> Result<BTreeSet<String>, Error> {
        let cycles = self.cycles.lock()?;
        Ok(cycles.get(cycle).cloned().unwrap_or_default())
    }

    /// Copy of every non-empty cycle and its codes.
    pub fn snapshot(&self) -> Result<BTreeMap<String, BTreeSet<String>>, Error> {
        let cycles = self.cycles.lock()?;
        Ok(cycles.iter().filter(|(_, codes)| !codes.is_empty()).map(|(cycle, codes)| (cycle.clone(), codes.clone())).collect())
    }

    /// Re-issues one subscribe request per non-empty cycle with its full code set.
    ///
    /// Keeps going when a cycle fails and returns the first error.
    pub fn replay(&self, message_bus: &dyn MessageBus, timeout: Duration) -> Result<(), Error> {
        // Snapshot first so the lock is not held during I/O.
        let snapshot = self.snapshot()?;
        if snapshot.is_empty() {
            debug!("no subscriptions to replay");
            return Ok(());
        }

        let mut first_error = None;
        for (cycle, codes) in &snapshot {
            let params = json!({"codes": join_codes(codes), "cycle": cycle});
            match message_bus.call(methods::SUBSCRIBE, params, timeout) {
                Ok(_) => info!("replayed {} subscription(s) for cycle {cycle}", codes.len()),
                Err(e) => {
                    warn!("failed to replay subscriptions for cycle {cycle}: {e}");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
