//! Market data: quote, bar and tick queries, and pushed quote/bar subscriptions.
//!
//! Subscriptions are tracked per bar cycle and replayed in full after every
//! reconnect, since the server forgets them when the connection drops.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use log::{debug, warn};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::client::Session;
use crate::config::ClientOptions;
use crate::connection::ConnectionState;
use crate::dispatcher::{record_handler, EventKind};
use crate::messages::{methods, Codec, JsonCodec};
use crate::records::{decode_record, decode_rows, Bar, DailyBar, Quote, Tick};
use crate::subscriptions::{join_codes, normalize_codes, SubscriptionRegistry};
use crate::Error;


/// Cycle used by [DataClient::subscribe] and [DataClient::unsubscribe].
pub const DEFAULT_CYCLE: &str = "1m";

/// Price adjustment accepted by [DataClient::daily_bar].
const PRICE_ADJUSTMENTS: [&str; 3] = ["", "forward", "backward"];

// Payload of a pushed bar event.
#[derive(Deserialize)]
struct BarEvent {
    cycle: String,
    bar: Value,
}

/// Client for the market data service.
///
/// # Examples
///
/// ```no_run
/// use tqapi::DataClient;
///
/// let client = DataClient::connect("127.0.0.1:10002").expect("connection failed");
///
/// client.set_on_quote(|quote| println!("{} {}", quote.code, quote.last)).expect("register failed");
/// client.subscribe(["000001.SH,600000.SH"]).expect("subscribe failed");
/// ```
#[derive(Debug)]
pub struct DataClient {
    session: Session,
    subscriptions: Arc<SubscriptionRegistry>,
    // Serializes subscribe and unsubscribe round trips so a rollback only undoes its own change.
    changes: Mutex<()>,
    replay: Mutex<Option<JoinHandle<()>>>,
}

impl DataClient {
    /// Connects to the market data service at `address`, e.g. `127.0.0.1:10002`.
    ///
    /// Options come from the process-wide parameters, see [crate::set_params].
    pub fn connect(address: &str) -> Result<DataClient, Error> {
        Self::connect_with_options(address, ClientOptions::from_params())
    }

    pub fn connect_with_options(address: &str, options: ClientOptions) -> Result<DataClient, Error> {
        Self::connect_with_codec(address, options, Arc::new(JsonCodec))
    }

    /// Connects using a frame encoding other than the default JSON codec.
    pub fn connect_with_codec(address: &str, options: ClientOptions, codec: Arc<dyn Codec>) -> Result<DataClient, Error> {
        let session = Session::connect(address, options, codec)?;
        Self::start(session)
    }

    #[cfg(test)]
    pub(crate) fn stubbed(message_bus: Arc<dyn crate::transport::MessageBus>) -> Result<DataClient, Error> {
        Self::start(Session::stubbed(message_bus))
    }

    // Starts the thread that replays subscriptions after every reconnect.
    fn start(session: Session) -> Result<DataClient, Error> {
        let subscriptions = Arc::new(SubscriptionRegistry::new());

        let reconnected = session.reconnected()?;
        let message_bus = session.message_bus();
        let timeout = session.options().request_timeout;
        let registry = Arc::clone(&subscriptions);

        let handle = thread::Builder::new().name("tqapi-replay".into()).spawn(move || {
            for () in reconnected.iter() {
                if let Err(e) = registry.replay(message_bus.as_ref(), timeout) {
                    warn!("subscription replay incomplete: {e}");
                }
            }
            debug!("replay thread finished");
        })?;

        Ok(DataClient {
            session,
            subscriptions,
            changes: Mutex::new(()),
            replay: Mutex::new(Some(handle)),
        })
    }

    /// Subscribes to codes on the default cycle. Returns every code now subscribed on it.
    ///
    /// Codes may be passed separately or comma-joined: `["600000.SH,000001.SZ"]`.
    pub fn subscribe<I, S>(&self, codes: I) -> Result<BTreeSet<String>, Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.subscribe_cycle(DEFAULT_CYCLE, codes)
    }

    pub fn unsubscribe<I, S>(&self, codes: I) -> Result<BTreeSet<String>, Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.unsubscribe_cycle(DEFAULT_CYCLE, codes)
    }

    /// Subscribes to codes on `cycle`. Codes already subscribed are not sent again.
    ///
    /// The codes are recorded before the request is sent so that a reconnect
    /// racing with this call replays them. A rejected request is rolled back.
    pub fn subscribe_cycle<I, S>(&self, cycle: &str, codes: I) -> Result<BTreeSet<String>, Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let codes = normalize_codes(codes);
        if self.session.is_closed() {
            return Err(Error::InvalidHandle);
        }

        let _changing = self.changes.lock()?;
        let added = self.subscriptions.subscribe(cycle, &codes)?;
        if added.is_empty() {
            return self.subscriptions.codes(cycle);
        }

        let params = json!({"codes": join_codes(&added), "cycle": cycle});
        if let Err(e) = self.session.call(methods::SUBSCRIBE, params) {
            if !outcome_unknown(&e) {
                self.subscriptions.unsubscribe(cycle, &added)?;
            }
            return Err(e);
        }

        self.subscriptions.codes(cycle)
    }

    /// Unsubscribes codes from `cycle`. Codes not subscribed are ignored.
    pub fn unsubscribe_cycle<I, S>(&self, cycle: &str, codes: I) -> Result<BTreeSet<String>, Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let codes = normalize_codes(codes);
        if self.session.is_closed() {
            return Err(Error::InvalidHandle);
        }

        let _changing = self.changes.lock()?;
        let removed = self.subscriptions.unsubscribe(cycle, &codes)?;
        if removed.is_empty() {
            return self.subscriptions.codes(cycle);
        }

        let params = json!({"codes": join_codes(&removed), "cycle": cycle});
        if let Err(e) = self.session.call(methods::UNSUBSCRIBE, params) {
            if !outcome_unknown(&e) {
                self.subscriptions.subscribe(cycle, &removed)?;
            }
            return Err(e);
        }

        self.subscriptions.codes(cycle)
    }

    /// Every non-empty cycle and its subscribed codes.
    pub fn subscriptions(&self) -> Result<BTreeMap<String, BTreeSet<String>>, Error> {
        self.subscriptions.snapshot()
    }

    pub fn quote(&self, code: &str) -> Result<Quote, Error> {
        decode_record(self.session.call(methods::QUOTE, json!({"code": code}))?)
    }

    /// Intraday bars of `code`. A `trading_day` of 0 means the current day.
    pub fn bar(&self, code: &str, cycle: &str, trading_day: i32, align: bool) -> Result<Vec<Bar>, Error> {
        let params = json!({"code": code, "cycle": cycle, "trading_day": trading_day, "align": align});
        decode_rows(self.session.call(methods::BAR, params)?)
    }

    /// Daily bars of `code`. `price_adj` is "", "forward" or "backward".
    pub fn daily_bar(&self, code: &str, price_adj: &str, align: bool) -> Result<Vec<DailyBar>, Error> {
        if !PRICE_ADJUSTMENTS.contains(&price_adj) {
            return Err(Error::InvalidArgument(format!("unknown price adjustment: {price_adj}")));
        }

        let params = json!({"code": code, "price_adj": price_adj, "align": align});
        decode_rows(self.session.call(methods::DAILY_BAR, params)?)
    }

    pub fn tick(&self, code: &str, trading_day: i32, align: bool) -> Result<Vec<Tick>, Error> {
        let params = json!({"code": code, "trading_day": trading_day, "align": align});
        decode_rows(self.session.call(methods::TICK, params)?)
    }

    /// Sets the callback for pushed quotes, replacing any previous one.
    pub fn set_on_quote<F>(&self, callback: F) -> Result<(), Error>
    where
        F: Fn(Quote) + Send + Sync + 'static,
    {
        self.session.register(EventKind::Quote, record_handler(callback))
    }

    /// Sets the callback for pushed bars, called with the bar's cycle.
    pub fn set_on_bar<F>(&self, callback: F) -> Result<(), Error>
    where
        F: Fn(String, Bar) + Send + Sync + 'static,
    {
        self.session.register(
            EventKind::Bar,
            Arc::new(move |payload: &Value| -> Result<(), Error> {
                let event = BarEvent::deserialize(payload)?;
                let bar = decode_record(event.bar)?;
                callback(event.cycle, bar);
                Ok(())
            }),
        )
    }

    /// Current state of the underlying connection.
    pub fn state(&self) -> ConnectionState {
        self.session.state()
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    /// Closes the connection and stops subscription replay. Dropping the client also closes it.
    pub fn close(&self) {
        self.session.close();

        let handle = match self.replay.lock() {
            Ok(mut replay) => replay.take(),
            Err(_) => None,
        };
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if let Err(e) = handle.join() {
                warn!("could not join replay thread: {e:?}");
            }
        }
    }
}

impl Drop for DataClient {
    fn drop(&mut self) {
        self.close();
    }
}

// Failures that leave the server state unknown. The change is kept and the next replay settles it.
fn outcome_unknown(error: &Error) -> bool {
    matches!(error, Error::NotConnected | Error::ConnectionLost | Error::Timeout)
}
