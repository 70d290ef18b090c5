//! Trading: account queries, order placement and order/account notifications.
//!
//! Every call maps to one request on the session. A server-reported failure is
//! returned as [Error::Server]; a successful query without data is an empty `Vec`.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::client::Session;
use crate::config::ClientOptions;
use crate::connection::ConnectionState;
use crate::dispatcher::{record_handler, EventKind};
use crate::messages::{methods, Codec, JsonCodec};
use crate::records::{decode_record, decode_rows, AccountStatus, Balance, Order, Position, Trade};
use crate::Error;

#[cfg(test)]
mod tests;

/// Order side and offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    Buy,
    Sell,
    Short,
    Cover,
    SellToday,
    SellYesterday,
    CoverToday,
    CoverYesterday,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Buy => "Buy",
            Action::Sell => "Sell",
            Action::Short => "Short",
            Action::Cover => "Cover",
            Action::SellToday => "SellToday",
            Action::SellYesterday => "SellYesterday",
            Action::CoverToday => "CoverToday",
            Action::CoverYesterday => "CoverYesterday",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = Error;

    /// Parses an action name, ignoring case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "buy" => Ok(Action::Buy),
            "sell" => Ok(Action::Sell),
            "short" => Ok(Action::Short),
            "cover" => Ok(Action::Cover),
            "selltoday" => Ok(Action::SellToday),
            "sellyesterday" => Ok(Action::SellYesterday),
            "covertoday" => Ok(Action::CoverToday),
            "coveryesterday" => Ok(Action::CoverYesterday),
            _ => Err(Error::InvalidArgument(format!("unknown order action: {s}"))),
        }
    }
}

/// Client for the trading service.
///
/// # Examples
///
/// ```no_run
/// use tqapi::{Action, TradeClient};
///
/// let client = TradeClient::connect("127.0.0.1:10001").expect("connection failed");
///
/// let entrust_no = client
///     .place_order("sim1", "600000.SH", 10.5, 100, Action::Buy, 0)
///     .expect("order rejected");
/// println!("entrust_no: {entrust_no}");
/// ```
#[derive(Debug)]
pub struct TradeClient {
    session: Session,
}

impl TradeClient {
    /// Connects to the trading service at `address`, e.g. `127.0.0.1:10001`.
    ///
    /// Options come from the process-wide parameters, see [crate::set_params].
    pub fn connect(address: &str) -> Result<TradeClient, Error> {
        Self::connect_with_options(address, ClientOptions::from_params())
    }

    pub fn connect_with_options(address: &str, options: ClientOptions) -> Result<TradeClient, Error> {
        Self::connect_with_codec(address, options, Arc::new(JsonCodec))
    }

    /// Connects using a frame encoding other than the default JSON codec.
    pub fn connect_with_codec(address: &str, options: ClientOptions, codec: Arc<dyn Codec>) -> Result<TradeClient, Error> {
        let session = Session::connect(address, options, codec)?;
        Ok(TradeClient { session })
    }

    #[cfg(test)]
    pub(crate) fn stubbed(message_bus: Arc<dyn crate::transport::MessageBus>) -> TradeClient {
        TradeClient {
            session: Session::stubbed(message_bus),
        }
    }

    /// Connection status of every trade account.
    pub fn account_status(&self) -> Result<Vec<AccountStatus>, Error> {
        decode_rows(self.session.call(methods::ACCOUNT_STATUS, json!({}))?)
    }

    pub fn query_balance(&self, account_id: &str) -> Result<Balance, Error> {
        decode_record(self.session.call(methods::QUERY_BALANCE, json!({"account_id": account_id}))?)
    }

    /// Today's fills of one account.
    pub fn query_trades(&self, account_id: &str) -> Result<Vec<Trade>, Error> {
        decode_rows(self.session.call(methods::QUERY_TRADES, json!({"account_id": account_id}))?)
    }

    pub fn query_orders(&self, account_id: &str) -> Result<Vec<Order>, Error> {
        decode_rows(self.session.call(methods::QUERY_ORDERS, json!({"account_id": account_id}))?)
    }

    pub fn query_positions(&self, account_id: &str) -> Result<Vec<Position>, Error> {
        decode_rows(self.session.call(methods::QUERY_POSITIONS, json!({"account_id": account_id}))?)
    }

    /// Places an order and returns its entrust number.
    ///
    /// Negative or non-finite prices and negative sizes are rejected without
    /// contacting the server. An `order_id` of 0 lets the server assign one.
    pub fn place_order(&self, account_id: &str, code: &str, price: f64, size: i64, action: Action, order_id: i64) -> Result<String, Error> {
        if code.trim().is_empty() {
            return Err(Error::InvalidArgument("code must not be empty".into()));
        }
        if !price.is_finite() || price < 0.0 {
            return Err(Error::InvalidArgument(format!("price must be non-negative, got {price}")));
        }
        if size < 0 {
            return Err(Error::InvalidArgument(format!("size must be non-negative, got {size}")));
        }

        let params = json!({
            "account_id": account_id,
            "code": code,
            "price": price,
            "size": size,
            "action": action.as_str(),
            "order_id": order_id,
        });
        let result = self.session.call(methods::PLACE_ORDER, params)?;

        let entrust_no = entrust_no(&result)?;
        debug!("placed {action} {size} {code} @ {price}: {entrust_no}");
        Ok(entrust_no)
    }

    /// Cancels an order identified by its entrust number or its order id.
    pub fn cancel_order(&self, account_id: &str, code: &str, entrust_no: &str, order_id: i64) -> Result<(), Error> {
        if entrust_no.is_empty() && order_id == 0 {
            return Err(Error::InvalidArgument("either entrust_no or order_id is required".into()));
        }

        let params = json!({
            "account_id": account_id,
            "code": code,
            "entrust_no": entrust_no,
            "order_id": order_id,
        });
        self.session.call(methods::CANCEL_ORDER, params)?;
        Ok(())
    }

    /// Runs a broker-specific query and returns its raw result.
    pub fn query(&self, account_id: &str, command: &str, params: &str) -> Result<Value, Error> {
        self.session.call(
            methods::COMMON_QUERY,
            json!({"account_id": account_id, "command": command, "params": params}),
        )
    }

    /// Sets the callback for order status changes, replacing any previous one.
    pub fn set_on_order_status<F>(&self, callback: F) -> Result<(), Error>
    where
        F: Fn(Order) + Send + Sync + 'static,
    {
        self.session.register(EventKind::OrderStatus, record_handler(callback))
    }

    /// Sets the callback for fills, replacing any previous one.
    pub fn set_on_order_trade<F>(&self, callback: F) -> Result<(), Error>
    where
        F: Fn(Trade) + Send + Sync + 'static,
    {
        self.session.register(EventKind::OrderTrade, record_handler(callback))
    }

    pub fn set_on_account_status<F>(&self, callback: F) -> Result<(), Error>
    where
        F: Fn(AccountStatus) + Send + Sync + 'static,
    {
        self.session.register(EventKind::AccountStatus, record_handler(callback))
    }

    /// Current state of the underlying connection.
    pub fn state(&self) -> ConnectionState {
        self.session.state()
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    /// Closes the connection. Pending calls fail with [Error::ConnectionLost]
    /// and later calls with [Error::InvalidHandle]. Dropping the client also closes it.
    pub fn close(&self) {
        self.session.close();
    }
}

fn entrust_no(result: &Value) -> Result<String, Error> {
    let value = match result {
        Value::Object(fields) => fields.get("entrust_no").unwrap_or(&Value::Null),
        Value::Array(rows) if rows.len() == 1 => return entrust_no(&rows[0]),
        other => other,
    };

    match value {
        Value::String(entrust_no) if !entrust_no.is_empty() => Ok(entrust_no.clone()),
        Value::Number(entrust_no) => Ok(entrust_no.to_string()),
        _ => Err(Error::UnexpectedResponse(format!("no entrust_no in {result}"))),
    }
}
