//! Typed rows returned by queries and carried by pushed events.
//!
//! Field sets follow what the service sends. Fields the service adds beyond the
//! ones named here are kept in each record's `extra` map.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::{Date, Month, PrimitiveDateTime, Time};

use crate::Error;

/// Status of one trading account's connection on the server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountStatus {
    pub account_id: String,
    pub broker: String,
    pub account: String,
    pub status: String,
    pub msg: String,
    pub account_type: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Balance {
    pub account_id: String,
    pub fund_account: String,
    pub init_balance: f64,
    pub enable_balance: f64,
    pub margin: f64,
    pub float_pnl: f64,
    pub close_pnl: f64,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Order {
    pub account_id: String,
    pub code: String,
    pub name: String,
    pub entrust_no: String,
    pub entrust_action: String,
    pub entrust_price: f64,
    pub entrust_size: i64,
    pub entrust_date: i64,
    pub entrust_time: i64,
    pub fill_price: f64,
    pub fill_size: i64,
    pub status: String,
    pub status_msg: String,
    pub order_id: i64,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Trade {
    pub account_id: String,
    pub code: String,
    pub name: String,
    pub entrust_no: String,
    pub entrust_action: String,
    pub fill_no: String,
    pub fill_size: i64,
    pub fill_price: f64,
    pub fill_date: i64,
    pub fill_time: i64,
    pub order_id: i64,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Position {
    pub account_id: String,
    pub code: String,
    pub name: String,
    pub current_size: i64,
    pub enable_size: i64,
    pub init_size: i64,
    pub today_size: i64,
    pub frozen_size: i64,
    pub side: String,
    pub cost: f64,
    pub cost_price: f64,
    pub last_price: f64,
    pub float_pnl: f64,
    pub close_pnl: f64,
    pub margin: f64,
    pub commission: f64,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Latest market snapshot of an instrument.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Quote {
    pub code: String,
    pub date: i64,
    pub time: i64,
    pub recv_time: i64,
    pub trading_day: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub last: f64,
    pub high_limit: f64,
    pub low_limit: f64,
    pub pre_close: f64,
    pub volume: f64,
    pub turnover: f64,
    pub ask1: f64,
    pub bid1: f64,
    pub ask_vol1: f64,
    pub bid_vol1: f64,
    pub settle: f64,
    pub pre_settle: f64,
    pub oi: f64,
    pub pre_oi: f64,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Quote {
    /// Exchange timestamp of the quote.
    pub fn date_time(&self) -> Option<PrimitiveDateTime> {
        date_time(self.date, self.time)
    }
}

/// Intraday bar for one cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Bar {
    pub code: String,
    pub date: i64,
    pub time: i64,
    pub trading_day: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub turnover: f64,
    pub oi: f64,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Bar {
    /// Combines `date` (yyyymmdd) and `time` (HHMMSSmmm).
    pub fn date_time(&self) -> Option<PrimitiveDateTime> {
        date_time(self.date, self.time)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DailyBar {
    pub code: String,
    pub date: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub turnover: f64,
    pub oi: f64,
    pub settle: f64,
    pub pre_close: f64,
    pub pre_settle: f64,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl DailyBar {
    pub fn date(&self) -> Option<Date> {
        parse_date(self.date)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tick {
    pub code: String,
    pub date: i64,
    pub time: i64,
    pub trading_day: i64,
    pub last: f64,
    pub volume: f64,
    pub turnover: f64,
    pub ask1: f64,
    pub bid1: f64,
    pub ask_vol1: f64,
    pub bid_vol1: f64,
    pub oi: f64,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Tick {
    pub fn date_time(&self) -> Option<PrimitiveDateTime> {
        date_time(self.date, self.time)
    }
}

fn parse_date(date: i64) -> Option<Date> {
    let year = i32::try_from(date / 10000).ok()?;
    let month = Month::try_from(u8::try_from(date / 100 % 100).ok()?).ok()?;
    let day = u8::try_from(date % 100).ok()?;

    Date::from_calendar_date(year, month, day).ok()
}

fn date_time(date: i64, time: i64) -> Option<PrimitiveDateTime> {
    let date = parse_date(date)?;

    let millis = u16::try_from(time % 1000).ok()?;
    let seconds = time / 1000;
    let hour = u8::try_from(seconds / 10000).ok()?;
    let minute = u8::try_from(seconds / 100 % 100).ok()?;
    let second = u8::try_from(seconds % 100).ok()?;
    let time = Time::from_hms_milli(hour, minute, second, millis).ok()?;

    Some(PrimitiveDateTime::new(date, time))
}

/// Decodes a table result into records.
///
/// Accepts row-oriented tables (`[{..}, {..}]`), column-oriented tables
/// (`{"field": [..], ..}`) and `null` for an empty result.
pub(crate) fn decode_rows<T: DeserializeOwned>(value: Value) -> Result<Vec<T>, Error> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(rows) => rows.into_iter().map(decode_record).collect(),
        Value::Object(columns) if columns.values().all(Value::is_array) => transpose(columns)?.into_iter().map(|row| decode_record(Value::Object(row))).collect(),
        Value::Object(row) => Ok(vec![decode_record(Value::Object(row))?]),
        other => Err(Error::UnexpectedResponse(format!("expected table, got {other}"))),
    }
}

/// Decodes a single record, taking the first row of a one-row table.
pub(crate) fn decode_record<T: DeserializeOwned>(value: Value) -> Result<T, Error> {
    match value {
        Value::Array(mut rows) if rows.len() == 1 => decode_record(rows.remove(0)),
        Value::Object(columns) if !columns.is_empty() && columns.values().all(Value::is_array) => {
            let mut rows = transpose(columns)?;
            match rows.len() {
                1 => decode_record(Value::Object(rows.remove(0))),
                n => Err(Error::UnexpectedResponse(format!("expected one row, got {n}"))),
            }
        }
        value @ Value::Object(_) => Ok(serde_json::from_value(value)?),
        other => Err(Error::UnexpectedResponse(format!("expected record, got {other}"))),
    }
}

fn transpose(columns: Map<String, Value>) -> Result<Vec<Map<String, Value>>, Error> {
    let mut rows: Vec<Map<String, Value>> = Vec::new();
    let mut length = None;

    for (name, column) in columns {
        let Value::Array(values) = column else {
            return Err(Error::UnexpectedResponse(format!("column {name} is not an array")));
        };

        match length {
            None => {
                length = Some(values.len());
                rows.resize_with(values.len(), Map::new);
            }
            Some(n) if n != values.len() => {
                return Err(Error::UnexpectedResponse(format!("column {name} has {} rows, expected {n}", values.len())));
            }
            Some(_) => {}
        }

        for (row, value) in rows.iter_mut().zip(values) {
            row.insert(name.clone(), value);
        }
    }

    Ok(rows)
}
