//! Frame definitions and encoding for communication with the quote and trade service.
//!
//! A frame is a request, a response or a pushed event. On the wire each frame is a
//! 4-byte big-endian length followed by the body produced by a [Codec].

use std::fmt::Debug;
use std::io::Write;

use byteorder::{BigEndian, WriteBytesExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Error;


/// Method names understood by the service.
pub mod methods {
    pub const ACCOUNT_STATUS: &str = "tapi.account_status";
    pub const QUERY_BALANCE: &str = "tapi.query_balance";
    pub const QUERY_TRADES: &str = "tapi.query_trades";
    pub const QUERY_ORDERS: &str = "tapi.query_orders";
    pub const QUERY_POSITIONS: &str = "tapi.query_positions";
    pub const PLACE_ORDER: &str = "tapi.place_order";
    pub const CANCEL_ORDER: &str = "tapi.cancel_order";
    pub const COMMON_QUERY: &str = "tapi.common_query";

    pub const SUBSCRIBE: &str = "dapi.subscribe";
    pub const UNSUBSCRIBE: &str = "dapi.unsubscribe";
    pub const QUOTE: &str = "dapi.quote";
    pub const BAR: &str = "dapi.bar";
    pub const DAILY_BAR: &str = "dapi.dailybar";
    pub const TICK: &str = "dapi.tick";

    // Pushed events
    pub const QUOTE_IND: &str = "dapi.quote";
    pub const BAR_IND: &str = "dapi.bar";
    pub const ORDER_STATUS_IND: &str = "tapi.order_status_ind";
    pub const ORDER_TRADE_IND: &str = "tapi.order_trade_ind";
    pub const ACCOUNT_STATUS_IND: &str = "tapi.account_status_ind";
}

/// One discrete unit of wire data.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Outbound call carrying a correlation id.
    Request { id: u64, method: String, params: Value },
    /// Reply to the request with the same correlation id.
    Response { id: u64, result: Value, error: Option<String> },
    /// Unsolicited notification pushed by the server.
    Event { method: String, params: Value },
}

impl Frame {
    pub fn request(id: u64, method: &str, params: Value) -> Frame {
        Frame::Request {
            id,
            method: method.to_owned(),
            params,
        }
    }

    pub fn response(id: u64, result: Value) -> Frame {
        Frame::Response { id, result, error: None }
    }

    pub fn error_response(id: u64, error: &str) -> Frame {
        Frame::Response {
            id,
            result: Value::Null,
            error: Some(error.to_owned()),
        }
    }

    pub fn event(method: &str, params: Value) -> Frame {
        Frame::Event {
            method: method.to_owned(),
            params,
        }
    }
}

/// Converts frames to and from frame bodies. Length framing is handled by the transport.
pub trait Codec: Debug + Send + Sync {
    fn encode(&self, frame: &Frame) -> Result<Vec<u8>, Error>;
    fn decode(&self, data: &[u8]) -> Result<Frame, Error>;
}

// Flat representation shared by all three frame kinds.
#[derive(Debug, Default, Serialize, Deserialize)]
struct RawFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// JSON bodies: `{"id", "method", "params"}` requests, `{"id", "result", "error"}`
/// responses and `{"method", "params"}` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode(&self, frame: &Frame) -> Result<Vec<u8>, Error> {
        let raw = match frame {
            Frame::Request { id, method, params } => RawFrame {
                id: Some(*id),
                method: Some(method.clone()),
                params: Some(params.clone()),
                ..Default::default()
            },
            Frame::Response { id, result, error } => RawFrame {
                id: Some(*id),
                result: Some(result.clone()),
                error: error.clone(),
                ..Default::default()
            },
            Frame::Event { method, params } => RawFrame {
                method: Some(method.clone()),
                params: Some(params.clone()),
                ..Default::default()
            },
        };

        Ok(serde_json::to_vec(&raw)?)
    }

    fn decode(&self, data: &[u8]) -> Result<Frame, Error> {
        let raw: RawFrame = serde_json::from_slice(data)?;

        match (raw.id, raw.method) {
            (Some(id), Some(method)) => Ok(Frame::Request {
                id,
                method,
                params: raw.params.unwrap_or(Value::Null),
            }),
            (Some(id), None) => Ok(Frame::Response {
                id,
                result: raw.result.unwrap_or(Value::Null),
                error: raw.error.filter(|message| !message.is_empty()),
            }),
            (None, Some(method)) => Ok(Frame::Event {
                method,
                params: raw.params.unwrap_or(Value::Null),
            }),
            (None, None) => Err(Error::Codec("frame has neither id nor method".into())),
        }
    }
}

/// Prefixes a frame body with its length.
pub fn encode_length(body: &[u8]) -> Result<Vec<u8>, Error> {
    let length = u32::try_from(body.len()).map_err(|_| Error::Codec(format!("frame of {} bytes is too large", body.len())))?;

    let mut packet: Vec<u8> = Vec::with_capacity(body.len() + 4);
    packet.write_u32::<BigEndian>(length)?;
    packet.write_all(body)?;
    Ok(packet)
}
