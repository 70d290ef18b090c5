//! A synchronous client for the TQuant trading and market data services.
//!
//! Two clients share one runtime: [TradeClient] issues account queries and
//! order requests, [DataClient] queries quotes, bars and ticks and receives
//! pushed quotes and bars for its subscriptions. Each client owns one
//! connection with a dedicated read loop, reconnects with backoff when the
//! connection drops, and delivers pushed events to callbacks on a separate
//! thread.
//!
//! Every call returns a [Result]. A failure reported by the server is
//! [Error::Server]; a query that succeeds without data returns an empty `Vec`.
//!
//!```no_run
//!     use anyhow;
//!     use tqapi::{Action, TradeClient};
//!
//!     fn main() -> anyhow::Result<()> {
//!         let client = TradeClient::connect("127.0.0.1:10001")?;
//!
//!         for position in client.query_positions("sim1")? {
//!             println!("{} {}", position.code, position.current_size);
//!         }
//!
//!         let entrust_no = client.place_order("sim1", "600000.SH", 10.5, 100, Action::Buy, 0)?;
//!         println!("entrust_no: {entrust_no}");
//!         Ok(())
//!     }
//!```

/// Session plumbing shared by both clients.
mod client;

/// Per-client options and process-wide parameters.
mod config;

mod connection;
mod dispatcher;
mod errors;

/// APIs for market data queries and subscriptions.
pub mod market_data;

/// Wire frames and codecs.
pub mod messages;

/// Typed rows returned by queries and carried by events.
pub mod records;

mod subscriptions;

/// APIs for account queries and order management.
pub mod trade;

mod transport;

#[cfg(test)]
pub(crate) mod stubs;

#[doc(inline)]
pub use config::{get_param, set_params, ClientOptions};

#[doc(inline)]
pub use connection::ConnectionState;

#[doc(inline)]
pub use dispatcher::EventKind;

#[doc(inline)]
pub use errors::Error;

#[doc(inline)]
pub use market_data::{DataClient, DEFAULT_CYCLE};

#[doc(inline)]
pub use messages::{Codec, Frame, JsonCodec};

#[doc(inline)]
pub use trade::{Action, TradeClient};
