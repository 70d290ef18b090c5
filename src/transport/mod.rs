//! Transport layer: sockets, framing, the read loop and correlation of requests with responses.

pub(crate) mod common;
pub(crate) mod pending;
pub(crate) mod recorder;
pub(crate) mod sync;

pub(crate) use sync::{MessageBus, TcpMessageBus, TcpSocket};
