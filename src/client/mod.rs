//! Session plumbing shared by the trade and data clients.

pub(crate) mod error_handler;
pub(crate) mod id_generator;
mod session;

pub(crate) use session::Session;
