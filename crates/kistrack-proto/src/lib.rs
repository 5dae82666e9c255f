//! Async client for the Kismet line-oriented server protocol.
//!
//! - [`line`] frames and tokenizes `*NAME: field ...` server sentences.
//! - [`ClientHandle`] keeps a TCP link alive with backoff, negotiates
//!   protocol capabilities, and routes sentences to registered handlers.

pub mod client;
pub mod error;
pub mod line;

pub use client::{
    ClientConfig, ClientEvent, ClientHandle, ProtoHandler, ReconnectConfig, ServerInfo,
};
pub use error::Error;
pub use line::ServerLine;
