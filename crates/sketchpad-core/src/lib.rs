//! Client-side core of sketchpad: reassembling streamed reply documents,
//! the per-conversation state machine, and the relay that carries a live
//! stream across a navigation.

pub mod controllers;
pub mod error;
pub mod models;
pub mod services;

use bytes::Bytes;
use futures::stream::BoxStream;

pub use error::{ChatError, ErrorKind, TransportError};

/// Raw body of a streamed reply.
pub type ByteStream = BoxStream<'static, Result<Bytes, TransportError>>;
