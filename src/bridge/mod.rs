//! Stream bridge - moves elements between the transport and the handler.
//!
//! - [`RequestStream`] - inbound elements as a pausable, pull-based stream
//! - [`ResponseSink`] - writable response for streaming calls
//!
//! The bridge is a strict pass-through: no reordering, no read-ahead. The
//! two directions of a duplex call run independently; either may finish
//! first.

mod inbound;
mod outbound;

pub use inbound::RequestStream;
pub use outbound::{ResponseSink, DEFAULT_RESPONSE_BUFFER};

pub(crate) use outbound::{drain, sink_channel};
