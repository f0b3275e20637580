//! Transport module - the boundary to the underlying gRPC call object.
//!
//! A transport hands each new RPC over as an [`IncomingCall`]: the method
//! name, the client's request headers, and the two halves of the call.
//! The halves are split so the inbound side can be awaited while the
//! outbound side is written from another task (duplex calls).
//!
//! Framing, HTTP/2, TLS and wire codecs stay inside the transport; this crate
//! only decides what gets sent and when.
//!
//! [`memory`] is an in-process implementation backed by channels.

pub mod memory;
mod signal;

pub use signal::CancelSignal;

use futures::future::BoxFuture;

use crate::codec::Message;
use crate::error::Result;
use crate::protocol::{Metadata, Status};

/// Receiving half of a call.
pub trait InboundHalf: Send + 'static {
    /// Receive the next request element.
    ///
    /// Resolves to `Ok(None)` once the client has half-closed its side.
    fn recv(&mut self) -> BoxFuture<'_, Result<Option<Message>>>;

    /// Flow-control hint: the consumer paused (`true`) or resumed (`false`)
    /// intake. No further `recv` happens while paused.
    fn set_paused(&mut self, _paused: bool) {}
}

/// Sending half of a call.
pub trait OutboundHalf: Send + 'static {
    /// Write the response headers.
    fn send_headers(&mut self, headers: Metadata) -> BoxFuture<'_, Result<()>>;

    /// Write one element of a streaming response.
    ///
    /// Suspends until the transport can accept more data.
    fn send_message(&mut self, message: Message) -> BoxFuture<'_, Result<()>>;

    /// Write the single response of a unary or request-streaming call.
    fn send_response(&mut self, message: Message) -> BoxFuture<'_, Result<()>>;

    /// Terminate the call with a status and trailers.
    fn terminate(&mut self, status: Status, trailers: Metadata) -> BoxFuture<'_, Result<()>>;
}

/// A new RPC delivered by the transport.
pub struct IncomingCall {
    /// Method name or full path (`/package.Service/Method`).
    pub method: String,
    /// Request headers sent by the client.
    pub metadata: Metadata,
    /// Receiving half.
    pub inbound: Box<dyn InboundHalf>,
    /// Sending half.
    pub outbound: Box<dyn OutboundHalf>,
    /// Fires when the client cancels or the transport closes the call.
    pub cancel: CancelSignal,
}

impl IncomingCall {
    /// Assemble an incoming call from its parts.
    pub fn new(
        method: impl Into<String>,
        metadata: Metadata,
        inbound: Box<dyn InboundHalf>,
        outbound: Box<dyn OutboundHalf>,
        cancel: CancelSignal,
    ) -> Self {
        Self {
            method: method.into(),
            metadata,
            inbound,
            outbound,
            cancel,
        }
    }
}

impl std::fmt::Debug for IncomingCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IncomingCall")
            .field("method", &self.method)
            .field("metadata", &self.metadata)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}
