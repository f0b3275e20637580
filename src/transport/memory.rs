//! In-process transport backed by bounded channels.
//!
//! [`call`] creates a connected pair: the server-side [`IncomingCall`] to hand
//! to an [`App`](crate::App), and a [`ClientCall`] that plays the client.
//! Both directions are bounded, so a slow reader suspends the writer on the
//! other side the way a real transport's flow control would.
//!
//! # Example
//!
//! ```ignore
//! use grpcware::transport::memory;
//! use grpcware::protocol::Metadata;
//! use serde_json::json;
//!
//! let (incoming, mut client) = memory::call("sayHello", Metadata::new());
//! client.send(json!({ "name": "Bob" })).await?;
//! client.close_send();
//!
//! app.dispatch(incoming).await;
//!
//! let outcome = client.finish().await;
//! assert_eq!(outcome.messages()[0]["message"], "Hello Bob");
//! ```

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::mpsc;

use super::{CancelSignal, IncomingCall, InboundHalf, OutboundHalf};
use crate::codec::Message;
use crate::error::{GrpcwareError, Result};
use crate::protocol::{Metadata, Status};

/// Default capacity of each direction.
pub const DEFAULT_CAPACITY: usize = 16;

/// What the client observes on the wire, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum CallEvent {
    /// Response headers.
    Headers(Metadata),
    /// One response message (single response or stream element).
    Message(Message),
    /// Terminal status with trailers.
    Status {
        /// Final status.
        status: Status,
        /// Trailer metadata.
        trailers: Metadata,
    },
}

/// Create a connected call pair with [`DEFAULT_CAPACITY`].
pub fn call(method: impl Into<String>, metadata: Metadata) -> (IncomingCall, ClientCall) {
    call_with_capacity(method, metadata, DEFAULT_CAPACITY)
}

/// Create a connected call pair with the given per-direction capacity.
pub fn call_with_capacity(
    method: impl Into<String>,
    metadata: Metadata,
    capacity: usize,
) -> (IncomingCall, ClientCall) {
    let (req_tx, req_rx) = mpsc::channel(capacity);
    let (event_tx, event_rx) = mpsc::channel(capacity);
    let cancel = CancelSignal::new();
    let flow = Arc::new(FlowSignals::default());

    let inbound = MemoryInbound {
        rx: req_rx,
        flow: flow.clone(),
    };
    let outbound = MemoryOutbound {
        tx: event_tx,
        terminated: false,
    };

    let incoming = IncomingCall::new(
        method,
        metadata,
        Box::new(inbound),
        Box::new(outbound),
        cancel.clone(),
    );

    let client = ClientCall {
        tx: Some(req_tx),
        rx: event_rx,
        cancel,
        flow,
    };

    (incoming, client)
}

#[derive(Debug, Default)]
struct FlowSignals {
    paused: AtomicBool,
    pauses: AtomicUsize,
}

struct MemoryInbound {
    rx: mpsc::Receiver<Message>,
    flow: Arc<FlowSignals>,
}

impl InboundHalf for MemoryInbound {
    fn recv(&mut self) -> BoxFuture<'_, Result<Option<Message>>> {
        Box::pin(async move { Ok(self.rx.recv().await) })
    }

    fn set_paused(&mut self, paused: bool) {
        self.flow.paused.store(paused, Ordering::Release);
        if paused {
            self.flow.pauses.fetch_add(1, Ordering::AcqRel);
        }
    }
}

struct MemoryOutbound {
    tx: mpsc::Sender<CallEvent>,
    terminated: bool,
}

impl MemoryOutbound {
    async fn emit(&mut self, event: CallEvent) -> Result<()> {
        if self.terminated {
            return Err(GrpcwareError::TransportClosed);
        }
        self.tx
            .send(event)
            .await
            .map_err(|_| GrpcwareError::TransportClosed)
    }
}

impl OutboundHalf for MemoryOutbound {
    fn send_headers(&mut self, headers: Metadata) -> BoxFuture<'_, Result<()>> {
        Box::pin(self.emit(CallEvent::Headers(headers)))
    }

    fn send_message(&mut self, message: Message) -> BoxFuture<'_, Result<()>> {
        Box::pin(self.emit(CallEvent::Message(message)))
    }

    fn send_response(&mut self, message: Message) -> BoxFuture<'_, Result<()>> {
        Box::pin(self.emit(CallEvent::Message(message)))
    }

    fn terminate(&mut self, status: Status, trailers: Metadata) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.emit(CallEvent::Status { status, trailers }).await?;
            self.terminated = true;
            Ok(())
        })
    }
}

/// Client side of an in-memory call.
pub struct ClientCall {
    tx: Option<mpsc::Sender<Message>>,
    rx: mpsc::Receiver<CallEvent>,
    cancel: CancelSignal,
    flow: Arc<FlowSignals>,
}

impl ClientCall {
    /// Send one request element, waiting for capacity.
    pub async fn send(&self, message: Message) -> Result<()> {
        let tx = self.tx.as_ref().ok_or(GrpcwareError::TransportClosed)?;
        tx.send(message)
            .await
            .map_err(|_| GrpcwareError::TransportClosed)
    }

    /// Send one request element without waiting.
    ///
    /// Returns `Err(Backpressure)` when the server is not reading.
    pub fn try_send(&self, message: Message) -> Result<()> {
        let tx = self.tx.as_ref().ok_or(GrpcwareError::TransportClosed)?;
        tx.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => GrpcwareError::Backpressure,
            mpsc::error::TrySendError::Closed(_) => GrpcwareError::TransportClosed,
        })
    }

    /// Half-close: no more request elements.
    pub fn close_send(&mut self) {
        self.tx = None;
    }

    /// Cancel the call from the client side.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether the server currently holds inbound intake paused.
    pub fn is_paused(&self) -> bool {
        self.flow.paused.load(Ordering::Acquire)
    }

    /// How many times the server paused inbound intake.
    pub fn pause_signals(&self) -> usize {
        self.flow.pauses.load(Ordering::Acquire)
    }

    /// Wait for the next event from the server.
    pub async fn next_event(&mut self) -> Option<CallEvent> {
        self.rx.recv().await
    }

    /// Half-close and collect every event up to the terminal status.
    pub async fn finish(mut self) -> ClientOutcome {
        self.close_send();

        let mut events = Vec::new();
        while let Some(event) = self.rx.recv().await {
            let done = matches!(event, CallEvent::Status { .. });
            events.push(event);
            if done {
                break;
            }
        }

        ClientOutcome { events }
    }
}

/// Everything a client observed during one call.
#[derive(Debug, Clone, Default)]
pub struct ClientOutcome {
    /// Events in arrival order.
    pub events: Vec<CallEvent>,
}

impl ClientOutcome {
    /// Response headers, if any were sent.
    pub fn headers(&self) -> Option<&Metadata> {
        self.events.iter().find_map(|e| match e {
            CallEvent::Headers(md) => Some(md),
            _ => None,
        })
    }

    /// Response messages in arrival order.
    pub fn messages(&self) -> Vec<&Message> {
        self.events
            .iter()
            .filter_map(|e| match e {
                CallEvent::Message(m) => Some(m),
                _ => None,
            })
            .collect()
    }

    /// Terminal status, if the call was terminated.
    pub fn status(&self) -> Option<&Status> {
        self.events.iter().find_map(|e| match e {
            CallEvent::Status { status, .. } => Some(status),
            _ => None,
        })
    }

    /// Trailers sent with the terminal status.
    pub fn trailers(&self) -> Option<&Metadata> {
        self.events.iter().find_map(|e| match e {
            CallEvent::Status { trailers, .. } => Some(trailers),
            _ => None,
        })
    }

    /// Number of header events (at most one on a well-behaved call).
    pub fn header_count(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, CallEvent::Headers(_)))
            .count()
    }

    /// Whether headers arrived before every message.
    pub fn headers_first(&self) -> bool {
        let headers = self
            .events
            .iter()
            .position(|e| matches!(e, CallEvent::Headers(_)));
        let first_message = self
            .events
            .iter()
            .position(|e| matches!(e, CallEvent::Message(_)));

        match (headers, first_message) {
            (Some(h), Some(m)) => h < m,
            (_, None) => true,
            (None, Some(_)) => false,
        }
    }
}
