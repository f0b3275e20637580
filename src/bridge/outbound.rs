//! Outbound direction: response elements drained into the transport.
//!
//! A streaming response is either a lazy sequence assigned by the handler or
//! the receiving end of a [`ResponseSink`]. Both become one boxed stream that
//! [`drain`] pumps into the call one element at a time:
//!
//! ```text
//! Handler task 1 ─┐
//! Handler task 2 ─┼─► ResponseSink (bounded mpsc) ─► drain ─► CallCore ─► transport
//! Handler task N ─┘
//! ```
//!
//! Each element is written before the next one is pulled, so a slow
//! transport suspends the producer. The bounded channel does the same for
//! sink writers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::call::CallCore;
use crate::codec::{JsonCodec, Message};
use crate::error::{GrpcwareError, Result};
use crate::protocol::MetadataArg;

/// Default response buffer between sink writers and the transport.
pub const DEFAULT_RESPONSE_BUFFER: usize = 64;

#[derive(Debug)]
enum SinkItem {
    Message(Message),
    End,
}

/// Writable response of a streaming call.
///
/// Cheaply cloneable; every clone writes into the same ordered response.
/// The response completes when [`end`](Self::end) is called or when every
/// clone is dropped.
#[derive(Clone)]
pub struct ResponseSink {
    tx: mpsc::Sender<SinkItem>,
    closed: Arc<AtomicBool>,
    call: Arc<CallCore>,
}

impl ResponseSink {
    /// Write one response element, waiting for buffer space.
    pub async fn write(&self, message: Message) -> Result<()> {
        self.ensure_writable()?;
        self.tx
            .send(SinkItem::Message(message))
            .await
            .map_err(|_| GrpcwareError::ResponseClosed)
    }

    /// Encode and write one typed response element.
    pub async fn write_as<T: Serialize>(&self, value: &T) -> Result<()> {
        self.write(JsonCodec::encode(value)?).await
    }

    /// Write one element without waiting.
    ///
    /// Returns `Err(Backpressure)` immediately if the buffer is full.
    pub fn try_write(&self, message: Message) -> Result<()> {
        self.ensure_writable()?;
        self.tx
            .try_send(SinkItem::Message(message))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => GrpcwareError::Backpressure,
                mpsc::error::TrySendError::Closed(_) => GrpcwareError::ResponseClosed,
            })
    }

    /// End the response, optionally with an explicit trailer payload.
    ///
    /// Elements written before `end` are still delivered. A non-empty
    /// mapping replaces the trailers accumulated through `set_status`; an
    /// invalid payload is ignored. Ending twice is a no-op.
    pub async fn end(&self, trailers: impl Into<MetadataArg>) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.call.set_final_trailers(trailers.into());
        // The drain may already be gone (cancelled call); nothing left to end then.
        let _ = self.tx.send(SinkItem::End).await;
        Ok(())
    }

    /// Whether the response was ended.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.tx.is_closed()
    }

    /// Free buffer slots.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.tx.capacity()
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.call.is_cancelled() {
            return Err(GrpcwareError::Cancelled);
        }
        if self.closed.load(Ordering::Acquire) {
            return Err(GrpcwareError::ResponseClosed);
        }
        Ok(())
    }
}

impl std::fmt::Debug for ResponseSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseSink")
            .field("closed", &self.is_closed())
            .field("capacity", &self.capacity())
            .finish()
    }
}

/// Create a sink and the stream of everything written into it.
pub(crate) fn sink_channel(
    capacity: usize,
    call: Arc<CallCore>,
) -> (ResponseSink, BoxStream<'static, Result<Message>>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let sink = ResponseSink {
        tx,
        closed: Arc::new(AtomicBool::new(false)),
        call,
    };

    let elements = stream::unfold(rx, |mut rx| async move {
        match rx.recv().await {
            Some(SinkItem::Message(message)) => Some((Ok(message), rx)),
            Some(SinkItem::End) | None => None,
        }
    });

    (sink, elements.boxed())
}

/// Pump a response stream into the call until it is exhausted.
///
/// Returns the number of elements written. Stops pulling as soon as the
/// call is cancelled, and aborts (dropping the rest of the stream) on the
/// first producer or transport error.
pub(crate) async fn drain(
    call: &CallCore,
    mut elements: BoxStream<'static, Result<Message>>,
) -> Result<usize> {
    let mut written = 0;

    loop {
        let next = tokio::select! {
            biased;
            _ = call.cancel_signal().cancelled() => return Err(GrpcwareError::Cancelled),
            next = elements.next() => next,
        };

        match next {
            Some(Ok(message)) => {
                call.write_message(message).await?;
                written += 1;
            }
            Some(Err(e)) => return Err(e),
            None => return Ok(written),
        }
    }
}
